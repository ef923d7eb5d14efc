//! Named pass/fail checks emitted by players, tallied per label.
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

/// The checks a virtual player knows how to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    ConnectionEstablished,
    PongReceived,
    GameUpdateReceived,
    MessageDecoded,
    TransportOk,
}

impl Check {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "connection_established",
            Self::PongReceived => "pong_received",
            Self::GameUpdateReceived => "game_update_received",
            Self::MessageDecoded => "message_decoded",
            Self::TransportOk => "transport_ok",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResult {
    pub label: String,
    pub passed: bool,
    pub at: Instant,
}

impl AssertionResult {
    pub fn new(check: Check, passed: bool) -> Self {
        Self {
            label: check.label().to_string(),
            passed,
            at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub passes: u64,
    pub fails: u64,
}

impl Tally {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.passes as f64 / self.total() as f64
    }
}

/// Shared by every player task of a run.
#[derive(Debug, Default)]
pub struct AssertionSink {
    tallies: Mutex<HashMap<String, Tally>>,
}

impl AssertionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: AssertionResult) {
        trace!(label = %result.label, passed = result.passed, "check recorded");
        let mut tallies = self.tallies.lock();
        let tally = tallies.entry(result.label).or_default();
        if result.passed {
            tally.passes += 1;
        } else {
            tally.fails += 1;
        }
    }

    pub fn check(&self, check: Check, passed: bool) {
        self.record(AssertionResult::new(check, passed));
    }

    pub fn tally(&self, label: &str) -> Tally {
        self.tallies.lock().get(label).copied().unwrap_or_default()
    }

    /// Snapshot of every label seen so far, ordered by label.
    pub fn summary(&self) -> BTreeMap<String, Tally> {
        self.tallies
            .lock()
            .iter()
            .map(|(label, tally)| (label.clone(), *tally))
            .collect()
    }
}
