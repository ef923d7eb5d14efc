//! Turns ramp stages into a time-ordered plan of player spawns.
//!
//! Offsets are measured from run start. When a stage begins, the gap between
//! its target and the players currently active is spread evenly over the
//! stage's duration; stages whose target is at or below the active count only
//! hold the clock. Players are never retired by the plan, they finish on their
//! own. Without a live [`ActiveGauge`] every spawned player counts as active.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{IdentityGenerator, PlayerIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Spawn { at: Duration, identity: PlayerIdentity },
    /// Nothing to do until `until`; emitted at the end of every stage.
    Hold { until: Duration },
}

impl Directive {
    pub fn at(&self) -> Duration {
        match self {
            Self::Spawn { at, .. } => *at,
            Self::Hold { until } => *until,
        }
    }
}

/// Lazy iterator over the spawn plan.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    stages: Vec<Stage>,
    identities: IdentityGenerator,
    stage_idx: usize,
    stage_start: Duration,
    spawned: usize,
    current: Option<StageCursor>,
    live: Option<Arc<ActiveGauge>>,
}

#[derive(Debug, Clone, Copy)]
struct StageCursor {
    cadence: Duration,
    remaining: usize,
    step: u32,
}

impl RampSchedule {
    pub fn new(stages: Vec<Stage>, identities: IdentityGenerator) -> Self {
        Self {
            stages,
            identities,
            stage_idx: 0,
            stage_start: Duration::ZERO,
            spawned: 0,
            current: None,
            live: None,
        }
    }

    /// Size each stage against the players `gauge` reports as running
    /// instead of the lifetime spawn count.
    pub fn tracking(mut self, gauge: Arc<ActiveGauge>) -> Self {
        self.live = Some(gauge);
        self
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, stage| total.saturating_add(stage.duration))
    }

    /// Number of spawns the plan authorizes when no player finishes early.
    pub fn planned_spawns(&self) -> usize {
        self.stages
            .iter()
            .map(|stage| stage.target)
            .max()
            .unwrap_or(0)
    }

    fn enter_stage(&mut self) -> StageCursor {
        let stage = self.stages[self.stage_idx];
        let active = match &self.live {
            Some(gauge) => gauge.active(),
            None => self.spawned,
        };
        let delta = stage.target.saturating_sub(active);
        let divisor = u32::try_from(delta.max(1)).unwrap_or(u32::MAX);
        StageCursor {
            cadence: stage.duration / divisor,
            remaining: delta,
            step: 0,
        }
    }
}

impl Iterator for RampSchedule {
    type Item = Directive;

    fn next(&mut self) -> Option<Directive> {
        if self.stage_idx >= self.stages.len() {
            return None;
        }

        let mut cursor = match self.current {
            Some(cursor) => cursor,
            None => self.enter_stage(),
        };

        if cursor.remaining > 0 {
            let at = self.stage_start + cursor.cadence * cursor.step;
            let identity = self.identities.identity(self.spawned);
            cursor.remaining -= 1;
            cursor.step += 1;
            self.spawned += 1;
            self.current = Some(cursor);
            return Some(Directive::Spawn { at, identity });
        }

        self.stage_start += self.stages[self.stage_idx].duration;
        self.stage_idx += 1;
        self.current = None;
        Some(Directive::Hold {
            until: self.stage_start,
        })
    }
}

/// Count of running players, with its high-water mark.
#[derive(Debug, Default)]
pub struct ActiveGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveGauge {
    /// Count one more running player until the guard drops.
    pub fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(now, Ordering::Relaxed);
        ActiveGuard {
            gauge: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct ActiveGuard {
    gauge: Arc<ActiveGauge>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::Relaxed);
    }
}
