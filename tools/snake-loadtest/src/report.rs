use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::assertions::Tally;
use crate::config::LoadTestConfig;
use crate::player::{CloseReason, PlayerOutcome};
use crate::protocol::WireDirection;
use crate::schedule::Stage;

/// Process exit code of a run whose validation passed.
pub const EXIT_PASS: i32 = 0;
/// Validation failed or the run could not complete.
pub const EXIT_FAIL: i32 = 1;
/// Bad configuration or unusable output.
pub const EXIT_USAGE: i32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub label: String,
    pub passes: u64,
    pub fails: u64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub passed: bool,
    pub checks: Vec<ValidationCheck>,
}

impl ValidationSummary {
    pub fn dry_run() -> Self {
        Self {
            passed: true,
            checks: vec![ValidationCheck {
                name: "dry_run".to_string(),
                passed: true,
                details: "No connections opened; plan and identity generation only.".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub url: String,
    pub stages: Vec<Stage>,
    pub ping_enabled: bool,
    pub move_enabled: bool,
    pub ping_interval_ms: u128,
    pub move_interval_ms: u128,
    pub settle_ms: u128,
    pub session_secs: Option<u64>,
    pub deadline_ms: u128,
    pub wire_direction: WireDirection,
    pub seed: u64,
    pub dry_run: bool,
    pub min_connect_rate: f64,
    pub min_check_rate: f64,
}

impl From<&LoadTestConfig> for RunConfigSnapshot {
    fn from(config: &LoadTestConfig) -> Self {
        Self {
            url: config.url.to_string(),
            stages: config.stages.clone(),
            ping_enabled: config.behavior.ping_enabled,
            move_enabled: config.behavior.move_enabled,
            ping_interval_ms: config.behavior.ping_interval.as_millis(),
            move_interval_ms: config.behavior.move_interval.as_millis(),
            settle_ms: config.behavior.settle_delay.as_millis(),
            session_secs: config.behavior.session.map(|session| session.as_secs()),
            deadline_ms: config.deadline().as_millis(),
            wire_direction: config.behavior.wire_direction,
            seed: config.seed,
            dry_run: config.dry_run,
            min_connect_rate: config.min_connect_rate,
            min_check_rate: config.min_check_rate,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Totals {
    pub planned_players: usize,
    pub spawned_players: usize,
    pub completed_players: usize,
    pub connected_players: usize,
    pub failed_connections: usize,
    pub forced_closes: usize,
    pub messages_sent: usize,
    pub messages_received: usize,
    pub decode_errors: usize,
}

impl Totals {
    pub fn from_outcomes(players: &[PlayerOutcome], planned: usize, spawned: usize) -> Self {
        Self {
            planned_players: planned,
            spawned_players: spawned,
            completed_players: players.len(),
            connected_players: players.iter().filter(|p| p.connected).count(),
            failed_connections: players.iter().filter(|p| !p.connected).count(),
            forced_closes: players
                .iter()
                .filter(|p| {
                    matches!(p.close_reason, CloseReason::Cancelled | CloseReason::Aborted)
                })
                .count(),
            messages_sent: players.iter().map(|p| p.sent).sum(),
            messages_received: players.iter().map(|p| p.received).sum(),
            decode_errors: players.iter().map(|p| p.decode_errors).sum(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub duration_ms: u128,
    pub deadline_exceeded: bool,
    pub peak_active: usize,
    pub connected_p50_ms: Option<u128>,
    pub connected_p95_ms: Option<u128>,
}

/// One spawn of a dry-run plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSpawn {
    pub index: usize,
    pub at_ms: u128,
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestReport {
    pub config: RunConfigSnapshot,
    pub dry_run: bool,
    pub passed: bool,
    pub totals: Totals,
    pub stats: RuntimeStats,
    pub checks: Vec<CheckSummary>,
    pub validation: ValidationSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<PlannedSpawn>>,
    pub players: Vec<PlayerOutcome>,
}

impl LoadTestReport {
    pub fn check(&self, label: &str) -> Option<&CheckSummary> {
        self.checks.iter().find(|check| check.label == label)
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed { EXIT_PASS } else { EXIT_FAIL }
    }

    /// Pretty JSON for `--json`, the human summary otherwise.
    pub fn render(&self, json: bool) -> serde_json::Result<String> {
        if json {
            serde_json::to_string_pretty(self)
        } else {
            Ok(self.human_summary())
        }
    }

    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str("snake load test report\n");
        output.push_str(&format!(
            "status: {}\n",
            if self.passed { "PASS" } else { "FAIL" }
        ));
        output.push_str(&format!(
            "target: {} ({} stages, ping={}, moves={})\n",
            self.config.url,
            self.config.stages.len(),
            self.config.ping_enabled,
            self.config.move_enabled
        ));
        output.push_str(&format!(
            "players: planned={}, spawned={}, completed={}, connected={}, forced_closed={}\n",
            self.totals.planned_players,
            self.totals.spawned_players,
            self.totals.completed_players,
            self.totals.connected_players,
            self.totals.forced_closes
        ));
        output.push_str(&format!(
            "messages: sent={}, received={}, decode_errors={}\n",
            self.totals.messages_sent, self.totals.messages_received, self.totals.decode_errors
        ));
        output.push_str(&format!(
            "timing: duration={}ms peak_active={} deadline_exceeded={} session p50={:?}ms p95={:?}ms\n",
            self.stats.duration_ms,
            self.stats.peak_active,
            self.stats.deadline_exceeded,
            self.stats.connected_p50_ms,
            self.stats.connected_p95_ms
        ));

        if let Some(plan) = &self.plan {
            output.push_str(&format!("plan: {} spawns\n", plan.len()));
            for spawn in plan {
                output.push_str(&format!(
                    "  +{}ms #{} {} {}\n",
                    spawn.at_ms, spawn.index, spawn.name, spawn.url
                ));
            }
        }
        for check in &self.checks {
            output.push_str(&format!(
                "  {} {:.2}% ✓ {} ✗ {}\n",
                check.label,
                check.pass_rate * 100.0,
                check.passes,
                check.fails
            ));
        }
        for check in &self.validation.checks {
            output.push_str(&format!(
                "check [{}] {}: {}\n",
                if check.passed { "PASS" } else { "FAIL" },
                check.name,
                check.details
            ));
        }
        output
    }
}

pub fn check_summaries(tallies: BTreeMap<String, Tally>) -> Vec<CheckSummary> {
    tallies
        .into_iter()
        .map(|(label, tally)| CheckSummary {
            pass_rate: tally.pass_rate(),
            passes: tally.passes,
            fails: tally.fails,
            label,
        })
        .collect()
}

pub fn percentile(values: &[u128], p: f64) -> Option<u128> {
    if values.is_empty() {
        return None;
    }
    let index = ((values.len() - 1) as f64 * p).round() as usize;
    values.get(index).copied()
}
