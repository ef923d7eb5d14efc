use crate::assertions::Check;
use crate::config::LoadTestConfig;
use crate::player::{PlayerOutcome, ProtocolState};
use crate::report::{CheckSummary, ValidationCheck, ValidationSummary};

pub fn run_validations(
    checks: &[CheckSummary],
    players: &[PlayerOutcome],
    spawned: usize,
    config: &LoadTestConfig,
) -> ValidationSummary {
    let mut results = Vec::new();

    let connect = checks
        .iter()
        .find(|check| check.label == Check::ConnectionEstablished.label());
    let (connected, attempted) = connect.map_or((0, 0), |c| (c.passes, c.passes + c.fails));
    let connect_rate = rate(connected, attempted);
    results.push(ValidationCheck {
        name: "connection_success_rate".to_string(),
        passed: connect_rate >= config.min_connect_rate,
        details: format!(
            "{connected}/{attempted} connections established, rate {connect_rate:.4} (threshold {:.4})",
            config.min_connect_rate
        ),
    });

    let passes = checks.iter().map(|check| check.passes).sum::<u64>();
    let total = checks
        .iter()
        .map(|check| check.passes + check.fails)
        .sum::<u64>();
    let check_rate = rate(passes, total);
    results.push(ValidationCheck {
        name: "check_pass_rate".to_string(),
        passed: check_rate >= config.min_check_rate,
        details: format!(
            "{passes}/{total} checks passed, rate {check_rate:.4} (threshold {:.4})",
            config.min_check_rate
        ),
    });

    let open = players
        .iter()
        .filter(|player| player.final_state != ProtocolState::Closed)
        .map(|player| player.index)
        .collect::<Vec<_>>();
    let all_closed = open.is_empty() && players.len() == spawned;
    results.push(ValidationCheck {
        name: "all_players_closed".to_string(),
        passed: all_closed,
        details: if all_closed {
            format!("{spawned} spawned players reached Closed")
        } else {
            format!(
                "{} of {spawned} players reported, still open: {open:?}",
                players.len()
            )
        },
    });

    let passed = results.iter().all(|check| check.passed);
    ValidationSummary {
        passed,
        checks: results,
    }
}

// no observations count as a full pass so empty runs are not flagged
fn rate(passes: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        passes as f64 / total as f64
    }
}
