use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assertions::AssertionSink;
use crate::config::LoadTestConfig;
use crate::identity::{IdentityGenerator, PlayerIdentity};
use crate::player::{PlayerMachine, PlayerOutcome, VirtualPlayer};
use crate::report::{
    self, LoadTestReport, PlannedSpawn, RunConfigSnapshot, RuntimeStats, Totals,
    ValidationSummary,
};
use crate::schedule::{ActiveGauge, Directive, RampSchedule};
use crate::transport::Connector;
use crate::transport::ws::WsConnector;
use crate::validation;

pub async fn run(config: LoadTestConfig) -> Result<LoadTestReport> {
    if config.dry_run {
        return Ok(build_dry_run_report(&config));
    }

    let connector = Arc::new(WsConnector::new(config.connect_timeout()));
    run_with(config, connector).await
}

/// Time players get to close after cancellation before their tasks are aborted.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Run the ramp plan against any transport.
pub async fn run_with<K: Connector>(
    config: LoadTestConfig,
    connector: Arc<K>,
) -> Result<LoadTestReport> {
    let started = Instant::now();
    let deadline = started
        .checked_add(config.deadline())
        .context("run deadline is out of the clock's range")?;
    let identities = IdentityGenerator::new(config.seed, config.colours.clone());
    let gauge = Arc::new(ActiveGauge::default());
    let schedule = RampSchedule::new(config.stages.clone(), identities.clone())
        .tracking(Arc::clone(&gauge));
    let planned = schedule.planned_spawns();

    let sink = Arc::new(AssertionSink::new());
    let cancel = CancellationToken::new();
    info!(
        url = %config.url,
        stages = config.stages.len(),
        planned,
        plan = ?schedule.total_duration(),
        deadline = ?config.deadline(),
        "starting load test"
    );

    let mut tasks: JoinSet<PlayerOutcome> = JoinSet::new();
    let mut roster = Vec::new();
    let mut deadline_exceeded = false;

    let plan = async {
        for directive in schedule {
            tokio::time::sleep_until(started + directive.at()).await;
            match directive {
                Directive::Spawn { identity, .. } => {
                    roster.push(identity.clone());
                    let player = build_player(&config, &identities, identity);
                    let connector = Arc::clone(&connector);
                    let sink = Arc::clone(&sink);
                    let token = cancel.child_token();
                    // counted from spawn so the next stage sees it even before it runs
                    let active = gauge.enter();
                    tasks.spawn(async move {
                        let outcome = player.run(connector.as_ref(), &sink, token).await;
                        drop(active);
                        outcome
                    });
                }
                Directive::Hold { until } => {
                    debug!(?until, active = gauge.active(), "stage complete");
                }
            }
        }
    };

    tokio::select! {
        _ = plan => debug!("ramp plan exhausted"),
        _ = tokio::time::sleep_until(deadline) => {
            deadline_exceeded = true;
        }
    }
    let spawned = roster.len();
    if deadline_exceeded {
        warn!(spawned, planned, "run deadline elapsed during ramp, closing players");
        cancel.cancel();
    }

    let drained = drain(&mut tasks, &cancel, deadline, deadline_exceeded).await;
    let deadline_exceeded = drained.deadline_exceeded;
    let mut players = drained.players;
    fill_missing(&mut players, &roster);

    let checks = report::check_summaries(sink.summary());
    let totals = Totals::from_outcomes(&players, planned, spawned);
    let stats = compute_stats(&players, started.elapsed().as_millis(), deadline_exceeded, &gauge);
    let validation = validation::run_validations(&checks, &players, spawned, &config);
    info!(
        spawned,
        connected = totals.connected_players,
        aborted = drained.aborted,
        passed = validation.passed,
        "load test finished"
    );

    Ok(LoadTestReport {
        config: RunConfigSnapshot::from(&config),
        dry_run: false,
        passed: validation.passed,
        totals,
        stats,
        checks,
        validation,
        plan: None,
        players,
    })
}

struct Drained {
    players: Vec<PlayerOutcome>,
    deadline_exceeded: bool,
    aborted: usize,
}

/// Collect outcomes until every player task is done. Players are cancelled
/// at `deadline`; tasks still running [`FORCE_CLOSE_GRACE`] later are aborted.
async fn drain(
    tasks: &mut JoinSet<PlayerOutcome>,
    cancel: &CancellationToken,
    deadline: Instant,
    mut deadline_exceeded: bool,
) -> Drained {
    let force_at = deadline + FORCE_CLOSE_GRACE;
    let mut players = Vec::with_capacity(tasks.len());
    let mut aborting = false;
    let mut aborted = 0usize;

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(Ok(outcome)) => players.push(outcome),
                Some(Err(err)) if err.is_cancelled() => aborted += 1,
                // a panicking player must not take the run down with it
                Some(Err(err)) => error!(?err, "player task failed"),
                None => break,
            },
            _ = tokio::time::sleep_until(deadline), if !deadline_exceeded => {
                deadline_exceeded = true;
                warn!(active = tasks.len(), "run deadline elapsed, closing remaining players");
                cancel.cancel();
            }
            _ = tokio::time::sleep_until(force_at), if deadline_exceeded && !aborting => {
                aborting = true;
                warn!(remaining = tasks.len(), "players ignored cancellation, aborting their tasks");
                tasks.abort_all();
            }
        }
    }

    Drained {
        players,
        deadline_exceeded,
        aborted,
    }
}

/// Every spawned player gets an outcome, aborted or panicked tasks included.
fn fill_missing(players: &mut Vec<PlayerOutcome>, roster: &[PlayerIdentity]) {
    let reported = players
        .iter()
        .map(|player| player.index)
        .collect::<HashSet<_>>();
    players.extend(
        roster
            .iter()
            .filter(|identity| !reported.contains(&identity.index))
            .map(PlayerOutcome::aborted),
    );
    players.sort_by_key(|player| player.index);
}

fn build_player(
    config: &LoadTestConfig,
    identities: &IdentityGenerator,
    identity: PlayerIdentity,
) -> VirtualPlayer {
    let url = config.player_url(&identity);
    let rng_seed = identities.rng_seed(identity.index);
    let machine = PlayerMachine::new(identity, config.behavior.clone(), rng_seed);
    VirtualPlayer::new(machine, url)
}

fn build_dry_run_report(config: &LoadTestConfig) -> LoadTestReport {
    let identities = IdentityGenerator::new(config.seed, config.colours.clone());
    let schedule = RampSchedule::new(config.stages.clone(), identities);
    let planned = schedule.planned_spawns();

    let plan = schedule
        .filter_map(|directive| match directive {
            Directive::Spawn { at, identity } => Some(PlannedSpawn {
                index: identity.index,
                at_ms: at.as_millis(),
                url: config.player_url(&identity).to_string(),
                id: identity.id,
                name: identity.name,
            }),
            Directive::Hold { .. } => None,
        })
        .collect::<Vec<_>>();

    LoadTestReport {
        config: RunConfigSnapshot::from(config),
        dry_run: true,
        passed: true,
        totals: Totals {
            planned_players: planned,
            ..Totals::default()
        },
        stats: RuntimeStats::default(),
        checks: Vec::new(),
        validation: ValidationSummary::dry_run(),
        plan: Some(plan),
        players: Vec::new(),
    }
}

fn compute_stats(
    players: &[PlayerOutcome],
    duration_ms: u128,
    deadline_exceeded: bool,
    gauge: &ActiveGauge,
) -> RuntimeStats {
    let mut sessions = players
        .iter()
        .filter_map(|player| player.connected_ms)
        .collect::<Vec<_>>();
    sessions.sort_unstable();

    RuntimeStats {
        duration_ms,
        deadline_exceeded,
        peak_active: gauge.peak(),
        connected_p50_ms: report::percentile(&sessions, 0.50),
        connected_p95_ms: report::percentile(&sessions, 0.95),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use tokio::task::JoinSet;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::config::{Cli, LoadTestConfig};
    use crate::identity::{ColourProfile, IdentityGenerator};
    use crate::player::{CloseReason, PlayerOutcome, ProtocolState};

    use super::{FORCE_CLOSE_GRACE, build_dry_run_report, drain, fill_missing};

    #[test]
    fn dry_run_lists_plan() {
        let cli = Cli::try_parse_from(["snake-loadtest", "--stage", "10s:5", "--dry-run"])
            .expect("cli parse");
        let config = LoadTestConfig::try_from(cli).expect("config");

        let report = build_dry_run_report(&config);
        let plan = report.plan.expect("dry run has a plan");
        assert_eq!(plan.len(), 5);
        assert_eq!(plan[1].at_ms, 2000);
        assert!(plan[0].url.contains(&format!("playerId={}", plan[0].id)));
        assert_eq!(report.totals.planned_players, 5);
        assert!(report.passed);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_tasks_that_ignore_cancellation() {
        let generator = IdentityGenerator::new(1, ColourProfile::default());
        let roster = (0..2).map(|i| generator.identity(i)).collect::<Vec<_>>();
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let mut cooperative = PlayerOutcome::aborted(&roster[0]);
        cooperative.close_reason = CloseReason::Cancelled;
        let token = cancel.child_token();
        tasks.spawn(async move {
            token.cancelled().await;
            cooperative
        });
        tasks.spawn(std::future::pending::<PlayerOutcome>());

        let started = Instant::now();
        let deadline = started + Duration::from_secs(1);
        let drained = drain(&mut tasks, &cancel, deadline, false).await;

        assert!(drained.deadline_exceeded);
        assert_eq!(drained.aborted, 1);
        assert_eq!(drained.players.len(), 1);
        assert_eq!(
            started.elapsed(),
            Duration::from_secs(1) + FORCE_CLOSE_GRACE
        );

        let mut players = drained.players;
        fill_missing(&mut players, &roster);
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].close_reason, CloseReason::Cancelled);
        assert_eq!(players[1].close_reason, CloseReason::Aborted);
        assert_eq!(players[1].final_state, ProtocolState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_returns_early_when_players_finish() {
        let cancel = CancellationToken::new();
        let mut tasks: JoinSet<PlayerOutcome> = JoinSet::new();
        let started = Instant::now();

        let drained = drain(&mut tasks, &cancel, started + Duration::from_secs(30), false).await;

        assert!(!drained.deadline_exceeded);
        assert!(!cancel.is_cancelled());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
