use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::identity::{
    ColourProfile, DEFAULT_BODY_COLOUR, DEFAULT_EYES_COLOUR, DEFAULT_HEAD_COLOUR, PlayerIdentity,
};
use crate::player::Behavior;
use crate::protocol::WireDirection;
use crate::schedule::Stage;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:4002/ws";
pub const DEFAULT_STAGE: &str = "10s:100";
pub const DEFAULT_PING_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MOVE_INTERVAL_MS: u64 = 200;
pub const DEFAULT_SETTLE_MS: u64 = 1000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_GRACE_SECS: u64 = 30;
pub const DEFAULT_MIN_RATE: f64 = 0.0;
pub const DEFAULT_LOG: &str = "info";
/// Longest run the ramp plan or the deadline may describe.
pub const MAX_RUN_DURATION: Duration = Duration::from_secs(30 * 24 * 3600);
/// Query parameter carrying the player id on the upgrade request.
pub const PLAYER_ID_PARAM: &str = "playerId";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Standard,
    Json,
    Pretty,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "snake-loadtest",
    about = "Ramp-up load generator for the snake game websocket server"
)]
pub struct Cli {
    /// game server endpoint, `playerId` is set per player
    #[arg(long, env = "LOADTEST_URL", default_value = DEFAULT_URL)]
    pub url: Url,
    /// ramp stage as `<duration>:<target>`, e.g. `30s:200`. Repeatable
    #[arg(long = "stage", value_parser = parse_stage)]
    pub stages: Vec<Stage>,
    /// yaml file with a `stages` list, replaces `--stage`
    #[arg(long, env = "LOADTEST_PROFILE")]
    pub profile: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_PING_INTERVAL_MS)]
    pub ping_interval_ms: u64,
    #[arg(long, default_value_t = DEFAULT_MOVE_INTERVAL_MS)]
    pub move_interval_ms: u64,
    /// pause between joining and starting the game
    #[arg(long, default_value_t = DEFAULT_SETTLE_MS)]
    pub settle_ms: u64,
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,
    /// don't send latency pings
    #[arg(long)]
    pub no_ping: bool,
    /// send moves once the game started
    #[arg(long)]
    pub moves: bool,
    #[arg(long, value_enum, default_value_t)]
    pub wire_direction: WireDirection,

    /// close each player after this many seconds connected
    #[arg(long)]
    pub session_secs: Option<u64>,
    /// time players get to finish after the last stage
    #[arg(long, default_value_t = DEFAULT_GRACE_SECS)]
    pub grace_secs: u64,
    /// hard run deadline, overrides stages + grace
    #[arg(long)]
    pub max_duration_secs: Option<u64>,

    #[arg(long, default_value = DEFAULT_HEAD_COLOUR)]
    pub head_colour: String,
    #[arg(long, default_value = DEFAULT_BODY_COLOUR)]
    pub body_colour: String,
    #[arg(long, default_value = DEFAULT_EYES_COLOUR)]
    pub eyes_colour: String,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,
    #[arg(long, default_value_t = DEFAULT_MIN_RATE)]
    pub min_connect_rate: f64,
    #[arg(long, default_value_t = DEFAULT_MIN_RATE)]
    pub min_check_rate: f64,

    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub dry_run: bool,

    /// log filter, all valid RUST_LOG directives are accepted
    #[arg(long, env = "LOADTEST_LOG", default_value = DEFAULT_LOG)]
    pub log: String,
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    pub url: Url,
    pub stages: Vec<Stage>,
    pub behavior: Behavior,
    pub connect_timeout_ms: u64,
    pub grace_secs: u64,
    pub max_duration_secs: Option<u64>,
    pub colours: ColourProfile,
    pub seed: u64,
    pub min_connect_rate: f64,
    pub min_check_rate: f64,
    pub json: bool,
    pub dry_run: bool,
}

impl LoadTestConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn plan_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, stage| total.saturating_add(stage.duration))
    }

    /// Hard budget for the run, measured from start.
    pub fn deadline(&self) -> Duration {
        match self.max_duration_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self
                .plan_duration()
                .saturating_add(Duration::from_secs(self.grace_secs)),
        }
    }

    /// Endpoint for one player, with its id as the `playerId` parameter.
    pub fn player_url(&self, identity: &PlayerIdentity) -> Url {
        let kept = self
            .url
            .query_pairs()
            .filter(|(key, _)| key.as_ref() != PLAYER_ID_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect::<Vec<_>>();

        let mut url = self.url.clone();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(PLAYER_ID_PARAM, &identity.id);
        url
    }
}

impl TryFrom<Cli> for LoadTestConfig {
    type Error = anyhow::Error;

    fn try_from(args: Cli) -> Result<Self> {
        if !matches!(args.url.scheme(), "ws" | "wss") {
            bail!("--url must use the ws or wss scheme, got `{}`", args.url);
        }
        if args.ping_interval_ms == 0 {
            bail!("--ping-interval-ms must be greater than 0");
        }
        if args.move_interval_ms == 0 {
            bail!("--move-interval-ms must be greater than 0");
        }
        if args.connect_timeout_ms == 0 {
            bail!("--connect-timeout-ms must be greater than 0");
        }
        if args.max_duration_secs == Some(0) {
            bail!("--max-duration-secs must be greater than 0");
        }
        for (flag, rate) in [
            ("--min-connect-rate", args.min_connect_rate),
            ("--min-check-rate", args.min_check_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("{flag} must be between 0.0 and 1.0");
            }
        }

        let stages = match (&args.profile, args.stages.is_empty()) {
            (Some(_), false) => bail!("--profile and --stage are mutually exclusive"),
            (Some(path), true) => load_profile(path)?.stages()?,
            (None, true) => vec![parse_stage(DEFAULT_STAGE).map_err(anyhow::Error::msg)?],
            (None, false) => args.stages,
        };
        if stages.is_empty() {
            bail!("at least one ramp stage is required");
        }
        let plan = stages
            .iter()
            .try_fold(Duration::ZERO, |total, stage| total.checked_add(stage.duration))
            .filter(|plan| *plan <= MAX_RUN_DURATION)
            .with_context(|| {
                format!(
                    "ramp stages exceed the maximum run length of {}s",
                    MAX_RUN_DURATION.as_secs()
                )
            })?;
        let deadline = match args.max_duration_secs {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => plan.checked_add(Duration::from_secs(args.grace_secs)),
        };
        if !deadline.is_some_and(|deadline| deadline <= MAX_RUN_DURATION) {
            bail!(
                "run deadline exceeds the maximum of {}s, lower --grace-secs or --max-duration-secs",
                MAX_RUN_DURATION.as_secs()
            );
        }

        Ok(Self {
            url: args.url,
            stages,
            behavior: Behavior {
                ping_enabled: !args.no_ping,
                move_enabled: args.moves,
                ping_interval: Duration::from_millis(args.ping_interval_ms),
                move_interval: Duration::from_millis(args.move_interval_ms),
                settle_delay: Duration::from_millis(args.settle_ms),
                session: args.session_secs.map(Duration::from_secs),
                wire_direction: args.wire_direction,
            },
            connect_timeout_ms: args.connect_timeout_ms,
            grace_secs: args.grace_secs,
            max_duration_secs: args.max_duration_secs,
            colours: ColourProfile {
                head: args.head_colour,
                body: args.body_colour,
                eyes: args.eyes_colour,
            },
            seed: args.seed,
            min_connect_rate: args.min_connect_rate,
            min_check_rate: args.min_check_rate,
            json: args.json,
            dry_run: args.dry_run,
        })
    }
}

/// Ramp profile file, shaped like k6 `options.stages`.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub stages: Vec<ProfileStage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileStage {
    pub duration: String,
    pub target: usize,
}

impl Profile {
    pub fn stages(&self) -> Result<Vec<Stage>> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                let duration = parse_duration(&stage.duration)
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("stage {i}"))?;
                Ok(Stage {
                    duration,
                    target: stage.target,
                })
            })
            .collect()
    }
}

pub fn load_profile(path: &Path) -> Result<Profile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile `{}`", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse profile `{}`", path.display()))
}

/// `<duration>:<target>`, e.g. `1m30s:250`.
pub fn parse_stage(raw: &str) -> Result<Stage, String> {
    let (duration, target) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("stage `{raw}` must look like <duration>:<target>"))?;
    let duration = parse_duration(duration)?;
    let target = target
        .trim()
        .parse::<usize>()
        .map_err(|err| format!("invalid stage target `{target}`: {err}"))?;
    Ok(Stage { duration, target })
}

/// Durations like `500ms`, `10s`, `2m`, `1h` or combinations such as `1m30s`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration `{raw}`"));
        }
        let value = rest[..digits]
            .parse::<u64>()
            .map_err(|err| format!("invalid duration `{raw}`: {err}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let overflow = || format!("duration value overflow in `{raw}`");
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(overflow)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(overflow)?),
            "" => return Err(format!("duration `{raw}` is missing a unit")),
            unit => return Err(format!("unknown duration unit `{unit}` in `{raw}`")),
        };
        total = total.checked_add(part).ok_or_else(overflow)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}
