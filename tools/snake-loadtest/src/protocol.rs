//! Wire format spoken with the game server.
//!
//! Structured messages are JSON objects carrying an `event` field. Moves and
//! latency pings use compact plain-text frames instead.
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::identity::PlayerIdentity;

/// Latency ping sent by the client; the server echoes the same literal back.
pub const PING: &str = "p";
/// Reply the server sends for every [`PING`].
pub const PONG: &str = "p";

pub const EVENT_NEW_PLAYER: &str = "newPlayer";
pub const EVENT_START_GAME: &str = "startGame";
pub const EVENT_SNAKE_UPDATE: &str = "snake_update";

const MOVE_PREFIX: &str = "m";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("structured message is not a JSON object")]
    NotAnObject,
    #[error("structured message has no string `event` field")]
    MissingEvent,
    #[error("malformed move command `{0}`")]
    Move(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    pub const fn code(self) -> char {
        match self {
            Self::Up => 'u',
            Self::Down => 'd',
            Self::Left => 'l',
            Self::Right => 'r',
        }
    }

    pub const fn from_code(code: char) -> Option<Self> {
        match code {
            'u' => Some(Self::Up),
            'd' => Some(Self::Down),
            'l' => Some(Self::Left),
            'r' => Some(Self::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        };
        f.write_str(name)
    }
}

/// Which direction code ends up on the wire for a move.
///
/// `AlwaysUp` reproduces older clients that logged a random direction but
/// always sent `u`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WireDirection {
    #[default]
    Chosen,
    AlwaysUp,
}

impl WireDirection {
    pub const fn apply(self, chosen: Direction) -> Direction {
        match self {
            Self::Chosen => chosen,
            Self::AlwaysUp => Direction::Up,
        }
    }
}

/// A frame received from the server, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Pong,
    GameEvent { event_name: String, payload: Value },
    /// Plain-text frame that is neither a pong nor structured; ignored.
    Malformed,
}

/// Coarse kind of an inbound message, the key of the player's dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    Pong,
    StartGame,
    SnakeUpdate,
    OtherEvent,
    Malformed,
}

impl InboundKind {
    pub const ALL: [InboundKind; 5] = [
        Self::Pong,
        Self::StartGame,
        Self::SnakeUpdate,
        Self::OtherEvent,
        Self::Malformed,
    ];
}

impl InboundMessage {
    pub fn kind(&self) -> InboundKind {
        match self {
            Self::Pong => InboundKind::Pong,
            Self::GameEvent { event_name, .. } => match event_name.as_str() {
                EVENT_START_GAME => InboundKind::StartGame,
                EVENT_SNAKE_UPDATE => InboundKind::SnakeUpdate,
                _ => InboundKind::OtherEvent,
            },
            Self::Malformed => InboundKind::Malformed,
        }
    }
}

#[derive(Serialize)]
struct JoinEvent<'a> {
    event: &'static str,
    player: JoinPlayer<'a>,
}

#[derive(Serialize)]
struct JoinPlayer<'a> {
    name: &'a str,
    id: &'a str,
    colours: &'a crate::identity::ColourProfile,
}

#[derive(Serialize)]
struct BareEvent {
    event: &'static str,
}

pub fn encode_join(identity: &PlayerIdentity) -> String {
    let msg = JoinEvent {
        event: EVENT_NEW_PLAYER,
        player: JoinPlayer {
            name: &identity.name,
            id: &identity.id,
            colours: &identity.colours,
        },
    };
    // only string fields, serialization cannot fail
    serde_json::to_string(&msg).unwrap_or_default()
}

pub fn encode_start() -> String {
    serde_json::to_string(&BareEvent {
        event: EVENT_START_GAME,
    })
    .unwrap_or_default()
}

pub fn encode_move(identity: &PlayerIdentity, direction: Direction) -> String {
    format!("{MOVE_PREFIX}:{}:{}", identity.id, direction.code())
}

pub fn encode_ping() -> String {
    PING.to_string()
}

pub fn decode(raw: &str) -> Result<InboundMessage, DecodeError> {
    if raw == PONG {
        return Ok(InboundMessage::Pong);
    }
    if !raw.starts_with('{') {
        return Ok(InboundMessage::Malformed);
    }

    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(map) = &value else {
        return Err(DecodeError::NotAnObject);
    };
    let event_name = map
        .get("event")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingEvent)?
        .to_string();

    Ok(InboundMessage::GameEvent {
        event_name,
        payload: value,
    })
}

/// A move command as the server sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCommand {
    pub player_id: String,
    pub direction: Direction,
}

impl FromStr for MoveCommand {
    type Err = DecodeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_move(raw)
    }
}

/// Peer-side parse of a frame produced by [`encode_move`].
pub fn parse_move(raw: &str) -> Result<MoveCommand, DecodeError> {
    let malformed = || DecodeError::Move(raw.to_string());

    let rest = raw
        .strip_prefix(MOVE_PREFIX)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(malformed)?;
    let (player_id, code) = rest.rsplit_once(':').ok_or_else(malformed)?;

    let mut chars = code.chars();
    let direction = match (chars.next(), chars.next()) {
        (Some(c), None) => Direction::from_code(c).ok_or_else(malformed)?,
        _ => return Err(malformed()),
    };
    if player_id.is_empty() {
        return Err(malformed());
    }

    Ok(MoveCommand {
        player_id: player_id.to_string(),
        direction,
    })
}
