//! One simulated client.
//!
//! [`PlayerMachine`] is the protocol state machine: it consumes [`Input`]s and
//! yields [`Action`]s without touching I/O. [`VirtualPlayer::run`] drives a
//! machine over a [`Channel`], owning the timers it asks for. Timers live in
//! the driver's task, so leaving the run loop drops all of them at once.
use std::pin::Pin;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::assertions::{AssertionSink, Check};
use crate::identity::PlayerIdentity;
use crate::protocol::{self, Direction, InboundKind, InboundMessage, WireDirection};
use crate::transport::{Channel, Connector, Opened, SWITCHING_PROTOCOLS, TransportError};

/// Upper bound on the closing handshake with an unresponsive peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    Connecting,
    AwaitingAck,
    Playing,
    Closed,
}

impl ProtocolState {
    pub const ALL: [ProtocolState; 4] = [
        Self::Connecting,
        Self::AwaitingAck,
        Self::Playing,
        Self::Closed,
    ];
}

/// What enabled behaviour a player runs with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Behavior {
    pub ping_enabled: bool,
    pub move_enabled: bool,
    pub ping_interval: Duration,
    pub move_interval: Duration,
    /// Pause between `newPlayer` and `startGame`.
    pub settle_delay: Duration,
    /// Close locally after this long connected, `None` runs until closed.
    pub session: Option<Duration>,
    pub wire_direction: WireDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Opened { status: u16 },
    OpenFailed,
    SettleElapsed,
    Inbound(InboundMessage),
    /// Frame that looked structured but did not decode.
    Undecodable,
    PingDue,
    MoveDue,
    SessionElapsed,
    Cancelled,
    TransportClosed { error: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(String),
    ArmPing,
    ArmSettle,
    ArmMove,
    Record(Check, bool),
    /// Release the transport; the machine is already `Closed`.
    Close,
}

/// Entry of the inbound dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    StartMoving,
    RecordGameUpdate,
    RecordPong,
    Ignore,
}

/// `(state, inbound kind) -> handler`. Unknown events and plain-text frames
/// are ignored in every state.
pub const fn handler_for(state: ProtocolState, kind: InboundKind) -> Handler {
    use InboundKind as K;
    use ProtocolState as S;

    match (state, kind) {
        (S::Playing, K::StartGame) => Handler::StartMoving,
        (S::AwaitingAck | S::Playing, K::SnakeUpdate) => Handler::RecordGameUpdate,
        (S::AwaitingAck | S::Playing, K::Pong) => Handler::RecordPong,
        (S::AwaitingAck, K::StartGame) => Handler::Ignore,
        (_, K::OtherEvent | K::Malformed) => Handler::Ignore,
        (S::Connecting | S::Closed, _) => Handler::Ignore,
    }
}

#[derive(Debug)]
pub struct PlayerMachine {
    identity: PlayerIdentity,
    behavior: Behavior,
    state: ProtocolState,
    moving: bool,
    rng: StdRng,
}

impl PlayerMachine {
    pub fn new(identity: PlayerIdentity, behavior: Behavior, rng_seed: u64) -> Self {
        Self {
            identity,
            behavior,
            state: ProtocolState::Connecting,
            moving: false,
            rng: StdRng::seed_from_u64(rng_seed),
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn identity(&self) -> &PlayerIdentity {
        &self.identity
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        use ProtocolState as S;

        match (self.state, input) {
            (S::Closed, _) => Vec::new(),

            (S::Connecting, Input::Opened { status }) if status == SWITCHING_PROTOCOLS => {
                self.state = S::AwaitingAck;
                let mut actions = vec![
                    Action::Record(Check::ConnectionEstablished, true),
                    Action::Send(protocol::encode_join(&self.identity)),
                ];
                if self.behavior.ping_enabled {
                    actions.push(Action::ArmPing);
                }
                actions.push(Action::ArmSettle);
                actions
            }
            (S::Connecting, Input::Opened { status }) => {
                debug!(id = %self.identity.id, status, "upgrade not accepted");
                self.state = S::Closed;
                vec![
                    Action::Record(Check::ConnectionEstablished, false),
                    Action::Close,
                ]
            }
            (S::Connecting, Input::OpenFailed) => {
                self.state = S::Closed;
                vec![Action::Record(Check::ConnectionEstablished, false)]
            }

            (S::AwaitingAck, Input::SettleElapsed) => {
                self.state = S::Playing;
                vec![Action::Send(protocol::encode_start())]
            }

            (S::AwaitingAck | S::Playing, Input::Inbound(msg)) => {
                // only structured frames can fail to decode
                let mut actions = match msg {
                    InboundMessage::GameEvent { .. } => {
                        vec![Action::Record(Check::MessageDecoded, true)]
                    }
                    InboundMessage::Pong | InboundMessage::Malformed => Vec::new(),
                };
                actions.extend(self.dispatch(&msg));
                actions
            }
            (S::AwaitingAck | S::Playing, Input::Undecodable) => {
                vec![Action::Record(Check::MessageDecoded, false)]
            }

            (S::AwaitingAck | S::Playing, Input::PingDue) => {
                vec![Action::Send(protocol::encode_ping())]
            }
            (S::Playing, Input::MoveDue) if self.moving => {
                let chosen = *Direction::ALL
                    .choose(&mut self.rng)
                    .unwrap_or(&Direction::Up);
                let wire = self.behavior.wire_direction.apply(chosen);
                trace!(id = %self.identity.id, %chosen, %wire, "moving");
                vec![Action::Send(protocol::encode_move(&self.identity, wire))]
            }

            (_, Input::SessionElapsed | Input::Cancelled) => {
                self.state = S::Closed;
                vec![Action::Close]
            }
            (_, Input::TransportClosed { error }) => {
                self.state = S::Closed;
                if error {
                    vec![Action::Record(Check::TransportOk, false)]
                } else {
                    Vec::new()
                }
            }

            // timers firing in a state that has no use for them
            (state, input) => {
                trace!(id = %self.identity.id, ?state, ?input, "input ignored");
                Vec::new()
            }
        }
    }

    fn dispatch(&mut self, msg: &InboundMessage) -> Vec<Action> {
        match handler_for(self.state, msg.kind()) {
            Handler::StartMoving => {
                // the server rebroadcasts startGame for every player that sends it
                if self.moving || !self.behavior.move_enabled {
                    return Vec::new();
                }
                self.moving = true;
                vec![Action::ArmMove]
            }
            Handler::RecordGameUpdate => vec![Action::Record(Check::GameUpdateReceived, true)],
            Handler::RecordPong => vec![Action::Record(Check::PongReceived, true)],
            Handler::Ignore => {
                if let InboundMessage::GameEvent { event_name, .. } = msg {
                    trace!(id = %self.identity.id, event = %event_name, state = ?self.state, "unhandled event");
                }
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    OpenFailed,
    Rejected,
    PeerClosed,
    TransportError,
    SessionElapsed,
    Cancelled,
    /// Task stopped by the engine after ignoring cancellation.
    Aborted,
}

/// What happened to one player over its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerOutcome {
    pub index: usize,
    pub id: String,
    pub connected: bool,
    pub sent: usize,
    pub received: usize,
    pub decode_errors: usize,
    pub close_reason: CloseReason,
    pub final_state: ProtocolState,
    pub connected_ms: Option<u128>,
}

impl PlayerOutcome {
    /// Stand-in for a player whose task never reported back. Its counters are
    /// unknown and left at zero.
    pub fn aborted(identity: &PlayerIdentity) -> Self {
        Self {
            index: identity.index,
            id: identity.id.clone(),
            connected: false,
            sent: 0,
            received: 0,
            decode_errors: 0,
            close_reason: CloseReason::Aborted,
            final_state: ProtocolState::Closed,
            connected_ms: None,
        }
    }
}

pub struct VirtualPlayer {
    machine: PlayerMachine,
    url: Url,
}

impl VirtualPlayer {
    pub fn new(machine: PlayerMachine, url: Url) -> Self {
        Self { machine, url }
    }

    pub fn identity(&self) -> &PlayerIdentity {
        self.machine.identity()
    }

    /// Run the player to `Closed`. Never fails: every error ends up as a
    /// recorded check and a [`CloseReason`].
    pub async fn run<K: Connector>(
        mut self,
        connector: &K,
        sink: &AssertionSink,
        cancel: CancellationToken,
    ) -> PlayerOutcome {
        let id = self.machine.identity().id.clone();
        let mut outcome = PlayerOutcome {
            index: self.machine.identity().index,
            id: id.clone(),
            connected: false,
            sent: 0,
            received: 0,
            decode_errors: 0,
            close_reason: CloseReason::OpenFailed,
            final_state: ProtocolState::Connecting,
            connected_ms: None,
        };

        debug!(%id, url = %self.url, "opening connection");
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.machine.handle(Input::Cancelled);
                outcome.close_reason = CloseReason::Cancelled;
                outcome.final_state = self.machine.state();
                return outcome;
            }
            opened = connector.open(&self.url) => opened,
        };

        let mut driver = match opened {
            Ok(Opened { status, channel }) => {
                let actions = self.machine.handle(Input::Opened { status });
                let mut driver = Driver::new(channel, sink, &self.machine.behavior);
                match driver.apply_until(actions, &mut outcome, &cancel).await {
                    Applied::Done => {}
                    Applied::Failed(err) => {
                        warn!(%id, ?err, "send failed");
                        record_only(sink, self.machine.handle(Input::TransportClosed { error: true }));
                        outcome.connected = true;
                        outcome.close_reason = CloseReason::TransportError;
                        outcome.final_state = self.machine.state();
                        return outcome;
                    }
                    Applied::Cancelled => {
                        debug!(%id, "cancelled while joining");
                        self.machine.handle(Input::Cancelled);
                        release(&mut driver.channel).await;
                        outcome.connected = status == SWITCHING_PROTOCOLS;
                        outcome.close_reason = CloseReason::Cancelled;
                        outcome.final_state = self.machine.state();
                        return outcome;
                    }
                }
                if self.machine.state() == ProtocolState::Closed {
                    release(&mut driver.channel).await;
                    outcome.close_reason = CloseReason::Rejected;
                    outcome.final_state = ProtocolState::Closed;
                    return outcome;
                }
                driver
            }
            Err(err) => {
                debug!(%id, ?err, "connection failed");
                record_only(sink, self.machine.handle(Input::OpenFailed));
                outcome.close_reason = match err {
                    TransportError::Rejected(_) => CloseReason::Rejected,
                    _ => CloseReason::OpenFailed,
                };
                outcome.final_state = self.machine.state();
                return outcome;
            }
        };

        outcome.connected = true;
        let connected_at = Instant::now();
        let session_end = self.machine.behavior.session.map(|len| connected_at + len);
        debug!(%id, "connected");

        let reason = loop {
            let input = tokio::select! {
                biased;
                _ = cancel.cancelled() => Input::Cancelled,
                _ = wait_until(&mut driver.settle) => {
                    driver.settle = None;
                    Input::SettleElapsed
                }
                _ = tick(&mut driver.ping) => Input::PingDue,
                _ = tick(&mut driver.moves) => Input::MoveDue,
                _ = sleep_until_opt(session_end) => Input::SessionElapsed,
                frame = driver.channel.recv() => match frame {
                    Some(Ok(raw)) => {
                        outcome.received += 1;
                        match protocol::decode(&raw) {
                            Ok(msg) => Input::Inbound(msg),
                            Err(err) => {
                                warn!(%id, ?err, "dropping undecodable message");
                                outcome.decode_errors += 1;
                                Input::Undecodable
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%id, ?err, "transport error");
                        Input::TransportClosed { error: true }
                    }
                    None => Input::TransportClosed { error: false },
                },
            };

            let reason = match &input {
                Input::Cancelled => Some(CloseReason::Cancelled),
                Input::SessionElapsed => Some(CloseReason::SessionElapsed),
                Input::TransportClosed { error: true } => Some(CloseReason::TransportError),
                Input::TransportClosed { error: false } => Some(CloseReason::PeerClosed),
                _ => None,
            };

            let actions = self.machine.handle(input);
            match driver.apply_until(actions, &mut outcome, &cancel).await {
                Applied::Done => {}
                Applied::Failed(err) => {
                    warn!(%id, ?err, "send failed");
                    record_only(sink, self.machine.handle(Input::TransportClosed { error: true }));
                    break CloseReason::TransportError;
                }
                Applied::Cancelled => {
                    debug!(%id, "cancelled during send");
                    self.machine.handle(Input::Cancelled);
                    break CloseReason::Cancelled;
                }
            }

            if self.machine.state() == ProtocolState::Closed {
                break reason.unwrap_or(CloseReason::PeerClosed);
            }
        };

        // a channel the peer already tore down has nothing left to release
        if !matches!(reason, CloseReason::TransportError | CloseReason::PeerClosed) {
            release(&mut driver.channel).await;
        }

        debug!(%id, ?reason, "player closed");
        outcome.close_reason = reason;
        outcome.final_state = self.machine.state();
        outcome.connected_ms = Some(connected_at.elapsed().as_millis());
        outcome
    }
}

async fn release<C: Channel>(channel: &mut C) {
    if tokio::time::timeout(CLOSE_TIMEOUT, channel.close())
        .await
        .is_err()
    {
        debug!("close handshake timed out");
    }
}

fn record_only(sink: &AssertionSink, actions: Vec<Action>) {
    for action in actions {
        if let Action::Record(check, passed) = action {
            sink.check(check, passed);
        }
    }
}

enum Applied {
    Done,
    Failed(TransportError),
    /// Cancelled while a send was still pending.
    Cancelled,
}

/// Channel plus the timers the machine has armed on it.
struct Driver<'a, C> {
    channel: C,
    sink: &'a AssertionSink,
    ping_interval: Duration,
    move_interval: Duration,
    settle_delay: Duration,
    settle: Option<Pin<Box<Sleep>>>,
    ping: Option<Interval>,
    moves: Option<Interval>,
}

impl<'a, C: Channel> Driver<'a, C> {
    fn new(channel: C, sink: &'a AssertionSink, behavior: &Behavior) -> Self {
        Self {
            channel,
            sink,
            ping_interval: behavior.ping_interval,
            move_interval: behavior.move_interval,
            settle_delay: behavior.settle_delay,
            settle: None,
            ping: None,
            moves: None,
        }
    }

    /// [`Self::apply`], abandoned once `cancel` fires. A peer that stops
    /// reading must not hold the player past cancellation.
    async fn apply_until(
        &mut self,
        actions: Vec<Action>,
        outcome: &mut PlayerOutcome,
        cancel: &CancellationToken,
    ) -> Applied {
        tokio::select! {
            biased;
            failed = self.apply(actions, outcome) => match failed {
                Some(err) => Applied::Failed(err),
                None => Applied::Done,
            },
            _ = cancel.cancelled() => Applied::Cancelled,
        }
    }

    /// Perform actions in order. Returns the first send error, if any.
    async fn apply(
        &mut self,
        actions: Vec<Action>,
        outcome: &mut PlayerOutcome,
    ) -> Option<TransportError> {
        for action in actions {
            match action {
                Action::Send(text) => {
                    trace!(%text, "send");
                    if let Err(err) = self.channel.send(text).await {
                        return Some(err);
                    }
                    outcome.sent += 1;
                }
                Action::ArmPing => self.ping = Some(periodic(self.ping_interval)),
                Action::ArmMove => self.moves = Some(periodic(self.move_interval)),
                Action::ArmSettle => {
                    self.settle = Some(Box::pin(tokio::time::sleep(self.settle_delay)));
                }
                Action::Record(check, passed) => self.sink.check(check, passed),
                Action::Close => {
                    self.settle = None;
                    self.ping = None;
                    self.moves = None;
                }
            }
        }
        None
    }
}

// first tick one period from now, like a browser setInterval
fn periodic(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use serde_json::json;
    use tracing_test::traced_test;

    use crate::assertions::Check;
    use crate::identity::{ColourProfile, IdentityGenerator};
    use crate::protocol::{
        self, Direction, InboundKind, InboundMessage, WireDirection, parse_move,
    };

    use super::{Action, Behavior, Handler, Input, PlayerMachine, ProtocolState, handler_for};

    fn behavior() -> Behavior {
        Behavior {
            ping_enabled: true,
            move_enabled: true,
            ping_interval: Duration::from_secs(1),
            move_interval: Duration::from_millis(200),
            settle_delay: Duration::from_secs(1),
            session: None,
            wire_direction: WireDirection::Chosen,
        }
    }

    fn machine_with(behavior: Behavior) -> PlayerMachine {
        let identity = IdentityGenerator::new(9, ColourProfile::default()).identity(0);
        PlayerMachine::new(identity, behavior, 1234)
    }

    fn event(name: &str) -> Input {
        Input::Inbound(InboundMessage::GameEvent {
            event_name: name.to_string(),
            payload: json!({ "event": name }),
        })
    }

    fn playing(behavior: Behavior) -> PlayerMachine {
        let mut machine = machine_with(behavior);
        machine.handle(Input::Opened { status: 101 });
        machine.handle(Input::SettleElapsed);
        assert_eq!(machine.state(), ProtocolState::Playing);
        machine
    }

    #[test]
    fn open_sends_join_then_start_after_settle() {
        let mut machine = machine_with(behavior());
        let join = protocol::encode_join(machine.identity());

        let actions = machine.handle(Input::Opened { status: 101 });
        assert_eq!(
            actions,
            vec![
                Action::Record(Check::ConnectionEstablished, true),
                Action::Send(join),
                Action::ArmPing,
                Action::ArmSettle,
            ]
        );
        assert_eq!(machine.state(), ProtocolState::AwaitingAck);

        let actions = machine.handle(Input::SettleElapsed);
        assert_eq!(actions, vec![Action::Send(protocol::encode_start())]);
        assert_eq!(machine.state(), ProtocolState::Playing);
    }

    #[test]
    fn ping_disabled_arms_no_ping() {
        let mut machine = machine_with(Behavior {
            ping_enabled: false,
            ..behavior()
        });
        let actions = machine.handle(Input::Opened { status: 101 });
        assert!(!actions.contains(&Action::ArmPing));
    }

    #[test]
    fn failed_open_closes_without_join() {
        let mut machine = machine_with(behavior());
        let actions = machine.handle(Input::OpenFailed);

        assert_eq!(
            actions,
            vec![Action::Record(Check::ConnectionEstablished, false)]
        );
        assert_eq!(machine.state(), ProtocolState::Closed);
    }

    #[test]
    fn non_upgrade_status_is_a_failed_connection() {
        let mut machine = machine_with(behavior());
        let actions = machine.handle(Input::Opened { status: 200 });

        assert!(actions.contains(&Action::Record(Check::ConnectionEstablished, false)));
        assert!(!actions.iter().any(|a| matches!(a, Action::Send(_))));
        assert_eq!(machine.state(), ProtocolState::Closed);
    }

    #[test]
    #[traced_test]
    fn rejected_upgrade_is_logged() {
        let mut machine = machine_with(behavior());
        machine.handle(Input::Opened { status: 404 });
        assert!(logs_contain("upgrade not accepted"));
    }

    #[test]
    fn start_game_arms_move_timer_once() {
        let mut machine = playing(behavior());

        assert_eq!(
            machine.handle(event("startGame")),
            vec![Action::Record(Check::MessageDecoded, true), Action::ArmMove]
        );
        assert!(machine.is_moving());
        assert_eq!(
            machine.handle(event("startGame")),
            vec![Action::Record(Check::MessageDecoded, true)]
        );
    }

    #[test]
    fn start_game_ignored_when_moves_disabled() {
        let mut machine = playing(Behavior {
            move_enabled: false,
            ..behavior()
        });

        assert!(!machine.handle(event("startGame")).contains(&Action::ArmMove));
        assert!(!machine.is_moving());
        assert!(machine.handle(Input::MoveDue).is_empty());
    }

    #[test]
    fn liveness_checks_are_recorded() {
        let mut machine = playing(behavior());

        assert_eq!(
            machine.handle(event("snake_update")),
            vec![
                Action::Record(Check::MessageDecoded, true),
                Action::Record(Check::GameUpdateReceived, true),
            ]
        );
        assert_eq!(
            machine.handle(Input::Inbound(InboundMessage::Pong)),
            vec![Action::Record(Check::PongReceived, true)]
        );
        assert_eq!(
            machine.handle(event("updateFood")),
            vec![Action::Record(Check::MessageDecoded, true)]
        );
        assert!(
            machine
                .handle(Input::Inbound(InboundMessage::Malformed))
                .is_empty()
        );
    }

    #[test]
    fn move_only_after_start_game() {
        let mut machine = playing(behavior());
        assert!(machine.handle(Input::MoveDue).is_empty());

        machine.handle(event("startGame"));
        let actions = machine.handle(Input::MoveDue);
        let [Action::Send(frame)] = actions.as_slice() else {
            panic!("expected a single move, got {actions:?}");
        };
        let cmd = parse_move(frame).expect("move frame");
        assert_eq!(cmd.player_id, machine.identity().id);
    }

    #[test]
    fn always_up_policy_sends_up() {
        let mut machine = playing(Behavior {
            wire_direction: WireDirection::AlwaysUp,
            ..behavior()
        });
        machine.handle(event("startGame"));

        for _ in 0..20 {
            let actions = machine.handle(Input::MoveDue);
            let [Action::Send(frame)] = actions.as_slice() else {
                panic!("expected a move");
            };
            assert_eq!(parse_move(frame).expect("move").direction, Direction::Up);
        }
    }

    #[test]
    fn chosen_policy_is_seeded() {
        let moves = |seed: u64| {
            let identity = IdentityGenerator::new(9, ColourProfile::default()).identity(0);
            let mut machine = PlayerMachine::new(identity, behavior(), seed);
            machine.handle(Input::Opened { status: 101 });
            machine.handle(Input::SettleElapsed);
            machine.handle(event("startGame"));
            (0..32)
                .flat_map(|_| machine.handle(Input::MoveDue))
                .collect::<Vec<_>>()
        };

        assert_eq!(moves(5), moves(5));
        let directions = moves(5)
            .iter()
            .filter_map(|a| match a {
                Action::Send(frame) => parse_move(frame).ok().map(|m| m.direction),
                _ => None,
            })
            .collect::<std::collections::HashSet<_>>();
        assert!(directions.len() > 1, "random policy should vary direction");
    }

    #[test]
    fn ping_is_noop_before_open() {
        let mut machine = machine_with(behavior());
        assert!(machine.handle(Input::PingDue).is_empty());
        assert_eq!(machine.state(), ProtocolState::Connecting);
    }

    #[test]
    fn transport_close_is_terminal() {
        let mut machine = playing(behavior());
        assert!(
            machine
                .handle(Input::TransportClosed { error: false })
                .is_empty()
        );
        assert_eq!(machine.state(), ProtocolState::Closed);

        let mut machine = playing(behavior());
        assert_eq!(
            machine.handle(Input::TransportClosed { error: true }),
            vec![Action::Record(Check::TransportOk, false)]
        );
    }

    #[test]
    fn local_close_requests_release() {
        let mut machine = playing(behavior());
        assert_eq!(machine.handle(Input::SessionElapsed), vec![Action::Close]);
        assert_eq!(machine.state(), ProtocolState::Closed);
    }

    #[test]
    fn dispatch_table_is_exhaustive() {
        for state in ProtocolState::ALL {
            for kind in InboundKind::ALL {
                let handler = handler_for(state, kind);
                let expected = match (state, kind) {
                    (ProtocolState::Playing, InboundKind::StartGame) => Handler::StartMoving,
                    (
                        ProtocolState::AwaitingAck | ProtocolState::Playing,
                        InboundKind::SnakeUpdate,
                    ) => Handler::RecordGameUpdate,
                    (ProtocolState::AwaitingAck | ProtocolState::Playing, InboundKind::Pong) => {
                        Handler::RecordPong
                    }
                    _ => Handler::Ignore,
                };
                assert_eq!(handler, expected, "{state:?} x {kind:?}");
            }
        }
    }

    fn any_input() -> impl Strategy<Value = Input> {
        let fixed = vec![
            Input::OpenFailed,
            Input::SettleElapsed,
            Input::Inbound(InboundMessage::Pong),
            Input::Inbound(InboundMessage::Malformed),
            event("startGame"),
            event("snake_update"),
            Input::Undecodable,
            Input::PingDue,
            Input::MoveDue,
            Input::SessionElapsed,
            Input::Cancelled,
        ];
        prop_oneof![
            any::<u16>().prop_map(|status| Input::Opened { status }),
            prop::sample::select(fixed),
            "[a-zA-Z_]{1,12}".prop_map(|name| event(&name)),
            any::<bool>().prop_map(|error| Input::TransportClosed { error }),
        ]
    }

    proptest! {
        #[test]
        fn closed_is_terminal(
            prefix in prop::collection::vec(any_input(), 0..8),
            after in prop::collection::vec(any_input(), 1..32),
        ) {
            let mut machine = machine_with(behavior());
            for input in prefix {
                machine.handle(input);
            }
            machine.handle(Input::Cancelled);
            prop_assert_eq!(machine.state(), ProtocolState::Closed);

            for input in after {
                prop_assert!(machine.handle(input).is_empty());
                prop_assert_eq!(machine.state(), ProtocolState::Closed);
            }
        }
    }
}
