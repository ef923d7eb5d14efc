//! In-memory game server used by the scenario tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use snake_loadtest::protocol::{self, EVENT_NEW_PLAYER};
use snake_loadtest::transport::{Channel, Connector, Opened, SWITCHING_PROTOCOLS, TransportError};
use snake_loadtest::{Cli, LoadTestConfig};

pub fn config(args: &[&str]) -> LoadTestConfig {
    let cli = Cli::try_parse_from(std::iter::once("snake-loadtest").chain(args.iter().copied()))
        .expect("cli parse");
    LoadTestConfig::try_from(cli).expect("config")
}

pub fn snake_update() -> String {
    r#"{"event":"snake_update","snakes":[]}"#.to_string()
}

pub fn start_game() -> String {
    r#"{"event":"startGame"}"#.to_string()
}

#[derive(Debug, Clone, Copy)]
pub enum Rejection {
    /// Upgrade answered with a non-101 status.
    Status(u16),
    /// TCP connect refused.
    Refused,
}

#[derive(Debug, Clone)]
pub enum PeerFrame {
    Text(String),
    Close,
}

/// How the fake server treats every connection.
#[derive(Debug, Clone, Default)]
pub struct ServerBehavior {
    /// Every nth open (1-based) is rejected.
    pub reject_every: Option<(usize, Rejection)>,
    /// Answer `newPlayer` with a `snake_update` to that player.
    pub answer_join: bool,
    /// Echo the ping literal back.
    pub answer_ping: bool,
    /// Frames pushed to each connection, offset from its open.
    pub script: Vec<(Duration, PeerFrame)>,
    /// Never finish a send, like a peer that stopped reading.
    pub stall_sends: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub url: String,
    pub status: Option<u16>,
    pub sent: Vec<String>,
    /// Offset from open of each entry in `sent`.
    pub sent_at: Vec<Duration>,
    pub closed_locally: bool,
}

impl Transcript {
    pub fn player_id(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()?
            .query_pairs()
            .find(|(key, _)| key == "playerId")
            .map(|(_, value)| value.into_owned())
    }

    pub fn moves(&self) -> Vec<protocol::MoveCommand> {
        self.sent
            .iter()
            .filter_map(|frame| protocol::parse_move(frame).ok())
            .collect()
    }

    pub fn first_move_at(&self) -> Option<Duration> {
        self.sent
            .iter()
            .zip(&self.sent_at)
            .find(|(frame, _)| protocol::parse_move(frame).is_ok())
            .map(|(_, at)| *at)
    }
}

#[derive(Debug, Default)]
pub struct MockConnector {
    behavior: ServerBehavior,
    opens: AtomicUsize,
    transcripts: Mutex<Vec<Arc<Mutex<Transcript>>>>,
}

impl MockConnector {
    pub fn new(behavior: ServerBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            ..Self::default()
        })
    }

    pub fn transcripts(&self) -> Vec<Transcript> {
        self.transcripts
            .lock()
            .iter()
            .map(|transcript| transcript.lock().clone())
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Channel = MockChannel;

    async fn open(&self, url: &Url) -> Result<Opened<MockChannel>, TransportError> {
        let nth = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let transcript = Arc::new(Mutex::new(Transcript {
            url: url.to_string(),
            ..Transcript::default()
        }));
        self.transcripts.lock().push(Arc::clone(&transcript));

        let rejection = match self.behavior.reject_every {
            Some((every, rejection)) if every > 0 && nth % every == 0 => Some(rejection),
            _ => None,
        };
        let status = match rejection {
            Some(Rejection::Refused) => {
                return Err(TransportError::Io(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )));
            }
            Some(Rejection::Status(status)) => status,
            None => SWITCHING_PROTOCOLS,
        };
        transcript.lock().status = Some(status);

        let (tx, rx) = mpsc::unbounded_channel();
        if status == SWITCHING_PROTOCOLS {
            for (offset, frame) in self.behavior.script.iter().cloned() {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(offset).await;
                    let _ = tx.send(frame);
                });
            }
        }

        Ok(Opened {
            status,
            channel: MockChannel {
                tx,
                rx,
                transcript,
                opened_at: Instant::now(),
                answer_join: self.behavior.answer_join,
                answer_ping: self.behavior.answer_ping,
                stall_sends: self.behavior.stall_sends,
            },
        })
    }
}

pub struct MockChannel {
    tx: mpsc::UnboundedSender<PeerFrame>,
    rx: mpsc::UnboundedReceiver<PeerFrame>,
    transcript: Arc<Mutex<Transcript>>,
    opened_at: Instant,
    answer_join: bool,
    answer_ping: bool,
    stall_sends: bool,
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.stall_sends {
            return std::future::pending().await;
        }
        let is_join = text.contains(&format!(r#""event":"{EVENT_NEW_PLAYER}""#));
        if self.answer_join && is_join {
            let _ = self.tx.send(PeerFrame::Text(snake_update()));
        }
        if self.answer_ping && text == protocol::PING {
            let _ = self.tx.send(PeerFrame::Text(protocol::PONG.to_string()));
        }
        let mut transcript = self.transcript.lock();
        transcript.sent.push(text);
        transcript.sent_at.push(self.opened_at.elapsed());
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        match self.rx.recv().await? {
            PeerFrame::Text(text) => Some(Ok(text)),
            PeerFrame::Close => None,
        }
    }

    async fn close(&mut self) {
        self.transcript.lock().closed_locally = true;
    }
}
