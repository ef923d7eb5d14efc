use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::trace;
use url::Url;

use super::{Channel, Connector, Opened, TransportError};

#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn open(&self, url: &Url) -> Result<Opened<WsChannel>, TransportError> {
        let connect = connect_async(url.as_str());
        let (stream, response) = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(value)) => value,
            Ok(Err(tungstenite::Error::Http(response))) => {
                return Err(TransportError::Rejected(response.status().as_u16()));
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Err(TransportError::Timeout(self.connect_timeout)),
        };

        Ok(Opened {
            status: response.status().as_u16(),
            channel: WsChannel { stream },
        })
    }
}

pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => trace!("dropping non-utf8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    trace!(?frame, "peer sent close frame");
                    return None;
                }
                // ping/pong handled by tungstenite
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            trace!(?err, "error closing websocket");
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(err) => Self::Io(err),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            other => Self::WebSocket(other.to_string()),
        }
    }
}
