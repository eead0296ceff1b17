//! WebSocket transport for the measurement backend.

use super::connection::{release, Connection, Connector, Inbound, Outbound};
use super::protocol::CLOSE_NORMAL;
use super::{SpeedTestError, TestPhase};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const INBOUND_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self, phase: TestPhase) -> String {
        format!("{}/ws/{}", self.base_url.trim_end_matches('/'), phase.path())
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        phase: TestPhase,
    ) -> impl Future<Output = Result<Connection, SpeedTestError>> + Send {
        let url = self.endpoint(phase);
        let connect_timeout = self.connect_timeout;

        async move {
            debug!(%url, "connecting");
            let (stream, _) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    SpeedTestError::Transport(format!(
                        "failed to connect to {phase} test server: timed out after {connect_timeout:?}"
                    ))
                })?
                .map_err(|e| {
                    SpeedTestError::Transport(format!(
                        "failed to connect to {phase} test server: {e}"
                    ))
                })?;
            info!(%url, "{phase} test connected");

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
            let backlog = Arc::new(AtomicUsize::new(0));

            tokio::spawn(run_pump(stream, outbound_rx, inbound_tx, Arc::clone(&backlog)));

            Ok(Connection::new(outbound_tx, inbound_rx, backlog))
        }
    }
}

/// Moves frames between the connection's channels and the socket until
/// either side closes.
async fn run_pump<S>(
    stream: S,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    inbound_tx: mpsc::Sender<Inbound>,
    backlog: Arc<AtomicUsize>,
) where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            maybe_out = outbound_rx.recv() => {
                let frame = match maybe_out {
                    Some(frame) => frame,
                    None => Outbound::Close(CLOSE_NORMAL),
                };
                match frame {
                    Outbound::Text(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            let _ = inbound_tx.send(Inbound::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Outbound::Binary(payload) => {
                        let len = payload.len();
                        let sent = write.send(Message::Binary(payload)).await;
                        release(&backlog, len);
                        if let Err(e) = sent {
                            let _ = inbound_tx.send(Inbound::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Outbound::Close(code) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "".into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!(error = %e, "close frame not delivered");
                        }
                        break;
                    }
                }
            }
            maybe_in = read.next() => {
                let event = match maybe_in {
                    Some(Ok(Message::Text(text))) => Inbound::Text(text),
                    Some(Ok(Message::Binary(payload))) => Inbound::Binary(payload),
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        let _ = inbound_tx.send(Inbound::Closed(code)).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket error");
                        let _ = inbound_tx.send(Inbound::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = inbound_tx.send(Inbound::Closed(None)).await;
                        break;
                    }
                };
                if inbound_tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("websocket pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_follow_backend_routes() {
        let connector = WsConnector::new("ws://localhost:3001/");
        assert_eq!(connector.endpoint(TestPhase::Ping), "ws://localhost:3001/ws/ping");
        assert_eq!(
            connector.endpoint(TestPhase::Download),
            "ws://localhost:3001/ws/download"
        );
        assert_eq!(connector.endpoint(TestPhase::Upload), "ws://localhost:3001/ws/upload");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_failure() {
        let connector = WsConnector::new("ws://127.0.0.1:9")
            .with_connect_timeout(Duration::from_secs(2));
        let err = connector.connect(TestPhase::Ping).await.unwrap_err();
        assert!(err.is_connection_failure(), "{err}");
    }
}
