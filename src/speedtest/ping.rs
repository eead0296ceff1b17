use super::connection::{Connection, Inbound};
use super::protocol::{self, ClientMessage, DecodeError, ServerMessage, CLOSE_NORMAL};
use super::{emit, LatencyResult, PhaseState, ProgressEvent, ProgressTx, Result, SpeedTestError, TestPhase};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PingConfig {
    /// Longest silence tolerated between inbound frames.
    pub idle_timeout: Duration,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15),
        }
    }
}

/// Echo side of the latency protocol. The server times each round trip;
/// this side only answers pings and waits for the verdict.
pub struct PingTest {
    config: PingConfig,
    state: PhaseState,
    pings_answered: u64,
}

impl PingTest {
    pub fn new(config: PingConfig) -> Self {
        Self {
            config,
            state: PhaseState::AwaitingOpen,
            pings_answered: 0,
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn pings_answered(&self) -> u64 {
        self.pings_answered
    }

    pub async fn run(
        &mut self,
        conn: &mut Connection,
        progress: Option<&ProgressTx>,
    ) -> Result<LatencyResult> {
        let outcome = self.probe(conn, progress).await;
        self.state = match outcome {
            Ok(_) => PhaseState::Closed,
            Err(_) => PhaseState::Failed,
        };
        outcome
    }

    async fn probe(
        &mut self,
        conn: &mut Connection,
        progress: Option<&ProgressTx>,
    ) -> Result<LatencyResult> {
        let start = Instant::now();
        self.transition(PhaseState::Probing);
        self.pings_answered = 0;

        loop {
            let event = tokio::time::timeout(self.config.idle_timeout, conn.recv())
                .await
                .map_err(|_| SpeedTestError::Timeout {
                    phase: TestPhase::Ping,
                    after: self.config.idle_timeout,
                })?;

            let text = match event {
                Some(Inbound::Text(text)) => text,
                Some(Inbound::Binary(payload)) => {
                    debug!(len = payload.len(), "ignoring binary frame during ping test");
                    continue;
                }
                Some(Inbound::Closed(code)) => return Err(closed_before_result(code)),
                Some(Inbound::Error(e)) => return Err(SpeedTestError::Transport(e)),
                None => return Err(SpeedTestError::Transport("connection dropped".into())),
            };

            match protocol::decode(&text) {
                Ok(ServerMessage::Ping { timestamp, sequence }) => {
                    conn.send_json(&ClientMessage::Pong { timestamp, sequence })?;
                    self.pings_answered += 1;
                    emit(progress, ProgressEvent::new(TestPhase::Ping, 0.0, start.elapsed())).await;
                }
                Ok(ServerMessage::Result(frame)) => {
                    self.transition(PhaseState::AwaitingResult);
                    let result = frame.into_latency()?;
                    conn.close(CLOSE_NORMAL);
                    info!(
                        latency = result.latency,
                        jitter = result.jitter,
                        packets = result.packets,
                        packet_loss = result.packet_loss,
                        "ping test complete"
                    );
                    return Ok(result);
                }
                Ok(ServerMessage::Error { message }) => return Err(SpeedTestError::Server(message)),
                Ok(other) => debug!(?other, "ignoring frame during ping test"),
                Err(DecodeError::MalformedResult(e)) => {
                    return Err(SpeedTestError::Protocol(format!("malformed ping result: {e}")))
                }
                Err(e) => warn!(error = %e, "error parsing ping message"),
            }
        }
    }

    fn transition(&mut self, next: PhaseState) {
        debug!(from = ?self.state, to = ?next, "ping phase");
        self.state = next;
    }
}

/// Failure for a connection that closed before a terminal result.
pub(crate) fn closed_before_result(code: Option<u16>) -> SpeedTestError {
    match code {
        Some(code) if protocol::is_expected_close(code) => SpeedTestError::Protocol(format!(
            "connection closed with code {code} before a result arrived"
        )),
        code => SpeedTestError::AbnormalClosure { code },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::connection::{pair, Outbound};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn ping_result() -> serde_json::Value {
        json!({
            "type": "result", "latency": 14.2, "jitter": 1.3, "packets": 20,
            "packetLoss": 0.0, "minLatency": 12.0, "maxLatency": 18.5, "timestamp": 1712345678
        })
    }

    #[tokio::test]
    async fn answers_pings_and_resolves_with_result() {
        let (mut conn, mut peer) = pair();
        let (tx, mut rx) = mpsc::channel(32);

        let server = tokio::spawn(async move {
            for seq in 0..3 {
                peer.send_json(&json!({"type": "ping", "timestamp": 1_000_000 + seq, "sequence": seq}))
                    .await;
                let Some(Outbound::Text(pong)) = peer.recv().await else {
                    panic!("expected pong");
                };
                let pong: serde_json::Value = serde_json::from_str(&pong).unwrap();
                assert_eq!(
                    pong,
                    json!({"type": "pong", "timestamp": 1_000_000 + seq, "sequence": seq})
                );
            }
            peer.send_json(&ping_result()).await;
            peer.recv().await
        });

        let mut test = PingTest::new(PingConfig::default());
        let result = test.run(&mut conn, Some(&tx)).await.unwrap();
        drop(tx);

        assert_eq!(result.latency, 14.2);
        assert_eq!(result.packets, 20);
        assert_eq!(result.max_latency, Some(18.5));
        assert_eq!(test.pings_answered(), 3);
        assert_eq!(test.state(), PhaseState::Closed);
        assert_eq!(server.await.unwrap(), Some(Outbound::Close(CLOSE_NORMAL)));

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.value == 0.0 && e.phase == TestPhase::Ping));
    }

    #[tokio::test]
    async fn garbage_frames_are_skipped() {
        let (mut conn, peer) = pair();
        peer.send_text("{not json").await;
        peer.send_json(&json!({"type": "hello"})).await;
        peer.send_json(&ping_result()).await;

        let result = PingTest::new(PingConfig::default()).run(&mut conn, None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn abnormal_close_before_result_fails() {
        let (mut conn, peer) = pair();
        peer.close(Some(1006)).await;

        let mut test = PingTest::new(PingConfig::default());
        let err = test.run(&mut conn, None).await.unwrap_err();
        assert!(matches!(err, SpeedTestError::AbnormalClosure { code: Some(1006) }));
        assert_eq!(test.state(), PhaseState::Failed);
    }

    #[tokio::test]
    async fn normal_close_before_result_is_a_protocol_failure() {
        let (mut conn, peer) = pair();
        peer.close(Some(1000)).await;

        let err = PingTest::new(PingConfig::default())
            .run(&mut conn, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SpeedTestError::Protocol(_)));
    }

    #[tokio::test]
    async fn server_error_frame_fails_the_phase() {
        let (mut conn, peer) = pair();
        peer.send_json(&json!({"type": "error", "message": "too many connections"}))
            .await;

        let err = PingTest::new(PingConfig::default())
            .run(&mut conn, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SpeedTestError::Server(m) if m == "too many connections"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (mut conn, _peer) = pair();
        let config = PingConfig {
            idle_timeout: Duration::from_secs(5),
        };

        let err = PingTest::new(config).run(&mut conn, None).await.unwrap_err();
        assert!(matches!(
            err,
            SpeedTestError::Timeout { phase: TestPhase::Ping, after } if after == Duration::from_secs(5)
        ));
    }
}
