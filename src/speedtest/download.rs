use super::connection::{Connection, Inbound};
use super::ping::closed_before_result;
use super::protocol::{self, ClientMessage, DecodeError, ServerMessage, CLOSE_NORMAL};
use super::{
    emit, PhaseState, ProgressEvent, ProgressTx, Result, SpeedTestError, TestPhase, ThroughputResult,
};
use crate::analysis::stats;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
pub(crate) const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
pub(crate) const MAX_LOCAL_SAMPLES: usize = 200;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Chunk size announced to the server in the start frame.
    pub chunk_size: usize,
    /// Ceiling applied to reported progress readings, Mbps.
    pub max_speed_mbps: f64,
    pub idle_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_speed_mbps: 1000.0,
            idle_timeout: Duration::from_secs(15),
        }
    }
}

pub struct DownloadTest {
    config: DownloadConfig,
    state: PhaseState,
    speed_samples: Vec<f64>,
    bytes_received: u64,
}

impl DownloadTest {
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            config,
            state: PhaseState::AwaitingOpen,
            speed_samples: Vec::new(),
            bytes_received: 0,
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Instantaneous readings observed locally, one per sampling window.
    pub fn speed_samples(&self) -> &[f64] {
        &self.speed_samples
    }

    pub async fn run(
        &mut self,
        conn: &mut Connection,
        progress: Option<&ProgressTx>,
    ) -> Result<ThroughputResult> {
        let outcome = self.stream(conn, progress).await;
        self.state = match outcome {
            Ok(_) => PhaseState::Closed,
            Err(_) => PhaseState::Failed,
        };
        outcome
    }

    async fn stream(
        &mut self,
        conn: &mut Connection,
        progress: Option<&ProgressTx>,
    ) -> Result<ThroughputResult> {
        self.speed_samples.clear();
        self.bytes_received = 0;

        let start = Instant::now();
        let mut last_update = start;
        let mut ttfb: Option<Duration> = None;

        conn.send_json(&ClientMessage::Start {
            chunk_size: self.config.chunk_size,
        })?;
        self.transition(PhaseState::Streaming);

        loop {
            let event = tokio::time::timeout(self.config.idle_timeout, conn.recv())
                .await
                .map_err(|_| SpeedTestError::Timeout {
                    phase: TestPhase::Download,
                    after: self.config.idle_timeout,
                })?;

            let text = match event {
                Some(Inbound::Binary(payload)) => {
                    let now = Instant::now();
                    if ttfb.is_none() {
                        ttfb = Some(now.duration_since(start));
                    }
                    self.bytes_received += payload.len() as u64;

                    if now.duration_since(last_update) >= SAMPLE_INTERVAL {
                        let elapsed = now.duration_since(start);
                        let mbps = mbps(self.bytes_received, elapsed);
                        self.speed_samples.push(mbps);

                        // Keep last 200 samples
                        if self.speed_samples.len() > MAX_LOCAL_SAMPLES {
                            self.speed_samples.remove(0);
                        }

                        let reading = mbps.min(self.config.max_speed_mbps);
                        emit(progress, ProgressEvent::new(TestPhase::Download, reading, elapsed)).await;
                        last_update = now;
                    }
                    continue;
                }
                Some(Inbound::Text(text)) => text,
                Some(Inbound::Closed(code)) => return Err(closed_before_result(code)),
                Some(Inbound::Error(e)) => return Err(SpeedTestError::Transport(e)),
                None => return Err(SpeedTestError::Transport("connection dropped".into())),
            };

            match protocol::decode(&text) {
                Ok(ServerMessage::Result(frame)) => {
                    self.transition(PhaseState::AwaitingResult);
                    let result = self.complete(frame.into_throughput()?, ttfb);
                    conn.close(CLOSE_NORMAL);
                    info!(
                        throughput = result.throughput,
                        bytes = result.bytes,
                        duration = result.duration,
                        ttfb = result.ttfb,
                        "download test complete"
                    );
                    return Ok(result);
                }
                Ok(ServerMessage::Error { message }) => return Err(SpeedTestError::Server(message)),
                Ok(other) => debug!(?other, "ignoring frame during download test"),
                Err(DecodeError::MalformedResult(e)) => {
                    return Err(SpeedTestError::Protocol(format!(
                        "malformed download result: {e}"
                    )))
                }
                Err(e) => warn!(error = %e, "error parsing download result"),
            }
        }
    }

    /// Fills fields the server left out from what was observed locally.
    fn complete(&self, mut result: ThroughputResult, ttfb: Option<Duration>) -> ThroughputResult {
        if result.ttfb.is_none() {
            result.ttfb = ttfb.map(|d| d.as_secs_f64() * 1000.0);
        }
        fill_speed_samples(result, &self.speed_samples)
    }

    fn transition(&mut self, next: PhaseState) {
        debug!(from = ?self.state, to = ?next, "download phase");
        self.state = next;
    }
}

/// Falls back to locally sampled readings when the server result carries
/// no sample series or variance.
pub(crate) fn fill_speed_samples(mut result: ThroughputResult, local: &[f64]) -> ThroughputResult {
    if result.speed_samples.is_none() && !local.is_empty() {
        result.speed_samples = Some(local.to_vec());
    }
    if result.speed_variance.is_none() {
        result.speed_variance = result
            .speed_samples
            .as_deref()
            .filter(|samples| !samples.is_empty())
            .map(stats::variance);
    }
    result
}

/// Average rate since the phase started.
pub(crate) fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / secs / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::connection::{pair, Outbound};
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn mbps_from_bytes_and_elapsed() {
        assert_eq!(mbps(1_250_000, Duration::from_secs(1)), 10.0);
        assert_eq!(mbps(1_000, Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn announces_chunk_size_before_streaming() {
        let (mut conn, mut peer) = pair();
        peer.send_json(&json!({"type": "result", "throughput": 50.0, "bytes": 1, "duration": 1.0}))
            .await;

        DownloadTest::new(DownloadConfig::default())
            .run(&mut conn, None)
            .await
            .unwrap();

        assert_eq!(
            peer.recv().await,
            Some(Outbound::Text(r#"{"type":"start","chunkSize":262144}"#.into()))
        );
        assert_eq!(peer.recv().await, Some(Outbound::Close(CLOSE_NORMAL)));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_throttled_and_clamped() {
        let (mut conn, peer) = pair();
        let (tx, mut rx) = mpsc::channel(256);
        let config = DownloadConfig {
            max_speed_mbps: 50.0,
            ..DownloadConfig::default()
        };

        let server = tokio::spawn(async move {
            // 1.25 MB every 50 ms is 200 Mbps, well above the ceiling.
            for _ in 0..20 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                peer.send_binary(vec![0u8; 1_250_000]).await;
            }
            peer.send_json(&json!({
                "type": "result", "throughput": 198.5, "bytes": 25_000_000u64, "duration": 1.0
            }))
            .await;
            peer
        });

        let mut test = DownloadTest::new(config);
        let result = test.run(&mut conn, Some(&tx)).await.unwrap();
        drop(tx);
        let _peer = server.await.unwrap();

        assert_eq!(result.throughput, 198.5);
        assert_eq!(test.bytes_received(), 25_000_000);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        // One reading per 100 ms window, never more often.
        assert!(!events.is_empty() && events.len() <= 10, "{} events", events.len());
        assert!(events.iter().all(|e| e.value <= 50.0));
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(test.speed_samples().iter().any(|&s| s > 50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fields_are_filled_from_local_observation() {
        let (mut conn, peer) = pair();

        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            for _ in 0..5 {
                peer.send_binary(vec![0u8; 125_000]).await;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            peer.send_json(&json!({"type": "result", "throughput": 9.8, "bytes": 625000, "duration": 0.5}))
                .await;
            peer
        });

        let result = DownloadTest::new(DownloadConfig::default())
            .run(&mut conn, None)
            .await
            .unwrap();
        let _peer = server.await.unwrap();

        let ttfb = result.ttfb.unwrap();
        assert!((ttfb - 40.0).abs() < 1.0, "ttfb {ttfb}");
        let samples = result.speed_samples.unwrap();
        assert!(!samples.is_empty());
        assert_eq!(result.speed_variance, Some(stats::variance(&samples)));
    }

    #[tokio::test]
    async fn server_values_win_over_local_ones() {
        let (mut conn, peer) = pair();
        peer.send_binary(vec![0u8; 1024]).await;
        peer.send_json(&json!({
            "type": "result", "throughput": 80.0, "bytes": 1024, "duration": 10.0,
            "ttfb": 120.0, "speedVariance": 4.0, "speedSamples": [79.0, 81.0]
        }))
        .await;

        let result = DownloadTest::new(DownloadConfig::default())
            .run(&mut conn, None)
            .await
            .unwrap();
        assert_eq!(result.ttfb, Some(120.0));
        assert_eq!(result.speed_variance, Some(4.0));
        assert_eq!(result.speed_samples, Some(vec![79.0, 81.0]));
    }

    #[tokio::test]
    async fn transport_error_mid_stream_fails() {
        let (mut conn, peer) = pair();
        peer.send_binary(vec![0u8; 4096]).await;
        peer.fail("connection reset by peer").await;

        let mut test = DownloadTest::new(DownloadConfig::default());
        let err = test.run(&mut conn, None).await.unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(test.state(), PhaseState::Failed);
        assert_eq!(test.bytes_received(), 4096);
    }

    #[tokio::test]
    async fn malformed_result_is_fatal() {
        let (mut conn, peer) = pair();
        peer.send_text(r#"{"type":"result","throughput":"lots"}"#).await;

        let err = DownloadTest::new(DownloadConfig::default())
            .run(&mut conn, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SpeedTestError::Protocol(_)));
    }
}
