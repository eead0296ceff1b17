use super::connection::{Connection, Inbound};
use super::download::{fill_speed_samples, mbps, MAX_LOCAL_SAMPLES, SAMPLE_INTERVAL};
use super::ping::closed_before_result;
use super::protocol::{self, ClientMessage, DecodeError, ServerMessage, CLOSE_NORMAL};
use super::{
    emit, PhaseState, ProgressEvent, ProgressTx, Result, SpeedTestError, TestPhase, ThroughputResult,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::time::Duration;
use tokio::time::{sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;
pub const MAX_CHUNK_SIZE: usize = 10 * 1024 * 1024;
/// No new chunk is queued while this much is still unflushed.
pub const MAX_BACKLOG: usize = 10 * 1024 * 1024;
/// Per-call limit of the random source.
pub const MAX_RANDOM_BLOCK: usize = 65_536;
pub const MIN_SEND_INTERVAL: Duration = Duration::from_millis(16);
pub const MAX_TARGET_MBPS: f64 = 1000.0;

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub initial_chunk_size: usize,
    pub max_speed_mbps: f64,
    /// Wall-clock length of the sending window.
    pub duration: Duration,
    /// How long to wait for the result after `complete` is sent.
    pub idle_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            initial_chunk_size: DEFAULT_CHUNK_SIZE,
            max_speed_mbps: 1000.0,
            duration: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(15),
        }
    }
}

pub struct UploadTest {
    config: UploadConfig,
    rng: StdRng,
    state: PhaseState,
    chunk_size: usize,
    send_interval: Duration,
    bytes_sent: u64,
    chunks_sent: u64,
    backpressure_skips: u64,
    speed_samples: Vec<f64>,
}

impl UploadTest {
    pub fn new(config: UploadConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: UploadConfig, rng: StdRng) -> Self {
        let chunk_size = config.initial_chunk_size.max(1);
        let send_interval = send_interval(chunk_size, config.max_speed_mbps);
        Self {
            config,
            rng,
            state: PhaseState::AwaitingOpen,
            chunk_size,
            send_interval,
            bytes_sent: 0,
            chunks_sent: 0,
            backpressure_skips: 0,
            speed_samples: Vec::new(),
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn send_interval(&self) -> Duration {
        self.send_interval
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Send ticks skipped because the connection backlog was full.
    pub fn backpressure_skips(&self) -> u64 {
        self.backpressure_skips
    }

    /// Average-rate readings taken locally, one per sampling window.
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
        self.bytes_sent = 0;
        self.chunks_sent = 0;
        self.backpressure_skips = 0;
        self.speed_samples.clear();

        let start = Instant::now();
        let send_deadline = start + self.config.duration;
        let mut result_deadline = send_deadline;
        let mut last_update = start;

        // The send loop lives only as long as this phase; dropping it on any
        // exit path stops all scheduled sends.
        let mut pacer = Some(new_pacer(start, self.send_interval));
        self.transition(PhaseState::Streaming);

        loop {
            tokio::select! {
                biased;

                event = conn.recv() => {
                    let text = match event {
                        Some(Inbound::Text(text)) => text,
                        Some(Inbound::Binary(payload)) => {
                            debug!(len = payload.len(), "ignoring binary frame during upload test");
                            continue;
                        }
                        Some(Inbound::Closed(code)) => return Err(closed_before_result(code)),
                        Some(Inbound::Error(e)) => return Err(SpeedTestError::Transport(e)),
                        None => return Err(SpeedTestError::Transport("connection dropped".into())),
                    };

                    match protocol::decode(&text) {
                        Ok(ServerMessage::Start { chunk_size })
                        | Ok(ServerMessage::ChunkSize { chunk_size }) => {
                            let resized = chunk_size
                                .filter(|&size| size > 0)
                                .is_some_and(|size| self.resize(size));
                            match pacer.as_mut() {
                                Some(p) if resized => {
                                    *p = new_pacer(Instant::now() + self.send_interval, self.send_interval);
                                }
                                _ => {}
                            }
                        }
                        Ok(ServerMessage::Result(frame)) => {
                            let result =
                                fill_speed_samples(frame.into_throughput()?, &self.speed_samples);
                            conn.close(CLOSE_NORMAL);
                            info!(
                                throughput = result.throughput,
                                bytes = result.bytes,
                                duration = result.duration,
                                chunks = self.chunks_sent,
                                "upload test complete"
                            );
                            return Ok(result);
                        }
                        Ok(ServerMessage::Error { message }) => return Err(SpeedTestError::Server(message)),
                        Ok(other) => debug!(?other, "ignoring frame during upload test"),
                        Err(DecodeError::MalformedResult(e)) => {
                            return Err(SpeedTestError::Protocol(format!("malformed upload result: {e}")))
                        }
                        Err(e) => warn!(error = %e, "error parsing upload message"),
                    }
                }

                _ = sleep_until(send_deadline), if self.state == PhaseState::Streaming => {
                    pacer = None;
                    conn.send_json(&ClientMessage::Complete)?;
                    result_deadline = Instant::now() + self.config.idle_timeout;
                    self.transition(PhaseState::AwaitingResult);
                }

                _ = sleep_until(result_deadline), if self.state == PhaseState::AwaitingResult => {
                    return Err(SpeedTestError::Timeout {
                        phase: TestPhase::Upload,
                        after: self.config.idle_timeout,
                    });
                }

                now = next_tick(&mut pacer) => {
                    self.on_tick(conn, now)?;

                    if now.duration_since(last_update) >= SAMPLE_INTERVAL {
                        let elapsed = now.duration_since(start);
                        let mbps = mbps(self.bytes_sent, elapsed);
                        self.speed_samples.push(mbps);
                        if self.speed_samples.len() > MAX_LOCAL_SAMPLES {
                            self.speed_samples.remove(0);
                        }
                        let reading = mbps.min(self.config.max_speed_mbps);
                        emit(progress, ProgressEvent::new(TestPhase::Upload, reading, elapsed)).await;
                        last_update = now;
                    }
                }
            }
        }
    }

    fn on_tick(&mut self, conn: &Connection, now: Instant) -> Result<()> {
        let backlog = conn.buffered_amount();
        if backlog >= MAX_BACKLOG {
            self.backpressure_skips += 1;
            trace!(backlog, ?now, "upload backlog full, skipping chunk");
            return Ok(());
        }

        let chunk = self.next_chunk();
        let len = chunk.len() as u64;
        conn.send_binary(chunk)?;
        self.bytes_sent += len;
        self.chunks_sent += 1;
        Ok(())
    }

    fn next_chunk(&mut self) -> Vec<u8> {
        let mut chunk = vec![0u8; self.chunk_size];
        fill_random(&mut self.rng, &mut chunk);
        chunk
    }

    /// Applies a server chunk-size directive. The new size and pacing take
    /// effect from the next chunk; chunks already queued are unaffected.
    /// Returns whether the size changed.
    fn resize(&mut self, requested: usize) -> bool {
        let size = requested.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        if size != requested {
            warn!(requested, size, "chunk size outside supported range, clamping");
        }
        if size != self.chunk_size {
            debug!(old = self.chunk_size, new = size, "adapting upload chunk size");
            self.chunk_size = size;
            self.send_interval = send_interval(size, self.config.max_speed_mbps);
            return true;
        }
        false
    }

    fn transition(&mut self, next: PhaseState) {
        debug!(from = ?self.state, to = ?next, "upload phase");
        self.state = next;
    }
}

/// Minimum spacing between chunks so the generator does not outrun the
/// configured ceiling.
pub fn send_interval(chunk_size: usize, max_speed_mbps: f64) -> Duration {
    let target_mbps = if max_speed_mbps.is_finite() && max_speed_mbps > 0.0 {
        max_speed_mbps.min(MAX_TARGET_MBPS)
    } else {
        MAX_TARGET_MBPS
    };
    let target_bytes_per_second = target_mbps * 1_000_000.0 / 8.0;
    Duration::from_secs_f64(chunk_size as f64 / target_bytes_per_second).max(MIN_SEND_INTERVAL)
}

/// Fills `buf` with random bytes, at most [`MAX_RANDOM_BLOCK`] per call.
pub fn fill_random<R: RngCore>(rng: &mut R, buf: &mut [u8]) {
    for block in buf.chunks_mut(MAX_RANDOM_BLOCK) {
        rng.fill_bytes(block);
    }
}

fn new_pacer(first_tick: Instant, period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(first_tick, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(pacer: &mut Option<Interval>) -> Instant {
    match pacer {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}
