pub mod connection;
pub mod download;
pub mod error;
pub mod ping;
pub mod protocol;
pub mod session;
pub mod upload;
pub mod websocket;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

pub use connection::{Connection, Connector, Inbound, MemoryConnector, Outbound, PeerHandle};
pub use download::{DownloadConfig, DownloadTest};
pub use error::SpeedTestError;
pub use ping::{PingConfig, PingTest};
pub use session::{PhaseResult, Session, SessionConfig, SessionEvent, SessionReport, SessionState};
pub use upload::{UploadConfig, UploadTest};
pub use websocket::WsConnector;

pub type Result<T, E = SpeedTestError> = std::result::Result<T, E>;

/// Sink for incremental progress readings.
pub type ProgressTx = mpsc::Sender<ProgressEvent>;

/// Protocol phase; each phase owns exactly one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPhase {
    Ping,
    Download,
    Upload,
}

impl TestPhase {
    pub fn path(self) -> &'static str {
        match self {
            TestPhase::Ping => "ping",
            TestPhase::Download => "download",
            TestPhase::Upload => "upload",
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            TestPhase::Ping => Unit::Ms,
            TestPhase::Download | TestPhase::Upload => Unit::Mbps,
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Lifecycle of a single protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    AwaitingOpen,
    Probing,
    Streaming,
    AwaitingResult,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "ms")]
    Ms,
    #[serde(rename = "Mbps")]
    Mbps,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: TestPhase,
    pub value: f64,
    pub unit: Unit,
    /// Time since the phase started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(phase: TestPhase, value: f64, elapsed: Duration) -> Self {
        Self {
            phase,
            value,
            unit: phase.unit(),
            timestamp: Some(elapsed),
        }
    }
}

pub(crate) async fn emit(progress: Option<&ProgressTx>, event: ProgressEvent) {
    if let Some(tx) = progress {
        let _ = tx.send(event).await;
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyResult {
    /// Mean round-trip time in ms.
    pub latency: f64,
    pub jitter: f64,
    pub packets: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_latency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency: Option<f64>,
}

impl LatencyResult {
    pub fn packet_loss_or_zero(&self) -> f64 {
        self.packet_loss.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputResult {
    /// Mbps
    pub throughput: f64,
    pub bytes: u64,
    /// Seconds
    pub duration: f64,
    /// Download only, ms to first byte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<f64>,
    /// Mbps²
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_samples: Option<Vec<f64>>,
}

impl ThroughputResult {
    pub fn with_throughput(throughput: f64) -> Self {
        Self {
            throughput,
            ..Self::default()
        }
    }
}

/// Headline numbers of a finished session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedTestResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
}

impl SpeedTestResult {
    pub fn from_results(
        ping: &LatencyResult,
        download: &ThroughputResult,
        upload: &ThroughputResult,
    ) -> Self {
        Self {
            download_mbps: download.throughput,
            upload_mbps: upload.throughput,
            ping_ms: ping.latency,
            jitter_ms: ping.jitter,
        }
    }
}
