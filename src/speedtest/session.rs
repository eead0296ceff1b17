//! Runs ping, download and upload back to back and turns the results into a
//! report.

use super::connection::Connector;
use super::download::{self, DownloadConfig, DownloadTest};
use super::ping::{PingConfig, PingTest};
use super::upload::{self, UploadConfig, UploadTest};
use super::{
    LatencyResult, ProgressEvent, ProgressTx, Result, SpeedTestError, SpeedTestResult, TestPhase,
    ThroughputResult,
};
use crate::analysis::{self, QualityResult, ScenarioReport, Summary};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

const PROGRESS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ceiling for reported download readings and the upload pacing target.
    pub max_speed_mbps: f64,
    pub download_chunk_size: usize,
    /// Upload chunk size until the server asks for another.
    pub upload_chunk_size: usize,
    pub upload_duration: Duration,
    pub idle_timeout: Duration,
    /// Pause between consecutive phases.
    pub phase_pause: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_speed_mbps: 1000.0,
            download_chunk_size: download::DEFAULT_CHUNK_SIZE,
            upload_chunk_size: upload::DEFAULT_CHUNK_SIZE,
            upload_duration: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(15),
            phase_pause: Duration::from_millis(500),
        }
    }
}

impl SessionConfig {
    pub fn ping(&self) -> PingConfig {
        PingConfig {
            idle_timeout: self.idle_timeout,
        }
    }

    pub fn download(&self, max_speed_mbps: f64) -> DownloadConfig {
        DownloadConfig {
            chunk_size: self.download_chunk_size,
            max_speed_mbps,
            idle_timeout: self.idle_timeout,
        }
    }

    pub fn upload(&self, max_speed_mbps: f64) -> UploadConfig {
        UploadConfig {
            initial_chunk_size: self.upload_chunk_size,
            max_speed_mbps,
            duration: self.upload_duration,
            idle_timeout: self.idle_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running(TestPhase),
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseResult {
    Ping(LatencyResult),
    Download(ThroughputResult),
    Upload(ThroughputResult),
}

impl PhaseResult {
    pub fn phase(&self) -> TestPhase {
        match self {
            PhaseResult::Ping(_) => TestPhase::Ping,
            PhaseResult::Download(_) => TestPhase::Download,
            PhaseResult::Upload(_) => TestPhase::Upload,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseStarted(TestPhase),
    Progress(ProgressEvent),
    PhaseComplete(PhaseResult),
    Finished(Box<SessionReport>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub overview: SpeedTestResult,
    pub ping: LatencyResult,
    pub download: ThroughputResult,
    pub upload: ThroughputResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_summary: Option<Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_summary: Option<Summary>,
    pub quality: QualityResult,
    pub scenarios: ScenarioReport,
}

impl SessionReport {
    /// Scores completed phase results.
    pub fn new(ping: LatencyResult, download: ThroughputResult, upload: ThroughputResult) -> Self {
        let quality = analysis::score_quality(&ping, &download, &upload);
        let scenarios = analysis::evaluate_all(&ping, &download, &upload, &quality);
        Self {
            overview: SpeedTestResult::from_results(&ping, &download, &upload),
            download_summary: summary_of(&download),
            upload_summary: summary_of(&upload),
            ping,
            download,
            upload,
            quality,
            scenarios,
        }
    }
}

fn summary_of(result: &ThroughputResult) -> Option<Summary> {
    result
        .speed_samples
        .as_deref()
        .filter(|samples| !samples.is_empty())
        .map(analysis::summarize)
}

/// One measurement session. Phases run strictly one after another, each on
/// its own connection.
pub struct Session<C> {
    connector: C,
    config: SessionConfig,
    state: SessionState,
}

impl<C: Connector + Sync> Session<C> {
    pub fn new(connector: C, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn latency_probe(&self, progress: Option<&ProgressTx>) -> Result<LatencyResult> {
        let mut conn = self.connector.connect(TestPhase::Ping).await?;
        PingTest::new(self.config.ping()).run(&mut conn, progress).await
    }

    pub async fn download_sample(
        &self,
        max_speed_mbps: f64,
        progress: Option<&ProgressTx>,
    ) -> Result<ThroughputResult> {
        let mut conn = self.connector.connect(TestPhase::Download).await?;
        DownloadTest::new(self.config.download(max_speed_mbps))
            .run(&mut conn, progress)
            .await
    }

    pub async fn upload_sample(
        &self,
        max_speed_mbps: f64,
        progress: Option<&ProgressTx>,
    ) -> Result<ThroughputResult> {
        let mut conn = self.connector.connect(TestPhase::Upload).await?;
        UploadTest::new(self.config.upload(max_speed_mbps))
            .run(&mut conn, progress)
            .await
    }

    /// Runs all three phases and scores them.
    ///
    /// A message on `cancel` aborts the session at whatever point it has
    /// reached; the open connection is closed normally. Dropping the cancel
    /// sender without sending lets the session run to completion.
    pub async fn run(
        &mut self,
        events: mpsc::Sender<SessionEvent>,
        mut cancel: mpsc::Receiver<()>,
    ) -> Result<SessionReport> {
        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => Err(SpeedTestError::Cancelled),
            outcome = self.run_phases(&events) => outcome,
        };

        match outcome {
            Ok(report) => {
                self.state = SessionState::Complete;
                info!(
                    download = report.download.throughput,
                    upload = report.upload.throughput,
                    latency = report.ping.latency,
                    stability = report.quality.stability_score,
                    "speed test complete"
                );
                let _ = events
                    .send(SessionEvent::Finished(Box::new(report.clone())))
                    .await;
                Ok(report)
            }
            Err(e) => {
                self.state = SessionState::Idle;
                error!(error = %e, "speed test failed");
                let _ = events.send(SessionEvent::Failed(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, events: &mpsc::Sender<SessionEvent>) -> Result<SessionReport> {
        let max_speed = self.config.max_speed_mbps;

        self.enter(TestPhase::Ping, events).await;
        let this = &*self;
        let ping = relay(events, |tx| async move {
            let outcome = this.latency_probe(Some(&tx)).await;
            drop(tx);
            outcome
        })
        .await?;
        finish(events, PhaseResult::Ping(ping.clone())).await;
        tokio::time::sleep(self.config.phase_pause).await;

        self.enter(TestPhase::Download, events).await;
        let this = &*self;
        let download = relay(events, |tx| async move {
            let outcome = this.download_sample(max_speed, Some(&tx)).await;
            drop(tx);
            outcome
        })
        .await?;
        finish(events, PhaseResult::Download(download.clone())).await;
        tokio::time::sleep(self.config.phase_pause).await;

        self.enter(TestPhase::Upload, events).await;
        let this = &*self;
        let upload = relay(events, |tx| async move {
            let outcome = this.upload_sample(max_speed, Some(&tx)).await;
            drop(tx);
            outcome
        })
        .await?;
        finish(events, PhaseResult::Upload(upload.clone())).await;

        Ok(SessionReport::new(ping, download, upload))
    }

    async fn enter(&mut self, phase: TestPhase, events: &mpsc::Sender<SessionEvent>) {
        info!(%phase, "starting phase");
        self.state = SessionState::Running(phase);
        let _ = events.send(SessionEvent::PhaseStarted(phase)).await;
    }
}

/// Runs a phase while forwarding its progress feed. Every progress event is
/// delivered before this returns.
async fn relay<T, F, Fut>(events: &mpsc::Sender<SessionEvent>, phase: F) -> Result<T>
where
    F: FnOnce(ProgressTx) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let (tx, mut rx) = mpsc::channel(PROGRESS_CAPACITY);
    let forward = async {
        while let Some(event) = rx.recv().await {
            let _ = events.send(SessionEvent::Progress(event)).await;
        }
    };
    let (outcome, ()) = tokio::join!(phase(tx), forward);
    outcome
}

async fn finish(events: &mpsc::Sender<SessionEvent>, result: PhaseResult) {
    let _ = events.send(SessionEvent::PhaseComplete(result)).await;
}

async fn cancelled(cancel: &mut mpsc::Receiver<()>) {
    if cancel.recv().await.is_none() {
        std::future::pending::<()>().await;
    }
}
