use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use speedflux::settings::{Settings, SettingsField};
use speedflux::speedtest::{
    PhaseResult, ProgressEvent, Session, SessionEvent, SessionReport, SessionState,
    SpeedTestResult, TestPhase, WsConnector,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Longest window the server streams download data for.
const DOWNLOAD_WINDOW: Duration = Duration::from_secs(10);
const MAX_CHART_SAMPLES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
    Results,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Results,
            Panel::Results => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Results,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
            Panel::Results => Panel::Ping,
        }
    }
}

pub struct App {
    pub state: SessionState,
    pub result: SpeedTestResult,
    pub report: Option<SessionReport>,
    pub error: Option<String>,
    pub should_quit: bool,

    // UI state
    pub view: AppView,
    pub selected_panel: Panel,
    pub expanded: bool,

    // Settings
    pub settings: Settings,
    pub selected_setting: SettingsField,

    // Progress tracking
    pub download_progress: f64,
    pub upload_progress: f64,
    pub probes_answered: u64,

    // Speed samples for charts
    pub download_samples: Vec<f64>,
    pub upload_samples: Vec<f64>,

    cancel_tx: Option<mpsc::Sender<()>>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self {
            state: SessionState::Idle,
            result: SpeedTestResult::default(),
            report: None,
            error: None,
            should_quit: false,
            view: AppView::Main,
            selected_panel: Panel::Download,
            expanded: false,
            settings,
            selected_setting: SettingsField::MaxSpeed,
            download_progress: 0.0,
            upload_progress: 0.0,
            probes_answered: 0,
            download_samples: Vec::new(),
            upload_samples: Vec::new(),
            cancel_tx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running(_))
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key),
            AppView::Settings => self.handle_settings_key(key),
        }
    }

    fn handle_main_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') => {
                if !self.is_running() {
                    self.view = AppView::Settings;
                }
                None
            }
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if !self.is_running() {
                    Some(AppAction::StartTest)
                } else {
                    self.expanded = true;
                    None
                }
            }
            KeyCode::Esc => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.is_running() {
                    Some(AppAction::CancelTest)
                } else {
                    None
                }
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    fn handle_settings_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => {
                self.view = AppView::Main;
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_setting = self.selected_setting.prev();
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_setting = self.selected_setting.next();
            }
            KeyCode::Left | KeyCode::Char('h') => self.settings.decrease(self.selected_setting),
            KeyCode::Right | KeyCode::Char('l') => self.settings.increase(self.selected_setting),
            _ => {}
        }
        None
    }

    pub fn reset_for_new_test(&mut self) {
        self.state = SessionState::Idle;
        self.result = SpeedTestResult::default();
        self.report = None;
        self.error = None;
        self.download_progress = 0.0;
        self.upload_progress = 0.0;
        self.probes_answered = 0;
        self.download_samples.clear();
        self.upload_samples.clear();
        self.expanded = false;
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PhaseStarted(phase) => {
                self.state = SessionState::Running(phase);
                if phase != TestPhase::Ping {
                    self.selected_panel = match phase {
                        TestPhase::Upload => Panel::Upload,
                        _ => Panel::Download,
                    };
                }
            }
            SessionEvent::Progress(progress) => self.update_progress(progress),
            SessionEvent::PhaseComplete(result) => self.complete_phase(result),
            SessionEvent::Finished(report) => {
                self.result = report.overview.clone();
                self.report = Some(*report);
                self.state = SessionState::Complete;
                self.selected_panel = Panel::Results;
                self.cancel_tx = None;
            }
            SessionEvent::Failed(message) => {
                self.error = Some(message);
                self.state = SessionState::Idle;
                self.cancel_tx = None;
            }
        }
    }

    fn update_progress(&mut self, progress: ProgressEvent) {
        let elapsed = progress.timestamp.unwrap_or_default();
        match progress.phase {
            TestPhase::Ping => self.probes_answered += 1,
            TestPhase::Download => {
                self.download_progress = ratio(elapsed, DOWNLOAD_WINDOW);
                push_sample(&mut self.download_samples, progress.value);
            }
            TestPhase::Upload => {
                let window = Duration::from_secs(self.settings.upload_secs);
                self.upload_progress = ratio(elapsed, window);
                push_sample(&mut self.upload_samples, progress.value);
            }
        }
    }

    fn complete_phase(&mut self, result: PhaseResult) {
        debug!(phase = %result.phase(), "phase finished");
        match result {
            PhaseResult::Ping(ping) => {
                self.result.ping_ms = ping.latency;
                self.result.jitter_ms = ping.jitter;
            }
            PhaseResult::Download(download) => {
                self.result.download_mbps = download.throughput;
                self.download_progress = 1.0;
            }
            PhaseResult::Upload(upload) => {
                self.result.upload_mbps = upload.throughput;
                self.upload_progress = 1.0;
            }
        }
    }

    pub fn set_cancel_tx(&mut self, tx: mpsc::Sender<()>) {
        self.cancel_tx = Some(tx);
    }

    pub fn cancel_test(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.try_send(());
        }
        self.state = SessionState::Idle;
    }
}

fn ratio(elapsed: Duration, window: Duration) -> f64 {
    if window.is_zero() {
        return 0.0;
    }
    (elapsed.as_secs_f64() / window.as_secs_f64()).min(1.0)
}

fn push_sample(samples: &mut Vec<f64>, value: f64) {
    samples.push(value);
    if samples.len() > MAX_CHART_SAMPLES {
        samples.remove(0);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
}

pub async fn run_speed_test(
    update_tx: mpsc::Sender<SessionEvent>,
    cancel_rx: mpsc::Receiver<()>,
    settings: Settings,
) -> Result<SessionReport> {
    let connector = WsConnector::new(settings.server_url.clone());
    let mut session = Session::new(connector, settings.session_config());
    Ok(session.run(update_tx, cancel_rx).await?)
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}
