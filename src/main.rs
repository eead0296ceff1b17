mod app;
mod ui;

use anyhow::{Context, Result};
use app::{poll_event, run_speed_test, App, AppAction};
use clap::Parser;
use crossterm::event::Event;
use ratatui::DefaultTerminal;
use speedflux::settings::{Settings, TestMode, DEFAULT_SERVER};
use speedflux::speedtest::SessionEvent;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use ui::draw_ui;

#[derive(Parser, Debug)]
#[command(name = "speedflux", version, about = "Measure latency, download and upload speed")]
struct Cli {
    /// Base WebSocket URL of the speed test server
    #[arg(long, env = "SPEEDFLUX_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Ceiling for reported speeds and the upload send rate, in Mbps
    #[arg(long, default_value_t = 1000)]
    max_speed: u32,

    /// Length of the upload phase in seconds
    #[arg(long, default_value_t = 10)]
    upload_secs: u64,

    /// Fail a phase when the server is silent for this many seconds
    #[arg(long, default_value_t = 15)]
    idle_timeout: u64,

    /// Scenario to highlight in the results
    #[arg(long, value_enum, default_value_t = TestMode::Standard)]
    mode: TestMode,

    /// Run once without the terminal UI and print the report as JSON
    #[arg(long)]
    json: bool,

    /// Write logs to this file while the terminal UI is running
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            server_url: self.server.trim_end_matches('/').to_string(),
            max_speed_mbps: self.max_speed,
            upload_secs: self.upload_secs,
            idle_timeout_secs: self.idle_timeout,
            mode: self.mode,
        }
        .clamped()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let settings = cli.settings();
    info!(server = %settings.server_url, mode = %settings.mode, "speedflux starting");

    if cli.json {
        return run_headless(settings).await;
    }

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, settings).await;

    ratatui::restore();
    result
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = std::env::var("SPEEDFLUX_LOG").unwrap_or_else(|_| "info".to_string());

    if cli.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else if let Some(path) = &cli.log_file {
        let file = File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

async fn run_headless(settings: Settings) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(32);
    let (cancel_tx, cancel_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(()).await;
        }
    });
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::Progress(p) => debug!(phase = %p.phase, value = p.value, "progress"),
                SessionEvent::PhaseComplete(result) => info!(phase = %result.phase(), "phase complete"),
                _ => {}
            }
        }
    });

    let report = run_speed_test(tx, cancel_rx, settings).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_app(terminal: &mut DefaultTerminal, settings: Settings) -> Result<()> {
    let mut app = App::new(settings);
    let mut test_rx: Option<mpsc::Receiver<SessionEvent>> = None;

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        // Drain session events
        if let Some(rx) = test_rx.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => app.handle_event(event),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        test_rx = None;
                        break;
                    }
                }
            }
        }

        // Handle input
        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => {
                        app.reset_for_new_test();

                        let (tx, rx) = mpsc::channel(64);
                        let (cancel_tx, cancel_rx) = mpsc::channel(1);

                        app.set_cancel_tx(cancel_tx);
                        test_rx = Some(rx);

                        let settings = app.settings.clone();
                        tokio::spawn(async move {
                            // Failures reach the UI as session events.
                            let _ = run_speed_test(tx, cancel_rx, settings).await;
                        });
                    }
                    AppAction::CancelTest => {
                        app.cancel_test();
                        test_rx = None;
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
