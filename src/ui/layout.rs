use crate::app::{App, AppView, Panel};
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph, Wrap},
    Frame,
};
use speedflux::analysis::{stats, ScenarioReport, Verdict};
use speedflux::settings::{SettingsField, TestMode};
use speedflux::speedtest::{SessionReport, SessionState, TestPhase};

// Color Palette - Elegant & Minimal
const ACCENT: Color = Color::Rgb(100, 149, 237);      // Cornflower blue
const SUCCESS: Color = Color::Rgb(134, 194, 156);     // Soft green
const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
const INFO: Color = Color::Rgb(147, 180, 220);        // Soft blue
const INFO_DIM: Color = Color::Rgb(90, 110, 140);
const WARN: Color = Color::Rgb(220, 180, 130);        // Soft amber
const ERROR: Color = Color::Rgb(220, 120, 120);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

const SEPARATOR: &str = "  ·  ";

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let area = frame.area();

    match app.view {
        AppView::Main => {
            if app.expanded {
                draw_expanded_view(frame, area, app);
            } else {
                draw_normal_view(frame, area, app);
            }
        }
        AppView::Settings => {
            draw_settings_view(frame, area, app);
        }
    }
}

fn draw_normal_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(7),
        Constraint::Length(1),
    ])
    .split(area);

    draw_header(frame, chunks[0], app);

    let panels = Layout::horizontal([
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
    ])
    .split(chunks[1]);

    draw_download_panel(frame, panels[0], app, app.selected_panel == Panel::Download);
    draw_upload_panel(frame, panels[1], app, app.selected_panel == Panel::Upload);
    draw_ping_panel(frame, panels[2], app, app.selected_panel == Panel::Ping);
    draw_results_panel(frame, chunks[2], app, app.selected_panel == Panel::Results, false);

    draw_help(frame, chunks[3], app);
}

fn draw_expanded_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(1),
    ])
    .split(area);

    draw_header(frame, chunks[0], app);

    match app.selected_panel {
        Panel::Download => draw_download_expanded(frame, chunks[1], app),
        Panel::Upload => draw_upload_expanded(frame, chunks[1], app),
        Panel::Ping => draw_ping_expanded(frame, chunks[1], app),
        Panel::Results => draw_results_panel(frame, chunks[1], app, true, true),
    }

    draw_help(frame, chunks[2], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::horizontal([
        Constraint::Length(12),
        Constraint::Min(10),
        Constraint::Length(20),
    ])
    .split(inner);

    let title = Paragraph::new("speedflux")
        .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD));
    frame.render_widget(title, chunks[0]);

    let (status, color) = match (app.state, &app.error) {
        (SessionState::Idle, Some(error)) => (error.as_str(), ERROR),
        (SessionState::Idle, None) => ("Ready", TEXT_MUTED),
        (SessionState::Running(TestPhase::Ping), _) => ("Measuring latency...", WARN),
        (SessionState::Running(TestPhase::Download), _) => ("Testing download...", SUCCESS),
        (SessionState::Running(TestPhase::Upload), _) => ("Testing upload...", INFO),
        (SessionState::Complete, _) => ("Complete", ACCENT),
    };

    let status_text = Paragraph::new(status)
        .style(Style::default().fg(color))
        .alignment(Alignment::Center);
    frame.render_widget(status_text, chunks[1]);

    frame.render_widget(
        Paragraph::new(create_phase_text(app.state)).alignment(Alignment::Right),
        chunks[2],
    );
}

fn create_phase_text(state: SessionState) -> Line<'static> {
    let phases = [
        (TestPhase::Ping, "ping"),
        (TestPhase::Download, "down"),
        (TestPhase::Upload, "up"),
    ];

    let mut spans = Vec::new();

    for (i, (p, label)) in phases.iter().enumerate() {
        let is_active = state == SessionState::Running(*p);
        let is_complete = match state {
            SessionState::Running(TestPhase::Download) => *p == TestPhase::Ping,
            SessionState::Running(TestPhase::Upload) => *p != TestPhase::Upload,
            SessionState::Complete => true,
            _ => false,
        };

        let style = if is_active {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if is_complete {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };

        spans.push(Span::styled(*label, style));

        if i < phases.len() - 1 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
    }

    Line::from(spans)
}

fn panel_block(title: &str, color: Color, selected: bool) -> Block<'static> {
    let border_color = if selected { BORDER_ACTIVE } else { BORDER };
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(Span::styled(
            format!(" {} ", title),
            Style::default().fg(if selected { color } else { TEXT_SECONDARY }),
        ))
}

// Panels
fn draw_download_panel(frame: &mut Frame, area: Rect, app: &App, selected: bool) {
    draw_metric_panel(
        frame,
        area,
        MetricView {
            title: "Download",
            color: SUCCESS,
            dim_color: SUCCESS_DIM,
            speed: current_speed(app.result.download_mbps, &app.download_samples),
            progress: app.download_progress,
            samples: &app.download_samples,
        },
        selected,
    );
}

fn draw_upload_panel(frame: &mut Frame, area: Rect, app: &App, selected: bool) {
    draw_metric_panel(
        frame,
        area,
        MetricView {
            title: "Upload",
            color: INFO,
            dim_color: INFO_DIM,
            speed: current_speed(app.result.upload_mbps, &app.upload_samples),
            progress: app.upload_progress,
            samples: &app.upload_samples,
        },
        selected,
    );
}

fn draw_ping_panel(frame: &mut Frame, area: Rect, app: &App, selected: bool) {
    let block = panel_block("Latency", WARN, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(0),
    ])
    .split(inner);

    let value = if app.result.ping_ms > 0.0 {
        format!("{:.0} ms", app.result.ping_ms)
    } else {
        "—".to_string()
    };
    frame.render_widget(
        Paragraph::new(value)
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    let jitter = if app.result.jitter_ms > 0.0 {
        format!("jitter {:.1} ms", app.result.jitter_ms)
    } else {
        "jitter —".to_string()
    };
    frame.render_widget(
        Paragraph::new(jitter)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[1],
    );

    // Probes are timed by the server, so only liveness is known until the result.
    let probes = match app.report.as_ref().and_then(|r| r.ping.packet_loss) {
        Some(loss) => format!("loss {:.1}%", loss),
        None if app.probes_answered > 0 => format!("{} probes answered", app.probes_answered),
        None => String::new(),
    };
    frame.render_widget(
        Paragraph::new(probes)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

struct MetricView<'a> {
    title: &'a str,
    color: Color,
    dim_color: Color,
    speed: f64,
    progress: f64,
    samples: &'a [f64],
}

fn draw_metric_panel(frame: &mut Frame, area: Rect, view: MetricView, selected: bool) {
    let block = panel_block(view.title, view.color, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    frame.render_widget(
        Paragraph::new(format_speed(view.speed))
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    draw_progress_bar(frame, chunks[1], view.progress, view.color, view.dim_color);

    if !view.samples.is_empty() {
        draw_sparkline(frame, chunks[2], view.samples, view.color);
    }
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim_color: Color) {
    if area.width < 4 {
        return;
    }

    let width = (area.width - 2) as usize;
    let filled = ((ratio * width as f64) as usize).min(width);
    let empty = width.saturating_sub(filled);

    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(empty), Style::default().fg(dim_color)),
        Span::raw(" "),
    ]);

    frame.render_widget(Paragraph::new(bar), area);
}

fn draw_sparkline(frame: &mut Frame, area: Rect, data: &[f64], color: Color) {
    if data.is_empty() || area.width < 4 || area.height < 2 {
        return;
    }

    let (min_val, max_val) = (stats::min(data), stats::max(data));
    let range = (max_val - min_val).max(1.0);

    let points = indexed(data);
    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);

    let chart = Chart::new(vec![dataset])
        .x_axis(Axis::default().bounds([0.0, data.len() as f64]))
        .y_axis(Axis::default().bounds([min_val - range * 0.1, max_val + range * 0.1]));

    frame.render_widget(chart, area);
}

// Expanded views
fn draw_download_expanded(frame: &mut Frame, area: Rect, app: &App) {
    draw_expanded_metric(
        frame,
        area,
        MetricView {
            title: "Download",
            color: SUCCESS,
            dim_color: SUCCESS_DIM,
            speed: current_speed(app.result.download_mbps, &app.download_samples),
            progress: app.download_progress,
            samples: &app.download_samples,
        },
    );
}

fn draw_upload_expanded(frame: &mut Frame, area: Rect, app: &App) {
    draw_expanded_metric(
        frame,
        area,
        MetricView {
            title: "Upload",
            color: INFO,
            dim_color: INFO_DIM,
            speed: current_speed(app.result.upload_mbps, &app.upload_samples),
            progress: app.upload_progress,
            samples: &app.upload_samples,
        },
    );
}

fn draw_ping_expanded(frame: &mut Frame, area: Rect, app: &App) {
    let block = panel_block("Latency", WARN, true);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let muted = Style::default().fg(TEXT_MUTED);
    let mut spans = vec![Span::styled(
        format!("{:.0} ms", app.result.ping_ms),
        Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
    )];
    spans.push(Span::styled(SEPARATOR, muted));
    spans.push(Span::styled(
        format!("jitter {:.1} ms", app.result.jitter_ms),
        Style::default().fg(TEXT_SECONDARY),
    ));

    if let Some(ping) = app.report.as_ref().map(|r| &r.ping) {
        spans.push(Span::styled(SEPARATOR, muted));
        spans.push(Span::styled(format!("{} packets", ping.packets), muted));
        if let Some(loss) = ping.packet_loss {
            spans.push(Span::styled(SEPARATOR, muted));
            spans.push(Span::styled(format!("loss {:.1}%", loss), muted));
        }
        if let (Some(min), Some(max)) = (ping.min_latency, ping.max_latency) {
            spans.push(Span::styled(SEPARATOR, muted));
            spans.push(Span::styled(format!("min {:.0} · max {:.0}", min, max), muted));
        }
    } else if app.probes_answered > 0 {
        spans.push(Span::styled(SEPARATOR, muted));
        spans.push(Span::styled(format!("{} probes answered", app.probes_answered), muted));
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).alignment(Alignment::Center),
        inner,
    );
}

fn draw_expanded_metric(frame: &mut Frame, area: Rect, view: MetricView) {
    let block = panel_block(view.title, view.color, true);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(4),
    ])
    .split(inner);

    let summary = stats::summarize(view.samples);
    let muted = Style::default().fg(TEXT_MUTED);
    let line = Line::from(vec![
        Span::styled(
            format_speed(view.speed),
            Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
        ),
        Span::styled(SEPARATOR, muted),
        Span::styled(format!("median {}", format_speed(summary.median)), muted),
        Span::styled(SEPARATOR, muted),
        Span::styled(format!("max {}", format_speed(summary.max)), muted),
        Span::styled(SEPARATOR, muted),
        Span::styled(format!("min {}", format_speed(summary.min)), muted),
    ]);
    frame.render_widget(Paragraph::new(line).alignment(Alignment::Center), chunks[0]);

    draw_progress_bar(frame, chunks[1], view.progress, view.color, view.dim_color);

    draw_detailed_chart(frame, chunks[2], view.samples, view.color, "Mbps");
}

fn draw_detailed_chart(frame: &mut Frame, area: Rect, data: &[f64], color: Color, unit: &str) {
    if data.is_empty() || area.width < 10 || area.height < 3 {
        return;
    }

    let smoothed = stats::smooth(data);
    let (min_val, max_val) = (stats::min(data), stats::max(data));
    let range = (max_val - min_val).max(0.1);
    let y_min = (min_val - range * 0.1).max(0.0);
    let y_max = max_val + range * 0.1;

    let raw = indexed(data);
    let trend = indexed(&smoothed);
    let avg = stats::mean(data);
    let avg_line: Vec<(f64, f64)> = vec![(0.0, avg), (data.len() as f64, avg)];

    let datasets = vec![
        Dataset::default()
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(TEXT_MUTED))
            .data(&raw),
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(color))
            .data(&trend),
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(TEXT_MUTED))
            .data(&avg_line),
    ];

    let y_labels = vec![
        Span::styled(format!("{:.0}", y_min), Style::default().fg(TEXT_MUTED)),
        Span::styled(format!("{:.0} {}", y_max, unit), Style::default().fg(TEXT_MUTED)),
    ];

    let chart = Chart::new(datasets)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(BORDER))
                .bounds([0.0, data.len() as f64]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(BORDER))
                .bounds([y_min, y_max])
                .labels(y_labels),
        );

    frame.render_widget(chart, area);
}

// Results
fn draw_results_panel(frame: &mut Frame, area: Rect, app: &App, selected: bool, detailed: bool) {
    let block = panel_block("Results", ACCENT, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(report) = app.report.as_ref() else {
        let hint = if app.is_running() {
            "Scores appear when all phases finish"
        } else {
            "Run a test to see connection quality"
        };
        frame.render_widget(
            Paragraph::new(hint)
                .style(Style::default().fg(TEXT_MUTED))
                .alignment(Alignment::Center),
            inner,
        );
        return;
    };

    let lines = results_lines(report, app.settings.mode, detailed);
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), inner);
}

fn results_lines(report: &SessionReport, mode: TestMode, detailed: bool) -> Vec<Line<'static>> {
    let quality = &report.quality;
    let score_color = if quality.is_stable { SUCCESS } else { WARN };
    let mut lines = vec![Line::from(vec![
        Span::styled(" Stability ", Style::default().fg(TEXT_SECONDARY)),
        Span::styled(
            format!("{}/100", quality.stability_score),
            Style::default().fg(score_color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(SEPARATOR, Style::default().fg(TEXT_MUTED)),
        Span::styled(
            if quality.is_stable { "stable" } else { "unstable" },
            Style::default().fg(score_color),
        ),
    ])];

    let verdicts = ordered_verdicts(&report.scenarios, mode);
    for (i, verdict) in verdicts.iter().enumerate() {
        let highlighted = i == 0 && mode != TestMode::Standard;
        lines.push(verdict_line(*verdict, highlighted));
    }

    if detailed {
        lines.push(Line::raw(""));
        let advice = quality
            .recommendations
            .iter()
            .chain(verdicts.iter().flat_map(|v| v.recommendations()));
        let mut seen = Vec::new();
        for text in advice {
            if !seen.contains(&text) {
                seen.push(text);
                lines.push(Line::styled(
                    format!(" • {}", text),
                    Style::default().fg(TEXT_SECONDARY),
                ));
            }
        }
    }

    lines
}

/// Puts the scenario picked with `--mode` first.
fn ordered_verdicts(scenarios: &ScenarioReport, mode: TestMode) -> Vec<&dyn Verdict> {
    let mut verdicts = scenarios.verdicts().to_vec();
    let first = match mode {
        TestMode::Standard | TestMode::Streaming => 0,
        TestMode::Gaming => 1,
        TestMode::VideoCall => 2,
    };
    verdicts.rotate_left(first);
    verdicts
}

fn verdict_line(verdict: &dyn Verdict, highlighted: bool) -> Line<'static> {
    let (mark, mark_color) = if verdict.suitable() {
        ("✓", SUCCESS)
    } else {
        ("✗", ERROR)
    };
    let title_style = if highlighted {
        Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(TEXT_PRIMARY)
    };

    Line::from(vec![
        Span::styled(format!(" {} ", mark), Style::default().fg(mark_color)),
        Span::styled(format!("{:<12}", verdict.title()), title_style),
        Span::styled(
            format!("{:>3} ", verdict.overall_score()),
            Style::default().fg(TEXT_SECONDARY),
        ),
        Span::styled(verdict.message().to_string(), Style::default().fg(TEXT_MUTED)),
    ])
}

// Settings
fn draw_settings_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .split(area);

    let header_block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let header_inner = header_block.inner(chunks[0]);
    frame.render_widget(header_block, chunks[0]);

    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(
                "Settings",
                Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
            ),
            Span::styled(SEPARATOR, Style::default().fg(TEXT_MUTED)),
            Span::styled(app.settings.server_url.clone(), Style::default().fg(TEXT_MUTED)),
        ])),
        header_inner,
    );

    let content_area = Layout::horizontal([
        Constraint::Length(2),
        Constraint::Min(30),
        Constraint::Length(2),
    ])
    .split(chunks[1])[1];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(content_area);
    frame.render_widget(block, content_area);

    let mut constraints: Vec<Constraint> =
        SettingsField::ALL.iter().map(|_| Constraint::Length(3)).collect();
    constraints.push(Constraint::Min(0));
    let rows = Layout::vertical(constraints).split(inner);

    for (row, field) in rows.iter().zip(SettingsField::ALL) {
        draw_setting_row(
            frame,
            *row,
            field.label(),
            &field.value(&app.settings),
            app.selected_setting == field,
        );
    }

    let help = "↑↓ select · ←→ adjust · enter done";
    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_setting_row(frame: &mut Frame, area: Rect, label: &str, value: &str, selected: bool) {
    let chunks = Layout::horizontal([
        Constraint::Length(18),
        Constraint::Min(10),
    ])
    .split(area);

    let label_style = if selected {
        Style::default().fg(ACCENT)
    } else {
        Style::default().fg(TEXT_SECONDARY)
    };

    frame.render_widget(
        Paragraph::new(format!(" {}", label)).style(label_style),
        chunks[0],
    );

    let value_text = if selected {
        format!("< {} >", value)
    } else {
        value.to_string()
    };

    let value_style = if selected {
        Style::default().fg(TEXT_PRIMARY)
    } else {
        Style::default().fg(TEXT_MUTED)
    };

    frame.render_widget(Paragraph::new(value_text).style(value_style), chunks[1]);
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    let help = if app.expanded {
        "esc close · q quit"
    } else if app.is_running() {
        "tab select · space expand · esc cancel · q quit"
    } else {
        "enter start · s settings · tab select · space expand · q quit"
    };

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

// Helpers
fn current_speed(final_mbps: f64, samples: &[f64]) -> f64 {
    if final_mbps > 0.0 {
        final_mbps
    } else {
        samples.last().copied().unwrap_or(0.0)
    }
}

fn indexed(data: &[f64]) -> Vec<(f64, f64)> {
    data.iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect()
}

fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 1.0 {
        format!("{:.1} Mbps", mbps)
    } else if mbps > 0.0 {
        format!("{:.0} Kbps", mbps * 1000.0)
    } else {
        "—".to_string()
    }
}
