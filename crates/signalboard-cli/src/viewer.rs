use std::io;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{BarChart, Block, Borders, Gauge, List, ListItem, Paragraph, Tabs, Wrap};
use ratatui::Terminal;
use signalboard_core::{
    compute_history_metrics, AlertLevel, AnalyticsView, ApiError, AppState, BackendApi,
    ChannelStatus, DashboardFrame, HistoryMetrics, IntersectionFilters, IntersectionRecord,
    LaneState, Monitor, MonitorHandle, Selection, SelectionStore, SignalPhase, SupabaseClient,
    View,
};
use tracing::warn;

const HISTORY_LIMIT: usize = 500;
const VIEWS: [View; 3] = [View::Realtime, View::Analysis, View::Intersections];

enum HistoryPanel {
    Pending,
    Unavailable(String),
    Ready(HistoryMetrics),
    Failed(String),
}

struct Theme {
    base: Style,
    muted: Color,
    accent: Color,
}

impl Theme {
    fn new(dark: bool) -> Self {
        if dark {
            Self {
                base: Style::default().fg(Color::White).bg(Color::Black),
                muted: Color::DarkGray,
                accent: Color::Cyan,
            }
        } else {
            Self {
                base: Style::default().fg(Color::Black).bg(Color::White),
                muted: Color::Gray,
                accent: Color::Blue,
            }
        }
    }

    fn block<'a>(&self, title: impl Into<Line<'a>>) -> Block<'a> {
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .style(self.base)
    }
}

struct ViewerState {
    history_client: Option<SupabaseClient>,
    threshold_cm: f64,
    history: HistoryPanel,
    intersections: Vec<IntersectionRecord>,
    intersections_error: Option<String>,
    cursor: usize,
}

impl ViewerState {
    fn new(history: Result<SupabaseClient, ApiError>, threshold_cm: f64) -> Self {
        let (history_client, panel) = match history {
            Ok(client) => (Some(client), HistoryPanel::Pending),
            Err(err) => (None, HistoryPanel::Unavailable(err.to_string())),
        };
        Self {
            history_client,
            threshold_cm,
            history: panel,
            intersections: Vec::new(),
            intersections_error: None,
            cursor: 0,
        }
    }

    async fn reload_history(&mut self) {
        let Some(client) = &self.history_client else {
            return;
        };
        self.history = match client.fetch_traffic_events(HISTORY_LIMIT).await {
            Ok(rows) => HistoryPanel::Ready(compute_history_metrics(
                &rows,
                Utc::now().timestamp_millis(),
                self.threshold_cm,
            )),
            Err(err) => {
                warn!(error=%err, "history fetch failed");
                HistoryPanel::Failed(err.to_string())
            }
        };
    }

    async fn reload_intersections(&mut self, backend: &impl BackendApi) {
        match backend.list_intersections(&IntersectionFilters::default()).await {
            Ok(list) => {
                self.intersections = list.intersections;
                self.intersections_error = None;
                self.cursor = self.cursor.min(self.intersections.len().saturating_sub(1));
            }
            Err(err) => {
                warn!(error=%err, "intersection list failed");
                self.intersections_error = Some(err.to_string());
            }
        }
    }

    async fn reload_for(&mut self, view: View, backend: &impl BackendApi) {
        match view {
            View::Analysis => self.reload_history().await,
            View::Intersections => self.reload_intersections(backend).await,
            View::Realtime => {}
        }
    }
}

pub async fn run_viewer<B: BackendApi + 'static>(
    monitor: &Monitor<B>,
    history: Result<SupabaseClient, ApiError>,
    threshold_cm: f64,
    selections: SelectionStore,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let app = monitor.state().clone();
    app.apply_preferences(selections.load_preferences());
    let handle = monitor.start();
    let mut viewer = ViewerState::new(history, threshold_cm);

    let run_result = async {
        loop {
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Tab => {
                            let next = next_view(app.view());
                            app.set_view(next);
                            viewer.reload_for(next, monitor.backend()).await;
                        }
                        KeyCode::Char('r') => {
                            handle.refresh();
                            viewer.reload_for(app.view(), monitor.backend()).await;
                        }
                        KeyCode::Char('d') => {
                            app.toggle_dark_mode();
                            save_preferences(&app, &selections);
                        }
                        KeyCode::Char('a') => {
                            app.set_auto_refresh(!app.auto_refresh());
                            save_preferences(&app, &selections);
                        }
                        KeyCode::Up if app.view() == View::Intersections => {
                            viewer.cursor = viewer.cursor.saturating_sub(1);
                        }
                        KeyCode::Down if app.view() == View::Intersections => {
                            if viewer.cursor + 1 < viewer.intersections.len() {
                                viewer.cursor += 1;
                            }
                        }
                        KeyCode::Enter if app.view() == View::Intersections => {
                            if let Some(record) = viewer.intersections.get(viewer.cursor) {
                                let selection = Selection::new(record.id.clone(), record.name.clone());
                                if let Err(err) = selections.save(&selection) {
                                    warn!(error=%err, "could not persist selection");
                                }
                                app.select(selection);
                                app.set_view(View::Realtime);
                            }
                        }
                        _ => {}
                    }
                }
            }

            let frame_data = handle.frame(Utc::now().timestamp_millis());
            terminal.draw(|frame| draw_ui(frame, &app, &handle, &frame_data, &viewer))?;
        }

        Ok::<(), anyhow::Error>(())
    }
    .await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    handle.shutdown().await;

    run_result
}

fn save_preferences(app: &AppState, selections: &SelectionStore) {
    if let Err(err) = selections.save_preferences(&app.preferences()) {
        warn!(error=%err, "could not persist preferences");
    }
}

fn next_view(current: View) -> View {
    let idx = VIEWS.iter().position(|v| *v == current).unwrap_or(0);
    VIEWS[(idx + 1) % VIEWS.len()]
}

fn draw_ui(
    frame: &mut ratatui::Frame<'_>,
    app: &AppState,
    handle: &MonitorHandle,
    data: &DashboardFrame,
    viewer: &ViewerState,
) {
    let theme = Theme::new(app.dark_mode());
    let area = frame.size();
    frame.render_widget(Block::default().style(theme.base), area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    frame.render_widget(render_header(data, app, &theme), rows[0]);

    let selected = VIEWS.iter().position(|v| *v == app.view()).unwrap_or(0);
    let tabs = Tabs::new(vec!["Realtime", "Analysis", "Intersections"])
        .block(theme.block("View"))
        .select(selected)
        .highlight_style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD));
    frame.render_widget(tabs, rows[1]);

    match app.view() {
        View::Realtime => draw_realtime(frame, rows[2], data, &theme),
        View::Analysis => draw_analysis(frame, rows[2], handle, viewer, &theme),
        View::Intersections => draw_intersections(frame, rows[2], data, viewer, &theme),
    }

    let help = Paragraph::new(Line::from(Span::styled(
        " q quit  tab switch view  r refresh  d dark mode  a auto-refresh  ↑↓ enter select",
        Style::default().fg(theme.muted),
    )));
    frame.render_widget(help, rows[3]);
}

fn render_header(data: &DashboardFrame, app: &AppState, theme: &Theme) -> Paragraph<'static> {
    let updated = match data.last_updated_ms {
        Some(ms) => format!(
            "updated {:.0}s ago",
            seconds_since(Utc::now().timestamp_millis(), ms)
        ),
        None => "waiting first snapshot...".to_string(),
    };
    let stream = if data.connected { "stream on" } else { "stream off" };
    let auto = if app.auto_refresh() { "auto-refresh" } else { "paused" };

    let line = Line::from(vec![
        Span::styled(
            "Signalboard  ",
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("{} [{}]  {updated}  {stream}  {auto}", data.intersection_name, data.key)),
    ]);

    Paragraph::new(line).block(theme.block("Status"))
}

fn seconds_since(now_ms: i64, since_ms: i64) -> f64 {
    now_ms.saturating_sub(since_ms) as f64 / 1000.0
}

fn phase_color(phase: SignalPhase) -> Color {
    match phase {
        SignalPhase::Green => Color::Green,
        SignalPhase::Yellow => Color::Yellow,
        SignalPhase::Red => Color::Red,
        SignalPhase::RedYellow => Color::LightRed,
    }
}

fn level_color(level: AlertLevel) -> Color {
    match level {
        AlertLevel::Info => Color::Blue,
        AlertLevel::Warning => Color::Yellow,
        AlertLevel::Critical => Color::Red,
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn draw_realtime(frame: &mut ratatui::Frame<'_>, area: Rect, data: &DashboardFrame, theme: &Theme) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(9), Constraint::Min(0)])
        .split(area);

    match &data.snapshot {
        Some(snapshot) if !snapshot.lanes.is_empty() => {
            let n = snapshot.lanes.len() as u32;
            let cols = Layout::default()
                .direction(Direction::Horizontal)
                .constraints(vec![Constraint::Ratio(1, n); snapshot.lanes.len()])
                .split(rows[0]);
            for (lane, col) in snapshot.lanes.iter().zip(cols.iter().copied()) {
                frame.render_widget(lane_card(lane, theme), col);
            }
        }
        _ => {
            let empty = Paragraph::new("No lane data yet").block(theme.block("Lanes"));
            frame.render_widget(empty, rows[0]);
        }
    }

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[1]);

    let mut health = Vec::new();
    if let Some(snapshot) = &data.snapshot {
        let flag = |v: Option<bool>| match v {
            Some(true) => "up",
            Some(false) => "down",
            None => "unknown",
        };
        health.push(Line::from(format!("database:   {}", flag(snapshot.database_connected))));
        health.push(Line::from(format!("controller: {}", flag(snapshot.esp32_connected))));
        let max_red = snapshot.config.max_red_ms_or_zero();
        if max_red > 0 {
            health.push(Line::from(format!("max red:    {:.0}s", max_red as f64 / 1000.0)));
        }
        health.push(Line::from(""));
        let queue = if snapshot.queue.is_empty() {
            "empty".to_string()
        } else {
            snapshot.queue.join(" → ")
        };
        health.push(Line::from(format!("queue:      {queue}")));
    }
    if let Some(err) = &data.pull_error {
        health.push(Line::from(Span::styled(
            format!("pull error: {err}"),
            Style::default().fg(Color::Red),
        )));
    }
    frame.render_widget(
        Paragraph::new(health)
            .wrap(Wrap { trim: true })
            .block(theme.block("Health")),
        bottom[0],
    );

    let alerts: Vec<ListItem> = data
        .alerts
        .iter()
        .map(|alert| {
            let mut spans = vec![Span::styled(
                format!("{:<9}", format!("{:?}", alert.level)),
                Style::default()
                    .fg(level_color(alert.level))
                    .add_modifier(Modifier::BOLD),
            )];
            spans.push(Span::raw(alert.title.clone()));
            if let Some(description) = &alert.description {
                spans.push(Span::styled(format!("  {description}"), Style::default().fg(theme.muted)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();
    let title = format!("Alerts ({})", data.alerts.len());
    frame.render_widget(List::new(alerts).block(theme.block(title)), bottom[1]);
}

fn lane_card(lane: &LaneState, theme: &Theme) -> Paragraph<'static> {
    let color = phase_color(lane.state);
    let mut lines = vec![
        Line::from(Span::styled(
            lane.state.label().to_uppercase(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )),
        Line::from(format!("occupied: {}", yes_no(lane.is_occupied))),
        Line::from(format!("waiting:  {}", yes_no(lane.waiting))),
        Line::from(format!(
            "distance: {}",
            lane.last_distance_cm
                .map(|cm| format!("{cm:.1} cm"))
                .unwrap_or_else(|| "n/a".to_string())
        )),
        Line::from(format!("cycles:   {}", lane.cycles_completed)),
    ];
    if let Some(red_since) = lane.red_since.filter(|_| lane.state.shows_red()) {
        let secs = seconds_since(Utc::now().timestamp_millis(), red_since);
        lines.push(Line::from(format!("red for:  {secs:.0}s")));
    }

    Paragraph::new(lines).block(
        theme
            .block(lane.id.clone())
            .border_style(Style::default().fg(color)),
    )
}

fn draw_analysis(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    handle: &MonitorHandle,
    viewer: &ViewerState,
    theme: &Theme,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[0]);
    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(35),
            Constraint::Percentage(30),
            Constraint::Percentage(35),
        ])
        .split(rows[1]);

    match handle.analytics() {
        Some(view) => {
            draw_transitions(frame, top[0], &view, theme);
            draw_wait_histogram(frame, top[1], &view, theme);
            draw_durations(frame, bottom[0], &view, theme);
            draw_green_share(frame, bottom[1], &view, theme);
        }
        None => {
            let message = match handle.analytics_status() {
                ChannelStatus::Failed { message, .. } => format!("Analytics unavailable: {message}"),
                _ => "Waiting for analytics...".to_string(),
            };
            frame.render_widget(
                Paragraph::new(message)
                    .wrap(Wrap { trim: true })
                    .block(theme.block("Analytics")),
                rows[0],
            );
        }
    }

    draw_history(frame, bottom[2], viewer, theme);
}

fn draw_transitions(frame: &mut ratatui::Frame<'_>, area: Rect, view: &AnalyticsView, theme: &Theme) {
    let bars: Vec<(&str, u64)> = view
        .transitions
        .iter()
        .map(|t| (t.lane_key.as_str(), t.changes))
        .collect();
    let title = format!(
        "Changes to green (total {}, {} events)",
        view.total_transitions, view.events_analyzed
    );
    let chart = BarChart::default()
        .block(theme.block(title))
        .bar_width(7)
        .bar_gap(2)
        .bar_style(Style::default().fg(Color::Green))
        .value_style(Style::default().fg(Color::Black).bg(Color::Green))
        .data(bars.as_slice());
    frame.render_widget(chart, area);
}

fn draw_wait_histogram(frame: &mut ratatui::Frame<'_>, area: Rect, view: &AnalyticsView, theme: &Theme) {
    let bars: Vec<(&str, u64)> = view.wait_histogram.iter().map(|row| (row.bucket, row.total())).collect();
    let chart = BarChart::default()
        .block(theme.block("Wait time (s)"))
        .bar_width(7)
        .bar_gap(1)
        .bar_style(Style::default().fg(theme.accent))
        .data(bars.as_slice());
    frame.render_widget(chart, area);
}

fn draw_durations(frame: &mut ratatui::Frame<'_>, area: Rect, view: &AnalyticsView, theme: &Theme) {
    let mut lines: Vec<Line> = view
        .durations
        .iter()
        .map(|row| {
            Line::from(vec![
                Span::raw(format!("{:<8}", row.lane_key)),
                Span::styled(format!("green {:>6.1}s ", row.green_seconds), Style::default().fg(Color::Green)),
                Span::styled(format!("red {:>6.1}s", row.red_seconds), Style::default().fg(Color::Red)),
            ])
        })
        .collect();

    if let Some(last) = view.green_trend.last() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!(
                "trend {}: avg green {:.1}s ({} samples)",
                last.label, last.avg_green_seconds, last.sample_count
            ),
            Style::default().fg(theme.muted),
        )));
    }

    frame.render_widget(Paragraph::new(lines).block(theme.block("Average phase duration")), area);
}

fn draw_green_share(frame: &mut ratatui::Frame<'_>, area: Rect, view: &AnalyticsView, theme: &Theme) {
    let block = theme.block("Green share");
    let inner = block.inner(area);
    frame.render_widget(block, area);
    if view.green_share.is_empty() {
        return;
    }

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Length(2); view.green_share.len()])
        .split(inner);
    for (row, slot) in view.green_share.iter().zip(rows.iter().copied()) {
        // Gauge rejects ratios outside 0..=1.
        let ratio = if row.green_ratio.is_finite() {
            row.green_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(Color::Green).bg(Color::Red))
            .label(format!("{} {:.0}%", row.lane_key, row.green_ratio * 100.0))
            .ratio(ratio);
        frame.render_widget(gauge, slot);
    }
}

fn draw_history(frame: &mut ratatui::Frame<'_>, area: Rect, viewer: &ViewerState, theme: &Theme) {
    let lines = match &viewer.history {
        HistoryPanel::Unavailable(reason) => vec![
            Line::from(Span::styled(
                "History unavailable",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )),
            Line::from(reason.clone()),
            Line::from(Span::styled(
                "set SIGNALBOARD_SUPABASE_URL and SIGNALBOARD_SUPABASE_ANON_KEY",
                Style::default().fg(theme.muted),
            )),
        ],
        HistoryPanel::Pending => vec![Line::from(Span::styled(
            "history loads when this tab opens",
            Style::default().fg(theme.muted),
        ))],
        HistoryPanel::Failed(message) => vec![Line::from(Span::styled(
            format!("history: {message} (press r)"),
            Style::default().fg(theme.muted),
        ))],
        HistoryPanel::Ready(metrics) => {
            let mut lines = vec![
                Line::from(format!("events:    {}", metrics.total_events)),
                Line::from(format!("last hour: {}", metrics.events_last_hour)),
                Line::from(format!("devices:   {}", metrics.unique_devices)),
            ];
            lines.extend(
                metrics
                    .detections_by_lane
                    .iter()
                    .map(|d| Line::from(format!("  {:<6} {}", d.lane, d.count))),
            );
            lines
        }
    };

    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(theme.block("Controller history")),
        area,
    );
}

fn draw_intersections(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    data: &DashboardFrame,
    viewer: &ViewerState,
    theme: &Theme,
) {
    let mut items: Vec<ListItem> = viewer
        .intersections
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            let current = data.key.as_str() == record.id;
            let marker = if current { "● " } else { "  " };
            let mut style = Style::default();
            if idx == viewer.cursor {
                style = style.fg(theme.accent).add_modifier(Modifier::REVERSED);
            }
            ListItem::new(Line::from(format!(
                "{marker}{:<28} {:<12} {}",
                record.name,
                record.status,
                record.last_seen.as_deref().unwrap_or("never seen")
            )))
            .style(style)
        })
        .collect();

    if let Some(err) = &viewer.intersections_error {
        items.push(ListItem::new(Line::from(Span::styled(
            format!("list failed: {err}"),
            Style::default().fg(Color::Red),
        ))));
    } else if items.is_empty() {
        items.push(ListItem::new("No intersections (press r to load)"));
    }

    frame.render_widget(List::new(items).block(theme.block("Intersections")), area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_seconds_saturate_on_hostile_timestamps() {
        assert_eq!(seconds_since(12_500, 10_000), 2.5);
        assert_eq!(seconds_since(i64::MAX, i64::MIN), i64::MAX as f64 / 1000.0);
        assert_eq!(seconds_since(i64::MIN, i64::MAX), i64::MIN as f64 / 1000.0);
    }
}
