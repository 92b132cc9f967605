// Terminal dashboard for a live session.

use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::{cursor, execute};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use log::{debug, error};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Sparkline};
use ratatui::{Frame, Terminal};

use tempctl::{ChannelSetpoint, Link, LinkMode, PollTimer, Result, Session, TickOutcome, CHANNEL_COUNT};

// Longest we block on keyboard input, so edits feel immediate.
const INPUT_POLL: Duration = Duration::from_millis(100);

struct UiState {
    selected: usize,
    status: String,
}

enum Action {
    Continue,
    Quit,
}

// Puts the terminal back on every exit path, including early `?` returns.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        let guard = TerminalGuard;
        execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            debug!("disable_raw_mode: {}", e);
        }
        if let Err(e) = execute!(io::stdout(), LeaveAlternateScreen, cursor::Show) {
            debug!("leave alternate screen: {}", e);
        }
    }
}

/// Takes over the terminal until the user quits.
pub fn run(session: &mut Session<Link>) -> Result<()> {
    let _guard = TerminalGuard::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    event_loop(&mut terminal, session)
}

fn event_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, session: &mut Session<Link>) -> Result<()> {
    let mut ui = UiState {
        selected: 0,
        status: match session.simulation_reason() {
            Some(reason) => format!("Simulation mode: {}", reason),
            None => "Waiting for telemetry...".into(),
        },
    };
    let mut timer = PollTimer::new(session.config().poll_interval(), Instant::now());

    loop {
        terminal.draw(|f| draw(f, session, &ui))?;

        let wait = timer.until_due(Instant::now()).min(INPUT_POLL);
        if event::poll(wait)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Action::Quit = handle_key(key, session, &mut ui) {
                        return Ok(());
                    }
                }
            }
        }

        if timer.fire(Instant::now()) {
            match session.tick() {
                Ok(TickOutcome::Updated(_)) => {
                    if session.mode() == LinkMode::Connected {
                        ui.status = format!("Updated after {} ticks", session.ticks());
                    }
                }
                Ok(TickOutcome::Skipped(failure)) => {
                    debug!("tick skipped: {}", failure);
                    if session.mode() == LinkMode::Connected {
                        ui.status = format!("Packet dropped: {}", failure);
                    }
                }
                Err(e) => ui.status = format!("Read failed: {}", e),
            }
            timer.complete(Instant::now());
        }
    }
}

fn handle_key(key: KeyEvent, session: &mut Session<Link>, ui: &mut UiState) -> Action {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Action::Quit,
        KeyCode::Tab => ui.selected = (ui.selected + 1) % CHANNEL_COUNT,
        KeyCode::Up => adjust(session, ui, |sp| sp.setpoint_c += 0.25),
        KeyCode::Down => adjust(session, ui, |sp| sp.setpoint_c -= 0.25),
        KeyCode::PageUp => adjust(session, ui, |sp| sp.setpoint_c += 5.0),
        KeyCode::PageDown => adjust(session, ui, |sp| sp.setpoint_c -= 5.0),
        KeyCode::Char('B') => adjust(session, ui, |sp| sp.band_c += 0.25),
        KeyCode::Char('b') => adjust(session, ui, |sp| sp.band_c -= 0.25),
        KeyCode::Char('I') => adjust(session, ui, |sp| sp.integral_time_s += 1.0),
        KeyCode::Char('i') => adjust(session, ui, |sp| sp.integral_time_s -= 1.0),
        KeyCode::Char('R') => adjust(session, ui, |sp| sp.rate_per_s += 0.01),
        KeyCode::Char('r') => adjust(session, ui, |sp| sp.rate_per_s -= 0.01),
        KeyCode::Char('s') => match session.send_parameters() {
            Ok(()) => ui.status = "Parameters resent".into(),
            Err(e) => ui.status = format!("Send failed: {}", e),
        },
        _ => {}
    }
    Action::Continue
}

fn adjust(session: &mut Session<Link>, ui: &mut UiState, edit: impl FnOnce(&mut ChannelSetpoint)) {
    let mut setpoint = session.setpoints()[ui.selected];
    edit(&mut setpoint);
    if let Err(e) = session.set_channel(ui.selected, setpoint) {
        error!("channel {} update failed: {}", ui.selected, e);
        ui.status = format!("Send failed: {}", e);
    }
}

fn draw(f: &mut Frame, session: &Session<Link>, ui: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(12), Constraint::Length(3)])
        .split(f.size());

    draw_header(f, rows[0], session);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[1]);
    for channel in 0..CHANNEL_COUNT {
        draw_channel(f, columns[channel], session, channel, channel == ui.selected);
    }

    let footer = Paragraph::new(vec![
        Line::from(ui.status.as_str()),
        Line::from(Span::styled(
            "Tab channel  Up/Down setpoint  PgUp/PgDn setpoint x20  b/B band  i/I integral  r/R rate  s resend  q quit",
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .block(Block::default().borders(Borders::TOP));
    f.render_widget(footer, rows[2]);
}

fn draw_header(f: &mut Frame, area: Rect, session: &Session<Link>) {
    let (mode_text, mode_color) = match session.mode() {
        LinkMode::Connected => ("CONNECTED", Color::Green),
        LinkMode::Simulation => ("SIMULATION", Color::Magenta),
    };

    let mut spans = vec![
        Span::styled(
            format!(" {} ", mode_text),
            Style::default().fg(Color::Black).bg(mode_color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "  {} @ {} baud  ticks {}  dropped {}",
            session.port_name(),
            session.config().baud_rate,
            session.ticks(),
            session.skipped_ticks()
        )),
    ];
    if session.variant().sample_channel {
        let sample = session
            .latest()
            .and_then(|frame| frame.sample_temperature_c)
            .map(|t| format!("{:.2} °C", t))
            .unwrap_or_else(|| "--".into());
        spans.push(Span::raw(format!("  sample {}", sample)));
    }

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL).title("tempctl"));
    f.render_widget(header, area);
}

fn draw_channel(f: &mut Frame, area: Rect, session: &Session<Link>, channel: usize, selected: bool) {
    let border_style = if selected {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(format!("Channel {}", channel));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(9), Constraint::Min(3)])
        .split(inner);

    let reading = session.latest().map(|frame| frame.channels[channel]);
    let value = |v: Option<f64>, unit: &str| match v {
        Some(v) => format!("{:.2}{}", v, unit),
        None => "--".into(),
    };
    let setpoint = session.setpoints()[channel];

    let label = Style::default().fg(Color::Gray);
    let lines = vec![
        Line::from(vec![
            Span::styled("Temperature  ", label),
            Span::styled(
                value(reading.map(|r| r.temperature_c), " °C"),
                Style::default().add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![Span::styled("Output       ", label), Span::raw(value(reading.map(|r| r.output_pct), " %"))]),
        Line::from(vec![Span::styled("Proportional ", label), Span::raw(value(reading.map(|r| r.proportional_term), ""))]),
        Line::from(vec![Span::styled("Integral     ", label), Span::raw(value(reading.map(|r| r.integral_term), ""))]),
        Line::from(""),
        Line::from(vec![
            Span::styled("Setpoint     ", label),
            Span::styled(format!("{:.2} °C", setpoint.setpoint_c), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![Span::styled("Band         ", label), Span::raw(format!("{:.2} °C", setpoint.band_c))]),
        Line::from(vec![Span::styled("Integral time", label), Span::raw(format!(" {:.1} s", setpoint.integral_time_s))]),
        Line::from(vec![Span::styled("Ramp rate    ", label), Span::raw(format!("{:.2} /s", setpoint.rate_per_s))]),
    ];
    f.render_widget(Paragraph::new(lines), parts[0]);

    let data = sparkline_data(&session.history().temperatures(channel), parts[1].width as usize);
    let sparkline = Sparkline::default()
        .block(Block::default().borders(Borders::TOP).title("Temperature"))
        .data(&data)
        .style(Style::default().fg(if channel == 0 { Color::Blue } else { Color::Magenta }));
    f.render_widget(sparkline, parts[1]);
}

// Sparklines take unsigned bars; shift the visible window so its minimum sits just above zero.
fn sparkline_data(temperatures: &[f64], width: usize) -> Vec<u64> {
    let visible = &temperatures[temperatures.len().saturating_sub(width)..];
    let min = visible.iter().copied().fold(f64::INFINITY, f64::min);
    visible.iter().map(|t| ((t - min) * 10.0).round() as u64 + 1).collect()
}
