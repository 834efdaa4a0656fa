use std::{
    io::{self, Stdout},
    time::{Duration, Instant},
};

use color_eyre::Result;
use crossterm::{
    event::{self, Event as CrosstermEvent, KeyEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::{Block, Borders, Paragraph},
};
use tokio::{sync::mpsc, task};
use tracing::{debug, error};

use crate::ui::{self, AppViewModel, ScreenView};

#[derive(Debug)]
pub enum Event {
    Input(KeyEvent),
    Tick,
    Resize(u16, u16),
}

/// Raw-mode guard: enters the alternate screen on creation and restores
/// the terminal on drop, whatever path the app exits through.
pub struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.hide_cursor()?;

        Ok(Self { terminal })
    }

    pub fn draw<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Frame<'_>),
    {
        self.terminal.draw(f)?;
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            error!(?err, "failed to disable raw mode");
        }

        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, LeaveAlternateScreen) {
            error!(?err, "failed to leave alternate screen");
        }

        if let Err(err) = self.terminal.show_cursor() {
            error!(?err, "failed to show cursor");
        }
    }
}

pub fn spawn_event_loop(
    tx: mpsc::UnboundedSender<Event>,
    tick_rate: Duration,
) -> task::JoinHandle<()> {
    task::spawn_blocking(move || {
        let mut last_tick = Instant::now();

        loop {
            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));

            match event::poll(timeout) {
                Ok(true) => match event::read() {
                    Ok(CrosstermEvent::Key(key)) => {
                        if tx.send(Event::Input(key)).is_err() {
                            break;
                        }
                    }
                    Ok(CrosstermEvent::Resize(w, h)) => {
                        if tx.send(Event::Resize(w, h)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(?err, "failed to read terminal event");
                        break;
                    }
                },
                Ok(false) => {}
                Err(err) => {
                    error!(?err, "failed to poll terminal events");
                    break;
                }
            }

            if last_tick.elapsed() >= tick_rate {
                if tx.send(Event::Tick).is_err() {
                    break;
                }
                last_tick = Instant::now();
            }
        }

        debug!("terminal event loop terminated");
    })
}

pub fn render_app(frame: &mut Frame<'_>, view_model: &AppViewModel) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(if view_model.chrome.is_some() { 2 } else { 0 }),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.size());

    if let Some(chrome) = &view_model.chrome {
        render_chrome(frame, layout[0], chrome);
    }

    let body = layout[1];
    match &view_model.screen {
        ScreenView::Loading => render_loading(frame, body),
        ScreenView::Welcome(view) => ui::welcome::render(frame, body, view),
        ScreenView::Auth(view) => ui::auth::render(frame, body, view),
        ScreenView::Dashboard(view) => ui::dashboard::render(frame, body, view),
        ScreenView::Create(view) => ui::create::render(frame, body, view),
        ScreenView::Capsule(view) => ui::capsule::render(frame, body, view),
        ScreenView::Settings(view) => ui::settings::render(frame, body, view),
    }

    render_footer(frame, layout[2], view_model);
}

fn render_chrome(frame: &mut Frame<'_>, area: Rect, chrome: &ui::ChromeView) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .title(format!("ChronoVault — {}", chrome.email))
        .style(Style::default().fg(Color::Cyan));

    frame.render_widget(block, area);
}

fn render_loading(frame: &mut Frame<'_>, area: Rect) {
    let paragraph = Paragraph::new("Loading application...")
        .style(Style::default().fg(Color::Gray))
        .alignment(ratatui::layout::Alignment::Center);
    frame.render_widget(paragraph, ui::vertical_center(area, 1));
}

fn render_footer(frame: &mut Frame<'_>, area: Rect, view_model: &AppViewModel) {
    let content = Paragraph::new(ui::key_hints(&view_model.screen))
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(content, area);
}
