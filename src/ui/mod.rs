use chrono::{DateTime, Utc};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Paragraph},
};

pub mod auth;
pub mod capsule;
pub mod create;
pub mod dashboard;
pub mod settings;
pub mod welcome;

/// Everything one frame needs. Built fresh by the app on every draw.
pub struct AppViewModel {
    /// Present only for a signed-in session.
    pub chrome: Option<ChromeView>,
    pub screen: ScreenView,
}

pub struct ChromeView {
    pub email: String,
}

pub enum ScreenView {
    Loading,
    Welcome(welcome::WelcomeView),
    Auth(auth::AuthView),
    Dashboard(dashboard::DashboardView),
    Create(create::CreateView),
    Capsule(capsule::CapsuleDetailView),
    Settings(settings::SettingsView),
}

/// One text input in a form.
pub struct FieldView {
    pub label: &'static str,
    pub value: String,
    pub focused: bool,
    pub masked: bool,
}

impl FieldView {
    fn display_value(&self) -> String {
        if self.masked {
            "*".repeat(self.value.chars().count())
        } else {
            self.value.clone()
        }
    }
}

pub fn key_hints(screen: &ScreenView) -> &'static str {
    match screen {
        ScreenView::Loading | ScreenView::Welcome(_) => "ctrl+c quit",
        ScreenView::Auth(_) => {
            "Tab next field · Enter submit · ctrl+t switch login/sign-up · ctrl+c quit"
        }
        ScreenView::Dashboard(_) => {
            "↑/↓ select · Enter open · n new capsule · x delete · s settings · ctrl+o sign out · q quit"
        }
        ScreenView::Create(_) => "Tab next field · Enter seal · Esc back · ctrl+o sign out",
        ScreenView::Capsule(_) => "Esc back · ctrl+o sign out · q quit",
        ScreenView::Settings(_) => {
            "Tab next field · Enter update · ctrl+x delete account · Esc back · ctrl+o sign out"
        }
    }
}

pub fn format_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%B %e, %Y").to_string()
}

/// Stacked bordered inputs, three rows each, cursor-less; the focused
/// field gets the accent border.
pub fn render_form(frame: &mut Frame<'_>, area: Rect, fields: &[FieldView]) {
    let constraints: Vec<Constraint> = fields
        .iter()
        .map(|_| Constraint::Length(3))
        .chain(std::iter::once(Constraint::Min(0)))
        .collect();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    for (row, field) in rows.iter().zip(fields.iter()) {
        let border = if field.focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let block = Block::default()
            .title(field.label)
            .borders(Borders::ALL)
            .border_style(border)
            .title_style(Style::default().fg(Color::LightBlue));

        let mut value = field.display_value();
        if field.focused {
            value.push('_');
        }
        let input = Paragraph::new(value)
            .style(Style::default().fg(Color::Gray))
            .block(block);
        frame.render_widget(input, *row);
    }
}

pub fn render_feedback(
    frame: &mut Frame<'_>,
    area: Rect,
    error: Option<&str>,
    notice: Option<&str>,
) {
    if let Some(error) = error {
        let paragraph = Paragraph::new(error).style(Style::default().fg(Color::Red));
        frame.render_widget(paragraph, area);
    } else if let Some(notice) = notice {
        let paragraph = Paragraph::new(notice).style(Style::default().fg(Color::Green));
        frame.render_widget(paragraph, area);
    }
}

pub fn title_line(frame: &mut Frame<'_>, area: Rect, text: &str) {
    let paragraph = Paragraph::new(text)
        .style(
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        )
        .alignment(Alignment::Center);
    frame.render_widget(paragraph, area);
}

/// A horizontally-centered column of at most `width` cells.
pub fn centered_column(area: Rect, width: u16) -> Rect {
    let width = width.min(area.width);
    Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y,
        width,
        height: area.height,
    }
}

/// A vertically-centered band `height` rows tall.
pub fn vertical_center(area: Rect, height: u16) -> Rect {
    let height = height.min(area.height);
    Rect {
        x: area.x,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width: area.width,
        height,
    }
}
