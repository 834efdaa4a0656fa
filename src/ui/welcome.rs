use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::Paragraph,
};

pub struct WelcomeView;

pub fn render(frame: &mut Frame<'_>, area: Rect, _view: &WelcomeView) {
    let band = super::vertical_center(area, 4);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(band);

    let title = Paragraph::new("ChronoVault")
        .style(
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        )
        .alignment(Alignment::Center);
    frame.render_widget(title, rows[0]);

    let tagline = Paragraph::new("Messages for the future, sealed today.")
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center);
    frame.render_widget(tagline, rows[1]);

    let hint = Paragraph::new("Taking you to sign-in...")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    frame.render_widget(hint, rows[2]);
}
