use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::Paragraph,
};

use super::FieldView;

pub struct CreateView {
    pub fields: Vec<FieldView>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub busy: bool,
}

pub fn render(frame: &mut Frame<'_>, area: Rect, view: &CreateView) {
    let column = super::centered_column(area, 72);
    let field_rows = (view.fields.len() as u16) * 3;
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(field_rows),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(column);

    super::title_line(frame, rows[0], "Create a New Time Capsule");
    super::render_form(frame, rows[1], &view.fields);

    if let Some(error) = &view.error {
        frame.render_widget(
            Paragraph::new(error.as_str()).style(Style::default().fg(Color::Red)),
            rows[2],
        );
    } else if let Some(status) = &view.status {
        frame.render_widget(
            Paragraph::new(status.as_str()).style(Style::default().fg(Color::Gray)),
            rows[2],
        );
    } else if view.busy {
        frame.render_widget(
            Paragraph::new("Sealing...").style(Style::default().fg(Color::Gray)),
            rows[2],
        );
    }
}
