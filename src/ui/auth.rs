use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::Paragraph,
};

use super::FieldView;

pub struct AuthView {
    pub title: &'static str,
    pub fields: Vec<FieldView>,
    pub error: Option<String>,
    pub busy: bool,
    pub switch_hint: &'static str,
}

pub fn render(frame: &mut Frame<'_>, area: Rect, view: &AuthView) {
    let column = super::centered_column(area, 60);
    let field_rows = (view.fields.len() as u16) * 3;
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(field_rows),
            Constraint::Length(1),
            Constraint::Length(2),
            Constraint::Min(0),
        ])
        .split(column);

    super::title_line(frame, rows[0], view.title);
    super::render_form(frame, rows[1], &view.fields);

    let notice = view.busy.then_some("Processing...");
    super::render_feedback(frame, rows[2], view.error.as_deref(), notice);

    let switch = Paragraph::new(view.switch_hint).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(switch, rows[3]);
}
