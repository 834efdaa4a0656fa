use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    widgets::Paragraph,
};

use super::FieldView;

pub struct SettingsView {
    pub fields: Vec<FieldView>,
    pub error: Option<String>,
    pub success: Option<String>,
    pub busy: bool,
    /// Text typed so far into the delete-account confirmation, when armed.
    pub confirm_delete: Option<String>,
}

pub fn render(frame: &mut Frame<'_>, area: Rect, view: &SettingsView) {
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

    super::title_line(frame, rows[0], "Account Settings — Change Password");
    super::render_form(frame, rows[1], &view.fields);

    let notice = if view.busy {
        Some("Updating...")
    } else {
        view.success.as_deref()
    };
    super::render_feedback(frame, rows[2], view.error.as_deref(), notice);

    let danger = match &view.confirm_delete {
        Some(typed) => format!(
            "Deleting your account is permanent. Type DELETE and press Enter to confirm: {typed}_"
        ),
        None => "Danger zone: ctrl+x permanently deletes your account and profile.".to_string(),
    };
    frame.render_widget(
        Paragraph::new(danger).style(Style::default().fg(Color::Red)),
        rows[3],
    );
}
