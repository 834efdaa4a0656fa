use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

pub struct MediaItem {
    pub url: String,
    pub kind: &'static str,
}

pub struct UnlockedCapsule {
    pub title: String,
    pub creator: String,
    pub created_on: String,
    pub message: String,
    pub collaborators: Vec<String>,
    pub media: Vec<MediaItem>,
}

pub enum CapsuleDetailView {
    Loading,
    Missing,
    Failed(String),
    Locked {
        title: String,
        creator: String,
        opens_on: String,
    },
    Unlocked(Box<UnlockedCapsule>),
}

pub fn render(frame: &mut Frame<'_>, area: Rect, view: &CapsuleDetailView) {
    match view {
        CapsuleDetailView::Loading => {
            let paragraph = Paragraph::new("Unsealing your capsule...")
                .style(Style::default().fg(Color::Gray))
                .alignment(Alignment::Center);
            frame.render_widget(paragraph, super::vertical_center(area, 1));
        }
        CapsuleDetailView::Missing => render_missing(frame, area),
        CapsuleDetailView::Failed(message) => {
            let paragraph = Paragraph::new(message.as_str())
                .style(Style::default().fg(Color::Red))
                .wrap(Wrap { trim: true });
            frame.render_widget(paragraph, area);
        }
        CapsuleDetailView::Locked {
            title,
            creator,
            opens_on,
        } => render_locked(frame, area, title, creator, opens_on),
        CapsuleDetailView::Unlocked(capsule) => render_unlocked(frame, area, capsule),
    }
}

fn render_missing(frame: &mut Frame<'_>, area: Rect) {
    let band = super::vertical_center(area, 2);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1)])
        .split(band);

    let heading = Paragraph::new("Capsule Not Found")
        .style(
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        )
        .alignment(Alignment::Center);
    frame.render_widget(heading, rows[0]);

    let body =
        Paragraph::new("This memory might be lost to time, or the link is incorrect. Press Esc.")
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center);
    frame.render_widget(body, rows[1]);
}

fn render_locked(frame: &mut Frame<'_>, area: Rect, title: &str, creator: &str, opens_on: &str) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Min(1)])
        .split(area);

    render_header(frame, rows[0], title, creator, None);

    let sealed = Paragraph::new(format!(
        "This capsule is still sealed. It opens on {opens_on}."
    ))
    .style(Style::default().fg(Color::Yellow));
    frame.render_widget(sealed, rows[1]);
}

fn render_unlocked(frame: &mut Frame<'_>, area: Rect, capsule: &UnlockedCapsule) {
    let media_rows = if capsule.media.is_empty() {
        0
    } else {
        capsule.media.len() as u16 + 1
    };
    let collaborator_rows = if capsule.collaborators.is_empty() { 0 } else { 2 };
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(3),
            Constraint::Length(collaborator_rows),
            Constraint::Length(media_rows),
        ])
        .split(area);

    render_header(
        frame,
        rows[0],
        &capsule.title,
        &capsule.creator,
        Some(&capsule.created_on),
    );

    let message_block = Block::default()
        .title("A Message From The Past")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    let body = Paragraph::new(capsule.message.clone())
        .wrap(Wrap { trim: false })
        .style(Style::default().fg(Color::Gray))
        .block(message_block);
    frame.render_widget(body, rows[1]);

    if !capsule.collaborators.is_empty() {
        let line = Line::from(vec![
            Span::styled("Shared with: ", Style::default().fg(Color::LightBlue)),
            Span::raw(capsule.collaborators.join(", ")),
        ]);
        frame.render_widget(
            Paragraph::new(line).style(Style::default().fg(Color::Gray)),
            rows[2],
        );
    }

    if !capsule.media.is_empty() {
        let mut lines = vec![Line::from(Span::styled(
            "Saved Memories",
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        ))];
        for item in &capsule.media {
            lines.push(Line::from(vec![
                Span::styled(
                    format!("[{}] ", item.kind),
                    Style::default().fg(Color::Yellow),
                ),
                Span::raw(item.url.clone()),
            ]));
        }
        frame.render_widget(
            Paragraph::new(lines).style(Style::default().fg(Color::Gray)),
            rows[3],
        );
    }
}

fn render_header(
    frame: &mut Frame<'_>,
    area: Rect,
    title: &str,
    creator: &str,
    created_on: Option<&str>,
) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1)])
        .split(area);

    let heading = Paragraph::new(title.to_string()).style(
        Style::default()
            .fg(Color::LightBlue)
            .add_modifier(Modifier::BOLD),
    );
    frame.render_widget(heading, rows[0]);

    let byline = match created_on {
        Some(date) => format!("Created by: {creator} on {date}"),
        None => format!("Created by: {creator}"),
    };
    frame.render_widget(
        Paragraph::new(byline).style(Style::default().fg(Color::DarkGray)),
        rows[1],
    );
}
