use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{List, ListItem, Paragraph, Wrap},
};

pub struct CapsuleCard {
    pub title: String,
    pub creator: String,
    pub unlocked: bool,
    pub opens_on: String,
    pub owned: bool,
}

pub struct DashboardView {
    pub greeting: String,
    pub cards: Vec<CapsuleCard>,
    pub selected: Option<usize>,
    pub loading: bool,
    pub error: Option<String>,
    /// Title of the capsule awaiting delete confirmation.
    pub confirm_delete: Option<String>,
}

pub fn render(frame: &mut Frame<'_>, area: Rect, view: &DashboardView) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    let greeting = Paragraph::new(format!(
        "Welcome, {}! Ready to take a trip down memory lane?",
        view.greeting
    ))
    .style(Style::default().fg(Color::Gray));
    frame.render_widget(greeting, rows[0]);

    if view.loading {
        let loading = Paragraph::new("Loading your capsules...")
            .style(Style::default().fg(Color::Gray));
        frame.render_widget(loading, rows[1]);
    } else if view.cards.is_empty() {
        let empty = Paragraph::new(
            "No capsules found.\nIt looks like your vault is empty. Why not create your first memory? Press `n`.",
        )
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(Color::Gray));
        frame.render_widget(empty, rows[1]);
    } else {
        let items: Vec<ListItem> = view
            .cards
            .iter()
            .enumerate()
            .map(|(idx, card)| card_item(card, Some(idx) == view.selected))
            .collect();
        frame.render_widget(List::new(items), rows[1]);
    }

    if let Some(title) = &view.confirm_delete {
        let prompt = Paragraph::new(format!(
            "Permanently delete \"{title}\"? This cannot be undone. y/n"
        ))
        .style(Style::default().fg(Color::Red));
        frame.render_widget(prompt, rows[2]);
    } else if let Some(error) = &view.error {
        let line = Paragraph::new(error.as_str()).style(Style::default().fg(Color::Red));
        frame.render_widget(line, rows[2]);
    }
}

fn card_item(card: &CapsuleCard, selected: bool) -> ListItem<'static> {
    let status = if card.unlocked {
        Span::styled("Ready to Open!", Style::default().fg(Color::Green))
    } else {
        Span::styled(
            format!("Opens on: {}", card.opens_on),
            Style::default().fg(Color::Yellow),
        )
    };

    let mut spans = vec![
        Span::styled(
            card.title.clone(),
            Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" · by "),
        Span::raw(card.creator.clone()),
        Span::raw(" · "),
        status,
    ];
    if !card.owned {
        spans.push(Span::styled(
            "  [Shared]",
            Style::default().fg(Color::LightBlue),
        ));
    }

    let style = if selected {
        Style::default().add_modifier(Modifier::BOLD).bg(Color::DarkGray)
    } else {
        Style::default()
    };
    ListItem::new(Line::from(spans)).style(style)
}
