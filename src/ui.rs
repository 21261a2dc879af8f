use crate::api::RouteQuery;
use crate::prefs::FavoriteRoute;
use crate::screens::{ConnectionDetailScreen, DeparturesScreen, LinesScreen, RouteResultsScreen};
use crate::utils::format::truncate_string;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
    Frame,
};
use std::cell::RefCell;
use std::rc::Rc;

// Layout constants for better maintainability
const HEADER_HEIGHT: u16 = 5;
const FOOTER_HEIGHT: u16 = 3;
const STATUS_HEIGHT: u16 = 3;
const MARGIN: u16 = 1;

const LINE_WIDTH: usize = 5;
const LEFT_TIME_WIDTH: usize = 6;
const PLATFORM_WIDTH: usize = 12;
const MIN_DESTINATION_WIDTH: usize = 12;

const TPG_ORANGE: Color = Color::Rgb(255, 87, 34);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Departures,
    Routes,
}

impl Tab {
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => Tab::Routes,
            _ => Tab::Departures,
        }
    }

    pub fn index(self) -> i64 {
        match self {
            Tab::Departures => 0,
            Tab::Routes => 1,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Tab::Departures => Tab::Routes,
            Tab::Routes => Tab::Departures,
        }
    }
}

pub struct UIState {
    pub tab: Tab,
    pub stop_code: Option<String>,
    pub route: Option<RouteQuery>,
    pub favorites: Vec<String>,
    pub favorite_routes: Vec<FavoriteRoute>,
    pub lines: Rc<RefCell<LinesScreen>>,
    /// Open while a line is selected on the departures tab.
    pub departures: Option<Rc<RefCell<DeparturesScreen>>>,
    pub routes: Rc<RefCell<RouteResultsScreen>>,
    /// Open while a connection is selected on the routes tab.
    pub connection: Option<Rc<RefCell<ConnectionDetailScreen>>>,
    pub status_message: String,
    pub should_quit: bool,
}

impl UIState {
    pub fn new(tab: Tab, favorites: Vec<String>, favorite_routes: Vec<FavoriteRoute>) -> Self {
        Self {
            tab,
            stop_code: None,
            route: None,
            favorites,
            favorite_routes,
            lines: Rc::new(RefCell::new(LinesScreen::new())),
            departures: None,
            routes: Rc::new(RefCell::new(RouteResultsScreen::new())),
            connection: None,
            status_message: String::new(),
            should_quit: false,
        }
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }
}

pub fn render_ui(f: &mut Frame, app: &UIState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(MARGIN)
        .constraints([
            Constraint::Length(HEADER_HEIGHT), // Tabs and current target
            Constraint::Min(6),                // Result list
            Constraint::Length(STATUS_HEIGHT), // Status bar
            Constraint::Length(FOOTER_HEIGHT), // Controls
        ])
        .split(f.area());

    render_header(f, chunks[0], app);

    match app.tab {
        Tab::Departures => match &app.departures {
            Some(screen) => render_departures(f, chunks[1], &mut screen.borrow_mut()),
            None => render_lines(f, chunks[1], app, &mut app.lines.borrow_mut()),
        },
        Tab::Routes => match &app.connection {
            Some(screen) => render_connection(f, chunks[1], &mut screen.borrow_mut()),
            None => render_routes(f, chunks[1], &mut app.routes.borrow_mut()),
        },
    }

    render_status(f, chunks[2], app);
    render_footer(f, chunks[3], app.tab);
}

fn render_header(f: &mut Frame, area: Rect, app: &UIState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(TPG_ORANGE))
        .title("tpg");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Length(1)])
        .split(inner);

    let tabs = Tabs::new(vec!["Departures", "Routes"])
        .select(app.tab.index() as usize)
        .highlight_style(Style::default().fg(TPG_ORANGE).add_modifier(Modifier::BOLD));
    f.render_widget(tabs, rows[0]);

    let target = match app.tab {
        Tab::Departures => {
            let stop = app.stop_code.as_deref().unwrap_or("no stop selected");
            let name = app.lines.borrow().stop_name.clone().unwrap_or_default();
            let mut spans = vec![
                Span::styled("Stop: ", Style::default()),
                Span::styled(stop.to_string(), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
                Span::styled(format!(" {}", name), Style::default().fg(Color::Cyan)),
            ];
            if app.stop_code.as_ref().is_some_and(|s| app.favorites.contains(s)) {
                spans.push(Span::styled(" ★", Style::default().fg(Color::Yellow)));
            }
            Line::from(spans)
        }
        Tab::Routes => match &app.route {
            Some(route) => {
                let mut spans = vec![
                    Span::styled(
                        format!("{} - {}", route.from, route.to),
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(
                        format!(
                            " • {} {}",
                            if route.arrival_time { "Arrival at" } else { "Departure at" },
                            route.date_time.format("%d.%m %H:%M")
                        ),
                        Style::default().fg(Color::Cyan),
                    ),
                ];
                if app.favorite_routes.iter().any(|r| r.from == route.from && r.to == route.to) {
                    spans.push(Span::styled(" ★", Style::default().fg(Color::Yellow)));
                }
                Line::from(spans)
            }
            None => Line::from("No route. Start with --from and --to."),
        },
    };
    f.render_widget(Paragraph::new(target), rows[1]);

    let favorites: Vec<String> = match app.tab {
        Tab::Departures => app.favorites.iter().take(9).cloned().collect(),
        Tab::Routes => app
            .favorite_routes
            .iter()
            .take(9)
            .map(|r| format!("{} - {}", r.from, r.to))
            .collect(),
    };
    let mut spans = vec![Span::styled("★ ", Style::default().fg(Color::Yellow))];
    if favorites.is_empty() {
        spans.push(Span::styled("no favourites yet, press f", Style::default().fg(Color::DarkGray)));
    }
    for (i, favorite) in favorites.iter().enumerate() {
        spans.push(Span::styled(format!("{} ", i + 1), Style::default().fg(Color::Yellow)));
        spans.push(Span::raw(format!("{}  ", favorite)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), rows[2]);
}

fn placeholder(f: &mut Frame, area: Rect, title: String, message: &str) {
    let paragraph = Paragraph::new(message.to_string())
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(title),
        );
    f.render_widget(paragraph, area);
}

fn highlighted_list<'a>(items: Vec<ListItem<'a>>, title: String) -> List<'a> {
    List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(title),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(" > ")
}

fn render_lines(f: &mut Frame, area: Rect, app: &UIState, screen: &mut LinesScreen) {
    let title = format!("Lines at {}", app.stop_code.as_deref().unwrap_or("?"));
    if let Some(message) = screen.message() {
        placeholder(f, area, title, message);
        return;
    }

    let items: Vec<ListItem> = screen
        .rows
        .iter()
        .map(|row| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("Line {:<width$}", row.line, width = LINE_WIDTH),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!(" │ {:>2} departures │ next {}", row.departures, row.next)),
            ]))
        })
        .collect();

    f.render_stateful_widget(highlighted_list(items, title), area, &mut screen.list_state);
}

fn render_departures(f: &mut Frame, area: Rect, screen: &mut DeparturesScreen) {
    let title = format!("Line {}", screen.line);
    if let Some(message) = screen.message() {
        placeholder(f, area, title, message);
        return;
    }

    // Borders, padding and the highlight column
    let available = (area.width as usize).saturating_sub(4 + 3);
    let destination_width = available
        .saturating_sub(LEFT_TIME_WIDTH + PLATFORM_WIDTH + 6)
        .max(MIN_DESTINATION_WIDTH);

    let items: Vec<ListItem> = screen
        .rows
        .iter()
        .map(|row| {
            let style = if row.left.selectable {
                Style::default()
            } else {
                Style::default().fg(Color::DarkGray)
            };
            ListItem::new(format!(
                "{} │ {:<pw$} │ {:>lw$}",
                truncate_string(&row.destination, destination_width),
                row.platform.as_deref().unwrap_or(""),
                row.left.text,
                pw = PLATFORM_WIDTH,
                lw = LEFT_TIME_WIDTH,
            ))
            .style(style)
        })
        .collect();

    f.render_stateful_widget(highlighted_list(items, title), area, &mut screen.list_state);
}

fn render_routes(f: &mut Frame, area: Rect, screen: &mut RouteResultsScreen) {
    let title = "Routes".to_string();
    if let Some(message) = screen.message() {
        placeholder(f, area, title, message);
        return;
    }

    let items: Vec<ListItem> = screen
        .rows
        .iter()
        .map(|row| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} → {}", row.departure, row.arrival),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!(" ({}) ", row.duration), Style::default().fg(Color::Cyan)),
                Span::raw(row.sections.clone()),
            ]))
        })
        .collect();

    f.render_stateful_widget(highlighted_list(items, title), area, &mut screen.list_state);
}

fn render_connection(f: &mut Frame, area: Rect, screen: &mut ConnectionDetailScreen) {
    let title = screen.title.clone();
    if let Some(message) = screen.message() {
        placeholder(f, area, title, message);
        return;
    }

    let items: Vec<ListItem> = screen
        .rows
        .iter()
        .map(|row| {
            let stops = if row.via.is_empty() {
                String::new()
            } else {
                format!(" · {} stops", row.via.len() + 1)
            };
            ListItem::new(Text::from(vec![
                Line::from(Span::styled(row.summary.clone(), Style::default().add_modifier(Modifier::BOLD))),
                Line::from(Span::styled(
                    format!("   {} → {}{}", row.departure, row.arrival, stops),
                    Style::default().fg(Color::Cyan),
                )),
            ]))
        })
        .collect();

    f.render_stateful_widget(highlighted_list(items, title), area, &mut screen.list_state);
}

fn render_status(f: &mut Frame, area: Rect, app: &UIState) {
    let status = Paragraph::new(Text::from(Line::from(vec![Span::styled(
        app.status_message.clone(),
        Style::default().fg(Color::White),
    )])))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue))
            .title("Status"),
    );

    f.render_widget(status, area);
}

fn render_footer(f: &mut Frame, area: Rect, tab: Tab) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    let text = |t: &'static str| Span::styled(t, Style::default().fg(Color::White));

    let mut spans = vec![key("↑/↓ "), text("Navigate • "), key("ENTER "), text("Open • ")];
    match tab {
        Tab::Departures => spans.extend([
            key("ESC "),
            text("Back • "),
            key("1-9 "),
            text("Favourite • "),
            key("F "),
            text("Star • "),
        ]),
        Tab::Routes => spans.extend([
            key("ESC "),
            text("Back • "),
            key("X "),
            text("Reverse • "),
            key("A "),
            text("Arrival/Departure • "),
            key("N "),
            text("Now • "),
            key("F "),
            text("Star • "),
        ]),
    }
    spans.extend([key("R "), text("Reload • "), key("TAB "), text("Switch • "), key("Q "), text("Quit")]);

    let controls = Paragraph::new(Text::from(Line::from(spans)))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Gray))
                .title("Controls"),
        );

    f.render_widget(controls, area);
}
