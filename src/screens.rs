//! View models for the three result screens. Each one observes a fetcher and
//! rebuilds its rows from the shared result on every change.
use ratatui::widgets::ListState;

use crate::api::{Connection, Departure, LeftTime, Section, SectionKind};
use crate::fetcher::{FetchState, FetchStatus, ResultModel};
use crate::observer::Observer;
use crate::utils::format::{
    format_duration, format_unix_time, left_time_label, platform_label, LeftTimeLabel,
};

pub const DEPARTURES_ERROR: &str = "Sorry, we can't fetch new departures. Please, try again.";
pub const ROUTES_ERROR: &str = "Oops! We can't find routes right now. Please, try again.";
pub const BUS_IS_COMING: &str = "The bus is coming! You can't set a reminder for it.";
pub const INVALID_ROUTE: &str =
    "Invalid route. Are you sure you set the departure stop and the arrival stop?";
const ROUTE_HINT: &str =
    "Set the departure stop and the arrival stop with --from and --to, or pick a favourite route (1-9).";

fn select_next(state: &mut ListState, len: usize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let next = match state.selected() {
        Some(i) => (i + 1) % len,
        None => 0,
    };
    state.select(Some(next));
}

fn select_previous(state: &mut ListState, len: usize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let prev = match state.selected() {
        Some(0) | None => len - 1,
        Some(i) => i - 1,
    };
    state.select(Some(prev));
}

/// Keeps the selection inside the new row count after a refresh.
fn clamp_selection(state: &mut ListState, len: usize) {
    match (state.selected(), len) {
        (_, 0) => state.select(None),
        (Some(i), len) if i >= len => state.select(Some(len - 1)),
        (None, _) => state.select(Some(0)),
        _ => {}
    }
}

#[derive(Debug, Clone)]
pub struct LineRow {
    pub line: String,
    pub departures: usize,
    pub next: String,
}

pub struct LinesScreen {
    pub stop_name: Option<String>,
    pub status: FetchStatus,
    pub rows: Vec<LineRow>,
    pub list_state: ListState,
}

impl LinesScreen {
    pub fn new() -> Self {
        Self {
            stop_name: None,
            status: FetchStatus::NoResults,
            rows: Vec::new(),
            list_state: ListState::default(),
        }
    }

    pub fn next(&mut self) {
        select_next(&mut self.list_state, self.rows.len());
    }

    pub fn previous(&mut self) {
        select_previous(&mut self.list_state, self.rows.len());
    }

    pub fn selected_line(&self) -> Option<&str> {
        self.list_state
            .selected()
            .and_then(|i| self.rows.get(i))
            .map(|row| row.line.as_str())
    }

    pub fn message(&self) -> Option<&'static str> {
        match self.status {
            FetchStatus::Loading => Some("Loading departures…"),
            FetchStatus::Error => Some(DEPARTURES_ERROR),
            FetchStatus::NoResults => Some("No departures"),
            FetchStatus::Ok => None,
        }
    }
}

impl Observer<FetchState> for LinesScreen {
    fn on_result_changed(&mut self, state: &FetchState) {
        self.status = state.status();
        self.rows.clear();
        self.stop_name = None;

        if let Some(group) = state.result().and_then(ResultModel::departures) {
            self.stop_name = Some(group.stop.name.clone()).filter(|n| !n.is_empty());
            self.rows = group
                .lines
                .iter()
                .map(|line| LineRow {
                    line: line.line.clone(),
                    departures: line.departures.len(),
                    next: line
                        .departures
                        .first()
                        .map(|d| left_time_label(d).text)
                        .unwrap_or_default(),
                })
                .collect();
        }
        clamp_selection(&mut self.list_state, self.rows.len());
    }
}

#[derive(Debug, Clone)]
pub struct DepartureRow {
    pub destination: String,
    pub platform: Option<String>,
    pub left: LeftTimeLabel,
    left_time: LeftTime,
}

impl DepartureRow {
    fn new(departure: &Departure) -> Self {
        Self {
            destination: departure.line.destination.clone(),
            platform: platform_label(departure),
            left: left_time_label(departure),
            left_time: departure.left_time,
        }
    }
}

/// Departures of a single line at the current stop.
pub struct DeparturesScreen {
    pub line: String,
    pub status: FetchStatus,
    pub rows: Vec<DepartureRow>,
    pub list_state: ListState,
}

impl DeparturesScreen {
    pub fn new(line: String) -> Self {
        Self {
            line,
            status: FetchStatus::NoResults,
            rows: Vec::new(),
            list_state: ListState::default(),
        }
    }

    pub fn next(&mut self) {
        select_next(&mut self.list_state, self.rows.len());
    }

    pub fn previous(&mut self) {
        select_previous(&mut self.list_state, self.rows.len());
    }

    /// Status text for acting on the selected departure, if it can be acted on.
    pub fn activate_selected(&self) -> Option<String> {
        let row = self.list_state.selected().and_then(|i| self.rows.get(i))?;
        if !row.left.selectable {
            return None;
        }
        if row.left_time == LeftTime::Minutes(0) {
            return Some(BUS_IS_COMING.to_string());
        }
        Some(format!("Line {} to {} leaves in {}", self.line, row.destination, row.left.text))
    }

    pub fn message(&self) -> Option<&'static str> {
        match self.status {
            FetchStatus::Loading => Some("Loading departures…"),
            FetchStatus::Error => Some(DEPARTURES_ERROR),
            FetchStatus::NoResults => Some("No departures"),
            FetchStatus::Ok if self.rows.is_empty() => Some("No more departures for this line"),
            FetchStatus::Ok => None,
        }
    }
}

impl Observer<FetchState> for DeparturesScreen {
    fn on_result_changed(&mut self, state: &FetchState) {
        self.status = state.status();
        self.rows = state
            .result()
            .and_then(ResultModel::departures)
            .and_then(|group| group.line(&self.line))
            .map(|line| line.departures.iter().map(DepartureRow::new).collect())
            .unwrap_or_default();
        clamp_selection(&mut self.list_state, self.rows.len());
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionRow {
    pub departure: String,
    pub arrival: String,
    pub duration: String,
    pub sections: String,
}

impl ConnectionRow {
    fn new(connection: &Connection) -> Self {
        let sections: Vec<String> = connection
            .sections
            .iter()
            .map(|section| match section.kind() {
                SectionKind::Journey(journey) => {
                    let category = journey.category.as_deref().unwrap_or("");
                    let number = journey.number.as_deref().unwrap_or("?");
                    let destination = journey.to.as_deref().unwrap_or("");
                    format!("{}{} → {}", category, number, destination)
                }
                SectionKind::Walk(_) => "walk".to_string(),
            })
            .collect();

        Self {
            departure: format_unix_time(connection.from.departure_timestamp),
            arrival: format_unix_time(connection.to.arrival_timestamp),
            duration: format_duration(connection.duration_minutes()),
            sections: sections.join(" · "),
        }
    }
}

pub struct RouteResultsScreen {
    /// Whether a route was ever searched; without one a failure means an incomplete route.
    pub has_route: bool,
    pub status: FetchStatus,
    pub rows: Vec<ConnectionRow>,
    pub list_state: ListState,
}

impl RouteResultsScreen {
    pub fn new() -> Self {
        Self {
            has_route: false,
            status: FetchStatus::NoResults,
            rows: Vec::new(),
            list_state: ListState::default(),
        }
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.list_state.selected().filter(|&i| i < self.rows.len())
    }

    pub fn next(&mut self) {
        select_next(&mut self.list_state, self.rows.len());
    }

    pub fn previous(&mut self) {
        select_previous(&mut self.list_state, self.rows.len());
    }

    pub fn message(&self) -> Option<&'static str> {
        match self.status {
            FetchStatus::Loading => Some("Searching routes…"),
            FetchStatus::Error if !self.has_route => Some(INVALID_ROUTE),
            FetchStatus::Error => Some(ROUTES_ERROR),
            FetchStatus::NoResults if !self.has_route => Some(ROUTE_HINT),
            FetchStatus::NoResults => Some("No routes found. Press r to search again."),
            FetchStatus::Ok => None,
        }
    }
}

impl Observer<FetchState> for RouteResultsScreen {
    fn on_result_changed(&mut self, state: &FetchState) {
        self.status = state.status();
        self.rows = state
            .result()
            .and_then(ResultModel::connections)
            .map(|results| results.connections.iter().map(ConnectionRow::new).collect())
            .unwrap_or_default();
        clamp_selection(&mut self.list_state, self.rows.len());
    }
}

#[derive(Debug, Clone)]
pub struct SectionRow {
    pub summary: String,
    pub departure: String,
    pub arrival: String,
    /// Intermediate stops, endpoints excluded.
    pub via: Vec<String>,
}

impl SectionRow {
    fn new(section: &Section) -> Self {
        let (summary, via) = match section.kind() {
            SectionKind::Journey(journey) => {
                let summary = format!(
                    "{}{} → {}{}",
                    journey.category.as_deref().unwrap_or(""),
                    journey.number.as_deref().unwrap_or("?"),
                    journey.to.as_deref().unwrap_or(""),
                    journey.operator.as_deref().map(|o| format!(" ({})", o)).unwrap_or_default(),
                );
                let stops = journey.pass_list.len();
                let via = journey
                    .pass_list
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != 0 && *i + 1 != stops)
                    .map(|(_, checkpoint)| checkpoint.name().to_string())
                    .collect();
                (summary, via)
            }
            SectionKind::Walk(walk) => {
                let summary = match walk.and_then(|w| w.duration.as_deref()) {
                    Some(duration) => format!("Walk ({})", duration),
                    None => "Walk".to_string(),
                };
                (summary, Vec::new())
            }
        };

        Self {
            summary,
            departure: format!(
                "{} {}",
                format_unix_time(section.departure.departure_timestamp),
                section.departure.name()
            ),
            arrival: format!(
                "{} {}",
                format_unix_time(section.arrival.arrival_timestamp),
                section.arrival.name()
            ),
            via,
        }
    }
}

/// Sections of one connection from the route results.
pub struct ConnectionDetailScreen {
    pub index: usize,
    pub title: String,
    pub status: FetchStatus,
    pub rows: Vec<SectionRow>,
    pub list_state: ListState,
}

impl ConnectionDetailScreen {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            title: format!("Connection {}", index + 1),
            status: FetchStatus::NoResults,
            rows: Vec::new(),
            list_state: ListState::default(),
        }
    }

    pub fn next(&mut self) {
        select_next(&mut self.list_state, self.rows.len());
    }

    pub fn previous(&mut self) {
        select_previous(&mut self.list_state, self.rows.len());
    }

    /// Status text listing the intermediate stops of the selected section.
    pub fn activate_selected(&self) -> Option<String> {
        let row = self.list_state.selected().and_then(|i| self.rows.get(i))?;
        if row.via.is_empty() {
            return Some(format!("{}: no intermediate stops", row.summary));
        }
        Some(format!("{} via {}", row.summary, row.via.join(", ")))
    }

    pub fn message(&self) -> Option<&'static str> {
        match self.status {
            FetchStatus::Loading => Some("Searching routes…"),
            FetchStatus::Error => Some(ROUTES_ERROR),
            FetchStatus::Ok if !self.rows.is_empty() => None,
            _ => Some("This connection is no longer available"),
        }
    }
}

impl Observer<FetchState> for ConnectionDetailScreen {
    fn on_result_changed(&mut self, state: &FetchState) {
        self.status = state.status();
        let connection = state
            .result()
            .and_then(ResultModel::connections)
            .and_then(|results| results.connections.get(self.index));

        self.rows = connection
            .map(|connection| connection.sections.iter().map(SectionRow::new).collect())
            .unwrap_or_default();
        if let Some(connection) = connection {
            self.title = format!(
                "{} → {} ({})",
                format_unix_time(connection.from.departure_timestamp),
                format_unix_time(connection.to.arrival_timestamp),
                format_duration(connection.duration_minutes())
            );
        }
        clamp_selection(&mut self.list_state, self.rows.len());
    }
}
