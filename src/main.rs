mod actions;
mod api;
mod app;
mod config;
mod error;
mod fetcher;
mod observer;
mod prefs;
mod screens;
mod ui;
mod utils;

use anyhow::{bail, Context, Result};
use api::{RouteQuery, TpgClient, TransitApi};
use app::AppController;
use chrono::{Local, NaiveDateTime};
use clap::Parser;
use config::{Cli, Command, Config};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fetcher::{FetchState, Fetcher, QueryTarget, ResultModel};
use prefs::PreferencesStore;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use utils::format::{compact_row, format_duration, format_unix_time, left_time_label, platform_label};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::from(&cli);
    let api = Arc::new(TpgClient::new(&config)?);

    match cli.command {
        Some(Command::Departures { stop, line, compact }) => {
            print_departures(api, stop, line.as_deref(), compact).await
        }
        Some(Command::Route { from, to, at, arrival }) => {
            let query = RouteQuery {
                from,
                to,
                date_time: parse_date_time(at.as_deref())?,
                arrival_time: arrival,
            };
            print_route(api, query).await
        }
        None => {
            let route = match (cli.from, cli.to) {
                (Some(from), Some(to)) => Some(RouteQuery {
                    from,
                    to,
                    date_time: Local::now().naive_local(),
                    arrival_time: false,
                }),
                _ => None,
            };
            run_tui(api, cli.stop, route).await
        }
    }
}

fn parse_date_time(raw: Option<&str>) -> Result<NaiveDateTime> {
    match raw {
        Some(raw) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
            .with_context(|| format!("invalid date \"{}\", expected YYYY-MM-DD HH:MM", raw)),
        None => Ok(Local::now().naive_local()),
    }
}

async fn fetch_once<A: TransitApi>(api: Arc<A>, target: QueryTarget) -> FetchState {
    let mut fetcher = Fetcher::new(api);
    fetcher.set_target(target);
    fetcher.refresh();
    fetcher.wait().await;
    fetcher.state().clone()
}

async fn print_departures<A: TransitApi>(
    api: Arc<A>,
    stop: String,
    line: Option<&str>,
    compact: bool,
) -> Result<()> {
    let state = fetch_once(api, QueryTarget::Stop(stop.clone())).await;
    let group = match state.result().and_then(ResultModel::departures) {
        Some(group) => group,
        None if matches!(state, FetchState::Failed) => bail!(screens::DEPARTURES_ERROR),
        None => {
            println!("No departures at {}", stop);
            return Ok(());
        }
    };

    let lines = group.lines_matching(line);
    if lines.is_empty() {
        match line {
            Some(line) => println!("No departures for line {} at {}", line, stop),
            None => println!("No departures at {}", stop),
        }
        return Ok(());
    }

    if !compact {
        println!("{} {}", group.stop.code, group.stop.name);
    }
    for line_departures in lines {
        for departure in &line_departures.departures {
            if compact {
                println!("{}", compact_row(departure));
            } else {
                println!(
                    "{:<5} {:<30} {:<12} {:>6}",
                    line_departures.line,
                    departure.line.destination,
                    platform_label(departure).unwrap_or_default(),
                    left_time_label(departure).text
                );
            }
        }
    }
    Ok(())
}

async fn print_route<A: TransitApi>(api: Arc<A>, query: RouteQuery) -> Result<()> {
    let title = format!("{} - {}", query.from, query.to);
    let state = fetch_once(api, QueryTarget::Route(query)).await;
    let results = match state.result().and_then(ResultModel::connections) {
        Some(results) => results,
        None if matches!(state, FetchState::Failed) => bail!(screens::ROUTES_ERROR),
        None => {
            println!("No connections for {}", title);
            return Ok(());
        }
    };

    println!("{}", title);
    for connection in &results.connections {
        println!(
            "{} → {} ({})",
            format_unix_time(connection.from.departure_timestamp),
            format_unix_time(connection.to.arrival_timestamp),
            format_duration(connection.duration_minutes())
        );
        for section in &connection.sections {
            match section.kind() {
                api::SectionKind::Journey(journey) => println!(
                    "    {} {}{} → {}  {} {} → {} {} ({} stops)",
                    journey.operator.as_deref().unwrap_or(""),
                    journey.category.as_deref().unwrap_or(""),
                    journey.number.as_deref().unwrap_or(""),
                    journey.to.as_deref().unwrap_or(""),
                    format_unix_time(section.departure.departure_timestamp),
                    section.departure.name(),
                    format_unix_time(section.arrival.arrival_timestamp),
                    section.arrival.name(),
                    journey.pass_list.len().saturating_sub(1),
                ),
                api::SectionKind::Walk(walk) => println!(
                    "    walk {}→ {}",
                    walk.and_then(|w| w.duration.as_deref())
                        .map(|d| format!("({}) ", d))
                        .unwrap_or_default(),
                    section.arrival.name()
                ),
            }
        }
    }
    Ok(())
}

async fn run_tui(api: Arc<TpgClient>, stop: Option<String>, route: Option<RouteQuery>) -> Result<()> {
    // Set up panic handler to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app_controller = AppController::new(api, PreferencesStore::default_location());
    app_controller.initialize(stop, route);

    let res = run_app(&mut terminal, &mut app_controller).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

async fn run_app<A: TransitApi>(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app_controller: &mut AppController<A>,
) -> Result<()> {
    loop {
        // Apply finished requests before drawing so observers are current
        app_controller.pump();

        terminal.draw(|f| ui::render_ui(f, &app_controller.ui_app))?;

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if app_controller.handle_key_event(key.code)? {
                        break;
                    }
                }
                // Redrawn on the next iteration
                Event::Resize(_, _) => {}
                _ => {}
            }
        }

        // Yield so request tasks can make progress
        sleep(Duration::from_millis(16)).await;

        if app_controller.should_quit() {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_date_time() {
        let parsed = parse_date_time(Some("2018-07-14 08:05")).unwrap();
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2018, 7, 14).unwrap().and_hms_opt(8, 5, 0).unwrap());
        assert!(parse_date_time(Some("14.07.2018")).is_err());
    }
}
