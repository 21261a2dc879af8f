use anyhow::Result;
use chrono::Local;
use crossterm::event::KeyCode;
use log::{debug, warn};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::actions::Action;
use crate::api::{RouteQuery, TransitApi};
use crate::fetcher::{Fetcher, QueryTarget};
use crate::observer::{Observer, Subscription};
use crate::prefs::{Preferences, PreferencesStore, WHATS_NEW};
use crate::screens::{ConnectionDetailScreen, DeparturesScreen};
use crate::ui::{Tab, UIState as UIApp};

/// Owns both fetchers and wires the screens to them.
pub struct AppController<A: TransitApi> {
    pub ui_app: UIApp,
    departures: Fetcher<A>,
    routes: Fetcher<A>,
    prefs: Preferences,
    store: PreferencesStore,
    _lines_subscription: Subscription,
    _routes_subscription: Subscription,
    departures_subscription: Option<Subscription>,
    connection_subscription: Option<Subscription>,
}

impl<A: TransitApi> AppController<A> {
    pub fn new(api: Arc<A>, store: PreferencesStore) -> Self {
        debug!("Preferences at {}", store.path().display());
        let mut prefs = store.load();
        let mut ui_app = UIApp::new(
            Tab::from_index(prefs.selected_tab),
            prefs.favorite_stops.clone(),
            prefs.favorite_routes.clone(),
        );

        if prefs.mark_version_seen(env!("CARGO_PKG_VERSION")) {
            ui_app.status_message = WHATS_NEW.to_string();
            if let Err(e) = store.save(&prefs) {
                warn!("Failed to save preferences: {:#}", e);
            }
        }

        let departures = Fetcher::new(Arc::clone(&api));
        let routes = Fetcher::new(api);
        let _lines_subscription = departures.subscribe(ui_app.lines.clone());
        let _routes_subscription = routes.subscribe(ui_app.routes.clone());

        Self {
            ui_app,
            departures,
            routes,
            prefs,
            store,
            _lines_subscription,
            _routes_subscription,
            departures_subscription: None,
            connection_subscription: None,
        }
    }

    /// Loads the initial stop (or the first favourite) and route.
    pub fn initialize(&mut self, stop: Option<String>, route: Option<RouteQuery>) {
        if let Some(stop) = stop.or_else(|| self.prefs.favorite_stops.first().cloned()) {
            self.show_stop(stop);
        }
        if let Some(route) = route {
            self.search_route(route);
        }
    }

    /// Applies finished requests; call once per UI tick.
    pub fn pump(&mut self) {
        self.departures.pump();
        self.routes.pump();
    }

    pub fn should_quit(&self) -> bool {
        self.ui_app.should_quit
    }

    pub fn handle_key_event(&mut self, key_code: KeyCode) -> Result<bool> {
        let Some(action) = Action::from_key(key_code) else {
            return Ok(false);
        };
        debug!("Handling {:?}", action);

        match action {
            Action::Quit => {
                self.ui_app.quit();
                self.save_prefs();
                return Ok(true);
            }
            Action::SwitchTab => {
                self.ui_app.tab = self.ui_app.tab.toggled();
                self.prefs.selected_tab = self.ui_app.tab.index();
                self.save_prefs();
            }
            Action::Up => self.move_selection(false),
            Action::Down => self.move_selection(true),
            Action::Open => self.open_selected(),
            Action::Back => match self.ui_app.tab {
                Tab::Departures => self.close_line(),
                Tab::Routes => self.close_connection(),
            },
            Action::Reload => match self.ui_app.tab {
                Tab::Departures => self.departures.refresh(),
                Tab::Routes => self.routes.refresh(),
            },
            Action::ReverseRoute => {
                if let Some(route) = self.ui_app.route.as_ref().map(RouteQuery::reversed) {
                    self.search_route(route);
                }
            }
            Action::ToggleArrival => {
                if let Some(mut route) = self.ui_app.route.clone() {
                    route.arrival_time = !route.arrival_time;
                    self.search_route(route);
                }
            }
            Action::Now => {
                if let Some(mut route) = self.ui_app.route.clone() {
                    route.date_time = Local::now().naive_local();
                    self.search_route(route);
                }
            }
            Action::ToggleFavorite if self.ui_app.tab == Tab::Routes => {
                if let Some(route) = self.ui_app.route.clone() {
                    let starred = self.prefs.toggle_favorite_route(&route.from, &route.to);
                    let name = format!("{} - {}", route.from, route.to);
                    self.ui_app.status_message = if starred {
                        format!("{} added to favourites", name)
                    } else {
                        format!("{} removed from favourites", name)
                    };
                    self.favorites_changed();
                }
            }
            Action::ToggleFavorite => {
                if let Some(stop) = self.ui_app.stop_code.clone() {
                    let starred = self.prefs.toggle_favorite(&stop);
                    self.ui_app.status_message = if starred {
                        format!("{} added to favourites", stop)
                    } else {
                        format!("{} removed from favourites", stop)
                    };
                    self.favorites_changed();
                }
            }
            Action::MoveFavoriteUp | Action::MoveFavoriteDown => {
                let position = self
                    .ui_app
                    .stop_code
                    .as_ref()
                    .and_then(|stop| self.prefs.favorite_stops.iter().position(|s| s == stop));
                if let Some(from) = position {
                    let to = if action == Action::MoveFavoriteUp {
                        from.saturating_sub(1)
                    } else {
                        from + 1
                    };
                    self.prefs.move_favorite(from, to);
                    self.favorites_changed();
                }
            }
            Action::ResetFavoritesOrder => {
                self.prefs.reset_favorites_order();
                self.ui_app.status_message = "Favourites sorted alphabetically".to_string();
                self.favorites_changed();
            }
            Action::SelectFavorite(index) if self.ui_app.tab == Tab::Routes => {
                if let Some(favorite) = self.prefs.favorite_routes.get(index).cloned() {
                    self.search_route(RouteQuery {
                        from: favorite.from,
                        to: favorite.to,
                        date_time: Local::now().naive_local(),
                        arrival_time: false,
                    });
                }
            }
            Action::SelectFavorite(index) => {
                if let Some(stop) = self.prefs.favorite_stops.get(index).cloned() {
                    self.ui_app.tab = Tab::Departures;
                    self.show_stop(stop);
                }
            }
        }
        Ok(false)
    }

    fn show_stop(&mut self, stop: String) {
        self.close_line();
        self.ui_app.stop_code = Some(stop.clone());
        self.departures.set_target(QueryTarget::Stop(stop));
        self.departures.refresh();
    }

    fn search_route(&mut self, route: RouteQuery) {
        self.close_connection();
        self.ui_app.routes.borrow_mut().has_route = true;
        self.ui_app.route = Some(route.clone());
        self.routes.set_target(QueryTarget::Route(route));
        self.routes.refresh();
    }

    fn move_selection(&mut self, down: bool) {
        match self.ui_app.tab {
            Tab::Departures => match &self.ui_app.departures {
                Some(screen) if down => screen.borrow_mut().next(),
                Some(screen) => screen.borrow_mut().previous(),
                None if down => self.ui_app.lines.borrow_mut().next(),
                None => self.ui_app.lines.borrow_mut().previous(),
            },
            Tab::Routes => match &self.ui_app.connection {
                Some(screen) if down => screen.borrow_mut().next(),
                Some(screen) => screen.borrow_mut().previous(),
                None if down => self.ui_app.routes.borrow_mut().next(),
                None => self.ui_app.routes.borrow_mut().previous(),
            },
        }
    }

    fn open_selected(&mut self) {
        match self.ui_app.tab {
            Tab::Routes => {
                if let Some(screen) = &self.ui_app.connection {
                    if let Some(message) = screen.borrow().activate_selected() {
                        self.ui_app.status_message = message;
                    }
                    return;
                }
                let index = self.ui_app.routes.borrow().selected_index();
                if let Some(index) = index {
                    self.open_connection(index);
                }
            }
            Tab::Departures => {
                if let Some(screen) = &self.ui_app.departures {
                    if let Some(message) = screen.borrow().activate_selected() {
                        self.ui_app.status_message = message;
                    }
                    return;
                }
                let line = self.ui_app.lines.borrow().selected_line().map(str::to_string);
                if let Some(line) = line {
                    self.open_line(line);
                }
            }
        }
    }

    /// Pushes the departures screen for `line`, seeded with the current result.
    fn open_line(&mut self, line: String) {
        let screen = Rc::new(RefCell::new(DeparturesScreen::new(line)));
        screen.borrow_mut().on_result_changed(self.departures.state());
        self.departures_subscription = Some(self.departures.subscribe(screen.clone()));
        self.ui_app.departures = Some(screen);
    }

    fn close_line(&mut self) {
        // Unsubscribes the screen before it goes away.
        self.departures_subscription = None;
        self.ui_app.departures = None;
    }

    /// Pushes the detail of the `index`-th connection, seeded with the current result.
    fn open_connection(&mut self, index: usize) {
        let screen = Rc::new(RefCell::new(ConnectionDetailScreen::new(index)));
        screen.borrow_mut().on_result_changed(self.routes.state());
        self.connection_subscription = Some(self.routes.subscribe(screen.clone()));
        self.ui_app.connection = Some(screen);
    }

    fn close_connection(&mut self) {
        self.connection_subscription = None;
        self.ui_app.connection = None;
    }

    fn favorites_changed(&mut self) {
        self.ui_app.favorites = self.prefs.favorite_stops.clone();
        self.ui_app.favorite_routes = self.prefs.favorite_routes.clone();
        self.save_prefs();
    }

    fn save_prefs(&mut self) {
        if let Err(e) = self.store.save(&self.prefs) {
            warn!("Failed to save preferences: {:#}", e);
            self.ui_app.status_message = "Could not save preferences".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RouteResults;
    use crate::fetcher::tests::{departure, group, FakeApi};
    use crate::fetcher::FetchStatus;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn store(name: &str) -> PreferencesStore {
        let dir: PathBuf = std::env::temp_dir().join(format!("tpg-tui-app-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        PreferencesStore::new(dir.join("preferences.json"))
    }

    fn cornavin_to_bel_air() -> RouteQuery {
        RouteQuery {
            from: "Cornavin".to_string(),
            to: "Bel-Air".to_string(),
            date_time: NaiveDate::from_ymd_opt(2018, 7, 14).unwrap().and_hms_opt(8, 0, 0).unwrap(),
            arrival_time: false,
        }
    }

    fn two_connections() -> RouteResults {
        serde_json::from_str(
            r#"{"connections": [
                {"duration": "00d00:10:00", "sections": [
                    {"journey": {"number": "12", "category": "T", "to": "Carouge"}}
                ]},
                {"duration": "00d00:14:00", "sections": [
                    {"walk": {"duration": "00d00:14:00"}}
                ]}
            ]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lines_and_departures_screens_share_one_fetch() {
        let api = Arc::new(FakeApi::with_departures(vec![
            Ok(group("CVIN", vec![departure("12", "Carouge", 3), departure("14", "Meyrin", 6)])),
            Ok(group("CVIN", vec![departure("12", "Carouge", 1)])),
        ]));
        let mut app = AppController::new(api.clone(), store("shared"));
        app.initialize(Some("CVIN".to_string()), None);
        app.departures.wait().await;

        assert_eq!(app.ui_app.lines.borrow().rows.len(), 2);
        app.handle_key_event(KeyCode::Enter).unwrap();
        let screen = app.ui_app.departures.clone().unwrap();
        assert_eq!(screen.borrow().rows.len(), 1);
        assert_eq!(screen.borrow().rows[0].left.text, "3'");

        app.handle_key_event(KeyCode::Char('r')).unwrap();
        assert!(screen.borrow().rows.is_empty());
        app.departures.wait().await;

        assert_eq!(screen.borrow().rows[0].left.text, "1'");
        assert_eq!(app.ui_app.lines.borrow().rows.len(), 1);
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn test_closed_departures_screen_stops_updating() {
        let api = Arc::new(FakeApi::with_departures(vec![
            Ok(group("CVIN", vec![departure("12", "Carouge", 3)])),
            Err(crate::error::FetchError::Transport("offline".to_string())),
        ]));
        let mut app = AppController::new(api, store("closed"));
        app.initialize(Some("CVIN".to_string()), None);
        app.departures.wait().await;

        app.handle_key_event(KeyCode::Enter).unwrap();
        let screen = app.ui_app.departures.clone().unwrap();
        app.handle_key_event(KeyCode::Esc).unwrap();
        assert!(app.ui_app.departures.is_none());

        app.handle_key_event(KeyCode::Char('r')).unwrap();
        app.departures.wait().await;

        assert_eq!(app.departures.status(), FetchStatus::Error);
        assert_eq!(screen.borrow().status, FetchStatus::Ok);
        assert_eq!(app.ui_app.lines.borrow().status, FetchStatus::Error);
    }

    #[tokio::test]
    async fn test_reload_without_stop_is_an_error() {
        let api = Arc::new(FakeApi::default());
        let mut app = AppController::new(api.clone(), store("nostop"));
        app.initialize(None, None);

        app.handle_key_event(KeyCode::Char('r')).unwrap();

        assert_eq!(app.ui_app.lines.borrow().status, FetchStatus::Error);
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_reverse_route_searches_again() {
        let api = Arc::new(FakeApi::with_connections(vec![Ok(two_connections()), Ok(two_connections())]));
        let mut app = AppController::new(api.clone(), store("route"));
        app.initialize(None, Some(cornavin_to_bel_air()));
        app.routes.wait().await;
        assert_eq!(app.ui_app.routes.borrow().rows.len(), 2);

        app.handle_key_event(KeyCode::Char('x')).unwrap();
        app.routes.wait().await;

        let route = app.ui_app.route.clone().unwrap();
        assert_eq!((route.from.as_str(), route.to.as_str()), ("Bel-Air", "Cornavin"));
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn test_favorites_and_tab_are_persisted() {
        let api = Arc::new(FakeApi::with_departures(vec![
            Ok(group("CVIN", vec![departure("12", "Carouge", 3)])),
        ]));
        let store_dir = store("prefs");
        let path = store_dir.path().to_path_buf();
        let mut app = AppController::new(api, store_dir);
        assert_eq!(app.ui_app.status_message, WHATS_NEW);

        app.initialize(Some("CVIN".to_string()), None);
        app.handle_key_event(KeyCode::Char('f')).unwrap();
        app.handle_key_event(KeyCode::Tab).unwrap();
        app.departures.wait().await;

        let saved = PreferencesStore::new(path).load();
        assert_eq!(saved.favorite_stops, vec!["CVIN"]);
        assert_eq!(saved.selected_tab, 1);
        assert_eq!(saved.last_version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_arrival_toggle_and_now_search_again() {
        let api = Arc::new(FakeApi::with_connections(vec![
            Ok(two_connections()),
            Ok(two_connections()),
            Ok(two_connections()),
        ]));
        let mut app = AppController::new(api.clone(), store("arrival"));
        app.initialize(None, Some(cornavin_to_bel_air()));
        app.routes.wait().await;

        app.handle_key_event(KeyCode::Char('a')).unwrap();
        app.routes.wait().await;
        let route = app.ui_app.route.clone().unwrap();
        assert!(route.arrival_time);
        assert_eq!(route.date_time, cornavin_to_bel_air().date_time);
        assert_eq!(api.call_count(), 2);

        app.handle_key_event(KeyCode::Char('n')).unwrap();
        app.routes.wait().await;
        let route = app.ui_app.route.clone().unwrap();
        assert!(route.arrival_time);
        assert!(route.date_time > cornavin_to_bel_air().date_time);
        assert_eq!(api.call_count(), 3);
        assert_eq!(app.routes.status(), FetchStatus::Ok);
    }

    #[tokio::test]
    async fn test_move_and_reset_favorite_stops() {
        let api = Arc::new(FakeApi::default());
        let mut app = AppController::new(api, store("reorder"));
        app.initialize(Some("CVIN".to_string()), None);
        app.handle_key_event(KeyCode::Char('f')).unwrap();
        app.show_stop("BAIR".to_string());
        app.handle_key_event(KeyCode::Char('f')).unwrap();
        assert_eq!(app.ui_app.favorites, vec!["CVIN", "BAIR"]);

        app.handle_key_event(KeyCode::Char('[')).unwrap();
        assert_eq!(app.ui_app.favorites, vec!["BAIR", "CVIN"]);
        app.handle_key_event(KeyCode::Char(']')).unwrap();
        assert_eq!(app.ui_app.favorites, vec!["CVIN", "BAIR"]);

        app.handle_key_event(KeyCode::Char('o')).unwrap();
        assert_eq!(app.ui_app.favorites, vec!["BAIR", "CVIN"]);

        app.handle_key_event(KeyCode::Char('2')).unwrap();
        assert_eq!(app.ui_app.stop_code.as_deref(), Some("CVIN"));
    }

    #[tokio::test]
    async fn test_enter_opens_connection_detail() {
        let api = Arc::new(FakeApi::with_connections(vec![
            Ok(two_connections()),
            Err(crate::error::FetchError::Transport("offline".to_string())),
        ]));
        let mut app = AppController::new(api.clone(), store("detail"));
        app.initialize(None, Some(cornavin_to_bel_air()));
        app.handle_key_event(KeyCode::Tab).unwrap();
        app.routes.wait().await;

        app.handle_key_event(KeyCode::Down).unwrap();
        app.handle_key_event(KeyCode::Enter).unwrap();
        let screen = app.ui_app.connection.clone().unwrap();
        assert_eq!(screen.borrow().index, 1);
        assert_eq!(screen.borrow().rows[0].summary, "Walk (00d00:14:00)");
        assert_eq!(api.call_count(), 1);

        app.handle_key_event(KeyCode::Enter).unwrap();
        assert_eq!(app.ui_app.status_message, "Walk (00d00:14:00): no intermediate stops");

        app.handle_key_event(KeyCode::Esc).unwrap();
        assert!(app.ui_app.connection.is_none());
        app.handle_key_event(KeyCode::Char('r')).unwrap();
        app.routes.wait().await;
        assert_eq!(screen.borrow().status, FetchStatus::Ok);
        assert_eq!(app.ui_app.routes.borrow().status, FetchStatus::Error);
    }

    #[tokio::test]
    async fn test_favorite_route_is_searched_now() {
        let api = Arc::new(FakeApi::with_connections(vec![
            Ok(two_connections()),
            Ok(two_connections()),
            Ok(two_connections()),
        ]));
        let path = {
            let store = store("favroute");
            let path = store.path().to_path_buf();
            let mut app = AppController::new(api.clone(), store);
            let mut arrival = cornavin_to_bel_air();
            arrival.arrival_time = true;
            app.initialize(None, Some(arrival));
            app.handle_key_event(KeyCode::Tab).unwrap();
            app.handle_key_event(KeyCode::Char('f')).unwrap();
            app.handle_key_event(KeyCode::Char('x')).unwrap();
            assert_eq!(app.ui_app.route.as_ref().unwrap().from, "Bel-Air");

            app.handle_key_event(KeyCode::Char('1')).unwrap();
            app.routes.wait().await;
            let route = app.ui_app.route.clone().unwrap();
            assert_eq!((route.from.as_str(), route.to.as_str()), ("Cornavin", "Bel-Air"));
            assert!(!route.arrival_time);
            assert!(route.date_time > cornavin_to_bel_air().date_time);
            assert_eq!(app.routes.status(), FetchStatus::Ok);
            path
        };

        let saved = PreferencesStore::new(path).load();
        assert_eq!(saved.favorite_routes.len(), 1);
        assert!(saved.is_favorite_route("Cornavin", "Bel-Air"));
    }

    #[tokio::test]
    async fn test_reload_without_route_is_invalid() {
        let api = Arc::new(FakeApi::default());
        let mut app = AppController::new(api.clone(), store("noroute"));
        app.initialize(None, None);
        app.handle_key_event(KeyCode::Tab).unwrap();

        app.handle_key_event(KeyCode::Char('r')).unwrap();

        assert_eq!(app.ui_app.routes.borrow().message(), Some(crate::screens::INVALID_ROUTE));
        assert_eq!(api.call_count(), 0);
    }
}
