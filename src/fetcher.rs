//! Single-outstanding-request fetcher for transit data.
//!
//! The fetcher lives on the UI task. Requests run on spawned tasks and report
//! back through a channel; `pump`/`wait` apply those completions on the UI task,
//! so state and observers are never touched from another thread.
use log::{debug, warn};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::api::{DeparturesGroup, RouteQuery, RouteResults, TransitApi};
use crate::error::FetchError;
use crate::observer::{Observer, ObserverRegistry, Subscription};

#[derive(Debug, Clone)]
pub enum QueryTarget {
    Stop(String),
    Route(RouteQuery),
}

#[derive(Debug, Clone)]
pub enum ResultModel {
    Departures(DeparturesGroup),
    Connections(RouteResults),
}

impl ResultModel {
    pub fn is_empty(&self) -> bool {
        match self {
            ResultModel::Departures(group) => group.lines.is_empty(),
            ResultModel::Connections(results) => results.connections.is_empty(),
        }
    }

    pub fn departures(&self) -> Option<&DeparturesGroup> {
        match self {
            ResultModel::Departures(group) => Some(group),
            ResultModel::Connections(_) => None,
        }
    }

    pub fn connections(&self) -> Option<&RouteResults> {
        match self {
            ResultModel::Connections(results) => Some(results),
            ResultModel::Departures(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Nothing to show: either nothing was fetched yet or the provider returned no entries.
    NoResults,
    Loading,
    Ok,
    Error,
}

/// A result only exists in the `Ready` state.
#[derive(Debug, Clone)]
pub enum FetchState {
    NoResults,
    Loading,
    Ready(ResultModel),
    Failed,
}

impl FetchState {
    pub fn status(&self) -> FetchStatus {
        match self {
            FetchState::NoResults => FetchStatus::NoResults,
            FetchState::Loading => FetchStatus::Loading,
            FetchState::Ready(_) => FetchStatus::Ok,
            FetchState::Failed => FetchStatus::Error,
        }
    }

    pub fn result(&self) -> Option<&ResultModel> {
        match self {
            FetchState::Ready(result) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Completion {
    generation: u64,
    result: Result<ResultModel, FetchError>,
}

/// The outstanding request of the current generation.
struct InFlight {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

enum Woken {
    Completion(Option<Completion>),
    Finished(Result<(), JoinError>),
}

pub struct Fetcher<A: TransitApi> {
    api: Arc<A>,
    target: Option<QueryTarget>,
    state: FetchState,
    generation: u64,
    in_flight: Option<InFlight>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    observers: ObserverRegistry<FetchState>,
}

impl<A: TransitApi> Fetcher<A> {
    pub fn new(api: Arc<A>) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            api,
            target: None,
            state: FetchState::NoResults,
            generation: 0,
            in_flight: None,
            completions_tx,
            completions_rx,
            observers: ObserverRegistry::new(),
        }
    }

    #[must_use = "dropping the subscription unregisters the observer"]
    pub fn subscribe<O>(&self, observer: Rc<RefCell<O>>) -> Subscription
    where
        O: Observer<FetchState> + 'static,
    {
        self.observers.subscribe(observer)
    }

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn status(&self) -> FetchStatus {
        self.state.status()
    }

    pub fn result(&self) -> Option<&ResultModel> {
        self.state.result()
    }

    /// Replaces the target without fetching. Any request for the old target is
    /// cancelled and its result dropped.
    pub fn set_target(&mut self, target: QueryTarget) {
        debug!("Fetcher target set to {:?}", target);
        self.target = Some(target);
        self.supersede();
        if !matches!(self.state, FetchState::NoResults) {
            self.transition(FetchState::NoResults);
        }
    }

    pub fn refresh(&mut self) {
        let Some(target) = self.target.clone() else {
            warn!("Refresh requested without a target");
            self.supersede();
            self.transition(FetchState::Failed);
            return;
        };

        let generation = self.supersede();
        self.transition(FetchState::Loading);

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let api = Arc::clone(&self.api);
        let tx = self.completions_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    debug!("Request generation {} cancelled", generation);
                }
                result = fetch(api.as_ref(), &target) => {
                    // The receiver only goes away with the fetcher itself.
                    let _ = tx.send(Completion { generation, result });
                }
            }
        });
        self.in_flight = Some(InFlight { token, handle });
    }

    /// Applies every completion that has arrived so far. Returns how many were
    /// received, stale ones included.
    pub fn pump(&mut self) -> usize {
        let mut received = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.apply(completion);
            received += 1;
        }
        self.reap_finished_request();
        received
    }

    /// Waits until the current request, if any, has completed and been applied.
    pub async fn wait(&mut self) {
        loop {
            let woken = {
                let Some(request) = self.in_flight.as_mut() else {
                    break;
                };
                tokio::select! {
                    biased;
                    completion = self.completions_rx.recv() => Woken::Completion(completion),
                    joined = &mut request.handle => Woken::Finished(joined),
                }
            };

            match woken {
                Woken::Completion(Some(completion)) => self.apply(completion),
                Woken::Completion(None) => break,
                Woken::Finished(joined) => {
                    if let Err(e) = joined {
                        warn!("Request task for generation {} failed: {}", self.generation, e);
                    }
                    // A completion sent before the task ended is already queued.
                    self.pump();
                }
            }
        }
    }

    /// A request task that ended without reporting (it panicked) fails the fetch.
    fn reap_finished_request(&mut self) {
        let finished = self.in_flight.as_ref().is_some_and(|r| r.handle.is_finished());
        if finished {
            warn!("Request generation {} ended without a result", self.generation);
            self.in_flight = None;
            self.transition(FetchState::Failed);
        }
    }

    /// Cancels the outstanding request and starts a new generation.
    fn supersede(&mut self) -> u64 {
        if let Some(request) = self.in_flight.take() {
            request.token.cancel();
        }
        self.generation += 1;
        self.generation
    }

    fn apply(&mut self, completion: Completion) {
        if completion.generation != self.generation || self.in_flight.is_none() {
            debug!(
                "Discarding stale completion (generation {}, current {})",
                completion.generation, self.generation
            );
            return;
        }
        self.in_flight = None;

        let next = match completion.result {
            Ok(result) if result.is_empty() => FetchState::NoResults,
            Ok(result) => FetchState::Ready(result),
            Err(e) => {
                warn!("Fetch failed: {}", e);
                FetchState::Failed
            }
        };
        self.transition(next);
    }

    fn transition(&mut self, next: FetchState) {
        debug!("Fetch status changing from {:?} to {:?}", self.state.status(), next.status());
        self.state = next;
        self.observers.notify(&self.state);
    }
}

async fn fetch<A: TransitApi>(api: &A, target: &QueryTarget) -> Result<ResultModel, FetchError> {
    match target {
        QueryTarget::Stop(code) => api.next_departures(code).await.map(ResultModel::Departures),
        QueryTarget::Route(query) => api.connections(query).await.map(ResultModel::Connections),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::{Departure, LeftTime, LineInfo, Reliability, StopInfo};
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted API: each call pops the next queued response.
    #[derive(Default)]
    pub(crate) struct FakeApi {
        departures: Mutex<VecDeque<Result<DeparturesGroup, FetchError>>>,
        connections: Mutex<VecDeque<Result<RouteResults, FetchError>>>,
        pub(crate) calls: AtomicUsize,
    }

    impl FakeApi {
        pub(crate) fn with_departures(responses: Vec<Result<DeparturesGroup, FetchError>>) -> Self {
            Self {
                departures: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        pub(crate) fn with_connections(responses: Vec<Result<RouteResults, FetchError>>) -> Self {
            Self {
                connections: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TransitApi for FakeApi {
        async fn next_departures(&self, _stop_code: &str) -> Result<DeparturesGroup, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.departures
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport("no scripted response".to_string())))
        }

        async fn connections(&self, _query: &RouteQuery) -> Result<RouteResults, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.connections
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Transport("no scripted response".to_string())))
        }
    }

    pub(crate) fn departure(line: &str, destination: &str, minutes: u32) -> Departure {
        Departure {
            line: LineInfo {
                code: line.to_string(),
                destination: destination.to_string(),
            },
            platform: None,
            left_time: LeftTime::Minutes(minutes),
            timestamp: None,
            reliability: Reliability::Reliable,
        }
    }

    pub(crate) fn group(stop: &str, departures: Vec<Departure>) -> DeparturesGroup {
        DeparturesGroup::from_departures(
            StopInfo {
                code: stop.to_string(),
                name: stop.to_string(),
            },
            departures,
        )
    }

    #[derive(Default)]
    pub(crate) struct StatusRecorder {
        pub(crate) statuses: Vec<FetchStatus>,
        pub(crate) mismatched: bool,
    }

    impl Observer<FetchState> for StatusRecorder {
        fn on_result_changed(&mut self, state: &FetchState) {
            let status = state.status();
            self.mismatched |= (status == FetchStatus::Ok) != state.result().is_some();
            self.statuses.push(status);
        }
    }

    #[tokio::test]
    async fn test_stop_refresh_reaches_ok() {
        let api = Arc::new(FakeApi::with_departures(vec![Ok(group(
            "1234",
            vec![departure("12", "Carouge", 3), departure("12", "Carouge", 11)],
        ))]));
        let mut fetcher = Fetcher::new(api.clone());
        let recorder = Rc::new(RefCell::new(StatusRecorder::default()));
        let _subscription = fetcher.subscribe(recorder.clone());

        assert_eq!(fetcher.status(), FetchStatus::NoResults);
        fetcher.set_target(QueryTarget::Stop("1234".to_string()));
        fetcher.refresh();
        fetcher.wait().await;

        assert_eq!(recorder.borrow().statuses, vec![FetchStatus::Loading, FetchStatus::Ok]);
        assert!(!recorder.borrow().mismatched);
        let departures = fetcher.result().and_then(ResultModel::departures).unwrap();
        assert_eq!(departures.lines.len(), 1);
        assert_eq!(departures.lines[0].departures.len(), 2);
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_target_fails_without_request() {
        let api = Arc::new(FakeApi::default());
        let mut fetcher = Fetcher::new(api.clone());
        let recorder = Rc::new(RefCell::new(StatusRecorder::default()));
        let _subscription = fetcher.subscribe(recorder.clone());

        fetcher.refresh();
        fetcher.wait().await;

        assert_eq!(recorder.borrow().statuses, vec![FetchStatus::Error]);
        assert!(fetcher.result().is_none());
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_error() {
        let api = Arc::new(FakeApi::with_departures(vec![Err(FetchError::Transport(
            "connection refused".to_string(),
        ))]));
        let mut fetcher = Fetcher::new(api);
        let recorder = Rc::new(RefCell::new(StatusRecorder::default()));
        let _subscription = fetcher.subscribe(recorder.clone());

        fetcher.set_target(QueryTarget::Stop("1234".to_string()));
        fetcher.refresh();
        fetcher.wait().await;

        assert_eq!(recorder.borrow().statuses, vec![FetchStatus::Loading, FetchStatus::Error]);
        assert!(fetcher.result().is_none());
    }

    #[tokio::test]
    async fn test_empty_response_is_no_results() {
        let api = Arc::new(FakeApi::with_departures(vec![Ok(group("1234", Vec::new()))]));
        let mut fetcher = Fetcher::new(api);
        let recorder = Rc::new(RefCell::new(StatusRecorder::default()));
        let _subscription = fetcher.subscribe(recorder.clone());

        fetcher.set_target(QueryTarget::Stop("1234".to_string()));
        fetcher.refresh();
        fetcher.wait().await;

        assert_eq!(recorder.borrow().statuses, vec![FetchStatus::Loading, FetchStatus::NoResults]);
        assert!(fetcher.result().is_none());
    }

    #[tokio::test]
    async fn test_result_cleared_when_reloading() {
        let api = Arc::new(FakeApi::with_departures(vec![
            Ok(group("1234", vec![departure("3", "Champel", 2)])),
            Err(FetchError::Decode("bad json".to_string())),
        ]));
        let mut fetcher = Fetcher::new(api);
        let recorder = Rc::new(RefCell::new(StatusRecorder::default()));
        let _subscription = fetcher.subscribe(recorder.clone());

        fetcher.set_target(QueryTarget::Stop("1234".to_string()));
        fetcher.refresh();
        fetcher.wait().await;
        fetcher.refresh();
        assert!(fetcher.result().is_none());
        fetcher.wait().await;

        let recorder = recorder.borrow();
        assert_eq!(
            recorder.statuses,
            vec![FetchStatus::Loading, FetchStatus::Ok, FetchStatus::Loading, FetchStatus::Error]
        );
        assert!(!recorder.mismatched);
    }

    #[tokio::test]
    async fn test_superseded_request_is_discarded() {
        let api = Arc::new(FakeApi::with_departures(vec![Ok(group(
            "1234",
            vec![departure("12", "Carouge", 3)],
        ))]));
        let mut fetcher = Fetcher::new(api.clone());
        let recorder = Rc::new(RefCell::new(StatusRecorder::default()));
        let _subscription = fetcher.subscribe(recorder.clone());

        fetcher.set_target(QueryTarget::Stop("1234".to_string()));
        fetcher.refresh();
        fetcher.refresh();
        fetcher.wait().await;

        // A late completion from the first generation must not overwrite the newer state.
        fetcher
            .completions_tx
            .send(Completion {
                generation: 2,
                result: Err(FetchError::Transport("late".to_string())),
            })
            .unwrap();
        assert_eq!(fetcher.pump(), 1);

        assert_eq!(fetcher.status(), FetchStatus::Ok);
        assert_eq!(
            recorder.borrow().statuses,
            vec![FetchStatus::Loading, FetchStatus::Loading, FetchStatus::Ok]
        );
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_new_target_drops_previous_result() {
        let api = Arc::new(FakeApi::with_departures(vec![Ok(group(
            "1234",
            vec![departure("12", "Carouge", 3)],
        ))]));
        let mut fetcher = Fetcher::new(api);
        fetcher.set_target(QueryTarget::Stop("1234".to_string()));
        fetcher.refresh();
        fetcher.wait().await;
        assert_eq!(fetcher.status(), FetchStatus::Ok);

        fetcher.set_target(QueryTarget::Stop("CVIN".to_string()));
        assert_eq!(fetcher.status(), FetchStatus::NoResults);
        assert!(fetcher.result().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribed_observer_not_notified() {
        let api = Arc::new(FakeApi::with_departures(vec![Ok(group(
            "1234",
            vec![departure("12", "Carouge", 3)],
        ))]));
        let mut fetcher = Fetcher::new(api);
        let recorder = Rc::new(RefCell::new(StatusRecorder::default()));
        let subscription = fetcher.subscribe(recorder.clone());

        fetcher.set_target(QueryTarget::Stop("1234".to_string()));
        fetcher.refresh();
        drop(subscription);
        fetcher.wait().await;

        assert_eq!(recorder.borrow().statuses, vec![FetchStatus::Loading]);
    }

    struct PanickingApi;

    impl TransitApi for PanickingApi {
        async fn next_departures(&self, stop_code: &str) -> Result<DeparturesGroup, FetchError> {
            panic!("decoder blew up on {}", stop_code);
        }

        async fn connections(&self, _query: &RouteQuery) -> Result<RouteResults, FetchError> {
            panic!("decoder blew up");
        }
    }

    #[tokio::test]
    async fn test_panicking_request_fails_instead_of_hanging() {
        let mut fetcher = Fetcher::new(Arc::new(PanickingApi));
        let recorder = Rc::new(RefCell::new(StatusRecorder::default()));
        let _subscription = fetcher.subscribe(recorder.clone());

        fetcher.set_target(QueryTarget::Stop("1234".to_string()));
        fetcher.refresh();
        tokio::time::timeout(std::time::Duration::from_secs(5), fetcher.wait())
            .await
            .expect("wait returned");

        assert_eq!(recorder.borrow().statuses, vec![FetchStatus::Loading, FetchStatus::Error]);
        assert!(fetcher.result().is_none());
    }

    #[tokio::test]
    async fn test_pump_notices_panicked_request() {
        let mut fetcher = Fetcher::new(Arc::new(PanickingApi));
        fetcher.set_target(QueryTarget::Stop("1234".to_string()));
        fetcher.refresh();

        for _ in 0..100 {
            tokio::task::yield_now().await;
            fetcher.pump();
            if fetcher.status() != FetchStatus::Loading {
                break;
            }
        }
        assert_eq!(fetcher.status(), FetchStatus::Error);
    }

    #[tokio::test]
    async fn test_route_refresh() {
        let results: RouteResults = serde_json::from_str(
            r#"{"connections": [{"duration": "00d00:12:00", "sections": []}]}"#,
        )
        .unwrap();
        let api = Arc::new(FakeApi::with_connections(vec![Ok(results)]));
        let mut fetcher = Fetcher::new(api);

        fetcher.set_target(QueryTarget::Route(RouteQuery {
            from: "Cornavin".to_string(),
            to: "Bel-Air".to_string(),
            date_time: NaiveDate::from_ymd_opt(2018, 7, 14).unwrap().and_hms_opt(8, 0, 0).unwrap(),
            arrival_time: false,
        }));
        fetcher.refresh();
        fetcher.wait().await;

        let connections = fetcher.result().and_then(ResultModel::connections).unwrap();
        assert_eq!(connections.connections.len(), 1);
    }
}
