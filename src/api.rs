use chrono::{DateTime, FixedOffset, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Deserializer};
use std::cmp::Ordering;
use std::future::Future;

use crate::config::Config;
use crate::error::FetchError;

/// Projection sent to the routing API so it only returns what the screens show.
pub const CONNECTION_FIELDS: [&str; 23] = [
    "connections/duration",
    "connections/from/station/id",
    "connections/from/station/name",
    "connections/from/station/coordinate",
    "connections/from/departureTimestamp",
    "connections/to/station/id",
    "connections/to/station/name",
    "connections/to/station/coordinate",
    "connections/to/arrivalTimestamp",
    "connections/sections/walk",
    "connections/sections/journey/number",
    "connections/sections/journey/operator",
    "connections/sections/journey/category",
    "connections/sections/journey/to",
    "connections/sections/journey/passList",
    "connections/sections/departure/station/name",
    "connections/sections/departure/station/id",
    "connections/sections/departure/station/coordinate",
    "connections/sections/departure/departureTimestamp",
    "connections/sections/arrival/station/name",
    "connections/sections/arrival/station/id",
    "connections/sections/arrival/station/coordinate",
    "connections/sections/arrival/arrivalTimestamp",
];

pub const CONNECTION_LIMIT: u32 = 6;

// --- tpg departures ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeftTime {
    Minutes(u32),
    /// More than an hour away; only the timestamp is meaningful.
    MoreThanAnHour,
    /// No further service today.
    NoMore,
    #[default]
    Unknown,
}

impl LeftTime {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "&gt;1h" | ">1h" => LeftTime::MoreThanAnHour,
            "no more" => LeftTime::NoMore,
            other => other.parse().map(LeftTime::Minutes).unwrap_or(LeftTime::Unknown),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Theoretical,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Departure {
    pub line: LineInfo,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(rename = "waitingTime", default, deserialize_with = "deserialize_left_time")]
    pub left_time: LeftTime,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default = "default_reliability", deserialize_with = "deserialize_reliability")]
    pub reliability: Reliability,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineInfo {
    #[serde(rename = "lineCode")]
    pub code: String,
    #[serde(rename = "destinationName", default)]
    pub destination: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopInfo {
    #[serde(rename = "stopCode", default)]
    pub code: String,
    #[serde(rename = "stopName", default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct DeparturesResponse {
    #[serde(default)]
    stop: StopInfo,
    #[serde(default)]
    departures: Vec<Departure>,
}

#[derive(Debug, Clone)]
pub struct LineDepartures {
    pub line: String,
    pub departures: Vec<Departure>,
}

/// Departures at one stop, grouped by line.
#[derive(Debug, Clone)]
pub struct DeparturesGroup {
    pub stop: StopInfo,
    pub lines: Vec<LineDepartures>,
}

impl DeparturesGroup {
    pub fn from_departures(stop: StopInfo, departures: Vec<Departure>) -> Self {
        let mut lines: Vec<LineDepartures> = Vec::new();
        for departure in departures {
            match lines.iter_mut().find(|l| l.line == departure.line.code) {
                Some(group) => group.departures.push(departure),
                None => lines.push(LineDepartures {
                    line: departure.line.code.clone(),
                    departures: vec![departure],
                }),
            }
        }
        lines.sort_by(|a, b| compare_line_codes(&a.line, &b.line));
        Self { stop, lines }
    }

    pub fn line(&self, code: &str) -> Option<&LineDepartures> {
        self.lines.iter().find(|l| l.line == code)
    }

    /// Every line, or only `code` when given.
    pub fn lines_matching(&self, code: Option<&str>) -> Vec<&LineDepartures> {
        self.lines
            .iter()
            .filter(|l| code.map_or(true, |wanted| l.line == wanted))
            .collect()
    }

    pub fn departure_count(&self) -> usize {
        self.lines.iter().map(|l| l.departures.len()).sum()
    }
}

/// Numeric line codes first, by value; the rest alphabetically.
fn compare_line_codes(a: &str, b: &str) -> Ordering {
    match (a.parse::<u32>(), b.parse::<u32>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn default_reliability() -> Reliability {
    Reliability::Reliable
}

fn deserialize_left_time<'de, D>(deserializer: D) -> Result<LeftTime, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(u32),
    }

    match StringOrNumber::deserialize(deserializer) {
        Ok(StringOrNumber::String(s)) => Ok(LeftTime::parse(&s)),
        Ok(StringOrNumber::Number(n)) => Ok(LeftTime::Minutes(n)),
        Err(_) => Ok(LeftTime::Unknown),
    }
}

fn deserialize_reliability<'de, D>(deserializer: D) -> Result<Reliability, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        Some("T") => Reliability::Theoretical,
        _ => Reliability::Reliable,
    })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| parse_tpg_timestamp(&s)))
}

/// tpg timestamps carry a numeric offset without a colon (`+0200`).
pub fn parse_tpg_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}

// --- routing (transport.opendata.ch) ---

#[derive(Debug, Clone)]
pub struct RouteQuery {
    pub from: String,
    pub to: String,
    pub date_time: NaiveDateTime,
    pub arrival_time: bool,
}

impl RouteQuery {
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Station {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub station: Station,
    #[serde(rename = "departureTimestamp", default)]
    pub departure_timestamp: Option<i64>,
    #[serde(rename = "arrivalTimestamp", default)]
    pub arrival_timestamp: Option<i64>,
}

impl Checkpoint {
    pub fn name(&self) -> &str {
        self.station.name.as_deref().unwrap_or("?")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Walk {
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Journey {
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub number: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "passList", default)]
    pub pass_list: Vec<Checkpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub walk: Option<Walk>,
    #[serde(default)]
    pub journey: Option<Journey>,
    #[serde(default)]
    pub departure: Checkpoint,
    #[serde(default)]
    pub arrival: Checkpoint,
}

pub enum SectionKind<'a> {
    Walk(Option<&'a Walk>),
    Journey(&'a Journey),
}

impl Section {
    pub fn kind(&self) -> SectionKind<'_> {
        match &self.journey {
            Some(journey) => SectionKind::Journey(journey),
            None => SectionKind::Walk(self.walk.as_ref()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub from: Checkpoint,
    #[serde(default)]
    pub to: Checkpoint,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Connection {
    /// Parses the `00d00:23:00` duration format into minutes.
    pub fn duration_minutes(&self) -> Option<i64> {
        let raw = self.duration.as_deref()?;
        let (days, clock) = raw.split_once('d')?;
        let mut parts = clock.split(':');
        let hours: i64 = parts.next()?.parse().ok()?;
        let minutes: i64 = parts.next()?.parse().ok()?;
        let days: i64 = days.parse().ok()?;
        Some(days * 24 * 60 + hours * 60 + minutes)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteResults {
    #[serde(default)]
    pub connections: Vec<Connection>,
}

fn deserialize_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(serde_json::Number),
    }

    match Option::<StringOrNumber>::deserialize(deserializer) {
        Ok(Some(StringOrNumber::String(s))) => Ok(Some(s)),
        Ok(Some(StringOrNumber::Number(n))) => Ok(Some(n.to_string())),
        Ok(None) => Ok(None),
        Err(_) => Ok(None),
    }
}

// --- client ---

/// The two requests the app issues. Kept behind a trait so the fetcher can run
/// against a scripted implementation.
pub trait TransitApi: Send + Sync + 'static {
    fn next_departures(
        &self,
        stop_code: &str,
    ) -> impl Future<Output = Result<DeparturesGroup, FetchError>> + Send;

    fn connections(
        &self,
        query: &RouteQuery,
    ) -> impl Future<Output = Result<RouteResults, FetchError>> + Send;
}

pub struct TpgClient {
    client: reqwest::Client,
    api_key: String,
    departures_url: String,
    connections_url: String,
}

impl TpgClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            departures_url: config.departures_url.clone(),
            connections_url: config.connections_url.clone(),
        })
    }

    pub fn departures_request(&self, stop_code: &str) -> reqwest::RequestBuilder {
        self.client
            .get(&self.departures_url)
            .query(&[("key", self.api_key.as_str()), ("stopCode", stop_code)])
    }

    pub fn connections_request(&self, query: &RouteQuery) -> reqwest::RequestBuilder {
        let date = query.date_time.format("%Y-%m-%d").to_string();
        let time = query.date_time.format("%H:%M").to_string();
        let is_arrival = if query.arrival_time { "1" } else { "0" };
        let limit = CONNECTION_LIMIT.to_string();

        let mut params: Vec<(&str, &str)> = vec![
            ("from", query.from.as_str()),
            ("to", query.to.as_str()),
            ("date", date.as_str()),
            ("time", time.as_str()),
            ("isArrivalTime", is_arrival),
        ];
        params.extend(CONNECTION_FIELDS.iter().map(|field| ("fields[]", *field)));
        params.push(("limit", limit.as_str()));

        self.client.get(&self.connections_url).query(&params)
    }

    async fn get_body(&self, request: reqwest::RequestBuilder) -> Result<String, FetchError> {
        let request = request.build()?;
        // The query carries the API key.
        let mut url = request.url().clone();
        url.set_query(None);
        debug!("GET {}", url);

        let response = self.client.execute(request).await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

impl TransitApi for TpgClient {
    async fn next_departures(&self, stop_code: &str) -> Result<DeparturesGroup, FetchError> {
        debug!("Fetching departures for stop {}", stop_code);
        let body = self.get_body(self.departures_request(stop_code)).await?;
        let group = decode_departures(&body)?;
        debug!("Fetched {} departures for stop {}", group.departure_count(), stop_code);
        Ok(group)
    }

    async fn connections(&self, query: &RouteQuery) -> Result<RouteResults, FetchError> {
        debug!("Fetching connections {} -> {}", query.from, query.to);
        let body = self.get_body(self.connections_request(query)).await?;
        let results: RouteResults = serde_json::from_str(&body)?;
        debug!("Fetched {} connections", results.connections.len());
        Ok(results)
    }
}

pub fn decode_departures(body: &str) -> Result<DeparturesGroup, FetchError> {
    let response: DeparturesResponse = serde_json::from_str(body)?;
    Ok(DeparturesGroup::from_departures(response.stop, response.departures))
}
