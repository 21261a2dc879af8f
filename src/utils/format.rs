use chrono::{DateTime, Local, TimeZone};

use crate::api::{Departure, LeftTime, Reliability};

/// How a departure's remaining time is displayed, and whether the row can be acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftTimeLabel {
    pub text: String,
    pub selectable: bool,
}

pub fn left_time_label(departure: &Departure) -> LeftTimeLabel {
    match departure.left_time {
        LeftTime::Minutes(minutes) => {
            let tilde = if departure.reliability == Reliability::Theoretical { "~" } else { "" };
            LeftTimeLabel {
                text: format!("{}{}'", tilde, minutes),
                selectable: true,
            }
        }
        // Displayed in the stop's own offset, i.e. Geneva time.
        LeftTime::MoreThanAnHour => match departure.timestamp {
            Some(timestamp) => LeftTimeLabel {
                text: timestamp.format("%H:%M").to_string(),
                selectable: true,
            },
            None => LeftTimeLabel {
                text: "?".to_string(),
                selectable: false,
            },
        },
        LeftTime::NoMore => LeftTimeLabel {
            text: "X".to_string(),
            selectable: false,
        },
        LeftTime::Unknown => LeftTimeLabel {
            text: "?".to_string(),
            selectable: false,
        },
    }
}

/// `line,destination,left` as used by voice shortcuts and `--compact` output.
pub fn compact_row(departure: &Departure) -> String {
    let left = match departure.left_time {
        LeftTime::Minutes(minutes) => minutes.to_string(),
        _ => left_time_label(departure).text,
    };
    format!("{},{},{}", departure.line.code, departure.line.destination, left)
}

pub fn platform_label(departure: &Departure) -> Option<String> {
    departure.platform.as_ref().map(|p| format!("Platform {}", p))
}

pub fn format_unix_time(timestamp: Option<i64>) -> String {
    format_unix_time_in(timestamp, &Local)
}

pub fn format_unix_time_in<Tz: TimeZone>(timestamp: Option<i64>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    timestamp
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|utc| utc.with_timezone(tz).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

pub fn format_duration(minutes: Option<i64>) -> String {
    match minutes {
        Some(m) if m >= 60 => format!("{} h {:02}", m / 60, m % 60),
        Some(m) => format!("{} min", m),
        None => "?".to_string(),
    }
}

pub fn truncate_string(s: &str, max_len: usize) -> String {
    // Char-aware truncation to avoid breaking UTF-8 boundaries
    let count = s.chars().count();
    if count <= max_len {
        return format!("{:<width$}", s, width = max_len);
    }

    let ellipsis = "...";
    let keep = max_len.saturating_sub(ellipsis.len());
    let trimmed: String = s.chars().take(keep).collect();
    format!("{:<width$}", format!("{}{}", trimmed, ellipsis), width = max_len)
}
