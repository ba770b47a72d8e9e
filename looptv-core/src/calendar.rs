use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

/// Cap on generated future occurrences for a recurring event.
const MAX_OCCURRENCES: i64 = 365;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("failed to read calendar {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("invalid timestamp in calendar: {0}")]
    Timestamp(String),
    #[error("event missing {0}")]
    MissingField(&'static str),
    #[error("failed to fetch calendar from {url}: {source}")]
    Fetch { source: reqwest::Error, url: String },
}

pub type CalendarResult<T> = Result<T, CalendarError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {
    fn days(&self) -> i64 {
        match self {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
}

impl RecurrenceRule {
    /// Whole-day shift between consecutive occurrences.
    fn step_days(&self) -> i64 {
        self.frequency.days() * i64::from(self.interval.max(1))
    }

    fn parse(value: &str) -> Option<Self> {
        let mut frequency = None;
        let mut interval = 1;
        for part in value.split(';') {
            let (key, val) = part.split_once('=')?;
            match key.trim() {
                "FREQ" => {
                    frequency = match val.trim() {
                        "DAILY" => Some(Frequency::Daily),
                        "WEEKLY" => Some(Frequency::Weekly),
                        other => {
                            debug!(frequency = other, "unsupported RRULE frequency");
                            return None;
                        }
                    };
                }
                "INTERVAL" => interval = val.trim().parse().unwrap_or(1),
                _ => {}
            }
        }
        frequency.map(|frequency| Self {
            frequency,
            interval,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub category: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub recurrence: Option<RecurrenceRule>,
}

impl CalendarEvent {
    /// True when `instant` falls inside `[start, end)` of the event itself or
    /// of one of its day-shifted occurrences.
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        match self.recurrence {
            None => instant >= self.start && instant < self.end,
            Some(rule) => {
                let step = Duration::days(rule.step_days());
                let mut start = self.start;
                let mut end = self.end;
                for _ in 0..MAX_OCCURRENCES {
                    if instant >= start && instant < end {
                        return true;
                    }
                    if start > instant {
                        return false;
                    }
                    start += step;
                    end += step;
                }
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Calendar {
    events: Vec<CalendarEvent>,
}

impl Calendar {
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        Self { events }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> CalendarResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CalendarError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> CalendarResult<Self> {
        let mut events = Vec::new();
        let mut current: Option<PartialEvent> = None;
        for line in unfold_lines(content) {
            let line = line.trim_end();
            if line == "BEGIN:VEVENT" {
                current = Some(PartialEvent::default());
                continue;
            }
            if line == "END:VEVENT" {
                if let Some(partial) = current.take() {
                    match partial.finish() {
                        Ok(event) => events.push(event),
                        Err(error) => warn!(%error, "dropping malformed calendar event"),
                    }
                }
                continue;
            }
            let Some(partial) = current.as_mut() else {
                continue;
            };
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            // Property parameters (e.g. DTSTART;TZID=...) are ignored.
            let name = name.split(';').next().unwrap_or(name);
            match name {
                "DTSTART" => partial.start = Some(parse_timestamp(value)?),
                "DTEND" => partial.end = Some(parse_timestamp(value)?),
                "SUMMARY" => partial.category = Some(value.trim().to_string()),
                "RRULE" => partial.recurrence = RecurrenceRule::parse(value),
                _ => {}
            }
        }
        Ok(Self { events })
    }

    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    /// First event covering `instant`, in calendar order. Overlapping events
    /// are not treated as conflicts: first match wins.
    pub fn resolve_at(&self, instant: DateTime<Utc>) -> Option<&str> {
        self.events
            .iter()
            .find(|event| event.covers(instant))
            .map(|event| event.category.as_str())
    }
}

/// Resolve the active category for `instant`, reloading the calendar file
/// wholesale. A missing or unparseable calendar is recoverable: the caller
/// gets `None` and falls back to ads or idle.
pub fn resolve_category<P: AsRef<Path>>(path: P, instant: DateTime<Utc>) -> Option<String> {
    match Calendar::load(path.as_ref()) {
        Ok(calendar) => calendar.resolve_at(instant).map(str::to_string),
        Err(error) => {
            warn!(path = %path.as_ref().display(), %error, "calendar unavailable");
            None
        }
    }
}

/// Download a fresh calendar file over HTTP, replacing the local copy.
pub async fn fetch_calendar(url: &str, destination: &Path) -> CalendarResult<()> {
    let body = reqwest::get(url)
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|source| CalendarError::Fetch {
            source,
            url: url.to_string(),
        })?
        .text()
        .await
        .map_err(|source| CalendarError::Fetch {
            source,
            url: url.to_string(),
        })?;
    tokio::fs::write(destination, body)
        .await
        .map_err(|source| CalendarError::Io {
            source,
            path: destination.to_path_buf(),
        })?;
    Ok(())
}

#[derive(Debug, Default)]
struct PartialEvent {
    category: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    recurrence: Option<RecurrenceRule>,
}

impl PartialEvent {
    fn finish(self) -> CalendarResult<CalendarEvent> {
        let category = self.category.ok_or(CalendarError::MissingField("SUMMARY"))?;
        let start = self.start.ok_or(CalendarError::MissingField("DTSTART"))?;
        let end = self.end.ok_or(CalendarError::MissingField("DTEND"))?;
        if end <= start {
            return Err(CalendarError::Timestamp(format!(
                "event '{category}' ends before it starts"
            )));
        }
        Ok(CalendarEvent {
            category,
            start,
            end,
            recurrence: self.recurrence,
        })
    }
}

/// RFC 5545 line unfolding: a line starting with whitespace continues the
/// previous one.
fn unfold_lines(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in content.lines() {
        let raw = raw.trim_end_matches('\r');
        if raw.starts_with(' ') || raw.starts_with('\t') {
            if let Some(last) = lines.last_mut() {
                last.push_str(&raw[1..]);
                continue;
            }
        }
        lines.push(raw.to_string());
    }
    lines
}

fn parse_timestamp(value: &str) -> CalendarResult<DateTime<Utc>> {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S") {
            return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
        let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    Err(CalendarError::Timestamp(value.to_string()))
}
