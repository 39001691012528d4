use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::warn;

// Tried in order.
const LOCAL_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
];

// Text forms of the database's timestamptz column.
const OFFSET_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"
    ),
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]"
    ),
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
    ),
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]"
    ),
];

const DISPLAY_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Entry,
    Exit,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Entry => "entry",
            EventType::Exit => "exit",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = MalformedEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entry" => Ok(EventType::Entry),
            "exit" => Ok(EventType::Exit),
            _ => Err(MalformedEventError::EventType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEventError {
    #[error("unparseable timestamp: {0:?}")]
    Timestamp(String),
    #[error("unknown event type: {0:?}")]
    EventType(String),
    #[error("missing lot id")]
    MissingLot,
    #[error("unreadable record: {0}")]
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: PrimitiveDateTime,
    pub lot_id: String,
    pub lot_name: String,
    pub event_type: EventType,
}

impl Event {
    pub fn new(
        timestamp: PrimitiveDateTime,
        lot_id: impl Into<String>,
        lot_name: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        Self {
            timestamp,
            lot_id: lot_id.into(),
            lot_name: lot_name.into(),
            event_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawEvent {
    pub lot_id: String,
    #[serde(rename = "name", default)]
    pub lot_name: Option<String>,
    pub event_type: String,
    #[serde(rename = "event_timestamp")]
    pub timestamp: String,
}

impl TryFrom<RawEvent> for Event {
    type Error = MalformedEventError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let lot_id = raw.lot_id.trim();
        if lot_id.is_empty() {
            return Err(MalformedEventError::MissingLot);
        }
        let timestamp = parse_timestamp(&raw.timestamp)?;
        let event_type = raw.event_type.parse()?;
        let lot_name = raw
            .lot_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(lot_id);

        Ok(Event::new(timestamp, lot_id, lot_name, event_type))
    }
}

/// Parses an event timestamp into wall-clock time. Timestamps carrying an
/// offset are converted to UTC first.
pub fn parse_timestamp(value: &str) -> Result<PrimitiveDateTime, MalformedEventError> {
    let value = value.trim();
    for format in LOCAL_FORMATS {
        if let Ok(parsed) = PrimitiveDateTime::parse(value, format) {
            return Ok(parsed);
        }
    }

    let with_offset = OffsetDateTime::parse(value, &Rfc3339).ok().or_else(|| {
        OFFSET_FORMATS
            .iter()
            .find_map(|format| OffsetDateTime::parse(value, format).ok())
    });

    match with_offset {
        Some(parsed) => {
            let utc = parsed.to_offset(UtcOffset::UTC);
            Ok(PrimitiveDateTime::new(utc.date(), utc.time()))
        }
        None => Err(MalformedEventError::Timestamp(value.to_string())),
    }
}

pub fn format_timestamp(timestamp: PrimitiveDateTime) -> String {
    timestamp
        .format(DISPLAY_FORMAT)
        .unwrap_or_else(|_| timestamp.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEvent {
    // zero-based, within the batch
    pub index: usize,
    pub error: MalformedEventError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub events: Vec<Event>,
    pub rejected: Vec<RejectedEvent>,
}

impl IngestOutcome {
    pub fn record(&mut self, index: usize, record: Result<RawEvent, MalformedEventError>) {
        match record.and_then(Event::try_from) {
            Ok(event) => self.events.push(event),
            Err(error) => self.rejected.push(RejectedEvent { index, error }),
        }
    }

    pub fn warn_rejected(&self) {
        for rejected in &self.rejected {
            warn!(
                record = rejected.index,
                error = %rejected.error,
                "Rejecting malformed event"
            );
        }
    }
}

/// Normalizes a batch of raw records, skipping the malformed ones.
pub fn ingest<I>(records: I) -> IngestOutcome
where
    I: IntoIterator<Item = RawEvent>,
{
    let mut outcome = IngestOutcome::default();
    for (index, raw) in records.into_iter().enumerate() {
        outcome.record(index, Ok(raw));
    }
    outcome
}
