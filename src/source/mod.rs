//! CSV input and output: the sensor-log export and the occupancy table.

use crate::event::{
    Event, EventType, IngestOutcome, MalformedEventError, RawEvent, format_timestamp,
};
use crate::occupancy::OccupancySample;
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

pub mod generator;

// Other columns are ignored.
const REQUIRED_COLUMNS: &[&str] = &["lot_id", "event_type", "event_timestamp"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column: {0}")]
    MissingColumn(&'static str),
}

#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    lot_id: &'a str,
    name: &'a str,
    event_type: EventType,
    event_timestamp: String,
}

#[derive(Debug, Serialize)]
struct OccupancyRecord<'a> {
    lot_id: &'a str,
    lot_name: &'a str,
    window_start: String,
    entry_count: u32,
    exit_count: u32,
    net_change: i64,
    occupancy: i64,
    weekday: String,
    hour: u8,
    minute: u8,
    date: String,
}

pub fn read_events(path: impl AsRef<Path>) -> Result<IngestOutcome, SourceError> {
    let path = path.as_ref();
    let outcome = read_events_from(File::open(path)?)?;
    debug!(
        path = %path.display(),
        accepted = outcome.events.len(),
        rejected = outcome.rejected.len(),
        "Sensor log loaded"
    );
    Ok(outcome)
}

/// Reads export rows; a row that cannot be decoded is rejected on its own.
pub fn read_events_from<R: io::Read>(reader: R) -> Result<IngestOutcome, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    for &column in REQUIRED_COLUMNS {
        if !headers.iter().any(|header| header == column) {
            return Err(SourceError::MissingColumn(column));
        }
    }

    let mut outcome = IngestOutcome::default();
    for (index, record) in reader.deserialize::<RawEvent>().enumerate() {
        outcome.record(
            index,
            record.map_err(|err| MalformedEventError::Unreadable(err.to_string())),
        );
    }
    Ok(outcome)
}

pub fn write_events<W: io::Write>(writer: W, events: &[Event]) -> Result<(), SourceError> {
    let mut writer = csv::Writer::from_writer(writer);
    for event in events {
        writer.serialize(EventRecord {
            lot_id: &event.lot_id,
            name: &event.lot_name,
            event_type: event.event_type,
            event_timestamp: format_timestamp(event.timestamp),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_events_to_path(path: impl AsRef<Path>, events: &[Event]) -> Result<(), SourceError> {
    let path = path.as_ref();
    write_events(create_file(path)?, events)?;
    info!(path = %path.display(), events = events.len(), "Events written");
    Ok(())
}

pub fn write_occupancy<W: io::Write>(
    writer: W,
    samples: &[OccupancySample],
) -> Result<(), SourceError> {
    let mut writer = csv::Writer::from_writer(writer);
    for sample in samples {
        writer.serialize(OccupancyRecord {
            lot_id: sample.lot_id(),
            lot_name: sample.lot_name(),
            window_start: format_timestamp(sample.window_start()),
            entry_count: sample.bucket.entry_count,
            exit_count: sample.bucket.exit_count,
            net_change: sample.bucket.net_change(),
            occupancy: sample.occupancy,
            weekday: sample.weekday().to_string(),
            hour: sample.hour(),
            minute: sample.minute(),
            date: sample.date().to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_occupancy_to_path(
    path: impl AsRef<Path>,
    samples: &[OccupancySample],
) -> Result<(), SourceError> {
    let path = path.as_ref();
    write_occupancy(create_file(path)?, samples)?;
    info!(path = %path.display(), rows = samples.len(), "Occupancy table written");
    Ok(())
}

fn create_file(path: &Path) -> Result<File, io::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    File::create(path)
}
