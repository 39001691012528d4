//! Bucketing of raw events and running-occupancy reconstruction.
//!
//! Each lot starts from zero at its earliest observed bucket, so a lot that
//! was already occupied reads low and an unbalanced log can go negative.

use crate::event::{Event, EventType};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use time::{Date, Duration, PrimitiveDateTime, Weekday};

pub mod stats;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Always divides a day evenly so windows align to midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketWidth(u16);

impl BucketWidth {
    pub const THIRTY_MINUTES: BucketWidth = BucketWidth(30);

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        if minutes == 0 || MINUTES_PER_DAY % minutes != 0 {
            return None;
        }
        Some(Self(minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn window_start(self, timestamp: PrimitiveDateTime) -> PrimitiveDateTime {
        let minute_of_day = u16::from(timestamp.hour()) * 60 + u16::from(timestamp.minute());
        let floored = minute_of_day - minute_of_day % self.0;
        timestamp.date().midnight() + Duration::minutes(i64::from(floored))
    }
}

impl Default for BucketWidth {
    fn default() -> Self {
        Self::THIRTY_MINUTES
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub lot_id: String,
    pub lot_name: String,
    pub window_start: PrimitiveDateTime,
    pub entry_count: u32,
    pub exit_count: u32,
}

impl Bucket {
    pub fn net_change(&self) -> i64 {
        i64::from(self.entry_count) - i64::from(self.exit_count)
    }
}

// occupancy at the end of the bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancySample {
    pub bucket: Bucket,
    pub occupancy: i64,
}

impl OccupancySample {
    pub fn lot_id(&self) -> &str {
        &self.bucket.lot_id
    }

    pub fn lot_name(&self) -> &str {
        &self.bucket.lot_name
    }

    pub fn window_start(&self) -> PrimitiveDateTime {
        self.bucket.window_start
    }

    pub fn weekday(&self) -> Weekday {
        self.bucket.window_start.weekday()
    }

    pub fn hour(&self) -> u8 {
        self.bucket.window_start.hour()
    }

    pub fn minute(&self) -> u8 {
        self.bucket.window_start.minute()
    }

    pub fn date(&self) -> Date {
        self.bucket.window_start.date()
    }
}

/// Counts events per (lot, window); empty windows are not produced. A lot's
/// display name comes from its earliest event.
pub fn bucket_events(events: &[Event], width: BucketWidth) -> Vec<Bucket> {
    let mut names: BTreeMap<&str, (PrimitiveDateTime, &str)> = BTreeMap::new();
    let mut counts: BTreeMap<(&str, PrimitiveDateTime), (u32, u32)> = BTreeMap::new();

    for event in events {
        match names.entry(event.lot_id.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert((event.timestamp, event.lot_name.as_str()));
            }
            Entry::Occupied(mut slot) => {
                if event.timestamp < slot.get().0 {
                    slot.insert((event.timestamp, event.lot_name.as_str()));
                }
            }
        }

        let key = (event.lot_id.as_str(), width.window_start(event.timestamp));
        let (entries, exits) = counts.entry(key).or_insert((0, 0));
        match event.event_type {
            EventType::Entry => *entries += 1,
            EventType::Exit => *exits += 1,
        }
    }

    counts
        .into_iter()
        .map(|((lot_id, window_start), (entry_count, exit_count))| Bucket {
            lot_id: lot_id.to_string(),
            lot_name: names
                .get(lot_id)
                .map_or(lot_id, |(_, name)| *name)
                .to_string(),
            window_start,
            entry_count,
            exit_count,
        })
        .collect()
}

/// Turns buckets into running occupancy, one prefix sum per lot.
pub fn reconstruct(mut buckets: Vec<Bucket>) -> Vec<OccupancySample> {
    buckets.sort_by(|a, b| {
        a.lot_id
            .cmp(&b.lot_id)
            .then(a.window_start.cmp(&b.window_start))
    });

    let mut samples = Vec::with_capacity(buckets.len());
    let mut running = 0i64;
    let mut current_lot: Option<String> = None;

    for bucket in buckets {
        // new lot, new baseline
        if current_lot.as_deref() != Some(bucket.lot_id.as_str()) {
            current_lot = Some(bucket.lot_id.clone());
            running = 0;
        }
        running += bucket.net_change();
        samples.push(OccupancySample {
            bucket,
            occupancy: running,
        });
    }

    samples
}

pub fn reconstruct_occupancy(events: &[Event], width: BucketWidth) -> Vec<OccupancySample> {
    reconstruct(bucket_events(events, width))
}

pub fn latest_per_lot(samples: &[OccupancySample]) -> Vec<OccupancySample> {
    let mut latest: BTreeMap<&str, &OccupancySample> = BTreeMap::new();
    for sample in samples {
        latest
            .entry(sample.lot_id())
            .and_modify(|current| {
                if sample.window_start() > current.window_start() {
                    *current = sample;
                }
            })
            .or_insert(sample);
    }
    latest.into_values().cloned().collect()
}
