use crate::event::{Event, EventType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use time::{Date, Duration, PrimitiveDateTime, Weekday};
use tracing::{debug, info};

const LUNCH_BREAK_PROBABILITY: f64 = 0.3;
const RANDOM_WALK_STEP: Duration = Duration::seconds(30);
const RANDOM_WALK_ENTRY_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSpec {
    pub lot_id: String,
    pub name: String,
    // one car per sensor
    pub sensors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSettings {
    // both inclusive
    pub start: Date,
    pub end: Date,
    pub seed: u64,
    pub lots: Vec<LotSpec>,
}

pub fn occupancy_rate(weekday: Weekday) -> f64 {
    match weekday {
        Weekday::Monday => 0.85,
        Weekday::Tuesday => 0.95,
        Weekday::Wednesday => 0.98,
        Weekday::Thursday => 0.90,
        Weekday::Friday => 0.60,
        Weekday::Saturday | Weekday::Sunday => 0.0,
    }
}

/// Each occupied sensor enters in the morning, may leave for lunch and come
/// back, and exits in the late afternoon.
pub fn generate_commuter_events(settings: &GeneratorSettings) -> Vec<Event> {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut events = Vec::new();

    let mut day = settings.start;
    while day <= settings.end {
        let rate = occupancy_rate(day.weekday());
        if rate > 0.0 {
            let before = events.len();
            for lot in &settings.lots {
                let occupied = (f64::from(lot.sensors) * rate).floor() as u32;
                for _ in 0..occupied {
                    commuter_day(&mut rng, day, lot, &mut events);
                }
            }
            debug!(
                date = %day,
                rate,
                events = events.len() - before,
                "Generated workday"
            );
        }
        match day.next_day() {
            Some(next) => day = next,
            None => break,
        }
    }

    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.lot_id.cmp(&b.lot_id))
    });
    info!(
        start = %settings.start,
        end = %settings.end,
        lots = settings.lots.len(),
        events = events.len(),
        "Generated commuter events"
    );
    events
}

fn commuter_day(rng: &mut StdRng, day: Date, lot: &LotSpec, events: &mut Vec<Event>) {
    let at = |hour: i64, minute: i64, offset: i64| {
        day.midnight() + Duration::hours(hour) + Duration::minutes(minute + offset)
    };
    let event = |timestamp, event_type| Event::new(timestamp, &lot.lot_id, &lot.name, event_type);

    events.push(event(at(8, 30, rng.random_range(0..=120)), EventType::Entry));

    if rng.random_bool(LUNCH_BREAK_PROBABILITY) {
        let lunch_exit = at(12, 0, rng.random_range(0..=30));
        let lunch_return = lunch_exit + Duration::minutes(rng.random_range(30..=60));
        events.push(event(lunch_exit, EventType::Exit));
        events.push(event(lunch_return, EventType::Entry));
    }

    events.push(event(at(16, 30, rng.random_range(0..=60)), EventType::Exit));
}

/// Emits one event per lot every 30 seconds of simulated time, biased toward
/// entries. Stops early at the end of the representable calendar.
pub fn simulate_random_walk(
    lots: &[LotSpec],
    start: PrimitiveDateTime,
    duration: Duration,
    seed: u64,
) -> Vec<Event> {
    let mut rng = StdRng::seed_from_u64(seed);
    let steps = (duration.whole_seconds() / RANDOM_WALK_STEP.whole_seconds()).max(0);

    let mut events = Vec::new();
    let mut timestamp = start;
    for _ in 0..steps {
        for lot in lots {
            let event_type = if rng.random_bool(RANDOM_WALK_ENTRY_WEIGHT) {
                EventType::Entry
            } else {
                EventType::Exit
            };
            events.push(Event::new(timestamp, &lot.lot_id, &lot.name, event_type));
        }
        match timestamp.checked_add(RANDOM_WALK_STEP) {
            Some(next) => timestamp = next,
            None => break,
        }
    }
    info!(lots = lots.len(), events = events.len(), "Simulated random walk");
    events
}
