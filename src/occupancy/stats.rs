use crate::occupancy::OccupancySample;
use std::collections::BTreeMap;
use time::{Date, PrimitiveDateTime, Weekday};

#[derive(Debug, Clone, PartialEq)]
pub struct PeakHour {
    pub lot_id: String,
    pub lot_name: String,
    pub weekday: Weekday,
    pub hour: u8,
    pub mean_occupancy: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeakMoment {
    pub lot_id: String,
    pub lot_name: String,
    pub window_start: PrimitiveDateTime,
    pub occupancy: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTotal {
    pub window_start: PrimitiveDateTime,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTraffic {
    pub date: Date,
    pub busiest_entry: WindowTotal,
    pub busiest_exit: WindowTotal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub peak_hours: Vec<PeakHour>,
    pub global_peak: Option<PeakMoment>,
    pub daily_traffic: Vec<DailyTraffic>,
}

pub fn summarize(samples: &[OccupancySample]) -> Report {
    Report {
        peak_hours: peak_hours(samples),
        global_peak: global_peak(samples),
        daily_traffic: daily_traffic(samples),
    }
}

/// Peak hour per (lot, weekday) pair present in the data, ordered by lot id
/// then weekday starting Monday. Equal means resolve to the earliest hour.
pub fn peak_hours(samples: &[OccupancySample]) -> Vec<PeakHour> {
    type HourTotals = BTreeMap<u8, (i64, u32)>;
    let mut groups: BTreeMap<(&str, u8), (&str, Weekday, HourTotals)> = BTreeMap::new();

    for sample in samples {
        let weekday = sample.weekday();
        let (_, _, hours) = groups
            .entry((sample.lot_id(), weekday.number_from_monday()))
            .or_insert_with(|| (sample.lot_name(), weekday, BTreeMap::new()));
        let (sum, count) = hours.entry(sample.hour()).or_insert((0, 0));
        *sum += sample.occupancy;
        *count += 1;
    }

    groups
        .into_iter()
        .filter_map(|((lot_id, _), (lot_name, weekday, hours))| {
            let mut best: Option<(u8, f64)> = None;
            for (hour, (sum, count)) in hours {
                let mean = sum as f64 / f64::from(count);
                if best.is_none_or(|(_, best_mean)| mean > best_mean) {
                    best = Some((hour, mean));
                }
            }
            best.map(|(hour, mean_occupancy)| PeakHour {
                lot_id: lot_id.to_string(),
                lot_name: lot_name.to_string(),
                weekday,
                hour,
                mean_occupancy,
            })
        })
        .collect()
}

/// Ties resolve to the earliest window, then to the lowest lot id.
pub fn global_peak(samples: &[OccupancySample]) -> Option<PeakMoment> {
    samples
        .iter()
        .max_by(|a, b| {
            a.occupancy
                .cmp(&b.occupancy)
                .then_with(|| b.window_start().cmp(&a.window_start()))
                .then_with(|| b.lot_id().cmp(a.lot_id()))
        })
        .map(|sample| PeakMoment {
            lot_id: sample.lot_id().to_string(),
            lot_name: sample.lot_name().to_string(),
            window_start: sample.window_start(),
            occupancy: sample.occupancy,
        })
}

/// Busiest entry and exit window per calendar date, summed across lots.
/// Equal totals resolve to the earliest window of the day.
pub fn daily_traffic(samples: &[OccupancySample]) -> Vec<DailyTraffic> {
    let mut days: BTreeMap<Date, BTreeMap<PrimitiveDateTime, (u64, u64)>> = BTreeMap::new();
    for sample in samples {
        let (entries, exits) = days
            .entry(sample.date())
            .or_default()
            .entry(sample.window_start())
            .or_insert((0, 0));
        *entries += u64::from(sample.bucket.entry_count);
        *exits += u64::from(sample.bucket.exit_count);
    }

    days.into_iter()
        .filter_map(|(date, windows)| {
            let busiest_entry = busiest(&windows, |(entries, _)| entries)?;
            let busiest_exit = busiest(&windows, |(_, exits)| exits)?;
            Some(DailyTraffic {
                date,
                busiest_entry,
                busiest_exit,
            })
        })
        .collect()
}

fn busiest(
    windows: &BTreeMap<PrimitiveDateTime, (u64, u64)>,
    pick: impl Fn((u64, u64)) -> u64,
) -> Option<WindowTotal> {
    let mut best: Option<WindowTotal> = None;
    for (&window_start, &counts) in windows {
        let count = pick(counts);
        if best.is_none_or(|current| count > current.count) {
            best = Some(WindowTotal {
                window_start,
                count,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventType};
    use crate::occupancy::{BucketWidth, reconstruct_occupancy};
    use time::macros::{date, datetime};

    fn events() -> Vec<Event> {
        let mut events = Vec::new();
        let mut push = |ts: PrimitiveDateTime, lot: &str, kind: EventType, n: usize| {
            for _ in 0..n {
                events.push(Event::new(ts, lot, format!("{lot} lot"), kind));
            }
        };
        // Monday 2024-06-03
        push(datetime!(2024-06-03 08:10), "A", EventType::Entry, 3);
        push(datetime!(2024-06-03 09:10), "A", EventType::Entry, 2);
        push(datetime!(2024-06-03 09:40), "A", EventType::Exit, 1);
        push(datetime!(2024-06-03 17:05), "A", EventType::Exit, 4);
        push(datetime!(2024-06-03 08:15), "B", EventType::Entry, 1);
        push(datetime!(2024-06-03 17:10), "B", EventType::Exit, 1);
        // Tuesday 2024-06-04
        push(datetime!(2024-06-04 08:00), "B", EventType::Entry, 4);
        push(datetime!(2024-06-04 12:00), "B", EventType::Exit, 2);
        events
    }

    #[test]
    fn peak_hour_uses_mean_per_hour() {
        let samples = reconstruct_occupancy(&events(), BucketWidth::default());

        let peaks = peak_hours(&samples);

        let a_monday = peaks
            .iter()
            .find(|p| p.lot_id == "A" && p.weekday == Weekday::Monday)
            .expect("peak for A on Monday");
        // 08:00 -> 3, 09:00 -> 5, 09:30 -> 4 => hour 9 mean 4.5
        assert_eq!(a_monday.hour, 9);
        assert_eq!(a_monday.mean_occupancy, 4.5);
        assert_eq!(a_monday.lot_name, "A lot");
        assert!(
            !peaks
                .iter()
                .any(|p| p.lot_id == "A" && p.weekday == Weekday::Tuesday)
        );
    }

    #[test]
    fn peak_hour_ties_go_to_earliest_hour() {
        let evs = vec![
            Event::new(datetime!(2024-06-03 08:00), "A", "A", EventType::Entry),
            Event::new(datetime!(2024-06-03 10:00), "A", "A", EventType::Entry),
            Event::new(datetime!(2024-06-03 10:00), "A", "A", EventType::Exit),
        ];
        let samples = reconstruct_occupancy(&evs, BucketWidth::default());

        let peaks = peak_hours(&samples);

        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].hour, 8);
    }

    #[test]
    fn peaks_are_ordered_by_lot_then_weekday() {
        let samples = reconstruct_occupancy(&events(), BucketWidth::default());

        let order: Vec<(String, Weekday)> = peak_hours(&samples)
            .into_iter()
            .map(|p| (p.lot_id, p.weekday))
            .collect();

        assert_eq!(
            order,
            vec![
                ("A".to_string(), Weekday::Monday),
                ("B".to_string(), Weekday::Monday),
                ("B".to_string(), Weekday::Tuesday),
            ]
        );
    }

    #[test]
    fn global_peak_breaks_ties_by_time_then_lot() {
        let evs = vec![
            Event::new(datetime!(2024-06-03 09:00), "B", "B", EventType::Entry),
            Event::new(datetime!(2024-06-03 09:00), "A", "A", EventType::Entry),
            Event::new(datetime!(2024-06-03 08:00), "C", "C", EventType::Entry),
        ];
        let samples = reconstruct_occupancy(&evs, BucketWidth::default());

        let peak = global_peak(&samples).expect("peak exists");

        assert_eq!(peak.lot_id, "C");
        assert_eq!(peak.window_start, datetime!(2024-06-03 08:00));
        assert_eq!(peak.occupancy, 1);

        let later_only: Vec<_> = samples.into_iter().filter(|s| s.lot_id() != "C").collect();
        let peak = global_peak(&later_only).expect("peak exists");
        assert_eq!(peak.lot_id, "A");
    }

    #[test]
    fn global_peak_of_nothing_is_none() {
        assert!(global_peak(&[]).is_none());
    }

    #[test]
    fn daily_traffic_sums_across_lots() {
        let samples = reconstruct_occupancy(&events(), BucketWidth::default());

        let traffic = daily_traffic(&samples);

        assert_eq!(traffic.len(), 2);
        let monday = traffic[0];
        assert_eq!(monday.date, date!(2024-06-03));
        assert_eq!(
            monday.busiest_entry,
            WindowTotal {
                window_start: datetime!(2024-06-03 08:00),
                count: 4,
            }
        );
        assert_eq!(
            monday.busiest_exit,
            WindowTotal {
                window_start: datetime!(2024-06-03 17:00),
                count: 5,
            }
        );
        let tuesday = traffic[1];
        assert_eq!(tuesday.busiest_entry.window_start, datetime!(2024-06-04 08:00));
        assert_eq!(tuesday.busiest_exit.window_start, datetime!(2024-06-04 12:00));
    }

    #[test]
    fn reporting_is_repeatable() {
        let samples = reconstruct_occupancy(&events(), BucketWidth::default());

        assert_eq!(summarize(&samples), summarize(&samples));
    }
}
