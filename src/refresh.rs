//! Background reload of the events file for the dashboard.

use crate::error::AppError;
use crate::event::IngestOutcome;
use crate::occupancy::{BucketWidth, latest_per_lot, reconstruct_occupancy};
use crate::source::read_events;
use crate::state::{AppState, Snapshot};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

pub const RECENT_EVENT_LIMIT: usize = 10;

pub fn build_snapshot(outcome: IngestOutcome, width: BucketWidth, now: SystemTime) -> Snapshot {
    let samples = reconstruct_occupancy(&outcome.events, width);
    let mut recent_events = outcome.events;
    recent_events.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.lot_id.cmp(&b.lot_id))
    });
    recent_events.truncate(RECENT_EVENT_LIMIT);

    Snapshot {
        lots: latest_per_lot(&samples),
        recent_events,
        rejected: outcome.rejected.len(),
        refreshed_at: now,
    }
}

pub fn run_refresh_cycle(
    state: &Arc<RwLock<AppState>>,
    events_path: &Path,
    width: BucketWidth,
) -> Result<(), AppError> {
    let outcome = read_events(events_path)?;
    let snapshot = build_snapshot(outcome, width, SystemTime::now());
    debug!(
        lots = snapshot.lots.len(),
        rejected = snapshot.rejected,
        "Dashboard snapshot refreshed"
    );
    if snapshot.lots.is_empty() {
        warn!(path = %events_path.display(), "Events file has no usable events");
    }

    let mut guard = state.write().map_err(|_| AppError::StateLock)?;
    guard.set_snapshot(snapshot)?;
    Ok(())
}

pub fn spawn_refresh_thread(
    state: Arc<RwLock<AppState>>,
    events_path: PathBuf,
    width: BucketWidth,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    info!(
        path = %events_path.display(),
        interval_ms = interval.as_millis(),
        "Starting dashboard refresh thread"
    );
    std::thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();

            if let Err(e) = run_refresh_cycle(&state, &events_path, width) {
                warn!("Error refreshing dashboard: {}", e);
            }

            sleep_with_stop(interval, &stop, cycle_start);
        }
    })
}

fn sleep_with_stop(duration: Duration, stop: &AtomicBool, start: Instant) {
    let elapsed = start.elapsed();
    if elapsed >= duration {
        return;
    }
    let remaining = duration - elapsed;
    let step = Duration::from_millis(100);
    let mut slept = Duration::ZERO;

    while slept < remaining {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(step);
        slept += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventType};
    use crate::source::write_events_to_path;
    use std::fs;
    use std::io;
    use std::sync::Mutex;
    use std::time::UNIX_EPOCH;
    use time::Duration as TimeDuration;
    use time::macros::datetime;

    fn temp_path(tag: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        Ok(std::env::temp_dir().join(format!("parksmart-refresh-{tag}-{unique}.csv")))
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .map_err(|_| io::Error::other("log buffer poisoned"))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn busy_morning() -> Vec<Event> {
        let start = datetime!(2024-06-03 08:00);
        (0..12)
            .map(|i| {
                let lot = if i % 3 == 0 { "B" } else { "A" };
                Event::new(
                    start + TimeDuration::minutes(i * 10),
                    lot,
                    lot,
                    EventType::Entry,
                )
            })
            .collect()
    }

    #[test]
    fn snapshot_keeps_latest_sample_per_lot_and_newest_events() {
        let outcome = IngestOutcome {
            events: busy_morning(),
            rejected: Vec::new(),
        };

        let snapshot = build_snapshot(outcome, BucketWidth::default(), UNIX_EPOCH);

        assert_eq!(snapshot.lots.len(), 2);
        assert_eq!(snapshot.lots[0].lot_id(), "A");
        assert_eq!(snapshot.lots[0].occupancy, 8);
        assert_eq!(snapshot.lots[1].occupancy, 4);
        assert_eq!(snapshot.recent_events.len(), RECENT_EVENT_LIMIT);
        assert_eq!(
            snapshot.recent_events[0].timestamp,
            datetime!(2024-06-03 09:50)
        );
    }

    #[test]
    fn refresh_cycle_publishes_file_contents() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_path("cycle")?;
        write_events_to_path(&path, &busy_morning())?;
        let state = Arc::new(RwLock::new(AppState::new()));
        let receiver = state.read().map_err(|_| AppError::StateLock)?.subscribe_snapshot();

        let result = run_refresh_cycle(&state, &path, BucketWidth::default());
        let _ = fs::remove_file(&path);

        assert!(result.is_ok());
        let published = receiver.borrow().clone();
        assert_eq!(published.map(|s| s.lots.len()), Some(2));
        Ok(())
    }

    #[test]
    fn refresh_cycle_logs_rejections_as_a_debug_count() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_path("rejections")?;
        fs::write(
            &path,
            "lot_id,name,event_type,event_timestamp\n\
             A,North,entry,2024-06-03 08:05:00\n\
             A,North,parked,2024-06-03 08:10:00\n\
             A,North,exit,whenever\n",
        )?;
        let state = Arc::new(RwLock::new(AppState::new()));
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || {
            run_refresh_cycle(&state, &path, BucketWidth::default())
        });
        let _ = fs::remove_file(&path);

        assert!(result.is_ok());
        let rejected = state
            .read()
            .map_err(|_| AppError::StateLock)?
            .snapshot()
            .map(|s| s.rejected);
        assert_eq!(rejected, Some(2));
        let text = String::from_utf8(logs.0.lock().map_err(|_| "log buffer poisoned")?.clone())?;
        assert!(!text.contains("WARN"), "{text}");
        assert!(!text.contains("INFO"), "{text}");
        assert!(text.contains("rejected=2"), "{text}");
        Ok(())
    }

    #[test]
    fn refresh_cycle_reports_missing_file() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_path("missing")?;
        let state = Arc::new(RwLock::new(AppState::new()));

        let result = run_refresh_cycle(&state, &path, BucketWidth::default());

        assert!(matches!(result, Err(AppError::Source(_))));
        Ok(())
    }

    #[test]
    fn refresh_thread_exits_when_stopped() -> Result<(), Box<dyn std::error::Error>> {
        let path = temp_path("thread")?;
        write_events_to_path(&path, &busy_morning())?;
        let state = Arc::new(RwLock::new(AppState::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = spawn_refresh_thread(
            Arc::clone(&state),
            path.clone(),
            BucketWidth::default(),
            Duration::from_secs(60),
            Arc::clone(&stop),
        );
        let started = Instant::now();
        while state.read().map_err(|_| AppError::StateLock)?.snapshot().is_none()
            && started.elapsed() < Duration::from_secs(5)
        {
            std::thread::sleep(Duration::from_millis(10));
        }
        stop.store(true, Ordering::Relaxed);
        let joined = handle.join();
        let _ = fs::remove_file(&path);

        assert!(joined.is_ok());
        assert!(state.read().map_err(|_| AppError::StateLock)?.snapshot().is_some());
        Ok(())
    }
}
