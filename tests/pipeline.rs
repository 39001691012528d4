use parksmart::event::EventType;
use parksmart::forecast::{Category, ForecastError, TrainingOptions, load_forecaster, train};
use parksmart::occupancy::stats::summarize;
use parksmart::occupancy::{BucketWidth, reconstruct_occupancy};
use parksmart::source::generator::{GeneratorSettings, LotSpec, generate_commuter_events};
use parksmart::source::{read_events, write_events_to_path};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use time::Weekday;
use time::macros::{date, datetime};

fn temp_path(name: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
    Ok(std::env::temp_dir().join(format!("parksmart-pipeline-{unique}-{name}")))
}

fn settings() -> GeneratorSettings {
    GeneratorSettings {
        start: date!(2024-06-03),
        end: date!(2024-06-14),
        seed: 7,
        lots: vec![
            LotSpec {
                lot_id: "lot-north".to_string(),
                name: "North Garage".to_string(),
                sensors: 30,
            },
            LotSpec {
                lot_id: "lot-visitor".to_string(),
                name: "Visitor Lot".to_string(),
                sensors: 8,
            },
        ],
    }
}

#[test]
fn generated_log_flows_through_analysis_and_forecast() -> Result<(), Box<dyn std::error::Error>> {
    let events_path = temp_path("events.csv")?;
    let model_path = temp_path("model.json")?;
    let events = generate_commuter_events(&settings());
    write_events_to_path(&events_path, &events)?;

    let outcome = read_events(&events_path)?;
    assert!(outcome.rejected.is_empty());
    assert_eq!(outcome.events.len(), events.len());

    let samples = reconstruct_occupancy(&outcome.events, BucketWidth::default());
    // Every commuter leaves by the evening, so each day ends empty.
    for lot in ["lot-north", "lot-visitor"] {
        let last = samples
            .iter()
            .filter(|s| s.lot_id() == lot)
            .last()
            .map(|s| s.occupancy);
        assert_eq!(last, Some(0));
    }

    let report = summarize(&samples);
    assert_eq!(report.peak_hours.len(), 2 * 5);
    assert!(report.peak_hours.iter().all(|p| (8..=16).contains(&p.hour)));
    let global = report.global_peak.as_ref().map(|p| p.lot_id.as_str());
    assert_eq!(global, Some("lot-north"));
    assert_eq!(report.daily_traffic.len(), 10);
    assert_eq!(report, summarize(&samples));

    let options = TrainingOptions {
        n_trees: 20,
        ..TrainingOptions::default()
    };
    let forecaster = train(&samples, &options)?;
    forecaster.save(&model_path)?;
    let restored = load_forecaster(&model_path)?;
    let _ = fs::remove_file(&events_path);
    let _ = fs::remove_file(&model_path);

    let at = datetime!(2024-06-19 11:00);
    assert_eq!(at.weekday(), Weekday::Wednesday);
    let original = forecaster.predict("lot-north", at)?;
    let reloaded = restored.predict("lot-north", at)?;
    assert!((original.occupancy - reloaded.occupancy).abs() < 1e-9);
    assert!(original.occupancy > 15.0, "got {}", original.occupancy);

    let night = restored.predict("lot-north", datetime!(2024-06-19 17:30))?;
    assert!(night.occupancy < original.occupancy);

    match restored.predict("lot-south", at) {
        Err(ForecastError::UnknownCategory { category, value }) => {
            assert_eq!(category, Category::Lot);
            assert_eq!(value, "lot-south");
        }
        other => panic!("expected unknown lot, got {other:?}"),
    }
    Ok(())
}

#[test]
fn generated_events_balance_per_day() {
    let events = generate_commuter_events(&settings());

    let entries = events
        .iter()
        .filter(|e| e.event_type == EventType::Entry)
        .count();
    let exits = events.len() - entries;

    assert_eq!(entries, exits);
}
