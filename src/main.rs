use clap::{Parser, Subcommand, ValueEnum};
use parksmart::config::{self, Config};
use parksmart::error::AppError;
use parksmart::event::{format_timestamp, parse_timestamp};
use parksmart::forecast::{self, load_forecaster};
use parksmart::occupancy::reconstruct_occupancy;
use parksmart::occupancy::stats::{Report, summarize};
use parksmart::refresh::spawn_refresh_thread;
use parksmart::source::generator::{generate_commuter_events, simulate_random_walk};
use parksmart::source::{self, read_events, write_events_to_path};
use parksmart::{api, state};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

// One week of simulated time.
const MAX_SIMULATED_MINUTES: i64 = 7 * 24 * 60;

/// Parking occupancy reconstruction, reporting and forecasting.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a synthetic sensor log
    Generate {
        #[arg(long, value_enum, default_value_t = Pattern::Commuter)]
        pattern: Pattern,
        /// Defaults to the configured events path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Simulated minutes for the random-walk pattern
        #[arg(
            long,
            default_value_t = 60,
            value_parser = clap::value_parser!(i64).range(0..=MAX_SIMULATED_MINUTES)
        )]
        minutes: i64,
    },
    /// Reconstruct occupancy, print peak reports and train the forecast model
    Analyze,
    /// Predict occupancy for a lot at a given time
    Predict {
        #[arg(long)]
        lot_id: String,
        /// e.g. "2024-06-10 09:00"
        #[arg(long)]
        at: String,
    },
    /// Serve the polling dashboard API
    Serve,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Pattern {
    Commuter,
    RandomWalk,
}

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = config::load_from_path(&args.config)?;
    init_tracing(config.log_level()?);
    tracing::info!(
        config_path = %args.config.display(),
        app = %config.app.name,
        "parksmart starting"
    );

    match args.command {
        Command::Generate {
            pattern,
            output,
            minutes,
        } => generate(&config, pattern, output, minutes)?,
        Command::Analyze => analyze(&config)?,
        Command::Predict { lot_id, at } => predict(&config, &lot_id, &at)?,
        Command::Serve => serve(&config).await?,
    }
    Ok(())
}

fn generate(
    config: &Config,
    pattern: Pattern,
    output: Option<PathBuf>,
    minutes: i64,
) -> Result<(), AppError> {
    let settings = config.generator_settings()?.ok_or_else(|| {
        config::ConfigError::Invalid("generate requires a [generator] section".to_string())
    })?;
    let events = match pattern {
        Pattern::Commuter => generate_commuter_events(&settings),
        Pattern::RandomWalk => simulate_random_walk(
            &settings.lots,
            settings.start.midnight() + time::Duration::hours(8),
            time::Duration::minutes(minutes),
            settings.seed,
        ),
    };
    let output = output.unwrap_or_else(|| config.events_path().to_path_buf());
    write_events_to_path(&output, &events)?;
    println!("Wrote {} events to {}", events.len(), output.display());
    Ok(())
}

fn analyze(config: &Config) -> Result<(), AppError> {
    let outcome = read_events(config.events_path())?;
    tracing::info!(
        path = %config.events_path().display(),
        accepted = outcome.events.len(),
        rejected = outcome.rejected.len(),
        "Sensor log loaded"
    );
    outcome.warn_rejected();

    let samples = reconstruct_occupancy(&outcome.events, config.bucket_width()?);
    print_report(&summarize(&samples));

    if let Some(path) = config.occupancy_path() {
        source::write_occupancy_to_path(path, &samples)?;
    }

    let forecaster = forecast::train(&samples, &config.training_options()?)?;
    let summary = forecaster.summary();
    println!();
    println!(
        "Model {} trained on {} rows, RMSE on {} held-out rows: {:.3}",
        summary.model, summary.train_rows, summary.test_rows, summary.rmse
    );
    forecaster.save(config.model_path())?;
    println!("Model saved to {}", config.model_path().display());
    Ok(())
}

fn print_report(report: &Report) {
    println!("Peak hours by lot and weekday:");
    if report.peak_hours.is_empty() {
        println!("  no data");
    }
    for peak in &report.peak_hours {
        println!(
            "  {:<24} {:<9} {:02}:00  mean occupancy {:.2}",
            peak.lot_name, peak.weekday, peak.hour, peak.mean_occupancy
        );
    }

    println!();
    match &report.global_peak {
        Some(peak) => println!(
            "Global peak: {} at {} with {} vehicles",
            peak.lot_name,
            format_timestamp(peak.window_start),
            peak.occupancy
        ),
        None => println!("Global peak: no data"),
    }

    println!();
    println!("Busiest windows per day:");
    for day in &report.daily_traffic {
        println!(
            "  {}  entries {} in window {}  exits {} in window {}",
            day.date,
            day.busiest_entry.count,
            format_timestamp(day.busiest_entry.window_start),
            day.busiest_exit.count,
            format_timestamp(day.busiest_exit.window_start)
        );
    }
}

fn predict(config: &Config, lot_id: &str, at: &str) -> Result<(), AppError> {
    let at = parse_timestamp(at).map_err(|e| AppError::Timestamp(e.to_string()))?;
    let forecaster = load_forecaster(config.model_path())?;
    let prediction = forecaster.predict(lot_id, at)?;
    println!(
        "{} ({}) at {}: {:.2} vehicles (~{})",
        prediction.lot_name,
        prediction.lot_id,
        format_timestamp(prediction.at),
        prediction.occupancy,
        prediction.rounded()
    );
    Ok(())
}

async fn serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut app_state = state::AppState::new();
    app_state.set_capacities(config.lot_capacities());
    let state = Arc::new(RwLock::new(app_state));

    match load_forecaster(config.model_path()) {
        Ok(forecaster) => {
            tracing::info!(path = %config.model_path().display(), "Forecast model loaded");
            let mut guard = state.write().map_err(|_| AppError::StateLock)?;
            guard.set_forecaster(Some(Arc::new(forecaster)));
        }
        Err(e) => {
            tracing::warn!(error = %e, "No forecast model available, predictions disabled");
        }
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let _refresh_handle = spawn_refresh_thread(
        Arc::clone(&state),
        config.events_path().to_path_buf(),
        config.bucket_width()?,
        config.refresh_interval(),
        Arc::clone(&stop_flag),
    );

    let app = api::router(Arc::clone(&state));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    // Signal refresh thread to stop
    stop_flag.store(true, Ordering::Relaxed);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_toml() -> Result<(), Box<dyn std::error::Error>> {
        let _config = config::load_default()?;
        Ok(())
    }

    #[test]
    fn predict_arguments_parse() -> Result<(), clap::Error> {
        let args = Args::try_parse_from([
            "parksmart",
            "--config",
            "other.toml",
            "predict",
            "--lot-id",
            "lot-north",
            "--at",
            "2024-06-10 09:00",
        ])?;

        assert_eq!(args.config, PathBuf::from("other.toml"));
        assert!(matches!(
            args.command,
            Command::Predict { ref lot_id, .. } if lot_id == "lot-north"
        ));
        Ok(())
    }

    #[test]
    fn generate_defaults_to_commuter_pattern() -> Result<(), clap::Error> {
        let args = Args::try_parse_from(["parksmart", "generate"])?;

        assert!(matches!(
            args.command,
            Command::Generate {
                pattern: Pattern::Commuter,
                output: None,
                minutes: 60
            }
        ));
        Ok(())
    }

    #[test]
    fn generate_minutes_are_bounded() -> Result<(), clap::Error> {
        let week = MAX_SIMULATED_MINUTES.to_string();
        let args = Args::try_parse_from(["parksmart", "generate", "--minutes", week.as_str()])?;
        assert!(matches!(
            args.command,
            Command::Generate { minutes, .. } if minutes == MAX_SIMULATED_MINUTES
        ));

        for rejected in ["-1", "10081", "9223372036854775807"] {
            let parsed = Args::try_parse_from(["parksmart", "generate", "--minutes", rejected]);
            assert!(parsed.is_err(), "accepted --minutes {rejected}");
        }
        Ok(())
    }
}
