use crate::forecast::TrainingOptions;
use crate::forecast::model::ModelKind;
use crate::occupancy::BucketWidth;
use crate::source::generator::{GeneratorSettings, LotSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use time::Date;
use time::macros::format_description;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_EVENTS_PATH: &str = "sensor_logs_export.csv";
pub const DEFAULT_MODEL_PATH: &str = "availability_model.json";
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
pub const DEFAULT_TREE_COUNT: usize = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub data: Option<DataSection>,
    #[serde(default)]
    pub analysis: Option<AnalysisSection>,
    #[serde(default)]
    pub generator: Option<GeneratorSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataSection {
    pub events_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    // empty disables the export
    pub occupancy_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisSection {
    pub model: Option<ModelKind>,
    pub seed: Option<u64>,
    pub test_fraction: Option<f64>,
    pub n_trees: Option<usize>,
    pub max_depth: Option<usize>,
    pub bucket_minutes: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorSection {
    /// Inclusive, `YYYY-MM-DD`.
    pub start_date: String,
    /// Inclusive, `YYYY-MM-DD`.
    pub end_date: String,
    pub seed: Option<u64>,
    #[serde(default)]
    pub lots: Vec<LotSpec>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
    /// Seconds between dashboard reloads of the events file (default: 3)
    pub refresh_interval_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        self.logging
            .level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level: {}", self.logging.level)))
    }

    pub fn events_path(&self) -> &Path {
        non_empty_path(self.data.as_ref().and_then(|d| d.events_path.as_deref()))
            .unwrap_or(Path::new(DEFAULT_EVENTS_PATH))
    }

    pub fn model_path(&self) -> &Path {
        non_empty_path(self.data.as_ref().and_then(|d| d.model_path.as_deref()))
            .unwrap_or(Path::new(DEFAULT_MODEL_PATH))
    }

    pub fn occupancy_path(&self) -> Option<&Path> {
        non_empty_path(self.data.as_ref().and_then(|d| d.occupancy_path.as_deref()))
    }

    pub fn bucket_width(&self) -> Result<BucketWidth, ConfigError> {
        match self.analysis.as_ref().and_then(|a| a.bucket_minutes) {
            Some(minutes) => BucketWidth::from_minutes(minutes).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "bucket_minutes must divide a day evenly, got {minutes}"
                ))
            }),
            None => Ok(BucketWidth::default()),
        }
    }

    pub fn training_options(&self) -> Result<TrainingOptions, ConfigError> {
        let section = self.analysis.as_ref();
        let test_fraction = section
            .and_then(|a| a.test_fraction)
            .unwrap_or(DEFAULT_TEST_FRACTION);
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "test_fraction must be in (0, 1), got {test_fraction}"
            )));
        }
        let n_trees = section.and_then(|a| a.n_trees).unwrap_or(DEFAULT_TREE_COUNT);
        if n_trees == 0 {
            return Err(ConfigError::Invalid("n_trees must be positive".to_string()));
        }

        Ok(TrainingOptions {
            model: section.and_then(|a| a.model).unwrap_or_default(),
            seed: section.and_then(|a| a.seed).unwrap_or(DEFAULT_SEED),
            test_fraction,
            n_trees,
            max_depth: section.and_then(|a| a.max_depth),
        })
    }

    /// Returns generator settings, or `None` when no `[generator]` section exists.
    pub fn generator_settings(&self) -> Result<Option<GeneratorSettings>, ConfigError> {
        let Some(section) = self.generator.as_ref() else {
            return Ok(None);
        };
        let start = parse_date(&section.start_date)?;
        let end = parse_date(&section.end_date)?;
        if start > end {
            return Err(ConfigError::Invalid(format!(
                "generator start_date {start} is after end_date {end}"
            )));
        }
        if section.lots.is_empty() {
            return Err(ConfigError::Invalid(
                "generator requires at least one lot".to_string(),
            ));
        }

        Ok(Some(GeneratorSettings {
            start,
            end,
            seed: section.seed.unwrap_or(DEFAULT_SEED),
            lots: section.lots.clone(),
        }))
    }

    /// Spaces per lot: one per configured sensor. Empty without a `[generator]` section.
    pub fn lot_capacities(&self) -> BTreeMap<String, u32> {
        self.generator
            .iter()
            .flat_map(|section| &section.lots)
            .map(|lot| (lot.lot_id.clone(), lot.sensors))
            .collect()
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    /// Returns the refresh interval as Duration (default: 3 seconds)
    pub fn refresh_interval(&self) -> Duration {
        let secs = self
            .server
            .as_ref()
            .and_then(|s| s.refresh_interval_secs)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS);
        Duration::from_secs(secs)
    }
}

fn non_empty_path(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn parse_date(value: &str) -> Result<Date, ConfigError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|err| ConfigError::Invalid(format!("invalid date {value:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp_config(tag: &str, contents: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let path = std::env::temp_dir().join(format!("parksmart-config-{tag}-{unique}.toml"));
        fs::write(&path, contents)?;
        Ok(path)
    }

    const MINIMAL: &str = r#"
[app]
name = "parksmart"

[logging]
level = "info"
"#;

    #[test]
    fn default_config_is_valid() -> Result<(), Box<dyn std::error::Error>> {
        let config = load_default()?;
        assert!(config.generator_settings()?.is_some());
        assert_eq!(config.training_options()?.n_trees, DEFAULT_TREE_COUNT);
        assert_eq!(config.bucket_width()?.minutes(), 30);
        Ok(())
    }

    #[test]
    fn lot_capacities_come_from_sensor_counts() -> Result<(), Box<dyn std::error::Error>> {
        let config = load_default()?;

        let capacities = config.lot_capacities();

        assert_eq!(capacities.len(), 3);
        assert_eq!(capacities.get("lot-north"), Some(&40));
        assert_eq!(capacities.get("lot-visitor"), Some(&12));
        Ok(())
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config("minimal", MINIMAL)?;
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        let options = config.training_options()?;
        assert_eq!(options.seed, DEFAULT_SEED);
        assert_eq!(options.test_fraction, DEFAULT_TEST_FRACTION);
        assert_eq!(options.model, ModelKind::RandomForest);
        assert_eq!(config.events_path(), Path::new(DEFAULT_EVENTS_PATH));
        assert!(config.occupancy_path().is_none());
        assert!(config.generator_settings()?.is_none());
        assert!(config.lot_capacities().is_empty());
        assert_eq!(config.server_port(), DEFAULT_SERVER_PORT);
        assert_eq!(config.refresh_interval(), Duration::from_secs(3));
        Ok(())
    }

    #[test]
    fn empty_occupancy_path_is_treated_as_missing() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!("{MINIMAL}\n[data]\noccupancy_path = \"\"\n");
        let path = write_temp_config("empty-export", &contents)?;
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert!(config.occupancy_path().is_none());
        Ok(())
    }

    #[test]
    fn out_of_range_test_fraction_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!("{MINIMAL}\n[analysis]\ntest_fraction = 1.5\n");
        let path = write_temp_config("fraction", &contents)?;
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert!(matches!(
            config.training_options(),
            Err(ConfigError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn uneven_bucket_width_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!("{MINIMAL}\n[analysis]\nbucket_minutes = 7\n");
        let path = write_temp_config("bucket", &contents)?;
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert!(matches!(config.bucket_width(), Err(ConfigError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn reversed_generator_range_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!(
            r#"{MINIMAL}
[generator]
start_date = "2024-06-10"
end_date = "2024-06-03"

[[generator.lots]]
lot_id = "a"
name = "A"
sensors = 3
"#
        );
        let path = write_temp_config("range", &contents)?;
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert!(matches!(
            config.generator_settings(),
            Err(ConfigError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn unknown_log_level_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let contents = MINIMAL.replace("\"info\"", "\"chatty\"");
        let path = write_temp_config("level", &contents)?;
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert!(matches!(config.log_level(), Err(ConfigError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn missing_config_file_returns_read_error() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("parksmart-config-missing-{unique}.toml"));

        let result = load_from_path(&path);

        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn invalid_toml_returns_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config("invalid", "not = [valid")?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        Ok(())
    }
}
