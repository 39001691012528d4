//! Occupancy forecasting from calendar features. A [`Forecaster`] refuses
//! lots and weekdays its encoders have not seen.

use crate::occupancy::OccupancySample;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use time::PrimitiveDateTime;
use tracing::info;

pub mod encoder;
pub mod forest;
pub mod model;
pub mod slot_mean;

use encoder::CategoryEncoder;
use forest::ForestParams;
use model::{Features, ModelKind, Regressor, fit_regressor, restore_regressor};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Lot,
    Weekday,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Lot => f.write_str("lot"),
            Category::Weekday => f.write_str("weekday"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    #[error("insufficient training data: {usable} usable rows")]
    InsufficientData { usable: usize },
    #[error("unknown {category} {value:?}: not seen during training")]
    UnknownCategory { category: Category, value: String },
    #[error("invalid training options: {0}")]
    InvalidOptions(String),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("model artifact io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize model artifact: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported model artifact version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid model artifact: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingRow {
    pub lot_code: u32,
    pub weekday_code: u32,
    pub hour: u8,
    pub minute: u8,
    pub occupancy: i64,
}

impl TrainingRow {
    pub fn features(&self) -> Features {
        [
            f64::from(self.lot_code),
            f64::from(self.weekday_code),
            f64::from(self.hour),
            f64::from(self.minute),
        ]
    }

    pub fn target(&self) -> f64 {
        self.occupancy as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    pub rows: Vec<TrainingRow>,
    pub lots: CategoryEncoder,
    pub weekdays: CategoryEncoder,
    // lot id -> display name
    pub lot_names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOptions {
    pub model: ModelKind,
    pub seed: u64,
    /// Share of rows held out for evaluation, in (0, 1).
    pub test_fraction: f64,
    pub n_trees: usize,
    pub max_depth: Option<usize>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            model: ModelKind::RandomForest,
            seed: 42,
            test_fraction: 0.2,
            n_trees: 100,
            max_depth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub model: ModelKind,
    pub seed: u64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub rmse: f64,
}

/// Samples without a lot id are dropped.
pub fn build_training_set(samples: &[OccupancySample]) -> TrainingSet {
    let usable: Vec<&OccupancySample> = samples
        .iter()
        .filter(|sample| !sample.lot_id().trim().is_empty())
        .collect();

    let lots = CategoryEncoder::from_values(usable.iter().map(|s| s.lot_id()));
    let weekdays = CategoryEncoder::from_values(usable.iter().map(|s| s.weekday().to_string()));
    let mut lot_names = BTreeMap::new();
    for sample in &usable {
        lot_names
            .entry(sample.lot_id().to_string())
            .or_insert_with(|| sample.lot_name().to_string());
    }

    let rows = usable
        .iter()
        .filter_map(|sample| {
            Some(TrainingRow {
                lot_code: lots.encode(sample.lot_id())?,
                weekday_code: weekdays.encode(&sample.weekday().to_string())?,
                hour: sample.hour(),
                minute: sample.minute(),
                occupancy: sample.occupancy,
            })
        })
        .collect();

    TrainingSet {
        rows,
        lots,
        weekdays,
        lot_names,
    }
}

/// Returns `(train, test)`; the test side receives `ceil(test_fraction * n)` rows.
pub fn split_indices(
    n: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), ForecastError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(ForecastError::InvalidOptions(format!(
            "test_fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    let n_test = (test_fraction * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(ForecastError::InsufficientData { usable: n });
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    // test rows first, the rest trains
    let train = indices.split_off(n_test);
    Ok((train, indices))
}

pub fn rmse(model: &dyn Regressor, rows: &[TrainingRow]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let squared: f64 = rows
        .iter()
        .map(|row| {
            let error = model.predict(&row.features()) - row.target();
            error * error
        })
        .sum();
    (squared / rows.len() as f64).sqrt()
}

pub fn fit_and_evaluate(
    rows: &[TrainingRow],
    options: &TrainingOptions,
) -> Result<(Box<dyn Regressor>, TrainingSummary), ForecastError> {
    if options.n_trees == 0 {
        return Err(ForecastError::InvalidOptions(
            "n_trees must be positive".to_string(),
        ));
    }
    let (train_idx, test_idx) = split_indices(rows.len(), options.test_fraction, options.seed)?;
    let train_rows: Vec<TrainingRow> = train_idx.iter().map(|&i| rows[i]).collect();
    let test_rows: Vec<TrainingRow> = test_idx.iter().map(|&i| rows[i]).collect();

    let params = ForestParams {
        n_trees: options.n_trees,
        max_depth: options.max_depth,
        seed: options.seed,
        ..ForestParams::default()
    };
    let regressor = fit_regressor(options.model, &train_rows, &params);
    let summary = TrainingSummary {
        model: options.model,
        seed: options.seed,
        train_rows: train_rows.len(),
        test_rows: test_rows.len(),
        rmse: rmse(regressor.as_ref(), &test_rows),
    };
    Ok((regressor, summary))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub lot_id: String,
    pub lot_name: String,
    pub at: PrimitiveDateTime,
    pub occupancy: f64,
}

impl Prediction {
    pub fn rounded(&self) -> i64 {
        self.occupancy.round() as i64
    }
}

/// A trained model together with the encoders it was trained with.
#[derive(Debug)]
pub struct Forecaster {
    lots: CategoryEncoder,
    weekdays: CategoryEncoder,
    lot_names: BTreeMap<String, String>,
    regressor: Box<dyn Regressor>,
    summary: TrainingSummary,
}

pub fn train(
    samples: &[OccupancySample],
    options: &TrainingOptions,
) -> Result<Forecaster, ForecastError> {
    let set = build_training_set(samples);
    if set.rows.is_empty() {
        return Err(ForecastError::InsufficientData { usable: 0 });
    }

    let (regressor, summary) = fit_and_evaluate(&set.rows, options)?;
    info!(
        model = %summary.model,
        train_rows = summary.train_rows,
        test_rows = summary.test_rows,
        rmse = summary.rmse,
        lots = set.lots.len(),
        "Forecast model trained"
    );

    Ok(Forecaster {
        lots: set.lots,
        weekdays: set.weekdays,
        lot_names: set.lot_names,
        regressor,
        summary,
    })
}

impl Forecaster {
    pub fn predict(&self, lot_id: &str, at: PrimitiveDateTime) -> Result<Prediction, ForecastError> {
        let lot_code = self
            .lots
            .encode(lot_id)
            .ok_or_else(|| ForecastError::UnknownCategory {
                category: Category::Lot,
                value: lot_id.to_string(),
            })?;
        let weekday = at.weekday().to_string();
        let weekday_code =
            self.weekdays
                .encode(&weekday)
                .ok_or_else(|| ForecastError::UnknownCategory {
                    category: Category::Weekday,
                    value: weekday.clone(),
                })?;

        let row = TrainingRow {
            lot_code,
            weekday_code,
            hour: at.hour(),
            minute: at.minute(),
            occupancy: 0,
        };
        Ok(Prediction {
            lot_id: lot_id.to_string(),
            lot_name: self
                .lot_names
                .get(lot_id)
                .cloned()
                .unwrap_or_else(|| lot_id.to_string()),
            at,
            occupancy: self.regressor.predict(&row.features()),
        })
    }

    pub fn summary(&self) -> &TrainingSummary {
        &self.summary
    }

    pub fn lots(&self) -> &CategoryEncoder {
        &self.lots
    }

    pub fn weekdays(&self) -> &CategoryEncoder {
        &self.weekdays
    }

    pub fn to_artifact(&self) -> Result<ModelArtifact, ArtifactError> {
        Ok(ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            model: self.regressor.kind(),
            lots: self.lots.clone(),
            weekdays: self.weekdays.clone(),
            lot_names: self.lot_names.clone(),
            summary: self.summary.clone(),
            params: self.regressor.params()?,
        })
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ArtifactError> {
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion(artifact.format_version));
        }
        if artifact.lots.is_empty() || artifact.weekdays.is_empty() {
            return Err(ArtifactError::Invalid(
                "artifact has empty category encoders".to_string(),
            ));
        }
        let regressor = restore_regressor(artifact.model, artifact.params)?;
        Ok(Self {
            lots: artifact.lots,
            weekdays: artifact.weekdays,
            lot_names: artifact.lot_names,
            regressor,
            summary: artifact.summary,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(&self.to_artifact()?)?;
        std::fs::write(path, contents)?;
        info!(path = %path.display(), "Model artifact saved");
        Ok(())
    }
}

/// Persisted form of a [`Forecaster`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub model: ModelKind,
    pub lots: CategoryEncoder,
    pub weekdays: CategoryEncoder,
    pub lot_names: BTreeMap<String, String>,
    pub summary: TrainingSummary,
    pub params: serde_json::Value,
}

pub fn load_forecaster(path: impl AsRef<Path>) -> Result<Forecaster, ArtifactError> {
    let contents = std::fs::read_to_string(path)?;
    let artifact: ModelArtifact = serde_json::from_str(&contents)?;
    Forecaster::from_artifact(artifact)
}
