use crate::forecast::forest::{ForestParams, RandomForest};
use crate::forecast::slot_mean::SlotMean;
use crate::forecast::{ArtifactError, TrainingRow};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const FEATURE_COUNT: usize = 4;

// [lot_code, weekday_code, hour, minute]
pub type Features = [f64; FEATURE_COUNT];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    RandomForest,
    SlotMean,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::RandomForest => f.write_str("random_forest"),
            ModelKind::SlotMean => f.write_str("slot_mean"),
        }
    }
}

/// Immutable after fitting; shared across threads.
pub trait Regressor: Send + Sync + fmt::Debug {
    fn predict(&self, features: &Features) -> f64;

    fn kind(&self) -> ModelKind;

    fn params(&self) -> Result<serde_json::Value, serde_json::Error>;
}

pub fn fit_regressor(
    kind: ModelKind,
    rows: &[TrainingRow],
    forest: &ForestParams,
) -> Box<dyn Regressor> {
    match kind {
        ModelKind::RandomForest => Box::new(RandomForest::fit(rows, forest)),
        ModelKind::SlotMean => Box::new(SlotMean::fit(rows)),
    }
}

pub fn restore_regressor(
    kind: ModelKind,
    params: serde_json::Value,
) -> Result<Box<dyn Regressor>, ArtifactError> {
    match kind {
        ModelKind::RandomForest => {
            let forest: RandomForest = serde_json::from_value(params)?;
            if forest.tree_count() == 0 {
                return Err(ArtifactError::Invalid("random forest has no trees".to_string()));
            }
            Ok(Box::new(forest))
        }
        ModelKind::SlotMean => {
            let slots: SlotMean = serde_json::from_value(params)?;
            Ok(Box::new(slots.reindexed()))
        }
    }
}
