//! Mean occupancy per (lot, weekday, hour, minute) slot, falling back to the
//! lot mean and then the global mean.

use crate::forecast::TrainingRow;
use crate::forecast::model::{Features, ModelKind, Regressor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type SlotKey = (u32, u32, u8, u8);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub lot_code: u32,
    pub weekday_code: u32,
    pub hour: u8,
    pub minute: u8,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMean {
    slots: Vec<SlotEntry>,
    lot_means: BTreeMap<u32, f64>,
    global_mean: f64,
    #[serde(skip)]
    index: BTreeMap<SlotKey, f64>,
}

impl SlotMean {
    pub fn fit(rows: &[TrainingRow]) -> Self {
        let mut slots: BTreeMap<SlotKey, (f64, u32)> = BTreeMap::new();
        let mut lots: BTreeMap<u32, (f64, u32)> = BTreeMap::new();
        let mut total = 0.0;

        for row in rows {
            let target = row.target();
            let slot = slots
                .entry((row.lot_code, row.weekday_code, row.hour, row.minute))
                .or_insert((0.0, 0));
            slot.0 += target;
            slot.1 += 1;
            let lot = lots.entry(row.lot_code).or_insert((0.0, 0));
            lot.0 += target;
            lot.1 += 1;
            total += target;
        }

        let slots = slots
            .into_iter()
            .map(|((lot_code, weekday_code, hour, minute), (sum, count))| SlotEntry {
                lot_code,
                weekday_code,
                hour,
                minute,
                mean: sum / f64::from(count),
            })
            .collect();
        let lot_means = lots
            .into_iter()
            .map(|(lot, (sum, count))| (lot, sum / f64::from(count)))
            .collect();
        let global_mean = if rows.is_empty() {
            0.0
        } else {
            total / rows.len() as f64
        };

        Self::from_parts(slots, lot_means, global_mean)
    }

    fn from_parts(slots: Vec<SlotEntry>, lot_means: BTreeMap<u32, f64>, global_mean: f64) -> Self {
        let index = slots
            .iter()
            .map(|s| ((s.lot_code, s.weekday_code, s.hour, s.minute), s.mean))
            .collect();
        Self {
            slots,
            lot_means,
            global_mean,
            index,
        }
    }

    /// Rebuilds the lookup index after deserialization.
    pub fn reindexed(self) -> Self {
        Self::from_parts(self.slots, self.lot_means, self.global_mean)
    }
}

impl Regressor for SlotMean {
    fn predict(&self, features: &Features) -> f64 {
        let [lot, weekday, hour, minute] = *features;
        let lot_code = lot as u32;
        let key = (lot_code, weekday as u32, hour as u8, minute as u8);
        self.index
            .get(&key)
            .or_else(|| self.lot_means.get(&lot_code))
            .copied()
            .unwrap_or(self.global_mean)
    }

    fn kind(&self) -> ModelKind {
        ModelKind::SlotMean
    }

    fn params(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
