use crate::error::AppError;
use crate::event::Event;
use crate::forecast::Forecaster;
use crate::occupancy::OccupancySample;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    // ordered by lot id
    pub lots: Vec<OccupancySample>,
    // newest first
    pub recent_events: Vec<Event>,
    pub rejected: usize,
    pub refreshed_at: SystemTime,
}

#[derive(Debug)]
pub struct AppState {
    snapshot: Option<Snapshot>,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
    snapshot_rx: watch::Receiver<Option<Snapshot>>,
    forecaster: Option<Arc<Forecaster>>,
    capacities: BTreeMap<String, u32>,
}

impl AppState {
    pub fn new() -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        Self {
            snapshot: None,
            snapshot_tx,
            snapshot_rx,
            forecaster: None,
            capacities: BTreeMap::new(),
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn set_snapshot(&mut self, snapshot: Snapshot) -> Result<(), AppError> {
        self.snapshot = Some(snapshot.clone());
        self.snapshot_tx
            .send(Some(snapshot))
            .map_err(|_| AppError::WatchSend)
    }

    pub fn forecaster(&self) -> Option<Arc<Forecaster>> {
        self.forecaster.clone()
    }

    pub fn set_forecaster(&mut self, forecaster: Option<Arc<Forecaster>>) {
        self.forecaster = forecaster;
    }

    pub fn capacity(&self, lot_id: &str) -> Option<u32> {
        self.capacities.get(lot_id).copied()
    }

    pub fn set_capacities(&mut self, capacities: BTreeMap<String, u32>) {
        self.capacities = capacities;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
