use crate::event::EventType;
use crate::forecast::model::ModelKind;
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Ko,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub lots: usize,
    pub model_loaded: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthErrorResponse {
    pub error_code: HealthErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LotsSuccessResponse {
    pub lots: Vec<LotOccupancyResponse>,
    pub rejected_events: usize,
    pub refreshed_at: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LotOccupancyResponse {
    pub lot_id: String,
    pub lot_name: String,
    pub window_start: String,
    pub entry_count: u32,
    pub exit_count: u32,
    pub occupancy: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RecentEventsSuccessResponse {
    pub events: Vec<EventResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EventResponse {
    pub lot_id: String,
    pub lot_name: String,
    pub event_type: EventType,
    pub event_timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DataErrorResponse {
    pub error_code: DataErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PredictSuccessResponse {
    pub lot_id: String,
    pub lot_name: String,
    pub at: String,
    pub predicted_occupancy: f64,
    pub rounded_occupancy: i64,
    pub model: ModelKind,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PredictErrorResponse {
    pub error_code: PredictErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthErrorCode {
    InternalError,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataErrorCode {
    NoData,
    InternalError,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictErrorCode {
    InvalidTimestamp,
    UnknownCategory,
    NoModel,
    InternalError,
}
