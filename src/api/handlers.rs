use crate::api::responses::{
    DataErrorCode, DataErrorResponse, EventResponse, HealthErrorCode, HealthErrorResponse,
    HealthStatus, HealthSuccessResponse, LotOccupancyResponse, LotsSuccessResponse,
    PredictErrorCode, PredictErrorResponse, PredictSuccessResponse, RecentEventsSuccessResponse,
};
use crate::event::{format_timestamp, parse_timestamp};
use crate::forecast::ForecastError;
use crate::state::{AppState, Snapshot};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const NO_DATA_MESSAGE: &str = "No events loaded yet";

pub enum HealthResponse {
    Success {
        status: StatusCode,
        body: HealthSuccessResponse,
    },
    Error {
        status: StatusCode,
        body: HealthErrorResponse,
    },
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        match self {
            HealthResponse::Success { status, body } => (status, Json(body)).into_response(),
            HealthResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_health(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_health_response(state, SystemTime::now())
}

pub enum LotsResponse {
    Success(LotsSuccessResponse),
    Error {
        status: StatusCode,
        body: DataErrorResponse,
    },
}

impl IntoResponse for LotsResponse {
    fn into_response(self) -> Response {
        match self {
            LotsResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            LotsResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_lots(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_lots_response(state, SystemTime::now())
}

pub enum RecentEventsResponse {
    Success(RecentEventsSuccessResponse),
    Error {
        status: StatusCode,
        body: DataErrorResponse,
    },
}

impl IntoResponse for RecentEventsResponse {
    fn into_response(self) -> Response {
        match self {
            RecentEventsResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            RecentEventsResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_recent_events(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_recent_events_response(state, SystemTime::now())
}

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    pub lot_id: String,
    // same forms as the events file
    pub at: String,
}

pub enum PredictResponse {
    Success(PredictSuccessResponse),
    Error {
        status: StatusCode,
        body: PredictErrorResponse,
    },
}

impl IntoResponse for PredictResponse {
    fn into_response(self) -> Response {
        match self {
            PredictResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            PredictResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_predict(
    State(state): State<Arc<RwLock<AppState>>>,
    Query(query): Query<PredictQuery>,
) -> impl IntoResponse {
    build_predict_response(state, &query, SystemTime::now())
}

fn response_timestamp(timestamp: SystemTime) -> String {
    OffsetDateTime::from(timestamp)
        .format(&Rfc3339)
        .unwrap_or_else(|err| {
            error!(error = %err, "Failed to format response timestamp");
            "1970-01-01T00:00:00Z".to_string()
        })
}

fn build_health_response(state: Arc<RwLock<AppState>>, now: SystemTime) -> HealthResponse {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return health_internal_error("state lock poisoned while reading snapshot");
        }
    };
    let lots = guard.snapshot().map_or(0, |snapshot| snapshot.lots.len());
    let model_loaded = guard.forecaster().is_some();
    drop(guard);

    let status = derive_health_status(lots, model_loaded);
    let status_code = match status {
        HealthStatus::Ko => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
    };

    HealthResponse::Success {
        status: status_code,
        body: HealthSuccessResponse {
            status,
            lots,
            model_loaded,
            timestamp: response_timestamp(now),
        },
    }
}

fn derive_health_status(lots: usize, model_loaded: bool) -> HealthStatus {
    match (lots > 0, model_loaded) {
        (false, _) => HealthStatus::Ko,
        (true, false) => HealthStatus::Degraded,
        (true, true) => HealthStatus::Ok,
    }
}

fn health_internal_error(message: &str) -> HealthResponse {
    error!(
        message = message,
        "Internal error while handling /api/health"
    );
    HealthResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: HealthErrorResponse {
            error_code: HealthErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: response_timestamp(SystemTime::now()),
        },
    }
}

/// Copies what `read` needs out of the lock, or builds the matching error
/// body. `None` from `read` means no snapshot has been published yet.
fn read_snapshot<T>(
    state: &Arc<RwLock<AppState>>,
    route: &str,
    now: SystemTime,
    read: impl FnOnce(&AppState) -> Option<T>,
) -> Result<T, (StatusCode, DataErrorResponse)> {
    let snapshot = match state.read() {
        Ok(guard) => read(&*guard),
        Err(_) => {
            error!(
                message = "state lock poisoned while reading snapshot",
                route = route,
                "Internal error while handling request"
            );
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                DataErrorResponse {
                    error_code: DataErrorCode::InternalError,
                    error_message: INTERNAL_ERROR_MESSAGE.to_string(),
                    timestamp: response_timestamp(SystemTime::now()),
                },
            ));
        }
    };

    snapshot.ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            DataErrorResponse {
                error_code: DataErrorCode::NoData,
                error_message: NO_DATA_MESSAGE.to_string(),
                timestamp: response_timestamp(now),
            },
        )
    })
}

fn build_lots_response(state: Arc<RwLock<AppState>>, now: SystemTime) -> LotsResponse {
    let read = |app: &AppState| -> Option<(Snapshot, Vec<Option<u32>>)> {
        let snapshot = app.snapshot()?.clone();
        let capacities: Vec<Option<u32>> = snapshot
            .lots
            .iter()
            .map(|sample| app.capacity(sample.lot_id()))
            .collect();
        Some((snapshot, capacities))
    };
    let (snapshot, capacities) = match read_snapshot(&state, "/api/lots", now, read) {
        Ok(loaded) => loaded,
        Err((status, body)) => return LotsResponse::Error { status, body },
    };

    let lots = snapshot
        .lots
        .iter()
        .zip(capacities)
        .map(|(sample, capacity)| LotOccupancyResponse {
            lot_id: sample.lot_id().to_string(),
            lot_name: sample.lot_name().to_string(),
            window_start: format_timestamp(sample.window_start()),
            entry_count: sample.bucket.entry_count,
            exit_count: sample.bucket.exit_count,
            occupancy: sample.occupancy,
            capacity,
            available: capacity.map(|capacity| available_spaces(capacity, sample.occupancy)),
        })
        .collect();

    LotsResponse::Success(LotsSuccessResponse {
        lots,
        rejected_events: snapshot.rejected,
        refreshed_at: response_timestamp(snapshot.refreshed_at),
        timestamp: response_timestamp(now),
    })
}

// The running total can leave [0, capacity]; only the displayed count is clamped.
fn available_spaces(capacity: u32, occupancy: i64) -> u32 {
    let free = (i64::from(capacity) - occupancy).clamp(0, i64::from(capacity));
    u32::try_from(free).unwrap_or(capacity)
}

fn build_recent_events_response(
    state: Arc<RwLock<AppState>>,
    now: SystemTime,
) -> RecentEventsResponse {
    let snapshot = match read_snapshot(&state, "/api/events/recent", now, |app| {
        app.snapshot().cloned()
    }) {
        Ok(snapshot) => snapshot,
        Err((status, body)) => return RecentEventsResponse::Error { status, body },
    };

    let events = snapshot
        .recent_events
        .into_iter()
        .map(|event| EventResponse {
            event_timestamp: format_timestamp(event.timestamp),
            lot_id: event.lot_id,
            lot_name: event.lot_name,
            event_type: event.event_type,
        })
        .collect();

    RecentEventsResponse::Success(RecentEventsSuccessResponse {
        events,
        timestamp: response_timestamp(now),
    })
}

fn build_predict_response(
    state: Arc<RwLock<AppState>>,
    query: &PredictQuery,
    now: SystemTime,
) -> PredictResponse {
    let forecaster = match state.read() {
        Ok(guard) => guard.forecaster(),
        Err(_) => return predict_internal_error("state lock poisoned while reading model"),
    };
    let Some(forecaster) = forecaster else {
        return predict_error(
            StatusCode::SERVICE_UNAVAILABLE,
            PredictErrorCode::NoModel,
            "No trained model loaded".to_string(),
            now,
        );
    };

    let at = match parse_timestamp(&query.at) {
        Ok(at) => at,
        Err(err) => {
            return predict_error(
                StatusCode::BAD_REQUEST,
                PredictErrorCode::InvalidTimestamp,
                err.to_string(),
                now,
            );
        }
    };

    match forecaster.predict(&query.lot_id, at) {
        Ok(prediction) => PredictResponse::Success(PredictSuccessResponse {
            rounded_occupancy: prediction.rounded(),
            predicted_occupancy: prediction.occupancy,
            at: format_timestamp(prediction.at),
            lot_id: prediction.lot_id,
            lot_name: prediction.lot_name,
            model: forecaster.summary().model,
            timestamp: response_timestamp(now),
        }),
        Err(err @ ForecastError::UnknownCategory { .. }) => {
            warn!(lot_id = %query.lot_id, error = %err, "Prediction rejected");
            predict_error(
                StatusCode::NOT_FOUND,
                PredictErrorCode::UnknownCategory,
                err.to_string(),
                now,
            )
        }
        Err(err) => {
            error!(error = %err, "Prediction failed");
            predict_internal_error("prediction failed")
        }
    }
}

fn predict_error(
    status: StatusCode,
    error_code: PredictErrorCode,
    error_message: String,
    now: SystemTime,
) -> PredictResponse {
    PredictResponse::Error {
        status,
        body: PredictErrorResponse {
            error_code,
            error_message,
            timestamp: response_timestamp(now),
        },
    }
}

fn predict_internal_error(message: &str) -> PredictResponse {
    error!(
        message = message,
        "Internal error while handling /api/predict"
    );
    predict_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        PredictErrorCode::InternalError,
        INTERNAL_ERROR_MESSAGE.to_string(),
        SystemTime::now(),
    )
}
