//! HTTP handlers for API endpoints.

use crate::analysis::predictor::round2;
use crate::web::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

/// Fewest valid samples accepted by the analysis endpoint.
pub const MIN_ANALYSIS_SAMPLES: usize = 10;

/// Error body returned to clients as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse {
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub turbidity: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predicted_life_hours: f64,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub data: Option<Vec<Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub analysis: String,
}

/// Interpret a JSON value as a finite float.
///
/// Numbers and numeric strings qualify; `null`, booleans, containers and
/// non-finite values do not.
pub fn finite_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Keep only the entries that are finite numbers.
pub fn valid_samples(raw: &[Value]) -> Vec<f64> {
    raw.iter().filter_map(finite_number).collect()
}

/// Latest turbidity reading.
pub async fn get_data(State(state): State<AppState>) -> Json<DataResponse> {
    Json(DataResponse {
        value: state.store.read(),
    })
}

/// Predict remaining filter life for a turbidity value.
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let turbidity = match request.turbidity {
        None | Some(Value::Null) => {
            return Err(ApiError::bad_request("Turbidity value is required"))
        }
        Some(value) => finite_number(&value).ok_or_else(|| {
            ApiError::bad_request(format!("Invalid turbidity value: {}", value))
        })?,
    };

    let predictor = state
        .predictor
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("Lifespan model is not loaded"))?;

    let hours = predictor
        .predict(turbidity)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    debug!("Predicted {:.2} hours for turbidity {}", hours, turbidity);
    Ok(Json(PredictResponse {
        predicted_life_hours: round2(hours),
    }))
}

/// Narrative analysis of a batch of turbidity samples.
pub async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        error!("Gemini endpoint error: {:?}", e);
        ApiError::internal("Gemini analysis failed")
    })?;

    let raw = request.data.unwrap_or_default();
    let samples = valid_samples(&raw);
    info!(
        "Received {} values for analysis, {} valid",
        raw.len(),
        samples.len()
    );

    if samples.len() < MIN_ANALYSIS_SAMPLES {
        return Err(ApiError::bad_request("Not enough data points"));
    }

    let analysis = state.insights.generate(&samples).await.map_err(|e| {
        error!("Gemini endpoint error: {:?}", e);
        ApiError::internal("Gemini analysis failed")
    })?;

    debug!("Final analysis: {}", analysis);
    Ok(Json(AnalyzeResponse { analysis }))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "turbidity-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "serial_enabled": state.serial_enabled,
        "has_reading": state.store.has_reading(),
        "reading": state.store.read(),
        "model_loaded": state.predictor.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
