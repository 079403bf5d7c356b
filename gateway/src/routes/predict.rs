use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use batchq_common::{DType, ImagePayload, Prediction};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

/// Body of `POST /predict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Base64 of the raw tensor buffer.
    pub image: String,
    /// Defaults to the configured image shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    pub predictions: Vec<Prediction>,
}

/// POST /predict - queue one image and wait for its predictions
async fn predict(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(request) = body?;
    let payload = to_payload(&state, request)?;
    let predictions = state.waiter.predict(payload).await?;

    Ok(Json(PredictResponse {
        success: true,
        predictions,
    }))
}

fn to_payload(state: &AppState, request: PredictRequest) -> Result<ImagePayload, ApiError> {
    let data = STANDARD
        .decode(request.image.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("image is not valid base64: {}", e)))?;

    let expected = &state.config.image;
    let shape = request.shape.unwrap_or_else(|| expected.shape());
    let dtype = request.dtype.unwrap_or(expected.dtype);

    let payload = ImagePayload::new(shape, dtype, data)?;
    expected.check(&payload)?;
    Ok(payload)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/predict", post(predict))
}
