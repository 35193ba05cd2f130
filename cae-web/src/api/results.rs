//! Result lookup endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use cae_common::ColorResult;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// GET /api/results/latest
///
/// Most recent completion seen by this process
pub async fn latest_result(State(state): State<AppState>) -> ApiResult<Json<ColorResult>> {
    state
        .coordinator
        .fetch_latest()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no result yet".to_string()))
}

/// GET /api/results/image/:image_id
pub async fn result_for_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> ApiResult<Json<ColorResult>> {
    state
        .coordinator
        .fetch_for_image(&image_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("result for image {}", image_id)))
}

/// GET /api/results/:result_id
pub async fn result_by_id(
    State(state): State<AppState>,
    Path(result_id): Path<String>,
) -> ApiResult<Json<ColorResult>> {
    Ok(Json(state.coordinator.fetch_result(&result_id).await?))
}
