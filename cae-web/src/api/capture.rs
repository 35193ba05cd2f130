//! Image capture endpoint

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use cae_common::ColorResult;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Multipart field carrying the upload
pub const IMAGE_FIELD: &str = "image";

/// Largest accepted request body
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// POST /capture success body
#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub message: String,
    pub document_id: String,
    pub result: ColorResult,
}

/// POST /capture
///
/// Stores the `image` part, waits for its analysis and returns the result
/// (201). A request with no `image` part, or an empty one, is rejected with
/// 400 before anything is stored; a body over [`MAX_UPLOAD_BYTES`] gets 413.
pub async fn capture(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<CaptureResponse>)> {
    let Ok(mut multipart) = multipart else {
        return Err(ApiError::Validation("No image part"));
    };

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::from)?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(ApiError::from)?;
        upload = Some((file_name, bytes));
        break;
    }

    let Some((file_name, bytes)) = upload else {
        return Err(ApiError::Validation("No image part"));
    };
    if file_name.is_empty() || bytes.is_empty() {
        return Err(ApiError::Validation("No selected file"));
    }
    debug!(%file_name, size = bytes.len(), "Upload received");

    let result = match state
        .coordinator
        .submit_and_wait(&bytes, state.result_timeout)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            warn!(%file_name, error = %e, "Capture failed");
            return Err(e.into());
        }
    };

    info!(document_id = %result.image_id, hex = %result.hex, name = %result.name, "Capture analysed");
    Ok((
        StatusCode::CREATED,
        Json(CaptureResponse {
            message: "Image saved to database and analysis triggered".to_string(),
            document_id: result.image_id.clone(),
            result,
        }),
    ))
}

/// Build capture routes
pub fn capture_routes() -> Router<AppState> {
    Router::new()
        .route("/capture", post(capture))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
