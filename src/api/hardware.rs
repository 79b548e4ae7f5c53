use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;

use super::error::ApiError;
use crate::auth::Session;
use crate::AppState;

/// Pulse the door relay
///
/// GET /actuate
pub async fn actuate(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.actuator.toggle(&session).await?;
    Ok(Json(serde_json::json!({ "status": "success" })))
}

/// Live camera view
///
/// GET /stream
pub async fn stream(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, ApiError> {
    let camera = state.stream.open_stream(&session).await?;

    let content_type = HeaderValue::from_str(&camera.content_type)
        .map_err(|_| ApiError::service_unavailable("Camera sent an invalid content type"))?;
    let body = Body::from_stream(camera.chunks.map(Ok::<_, Infallible>));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store")),
        ],
        body,
    )
        .into_response())
}
