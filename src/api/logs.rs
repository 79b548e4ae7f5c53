use axum::{extract::State, Json};
use std::sync::Arc;

use super::error::ApiError;
use crate::auth::Session;
use crate::db::{HardwareEvent, LogbookRow};
use crate::AppState;

/// Login history, newest first
///
/// GET /logs
pub async fn list_logbook(
    State(state): State<Arc<AppState>>,
    _session: Session,
) -> Result<Json<Vec<LogbookRow>>, ApiError> {
    let rows = state.audit.query_logbook().await?;
    Ok(Json(rows))
}

/// Relay toggles and camera views, newest first
///
/// GET /logs/hardware
pub async fn list_hardware_events(
    State(state): State<Arc<AppState>>,
    _session: Session,
) -> Result<Json<Vec<HardwareEvent>>, ApiError> {
    let events = state.audit.query_hardware_events().await?;
    Ok(Json(events))
}
