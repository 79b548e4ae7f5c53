//! Hardware event log: relay toggles and camera stream starts.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HardwareEvent {
    pub id: i64,
    pub hardware_name: String,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub session_id: Option<String>,
    pub event_date: String,
    pub event_time: String,
}

/// Common hardware names
pub mod hardware_names {
    pub const GARAGE_DOOR: &str = "Garage Door";
    pub const GARAGE_CAMERA: &str = "Garage Camera";
}

pub async fn insert_hardware_event(
    db: &SqlitePool,
    hardware_name: &str,
    user_id: Option<i64>,
    username: Option<&str>,
    session_id: Option<&str>,
    event_date: &str,
    event_time: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO hardware_logs (hardware_name, user_id, username, session_id, event_date, event_time)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(hardware_name)
    .bind(user_id)
    .bind(username)
    .bind(session_id)
    .bind(event_date)
    .bind(event_time)
    .execute(db)
    .await?;

    Ok(result.last_insert_rowid())
}

/// All hardware events, newest first
pub async fn list_hardware_events(db: &SqlitePool) -> Result<Vec<HardwareEvent>, sqlx::Error> {
    sqlx::query_as::<_, HardwareEvent>("SELECT * FROM hardware_logs ORDER BY id DESC")
        .fetch_all(db)
        .await
}

pub async fn count_hardware_events(db: &SqlitePool, hardware_name: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM hardware_logs WHERE hardware_name = ?")
        .bind(hardware_name)
        .fetch_one(db)
        .await
}
