//! Login audit trail: one logbook row per accepted login plus the
//! first-seen geolocation of every address.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite};

/// Row written to `logbook` for an accepted login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogbookEntry {
    pub user_id: Option<i64>,
    pub session_id: String,
    pub ip_address: Option<String>,
    pub login_date: String,
    pub login_time: String,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device: Option<String>,
}

/// Row written to `ip_logs`, keyed by address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct IpLogEntry {
    pub ip_address: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Logbook row joined with its user and geolocation, as displayed
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LogbookRow {
    pub id: i64,
    pub username: Option<String>,
    pub session_id: String,
    pub ip_address: Option<String>,
    pub login_date: String,
    pub login_time: String,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub async fn insert_logbook_entry<'e, E>(executor: E, entry: &LogbookEntry) -> Result<i64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO logbook (user_id, session_id, ip_address, login_date, login_time, browser, browser_version, os, os_version, device)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.user_id)
    .bind(&entry.session_id)
    .bind(&entry.ip_address)
    .bind(&entry.login_date)
    .bind(&entry.login_time)
    .bind(&entry.browser)
    .bind(&entry.browser_version)
    .bind(&entry.os)
    .bind(&entry.os_version)
    .bind(&entry.device)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Insert-or-ignore: returns false when the address was already known.
pub async fn insert_ip_log<'e, E>(executor: E, entry: &IpLogEntry) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO ip_logs (ip_address, city, region, country, latitude, longitude)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.ip_address)
    .bind(&entry.city)
    .bind(&entry.region)
    .bind(&entry.country)
    .bind(entry.latitude)
    .bind(entry.longitude)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// All logins, newest first
pub async fn list_logbook(db: &sqlx::SqlitePool) -> Result<Vec<LogbookRow>, sqlx::Error> {
    sqlx::query_as::<_, LogbookRow>(
        r#"
        SELECT l.id, u.username, l.session_id, l.ip_address, l.login_date, l.login_time,
               l.browser, l.browser_version, l.os, l.os_version, l.device,
               i.city, i.region, i.country, i.latitude, i.longitude
        FROM logbook l
        LEFT JOIN users u ON l.user_id = u.id
        LEFT JOIN ip_logs i ON l.ip_address = i.ip_address
        ORDER BY l.id DESC
        "#,
    )
    .fetch_all(db)
    .await
}

pub async fn get_ip_log(
    db: &sqlx::SqlitePool,
    ip_address: &str,
) -> Result<Option<IpLogEntry>, sqlx::Error> {
    sqlx::query_as::<_, IpLogEntry>("SELECT * FROM ip_logs WHERE ip_address = ?")
        .bind(ip_address)
        .fetch_optional(db)
        .await
}
