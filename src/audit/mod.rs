//! Append-only audit trail for logins and hardware actions.

use chrono::Local;
use tracing::{debug, warn};

use crate::auth::Session;
use crate::context::{DeviceInfo, GeoInfo};
use crate::db::{
    insert_hardware_event, insert_ip_log, insert_logbook_entry, list_hardware_events, list_logbook,
    DbPool, HardwareEvent, LogbookEntry, LogbookRow,
};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Clone)]
pub struct AuditLog {
    db: DbPool,
}

impl AuditLog {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Write the logbook row and the first-seen geolocation of the address.
    ///
    /// Both writes share one transaction; if either fails nothing is kept.
    pub async fn record_login(
        &self,
        user_id: i64,
        session_id: &str,
        geo: &GeoInfo,
        device: &DeviceInfo,
    ) -> Result<(), sqlx::Error> {
        let now = Local::now();
        let entry = LogbookEntry {
            user_id: Some(user_id),
            session_id: session_id.to_string(),
            ip_address: geo.ip_address.clone(),
            login_date: now.format(DATE_FORMAT).to_string(),
            login_time: now.format(TIME_FORMAT).to_string(),
            browser: device.browser.clone(),
            browser_version: device.browser_version.clone(),
            os: device.os.clone(),
            os_version: device.os_version.clone(),
            device: device.device.clone(),
        };

        let mut tx = self.db.begin().await?;

        insert_logbook_entry(&mut *tx, &entry).await?;

        if let Some(ip_log) = geo.to_ip_log() {
            let inserted = insert_ip_log(&mut *tx, &ip_log).await?;
            debug!(ip = %ip_log.ip_address, inserted, "Recorded caller address");
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record a hardware action. A failed write is logged and otherwise
    /// ignored; the action itself has already happened.
    pub async fn record_hardware_event(&self, hardware_name: &str, session: Option<&Session>) {
        let now = Local::now();
        let result = insert_hardware_event(
            &self.db,
            hardware_name,
            session.map(|s| s.user_id),
            session.map(|s| s.username.as_str()),
            session.map(|s| s.session_id.as_str()),
            &now.format(DATE_FORMAT).to_string(),
            &now.format(TIME_FORMAT).to_string(),
        )
        .await;

        if let Err(e) = result {
            warn!(hardware = %hardware_name, error = %e, "Failed to record hardware event");
        }
    }

    /// Logins joined with user and geolocation, newest first
    pub async fn query_logbook(&self) -> Result<Vec<LogbookRow>, sqlx::Error> {
        list_logbook(&self.db).await
    }

    pub async fn query_hardware_events(&self) -> Result<Vec<HardwareEvent>, sqlx::Error> {
        list_hardware_events(&self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_hardware_events, get_ip_log, test_pool, UserRole};
    use chrono::Utc;

    async fn seed_user(db: &DbPool, name: &str) -> i64 {
        sqlx::query("INSERT INTO users (username, password, role) VALUES (?, 'x', 'read')")
            .bind(name)
            .execute(db)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    fn geo(ip: &str, city: &str) -> GeoInfo {
        GeoInfo {
            ip_address: Some(ip.to_string()),
            city: Some(city.to_string()),
            region: None,
            country: Some("GB".to_string()),
            latitude: Some(51.5),
            longitude: Some(-0.12),
        }
    }

    fn session(user_id: i64) -> Session {
        Session {
            session_id: "abc123".to_string(),
            user_id,
            username: "alice".to_string(),
            role: UserRole::Read,
            created_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_first_geolocation_wins() {
        let db = test_pool().await;
        let audit = AuditLog::new(db.clone());
        let user = seed_user(&db, "alice").await;

        audit
            .record_login(user, "s1", &geo("81.2.69.160", "London"), &DeviceInfo::default())
            .await
            .unwrap();
        audit
            .record_login(user, "s2", &geo("81.2.69.160", "Paris"), &DeviceInfo::default())
            .await
            .unwrap();

        let stored = get_ip_log(&db, "81.2.69.160").await.unwrap().unwrap();
        assert_eq!(stored.city.as_deref(), Some("London"));

        let rows = audit.query_logbook().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].session_id, "s2");
        assert_eq!(rows[0].city.as_deref(), Some("London"));
        assert_eq!(rows[1].username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_login_write_is_atomic() {
        let db = test_pool().await;
        let audit = AuditLog::new(db.clone());
        let user = seed_user(&db, "alice").await;
        sqlx::query("DROP TABLE ip_logs").execute(&db).await.unwrap();

        let result = audit
            .record_login(user, "s1", &geo("81.2.69.160", "London"), &DeviceInfo::default())
            .await;
        assert!(result.is_err());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logbook")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_login_without_address() {
        let db = test_pool().await;
        let audit = AuditLog::new(db.clone());
        let user = seed_user(&db, "alice").await;

        audit
            .record_login(user, "s1", &GeoInfo::null(None), &DeviceInfo::default())
            .await
            .unwrap();

        let rows = audit.query_logbook().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ip_address, None);
        let ip_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ip_logs")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(ip_rows, 0);
    }

    #[tokio::test]
    async fn test_removed_user_keeps_logbook_row() {
        let db = test_pool().await;
        let audit = AuditLog::new(db.clone());
        let user = seed_user(&db, "alice").await;
        audit
            .record_login(user, "s1", &GeoInfo::null(None), &DeviceInfo::default())
            .await
            .unwrap();

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user)
            .execute(&db)
            .await
            .unwrap();

        let rows = audit.query_logbook().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].username, None);
    }

    #[tokio::test]
    async fn test_hardware_events() {
        let db = test_pool().await;
        let audit = AuditLog::new(db.clone());
        let user = seed_user(&db, "alice").await;

        audit.record_hardware_event("Garage Door", Some(&session(user))).await;
        audit.record_hardware_event("Garage Camera", None).await;

        let events = audit.query_hardware_events().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].hardware_name, "Garage Camera");
        assert_eq!(events[0].username, None);
        assert_eq!(events[1].username.as_deref(), Some("alice"));
        assert_eq!(events[1].session_id.as_deref(), Some("abc123"));
        assert_eq!(count_hardware_events(&db, "Garage Door").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hardware_event_failure_is_swallowed() {
        let db = test_pool().await;
        let audit = AuditLog::new(db.clone());
        sqlx::query("DROP TABLE hardware_logs").execute(&db).await.unwrap();

        audit.record_hardware_event("Garage Door", None).await;
    }
}
