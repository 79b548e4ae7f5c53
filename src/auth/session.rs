use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{AuthError, CredentialStore};
use crate::audit::AuditLog;
use crate::context::CallerContextResolver;
use crate::db::UserRole;

/// An authenticated session held in process memory
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Identifier recorded in the logbook; not a credential
    pub session_id: String,
    pub user_id: i64,
    pub username: String,
    /// Role at login time; not re-read on later requests
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Generate a random token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Session table keyed by the SHA-256 of the bearer token
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a session and return the token that unlocks it
    pub fn insert(&self, session: Session) -> String {
        let token = generate_token();
        self.sessions.insert(hash_token(&token), session);
        token
    }

    /// Look up a live session. Expired entries are dropped on sight.
    pub fn get(&self, token: &str) -> Option<Session> {
        let key = hash_token(token);
        let session = self.sessions.get(&key).map(|s| s.clone())?;
        if session.is_expired_at(Utc::now()) {
            self.sessions.remove(&key);
            return None;
        }
        Some(session)
    }

    pub fn remove(&self, token: &str) -> Option<Session> {
        self.sessions.remove(&hash_token(token)).map(|(_, s)| s)
    }

    /// Drop every session belonging to `username`
    pub fn remove_user(&self, username: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.username != username);
        before - self.sessions.len()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired_at(now));
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Progress of a single login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    Unauthenticated,
    CredentialsChecked,
    ContextResolved,
    AuditWritten,
    SessionActive,
}

/// A granted session together with the token handed to the client
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub session: Session,
}

/// Turns a credential check into an audited session.
///
/// A session is only stored after its logbook row has been committed, so
/// every live session has a matching audit entry.
pub struct SessionManager {
    credentials: Arc<CredentialStore>,
    resolver: Arc<dyn CallerContextResolver>,
    audit: AuditLog,
    sessions: SessionStore,
}

impl SessionManager {
    pub fn new(
        credentials: Arc<CredentialStore>,
        resolver: Arc<dyn CallerContextResolver>,
        audit: AuditLog,
        ttl: Duration,
    ) -> Self {
        Self {
            credentials,
            resolver,
            audit,
            sessions: SessionStore::new(ttl),
        }
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Result<LoginOutcome, AuthError> {
        let user = match self.credentials.verify(username, password).await {
            Ok(user) => user,
            Err(e) => {
                warn!(stage = ?LoginStage::Unauthenticated, username = %username, error = %e, "Login rejected");
                return Err(e);
            }
        };
        debug!(stage = ?LoginStage::CredentialsChecked, username = %user.username);

        let context = self.resolver.resolve_context(headers, peer).await;
        debug!(
            stage = ?LoginStage::ContextResolved,
            ip = ?context.geo.ip_address,
            browser = ?context.device.browser,
        );

        let session_id = uuid::Uuid::new_v4().simple().to_string();
        if let Err(e) = self
            .audit
            .record_login(user.user_id, &session_id, &context.geo, &context.device)
            .await
        {
            warn!(stage = ?LoginStage::ContextResolved, username = %user.username, error = %e, "Login rejected, audit write failed");
            return Err(AuthError::Storage(e));
        }
        debug!(stage = ?LoginStage::AuditWritten, session_id = %session_id);

        let now = Utc::now();
        let session = Session {
            session_id,
            user_id: user.user_id,
            username: user.username,
            role: user.role,
            created_at: now,
            expires_at: now + self.sessions.ttl(),
        };
        let token = self.sessions.insert(session.clone());

        info!(
            stage = ?LoginStage::SessionActive,
            username = %session.username,
            role = %session.role,
            session_id = %session.session_id,
            "User logged in"
        );

        Ok(LoginOutcome { token, session })
    }

    /// Resolve a bearer token to its live session
    pub fn authenticate(&self, token: &str) -> Option<Session> {
        self.sessions.get(token)
    }

    pub fn logout(&self, token: &str) -> Option<Session> {
        let session = self.sessions.remove(token)?;
        info!(username = %session.username, session_id = %session.session_id, "User logged out");
        Some(session)
    }

    /// End all sessions of a removed account
    pub fn revoke_user(&self, username: &str) -> usize {
        let revoked = self.sessions.remove_user(username);
        if revoked > 0 {
            info!(username = %username, revoked, "Revoked sessions");
        }
        revoked
    }

    pub fn purge_expired(&self) -> usize {
        self.sessions.purge_expired()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

/// Spawn a background task to periodically drop expired sessions
pub fn spawn_cleanup_task(manager: Arc<SessionManager>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            let purged = manager.purge_expired();
            debug!(
                purged,
                remaining = manager.active_sessions(),
                "Session cleanup complete"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_store;
    use crate::context::{CallerContext, DeviceInfo, GeoInfo};
    use crate::db::{list_logbook, test_pool, DbPool};
    use async_trait::async_trait;

    struct FixedResolver(CallerContext);

    #[async_trait]
    impl CallerContextResolver for FixedResolver {
        async fn resolve_context(&self, _headers: &HeaderMap, _peer: Option<SocketAddr>) -> CallerContext {
            self.0.clone()
        }
    }

    fn fixed_context(ip: &str) -> CallerContext {
        CallerContext {
            geo: GeoInfo {
                ip_address: Some(ip.to_string()),
                city: Some("Leeds".to_string()),
                region: Some("England".to_string()),
                country: Some("GB".to_string()),
                latitude: Some(53.8),
                longitude: Some(-1.55),
            },
            device: DeviceInfo {
                browser: Some("Firefox".to_string()),
                browser_version: Some("128.0".to_string()),
                os: Some("Linux".to_string()),
                os_version: None,
                device: Some("Other".to_string()),
            },
        }
    }

    async fn manager_with(db: DbPool, ttl: Duration) -> SessionManager {
        let credentials = Arc::new(test_store(db.clone()));
        credentials.add_user("alice", "s3cret").await.unwrap();
        credentials.ensure_admin("root", "toor").await.unwrap();
        SessionManager::new(
            credentials,
            Arc::new(FixedResolver(fixed_context("81.2.69.160"))),
            AuditLog::new(db),
            ttl,
        )
    }

    async fn logbook_count(db: &DbPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM logbook")
            .fetch_one(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_creates_one_row_and_one_session() {
        let db = test_pool().await;
        let manager = manager_with(db.clone(), Duration::hours(1)).await;

        let outcome = manager
            .login("alice", "s3cret", &HeaderMap::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.session.username, "alice");
        assert_eq!(outcome.session.role, UserRole::Read);
        assert_eq!(manager.active_sessions(), 1);
        assert_eq!(logbook_count(&db).await, 1);

        let rows = list_logbook(&db).await.unwrap();
        assert_eq!(rows[0].session_id, outcome.session.session_id);
        assert_eq!(rows[0].username.as_deref(), Some("alice"));
        assert_eq!(rows[0].city.as_deref(), Some("Leeds"));

        let found = manager.authenticate(&outcome.token).unwrap();
        assert_eq!(found.session_id, outcome.session.session_id);
    }

    #[tokio::test]
    async fn test_rejected_login_leaves_no_trace() {
        let db = test_pool().await;
        let manager = manager_with(db.clone(), Duration::hours(1)).await;

        for (user, pass) in [("alice", "wrong"), ("nobody", "s3cret"), ("", "s3cret"), ("alice", "")] {
            assert!(manager.login(user, pass, &HeaderMap::new(), None).await.is_err());
        }

        assert_eq!(manager.active_sessions(), 0);
        assert_eq!(logbook_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_audit_failure_denies_session() {
        let db = test_pool().await;
        let manager = manager_with(db.clone(), Duration::hours(1)).await;
        sqlx::query("DROP TABLE ip_logs").execute(&db).await.unwrap();

        let result = manager.login("alice", "s3cret", &HeaderMap::new(), None).await;

        assert!(matches!(result, Err(AuthError::Storage(_))));
        assert_eq!(manager.active_sessions(), 0);
        // the logbook insert ran first and must have been rolled back
        assert_eq!(logbook_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_logins_are_independent() {
        let db = test_pool().await;
        let manager = manager_with(db.clone(), Duration::hours(1)).await;

        let first = manager.login("alice", "s3cret", &HeaderMap::new(), None).await.unwrap();
        let second = manager.login("alice", "s3cret", &HeaderMap::new(), None).await.unwrap();

        assert_ne!(first.token, second.token);
        assert_ne!(first.session.session_id, second.session.session_id);
        assert_eq!(manager.active_sessions(), 2);
        assert_eq!(logbook_count(&db).await, 2);
    }

    #[tokio::test]
    async fn test_admin_role_captured() {
        let db = test_pool().await;
        let manager = manager_with(db, Duration::hours(1)).await;
        let outcome = manager.login("root", "toor", &HeaderMap::new(), None).await.unwrap();
        assert!(outcome.session.is_admin());
    }

    #[tokio::test]
    async fn test_logout_and_expiry() {
        let db = test_pool().await;
        let manager = manager_with(db.clone(), Duration::hours(1)).await;
        let outcome = manager.login("alice", "s3cret", &HeaderMap::new(), None).await.unwrap();

        assert!(manager.logout(&outcome.token).is_some());
        assert!(manager.authenticate(&outcome.token).is_none());
        assert!(manager.logout(&outcome.token).is_none());

        let expired = manager_with(test_pool().await, Duration::zero()).await;
        let outcome = expired.login("alice", "s3cret", &HeaderMap::new(), None).await.unwrap();
        assert!(expired.authenticate(&outcome.token).is_none());
        assert_eq!(expired.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_revoke_user_ends_only_their_sessions() {
        let db = test_pool().await;
        let manager = manager_with(db, Duration::hours(1)).await;
        let first = manager.login("alice", "s3cret", &HeaderMap::new(), None).await.unwrap();
        let second = manager.login("alice", "s3cret", &HeaderMap::new(), None).await.unwrap();
        let admin = manager.login("root", "toor", &HeaderMap::new(), None).await.unwrap();

        assert_eq!(manager.revoke_user("alice"), 2);
        assert!(manager.authenticate(&first.token).is_none());
        assert!(manager.authenticate(&second.token).is_none());
        assert!(manager.authenticate(&admin.token).is_some());
        assert_eq!(manager.revoke_user("alice"), 0);
    }

    #[test]
    fn test_store_purges_expired() {
        let store = SessionStore::new(Duration::hours(1));
        let now = Utc::now();
        let session = |expires_at| Session {
            session_id: "id".to_string(),
            user_id: 1,
            username: "alice".to_string(),
            role: UserRole::Read,
            created_at: now,
            expires_at,
        };
        let live = store.insert(session(now + Duration::hours(1)));
        store.insert(session(now - Duration::seconds(1)));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(&live).is_some());
        assert!(store.get("not-a-token").is_none());
    }
}
