pub mod api;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod hardware;
pub mod stream;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::audit::AuditLog;
use crate::auth::{AuthError, CredentialStore, SessionManager};
use crate::context::CallerContextResolver;
use crate::hardware::{DeviceActuator, RelayDriver};
use crate::stream::{CameraSource, StreamProxy};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub credentials: Arc<CredentialStore>,
    pub sessions: Arc<SessionManager>,
    pub audit: AuditLog,
    pub actuator: DeviceActuator,
    pub stream: StreamProxy,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: DbPool,
        resolver: Arc<dyn CallerContextResolver>,
        relay: Arc<dyn RelayDriver>,
        camera: Arc<dyn CameraSource>,
    ) -> Result<Self, AuthError> {
        let credentials = Arc::new(CredentialStore::new(db.clone(), &config.auth)?);
        Ok(Self::with_credentials(config, db, credentials, resolver, relay, camera))
    }

    /// Build the state around an existing credential store
    pub fn with_credentials(
        config: Config,
        db: DbPool,
        credentials: Arc<CredentialStore>,
        resolver: Arc<dyn CallerContextResolver>,
        relay: Arc<dyn RelayDriver>,
        camera: Arc<dyn CameraSource>,
    ) -> Self {
        let audit = AuditLog::new(db.clone());
        let sessions = Arc::new(SessionManager::new(
            credentials.clone(),
            resolver,
            audit.clone(),
            chrono::Duration::hours(config.auth.session_ttl_hours),
        ));
        let actuator = DeviceActuator::new(relay, &config.relay, audit.clone());
        let stream = StreamProxy::new(camera, config.camera.hardware_name.clone(), audit.clone());
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        Self {
            config,
            db,
            credentials,
            sessions,
            audit,
            actuator,
            stream,
            rate_limiter,
        }
    }
}
