//! Relay control for the garage door.
//!
//! The relay is driven through a [`RelayDriver`]. Every pulse opens the line,
//! holds it active for the configured time and releases it. A [`RelayGuard`]
//! turns the line off and closes it on every exit path, including when the
//! pulse future is dropped half way through.

mod sysfs;

pub use sysfs::SysfsRelay;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::auth::Session;
use crate::config::{RelayConfig, RelayDriverType};

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("Hardware fault: {0}")]
    Fault(String),

    #[error("Relay is busy")]
    Busy,
}

impl From<std::io::Error> for HardwareError {
    fn from(e: std::io::Error) -> Self {
        HardwareError::Fault(e.to_string())
    }
}

/// Opens the relay output line
pub trait RelayDriver: Send + Sync {
    fn open(&self) -> Result<Box<dyn RelayLine>, HardwareError>;
}

/// An opened relay output
pub trait RelayLine: Send {
    fn set_active(&mut self, active: bool) -> Result<(), HardwareError>;
    /// Give the line back. Called exactly once.
    fn close(&mut self);
}

/// Owns an open line; leaves it inactive and closed when dropped
pub struct RelayGuard {
    line: Option<Box<dyn RelayLine>>,
}

impl RelayGuard {
    pub fn new(line: Box<dyn RelayLine>) -> Self {
        Self { line: Some(line) }
    }

    pub fn set_active(&mut self, active: bool) -> Result<(), HardwareError> {
        match self.line.as_mut() {
            Some(line) => line.set_active(active),
            None => Err(HardwareError::Fault("Relay line already released".to_string())),
        }
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if let Some(mut line) = self.line.take() {
            if let Err(e) = line.set_active(false) {
                warn!(error = %e, "Failed to switch relay off while releasing it");
            }
            line.close();
        }
    }
}

/// Driver used when no relay is wired up
pub struct NoopRelay;

impl RelayDriver for NoopRelay {
    fn open(&self) -> Result<Box<dyn RelayLine>, HardwareError> {
        Err(HardwareError::Fault("No relay configured".to_string()))
    }
}

pub fn create_driver(config: &RelayConfig) -> Arc<dyn RelayDriver> {
    match config.driver {
        RelayDriverType::Sysfs => {
            info!(pin = config.pin, root = %config.gpio_root.display(), "Using sysfs GPIO relay");
            Arc::new(SysfsRelay::new(
                config.gpio_root.clone(),
                config.pin,
                config.active_high,
            ))
        }
        RelayDriverType::None => {
            warn!("No relay driver configured. Door toggles will fail.");
            Arc::new(NoopRelay)
        }
    }
}

/// Pulses the relay on behalf of an authenticated session.
///
/// Only one pulse runs at a time. A toggle that arrives while a pulse is in
/// flight is refused with [`HardwareError::Busy`] rather than queued.
pub struct DeviceActuator {
    driver: Arc<dyn RelayDriver>,
    lock: Mutex<()>,
    pulse: Duration,
    hardware_name: String,
    audit: AuditLog,
}

impl DeviceActuator {
    pub fn new(driver: Arc<dyn RelayDriver>, config: &RelayConfig, audit: AuditLog) -> Self {
        Self {
            driver,
            lock: Mutex::new(()),
            pulse: Duration::from_millis(config.pulse_ms),
            hardware_name: config.hardware_name.clone(),
            audit,
        }
    }

    pub fn hardware_name(&self) -> &str {
        &self.hardware_name
    }

    /// Press the button once. The hardware event is recorded only after a
    /// complete pulse.
    pub async fn toggle(&self, session: &Session) -> Result<(), HardwareError> {
        let _held = self.lock.try_lock().map_err(|_| HardwareError::Busy)?;

        if let Err(e) = self.pulse().await {
            warn!(username = %session.username, error = %e, "Relay toggle failed");
            return Err(e);
        }

        info!(username = %session.username, hardware = %self.hardware_name, "Relay toggled");
        self.audit
            .record_hardware_event(&self.hardware_name, Some(session))
            .await;
        Ok(())
    }

    async fn pulse(&self) -> Result<(), HardwareError> {
        let mut guard = RelayGuard::new(self.driver.open()?);
        guard.set_active(true)?;
        tokio::time::sleep(self.pulse).await;
        guard.set_active(false)?;
        Ok(())
    }
}
