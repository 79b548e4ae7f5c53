//! Relay on a Linux GPIO pin through the sysfs interface.

use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{HardwareError, RelayDriver, RelayLine};

pub struct SysfsRelay {
    root: PathBuf,
    pin: u32,
    active_high: bool,
}

impl SysfsRelay {
    pub fn new(root: PathBuf, pin: u32, active_high: bool) -> Self {
        Self {
            root,
            pin,
            active_high,
        }
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn unexport(&self) {
        if let Err(e) = fs::write(self.root.join("unexport"), self.pin.to_string()) {
            warn!(pin = self.pin, error = %e, "Failed to unexport GPIO pin");
        }
    }
}

impl RelayDriver for SysfsRelay {
    fn open(&self) -> Result<Box<dyn RelayLine>, HardwareError> {
        let pin_dir = self.pin_dir();
        let exported = !pin_dir.exists();
        if exported {
            fs::write(self.root.join("export"), self.pin.to_string())?;
            debug!(pin = self.pin, "Exported GPIO pin");
        }

        // "low"/"high" switch to output and set the level in one write, so
        // the relay never glitches on while being configured
        let inactive_level = if self.active_high { "low" } else { "high" };
        if let Err(e) = fs::write(pin_dir.join("direction"), inactive_level) {
            if exported {
                self.unexport();
            }
            return Err(e.into());
        }

        Ok(Box::new(SysfsLine {
            value_path: pin_dir.join("value"),
            unexport: exported.then(|| (self.root.join("unexport"), self.pin)),
            active_high: self.active_high,
        }))
    }
}

struct SysfsLine {
    value_path: PathBuf,
    /// Set when this line exported the pin and must give it back
    unexport: Option<(PathBuf, u32)>,
    active_high: bool,
}

impl RelayLine for SysfsLine {
    fn set_active(&mut self, active: bool) -> Result<(), HardwareError> {
        let level = if active == self.active_high { "1" } else { "0" };
        fs::write(&self.value_path, level)?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some((path, pin)) = self.unexport.take() {
            if let Err(e) = fs::write(path, pin.to_string()) {
                warn!(pin, error = %e, "Failed to unexport GPIO pin");
            }
        }
    }
}
