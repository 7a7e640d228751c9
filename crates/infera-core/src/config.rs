//! Predictor configuration
//!
//! Environment variables:
//!
//! - `INFERA_DEVICE`: `cpu`, `gpu`, `gpu:<ordinal>` (default `cpu`)
//! - `INFERA_LEAK_WARNING`: `true`/`false` (default `true`)

use std::env;

use infera_backends::Device;

use crate::error::{Error, Result};

/// Settings applied when a [`Predictor`](crate::Predictor) is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorConfig {
    /// Device the engine expects its backend to serve
    pub device: Device,
    /// Warn when an engine is dropped without `close()`
    pub leak_warning: bool,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            device: Device::cpu(),
            leak_warning: true,
        }
    }
}

impl PredictorConfig {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }

    pub fn with_leak_warning(mut self, enabled: bool) -> Self {
        self.leak_warning = enabled;
        self
    }

    /// Read the configuration from `INFERA_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineConstruction`] if `INFERA_DEVICE` does not parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(device) = env::var("INFERA_DEVICE") {
            if !device.trim().is_empty() {
                config.device = device.parse().map_err(Error::EngineConstruction)?;
            }
        }

        if let Ok(flag) = env::var("INFERA_LEAK_WARNING") {
            match parse_flag(&flag) {
                Some(enabled) => config.leak_warning = enabled,
                None => tracing::warn!(value = %flag, "ignoring unrecognised INFERA_LEAK_WARNING"),
            }
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
