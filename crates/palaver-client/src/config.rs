//! Engine configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the engine runs with zero
//! configuration in development and tests.

use palaver_shared::constants::{
    DEFAULT_MESSAGE_PAGE_SIZE, DEFAULT_SWEEP_BATCH, DEFAULT_SWEEP_INTERVAL_SECS,
};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Seconds between delivery-promotion sweeps.
    /// Env: `PALAVER_SWEEP_INTERVAL_SECS`
    /// Default: `30`
    pub sweep_interval_secs: u64,

    /// Maximum conversations promoted per sweep (caps write amplification).
    /// Env: `PALAVER_SWEEP_BATCH`
    /// Default: `25`
    pub sweep_batch: usize,

    /// Page size for live message streams (newest N messages).
    /// Env: `PALAVER_MESSAGE_PAGE_SIZE`
    /// Default: `50`
    pub message_page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            sweep_batch: DEFAULT_SWEEP_BATCH,
            message_page_size: DEFAULT_MESSAGE_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PALAVER_SWEEP_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.sweep_interval_secs = n,
                _ => tracing::warn!(value = %val, "Invalid PALAVER_SWEEP_INTERVAL_SECS, using default"),
            }
        }

        if let Ok(val) = std::env::var("PALAVER_SWEEP_BATCH") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.sweep_batch = n,
                _ => tracing::warn!(value = %val, "Invalid PALAVER_SWEEP_BATCH, using default"),
            }
        }

        if let Ok(val) = std::env::var("PALAVER_MESSAGE_PAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.message_page_size = n,
                _ => tracing::warn!(value = %val, "Invalid PALAVER_MESSAGE_PAGE_SIZE, using default"),
            }
        }

        config
    }
}
