// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level filter
    pub log_level: String,
    /// Dispatch tuning
    pub dispatch: DispatchSettings,
}

/// Dispatch and streaming tuning knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// How long a ride may stay in `searching` before the rider is told no
    /// driver is available.
    pub accept_timeout_secs: u64,
    /// Whether an unmatched ride is auto-cancelled after the accept timeout.
    /// When false the ride stays `searching` and a late accept still wins.
    pub cancel_unmatched: bool,
    /// Period between simulated location emissions.
    pub location_update_period_ms: u64,
    /// Capacity of each ride's broadcast relay.
    pub relay_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            log_level: "info".to_string(),
            dispatch: DispatchSettings::default(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            accept_timeout_secs: 30,
            cancel_unmatched: false,
            location_update_period_ms: 1000,
            relay_buffer: 64,
        }
    }
}

impl DispatchSettings {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }

    pub fn location_update_period(&self) -> Duration {
        Duration::from_millis(self.location_update_period_ms)
    }
}

impl Settings {
    /// Load settings from `config.toml` and `RIDESHARE_`-prefixed
    /// environment variables, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load settings from an explicit TOML path plus the environment.
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RIDESHARE_").split("__"))
            .extract()?;
        Ok(settings)
    }
}
