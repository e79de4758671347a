//! Socket settings loading and persistence.
//!
//! Reconnect policy and development toggles live in a JSON settings
//! file under the platform config directory, with `HUBLINK_*`
//! environment variables taking precedence for CI and local overrides.
//! The session consumes these values; it never writes them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};

/// Externally configured session policy.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SocketSettings {
    /// Hub endpoint URL (`wss://` or `https://`, converted as needed).
    pub url: String,
    /// Whether abnormal disconnects schedule reconnect attempts.
    pub auto_reconnect: bool,
    /// First reconnect interval in seconds.
    pub reconnect_start_interval: f64,
    /// Upper bound for the reconnect interval in seconds.
    pub reconnect_max_interval: f64,
    /// Multiplicative growth applied between reconnect schedules.
    pub reconnect_growth_step: f64,
    /// Development-only: sends with a registered canned response
    /// synthesize a local reply instead of transmitting.
    ///
    /// Prefer real hub responses — canned data has to be kept in sync
    /// with the hub by hand.
    pub use_fake_response: bool,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            auto_reconnect: true,
            reconnect_start_interval: 5.0,
            reconnect_max_interval: 60.0,
            reconnect_growth_step: 2.0,
            use_fake_response: false,
        }
    }
}

impl SocketSettings {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `HUBLINK_CONFIG_DIR` overrides the platform config dir, which
    /// keeps tests and sandboxed environments away from user state.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("HUBLINK_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("hublink")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads settings from file, with environment variable overrides.
    /// A missing or unreadable file yields the defaults.
    pub fn load() -> Result<Self> {
        let mut settings = Self::load_from_file().unwrap_or_default();
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_dir()?.join("settings.json");
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Settings file not found: {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("HUBLINK_URL") {
            self.url = url;
        }
        if let Some(enabled) = env_bool("HUBLINK_AUTO_RECONNECT") {
            self.auto_reconnect = enabled;
        }
        if let Some(secs) = env_f64("HUBLINK_RECONNECT_START_INTERVAL") {
            self.reconnect_start_interval = secs;
        }
        if let Some(secs) = env_f64("HUBLINK_RECONNECT_MAX_INTERVAL") {
            self.reconnect_max_interval = secs;
        }
        if let Some(step) = env_f64("HUBLINK_RECONNECT_GROWTH_STEP") {
            self.reconnect_growth_step = step;
        }
        if let Some(enabled) = env_bool("HUBLINK_USE_FAKE_RESPONSE") {
            self.use_fake_response = enabled;
        }
    }

    /// Persists the current settings to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_dir()?.join("settings.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// First reconnect interval as a [`Duration`].
    #[must_use]
    pub fn reconnect_start(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_start_interval.max(0.0))
    }

    /// Reconnect interval upper bound as a [`Duration`].
    #[must_use]
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_max_interval.max(0.0))
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        other => {
            log::warn!("Ignoring unparsable boolean in {name}: {other}");
            None
        }
    }
}

fn env_f64(name: &str) -> Option<f64> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("Ignoring unparsable number in {name}: {value}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Settings tests mutate process environment; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_settings() {
        let settings = SocketSettings::default();
        assert!(settings.url.is_empty());
        assert!(settings.auto_reconnect);
        assert_eq!(settings.reconnect_start(), Duration::from_secs(5));
        assert_eq!(settings.reconnect_max(), Duration::from_secs(60));
        assert!((settings.reconnect_growth_step - 2.0).abs() < f64::EPSILON);
        assert!(!settings.use_fake_response);
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("HUBLINK_URL", "wss://hub.example.com");
        std::env::set_var("HUBLINK_AUTO_RECONNECT", "false");
        std::env::set_var("HUBLINK_RECONNECT_START_INTERVAL", "2.5");

        let mut settings = SocketSettings::default();
        settings.apply_env_overrides();
        assert_eq!(settings.url, "wss://hub.example.com");
        assert!(!settings.auto_reconnect);
        assert!((settings.reconnect_start_interval - 2.5).abs() < f64::EPSILON);

        std::env::remove_var("HUBLINK_URL");
        std::env::remove_var("HUBLINK_AUTO_RECONNECT");
        std::env::remove_var("HUBLINK_RECONNECT_START_INTERVAL");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HUBLINK_CONFIG_DIR", dir.path());

        let mut settings = SocketSettings::default();
        settings.url = "wss://hub.example.com".to_string();
        settings.reconnect_max_interval = 30.0;
        settings.save().unwrap();

        let loaded = SocketSettings::load().unwrap();
        assert_eq!(loaded.url, "wss://hub.example.com");
        assert_eq!(loaded.reconnect_max(), Duration::from_secs(30));

        std::env::remove_var("HUBLINK_CONFIG_DIR");
    }

    #[test]
    fn test_unparsable_env_values_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("HUBLINK_RECONNECT_GROWTH_STEP", "fast");
        let mut settings = SocketSettings::default();
        settings.apply_env_overrides();
        assert!((settings.reconnect_growth_step - 2.0).abs() < f64::EPSILON);
        std::env::remove_var("HUBLINK_RECONNECT_GROWTH_STEP");
    }
}
