//! Configuration management for the webhook services.
//!
//! Values come from, in increasing priority: built-in defaults, the optional
//! `<base>/config.json`, then environment variables. An empty or
//! whitespace-only value is treated as unset at every layer.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default big-spend threshold in the household currency.
pub const DEFAULT_BIG_SPEND_THRESHOLD: f64 = 150.00;

/// Default budget fraction that triggers a threshold alert.
pub const DEFAULT_BUDGET_THRESHOLD_PCT: f64 = 0.8;

/// Default listener bind address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

/// Default outbound request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default ceiling on delivery attempts before the sweep gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default retry sweep period.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Destination for big-spend alerts.
    pub big_spend_url: Option<String>,
    /// Destination for budget threshold alerts.
    pub budget_threshold_url: Option<String>,
    /// Destination for new member notices.
    pub new_member_url: Option<String>,
    /// Shared secret sent as `X-Webhook-Secret` and required on inbound pushes.
    pub shared_secret: Option<String>,
    pub big_spend_threshold: f64,
    pub budget_threshold_pct: f64,
    pub listen_addr: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub sweep_interval_secs: u64,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            big_spend_url: None,
            budget_threshold_url: None,
            new_member_url: None,
            shared_secret: None,
            big_spend_threshold: DEFAULT_BIG_SPEND_THRESHOLD,
            budget_threshold_pct: DEFAULT_BUDGET_THRESHOLD_PCT,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the config file (if present), then the environment.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    /// Override configuration from process environment variables.
    pub fn load_from_env(&mut self) -> CoreResult<()> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Override configuration from an arbitrary variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).and_then(non_empty_env);

        if let Some(url) = get("WEBHOOK_BIG_SPEND_URL") {
            self.big_spend_url = Some(url);
        }
        if let Some(url) = get("WEBHOOK_BUDGET_THRESHOLD_URL") {
            self.budget_threshold_url = Some(url);
        }
        if let Some(url) = get("WEBHOOK_NEW_MEMBER_URL") {
            self.new_member_url = Some(url);
        }
        if let Some(secret) = get("WEBHOOK_SHARED_SECRET") {
            self.shared_secret = Some(secret);
        }
        if let Some(raw) = get("BIG_SPEND_THRESHOLD") {
            self.big_spend_threshold = parse_env("BIG_SPEND_THRESHOLD", &raw)?;
        }
        if let Some(raw) = get("BUDGET_THRESHOLD_PCT") {
            self.budget_threshold_pct = parse_env("BUDGET_THRESHOLD_PCT", &raw)?;
        }
        if let Some(addr) = get("WEBHOOK_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(raw) = get("WEBHOOK_TIMEOUT_SECS") {
            self.timeout_secs = parse_env("WEBHOOK_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = get("WEBHOOK_MAX_ATTEMPTS") {
            self.max_attempts = parse_env("WEBHOOK_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("WEBHOOK_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse_env("WEBHOOK_SWEEP_INTERVAL_SECS", &raw)?;
        }
        if let Some(level) = get("WEBHOOK_LOG_LEVEL") {
            self.log_level = level;
        }

        Ok(())
    }

    /// Check that every value is usable before the services start.
    pub fn validate(&self) -> CoreResult<()> {
        for url in [
            &self.big_spend_url,
            &self.budget_threshold_url,
            &self.new_member_url,
        ]
        .into_iter()
        .flatten()
        {
            Url::parse(url)?;
        }

        if !self.big_spend_threshold.is_finite() || self.big_spend_threshold < 0.0 {
            return Err(CoreError::Config(format!(
                "big_spend_threshold must be a non-negative number, got {}",
                self.big_spend_threshold
            )));
        }
        if !self.budget_threshold_pct.is_finite() || self.budget_threshold_pct <= 0.0 {
            return Err(CoreError::Config(format!(
                "budget_threshold_pct must be greater than zero, got {}",
                self.budget_threshold_pct
            )));
        }
        if self.timeout_secs == 0 {
            return Err(CoreError::Config("timeout_secs must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::Config("max_attempts must be at least 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(CoreError::Config(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        self.listen_addr()?;

        Ok(())
    }

    /// Get the listener bind address.
    pub fn listen_addr(&self) -> CoreResult<SocketAddr> {
        self.listen_addr.parse().map_err(|_| {
            CoreError::Config(format!("invalid listen address: {}", self.listen_addr))
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn normalize(&mut self) {
        for field in [
            &mut self.big_spend_url,
            &mut self.budget_threshold_url,
            &mut self.new_member_url,
            &mut self.shared_secret,
        ] {
            *field = field.take().and_then(non_empty_env);
        }
    }
}

fn non_empty_env(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> CoreResult<T> {
    raw.parse::<T>()
        .map_err(|_| CoreError::Config(format!("{name} has an invalid value: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.big_spend_threshold, 150.0);
        assert_eq!(config.budget_threshold_pct, 0.8);
        assert_eq!(config.listen_addr, "127.0.0.1:8787");
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert!(config.big_spend_url.is_none());
        assert!(config.shared_secret.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_every_field() {
        let mut config = Config::default();
        config
            .apply_env(lookup(&[
                ("WEBHOOK_BIG_SPEND_URL", "https://hooks.example.com/big"),
                ("WEBHOOK_BUDGET_THRESHOLD_URL", "https://hooks.example.com/budget"),
                ("WEBHOOK_NEW_MEMBER_URL", "https://hooks.example.com/member"),
                ("WEBHOOK_SHARED_SECRET", "s3cret"),
                ("BIG_SPEND_THRESHOLD", "200.5"),
                ("BUDGET_THRESHOLD_PCT", "0.9"),
                ("WEBHOOK_LISTEN_ADDR", "0.0.0.0:9000"),
                ("WEBHOOK_TIMEOUT_SECS", "3"),
                ("WEBHOOK_MAX_ATTEMPTS", "7"),
                ("WEBHOOK_SWEEP_INTERVAL_SECS", "15"),
                ("WEBHOOK_LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert_eq!(
            config.big_spend_url.as_deref(),
            Some("https://hooks.example.com/big")
        );
        assert_eq!(config.shared_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.big_spend_threshold, 200.5);
        assert_eq!(config.budget_threshold_pct, 0.9);
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.sweep_interval_secs, 15);
        assert_eq!(config.log_level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_env_values_are_unset() {
        let mut config = Config::default();
        config
            .apply_env(lookup(&[
                ("WEBHOOK_BIG_SPEND_URL", ""),
                ("WEBHOOK_SHARED_SECRET", "   "),
                ("BIG_SPEND_THRESHOLD", ""),
            ]))
            .unwrap();

        assert!(config.big_spend_url.is_none());
        assert!(config.shared_secret.is_none());
        assert_eq!(config.big_spend_threshold, DEFAULT_BIG_SPEND_THRESHOLD);
    }

    #[test]
    fn test_invalid_numeric_env_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(lookup(&[("BIG_SPEND_THRESHOLD", "lots")]))
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config {
            big_spend_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidUrl(_))));

        config.big_spend_url = None;
        config.budget_threshold_pct = 0.0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        config.budget_threshold_pct = 0.8;
        config.max_attempts = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        config.max_attempts = 5;
        config.listen_addr = "nowhere".into();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_config_load_from_file_treats_empty_as_unset() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "new_member_url": "https://hooks.example.com/member",
            "shared_secret": "",
            "big_spend_threshold": 75.0
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(
            config.new_member_url.as_deref(),
            Some("https://hooks.example.com/member")
        );
        assert!(config.shared_secret.is_none());
        assert_eq!(config.big_spend_threshold, 75.0);
        assert_eq!(config.budget_threshold_pct, DEFAULT_BUDGET_THRESHOLD_PCT);
    }

    #[test]
    fn test_config_load_from_file_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            budget_threshold_url: Some("https://hooks.example.com/budget".into()),
            max_attempts: 9,
            ..Default::default()
        };
        std::fs::write(
            paths.config_file(),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_invalid_json_fails() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        std::fs::write(paths.config_file(), "{ not json").unwrap();

        assert!(matches!(Config::load(&paths), Err(CoreError::Json(_))));
    }
}
