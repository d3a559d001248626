use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::ratelimit::{LimiterSettings, Window};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub app_name: String,
    /// Bearer token for the admin routes. Admin access is refused when unset.
    pub admin_token: Option<String>,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            app_name: "Portfolio Blog API".to_string(),
            admin_token: None,
            cors_origins: [
                "http://localhost:3000",
                "http://localhost:5173",
                "http://localhost:4000",
                "http://webbpulse.com",
                "https://www.webbpulse.com",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
    pub window_size_secs: u64,
    pub test_mode: bool,
    /// Interval of the idle-client sweep. Zero disables it.
    pub sweep_interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let defaults = LimiterSettings::default();
        Self {
            requests_per_minute: defaults.per_minute,
            requests_per_hour: defaults.per_hour,
            requests_per_day: defaults.per_day,
            window_size_secs: defaults.window_size.as_secs(),
            test_mode: defaults.test_mode,
            sweep_interval_secs: 300,
        }
    }
}

impl LimitsConfig {
    pub fn limiter_settings(&self) -> LimiterSettings {
        LimiterSettings {
            per_minute: self.requests_per_minute,
            per_hour: self.requests_per_hour,
            per_day: self.requests_per_day,
            window_size: Duration::from_secs(self.window_size_secs),
            test_mode: self.test_mode,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enable: bool,
    pub bind_addr: String,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            bind_addr: "127.0.0.1:9100".to_string(),
            path: "/metrics".to_string(),
        }
    }
}

impl Config {
    /// Applies environment overrides through `lookup`, which returns the value
    /// of a variable if it is set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(name) = lookup("APP_NAME") {
            self.server.app_name = name;
        }
        if let Some(token) = lookup("ADMIN_TOKEN").filter(|t| !t.is_empty()) {
            self.server.admin_token = Some(token);
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.server.cors_origins = parse_origins(&origins);
        }

        let ceilings = [
            ("REQUESTS_PER_MINUTE", &mut self.limits.requests_per_minute),
            ("REQUESTS_PER_HOUR", &mut self.limits.requests_per_hour),
            ("REQUESTS_PER_DAY", &mut self.limits.requests_per_day),
        ];
        for (var, slot) in ceilings {
            if let Some(raw) = lookup(var) {
                *slot = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid value for {}: {:?}", var, raw))?;
            }
        }

        if let Some(testing) = lookup("TESTING") {
            self.limits.test_mode = testing.trim().eq_ignore_ascii_case("true");
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let settings = self.limits.limiter_settings();
        settings.validate()?;
        if settings.window_size < Window::Day.duration() {
            warn!(
                "Rate limit window of {}s prunes history the hour and day limits rely on",
                self.limits.window_size_secs
            );
        }
        if self.server.admin_token.is_none() {
            warn!("ADMIN_TOKEN is not set, admin routes will reject every request");
        }
        Ok(())
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    for origin in raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        if !origins.iter().any(|o| o == origin) {
            origins.push(origin.to_string());
        }
    }
    origins
}

pub fn load_config() -> Result<Config> {
    let explicit = env::var("CONFIG_PATH").ok();
    let config_path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let mut config: Config = if explicit.is_some() || Path::new(&config_path).exists() {
        let config_content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        toml::from_str(&config_content)
            .with_context(|| "Failed to parse configuration")?
    } else {
        info!("No {} found, using defaults", config_path);
        Config::default()
    };

    config.apply_env(|key| env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.limits.requests_per_minute, 60);
        assert_eq!(config.limits.requests_per_hour, 1_000);
        assert_eq!(config.limits.requests_per_day, 10_000);
        assert!(!config.limits.test_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [limits]
            requests_per_minute = 30
            window_size_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.limits.requests_per_minute, 30);
        assert_eq!(config.limits.requests_per_hour, 1_000);
        assert_eq!(config.limits.window_size_secs, 30);
        assert_eq!(config.server.app_name, "Portfolio Blog API");
        assert!(!config.metrics.enable);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env_of(&[
                ("REQUESTS_PER_MINUTE", "2"),
                ("REQUESTS_PER_HOUR", " 20 "),
                ("REQUESTS_PER_DAY", "200"),
                ("TESTING", "TRUE"),
                ("ADMIN_TOKEN", "secret"),
                ("CORS_ORIGINS", "https://a.example, https://b.example,,https://a.example"),
            ]))
            .unwrap();

        let settings = config.limits.limiter_settings();
        assert_eq!(settings.per_minute, 2);
        assert_eq!(settings.per_hour, 20);
        assert_eq!(settings.per_day, 200);
        assert!(settings.test_mode);
        assert_eq!(config.server.admin_token.as_deref(), Some("secret"));
        assert_eq!(
            config.server.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn test_testing_flag_only_true_enables() {
        let mut config = Config::default();
        config.apply_env(env_of(&[("TESTING", "1")])).unwrap();
        assert!(!config.limits.test_mode);
    }

    #[test]
    fn test_bad_number_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env_of(&[("REQUESTS_PER_HOUR", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("REQUESTS_PER_HOUR"));
    }

    #[test]
    fn test_zero_ceiling_fails_validation() {
        let mut config = Config::default();
        config.apply_env(env_of(&[("REQUESTS_PER_MINUTE", "0")])).unwrap();
        assert!(config.validate().is_err());
    }
}
