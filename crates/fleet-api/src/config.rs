//! API server configuration

use config::{Config, ConfigError, Environment};
use fleet_source::SourceConfig;
use fleet_tracker::{AlertThresholds, TrackerConfig};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// REST API port
    pub api_port: u16,
    /// Telemetry backend base URL
    pub backend_url: String,
    pub fetch_timeout_ms: u64,
    pub cache_window_ms: u64,
    pub poll_interval_ms: u64,
    pub alert_interval_ms: u64,
    /// Default per-order delivery fee at checkout
    pub delivery_fee: Decimal,
    pub tax_rate: Decimal,
    /// Simulation mode (seeded in-memory fleet instead of the backend)
    pub simulation_mode: bool,
    /// Enable CORS for all origins (development)
    pub cors_permissive: bool,
    /// Start polling and alerting at boot
    pub autostart_tracking: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_port: 3000,
            backend_url: "http://127.0.0.1:4000/api".to_string(),
            fetch_timeout_ms: 5000,
            cache_window_ms: 2000,
            poll_interval_ms: 3000,
            alert_interval_ms: 5000,
            delivery_fee: Decimal::from(25_000),
            tax_rate: Decimal::new(8, 2),
            simulation_mode: true,
            cors_permissive: true,
            autostart_tracking: true,
        }
    }
}

impl ApiConfig {
    /// Load configuration from `.env` and `FLEET_*` environment variables
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_environment(Environment::with_prefix("FLEET").try_parsing(true))
    }

    fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Config::builder()
            .set_default("api_port", i64::from(defaults.api_port))?
            .set_default("backend_url", defaults.backend_url)?
            .set_default("fetch_timeout_ms", defaults.fetch_timeout_ms)?
            .set_default("cache_window_ms", defaults.cache_window_ms)?
            .set_default("poll_interval_ms", defaults.poll_interval_ms)?
            .set_default("alert_interval_ms", defaults.alert_interval_ms)?
            .set_default("delivery_fee", defaults.delivery_fee.to_string())?
            .set_default("tax_rate", defaults.tax_rate.to_string())?
            .set_default("simulation_mode", defaults.simulation_mode)?
            .set_default("cors_permissive", defaults.cors_permissive)?
            .set_default("autostart_tracking", defaults.autostart_tracking)?
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            cache_window: Duration::from_millis(self.cache_window_ms),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            alert_interval: Duration::from_millis(self.alert_interval_ms),
            thresholds: AlertThresholds::default(),
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            base_url: self.backend_url.clone(),
            timeout: Duration::from_millis(self.fetch_timeout_ms),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_from(vars: &[(&str, &str)]) -> ApiConfig {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let env = Environment::with_prefix("FLEET")
            .try_parsing(true)
            .source(Some(source));
        ApiConfig::from_environment(env).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = load_from(&[]);

        assert_eq!(config.api_port, 3000);
        assert_eq!(config.poll_interval_ms, 3000);
        assert_eq!(config.delivery_fee, Decimal::from(25_000));
        assert_eq!(config.tax_rate, Decimal::new(8, 2));
        assert!(config.simulation_mode);
        assert!(config.autostart_tracking);
    }

    #[test]
    fn test_environment_overrides() {
        let config = load_from(&[
            ("FLEET_API_PORT", "8088"),
            ("FLEET_BACKEND_URL", "http://backend:4000/api"),
            ("FLEET_SIMULATION_MODE", "false"),
            ("FLEET_POLL_INTERVAL_MS", "1000"),
        ]);

        assert_eq!(config.api_port, 8088);
        assert_eq!(config.backend_url, "http://backend:4000/api");
        assert!(!config.simulation_mode);
        assert_eq!(config.tracker_config().poll_interval, Duration::from_secs(1));
        assert_eq!(config.source_config().timeout, Duration::from_secs(5));
    }
}
