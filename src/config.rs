use std::time::Duration;

use anyhow::{Context, Result};

use crate::utils::RetryConfig;

// ============================================================================
// Engine Configuration
// ============================================================================

/// Runtime configuration, loaded from the environment (and `.env` if present)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// PostgreSQL connection URL; `None` runs on the in-memory store
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Bounded lock wait; exceeding it surfaces a retryable `Busy`
    pub lock_timeout: Duration,
    /// Broker list for notifications; `None` uses the in-process broadcaster
    pub kafka_brokers: Option<String>,
    pub topic_prefix: String,
    pub metrics_port: u16,
    pub default_token_ttl_hours: i64,
    /// Base of the renderable QR payload (`{base}/{token}`)
    pub scan_base_url: String,
    /// Advance PENDING -> CONFIRMED in the same call that reserves stock
    pub auto_confirm_orders: bool,
    /// Create the delivery when an order reaches READY_FOR_DISPATCH
    pub auto_create_delivery: bool,
    pub warehouse_address: Option<String>,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            lock_timeout: Duration::from_millis(2000),
            kafka_brokers: None,
            topic_prefix: "fulfillment".to_string(),
            metrics_port: 9090,
            default_token_ttl_hours: 24,
            scan_base_url: "https://scan.local/t".to_string(),
            auto_confirm_orders: true,
            auto_create_delivery: true,
            warehouse_address: None,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        // Missing .env is fine; the process environment still applies
        let _ = dotenv::dotenv();

        let defaults = Self::default();

        let retry = RetryConfig {
            max_attempts: parse_var("RETRY_MAX_ATTEMPTS")?.unwrap_or(defaults.retry.max_attempts),
            initial_delay: parse_var("RETRY_INITIAL_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.initial_delay),
            ..defaults.retry.clone()
        };

        Ok(Self {
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.database_max_connections),
            lock_timeout: parse_var("LOCK_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            kafka_brokers: non_empty_var("KAFKA_BROKERS"),
            topic_prefix: non_empty_var("NOTIFICATION_TOPIC_PREFIX").unwrap_or(defaults.topic_prefix),
            metrics_port: parse_var("METRICS_PORT")?.unwrap_or(defaults.metrics_port),
            default_token_ttl_hours: parse_var("TOKEN_TTL_HOURS")?
                .unwrap_or(defaults.default_token_ttl_hours),
            scan_base_url: non_empty_var("SCAN_BASE_URL").unwrap_or(defaults.scan_base_url),
            auto_confirm_orders: parse_var("AUTO_CONFIRM_ORDERS")?
                .unwrap_or(defaults.auto_confirm_orders),
            auto_create_delivery: parse_var("AUTO_CREATE_DELIVERY")?
                .unwrap_or(defaults.auto_create_delivery),
            warehouse_address: non_empty_var("WAREHOUSE_ADDRESS"),
            retry,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    non_empty_var(name)
        .map(|raw| raw.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("invalid value for {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_auto_confirm_and_bounded_lock_wait() {
        let config = EngineConfig::default();
        assert!(config.auto_confirm_orders);
        assert!(config.auto_create_delivery);
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        std::env::set_var("FULFILLMENT_TEST_PORT", "not-a-port");
        let parsed: Result<Option<u16>> = parse_var("FULFILLMENT_TEST_PORT");
        assert!(parsed.is_err());

        std::env::set_var("FULFILLMENT_TEST_PORT", " 9191 ");
        let parsed: Option<u16> = parse_var("FULFILLMENT_TEST_PORT").unwrap();
        assert_eq!(parsed, Some(9191));
        std::env::remove_var("FULFILLMENT_TEST_PORT");
    }
}
