//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::{CheckoutConfig, RestockPolicy};
use domain::Money;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for human-readable output
/// - `DATABASE_URL`: Postgres connection string; unset runs on the in-memory store
/// - `HOME_COUNTRY`: ISO country code treated as domestic (default: `"BD"`)
/// - `FREE_SHIPPING_THRESHOLD`: subtotal in major units from which standard shipping is free
/// - `RESTOCK_ON_CANCEL`, `RESTOCK_ON_RETURN`: `true` to return stock (default: `false`)
/// - `STEP_TIMEOUT_MS`: deadline for each placement step (default: `5000`)
/// - `MAX_ORDER_NUMBER_ATTEMPTS`: order number retries on collision (default: `5`)
/// - `PERSIST_RECHECKS`: lookups for an order whose insert timed out (default: `3`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub checkout: CheckoutConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unparseable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        let flag = |key: &str| {
            lookup(key).and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
        };

        let mut checkout = defaults.checkout;
        if let Some(country) = lookup("HOME_COUNTRY").filter(|c| !c.trim().is_empty()) {
            checkout.pricing.shipping.home_country = country.trim().to_ascii_uppercase();
        }
        if let Some(major) = parsed::<i64>(&lookup, "FREE_SHIPPING_THRESHOLD") {
            checkout.pricing.shipping.free_standard_threshold = Money::from_major(major);
        }
        checkout.restock = RestockPolicy {
            on_cancel: flag("RESTOCK_ON_CANCEL").unwrap_or(checkout.restock.on_cancel),
            on_return: flag("RESTOCK_ON_RETURN").unwrap_or(checkout.restock.on_return),
        };
        if let Some(ms) = parsed(&lookup, "STEP_TIMEOUT_MS").filter(|ms: &u64| *ms > 0) {
            checkout.step_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) =
            parsed(&lookup, "MAX_ORDER_NUMBER_ATTEMPTS").filter(|n: &u32| *n > 0)
        {
            checkout.max_order_number_attempts = attempts;
        }
        if let Some(rechecks) = parsed(&lookup, "PERSIST_RECHECKS").filter(|n: &u32| *n > 0) {
            checkout.persist_rechecks = rechecks;
        }

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            checkout,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Server-side limit for each Postgres statement.
    ///
    /// Matches the step timeout so an insert the assembler stopped waiting
    /// for is resolved on the server before the persist rechecks run out.
    pub fn statement_timeout(&self) -> Duration {
        self.checkout.step_timeout
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            checkout: CheckoutConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert_eq!(config.checkout.step_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_every_variable() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8081"),
            ("RUST_LOG", "debug"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("HOME_COUNTRY", "us"),
            ("FREE_SHIPPING_THRESHOLD", "500"),
            ("RESTOCK_ON_CANCEL", "true"),
            ("RESTOCK_ON_RETURN", "1"),
            ("STEP_TIMEOUT_MS", "250"),
            ("MAX_ORDER_NUMBER_ATTEMPTS", "3"),
            ("PERSIST_RECHECKS", "6"),
        ]);

        assert_eq!(config.addr(), "127.0.0.1:8081");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/shop"));
        assert_eq!(config.checkout.pricing.shipping.home_country, "US");
        assert_eq!(
            config.checkout.pricing.shipping.free_standard_threshold,
            Money::from_major(500)
        );
        assert!(config.checkout.restock.on_cancel);
        assert!(config.checkout.restock.on_return);
        assert_eq!(config.checkout.step_timeout, Duration::from_millis(250));
        assert_eq!(config.checkout.max_order_number_attempts, 3);
        assert_eq!(config.checkout.persist_rechecks, 6);
        assert_eq!(config.statement_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("RESTOCK_ON_CANCEL", "maybe"),
            ("STEP_TIMEOUT_MS", "0"),
            ("DATABASE_URL", "  "),
        ]);

        assert_eq!(config.port, 3000);
        assert!(!config.checkout.restock.on_cancel);
        assert_eq!(config.checkout.step_timeout, Duration::from_millis(5000));
        assert!(config.database_url.is_none());
    }
}
