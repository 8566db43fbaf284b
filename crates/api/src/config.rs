//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use fulfillment::{CheckoutUrls, DEFAULT_HOLD_WINDOW_SECS, SweeperConfig};

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
/// - `HOST` / `PORT`: bind address (default: `"0.0.0.0"` / `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for structured output (default: pretty)
/// - `DATABASE_URL`: use PostgreSQL when set, otherwise in-memory
/// - `HOLD_WINDOW_SECS`: reservation hold window (default: `1800`)
/// - `SWEEP_INTERVAL_SECS`, `SWEEP_BATCH_SIZE`, `SWEEP_CONCURRENCY`: sweeper tuning
/// - `CONFLICT_RETRY_ATTEMPTS`: retries on concurrency conflicts (default: `3`)
/// - `PAYMENT_WEBHOOK_SECRET`: verify webhook signatures when set
/// - `WEBHOOK_TOLERANCE_SECS`: accepted signature age (default: `300`)
/// - `CHECKOUT_SUCCESS_URL` / `CHECKOUT_CANCEL_URL`: payment redirect targets
/// - `SEED_PATH`: JSON file with products and users loaded at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub hold_window_secs: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
    pub sweep_concurrency: usize,
    pub conflict_retry_attempts: u32,
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub seed_path: Option<PathBuf>,
    invalid: Vec<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Values that fail to parse keep their default and are reported by
    /// [`Config::invalid_vars`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut invalid = Vec::new();
        let mut parsed =
            |key: &str, default, max| parse_or(&lookup, &mut invalid, key, default, max);

        let port = parsed("PORT", u64::from(defaults.port), u64::from(u16::MAX));
        let hold_window_secs = parsed(
            "HOLD_WINDOW_SECS",
            defaults.hold_window_secs as u64,
            MAX_DURATION_SECS,
        );
        let sweep_interval_secs = parsed(
            "SWEEP_INTERVAL_SECS",
            defaults.sweep_interval_secs,
            MAX_DURATION_SECS,
        );
        let sweep_batch_size = parsed(
            "SWEEP_BATCH_SIZE",
            defaults.sweep_batch_size as u64,
            MAX_SWEEP_BATCH_SIZE,
        );
        let sweep_concurrency = parsed(
            "SWEEP_CONCURRENCY",
            defaults.sweep_concurrency as u64,
            MAX_SWEEP_CONCURRENCY,
        );
        let conflict_retry_attempts = parsed(
            "CONFLICT_RETRY_ATTEMPTS",
            u64::from(defaults.conflict_retry_attempts),
            MAX_RETRY_ATTEMPTS,
        );
        let webhook_tolerance_secs = parsed(
            "WEBHOOK_TOLERANCE_SECS",
            defaults.webhook_tolerance_secs as u64,
            MAX_DURATION_SECS,
        );

        let port = u16::try_from(port).unwrap_or(defaults.port);

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(_) => {
                invalid.push("LOG_FORMAT".to_string());
                LogFormat::Pretty
            }
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port,
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            hold_window_secs: i64::try_from(hold_window_secs).unwrap_or(defaults.hold_window_secs),
            sweep_interval_secs,
            sweep_batch_size: usize::try_from(sweep_batch_size).unwrap_or(defaults.sweep_batch_size),
            sweep_concurrency: usize::try_from(sweep_concurrency)
                .unwrap_or(defaults.sweep_concurrency),
            conflict_retry_attempts: u32::try_from(conflict_retry_attempts)
                .unwrap_or(defaults.conflict_retry_attempts),
            webhook_secret: lookup("PAYMENT_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            webhook_tolerance_secs: i64::try_from(webhook_tolerance_secs)
                .unwrap_or(defaults.webhook_tolerance_secs),
            checkout_success_url: lookup("CHECKOUT_SUCCESS_URL")
                .unwrap_or(defaults.checkout_success_url),
            checkout_cancel_url: lookup("CHECKOUT_CANCEL_URL")
                .unwrap_or(defaults.checkout_cancel_url),
            seed_path: lookup("SEED_PATH").map(PathBuf::from),
            invalid,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Names of variables whose values were rejected.
    pub fn invalid_vars(&self) -> &[String] {
        &self.invalid
    }

    pub fn hold_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_window_secs)
    }

    pub fn webhook_tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.webhook_tolerance_secs)
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            batch_size: self.sweep_batch_size,
            concurrency: self.sweep_concurrency,
        }
    }

    pub fn checkout_urls(&self) -> CheckoutUrls {
        CheckoutUrls {
            success_url: self.checkout_success_url.clone(),
            cancel_url: self.checkout_cancel_url.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let urls = CheckoutUrls::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            hold_window_secs: DEFAULT_HOLD_WINDOW_SECS,
            sweep_interval_secs: 30 * 60,
            sweep_batch_size: 500,
            sweep_concurrency: 8,
            conflict_retry_attempts: 3,
            webhook_secret: None,
            webhook_tolerance_secs: 300,
            checkout_success_url: urls.success_url,
            checkout_cancel_url: urls.cancel_url,
            seed_path: None,
            invalid: Vec::new(),
        }
    }
}

/// Longest accepted duration setting: one year.
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;
const MAX_SWEEP_BATCH_SIZE: u64 = 100_000;
const MAX_SWEEP_CONCURRENCY: u64 = 1_024;
const MAX_RETRY_ATTEMPTS: u64 = 100;

/// Parses a number in `1..=max`, recording the key when the value is
/// unusable.
fn parse_or(
    lookup: &impl Fn(&str) -> Option<String>,
    invalid: &mut Vec<String>,
    key: &str,
    default: u64,
    max: u64,
) -> u64 {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if (1..=max).contains(&value) => value,
        _ => {
            invalid.push(key.to_string());
            default
        }
    }
}
