//! Environment configuration.
//!
//! Resolved once at startup into an explicit struct; nothing reads the
//! environment after boot.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Balance every newly opened wallet starts with.
    pub starting_balance: Decimal,
    pub coingecko_api_url: String,
    pub coingecko_api_key: Option<String>,
    /// Settlement currency quotes are requested in.
    pub vs_currency: String,
    pub price_refresh_secs: u64,
    pub quote_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            port: parse_value("PORT", env_or("PORT", "8000"))?,
            starting_balance: parse_value(
                "STARTING_BALANCE",
                env_or("STARTING_BALANCE", "100000.0000"),
            )?,
            coingecko_api_url: env_or("COINGECKO_API_URL", "https://api.coingecko.com/api/v3"),
            coingecko_api_key: std::env::var("COINGECKO_API_KEY").ok(),
            vs_currency: env_or("VS_CURRENCY", "eur"),
            price_refresh_secs: parse_value(
                "PRICE_REFRESH_SECS",
                env_or("PRICE_REFRESH_SECS", "60"),
            )?,
            quote_timeout_ms: parse_value("QUOTE_TIMEOUT_MS", env_or("QUOTE_TIMEOUT_MS", "3000"))?,
        })
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }

    pub fn price_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.price_refresh_secs)
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_value<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}
