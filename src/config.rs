//! Settings read from the environment (after loading `.env`)

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

/// Seed values for the index info singleton at bootstrap
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapSettings {
    pub balance_threshold: Decimal,
    pub order_timeout_secs: u32,
    pub order_retry_amount: u32,
    pub rebalance_tick_setting: u32,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            balance_threshold: Decimal::new(5, 0),
            order_timeout_secs: 300,
            order_retry_amount: 3,
            rebalance_tick_setting: 60,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

impl DatabaseSettings {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let max_connections =
            parse_var("CONDEX_DB_MAX_CONNECTIONS")?.unwrap_or_else(default_max_connections);
        let min_connections =
            parse_var("CONDEX_DB_MIN_CONNECTIONS")?.unwrap_or_else(default_min_connections);
        let acquire_timeout_secs =
            parse_var("CONDEX_DB_ACQUIRE_TIMEOUT_SECS")?.unwrap_or_else(default_acquire_timeout_secs);

        if min_connections > max_connections {
            anyhow::bail!(
                "CONDEX_DB_MIN_CONNECTIONS ({}) exceeds CONDEX_DB_MAX_CONNECTIONS ({})",
                min_connections,
                max_connections
            );
        }

        Ok(Self {
            url,
            max_connections,
            min_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
        })
    }
}

impl BootstrapSettings {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            balance_threshold: parse_var("CONDEX_BALANCE_THRESHOLD")?
                .unwrap_or(defaults.balance_threshold),
            order_timeout_secs: parse_var("CONDEX_ORDER_TIMEOUT_SECS")?
                .unwrap_or(defaults.order_timeout_secs),
            order_retry_amount: parse_var("CONDEX_ORDER_RETRY_AMOUNT")?
                .unwrap_or(defaults.order_retry_amount),
            rebalance_tick_setting: parse_var("CONDEX_REBALANCE_TICK_SETTING")?
                .unwrap_or(defaults.rebalance_tick_setting),
        })
    }
}
