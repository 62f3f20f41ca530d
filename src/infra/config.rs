//! Centralized configuration (environment variables + defaults).

use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub max_connections: u32,
    pub cors_origin: String,
    pub provider_timeout: Duration,
    /// Provider tag -> intent-creation endpoint.
    pub payment_providers: HashMap<String, String>,
    /// Enables webhook signature checks when set.
    pub webhook_secret: Option<String>,
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. `from_env` is this over `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Database URL must be provided (no default) for safety.
        let database_url = get("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;

        let max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .with_context(|| format!("DB_MAX_CONNECTIONS must be a valid u32, got '{}'", v))?
                .max(1),
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let timeout_secs = match get("PROVIDER_TIMEOUT_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| {
                    format!("PROVIDER_TIMEOUT_SECS must be a valid u64, got '{}'", v)
                })?,
            None => DEFAULT_PROVIDER_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(anyhow!("PROVIDER_TIMEOUT_SECS must be at least 1"));
        }

        let payment_providers = match get("PAYMENT_PROVIDERS") {
            Some(v) => parse_providers(&v)?,
            None => HashMap::new(),
        };

        Ok(Self {
            database_url,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            max_connections,
            cors_origin: get("CORS_ORIGIN").unwrap_or_else(|| "*".to_string()),
            provider_timeout: Duration::from_secs(timeout_secs),
            payment_providers,
            webhook_secret: get("WEBHOOK_SECRET"),
        })
    }
}

/// Parses `name=url,name=url`. Names must be unique.
pub fn parse_providers(raw: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut providers = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, url) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("PAYMENT_PROVIDERS entry '{}' is not name=url", pair))?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(anyhow!("PAYMENT_PROVIDERS entry '{}' is not name=url", pair));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("provider '{}' url must be http(s): '{}'", name, url));
        }
        if providers.insert(name.to_string(), url.to_string()).is_some() {
            return Err(anyhow!("provider '{}' listed twice in PAYMENT_PROVIDERS", name));
        }
    }
    Ok(providers)
}
