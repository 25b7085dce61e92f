use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::chains;

const DEFAULT_COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PRICE_REQUESTS_PER_SEC: u32 = 3;
const DEFAULT_GETLOGS_PERIOD_SECS: u64 = 3600;
const DEFAULT_POOL_PERIOD_SECS: u64 = 3600;
const DEFAULT_PRICES_MISSING_PERIOD_SECS: u64 = 3600;
const DEFAULT_CACHES_PERIOD_SECS: u64 = 900;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis_url: String,
    pub coingecko_base_url: String,
    pub rpc_timeout: Duration,
    pub price_requests_per_sec: u32,
    pub getlogs_period: Duration,
    pub pool_period: Duration,
    pub prices_missing_period: Duration,
    pub caches_period: Duration,
    /// Effective RPC endpoint per chain: roster default, overridable with
    /// `RPC_URL_<CHAIN>`.
    pub rpc_urls: HashMap<&'static str, String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BaseEnv {
    redis_url: String,
    coingecko_base_url: String,
    rpc_timeout_secs: u64,
    price_requests_per_sec: u32,
    getlogs_period_secs: u64,
    pool_period_secs: u64,
    prices_missing_period_secs: u64,
    caches_period_secs: u64,
}

impl Default for BaseEnv {
    fn default() -> Self {
        Self {
            redis_url: String::new(),
            coingecko_base_url: DEFAULT_COINGECKO_BASE_URL.to_string(),
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            price_requests_per_sec: DEFAULT_PRICE_REQUESTS_PER_SEC,
            getlogs_period_secs: DEFAULT_GETLOGS_PERIOD_SECS,
            pool_period_secs: DEFAULT_POOL_PERIOD_SECS,
            prices_missing_period_secs: DEFAULT_PRICES_MISSING_PERIOD_SECS,
            caches_period_secs: DEFAULT_CACHES_PERIOD_SECS,
        }
    }
}

pub fn load_config() -> Result<AppConfig> {
    let base: BaseEnv = envy::from_env().context("load base env config")?;
    if base.redis_url.trim().is_empty() {
        anyhow::bail!("REDIS_URL must be set");
    }

    let mut rpc_urls = HashMap::new();
    for chain in chains::CHAINS {
        let var = format!("RPC_URL_{}", chain.name.to_uppercase());
        let url = std::env::var(&var).unwrap_or_else(|_| chain.rpc_url.to_string());
        rpc_urls.insert(chain.name, url);
    }

    Ok(AppConfig {
        redis_url: base.redis_url,
        coingecko_base_url: base.coingecko_base_url,
        rpc_timeout: Duration::from_secs(base.rpc_timeout_secs.max(1)),
        price_requests_per_sec: base.price_requests_per_sec.max(1),
        getlogs_period: Duration::from_secs(base.getlogs_period_secs.max(1)),
        pool_period: Duration::from_secs(base.pool_period_secs.max(1)),
        prices_missing_period: Duration::from_secs(base.prices_missing_period_secs.max(1)),
        caches_period: Duration::from_secs(base.caches_period_secs.max(1)),
        rpc_urls,
    })
}

#[cfg(test)]
impl AppConfig {
    pub fn default_for_tests() -> Self {
        let mut rpc_urls = HashMap::new();
        for chain in chains::CHAINS {
            rpc_urls.insert(chain.name, chain.rpc_url.to_string());
        }
        Self {
            redis_url: "redis://127.0.0.1/15".to_string(),
            coingecko_base_url: DEFAULT_COINGECKO_BASE_URL.to_string(),
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
            price_requests_per_sec: DEFAULT_PRICE_REQUESTS_PER_SEC,
            getlogs_period: Duration::from_secs(DEFAULT_GETLOGS_PERIOD_SECS),
            pool_period: Duration::from_secs(DEFAULT_POOL_PERIOD_SECS),
            prices_missing_period: Duration::from_secs(DEFAULT_PRICES_MISSING_PERIOD_SECS),
            caches_period: Duration::from_secs(DEFAULT_CACHES_PERIOD_SECS),
            rpc_urls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chain_gets_an_rpc_url() {
        let cfg = AppConfig::default_for_tests();
        for chain in chains::CHAINS {
            assert!(cfg.rpc_urls.contains_key(chain.name), "{} missing", chain.name);
        }
    }
}
