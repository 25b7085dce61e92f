mod aggregate;
mod airdrop;
mod chains;
mod config;
mod decode;
mod indexer;
mod prices;
mod query;
mod rpc;
mod scheduler;
mod store;
mod tokens;
mod units;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::indexer::Indexer;
use crate::prices::{CoingeckoClient, PriceOracle};
use crate::query::QueryApi;
use crate::rpc::ChainClient;
use crate::store::Store;
use crate::tokens::TokenRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = config::load_config()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("bridge indexer starting");
    tracing::info!(
        chains = chains::CHAINS.len(),
        getlogs_period_secs = cfg.getlogs_period.as_secs(),
        caches_period_secs = cfg.caches_period.as_secs(),
        "config loaded"
    );

    let store = Store::connect_redis(&cfg.redis_url).await?;
    let http = reqwest::Client::builder()
        .timeout(cfg.rpc_timeout)
        .build()
        .context("build http client")?;

    let mut clients = HashMap::new();
    for chain in chains::CHAINS {
        let url = cfg
            .rpc_urls
            .get(chain.name)
            .with_context(|| format!("no rpc url for {}", chain.name))?
            .clone();
        clients.insert(chain.name, ChainClient::new(chain, url, http.clone()));
    }
    let clients = Arc::new(clients);

    let config_client = clients
        .get("ethereum")
        .context("ethereum client required for bridge-config lookups")?
        .clone();
    let registry = TokenRegistry::new(config_client);
    let coingecko = CoingeckoClient::new(
        cfg.coingecko_base_url.clone(),
        http.clone(),
        cfg.price_requests_per_sec,
    );
    let oracle = PriceOracle::new(store.clone(), coingecko);
    let indexer = Indexer::new(store.clone(), registry);
    let query = QueryApi::new(store.clone(), clients.clone(), oracle.clone());

    let ctx = scheduler::Context {
        store,
        clients,
        indexer,
        oracle: oracle.clone(),
        query,
        holder_id: format!("indexer-{}", uuid::Uuid::new_v4()),
    };

    // Warm the price cache off the critical path; cold ids land in the
    // missing set for the backfill job.
    tokio::spawn(async move {
        if let Err(e) = oracle.warm_up().await {
            tracing::warn!(err = %e, "price warm-up failed");
        }
    });

    let shutdown = CancellationToken::new();

    let mut join_set: tokio::task::JoinSet<Result<()>> = tokio::task::JoinSet::new();
    {
        let shutdown = shutdown.clone();
        let cfg = cfg.clone();
        join_set.spawn(async move { scheduler::run(ctx, &cfg, shutdown).await });
    }

    tracing::info!("bridge indexer started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
        },
        res = join_set.join_next() => {
            if let Some(res) = res {
                let res = res.context("scheduler task panicked")?;
                match res {
                    Ok(()) => fatal = Some(anyhow::anyhow!("scheduler exited unexpectedly")),
                    Err(e) => fatal = Some(e.context("scheduler failed")),
                }
            }
        }
    }

    shutdown.cancel();

    while let Some(res) = join_set.join_next().await {
        let res = res.context("scheduler task panicked")?;
        if let Err(e) = res {
            fatal.get_or_insert_with(|| e.context("scheduler failed"));
        }
    }

    fatal.map_or(Ok(()), Err)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("ctrl-c")?;
        Ok(())
    }
}
