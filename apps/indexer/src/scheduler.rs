use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::indexer::Indexer;
use crate::prices::PriceOracle;
use crate::query::QueryApi;
use crate::rpc::ChainClient;
use crate::store::Store;

/// Everything a job needs; cheap to clone into per-job tasks.
#[derive(Clone)]
pub struct Context {
    pub store: Store,
    pub clients: Arc<HashMap<&'static str, ChainClient>>,
    pub indexer: Indexer,
    pub oracle: PriceOracle,
    pub query: QueryApi,
    /// Lock-holder identity of this worker process.
    pub holder_id: String,
}

#[derive(Debug, Clone, Copy)]
enum Schedule {
    Every(Duration),
    DailyAt { hour: u32, minute: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Job {
    name: &'static str,
    schedule: Schedule,
    lock_ttl: Duration,
}

fn jobs(cfg: &AppConfig) -> Vec<Job> {
    vec![
        Job {
            name: "update_getlogs",
            schedule: Schedule::Every(cfg.getlogs_period),
            lock_ttl: cfg.getlogs_period,
        },
        Job {
            name: "update_getlogs_pool",
            schedule: Schedule::Every(cfg.pool_period),
            lock_ttl: cfg.pool_period,
        },
        Job {
            name: "update_prices",
            schedule: Schedule::DailyAt { hour: 0, minute: 10 },
            lock_ttl: Duration::from_secs(3600),
        },
        Job {
            name: "update_prices_missing",
            schedule: Schedule::Every(cfg.prices_missing_period),
            lock_ttl: cfg.prices_missing_period,
        },
        Job {
            name: "update_caches",
            schedule: Schedule::Every(cfg.caches_period),
            lock_ttl: cfg.caches_period,
        },
    ]
}

/// Run every periodic job until shutdown. One task per job; each tick takes
/// the job's store lock first, so across all worker processes a job has at
/// most one live runner.
pub async fn run(ctx: Context, cfg: &AppConfig, shutdown: CancellationToken) -> Result<()> {
    let mut join_set: JoinSet<Result<()>> = JoinSet::new();
    for job in jobs(cfg) {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        join_set.spawn(async move { run_job(ctx, job, shutdown).await });
    }

    tokio::select! {
        _ = shutdown.cancelled() => {}
        res = join_set.join_next() => {
            if let Some(res) = res {
                return res.context("job task panicked")?;
            }
        }
    }

    while let Some(res) = join_set.join_next().await {
        let res = res.context("job task panicked")?;
        if let Err(e) = res {
            warn!(err = %e, "job task exited with error during shutdown");
        }
    }
    Ok(())
}

async fn run_job(ctx: Context, job: Job, shutdown: CancellationToken) -> Result<()> {
    loop {
        let delay = match job.schedule {
            Schedule::Every(period) => period,
            Schedule::DailyAt { hour, minute } => until_daily(hour, minute),
        };
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }

        let ran = with_job_lock(&ctx.store, job.name, &ctx.holder_id, job.lock_ttl, async {
            let started = Instant::now();
            match execute(&ctx, job.name, &shutdown).await {
                Ok(()) => {
                    info!(job = job.name, elapsed_ms = started.elapsed().as_millis() as u64, "job done");
                }
                Err(e) => {
                    error!(job = job.name, err = %e, "job failed; retrying next tick");
                }
            }
        })
        .await;

        match ran {
            Ok(true) => {}
            Ok(false) => debug!(job = job.name, "lock held elsewhere; skipping tick"),
            Err(e) => warn!(job = job.name, err = %e, "store unavailable; skipping tick"),
        }
    }
}

/// Run `work` under the job's named lock. Returns whether it ran; `false`
/// means another worker holds the lock and this tick is skipped, never
/// queued. The lock is released on every exit path; a crashed holder's
/// lock expires by TTL.
async fn with_job_lock<F>(
    store: &Store,
    name: &str,
    holder: &str,
    ttl: Duration,
    work: F,
) -> Result<bool>
where
    F: Future<Output = ()>,
{
    if !store.lock(name, holder, ttl).await? {
        return Ok(false);
    }
    work.await;
    if let Err(e) = store.unlock(name, holder).await {
        warn!(job = name, err = %e, "failed to release job lock; TTL will reap it");
    }
    Ok(true)
}

async fn execute(ctx: &Context, name: &str, shutdown: &CancellationToken) -> Result<()> {
    match name {
        "update_getlogs" => fan_out_chains(ctx, shutdown, false).await,
        "update_getlogs_pool" => fan_out_chains(ctx, shutdown, true).await,
        "update_prices" => ctx.oracle.update_daily().await,
        "update_prices_missing" => ctx.oracle.refresh_missing().await,
        "update_caches" => ctx.query.warm_caches().await,
        other => anyhow::bail!("unknown job {other}"),
    }
}

/// One indexing task per chain; within each chain the pass is sequential.
/// A failed chain logs and leaves its cursor where it was; the next tick
/// picks it up again.
async fn fan_out_chains(ctx: &Context, shutdown: &CancellationToken, pools: bool) -> Result<()> {
    let mut join_set: JoinSet<()> = JoinSet::new();
    for client in ctx.clients.values() {
        let client = client.clone();
        let indexer = ctx.indexer.clone();
        let shutdown = shutdown.clone();
        join_set.spawn(async move {
            let chain = client.chain().name;
            let res = if pools {
                indexer.sync_pools(&client, &shutdown).await
            } else {
                indexer.sync_bridge(&client, &shutdown).await
            };
            if let Err(e) = res {
                error!(chain, pools, err = %e, "chain pass aborted");
            }
        });
    }

    while let Some(res) = join_set.join_next().await {
        if let Err(e) = res {
            error!(err = %e, "chain task panicked");
        }
    }
    Ok(())
}

fn until_daily(hour: u32, minute: u32) -> Duration {
    let now = Utc::now();
    let Some(at) = now.date_naive().and_hms_opt(hour, minute, 0) else {
        return Duration::from_secs(60);
    };
    let mut next = at.and_utc();
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_are_unique() {
        let cfg = AppConfig::default_for_tests();
        let jobs = jobs(&cfg);
        let mut names: Vec<_> = jobs.iter().map(|j| j.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
        assert_eq!(before, 5);
    }

    #[test]
    fn until_daily_is_positive_and_within_a_day() {
        let d = until_daily(0, 10);
        assert!(d > Duration::ZERO);
        assert!(d <= Duration::from_secs(24 * 3600));
    }

    #[tokio::test]
    async fn contended_lock_skips_the_tick() {
        let store = Store::memory();
        store
            .lock("update_caches", "other-worker", Duration::from_secs(60))
            .await
            .expect("lock");

        let ran = with_job_lock(&store, "update_caches", "me", Duration::from_secs(60), async {
            panic!("must not run while the lock is held elsewhere");
        })
        .await
        .expect("with_job_lock");
        assert!(!ran);
    }

    #[tokio::test]
    async fn lock_is_released_after_the_job_runs() {
        let store = Store::memory();
        let ran = with_job_lock(&store, "update_caches", "me", Duration::from_secs(60), async {})
            .await
            .expect("with_job_lock");
        assert!(ran);

        // Released: a different worker can acquire immediately.
        assert!(
            store
                .lock("update_caches", "other", Duration::from_secs(60))
                .await
                .expect("lock")
        );
    }
}
