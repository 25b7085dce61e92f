use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::{Aggregator, LogPos, NS_LOGS, NS_POOL, Stream};
use crate::airdrop::airdrop_for;
use crate::chains::Pool;
use crate::decode::{
    self, BridgeIn, BridgeOut, BridgeTopic, Direction, Event, PoolDecoder, parse_in_input,
    parse_out_data,
};
use crate::rpc::{ChainClient, Log, gas_stats, parse_quantity_u64};
use crate::store::Store;
use crate::tokens::TokenRegistry;
use crate::units::{u256_to_decimal, utc_date};

const TIMESTAMP_CONCURRENCY: usize = 8;

/// Per-chain resumable log scanner. One pass walks a contract's logs from
/// the stored cursor to the chain tip in `max_blocks` windows; each decoded
/// event is merged (which advances the cursor) before the next is touched.
/// Strictly sequential within a chain, since the cursor is the ordering.
#[derive(Clone)]
pub struct Indexer {
    aggregator: Aggregator,
    registry: TokenRegistry,
}

/// Whether the stored cursor already covers `(block, tx_index)`.
pub fn already_merged(block: u64, tx_index: u64, stored: Option<u64>, tx_floor: i64) -> bool {
    match stored {
        None => false,
        Some(cursor_block) => {
            block < cursor_block
                || (block == cursor_block && i64::try_from(tx_index).unwrap_or(i64::MAX) <= tx_floor)
        }
    }
}

impl Indexer {
    pub fn new(store: Store, registry: TokenRegistry) -> Self {
        Self {
            aggregator: Aggregator::new(store),
            registry,
        }
    }

    /// One bridge pass for `client`'s chain. Any window that still fails
    /// after the RPC retry budget aborts the pass with the cursor untouched;
    /// the next scheduler tick resumes from the same place.
    pub async fn sync_bridge(
        &self,
        client: &ChainClient,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let chain = client.chain();
        let stream = Stream {
            chain: chain.name,
            ns: NS_LOGS,
            address: chain.bridge,
        };

        let (stored, tx_floor) = self.aggregator.cursor(&stream).await?;
        let mut cursor = stored.unwrap_or(chain.bridge_start_block).max(chain.bridge_start_block);
        let tip = client.block_number().await?;
        let topics = decode::bridge_topic0s();

        info!(chain = chain.name, cursor, tip, "bridge pass starting");

        let mut times = BlockTimeCache::default();
        let mut merged = 0u64;
        while cursor < tip {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            let to = (cursor + chain.max_blocks).min(tip);
            let logs = client
                .get_logs(cursor, to, chain.bridge, &topics)
                .await
                .with_context(|| format!("{} bridge logs [{cursor}, {to}]", chain.name))?;

            let fresh: Vec<Log> = logs
                .into_iter()
                .filter(|l| !already_merged(l.block_number, l.tx_index, stored, tx_floor))
                .collect();
            populate_timestamps(client, &mut times, &fresh, shutdown).await?;

            for log in &fresh {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                if self.process_bridge_log(client, &stream, &times, log).await? {
                    merged += 1;
                }
            }

            debug!(chain = chain.name, from = cursor, to, logs = fresh.len(), "bridge window done");
            cursor = to + 1;
        }

        info!(chain = chain.name, merged, tip, "bridge pass done");
        Ok(())
    }

    async fn process_bridge_log(
        &self,
        client: &ChainClient,
        stream: &Stream,
        times: &BlockTimeCache,
        log: &Log,
    ) -> Result<bool> {
        let chain = client.chain();
        let Some(topic) = log.topics.first().and_then(|t| BridgeTopic::from_topic0(t)) else {
            return Ok(false);
        };

        let timestamp = times
            .get(log.block_number)
            .with_context(|| format!("missing timestamp for block {}", log.block_number))?;
        let date = utc_date(timestamp)?;
        let pos = LogPos {
            block: log.block_number,
            tx_index: log.tx_index,
            timestamp,
        };

        match topic.direction() {
            Direction::Out => {
                let fields = match parse_out_data(topic, &log.data) {
                    Ok(fields) => fields,
                    Err(e) => {
                        warn!(
                            chain = chain.name,
                            tx = %log.tx_hash,
                            block = log.block_number,
                            err = %e,
                            "undecodable OUT log; recording skipped"
                        );
                        self.aggregator.record_skipped(stream, log.block_number).await?;
                        return Ok(false);
                    }
                };

                let Some(decimals) = self.registry.decimals(chain, &fields.token).await? else {
                    // An attempt to bridge a token the bridge does not
                    // support; nothing to account for.
                    debug!(chain = chain.name, token = %fields.token, "ignoring OUT with unknown token");
                    return Ok(false);
                };

                let event = Event::BridgeOut(BridgeOut {
                    chain: chain.name,
                    date,
                    asset: fields.token,
                    to_chain_id: fields.to_chain_id,
                    amount: u256_to_decimal(fields.amount, decimals)?,
                    block: log.block_number,
                    tx_hash: log.tx_hash.clone(),
                    tx_index: log.tx_index,
                });
                self.aggregator.merge(stream, &event, pos).await?;
                Ok(true)
            }
            Direction::In => {
                let tx = client.get_transaction(&log.tx_hash).await?;
                let input_hex = tx
                    .get("input")
                    .and_then(serde_json::Value::as_str)
                    .context("transaction missing input")?;
                let input =
                    hex::decode(input_hex.trim_start_matches("0x")).context("decode tx input")?;

                let fields = match parse_in_input(topic, &input) {
                    Ok(fields) => fields,
                    Err(e) => {
                        warn!(
                            chain = chain.name,
                            tx = %log.tx_hash,
                            block = log.block_number,
                            err = %e,
                            "undecodable IN input; recording skipped"
                        );
                        self.aggregator.record_skipped(stream, log.block_number).await?;
                        return Ok(false);
                    }
                };

                let Some(decimals) = self.registry.decimals(chain, &fields.token).await? else {
                    // Validator-submitted txs should only carry supported
                    // tokens; this is worth an operator's attention.
                    error!(
                        chain = chain.name,
                        token = %fields.token,
                        tx = %log.tx_hash,
                        "IN event references a token the bridge-config does not know; skipping"
                    );
                    return Ok(false);
                };

                let receipt = client.get_transaction_receipt(&log.tx_hash).await?;
                let gas = match gas_stats(chain, &receipt) {
                    Ok(gas) => gas,
                    Err(e) => {
                        warn!(
                            chain = chain.name,
                            tx = %log.tx_hash,
                            err = %e,
                            "unusable receipt; recording skipped"
                        );
                        self.aggregator.record_skipped(stream, log.block_number).await?;
                        return Ok(false);
                    }
                };

                let event = Event::BridgeIn(BridgeIn {
                    chain: chain.name,
                    date,
                    asset: fields.token,
                    amount: u256_to_decimal(fields.amount, decimals)?,
                    fee: u256_to_decimal(fields.fee, decimals)?,
                    validator_gas_paid: gas.gas_paid,
                    validator_gas_price: gas.gas_price,
                    airdrop: airdrop_for(chain.name, log.block_number),
                    block: log.block_number,
                    tx_hash: log.tx_hash.clone(),
                    tx_index: log.tx_index,
                });
                self.aggregator.merge(stream, &event, pos).await?;
                Ok(true)
            }
        }
    }

    /// One pool pass for `client`'s chain, covering every pool contract the
    /// chain carries.
    pub async fn sync_pools(
        &self,
        client: &ChainClient,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let chain = client.chain();
        if chain.pools.is_empty() {
            return Ok(());
        }

        let topics = decode::pool_topic0s();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        let mut decoder = PoolDecoder::new(chain);

        for pool in chain.pools {
            let stream = Stream {
                chain: chain.name,
                ns: NS_POOL,
                address: pool.address,
            };
            let (stored, tx_floor) = self.aggregator.cursor(&stream).await?;

            // The fee table is derived state: rebuild what happened before
            // the resume point so mid-stream swaps price correctly.
            if let Some(stored_block) = stored {
                if stored_block > pool.start_block {
                    self.replay_fee_changes(client, &mut decoder, pool, stored_block, shutdown)
                        .await?;
                }
            }

            let mut cursor = stored.unwrap_or(pool.start_block).max(pool.start_block);
            let tip = client.block_number().await?;
            info!(chain = chain.name, pool = pool.address, cursor, tip, "pool pass starting");

            let mut times = BlockTimeCache::default();
            while cursor < tip {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                let to = (cursor + chain.max_blocks).min(tip);
                let logs = client
                    .get_logs(cursor, to, pool.address, &topic_refs)
                    .await
                    .with_context(|| format!("{} pool logs [{cursor}, {to}]", chain.name))?;

                let fresh: Vec<Log> = logs
                    .into_iter()
                    .filter(|l| !already_merged(l.block_number, l.tx_index, stored, tx_floor))
                    .collect();
                populate_timestamps(client, &mut times, &fresh, shutdown).await?;

                for log in &fresh {
                    if shutdown.is_cancelled() {
                        return Ok(());
                    }
                    let timestamp = times
                        .get(log.block_number)
                        .with_context(|| format!("missing timestamp for block {}", log.block_number))?;
                    let date = utc_date(timestamp)?;

                    let event = match decoder.decode(pool, log, date) {
                        Ok(Some(event)) => event,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(
                                chain = chain.name,
                                pool = pool.address,
                                tx = %log.tx_hash,
                                err = %e,
                                "undecodable pool log; recording skipped"
                            );
                            self.aggregator.record_skipped(&stream, log.block_number).await?;
                            continue;
                        }
                    };
                    let pos = LogPos {
                        block: log.block_number,
                        tx_index: log.tx_index,
                        timestamp,
                    };
                    self.aggregator.merge(&stream, &event, pos).await?;
                }

                debug!(chain = chain.name, pool = pool.address, from = cursor, to, "pool window done");
                cursor = to + 1;
            }
        }

        Ok(())
    }

    async fn replay_fee_changes(
        &self,
        client: &ChainClient,
        decoder: &mut PoolDecoder,
        pool: &'static Pool,
        up_to: u64,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let chain = client.chain();
        let topics = decode::fee_change_topic0s();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();

        info!(chain = chain.name, pool = pool.address, up_to, "reseeding pool fee state");

        let mut cursor = pool.start_block;
        while cursor < up_to {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            let to = (cursor + chain.max_blocks).min(up_to);
            let logs = client
                .get_logs(cursor, to, pool.address, &topic_refs)
                .await
                .with_context(|| format!("{} fee replay [{cursor}, {to}]", chain.name))?;
            for log in &logs {
                decoder.seed_fee_change(pool, log)?;
            }
            cursor = to + 1;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct BlockTimeCache {
    map: HashMap<u64, u64>,
}

impl BlockTimeCache {
    pub fn get(&self, block: u64) -> Option<u64> {
        self.map.get(&block).copied()
    }

    pub fn insert(&mut self, block: u64, timestamp: u64) {
        self.map.insert(block, timestamp);
    }
}

/// Fetch timestamps for every block the window's logs touch. Header fetches
/// are the only concurrent RPC within a chain pass; merges stay sequential.
async fn populate_timestamps(
    client: &ChainClient,
    cache: &mut BlockTimeCache,
    logs: &[Log],
    shutdown: &CancellationToken,
) -> Result<()> {
    let missing: HashSet<u64> = logs
        .iter()
        .map(|l| l.block_number)
        .filter(|b| cache.get(*b).is_none())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let mut fetches = stream::iter(missing.into_iter())
        .map(|block| {
            let client = client.clone();
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = shutdown.cancelled() => Ok::<Option<(u64, u64)>, anyhow::Error>(None),
                    res = client.get_block(block) => {
                        let header = res?;
                        let ts = parse_quantity_u64(
                            header.get("timestamp").context("block missing timestamp")?,
                        )
                        .with_context(|| format!("block {block} timestamp"))?;
                        Ok(Some((block, ts)))
                    }
                }
            }
        })
        .buffer_unordered(TIMESTAMP_CONCURRENCY);

    while let Some(res) = fetches.next().await {
        if let Some((block, ts)) = res? {
            cache.insert(block, ts);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{BridgeOutBucket, NS_LOGS};
    use crate::decode::BridgeOut;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn fresh_stream_accepts_everything() {
        assert!(!already_merged(0, 0, None, -1));
        assert!(!already_merged(1_000, 5, None, -1));
    }

    #[test]
    fn filter_skips_at_or_below_the_cursor() {
        let stored = Some(20_000_000);
        // Earlier blocks are out regardless of tx index.
        assert!(already_merged(19_999_999, 99, stored, 5));
        // Same block: inclusive up to the tx floor.
        assert!(already_merged(20_000_000, 4, stored, 5));
        assert!(already_merged(20_000_000, 5, stored, 5));
        assert!(!already_merged(20_000_000, 6, stored, 5));
        // Later blocks always pass.
        assert!(!already_merged(20_000_001, 0, stored, 5));
    }

    #[test]
    fn tx_floor_of_minus_one_only_excludes_earlier_blocks() {
        let stored = Some(100);
        assert!(already_merged(99, 0, stored, -1));
        assert!(!already_merged(100, 0, stored, -1));
    }

    #[tokio::test]
    async fn replaying_a_merged_log_is_a_no_op() {
        let store = Store::memory();
        let aggregator = Aggregator::new(store.clone());
        let stream = Stream {
            chain: "polygon",
            ns: NS_LOGS,
            address: "0x8f5bbb2bb8c2ee94639e55d5f41de9b4839c1280",
        };

        let event = Event::BridgeOut(BridgeOut {
            chain: "polygon",
            date: NaiveDate::from_ymd_opt(2022, 6, 1).expect("date"),
            asset: "0xb6c473756050de474286bed418b77aeac39b02af".to_string(),
            to_chain_id: 56,
            amount: Decimal::from_str("1000").expect("amount"),
            block: 20_000_000,
            tx_hash: "0xabc".to_string(),
            tx_index: 5,
        });
        let pos = LogPos {
            block: 20_000_000,
            tx_index: 5,
            timestamp: 1_654_048_800,
        };
        aggregator.merge(&stream, &event, pos).await.expect("merge");

        // Second pass: the same log arrives again, but the cursor now covers
        // it, so the indexer's filter drops it before the aggregator sees it.
        let (stored, tx_floor) = aggregator.cursor(&stream).await.expect("cursor");
        assert!(already_merged(20_000_000, 5, stored, tx_floor));

        let raw = store
            .get("polygon:bridge:2022-06-01:0xb6c473756050de474286bed418b77aeac39b02af:OUT:56")
            .await
            .expect("get")
            .expect("bucket");
        let bucket: BridgeOutBucket = serde_json::from_str(&raw).expect("decode");
        assert_eq!(bucket.amount, Decimal::from_str("1000").expect("amount"));
        assert_eq!(bucket.tx_count, 1);
    }

    #[tokio::test]
    async fn in_transfer_composes_fee_gas_and_airdrop_into_one_bucket() {
        use crate::aggregate::BridgeInBucket;
        use crate::airdrop::airdrop_for;
        use crate::decode::{BridgeTopic, parse_in_input};
        use crate::rpc::gas_stats;
        use crate::units::{u256_to_decimal, utc_date};
        use alloy::primitives::U256;

        // Validator call input: mint(to, nUSD, 2e18, 5e16, kappa).
        let nusd = "0xb6c473756050de474286bed418b77aeac39b02af";
        let mut input = vec![0x1c, 0xf5, 0xf0, 0x7f];
        for word in [
            U256::from_str("0x0000000000000000000000000000000000000abc").expect("to"),
            U256::from_str(nusd).expect("token"),
            U256::from_str("2000000000000000000").expect("amount"),
            U256::from_str("50000000000000000").expect("fee"),
            U256::from(9u8),
        ] {
            input.extend(word.to_be_bytes::<32>());
        }
        let fields = parse_in_input(BridgeTopic::TokenMint, &input).expect("parse input");

        let polygon = crate::chains::by_name("polygon").expect("polygon");
        let receipt = serde_json::json!({
            "gasUsed": "0x13880",               // 80_000
            "effectiveGasPrice": "0xba43b7400", // 50 gwei
        });
        let gas = gas_stats(polygon, &receipt).expect("gas stats");

        let block = 20_000_000u64;
        let timestamp = 1_654_048_800u64; // 2022-06-01
        let event = Event::BridgeIn(BridgeIn {
            chain: polygon.name,
            date: utc_date(timestamp).expect("date"),
            asset: fields.token.clone(),
            amount: u256_to_decimal(fields.amount, 18).expect("amount"),
            fee: u256_to_decimal(fields.fee, 18).expect("fee"),
            validator_gas_paid: gas.gas_paid,
            validator_gas_price: gas.gas_price,
            airdrop: airdrop_for(polygon.name, block),
            block,
            tx_hash: "0xmint".to_string(),
            tx_index: 2,
        });

        let store = Store::memory();
        let aggregator = Aggregator::new(store.clone());
        let stream = Stream {
            chain: "polygon",
            ns: NS_LOGS,
            address: "0x8f5bbb2bb8c2ee94639e55d5f41de9b4839c1280",
        };
        aggregator
            .merge(&stream, &event, LogPos { block, tx_index: 2, timestamp })
            .await
            .expect("merge");

        let raw = store
            .get(&format!("polygon:bridge:2022-06-01:{nusd}:IN"))
            .await
            .expect("get")
            .expect("bucket");
        let bucket: BridgeInBucket = serde_json::from_str(&raw).expect("decode");
        assert_eq!(bucket.amount, Decimal::from_str("2").expect("2"));
        assert_eq!(bucket.tx_count, 1);
        assert_eq!(bucket.fees, Decimal::from_str("0.05").expect("0.05"));
        // Block 20_000_000 predates the airdrop bump at 20_335_949.
        assert_eq!(bucket.airdrops, Decimal::from_str("0.0003").expect("0.0003"));
        assert_eq!(bucket.validator.gas_paid, Decimal::from_str("0.004").expect("0.004"));
        assert_eq!(bucket.validator.gas_price, Decimal::from_str("50").expect("50"));
    }

    #[test]
    fn block_time_cache_round_trips() {
        let mut cache = BlockTimeCache::default();
        assert_eq!(cache.get(1), None);
        cache.insert(1, 1_654_048_800);
        assert_eq!(cache.get(1), Some(1_654_048_800));
    }
}
