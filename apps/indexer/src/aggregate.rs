use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::chains::PoolKind;
use crate::decode::{Event, FeeKind, SwapKind};
use crate::store::Store;

pub const NS_LOGS: &str = "logs";
pub const NS_POOL: &str = "pool";

/// One indexed contract on one chain; the unit cursors are tracked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stream {
    pub chain: &'static str,
    pub ns: &'static str,
    pub address: &'static str,
}

impl Stream {
    pub fn max_block_key(&self) -> String {
        format!("{}:{}:{}:MAX_BLOCK_STORED", self.chain, self.ns, self.address)
    }

    pub fn tx_index_key(&self) -> String {
        format!("{}:{}:{}:TX_INDEX", self.chain, self.ns, self.address)
    }

    pub fn skipped_key(&self) -> String {
        format!("{}:{}:skipped", self.chain, self.ns)
    }
}

/// Where an event sits on its chain; carried alongside the event so the
/// cursor advance and the day anchor agree with the merged log.
#[derive(Debug, Clone, Copy)]
pub struct LogPos {
    pub block: u64,
    pub tx_index: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorGas {
    pub gas_paid: Decimal,
    pub gas_price: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeInBucket {
    pub amount: Decimal,
    pub tx_count: u64,
    pub fees: Decimal,
    pub airdrops: Decimal,
    pub validator: ValidatorGas,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeOutBucket {
    pub amount: Decimal,
    pub tx_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolBucket {
    pub volume: Decimal,
    pub lp_fees: Decimal,
    pub admin_fees: Decimal,
    pub tx_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateAnchor {
    pub block: u64,
    pub timestamp: u64,
}

pub fn bridge_in_key(chain: &str, date: NaiveDate, asset: &str) -> String {
    format!("{chain}:bridge:{date}:{asset}:IN")
}

pub fn bridge_out_key(chain: &str, date: NaiveDate, asset: &str, to_chain_id: u64) -> String {
    format!("{chain}:bridge:{date}:{asset}:OUT:{to_chain_id}")
}

pub fn pool_key(chain: &str, date: NaiveDate, kind: PoolKind, sub_kind: SwapKind) -> String {
    format!("{chain}:pool:{date}:{}:{}", kind.as_str(), sub_kind.as_str())
}

pub fn pool_fee_key(chain: &str, date: NaiveDate, kind: PoolKind, fee: FeeKind) -> String {
    format!("{chain}:pool:{date}:{}:newfee_{}", kind.as_str(), fee.as_str())
}

pub fn date2block_key(chain: &str, date: NaiveDate) -> String {
    format!("{chain}:date2block:{date}")
}

/// Folds canonical events into per-day buckets and advances cursors.
///
/// Merging is a plain read-modify-write: counters only ever grow, so the
/// result is the same whatever order a day's events arrive in. Idempotence
/// is the indexer's job; it must not hand over anything at or below the
/// stored `(block, tx_index)` cursor.
#[derive(Clone)]
pub struct Aggregator {
    store: Store,
}

impl Aggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Stored cursor: highest durably merged block, and the tx index floor
    /// within it (-1 when nothing was stored yet).
    pub async fn cursor(&self, stream: &Stream) -> Result<(Option<u64>, i64)> {
        let block = match self.store.get(&stream.max_block_key()).await? {
            Some(raw) => Some(raw.parse::<u64>().context("parse MAX_BLOCK_STORED")?),
            None => None,
        };
        let tx_floor = match self.store.get(&stream.tx_index_key()).await? {
            Some(raw) => raw.parse::<i64>().context("parse TX_INDEX")?,
            None => -1,
        };
        Ok((block, tx_floor))
    }

    /// Merge one event and advance the stream cursor to `pos`, as a single
    /// logical operation. A crash in between can double-merge one event on
    /// replay; that window is accepted.
    pub async fn merge(&self, stream: &Stream, event: &Event, pos: LogPos) -> Result<()> {
        match event {
            Event::BridgeOut(out) => {
                let key = bridge_out_key(out.chain, out.date, &out.asset, out.to_chain_id);
                self.read_modify_write::<BridgeOutBucket>(&key, |b| {
                    b.amount += out.amount;
                    b.tx_count += 1;
                })
                .await?;
                self.anchor_date(out.chain, out.date, pos).await?;
            }
            Event::BridgeIn(inn) => {
                let key = bridge_in_key(inn.chain, inn.date, &inn.asset);
                self.read_modify_write::<BridgeInBucket>(&key, |b| {
                    b.amount += inn.amount;
                    b.tx_count += 1;
                    b.fees += inn.fee;
                    b.airdrops += inn.airdrop;
                    b.validator.gas_paid += inn.validator_gas_paid;
                    b.validator.gas_price += inn.validator_gas_price;
                })
                .await?;
                self.anchor_date(inn.chain, inn.date, pos).await?;
            }
            Event::PoolSwap(swap) => {
                let key = pool_key(swap.chain, swap.date, swap.pool_kind, swap.sub_kind);
                self.read_modify_write::<PoolBucket>(&key, |b| {
                    b.volume += swap.volume;
                    b.lp_fees += swap.lp_fees;
                    b.admin_fees += swap.admin_fees;
                    b.tx_count += 1;
                })
                .await?;
            }
            Event::PoolFeeChange(change) => {
                // Not a counter: the day's last change wins.
                let key = pool_fee_key(change.chain, change.date, change.pool_kind, change.kind);
                self.store.set(&key, &change.new_value.to_string()).await?;
            }
        }

        self.store
            .set(&stream.max_block_key(), &pos.block.to_string())
            .await?;
        self.store
            .set(&stream.tx_index_key(), &pos.tx_index.to_string())
            .await?;
        Ok(())
    }

    /// First bridge event of a day pins that day to its block; later events
    /// lose the `setnx` race and leave the anchor alone.
    async fn anchor_date(&self, chain: &str, date: NaiveDate, pos: LogPos) -> Result<()> {
        let anchor = DateAnchor {
            block: pos.block,
            timestamp: pos.timestamp,
        };
        let encoded = serde_json::to_string(&anchor).context("encode date anchor")?;
        self.store
            .setnx(&date2block_key(chain, date), &encoded)
            .await?;
        Ok(())
    }

    pub async fn record_skipped(&self, stream: &Stream, block: u64) -> Result<()> {
        self.store
            .sadd(&stream.skipped_key(), &block.to_string())
            .await
    }

    async fn read_modify_write<T>(&self, key: &str, apply: impl FnOnce(&mut T)) -> Result<()>
    where
        T: Default + Serialize + DeserializeOwned,
    {
        let mut bucket: T = match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw).with_context(|| format!("decode bucket {key}"))?,
            None => T::default(),
        };
        apply(&mut bucket);
        let encoded = serde_json::to_string(&bucket).with_context(|| format!("encode bucket {key}"))?;
        self.store.set(key, &encoded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{BridgeIn, BridgeOut, PoolFeeChange, PoolSwap};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("test literal")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).expect("test date")
    }

    const STREAM: Stream = Stream {
        chain: "polygon",
        ns: NS_LOGS,
        address: "0x8f5bbb2bb8c2ee94639e55d5f41de9b4839c1280",
    };

    const NUSD: &str = "0xb6c473756050de474286bed418b77aeac39b02af";

    fn out_event(amount: &str) -> Event {
        Event::BridgeOut(BridgeOut {
            chain: "polygon",
            date: date("2022-06-01"),
            asset: NUSD.to_string(),
            to_chain_id: 56,
            amount: dec(amount),
            block: 20_000_000,
            tx_hash: "0xabc".to_string(),
            tx_index: 5,
        })
    }

    fn pos(block: u64, tx_index: u64) -> LogPos {
        LogPos { block, tx_index, timestamp: 1_654_048_800 }
    }

    #[tokio::test]
    async fn out_bucket_accumulates_amount_and_count() {
        let store = Store::memory();
        let agg = Aggregator::new(store.clone());

        agg.merge(&STREAM, &out_event("1000"), pos(20_000_000, 5)).await.expect("merge");
        agg.merge(&STREAM, &out_event("250.5"), pos(20_000_001, 0)).await.expect("merge");

        let raw = store
            .get("polygon:bridge:2022-06-01:0xb6c473756050de474286bed418b77aeac39b02af:OUT:56")
            .await
            .expect("get")
            .expect("bucket exists");
        let bucket: BridgeOutBucket = serde_json::from_str(&raw).expect("decode");
        assert_eq!(bucket.amount, dec("1250.5"));
        assert_eq!(bucket.tx_count, 2);
    }

    #[tokio::test]
    async fn in_bucket_sums_every_counter() {
        let store = Store::memory();
        let agg = Aggregator::new(store.clone());

        let event = Event::BridgeIn(BridgeIn {
            chain: "polygon",
            date: date("2022-06-01"),
            asset: NUSD.to_string(),
            amount: dec("2"),
            fee: dec("0.05"),
            validator_gas_paid: dec("0.004"),
            validator_gas_price: dec("50"),
            airdrop: dec("0.0003"),
            block: 20_000_000,
            tx_hash: "0xdef".to_string(),
            tx_index: 7,
        });
        agg.merge(&STREAM, &event, pos(20_000_000, 7)).await.expect("merge");
        agg.merge(&STREAM, &event, pos(20_000_002, 1)).await.expect("merge");

        let raw = store
            .get("polygon:bridge:2022-06-01:0xb6c473756050de474286bed418b77aeac39b02af:IN")
            .await
            .expect("get")
            .expect("bucket exists");
        let bucket: BridgeInBucket = serde_json::from_str(&raw).expect("decode");
        assert_eq!(bucket.amount, dec("4"));
        assert_eq!(bucket.tx_count, 2);
        assert_eq!(bucket.fees, dec("0.1"));
        assert_eq!(bucket.airdrops, dec("0.0006"));
        assert_eq!(bucket.validator.gas_paid, dec("0.008"));
        assert_eq!(bucket.validator.gas_price, dec("100"));
    }

    #[tokio::test]
    async fn merge_order_does_not_change_the_bucket() {
        let events = [out_event("1"), out_event("20"), out_event("300")];

        let forward = Store::memory();
        let agg = Aggregator::new(forward.clone());
        for (i, ev) in events.iter().enumerate() {
            agg.merge(&STREAM, ev, pos(1, i as u64)).await.expect("merge");
        }

        let backward = Store::memory();
        let agg = Aggregator::new(backward.clone());
        for (i, ev) in events.iter().rev().enumerate() {
            agg.merge(&STREAM, ev, pos(1, i as u64)).await.expect("merge");
        }

        let key = "polygon:bridge:2022-06-01:0xb6c473756050de474286bed418b77aeac39b02af:OUT:56";
        assert_eq!(
            forward.get(key).await.expect("get"),
            backward.get(key).await.expect("get")
        );
    }

    #[tokio::test]
    async fn first_bridge_event_of_the_day_wins_the_anchor() {
        let store = Store::memory();
        let agg = Aggregator::new(store.clone());

        agg.merge(&STREAM, &out_event("1"), pos(20_000_000, 5)).await.expect("merge");
        agg.merge(&STREAM, &out_event("2"), pos(20_000_400, 0)).await.expect("merge");

        let raw = store
            .get("polygon:date2block:2022-06-01")
            .await
            .expect("get")
            .expect("anchor exists");
        let anchor: DateAnchor = serde_json::from_str(&raw).expect("decode");
        assert_eq!(anchor.block, 20_000_000);
        assert_eq!(anchor.timestamp, 1_654_048_800);
    }

    #[tokio::test]
    async fn cursors_track_the_last_merged_event() {
        let store = Store::memory();
        let agg = Aggregator::new(store.clone());

        assert_eq!(agg.cursor(&STREAM).await.expect("cursor"), (None, -1));

        agg.merge(&STREAM, &out_event("1"), pos(20_000_000, 5)).await.expect("merge");
        assert_eq!(agg.cursor(&STREAM).await.expect("cursor"), (Some(20_000_000), 5));

        agg.merge(&STREAM, &out_event("2"), pos(20_000_010, 2)).await.expect("merge");
        assert_eq!(agg.cursor(&STREAM).await.expect("cursor"), (Some(20_000_010), 2));
    }

    #[tokio::test]
    async fn pool_swaps_and_fee_changes_use_their_own_buckets() {
        let store = Store::memory();
        let agg = Aggregator::new(store.clone());
        let stream = Stream {
            chain: "polygon",
            ns: NS_POOL,
            address: "0x85fcd7dd0a1e1a9fcd5fd886ed522de8221c3ee5",
        };

        let swap = Event::PoolSwap(PoolSwap {
            chain: "polygon",
            date: date("2022-06-01"),
            pool_kind: PoolKind::Nusd,
            sub_kind: SwapKind::SwapNusd,
            volume: dec("1000"),
            lp_fees: dec("0.16"),
            admin_fees: dec("0.24"),
            block: 20_000_000,
            tx_hash: "0x1".to_string(),
            tx_index: 0,
        });
        agg.merge(&stream, &swap, pos(20_000_000, 0)).await.expect("merge");
        agg.merge(&stream, &swap, pos(20_000_001, 0)).await.expect("merge");

        let raw = store
            .get("polygon:pool:2022-06-01:nusd:swap_nusd")
            .await
            .expect("get")
            .expect("bucket exists");
        let bucket: PoolBucket = serde_json::from_str(&raw).expect("decode");
        assert_eq!(bucket.volume, dec("2000"));
        assert_eq!(bucket.admin_fees, dec("0.48"));
        assert_eq!(bucket.tx_count, 2);

        // Fee changes overwrite; the day's last one wins.
        for value in ["4000000", "8000000"] {
            let change = Event::PoolFeeChange(PoolFeeChange {
                chain: "polygon",
                date: date("2022-06-01"),
                pool_kind: PoolKind::Nusd,
                kind: FeeKind::Swap,
                new_value: dec(value),
                block: 20_000_002,
            });
            agg.merge(&stream, &change, pos(20_000_002, 0)).await.expect("merge");
        }
        assert_eq!(
            store
                .get("polygon:pool:2022-06-01:nusd:newfee_swap")
                .await
                .expect("get"),
            Some("8000000".to_string())
        );

        // Pool events never write day anchors.
        assert!(
            store
                .get("polygon:date2block:2022-06-01")
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn skipped_blocks_land_in_the_stream_set() {
        let store = Store::memory();
        let agg = Aggregator::new(store.clone());
        agg.record_skipped(&STREAM, 19_999_999).await.expect("skip");
        agg.record_skipped(&STREAM, 19_999_999).await.expect("skip again");
        assert_eq!(
            store.smembers("polygon:logs:skipped").await.expect("members"),
            vec!["19999999"]
        );
    }
}
