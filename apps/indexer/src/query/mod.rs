mod charts;
mod fees;
mod pools;
mod treasury;
mod volume;

pub use charts::ChartPoint;
pub use fees::{AirdropPoint, DatedFees, FeePoint, FeeStats, ValidatorPoint};
pub use pools::PoolTokens;
pub use treasury::{BalanceEntry, TreasuryBalances};
pub use volume::{
    ChainVolume, TokenSeries, TokenTotal, TotalsView, UsdStat, VolumePoint, VolumeStats,
};

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::aggregate::{BridgeInBucket, BridgeOutBucket, DateAnchor, date2block_key};
use crate::chains::{self, Chain, PoolKind};
use crate::decode::Direction;
use crate::prices::{PriceOracle, cgid_for_address};
use crate::rpc::ChainClient;
use crate::store::{Store, key_segment};
use crate::tokens;

const CACHE_TTL: Duration = Duration::from_secs(20 * 60);

/// Read-only error contract the HTTP layer maps onto responses: everything
/// except `Internal` is a 400 with `{error, valids?}`.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid chain")]
    InvalidChain { valids: Vec<&'static str> },
    #[error("invalid token")]
    InvalidToken { valids: Vec<&'static str> },
    #[error("invalid direction")]
    InvalidDirection,
    #[error("invalid pool")]
    InvalidPool,
    #[error("invalid date")]
    InvalidDate,
    #[error("contract not deployed")]
    ContractNotDeployed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl QueryError {
    pub fn http_status(&self) -> u16 {
        match self {
            QueryError::Internal(_) => 500,
            _ => 400,
        }
    }

    pub fn to_body(&self) -> Value {
        let mut body = serde_json::json!({ "error": self.to_string() });
        let valids = match self {
            QueryError::InvalidChain { valids } => Some(valids.clone()),
            QueryError::InvalidToken { valids } => Some(valids.clone()),
            _ => None,
        };
        if let Some(valids) = valids {
            body["valids"] = serde_json::json!(valids);
        }
        body
    }
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// The read surface the HTTP layer consumes. Never mutates aggregate state;
/// the only writes it issues are price-miss enqueues (via the oracle) and
/// rendered-response cache entries.
#[derive(Clone)]
pub struct QueryApi {
    store: Store,
    clients: Arc<HashMap<&'static str, ChainClient>>,
    oracle: PriceOracle,
}

/// One IN bucket with its key parts.
pub(crate) struct InRow {
    pub date: NaiveDate,
    pub asset: String,
    pub bucket: BridgeInBucket,
}

/// One OUT bucket with its key parts.
pub(crate) struct OutRow {
    pub date: NaiveDate,
    pub asset: String,
    pub to_chain_id: u64,
    pub bucket: BridgeOutBucket,
}

impl QueryApi {
    pub fn new(
        store: Store,
        clients: Arc<HashMap<&'static str, ChainClient>>,
        oracle: PriceOracle,
    ) -> Self {
        Self { store, clients, oracle }
    }

    pub(crate) fn oracle(&self) -> &PriceOracle {
        &self.oracle
    }

    pub(crate) fn chain(&self, name: &str) -> QueryResult<&'static Chain> {
        chains::by_name(name).ok_or(QueryError::InvalidChain { valids: chains::names() })
    }

    pub(crate) fn client(&self, chain: &Chain) -> QueryResult<&ChainClient> {
        self.clients
            .get(chain.name)
            .with_context(|| format!("no rpc client for {}", chain.name))
            .map_err(QueryError::from)
    }

    pub(crate) fn direction(&self, raw: &str) -> QueryResult<Direction> {
        Direction::parse(raw).ok_or(QueryError::InvalidDirection)
    }

    pub(crate) fn token(&self, chain: &Chain, raw: &str) -> QueryResult<&'static str> {
        tokens::resolve(chain.name, raw).ok_or_else(|| QueryError::InvalidToken {
            valids: tokens::symbols_for(chain.name),
        })
    }

    pub(crate) async fn in_rows(
        &self,
        chain: &Chain,
        token: Option<&str>,
    ) -> Result<Vec<InRow>> {
        let pattern = match token {
            Some(token) => format!("{}:bridge:*:{token}:IN", chain.name),
            None => format!("{}:bridge:*:IN", chain.name),
        };
        let mut rows = Vec::new();
        for (key, raw) in self.store.get_matching(&pattern).await? {
            let (date, asset) = bridge_key_parts(&key)?;
            let bucket: BridgeInBucket =
                serde_json::from_str(&raw).with_context(|| format!("decode bucket {key}"))?;
            rows.push(InRow { date, asset, bucket });
        }
        Ok(rows)
    }

    pub(crate) async fn out_rows(
        &self,
        chain: &Chain,
        token: Option<&str>,
    ) -> Result<Vec<OutRow>> {
        let pattern = match token {
            Some(token) => format!("{}:bridge:*:{token}:OUT:*", chain.name),
            None => format!("{}:bridge:*:OUT:*", chain.name),
        };
        let mut rows = Vec::new();
        for (key, raw) in self.store.get_matching(&pattern).await? {
            let (date, asset) = bridge_key_parts(&key)?;
            let to_chain_id = key_segment(&key, 5)
                .with_context(|| format!("no to-chain in key {key}"))?
                .parse::<u64>()
                .with_context(|| format!("bad to-chain in key {key}"))?;
            let bucket: BridgeOutBucket =
                serde_json::from_str(&raw).with_context(|| format!("decode bucket {key}"))?;
            rows.push(OutRow { date, asset, to_chain_id, bucket });
        }
        Ok(rows)
    }

    /// Sync status: per chain, the highest durably merged block across its
    /// streams next to the chain's live tip.
    pub async fn syncing(&self) -> QueryResult<BTreeMap<&'static str, SyncStatus>> {
        let cursors = self
            .store
            .get_matching("*MAX_BLOCK_STORED")
            .await
            .map_err(QueryError::from)?;

        let mut current: BTreeMap<&'static str, u64> = BTreeMap::new();
        for (key, raw) in cursors {
            let Some(chain) = key_segment(&key, 0).and_then(chains::by_name) else {
                continue;
            };
            let stored = raw.parse::<u64>().with_context(|| format!("parse cursor {key}"))?;
            let entry = current.entry(chain.name).or_default();
            *entry = (*entry).max(stored);
        }

        let mut out = BTreeMap::new();
        for (name, stored) in current {
            let chain = self.chain(name)?;
            let tip = self.client(chain)?.block_number().await?;
            out.insert(name, SyncStatus { current: stored, blockheight: tip });
        }
        Ok(out)
    }

    /// The day's anchor block, written by the first bridge event observed on
    /// that date.
    pub async fn date_to_block(
        &self,
        chain: &str,
        date: &str,
    ) -> QueryResult<Option<DateAnchor>> {
        let chain = self.chain(chain)?;
        let date = NaiveDate::from_str(date).map_err(|_| QueryError::InvalidDate)?;
        let Some(raw) = self
            .store
            .get(&date2block_key(chain.name, date))
            .await
            .map_err(QueryError::from)?
        else {
            return Ok(None);
        };
        let anchor: DateAnchor =
            serde_json::from_str(&raw).context("decode date anchor").map_err(QueryError::from)?;
        Ok(Some(anchor))
    }

    /// Static token metadata, per chain.
    pub fn token_info(&self) -> BTreeMap<&'static str, BTreeMap<&'static str, TokenMeta>> {
        let mut out: BTreeMap<&'static str, BTreeMap<&'static str, TokenMeta>> = BTreeMap::new();
        for tok in tokens::TOKENS {
            out.entry(tok.chain).or_default().insert(
                tok.address,
                TokenMeta {
                    symbol: tok.symbol,
                    name: tok.name,
                    decimals: tok.decimals,
                    cgid: cgid_for_address(tok.chain, tok.address).map(|c| c.id()),
                },
            );
        }
        out
    }

    /// Price of one token (symbol or address), at `date` or spot.
    pub async fn token_price(
        &self,
        chain: &str,
        token: &str,
        date: Option<&str>,
    ) -> QueryResult<rust_decimal::Decimal> {
        let chain = self.chain(chain)?;
        let token = self.token(chain, token)?;
        let date = match date {
            Some(raw) => Some(NaiveDate::from_str(raw).map_err(|_| QueryError::InvalidDate)?),
            None => None,
        };
        Ok(self.oracle.get_for_address(chain.name, token, date).await?)
    }

    /// Render the canonical read set and park each response in the store
    /// under a `cache:` key for the HTTP layer. Failures are logged per view
    /// and never abort the sweep.
    pub async fn warm_caches(&self) -> Result<()> {
        for chain in chains::CHAINS {
            for direction in [Direction::In, Direction::Out] {
                let key = format!("cache:volume:{}:{}", chain.name, direction.as_str());
                match self.chain_volume(chain.name, direction.as_str()).await {
                    Ok(view) => self.cache_view(&key, &view).await?,
                    Err(e) => warn!(chain = chain.name, view = %key, err = %e, "cache warm failed"),
                }
            }

            let key = format!("cache:fees:validator:{}", chain.name);
            match self.validator_gas_fees(chain.name).await {
                Ok(view) => self.cache_view(&key, &view).await?,
                Err(e) => warn!(chain = chain.name, view = %key, err = %e, "cache warm failed"),
            }

            let key = format!("cache:fees:airdrop:{}", chain.name);
            match self.airdrop_amounts(chain.name).await {
                Ok(view) => self.cache_view(&key, &view).await?,
                Err(e) => warn!(chain = chain.name, view = %key, err = %e, "cache warm failed"),
            }

            for pool in chain.pools {
                let key = format!("cache:pools:virtual:{}:{}", chain.name, pool.kind.as_str());
                match self.virtual_price(chain.name, None, pool.kind).await {
                    Ok(view) => self.cache_view(&key, &view).await?,
                    Err(e) => warn!(chain = chain.name, view = %key, err = %e, "cache warm failed"),
                }
            }
        }
        info!("query cache warmed");
        Ok(())
    }

    async fn cache_view<T: Serialize>(&self, key: &str, view: &T) -> Result<()> {
        let rendered = serde_json::to_string(view).with_context(|| format!("encode {key}"))?;
        self.store.set_ex(key, &rendered, CACHE_TTL).await
    }

    /// Parse a user-supplied pool family name.
    pub fn pool_kind(&self, raw: &str) -> QueryResult<PoolKind> {
        PoolKind::parse(raw).ok_or(QueryError::InvalidPool)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub current: u64,
    pub blockheight: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenMeta {
    pub symbol: &'static str,
    pub name: &'static str,
    pub decimals: u32,
    pub cgid: Option<&'static str>,
}

pub(crate) fn bridge_key_parts(key: &str) -> Result<(NaiveDate, String)> {
    let date = key_segment(key, 2)
        .with_context(|| format!("no date in key {key}"))
        .and_then(|d| NaiveDate::from_str(d).with_context(|| format!("bad date in key {key}")))?;
    let asset = key_segment(key, 3)
        .with_context(|| format!("no asset in key {key}"))?
        .to_string();
    Ok((date, asset))
}

pub(crate) fn addr_hex(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_slice()))
}

/// Revert-ish responses from `eth_call` against a block before deployment.
pub(crate) fn not_deployed(ret: &[u8]) -> QueryResult<&[u8]> {
    if ret.is_empty() {
        Err(QueryError::ContractNotDeployed)
    } else {
        Ok(ret)
    }
}
