use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::store::Store;

pub const MISSING_SET: &str = "prices:missing";

/// SYN listed on 2021-08-30; earlier dates are proxied by the predecessor
/// token's price over the 2.5:1 migration ratio.
fn syn_listing_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 8, 30).expect("valid listing date")
}

/// External price-oracle identifiers the system knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cgid {
    Syn,
    Nrv,
    Eth,
    Bnb,
    Matic,
    Avax,
    Ftm,
    One,
    Movr,
    Glmr,
    Usdc,
    Usdt,
    Dai,
    Busd,
    Frax,
    High,
    Dog,
    Gohm,
}

impl Cgid {
    pub const ALL: &'static [Cgid] = &[
        Cgid::Syn,
        Cgid::Nrv,
        Cgid::Eth,
        Cgid::Bnb,
        Cgid::Matic,
        Cgid::Avax,
        Cgid::Ftm,
        Cgid::One,
        Cgid::Movr,
        Cgid::Glmr,
        Cgid::Usdc,
        Cgid::Usdt,
        Cgid::Dai,
        Cgid::Busd,
        Cgid::Frax,
        Cgid::High,
        Cgid::Dog,
        Cgid::Gohm,
    ];

    pub const fn id(self) -> &'static str {
        match self {
            Cgid::Syn => "synapse-2",
            Cgid::Nrv => "nerve-finance",
            Cgid::Eth => "ethereum",
            Cgid::Bnb => "binancecoin",
            Cgid::Matic => "matic-network",
            Cgid::Avax => "avalanche-2",
            Cgid::Ftm => "fantom",
            Cgid::One => "harmony",
            Cgid::Movr => "moonriver",
            Cgid::Glmr => "moonbeam",
            Cgid::Usdc => "usd-coin",
            Cgid::Usdt => "tether",
            Cgid::Dai => "dai",
            Cgid::Busd => "binance-usd",
            Cgid::Frax => "frax",
            Cgid::High => "highstreet",
            Cgid::Dog => "the-doge-nft",
            Cgid::Gohm => "governance-ohm",
        }
    }

    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.id() == id)
    }
}

pub fn price_key(cgid: Cgid, date: NaiveDate) -> String {
    format!("{}:{date}", cgid.id())
}

/// Token address to oracle id, per chain. Everything not listed here and not
/// pinned in `CUSTOM` prices at zero.
const ADDRESS_TO_CGID: &[(&str, &str, Cgid)] = &[
    ("ethereum", "0x0f2d719407fdbeff09d87557abb7232601fd9f29", Cgid::Syn),
    ("ethereum", "0x6b175474e89094c44da98b954eedeac495271d0f", Cgid::Dai),
    ("ethereum", "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", Cgid::Usdc),
    ("ethereum", "0xdac17f958d2ee523a2206206994597c13d831ec7", Cgid::Usdt),
    ("ethereum", "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", Cgid::Eth),
    ("ethereum", "0x71ab77b7dbb4fa7e017bc15090b2163221420282", Cgid::High),
    ("ethereum", "0xbaac2b4491727d78d2b78815144570b9f2fe8899", Cgid::Dog),
    ("ethereum", "0x853d955acef822db058eb8505911ed77f175b99e", Cgid::Frax),
    ("ethereum", "0x0ab87046fbb341d058f17cbc4c1133f25a20a52f", Cgid::Gohm),
    ("bsc", "0xa4080f1778e69467e905b8d6f72f6e441f9e9484", Cgid::Syn),
    ("bsc", "0xe9e7cea3dedca5984780bafc599bd69add087d56", Cgid::Busd),
    ("bsc", "0x8ac76a51cc950d9822d68b83fe1ad97b32cd580d", Cgid::Usdc),
    ("bsc", "0x55d398326f99059ff775485246999027b3197955", Cgid::Usdt),
    ("bsc", "0x5f4bde007dc06b867f86ebfe4802e34a1ffeed63", Cgid::High),
    ("bsc", "0xaa88c603d142c371ea0eac8756123c5805edee03", Cgid::Dog),
    ("polygon", "0xf8f9efc0db77d8881500bb06ff5d6abc3070e695", Cgid::Syn),
    ("polygon", "0x8f3cf7ad23cd3cadbd9735aff958023239c6a063", Cgid::Dai),
    ("polygon", "0x2791bca1f2de4661ed88a30c99a7a9449aa84174", Cgid::Usdc),
    ("polygon", "0xc2132d05d31c914a87c6611c10748aeb04b58e8f", Cgid::Usdt),
    ("avalanche", "0x1f1e7c893855525b303f99bdf5c3c05be09ca251", Cgid::Syn),
    ("avalanche", "0xd586e7f844cea2f87f50152665bcbc2c279d8d70", Cgid::Dai),
    ("avalanche", "0xa7d7079b0fead91f3e65f86e8915cb59c1a4c664", Cgid::Usdc),
    ("avalanche", "0xc7198437980c041c805a1edcba50c1ce5db95118", Cgid::Usdt),
    ("avalanche", "0x19e1ae0ee35c0404f835521146206595d37981ae", Cgid::Eth),
    ("avalanche", "0x53f7c5869a859f0aec3d334ee8b4cf01e3492f21", Cgid::Eth),
    ("arbitrum", "0x080f6aed32fc474dd5717105dba5ea57268f46eb", Cgid::Syn),
    ("arbitrum", "0xff970a61a04b1ca14834a43f5de4533ebddb5cc8", Cgid::Usdc),
    ("arbitrum", "0xfd086bc7cd5c481dcc9c85ebe478a1c0b69fcbb9", Cgid::Usdt),
    ("arbitrum", "0x3ea9b0ab55f34fb188824ee288ceaefc63cf908e", Cgid::Eth),
    ("arbitrum", "0x82af49447d8a07e3bd95bd0d56f35241523fbab1", Cgid::Eth),
    ("fantom", "0xe55e19fb4f2d85af758950957714292dac1e25b2", Cgid::Syn),
    ("fantom", "0x04068da6c83afcfa0e13ba15a6696662335d5b75", Cgid::Usdc),
    ("fantom", "0x049d68029688eabf473097a2fc38ef61633a3c7a", Cgid::Usdt),
    ("harmony", "0xe55e19fb4f2d85af758950957714292dac1e25b2", Cgid::Syn),
    ("harmony", "0xef977d2f931c1978db5f6747666fa1eacb0d0339", Cgid::Dai),
    ("harmony", "0x985458e523db3d53125813ed68c274899e9dfab4", Cgid::Usdc),
    ("harmony", "0x3c2b8be99c50593081eaa2a724f0b8285f5aba8f", Cgid::Usdt),
    ("boba", "0xb554a55358ff0382fb21f0a478c3546d1106be8c", Cgid::Syn),
    ("boba", "0x66a2a913e447d6b4bf33efbec43aaef87890fbbc", Cgid::Usdc),
    ("boba", "0x96419929d7949d6a801a6909c145c8eef6a40431", Cgid::Eth),
    ("boba", "0xd203de32170130082896b4111edf825a4774c18e", Cgid::Eth),
    ("optimism", "0x5a5fff6f753d7c11a56a52fe47a177a87e431655", Cgid::Syn),
    ("optimism", "0x809dc529f07651bd43a172e8db6f4a7a0d771036", Cgid::Eth),
    ("optimism", "0x121ab82b49b2bc4c7901ca46b8277962b4350204", Cgid::Eth),
    ("moonriver", "0xd80d8688b02b3fd3afb81cdb124f188bb5ad0445", Cgid::Syn),
    ("moonriver", "0x1a93b23281cc1cde4c4741353f3064709a16197d", Cgid::Frax),
    ("aurora", "0xd80d8688b02b3fd3afb81cdb124f188bb5ad0445", Cgid::Syn),
    ("aurora", "0xb12bfca5a55806aaf64e99521918a4bf0fc40802", Cgid::Usdc),
    ("aurora", "0x4988a896b1227218e4a686fde5eabdcabd91571f", Cgid::Usdt),
    ("moonbeam", "0xfb379932ebccb7505458dcdd01d8bbce191fa7b3", Cgid::Syn),
    ("moonbeam", "0x322e86852e492a7ee17f28a78c663da38fb33bfb", Cgid::Frax),
];

/// Pinned prices: the bridge-native stable assets track their peg, a couple
/// of delisted tokens track a constant.
const CUSTOM: &[(&str, &str, &str)] = &[
    ("ethereum", "0x1b84765de8b7566e4ceaf4d0fd3c5af52d3dde4f", "1"),
    ("bsc", "0x23b891e5c62e0955ae2bd185990103928ab817b3", "1"),
    ("bsc", "0xf0b8b631145d393a767b4387d08aa09969b2dfed", "1"),
    ("bsc", "0xdfd717f4e942931c98053d5453f803a1b52838db", "0"),
    ("polygon", "0xb6c473756050de474286bed418b77aeac39b02af", "1"),
    ("avalanche", "0xcfc37a6ab183dd4aed08c204d1c2773c0b1bdf46", "1"),
    ("arbitrum", "0x2913e812cf0dcca30fb28e6cac3d2dcff4497688", "1"),
    ("fantom", "0xed2a7edd7413021d440b09d654f3b87712abab66", "1"),
    ("fantom", "0x82f0b8b456c1a451378467398982d4834b6829c1", "1"),
    ("fantom", "0x78de9326792ce1d6eca0c978753c6953cdeedd73", "0.01"),
    ("harmony", "0xed2a7edd7413021d440b09d654f3b87712abab66", "1"),
    ("boba", "0x6b4712ae9797c199edd44f897ca09bc57628a1cf", "1"),
    ("aurora", "0x07379565cd8b0cae7c60dc78e7f601b34af2a21c", "1"),
];

pub fn cgid_for_address(chain: &str, address: &str) -> Option<Cgid> {
    ADDRESS_TO_CGID
        .iter()
        .find(|(c, a, _)| *c == chain && *a == address)
        .map(|(_, _, cgid)| *cgid)
}

fn custom_price(chain: &str, address: &str) -> Option<Decimal> {
    CUSTOM
        .iter()
        .find(|(c, a, _)| *c == chain && *a == address)
        .map(|(_, _, p)| Decimal::from_str(p).expect("static pinned price"))
}

/// Cache-first price lookups. Reads never block on the upstream provider:
/// a cold key is queued for the backfill job and answered with the nearest
/// prior day (up to a week back) or zero.
#[derive(Clone)]
pub struct PriceOracle {
    store: Store,
    client: CoingeckoClient,
}

impl PriceOracle {
    pub fn new(store: Store, client: CoingeckoClient) -> Self {
        Self { store, client }
    }

    pub async fn get_historic(&self, cgid: Cgid, date: NaiveDate) -> Result<Decimal> {
        if cgid == Cgid::Syn && date < syn_listing_date() {
            let nrv = self.lookup(Cgid::Nrv, date).await?;
            return Ok(nrv / Decimal::from_str("2.5").expect("ratio"));
        }
        self.lookup(cgid, date).await
    }

    pub async fn get_spot(&self, cgid: Cgid) -> Result<Decimal> {
        self.get_historic(cgid, Utc::now().date_naive()).await
    }

    pub async fn get_for_address(
        &self,
        chain: &str,
        address: &str,
        date: Option<NaiveDate>,
    ) -> Result<Decimal> {
        if let Some(pinned) = custom_price(chain, address) {
            return Ok(pinned);
        }
        let Some(cgid) = cgid_for_address(chain, address) else {
            return Ok(Decimal::ZERO);
        };
        match date {
            Some(date) => self.get_historic(cgid, date).await,
            None => self.get_spot(cgid).await,
        }
    }

    async fn lookup(&self, cgid: Cgid, date: NaiveDate) -> Result<Decimal> {
        let key = price_key(cgid, date);
        if let Some(raw) = self.store.get(&key).await? {
            return parse_price(&raw);
        }

        // Record the miss for the backfill job, then try to answer with the
        // closest earlier point instead of a hard zero.
        self.store.sadd(MISSING_SET, &key).await?;
        self.store.sadd(MISSING_SET, &format!("{key}:usd")).await?;

        for days_back in 1..=7 {
            let Some(prior) = date.checked_sub_days(chrono::Days::new(days_back)) else {
                break;
            };
            if let Some(raw) = self.store.get(&price_key(cgid, prior)).await? {
                return parse_price(&raw);
            }
        }
        Ok(Decimal::ZERO)
    }

    /// Issue a spot read for every known id; cold keys land in the missing
    /// set for the backfill job rather than blocking startup.
    pub async fn warm_up(&self) -> Result<()> {
        for cgid in Cgid::ALL {
            self.get_spot(*cgid).await?;
        }
        Ok(())
    }

    /// Drain `prices:missing`, fetching each entry from the provider and
    /// writing both the plain key and its `:usd` alias. Entries that still
    /// fail stay queued for the next tick.
    pub async fn refresh_missing(&self) -> Result<()> {
        let members = self.store.smembers(MISSING_SET).await?;
        let mut targets: Vec<(Cgid, NaiveDate)> = Vec::new();
        for member in &members {
            match parse_missing_key(member) {
                Some(target) => {
                    if !targets.contains(&target) {
                        targets.push(target);
                    }
                }
                None => {
                    warn!(key = %member, "dropping unparseable missing-price entry");
                    self.store.srem(MISSING_SET, member).await?;
                }
            }
        }

        info!(pending = targets.len(), "refreshing missing prices");
        for (cgid, date) in targets {
            match self.client.historic(cgid, date).await {
                Ok(price) => {
                    self.write_price(cgid, date, price).await?;
                    let key = price_key(cgid, date);
                    self.store.srem(MISSING_SET, &key).await?;
                    self.store.srem(MISSING_SET, &format!("{key}:usd")).await?;
                    debug!(cgid = cgid.id(), %date, %price, "backfilled price");
                }
                Err(e) => {
                    warn!(cgid = cgid.id(), %date, err = %e, "price backfill failed; keeping queued");
                }
            }
        }
        Ok(())
    }

    /// Write today's spot price for every known id, first writer wins.
    pub async fn update_daily(&self) -> Result<()> {
        let today = Utc::now().date_naive();
        for cgid in Cgid::ALL {
            let key = price_key(*cgid, today);
            if self.store.get(&key).await?.is_some() {
                continue;
            }
            match self.client.spot(*cgid).await {
                Ok(price) => self.write_price(*cgid, today, price).await?,
                Err(e) => {
                    warn!(cgid = cgid.id(), err = %e, "daily price fetch failed");
                }
            }
        }
        Ok(())
    }

    async fn write_price(&self, cgid: Cgid, date: NaiveDate, price: Decimal) -> Result<()> {
        let key = price_key(cgid, date);
        let rendered = price.to_string();
        self.store.setnx(&key, &rendered).await?;
        self.store.setnx(&format!("{key}:usd"), &rendered).await?;
        Ok(())
    }
}

fn parse_price(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .with_context(|| format!("parse cached price {raw}"))
}

/// `{cgid}:{YYYY-MM-DD}` with an optional `:usd` suffix. The id itself never
/// contains a colon.
fn parse_missing_key(key: &str) -> Option<(Cgid, NaiveDate)> {
    let base = key.strip_suffix(":usd").unwrap_or(key);
    let (id, date) = base.rsplit_once(':')?;
    Some((Cgid::parse(id)?, NaiveDate::from_str(date).ok()?))
}

/// Historic + spot price source over HTTP, throttled by a shared token
/// bucket so the backfill job cannot trip the provider's rate limit.
#[derive(Clone)]
pub struct CoingeckoClient {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

const FETCH_ATTEMPTS: u32 = 3;

impl CoingeckoClient {
    pub fn new(base_url: String, http: reqwest::Client, requests_per_sec: u32) -> Self {
        Self {
            http,
            base_url,
            limiter: RateLimiter::new(requests_per_sec),
        }
    }

    pub async fn historic(&self, cgid: Cgid, date: NaiveDate) -> Result<Decimal> {
        let url = format!(
            "{}/coins/{}/history?date={}",
            self.base_url,
            cgid.id(),
            date.format("%d-%m-%Y")
        );
        let body = self.fetch(&url).await?;
        let price = body
            .get("market_data")
            .and_then(|m| m.get("current_price"))
            .and_then(|p| p.get("usd"))
            .with_context(|| format!("{} {date}: no usd price in history", cgid.id()))?;
        json_number_to_decimal(price)
    }

    pub async fn spot(&self, cgid: Cgid) -> Result<Decimal> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url,
            cgid.id()
        );
        let body = self.fetch(&url).await?;
        let price = body
            .get(cgid.id())
            .and_then(|m| m.get("usd"))
            .with_context(|| format!("{}: no usd spot price", cgid.id()))?;
        json_number_to_decimal(price)
    }

    async fn fetch(&self, url: &str) -> Result<serde_json::Value> {
        let mut last_err = None;
        for attempt in 0..FETCH_ATTEMPTS {
            self.limiter.acquire().await;
            match self.fetch_once(url).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt + 1 < FETCH_ATTEMPTS && crate::rpc::looks_like_transient(&e) {
                        tokio::time::sleep(Duration::from_secs(1u64 << attempt)).await;
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("price fetch failed")))
    }

    async fn fetch_once(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self.http.get(url).send().await.with_context(|| format!("GET {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("GET {url} returned {status}");
        }
        resp.json().await.with_context(|| format!("decode json body from {url}"))
    }
}

fn json_number_to_decimal(v: &serde_json::Value) -> Result<Decimal> {
    match v {
        serde_json::Value::Number(n) => parse_price(&n.to_string()),
        serde_json::Value::String(s) => parse_price(s),
        other => bail!("price is not a number: {other}"),
    }
}

/// Plain token bucket: `rate` tokens per second, burst of the same size.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<BucketState>>,
    rate: f64,
}

struct BucketState {
    tokens: f64,
    refreshed: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_sec: u32) -> Self {
        let rate = f64::from(requests_per_sec.max(1));
        Self {
            state: Arc::new(Mutex::new(BucketState {
                tokens: rate,
                refreshed: Instant::now(),
            })),
            rate,
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.refreshed).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.rate);
                state.refreshed = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.rate))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("test literal")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).expect("test date")
    }

    fn oracle(store: &Store) -> PriceOracle {
        let client = CoingeckoClient::new(
            "http://127.0.0.1:0/api/v3".to_string(),
            reqwest::Client::new(),
            5,
        );
        PriceOracle::new(store.clone(), client)
    }

    #[tokio::test]
    async fn cold_cache_returns_zero_and_queues_both_keys() {
        let store = Store::memory();
        let oracle = oracle(&store);

        let price = oracle
            .get_historic(Cgid::Syn, date("2099-01-01"))
            .await
            .expect("lookup");
        assert_eq!(price, Decimal::ZERO);

        let mut missing = store.smembers(MISSING_SET).await.expect("smembers");
        missing.sort_unstable();
        assert_eq!(
            missing,
            vec!["synapse-2:2099-01-01", "synapse-2:2099-01-01:usd"]
        );
    }

    #[tokio::test]
    async fn cached_price_reads_back() {
        let store = Store::memory();
        store.set("synapse-2:2099-01-01", "1.23").await.expect("seed");
        let price = oracle(&store)
            .get_historic(Cgid::Syn, date("2099-01-01"))
            .await
            .expect("lookup");
        assert_eq!(price, dec("1.23"));
        assert!(store.smembers(MISSING_SET).await.expect("smembers").is_empty());
    }

    #[tokio::test]
    async fn walk_back_prefers_the_most_recent_prior_day() {
        let store = Store::memory();
        store.set("ethereum:2022-05-30", "1900").await.expect("seed");
        store.set("ethereum:2022-05-27", "1700").await.expect("seed");

        let price = oracle(&store)
            .get_historic(Cgid::Eth, date("2022-06-01"))
            .await
            .expect("lookup");
        assert_eq!(price, dec("1900"));

        // The requested day is still queued for backfill.
        let missing = store.smembers(MISSING_SET).await.expect("smembers");
        assert!(missing.contains(&"ethereum:2022-06-01".to_string()));
    }

    #[tokio::test]
    async fn walk_back_gives_up_beyond_seven_days() {
        let store = Store::memory();
        store.set("ethereum:2022-05-24", "1500").await.expect("seed");
        let price = oracle(&store)
            .get_historic(Cgid::Eth, date("2022-06-01"))
            .await
            .expect("lookup");
        assert_eq!(price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn syn_before_listing_uses_the_predecessor_ratio() {
        let store = Store::memory();
        store.set("nerve-finance:2021-06-01", "5").await.expect("seed");
        let price = oracle(&store)
            .get_historic(Cgid::Syn, date("2021-06-01"))
            .await
            .expect("lookup");
        assert_eq!(price, dec("2"));

        // On and after the listing date SYN prices stand on their own.
        store.set("synapse-2:2021-08-30", "3.5").await.expect("seed");
        let price = oracle(&store)
            .get_historic(Cgid::Syn, date("2021-08-30"))
            .await
            .expect("lookup");
        assert_eq!(price, dec("3.5"));
    }

    #[tokio::test]
    async fn address_resolution_prefers_pins_then_cgid_then_zero() {
        let store = Store::memory();
        let oracle = oracle(&store);

        // nUSD is pinned to its peg.
        let price = oracle
            .get_for_address("polygon", "0xb6c473756050de474286bed418b77aeac39b02af", Some(date("2022-06-01")))
            .await
            .expect("pinned");
        assert_eq!(price, dec("1"));

        // A mapped token reads through the cache.
        store.set("synapse-2:2022-06-01", "1.5").await.expect("seed");
        let price = oracle
            .get_for_address("polygon", "0xf8f9efc0db77d8881500bb06ff5d6abc3070e695", Some(date("2022-06-01")))
            .await
            .expect("mapped");
        assert_eq!(price, dec("1.5"));

        // Unknown addresses are worth nothing.
        let price = oracle
            .get_for_address("polygon", "0x000000000000000000000000000000000000dead", None)
            .await
            .expect("unknown");
        assert_eq!(price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn delisted_pins_price_at_their_constant() {
        let store = Store::memory();
        let oracle = oracle(&store);
        let price = oracle
            .get_for_address("fantom", "0x78de9326792ce1d6eca0c978753c6953cdeedd73", None)
            .await
            .expect("pinned");
        assert_eq!(price, dec("0.01"));
    }

    #[test]
    fn missing_keys_parse_with_and_without_the_usd_suffix() {
        assert_eq!(
            parse_missing_key("usd-coin:2022-06-01"),
            Some((Cgid::Usdc, date("2022-06-01")))
        );
        assert_eq!(
            parse_missing_key("usd-coin:2022-06-01:usd"),
            Some((Cgid::Usdc, date("2022-06-01")))
        );
        assert_eq!(parse_missing_key("not-a-coin:2022-06-01"), None);
        assert_eq!(parse_missing_key("usd-coin:yesterday"), None);
        assert_eq!(parse_missing_key("garbage"), None);
    }

    #[test]
    fn price_strings_parse_plain_and_scientific() {
        assert_eq!(parse_price("1.23").expect("plain"), dec("1.23"));
        assert_eq!(parse_price("1e-7").expect("sci"), dec("0.0000001"));
        assert!(parse_price("one dollar").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_spends_burst_then_throttles() {
        let limiter = RateLimiter::new(2);
        // Burst capacity is available immediately.
        limiter.acquire().await;
        limiter.acquire().await;

        // The third acquire needs a refill; paused time makes the sleep
        // deterministic.
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
