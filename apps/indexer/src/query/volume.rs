use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::chains::{self, CHAINS};
use crate::decode::Direction;
use crate::tokens;

use super::{QueryApi, QueryResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsdStat {
    pub adjusted: Decimal,
    pub current: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenTotal {
    pub token: String,
    pub volume: Decimal,
    pub usd: UsdStat,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumePoint {
    pub volume: Decimal,
    pub tx_count: u64,
    pub price_usd: Decimal,
}

/// Per-token series: dated points for IN, dated points split by destination
/// chain for OUT.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TokenSeries {
    In(BTreeMap<String, VolumePoint>),
    Out(BTreeMap<String, BTreeMap<String, VolumePoint>>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainVolume {
    pub stats: VolumeStats,
    pub data: BTreeMap<String, TokenSeries>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeStats {
    pub volume: BTreeMap<String, TokenTotal>,
    pub usd: UsdStat,
}

/// Daily roll-up across every chain: `data[date][chain]` plus a per-date and
/// per-chain total, in USD (or transaction counts).
#[derive(Debug, Clone, Serialize)]
pub struct TotalsView<T> {
    pub data: BTreeMap<String, BTreeMap<String, T>>,
    pub totals: BTreeMap<String, T>,
}

impl QueryApi {
    /// Bridge volume for one chain and direction, per token: dated buckets
    /// with USD at the day's price, and totals at both the day-adjusted and
    /// the current price.
    pub async fn chain_volume(&self, chain: &str, direction: &str) -> QueryResult<ChainVolume> {
        let chain = self.chain(chain)?;
        let direction = self.direction(direction)?;
        self.chain_volume_inner(chain.name, direction, None).await
    }

    /// Single-token slice of `chain_volume`; `token` may be a symbol or an
    /// address.
    pub async fn chain_volume_for_address(
        &self,
        token: &str,
        chain: &str,
        direction: &str,
    ) -> QueryResult<ChainVolume> {
        let chain = self.chain(chain)?;
        let direction = self.direction(direction)?;
        let token = self.token(chain, token)?;
        self.chain_volume_inner(chain.name, direction, Some(token)).await
    }

    async fn chain_volume_inner(
        &self,
        chain_name: &str,
        direction: Direction,
        token: Option<&str>,
    ) -> QueryResult<ChainVolume> {
        let chain = self.chain(chain_name)?;

        // (token, date) -> (volume, tx_count, destination?)
        let mut data: BTreeMap<String, TokenSeries> = BTreeMap::new();
        let mut per_token: BTreeMap<String, (Decimal, Decimal)> = BTreeMap::new();

        match direction {
            Direction::In => {
                for row in self.in_rows(chain, token).await? {
                    let price = self
                        .oracle()
                        .get_for_address(chain.name, &row.asset, Some(row.date))
                        .await?;
                    let point = VolumePoint {
                        volume: row.bucket.amount,
                        tx_count: row.bucket.tx_count,
                        price_usd: row.bucket.amount * price,
                    };
                    let totals = per_token.entry(row.asset.clone()).or_default();
                    totals.0 += point.volume;
                    totals.1 += point.price_usd;

                    match data
                        .entry(row.asset)
                        .or_insert_with(|| TokenSeries::In(BTreeMap::new()))
                    {
                        TokenSeries::In(dates) => {
                            dates.insert(row.date.to_string(), point);
                        }
                        TokenSeries::Out(_) => unreachable!("IN rows build IN series"),
                    }
                }
            }
            Direction::Out => {
                for row in self.out_rows(chain, token).await? {
                    let price = self
                        .oracle()
                        .get_for_address(chain.name, &row.asset, Some(row.date))
                        .await?;
                    let point = VolumePoint {
                        volume: row.bucket.amount,
                        tx_count: row.bucket.tx_count,
                        price_usd: row.bucket.amount * price,
                    };
                    let totals = per_token.entry(row.asset.clone()).or_default();
                    totals.0 += point.volume;
                    totals.1 += point.price_usd;

                    let to_chain = chains::by_id(row.to_chain_id)
                        .map(|c| c.name.to_string())
                        .unwrap_or_else(|| row.to_chain_id.to_string());
                    match data
                        .entry(row.asset)
                        .or_insert_with(|| TokenSeries::Out(BTreeMap::new()))
                    {
                        TokenSeries::Out(dates) => {
                            dates
                                .entry(row.date.to_string())
                                .or_default()
                                .insert(to_chain, point);
                        }
                        TokenSeries::In(_) => unreachable!("OUT rows build OUT series"),
                    }
                }
            }
        }

        let mut stats = VolumeStats { volume: BTreeMap::new(), usd: UsdStat::default() };
        for (asset, (volume, adjusted)) in per_token {
            let spot = self.oracle().get_for_address(chain.name, &asset, None).await?;
            let usd = UsdStat { adjusted, current: volume * spot };
            stats.usd.adjusted += usd.adjusted;
            stats.usd.current += usd.current;

            let label = tokens::info(chain.name, &asset)
                .map(|t| t.symbol.to_string())
                .unwrap_or_else(|| asset.clone());
            stats.volume.insert(label, TokenTotal { token: asset, volume, usd });
        }

        Ok(ChainVolume { stats, data })
    }

    /// Daily USD roll-up across all chains.
    pub async fn chain_volume_total(&self, direction: &str) -> QueryResult<TotalsView<Decimal>> {
        let direction = self.direction(direction)?;
        let mut view = TotalsView { data: BTreeMap::new(), totals: BTreeMap::new() };

        for chain in CHAINS {
            let mut by_date: BTreeMap<String, Decimal> = BTreeMap::new();
            match direction {
                Direction::In => {
                    for row in self.in_rows(chain, None).await? {
                        let price = self
                            .oracle()
                            .get_for_address(chain.name, &row.asset, Some(row.date))
                            .await?;
                        *by_date.entry(row.date.to_string()).or_default() +=
                            row.bucket.amount * price;
                    }
                }
                Direction::Out => {
                    for row in self.out_rows(chain, None).await? {
                        let price = self
                            .oracle()
                            .get_for_address(chain.name, &row.asset, Some(row.date))
                            .await?;
                        *by_date.entry(row.date.to_string()).or_default() +=
                            row.bucket.amount * price;
                    }
                }
            }

            for (date, usd) in by_date {
                let day = view.data.entry(date).or_default();
                *day.entry(chain.name.to_string()).or_default() += usd;
                *day.entry("total".to_string()).or_default() += usd;
                *view.totals.entry(chain.name.to_string()).or_default() += usd;
                *view.totals.entry("total".to_string()).or_default() += usd;
            }
        }

        Ok(view)
    }

    /// Same roll-up shape, counting transactions instead of USD.
    pub async fn chain_tx_count_total(&self, direction: &str) -> QueryResult<TotalsView<u64>> {
        let direction = self.direction(direction)?;
        let mut view = TotalsView { data: BTreeMap::new(), totals: BTreeMap::new() };

        for chain in CHAINS {
            let mut by_date: BTreeMap<String, u64> = BTreeMap::new();
            match direction {
                Direction::In => {
                    for row in self.in_rows(chain, None).await? {
                        *by_date.entry(row.date.to_string()).or_default() += row.bucket.tx_count;
                    }
                }
                Direction::Out => {
                    for row in self.out_rows(chain, None).await? {
                        *by_date.entry(row.date.to_string()).or_default() += row.bucket.tx_count;
                    }
                }
            }

            for (date, count) in by_date {
                let day = view.data.entry(date).or_default();
                *day.entry(chain.name.to_string()).or_default() += count;
                *day.entry("total".to_string()).or_default() += count;
                *view.totals.entry(chain.name.to_string()).or_default() += count;
                *view.totals.entry("total".to_string()).or_default() += count;
            }
        }

        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::super::QueryError;
    use super::super::tests::api_with_store;
    use super::*;
    use crate::store::Store;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("test literal")
    }

    const NUSD: &str = "0xb6c473756050de474286bed418b77aeac39b02af";
    const SYN: &str = "0xf8f9efc0db77d8881500bb06ff5d6abc3070e695";

    async fn seed_polygon(store: &Store) {
        // Two nUSD days and one SYN day of IN traffic, one OUT bucket.
        store
            .set(
                &format!("polygon:bridge:2022-06-01:{NUSD}:IN"),
                r#"{"amount":"1000","tx_count":4,"fees":"1.5","airdrops":"0.08","validator":{"gas_paid":"0.02","gas_price":"120"}}"#,
            )
            .await
            .expect("seed");
        store
            .set(
                &format!("polygon:bridge:2022-06-02:{NUSD}:IN"),
                r#"{"amount":"500","tx_count":1,"fees":"0.5","airdrops":"0.02","validator":{"gas_paid":"0.004","gas_price":"50"}}"#,
            )
            .await
            .expect("seed");
        store
            .set(
                &format!("polygon:bridge:2022-06-01:{SYN}:IN"),
                r#"{"amount":"10","tx_count":1,"fees":"0.1","airdrops":"0.02","validator":{"gas_paid":"0.001","gas_price":"30"}}"#,
            )
            .await
            .expect("seed");
        store
            .set(
                &format!("polygon:bridge:2022-06-01:{NUSD}:OUT:56"),
                r#"{"amount":"200","tx_count":2}"#,
            )
            .await
            .expect("seed");
        store
            .set(
                &format!("polygon:bridge:2022-06-01:{NUSD}:OUT:1"),
                r#"{"amount":"40","tx_count":1}"#,
            )
            .await
            .expect("seed");

        // SYN priced at 1.5 on the day; the spot price stays a cold miss.
        store.set("synapse-2:2022-06-01", "1.5").await.expect("seed");
    }

    #[tokio::test]
    async fn in_volume_builds_dated_series_and_totals() {
        let store = Store::memory();
        seed_polygon(&store).await;
        let api = api_with_store(&store);

        let view = api.chain_volume("polygon", "in").await.expect("view");

        // nUSD is pinned at 1.0: adjusted == volume.
        let nusd = view.stats.volume.get("nUSD").expect("nusd totals");
        assert_eq!(nusd.volume, dec("1500"));
        assert_eq!(nusd.usd.adjusted, dec("1500"));
        assert_eq!(nusd.usd.current, dec("1500"));
        assert_eq!(nusd.token, NUSD);

        let syn = view.stats.volume.get("SYN").expect("syn totals");
        assert_eq!(syn.volume, dec("10"));
        assert_eq!(syn.usd.adjusted, dec("15"));

        assert_eq!(view.stats.usd.adjusted, dec("1515"));

        let TokenSeries::In(dates) = view.data.get(NUSD).expect("nusd series") else {
            panic!("IN view must build IN series");
        };
        let day = dates.get("2022-06-01").expect("first day");
        assert_eq!(day.volume, dec("1000"));
        assert_eq!(day.tx_count, 4);
        assert_eq!(day.price_usd, dec("1000"));
    }

    #[tokio::test]
    async fn out_volume_splits_by_destination_chain() {
        let store = Store::memory();
        seed_polygon(&store).await;
        let api = api_with_store(&store);

        let view = api.chain_volume("polygon", "OUT").await.expect("view");
        let TokenSeries::Out(dates) = view.data.get(NUSD).expect("nusd series") else {
            panic!("OUT view must build OUT series");
        };
        let day = dates.get("2022-06-01").expect("day");
        assert_eq!(day.get("bsc").expect("bsc leg").volume, dec("200"));
        assert_eq!(day.get("ethereum").expect("eth leg").volume, dec("40"));

        let nusd = view.stats.volume.get("nUSD").expect("totals");
        assert_eq!(nusd.volume, dec("240"));
    }

    #[tokio::test]
    async fn token_filter_narrows_to_one_asset() {
        let store = Store::memory();
        seed_polygon(&store).await;
        let api = api_with_store(&store);

        let view = api
            .chain_volume_for_address("syn", "polygon", "in")
            .await
            .expect("view");
        assert_eq!(view.data.len(), 1);
        assert!(view.data.contains_key(SYN));
        assert_eq!(view.stats.usd.adjusted, dec("15"));

        assert!(matches!(
            api.chain_volume_for_address("wagmi", "polygon", "in").await,
            Err(QueryError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn totals_roll_up_per_date_and_per_chain() {
        let store = Store::memory();
        seed_polygon(&store).await;
        // A second chain contributes on day two.
        store
            .set(
                "bsc:bridge:2022-06-02:0x23b891e5c62e0955ae2bd185990103928ab817b3:IN",
                r#"{"amount":"100","tx_count":3,"fees":"0","airdrops":"0","validator":{"gas_paid":"0","gas_price":"0"}}"#,
            )
            .await
            .expect("seed");
        let api = api_with_store(&store);

        let view = api.chain_volume_total("in").await.expect("view");
        let day_one = view.data.get("2022-06-01").expect("day one");
        assert_eq!(day_one.get("polygon").expect("polygon"), &dec("1015"));
        assert_eq!(day_one.get("total").expect("total"), &dec("1015"));

        let day_two = view.data.get("2022-06-02").expect("day two");
        assert_eq!(day_two.get("polygon").expect("polygon"), &dec("500"));
        assert_eq!(day_two.get("bsc").expect("bsc"), &dec("100"));
        assert_eq!(day_two.get("total").expect("total"), &dec("600"));

        assert_eq!(view.totals.get("polygon").expect("polygon"), &dec("1515"));
        assert_eq!(view.totals.get("total").expect("total"), &dec("1615"));
    }

    #[tokio::test]
    async fn tx_count_totals_count_instead_of_pricing() {
        let store = Store::memory();
        seed_polygon(&store).await;
        let api = api_with_store(&store);

        let view = api.chain_tx_count_total("in").await.expect("view");
        assert_eq!(view.data.get("2022-06-01").expect("day").get("polygon"), Some(&5));
        assert_eq!(view.totals.get("polygon"), Some(&6));
        assert_eq!(view.totals.get("total"), Some(&6));

        assert!(matches!(
            api.chain_tx_count_total("sideways").await,
            Err(QueryError::InvalidDirection)
        ));
    }
}
