use std::collections::BTreeMap;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::decode::Direction;

use super::{QueryApi, QueryResult};

#[derive(Debug, Clone, Serialize)]
pub struct ChartPoint {
    /// Midnight UTC of the bucket day, unix seconds.
    pub date: i64,
    pub price: Decimal,
    pub volume: Decimal,
    pub tx_count: u64,
}

impl QueryApi {
    /// Per-token time series for charting: one point per bucket day, with
    /// the day's price alongside so the frontend can render both axes.
    pub async fn bridge_chart(
        &self,
        chain: &str,
        direction: &str,
    ) -> QueryResult<BTreeMap<String, Vec<ChartPoint>>> {
        let chain = self.chain(chain)?;
        let direction = self.direction(direction)?;

        // (asset, date) -> (volume, tx_count); OUT legs collapse across
        // destination chains.
        let mut series: BTreeMap<String, BTreeMap<chrono::NaiveDate, (Decimal, u64)>> =
            BTreeMap::new();
        match direction {
            Direction::In => {
                for row in self.in_rows(chain, None).await? {
                    let entry = series.entry(row.asset).or_default().entry(row.date).or_default();
                    entry.0 += row.bucket.amount;
                    entry.1 += row.bucket.tx_count;
                }
            }
            Direction::Out => {
                for row in self.out_rows(chain, None).await? {
                    let entry = series.entry(row.asset).or_default().entry(row.date).or_default();
                    entry.0 += row.bucket.amount;
                    entry.1 += row.bucket.tx_count;
                }
            }
        }

        let mut out = BTreeMap::new();
        for (asset, dates) in series {
            let mut points = Vec::with_capacity(dates.len());
            for (date, (volume, tx_count)) in dates {
                let price = self
                    .oracle()
                    .get_for_address(chain.name, &asset, Some(date))
                    .await?;
                points.push(ChartPoint {
                    date: date.and_time(NaiveTime::MIN).and_utc().timestamp(),
                    price,
                    volume,
                    tx_count,
                });
            }
            out.insert(asset, points);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::api_with_store;
    use crate::store::Store;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("test literal")
    }

    const NUSD: &str = "0xb6c473756050de474286bed418b77aeac39b02af";

    #[tokio::test]
    async fn out_chart_collapses_destinations_and_orders_days() {
        let store = Store::memory();
        for (key, value) in [
            (
                format!("polygon:bridge:2022-06-02:{NUSD}:OUT:56"),
                r#"{"amount":"70","tx_count":1}"#,
            ),
            (
                format!("polygon:bridge:2022-06-01:{NUSD}:OUT:56"),
                r#"{"amount":"200","tx_count":2}"#,
            ),
            (
                format!("polygon:bridge:2022-06-01:{NUSD}:OUT:1"),
                r#"{"amount":"40","tx_count":1}"#,
            ),
        ] {
            store.set(&key, value).await.expect("seed");
        }
        let api = api_with_store(&store);

        let chart = api.bridge_chart("polygon", "out").await.expect("chart");
        let points = chart.get(NUSD).expect("nusd series");
        assert_eq!(points.len(), 2);

        // 2022-06-01 midnight UTC, both destinations merged.
        assert_eq!(points[0].date, 1_654_041_600);
        assert_eq!(points[0].volume, dec("240"));
        assert_eq!(points[0].tx_count, 3);
        // nUSD price pin carries into the chart.
        assert_eq!(points[0].price, dec("1"));

        assert_eq!(points[1].date, 1_654_128_000);
        assert_eq!(points[1].volume, dec("70"));
    }
}
