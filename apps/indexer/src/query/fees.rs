use std::collections::BTreeMap;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use anyhow::Context;
use bridge_bindings::{Bridge, SwapPool};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::tokens;
use crate::units::u256_to_decimal;

use super::{QueryApi, QueryError, QueryResult, UsdStat, not_deployed};

/// Dated fee series with totals, the envelope `bridge_fees` renders.
#[derive(Debug, Clone, Serialize)]
pub struct DatedFees {
    pub stats: FeeStats,
    pub data: BTreeMap<String, FeePoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeStats {
    pub fees: Decimal,
    pub usd: UsdStat,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeePoint {
    pub fees: Decimal,
    pub price_usd: Decimal,
    pub tx_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidatorPoint {
    pub gas_price: Decimal,
    pub transaction_fee: Decimal,
    pub price_usd: Decimal,
    pub tx_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AirdropPoint {
    pub airdrops: Decimal,
    pub price_usd: Decimal,
    pub tx_count: u64,
}

impl QueryApi {
    /// Bridge fees collected on IN transfers of one token, per day, priced
    /// at the day's rate.
    pub async fn bridge_fees(&self, chain: &str, token: &str) -> QueryResult<DatedFees> {
        let chain = self.chain(chain)?;
        let token = self.token(chain, token)?;

        let mut data = BTreeMap::new();
        let mut total = Decimal::ZERO;
        let mut adjusted = Decimal::ZERO;
        for row in self.in_rows(chain, Some(token)).await? {
            let price = self
                .oracle()
                .get_for_address(chain.name, &row.asset, Some(row.date))
                .await?;
            let point = FeePoint {
                fees: row.bucket.fees,
                price_usd: row.bucket.fees * price,
                tx_count: row.bucket.tx_count,
            };
            total += point.fees;
            adjusted += point.price_usd;
            data.insert(row.date.to_string(), point);
        }

        let spot = self.oracle().get_for_address(chain.name, token, None).await?;
        Ok(DatedFees {
            stats: FeeStats {
                fees: total,
                usd: UsdStat { adjusted, current: total * spot },
            },
            data,
        })
    }

    /// Gas the validator spent landing IN transactions, per day, priced in
    /// the chain's native token.
    pub async fn validator_gas_fees(
        &self,
        chain: &str,
    ) -> QueryResult<BTreeMap<String, ValidatorPoint>> {
        let chain = self.chain(chain)?;

        let mut out: BTreeMap<String, ValidatorPoint> = BTreeMap::new();
        for row in self.in_rows(chain, None).await? {
            let price = self.oracle().get_historic(chain.native_cgid, row.date).await?;
            let entry = out.entry(row.date.to_string()).or_insert(ValidatorPoint {
                gas_price: Decimal::ZERO,
                transaction_fee: Decimal::ZERO,
                price_usd: Decimal::ZERO,
                tx_count: 0,
            });
            entry.gas_price += row.bucket.validator.gas_price;
            entry.transaction_fee += row.bucket.validator.gas_paid;
            entry.price_usd += row.bucket.validator.gas_paid * price;
            entry.tx_count += row.bucket.tx_count;
        }
        Ok(out)
    }

    /// Native-token airdrops granted on IN transfers, per day.
    pub async fn airdrop_amounts(
        &self,
        chain: &str,
    ) -> QueryResult<BTreeMap<String, AirdropPoint>> {
        let chain = self.chain(chain)?;

        let mut out: BTreeMap<String, AirdropPoint> = BTreeMap::new();
        for row in self.in_rows(chain, None).await? {
            let price = self.oracle().get_historic(chain.native_cgid, row.date).await?;
            let entry = out.entry(row.date.to_string()).or_insert(AirdropPoint {
                airdrops: Decimal::ZERO,
                price_usd: Decimal::ZERO,
                tx_count: 0,
            });
            entry.airdrops += row.bucket.airdrops;
            entry.price_usd += row.bucket.airdrops * price;
            entry.tx_count += row.bucket.tx_count;
        }
        Ok(out)
    }

    /// Admin fees accrued inside each pool, read off chain state at `block`
    /// (or the tip), decimalized per token.
    pub async fn admin_fees(
        &self,
        chain: &str,
        block: Option<u64>,
    ) -> QueryResult<BTreeMap<String, Decimal>> {
        let chain = self.chain(chain)?;
        let client = self.client(chain)?;

        let mut out = BTreeMap::new();
        for pool in chain.pools {
            let pool_tokens = self.tokens_in_pool(chain.name, pool.kind, block).await?;
            for (index, token) in pool_tokens.iter().enumerate() {
                let call = SwapPool::getAdminBalanceCall { index: U256::from(index) };
                let ret = client
                    .call(pool.address, &call.abi_encode(), block)
                    .await
                    .map_err(QueryError::from)?;
                let raw = SwapPool::getAdminBalanceCall::abi_decode_returns(not_deployed(&ret)?)
                    .context("decode getAdminBalance")
                    .map_err(QueryError::from)?;

                let decimals = tokens::info(chain.name, token)
                    .map(|t| t.decimals)
                    .with_context(|| format!("no decimals for pool token {token}"))
                    .map_err(QueryError::from)?;
                out.insert(token.clone(), u256_to_decimal(raw, decimals).map_err(QueryError::from)?);
            }
        }
        Ok(out)
    }

    /// Fees the bridge holds but has not yet swept into the pools.
    pub async fn pending_admin_fees(
        &self,
        chain: &str,
        tokens_filter: &[String],
        block: Option<u64>,
    ) -> QueryResult<BTreeMap<String, Decimal>> {
        let chain = self.chain(chain)?;
        let client = self.client(chain)?;

        let targets: Vec<&'static str> = if tokens_filter.is_empty() {
            tokens::tokens_for(chain.name).map(|t| t.address).collect()
        } else {
            tokens_filter
                .iter()
                .map(|t| self.token(chain, t))
                .collect::<QueryResult<_>>()?
        };

        let mut out = BTreeMap::new();
        for token in targets {
            let token_addr: Address = token
                .parse()
                .with_context(|| format!("parse token address {token}"))
                .map_err(QueryError::from)?;
            let call = Bridge::getFeeBalanceCall { tokenAddress: token_addr };
            let ret = client
                .call(chain.bridge, &call.abi_encode(), block)
                .await
                .map_err(QueryError::from)?;
            let raw = Bridge::getFeeBalanceCall::abi_decode_returns(not_deployed(&ret)?)
                .context("decode getFeeBalance")
                .map_err(QueryError::from)?;

            let decimals = tokens::info(chain.name, token)
                .map(|t| t.decimals)
                .with_context(|| format!("no decimals for {token}"))
                .map_err(QueryError::from)?;
            out.insert(token.to_string(), u256_to_decimal(raw, decimals).map_err(QueryError::from)?);
        }
        Ok(out)
    }
}
