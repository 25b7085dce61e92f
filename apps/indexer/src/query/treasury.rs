use std::collections::BTreeMap;

use alloy::primitives::Address;
use alloy::sol_types::SolCall;
use anyhow::Context;
use bridge_bindings::Erc20;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use crate::tokens;
use crate::units::{u256_to_decimal, wei_to_native};

use super::{QueryApi, QueryError, QueryResult};

#[derive(Debug, Clone, Serialize)]
pub struct BalanceEntry {
    pub symbol: String,
    pub balance: Decimal,
    pub usd: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreasuryBalances {
    pub native: BalanceEntry,
    pub tokens: BTreeMap<String, BalanceEntry>,
}

impl QueryApi {
    /// Treasury holdings at `block` (or the tip): every known token's
    /// balance plus the native balance, each valued at the current price.
    pub async fn treasury_balances(
        &self,
        chain: &str,
        block: Option<u64>,
    ) -> QueryResult<TreasuryBalances> {
        let chain = self.chain(chain)?;
        let client = self.client(chain)?;
        let treasury: Address = chain
            .treasury
            .parse()
            .context("parse treasury address")
            .map_err(QueryError::from)?;

        let mut out = BTreeMap::new();
        for token in tokens::tokens_for(chain.name) {
            let call = Erc20::balanceOfCall { owner: treasury };
            let ret = match client.call(token.address, &call.abi_encode(), block).await {
                Ok(ret) => ret,
                Err(e) => {
                    warn!(chain = chain.name, token = token.address, err = %e, "balanceOf failed; skipping");
                    continue;
                }
            };
            if ret.is_empty() {
                // Token contract not deployed at this block.
                continue;
            }
            let raw = Erc20::balanceOfCall::abi_decode_returns(&ret)
                .context("decode balanceOf")
                .map_err(QueryError::from)?;
            let balance = u256_to_decimal(raw, token.decimals).map_err(QueryError::from)?;
            let price = self
                .oracle()
                .get_for_address(chain.name, token.address, None)
                .await?;
            out.insert(
                token.address.to_string(),
                BalanceEntry {
                    symbol: token.symbol.to_string(),
                    balance,
                    usd: balance * price,
                },
            );
        }

        let native_raw = client
            .get_balance(chain.treasury, block)
            .await
            .map_err(QueryError::from)?;
        let native_balance = wei_to_native(native_raw).map_err(QueryError::from)?;
        let native_price = self.oracle().get_spot(chain.native_cgid).await?;

        Ok(TreasuryBalances {
            native: BalanceEntry {
                symbol: chain.native_cgid.id().to_string(),
                balance: native_balance,
                usd: native_balance * native_price,
            },
            tokens: out,
        })
    }
}
