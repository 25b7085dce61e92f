use alloy::sol_types::SolCall;
use anyhow::Context;
use bridge_bindings::SwapPool;
use rust_decimal::Decimal;

use crate::chains::PoolKind;
use crate::units::u256_to_decimal;

use super::{QueryApi, QueryError, QueryResult, addr_hex, not_deployed};

pub type PoolTokens = Vec<String>;

/// `eth_call` failures that mean "the contract said no", as opposed to the
/// RPC being broken. `getToken` past the last index reverts; that is the
/// normal end-of-pool signal.
fn looks_like_revert(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("revert") || msg.contains("invalid opcode") || msg.contains("out of gas")
}

impl QueryApi {
    /// Pool membership by index, discovered from chain state: `getToken(i)`
    /// until the contract reverts. Implicitly ordered by pool index.
    pub async fn tokens_in_pool(
        &self,
        chain: &str,
        kind: PoolKind,
        block: Option<u64>,
    ) -> QueryResult<PoolTokens> {
        let chain = self.chain(chain)?;
        let client = self.client(chain)?;
        let pool = chain.pool(kind).ok_or(QueryError::InvalidPool)?;

        let mut out = Vec::new();
        for index in 0u8..=u8::MAX {
            let call = SwapPool::getTokenCall { index };
            let ret = match client.call(pool.address, &call.abi_encode(), block).await {
                Ok(ret) => ret,
                Err(e) if looks_like_revert(&e) && index > 0 => break,
                Err(e) => return Err(QueryError::from(e)),
            };
            if ret.is_empty() {
                if index == 0 {
                    return Err(QueryError::ContractNotDeployed);
                }
                break;
            }
            let addr = SwapPool::getTokenCall::abi_decode_returns(&ret)
                .context("decode getToken")
                .map_err(QueryError::from)?;
            out.push(addr_hex(addr));
        }
        Ok(out)
    }

    /// The pool's LP-share price, an 18-decimals fixed point on chain.
    pub async fn virtual_price(
        &self,
        chain: &str,
        block: Option<u64>,
        kind: PoolKind,
    ) -> QueryResult<Decimal> {
        let chain = self.chain(chain)?;
        let client = self.client(chain)?;
        let pool = chain.pool(kind).ok_or(QueryError::InvalidPool)?;

        let call = SwapPool::getVirtualPriceCall {};
        let ret = client
            .call(pool.address, &call.abi_encode(), block)
            .await
            .map_err(QueryError::from)?;
        let raw = SwapPool::getVirtualPriceCall::abi_decode_returns(not_deployed(&ret)?)
            .context("decode getVirtualPrice")
            .map_err(QueryError::from)?;
        u256_to_decimal(raw, 18).map_err(QueryError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::api_with_store;
    use super::*;
    use crate::store::Store;

    #[test]
    fn revert_classification_spares_infra_errors() {
        assert!(looks_like_revert(&anyhow::anyhow!("rpc error: execution reverted")));
        assert!(!looks_like_revert(&anyhow::anyhow!("connection reset by peer")));
    }

    #[tokio::test]
    async fn missing_pool_kind_is_an_input_error() {
        let store = Store::memory();
        let api = api_with_store(&store);
        // moonriver carries no pools at all.
        assert!(matches!(
            api.virtual_price("moonriver", None, PoolKind::Nusd).await,
            Err(QueryError::InvalidPool)
        ));
        // optimism has nETH but not nUSD.
        assert!(matches!(
            api.tokens_in_pool("optimism", PoolKind::Nusd, None).await,
            Err(QueryError::InvalidPool)
        ));
    }
}
