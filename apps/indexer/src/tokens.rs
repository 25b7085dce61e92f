use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use bridge_bindings::BridgeConfig;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::chains::Chain;
use crate::rpc::ChainClient;

/// On-chain registry used to learn tokens the static table does not carry.
/// Deployed on ethereum only; lookups for other chains pass the chain id.
pub const BRIDGE_CONFIG_ADDRESS: &str = "0x5217c83ca75559b1f8a8803824e5b7ac233a12a1";

#[derive(Debug, Clone, Copy)]
pub struct TokenInfo {
    pub chain: &'static str,
    pub address: &'static str,
    pub symbol: &'static str,
    pub name: &'static str,
    pub decimals: u32,
}

const fn t(
    chain: &'static str,
    address: &'static str,
    symbol: &'static str,
    name: &'static str,
    decimals: u32,
) -> TokenInfo {
    TokenInfo { chain, address, symbol, name, decimals }
}

/// Flat (chain, address) table; one record per pair.
pub const TOKENS: &[TokenInfo] = &[
    // ethereum
    t("ethereum", "0x0f2d719407fdbeff09d87557abb7232601fd9f29", "SYN", "Synapse", 18),
    t("ethereum", "0x1b84765de8b7566e4ceaf4d0fd3c5af52d3dde4f", "nUSD", "Synapse nUSD", 18),
    t("ethereum", "0x6b175474e89094c44da98b954eedeac495271d0f", "DAI", "Dai Stablecoin", 18),
    t("ethereum", "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "USDC", "USD Coin", 6),
    t("ethereum", "0xdac17f958d2ee523a2206206994597c13d831ec7", "USDT", "Tether USD", 6),
    t("ethereum", "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "WETH", "Wrapped Ether", 18),
    t("ethereum", "0x71ab77b7dbb4fa7e017bc15090b2163221420282", "HIGH", "Highstreet token", 18),
    t("ethereum", "0xbaac2b4491727d78d2b78815144570b9f2fe8899", "DOG", "The Doge NFT", 18),
    t("ethereum", "0x853d955acef822db058eb8505911ed77f175b99e", "FRAX", "Frax", 18),
    t("ethereum", "0x0ab87046fbb341d058f17cbc4c1133f25a20a52f", "gOHM", "Governance OHM", 18),
    // bsc
    t("bsc", "0xa4080f1778e69467e905b8d6f72f6e441f9e9484", "SYN", "Synapse", 18),
    t("bsc", "0x23b891e5c62e0955ae2bd185990103928ab817b3", "nUSD", "Synapse nUSD", 18),
    t("bsc", "0xe9e7cea3dedca5984780bafc599bd69add087d56", "BUSD", "BUSD Token", 18),
    t("bsc", "0x8ac76a51cc950d9822d68b83fe1ad97b32cd580d", "USDC", "USD Coin", 18),
    t("bsc", "0x55d398326f99059ff775485246999027b3197955", "USDT", "Tether USD", 18),
    t("bsc", "0xf0b8b631145d393a767b4387d08aa09969b2dfed", "USD-LP", "USD LP Token", 18),
    t("bsc", "0x5f4bde007dc06b867f86ebfe4802e34a1ffeed63", "HIGH", "Highstreet token", 18),
    t("bsc", "0xaa88c603d142c371ea0eac8756123c5805edee03", "DOG", "The Doge NFT", 18),
    // polygon
    t("polygon", "0xf8f9efc0db77d8881500bb06ff5d6abc3070e695", "SYN", "Synapse", 18),
    t("polygon", "0xb6c473756050de474286bed418b77aeac39b02af", "nUSD", "Synapse nUSD", 18),
    t("polygon", "0x8f3cf7ad23cd3cadbd9735aff958023239c6a063", "DAI", "Dai Stablecoin", 18),
    t("polygon", "0x2791bca1f2de4661ed88a30c99a7a9449aa84174", "USDC", "USD Coin", 6),
    t("polygon", "0xc2132d05d31c914a87c6611c10748aeb04b58e8f", "USDT", "Tether USD", 6),
    // avalanche
    t("avalanche", "0x1f1e7c893855525b303f99bdf5c3c05be09ca251", "SYN", "Synapse", 18),
    t("avalanche", "0xcfc37a6ab183dd4aed08c204d1c2773c0b1bdf46", "nUSD", "Synapse nUSD", 18),
    t("avalanche", "0xd586e7f844cea2f87f50152665bcbc2c279d8d70", "DAI.e", "Dai Stablecoin", 18),
    t("avalanche", "0xa7d7079b0fead91f3e65f86e8915cb59c1a4c664", "USDC.e", "USD Coin", 6),
    t("avalanche", "0xc7198437980c041c805a1edcba50c1ce5db95118", "USDT.e", "Tether USD", 6),
    t("avalanche", "0x19e1ae0ee35c0404f835521146206595d37981ae", "nETH", "Synapse nETH", 18),
    t("avalanche", "0x53f7c5869a859f0aec3d334ee8b4cf01e3492f21", "avWETH", "Aave WETH", 18),
    // arbitrum
    t("arbitrum", "0x080f6aed32fc474dd5717105dba5ea57268f46eb", "SYN", "Synapse", 18),
    t("arbitrum", "0x2913e812cf0dcca30fb28e6cac3d2dcff4497688", "nUSD", "Synapse nUSD", 18),
    t("arbitrum", "0xff970a61a04b1ca14834a43f5de4533ebddb5cc8", "USDC", "USD Coin", 6),
    t("arbitrum", "0xfd086bc7cd5c481dcc9c85ebe478a1c0b69fcbb9", "USDT", "Tether USD", 6),
    t("arbitrum", "0x3ea9b0ab55f34fb188824ee288ceaefc63cf908e", "nETH", "Synapse nETH", 18),
    t("arbitrum", "0x82af49447d8a07e3bd95bd0d56f35241523fbab1", "WETH", "Wrapped Ether", 18),
    // fantom
    t("fantom", "0xe55e19fb4f2d85af758950957714292dac1e25b2", "SYN", "Synapse", 18),
    t("fantom", "0xed2a7edd7413021d440b09d654f3b87712abab66", "nUSD", "Synapse nUSD", 18),
    t("fantom", "0x82f0b8b456c1a451378467398982d4834b6829c1", "MIM", "Magic Internet Money", 18),
    t("fantom", "0x04068da6c83afcfa0e13ba15a6696662335d5b75", "USDC", "USD Coin", 6),
    t("fantom", "0x049d68029688eabf473097a2fc38ef61633a3c7a", "fUSDT", "Frapped USDT", 6),
    t("fantom", "0x78de9326792ce1d6eca0c978753c6953cdeedd73", "JUMP", "HyperJump", 18),
    // harmony
    t("harmony", "0xe55e19fb4f2d85af758950957714292dac1e25b2", "SYN", "Synapse", 18),
    t("harmony", "0xed2a7edd7413021d440b09d654f3b87712abab66", "nUSD", "Synapse nUSD", 18),
    t("harmony", "0xef977d2f931c1978db5f6747666fa1eacb0d0339", "1DAI", "Dai Stablecoin", 18),
    t("harmony", "0x985458e523db3d53125813ed68c274899e9dfab4", "1USDC", "USD Coin", 6),
    t("harmony", "0x3c2b8be99c50593081eaa2a724f0b8285f5aba8f", "1USDT", "Tether USD", 6),
    // boba
    t("boba", "0xb554a55358ff0382fb21f0a478c3546d1106be8c", "SYN", "Synapse", 18),
    t("boba", "0x6b4712ae9797c199edd44f897ca09bc57628a1cf", "nUSD", "Synapse nUSD", 18),
    t("boba", "0x66a2a913e447d6b4bf33efbec43aaef87890fbbc", "USDC", "USD Coin", 6),
    t("boba", "0x96419929d7949d6a801a6909c145c8eef6a40431", "nETH", "Synapse nETH", 18),
    t("boba", "0xd203de32170130082896b4111edf825a4774c18e", "WETH", "Wrapped Ether", 18),
    // optimism
    t("optimism", "0x5a5fff6f753d7c11a56a52fe47a177a87e431655", "SYN", "Synapse", 18),
    t("optimism", "0x809dc529f07651bd43a172e8db6f4a7a0d771036", "nETH", "Synapse nETH", 18),
    t("optimism", "0x121ab82b49b2bc4c7901ca46b8277962b4350204", "WETH", "Wrapped Ether", 18),
    // moonriver
    t("moonriver", "0xd80d8688b02b3fd3afb81cdb124f188bb5ad0445", "SYN", "Synapse", 18),
    t("moonriver", "0x1a93b23281cc1cde4c4741353f3064709a16197d", "FRAX", "Frax", 18),
    // aurora
    t("aurora", "0xd80d8688b02b3fd3afb81cdb124f188bb5ad0445", "SYN", "Synapse", 18),
    t("aurora", "0x07379565cd8b0cae7c60dc78e7f601b34af2a21c", "nUSD", "Synapse nUSD", 18),
    t("aurora", "0xb12bfca5a55806aaf64e99521918a4bf0fc40802", "USDC", "USD Coin", 6),
    t("aurora", "0x4988a896b1227218e4a686fde5eabdcabd91571f", "USDT", "Tether USD", 6),
    // moonbeam
    t("moonbeam", "0xfb379932ebccb7505458dcdd01d8bbce191fa7b3", "SYN", "Synapse", 18),
    t("moonbeam", "0x322e86852e492a7ee17f28a78c663da38fb33bfb", "FRAX", "Frax", 18),
];

pub fn info(chain: &str, address: &str) -> Option<&'static TokenInfo> {
    TOKENS
        .iter()
        .find(|tok| tok.chain == chain && tok.address == address)
}

pub fn tokens_for(chain: &str) -> impl Iterator<Item = &'static TokenInfo> {
    TOKENS.iter().filter(move |tok| tok.chain == chain)
}

/// Resolve a user-supplied token (symbol or address) to its address.
pub fn resolve(chain: &str, token: &str) -> Option<&'static str> {
    let lowered = token.to_lowercase();
    tokens_for(chain)
        .find(|tok| tok.symbol.to_lowercase() == lowered || tok.address == lowered)
        .map(|tok| tok.address)
}

pub fn symbols_for(chain: &str) -> Vec<&'static str> {
    tokens_for(chain).map(|tok| tok.symbol).collect()
}

/// Decimals resolution with lazy learning.
///
/// Static table first, then anything previously learned, then a
/// `getTokenByAddress` lookup against the bridge-config contract. A lookup
/// that comes back empty means the bridge does not know the token either:
/// `decimals` returns `Ok(None)` and the caller decides whether that is an
/// ignorable OUT or a reportable IN.
#[derive(Clone)]
pub struct TokenRegistry {
    config_client: ChainClient,
    learned: Arc<RwLock<HashMap<(String, String), u32>>>,
}

impl TokenRegistry {
    pub fn new(config_client: ChainClient) -> Self {
        Self {
            config_client,
            learned: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn decimals(&self, chain: &Chain, address: &str) -> Result<Option<u32>> {
        if let Some(tok) = info(chain.name, address) {
            return Ok(Some(tok.decimals));
        }

        let key = (chain.name.to_string(), address.to_string());
        if let Some(dec) = self.learned.read().await.get(&key) {
            return Ok(Some(*dec));
        }

        let token_addr: Address = address.parse().context("parse token address")?;
        let call = BridgeConfig::getTokenByAddressCall {
            tokenAddress: token_addr,
            chainID: U256::from(chain.id),
        };
        let raw = self
            .config_client
            .call(BRIDGE_CONFIG_ADDRESS, &call.abi_encode(), None)
            .await
            .context("bridge-config getTokenByAddress")?;
        let token = BridgeConfig::getTokenByAddressCall::abi_decode_returns(&raw)
            .context("decode bridge-config token")?;

        if token.tokenAddress == Address::ZERO {
            debug!(chain = chain.name, token = address, "bridge-config does not know token");
            return Ok(None);
        }

        let decimals = u32::from(token.tokenDecimals);
        self.learned.write().await.insert(key, decimals);
        warn!(chain = chain.name, token = address, decimals, "learned token from bridge-config");
        Ok(Some(decimals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_record_per_chain_address_pair() {
        let mut pairs: Vec<_> = TOKENS.iter().map(|tok| (tok.chain, tok.address)).collect();
        pairs.sort_unstable();
        let before = pairs.len();
        pairs.dedup();
        assert_eq!(pairs.len(), before);
    }

    #[test]
    fn resolve_accepts_symbol_and_address_case_insensitively() {
        let nusd = "0xb6c473756050de474286bed418b77aeac39b02af";
        assert_eq!(resolve("polygon", "nusd"), Some(nusd));
        assert_eq!(resolve("polygon", "nUSD"), Some(nusd));
        assert_eq!(resolve("polygon", nusd), Some(nusd));
        assert_eq!(resolve("polygon", "wagmi"), None);
    }

    #[test]
    fn known_decimals_match_the_deployed_tokens() {
        let tok = info("polygon", "0xb6c473756050de474286bed418b77aeac39b02af").expect("nusd");
        assert_eq!(tok.decimals, 18);
        let usdc = info("ethereum", "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48").expect("usdc");
        assert_eq!(usdc.decimals, 6);
    }
}
