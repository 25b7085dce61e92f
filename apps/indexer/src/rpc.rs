use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use alloy::primitives::U256;
use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::chains::Chain;
use crate::units::{wei_to_gwei, wei_to_native};

const RETRY_ATTEMPTS: u32 = 5;
const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(5);

/// The only component that talks to an EVM RPC. One instance per chain,
/// all instances sharing one `reqwest` connection pool.
#[derive(Clone)]
pub struct ChainClient {
    chain: &'static Chain,
    url: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: String,
    pub tx_index: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasStats {
    /// Total native token spent on gas.
    pub gas_paid: Decimal,
    /// Effective price in gwei.
    pub gas_price: Decimal,
}

impl ChainClient {
    pub fn new(chain: &'static Chain, url: String, http: reqwest::Client) -> Self {
        Self {
            chain,
            url,
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn chain(&self) -> &'static Chain {
        self.chain
    }

    async fn request_once(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} POST {}", self.url))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .with_context(|| format!("{method} read body"))?;
        if !status.is_success() {
            bail!("{method} http status={} body={text}", status.as_u16());
        }
        let v: Value =
            serde_json::from_str(&text).with_context(|| format!("{method} decode json body"))?;
        if let Some(err) = v.get("error") {
            bail!("{method} rpc error: {err}");
        }
        v.get("result")
            .cloned()
            .with_context(|| format!("{method} missing result field"))
    }

    /// Every public call goes through here: transient failures are retried
    /// with exponential backoff, anything else (and an exhausted budget)
    /// surfaces to the caller. Failure is never turned into an empty result.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(method, params.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if looks_like_transient(&e) && attempt + 1 < RETRY_ATTEMPTS => {
                    let delay = retry_delay(attempt);
                    warn!(
                        chain = self.chain.name,
                        method,
                        attempt,
                        err = %e,
                        "transient rpc error; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn block_number(&self) -> Result<u64> {
        let v = self.request("eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity_u64(&v).context("parse eth_blockNumber")
    }

    pub async fn get_block(&self, block: u64) -> Result<Value> {
        let v = self
            .request(
                "eth_getBlockByNumber",
                serde_json::json!([format_quantity(block), false]),
            )
            .await?;
        if v.is_null() {
            bail!("block {block} not found");
        }
        Ok(v)
    }

    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: &str,
        topics: &[&str],
    ) -> Result<Vec<Log>> {
        let filter = serde_json::json!({
            "address": address,
            "fromBlock": format_quantity(from_block),
            "toBlock": format_quantity(to_block),
            "topics": [topics],
        });
        let v = self.request("eth_getLogs", serde_json::json!([filter])).await?;
        let raw = v.as_array().context("eth_getLogs result is not an array")?;

        let mut logs = Vec::with_capacity(raw.len());
        for entry in raw {
            if entry.get("blockNumber").is_none_or(Value::is_null) {
                // Pending log; the next pass picks it up once mined.
                continue;
            }
            logs.push(parse_log(entry)?);
        }
        sort_logs(&mut logs);
        Ok(logs)
    }

    pub async fn get_transaction(&self, hash: &str) -> Result<Value> {
        let v = self
            .request("eth_getTransactionByHash", serde_json::json!([hash]))
            .await?;
        if v.is_null() {
            bail!("transaction {hash} not found");
        }
        Ok(v)
    }

    pub async fn get_transaction_receipt(&self, hash: &str) -> Result<Value> {
        let v = self
            .request("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await?;
        if v.is_null() {
            bail!("receipt for {hash} not found");
        }
        Ok(v)
    }

    /// `eth_call` against `to` with pre-encoded calldata. Returns the raw
    /// return bytes; an empty return means the contract did not exist at the
    /// requested block (the caller maps that, it is not cached).
    pub async fn call(&self, to: &str, data: &[u8], block: Option<u64>) -> Result<Vec<u8>> {
        let block_id = match block {
            Some(b) => format_quantity(b),
            None => "latest".to_string(),
        };
        let call = serde_json::json!({
            "to": to,
            "data": format!("0x{}", hex::encode(data)),
        });
        let v = self.request("eth_call", serde_json::json!([call, block_id])).await?;
        let s = v.as_str().context("eth_call result is not a string")?;
        hex::decode(s.trim_start_matches("0x")).context("decode eth_call return bytes")
    }

    pub async fn get_balance(&self, address: &str, block: Option<u64>) -> Result<U256> {
        let block_id = match block {
            Some(b) => format_quantity(b),
            None => "latest".to_string(),
        };
        let v = self
            .request("eth_getBalance", serde_json::json!([address, block_id]))
            .await?;
        parse_quantity_u256(&v).context("parse eth_getBalance")
    }
}

/// Window ordering the aggregation path relies on: strictly ascending
/// `(block, tx_index)`, with the log index as a stable tiebreak.
pub fn sort_logs(logs: &mut [Log]) {
    logs.sort_by_key(|l| (l.block_number, l.tx_index, l.log_index));
}

fn parse_log(entry: &Value) -> Result<Log> {
    let address = entry
        .get("address")
        .and_then(Value::as_str)
        .context("log missing address")?
        .to_lowercase();
    let topics = entry
        .get("topics")
        .and_then(Value::as_array)
        .context("log missing topics")?
        .iter()
        .map(|t| {
            t.as_str()
                .map(str::to_lowercase)
                .context("log topic is not a string")
        })
        .collect::<Result<Vec<_>>>()?;
    let data_hex = entry
        .get("data")
        .and_then(Value::as_str)
        .context("log missing data")?;
    let data = hex::decode(data_hex.trim_start_matches("0x")).context("decode log data")?;

    Ok(Log {
        address,
        topics,
        data,
        block_number: parse_quantity_u64(
            entry.get("blockNumber").context("log missing blockNumber")?,
        )
        .context("log blockNumber")?,
        tx_hash: entry
            .get("transactionHash")
            .and_then(Value::as_str)
            .context("log missing transactionHash")?
            .to_lowercase(),
        tx_index: parse_quantity_u64(
            entry
                .get("transactionIndex")
                .context("log missing transactionIndex")?,
        )
        .context("log transactionIndex")?,
        log_index: parse_quantity_u64(entry.get("logIndex").context("log missing logIndex")?)
            .context("log logIndex")?,
    })
}

/// Per-chain gas accounting for validator-submitted IN transactions.
///
/// Arbitrum's classic receipts carry per-bucket paid amounts under
/// `feeStats.paid`; Optimism and Boba add an L1 data fee on top of the plain
/// `gasUsed * effectiveGasPrice`; everything else is the plain product.
pub fn gas_stats(chain: &Chain, receipt: &Value) -> Result<GasStats> {
    let gas_used = parse_quantity_u256(receipt.get("gasUsed").context("receipt missing gasUsed")?)
        .context("receipt gasUsed")?;

    match chain.name {
        "arbitrum" => {
            let paid = receipt
                .get("feeStats")
                .and_then(|fs| fs.get("paid"))
                .and_then(Value::as_object)
                .context("arbitrum receipt missing feeStats.paid")?;
            let mut total = U256::ZERO;
            for (field, v) in paid {
                let amount =
                    parse_quantity_u256(v).with_context(|| format!("feeStats.paid.{field}"))?;
                total += amount;
            }
            let gas_paid = wei_to_native(total)?;
            let gas_price = if gas_used.is_zero() {
                Decimal::ZERO
            } else {
                wei_to_gwei(total)? / u256_to_plain_decimal(gas_used)?
            };
            Ok(GasStats { gas_paid, gas_price })
        }
        "optimism" | "boba" => {
            let price = effective_gas_price(receipt)?;
            let l1_fee = match receipt.get("l1Fee") {
                Some(v) => parse_quantity_u256(v).context("receipt l1Fee")?,
                None => U256::ZERO,
            };
            let total = gas_used * price + l1_fee;
            let gas_paid = wei_to_native(total)?;
            let gas_price = if gas_used.is_zero() {
                Decimal::ZERO
            } else {
                wei_to_gwei(total)? / u256_to_plain_decimal(gas_used)?
            };
            Ok(GasStats { gas_paid, gas_price })
        }
        _ => {
            let price = effective_gas_price(receipt)?;
            Ok(GasStats {
                gas_paid: wei_to_native(gas_used * price)?,
                gas_price: wei_to_gwei(price)?,
            })
        }
    }
}

fn effective_gas_price(receipt: &Value) -> Result<U256> {
    let v = receipt
        .get("effectiveGasPrice")
        .or_else(|| receipt.get("gasPrice"))
        .context("receipt missing effectiveGasPrice")?;
    parse_quantity_u256(v).context("receipt effectiveGasPrice")
}

fn u256_to_plain_decimal(v: U256) -> Result<Decimal> {
    crate::units::u256_to_decimal(v, 0)
}

pub fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

pub fn parse_quantity_u64(v: &Value) -> Result<u64> {
    let wide = parse_quantity_u256(v)?;
    u64::try_from(wide).ok().with_context(|| format!("quantity does not fit u64: {v}"))
}

pub fn parse_quantity_u256(v: &Value) -> Result<U256> {
    match v {
        Value::String(s) => parse_quantity_str(s),
        Value::Number(n) => Ok(U256::from(
            n.as_u64().context("quantity number not representable as u64")?,
        )),
        other => bail!("unexpected quantity json type: {other}"),
    }
}

fn parse_quantity_str(s: &str) -> Result<U256> {
    let trimmed = s.trim();
    if let Some(hex) = trimmed.strip_prefix("0x") {
        if hex.is_empty() {
            bail!("invalid hex quantity: {trimmed}");
        }
        U256::from_str_radix(hex, 16).with_context(|| format!("invalid hex quantity: {trimmed}"))
    } else {
        U256::from_str_radix(trimmed, 10)
            .with_context(|| format!("invalid decimal quantity: {trimmed}"))
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    RETRY_BASE.saturating_mul(factor).min(RETRY_CAP)
}

pub fn looks_like_transient(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("deadline")
        || msg.contains("too many requests")
        || msg.contains("rate limit")
        || msg.contains("429")
        || msg.contains("bad gateway")
        || msg.contains("gateway")
        || msg.contains("service unavailable")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("500")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("connection refused")
        || msg.contains("broken pipe")
        || msg.contains("temporarily unavailable")
        || msg.contains("decode json body")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("test literal")
    }

    #[test]
    fn retry_delay_doubles_and_caps_at_five_seconds() {
        assert_eq!(retry_delay(0), Duration::from_millis(250));
        assert_eq!(retry_delay(1), Duration::from_millis(500));
        assert_eq!(retry_delay(4), Duration::from_secs(4));
        assert_eq!(retry_delay(5), Duration::from_secs(5));
        assert_eq!(retry_delay(20), Duration::from_secs(5));
    }

    #[test]
    fn transient_classification_covers_the_usual_suspects() {
        for msg in [
            "operation timed out",
            "http status=502 body=bad gateway",
            "eth_getLogs decode json body",
            "connection reset by peer",
        ] {
            assert!(looks_like_transient(&anyhow::anyhow!("{msg}")), "{msg}");
        }
        assert!(!looks_like_transient(&anyhow::anyhow!(
            "rpc error: invalid params"
        )));
    }

    #[test]
    fn quantities_parse_from_hex_and_decimal() {
        assert_eq!(
            parse_quantity_u64(&serde_json::json!("0x1312d00")).expect("hex"),
            20_000_000
        );
        assert_eq!(parse_quantity_u64(&serde_json::json!(42)).expect("num"), 42);
        assert!(parse_quantity_u64(&serde_json::json!("0x")).is_err());
        assert!(parse_quantity_u64(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn default_chain_gas_uses_plain_product() {
        let polygon = chains::by_name("polygon").expect("polygon");
        let receipt = serde_json::json!({
            "gasUsed": "0x13880",               // 80_000
            "effectiveGasPrice": "0xba43b7400", // 50 gwei
        });
        let stats = gas_stats(polygon, &receipt).expect("gas stats");
        assert_eq!(stats.gas_paid, dec("0.004"));
        assert_eq!(stats.gas_price, dec("50"));
    }

    #[test]
    fn optimism_gas_includes_the_l1_fee() {
        let optimism = chains::by_name("optimism").expect("optimism");
        let receipt = serde_json::json!({
            "gasUsed": "0x186a0",              // 100_000
            "effectiveGasPrice": "0x3b9aca00", // 1 gwei
            "l1Fee": "0x2386f26fc10000",       // 0.01 ether
        });
        let stats = gas_stats(optimism, &receipt).expect("gas stats");
        // 100_000 gas at 1 gwei is 0.0001, plus the 0.01 L1 fee.
        assert_eq!(stats.gas_paid, dec("0.0101"));
        assert_eq!(stats.gas_price, dec("101"));
    }

    #[test]
    fn arbitrum_gas_sums_fee_stat_buckets() {
        let arbitrum = chains::by_name("arbitrum").expect("arbitrum");
        let receipt = serde_json::json!({
            "gasUsed": "0xf4240", // 1_000_000
            "feeStats": {
                "paid": {
                    "l1Calldata": "0x38d7ea4c68000",      // 0.001
                    "l1Transaction": "0x2386f26fc10000",  // 0.01
                    "l2Computation": "0x0",
                    "l2Storage": "0x0",
                }
            }
        });
        let stats = gas_stats(arbitrum, &receipt).expect("gas stats");
        assert_eq!(stats.gas_paid, dec("0.011"));
        // 0.011 ether over 1_000_000 gas is 11 gwei effective.
        assert_eq!(stats.gas_price, dec("11"));
    }

    #[test]
    fn missing_arbitrum_fee_stats_is_an_error() {
        let arbitrum = chains::by_name("arbitrum").expect("arbitrum");
        let receipt = serde_json::json!({"gasUsed": "0x5208"});
        assert!(gas_stats(arbitrum, &receipt).is_err());
    }

    #[test]
    fn windows_sort_strictly_by_block_then_tx_index() {
        let mk = |block, tx_index, log_index| Log {
            address: "0xpool".to_string(),
            topics: Vec::new(),
            data: Vec::new(),
            block_number: block,
            tx_hash: format!("0x{block}{tx_index}"),
            tx_index,
            log_index,
        };
        let mut logs = vec![mk(12, 4, 0), mk(11, 9, 2), mk(12, 1, 1), mk(11, 9, 0)];
        sort_logs(&mut logs);
        let order: Vec<_> = logs.iter().map(|l| (l.block_number, l.tx_index, l.log_index)).collect();
        assert_eq!(order, vec![(11, 9, 0), (11, 9, 2), (12, 1, 1), (12, 4, 0)]);
    }

    #[test]
    fn logs_parse_lowercased_and_skip_nothing_mined() {
        let entry = serde_json::json!({
            "address": "0xAbC0000000000000000000000000000000000001",
            "topics": ["0xDC5BAD4651C5FBE9977A696AADC65996C468CDE1448DD468EC0D83BF61C4B57C"],
            "data": "0x0001",
            "blockNumber": "0x10",
            "transactionHash": "0xAA11",
            "transactionIndex": "0x2",
            "logIndex": "0x0",
        });
        let log = parse_log(&entry).expect("parse");
        assert_eq!(log.address, "0xabc0000000000000000000000000000000000001");
        assert!(log.topics[0].starts_with("0xdc5bad"));
        assert_eq!(log.tx_hash, "0xaa11");
        assert_eq!(log.block_number, 16);
        assert_eq!(log.tx_index, 2);
        assert_eq!(log.data, vec![0x00, 0x01]);
    }
}
