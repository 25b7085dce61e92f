use std::collections::HashMap;

use alloy::primitives::B256;
use alloy::primitives::U256;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result, bail};
use bridge_bindings::SwapPool;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::chains::{Chain, Pool, PoolKind};
use crate::rpc::Log;
use crate::tokens;
use crate::units::u256_to_decimal;

/// Swap fees live in 1e-10 units on chain.
pub const FEE_DENOMINATOR: u64 = 10_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "IN" => Some(Direction::In),
            "OUT" => Some(Direction::Out),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    SwapBase,
    SwapNusd,
    AddRemove,
}

impl SwapKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            SwapKind::SwapBase => "swap_base",
            SwapKind::SwapNusd => "swap_nusd",
            SwapKind::AddRemove => "add_remove",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeKind {
    Swap,
    Admin,
}

impl FeeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            FeeKind::Swap => "swap",
            FeeKind::Admin => "admin",
        }
    }
}

/// Canonical record every indexed log normalizes into.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    BridgeOut(BridgeOut),
    BridgeIn(BridgeIn),
    PoolSwap(PoolSwap),
    PoolFeeChange(PoolFeeChange),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeOut {
    pub chain: &'static str,
    pub date: NaiveDate,
    pub asset: String,
    pub to_chain_id: u64,
    pub amount: Decimal,
    pub block: u64,
    pub tx_hash: String,
    pub tx_index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeIn {
    pub chain: &'static str,
    pub date: NaiveDate,
    pub asset: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub validator_gas_paid: Decimal,
    pub validator_gas_price: Decimal,
    pub airdrop: Decimal,
    pub block: u64,
    pub tx_hash: String,
    pub tx_index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolSwap {
    pub chain: &'static str,
    pub date: NaiveDate,
    pub pool_kind: PoolKind,
    pub sub_kind: SwapKind,
    pub volume: Decimal,
    pub lp_fees: Decimal,
    pub admin_fees: Decimal,
    pub block: u64,
    pub tx_hash: String,
    pub tx_index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolFeeChange {
    pub chain: &'static str,
    pub date: NaiveDate,
    pub pool_kind: PoolKind,
    pub kind: FeeKind,
    /// New fee in 1e-10 units, as emitted.
    pub new_value: Decimal,
    pub block: u64,
}

/// The bridge's event roster. topic0 values are fixed across all three
/// historical ABI revisions; only the data layout moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeTopic {
    TokenRedeemAndSwap,
    TokenMintAndSwap,
    TokenRedeemAndRemove,
    TokenRedeem,
    TokenMint,
    TokenDepositAndSwap,
    TokenWithdrawAndRemove,
    TokenDeposit,
    TokenWithdraw,
}

impl BridgeTopic {
    pub const fn topic0(self) -> &'static str {
        match self {
            BridgeTopic::TokenRedeemAndSwap => {
                "0x91f25e9be0134ec851830e0e76dc71e06f9dade75a9b84e9524071dbbc319425"
            }
            BridgeTopic::TokenMintAndSwap => {
                "0x4f56ec39e98539920503fd54ee56ae0cbebe9eb15aa778f18de67701eeae7c65"
            }
            BridgeTopic::TokenRedeemAndRemove => {
                "0x9a7024cde1920aa50cdde09ca396229e8c4d530d5cfdc6233590def70a94408c"
            }
            BridgeTopic::TokenRedeem => {
                "0xdc5bad4651c5fbe9977a696aadc65996c468cde1448dd468ec0d83bf61c4b57c"
            }
            BridgeTopic::TokenMint => {
                "0xbf14b9fde87f6e1c29a7e0787ad1d0d64b4648d8ae63da21524d9fd0f283dd38"
            }
            BridgeTopic::TokenDepositAndSwap => {
                "0x79c15604b92ef54d3f61f0c40caab8857927ca3d5092367163b4562c1699eb5f"
            }
            BridgeTopic::TokenWithdrawAndRemove => {
                "0xc1a608d0f8122d014d03cc915a91d98cef4ebaf31ea3552320430cba05211b6d"
            }
            BridgeTopic::TokenDeposit => {
                "0xda5273705dbef4bf1b902a131c2eac086b7e1476a8ab0cb4da08af1fe1bd8e3b"
            }
            BridgeTopic::TokenWithdraw => {
                "0x8b0afdc777af6946e53045a4a75212769075d30455a212ac51c9b16f9c5c9b26"
            }
        }
    }

    pub const fn direction(self) -> Direction {
        match self {
            BridgeTopic::TokenRedeemAndSwap
            | BridgeTopic::TokenRedeemAndRemove
            | BridgeTopic::TokenRedeem
            | BridgeTopic::TokenDepositAndSwap
            | BridgeTopic::TokenDeposit => Direction::Out,
            BridgeTopic::TokenMintAndSwap
            | BridgeTopic::TokenMint
            | BridgeTopic::TokenWithdrawAndRemove
            | BridgeTopic::TokenWithdraw => Direction::In,
        }
    }

    pub fn from_topic0(topic0: &str) -> Option<Self> {
        ALL_BRIDGE_TOPICS.iter().copied().find(|t| t.topic0() == topic0)
    }
}

pub const ALL_BRIDGE_TOPICS: &[BridgeTopic] = &[
    BridgeTopic::TokenRedeemAndSwap,
    BridgeTopic::TokenMintAndSwap,
    BridgeTopic::TokenRedeemAndRemove,
    BridgeTopic::TokenRedeem,
    BridgeTopic::TokenMint,
    BridgeTopic::TokenDepositAndSwap,
    BridgeTopic::TokenWithdrawAndRemove,
    BridgeTopic::TokenDeposit,
    BridgeTopic::TokenWithdraw,
];

pub fn bridge_topic0s() -> Vec<&'static str> {
    ALL_BRIDGE_TOPICS.iter().map(|t| t.topic0()).collect()
}

/// Data-layout revisions the bridge shipped. Newest first; decode falls
/// through the chain until a layout fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiRevision {
    Current,
    Legacy,
    Oldest,
}

const REVISIONS: &[AbiRevision] = &[AbiRevision::Current, AbiRevision::Legacy, AbiRevision::Oldest];

/// Raw fields of an OUT event, straight from the log data. Amounts stay raw
/// until the token's decimals are known.
#[derive(Debug, Clone, PartialEq)]
pub struct OutFields {
    pub to_chain_id: u64,
    pub token: String,
    pub amount: U256,
}

/// Raw fields of an IN event, decoded from the validator's bridge call input.
#[derive(Debug, Clone, PartialEq)]
pub struct InFields {
    pub to: String,
    pub token: String,
    pub amount: U256,
    pub fee: U256,
}

fn out_word_count(topic: BridgeTopic, rev: AbiRevision) -> Option<usize> {
    use AbiRevision::*;
    use BridgeTopic::*;
    match topic {
        TokenRedeemAndSwap | TokenDepositAndSwap => match rev {
            Current => Some(7),
            Legacy => Some(6),
            Oldest => Some(5),
        },
        TokenRedeemAndRemove => match rev {
            Current => Some(6),
            Legacy => Some(5),
            Oldest => Some(4),
        },
        TokenRedeem | TokenDeposit => match rev {
            Current => Some(3),
            Legacy | Oldest => None,
        },
        // IN-direction topics decode from tx input, never from log data.
        TokenMintAndSwap | TokenMint | TokenWithdrawAndRemove | TokenWithdraw => None,
    }
}

/// Decode an OUT log's data section, walking the ABI-revision chain.
///
/// The first three words are stable across every revision
/// (`[chain_id, token, amount]`); trailing index words vary and are used
/// only to validate that the chosen layout actually fits.
pub fn parse_out_data(topic: BridgeTopic, data: &[u8]) -> Result<OutFields> {
    let mut last_err = None;
    for rev in REVISIONS {
        let Some(expected) = out_word_count(topic, *rev) else {
            continue;
        };
        match try_out_layout(topic, data, expected) {
            Ok(fields) => return Ok(fields),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{topic:?} has no OUT layout")))
}

fn try_out_layout(topic: BridgeTopic, data: &[u8], expected_words: usize) -> Result<OutFields> {
    if data.len() != expected_words * 32 {
        bail!(
            "{topic:?} data is {} bytes, layout wants {}",
            data.len(),
            expected_words * 32
        );
    }

    let to_chain_id = word_u64(data, 0).context("chain id word")?;
    let token = word_address(data, 1).context("token word")?;
    let amount = word_u256(data, 2);

    // Index words are uint8 on chain; a wider value means the words are
    // shifted and this layout is the wrong revision.
    if matches!(
        topic,
        BridgeTopic::TokenRedeemAndSwap
            | BridgeTopic::TokenDepositAndSwap
            | BridgeTopic::TokenRedeemAndRemove
    ) {
        let idx = word_u256(data, 3);
        if idx > U256::from(u8::MAX) {
            bail!("{topic:?} index word out of uint8 range");
        }
    }

    Ok(OutFields { to_chain_id, token, amount })
}

/// Decode an IN event from the bridge transaction's input
/// (`selector ++ [to, token, amount, fee, ...]`).
pub fn parse_in_input(topic: BridgeTopic, input: &[u8]) -> Result<InFields> {
    if input.len() < 4 {
        bail!("bridge call input shorter than a selector");
    }
    let data = &input[4..];
    if data.len() % 32 != 0 {
        bail!("bridge call input is not word-aligned");
    }
    let words = data.len() / 32;

    let expected = match topic {
        BridgeTopic::TokenMint | BridgeTopic::TokenWithdraw => 5..=5,
        BridgeTopic::TokenMintAndSwap => 10..=10,
        BridgeTopic::TokenWithdrawAndRemove => 8..=9,
        other => bail!("{other:?} is not an IN topic"),
    };
    if !expected.contains(&words) {
        bail!("{topic:?} input has {words} words, expected {expected:?}");
    }

    let to = word_address(data, 0).context("to word")?;
    let token = word_address(data, 1).context("token word")?;
    let amount = word_u256(data, 2);
    let fee = word_u256(data, 3);

    match topic {
        BridgeTopic::TokenMintAndSwap => {
            let index_to = word_u256(data, 6);
            if index_to > U256::from(u8::MAX) {
                bail!("TokenMintAndSwap token_index_to out of uint8 range");
            }
        }
        BridgeTopic::TokenWithdrawAndRemove => {
            // Older calls carried swap_token_amount before the index; a
            // "token index" wider than the pool size gives it away.
            let first_index_word = word_u256(data, 4);
            let index = if first_index_word > U256::from(3u8) {
                word_u256(data, 5)
            } else {
                first_index_word
            };
            if index > U256::from(u8::MAX) {
                bail!("TokenWithdrawAndRemove token index out of uint8 range");
            }
        }
        _ => {}
    }

    Ok(InFields { to, token, amount, fee })
}

fn word(data: &[u8], index: usize) -> &[u8] {
    &data[index * 32..(index + 1) * 32]
}

fn word_u256(data: &[u8], index: usize) -> U256 {
    U256::from_be_slice(word(data, index))
}

fn word_u64(data: &[u8], index: usize) -> Result<u64> {
    let v = word_u256(data, index);
    u64::try_from(v).ok().with_context(|| format!("word {index} does not fit u64"))
}

fn word_address(data: &[u8], index: usize) -> Result<String> {
    let w = word(data, index);
    if w[..12].iter().any(|b| *b != 0) {
        bail!("word {index} is not an address");
    }
    Ok(format!("0x{}", hex::encode(&w[12..])))
}

fn topic0_of<E: SolEvent>() -> String {
    format!("0x{}", hex::encode(E::SIGNATURE_HASH))
}

pub fn pool_topic0s() -> Vec<String> {
    vec![
        topic0_of::<SwapPool::TokenSwap>(),
        topic0_of::<SwapPool::NewSwapFee>(),
        topic0_of::<SwapPool::NewAdminFee>(),
        topic0_of::<SwapPool::AddLiquidity>(),
        topic0_of::<SwapPool::RemoveLiquidityOne>(),
        topic0_of::<SwapPool::RemoveLiquidityImbalance>(),
    ]
}

/// Topics replayed at startup to rebuild the fee table.
pub fn fee_change_topic0s() -> Vec<String> {
    vec![
        topic0_of::<SwapPool::NewSwapFee>(),
        topic0_of::<SwapPool::NewAdminFee>(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolFees {
    pub swap: u64,
    pub admin: u64,
}

/// Per-pool fee tracker plus pool event decoder.
///
/// The fee pair is process-local derived state: seeded from each pool's
/// deployment fees and corrected by replaying `NewSwapFee` / `NewAdminFee`
/// from the pool's start block. Never authoritative.
pub struct PoolDecoder {
    chain: &'static Chain,
    fees: HashMap<&'static str, PoolFees>,
}

impl PoolDecoder {
    pub fn new(chain: &'static Chain) -> Self {
        let fees = chain
            .pools
            .iter()
            .map(|p| {
                (
                    p.address,
                    PoolFees {
                        swap: p.initial_swap_fee,
                        admin: p.initial_admin_fee,
                    },
                )
            })
            .collect();
        Self { chain, fees }
    }

    pub fn fees(&self, pool: &Pool) -> PoolFees {
        self.fees.get(pool.address).copied().unwrap_or(PoolFees { swap: 0, admin: 0 })
    }

    /// Apply a historical `NewSwapFee` / `NewAdminFee` log to the fee table
    /// without producing an event. Used when rebuilding the table below the
    /// resume point; those changes are already merged.
    pub fn seed_fee_change(&mut self, pool: &'static Pool, log: &Log) -> Result<()> {
        let Some(topic0) = log.topics.first() else {
            return Ok(());
        };
        let topics = parse_topics(&log.topics)?;

        if *topic0 == topic0_of::<SwapPool::NewSwapFee>() {
            let ev = SwapPool::NewSwapFee::decode_raw_log(topics.iter().copied(), &log.data)
                .context("decode NewSwapFee")?;
            let new_fee = u64::try_from(ev.newSwapFee).context("newSwapFee out of range")?;
            self.fees.entry(pool.address).or_insert(PoolFees { swap: 0, admin: 0 }).swap = new_fee;
        } else if *topic0 == topic0_of::<SwapPool::NewAdminFee>() {
            let ev = SwapPool::NewAdminFee::decode_raw_log(topics.iter().copied(), &log.data)
                .context("decode NewAdminFee")?;
            let new_fee = u64::try_from(ev.newAdminFee).context("newAdminFee out of range")?;
            self.fees.entry(pool.address).or_insert(PoolFees { swap: 0, admin: 0 }).admin = new_fee;
        }
        Ok(())
    }

    /// Decode one pool log into a canonical event, updating the fee table as
    /// a side effect. Unknown topics yield `None` and are ignored.
    pub fn decode(&mut self, pool: &'static Pool, log: &Log, date: NaiveDate) -> Result<Option<Event>> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let topics = parse_topics(&log.topics)?;

        if *topic0 == topic0_of::<SwapPool::NewSwapFee>() {
            let ev = SwapPool::NewSwapFee::decode_raw_log(topics.iter().copied(), &log.data)
                .context("decode NewSwapFee")?;
            let new_fee = u64::try_from(ev.newSwapFee).context("newSwapFee out of range")?;
            self.fees.entry(pool.address).or_insert(PoolFees { swap: 0, admin: 0 }).swap = new_fee;
            return Ok(Some(Event::PoolFeeChange(PoolFeeChange {
                chain: self.chain.name,
                date,
                pool_kind: pool.kind,
                kind: FeeKind::Swap,
                new_value: Decimal::from(new_fee),
                block: log.block_number,
            })));
        }

        if *topic0 == topic0_of::<SwapPool::NewAdminFee>() {
            let ev = SwapPool::NewAdminFee::decode_raw_log(topics.iter().copied(), &log.data)
                .context("decode NewAdminFee")?;
            let new_fee = u64::try_from(ev.newAdminFee).context("newAdminFee out of range")?;
            self.fees.entry(pool.address).or_insert(PoolFees { swap: 0, admin: 0 }).admin = new_fee;
            return Ok(Some(Event::PoolFeeChange(PoolFeeChange {
                chain: self.chain.name,
                date,
                pool_kind: pool.kind,
                kind: FeeKind::Admin,
                new_value: Decimal::from(new_fee),
                block: log.block_number,
            })));
        }

        if *topic0 == topic0_of::<SwapPool::TokenSwap>() {
            let ev = SwapPool::TokenSwap::decode_raw_log(topics.iter().copied(), &log.data)
                .context("decode TokenSwap")?;
            let bought_id = usize::try_from(ev.boughtId).context("boughtId out of range")?;
            let sold_id = usize::try_from(ev.soldId).context("soldId out of range")?;
            let (volume, lp_fees, admin_fees) =
                self.swap_output_fees(pool, bought_id, ev.tokensBought)?;

            let sub_kind = if self.chain.name == "ethereum" || (sold_id > 0 && bought_id > 0) {
                SwapKind::SwapBase
            } else {
                SwapKind::SwapNusd
            };

            return Ok(Some(Event::PoolSwap(PoolSwap {
                chain: self.chain.name,
                date,
                pool_kind: pool.kind,
                sub_kind,
                volume,
                lp_fees,
                admin_fees,
                block: log.block_number,
                tx_hash: log.tx_hash.clone(),
                tx_index: log.tx_index,
            })));
        }

        if *topic0 == topic0_of::<SwapPool::RemoveLiquidityOne>() {
            let ev = SwapPool::RemoveLiquidityOne::decode_raw_log(topics.iter().copied(), &log.data)
                .context("decode RemoveLiquidityOne")?;
            let bought_id = usize::try_from(ev.boughtId).context("boughtId out of range")?;
            let (volume, lp_fees, admin_fees) =
                self.swap_output_fees(pool, bought_id, ev.tokensBought)?;

            return Ok(Some(Event::PoolSwap(PoolSwap {
                chain: self.chain.name,
                date,
                pool_kind: pool.kind,
                sub_kind: SwapKind::AddRemove,
                volume,
                lp_fees,
                admin_fees,
                block: log.block_number,
                tx_hash: log.tx_hash.clone(),
                tx_index: log.tx_index,
            })));
        }

        if *topic0 == topic0_of::<SwapPool::AddLiquidity>() {
            let ev = SwapPool::AddLiquidity::decode_raw_log(topics.iter().copied(), &log.data)
                .context("decode AddLiquidity")?;
            return self
                .liquidity_event(pool, log, date, &ev.tokenAmounts, &ev.fees)
                .map(Some);
        }

        if *topic0 == topic0_of::<SwapPool::RemoveLiquidityImbalance>() {
            let ev =
                SwapPool::RemoveLiquidityImbalance::decode_raw_log(topics.iter().copied(), &log.data)
                    .context("decode RemoveLiquidityImbalance")?;
            return self
                .liquidity_event(pool, log, date, &ev.tokenAmounts, &ev.fees)
                .map(Some);
        }

        Ok(None)
    }

    /// Fee split for output-side events (`TokenSwap`, `RemoveLiquidityOne`):
    ///
    ///   total = bought_human * swap / (FEE_DENOMINATOR - swap)
    ///   admin = total * admin / FEE_DENOMINATOR
    ///   lp    = total - admin
    fn swap_output_fees(
        &self,
        pool: &Pool,
        bought_id: usize,
        tokens_bought: U256,
    ) -> Result<(Decimal, Decimal, Decimal)> {
        let decimals = self.pool_token_decimals(pool, bought_id)?;
        let volume = u256_to_decimal(tokens_bought, decimals)?;

        let fees = self.fees(pool);
        let swap = Decimal::from(fees.swap);
        let admin = Decimal::from(fees.admin);
        let denominator = Decimal::from(FEE_DENOMINATOR);

        let total_fees = if fees.swap == 0 {
            Decimal::ZERO
        } else {
            volume * swap / (denominator - swap)
        };
        let admin_fees = total_fees * admin / denominator;
        let lp_fees = total_fees - admin_fees;
        Ok((volume, lp_fees, admin_fees))
    }

    fn liquidity_event(
        &self,
        pool: &'static Pool,
        log: &Log,
        date: NaiveDate,
        token_amounts: &[U256],
        fees: &[U256],
    ) -> Result<Event> {
        let mut volume = Decimal::ZERO;
        let mut total_fees = Decimal::ZERO;
        for (i, amount) in token_amounts.iter().enumerate() {
            let decimals = self.pool_token_decimals(pool, i)?;
            volume += u256_to_decimal(*amount, decimals)?;
            if let Some(fee) = fees.get(i) {
                total_fees += u256_to_decimal(*fee, decimals)?;
            }
        }

        let admin = Decimal::from(self.fees(pool).admin);
        let admin_fees = total_fees * admin / Decimal::from(FEE_DENOMINATOR);
        let lp_fees = total_fees - admin_fees;

        Ok(Event::PoolSwap(PoolSwap {
            chain: self.chain.name,
            date,
            pool_kind: pool.kind,
            sub_kind: SwapKind::AddRemove,
            volume,
            lp_fees,
            admin_fees,
            block: log.block_number,
            tx_hash: log.tx_hash.clone(),
            tx_index: log.tx_index,
        }))
    }

    fn pool_token_decimals(&self, pool: &Pool, index: usize) -> Result<u32> {
        let address = pool
            .tokens
            .get(index)
            .with_context(|| format!("pool {} has no token index {index}", pool.address))?;
        tokens::info(self.chain.name, address)
            .map(|t| t.decimals)
            .with_context(|| format!("no decimals for pool token {address} on {}", self.chain.name))
    }
}

fn parse_topics(topics: &[String]) -> Result<Vec<B256>> {
    topics
        .iter()
        .map(|t| t.parse::<B256>().with_context(|| format!("parse topic {t}")))
        .collect()
}
