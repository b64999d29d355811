// Oracle & fixed interval prices
//
// Oracles publish (token, currency) prices. Every `fixed_interval_blocks`
// the weighted median of the unexpired submissions becomes the next price of
// each tracked pair and the previous next price becomes active. Vault
// evaluation only ever reads these fixed interval prices.

use log::{debug, info, trace};
use tessera_common::{
    amount::{Amount, TokenId, COIN},
    config::{DUSD_SYMBOL, USD_CURRENCY},
    crypto::Hash,
    oracle::{
        CurrencyPair, FixedIntervalPrice, Oracle, OracleId, PriceSubmission, MAX_ORACLE_WEIGHT,
        ORACLE_MAX_FUTURE_SECONDS, ORACLE_PRICE_EXPIRY_SECONDS,
    },
    transaction::{AppointOracleMessage, TokenPrices, UpdateOracleMessage},
};

use super::{attributes, context::BlockContext, error::BlockchainError, storage::Storage};

// The settlement stable coin is pegged to the dollar
fn is_pegged(pair: &CurrencyPair) -> bool {
    pair.token == DUSD_SYMBOL && pair.currency == USD_CURRENCY
}

fn validate_oracle(weightage: u8, pairs: &std::collections::BTreeSet<CurrencyPair>) -> Result<(), BlockchainError> {
    if weightage == 0 || weightage > MAX_ORACLE_WEIGHT {
        return Err(BlockchainError::InvalidParameter(format!(
            "Oracle weightage must be between 1 and {}",
            MAX_ORACLE_WEIGHT
        )));
    }
    if let Some(pair) = pairs.iter().find(|pair| !pair.is_valid()) {
        return Err(BlockchainError::InvalidParameter(format!("Invalid currency pair {}", pair)));
    }
    Ok(())
}

pub fn appoint_oracle<S: Storage>(
    storage: &mut S,
    id: &OracleId,
    message: &AppointOracleMessage,
) -> Result<(), BlockchainError> {
    if storage.get_oracle(id)?.is_some() {
        return Err(BlockchainError::OracleExists(*id));
    }
    validate_oracle(message.weightage, &message.pairs)?;

    info!("appointing oracle {} with {} pairs", id, message.pairs.len());
    let oracle = Oracle {
        owner: message.owner.clone(),
        weightage: message.weightage,
        available_pairs: message.pairs.clone(),
        prices: Default::default(),
    };
    storage.set_oracle(id, &oracle)
}

pub fn update_oracle<S: Storage>(storage: &mut S, message: &UpdateOracleMessage) -> Result<(), BlockchainError> {
    let mut oracle = storage.get_oracle_or_err(&message.oracle_id)?;
    validate_oracle(message.weightage, &message.pairs)?;

    oracle.owner = message.owner.clone();
    oracle.weightage = message.weightage;
    oracle.available_pairs = message.pairs.clone();
    // submissions for pairs no longer served are dropped
    oracle.prices.retain(|pair, _| message.pairs.contains(pair));
    storage.set_oracle(&message.oracle_id, &oracle)
}

pub fn remove_oracle<S: Storage>(storage: &mut S, id: &OracleId) -> Result<(), BlockchainError> {
    storage.get_oracle_or_err(id)?;
    info!("removing oracle {}", id);
    storage.remove_oracle(id)
}

/// Stores a batch of price submissions. Owner authorization is checked by
/// the caller.
pub fn set_oracle_data<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    id: &OracleId,
    timestamp: i64,
    prices: &TokenPrices,
) -> Result<(), BlockchainError> {
    let mut oracle = storage.get_oracle_or_err(id)?;
    if timestamp > ctx.time + ORACLE_MAX_FUTURE_SECONDS {
        return Err(BlockchainError::InvalidParameter(format!(
            "Timestamp {} is more than {} seconds in the future",
            timestamp, ORACLE_MAX_FUTURE_SECONDS
        )));
    }
    if timestamp < ctx.time - ORACLE_PRICE_EXPIRY_SECONDS {
        return Err(BlockchainError::InvalidParameter(format!(
            "Timestamp {} is older than {} seconds",
            timestamp, ORACLE_PRICE_EXPIRY_SECONDS
        )));
    }
    if prices.is_empty() {
        return Err(BlockchainError::InvalidParameter("No prices submitted".to_owned()));
    }

    for (token, currencies) in prices {
        for (currency, price) in currencies {
            let pair = CurrencyPair::new(token.as_str(), currency.as_str());
            if !oracle.supports(&pair) {
                return Err(BlockchainError::InvalidParameter(format!(
                    "Oracle {} does not support pair {}",
                    id, pair
                )));
            }
            if *price <= 0 {
                return Err(BlockchainError::InvalidAmount(*price));
            }
            if log::log_enabled!(log::Level::Trace) {
                trace!("oracle {} submits {} = {}", id, pair, price);
            }
            oracle.prices.insert(pair, PriceSubmission { price: *price, timestamp });
        }
    }
    storage.set_oracle(id, &oracle)
}

/// Weighted median of every unexpired submission for a pair: the lowest
/// price at which the cumulated weight reaches half of the total.
pub fn aggregate_price<S: Storage>(storage: &S, pair: &CurrencyPair, time: i64) -> Result<Amount, BlockchainError> {
    if is_pegged(pair) {
        return Ok(COIN);
    }

    let mut points: Vec<(Amount, u64)> = storage
        .list_oracles()?
        .into_iter()
        .filter_map(|(_, oracle)| {
            let submission = oracle.prices.get(pair)?;
            let fresh = submission.timestamp >= time - ORACLE_PRICE_EXPIRY_SECONDS
                && submission.timestamp <= time + ORACLE_MAX_FUTURE_SECONDS;
            (fresh && oracle.weightage > 0).then_some((submission.price, oracle.weightage as u64))
        })
        .collect();

    if points.is_empty() {
        return Err(BlockchainError::NoLiveOracles(pair.clone()));
    }

    points.sort_unstable();
    let total: u64 = points.iter().map(|(_, weight)| weight).sum();
    let mut cumulated = 0;
    for (price, weight) in points.iter() {
        cumulated += weight;
        if cumulated * 2 >= total {
            return Ok(*price);
        }
    }
    // unreachable with a non empty set, the last point always closes the loop
    Err(BlockchainError::NoLiveOracles(pair.clone()))
}

/// Creates the fixed interval price of a pair if it is not tracked yet,
/// seeding both slots with the current aggregate.
pub fn ensure_fixed_interval_price<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    pair: &CurrencyPair,
) -> Result<FixedIntervalPrice, BlockchainError> {
    if !pair.is_valid() {
        return Err(BlockchainError::InvalidParameter(format!("Invalid currency pair {}", pair)));
    }
    if let Some(price) = storage.get_fixed_interval_price(pair)? {
        return Ok(price);
    }

    let current = aggregate_price(storage, pair, ctx.time)?;
    let mut price = FixedIntervalPrice::new(pair.clone());
    price.active_price = current;
    price.next_price = current;
    price.active_price_block = ctx.height;
    price.next_price_block = next_interval(ctx);
    price.timestamp = ctx.time;
    price.is_live = price.compute_is_live(ctx.params.price_deviation_threshold);
    debug!("tracking fixed interval price {} at {}", pair, current);
    storage.set_fixed_interval_price(&price)?;
    Ok(price)
}

fn next_interval(ctx: &BlockContext) -> u32 {
    let interval = ctx.params.fixed_interval_blocks.max(1);
    ctx.height - ctx.height % interval + interval
}

pub fn is_interval_block(ctx: &BlockContext) -> bool {
    let interval = ctx.params.fixed_interval_blocks.max(1);
    ctx.height % interval == 0
}

/// End of block price refresh. Runs on interval blocks only.
pub fn tick<S: Storage>(storage: &mut S, ctx: &BlockContext) -> Result<usize, BlockchainError> {
    if !is_interval_block(ctx) {
        return Ok(0);
    }

    let threshold = ctx.params.price_deviation_threshold;
    let mut updated = 0;
    for mut price in storage.list_fixed_interval_prices()? {
        let next = match aggregate_price(storage, &price.pair, ctx.time) {
            Ok(value) => value,
            Err(e) => {
                debug!("no aggregate for {} at height {}: {}", price.pair, ctx.height, e);
                0
            }
        };

        price.active_price = price.next_price;
        price.next_price = next;
        price.active_price_block = ctx.height;
        price.next_price_block = next_interval(ctx);
        price.timestamp = ctx.time;
        let was_live = price.is_live;
        price.is_live = price.compute_is_live(threshold);
        if was_live != price.is_live {
            info!(
                "fixed interval price {} is now {} (active {}, next {})",
                price.pair,
                if price.is_live { "live" } else { "invalid" },
                price.active_price,
                price.next_price
            );
        }
        storage.set_fixed_interval_price(&price)?;
        updated += 1;
    }

    metrics::counter!("tessera_price_updates").increment(updated as u64);
    Ok(updated)
}

/// Reads the active or next price of a pair for vault evaluation.
pub fn get_price<S: Storage>(
    storage: &S,
    token_id: TokenId,
    pair: &CurrencyPair,
    use_next: bool,
) -> Result<Amount, BlockchainError> {
    attributes::ensure_unlocked(storage, token_id)?;
    if is_pegged(pair) {
        return Ok(COIN);
    }

    let price = storage
        .get_fixed_interval_price(pair)?
        .ok_or_else(|| BlockchainError::PriceNotFound(pair.clone()))?;
    if !price.is_live {
        return Err(BlockchainError::PriceInvalid(pair.clone()));
    }
    Ok(if use_next {
        price.next_price
    } else {
        price.active_price
    })
}

// Oracle ids are the hash of the appointing transaction
pub fn oracle_id(tx_hash: &Hash) -> OracleId {
    *tx_hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::prelude::*;
    use crate::{config::ChainParams, core::{error::ErrorKind, storage::ChainStore}};
    use std::collections::{BTreeMap, BTreeSet};
    use tessera_common::script::Script;

    fn appoint(store: &mut ChainStore<crate::core::storage::MemoryBackend>, seed: u8, weight: u8) -> OracleId {
        let id = Hash::new([seed; 32]);
        let pairs: BTreeSet<CurrencyPair> = [CurrencyPair::usd("TSLA")].into_iter().collect();
        let message = AppointOracleMessage {
            owner: Script::p2pkh([seed; 20]),
            weightage: weight,
            pairs,
        };
        appoint_oracle(store, &id, &message).unwrap();
        id
    }

    fn prices(value: Amount) -> TokenPrices {
        let mut currencies = BTreeMap::new();
        currencies.insert("USD".to_owned(), value);
        let mut prices = BTreeMap::new();
        prices.insert("TSLA".to_owned(), currencies);
        prices
    }

    #[test]
    fn test_weighted_median() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 1, 1_000);
        let a = appoint(&mut store, 1, 10);
        let b = appoint(&mut store, 2, 10);
        let c = appoint(&mut store, 3, 30);
        set_oracle_data(&mut store, &ctx, &a, 1_000, &prices(10 * COIN)).unwrap();
        set_oracle_data(&mut store, &ctx, &b, 1_000, &prices(11 * COIN)).unwrap();
        set_oracle_data(&mut store, &ctx, &c, 1_000, &prices(12 * COIN)).unwrap();

        let pair = CurrencyPair::usd("TSLA");
        assert_eq!(aggregate_price(&store, &pair, 1_000).unwrap(), 12 * COIN);

        // expired submissions are ignored
        let err = aggregate_price(&store, &pair, 1_000 + ORACLE_PRICE_EXPIRY_SECONDS + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PriceInvalid);
    }

    #[test]
    fn test_submission_checks() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 1, 1_000);
        let id = appoint(&mut store, 1, 10);

        let err = set_oracle_data(&mut store, &ctx, &id, 1_000 + 301, &prices(COIN)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let mut other = BTreeMap::new();
        other.insert("BTC".to_owned(), prices(COIN).remove("TSLA").unwrap());
        let err = set_oracle_data(&mut store, &ctx, &id, 1_000, &other).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let err = appoint_oracle(
            &mut store,
            &id,
            &AppointOracleMessage {
                owner: Script::empty(),
                weightage: 1,
                pairs: BTreeSet::new(),
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_deviation_invalidates_for_one_interval() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let id = appoint(&mut store, 1, 10);
        let pair = CurrencyPair::usd("TSLA");

        let ctx = BlockContext::new(&params, 1, 1_000);
        set_oracle_data(&mut store, &ctx, &id, 1_000, &prices(15 * COIN)).unwrap();
        ensure_fixed_interval_price(&mut store, &ctx, &pair).unwrap();
        assert_eq!(get_price(&store, 1, &pair, false).unwrap(), 15 * COIN);

        let ctx = BlockContext::new(&params, 5, 1_100);
        set_oracle_data(&mut store, &ctx, &id, 1_100, &prices(30 * COIN)).unwrap();
        // not an interval block
        assert_eq!(tick(&mut store, &ctx).unwrap(), 0);

        let ctx = BlockContext::new(&params, 6, 1_200);
        assert_eq!(tick(&mut store, &ctx).unwrap(), 1);
        let err = get_price(&store, 1, &pair, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PriceInvalid);

        let ctx = BlockContext::new(&params, 12, 1_300);
        tick(&mut store, &ctx).unwrap();
        assert_eq!(get_price(&store, 1, &pair, false).unwrap(), 30 * COIN);
        assert_eq!(get_price(&store, 1, &pair, true).unwrap(), 30 * COIN);
    }

    #[test]
    fn test_pegged_pair() {
        let store = ChainStore::in_memory();
        let pair = CurrencyPair::usd(DUSD_SYMBOL);
        assert_eq!(aggregate_price(&store, &pair, 0).unwrap(), COIN);
        assert_eq!(get_price(&store, 5, &pair, true).unwrap(), COIN);
    }
}
