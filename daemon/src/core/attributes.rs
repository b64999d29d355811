// Attribute store
//
// Governance variables are stored by path. This module validates writes
// coming from setgov and setgovheight, exposes typed reads to the other
// engines and applies everything that was scheduled for a height, token
// splits included.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use log::{debug, info, warn};
use tessera_common::{
    amount::{safe_add, Amount, Balances, TokenAmount, TokenId},
    attributes::{
        AttributeKey, AttributeValue, Feature, GovAttribute, LiveAttribute, TokenAttribute,
        TransferDirection, TransferDomainAttribute,
    },
    dex::FeeDirection,
    script::AddressFormat,
    transaction::GovVariables,
};

use super::{
    accounts,
    context::BlockContext,
    dex,
    error::BlockchainError,
    hard_fork::HardFork,
    loans,
    storage::Storage,
};

pub fn get_bool<S: Storage>(storage: &S, key: &AttributeKey, default: bool) -> Result<bool, BlockchainError> {
    Ok(match storage.get_attribute(key)? {
        Some(AttributeValue::Bool(value)) => value,
        _ => default,
    })
}

// Percent or amount values, both are 8 decimal fixed point
pub fn get_amount<S: Storage>(storage: &S, key: &AttributeKey) -> Result<Option<Amount>, BlockchainError> {
    Ok(match storage.get_attribute(key)? {
        Some(AttributeValue::Percent(value)) | Some(AttributeValue::Amount(value)) => Some(value),
        _ => None,
    })
}

pub fn get_integer<S: Storage>(storage: &S, key: &AttributeKey) -> Result<Option<u64>, BlockchainError> {
    Ok(match storage.get_attribute(key)? {
        Some(AttributeValue::Integer(value)) => Some(value),
        _ => None,
    })
}

pub fn get_direction<S: Storage>(storage: &S, key: &AttributeKey) -> Result<FeeDirection, BlockchainError> {
    Ok(match storage.get_attribute(key)? {
        Some(AttributeValue::Direction(value)) => value,
        _ => FeeDirection::Both,
    })
}

pub fn get_formats<S: Storage>(
    storage: &S,
    key: &AttributeKey,
) -> Result<Option<BTreeSet<AddressFormat>>, BlockchainError> {
    Ok(match storage.get_attribute(key)? {
        Some(AttributeValue::Formats(value)) => Some(value),
        _ => None,
    })
}

pub fn is_feature_enabled<S: Storage>(storage: &S, feature: Feature) -> Result<bool, BlockchainError> {
    get_bool(storage, &AttributeKey::Feature(feature), false)
}

pub fn ensure_feature<S: Storage>(storage: &S, feature: Feature) -> Result<(), BlockchainError> {
    if !is_feature_enabled(storage, feature)? {
        return Err(BlockchainError::FeatureDisabled(format!("Feature {}", feature)));
    }
    Ok(())
}

pub fn is_token_locked<S: Storage>(storage: &S, token_id: TokenId) -> Result<bool, BlockchainError> {
    get_bool(storage, &AttributeKey::TokenLock(token_id), false)
}

pub fn ensure_unlocked<S: Storage>(storage: &S, token_id: TokenId) -> Result<(), BlockchainError> {
    if is_token_locked(storage, token_id)? {
        return Err(BlockchainError::TokenLocked(token_id));
    }
    Ok(())
}

// Governance parameters, overridable through v0/gov/proposals
pub fn gov_amount<S: Storage>(storage: &S, attr: GovAttribute, default: Amount) -> Result<Amount, BlockchainError> {
    Ok(get_amount(storage, &AttributeKey::Gov(attr))?.unwrap_or(default))
}

pub fn gov_integer<S: Storage>(storage: &S, attr: GovAttribute, default: u64) -> Result<u64, BlockchainError> {
    Ok(get_integer(storage, &AttributeKey::Gov(attr))?.unwrap_or(default))
}

pub fn get_live<S: Storage>(storage: &S, attr: LiveAttribute) -> Result<Balances, BlockchainError> {
    Ok(match storage.get_attribute(&AttributeKey::Live(attr))? {
        Some(AttributeValue::Balances(value)) => value,
        _ => Balances::new(),
    })
}

/// Adds to a read-only accounting entry under `v0/live/economy`.
pub fn add_live<S: Storage>(storage: &mut S, attr: LiveAttribute, value: TokenAmount) -> Result<(), BlockchainError> {
    if value.amount == 0 {
        return Ok(());
    }
    let mut balances = get_live(storage, attr)?;
    balances.add(value)?;
    storage.set_attribute(&AttributeKey::Live(attr), &AttributeValue::Balances(balances))
}

// Transfer domain settings fall back to the bridge defaults
pub fn transfer_domain_formats<S: Storage>(
    storage: &S,
    direction: TransferDirection,
    attr: TransferDomainAttribute,
) -> Result<BTreeSet<AddressFormat>, BlockchainError> {
    let key = AttributeKey::TransferDomain(direction, attr);
    if let Some(formats) = get_formats(storage, &key)? {
        return Ok(formats);
    }

    let native: BTreeSet<AddressFormat> = [AddressFormat::P2pkh, AddressFormat::Bech32].into_iter().collect();
    let evm: BTreeSet<AddressFormat> = [AddressFormat::Erc55].into_iter().collect();
    Ok(match (direction, attr) {
        (TransferDirection::DvmToEvm, TransferDomainAttribute::DestFormats)
        | (TransferDirection::EvmToDvm, TransferDomainAttribute::SrcFormats) => evm,
        (TransferDirection::EvmToDvm, TransferDomainAttribute::AuthFormats) => {
            native.into_iter().chain(evm).collect()
        }
        _ => native,
    })
}

// Fork that introduced a key, writes before it are rejected
fn required_fork(key: &AttributeKey) -> HardFork {
    match key {
        AttributeKey::Feature(feature) => match feature {
            Feature::Evm | Feature::TransferDomain => HardFork::Metachain,
            Feature::Gov | Feature::GovPayout | Feature::Dfip2211d | Feature::Dfip2211f => HardFork::GrandCentral,
            Feature::Dfip2201 => HardFork::FortCanningHill,
            Feature::Dfip2203 => HardFork::FortCanningRoad,
            Feature::Dfip2206a => HardFork::FortCanningEpilogue,
        },
        AttributeKey::LpSplit(_) | AttributeKey::PoolPair(_, _) => HardFork::FortCanningHill,
        AttributeKey::Token(_, attr) => match attr {
            TokenAttribute::PaybackDfi | TokenAttribute::PaybackDfiFeePct => HardFork::FortCanningHill,
            _ => HardFork::FortCanningRoad,
        },
        AttributeKey::TokenLock(_) | AttributeKey::OracleSplits(_) => HardFork::FortCanningCrunch,
        AttributeKey::Gov(_) => HardFork::GrandCentral,
        AttributeKey::TransferDomain(_, _) => HardFork::Metachain,
        AttributeKey::Live(_) => HardFork::FortCanningHill,
    }
}

fn ensure_loan_token<S: Storage>(storage: &S, token_id: TokenId) -> Result<(), BlockchainError> {
    if storage.get_loan_token(token_id)?.is_none() {
        return Err(BlockchainError::LoanTokenNotFound(token_id));
    }
    Ok(())
}

// Checks the entities a key refers to
fn validate_entry<S: Storage>(
    storage: &S,
    ctx: &BlockContext,
    key: &AttributeKey,
    value: &AttributeValue,
) -> Result<(), BlockchainError> {
    match key {
        AttributeKey::LpSplit(pool_id) | AttributeKey::PoolPair(pool_id, _) => {
            storage.get_pool_or_err(*pool_id)?;
        }
        AttributeKey::Token(token_id, attr) => {
            storage.get_token_or_err(*token_id)?;
            match attr {
                TokenAttribute::PaybackDfi | TokenAttribute::PaybackDfiFeePct => {
                    ensure_loan_token(storage, *token_id)?;
                }
                TokenAttribute::LoanPayback(other) | TokenAttribute::LoanPaybackFeePct(other) => {
                    ensure_loan_token(storage, *token_id)?;
                    storage.get_token_or_err(*other)?;
                }
                TokenAttribute::DexInFeePct | TokenAttribute::DexOutFeePct => {}
            }
        }
        AttributeKey::TokenLock(token_id) => {
            storage.get_token_or_err(*token_id)?;
        }
        AttributeKey::OracleSplits(height) => {
            if *height < ctx.height {
                return Err(BlockchainError::InvalidParameter(format!(
                    "Token split height {} is below the current height {}",
                    height, ctx.height
                )));
            }
            if let AttributeValue::Splits(splits) = value {
                for (token_id, multiplier) in splits {
                    ensure_loan_token(storage, *token_id)?;
                    // the whole supply has to fit once scaled
                    let token = storage.get_token_or_err(*token_id)?;
                    scale(token.minted, *multiplier)?;
                }
            }
        }
        AttributeKey::Gov(GovAttribute::VotingPeriod) | AttributeKey::Gov(GovAttribute::VocEmergencyPeriod) => {
            if value == &AttributeValue::Integer(0) {
                return Err(BlockchainError::InvalidParameter("Voting period cannot be zero".to_owned()));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Parses and validates a set of `path -> value` pairs against the state at
/// the given height. Nothing is written.
pub fn parse_variables<S: Storage>(
    storage: &S,
    ctx: &BlockContext,
    variables: &GovVariables,
) -> Result<Vec<(AttributeKey, AttributeValue)>, BlockchainError> {
    if variables.is_empty() {
        return Err(BlockchainError::InvalidParameter("No variables to set".to_owned()));
    }

    let mut entries = Vec::with_capacity(variables.len());
    for (path, raw) in variables {
        let key = AttributeKey::from_str(path)?;
        let fork = required_fork(&key);
        if !ctx.is_active(fork) {
            return Err(BlockchainError::ForkNotActive(fork));
        }
        let value = key.parse_value(raw)?;
        validate_entry(storage, ctx, &key, &value)?;
        entries.push((key, value));
    }
    Ok(entries)
}

/// Immediate governance write.
pub fn set_gov<S: Storage>(storage: &mut S, ctx: &BlockContext, variables: &GovVariables) -> Result<(), BlockchainError> {
    for (key, value) in parse_variables(storage, ctx, variables)? {
        debug!("setgov {} = {} at height {}", key, value, ctx.height);
        storage.set_attribute(&key, &value)?;
    }
    Ok(())
}

/// Governance write activated at `start_height`.
pub fn set_gov_height<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    variables: &GovVariables,
    start_height: u32,
) -> Result<(), BlockchainError> {
    if start_height <= ctx.height {
        return Err(BlockchainError::InvalidParameter(format!(
            "Activation height {} must be above the current height {}",
            start_height, ctx.height
        )));
    }

    for (key, value) in parse_variables(storage, ctx, variables)? {
        debug!("setgovheight {} = {} at height {}", key, value, start_height);
        storage.schedule_attribute(start_height, &key, &value)?;
    }
    Ok(())
}

pub fn erase<S: Storage>(storage: &mut S, ctx: &BlockContext, path: &str) -> Result<(), BlockchainError> {
    let key = AttributeKey::from_str(path)?;
    if key.is_read_only() {
        return Err(tessera_common::attributes::AttributeError::ReadOnly(path.to_owned()).into());
    }
    let fork = required_fork(&key);
    if !ctx.is_active(fork) {
        return Err(BlockchainError::ForkNotActive(fork));
    }
    storage.remove_attribute(&key)
}

/// Runs every activation due at the block height: scheduled attributes,
/// scheduled loan scheme changes, then token splits.
pub fn apply_scheduled<S: Storage>(storage: &mut S, ctx: &BlockContext) -> Result<(), BlockchainError> {
    for (key, value) in storage.take_scheduled_attributes(ctx.height)? {
        info!("activating {} = {} at height {}", key, value, ctx.height);
        storage.set_attribute(&key, &value)?;
    }

    for change in storage.take_scheme_changes(ctx.height)? {
        storage.start_snapshot()?;
        match loans::apply_scheme_change(storage, ctx, &change) {
            Ok(()) => storage.end_snapshot(true)?,
            Err(e) => {
                warn!("skipping scheme change of {} at height {}: {}", change.identifier(), ctx.height, e);
                storage.end_snapshot(false)?;
            }
        }
    }

    if let Some(AttributeValue::Splits(splits)) = storage.get_attribute(&AttributeKey::OracleSplits(ctx.height))? {
        for (token_id, multiplier) in splits {
            // a split that cannot be applied leaves the token untouched
            storage.start_snapshot()?;
            match split_token(storage, ctx, token_id, multiplier) {
                Ok(()) => storage.end_snapshot(true)?,
                Err(e) => {
                    warn!("skipping split of token {} by {} at height {}: {}", token_id, multiplier, ctx.height, e);
                    storage.end_snapshot(false)?;
                }
            }
        }
    }
    Ok(())
}

// Scales a holding, returns the new value and the truncated remainder
fn scale(value: Amount, multiplier: i32) -> Result<(Amount, Amount), BlockchainError> {
    if multiplier > 0 {
        let scaled = value as i128 * multiplier as i128;
        if scaled > i64::MAX as i128 {
            return Err(tessera_common::amount::AmountError::OutOfRange(scaled).into());
        }
        Ok((scaled as Amount, 0))
    } else {
        let divisor = multiplier.unsigned_abs() as Amount;
        Ok((value / divisor, value % divisor))
    }
}

fn scale_high_precision(value: u128, multiplier: i32) -> u128 {
    if multiplier > 0 {
        value.saturating_mul(multiplier as u128)
    } else {
        value / multiplier.unsigned_abs() as u128
    }
}

fn scale_balances(
    balances: &mut Balances,
    token_id: TokenId,
    multiplier: i32,
    remainder: &mut Amount,
) -> Result<(), BlockchainError> {
    let (scaled, rest) = scale(balances.get(token_id), multiplier)?;
    balances.set(token_id, scaled);
    *remainder = safe_add(*remainder, rest)?;
    Ok(())
}

/// Multiplies (or divides, for a negative multiplier) every holding of a
/// token in place. Truncated units are merged into the rewards of the first
/// pool trading the token, or burnt when no such pool has liquidity.
pub fn split_token<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    token_id: TokenId,
    multiplier: i32,
) -> Result<(), BlockchainError> {
    let mut token = storage.get_token_or_err(token_id)?;
    info!("splitting token {} by {} at height {}", token.symbol, multiplier, ctx.height);
    let mut remainder: Amount = 0;

    // settle rewards paid in this token so that checkpoints can follow the new scale
    let pools = storage.list_pools()?;
    let mut settled: BTreeMap<TokenId, Vec<tessera_common::script::Script>> = BTreeMap::new();
    for (pool_id, pool) in pools.iter() {
        if pool.reward_per_share.contains_key(&token_id) {
            let holders: Vec<_> = storage.get_token_holders(*pool_id)?.into_iter().map(|(owner, _)| owner).collect();
            for owner in holders.iter() {
                dex::claim_rewards(storage, *pool_id, owner)?;
            }
            settled.insert(*pool_id, holders);
        }
    }

    for (owner, amount) in storage.get_token_holders(token_id)? {
        let (scaled, rest) = scale(amount, multiplier)?;
        remainder = safe_add(remainder, rest)?;
        storage.set_balance(&owner, token_id, scaled)?;
    }

    for (pool_id, mut pool) in storage.list_pools()? {
        let mut changed = false;
        if pool.token_a == token_id {
            let (scaled, rest) = scale(pool.reserve_a, multiplier)?;
            pool.reserve_a = scaled;
            remainder = safe_add(remainder, rest)?;
            changed = true;
        }
        if pool.token_b == token_id {
            let (scaled, rest) = scale(pool.reserve_b, multiplier)?;
            pool.reserve_b = scaled;
            remainder = safe_add(remainder, rest)?;
            changed = true;
        }
        if pool.reward_escrow.get(token_id) != 0 {
            scale_balances(&mut pool.reward_escrow, token_id, multiplier, &mut remainder)?;
            changed = true;
        }
        if let Some(per_share) = pool.reward_per_share.get_mut(&token_id) {
            *per_share = scale_high_precision(*per_share, multiplier);
            changed = true;
        }
        if changed {
            storage.set_pool(pool_id, &pool)?;
        }
        if let Some(holders) = settled.get(&pool_id) {
            let checkpoint = tessera_common::dex::RewardCheckpoint(pool.reward_per_share.clone());
            for owner in holders {
                storage.set_reward_checkpoint(pool_id, owner, &checkpoint)?;
            }
        }
    }

    for (vault_id, _) in storage.list_vaults()? {
        let mut collateral = storage.get_vault_collateral(&vault_id)?;
        if collateral.get(token_id) != 0 {
            scale_balances(&mut collateral, token_id, multiplier, &mut remainder)?;
            storage.set_vault_collateral(&vault_id, &collateral)?;
        }

        let mut loans = storage.get_vault_loans(&vault_id)?;
        if loans.get(token_id) != 0 {
            // debt is not part of the supply, its remainder is simply dropped
            let mut ignored = 0;
            scale_balances(&mut loans, token_id, multiplier, &mut ignored)?;
            storage.set_vault_loans(&vault_id, &loans)?;
        }
        if let Some(mut rate) = storage.get_interest_rate(&vault_id, token_id)? {
            rate.interest_per_block = scale_high_precision(rate.interest_per_block, multiplier);
            rate.interest_to_height = scale_high_precision(rate.interest_to_height, multiplier);
            storage.set_interest_rate(&vault_id, token_id, &rate)?;
        }
    }

    for (vault_id, auction) in storage.list_auctions()? {
        for index in 0..auction.batch_count {
            let mut batch = match storage.get_auction_batch(&vault_id, index)? {
                Some(batch) => batch,
                None => continue,
            };
            scale_balances(&mut batch.collaterals, token_id, multiplier, &mut remainder)?;
            if batch.loan_amount.token_id == token_id {
                batch.loan_amount.amount = scale(batch.loan_amount.amount, multiplier)?.0;
                batch.loan_interest = scale(batch.loan_interest, multiplier)?.0;
                let last = batch.bids.len().saturating_sub(1);
                for (i, bid) in batch.bids.iter_mut().enumerate() {
                    let (scaled, rest) = scale(bid.amount.amount, multiplier)?;
                    bid.amount.amount = scaled;
                    // only the highest bid is escrowed
                    if i == last {
                        remainder = safe_add(remainder, rest)?;
                    }
                }
            }
            storage.set_auction_batch(&vault_id, index, &batch)?;
        }
    }

    for (address, id, amount) in storage.list_evm_balances()? {
        if id == token_id {
            let (scaled, rest) = scale(amount, multiplier)?;
            remainder = safe_add(remainder, rest)?;
            storage.set_evm_balance(&address, token_id, scaled)?;
        }
    }

    for mut price in storage.list_fixed_interval_prices()? {
        if price.pair.token == token.symbol {
            // prices move opposite to the supply
            let inverse = -multiplier;
            price.active_price = scale(price.active_price, inverse)?.0;
            price.next_price = scale(price.next_price, inverse)?.0;
            storage.set_fixed_interval_price(&price)?;
        }
    }

    // whole units recovered from the truncated remainders
    let dust = if multiplier < 0 {
        remainder / multiplier.unsigned_abs() as Amount
    } else {
        0
    };
    if dust > 0 {
        let value = TokenAmount::new(token_id, dust);
        let target = storage
            .list_pools()?
            .into_iter()
            .find(|(_, pool)| pool.contains(token_id) && pool.total_liquidity > 0);
        match target {
            Some((pool_id, mut pool)) => {
                dex::add_pool_reward(&mut pool, value)?;
                storage.set_pool(pool_id, &pool)?;
            }
            None => storage.add_balance(ctx.burn_address(), value)?,
        }
        add_live(storage, LiveAttribute::SplitDust, value)?;
    }

    token.minted = accounts::audit_supply(storage)?
        .get(&token_id)
        .map_or(0, |audit| audit.held);
    storage.set_token(token_id, &token)?;

    if dust > 0 {
        warn!("token split of {} left {} units of dust", token.symbol, dust);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::prelude::*;
    use crate::{
        config::ChainParams,
        core::{error::ErrorKind, storage::ChainStore},
    };
    use tessera_common::{
        amount::COIN,
        crypto::Hash,
        loan::LoanTokenInfo,
        oracle::CurrencyPair,
        script::Script,
        token::Token,
    };

    fn variables(entries: &[(&str, &str)]) -> GovVariables {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn token(symbol: &str) -> Token {
        Token {
            symbol: symbol.to_owned(),
            name: symbol.to_owned(),
            decimal: 8,
            limit: 0,
            flags: 0x07,
            minted: 0,
            creation_tx: Hash::zero(),
            creation_height: 0,
            owner: Script::empty(),
        }
    }

    #[test]
    fn test_set_gov_and_typed_reads() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 10, 0);
        set_gov(
            &mut store,
            &ctx,
            &variables(&[("v0/params/feature/evm", "true"), ("v0/gov/proposals/quorum", "0.5")]),
        )
        .unwrap();

        assert!(is_feature_enabled(&store, Feature::Evm).unwrap());
        assert!(!is_feature_enabled(&store, Feature::Gov).unwrap());
        assert_eq!(gov_amount(&store, GovAttribute::Quorum, 1).unwrap(), 50_000_000);
    }

    #[test]
    fn test_set_gov_failures() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest().with_fork(HardFork::Metachain, 100);
        let ctx = BlockContext::new(&params, 10, 0);

        let err = set_gov(&mut store, &ctx, &variables(&[("v0/params/nope", "true")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let err = set_gov(&mut store, &ctx, &variables(&[("v0/params/feature/evm", "yes")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForkNotActive);

        let err = set_gov(&mut store, &ctx, &variables(&[("v0/gov/proposals/quorum", "abc")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let err = set_gov(&mut store, &ctx, &variables(&[("v0/live/economy/dexfeetokens", "1")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        // referenced token does not exist
        let err = set_gov(&mut store, &ctx, &variables(&[("v0/locks/token/5", "true")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_scheduled_activation() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 10, 0);
        let vars = variables(&[("v0/params/feature/gov", "true")]);

        assert!(set_gov_height(&mut store, &ctx, &vars, 10).is_err());
        set_gov_height(&mut store, &ctx, &vars, 12).unwrap();
        assert!(!is_feature_enabled(&store, Feature::Gov).unwrap());

        apply_scheduled(&mut store, &BlockContext::new(&params, 11, 0)).unwrap();
        assert!(!is_feature_enabled(&store, Feature::Gov).unwrap());

        apply_scheduled(&mut store, &BlockContext::new(&params, 12, 0)).unwrap();
        assert!(is_feature_enabled(&store, Feature::Gov).unwrap());
        assert!(store.list_scheduled_attributes().unwrap().is_empty());
    }

    #[test]
    fn test_token_lock() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 10, 0);
        store.set_token(1, &token("BTC")).unwrap();
        assert!(ensure_unlocked(&store, 1).is_ok());

        set_gov(&mut store, &ctx, &variables(&[("v0/locks/token/1", "true")])).unwrap();
        assert_eq!(ensure_unlocked(&store, 1).unwrap_err().kind(), ErrorKind::TokenLocked);
        erase(&mut store, &ctx, "v0/locks/token/1").unwrap();
        assert!(ensure_unlocked(&store, 1).is_ok());
    }

    #[test]
    fn test_reverse_split_merges_dust() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 10, 0);
        let mut tsla = token("TSLA");
        tsla.minted = 25;
        store.set_token(1, &tsla).unwrap();
        let alice = Script::p2pkh([1; 20]);
        let bob = Script::p2pkh([2; 20]);
        store.add_balance(&alice, TokenAmount::new(1, 13)).unwrap();
        store.add_balance(&bob, TokenAmount::new(1, 12)).unwrap();

        split_token(&mut store, &ctx, 1, -3).unwrap();

        assert_eq!(store.get_balance(&alice, 1).unwrap(), 4);
        assert_eq!(store.get_balance(&bob, 1).unwrap(), 4);
        // 1 + 0 truncated units do not make a whole new unit
        assert_eq!(get_live(&store, LiveAttribute::SplitDust).unwrap().get(1), 0);
        assert_eq!(store.get_token_or_err(1).unwrap().minted, 8);

        split_token(&mut store, &ctx, 1, 2).unwrap();
        assert_eq!(store.get_balance(&alice, 1).unwrap(), 8);
        assert_eq!(store.get_token_or_err(1).unwrap().minted, 16);
    }

    fn loan_token(store: &mut ChainStore<crate::core::storage::MemoryBackend>, id: TokenId, symbol: &str) {
        store
            .set_loan_token(&LoanTokenInfo {
                token_id: id,
                fixed_interval_price_id: CurrencyPair::usd(symbol),
                mintable: true,
                interest: 0,
                creation_tx: Hash::zero(),
                creation_height: 0,
            })
            .unwrap();
    }

    #[test]
    fn test_split_overflow() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 10, 0);
        let mut tsla = token("TSLA");
        tsla.minted = 100 * COIN;
        store.set_token(1, &tsla).unwrap();
        loan_token(&mut store, 1, "TSLA");
        let alice = Script::p2pkh([1; 20]);
        store.add_balance(&alice, TokenAmount::new(1, 100 * COIN)).unwrap();

        let err = set_gov(&mut store, &ctx, &variables(&[("v0/oracles/splits/20", "1/1000000000")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmountOutOfRange);
        set_gov(&mut store, &ctx, &variables(&[("v0/oracles/splits/20", "1/2")])).unwrap();

        // supply grown past the bound after the split was accepted
        let splits = AttributeValue::Splits(BTreeMap::from([(1, 1_000_000_000)]));
        store.set_attribute(&AttributeKey::OracleSplits(21), &splits).unwrap();
        apply_scheduled(&mut store, &BlockContext::new(&params, 21, 0)).unwrap();
        assert_eq!(store.get_balance(&alice, 1).unwrap(), 100 * COIN);
        assert_eq!(store.get_token_or_err(1).unwrap().minted, 100 * COIN);
        assert!(!store.has_snapshot());
    }
}
