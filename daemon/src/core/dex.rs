// AMM pool engine
//
// Constant product pools with commission, per side dex fees and a reward
// per share accumulator. Swaps may cross up to three pools, either along a
// path supplied by the caller or along the best path found by the engine.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, info, trace};
use primitive_types::U256;
use serde::Serialize;
use tessera_common::{
    amount::{safe_add, safe_sub, Amount, AmountError, Balances, TokenAmount, TokenId, COIN, HIGH_PRECISION_SCALER, NATIVE_TOKEN},
    attributes::{AttributeKey, AttributeValue, LiveAttribute, PoolAttribute, TokenAttribute},
    crypto::Hash,
    dex::{PoolPair, PoolPrice, RewardCheckpoint, ADD_LIQUIDITY_TOLERANCE, MAX_SWAP_HOPS, MINIMUM_LIQUIDITY},
    script::Script,
    token::{Token, MAX_POOL_PAIR_SYMBOL_LENGTH, TOKEN_FLAG_DAT, TOKEN_FLAG_FINALIZED, TOKEN_FLAG_LPS, TOKEN_FLAG_TRADEABLE},
    transaction::{AddPoolLiquidityMessage, CreatePoolPairMessage, PoolSwapMessage, RemovePoolLiquidityMessage, UpdatePoolPairMessage},
};

use super::{accounts, attributes, context::BlockContext, error::BlockchainError, storage::Storage};

/// How the engine picks the pools of a swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSelector {
    // Only the pool trading both tokens
    Direct,
    // Direct pool when it exists, best path otherwise
    Auto,
    // Best path among every candidate
    Composite,
    // Pools given by the caller, in order
    Explicit(Vec<TokenId>),
}

impl PathSelector {
    pub fn parse(value: &str) -> Result<Self, BlockchainError> {
        match value {
            "direct" => Ok(PathSelector::Direct),
            "auto" => Ok(PathSelector::Auto),
            "composite" => Ok(PathSelector::Composite),
            other => {
                let pools = other
                    .split(',')
                    .map(|id| id.trim().parse::<TokenId>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| BlockchainError::InvalidParameter(format!("Invalid swap path {}", value)))?;
                Ok(PathSelector::Explicit(pools))
            }
        }
    }
}

/// Outcome of one hop through a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HopQuote {
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount_in: Amount,
    pub commission: Amount,
    pub fee_in: Amount,
    pub fee_out: Amount,
    // Satoshi taken from the output reserve when the constant product division truncates
    pub rounding_burn: Amount,
    pub amount_out: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapOutcome {
    pub amount_out: Amount,
    pub pools: Vec<TokenId>,
    pub hops: Vec<HopQuote>,
}

// Fee fractions applied on the input and output side of a hop
#[derive(Debug, Clone, Copy, Default)]
struct HopFees {
    fee_in: Amount,
    fee_out: Amount,
}

fn pool_side_fee<S: Storage>(
    storage: &S,
    pool_id: TokenId,
    pool: &PoolPair,
    token_id: TokenId,
    input: bool,
) -> Result<Amount, BlockchainError> {
    let (pct, direction) = if token_id == pool.token_a {
        (PoolAttribute::TokenAFeePct, PoolAttribute::TokenAFeeDirection)
    } else {
        (PoolAttribute::TokenBFeePct, PoolAttribute::TokenBFeeDirection)
    };

    // pool level settings shadow the token level ones
    if let Some(value) = attributes::get_amount(storage, &AttributeKey::PoolPair(pool_id, pct))? {
        let direction = attributes::get_direction(storage, &AttributeKey::PoolPair(pool_id, direction))?;
        let applies = if input {
            direction.applies_in()
        } else {
            direction.applies_out()
        };
        return Ok(if applies { value } else { 0 });
    }

    let attr = if input {
        TokenAttribute::DexInFeePct
    } else {
        TokenAttribute::DexOutFeePct
    };
    Ok(attributes::get_amount(storage, &AttributeKey::Token(token_id, attr))?.unwrap_or(0))
}

fn hop_fees<S: Storage>(
    storage: &S,
    pool_id: TokenId,
    pool: &PoolPair,
    token_in: TokenId,
    token_out: TokenId,
) -> Result<HopFees, BlockchainError> {
    Ok(HopFees {
        fee_in: pool_side_fee(storage, pool_id, pool, token_in, true)?,
        fee_out: pool_side_fee(storage, pool_id, pool, token_out, false)?,
    })
}

fn fraction(amount: Amount, pct: Amount) -> Result<Amount, AmountError> {
    tessera_common::amount::mul_div(amount, pct, COIN)
}

// Constant product step, every division rounds toward zero. Both the swapper
// output and the kept reserve are truncated, the satoshi left between them is
// burnt.
fn quote_hop(pool: &PoolPair, token_in: TokenId, amount: Amount, fees: HopFees) -> Result<(HopQuote, PoolPair), BlockchainError> {
    if amount <= 0 {
        return Err(BlockchainError::InvalidAmount(amount));
    }
    let token_out = pool
        .other(token_in)
        .ok_or_else(|| BlockchainError::InvalidParameter(format!("Pool does not trade token {}", token_in)))?;

    let (reserve_in, reserve_out) = pool.reserves_from(token_in);
    if reserve_in <= 0 || reserve_out <= 0 {
        return Err(BlockchainError::InvalidState("Lack of liquidity".to_owned()));
    }

    let commission = fraction(amount, pool.commission)?;
    let after_commission = amount - commission;
    let fee_in = fraction(after_commission, fees.fee_in)?;
    let swapped_in = after_commission - fee_in;

    let new_reserve_in = safe_add(reserve_in, swapped_in)?;
    let product = reserve_out as i128 * swapped_in as i128;
    let out = (product / new_reserve_in as i128) as Amount;
    let rounding_burn = if product % new_reserve_in as i128 != 0 { 1 } else { 0 };
    let new_reserve_out = reserve_out - out - rounding_burn;
    if new_reserve_out <= 0 {
        return Err(BlockchainError::InvalidState("Lack of liquidity".to_owned()));
    }
    let fee_out = fraction(out, fees.fee_out)?;

    let mut next = pool.clone();
    if token_in == pool.token_a {
        next.reserve_a = new_reserve_in;
        next.reserve_b = new_reserve_out;
    } else {
        next.reserve_b = new_reserve_in;
        next.reserve_a = new_reserve_out;
    }

    Ok((
        HopQuote {
            token_in,
            token_out,
            amount_in: amount,
            commission,
            fee_in,
            fee_out,
            rounding_burn,
            amount_out: out - fee_out,
        },
        next,
    ))
}

// Quotes a whole path without touching the state
fn simulate_path<S: Storage>(
    storage: &S,
    pools: &[TokenId],
    token_from: TokenId,
    amount: Amount,
) -> Result<Vec<(TokenId, HopQuote, PoolPair)>, BlockchainError> {
    if pools.is_empty() {
        return Err(BlockchainError::InvalidParameter("Empty swap path".to_owned()));
    }
    if pools.len() > MAX_SWAP_HOPS {
        return Err(BlockchainError::TooManyHops(pools.len()));
    }

    let mut hops: Vec<(TokenId, HopQuote, PoolPair)> = Vec::with_capacity(pools.len());
    let mut token = token_from;
    let mut input = amount;
    for pool_id in pools {
        // a pool crossed twice is quoted from its state after the first hop
        let pool = match hops.iter().rev().find(|(id, _, _)| id == pool_id) {
            Some((_, _, pool)) => pool.clone(),
            None => storage.get_pool_or_err(*pool_id)?,
        };
        if !pool.status {
            return Err(BlockchainError::InvalidState(format!("Pool {} trading is turned off", pool_id)));
        }
        attributes::ensure_unlocked(storage, pool.token_a)?;
        attributes::ensure_unlocked(storage, pool.token_b)?;

        let token_out = pool
            .other(token)
            .ok_or_else(|| BlockchainError::InvalidParameter(format!("Pool {} does not trade token {}", pool_id, token)))?;
        let fees = hop_fees(storage, *pool_id, &pool, token, token_out)?;
        let (quote, next) = quote_hop(&pool, token, input, fees)?;
        if log::log_enabled!(log::Level::Trace) {
            trace!("hop through pool {}: {:?}", pool_id, quote);
        }
        token = token_out;
        input = quote.amount_out;
        hops.push((*pool_id, quote, next));
    }
    Ok(hops)
}

// Every simple path of at most MAX_SWAP_HOPS pools, shortest first
fn candidate_paths<S: Storage>(storage: &S, token_from: TokenId, token_to: TokenId) -> Result<Vec<Vec<TokenId>>, BlockchainError> {
    let mut graph: BTreeMap<TokenId, Vec<(TokenId, TokenId)>> = BTreeMap::new();
    for (pool_id, pool) in storage.list_pools()? {
        graph.entry(pool.token_a).or_default().push((pool_id, pool.token_b));
        graph.entry(pool.token_b).or_default().push((pool_id, pool.token_a));
    }

    let mut paths = Vec::new();
    let mut queue: VecDeque<(TokenId, Vec<TokenId>, Vec<TokenId>)> = VecDeque::new();
    queue.push_back((token_from, Vec::new(), vec![token_from]));
    while let Some((token, pools, visited)) = queue.pop_front() {
        if token == token_to && !pools.is_empty() {
            paths.push(pools);
            continue;
        }
        if pools.len() == MAX_SWAP_HOPS {
            continue;
        }
        for (pool_id, next) in graph.get(&token).into_iter().flatten() {
            if visited.contains(next) {
                continue;
            }
            let mut pools = pools.clone();
            pools.push(*pool_id);
            let mut visited = visited.clone();
            visited.push(*next);
            queue.push_back((*next, pools, visited));
        }
    }
    Ok(paths)
}

// Best path by simulated output, ties keep the shortest one
fn best_path<S: Storage>(
    storage: &S,
    token_from: TokenId,
    token_to: TokenId,
    amount: Amount,
) -> Result<Vec<TokenId>, BlockchainError> {
    let mut best: Option<(Amount, Vec<TokenId>)> = None;
    for path in candidate_paths(storage, token_from, token_to)? {
        let out = match simulate_path(storage, &path, token_from, amount) {
            Ok(hops) => hops.last().map_or(0, |(_, quote, _)| quote.amount_out),
            Err(e) => {
                trace!("skipping swap path {:?}: {}", path, e);
                continue;
            }
        };
        if best.as_ref().map_or(true, |(amount, _)| out > *amount) {
            best = Some((out, path));
        }
    }
    best.map(|(_, path)| path)
        .ok_or(BlockchainError::NoSwapPath(token_from, token_to))
}

/// Resolves the pools a swap goes through.
pub fn resolve_path<S: Storage>(
    storage: &S,
    token_from: TokenId,
    token_to: TokenId,
    amount: Amount,
    selector: &PathSelector,
) -> Result<Vec<TokenId>, BlockchainError> {
    if token_from == token_to {
        return Err(BlockchainError::InvalidParameter("Cannot swap a token for itself".to_owned()));
    }

    let direct = storage.get_pool_by_pair(token_from, token_to)?.map(|(id, _)| id);
    match selector {
        PathSelector::Direct => direct
            .map(|id| vec![id])
            .ok_or(BlockchainError::NoSwapPath(token_from, token_to)),
        PathSelector::Auto => match direct {
            Some(id) if simulate_path(storage, &[id], token_from, amount).is_ok() => Ok(vec![id]),
            _ => best_path(storage, token_from, token_to, amount),
        },
        PathSelector::Composite => best_path(storage, token_from, token_to, amount),
        PathSelector::Explicit(pools) => {
            if pools.len() > MAX_SWAP_HOPS {
                return Err(BlockchainError::TooManyHops(pools.len()));
            }
            Ok(pools.clone())
        }
    }
}

fn check_max_price(amount_in: Amount, amount_out: Amount, max_price: &PoolPrice, pools: &[TokenId]) -> Result<(), BlockchainError> {
    let Some(max) = max_price.as_amount() else {
        return Ok(());
    };
    // price of one unit of the output token in input tokens
    let too_high = amount_out <= 0 || (amount_in as i128 * COIN as i128 / amount_out as i128) > max as i128;
    if too_high {
        return Err(BlockchainError::PriceTooHigh(pools.to_vec()));
    }
    Ok(())
}

/// Quotes a swap without changing the state.
pub fn test_swap<S: Storage>(
    storage: &S,
    token_from: TokenId,
    amount: Amount,
    token_to: TokenId,
    selector: &PathSelector,
) -> Result<SwapOutcome, BlockchainError> {
    let pools = resolve_path(storage, token_from, token_to, amount, selector)?;
    let hops = simulate_path(storage, &pools, token_from, amount)?;
    let last = hops.last().map(|(_, quote, _)| *quote).ok_or(BlockchainError::NoSwapPath(token_from, token_to))?;
    if last.token_out != token_to {
        return Err(BlockchainError::InvalidParameter(format!(
            "Final swap should have output token {}, got {}",
            token_to, last.token_out
        )));
    }
    Ok(SwapOutcome {
        amount_out: last.amount_out,
        pools,
        hops: hops.into_iter().map(|(_, quote, _)| quote).collect(),
    })
}

/// Executes a direct or composite swap for `message.from`.
pub fn pool_swap<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    message: &PoolSwapMessage,
    selector: &PathSelector,
) -> Result<SwapOutcome, BlockchainError> {
    if message.amount_from <= 0 {
        return Err(BlockchainError::InvalidAmount(message.amount_from));
    }
    attributes::ensure_unlocked(storage, message.token_from)?;
    attributes::ensure_unlocked(storage, message.token_to)?;

    let outcome = test_swap(storage, message.token_from, message.amount_from, message.token_to, selector)?;
    check_max_price(message.amount_from, outcome.amount_out, &message.max_price, &outcome.pools)?;

    accounts::debit(storage, &message.from, TokenAmount::new(message.token_from, message.amount_from))?;

    for (pool_id, quote) in outcome.pools.iter().zip(outcome.hops.iter()) {
        let mut pool = storage.get_pool_or_err(*pool_id)?;
        let (reserve_in, reserve_out) = pool.reserves_from(quote.token_in);
        let swapped_in = quote.amount_in - quote.commission - quote.fee_in;
        let gross_out = quote.amount_out + quote.fee_out + quote.rounding_burn;
        let (reserve_in, reserve_out) = (safe_add(reserve_in, swapped_in)?, safe_sub(reserve_out, gross_out)?);
        if reserve_out <= 0 {
            return Err(BlockchainError::InvalidState("Lack of liquidity".to_owned()));
        }
        if quote.token_in == pool.token_a {
            pool.reserve_a = reserve_in;
            pool.reserve_b = reserve_out;
        } else {
            pool.reserve_b = reserve_in;
            pool.reserve_a = reserve_out;
        }
        if quote.commission > 0 {
            add_pool_reward(&mut pool, TokenAmount::new(quote.token_in, quote.commission))?;
        }
        storage.set_pool(*pool_id, &pool)?;

        accounts::credit_burn(storage, ctx, TokenAmount::new(quote.token_in, quote.fee_in), Some(LiveAttribute::DexFeeTokens))?;
        accounts::credit_burn(storage, ctx, TokenAmount::new(quote.token_out, quote.fee_out), Some(LiveAttribute::DexFeeTokens))?;
        accounts::credit_burn(
            storage,
            ctx,
            TokenAmount::new(quote.token_out, quote.rounding_burn),
            Some(LiveAttribute::DexFeeTokens),
        )?;
    }

    accounts::credit(storage, &message.to, TokenAmount::new(message.token_to, outcome.amount_out))?;
    metrics::counter!("tessera_pool_swaps", "hops" => outcome.pools.len().to_string()).increment(1);
    debug!(
        "swapped {} for {} through pools {:?}",
        TokenAmount::new(message.token_from, message.amount_from),
        TokenAmount::new(message.token_to, outcome.amount_out),
        outcome.pools
    );
    Ok(outcome)
}

/// Adds distributed rewards to a pool, credited pro rata to its shares.
pub fn add_pool_reward(pool: &mut PoolPair, value: TokenAmount) -> Result<(), BlockchainError> {
    if value.amount <= 0 {
        return Ok(());
    }
    if pool.total_liquidity <= 0 {
        return Err(BlockchainError::InvalidState("Cannot reward a pool without liquidity".to_owned()));
    }
    let increment = U256::from(value.amount as u64) * U256::from(HIGH_PRECISION_SCALER) / U256::from(pool.total_liquidity as u64);
    let increment = if increment > U256::from(u128::MAX) {
        u128::MAX
    } else {
        increment.as_u128()
    };
    let entry = pool.reward_per_share.entry(value.token_id).or_insert(0);
    *entry = entry.saturating_add(increment);
    pool.reward_escrow.add(value)?;
    Ok(())
}

fn owed_rewards(pool: &PoolPair, checkpoint: &RewardCheckpoint, share: Amount) -> Balances {
    if share <= 0 {
        return Balances::new();
    }
    pool.reward_per_share
        .iter()
        .filter_map(|(token_id, per_share)| {
            let paid = checkpoint.0.get(token_id).copied().unwrap_or(0);
            let diff = per_share.saturating_sub(paid);
            let owed = U256::from(diff) * U256::from(share as u64) / U256::from(HIGH_PRECISION_SCALER);
            let owed = if owed > U256::from(i64::MAX as u64) {
                i64::MAX
            } else {
                owed.low_u64() as Amount
            };
            // rounding never lets a claim exceed what is escrowed
            let owed = owed.min(pool.reward_escrow.get(*token_id));
            (owed > 0).then_some((*token_id, owed))
        })
        .collect()
}

/// Rewards a provider could claim right now.
pub fn pending_rewards<S: Storage>(storage: &S, pool_id: TokenId, owner: &Script) -> Result<Balances, BlockchainError> {
    let pool = storage.get_pool_or_err(pool_id)?;
    let checkpoint = storage.get_reward_checkpoint(pool_id, owner)?;
    let share = storage.get_balance(owner, pool_id)?;
    Ok(owed_rewards(&pool, &checkpoint, share))
}

/// Pays the pending rewards of a provider and moves its checkpoint to the
/// current accumulator. Must run before the provider's share changes.
pub fn claim_rewards<S: Storage>(storage: &mut S, pool_id: TokenId, owner: &Script) -> Result<Balances, BlockchainError> {
    let mut pool = storage.get_pool_or_err(pool_id)?;
    let checkpoint = storage.get_reward_checkpoint(pool_id, owner)?;
    if checkpoint.0 == pool.reward_per_share {
        return Ok(Balances::new());
    }

    let share = storage.get_balance(owner, pool_id)?;
    let owed = owed_rewards(&pool, &checkpoint, share);
    pool.reward_escrow.sub_all(&owed)?;
    storage.set_pool(pool_id, &pool)?;
    storage.set_reward_checkpoint(pool_id, owner, &RewardCheckpoint(pool.reward_per_share.clone()))?;

    if !owed.is_empty() {
        if log::log_enabled!(log::Level::Trace) {
            trace!("{} claims {:?} from pool {}", owner, owed, pool_id);
        }
        accounts::credit_all(storage, owner, &owed)?;
    }
    Ok(owed)
}

fn isqrt(value: u128) -> u128 {
    if value < 2 {
        return value;
    }
    let mut x = value;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    x
}

/// Provides liquidity from one or more accounts and mints pool shares.
pub fn add_liquidity<S: Storage>(storage: &mut S, message: &AddPoolLiquidityMessage) -> Result<Amount, BlockchainError> {
    let mut total = Balances::new();
    for balances in message.from.values() {
        total.add_all(balances)?;
    }
    let tokens: Vec<TokenId> = total.tokens().collect();
    if tokens.len() != 2 {
        return Err(BlockchainError::InvalidParameter(
            "Liquidity must be provided in exactly two tokens".to_owned(),
        ));
    }
    let (pool_id, mut pool) = storage
        .get_pool_by_pair(tokens[0], tokens[1])?
        .ok_or(BlockchainError::NoSwapPath(tokens[0], tokens[1]))?;
    attributes::ensure_unlocked(storage, pool.token_a)?;
    attributes::ensure_unlocked(storage, pool.token_b)?;

    let amount_a = total.get(pool.token_a);
    let amount_b = total.get(pool.token_b);
    if amount_a <= 0 || amount_b <= 0 {
        return Err(BlockchainError::InvalidAmount(amount_a.min(amount_b)));
    }

    let (liquidity, total_liquidity) = if pool.total_liquidity == 0 {
        let liquidity = isqrt(amount_a as u128 * amount_b as u128);
        if liquidity <= MINIMUM_LIQUIDITY as u128 || liquidity > i64::MAX as u128 {
            return Err(BlockchainError::InvalidAmount(liquidity.min(i64::MAX as u128) as Amount));
        }
        let liquidity = liquidity as Amount;
        // the first MINIMUM_LIQUIDITY shares are never minted
        (liquidity - MINIMUM_LIQUIDITY, liquidity)
    } else {
        let expected_b = tessera_common::amount::mul_div(amount_a, pool.reserve_b, pool.reserve_a)?;
        if (expected_b - amount_b).abs() > ADD_LIQUIDITY_TOLERANCE {
            return Err(BlockchainError::InvalidParameter(format!(
                "Amounts do not match the pool ratio, expected {} of token {} for {} of token {}",
                expected_b, pool.token_b, amount_a, pool.token_a
            )));
        }
        let liquidity_a = tessera_common::amount::mul_div(amount_a, pool.total_liquidity, pool.reserve_a)?;
        let liquidity_b = tessera_common::amount::mul_div(amount_b, pool.total_liquidity, pool.reserve_b)?;
        let liquidity = liquidity_a.min(liquidity_b);
        if liquidity <= 0 {
            return Err(BlockchainError::InvalidAmount(liquidity));
        }
        (liquidity, safe_add(pool.total_liquidity, liquidity)?)
    };

    for (owner, balances) in message.from.iter() {
        accounts::debit_all(storage, owner, balances)?;
    }

    pool.reserve_a = safe_add(pool.reserve_a, amount_a)?;
    pool.reserve_b = safe_add(pool.reserve_b, amount_b)?;
    pool.total_liquidity = total_liquidity;
    storage.set_pool(pool_id, &pool)?;

    accounts::mint(storage, &message.share_address, TokenAmount::new(pool_id, liquidity))?;
    debug!("added {} shares of pool {} for {}", liquidity, pool_id, message.share_address);
    Ok(liquidity)
}

/// Burns pool shares and returns the underlying tokens pro rata.
pub fn remove_liquidity<S: Storage>(storage: &mut S, message: &RemovePoolLiquidityMessage) -> Result<(Amount, Amount), BlockchainError> {
    let pool_id = message.amount.token_id;
    let liquidity = message.amount.amount;
    if liquidity <= 0 {
        return Err(BlockchainError::InvalidAmount(liquidity));
    }
    let pool = storage.get_pool_or_err(pool_id)?;
    attributes::ensure_unlocked(storage, pool.token_a)?;
    attributes::ensure_unlocked(storage, pool.token_b)?;

    accounts::debit(storage, &message.from, message.amount)?;
    accounts::destroy(storage, message.amount)?;

    // the claim above may have moved escrowed rewards
    let mut pool = storage.get_pool_or_err(pool_id)?;
    let amount_a = tessera_common::amount::mul_div(pool.reserve_a, liquidity, pool.total_liquidity)?;
    let amount_b = tessera_common::amount::mul_div(pool.reserve_b, liquidity, pool.total_liquidity)?;
    if amount_a <= 0 || amount_b <= 0 {
        return Err(BlockchainError::InvalidAmount(liquidity));
    }
    pool.total_liquidity = safe_sub(pool.total_liquidity, liquidity)?;
    if pool.total_liquidity < MINIMUM_LIQUIDITY {
        return Err(BlockchainError::InvalidState("Pool liquidity would drop below the locked minimum".to_owned()));
    }
    pool.reserve_a = safe_sub(pool.reserve_a, amount_a)?;
    pool.reserve_b = safe_sub(pool.reserve_b, amount_b)?;
    storage.set_pool(pool_id, &pool)?;

    accounts::credit(storage, &message.from, TokenAmount::new(pool.token_a, amount_a))?;
    accounts::credit(storage, &message.from, TokenAmount::new(pool.token_b, amount_b))?;
    Ok((amount_a, amount_b))
}

fn validate_commission(commission: Amount) -> Result<(), BlockchainError> {
    if !(0..COIN).contains(&commission) {
        return Err(BlockchainError::InvalidParameter(format!(
            "Commission {} must be a fraction below 1",
            commission
        )));
    }
    Ok(())
}

fn validate_custom_rewards<S: Storage>(storage: &S, rewards: &Balances) -> Result<(), BlockchainError> {
    for (token_id, amount) in rewards.iter() {
        storage.get_token_or_err(token_id)?;
        if amount <= 0 {
            return Err(BlockchainError::InvalidAmount(amount));
        }
    }
    Ok(())
}

/// Creates a pool and its share token. Returns the id of both.
pub fn create_pool_pair<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    tx_hash: &Hash,
    message: &CreatePoolPairMessage,
) -> Result<TokenId, BlockchainError> {
    if message.token_a == message.token_b {
        return Err(BlockchainError::InvalidParameter("Pool tokens must differ".to_owned()));
    }
    let token_a = storage.get_token_or_err(message.token_a)?;
    let token_b = storage.get_token_or_err(message.token_b)?;
    validate_commission(message.commission)?;
    validate_custom_rewards(storage, &message.custom_rewards)?;
    if storage.get_pool_by_pair(message.token_a, message.token_b)?.is_some() {
        return Err(BlockchainError::PoolExists(message.token_a, message.token_b));
    }

    let symbol = if message.pair_symbol.is_empty() {
        format!(
            "{}-{}",
            token_a.display_symbol(message.token_a),
            token_b.display_symbol(message.token_b)
        )
    } else {
        message.pair_symbol.clone()
    };
    let symbol: String = symbol.chars().take(MAX_POOL_PAIR_SYMBOL_LENGTH).collect();
    if storage.get_token_by_symbol(&symbol)?.is_some() {
        return Err(BlockchainError::TokenExists(symbol));
    }

    let pool_id = storage.next_token_id(true)?;
    let share = Token {
        name: format!("{} liquidity token", symbol),
        symbol,
        decimal: 8,
        limit: 0,
        flags: TOKEN_FLAG_DAT | TOKEN_FLAG_LPS | TOKEN_FLAG_TRADEABLE | TOKEN_FLAG_FINALIZED,
        minted: 0,
        creation_tx: *tx_hash,
        creation_height: ctx.height,
        owner: message.owner.clone(),
    };
    storage.set_token(pool_id, &share)?;

    let pool = PoolPair {
        token_a: message.token_a,
        token_b: message.token_b,
        reserve_a: 0,
        reserve_b: 0,
        total_liquidity: 0,
        commission: message.commission,
        status: message.status,
        owner: message.owner.clone(),
        creation_tx: *tx_hash,
        creation_height: ctx.height,
        custom_rewards: message.custom_rewards.clone(),
        reward_per_share: BTreeMap::new(),
        reward_escrow: Balances::new(),
    };
    storage.set_pool(pool_id, &pool)?;
    info!("created pool {} ({}) for tokens {} and {}", pool_id, share.symbol, pool.token_a, pool.token_b);
    Ok(pool_id)
}

pub fn update_pool_pair<S: Storage>(storage: &mut S, message: &UpdatePoolPairMessage) -> Result<(), BlockchainError> {
    let mut pool = storage.get_pool_or_err(message.pool_id)?;
    pool.status = message.status;
    if message.commission >= 0 {
        validate_commission(message.commission)?;
        pool.commission = message.commission;
    }
    if !message.owner.is_empty() {
        pool.owner = message.owner.clone();
    }
    if let Some(rewards) = &message.custom_rewards {
        validate_custom_rewards(storage, rewards)?;
        pool.custom_rewards = rewards.clone();
    }
    storage.set_pool(message.pool_id, &pool)
}

/// End of block reward distribution: the native block reward split by
/// `v0/params/lp_splits` and the custom rewards funded by pool owners.
pub fn distribute_block_rewards<S: Storage>(storage: &mut S, ctx: &BlockContext) -> Result<Balances, BlockchainError> {
    let mut distributed = Balances::new();

    if ctx.params.lp_block_reward > 0 {
        for (key, value) in storage.list_attributes()? {
            let (AttributeKey::LpSplit(pool_id), AttributeValue::Percent(pct)) = (key, value) else {
                continue;
            };
            let reward = fraction(ctx.params.lp_block_reward, pct)?;
            let Some(mut pool) = storage.get_pool(pool_id)? else {
                continue;
            };
            if reward <= 0 || pool.total_liquidity <= 0 {
                continue;
            }
            let value = TokenAmount::new(NATIVE_TOKEN, reward);
            accounts::add_minted(storage, value)?;
            add_pool_reward(&mut pool, value)?;
            storage.set_pool(pool_id, &pool)?;
            distributed.add(value)?;
        }
    }

    for (pool_id, pool) in storage.list_pools()? {
        if pool.custom_rewards.is_empty() || pool.total_liquidity <= 0 {
            continue;
        }
        for (token_id, amount) in pool.custom_rewards.iter() {
            // paid only while the owner can fund it
            if storage.get_balance(&pool.owner, token_id)? < amount {
                continue;
            }
            let value = TokenAmount::new(token_id, amount);
            accounts::debit(storage, &pool.owner, value)?;
            let mut pool = storage.get_pool_or_err(pool_id)?;
            add_pool_reward(&mut pool, value)?;
            storage.set_pool(pool_id, &pool)?;
            distributed.add(value)?;
        }
    }

    Ok(distributed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::prelude::*;
    use crate::{
        config::ChainParams,
        core::{error::ErrorKind, storage::{ChainStore, MemoryBackend}},
    };
    use tessera_common::transaction::AccountsMap;

    const DUSD: TokenId = 1;
    const BTC: TokenId = 2;

    fn token(symbol: &str) -> Token {
        Token {
            symbol: symbol.to_owned(),
            name: symbol.to_owned(),
            decimal: 8,
            limit: 0,
            flags: TOKEN_FLAG_DAT | TOKEN_FLAG_TRADEABLE,
            minted: 0,
            creation_tx: Hash::zero(),
            creation_height: 0,
            owner: Script::empty(),
        }
    }

    fn setup() -> (ChainStore<MemoryBackend>, ChainParams) {
        let mut store = ChainStore::in_memory();
        store.set_token(NATIVE_TOKEN, &token("DFI")).unwrap();
        store.set_token(DUSD, &token("DUSD")).unwrap();
        store.set_token(BTC, &token("BTC")).unwrap();
        (store, ChainParams::regtest())
    }

    fn create_pool(store: &mut ChainStore<MemoryBackend>, ctx: &BlockContext, a: TokenId, b: TokenId, seed: u8) -> TokenId {
        let message = CreatePoolPairMessage {
            token_a: a,
            token_b: b,
            commission: 0,
            owner: Script::p2pkh([0xee; 20]),
            status: true,
            pair_symbol: String::new(),
            custom_rewards: Balances::new(),
        };
        create_pool_pair(store, ctx, &Hash::new([seed; 32]), &message).unwrap()
    }

    fn provide(store: &mut ChainStore<MemoryBackend>, owner: &Script, a: TokenAmount, b: TokenAmount) -> Amount {
        accounts::mint(store, owner, a).unwrap();
        accounts::mint(store, owner, b).unwrap();
        let mut from = AccountsMap::new();
        from.insert(owner.clone(), [(a.token_id, a.amount), (b.token_id, b.amount)].into_iter().collect());
        add_liquidity(
            store,
            &AddPoolLiquidityMessage {
                from,
                share_address: owner.clone(),
            },
        )
        .unwrap()
    }

    fn swap_message(from: &Script, token_from: TokenId, amount: Amount, token_to: TokenId) -> PoolSwapMessage {
        PoolSwapMessage {
            from: from.clone(),
            token_from,
            amount_from: amount,
            to: from.clone(),
            token_to,
            max_price: PoolPrice::unlimited(),
        }
    }

    #[test]
    fn test_swap_with_fee_direction() {
        let (mut store, params) = setup();
        let ctx = BlockContext::new(&params, 1, 0);
        let pool_id = create_pool(&mut store, &ctx, DUSD, NATIVE_TOKEN, 1);
        let lp = Script::p2pkh([1; 20]);
        provide(&mut store, &lp, TokenAmount::new(DUSD, 1000 * COIN), TokenAmount::new(NATIVE_TOKEN, 100 * COIN));

        store
            .set_attribute(&AttributeKey::PoolPair(pool_id, PoolAttribute::TokenAFeePct), &AttributeValue::Percent(5 * COIN / 100))
            .unwrap();
        store
            .set_attribute(
                &AttributeKey::PoolPair(pool_id, PoolAttribute::TokenAFeeDirection),
                &AttributeValue::Direction(tessera_common::dex::FeeDirection::In),
            )
            .unwrap();

        let trader = Script::p2pkh([2; 20]);
        accounts::mint(&mut store, &trader, TokenAmount::new(NATIVE_TOKEN, COIN)).unwrap();
        let outcome = pool_swap(&mut store, &ctx, &swap_message(&trader, NATIVE_TOKEN, COIN, DUSD), &PathSelector::Direct).unwrap();

        assert_eq!(outcome.amount_out, 990_099_009);
        assert_eq!(store.get_balance(&trader, DUSD).unwrap(), 990_099_009);
        let pool = store.get_pool_or_err(pool_id).unwrap();
        assert_eq!(pool.reserve_b, 101 * COIN);
        // 1000 * 1 / 101 DUSD truncates, the satoshi between output and reserve is burnt
        assert_eq!(outcome.hops[0].rounding_burn, 1);
        assert_eq!(pool.reserve_a, 1000 * COIN - 990_099_009 - 1);
        let burnt = attributes::get_live(&store, LiveAttribute::DexFeeTokens).unwrap();
        assert_eq!(burnt.get(DUSD), 1);
        assert_eq!(burnt.get(NATIVE_TOKEN), 0);

        // the other direction pays the fee on DUSD
        accounts::mint(&mut store, &trader, TokenAmount::new(DUSD, 10 * COIN)).unwrap();
        pool_swap(&mut store, &ctx, &swap_message(&trader, DUSD, 10 * COIN, NATIVE_TOKEN), &PathSelector::Direct).unwrap();
        assert_eq!(
            attributes::get_live(&store, LiveAttribute::DexFeeTokens).unwrap().get(DUSD),
            5 * COIN / 10 + 1
        );
        for (_, audit) in accounts::audit_supply(&store).unwrap() {
            assert!(audit.is_balanced());
        }
    }

    #[test]
    fn test_composite_swap_path() {
        let (mut store, params) = setup();
        let ctx = BlockContext::new(&params, 1, 0);
        let lp = Script::p2pkh([1; 20]);
        let first = create_pool(&mut store, &ctx, BTC, NATIVE_TOKEN, 1);
        let second = create_pool(&mut store, &ctx, DUSD, NATIVE_TOKEN, 2);
        provide(&mut store, &lp, TokenAmount::new(BTC, 10 * COIN), TokenAmount::new(NATIVE_TOKEN, 1000 * COIN));
        provide(&mut store, &lp, TokenAmount::new(DUSD, 1000 * COIN), TokenAmount::new(NATIVE_TOKEN, 1000 * COIN));

        assert_eq!(
            resolve_path(&store, BTC, DUSD, COIN, &PathSelector::Direct).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(resolve_path(&store, BTC, DUSD, COIN, &PathSelector::Auto).unwrap(), vec![first, second]);

        let err = test_swap(&store, BTC, COIN, DUSD, &PathSelector::Explicit(vec![first, second, first, second])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooManyHops);

        // a path ending on the wrong token is refused
        let err = test_swap(&store, BTC, COIN, DUSD, &PathSelector::Explicit(vec![first])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let trader = Script::p2pkh([2; 20]);
        accounts::mint(&mut store, &trader, TokenAmount::new(BTC, COIN)).unwrap();
        let mut message = swap_message(&trader, BTC, COIN, DUSD);
        message.max_price = PoolPrice::from_amount(COIN / 1000);
        let err = pool_swap(&mut store, &ctx, &message, &PathSelector::Auto).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PriceTooHigh);

        message.max_price = PoolPrice::unlimited();
        let outcome = pool_swap(&mut store, &ctx, &message, &PathSelector::Auto).unwrap();
        assert_eq!(outcome.pools, vec![first, second]);
        assert_eq!(store.get_balance(&trader, DUSD).unwrap(), outcome.amount_out);
        assert_eq!(store.get_balance(&trader, BTC).unwrap(), 0);
    }

    #[test]
    fn test_liquidity_and_rewards() {
        let (mut store, mut params) = setup();
        params.lp_block_reward = 10 * COIN;
        let ctx = BlockContext::new(&params, 1, 0);
        let pool_id = create_pool(&mut store, &ctx, BTC, NATIVE_TOKEN, 1);
        let alice = Script::p2pkh([1; 20]);
        let bob = Script::p2pkh([2; 20]);

        let shares = provide(&mut store, &alice, TokenAmount::new(BTC, 100 * COIN), TokenAmount::new(NATIVE_TOKEN, 100 * COIN));
        assert_eq!(shares, 100 * COIN - MINIMUM_LIQUIDITY);
        assert_eq!(store.get_pool_or_err(pool_id).unwrap().total_liquidity, 100 * COIN);

        // off ratio by more than one Satoshi
        accounts::mint(&mut store, &bob, TokenAmount::new(BTC, 10 * COIN)).unwrap();
        accounts::mint(&mut store, &bob, TokenAmount::new(NATIVE_TOKEN, 20 * COIN)).unwrap();
        let mut from = AccountsMap::new();
        from.insert(bob.clone(), [(BTC, 10 * COIN), (NATIVE_TOKEN, 20 * COIN)].into_iter().collect());
        let err = add_liquidity(&mut store, &AddPoolLiquidityMessage { from, share_address: bob.clone() }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        store.set_attribute(&AttributeKey::LpSplit(pool_id), &AttributeValue::Percent(COIN)).unwrap();
        distribute_block_rewards(&mut store, &ctx).unwrap();
        let pending = pending_rewards(&store, pool_id, &alice).unwrap().get(NATIVE_TOKEN);
        // the locked minimum keeps its share in escrow
        assert_eq!(pending, 10 * COIN - 100);

        // bob joins after the distribution and earns nothing from it
        let mut from = AccountsMap::new();
        from.insert(bob.clone(), [(BTC, 10 * COIN), (NATIVE_TOKEN, 10 * COIN)].into_iter().collect());
        add_liquidity(&mut store, &AddPoolLiquidityMessage { from, share_address: bob.clone() }).unwrap();
        assert!(pending_rewards(&store, pool_id, &bob).unwrap().is_empty());

        let before = store.get_balance(&alice, NATIVE_TOKEN).unwrap();
        let (a, b) = remove_liquidity(
            &mut store,
            &RemovePoolLiquidityMessage {
                from: alice.clone(),
                amount: TokenAmount::new(pool_id, shares),
            },
        )
        .unwrap();
        assert!(a > 0 && b > 0);
        assert_eq!(store.get_balance(&alice, NATIVE_TOKEN).unwrap(), before + pending + b);
        assert_eq!(store.get_balance(&alice, pool_id).unwrap(), 0);

        for (_, audit) in accounts::audit_supply(&store).unwrap() {
            assert!(audit.is_balanced());
        }
    }

    #[test]
    fn test_locked_token_blocks_swaps() {
        let (mut store, params) = setup();
        let ctx = BlockContext::new(&params, 1, 0);
        create_pool(&mut store, &ctx, BTC, NATIVE_TOKEN, 1);
        let lp = Script::p2pkh([1; 20]);
        provide(&mut store, &lp, TokenAmount::new(BTC, 10 * COIN), TokenAmount::new(NATIVE_TOKEN, 10 * COIN));
        store.set_attribute(&AttributeKey::TokenLock(BTC), &AttributeValue::Bool(true)).unwrap();

        let err = pool_swap(&mut store, &ctx, &swap_message(&lp, NATIVE_TOKEN, COIN, BTC), &PathSelector::Auto).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenLocked);
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(10_000 * COIN as u128 * COIN as u128), 100 * COIN as u128);
    }
}
