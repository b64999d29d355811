// Loans, vaults & auctions
//
// This module owns loan schemes, the collateral and loan token registries,
// vault operations and the liquidation machinery. Interest is accrued lazily:
// every vault keeps, per loan token, the height it was last settled at, the
// interest per block and the interest accumulated until then, all scaled by
// HIGH_PRECISION_SCALER. Vault values are computed from the fixed interval
// prices only.

use std::collections::BTreeMap;

use log::{debug, info, trace, warn};
use primitive_types::U256;
use serde::Serialize;
use tessera_common::{
    amount::{
        ceil_from_high_precision, divide_amounts, mul_div, mul_div_ceil, multiply_amounts, safe_add, safe_sub,
        Amount, Balances, TokenAmount, TokenId, CENT, COIN, HIGH_PRECISION_SCALER, NATIVE_TOKEN,
    },
    attributes::{AttributeKey, LiveAttribute, TokenAttribute},
    config::{DEFAULT_PAYBACK_PENALTY, DUSD_SYMBOL, MIN_BID_INCREMENT, NATIVE_SYMBOL},
    crypto::Hash,
    history::{EngineEvent, HistoryKind},
    loan::{
        is_valid_scheme_id, AuctionBatch, AuctionData, Bid, CollateralTokenInfo, InterestRate, LoanScheme,
        LoanTokenInfo, ScheduledSchemeChange, Vault, VaultId, VaultSnapshot, VaultState, MIN_LOAN_SCHEME_RATIO,
    },
    oracle::CurrencyPair,
    script::Script,
    token::{is_valid_symbol, Token, MAX_TOKEN_NAME_LENGTH, TOKEN_FLAG_DAT, TOKEN_FLAG_LOAN, TOKEN_FLAG_MINTABLE, TOKEN_FLAG_TRADEABLE},
    transaction::{
        AuctionBidMessage, CloseVaultMessage, CreateVaultMessage, DefaultLoanSchemeMessage, DepositToVaultMessage,
        DestroyLoanSchemeMessage, LoanSchemeMessage, PaybackLoanMessage, SetCollateralTokenMessage,
        SetLoanTokenMessage, TakeLoanMessage, UpdateLoanTokenMessage, UpdateVaultMessage, WithdrawFromVaultMessage,
    },
};

use super::{
    accounts, attributes,
    context::BlockContext,
    error::BlockchainError,
    hard_fork::HardFork,
    history::{self, ENGINE_TX_INDEX},
    oracle,
    storage::Storage,
};

// Lowest annual scheme rate, 0.01%
pub const MIN_SCHEME_RATE: Amount = CENT;

// Price or lock failures freeze a vault instead of failing the block
fn is_frozen(err: &BlockchainError) -> bool {
    matches!(
        err,
        BlockchainError::PriceInvalid(_)
            | BlockchainError::PriceNotFound(_)
            | BlockchainError::NoLiveOracles(_)
            | BlockchainError::TokenLocked(_)
    )
}

fn dusd_token<S: Storage>(storage: &S) -> Result<Option<TokenId>, BlockchainError> {
    Ok(storage.get_token_by_symbol(DUSD_SYMBOL)?.map(|(id, _)| id))
}

fn to_height(value: u64) -> Result<u32, BlockchainError> {
    u32::try_from(value).map_err(|_| BlockchainError::InvalidParameter(format!("Height {} is out of range", value)))
}

fn is_pending_destroy<S: Storage>(storage: &S, id: &str) -> Result<bool, BlockchainError> {
    Ok(storage
        .list_scheme_changes()?
        .iter()
        .any(|(_, change)| matches!(change, ScheduledSchemeChange::Destroy(target) if target == id)))
}

/// Creates a loan scheme, or updates an existing one now or at a later height.
pub fn set_loan_scheme<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    message: &LoanSchemeMessage,
) -> Result<(), BlockchainError> {
    if !is_valid_scheme_id(&message.identifier) {
        return Err(BlockchainError::InvalidParameter(format!(
            "Invalid loan scheme identifier '{}'",
            message.identifier
        )));
    }
    if message.ratio < MIN_LOAN_SCHEME_RATIO {
        return Err(BlockchainError::InvalidParameter(format!(
            "Minimum collateralization ratio cannot be less than {}",
            MIN_LOAN_SCHEME_RATIO
        )));
    }
    if message.rate < MIN_SCHEME_RATE {
        return Err(BlockchainError::InvalidParameter(
            "Interest rate cannot be less than 0.01".to_owned(),
        ));
    }

    for other in storage.list_loan_schemes()? {
        if other.identifier != message.identifier && other.ratio == message.ratio && other.rate == message.rate {
            return Err(BlockchainError::SchemeParamsExist(message.ratio, message.rate));
        }
    }

    let scheme = LoanScheme {
        identifier: message.identifier.clone(),
        ratio: message.ratio,
        rate: message.rate,
    };
    let exists = storage.get_loan_scheme(&scheme.identifier)?.is_some();

    if message.update_height > 0 {
        if !exists {
            return Err(BlockchainError::SchemeNotFound(scheme.identifier));
        }
        let height = to_height(message.update_height)?;
        if height <= ctx.height {
            return Err(BlockchainError::InvalidParameter(
                "Update height below current block height".to_owned(),
            ));
        }
        info!("loan scheme {} will be updated at height {}", scheme.identifier, height);
        return storage.schedule_scheme_change(height, &ScheduledSchemeChange::Update(scheme));
    }

    storage.set_loan_scheme(&scheme)?;
    if storage.get_default_loan_scheme()?.is_none() {
        storage.set_default_loan_scheme(&scheme.identifier)?;
    }
    if exists {
        refresh_scheme_vaults(storage, ctx, &scheme.identifier)?;
    }
    info!(
        "loan scheme {} set with ratio {}% and rate {}",
        scheme.identifier, scheme.ratio, scheme.rate
    );
    Ok(())
}

pub fn set_default_loan_scheme<S: Storage>(storage: &mut S, message: &DefaultLoanSchemeMessage) -> Result<(), BlockchainError> {
    storage.get_loan_scheme_or_err(&message.identifier)?;
    if storage.get_default_loan_scheme()?.as_deref() == Some(message.identifier.as_str()) {
        return Err(BlockchainError::InvalidState(format!(
            "Loan scheme {} is already the default",
            message.identifier
        )));
    }
    if is_pending_destroy(storage, &message.identifier)? {
        return Err(BlockchainError::InvalidState(format!(
            "Loan scheme {} is scheduled for destruction",
            message.identifier
        )));
    }
    storage.set_default_loan_scheme(&message.identifier)
}

pub fn destroy_loan_scheme<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    message: &DestroyLoanSchemeMessage,
) -> Result<(), BlockchainError> {
    storage.get_loan_scheme_or_err(&message.identifier)?;
    if storage.get_default_loan_scheme()?.as_deref() == Some(message.identifier.as_str()) {
        return Err(BlockchainError::InvalidState("Cannot destroy default loan scheme".to_owned()));
    }

    if message.destroy_height > 0 {
        let height = to_height(message.destroy_height)?;
        if height <= ctx.height {
            return Err(BlockchainError::InvalidParameter(
                "Destruction height below current block height".to_owned(),
            ));
        }
        info!("loan scheme {} will be destroyed at height {}", message.identifier, height);
        return storage.schedule_scheme_change(height, &ScheduledSchemeChange::Destroy(message.identifier.clone()));
    }

    destroy_scheme_now(storage, ctx, &message.identifier)
}

// Moves the vaults of a scheme to the default one and removes it
fn destroy_scheme_now<S: Storage>(storage: &mut S, ctx: &BlockContext, id: &str) -> Result<(), BlockchainError> {
    let default = storage
        .get_default_loan_scheme()?
        .ok_or_else(|| BlockchainError::SchemeNotFound("default".to_owned()))?;
    if default == id {
        return Err(BlockchainError::InvalidState("Cannot destroy default loan scheme".to_owned()));
    }

    let mut migrated = 0;
    for (vault_id, mut vault) in storage.list_vaults()? {
        if vault.scheme_id != id {
            continue;
        }
        vault.scheme_id = default.clone();
        storage.set_vault(&vault_id, &vault)?;
        if !vault.under_liquidation {
            refresh_vault_interest(storage, ctx, &vault_id)?;
        }
        history::record_vault(
            storage,
            ctx.height,
            ENGINE_TX_INDEX,
            Hash::zero(),
            &vault_id,
            HistoryKind::Engine(EngineEvent::SchemeMigration),
            &vault.owner,
            Balances::new(),
            None,
        )?;
        migrated += 1;
    }

    storage.remove_scheme_changes(id)?;
    storage.remove_loan_scheme(id)?;
    info!("destroyed loan scheme {}, {} vaults moved to {}", id, migrated, default);
    Ok(())
}

/// Applies a deferred scheme change at its activation height.
pub fn apply_scheme_change<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    change: &ScheduledSchemeChange,
) -> Result<(), BlockchainError> {
    match change {
        ScheduledSchemeChange::Update(scheme) => {
            if storage.get_loan_scheme(&scheme.identifier)?.is_none() {
                warn!("scheduled update of unknown loan scheme {} ignored", scheme.identifier);
                return Ok(());
            }
            debug!("activating update of loan scheme {} at height {}", scheme.identifier, ctx.height);
            storage.set_loan_scheme(scheme)?;
            refresh_scheme_vaults(storage, ctx, &scheme.identifier)
        }
        ScheduledSchemeChange::Destroy(id) => {
            if storage.get_loan_scheme(id)?.is_none() {
                warn!("scheduled destruction of unknown loan scheme {} ignored", id);
                return Ok(());
            }
            if storage.get_default_loan_scheme()?.as_deref() == Some(id.as_str()) {
                warn!("loan scheme {} became the default, scheduled destruction ignored", id);
                return Ok(());
            }
            destroy_scheme_now(storage, ctx, id)
        }
    }
}

pub fn set_collateral_token<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    tx_hash: &Hash,
    message: &SetCollateralTokenMessage,
) -> Result<(), BlockchainError> {
    storage.get_token_or_err(message.token_id)?;
    attributes::ensure_unlocked(storage, message.token_id)?;
    if message.factor < 0 || message.factor > COIN {
        return Err(BlockchainError::InvalidParameter(
            "Collateral factor must be between 0 and 1".to_owned(),
        ));
    }
    let activation_height = if message.activate_after_block == 0 {
        ctx.height
    } else if message.activate_after_block < ctx.height {
        return Err(BlockchainError::InvalidParameter(
            "Activation height below current block height".to_owned(),
        ));
    } else {
        message.activate_after_block
    };

    oracle::ensure_fixed_interval_price(storage, ctx, &message.fixed_interval_price_id)?;
    let info = CollateralTokenInfo {
        token_id: message.token_id,
        factor: message.factor,
        fixed_interval_price_id: message.fixed_interval_price_id.clone(),
        activation_height,
        creation_tx: *tx_hash,
    };
    info!(
        "token {} is collateral with factor {} from height {}",
        info.token_id, info.factor, activation_height
    );
    storage.set_collateral_token(&info)
}

fn validate_loan_token(symbol: &str, name: &str, interest: Amount) -> Result<(), BlockchainError> {
    if !is_valid_symbol(symbol) {
        return Err(BlockchainError::InvalidParameter(format!("Invalid token symbol '{}'", symbol)));
    }
    if name.len() > MAX_TOKEN_NAME_LENGTH {
        return Err(BlockchainError::InvalidParameter(format!(
            "Token name is longer than {} characters",
            MAX_TOKEN_NAME_LENGTH
        )));
    }
    if interest < 0 {
        return Err(BlockchainError::InvalidAmount(interest));
    }
    Ok(())
}

/// Creates a DAT loan token tracking a fixed interval price.
pub fn set_loan_token<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    tx_hash: &Hash,
    message: &SetLoanTokenMessage,
) -> Result<TokenId, BlockchainError> {
    validate_loan_token(&message.symbol, &message.name, message.interest)?;
    if storage.get_token_by_symbol(&message.symbol)?.is_some() {
        return Err(BlockchainError::TokenExists(message.symbol.clone()));
    }
    oracle::ensure_fixed_interval_price(storage, ctx, &message.fixed_interval_price_id)?;

    let token_id = storage.next_token_id(true)?;
    let mut token = Token {
        symbol: message.symbol.clone(),
        name: message.name.clone(),
        decimal: 8,
        limit: 0,
        flags: TOKEN_FLAG_DAT | TOKEN_FLAG_LOAN | TOKEN_FLAG_TRADEABLE,
        minted: 0,
        creation_tx: *tx_hash,
        creation_height: ctx.height,
        owner: Script::empty(),
    };
    token.set_flag(TOKEN_FLAG_MINTABLE, message.mintable);
    storage.set_token(token_id, &token)?;
    storage.set_loan_token(&LoanTokenInfo {
        token_id,
        fixed_interval_price_id: message.fixed_interval_price_id.clone(),
        mintable: message.mintable,
        interest: message.interest,
        creation_tx: *tx_hash,
        creation_height: ctx.height,
    })?;

    info!("created loan token {} ({}) at height {}", token_id, message.symbol, ctx.height);
    Ok(token_id)
}

pub fn update_loan_token<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    message: &UpdateLoanTokenMessage,
) -> Result<(), BlockchainError> {
    let mut info = storage
        .get_loan_token(message.token_id)?
        .ok_or(BlockchainError::LoanTokenNotFound(message.token_id))?;
    attributes::ensure_unlocked(storage, message.token_id)?;
    validate_loan_token(&message.symbol, &message.name, message.interest)?;

    let mut token = storage.get_token_or_err(message.token_id)?;
    if token.symbol != message.symbol {
        if let Some((id, _)) = storage.get_token_by_symbol(&message.symbol)? {
            if id != message.token_id {
                return Err(BlockchainError::TokenExists(message.symbol.clone()));
            }
        }
    }
    if info.fixed_interval_price_id != message.fixed_interval_price_id {
        oracle::ensure_fixed_interval_price(storage, ctx, &message.fixed_interval_price_id)?;
    }

    token.symbol = message.symbol.clone();
    token.name = message.name.clone();
    token.set_flag(TOKEN_FLAG_MINTABLE, message.mintable);
    storage.set_token(message.token_id, &token)?;

    let interest_changed = info.interest != message.interest;
    info.fixed_interval_price_id = message.fixed_interval_price_id.clone();
    info.mintable = message.mintable;
    info.interest = message.interest;
    storage.set_loan_token(&info)?;

    if interest_changed {
        for vault_id in storage.list_loan_vaults()? {
            if storage.get_vault_loans(&vault_id)?.get(message.token_id) == 0 {
                continue;
            }
            if storage.get_vault(&vault_id)?.is_some_and(|vault| !vault.under_liquidation) {
                refresh_vault_interest(storage, ctx, &vault_id)?;
            }
        }
    }
    debug!("updated loan token {}", message.token_id);
    Ok(())
}

/// Interest accrued per block by `amount` at an annual `rate` (8 decimal
/// percent), scaled by HIGH_PRECISION_SCALER. Before the high precision
/// fork it is rounded up to a whole Satoshi.
pub fn interest_per_block(ctx: &BlockContext, amount: Amount, rate: Amount) -> u128 {
    if amount <= 0 || rate <= 0 {
        return 0;
    }
    let numerator = U256::from(amount as u64) * U256::from(rate as u64) * U256::from(HIGH_PRECISION_SCALER);
    let denominator = U256::from(100 * COIN as u64) * U256::from(ctx.params.blocks_per_year().max(1));
    let per_block = numerator / denominator;
    let per_block = if per_block > U256::from(u128::MAX) {
        u128::MAX
    } else {
        per_block.as_u128()
    };

    if ctx.is_active(HardFork::FortCanningHill) {
        per_block
    } else {
        per_block.div_ceil(HIGH_PRECISION_SCALER).saturating_mul(HIGH_PRECISION_SCALER)
    }
}

// Interest accumulated up to `height`, high precision
pub fn interest_at(rate: &InterestRate, height: u32) -> u128 {
    let blocks = height.saturating_sub(rate.height) as u128;
    rate.interest_to_height
        .saturating_add(rate.interest_per_block.saturating_mul(blocks))
}

fn accrue(rate: &mut InterestRate, height: u32) {
    rate.interest_to_height = interest_at(rate, height);
    rate.height = height.max(rate.height);
}

fn accrued_rate<S: Storage>(
    storage: &S,
    ctx: &BlockContext,
    vault_id: &VaultId,
    token_id: TokenId,
) -> Result<InterestRate, BlockchainError> {
    let mut rate = storage.get_interest_rate(vault_id, token_id)?.unwrap_or(InterestRate {
        height: ctx.height,
        ..Default::default()
    });
    accrue(&mut rate, ctx.height);
    Ok(rate)
}

// Stores an accrued rate with the interest per block of the current principal
fn write_rate<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    vault_id: &VaultId,
    token_id: TokenId,
    mut rate: InterestRate,
    scheme_rate: Amount,
) -> Result<(), BlockchainError> {
    let principal = storage.get_vault_loans(vault_id)?.get(token_id);
    let token_interest = storage.get_loan_token(token_id)?.map(|info| info.interest).unwrap_or(0);
    rate.interest_per_block = interest_per_block(ctx, principal, safe_add(scheme_rate, token_interest)?);

    if principal == 0 && rate.interest_to_height == 0 {
        return storage.remove_interest_rate(vault_id, token_id);
    }
    if log::log_enabled!(log::Level::Trace) {
        trace!(
            "vault {} token {} interest per block {} accrued {}",
            vault_id,
            token_id,
            rate.interest_per_block,
            rate.interest_to_height
        );
    }
    storage.set_interest_rate(vault_id, token_id, &rate)
}

// Settles every interest entry of a vault and recomputes the rates
fn refresh_vault_interest<S: Storage>(storage: &mut S, ctx: &BlockContext, vault_id: &VaultId) -> Result<(), BlockchainError> {
    let vault = storage.get_vault_or_err(vault_id)?;
    let scheme = storage.get_loan_scheme_or_err(&vault.scheme_id)?;
    let mut tokens: Vec<TokenId> = storage.get_vault_loans(vault_id)?.tokens().collect();
    for (token_id, _) in storage.list_interest_rates(vault_id)? {
        if !tokens.contains(&token_id) {
            tokens.push(token_id);
        }
    }
    for token_id in tokens {
        let rate = accrued_rate(storage, ctx, vault_id, token_id)?;
        write_rate(storage, ctx, vault_id, token_id, rate, scheme.rate)?;
    }
    Ok(())
}

fn refresh_scheme_vaults<S: Storage>(storage: &mut S, ctx: &BlockContext, scheme_id: &str) -> Result<(), BlockchainError> {
    for vault_id in storage.list_loan_vaults()? {
        let Some(vault) = storage.get_vault(&vault_id)? else {
            continue;
        };
        if vault.scheme_id == scheme_id && !vault.under_liquidation {
            refresh_vault_interest(storage, ctx, &vault_id)?;
        }
    }
    Ok(())
}

// Principal and rounded up interest of every loan token of a vault
fn outstanding<S: Storage>(
    storage: &S,
    vault_id: &VaultId,
    height: u32,
) -> Result<BTreeMap<TokenId, (Amount, Amount)>, BlockchainError> {
    let mut debts = BTreeMap::new();
    for (token_id, amount) in storage.get_vault_loans(vault_id)?.iter() {
        debts.insert(token_id, (amount, 0));
    }
    for (token_id, rate) in storage.list_interest_rates(vault_id)? {
        let interest = ceil_from_high_precision(interest_at(&rate, height));
        if interest > 0 {
            debts.entry(token_id).or_insert((0, 0)).1 = interest;
        }
    }
    Ok(debts)
}

/// Accrued interest of one loan token, rounded up to the Satoshi.
pub fn accrued_interest<S: Storage>(
    storage: &S,
    vault_id: &VaultId,
    token_id: TokenId,
    height: u32,
) -> Result<Amount, BlockchainError> {
    Ok(storage
        .get_interest_rate(vault_id, token_id)?
        .map(|rate| ceil_from_high_precision(interest_at(&rate, height)))
        .unwrap_or(0))
}

/// USD price of a loan or collateral token.
pub fn usd_price<S: Storage>(storage: &S, token_id: TokenId, use_next: bool) -> Result<Amount, BlockchainError> {
    if let Some(info) = storage.get_loan_token(token_id)? {
        return oracle::get_price(storage, token_id, &info.fixed_interval_price_id, use_next);
    }
    if let Some(info) = storage.get_collateral_token(token_id)? {
        return oracle::get_price(storage, token_id, &info.fixed_interval_price_id, use_next);
    }
    let token = storage.get_token_or_err(token_id)?;
    Err(BlockchainError::PriceNotFound(CurrencyPair::usd(token.symbol.as_str())))
}

#[derive(Debug, Clone, Copy, Default)]
struct Valuation {
    collateral: Amount,
    // Principal and interest
    loans: Amount,
    interest: Amount,
    native: Amount,
    dusd: Amount,
}

impl Valuation {
    fn ratio(&self) -> i64 {
        if self.loans <= 0 {
            return -1;
        }
        (self.collateral as i128 * 100 / self.loans as i128) as i64
    }

    // 8 decimal ratio, for display
    fn precise_ratio(&self) -> Amount {
        if self.loans <= 0 {
            return -1;
        }
        mul_div(self.collateral, 100 * COIN, self.loans).unwrap_or(-1)
    }

    fn is_below(&self, ratio: u32) -> bool {
        self.loans > 0 && (self.collateral as i128) * 100 < ratio as i128 * self.loans as i128
    }
}

fn evaluate<S: Storage>(
    storage: &S,
    ctx: &BlockContext,
    vault_id: &VaultId,
    use_next: bool,
) -> Result<Valuation, BlockchainError> {
    let dusd = dusd_token(storage)?;
    let mut valuation = Valuation::default();

    for (token_id, amount) in storage.get_vault_collateral(vault_id)?.iter() {
        let info = storage
            .get_collateral_token(token_id)?
            .ok_or(BlockchainError::CollateralTokenNotFound(token_id))?;
        let price = oracle::get_price(storage, token_id, &info.fixed_interval_price_id, use_next)?;
        let value = multiply_amounts(multiply_amounts(amount, price)?, info.factor)?;
        valuation.collateral = safe_add(valuation.collateral, value)?;
        if token_id == NATIVE_TOKEN {
            valuation.native = safe_add(valuation.native, value)?;
        } else if Some(token_id) == dusd {
            valuation.dusd = safe_add(valuation.dusd, value)?;
        }
    }

    for (token_id, (principal, interest)) in outstanding(storage, vault_id, ctx.height)? {
        let price = usd_price(storage, token_id, use_next)?;
        valuation.loans = safe_add(valuation.loans, multiply_amounts(safe_add(principal, interest)?, price)?)?;
        valuation.interest = safe_add(valuation.interest, multiply_amounts(interest, price)?)?;
    }
    Ok(valuation)
}

fn check_min_collateral(
    ctx: &BlockContext,
    valuation: &Valuation,
    scheme: &LoanScheme,
    has_dusd_loan: bool,
) -> Result<(), BlockchainError> {
    if !ctx.is_active(HardFork::FortCanningHill) || valuation.loans == 0 {
        return Ok(());
    }

    let required = mul_div(valuation.loans, scheme.ratio as Amount, 100)?;
    let (counted, label) = if ctx.is_active(HardFork::FortCanningEpilogue) && has_dusd_loan {
        (valuation.native, NATIVE_SYMBOL.to_owned())
    } else if ctx.is_active(HardFork::FortCanningRoad) {
        (safe_add(valuation.native, valuation.dusd)?, format!("{} or {}", NATIVE_SYMBOL, DUSD_SYMBOL))
    } else {
        (valuation.native, NATIVE_SYMBOL.to_owned())
    };

    if (counted as i128) * 2 < required as i128 {
        return Err(BlockchainError::MinCollateral(label));
    }
    Ok(())
}

// Ratio and collateral composition checks of mutative operations, against
// both the active and the next prices
fn check_vault_health<S: Storage>(
    storage: &S,
    ctx: &BlockContext,
    vault_id: &VaultId,
    scheme: &LoanScheme,
) -> Result<(), BlockchainError> {
    let has_dusd_loan = match dusd_token(storage)? {
        Some(dusd) => storage.get_vault_loans(vault_id)?.get(dusd) > 0,
        None => false,
    };
    for use_next in [false, true] {
        let valuation = evaluate(storage, ctx, vault_id, use_next)?;
        if valuation.is_below(scheme.ratio) {
            return Err(BlockchainError::RatioBelowScheme {
                ratio: valuation.ratio(),
                required: scheme.ratio,
            });
        }
        check_min_collateral(ctx, &valuation, scheme, has_dusd_loan)?;
    }
    Ok(())
}

fn ensure_not_liquidating(vault_id: &VaultId, vault: &Vault) -> Result<(), BlockchainError> {
    if vault.under_liquidation {
        return Err(BlockchainError::VaultInLiquidation(*vault_id));
    }
    Ok(())
}

fn resolve_scheme<S: Storage>(storage: &S, scheme_id: &str) -> Result<LoanScheme, BlockchainError> {
    let id = if scheme_id.is_empty() {
        storage
            .get_default_loan_scheme()?
            .ok_or_else(|| BlockchainError::SchemeNotFound("default".to_owned()))?
    } else {
        scheme_id.to_owned()
    };
    let scheme = storage.get_loan_scheme_or_err(&id)?;
    if is_pending_destroy(storage, &id)? {
        return Err(BlockchainError::InvalidState(format!(
            "Loan scheme {} is scheduled for destruction",
            id
        )));
    }
    Ok(scheme)
}

/// Opens a vault. `fee` is the native value burnt by the transaction, half of
/// it is kept in escrow and refunded when the vault is closed.
pub fn create_vault<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    tx_hash: &Hash,
    message: &CreateVaultMessage,
    fee: Amount,
) -> Result<VaultId, BlockchainError> {
    if message.owner.is_empty() {
        return Err(BlockchainError::InvalidParameter("Vault owner cannot be empty".to_owned()));
    }
    let scheme = resolve_scheme(storage, &message.scheme_id)?;
    if fee != ctx.params.vault_creation_fee {
        return Err(BlockchainError::InvalidParameter(format!(
            "Vault creation fee must be {}",
            ctx.params.vault_creation_fee
        )));
    }
    let vault_id = *tx_hash;
    if storage.get_vault(&vault_id)?.is_some() {
        return Err(BlockchainError::VaultExists(vault_id));
    }

    let escrow = fee / 2;
    accounts::add_minted(storage, TokenAmount::new(NATIVE_TOKEN, fee))?;
    accounts::credit_burn(storage, ctx, TokenAmount::new(NATIVE_TOKEN, fee - escrow), None)?;

    let vault = Vault {
        owner: message.owner.clone(),
        scheme_id: scheme.identifier,
        under_liquidation: false,
        creation_height: ctx.height,
        fee_escrow: escrow,
    };
    storage.set_vault(&vault_id, &vault)?;
    metrics::counter!("tessera_vaults_created").increment(1);
    info!("created vault {} with scheme {}", vault_id, vault.scheme_id);
    Ok(vault_id)
}

pub fn update_vault<S: Storage>(storage: &mut S, ctx: &BlockContext, message: &UpdateVaultMessage) -> Result<(), BlockchainError> {
    let mut vault = storage.get_vault_or_err(&message.vault_id)?;
    ensure_not_liquidating(&message.vault_id, &vault)?;
    if message.owner.is_empty() {
        return Err(BlockchainError::InvalidParameter("Vault owner cannot be empty".to_owned()));
    }

    vault.owner = message.owner.clone();
    if !message.scheme_id.is_empty() && message.scheme_id != vault.scheme_id {
        let scheme = resolve_scheme(storage, &message.scheme_id)?;
        let has_loans = !storage.get_vault_loans(&message.vault_id)?.is_empty();
        if has_loans {
            // settle at the old rate before switching
            refresh_vault_interest(storage, ctx, &message.vault_id)?;
        }
        vault.scheme_id = scheme.identifier.clone();
        storage.set_vault(&message.vault_id, &vault)?;
        if has_loans {
            refresh_vault_interest(storage, ctx, &message.vault_id)?;
            check_vault_health(storage, ctx, &message.vault_id, &scheme)?;
        }
        debug!("vault {} moved to scheme {}", message.vault_id, scheme.identifier);
        return Ok(());
    }
    storage.set_vault(&message.vault_id, &vault)
}

/// Closes a vault without loans, returning its collateral and the fee escrow.
pub fn close_vault<S: Storage>(storage: &mut S, ctx: &BlockContext, message: &CloseVaultMessage) -> Result<Balances, BlockchainError> {
    let vault = storage.get_vault_or_err(&message.vault_id)?;
    ensure_not_liquidating(&message.vault_id, &vault)?;
    if !outstanding(storage, &message.vault_id, ctx.height)?.is_empty() {
        return Err(BlockchainError::InvalidState(format!("Vault {} has loans", message.vault_id)));
    }

    let mut returned = storage.get_vault_collateral(&message.vault_id)?;
    returned.add(TokenAmount::new(NATIVE_TOKEN, vault.fee_escrow))?;
    accounts::credit_all(storage, &message.to, &returned)?;
    storage.remove_vault(&message.vault_id)?;
    info!("closed vault {}", message.vault_id);
    Ok(returned)
}

pub fn deposit_to_vault<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    message: &DepositToVaultMessage,
) -> Result<(), BlockchainError> {
    let vault = storage.get_vault_or_err(&message.vault_id)?;
    ensure_not_liquidating(&message.vault_id, &vault)?;
    let token_id = message.amount.token_id;
    if message.amount.amount <= 0 {
        return Err(BlockchainError::InvalidAmount(message.amount.amount));
    }
    match storage.get_collateral_token(token_id)? {
        Some(info) if info.activation_height <= ctx.height => {}
        _ => return Err(BlockchainError::CollateralTokenNotFound(token_id)),
    }
    attributes::ensure_unlocked(storage, token_id)?;

    accounts::debit(storage, &message.from, message.amount)?;
    let mut collateral = storage.get_vault_collateral(&message.vault_id)?;
    collateral.add(message.amount)?;
    storage.set_vault_collateral(&message.vault_id, &collateral)?;

    if storage.get_vault_loans(&message.vault_id)?.is_empty() {
        return Ok(());
    }
    let scheme = storage.get_loan_scheme_or_err(&vault.scheme_id)?;
    let has_dusd_loan = match dusd_token(storage)? {
        Some(dusd) => storage.get_vault_loans(&message.vault_id)?.get(dusd) > 0,
        None => false,
    };
    match evaluate(storage, ctx, &message.vault_id, false) {
        Ok(valuation) => check_min_collateral(ctx, &valuation, &scheme, has_dusd_loan),
        Err(e) if is_frozen(&e) => {
            debug!("vault {} is frozen, skipping collateral checks: {}", message.vault_id, e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub fn withdraw_from_vault<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    message: &WithdrawFromVaultMessage,
) -> Result<(), BlockchainError> {
    let vault = storage.get_vault_or_err(&message.vault_id)?;
    ensure_not_liquidating(&message.vault_id, &vault)?;
    if message.amount.amount <= 0 {
        return Err(BlockchainError::InvalidAmount(message.amount.amount));
    }
    attributes::ensure_unlocked(storage, message.amount.token_id)?;

    let mut collateral = storage.get_vault_collateral(&message.vault_id)?;
    collateral.sub(message.amount)?;
    storage.set_vault_collateral(&message.vault_id, &collateral)?;

    if !outstanding(storage, &message.vault_id, ctx.height)?.is_empty() {
        let scheme = storage.get_loan_scheme_or_err(&vault.scheme_id)?;
        check_vault_health(storage, ctx, &message.vault_id, &scheme)?;
    }
    accounts::credit(storage, &message.to, message.amount)
}

pub fn take_loan<S: Storage>(storage: &mut S, ctx: &BlockContext, message: &TakeLoanMessage) -> Result<(), BlockchainError> {
    let vault = storage.get_vault_or_err(&message.vault_id)?;
    ensure_not_liquidating(&message.vault_id, &vault)?;
    if message.amounts.is_empty() {
        return Err(BlockchainError::InvalidParameter("No loan amounts given".to_owned()));
    }
    if storage.get_vault_collateral(&message.vault_id)?.is_empty() {
        return Err(BlockchainError::InvalidState(format!(
            "Vault {} has no collateral",
            message.vault_id
        )));
    }
    let scheme = storage.get_loan_scheme_or_err(&vault.scheme_id)?;

    for (token_id, amount) in message.amounts.iter() {
        if amount <= 0 {
            return Err(BlockchainError::InvalidAmount(amount));
        }
        let info = storage
            .get_loan_token(token_id)?
            .ok_or(BlockchainError::LoanTokenNotFound(token_id))?;
        if !info.mintable {
            return Err(BlockchainError::InvalidState(format!(
                "Loan cannot be taken on token {} as it is not mintable",
                token_id
            )));
        }
        attributes::ensure_unlocked(storage, token_id)?;

        // settle what the existing principal accrued before it grows
        let rate = accrued_rate(storage, ctx, &message.vault_id, token_id)?;
        let mut loans = storage.get_vault_loans(&message.vault_id)?;
        loans.add(TokenAmount::new(token_id, amount))?;
        storage.set_vault_loans(&message.vault_id, &loans)?;
        write_rate(storage, ctx, &message.vault_id, token_id, rate, scheme.rate)?;
    }

    check_vault_health(storage, ctx, &message.vault_id, &scheme)?;

    let to = if message.to.is_empty() { &vault.owner } else { &message.to };
    for (token_id, amount) in message.amounts.iter() {
        accounts::mint(storage, to, TokenAmount::new(token_id, amount))?;
    }
    metrics::counter!("tessera_loans_taken").increment(message.amounts.len() as u64);
    debug!("vault {} took loans {:?}", message.vault_id, message.amounts);
    Ok(())
}

// Penalty charged when a loan is paid back with another token
fn payback_penalty<S: Storage>(storage: &S, loan_token: TokenId, pay_token: TokenId) -> Result<Amount, BlockchainError> {
    let (enabled, penalty) = if pay_token == NATIVE_TOKEN {
        (
            attributes::get_bool(storage, &AttributeKey::Token(loan_token, TokenAttribute::PaybackDfi), false)?,
            attributes::get_amount(storage, &AttributeKey::Token(loan_token, TokenAttribute::PaybackDfiFeePct))?
                .unwrap_or(DEFAULT_PAYBACK_PENALTY),
        )
    } else {
        (
            attributes::get_bool(
                storage,
                &AttributeKey::Token(loan_token, TokenAttribute::LoanPayback(pay_token)),
                false,
            )?,
            attributes::get_amount(
                storage,
                &AttributeKey::Token(loan_token, TokenAttribute::LoanPaybackFeePct(pay_token)),
            )?
            .unwrap_or(0),
        )
    };
    if !enabled {
        return Err(BlockchainError::InvalidParameter(format!(
            "Payback of loan token {} with token {} is not currently active",
            loan_token, pay_token
        )));
    }
    if !(0..COIN).contains(&penalty) {
        return Err(BlockchainError::InvalidState(format!("Invalid payback penalty {}", penalty)));
    }
    Ok(penalty)
}

#[allow(clippy::too_many_arguments)]
fn payback_one<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    vault_id: &VaultId,
    scheme: &LoanScheme,
    from: &Script,
    loan_token: TokenId,
    pay_token: TokenId,
    offered: Amount,
) -> Result<Amount, BlockchainError> {
    if offered <= 0 {
        return Err(BlockchainError::InvalidAmount(offered));
    }
    let mut rate = accrued_rate(storage, ctx, vault_id, loan_token)?;
    let owed_interest = ceil_from_high_precision(rate.interest_to_height);
    let mut loans = storage.get_vault_loans(vault_id)?;
    let owed = safe_add(loans.get(loan_token), owed_interest)?;
    if owed == 0 {
        return Err(BlockchainError::InvalidParameter(format!(
            "There is no loan on token {} in this vault",
            loan_token
        )));
    }

    let repaid = if pay_token == loan_token {
        let used = offered.min(owed);
        accounts::debit(storage, from, TokenAmount::new(loan_token, used))?;
        used
    } else {
        let penalty = payback_penalty(storage, loan_token, pay_token)?;
        attributes::ensure_unlocked(storage, pay_token)?;
        let pay_price = usd_price(storage, pay_token, false)?;
        let loan_price = usd_price(storage, loan_token, false)?;
        let net = COIN - penalty;

        let value = mul_div(multiply_amounts(offered, pay_price)?, net, COIN)?;
        let converted = divide_amounts(value, loan_price)?;
        let (used, cost) = if converted > owed {
            let needed = mul_div_ceil(mul_div_ceil(owed, loan_price, COIN)?, COIN, net)?;
            (owed, mul_div_ceil(needed, COIN, pay_price)?.min(offered))
        } else {
            (converted, offered)
        };
        if used <= 0 {
            return Err(BlockchainError::InvalidAmount(offered));
        }
        accounts::burn(storage, ctx, from, TokenAmount::new(pay_token, cost), Some(LiveAttribute::PaybackBurn))?;
        used
    };

    // interest first, then principal
    let interest_paid = repaid.min(owed_interest);
    let principal_paid = repaid - interest_paid;
    if pay_token == loan_token {
        accounts::credit_burn(
            storage,
            ctx,
            TokenAmount::new(loan_token, interest_paid),
            Some(LiveAttribute::PaybackBurn),
        )?;
        accounts::destroy(storage, TokenAmount::new(loan_token, principal_paid))?;
    }

    rate.interest_to_height = if interest_paid >= owed_interest {
        0
    } else {
        rate.interest_to_height
            .saturating_sub(interest_paid as u128 * HIGH_PRECISION_SCALER)
    };
    loans.sub(TokenAmount::new(loan_token, principal_paid))?;
    storage.set_vault_loans(vault_id, &loans)?;
    write_rate(storage, ctx, vault_id, loan_token, rate, scheme.rate)?;

    debug!(
        "vault {} paid back {} interest and {} principal of token {}",
        vault_id, interest_paid, principal_paid, loan_token
    );
    Ok(repaid)
}

/// Pays back loans, possibly with other tokens. Returns the loan token units
/// repaid per loan token.
pub fn payback_loan<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    message: &PaybackLoanMessage,
) -> Result<Balances, BlockchainError> {
    let vault = storage.get_vault_or_err(&message.vault_id)?;
    ensure_not_liquidating(&message.vault_id, &vault)?;
    if message.loans.is_empty() {
        return Err(BlockchainError::InvalidParameter("Nothing to pay back".to_owned()));
    }
    let scheme = storage.get_loan_scheme_or_err(&vault.scheme_id)?;

    let mut repaid = Balances::new();
    for (loan_token, payments) in message.loans.iter() {
        storage
            .get_loan_token(*loan_token)?
            .ok_or(BlockchainError::LoanTokenNotFound(*loan_token))?;
        attributes::ensure_unlocked(storage, *loan_token)?;
        if payments.is_empty() {
            return Err(BlockchainError::InvalidParameter(format!(
                "No payment given for loan token {}",
                loan_token
            )));
        }
        for (pay_token, offered) in payments.iter() {
            let units = payback_one(
                storage,
                ctx,
                &message.vault_id,
                &scheme,
                &message.from,
                *loan_token,
                pay_token,
                offered,
            )?;
            repaid.add(TokenAmount::new(*loan_token, units))?;
        }
    }
    Ok(repaid)
}

/// State of a vault as reported to clients. Values are -1 while the vault is
/// frozen or in liquidation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultInfo {
    pub vault_id: VaultId,
    pub owner: Script,
    pub loan_scheme_id: String,
    pub state: VaultState,
    pub collateral_amounts: Balances,
    // Principal and interest
    pub loan_amounts: Balances,
    pub interest_amounts: Balances,
    pub collateral_value: Amount,
    pub loan_value: Amount,
    pub interest_value: Amount,
    pub collateral_ratio: i64,
    pub informative_ratio: Amount,
    pub next_collateral_ratio: i64,
    pub batches: Vec<AuctionBatch>,
    pub liquidation_height: Option<u32>,
    pub liquidation_penalty: Option<Amount>,
}

pub fn get_vault_info<S: Storage>(storage: &S, ctx: &BlockContext, vault_id: &VaultId) -> Result<VaultInfo, BlockchainError> {
    let vault = storage.get_vault_or_err(vault_id)?;
    let scheme = storage.get_loan_scheme_or_err(&vault.scheme_id)?;

    let mut loan_amounts = Balances::new();
    let mut interest_amounts = Balances::new();
    for (token_id, (principal, interest)) in outstanding(storage, vault_id, ctx.height)? {
        loan_amounts.add(TokenAmount::new(token_id, safe_add(principal, interest)?))?;
        interest_amounts.add(TokenAmount::new(token_id, interest))?;
    }

    let mut info = VaultInfo {
        vault_id: *vault_id,
        owner: vault.owner.clone(),
        loan_scheme_id: vault.scheme_id.clone(),
        state: VaultState::Active,
        collateral_amounts: storage.get_vault_collateral(vault_id)?,
        loan_amounts,
        interest_amounts,
        collateral_value: -1,
        loan_value: -1,
        interest_value: -1,
        collateral_ratio: -1,
        informative_ratio: -1,
        next_collateral_ratio: -1,
        batches: Vec::new(),
        liquidation_height: None,
        liquidation_penalty: None,
    };

    if vault.under_liquidation {
        info.state = VaultState::InLiquidation;
        info.batches = storage.list_auction_batches(vault_id)?;
        if let Some(auction) = storage.get_auction(vault_id)? {
            info.liquidation_height = Some(auction.liquidation_height);
            info.liquidation_penalty = Some(auction.liquidation_penalty);
        }
        return Ok(info);
    }

    let (active, next) = match (
        evaluate(storage, ctx, vault_id, false),
        evaluate(storage, ctx, vault_id, true),
    ) {
        (Ok(active), Ok(next)) => (active, next),
        (Err(e), _) | (_, Err(e)) if is_frozen(&e) => {
            info.state = VaultState::Frozen;
            return Ok(info);
        }
        (Err(e), _) | (_, Err(e)) => return Err(e),
    };

    info.state = if active.is_below(scheme.ratio) || next.is_below(scheme.ratio) {
        VaultState::MayLiquidate
    } else {
        VaultState::Active
    };
    info.collateral_value = active.collateral;
    info.loan_value = active.loans;
    info.interest_value = active.interest;
    info.collateral_ratio = active.ratio();
    info.informative_ratio = active.precise_ratio();
    info.next_collateral_ratio = next.ratio();
    Ok(info)
}

pub fn vault_state<S: Storage>(storage: &S, ctx: &BlockContext, vault_id: &VaultId) -> Result<VaultState, BlockchainError> {
    Ok(get_vault_info(storage, ctx, vault_id)?.state)
}

struct Liquidation {
    batches: Vec<AuctionBatch>,
    collateral: Balances,
    valuation: Valuation,
}

// Even split of `total` in `count` parts, the last one takes the remainder
fn slice(total: Amount, count: Amount, index: Amount) -> Amount {
    let part = total / count;
    if index + 1 == count {
        total - part * (count - 1)
    } else {
        part
    }
}

// Per loan token, the collateral pro rata to its USD value split in as many
// batches as needed to keep each under the batch limit
fn build_batches<S: Storage>(storage: &S, ctx: &BlockContext, vault_id: &VaultId) -> Result<Liquidation, BlockchainError> {
    let valuation = evaluate(storage, ctx, vault_id, false)?;
    let collateral = storage.get_vault_collateral(vault_id)?;

    let mut debts = Vec::new();
    let mut total_value: i128 = 0;
    for (token_id, (principal, interest)) in outstanding(storage, vault_id, ctx.height)? {
        let price = usd_price(storage, token_id, false)?;
        let value = multiply_amounts(safe_add(principal, interest)?, price)?;
        total_value += value as i128;
        debts.push((token_id, principal, interest, value));
    }
    if debts.is_empty() {
        return Err(BlockchainError::InvalidState(format!("Vault {} has no loans", vault_id)));
    }

    let limit = ctx.params.max_loan_per_batch.max(1) as i128;
    let mut allocated = Balances::new();
    let mut batches = Vec::new();
    let last = debts.len() - 1;
    for (position, (token_id, principal, interest, value)) in debts.into_iter().enumerate() {
        let mut share = Balances::new();
        for (collateral_token, amount) in collateral.iter() {
            let part = if position == last {
                safe_sub(amount, allocated.get(collateral_token))?
            } else if total_value > 0 {
                (amount as i128 * value as i128 / total_value) as Amount
            } else {
                0
            };
            share.set(collateral_token, part);
            allocated.add_signed(collateral_token, part)?;
        }

        let count = ((value as i128 + limit - 1) / limit).max(1) as Amount;
        for index in 0..count {
            let mut collaterals = Balances::new();
            for (collateral_token, amount) in share.iter() {
                collaterals.set(collateral_token, slice(amount, count, index));
            }
            batches.push(AuctionBatch {
                collaterals,
                loan_amount: TokenAmount::new(token_id, slice(principal, count, index)),
                loan_interest: slice(interest, count, index),
                bids: Vec::new(),
            });
        }
    }

    Ok(Liquidation {
        batches,
        collateral,
        valuation,
    })
}

// Moves everything the vault holds into auction batches
fn start_auction<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    vault_id: &VaultId,
    vault: &mut Vault,
    batches: &[AuctionBatch],
) -> Result<AuctionData, BlockchainError> {
    for (token_id, _) in storage.list_interest_rates(vault_id)? {
        storage.remove_interest_rate(vault_id, token_id)?;
    }
    storage.set_vault_collateral(vault_id, &Balances::new())?;
    storage.set_vault_loans(vault_id, &Balances::new())?;

    for (index, batch) in batches.iter().enumerate() {
        storage.set_auction_batch(vault_id, index as u32, batch)?;
    }
    let auction = AuctionData {
        batch_count: batches.len() as u32,
        liquidation_height: ctx.height,
        end_height: ctx.height + ctx.params.auction_duration.max(1),
        liquidation_penalty: ctx.params.liquidation_penalty,
    };
    storage.set_auction(vault_id, &auction)?;

    vault.under_liquidation = true;
    storage.set_vault(vault_id, vault)?;
    Ok(auction)
}

fn liquidate_vault<S: Storage>(storage: &mut S, ctx: &BlockContext, vault_id: &VaultId) -> Result<(), BlockchainError> {
    let mut vault = storage.get_vault_or_err(vault_id)?;
    let liquidation = build_batches(storage, ctx, vault_id)?;
    let auction = start_auction(storage, ctx, vault_id, &mut vault, &liquidation.batches)?;

    let snapshot = VaultSnapshot {
        state: VaultState::InLiquidation,
        collateral_amounts: liquidation.collateral,
        collateral_value: liquidation.valuation.collateral,
        collateral_ratio: liquidation.valuation.ratio(),
        batches: liquidation.batches,
    };
    history::record_vault(
        storage,
        ctx.height,
        ENGINE_TX_INDEX,
        Hash::zero(),
        vault_id,
        HistoryKind::Engine(EngineEvent::Liquidation),
        &vault.owner,
        Balances::new(),
        Some(snapshot),
    )?;

    metrics::counter!("tessera_vaults_liquidated").increment(1);
    info!(
        "vault {} liquidated at height {} into {} batches ending at {}",
        vault_id, ctx.height, auction.batch_count, auction.end_height
    );
    Ok(())
}

fn check_vault<S: Storage>(storage: &mut S, ctx: &BlockContext, vault_id: &VaultId) -> Result<bool, BlockchainError> {
    let Some(vault) = storage.get_vault(vault_id)? else {
        return Ok(false);
    };
    if vault.under_liquidation {
        return Ok(false);
    }
    let scheme = storage.get_loan_scheme_or_err(&vault.scheme_id)?;
    let valuation = match evaluate(storage, ctx, vault_id, false) {
        Ok(valuation) => valuation,
        Err(e) if is_frozen(&e) => {
            if log::log_enabled!(log::Level::Trace) {
                trace!("vault {} is frozen: {}", vault_id, e);
            }
            return Ok(false);
        }
        Err(e) => return Err(e),
    };
    if !valuation.is_below(scheme.ratio) {
        return Ok(false);
    }
    liquidate_vault(storage, ctx, vault_id)?;
    Ok(true)
}

/// End of block sweep over every vault with loans. A vault that cannot be
/// evaluated is skipped, the block never fails here.
pub fn check_liquidations<S: Storage>(storage: &mut S, ctx: &BlockContext) -> Result<usize, BlockchainError> {
    let mut liquidated = 0;
    for vault_id in storage.list_loan_vaults()? {
        storage.start_snapshot()?;
        match check_vault(storage, ctx, &vault_id) {
            Ok(done) => {
                storage.end_snapshot(true)?;
                if done {
                    liquidated += 1;
                }
            }
            Err(e) => {
                warn!("skipping liquidation check of vault {}: {}", vault_id, e);
                storage.end_snapshot(false)?;
            }
        }
    }
    Ok(liquidated)
}

pub fn place_bid<S: Storage>(storage: &mut S, ctx: &BlockContext, message: &AuctionBidMessage) -> Result<(), BlockchainError> {
    let auction = storage
        .get_auction(&message.vault_id)?
        .ok_or(BlockchainError::AuctionNotFound(message.vault_id, message.index))?;
    let mut batch = storage
        .get_auction_batch(&message.vault_id, message.index)?
        .ok_or(BlockchainError::AuctionNotFound(message.vault_id, message.index))?;
    if message.amount.token_id != batch.loan_amount.token_id {
        return Err(BlockchainError::InvalidParameter(
            "Bid token does not match the auction one".to_owned(),
        ));
    }
    attributes::ensure_unlocked(storage, message.amount.token_id)?;

    let min = match batch.highest_bid() {
        Some(previous) => mul_div_ceil(previous.amount.amount, COIN + MIN_BID_INCREMENT, COIN)?,
        None => mul_div_ceil(
            safe_add(batch.loan_amount.amount, batch.loan_interest)?,
            COIN + auction.liquidation_penalty,
            COIN,
        )?,
    };
    if message.amount.amount < min {
        return Err(BlockchainError::BidTooLow {
            bid: message.amount.amount,
            min,
        });
    }

    accounts::debit(storage, &message.from, message.amount)?;
    if let Some(previous) = batch.highest_bid().cloned() {
        accounts::credit(storage, &previous.owner, previous.amount)?;
        debug!("refunded {} to outbid {}", previous.amount, previous.owner);
    }
    batch.bids.push(Bid {
        owner: message.from.clone(),
        amount: message.amount,
        height: ctx.height,
    });
    storage.set_auction_batch(&message.vault_id, message.index, &batch)
}

fn settle_batch<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    vault_id: &VaultId,
    vault: &Vault,
    auction: &AuctionData,
    batch: &AuctionBatch,
    bid: &Bid,
) -> Result<(), BlockchainError> {
    accounts::credit_all(storage, &bid.owner, &batch.collaterals)?;

    let loan = batch.loan_amount;
    let debt = safe_add(loan.amount, batch.loan_interest)?;
    let penalty = mul_div(debt, auction.liquidation_penalty, COIN)?;
    let burnt = safe_add(batch.loan_interest, penalty)?;
    let excess = safe_sub(safe_sub(bid.amount.amount, loan.amount)?, burnt)?;
    if excess < 0 {
        return Err(BlockchainError::InvalidState(format!(
            "Winning bid {} does not cover the batch debt of vault {}",
            bid.amount, vault_id
        )));
    }

    // the repaid principal leaves the supply, interest and penalty are burnt
    accounts::destroy(storage, loan)?;
    accounts::credit_burn(
        storage,
        ctx,
        TokenAmount::new(loan.token_id, burnt),
        Some(LiveAttribute::AuctionBurn),
    )?;
    accounts::credit(storage, &vault.owner, TokenAmount::new(loan.token_id, excess))?;

    history::record_engine(storage, ctx, EngineEvent::AuctionWon, &bid.owner, batch.collaterals.clone())?;
    if excess > 0 {
        history::record_engine(
            storage,
            ctx,
            EngineEvent::AuctionRefund,
            &vault.owner,
            Balances::from_single(loan.token_id, excess),
        )?;
    }
    let mut settled = Balances::new();
    settled.add_signed(loan.token_id, -loan.amount)?;
    history::record_vault(
        storage,
        ctx.height,
        ENGINE_TX_INDEX,
        Hash::zero(),
        vault_id,
        HistoryKind::Engine(EngineEvent::LoanSettled),
        &bid.owner,
        settled,
        None,
    )
}

fn settle_auction<S: Storage>(storage: &mut S, ctx: &BlockContext, vault_id: &VaultId) -> Result<(), BlockchainError> {
    let Some(auction) = storage.get_auction(vault_id)? else {
        return Ok(());
    };
    let mut vault = storage.get_vault_or_err(vault_id)?;

    let mut unbid = Vec::new();
    for index in 0..auction.batch_count {
        let Some(batch) = storage.get_auction_batch(vault_id, index)? else {
            continue;
        };
        match batch.highest_bid().cloned() {
            Some(bid) => settle_batch(storage, ctx, vault_id, &vault, &auction, &batch, &bid)?,
            None => unbid.push(batch),
        }
    }
    storage.remove_auction(vault_id)?;

    if unbid.is_empty() {
        vault.under_liquidation = false;
        storage.set_vault(vault_id, &vault)?;
        info!("auction of vault {} closed with every batch sold", vault_id);
        return Ok(());
    }

    // unbid batches return to the vault before it is auctioned again
    let mut collateral = Balances::new();
    let mut loans = Balances::new();
    let mut interest = Balances::new();
    for batch in unbid.iter() {
        collateral.add_all(&batch.collaterals)?;
        loans.add(batch.loan_amount)?;
        interest.add(TokenAmount::new(batch.loan_amount.token_id, batch.loan_interest))?;
    }
    storage.set_vault_collateral(vault_id, &collateral)?;
    storage.set_vault_loans(vault_id, &loans)?;
    for (token_id, amount) in interest.iter() {
        storage.set_interest_rate(
            vault_id,
            token_id,
            &InterestRate {
                height: ctx.height,
                interest_per_block: 0,
                interest_to_height: amount as u128 * HIGH_PRECISION_SCALER,
            },
        )?;
    }

    let batches = match build_batches(storage, ctx, vault_id) {
        Ok(liquidation) => liquidation.batches,
        Err(e) if is_frozen(&e) => {
            debug!("vault {} is frozen, restarting with the same batches: {}", vault_id, e);
            unbid
        }
        Err(e) => return Err(e),
    };
    let restarted = start_auction(storage, ctx, vault_id, &mut vault, &batches)?;
    history::record_vault(
        storage,
        ctx.height,
        ENGINE_TX_INDEX,
        Hash::zero(),
        vault_id,
        HistoryKind::Engine(EngineEvent::AuctionRestart),
        &vault.owner,
        Balances::new(),
        None,
    )?;
    info!(
        "auction of vault {} restarted with {} batches until {}",
        vault_id, restarted.batch_count, restarted.end_height
    );
    Ok(())
}

/// Closes the auctions ending at the current height. An auction that fails
/// to settle is rolled back and moved to the next height.
pub fn settle_auctions<S: Storage>(storage: &mut S, ctx: &BlockContext) -> Result<usize, BlockchainError> {
    let mut settled = 0;
    for vault_id in storage.get_auctions_ending_at(ctx.height)? {
        storage.start_snapshot()?;
        match settle_auction(storage, ctx, &vault_id) {
            Ok(()) => {
                storage.end_snapshot(true)?;
                settled += 1;
            }
            Err(e) => {
                storage.end_snapshot(false)?;
                // the next block settles it again
                if let Some(mut auction) = storage.get_auction(&vault_id)? {
                    auction.end_height = ctx.height + 1;
                    storage.set_auction(&vault_id, &auction)?;
                }
                warn!("cannot settle auction of vault {}, retrying at {}: {}", vault_id, ctx.height + 1, e);
            }
        }
    }
    Ok(settled)
}
