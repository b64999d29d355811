// Custom transaction interpreter
//
// This module decodes the payload carried by a custom transaction, checks the
// authorization its message requires and hands it to the engine owning it.
// Every transaction runs inside its own nested snapshot: a failing one leaves
// neither state nor history behind and is rejected from the block.

use log::{debug, trace};
use tessera_common::{
    amount::{safe_add, Amount, Balances, TokenAmount, NATIVE_TOKEN},
    loan::VaultId,
    script::Script,
    token::TOKEN_FLAG_DAT,
    transaction::{
        AccountToAccountMessage, AccountToUtxosMessage, AnyAccountsToAccountsMessage, CustomTransaction,
        CustomTxMessage, CustomTxType, MintTokensMessage, UpdateTokenMessage, UtxosToAccountMessage,
    },
};

use super::{
    accounts, attributes,
    context::TxContext,
    dex::{self, PathSelector},
    error::BlockchainError,
    evm::{self, EvmQueue},
    governance, history,
    hard_fork::HardFork,
    loans, oracle,
    storage::Storage,
    tokens,
};

/// Fork a transaction type needs before it is accepted.
pub fn required_fork(kind: CustomTxType) -> Option<HardFork> {
    use CustomTxType::*;
    match kind {
        CreateToken | MintToken | BurnToken | UpdateToken | UtxosToAccount | AccountToUtxos | AccountToAccount => None,
        AnyAccountsToAccounts | CreatePoolPair | UpdatePoolPair | PoolSwap | AddPoolLiquidity | RemovePoolLiquidity
        | SetGovVariable => Some(HardFork::Bayfront),
        AppointOracle | RemoveOracle | UpdateOracle | SetOracleData => Some(HardFork::Eunos),
        PoolSwapV2 | SetCollateralToken | SetLoanToken | UpdateLoanToken | LoanScheme | DefaultLoanScheme
        | DestroyLoanScheme | Vault | CloseVault | UpdateVault | DepositToVault | WithdrawFromVault | TakeLoan
        | PaybackLoan | AuctionBid | SetGovVariableHeight => Some(HardFork::FortCanning),
        CreateCfp | CreateVoc | Vote => Some(HardFork::GrandCentral),
        TransferDomain | EvmTx => Some(HardFork::Metachain),
    }
}

fn require_auth(tx: &CustomTransaction, script: &Script) -> Result<(), BlockchainError> {
    if tx.has_auth(script) {
        Ok(())
    } else {
        Err(BlockchainError::MissingAuth(script.to_string()))
    }
}

fn require_foundation(tx: &CustomTransaction, ctx: &TxContext) -> Result<(), BlockchainError> {
    if tx.auth.iter().any(|script| ctx.block.params.is_foundation_member(script)) {
        Ok(())
    } else {
        Err(BlockchainError::Unauthorized("Transaction is not signed by a foundation member".to_owned()))
    }
}

fn ensure_positive(balances: &Balances) -> Result<(), BlockchainError> {
    if balances.is_empty() {
        return Err(BlockchainError::InvalidParameter("No amounts given".to_owned()));
    }
    for (_, amount) in balances.iter() {
        if amount <= 0 {
            return Err(BlockchainError::InvalidAmount(amount));
        }
    }
    Ok(())
}

// Sum per token of every balance of an accounts map
fn sum_accounts<'a>(accounts: impl Iterator<Item = &'a Balances>) -> Result<Balances, BlockchainError> {
    let mut total = Balances::new();
    for balances in accounts {
        ensure_positive(balances)?;
        total.add_all(balances)?;
    }
    Ok(total)
}

fn native_only(balances: &Balances) -> Result<Amount, BlockchainError> {
    if balances.tokens().any(|token_id| token_id != NATIVE_TOKEN) {
        return Err(BlockchainError::InvalidParameter(
            "Only the native token can be moved from or to UTXOs".to_owned(),
        ));
    }
    Ok(balances.get(NATIVE_TOKEN))
}

fn utxos_to_account<S: Storage>(
    storage: &mut S,
    tx: &CustomTransaction,
    message: &UtxosToAccountMessage,
) -> Result<(), BlockchainError> {
    let total = sum_accounts(message.to.values())?;
    let amount = native_only(&total)?;
    if amount != tx.burnt_value() {
        return Err(BlockchainError::AmountMismatch);
    }
    for (owner, balances) in message.to.iter() {
        accounts::mint(storage, owner, TokenAmount::new(NATIVE_TOKEN, balances.get(NATIVE_TOKEN)))?;
    }
    Ok(())
}

fn account_to_utxos<S: Storage>(
    storage: &mut S,
    tx: &CustomTransaction,
    message: &AccountToUtxosMessage,
) -> Result<(), BlockchainError> {
    require_auth(tx, &message.from)?;
    ensure_positive(&message.balances)?;
    let amount = native_only(&message.balances)?;

    let start = message.minting_outputs_start as usize;
    if start == 0 || start > tx.outputs.len() {
        return Err(BlockchainError::InvalidParameter(format!("Invalid minting outputs start {}", start)));
    }
    let mut minted = 0;
    for out in tx.outputs[start..].iter() {
        minted = safe_add(minted, out.value)?;
    }
    if minted != amount {
        return Err(BlockchainError::AmountMismatch);
    }

    let value = TokenAmount::new(NATIVE_TOKEN, amount);
    accounts::debit(storage, &message.from, value)?;
    accounts::destroy(storage, value)
}

fn account_to_account<S: Storage>(
    storage: &mut S,
    tx: &CustomTransaction,
    message: &AccountToAccountMessage,
) -> Result<(), BlockchainError> {
    require_auth(tx, &message.from)?;
    sum_accounts(message.to.values())?;
    for (to, balances) in message.to.iter() {
        for (token_id, amount) in balances.iter() {
            attributes::ensure_unlocked(storage, token_id)?;
            accounts::transfer(storage, &message.from, to, TokenAmount::new(token_id, amount))?;
        }
    }
    Ok(())
}

fn any_accounts_to_accounts<S: Storage>(
    storage: &mut S,
    tx: &CustomTransaction,
    message: &AnyAccountsToAccountsMessage,
) -> Result<(), BlockchainError> {
    for from in message.from.keys() {
        require_auth(tx, from)?;
    }
    let sent = sum_accounts(message.from.values())?;
    let received = sum_accounts(message.to.values())?;
    if sent != received {
        return Err(BlockchainError::AmountMismatch);
    }
    for token_id in sent.tokens() {
        attributes::ensure_unlocked(storage, token_id)?;
    }

    for (from, balances) in message.from.iter() {
        accounts::debit_all(storage, from, balances)?;
    }
    for (to, balances) in message.to.iter() {
        accounts::credit_all(storage, to, balances)?;
    }
    Ok(())
}

fn mint_tokens<S: Storage>(
    storage: &mut S,
    ctx: &TxContext,
    tx: &CustomTransaction,
    message: &MintTokensMessage,
) -> Result<(), BlockchainError> {
    let mut owner = None;
    for token_id in message.amounts.tokens() {
        let token = storage.get_token_or_err(token_id)?;
        if !tx.has_auth(&token.owner) && !(token.is_dat() && require_foundation(tx, ctx).is_ok()) {
            return Err(BlockchainError::MissingAuth(token.owner.to_string()));
        }
        owner.get_or_insert(token.owner);
    }
    // an empty destination credits the owner of the first token
    let to = match owner {
        Some(owner) if message.to.is_empty() => owner,
        _ => message.to.clone(),
    };
    tokens::mint_tokens(storage, message, &to)
}

fn update_token<S: Storage>(
    storage: &mut S,
    ctx: &TxContext,
    tx: &CustomTransaction,
    message: &UpdateTokenMessage,
) -> Result<(), BlockchainError> {
    let token = storage.get_token_or_err(message.token_id)?;
    if token.is_dat() || message.flags & TOKEN_FLAG_DAT != 0 {
        require_foundation(tx, ctx)?;
    } else {
        require_auth(tx, &token.owner)?;
    }
    tokens::update_token(storage, message)
}

fn vault_owner<S: Storage>(storage: &S, vault_id: &VaultId) -> Result<Script, BlockchainError> {
    Ok(storage.get_vault_or_err(vault_id)?.owner)
}

// Runs the message against the engines, without snapshot handling
fn dispatch<S: Storage>(
    storage: &mut S,
    ctx: &TxContext,
    tx: &CustomTransaction,
    queue: &mut EvmQueue,
    message: &CustomTxMessage,
) -> Result<(), BlockchainError> {
    let block = &ctx.block;
    let hash = ctx.hash;
    match message {
        CustomTxMessage::CreateToken(msg) => {
            if msg.flags & TOKEN_FLAG_DAT != 0 {
                require_foundation(tx, ctx)?;
            }
            let owner = tx
                .auth
                .first()
                .ok_or_else(|| BlockchainError::MissingAuth("token owner".to_owned()))?;
            tokens::create_token(storage, block, hash, owner, msg)?;
        }
        CustomTxMessage::MintToken(msg) => mint_tokens(storage, ctx, tx, msg)?,
        CustomTxMessage::BurnToken(msg) => {
            require_auth(tx, &msg.from)?;
            tokens::burn_tokens(storage, block, msg)?;
        }
        CustomTxMessage::UpdateToken(msg) => update_token(storage, ctx, tx, msg)?,
        CustomTxMessage::UtxosToAccount(msg) => utxos_to_account(storage, tx, msg)?,
        CustomTxMessage::AccountToUtxos(msg) => account_to_utxos(storage, tx, msg)?,
        CustomTxMessage::AccountToAccount(msg) => account_to_account(storage, tx, msg)?,
        CustomTxMessage::AnyAccountsToAccounts(msg) => any_accounts_to_accounts(storage, tx, msg)?,
        CustomTxMessage::CreatePoolPair(msg) => {
            require_foundation(tx, ctx)?;
            dex::create_pool_pair(storage, block, hash, msg)?;
        }
        CustomTxMessage::UpdatePoolPair(msg) => {
            require_foundation(tx, ctx)?;
            dex::update_pool_pair(storage, msg)?;
        }
        CustomTxMessage::PoolSwap(msg) => {
            require_auth(tx, &msg.from)?;
            dex::pool_swap(storage, block, msg, &PathSelector::Direct)?;
        }
        CustomTxMessage::PoolSwapV2(msg) => {
            require_auth(tx, &msg.swap.from)?;
            let selector = if msg.pool_ids.is_empty() {
                PathSelector::Auto
            } else {
                PathSelector::Explicit(msg.pool_ids.clone())
            };
            dex::pool_swap(storage, block, &msg.swap, &selector)?;
        }
        CustomTxMessage::AddPoolLiquidity(msg) => {
            for from in msg.from.keys() {
                require_auth(tx, from)?;
            }
            dex::add_liquidity(storage, msg)?;
        }
        CustomTxMessage::RemovePoolLiquidity(msg) => {
            require_auth(tx, &msg.from)?;
            dex::remove_liquidity(storage, msg)?;
        }
        CustomTxMessage::SetGovVariable(msg) => {
            require_foundation(tx, ctx)?;
            attributes::set_gov(storage, block, &msg.variables)?;
        }
        CustomTxMessage::SetGovVariableHeight(msg) => {
            require_foundation(tx, ctx)?;
            attributes::set_gov_height(storage, block, &msg.variables, msg.start_height)?;
        }
        CustomTxMessage::AppointOracle(msg) => {
            require_foundation(tx, ctx)?;
            oracle::appoint_oracle(storage, &oracle::oracle_id(hash), msg)?;
        }
        CustomTxMessage::RemoveOracle(msg) => {
            require_foundation(tx, ctx)?;
            oracle::remove_oracle(storage, &msg.oracle_id)?;
        }
        CustomTxMessage::UpdateOracle(msg) => {
            require_foundation(tx, ctx)?;
            oracle::update_oracle(storage, msg)?;
        }
        CustomTxMessage::SetOracleData(msg) => {
            let owner = storage.get_oracle_or_err(&msg.oracle_id)?.owner;
            require_auth(tx, &owner)?;
            oracle::set_oracle_data(storage, block, &msg.oracle_id, msg.timestamp, &msg.prices)?;
        }
        CustomTxMessage::SetCollateralToken(msg) => {
            require_foundation(tx, ctx)?;
            loans::set_collateral_token(storage, block, hash, msg)?;
        }
        CustomTxMessage::SetLoanToken(msg) => {
            require_foundation(tx, ctx)?;
            loans::set_loan_token(storage, block, hash, msg)?;
        }
        CustomTxMessage::UpdateLoanToken(msg) => {
            require_foundation(tx, ctx)?;
            loans::update_loan_token(storage, block, msg)?;
        }
        CustomTxMessage::LoanScheme(msg) => {
            require_foundation(tx, ctx)?;
            loans::set_loan_scheme(storage, block, msg)?;
        }
        CustomTxMessage::DefaultLoanScheme(msg) => {
            require_foundation(tx, ctx)?;
            loans::set_default_loan_scheme(storage, msg)?;
        }
        CustomTxMessage::DestroyLoanScheme(msg) => {
            require_foundation(tx, ctx)?;
            loans::destroy_loan_scheme(storage, block, msg)?;
        }
        CustomTxMessage::Vault(msg) => {
            loans::create_vault(storage, block, hash, msg, tx.burnt_value())?;
        }
        CustomTxMessage::CloseVault(msg) => {
            require_auth(tx, &vault_owner(storage, &msg.vault_id)?)?;
            loans::close_vault(storage, block, msg)?;
        }
        CustomTxMessage::UpdateVault(msg) => {
            require_auth(tx, &vault_owner(storage, &msg.vault_id)?)?;
            loans::update_vault(storage, block, msg)?;
        }
        CustomTxMessage::DepositToVault(msg) => {
            require_auth(tx, &msg.from)?;
            loans::deposit_to_vault(storage, block, msg)?;
        }
        CustomTxMessage::WithdrawFromVault(msg) => {
            require_auth(tx, &vault_owner(storage, &msg.vault_id)?)?;
            loans::withdraw_from_vault(storage, block, msg)?;
        }
        CustomTxMessage::TakeLoan(msg) => {
            require_auth(tx, &vault_owner(storage, &msg.vault_id)?)?;
            loans::take_loan(storage, block, msg)?;
        }
        CustomTxMessage::PaybackLoan(msg) => {
            require_auth(tx, &msg.from)?;
            loans::payback_loan(storage, block, msg)?;
        }
        CustomTxMessage::AuctionBid(msg) => {
            require_auth(tx, &msg.from)?;
            loans::place_bid(storage, block, msg)?;
        }
        CustomTxMessage::CreateCfp(msg) => {
            governance::create_proposal(storage, block, hash, true, msg, tx.burnt_value())?;
        }
        CustomTxMessage::CreateVoc(msg) => {
            governance::create_proposal(storage, block, hash, false, msg, tx.burnt_value())?;
        }
        CustomTxMessage::Vote(msg) => {
            let operator = storage.get_masternode_or_err(&msg.masternode_id)?.operator;
            require_auth(tx, &operator)?;
            governance::vote(storage, ctx, msg)?;
        }
        CustomTxMessage::TransferDomain(msg) => {
            for item in msg.transfers.iter() {
                require_auth(tx, &item.src.address)?;
            }
            evm::transfer_domain(storage, ctx, queue, msg)?;
        }
        CustomTxMessage::EvmTx(msg) => {
            evm::queue_evm_tx(storage, ctx, queue, msg)?;
        }
    }
    Ok(())
}

/// Applies one custom transaction. On error nothing it did is kept.
pub fn apply_custom_tx<S: Storage>(
    storage: &mut S,
    ctx: &TxContext,
    tx: &CustomTransaction,
    queue: &mut EvmQueue,
) -> Result<CustomTxType, BlockchainError> {
    let message = tx.message()?;
    let kind = message.tx_type();
    if let Some(fork) = required_fork(kind) {
        if !ctx.block.is_active(fork) {
            return Err(BlockchainError::ForkNotActive(fork));
        }
    }

    if log::log_enabled!(log::Level::Trace) {
        trace!("applying {} {} at height {}", kind, tx.hash, ctx.block.height);
    }

    let checkpoint = queue.checkpoint();
    storage.start_snapshot()?;
    let result = dispatch(storage, ctx, tx, queue, &message).and_then(|_| {
        let deltas = storage.staged_balance_deltas()?;
        history::record_tx_deltas(storage, ctx, kind, deltas)
    });

    match result {
        Ok(()) => {
            storage.end_snapshot(true)?;
            metrics::counter!("tessera_custom_txs", "type" => kind.to_string()).increment(1);
            Ok(kind)
        }
        Err(e) => {
            storage.end_snapshot(false)?;
            queue.rollback(checkpoint);
            debug!("rejected {} {}: {}", kind, tx.hash, e);
            metrics::counter!("tessera_custom_txs_rejected", "kind" => e.kind().to_string()).increment(1);
            Err(e)
        }
    }
}
