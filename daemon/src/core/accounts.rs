// Account movements
//
// Every balance change that crosses an engine boundary goes through this
// module: value entering the engine is minted, value leaving it is destroyed
// and burns land on the burn script. LP share movements settle the pool
// rewards of the holder before the balance changes.

use std::collections::BTreeMap;

use log::{debug, trace};
use serde::Serialize;
use tessera_common::{
    amount::{safe_add, safe_sub, Amount, Balances, TokenAmount, TokenId, NATIVE_TOKEN},
    attributes::LiveAttribute,
    governance::ProposalStatus,
    script::Script,
};

use super::{
    attributes,
    context::BlockContext,
    dex,
    error::BlockchainError,
    storage::Storage,
};

// LP shares carry pending rewards that must be settled before the balance moves
fn settle_pool_share<S: Storage>(storage: &mut S, owner: &Script, token_id: TokenId) -> Result<(), BlockchainError> {
    if token_id == NATIVE_TOKEN {
        return Ok(());
    }
    if storage.get_pool(token_id)?.is_some() {
        dex::claim_rewards(storage, token_id, owner)?;
    }
    Ok(())
}

pub fn credit<S: Storage>(storage: &mut S, owner: &Script, value: TokenAmount) -> Result<(), BlockchainError> {
    if value.amount == 0 {
        return Ok(());
    }
    settle_pool_share(storage, owner, value.token_id)?;
    storage.add_balance(owner, value)
}

pub fn debit<S: Storage>(storage: &mut S, owner: &Script, value: TokenAmount) -> Result<(), BlockchainError> {
    if value.amount == 0 {
        return Ok(());
    }
    settle_pool_share(storage, owner, value.token_id)?;
    storage.sub_balance(owner, value)
}

pub fn credit_all<S: Storage>(storage: &mut S, owner: &Script, balances: &Balances) -> Result<(), BlockchainError> {
    for (token_id, amount) in balances.iter() {
        credit(storage, owner, TokenAmount::new(token_id, amount))?;
    }
    Ok(())
}

pub fn debit_all<S: Storage>(storage: &mut S, owner: &Script, balances: &Balances) -> Result<(), BlockchainError> {
    for (token_id, amount) in balances.iter() {
        debit(storage, owner, TokenAmount::new(token_id, amount))?;
    }
    Ok(())
}

pub fn transfer<S: Storage>(
    storage: &mut S,
    from: &Script,
    to: &Script,
    value: TokenAmount,
) -> Result<(), BlockchainError> {
    if log::log_enabled!(log::Level::Trace) {
        trace!("transfer {} from {} to {}", value, from, to);
    }
    debit(storage, from, value)?;
    credit(storage, to, value)
}

/// Creates new units of a token and credits them.
pub fn mint<S: Storage>(storage: &mut S, to: &Script, value: TokenAmount) -> Result<(), BlockchainError> {
    if value.amount < 0 {
        return Err(BlockchainError::InvalidAmount(value.amount));
    }
    add_minted(storage, value)?;
    credit(storage, to, value)
}

// Units entering the engine without an account, e.g. burnt UTXO value
pub fn add_minted<S: Storage>(storage: &mut S, value: TokenAmount) -> Result<(), BlockchainError> {
    if value.amount == 0 {
        return Ok(());
    }
    let mut token = storage.get_token_or_err(value.token_id)?;
    token.minted = safe_add(token.minted, value.amount)?;
    if token.limit > 0 && token.minted > token.limit {
        return Err(BlockchainError::LimitReached(format!(
            "Token {} minted supply would exceed its limit of {}",
            token.symbol, token.limit
        )));
    }
    storage.set_token(value.token_id, &token)
}

/// Removes units already taken out of every holder from the minted supply.
pub fn destroy<S: Storage>(storage: &mut S, value: TokenAmount) -> Result<(), BlockchainError> {
    if value.amount == 0 {
        return Ok(());
    }
    let mut token = storage.get_token_or_err(value.token_id)?;
    let minted = safe_sub(token.minted, value.amount)?;
    if minted < 0 {
        return Err(BlockchainError::InvalidState(format!(
            "Cannot destroy {} units of {}, only {} minted",
            value.amount, token.symbol, token.minted
        )));
    }
    token.minted = minted;
    storage.set_token(value.token_id, &token)
}

/// Moves units from an account to the burn script.
pub fn burn<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    from: &Script,
    value: TokenAmount,
    live: Option<LiveAttribute>,
) -> Result<(), BlockchainError> {
    debit(storage, from, value)?;
    credit_burn(storage, ctx, value, live)
}

// Credits the burn script with units that already left their holder
pub fn credit_burn<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    value: TokenAmount,
    live: Option<LiveAttribute>,
) -> Result<(), BlockchainError> {
    if value.amount == 0 {
        return Ok(());
    }
    storage.add_balance(ctx.burn_address(), value)?;
    if let Some(live) = live {
        attributes::add_live(storage, live, value)?;
    }
    Ok(())
}

/// Supply of one token compared with what the engine holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyAudit {
    pub minted: Amount,
    pub held: Amount,
}

impl SupplyAudit {
    pub fn is_balanced(&self) -> bool {
        self.minted == self.held
    }
}

fn hold(held: &mut BTreeMap<TokenId, Amount>, token_id: TokenId, amount: Amount) -> Result<(), BlockchainError> {
    let entry = held.entry(token_id).or_insert(0);
    *entry = safe_add(*entry, amount)?;
    Ok(())
}

/// Compares the minted supply of every token with the units held by
/// accounts, pools, vaults, auctions, the EVM mirror and the escrows.
pub fn audit_supply<S: Storage>(storage: &S) -> Result<BTreeMap<TokenId, SupplyAudit>, BlockchainError> {
    let mut held: BTreeMap<TokenId, Amount> = BTreeMap::new();

    for (_, token_id, amount) in storage.list_balances()? {
        hold(&mut held, token_id, amount)?;
    }

    for (_, pool) in storage.list_pools()? {
        hold(&mut held, pool.token_a, pool.reserve_a)?;
        hold(&mut held, pool.token_b, pool.reserve_b)?;
        for (token_id, amount) in pool.reward_escrow.iter() {
            hold(&mut held, token_id, amount)?;
        }
    }

    for (vault_id, vault) in storage.list_vaults()? {
        hold(&mut held, NATIVE_TOKEN, vault.fee_escrow)?;
        for (token_id, amount) in storage.get_vault_collateral(&vault_id)?.iter() {
            hold(&mut held, token_id, amount)?;
        }
    }

    for (vault_id, _) in storage.list_auctions()? {
        for batch in storage.list_auction_batches(&vault_id)? {
            for (token_id, amount) in batch.collaterals.iter() {
                hold(&mut held, token_id, amount)?;
            }
            if let Some(bid) = batch.highest_bid() {
                hold(&mut held, bid.amount.token_id, bid.amount.amount)?;
            }
        }
    }

    for (_, token_id, amount) in storage.list_evm_balances()? {
        hold(&mut held, token_id, amount)?;
    }

    for (_, proposal) in storage.list_proposals()? {
        if proposal.status == ProposalStatus::Voting {
            hold(&mut held, NATIVE_TOKEN, proposal.fee_redistribution)?;
        }
    }

    let mut audit = BTreeMap::new();
    for (token_id, token) in storage.list_tokens()? {
        let entry = SupplyAudit {
            minted: token.minted,
            held: held.remove(&token_id).unwrap_or(0),
        };
        if !entry.is_balanced() {
            debug!(
                "supply of {} is unbalanced: minted {} held {}",
                token.symbol, entry.minted, entry.held
            );
        }
        audit.insert(token_id, entry);
    }

    // units held for a token that does not exist
    for (token_id, amount) in held {
        audit.insert(token_id, SupplyAudit { minted: 0, held: amount });
    }

    Ok(audit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::prelude::*;
    use crate::{
        config::ChainParams,
        core::{error::ErrorKind, storage::ChainStore},
    };
    use tessera_common::{crypto::Hash, token::Token};

    fn setup() -> ChainStore<crate::core::storage::MemoryBackend> {
        let mut store = ChainStore::in_memory();
        let token = Token {
            symbol: "DFI".to_owned(),
            name: "Default Defi token".to_owned(),
            decimal: 8,
            limit: 0,
            flags: 0x07,
            minted: 0,
            creation_tx: Hash::zero(),
            creation_height: 0,
            owner: Script::empty(),
        };
        store.set_token(NATIVE_TOKEN, &token).unwrap();
        store
    }

    #[test]
    fn test_mint_and_destroy_track_supply() {
        let mut store = setup();
        let alice = Script::p2pkh([1; 20]);
        mint(&mut store, &alice, TokenAmount::new(0, 100)).unwrap();
        assert!(audit_supply(&store).unwrap()[&0].is_balanced());

        debit(&mut store, &alice, TokenAmount::new(0, 40)).unwrap();
        destroy(&mut store, TokenAmount::new(0, 40)).unwrap();
        let audit = audit_supply(&store).unwrap();
        assert_eq!(audit[&0], SupplyAudit { minted: 60, held: 60 });

        let err = destroy(&mut store, TokenAmount::new(0, 61)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_burn_keeps_supply() {
        let mut store = setup();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 1, 0);
        let alice = Script::p2pkh([1; 20]);
        mint(&mut store, &alice, TokenAmount::new(0, 100)).unwrap();
        burn(&mut store, &ctx, &alice, TokenAmount::new(0, 30), Some(LiveAttribute::PaybackBurn)).unwrap();

        assert_eq!(store.get_balance(ctx.burn_address(), 0).unwrap(), 30);
        assert_eq!(
            attributes::get_live(&store, LiveAttribute::PaybackBurn).unwrap().get(0),
            30
        );
        assert!(audit_supply(&store).unwrap()[&0].is_balanced());
    }

    #[test]
    fn test_limit_is_enforced() {
        let mut store = setup();
        let mut token = store.get_token_or_err(0).unwrap();
        token.limit = 50;
        store.set_token(0, &token).unwrap();

        let alice = Script::p2pkh([1; 20]);
        let err = mint(&mut store, &alice, TokenAmount::new(0, 51)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LimitReached);
    }
}
