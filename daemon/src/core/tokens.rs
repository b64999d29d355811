// Token registry
//
// User created tokens (DCT) get ids from DCT_ID_START upward and are shown
// as `SYMBOL#id`. Distributed asset tokens (DAT) are created by the
// foundation, take the dense ids below and own their symbol globally.

use log::{debug, info};
use tessera_common::{
    amount::{TokenAmount, TokenId},
    crypto::Hash,
    script::Script,
    token::{
        is_valid_symbol, Token, MAX_TOKEN_NAME_LENGTH, TOKEN_FLAG_DAT, TOKEN_FLAG_FINALIZED, TOKEN_FLAG_MINTABLE,
        TOKEN_FLAG_TRADEABLE,
    },
    transaction::{BurnTokensMessage, CreateTokenMessage, MintTokensMessage, UpdateTokenMessage},
};

use super::{accounts, attributes, context::BlockContext, error::BlockchainError, storage::Storage};

// Flags a transaction may set, the others are managed by the engine
const USER_FLAGS: u8 = TOKEN_FLAG_MINTABLE | TOKEN_FLAG_TRADEABLE | TOKEN_FLAG_DAT | TOKEN_FLAG_FINALIZED;

fn validate_naming(symbol: &str, name: &str) -> Result<(), BlockchainError> {
    if !is_valid_symbol(symbol) {
        return Err(BlockchainError::InvalidParameter(format!("Invalid token symbol '{}'", symbol)));
    }
    if name.len() > MAX_TOKEN_NAME_LENGTH {
        return Err(BlockchainError::InvalidParameter(format!(
            "Token name is longer than {} characters",
            MAX_TOKEN_NAME_LENGTH
        )));
    }
    Ok(())
}

fn ensure_symbol_free<S: Storage>(storage: &S, display: &str, except: Option<TokenId>) -> Result<(), BlockchainError> {
    match storage.get_token_by_symbol(display)? {
        Some((id, _)) if Some(id) != except => Err(BlockchainError::TokenExists(display.to_owned())),
        _ => Ok(()),
    }
}

/// Registers a token owned by `owner`. Returns its id.
pub fn create_token<S: Storage>(
    storage: &mut S,
    ctx: &BlockContext,
    tx_hash: &Hash,
    owner: &Script,
    message: &CreateTokenMessage,
) -> Result<TokenId, BlockchainError> {
    validate_naming(&message.symbol, &message.name)?;
    if message.limit < 0 {
        return Err(BlockchainError::InvalidAmount(message.limit));
    }

    let flags = message.flags & USER_FLAGS;
    let is_dat = flags & TOKEN_FLAG_DAT != 0;
    let id = storage.next_token_id(is_dat)?;
    let token = Token {
        symbol: message.symbol.clone(),
        name: message.name.clone(),
        decimal: message.decimal,
        limit: message.limit,
        flags,
        minted: 0,
        creation_tx: *tx_hash,
        creation_height: ctx.height,
        owner: owner.clone(),
    };
    ensure_symbol_free(storage, &token.display_symbol(id), None)?;
    storage.set_token(id, &token)?;

    info!("created token {} ({}) at height {}", id, token.display_symbol(id), ctx.height);
    Ok(id)
}

/// Renames a token or changes its flags. Pool shares and loan tokens are
/// managed by their own operations.
pub fn update_token<S: Storage>(storage: &mut S, message: &UpdateTokenMessage) -> Result<(), BlockchainError> {
    let mut token = storage.get_token_or_err(message.token_id)?;
    attributes::ensure_unlocked(storage, message.token_id)?;
    if token.is_pool_share() {
        return Err(BlockchainError::InvalidState(format!(
            "Token {} is a pool share and cannot be updated",
            message.token_id
        )));
    }
    if token.is_loan_token() {
        return Err(BlockchainError::InvalidState(format!(
            "Token {} is a loan token, use the loan token update",
            message.token_id
        )));
    }
    if token.is_finalized() {
        return Err(BlockchainError::InvalidState(format!("Token {} is finalized", message.token_id)));
    }
    validate_naming(&message.symbol, &message.name)?;
    token.symbol = message.symbol.clone();
    token.name = message.name.clone();
    token.flags = (token.flags & !USER_FLAGS) | (message.flags & USER_FLAGS);
    ensure_symbol_free(storage, &token.display_symbol(message.token_id), Some(message.token_id))?;
    debug!("updated token {} to {}", message.token_id, token.display_symbol(message.token_id));
    storage.set_token(message.token_id, &token)
}

/// Mints every listed token to `to`. Ownership is checked by the caller.
pub fn mint_tokens<S: Storage>(storage: &mut S, message: &MintTokensMessage, to: &Script) -> Result<(), BlockchainError> {
    if message.amounts.is_empty() {
        return Err(BlockchainError::InvalidParameter("Nothing to mint".to_owned()));
    }
    for (token_id, amount) in message.amounts.iter() {
        let token = storage.get_token_or_err(token_id)?;
        attributes::ensure_unlocked(storage, token_id)?;
        if !token.is_mintable() || token.is_pool_share() {
            return Err(BlockchainError::InvalidState(format!("Token {} is not mintable", token.symbol)));
        }
        if amount <= 0 {
            return Err(BlockchainError::InvalidAmount(amount));
        }
        accounts::mint(storage, to, TokenAmount::new(token_id, amount))?;
    }
    Ok(())
}

/// Moves tokens from an account to the burn script.
pub fn burn_tokens<S: Storage>(storage: &mut S, ctx: &BlockContext, message: &BurnTokensMessage) -> Result<(), BlockchainError> {
    if message.amounts.is_empty() {
        return Err(BlockchainError::InvalidParameter("Nothing to burn".to_owned()));
    }
    for (token_id, amount) in message.amounts.iter() {
        storage.get_token_or_err(token_id)?;
        attributes::ensure_unlocked(storage, token_id)?;
        if amount <= 0 {
            return Err(BlockchainError::InvalidAmount(amount));
        }
        accounts::burn(storage, ctx, &message.from, TokenAmount::new(token_id, amount), None)?;
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
        amount::{Balances, COIN},
        attributes::{AttributeKey, AttributeValue},
        token::DCT_ID_START,
    };

    fn create(symbol: &str, flags: u8) -> CreateTokenMessage {
        CreateTokenMessage {
            symbol: symbol.to_owned(),
            name: format!("{} token", symbol),
            decimal: 8,
            limit: 0,
            flags,
        }
    }

    #[test]
    fn test_dat_and_dct_ids() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 1, 0);
        let owner = Script::p2pkh([1; 20]);

        let dat = create_token(&mut store, &ctx, &Hash::new([1; 32]), &owner, &create("GOLD", TOKEN_FLAG_DAT | TOKEN_FLAG_MINTABLE)).unwrap();
        assert!(dat < DCT_ID_START);
        let err = create_token(&mut store, &ctx, &Hash::new([2; 32]), &owner, &create("GOLD", TOKEN_FLAG_DAT)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        // user tokens may reuse a symbol, they are told apart by id
        let dct = create_token(&mut store, &ctx, &Hash::new([3; 32]), &owner, &create("GOLD", TOKEN_FLAG_MINTABLE)).unwrap();
        assert_eq!(dct, DCT_ID_START);
        assert_eq!(store.get_token_by_symbol(&format!("GOLD#{}", dct)).unwrap().map(|(id, _)| id), Some(dct));

        let err = create_token(&mut store, &ctx, &Hash::new([4; 32]), &owner, &create("BAD SYM", 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_mint_update_and_burn() {
        let mut store = ChainStore::in_memory();
        let params = ChainParams::regtest();
        let ctx = BlockContext::new(&params, 1, 0);
        let owner = Script::p2pkh([1; 20]);
        let id = create_token(&mut store, &ctx, &Hash::new([1; 32]), &owner, &create("SILVER", TOKEN_FLAG_MINTABLE)).unwrap();

        let amounts = Balances::from_single(id, 10 * COIN);
        mint_tokens(&mut store, &MintTokensMessage { amounts: amounts.clone(), to: owner.clone() }, &owner).unwrap();
        assert_eq!(store.get_balance(&owner, id).unwrap(), 10 * COIN);

        burn_tokens(&mut store, &ctx, &BurnTokensMessage { amounts: Balances::from_single(id, 4 * COIN), from: owner.clone() }).unwrap();
        assert_eq!(store.get_balance(ctx.burn_address(), id).unwrap(), 4 * COIN);

        update_token(
            &mut store,
            &UpdateTokenMessage {
                token_id: id,
                symbol: "SILVER".to_owned(),
                name: "Silver".to_owned(),
                flags: TOKEN_FLAG_TRADEABLE,
            },
        )
        .unwrap();
        let err = mint_tokens(&mut store, &MintTokensMessage { amounts, to: owner.clone() }, &owner).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        store.set_attribute(&AttributeKey::TokenLock(id), &AttributeValue::Bool(true)).unwrap();
        let err = update_token(
            &mut store,
            &UpdateTokenMessage {
                token_id: id,
                symbol: "SLV".to_owned(),
                name: "Silver".to_owned(),
                flags: 0,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenLocked);

        for (_, audit) in accounts::audit_supply(&store).unwrap() {
            assert!(audit.is_balanced());
        }
    }
}
