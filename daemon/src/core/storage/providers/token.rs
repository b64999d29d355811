use log::trace;
use tessera_common::{
    amount::TokenId,
    token::{Token, DCT_ID_START},
};

use crate::core::{
    error::BlockchainError,
    storage::{ChainStore, Column, StorageBackend},
};

pub trait TokenProvider {
    fn get_token(&self, id: TokenId) -> Result<Option<Token>, BlockchainError>;

    // Lookup by display symbol, `SYM#id` for non DAT tokens
    fn get_token_by_symbol(&self, symbol: &str) -> Result<Option<(TokenId, Token)>, BlockchainError>;

    fn set_token(&mut self, id: TokenId, token: &Token) -> Result<(), BlockchainError>;

    fn list_tokens(&self) -> Result<Vec<(TokenId, Token)>, BlockchainError>;

    // DAT tokens take the next free id of the reserved range while it lasts
    fn next_token_id(&self, dat: bool) -> Result<TokenId, BlockchainError>;

    fn get_token_or_err(&self, id: TokenId) -> Result<Token, BlockchainError> {
        self.get_token(id)?.ok_or(BlockchainError::TokenNotFound(id))
    }
}

impl<B: StorageBackend> TokenProvider for ChainStore<B> {
    fn get_token(&self, id: TokenId) -> Result<Option<Token>, BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("get token {}", id);
        }

        let key = id.to_be_bytes();
        let staged = self.is_staged(Column::Tokens, &key);
        if !staged {
            if let Ok(mut cache) = self.cache().tokens.lock() {
                if let Some(token) = cache.get(&id) {
                    return Ok(Some(token.clone()));
                }
            }
        }

        let token: Option<Token> = self.load_optional_from_disk(Column::Tokens, &key)?;
        if !staged {
            if let (Some(token), Ok(mut cache)) = (token.as_ref(), self.cache().tokens.lock()) {
                cache.put(id, token.clone());
            }
        }
        Ok(token)
    }

    fn get_token_by_symbol(&self, symbol: &str) -> Result<Option<(TokenId, Token)>, BlockchainError> {
        let Some(id) = self.load_optional_from_disk::<[u8], TokenId>(Column::TokenSymbols, symbol.as_bytes())? else {
            return Ok(None);
        };
        Ok(self.get_token(id)?.map(|token| (id, token)))
    }

    fn set_token(&mut self, id: TokenId, token: &Token) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set token {} ({})", id, token.symbol);
        }

        if let Some(previous) = self.get_token(id)? {
            let old_symbol = previous.display_symbol(id);
            if old_symbol != token.display_symbol(id) {
                self.remove_from_disk(Column::TokenSymbols, old_symbol)?;
            }
        }

        self.insert_into_disk(Column::TokenSymbols, token.display_symbol(id), &id)?;
        self.insert_into_disk(Column::Tokens, id.to_be_bytes(), token)
    }

    fn list_tokens(&self) -> Result<Vec<(TokenId, Token)>, BlockchainError> {
        self.scan_prefix::<Token>(Column::Tokens, &[])?
            .into_iter()
            .map(|(key, token)| {
                let raw: [u8; 4] = key.as_ref().try_into().map_err(|_| BlockchainError::InvalidState("Corrupted token key".to_owned()))?;
                Ok((TokenId::from_be_bytes(raw), token))
            })
            .collect()
    }

    fn next_token_id(&self, dat: bool) -> Result<TokenId, BlockchainError> {
        let ids: Vec<TokenId> = self.list_tokens()?.into_iter().map(|(id, _)| id).collect();
        if dat {
            let last_dat = ids.iter().copied().filter(|id| *id < DCT_ID_START).max();
            let next = last_dat.map_or(0, |id| id + 1);
            if next < DCT_ID_START {
                return Ok(next);
            }
        }

        Ok(ids
            .iter()
            .copied()
            .filter(|id| *id >= DCT_ID_START)
            .max()
            .map_or(DCT_ID_START, |id| id + 1))
    }
}
