use log::trace;
use tessera_common::{
    amount::TokenId,
    loan::{CollateralTokenInfo, LoanScheme, LoanTokenInfo, ScheduledSchemeChange},
};

use crate::core::{
    error::BlockchainError,
    storage::{build_height_key, ChainStore, Column, StorageBackend},
};

const DEFAULT_LOAN_SCHEME: &[u8] = b"default_loan_scheme";

/// Collateral tokens, loan tokens and loan schemes.
pub trait LoanProvider {
    fn get_collateral_token(&self, token_id: TokenId) -> Result<Option<CollateralTokenInfo>, BlockchainError>;

    fn set_collateral_token(&mut self, info: &CollateralTokenInfo) -> Result<(), BlockchainError>;

    fn list_collateral_tokens(&self) -> Result<Vec<CollateralTokenInfo>, BlockchainError>;

    fn get_loan_token(&self, token_id: TokenId) -> Result<Option<LoanTokenInfo>, BlockchainError>;

    fn set_loan_token(&mut self, info: &LoanTokenInfo) -> Result<(), BlockchainError>;

    fn list_loan_tokens(&self) -> Result<Vec<LoanTokenInfo>, BlockchainError>;

    fn get_loan_scheme(&self, id: &str) -> Result<Option<LoanScheme>, BlockchainError>;

    fn set_loan_scheme(&mut self, scheme: &LoanScheme) -> Result<(), BlockchainError>;

    fn remove_loan_scheme(&mut self, id: &str) -> Result<(), BlockchainError>;

    fn list_loan_schemes(&self) -> Result<Vec<LoanScheme>, BlockchainError>;

    fn get_default_loan_scheme(&self) -> Result<Option<String>, BlockchainError>;

    fn set_default_loan_scheme(&mut self, id: &str) -> Result<(), BlockchainError>;

    fn schedule_scheme_change(&mut self, height: u32, change: &ScheduledSchemeChange) -> Result<(), BlockchainError>;

    // Remove and return every change scheduled at `height`
    fn take_scheme_changes(&mut self, height: u32) -> Result<Vec<ScheduledSchemeChange>, BlockchainError>;

    fn list_scheme_changes(&self) -> Result<Vec<(u32, ScheduledSchemeChange)>, BlockchainError>;

    // Drop pending changes of a scheme, returns how many were removed
    fn remove_scheme_changes(&mut self, id: &str) -> Result<usize, BlockchainError>;

    fn get_loan_scheme_or_err(&self, id: &str) -> Result<LoanScheme, BlockchainError> {
        self.get_loan_scheme(id)?
            .ok_or_else(|| BlockchainError::SchemeNotFound(id.to_owned()))
    }
}

fn parse_height(key: &[u8]) -> Result<u32, BlockchainError> {
    let raw: [u8; 4] = key
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| BlockchainError::InvalidState("Corrupted height key".to_owned()))?;
    Ok(u32::from_be_bytes(raw))
}

impl<B: StorageBackend> LoanProvider for ChainStore<B> {
    fn get_collateral_token(&self, token_id: TokenId) -> Result<Option<CollateralTokenInfo>, BlockchainError> {
        self.load_optional_from_disk(Column::CollateralTokens, &token_id.to_be_bytes())
    }

    fn set_collateral_token(&mut self, info: &CollateralTokenInfo) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set collateral token {} factor {}", info.token_id, info.factor);
        }
        self.insert_into_disk(Column::CollateralTokens, info.token_id.to_be_bytes(), info)
    }

    fn list_collateral_tokens(&self) -> Result<Vec<CollateralTokenInfo>, BlockchainError> {
        Ok(self
            .scan_prefix(Column::CollateralTokens, &[])?
            .into_iter()
            .map(|(_, info)| info)
            .collect())
    }

    fn get_loan_token(&self, token_id: TokenId) -> Result<Option<LoanTokenInfo>, BlockchainError> {
        self.load_optional_from_disk(Column::LoanTokens, &token_id.to_be_bytes())
    }

    fn set_loan_token(&mut self, info: &LoanTokenInfo) -> Result<(), BlockchainError> {
        self.insert_into_disk(Column::LoanTokens, info.token_id.to_be_bytes(), info)
    }

    fn list_loan_tokens(&self) -> Result<Vec<LoanTokenInfo>, BlockchainError> {
        Ok(self
            .scan_prefix(Column::LoanTokens, &[])?
            .into_iter()
            .map(|(_, info)| info)
            .collect())
    }

    fn get_loan_scheme(&self, id: &str) -> Result<Option<LoanScheme>, BlockchainError> {
        self.load_optional_from_disk(Column::LoanSchemes, id.as_bytes())
    }

    fn set_loan_scheme(&mut self, scheme: &LoanScheme) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set loan scheme {} ratio {} rate {}", scheme.identifier, scheme.ratio, scheme.rate);
        }
        self.insert_into_disk(Column::LoanSchemes, scheme.identifier.as_bytes(), scheme)
    }

    fn remove_loan_scheme(&mut self, id: &str) -> Result<(), BlockchainError> {
        self.remove_from_disk(Column::LoanSchemes, id.as_bytes())
    }

    fn list_loan_schemes(&self) -> Result<Vec<LoanScheme>, BlockchainError> {
        Ok(self
            .scan_prefix(Column::LoanSchemes, &[])?
            .into_iter()
            .map(|(_, scheme)| scheme)
            .collect())
    }

    fn get_default_loan_scheme(&self) -> Result<Option<String>, BlockchainError> {
        self.load_optional_from_disk(Column::Meta, DEFAULT_LOAN_SCHEME)
    }

    fn set_default_loan_scheme(&mut self, id: &str) -> Result<(), BlockchainError> {
        self.insert_into_disk(Column::Meta, DEFAULT_LOAN_SCHEME, &id.to_owned())
    }

    fn schedule_scheme_change(&mut self, height: u32, change: &ScheduledSchemeChange) -> Result<(), BlockchainError> {
        let key = build_height_key(height, change.identifier().as_bytes());
        self.insert_into_disk(Column::SchemeSchedule, key, change)
    }

    fn take_scheme_changes(&mut self, height: u32) -> Result<Vec<ScheduledSchemeChange>, BlockchainError> {
        let entries = self.scan_prefix::<ScheduledSchemeChange>(Column::SchemeSchedule, &height.to_be_bytes())?;
        let mut changes = Vec::with_capacity(entries.len());
        for (key, change) in entries {
            self.remove_from_disk(Column::SchemeSchedule, key.to_vec())?;
            changes.push(change);
        }
        Ok(changes)
    }

    fn list_scheme_changes(&self) -> Result<Vec<(u32, ScheduledSchemeChange)>, BlockchainError> {
        self.scan_prefix::<ScheduledSchemeChange>(Column::SchemeSchedule, &[])?
            .into_iter()
            .map(|(key, change)| Ok((parse_height(&key)?, change)))
            .collect()
    }

    fn remove_scheme_changes(&mut self, id: &str) -> Result<usize, BlockchainError> {
        let mut removed = 0;
        for (height, change) in self.list_scheme_changes()? {
            if change.identifier() == id {
                self.remove_from_disk(Column::SchemeSchedule, build_height_key(height, id.as_bytes()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::amount::COIN;

    #[test]
    fn test_take_scheme_changes() {
        let mut store = ChainStore::in_memory();
        let scheme = LoanScheme {
            identifier: "LOAN1".to_owned(),
            ratio: 150,
            rate: COIN,
        };
        store.schedule_scheme_change(10, &ScheduledSchemeChange::Update(scheme.clone())).unwrap();
        store
            .schedule_scheme_change(11, &ScheduledSchemeChange::Destroy("LOAN2".to_owned()))
            .unwrap();
        assert_eq!(store.list_scheme_changes().unwrap().len(), 2);

        assert!(store.take_scheme_changes(9).unwrap().is_empty());
        assert_eq!(
            store.take_scheme_changes(10).unwrap(),
            vec![ScheduledSchemeChange::Update(scheme)]
        );
        assert_eq!(store.list_scheme_changes().unwrap().len(), 1);
        assert_eq!(store.remove_scheme_changes("LOAN2").unwrap(), 1);
        assert!(store.list_scheme_changes().unwrap().is_empty());
    }
}
