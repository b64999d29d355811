use log::trace;
use tessera_common::{
    amount::{Balances, TokenId},
    crypto::Hash,
    loan::{InterestRate, Vault, VaultId},
    serializer::Serializer,
};

use crate::core::{
    error::BlockchainError,
    storage::{build_vault_token_key, ChainStore, Column, StorageBackend},
};

/// Vault records with their collateral, loans and interest accumulators.
pub trait VaultProvider {
    fn get_vault(&self, id: &VaultId) -> Result<Option<Vault>, BlockchainError>;

    fn set_vault(&mut self, id: &VaultId, vault: &Vault) -> Result<(), BlockchainError>;

    // Drops the vault and every record attached to it
    fn remove_vault(&mut self, id: &VaultId) -> Result<(), BlockchainError>;

    fn list_vaults(&self) -> Result<Vec<(VaultId, Vault)>, BlockchainError>;

    fn get_vault_collateral(&self, id: &VaultId) -> Result<Balances, BlockchainError>;

    fn set_vault_collateral(&mut self, id: &VaultId, collateral: &Balances) -> Result<(), BlockchainError>;

    fn get_vault_loans(&self, id: &VaultId) -> Result<Balances, BlockchainError>;

    fn set_vault_loans(&mut self, id: &VaultId, loans: &Balances) -> Result<(), BlockchainError>;

    // Vaults carrying at least one loan, the liquidation sweep walks only these
    fn list_loan_vaults(&self) -> Result<Vec<VaultId>, BlockchainError>;

    fn get_interest_rate(&self, id: &VaultId, token_id: TokenId) -> Result<Option<InterestRate>, BlockchainError>;

    fn set_interest_rate(&mut self, id: &VaultId, token_id: TokenId, rate: &InterestRate) -> Result<(), BlockchainError>;

    fn remove_interest_rate(&mut self, id: &VaultId, token_id: TokenId) -> Result<(), BlockchainError>;

    fn list_interest_rates(&self, id: &VaultId) -> Result<Vec<(TokenId, InterestRate)>, BlockchainError>;

    fn get_vault_or_err(&self, id: &VaultId) -> Result<Vault, BlockchainError> {
        self.get_vault(id)?.ok_or(BlockchainError::VaultNotFound(*id))
    }
}

impl<B: StorageBackend> VaultProvider for ChainStore<B> {
    fn get_vault(&self, id: &VaultId) -> Result<Option<Vault>, BlockchainError> {
        self.load_optional_from_disk(Column::Vaults, id)
    }

    fn set_vault(&mut self, id: &VaultId, vault: &Vault) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set vault {} scheme {} liquidation {}", id, vault.scheme_id, vault.under_liquidation);
        }
        self.insert_into_disk(Column::Vaults, id.as_bytes().to_vec(), vault)
    }

    fn remove_vault(&mut self, id: &VaultId) -> Result<(), BlockchainError> {
        for (token_id, _) in self.list_interest_rates(id)? {
            self.remove_interest_rate(id, token_id)?;
        }
        self.remove_from_disk(Column::VaultCollateral, id.as_bytes().to_vec())?;
        self.remove_from_disk(Column::VaultLoans, id.as_bytes().to_vec())?;
        self.remove_from_disk(Column::Vaults, id.as_bytes().to_vec())
    }

    fn list_vaults(&self) -> Result<Vec<(VaultId, Vault)>, BlockchainError> {
        self.scan_prefix::<Vault>(Column::Vaults, &[])?
            .into_iter()
            .map(|(key, vault)| Ok((Hash::from_bytes(&key)?, vault)))
            .collect()
    }

    fn get_vault_collateral(&self, id: &VaultId) -> Result<Balances, BlockchainError> {
        Ok(self
            .load_optional_from_disk(Column::VaultCollateral, id)?
            .unwrap_or_default())
    }

    fn set_vault_collateral(&mut self, id: &VaultId, collateral: &Balances) -> Result<(), BlockchainError> {
        if collateral.is_empty() {
            self.remove_from_disk(Column::VaultCollateral, id.as_bytes().to_vec())
        } else {
            self.insert_into_disk(Column::VaultCollateral, id.as_bytes().to_vec(), collateral)
        }
    }

    fn get_vault_loans(&self, id: &VaultId) -> Result<Balances, BlockchainError> {
        Ok(self.load_optional_from_disk(Column::VaultLoans, id)?.unwrap_or_default())
    }

    fn set_vault_loans(&mut self, id: &VaultId, loans: &Balances) -> Result<(), BlockchainError> {
        if loans.is_empty() {
            self.remove_from_disk(Column::VaultLoans, id.as_bytes().to_vec())
        } else {
            self.insert_into_disk(Column::VaultLoans, id.as_bytes().to_vec(), loans)
        }
    }

    fn list_loan_vaults(&self) -> Result<Vec<VaultId>, BlockchainError> {
        self.scan_prefix_raw(Column::VaultLoans, &[])?
            .into_iter()
            .map(|(key, _)| Ok(Hash::from_bytes(&key)?))
            .collect()
    }

    fn get_interest_rate(&self, id: &VaultId, token_id: TokenId) -> Result<Option<InterestRate>, BlockchainError> {
        self.load_optional_from_disk(Column::VaultInterest, &build_vault_token_key(id, token_id))
    }

    fn set_interest_rate(&mut self, id: &VaultId, token_id: TokenId, rate: &InterestRate) -> Result<(), BlockchainError> {
        self.insert_into_disk(Column::VaultInterest, build_vault_token_key(id, token_id), rate)
    }

    fn remove_interest_rate(&mut self, id: &VaultId, token_id: TokenId) -> Result<(), BlockchainError> {
        self.remove_from_disk(Column::VaultInterest, build_vault_token_key(id, token_id))
    }

    fn list_interest_rates(&self, id: &VaultId) -> Result<Vec<(TokenId, InterestRate)>, BlockchainError> {
        self.scan_prefix::<InterestRate>(Column::VaultInterest, id.as_bytes())?
            .into_iter()
            .map(|(key, rate)| {
                let raw: [u8; 4] = key
                    .get(32..)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| BlockchainError::InvalidState("Corrupted interest key".to_owned()))?;
                Ok((TokenId::from_be_bytes(raw), rate))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::script::Script;

    #[test]
    fn test_loan_index_follows_loans() {
        let mut store = ChainStore::in_memory();
        let id = Hash::new([3; 32]);
        let vault = Vault {
            owner: Script::p2pkh([1; 20]),
            scheme_id: "LOAN1".to_owned(),
            under_liquidation: false,
            creation_height: 1,
            fee_escrow: 0,
        };
        store.set_vault(&id, &vault).unwrap();
        assert!(store.list_loan_vaults().unwrap().is_empty());

        store.set_vault_loans(&id, &Balances::from_single(2, 100)).unwrap();
        store.set_interest_rate(&id, 2, &InterestRate::default()).unwrap();
        assert_eq!(store.list_loan_vaults().unwrap(), vec![id]);
        assert_eq!(store.list_interest_rates(&id).unwrap().len(), 1);

        store.set_vault_loans(&id, &Balances::new()).unwrap();
        assert!(store.list_loan_vaults().unwrap().is_empty());

        store.remove_vault(&id).unwrap();
        assert!(store.get_vault(&id).unwrap().is_none());
        assert!(store.list_interest_rates(&id).unwrap().is_empty());
    }
}
