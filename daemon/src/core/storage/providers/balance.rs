use log::trace;
use tessera_common::{
    amount::{safe_add, Amount, AmountError, Balances, TokenAmount, TokenId},
    script::Script,
};

use tessera_common::serializer::Serializer;

use crate::core::{
    error::BlockchainError,
    storage::{build_balance_key, build_owner_prefix, parse_balance_key, ChainStore, Column, StorageBackend},
};

/// Account balances, one entry per owner and token. Zero balances are not stored.
pub trait BalanceProvider {
    fn get_balance(&self, owner: &Script, token_id: TokenId) -> Result<Amount, BlockchainError>;

    fn get_balances(&self, owner: &Script) -> Result<Balances, BlockchainError>;

    fn set_balance(&mut self, owner: &Script, token_id: TokenId, amount: Amount) -> Result<(), BlockchainError>;

    fn add_balance(&mut self, owner: &Script, value: TokenAmount) -> Result<(), BlockchainError>;

    fn sub_balance(&mut self, owner: &Script, value: TokenAmount) -> Result<(), BlockchainError>;

    // Every (owner, token, amount) triple in key order
    fn list_balances(&self) -> Result<Vec<(Script, TokenId, Amount)>, BlockchainError>;

    // Net change of every balance written since the innermost snapshot was opened
    fn staged_balance_deltas(&self) -> Result<Vec<(Script, TokenId, Amount)>, BlockchainError>;

    fn add_balances(&mut self, owner: &Script, balances: &Balances) -> Result<(), BlockchainError> {
        for (token_id, amount) in balances.iter() {
            self.add_balance(owner, TokenAmount::new(token_id, amount))?;
        }
        Ok(())
    }

    fn sub_balances(&mut self, owner: &Script, balances: &Balances) -> Result<(), BlockchainError> {
        for (token_id, amount) in balances.iter() {
            self.sub_balance(owner, TokenAmount::new(token_id, amount))?;
        }
        Ok(())
    }

    fn get_token_holders(&self, token_id: TokenId) -> Result<Vec<(Script, Amount)>, BlockchainError> {
        Ok(self
            .list_balances()?
            .into_iter()
            .filter(|(_, id, _)| *id == token_id)
            .map(|(owner, _, amount)| (owner, amount))
            .collect())
    }
}

impl<B: StorageBackend> BalanceProvider for ChainStore<B> {
    fn get_balance(&self, owner: &Script, token_id: TokenId) -> Result<Amount, BlockchainError> {
        let key = build_balance_key(owner, token_id);
        Ok(self.load_optional_from_disk(Column::Balances, &key)?.unwrap_or(0))
    }

    fn get_balances(&self, owner: &Script) -> Result<Balances, BlockchainError> {
        let prefix = build_owner_prefix(owner);
        let mut balances = Balances::new();
        for (key, amount) in self.scan_prefix::<Amount>(Column::Balances, &prefix)? {
            let (_, token_id) = parse_balance_key(&key)
                .ok_or_else(|| BlockchainError::InvalidState("Corrupted balance key".to_owned()))?;
            balances.set(token_id, amount);
        }
        Ok(balances)
    }

    fn set_balance(&mut self, owner: &Script, token_id: TokenId, amount: Amount) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set balance of {} for token {} to {}", owner, token_id, amount);
        }

        if amount < 0 {
            return Err(AmountError::Negative(amount).into());
        }

        let key = build_balance_key(owner, token_id);
        if amount == 0 {
            self.remove_from_disk(Column::Balances, key)
        } else {
            self.insert_into_disk(Column::Balances, key, &amount)
        }
    }

    fn add_balance(&mut self, owner: &Script, value: TokenAmount) -> Result<(), BlockchainError> {
        if value.amount < 0 {
            return Err(AmountError::Negative(value.amount).into());
        }
        let current = self.get_balance(owner, value.token_id)?;
        self.set_balance(owner, value.token_id, safe_add(current, value.amount)?)
    }

    fn sub_balance(&mut self, owner: &Script, value: TokenAmount) -> Result<(), BlockchainError> {
        if value.amount < 0 {
            return Err(AmountError::Negative(value.amount).into());
        }
        let current = self.get_balance(owner, value.token_id)?;
        if current < value.amount {
            return Err(AmountError::Insufficient {
                token_id: value.token_id,
                available: current,
                requested: value.amount,
            }
            .into());
        }
        self.set_balance(owner, value.token_id, current - value.amount)
    }

    fn list_balances(&self) -> Result<Vec<(Script, TokenId, Amount)>, BlockchainError> {
        self.scan_prefix::<Amount>(Column::Balances, &[])?
            .into_iter()
            .map(|(key, amount)| {
                let (owner, token_id) = parse_balance_key(&key)
                    .ok_or_else(|| BlockchainError::InvalidState("Corrupted balance key".to_owned()))?;
                Ok((owner, token_id, amount))
            })
            .collect()
    }

    fn staged_balance_deltas(&self) -> Result<Vec<(Script, TokenId, Amount)>, BlockchainError> {
        let changes = match self.snapshots.last().and_then(|s| s.changes(Column::Balances)) {
            Some(changes) => changes,
            None => return Ok(Vec::new()),
        };

        let mut deltas = Vec::with_capacity(changes.writes.len());
        for (key, value) in changes.writes.iter() {
            let (owner, token_id) = parse_balance_key(key)
                .ok_or_else(|| BlockchainError::InvalidState("Corrupted balance key".to_owned()))?;
            let current = match value {
                Some(bytes) => Amount::from_bytes(bytes)?,
                None => 0,
            };
            let previous = match self.load_raw_below_top(Column::Balances, key)? {
                Some(bytes) => Amount::from_bytes(&bytes)?,
                None => 0,
            };
            if current != previous {
                deltas.push((owner, token_id, current - previous));
            }
        }
        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{error::ErrorKind, storage::SnapshotProvider};

    #[test]
    fn test_balances_are_pruned_at_zero() {
        let mut store = ChainStore::in_memory();
        let alice = Script::p2pkh([1; 20]);
        store.add_balance(&alice, TokenAmount::new(0, 10)).unwrap();
        store.add_balance(&alice, TokenAmount::new(5, 3)).unwrap();
        assert_eq!(store.get_balances(&alice).unwrap().len(), 2);

        store.sub_balance(&alice, TokenAmount::new(5, 3)).unwrap();
        assert_eq!(store.get_balances(&alice).unwrap(), Balances::from_single(0, 10));
        assert_eq!(store.list_balances().unwrap().len(), 1);
    }

    #[test]
    fn test_insufficient_funds() {
        let mut store = ChainStore::in_memory();
        let alice = Script::p2pkh([1; 20]);
        store.add_balance(&alice, TokenAmount::new(0, 10)).unwrap();
        let err = store.sub_balance(&alice, TokenAmount::new(0, 11)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(store.get_balance(&alice, 0).unwrap(), 10);
    }

    #[test]
    fn test_staged_deltas_only_cover_innermost_snapshot() {
        let mut store = ChainStore::in_memory();
        let alice = Script::p2pkh([1; 20]);
        let bob = Script::p2pkh([2; 20]);
        store.start_snapshot().unwrap();
        store.add_balance(&alice, TokenAmount::new(0, 10)).unwrap();

        store.start_snapshot().unwrap();
        store.sub_balance(&alice, TokenAmount::new(0, 4)).unwrap();
        store.add_balance(&bob, TokenAmount::new(0, 4)).unwrap();
        let mut deltas = store.staged_balance_deltas().unwrap();
        deltas.sort();
        let mut expected = vec![(alice, 0, -4), (bob, 0, 4)];
        expected.sort();
        assert_eq!(deltas, expected);
    }

    #[test]
    fn test_owner_prefix_does_not_leak() {
        let mut store = ChainStore::in_memory();
        let short = Script::new(vec![1, 2]);
        let long = Script::new(vec![1, 2, 3]);
        store.add_balance(&short, TokenAmount::new(0, 1)).unwrap();
        store.add_balance(&long, TokenAmount::new(0, 2)).unwrap();
        assert_eq!(store.get_balances(&short).unwrap().get(0), 1);
        assert_eq!(store.get_token_holders(0).unwrap().len(), 2);
    }
}
