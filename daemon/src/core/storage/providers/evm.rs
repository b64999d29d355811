use bytes::Bytes;
use log::trace;
use primitive_types::H160;
use tessera_common::{
    amount::{Amount, AmountError, Balances, TokenId},
    crypto::Hash,
    evm::{EvmBlockHeader, EvmReceipt, VmMapKind},
};

use crate::core::{
    error::BlockchainError,
    storage::{build_evm_balance_key, build_vmmap_key, ChainStore, Column, StorageBackend},
};

const LATEST_EVM_BLOCK: &[u8] = b"latest_evm_block";

/// EVM side ledger: mirrored balances in sats, nonces, blocks and receipts.
pub trait EvmProvider {
    fn get_evm_balance(&self, address: &H160, token_id: TokenId) -> Result<Amount, BlockchainError>;

    fn set_evm_balance(&mut self, address: &H160, token_id: TokenId, amount: Amount) -> Result<(), BlockchainError>;

    fn get_evm_balances(&self, address: &H160) -> Result<Balances, BlockchainError>;

    fn list_evm_balances(&self) -> Result<Vec<(H160, TokenId, Amount)>, BlockchainError>;

    fn get_evm_nonce(&self, address: &H160) -> Result<u64, BlockchainError>;

    fn set_evm_nonce(&mut self, address: &H160, nonce: u64) -> Result<(), BlockchainError>;

    fn get_evm_block(&self, number: u64) -> Result<Option<EvmBlockHeader>, BlockchainError>;

    // Stores the header and moves the latest block pointer to it
    fn set_evm_block(&mut self, header: &EvmBlockHeader) -> Result<(), BlockchainError>;

    fn get_latest_evm_block(&self) -> Result<Option<EvmBlockHeader>, BlockchainError>;

    fn get_evm_receipt(&self, tx_hash: &Hash) -> Result<Option<EvmReceipt>, BlockchainError>;

    fn set_evm_receipt(&mut self, receipt: &EvmReceipt) -> Result<(), BlockchainError>;

    fn get_vmmap(&self, kind: VmMapKind, key: &[u8]) -> Result<Option<Bytes>, BlockchainError>;

    // Writes the mapping together with its inverse
    fn set_vmmap(&mut self, kind: VmMapKind, key: &[u8], value: &[u8]) -> Result<(), BlockchainError>;

    fn list_vmmap(&self, kind: VmMapKind) -> Result<Vec<(Bytes, Bytes)>, BlockchainError>;
}

impl<B: StorageBackend> EvmProvider for ChainStore<B> {
    fn get_evm_balance(&self, address: &H160, token_id: TokenId) -> Result<Amount, BlockchainError> {
        let key = build_evm_balance_key(address.as_fixed_bytes(), token_id);
        Ok(self.load_optional_from_disk(Column::EvmBalances, &key)?.unwrap_or(0))
    }

    fn set_evm_balance(&mut self, address: &H160, token_id: TokenId, amount: Amount) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set evm balance of {:?} for token {} to {}", address, token_id, amount);
        }

        if amount < 0 {
            return Err(AmountError::Negative(amount).into());
        }
        let key = build_evm_balance_key(address.as_fixed_bytes(), token_id);
        if amount == 0 {
            self.remove_from_disk(Column::EvmBalances, key)
        } else {
            self.insert_into_disk(Column::EvmBalances, key, &amount)
        }
    }

    fn get_evm_balances(&self, address: &H160) -> Result<Balances, BlockchainError> {
        let mut balances = Balances::new();
        for (key, amount) in self.scan_prefix::<Amount>(Column::EvmBalances, address.as_bytes())? {
            let raw: [u8; 4] = key
                .get(20..)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| BlockchainError::InvalidState("Corrupted evm balance key".to_owned()))?;
            balances.set(TokenId::from_be_bytes(raw), amount);
        }
        Ok(balances)
    }

    fn list_evm_balances(&self) -> Result<Vec<(H160, TokenId, Amount)>, BlockchainError> {
        self.scan_prefix::<Amount>(Column::EvmBalances, &[])?
            .into_iter()
            .map(|(key, amount)| {
                if key.len() != 24 {
                    return Err(BlockchainError::InvalidState("Corrupted evm balance key".to_owned()));
                }
                let address = H160::from_slice(&key[..20]);
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&key[20..]);
                Ok((address, TokenId::from_be_bytes(raw), amount))
            })
            .collect()
    }

    fn get_evm_nonce(&self, address: &H160) -> Result<u64, BlockchainError> {
        Ok(self
            .load_optional_from_disk(Column::EvmNonces, address.as_bytes())?
            .unwrap_or(0))
    }

    fn set_evm_nonce(&mut self, address: &H160, nonce: u64) -> Result<(), BlockchainError> {
        self.insert_into_disk(Column::EvmNonces, address.as_bytes(), &nonce)
    }

    fn get_evm_block(&self, number: u64) -> Result<Option<EvmBlockHeader>, BlockchainError> {
        self.load_optional_from_disk(Column::EvmBlocks, &number.to_be_bytes())
    }

    fn set_evm_block(&mut self, header: &EvmBlockHeader) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set evm block {} with {} txs", header.number, header.tx_hashes.len());
        }
        self.insert_into_disk(Column::EvmBlocks, header.number.to_be_bytes(), header)?;
        self.insert_into_disk(Column::Meta, LATEST_EVM_BLOCK, &header.number)
    }

    fn get_latest_evm_block(&self) -> Result<Option<EvmBlockHeader>, BlockchainError> {
        match self.load_optional_from_disk::<[u8], u64>(Column::Meta, LATEST_EVM_BLOCK)? {
            Some(number) => self.get_evm_block(number),
            None => Ok(None),
        }
    }

    fn get_evm_receipt(&self, tx_hash: &Hash) -> Result<Option<EvmReceipt>, BlockchainError> {
        self.load_optional_from_disk(Column::EvmReceipts, tx_hash)
    }

    fn set_evm_receipt(&mut self, receipt: &EvmReceipt) -> Result<(), BlockchainError> {
        self.insert_into_disk(Column::EvmReceipts, receipt.tx_hash.as_bytes().to_vec(), receipt)
    }

    fn get_vmmap(&self, kind: VmMapKind, key: &[u8]) -> Result<Option<Bytes>, BlockchainError> {
        self.load_raw(Column::VmMap, &build_vmmap_key(kind.id(), key))
    }

    fn set_vmmap(&mut self, kind: VmMapKind, key: &[u8], value: &[u8]) -> Result<(), BlockchainError> {
        self.insert_raw(Column::VmMap, build_vmmap_key(kind.id(), key), value.to_vec())?;
        self.insert_raw(Column::VmMap, build_vmmap_key(kind.inverse().id(), value), key.to_vec())
    }

    fn list_vmmap(&self, kind: VmMapKind) -> Result<Vec<(Bytes, Bytes)>, BlockchainError> {
        Ok(self
            .scan_prefix_raw(Column::VmMap, &[kind.id()])?
            .into_iter()
            .map(|(key, value)| (key.slice(1..), value))
            .collect())
    }
}
