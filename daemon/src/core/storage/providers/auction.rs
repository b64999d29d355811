use log::trace;
use tessera_common::{
    crypto::Hash,
    loan::{AuctionBatch, AuctionData, VaultId},
    serializer::Serializer,
};

use crate::core::{
    error::BlockchainError,
    storage::{build_batch_key, build_height_key, ChainStore, Column, StorageBackend},
};

/// Running auctions of liquidated vaults, indexed by their end height.
pub trait AuctionProvider {
    fn get_auction(&self, vault_id: &VaultId) -> Result<Option<AuctionData>, BlockchainError>;

    fn set_auction(&mut self, vault_id: &VaultId, auction: &AuctionData) -> Result<(), BlockchainError>;

    // Drops the auction together with its batches
    fn remove_auction(&mut self, vault_id: &VaultId) -> Result<(), BlockchainError>;

    fn list_auctions(&self) -> Result<Vec<(VaultId, AuctionData)>, BlockchainError>;

    fn get_auctions_ending_at(&self, height: u32) -> Result<Vec<VaultId>, BlockchainError>;

    fn get_auction_batch(&self, vault_id: &VaultId, index: u32) -> Result<Option<AuctionBatch>, BlockchainError>;

    fn set_auction_batch(&mut self, vault_id: &VaultId, index: u32, batch: &AuctionBatch) -> Result<(), BlockchainError>;

    fn list_auction_batches(&self, vault_id: &VaultId) -> Result<Vec<AuctionBatch>, BlockchainError>;
}

impl<B: StorageBackend> AuctionProvider for ChainStore<B> {
    fn get_auction(&self, vault_id: &VaultId) -> Result<Option<AuctionData>, BlockchainError> {
        self.load_optional_from_disk(Column::Auctions, vault_id)
    }

    fn set_auction(&mut self, vault_id: &VaultId, auction: &AuctionData) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "set auction of vault {} with {} batches ending at {}",
                vault_id,
                auction.batch_count,
                auction.end_height
            );
        }

        if let Some(previous) = self.get_auction(vault_id)? {
            if previous.end_height != auction.end_height {
                self.remove_from_disk(
                    Column::AuctionsByHeight,
                    build_height_key(previous.end_height, vault_id.as_bytes()),
                )?;
            }
        }
        self.insert_raw(
            Column::AuctionsByHeight,
            build_height_key(auction.end_height, vault_id.as_bytes()),
            Vec::new(),
        )?;
        self.insert_into_disk(Column::Auctions, vault_id.as_bytes().to_vec(), auction)
    }

    fn remove_auction(&mut self, vault_id: &VaultId) -> Result<(), BlockchainError> {
        let Some(auction) = self.get_auction(vault_id)? else {
            return Ok(());
        };

        for index in 0..auction.batch_count {
            self.remove_from_disk(Column::AuctionBatches, build_batch_key(vault_id, index))?;
        }
        self.remove_from_disk(
            Column::AuctionsByHeight,
            build_height_key(auction.end_height, vault_id.as_bytes()),
        )?;
        self.remove_from_disk(Column::Auctions, vault_id.as_bytes().to_vec())
    }

    fn list_auctions(&self) -> Result<Vec<(VaultId, AuctionData)>, BlockchainError> {
        self.scan_prefix::<AuctionData>(Column::Auctions, &[])?
            .into_iter()
            .map(|(key, auction)| Ok((Hash::from_bytes(&key)?, auction)))
            .collect()
    }

    fn get_auctions_ending_at(&self, height: u32) -> Result<Vec<VaultId>, BlockchainError> {
        self.scan_prefix_raw(Column::AuctionsByHeight, &height.to_be_bytes())?
            .into_iter()
            .map(|(key, _)| Ok(Hash::from_bytes(&key[4..])?))
            .collect()
    }

    fn get_auction_batch(&self, vault_id: &VaultId, index: u32) -> Result<Option<AuctionBatch>, BlockchainError> {
        self.load_optional_from_disk(Column::AuctionBatches, &build_batch_key(vault_id, index))
    }

    fn set_auction_batch(&mut self, vault_id: &VaultId, index: u32, batch: &AuctionBatch) -> Result<(), BlockchainError> {
        self.insert_into_disk(Column::AuctionBatches, build_batch_key(vault_id, index), batch)
    }

    fn list_auction_batches(&self, vault_id: &VaultId) -> Result<Vec<AuctionBatch>, BlockchainError> {
        Ok(self
            .scan_prefix::<AuctionBatch>(Column::AuctionBatches, vault_id.as_bytes())?
            .into_iter()
            .map(|(_, batch)| batch)
            .collect())
    }
}
