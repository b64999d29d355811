use log::trace;
use tessera_common::{
    crypto::Hash,
    governance::{Masternode, MasternodeId},
    script::Script,
    serializer::Serializer,
};

use crate::core::{
    error::BlockchainError,
    storage::{ChainStore, Column, StorageBackend},
};

pub trait MasternodeProvider {
    fn get_masternode(&self, id: &MasternodeId) -> Result<Option<Masternode>, BlockchainError>;

    fn set_masternode(&mut self, id: &MasternodeId, masternode: &Masternode) -> Result<(), BlockchainError>;

    fn list_masternodes(&self) -> Result<Vec<(MasternodeId, Masternode)>, BlockchainError>;

    fn get_masternode_by_operator(&self, operator: &Script) -> Result<Option<MasternodeId>, BlockchainError>;

    fn get_masternode_or_err(&self, id: &MasternodeId) -> Result<Masternode, BlockchainError> {
        self.get_masternode(id)?.ok_or(BlockchainError::MasternodeNotFound(*id))
    }
}

impl<B: StorageBackend> MasternodeProvider for ChainStore<B> {
    fn get_masternode(&self, id: &MasternodeId) -> Result<Option<Masternode>, BlockchainError> {
        self.load_optional_from_disk(Column::Masternodes, id)
    }

    fn set_masternode(&mut self, id: &MasternodeId, masternode: &Masternode) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set masternode {} operator {}", id, masternode.operator);
        }

        if let Some(previous) = self.get_masternode(id)? {
            if previous.operator != masternode.operator {
                self.remove_from_disk(Column::MasternodeOperators, previous.operator.as_bytes())?;
            }
        }
        self.insert_into_disk(Column::MasternodeOperators, masternode.operator.as_bytes(), id)?;
        self.insert_into_disk(Column::Masternodes, id.as_bytes().to_vec(), masternode)
    }

    fn list_masternodes(&self) -> Result<Vec<(MasternodeId, Masternode)>, BlockchainError> {
        self.scan_prefix::<Masternode>(Column::Masternodes, &[])?
            .into_iter()
            .map(|(key, masternode)| Ok((Hash::from_bytes(&key)?, masternode)))
            .collect()
    }

    fn get_masternode_by_operator(&self, operator: &Script) -> Result<Option<MasternodeId>, BlockchainError> {
        self.load_optional_from_disk(Column::MasternodeOperators, operator.as_bytes())
    }
}
