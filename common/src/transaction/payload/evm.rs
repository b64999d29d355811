use serde::{Deserialize, Serialize};

use crate::{
    evm::{DomainEndpoint, EvmTransaction, MAX_RAW_TX_SIZE},
    impl_serializer,
    serializer::{ReaderError, Serializer},
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransferDomainItem {
    pub src: DomainEndpoint,
    pub dst: DomainEndpoint,
}

impl_serializer!(TransferDomainItem { src, dst });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransferDomainMessage {
    pub transfers: Vec<TransferDomainItem>,
}

impl_serializer!(TransferDomainMessage { transfers });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EvmTxMessage {
    pub raw: Vec<u8>,
}

impl_serializer!(EvmTxMessage { raw });

impl EvmTxMessage {
    pub fn from_transaction(tx: &EvmTransaction) -> Self {
        Self { raw: tx.to_bytes() }
    }

    pub fn transaction(&self) -> Result<EvmTransaction, ReaderError> {
        if self.raw.len() > MAX_RAW_TX_SIZE {
            return Err(ReaderError::InvalidSize);
        }
        EvmTransaction::from_bytes(&self.raw)
    }
}
