use std::str::FromStr;

use log::trace;
use tessera_common::attributes::{AttributeKey, AttributeValue};

use crate::core::{
    error::BlockchainError,
    storage::{build_height_key, ChainStore, Column, StorageBackend},
};

/// Governance variables keyed by their path, plus changes waiting for an
/// activation height.
pub trait AttributeProvider {
    fn get_attribute(&self, key: &AttributeKey) -> Result<Option<AttributeValue>, BlockchainError>;

    fn set_attribute(&mut self, key: &AttributeKey, value: &AttributeValue) -> Result<(), BlockchainError>;

    fn remove_attribute(&mut self, key: &AttributeKey) -> Result<(), BlockchainError>;

    fn list_attributes(&self) -> Result<Vec<(AttributeKey, AttributeValue)>, BlockchainError>;

    fn schedule_attribute(
        &mut self,
        height: u32,
        key: &AttributeKey,
        value: &AttributeValue,
    ) -> Result<(), BlockchainError>;

    // Pops every change due at this height
    fn take_scheduled_attributes(&mut self, height: u32) -> Result<Vec<(AttributeKey, AttributeValue)>, BlockchainError>;

    fn list_scheduled_attributes(&self) -> Result<Vec<(u32, AttributeKey, AttributeValue)>, BlockchainError>;
}

fn parse_path(raw: &[u8]) -> Result<AttributeKey, BlockchainError> {
    let path = std::str::from_utf8(raw)
        .map_err(|_| BlockchainError::InvalidState("Attribute path is not utf-8".to_owned()))?;
    Ok(AttributeKey::from_str(path)?)
}

impl<B: StorageBackend> AttributeProvider for ChainStore<B> {
    fn get_attribute(&self, key: &AttributeKey) -> Result<Option<AttributeValue>, BlockchainError> {
        self.load_optional_from_disk(Column::Attributes, key.to_string().as_bytes())
    }

    fn set_attribute(&mut self, key: &AttributeKey, value: &AttributeValue) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set attribute {} = {}", key, value);
        }
        self.insert_into_disk(Column::Attributes, key.to_string(), value)
    }

    fn remove_attribute(&mut self, key: &AttributeKey) -> Result<(), BlockchainError> {
        self.remove_from_disk(Column::Attributes, key.to_string())
    }

    fn list_attributes(&self) -> Result<Vec<(AttributeKey, AttributeValue)>, BlockchainError> {
        self.scan_prefix::<AttributeValue>(Column::Attributes, &[])?
            .into_iter()
            .map(|(raw, value)| Ok((parse_path(&raw)?, value)))
            .collect()
    }

    fn schedule_attribute(
        &mut self,
        height: u32,
        key: &AttributeKey,
        value: &AttributeValue,
    ) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("schedule attribute {} = {} at height {}", key, value, height);
        }
        self.insert_into_disk(
            Column::PendingAttributes,
            build_height_key(height, key.to_string().as_bytes()),
            value,
        )
    }

    fn take_scheduled_attributes(&mut self, height: u32) -> Result<Vec<(AttributeKey, AttributeValue)>, BlockchainError> {
        let entries = self.scan_prefix::<AttributeValue>(Column::PendingAttributes, &height.to_be_bytes())?;
        let mut changes = Vec::with_capacity(entries.len());
        for (raw, value) in entries {
            changes.push((parse_path(&raw[4..])?, value));
            self.remove_from_disk(Column::PendingAttributes, raw.to_vec())?;
        }
        Ok(changes)
    }

    fn list_scheduled_attributes(&self) -> Result<Vec<(u32, AttributeKey, AttributeValue)>, BlockchainError> {
        self.scan_prefix::<AttributeValue>(Column::PendingAttributes, &[])?
            .into_iter()
            .map(|(raw, value)| {
                if raw.len() < 4 {
                    return Err(BlockchainError::InvalidState("Corrupted pending attribute key".to_owned()));
                }
                let height = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
                Ok((height, parse_path(&raw[4..])?, value))
            })
            .collect()
    }
}
