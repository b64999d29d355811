use log::trace;
use tessera_common::{
    crypto::Hash,
    oracle::{CurrencyPair, FixedIntervalPrice, Oracle, OracleId},
    serializer::Serializer,
};

use crate::core::{
    error::BlockchainError,
    storage::{build_price_key, ChainStore, Column, StorageBackend},
};

pub trait OracleProvider {
    fn get_oracle(&self, id: &OracleId) -> Result<Option<Oracle>, BlockchainError>;

    fn set_oracle(&mut self, id: &OracleId, oracle: &Oracle) -> Result<(), BlockchainError>;

    fn remove_oracle(&mut self, id: &OracleId) -> Result<(), BlockchainError>;

    fn list_oracles(&self) -> Result<Vec<(OracleId, Oracle)>, BlockchainError>;

    fn get_fixed_interval_price(&self, pair: &CurrencyPair) -> Result<Option<FixedIntervalPrice>, BlockchainError>;

    fn set_fixed_interval_price(&mut self, price: &FixedIntervalPrice) -> Result<(), BlockchainError>;

    fn list_fixed_interval_prices(&self) -> Result<Vec<FixedIntervalPrice>, BlockchainError>;

    fn get_oracle_or_err(&self, id: &OracleId) -> Result<Oracle, BlockchainError> {
        self.get_oracle(id)?.ok_or(BlockchainError::OracleNotFound(*id))
    }
}

impl<B: StorageBackend> OracleProvider for ChainStore<B> {
    fn get_oracle(&self, id: &OracleId) -> Result<Option<Oracle>, BlockchainError> {
        self.load_optional_from_disk(Column::Oracles, id)
    }

    fn set_oracle(&mut self, id: &OracleId, oracle: &Oracle) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!("set oracle {} with {} pairs", id, oracle.available_pairs.len());
        }
        self.insert_into_disk(Column::Oracles, id.as_bytes().to_vec(), oracle)
    }

    fn remove_oracle(&mut self, id: &OracleId) -> Result<(), BlockchainError> {
        self.remove_from_disk(Column::Oracles, id.as_bytes().to_vec())
    }

    fn list_oracles(&self) -> Result<Vec<(OracleId, Oracle)>, BlockchainError> {
        self.scan_prefix::<Oracle>(Column::Oracles, &[])?
            .into_iter()
            .map(|(key, oracle)| Ok((Hash::from_bytes(&key)?, oracle)))
            .collect()
    }

    fn get_fixed_interval_price(&self, pair: &CurrencyPair) -> Result<Option<FixedIntervalPrice>, BlockchainError> {
        self.load_optional_from_disk(Column::FixedIntervalPrices, &build_price_key(pair))
    }

    fn set_fixed_interval_price(&mut self, price: &FixedIntervalPrice) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "set fixed interval price {} active {} next {} live {}",
                price.pair,
                price.active_price,
                price.next_price,
                price.is_live
            );
        }
        self.insert_into_disk(Column::FixedIntervalPrices, build_price_key(&price.pair), price)
    }

    fn list_fixed_interval_prices(&self) -> Result<Vec<FixedIntervalPrice>, BlockchainError> {
        Ok(self
            .scan_prefix::<FixedIntervalPrice>(Column::FixedIntervalPrices, &[])?
            .into_iter()
            .map(|(_, price)| price)
            .collect())
    }
}
