use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{amount::Amount, crypto::Hash, impl_serializer, oracle::CurrencyPair, script::Script};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AppointOracleMessage {
    pub owner: Script,
    pub weightage: u8,
    pub pairs: BTreeSet<CurrencyPair>,
}

impl_serializer!(AppointOracleMessage {
    owner,
    weightage,
    pairs
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoveOracleMessage {
    pub oracle_id: Hash,
}

impl_serializer!(RemoveOracleMessage { oracle_id });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UpdateOracleMessage {
    pub oracle_id: Hash,
    pub owner: Script,
    pub weightage: u8,
    pub pairs: BTreeSet<CurrencyPair>,
}

impl_serializer!(UpdateOracleMessage {
    oracle_id,
    owner,
    weightage,
    pairs
});

// token symbol -> currency -> price
pub type TokenPrices = BTreeMap<String, BTreeMap<String, Amount>>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SetOracleDataMessage {
    pub oracle_id: Hash,
    pub timestamp: i64,
    pub prices: TokenPrices,
}

impl_serializer!(SetOracleDataMessage {
    oracle_id,
    timestamp,
    prices
});
