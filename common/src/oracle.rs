use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{
    amount::Amount,
    crypto::Hash,
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

// Submissions older than this relative to the block time are expired
pub const ORACLE_PRICE_EXPIRY_SECONDS: i64 = 3600;
// Submissions further in the future than this are rejected
pub const ORACLE_MAX_FUTURE_SECONDS: i64 = 300;

pub const MAX_ORACLE_WEIGHT: u8 = 100;
pub const MAX_CURRENCY_LENGTH: usize = 8;

/// A (token symbol, currency) price feed identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub token: String,
    pub currency: String,
}

impl CurrencyPair {
    pub fn new<T: Into<String>, C: Into<String>>(token: T, currency: C) -> Self {
        Self {
            token: token.into(),
            currency: currency.into(),
        }
    }

    pub fn usd<T: Into<String>>(token: T) -> Self {
        Self::new(token, "USD")
    }

    pub fn is_valid(&self) -> bool {
        !self.token.is_empty()
            && !self.currency.is_empty()
            && self.token.len() <= crate::token::MAX_TOKEN_SYMBOL_LENGTH
            && self.currency.len() <= MAX_CURRENCY_LENGTH
    }
}

impl Display for CurrencyPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.token, self.currency)
    }
}

impl Serializer for CurrencyPair {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.token);
        writer.write_string(&self.currency);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            token: reader.read_string()?,
            currency: reader.read_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSubmission {
    pub price: Amount,
    pub timestamp: i64,
}

impl Serializer for PriceSubmission {
    fn write(&self, writer: &mut Writer) {
        writer.write_i64(self.price);
        writer.write_i64(self.timestamp);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            price: reader.read_i64()?,
            timestamp: reader.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oracle {
    pub owner: Script,
    pub weightage: u8,
    pub available_pairs: BTreeSet<CurrencyPair>,
    // Latest submission per pair
    pub prices: BTreeMap<CurrencyPair, PriceSubmission>,
}

impl Oracle {
    pub fn supports(&self, pair: &CurrencyPair) -> bool {
        self.available_pairs.contains(pair)
    }
}

impl Serializer for Oracle {
    fn write(&self, writer: &mut Writer) {
        self.owner.write(writer);
        writer.write_u8(self.weightage);
        self.available_pairs.write(writer);
        self.prices.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            owner: reader.read()?,
            weightage: reader.read_u8()?,
            available_pairs: reader.read()?,
            prices: reader.read()?,
        })
    }
}

/// Two slot price published on fixed block intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIntervalPrice {
    pub pair: CurrencyPair,
    pub active_price: Amount,
    pub next_price: Amount,
    pub active_price_block: u32,
    pub next_price_block: u32,
    pub timestamp: i64,
    pub is_live: bool,
}

impl FixedIntervalPrice {
    pub fn new(pair: CurrencyPair) -> Self {
        Self {
            pair,
            active_price: 0,
            next_price: 0,
            active_price_block: 0,
            next_price_block: 0,
            timestamp: 0,
            is_live: false,
        }
    }

    /// Live iff both slots are set and the next price stays within the
    /// deviation band of the active one. `threshold` is an 8 decimal fraction.
    pub fn compute_is_live(&self, threshold: Amount) -> bool {
        if self.active_price <= 0 || self.next_price <= 0 {
            return false;
        }

        let diff = (self.next_price as i128 - self.active_price as i128).abs();
        // diff / active <= threshold, cross multiplied
        diff * (crate::amount::COIN as i128) <= threshold as i128 * self.active_price as i128
    }
}

impl Serializer for FixedIntervalPrice {
    fn write(&self, writer: &mut Writer) {
        self.pair.write(writer);
        writer.write_i64(self.active_price);
        writer.write_i64(self.next_price);
        writer.write_u32(self.active_price_block);
        writer.write_u32(self.next_price_block);
        writer.write_i64(self.timestamp);
        writer.write_bool(self.is_live);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            pair: reader.read()?,
            active_price: reader.read_i64()?,
            next_price: reader.read_i64()?,
            active_price_block: reader.read_u32()?,
            next_price_block: reader.read_u32()?,
            timestamp: reader.read_i64()?,
            is_live: reader.read_bool()?,
        })
    }
}

/// Oracle id alias, the hash of the appointing transaction.
pub type OracleId = Hash;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;

    #[test]
    fn test_live_band() {
        let mut price = FixedIntervalPrice::new(CurrencyPair::usd("TSLA"));
        let threshold = 30 * COIN / 100;
        assert!(!price.compute_is_live(threshold));

        price.active_price = 15 * COIN;
        price.next_price = 15 * COIN;
        assert!(price.compute_is_live(threshold));

        price.next_price = 30 * COIN;
        assert!(!price.compute_is_live(threshold));

        // Exactly on the band edge is still live
        price.next_price = 15 * COIN + 15 * COIN * 30 / 100;
        assert!(price.compute_is_live(threshold));
    }
}
