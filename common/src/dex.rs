use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
    amount::{Amount, Balances, TokenId},
    crypto::Hash,
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

// Liquidity permanently locked by the first provider of a pool
pub const MINIMUM_LIQUIDITY: Amount = 1000;

// Slippage tolerance for add liquidity ratio checks, in Satoshis
pub const ADD_LIQUIDITY_TOLERANCE: Amount = 1;

pub const MAX_SWAP_HOPS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FeeDirection {
    #[default]
    Both,
    In,
    Out,
}

impl FeeDirection {
    pub fn applies_in(&self) -> bool {
        matches!(self, FeeDirection::Both | FeeDirection::In)
    }

    pub fn applies_out(&self) -> bool {
        matches!(self, FeeDirection::Both | FeeDirection::Out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPair {
    pub token_a: TokenId,
    pub token_b: TokenId,
    pub reserve_a: Amount,
    pub reserve_b: Amount,
    pub total_liquidity: Amount,
    // 8 decimal fraction in [0, 1)
    pub commission: Amount,
    pub status: bool,
    pub owner: Script,
    pub creation_tx: Hash,
    pub creation_height: u32,
    pub custom_rewards: Balances,
    // Reward per liquidity share, scaled by HIGH_PRECISION_SCALER
    pub reward_per_share: BTreeMap<TokenId, u128>,
    // Rewards distributed but not yet claimed by providers
    pub reward_escrow: Balances,
}

impl PoolPair {
    pub fn contains(&self, token_id: TokenId) -> bool {
        self.token_a == token_id || self.token_b == token_id
    }

    // Token on the other side of the pool
    pub fn other(&self, token_id: TokenId) -> Option<TokenId> {
        if self.token_a == token_id {
            Some(self.token_b)
        } else if self.token_b == token_id {
            Some(self.token_a)
        } else {
            None
        }
    }

    // Reserves ordered as (input, output) for a swap from the given token
    pub fn reserves_from(&self, token_from: TokenId) -> (Amount, Amount) {
        if token_from == self.token_a {
            (self.reserve_a, self.reserve_b)
        } else {
            (self.reserve_b, self.reserve_a)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_liquidity == 0
    }
}

impl Serializer for PoolPair {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.token_a);
        writer.write_u32(self.token_b);
        writer.write_i64(self.reserve_a);
        writer.write_i64(self.reserve_b);
        writer.write_i64(self.total_liquidity);
        writer.write_i64(self.commission);
        writer.write_bool(self.status);
        self.owner.write(writer);
        self.creation_tx.write(writer);
        writer.write_u32(self.creation_height);
        self.custom_rewards.write(writer);
        self.reward_per_share.write(writer);
        self.reward_escrow.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            token_a: reader.read_u32()?,
            token_b: reader.read_u32()?,
            reserve_a: reader.read_i64()?,
            reserve_b: reader.read_i64()?,
            total_liquidity: reader.read_i64()?,
            commission: reader.read_i64()?,
            status: reader.read_bool()?,
            owner: reader.read()?,
            creation_tx: reader.read()?,
            creation_height: reader.read_u32()?,
            custom_rewards: reader.read()?,
            reward_per_share: reader.read()?,
            reward_escrow: reader.read()?,
        })
    }
}

/// Per provider checkpoint of the pool reward accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardCheckpoint(pub BTreeMap<TokenId, u128>);

impl Serializer for RewardCheckpoint {
    fn write(&self, writer: &mut Writer) {
        self.0.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self(reader.read()?))
    }
}

/// Maximum price expressed as integer and fractional parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPrice {
    pub integer: i64,
    pub fraction: i64,
}

impl PoolPrice {
    pub fn unlimited() -> Self {
        Self {
            integer: i64::MAX,
            fraction: i64::MAX,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.integer == i64::MAX && self.fraction == i64::MAX
    }

    // As an 8 decimal amount
    pub fn as_amount(&self) -> Option<Amount> {
        if self.is_unlimited() {
            return None;
        }
        self.integer
            .checked_mul(crate::amount::COIN)
            .and_then(|v| v.checked_add(self.fraction))
    }

    pub fn from_amount(value: Amount) -> Self {
        Self {
            integer: value / crate::amount::COIN,
            fraction: value % crate::amount::COIN,
        }
    }
}

impl Serializer for PoolPrice {
    fn write(&self, writer: &mut Writer) {
        writer.write_i64(self.integer);
        writer.write_i64(self.fraction);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            integer: reader.read_i64()?,
            fraction: reader.read_i64()?,
        })
    }
}
