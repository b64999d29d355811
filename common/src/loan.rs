use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::{
    amount::{Amount, Balances, TokenAmount, TokenId},
    crypto::Hash,
    oracle::CurrencyPair,
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

pub const MAX_LOAN_SCHEME_ID_LENGTH: usize = 8;
pub const MIN_LOAN_SCHEME_RATIO: u32 = 100;

pub type VaultId = Hash;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanScheme {
    pub identifier: String,
    // Minimum collateralization ratio, in percent
    pub ratio: u32,
    // Annual interest rate, 8 decimal percent
    pub rate: Amount,
}

impl Serializer for LoanScheme {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.identifier);
        writer.write_u32(self.ratio);
        writer.write_i64(self.rate);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            identifier: reader.read_string()?,
            ratio: reader.read_u32()?,
            rate: reader.read_i64()?,
        })
    }
}

/// Loan scheme change applied at a future height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledSchemeChange {
    Update(LoanScheme),
    Destroy(String),
}

impl ScheduledSchemeChange {
    pub fn identifier(&self) -> &str {
        match self {
            ScheduledSchemeChange::Update(scheme) => &scheme.identifier,
            ScheduledSchemeChange::Destroy(id) => id,
        }
    }
}

impl Serializer for ScheduledSchemeChange {
    fn write(&self, writer: &mut Writer) {
        match self {
            ScheduledSchemeChange::Update(scheme) => {
                writer.write_u8(0);
                scheme.write(writer);
            }
            ScheduledSchemeChange::Destroy(id) => {
                writer.write_u8(1);
                writer.write_string(id);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => ScheduledSchemeChange::Update(reader.read()?),
            1 => ScheduledSchemeChange::Destroy(reader.read_string()?),
            id => return Err(ReaderError::UnknownDiscriminator(id)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralTokenInfo {
    pub token_id: TokenId,
    // 8 decimal fraction applied to the USD value, at most 1
    pub factor: Amount,
    pub fixed_interval_price_id: CurrencyPair,
    pub activation_height: u32,
    pub creation_tx: Hash,
}

impl Serializer for CollateralTokenInfo {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.token_id);
        writer.write_i64(self.factor);
        self.fixed_interval_price_id.write(writer);
        writer.write_u32(self.activation_height);
        self.creation_tx.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            token_id: reader.read_u32()?,
            factor: reader.read_i64()?,
            fixed_interval_price_id: reader.read()?,
            activation_height: reader.read_u32()?,
            creation_tx: reader.read()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTokenInfo {
    pub token_id: TokenId,
    pub fixed_interval_price_id: CurrencyPair,
    pub mintable: bool,
    // Annual token specific interest, 8 decimal percent
    pub interest: Amount,
    pub creation_tx: Hash,
    pub creation_height: u32,
}

impl Serializer for LoanTokenInfo {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.token_id);
        self.fixed_interval_price_id.write(writer);
        writer.write_bool(self.mintable);
        writer.write_i64(self.interest);
        self.creation_tx.write(writer);
        writer.write_u32(self.creation_height);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            token_id: reader.read_u32()?,
            fixed_interval_price_id: reader.read()?,
            mintable: reader.read_bool()?,
            interest: reader.read_i64()?,
            creation_tx: reader.read()?,
            creation_height: reader.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub owner: Script,
    pub scheme_id: String,
    pub under_liquidation: bool,
    pub creation_height: u32,
    // Refundable half of the creation fee
    pub fee_escrow: Amount,
}

impl Serializer for Vault {
    fn write(&self, writer: &mut Writer) {
        self.owner.write(writer);
        writer.write_string(&self.scheme_id);
        writer.write_bool(self.under_liquidation);
        writer.write_u32(self.creation_height);
        writer.write_i64(self.fee_escrow);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            owner: reader.read()?,
            scheme_id: reader.read_string()?,
            under_liquidation: reader.read_bool()?,
            creation_height: reader.read_u32()?,
            fee_escrow: reader.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum VaultState {
    Active,
    Frozen,
    InLiquidation,
    MayLiquidate,
}

/// Interest accrual state of one loan token inside a vault.
///
/// Both fields are scaled by `HIGH_PRECISION_SCALER`. Before the high
/// precision fork `interest_per_block` is always a whole number of Satoshis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestRate {
    pub height: u32,
    pub interest_per_block: u128,
    pub interest_to_height: u128,
}

impl Serializer for InterestRate {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.height);
        writer.write_u128(self.interest_per_block);
        writer.write_u128(self.interest_to_height);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            height: reader.read_u32()?,
            interest_per_block: reader.read_u128()?,
            interest_to_height: reader.read_u128()?,
        })
    }

    fn size(&self) -> usize {
        36
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionData {
    pub batch_count: u32,
    pub liquidation_height: u32,
    pub end_height: u32,
    // 8 decimal fraction
    pub liquidation_penalty: Amount,
}

impl Serializer for AuctionData {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.batch_count);
        writer.write_u32(self.liquidation_height);
        writer.write_u32(self.end_height);
        writer.write_i64(self.liquidation_penalty);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            batch_count: reader.read_u32()?,
            liquidation_height: reader.read_u32()?,
            end_height: reader.read_u32()?,
            liquidation_penalty: reader.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub owner: Script,
    pub amount: TokenAmount,
    pub height: u32,
}

impl Serializer for Bid {
    fn write(&self, writer: &mut Writer) {
        self.owner.write(writer);
        self.amount.write(writer);
        writer.write_u32(self.height);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            owner: reader.read()?,
            amount: reader.read()?,
            height: reader.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionBatch {
    pub collaterals: Balances,
    pub loan_amount: TokenAmount,
    pub loan_interest: Amount,
    // Bids in arrival order, the last one is the highest
    pub bids: Vec<Bid>,
}

impl AuctionBatch {
    pub fn highest_bid(&self) -> Option<&Bid> {
        self.bids.last()
    }
}

impl Serializer for AuctionBatch {
    fn write(&self, writer: &mut Writer) {
        self.collaterals.write(writer);
        self.loan_amount.write(writer);
        writer.write_i64(self.loan_interest);
        self.bids.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            collaterals: reader.read()?,
            loan_amount: reader.read()?,
            loan_interest: reader.read_i64()?,
            bids: reader.read()?,
        })
    }
}

/// Point in time view of a vault, stored in history on liquidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub state: VaultState,
    pub collateral_amounts: Balances,
    pub collateral_value: Amount,
    pub collateral_ratio: i64,
    pub batches: Vec<AuctionBatch>,
}

impl Serializer for VaultState {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            VaultState::Active => 0,
            VaultState::Frozen => 1,
            VaultState::InLiquidation => 2,
            VaultState::MayLiquidate => 3,
        });
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            0 => VaultState::Active,
            1 => VaultState::Frozen,
            2 => VaultState::InLiquidation,
            3 => VaultState::MayLiquidate,
            id => return Err(ReaderError::UnknownDiscriminator(id)),
        })
    }
}

impl Serializer for VaultSnapshot {
    fn write(&self, writer: &mut Writer) {
        self.state.write(writer);
        self.collateral_amounts.write(writer);
        writer.write_i64(self.collateral_value);
        writer.write_i64(self.collateral_ratio);
        self.batches.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            state: reader.read()?,
            collateral_amounts: reader.read()?,
            collateral_value: reader.read_i64()?,
            collateral_ratio: reader.read_i64()?,
            batches: reader.read()?,
        })
    }
}

pub fn is_valid_scheme_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_LOAN_SCHEME_ID_LENGTH
}
