use primitive_types::{H160, U256};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
    amount::{Amount, TokenAmount, TokenId},
    crypto::{keccak256, Hash},
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

// 1 Satoshi on the native side is 10^10 wei on the EVM side
pub const WEI_PER_SAT: u64 = 10_000_000_000;

pub const MIN_GAS_LIMIT: u64 = 21_000;
pub const MAX_INITCODE_SIZE: usize = 49_152;
pub const MAX_RAW_TX_SIZE: usize = 32_768;

// Base fee floor of 10 gwei
pub const INITIAL_BASE_FEE: u64 = 10_000_000_000;
pub const BASE_FEE_MAX_CHANGE_DENOMINATOR: u64 = 8;
pub const ELASTICITY_MULTIPLIER: u64 = 2;
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 30_000_000;

// Percentile used for the priority fee suggestion
pub const PRIORITY_FEE_PERCENTILE: usize = 60;
pub const FEE_HISTORY_BLOCKS: u64 = 20;

// Prefix of the deterministic DST20 contract addresses
pub const DST20_ADDRESS_PREFIX: [u8; 4] = [0xff; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VmDomain {
    Dvm,
    Evm,
}

impl VmDomain {
    pub fn id(&self) -> u8 {
        match self {
            VmDomain::Dvm => 2,
            VmDomain::Evm => 3,
        }
    }
}

impl Serializer for VmDomain {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.id());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            2 => VmDomain::Dvm,
            3 => VmDomain::Evm,
            id => return Err(ReaderError::UnknownDiscriminator(id)),
        })
    }
}

pub fn sats_to_wei(amount: Amount) -> U256 {
    U256::from(amount.max(0) as u64) * U256::from(WEI_PER_SAT)
}

// Floor conversion
pub fn wei_to_sats(value: U256) -> Amount {
    let sats = value / U256::from(WEI_PER_SAT);
    if sats > U256::from(i64::MAX as u64) {
        i64::MAX
    } else {
        sats.low_u64() as Amount
    }
}

/// Deterministic contract address of the DST20 mirror of a token.
pub fn dst20_address(token_id: TokenId) -> H160 {
    let mut bytes = [0u8; 20];
    bytes[..4].copy_from_slice(&DST20_ADDRESS_PREFIX);
    bytes[16..].copy_from_slice(&token_id.to_be_bytes());
    H160(bytes)
}

pub fn dst20_token_id(address: &H160) -> Option<TokenId> {
    let bytes = address.as_bytes();
    if bytes[..4] != DST20_ADDRESS_PREFIX || bytes[4..16].iter().any(|b| *b != 0) {
        return None;
    }
    let raw: [u8; 4] = bytes[16..].try_into().ok()?;
    Some(TokenId::from_be_bytes(raw))
}

/// EVM transaction as carried inside an `EvmTx` custom transaction.
/// Signature recovery happens upstream, `from` is the recovered sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmTransaction {
    pub from: H160,
    pub to: Option<H160>,
    pub nonce: u64,
    pub value: U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub data: Vec<u8>,
}

impl EvmTransaction {
    pub fn hash(&self) -> Hash {
        keccak256(&self.to_bytes())
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    // Price actually paid per gas unit under the given base fee
    pub fn effective_gas_price(&self, base_fee: U256) -> U256 {
        let tip = self.max_priority_fee_per_gas.min(self.max_fee_per_gas.saturating_sub(base_fee));
        base_fee + tip
    }

    pub fn max_cost(&self) -> U256 {
        self.value
            .saturating_add(self.max_fee_per_gas.saturating_mul(U256::from(self.gas_limit)))
    }
}

impl Serializer for EvmTransaction {
    fn write(&self, writer: &mut Writer) {
        self.from.write(writer);
        self.to.write(writer);
        writer.write_u64(self.nonce);
        self.value.write(writer);
        writer.write_u64(self.gas_limit);
        self.max_fee_per_gas.write(writer);
        self.max_priority_fee_per_gas.write(writer);
        writer.write_var_bytes(&self.data);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            from: reader.read()?,
            to: reader.read()?,
            nonce: reader.read_u64()?,
            value: reader.read()?,
            gas_limit: reader.read_u64()?,
            max_fee_per_gas: reader.read()?,
            max_priority_fee_per_gas: reader.read()?,
            data: reader.read_var_bytes()?,
        })
    }
}

/// Native side of a transfer-domain leg, mirrored as a system EVM tx.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTransfer {
    pub native_hash: Hash,
    pub address: H160,
    pub amount: TokenAmount,
    // true when value enters the EVM side
    pub inbound: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvmQueueItem {
    System(SystemTransfer),
    Signed {
        native_hash: Hash,
        tx: EvmTransaction,
    },
}

impl EvmQueueItem {
    pub fn evm_hash(&self) -> Hash {
        match self {
            EvmQueueItem::System(transfer) => {
                let mut bytes = b"transferdomain".to_vec();
                bytes.extend_from_slice(transfer.native_hash.as_bytes());
                bytes.extend_from_slice(transfer.address.as_bytes());
                keccak256(&bytes)
            }
            EvmQueueItem::Signed { tx, .. } => tx.hash(),
        }
    }

    pub fn native_hash(&self) -> &Hash {
        match self {
            EvmQueueItem::System(transfer) => &transfer.native_hash,
            EvmQueueItem::Signed { native_hash, .. } => native_hash,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, EvmQueueItem::System(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmReceipt {
    pub tx_hash: Hash,
    pub native_hash: Hash,
    pub block_number: u64,
    pub index: u32,
    pub from: H160,
    pub to: Option<H160>,
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: U256,
    pub contract_address: Option<H160>,
}

impl Serializer for EvmReceipt {
    fn write(&self, writer: &mut Writer) {
        self.tx_hash.write(writer);
        self.native_hash.write(writer);
        writer.write_u64(self.block_number);
        writer.write_u32(self.index);
        self.from.write(writer);
        self.to.write(writer);
        writer.write_bool(self.success);
        writer.write_u64(self.gas_used);
        self.effective_gas_price.write(writer);
        self.contract_address.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            tx_hash: reader.read()?,
            native_hash: reader.read()?,
            block_number: reader.read_u64()?,
            index: reader.read_u32()?,
            from: reader.read()?,
            to: reader.read()?,
            success: reader.read_bool()?,
            gas_used: reader.read_u64()?,
            effective_gas_price: reader.read()?,
            contract_address: reader.read()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmBlockHeader {
    pub number: u64,
    pub hash: Hash,
    pub parent_hash: Hash,
    pub native_height: u32,
    pub timestamp: i64,
    pub base_fee: U256,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub tx_hashes: Vec<Hash>,
    // Tips paid per signed transaction, used by the fee oracle
    pub priority_fees: Vec<U256>,
    pub fee_burnt: Amount,
    pub fee_priority: Amount,
}

impl Serializer for EvmBlockHeader {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.number);
        self.hash.write(writer);
        self.parent_hash.write(writer);
        writer.write_u32(self.native_height);
        writer.write_i64(self.timestamp);
        self.base_fee.write(writer);
        writer.write_u64(self.gas_limit);
        writer.write_u64(self.gas_used);
        self.tx_hashes.write(writer);
        self.priority_fees.write(writer);
        writer.write_i64(self.fee_burnt);
        writer.write_i64(self.fee_priority);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            number: reader.read_u64()?,
            hash: reader.read()?,
            parent_hash: reader.read()?,
            native_height: reader.read_u32()?,
            timestamp: reader.read_i64()?,
            base_fee: reader.read()?,
            gas_limit: reader.read_u64()?,
            gas_used: reader.read_u64()?,
            tx_hashes: reader.read()?,
            priority_fees: reader.read()?,
            fee_burnt: reader.read_i64()?,
            fee_priority: reader.read_i64()?,
        })
    }
}

/// Mapping kinds served by vmmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum VmMapKind {
    TxHashDvmToEvm,
    TxHashEvmToDvm,
    BlockNumberDvmToEvm,
    BlockNumberEvmToDvm,
    TokenIdToDst20,
    Dst20ToTokenId,
}

impl VmMapKind {
    // Stable id used in persisted keys
    pub fn id(&self) -> u8 {
        match self {
            VmMapKind::TxHashDvmToEvm => 1,
            VmMapKind::TxHashEvmToDvm => 2,
            VmMapKind::BlockNumberDvmToEvm => 3,
            VmMapKind::BlockNumberEvmToDvm => 4,
            VmMapKind::TokenIdToDst20 => 5,
            VmMapKind::Dst20ToTokenId => 6,
        }
    }

    pub fn inverse(&self) -> Self {
        match self {
            VmMapKind::TxHashDvmToEvm => VmMapKind::TxHashEvmToDvm,
            VmMapKind::TxHashEvmToDvm => VmMapKind::TxHashDvmToEvm,
            VmMapKind::BlockNumberDvmToEvm => VmMapKind::BlockNumberEvmToDvm,
            VmMapKind::BlockNumberEvmToDvm => VmMapKind::BlockNumberDvmToEvm,
            VmMapKind::TokenIdToDst20 => VmMapKind::Dst20ToTokenId,
            VmMapKind::Dst20ToTokenId => VmMapKind::TokenIdToDst20,
        }
    }
}

/// Transfer-domain endpoint on either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEndpoint {
    pub address: Script,
    pub amount: TokenAmount,
    pub domain: VmDomain,
}

impl Serializer for DomainEndpoint {
    fn write(&self, writer: &mut Writer) {
        self.address.write(writer);
        self.amount.write(writer);
        self.domain.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            address: reader.read()?,
            amount: reader.read()?,
            domain: reader.read()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dst20_address_mapping() {
        let address = dst20_address(42);
        assert_eq!(dst20_token_id(&address), Some(42));
        assert_eq!(dst20_token_id(&H160::repeat_byte(1)), None);
    }

    #[test]
    fn test_effective_gas_price_capped_by_max_fee() {
        let tx = EvmTransaction {
            from: H160::zero(),
            to: Some(H160::repeat_byte(2)),
            nonce: 0,
            value: U256::zero(),
            gas_limit: MIN_GAS_LIMIT,
            max_fee_per_gas: U256::from(12u64),
            max_priority_fee_per_gas: U256::from(5u64),
            data: Vec::new(),
        };
        assert_eq!(tx.effective_gas_price(U256::from(10u64)), U256::from(12u64));
        assert_eq!(tx.effective_gas_price(U256::from(5u64)), U256::from(10u64));
    }

    #[test]
    fn test_wei_conversion() {
        assert_eq!(sats_to_wei(1), U256::from(WEI_PER_SAT));
        assert_eq!(wei_to_sats(U256::from(WEI_PER_SAT * 3 - 1)), 2);
    }
}
