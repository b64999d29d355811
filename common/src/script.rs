use std::fmt::{Display, Formatter};
use std::str::FromStr;

use primitive_types::H160;
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay, EnumIter, EnumString};

use crate::{
    crypto::keccak256,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

pub const OP_0: u8 = 0x00;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;

// Raw output script, used as the owner of every account balance
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Script(Vec<u8>);

/// Address formats recognized by the transfer-domain allow-lists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, EnumString, StrumDisplay, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum AddressFormat {
    P2pkh,
    P2sh,
    Bech32,
    Erc55,
    Unknown,
}

impl AddressFormat {
    pub fn id(&self) -> u8 {
        match self {
            AddressFormat::P2pkh => 1,
            AddressFormat::P2sh => 2,
            AddressFormat::Bech32 => 4,
            AddressFormat::Erc55 => 5,
            AddressFormat::Unknown => 0,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => AddressFormat::P2pkh,
            2 => AddressFormat::P2sh,
            4 => AddressFormat::Bech32,
            5 => AddressFormat::Erc55,
            0 => AddressFormat::Unknown,
            _ => return None,
        })
    }
}

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn p2pkh(key_hash: [u8; 20]) -> Self {
        let mut bytes = Vec::with_capacity(25);
        bytes.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
        bytes.extend_from_slice(&key_hash);
        bytes.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Self(bytes)
    }

    pub fn p2sh(script_hash: [u8; 20]) -> Self {
        let mut bytes = Vec::with_capacity(23);
        bytes.extend_from_slice(&[OP_HASH160, 20]);
        bytes.extend_from_slice(&script_hash);
        bytes.push(OP_EQUAL);
        Self(bytes)
    }

    pub fn p2wpkh(key_hash: [u8; 20]) -> Self {
        let mut bytes = Vec::with_capacity(22);
        bytes.extend_from_slice(&[OP_0, 20]);
        bytes.extend_from_slice(&key_hash);
        Self(bytes)
    }

    // Witness v16 key hash, the native side encoding of an EVM address
    pub fn erc55(address: &H160) -> Self {
        let mut bytes = Vec::with_capacity(22);
        bytes.extend_from_slice(&[OP_16, 20]);
        bytes.extend_from_slice(address.as_bytes());
        Self(bytes)
    }

    // Build an OP_RETURN data carrier for the given payload
    pub fn data_carrier(payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 6);
        bytes.push(OP_RETURN);
        let len = payload.len();
        if len < OP_PUSHDATA1 as usize {
            bytes.push(len as u8);
        } else if len <= 0xff {
            bytes.push(OP_PUSHDATA1);
            bytes.push(len as u8);
        } else if len <= 0xffff {
            bytes.push(OP_PUSHDATA2);
            bytes.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            bytes.push(OP_PUSHDATA4);
            bytes.extend_from_slice(&(len as u32).to_le_bytes());
        }
        bytes.extend_from_slice(payload);
        Self(bytes)
    }

    // Extract the pushed payload of an OP_RETURN data carrier
    pub fn data_carrier_payload(&self) -> Option<&[u8]> {
        let bytes = &self.0;
        if bytes.first() != Some(&OP_RETURN) || bytes.len() < 2 {
            return None;
        }

        let (len, start) = match bytes[1] {
            n if n < OP_PUSHDATA1 => (n as usize, 2),
            OP_PUSHDATA1 => (*bytes.get(2)? as usize, 3),
            OP_PUSHDATA2 => {
                let raw: [u8; 2] = bytes.get(2..4)?.try_into().ok()?;
                (u16::from_le_bytes(raw) as usize, 4)
            }
            OP_PUSHDATA4 => {
                let raw: [u8; 4] = bytes.get(2..6)?.try_into().ok()?;
                (u32::from_le_bytes(raw) as usize, 6)
            }
            _ => return None,
        };

        if bytes.len() != start + len {
            return None;
        }

        Some(&bytes[start..])
    }

    pub fn format(&self) -> AddressFormat {
        let b = &self.0;
        match b.len() {
            25 if b[0] == OP_DUP
                && b[1] == OP_HASH160
                && b[2] == 20
                && b[23] == OP_EQUALVERIFY
                && b[24] == OP_CHECKSIG =>
            {
                AddressFormat::P2pkh
            }
            23 if b[0] == OP_HASH160 && b[1] == 20 && b[22] == OP_EQUAL => AddressFormat::P2sh,
            22 if b[0] == OP_0 && b[1] == 20 => AddressFormat::Bech32,
            22 if b[0] == OP_16 && b[1] == 20 => AddressFormat::Erc55,
            _ => AddressFormat::Unknown,
        }
    }

    pub fn evm_address(&self) -> Option<H160> {
        if self.format() != AddressFormat::Erc55 {
            return None;
        }

        Some(H160::from_slice(&self.0[2..22]))
    }

    // 20 byte hash carried by the standard single key formats
    pub fn key_hash(&self) -> Option<[u8; 20]> {
        let range = match self.format() {
            AddressFormat::P2pkh => 3..23,
            AddressFormat::P2sh => 2..22,
            AddressFormat::Bech32 | AddressFormat::Erc55 => 2..22,
            AddressFormat::Unknown => return None,
        };
        self.0[range].try_into().ok()
    }
}

/// EIP-55 mixed case checksum encoding of an EVM address.
pub fn to_erc55(address: &H160) -> String {
    let lower = hex::encode(address.as_bytes());
    let digest = keccak256(lower.as_bytes());
    let digest = digest.as_bytes();

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse an EIP-55 address. Mixed case input must carry a valid checksum.
pub fn from_erc55(value: &str) -> Option<H160> {
    let stripped = value.strip_prefix("0x")?;
    if stripped.len() != 40 {
        return None;
    }

    let bytes = hex::decode(stripped).ok()?;
    let address = H160::from_slice(&bytes);
    let is_mixed = stripped.chars().any(|c| c.is_ascii_uppercase())
        && stripped.chars().any(|c| c.is_ascii_lowercase());
    if is_mixed && to_erc55(&address) != value {
        return None;
    }

    Some(address)
}

impl Display for Script {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.evm_address() {
            Some(address) => write!(f, "{}", to_erc55(&address)),
            None => write!(f, "{}", self.to_hex()),
        }
    }
}

impl FromStr for Script {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("0x") {
            let address = from_erc55(s).ok_or("Invalid EVM address")?;
            return Ok(Script::erc55(&address));
        }

        hex::decode(s)
            .map(Script)
            .map_err(|_| "Invalid script hex")
    }
}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Script {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serializer for Script {
    fn write(&self, writer: &mut Writer) {
        writer.write_var_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self(reader.read_var_bytes()?))
    }
}

impl Serialize for Script {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'a> Deserialize<'a> for Script {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let value = String::deserialize(deserializer)?;
        Script::from_str(&value).map_err(SerdeError::custom)
    }
}

impl Serializer for AddressFormat {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.id());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let id = reader.read_u8()?;
        AddressFormat::from_id(id).ok_or(ReaderError::UnknownDiscriminator(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_formats() {
        assert_eq!(Script::p2pkh([1; 20]).format(), AddressFormat::P2pkh);
        assert_eq!(Script::p2sh([1; 20]).format(), AddressFormat::P2sh);
        assert_eq!(Script::p2wpkh([1; 20]).format(), AddressFormat::Bech32);
        assert_eq!(Script::erc55(&H160::repeat_byte(1)).format(), AddressFormat::Erc55);
        assert_eq!(Script::new(vec![1, 2, 3]).format(), AddressFormat::Unknown);
    }

    #[test]
    fn test_erc55_checksum() {
        // Reference vector from EIP-55
        let address = from_erc55("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
        assert_eq!(to_erc55(&address), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        assert!(from_erc55("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD").is_none());
    }

    #[test]
    fn test_data_carrier_payload() {
        let small = Script::data_carrier(&[7u8; 10]);
        assert_eq!(small.data_carrier_payload(), Some(&[7u8; 10][..]));

        let large = Script::data_carrier(&[9u8; 300]);
        assert_eq!(large.data_carrier_payload().map(|p| p.len()), Some(300));

        assert!(Script::p2pkh([0; 20]).data_carrier_payload().is_none());
    }

    #[test]
    fn test_evm_address_roundtrip_through_script() {
        let address = H160::repeat_byte(0xab);
        let script = Script::erc55(&address);
        assert_eq!(script.evm_address(), Some(address));
        let parsed: Script = script.to_string().parse().unwrap();
        assert_eq!(parsed, script);
    }
}
