use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use serde::{de, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::{borrow::Cow, fmt, str::FromStr};
use thiserror::Error;

pub const HASH_SIZE: usize = 32;

/// 256 bits identifier: transaction ids, vault, oracle and proposal ids,
/// masternode ids and EVM block hashes all share this type.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, Default, Hash)]
pub struct Hash([u8; HASH_SIZE]);

#[derive(Debug, Error, PartialEq)]
pub enum HashParseError {
    #[error("expected {expected} hex characters, got {0}", expected = HASH_SIZE * 2)]
    Length(usize),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub const fn zero() -> Self {
        Hash([0; HASH_SIZE])
    }

    pub const fn max() -> Self {
        Hash([u8::MAX; HASH_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; HASH_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_SIZE * 2 {
            return Err(HashParseError::Length(s.len()));
        }
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Hash(bytes))
    }
}

/// Double SHA-256, used for transaction and vault ids.
pub fn hash(value: &[u8]) -> Hash {
    let first = Sha256::digest(value);
    Hash(Sha256::digest(first).into())
}

/// Keccak-256 as used on the EVM side of the bridge.
pub fn keccak256(value: &[u8]) -> Hash {
    Hash(Keccak256::digest(value).into())
}

impl Serializer for Hash {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_hash()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_hash(self);
    }

    fn size(&self) -> usize {
        HASH_SIZE
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Cow::<'de, str>::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

impl<'a> From<Hash> for Cow<'a, Hash> {
    fn from(value: Hash) -> Self {
        Cow::Owned(value)
    }
}

impl<'a> From<&'a Hash> for Cow<'a, Hash> {
    fn from(value: &'a Hash) -> Self {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_sha256_empty() {
        assert_eq!(
            hash(b"").to_hex(),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_keccak_empty() {
        assert_eq!(
            keccak256(b"").to_hex(),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_hash_from_str() {
        let h = hash(b"tessera");
        let parsed: Hash = h.to_hex().parse().unwrap();
        assert_eq!(parsed, h);
        assert_eq!("zz".parse::<Hash>(), Err(HashParseError::Length(2)));
        assert!(matches!("zz".repeat(32).parse::<Hash>(), Err(HashParseError::Hex(_))));
    }

    #[test]
    fn test_hash_json() {
        let h = hash(b"vault");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        assert_eq!(serde_json::from_str::<Hash>(&json).unwrap(), h);
        assert!(serde_json::from_str::<Hash>("\"00\"").is_err());
    }
}
