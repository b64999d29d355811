use std::convert::TryInto;

use thiserror::Error;

use super::{Serializer, MAX_ITEMS};
use crate::crypto::{Hash, HASH_SIZE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("Invalid size")]
    InvalidSize,
    #[error("Invalid value")]
    InvalidValue,
    #[error("Invalid hex")]
    InvalidHex,
    #[error("Invalid UTF-8 string")]
    InvalidUtf8,
    #[error("Collection too large: {0} items")]
    TooManyItems(u64),
    #[error("Error while converting bytes")]
    ErrorTryInto,
    #[error("Unknown discriminator {0:#04x}")]
    UnknownDiscriminator(u8),
}

pub struct Reader<'a> {
    bytes: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, total: 0 }
    }

    pub fn read<T: Serializer>(&mut self) -> Result<T, ReaderError> {
        T::read(self)
    }

    pub fn read_bytes_ref(&mut self, n: usize) -> Result<&'a [u8], ReaderError> {
        if n > self.size() {
            return Err(ReaderError::InvalidSize);
        }

        let bytes = &self.bytes[self.total..self.total + n];
        self.total += n;
        Ok(bytes)
    }

    pub fn read_bytes<T>(&mut self, n: usize) -> Result<T, ReaderError>
    where
        T: for<'b> TryFrom<&'b [u8]>,
    {
        let bytes = self.read_bytes_ref(n)?;
        bytes.try_into().map_err(|_| ReaderError::ErrorTryInto)
    }

    pub fn read_bytes_32(&mut self) -> Result<[u8; 32], ReaderError> {
        self.read_bytes(32)
    }

    pub fn read_bytes_20(&mut self) -> Result<[u8; 20], ReaderError> {
        self.read_bytes(20)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        let bytes = self.read_bytes_ref(1)?;
        Ok(bytes[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        Ok(u16::from_le_bytes(self.read_bytes(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ReaderError> {
        Ok(i32::from_le_bytes(self.read_bytes(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ReaderError> {
        Ok(i64::from_le_bytes(self.read_bytes(8)?))
    }

    pub fn read_u128(&mut self) -> Result<u128, ReaderError> {
        Ok(u128::from_le_bytes(self.read_bytes(16)?))
    }

    pub fn read_compact_size(&mut self) -> Result<u64, ReaderError> {
        let value = match self.read_u8()? {
            253 => self.read_u16()? as u64,
            254 => self.read_u32()? as u64,
            255 => self.read_u64()?,
            n => n as u64,
        };

        Ok(value)
    }

    // Length prefix for a collection, bounded by MAX_ITEMS
    pub fn read_len(&mut self) -> Result<usize, ReaderError> {
        let len = self.read_compact_size()?;
        if len > MAX_ITEMS as u64 {
            return Err(ReaderError::TooManyItems(len));
        }

        Ok(len as usize)
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, ReaderError> {
        let len = self.read_compact_size()?;
        if len > self.size() as u64 {
            return Err(ReaderError::InvalidSize);
        }

        Ok(self.read_bytes_ref(len as usize)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, ReaderError> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes).map_err(|_| ReaderError::InvalidUtf8)
    }

    pub fn read_hash(&mut self) -> Result<Hash, ReaderError> {
        let bytes: [u8; HASH_SIZE] = self.read_bytes(HASH_SIZE)?;
        Ok(Hash::new(bytes))
    }

    // Remaining bytes
    pub fn size(&self) -> usize {
        self.bytes.len() - self.total
    }

    pub fn total_read(&self) -> usize {
        self.total
    }
}
