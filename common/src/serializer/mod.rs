mod defaults;
mod reader;
mod writer;

pub use reader::{Reader, ReaderError};
pub use writer::Writer;

// Maximum number of elements accepted for any length prefixed collection.
// Prevents a malformed payload from requesting a huge allocation.
pub const MAX_ITEMS: usize = 1 << 16;

/// Field by field encoding for plain message structs, in declaration order.
#[macro_export]
macro_rules! impl_serializer {
    ($name:ident { $($field:ident),* $(,)? }) => {
        impl $crate::serializer::Serializer for $name {
            fn write(&self, writer: &mut $crate::serializer::Writer) {
                $( $crate::serializer::Serializer::write(&self.$field, writer); )*
            }

            fn read(
                reader: &mut $crate::serializer::Reader,
            ) -> Result<Self, $crate::serializer::ReaderError> {
                Ok(Self {
                    $( $field: reader.read()?, )*
                })
            }
        }
    };
}

pub trait Serializer {
    fn write(&self, writer: &mut Writer);

    fn read(reader: &mut Reader) -> Result<Self, ReaderError>
    where
        Self: Sized;

    fn size(&self) -> usize {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.total_write()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.bytes()
    }

    fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    // Strict decoding: all bytes must be consumed
    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError>
    where
        Self: Sized,
    {
        let mut reader = Reader::new(bytes);
        let value = Self::read(&mut reader)?;
        if reader.size() != 0 {
            return Err(ReaderError::InvalidSize);
        }

        Ok(value)
    }

    fn from_hex(hex: &str) -> Result<Self, ReaderError>
    where
        Self: Sized,
    {
        let bytes = hex::decode(hex).map_err(|_| ReaderError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_compact_size_boundaries() {
        for n in [0u64, 252, 253, 0xffff, 0x10000, 0xffff_ffff, 0x1_0000_0000] {
            let mut writer = Writer::new();
            writer.write_compact_size(n);
            let bytes = writer.bytes();
            let mut reader = Reader::new(&bytes);
            assert_eq!(reader.read_compact_size().unwrap(), n);
            assert_eq!(reader.size(), 0);
        }
    }

    #[test]
    fn test_from_bytes_rejects_trailing_data() {
        let mut bytes = 7u32.to_bytes();
        bytes.push(0);
        assert!(matches!(
            u32::from_bytes(&bytes),
            Err(ReaderError::InvalidSize)
        ));
    }

    #[test]
    fn test_map_and_option_encoding() {
        let mut map = BTreeMap::new();
        map.insert(1u32, -5i64);
        map.insert(9u32, 42i64);
        let value = (Some("abc".to_string()), map);
        let decoded = <(Option<String>, BTreeMap<u32, i64>)>::from_bytes(&value.to_bytes()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_invalid_bool() {
        assert!(bool::from_bytes(&[2]).is_err());
    }
}
