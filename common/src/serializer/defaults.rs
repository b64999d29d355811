use std::collections::{BTreeMap, BTreeSet};

use primitive_types::{H160, U256};

use super::{Reader, ReaderError, Serializer, Writer};

macro_rules! impl_int {
    ($t:ty, $write:ident, $read:ident, $size:expr) => {
        impl Serializer for $t {
            fn write(&self, writer: &mut Writer) {
                writer.$write(*self);
            }

            fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
                reader.$read()
            }

            fn size(&self) -> usize {
                $size
            }
        }
    };
}

impl_int!(u8, write_u8, read_u8, 1);
impl_int!(u16, write_u16, read_u16, 2);
impl_int!(u32, write_u32, read_u32, 4);
impl_int!(i32, write_i32, read_i32, 4);
impl_int!(u64, write_u64, read_u64, 8);
impl_int!(i64, write_i64, read_i64, 8);
impl_int!(u128, write_u128, read_u128, 16);
impl_int!(bool, write_bool, read_bool, 1);

impl Serializer for i128 {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.to_le_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(i128::from_le_bytes(reader.read_bytes(16)?))
    }

    fn size(&self) -> usize {
        16
    }
}

impl Serializer for String {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(self);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_string()
    }
}

impl<T: Serializer> Serializer for Option<T> {
    fn write(&self, writer: &mut Writer) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.write(writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        if reader.read_bool()? {
            Ok(Some(T::read(reader)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Serializer> Serializer for Vec<T> {
    fn write(&self, writer: &mut Writer) {
        writer.write_compact_size(self.len() as u64);
        for item in self {
            item.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let len = reader.read_len()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::read(reader)?);
        }
        Ok(items)
    }
}

// Maps and sets are encoded in key order; duplicates are rejected on read
impl<K: Serializer + Ord, V: Serializer> Serializer for BTreeMap<K, V> {
    fn write(&self, writer: &mut Writer) {
        writer.write_compact_size(self.len() as u64);
        for (key, value) in self {
            key.write(writer);
            value.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let len = reader.read_len()?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = K::read(reader)?;
            let value = V::read(reader)?;
            if map.insert(key, value).is_some() {
                return Err(ReaderError::InvalidValue);
            }
        }
        Ok(map)
    }
}

impl<T: Serializer + Ord> Serializer for BTreeSet<T> {
    fn write(&self, writer: &mut Writer) {
        writer.write_compact_size(self.len() as u64);
        for item in self {
            item.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let len = reader.read_len()?;
        let mut set = BTreeSet::new();
        for _ in 0..len {
            if !set.insert(T::read(reader)?) {
                return Err(ReaderError::InvalidValue);
            }
        }
        Ok(set)
    }
}

impl<A: Serializer, B: Serializer> Serializer for (A, B) {
    fn write(&self, writer: &mut Writer) {
        self.0.write(writer);
        self.1.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok((A::read(reader)?, B::read(reader)?))
    }
}

impl<A: Serializer, B: Serializer, C: Serializer> Serializer for (A, B, C) {
    fn write(&self, writer: &mut Writer) {
        self.0.write(writer);
        self.1.write(writer);
        self.2.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok((A::read(reader)?, B::read(reader)?, C::read(reader)?))
    }
}

impl Serializer for H160 {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(self.as_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(H160(reader.read_bytes_20()?))
    }

    fn size(&self) -> usize {
        20
    }
}

impl Serializer for U256 {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.to_little_endian());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes_32()?;
        Ok(U256::from_little_endian(&bytes))
    }

    fn size(&self) -> usize {
        32
    }
}
