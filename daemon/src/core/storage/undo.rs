use bytes::Bytes;
use tessera_common::serializer::{Reader, ReaderError, Serializer, Writer};

use super::Column;

/// Previous value of every key a block wrote, `None` when the key did not
/// exist before the block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoRecord {
    pub entries: Vec<(Column, Bytes, Option<Bytes>)>,
}

impl UndoRecord {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serializer for UndoRecord {
    fn write(&self, writer: &mut Writer) {
        writer.write_compact_size(self.entries.len() as u64);
        for (column, key, previous) in &self.entries {
            writer.write_u8(column.prefix());
            writer.write_var_bytes(key);
            match previous {
                Some(value) => {
                    writer.write_bool(true);
                    writer.write_var_bytes(value);
                }
                None => writer.write_bool(false),
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let count = reader.read_compact_size()? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let prefix = reader.read_u8()?;
            let column = Column::from_prefix(prefix).ok_or(ReaderError::UnknownDiscriminator(prefix))?;
            let key = Bytes::from(reader.read_var_bytes()?);
            let previous = if reader.read_bool()? {
                Some(Bytes::from(reader.read_var_bytes()?))
            } else {
                None
            };
            entries.push((column, key, previous));
        }
        Ok(Self { entries })
    }
}
