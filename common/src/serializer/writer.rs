use crate::crypto::Hash;

// Little-endian writer used for every value encoded on the wire or on disk.
// Keys are built separately (big-endian) so they sort numerically.
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.bytes.push(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u128(&mut self, value: u128) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    // Bitcoin CompactSize
    pub fn write_compact_size(&mut self, value: u64) {
        if value < 253 {
            self.write_u8(value as u8);
        } else if value <= 0xffff {
            self.write_u8(253);
            self.write_u16(value as u16);
        } else if value <= 0xffff_ffff {
            self.write_u8(254);
            self.write_u32(value as u32);
        } else {
            self.write_u8(255);
            self.write_u64(value);
        }
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_compact_size(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_var_bytes(value.as_bytes());
    }

    pub fn write_hash(&mut self, hash: &Hash) {
        self.bytes.extend_from_slice(hash.as_bytes());
    }

    pub fn total_write(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}
