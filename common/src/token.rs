use serde::{Deserialize, Serialize};

use crate::{
    amount::{Amount, TokenId},
    crypto::Hash,
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

pub const TOKEN_FLAG_MINTABLE: u8 = 0x01;
pub const TOKEN_FLAG_TRADEABLE: u8 = 0x02;
pub const TOKEN_FLAG_DAT: u8 = 0x04;
pub const TOKEN_FLAG_LPS: u8 = 0x08;
pub const TOKEN_FLAG_FINALIZED: u8 = 0x10;
pub const TOKEN_FLAG_LOAN: u8 = 0x20;

pub const TOKEN_DEFAULT_FLAGS: u8 = TOKEN_FLAG_MINTABLE | TOKEN_FLAG_TRADEABLE;

// DAT tokens use ids below this boundary, user tokens start from it
pub const DCT_ID_START: TokenId = 128;

pub const MAX_TOKEN_SYMBOL_LENGTH: usize = 8;
pub const MAX_TOKEN_NAME_LENGTH: usize = 128;
pub const MAX_POOL_PAIR_SYMBOL_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub name: String,
    pub decimal: u8,
    pub limit: Amount,
    pub flags: u8,
    pub minted: Amount,
    pub creation_tx: Hash,
    pub creation_height: u32,
    // Address allowed to mint a non DAT token
    pub owner: Script,
}

impl Token {
    pub fn is_mintable(&self) -> bool {
        self.flags & TOKEN_FLAG_MINTABLE != 0
    }

    pub fn is_tradeable(&self) -> bool {
        self.flags & TOKEN_FLAG_TRADEABLE != 0
    }

    pub fn is_dat(&self) -> bool {
        self.flags & TOKEN_FLAG_DAT != 0
    }

    pub fn is_pool_share(&self) -> bool {
        self.flags & TOKEN_FLAG_LPS != 0
    }

    pub fn is_finalized(&self) -> bool {
        self.flags & TOKEN_FLAG_FINALIZED != 0
    }

    pub fn is_loan_token(&self) -> bool {
        self.flags & TOKEN_FLAG_LOAN != 0
    }

    pub fn set_flag(&mut self, flag: u8, enabled: bool) {
        if enabled {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    // DAT symbols are global, user tokens are disambiguated by id
    pub fn display_symbol(&self, id: TokenId) -> String {
        if self.is_dat() || id == 0 {
            self.symbol.clone()
        } else {
            format!("{}#{}", self.symbol, id)
        }
    }
}

impl Serializer for Token {
    fn write(&self, writer: &mut Writer) {
        writer.write_string(&self.symbol);
        writer.write_string(&self.name);
        writer.write_u8(self.decimal);
        writer.write_i64(self.limit);
        writer.write_u8(self.flags);
        writer.write_i64(self.minted);
        self.creation_tx.write(writer);
        writer.write_u32(self.creation_height);
        self.owner.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            symbol: reader.read_string()?,
            name: reader.read_string()?,
            decimal: reader.read_u8()?,
            limit: reader.read_i64()?,
            flags: reader.read_u8()?,
            minted: reader.read_i64()?,
            creation_tx: reader.read()?,
            creation_height: reader.read_u32()?,
            owner: reader.read()?,
        })
    }
}

/// Check the characters allowed in a token symbol.
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= MAX_TOKEN_SYMBOL_LENGTH
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
