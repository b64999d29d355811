use serde::{Deserialize, Serialize};

use crate::{
    amount::{Amount, Balances, TokenId},
    impl_serializer,
    script::Script,
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreateTokenMessage {
    pub symbol: String,
    pub name: String,
    pub decimal: u8,
    pub limit: Amount,
    pub flags: u8,
}

impl_serializer!(CreateTokenMessage {
    symbol,
    name,
    decimal,
    limit,
    flags
});

// Replaces symbol, name and flags of an existing token
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UpdateTokenMessage {
    pub token_id: TokenId,
    pub symbol: String,
    pub name: String,
    pub flags: u8,
}

impl_serializer!(UpdateTokenMessage {
    token_id,
    symbol,
    name,
    flags
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MintTokensMessage {
    pub amounts: Balances,
    // Empty means the token owner
    pub to: Script,
}

impl_serializer!(MintTokensMessage { amounts, to });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BurnTokensMessage {
    pub amounts: Balances,
    pub from: Script,
}

impl_serializer!(BurnTokensMessage { amounts, from });
