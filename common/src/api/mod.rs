pub mod daemon;

use serde::{Deserialize, Serialize};

use crate::amount::TokenId;

/// Token reference by id or by display symbol (`GOLD`, `GOLD#130`, `DFI-GOLD`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenSelector {
    Id(TokenId),
    Symbol(String),
}

/// Path of a quoted swap: `direct`, `auto`, `composite` or explicit pool ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SwapPath {
    Named(String),
    Pools(Vec<TokenId>),
}

impl Default for SwapPath {
    fn default() -> Self {
        SwapPath::Named("direct".to_owned())
    }
}
