use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{amount::Balances, impl_serializer, script::Script};

pub type AccountsMap = BTreeMap<Script, Balances>;

// Credits native coins carried by the data carrier output to accounts
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UtxosToAccountMessage {
    pub to: AccountsMap,
}

impl_serializer!(UtxosToAccountMessage { to });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccountToUtxosMessage {
    pub from: Script,
    pub balances: Balances,
    // Index of the first transaction output funded by this message
    pub minting_outputs_start: u32,
}

impl_serializer!(AccountToUtxosMessage {
    from,
    balances,
    minting_outputs_start
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccountToAccountMessage {
    pub from: Script,
    pub to: AccountsMap,
}

impl_serializer!(AccountToAccountMessage { from, to });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AnyAccountsToAccountsMessage {
    pub from: AccountsMap,
    pub to: AccountsMap,
}

impl_serializer!(AnyAccountsToAccountsMessage { from, to });
