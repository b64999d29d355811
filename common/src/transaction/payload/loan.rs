use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    amount::{Amount, Balances, TokenAmount, TokenId},
    crypto::Hash,
    impl_serializer,
    oracle::CurrencyPair,
    script::Script,
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SetCollateralTokenMessage {
    pub token_id: TokenId,
    pub factor: Amount,
    pub fixed_interval_price_id: CurrencyPair,
    pub activate_after_block: u32,
}

impl_serializer!(SetCollateralTokenMessage {
    token_id,
    factor,
    fixed_interval_price_id,
    activate_after_block
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SetLoanTokenMessage {
    pub symbol: String,
    pub name: String,
    pub fixed_interval_price_id: CurrencyPair,
    pub mintable: bool,
    pub interest: Amount,
}

impl_serializer!(SetLoanTokenMessage {
    symbol,
    name,
    fixed_interval_price_id,
    mintable,
    interest
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UpdateLoanTokenMessage {
    pub token_id: TokenId,
    pub symbol: String,
    pub name: String,
    pub fixed_interval_price_id: CurrencyPair,
    pub mintable: bool,
    pub interest: Amount,
}

impl_serializer!(UpdateLoanTokenMessage {
    token_id,
    symbol,
    name,
    fixed_interval_price_id,
    mintable,
    interest
});

// Creates a scheme, or updates one; a non zero height defers the update
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LoanSchemeMessage {
    pub identifier: String,
    pub ratio: u32,
    pub rate: Amount,
    pub update_height: u64,
}

impl_serializer!(LoanSchemeMessage {
    identifier,
    ratio,
    rate,
    update_height
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DefaultLoanSchemeMessage {
    pub identifier: String,
}

impl_serializer!(DefaultLoanSchemeMessage { identifier });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DestroyLoanSchemeMessage {
    pub identifier: String,
    pub destroy_height: u64,
}

impl_serializer!(DestroyLoanSchemeMessage {
    identifier,
    destroy_height
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreateVaultMessage {
    pub owner: Script,
    // Empty selects the default scheme
    pub scheme_id: String,
}

impl_serializer!(CreateVaultMessage { owner, scheme_id });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CloseVaultMessage {
    pub vault_id: Hash,
    pub to: Script,
}

impl_serializer!(CloseVaultMessage { vault_id, to });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UpdateVaultMessage {
    pub vault_id: Hash,
    pub owner: Script,
    pub scheme_id: String,
}

impl_serializer!(UpdateVaultMessage {
    vault_id,
    owner,
    scheme_id
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DepositToVaultMessage {
    pub vault_id: Hash,
    pub from: Script,
    pub amount: TokenAmount,
}

impl_serializer!(DepositToVaultMessage {
    vault_id,
    from,
    amount
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WithdrawFromVaultMessage {
    pub vault_id: Hash,
    pub to: Script,
    pub amount: TokenAmount,
}

impl_serializer!(WithdrawFromVaultMessage {
    vault_id,
    to,
    amount
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TakeLoanMessage {
    pub vault_id: Hash,
    // Empty means the vault owner
    pub to: Script,
    pub amounts: Balances,
}

impl_serializer!(TakeLoanMessage {
    vault_id,
    to,
    amounts
});

// loan token -> amounts paid, possibly in other tokens
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PaybackLoanMessage {
    pub vault_id: Hash,
    pub from: Script,
    pub loans: BTreeMap<TokenId, Balances>,
}

impl_serializer!(PaybackLoanMessage {
    vault_id,
    from,
    loans
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AuctionBidMessage {
    pub vault_id: Hash,
    pub index: u32,
    pub from: Script,
    pub amount: TokenAmount,
}

impl_serializer!(AuctionBidMessage {
    vault_id,
    index,
    from,
    amount
});
