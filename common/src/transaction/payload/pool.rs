use serde::{Deserialize, Serialize};

use crate::{
    amount::{Amount, Balances, TokenAmount, TokenId},
    dex::PoolPrice,
    impl_serializer,
    script::Script,
};

use super::account::AccountsMap;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreatePoolPairMessage {
    pub token_a: TokenId,
    pub token_b: TokenId,
    pub commission: Amount,
    pub owner: Script,
    pub status: bool,
    pub pair_symbol: String,
    pub custom_rewards: Balances,
}

impl_serializer!(CreatePoolPairMessage {
    token_a,
    token_b,
    commission,
    owner,
    status,
    pair_symbol,
    custom_rewards
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UpdatePoolPairMessage {
    pub pool_id: TokenId,
    pub status: bool,
    // Negative keeps the current commission
    pub commission: Amount,
    // Empty keeps the current owner
    pub owner: Script,
    pub custom_rewards: Option<Balances>,
}

impl_serializer!(UpdatePoolPairMessage {
    pool_id,
    status,
    commission,
    owner,
    custom_rewards
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PoolSwapMessage {
    pub from: Script,
    pub token_from: TokenId,
    pub amount_from: Amount,
    pub to: Script,
    pub token_to: TokenId,
    pub max_price: PoolPrice,
}

impl_serializer!(PoolSwapMessage {
    from,
    token_from,
    amount_from,
    to,
    token_to,
    max_price
});

// Multi hop swap, an empty pool list lets the engine pick the path
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompositeSwapMessage {
    pub swap: PoolSwapMessage,
    pub pool_ids: Vec<TokenId>,
}

impl_serializer!(CompositeSwapMessage { swap, pool_ids });

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AddPoolLiquidityMessage {
    pub from: AccountsMap,
    pub share_address: Script,
}

impl_serializer!(AddPoolLiquidityMessage {
    from,
    share_address
});

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemovePoolLiquidityMessage {
    pub from: Script,
    pub amount: TokenAmount,
}

impl_serializer!(RemovePoolLiquidityMessage { from, amount });
