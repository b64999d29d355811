use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};
use tessera_common::{
    amount::TokenId,
    crypto::Hash,
    history::HistorySubject,
    oracle::CurrencyPair,
    script::Script,
    serializer::Serializer,
};

// Every column is a namespace of the same physical store, its prefix byte
// is part of the persisted layout and must never change.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Eq, Ord, Hash, EnumIter, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Column {
    // {token_id} => {token}
    Tokens,
    // {symbol} => {token_id}
    TokenSymbols,
    // {owner}{token_id} => {amount}
    Balances,

    // {pool_id} => {pool_pair}
    PoolPairs,
    // {token_a}{token_b} => {pool_id}
    PoolByPair,
    // {pool_id}{owner} => {reward_checkpoint}
    PoolRewardCheckpoints,

    // {oracle_id} => {oracle}
    Oracles,
    // {currency_pair} => {fixed_interval_price}
    FixedIntervalPrices,

    // {token_id} => {collateral_token}
    CollateralTokens,
    // {token_id} => {loan_token}
    LoanTokens,
    // {scheme_id} => {loan_scheme}
    LoanSchemes,
    // {height}{scheme_id} => {scheduled_change}
    SchemeSchedule,

    // {vault_id} => {vault}
    Vaults,
    // {vault_id} => {balances}
    VaultCollateral,
    // Only vaults carrying a loan have an entry
    // {vault_id} => {balances}
    VaultLoans,
    // {vault_id}{token_id} => {interest_rate}
    VaultInterest,

    // {vault_id} => {auction_data}
    Auctions,
    // {end_height}{vault_id} => {}
    AuctionsByHeight,
    // {vault_id}{index} => {batch}
    AuctionBatches,

    // {proposal_id} => {proposal}
    Proposals,
    // {cycle_end_height}{proposal_id} => {}
    ActiveProposals,
    // {proposal_id}{cycle}{masternode_id} => {decision}
    Votes,

    // {masternode_id} => {masternode}
    Masternodes,
    // {operator} => {masternode_id}
    MasternodeOperators,

    // {address}{token_id} => {amount}
    EvmBalances,
    // {address} => {nonce}
    EvmNonces,
    // {number} => {block_header}
    EvmBlocks,
    // {evm_tx_hash} => {receipt}
    EvmReceipts,
    // {kind}{key} => {value}
    VmMap,

    // {path} => {attribute_value}
    Attributes,
    // {height}{path} => {attribute_value}
    PendingAttributes,

    // {subject}{!height}{!tx_index}{!sequence} => {history_entry}
    History,

    // {height} => {undo_record}
    Undo,
    // Misc data with no specific rules
    Meta,
}

impl Column {
    pub fn prefix(&self) -> u8 {
        match self {
            Column::Tokens => 0x01,
            Column::TokenSymbols => 0x02,
            Column::Balances => 0x03,
            Column::PoolPairs => 0x10,
            Column::PoolByPair => 0x11,
            Column::PoolRewardCheckpoints => 0x12,
            Column::Oracles => 0x20,
            Column::FixedIntervalPrices => 0x21,
            Column::CollateralTokens => 0x30,
            Column::LoanTokens => 0x31,
            Column::LoanSchemes => 0x32,
            Column::SchemeSchedule => 0x33,
            Column::Vaults => 0x40,
            Column::VaultCollateral => 0x41,
            Column::VaultLoans => 0x42,
            Column::VaultInterest => 0x43,
            Column::Auctions => 0x50,
            Column::AuctionsByHeight => 0x51,
            Column::AuctionBatches => 0x52,
            Column::Proposals => 0x60,
            Column::ActiveProposals => 0x61,
            Column::Votes => 0x62,
            Column::Masternodes => 0x70,
            Column::MasternodeOperators => 0x71,
            Column::EvmBalances => 0x80,
            Column::EvmNonces => 0x81,
            Column::EvmBlocks => 0x82,
            Column::EvmReceipts => 0x83,
            Column::VmMap => 0x84,
            Column::Attributes => 0x90,
            Column::PendingAttributes => 0x91,
            Column::History => 0xa0,
            Column::Undo => 0xf0,
            Column::Meta => 0xff,
        }
    }

    pub fn from_prefix(prefix: u8) -> Option<Self> {
        Column::iter().find(|column| column.prefix() == prefix)
    }

    // Undo records describe the journal itself
    pub fn is_journaled(&self) -> bool {
        !matches!(self, Column::Undo)
    }
}

// Owner scripts are length prefixed so that a prefix scan never matches a
// longer script sharing the same leading bytes
pub fn build_owner_prefix(owner: &Script) -> Vec<u8> {
    let bytes = owner.as_bytes();
    let mut key = Vec::with_capacity(2 + bytes.len());
    key.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    key.extend_from_slice(bytes);
    key
}

pub fn build_balance_key(owner: &Script, token_id: TokenId) -> Vec<u8> {
    let mut key = build_owner_prefix(owner);
    key.extend_from_slice(&token_id.to_be_bytes());
    key
}

pub fn parse_balance_key(key: &[u8]) -> Option<(Script, TokenId)> {
    if key.len() < 2 {
        return None;
    }
    let len = u16::from_be_bytes([key[0], key[1]]) as usize;
    if key.len() != 2 + len + 4 {
        return None;
    }
    let owner = Script::new(key[2..2 + len].to_vec());
    let mut id = [0u8; 4];
    id.copy_from_slice(&key[2 + len..]);
    Some((owner, TokenId::from_be_bytes(id)))
}

pub fn build_pair_key(token_a: TokenId, token_b: TokenId) -> [u8; 8] {
    let (low, high) = if token_a <= token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    };
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&low.to_be_bytes());
    key[4..].copy_from_slice(&high.to_be_bytes());
    key
}

pub fn build_reward_checkpoint_key(pool_id: TokenId, owner: &Script) -> Vec<u8> {
    let mut key = pool_id.to_be_bytes().to_vec();
    key.extend(build_owner_prefix(owner));
    key
}

pub fn build_price_key(pair: &CurrencyPair) -> Vec<u8> {
    pair.to_bytes()
}

pub fn build_height_key(height: u32, suffix: &[u8]) -> Vec<u8> {
    let mut key = height.to_be_bytes().to_vec();
    key.extend_from_slice(suffix);
    key
}

pub fn build_vault_token_key(vault_id: &Hash, token_id: TokenId) -> Vec<u8> {
    let mut key = vault_id.as_bytes().to_vec();
    key.extend_from_slice(&token_id.to_be_bytes());
    key
}

pub fn build_batch_key(vault_id: &Hash, index: u32) -> Vec<u8> {
    let mut key = vault_id.as_bytes().to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub fn build_vote_prefix(proposal_id: &Hash, cycle: u8) -> Vec<u8> {
    let mut key = proposal_id.as_bytes().to_vec();
    key.push(cycle);
    key
}

pub fn build_vote_key(proposal_id: &Hash, cycle: u8, masternode_id: &Hash) -> Vec<u8> {
    let mut key = build_vote_prefix(proposal_id, cycle);
    key.extend_from_slice(masternode_id.as_bytes());
    key
}

pub fn build_evm_balance_key(address: &[u8; 20], token_id: TokenId) -> Vec<u8> {
    let mut key = address.to_vec();
    key.extend_from_slice(&token_id.to_be_bytes());
    key
}

pub fn build_vmmap_key(kind: u8, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + key.len());
    out.push(kind);
    out.extend_from_slice(key);
    out
}

pub fn build_history_prefix(subject: &HistorySubject) -> Vec<u8> {
    let id = subject.id_bytes();
    let mut key = Vec::with_capacity(3 + id.len());
    key.push(subject.tag());
    key.extend_from_slice(&(id.len() as u16).to_be_bytes());
    key.extend_from_slice(&id);
    key
}

// Newest entries sort first
pub fn build_history_key(subject: &HistorySubject, height: u32, tx_index: u32, sequence: u32) -> Vec<u8> {
    let mut key = build_history_prefix(subject);
    key.extend_from_slice(&(!height).to_be_bytes());
    key.extend_from_slice(&(!tx_index).to_be_bytes());
    key.extend_from_slice(&(!sequence).to_be_bytes());
    key
}
