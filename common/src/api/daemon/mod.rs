use std::borrow::Cow;

use primitive_types::H160;
use serde::{Deserialize, Serialize};

use super::{SwapPath, TokenSelector};
use crate::{
    amount::{Amount, TokenId},
    crypto::Hash,
    governance::{MasternodeId, ProposalStatus, VoteDecision},
    history::HistoryFilter,
    loan::VaultId,
    script::Script,
};

#[derive(Serialize, Deserialize)]
pub struct GetTokenParams {
    pub token: TokenSelector,
}

#[derive(Serialize, Deserialize)]
pub struct GetPoolPairParams {
    pub pool: TokenSelector,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPoolSwapParams {
    pub token_from: TokenSelector,
    pub amount_from: Amount,
    pub token_to: TokenSelector,
    #[serde(default)]
    pub path: SwapPath,
}

#[derive(Serialize, Deserialize)]
pub struct GetAccountParams<'a> {
    pub owner: Cow<'a, Script>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPendingRewardsParams<'a> {
    pub owner: Cow<'a, Script>,
    pub pool_id: TokenId,
}

#[derive(Default, Serialize, Deserialize)]
pub struct ListAccountHistoryParams<'a> {
    // Every account when absent
    #[serde(default)]
    pub owner: Option<Cow<'a, Script>>,
    #[serde(flatten)]
    pub filter: HistoryFilter,
}

#[derive(Serialize, Deserialize)]
pub struct GetPriceParams {
    // `TOKEN/CURRENCY`
    pub pair: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOracleDataParams<'a> {
    pub oracle_id: Cow<'a, Hash>,
}

#[derive(Serialize, Deserialize)]
pub struct GetLoanSchemeParams {
    pub id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVaultParams<'a> {
    pub vault_id: Cow<'a, VaultId>,
}

#[derive(Default, Serialize, Deserialize)]
pub struct ListVaultsParams<'a> {
    #[serde(default)]
    pub owner: Option<Cow<'a, Script>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVaultHistoryParams<'a> {
    pub vault_id: Cow<'a, VaultId>,
    #[serde(flatten)]
    pub filter: HistoryFilter,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetGovProposalParams<'a> {
    pub proposal_id: Cow<'a, Hash>,
}

#[derive(Default, Serialize, Deserialize)]
pub struct ListGovProposalsParams {
    #[serde(default)]
    pub status: Option<ProposalStatus>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListGovProposalVotesParams<'a> {
    pub proposal_id: Cow<'a, Hash>,
    // Current cycle when absent
    #[serde(default)]
    pub cycle: Option<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovProposalVote {
    pub masternode_id: MasternodeId,
    pub cycle: u8,
    pub vote: VoteDecision,
}

#[derive(Serialize, Deserialize)]
pub struct GetGovParams {
    // `ATTRIBUTES` or a single attribute path
    pub name: String,
}

#[derive(Serialize, Deserialize)]
pub struct GetMasternodeParams<'a> {
    pub id: Cow<'a, MasternodeId>,
}

#[derive(Serialize, Deserialize)]
pub struct VmMapParams {
    pub input: String,
    // snake case mapping kind, e.g. `tx_hash_dvm_to_evm`
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Serialize, Deserialize)]
pub struct LogVmMapsParams {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Serialize, Deserialize)]
pub struct EthAddressParams<'a> {
    pub address: Cow<'a, H160>,
}

#[derive(Serialize, Deserialize)]
pub struct EthReceiptParams<'a> {
    pub hash: Cow<'a, Hash>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthFeeHistoryParams {
    pub block_count: u64,
    #[serde(default)]
    pub newest_block: Option<u64>,
    #[serde(default)]
    pub reward_percentiles: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInfoResult {
    pub height: Option<u32>,
    pub median_time: i64,
    pub network: String,
    pub evm_block: Option<u64>,
}
