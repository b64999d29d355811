use std::str::FromStr;

use indexmap::IndexMap;
use log::trace;
use serde::Serialize;
use serde_json::Value;
use tessera_common::{
    amount::{Amount, Balances, TokenId},
    api::{
        daemon::{
            EthAddressParams, EthFeeHistoryParams, EthReceiptParams, GetAccountParams, GetGovParams,
            GetGovProposalParams, GetInfoResult, GetLoanSchemeParams, GetMasternodeParams, GetOracleDataParams,
            GetPendingRewardsParams, GetPoolPairParams, GetPriceParams, GetTokenParams, GetVaultParams,
            GovProposalVote, ListAccountHistoryParams, ListGovProposalVotesParams, ListGovProposalsParams,
            ListVaultHistoryParams, ListVaultsParams, LogVmMapsParams, TestPoolSwapParams, VmMapParams,
        },
        SwapPath, TokenSelector,
    },
    attributes::AttributeKey,
    crypto::Hash,
    dex::PoolPair,
    evm::VmMapKind,
    governance::{Masternode, MasternodeId},
    history::HistorySubject,
    loan::{AuctionBatch, VaultId, VaultState},
    oracle::{CurrencyPair, Oracle, OracleId},
    script::Script,
    token::Token,
};

use super::{parse_optional_params, parse_params, require_no_params, to_json, RpcError, RpcHandler};
use crate::core::{
    blockchain::Blockchain,
    dex::{self, PathSelector},
    error::BlockchainError,
    evm, governance, loans, oracle,
    storage::Storage,
};

pub fn register_methods<S: Storage>(handler: &mut RpcHandler<S>) {
    trace!("registering query methods");
    handler.register_method("getInfo", get_info::<S>);

    handler.register_method("getToken", get_token::<S>);
    handler.register_method("listTokens", list_tokens::<S>);
    handler.register_method("getAccount", get_account::<S>);
    handler.register_method("listAccountHistory", list_account_history::<S>);

    handler.register_method("getPoolPair", get_pool_pair::<S>);
    handler.register_method("listPoolPairs", list_pool_pairs::<S>);
    handler.register_method("testPoolSwap", test_pool_swap::<S>);
    handler.register_method("getPendingRewards", get_pending_rewards::<S>);

    handler.register_method("getPrice", get_price::<S>);
    handler.register_method("getFixedIntervalPrice", get_fixed_interval_price::<S>);
    handler.register_method("listFixedIntervalPrices", list_fixed_interval_prices::<S>);
    handler.register_method("getOracleData", get_oracle_data::<S>);
    handler.register_method("listOracles", list_oracles::<S>);

    handler.register_method("getLoanScheme", get_loan_scheme::<S>);
    handler.register_method("listLoanSchemes", list_loan_schemes::<S>);
    handler.register_method("listCollateralTokens", list_collateral_tokens::<S>);
    handler.register_method("listLoanTokens", list_loan_tokens::<S>);
    handler.register_method("getVault", get_vault::<S>);
    handler.register_method("listVaults", list_vaults::<S>);
    handler.register_method("listVaultHistory", list_vault_history::<S>);
    handler.register_method("listAuctions", list_auctions::<S>);

    handler.register_method("getGov", get_gov::<S>);
    handler.register_method("listGovs", list_govs::<S>);
    handler.register_method("getGovProposal", get_gov_proposal::<S>);
    handler.register_method("listGovProposals", list_gov_proposals::<S>);
    handler.register_method("listGovProposalVotes", list_gov_proposal_votes::<S>);
    handler.register_method("getMasternode", get_masternode::<S>);
    handler.register_method("listMasternodes", list_masternodes::<S>);

    handler.register_method("vmmap", vmmap::<S>);
    handler.register_method("logvmmaps", log_vmmaps::<S>);
    handler.register_method("getTokenBalances", get_token_balances::<S>);
    handler.register_method("eth_chainId", eth_chain_id::<S>);
    handler.register_method("eth_blockNumber", eth_block_number::<S>);
    handler.register_method("eth_getBalance", eth_get_balance::<S>);
    handler.register_method("eth_getTransactionCount", eth_get_transaction_count::<S>);
    handler.register_method("eth_getTransactionReceipt", eth_get_transaction_receipt::<S>);
    handler.register_method("eth_gasPrice", eth_gas_price::<S>);
    handler.register_method("eth_maxPriorityFeePerGas", eth_max_priority_fee_per_gas::<S>);
    handler.register_method("eth_feeHistory", eth_fee_history::<S>);
}

fn resolve_token<S: Storage>(storage: &S, selector: &TokenSelector) -> Result<TokenId, BlockchainError> {
    match selector {
        TokenSelector::Id(id) => storage.get_token_or_err(*id).map(|_| *id),
        TokenSelector::Symbol(symbol) => storage
            .get_token_by_symbol(symbol)?
            .map(|(id, _)| id)
            .ok_or_else(|| BlockchainError::TokenSymbolNotFound(symbol.clone())),
    }
}

fn parse_pair(pair: &str) -> Result<CurrencyPair, BlockchainError> {
    match pair.split_once('/') {
        Some((token, currency)) => {
            let pair = CurrencyPair::new(token, currency);
            if !pair.is_valid() {
                return Err(BlockchainError::InvalidParameter(format!("Invalid currency pair '{}'", pair)));
            }
            Ok(pair)
        }
        None => Err(BlockchainError::InvalidParameter(format!(
            "Currency pair '{}' should be TOKEN/CURRENCY",
            pair
        ))),
    }
}

fn parse_path(path: &SwapPath) -> Result<PathSelector, BlockchainError> {
    Ok(match path {
        SwapPath::Pools(pools) => PathSelector::Explicit(pools.clone()),
        SwapPath::Named(name) => match name.as_str() {
            "direct" => PathSelector::Direct,
            "auto" => PathSelector::Auto,
            "composite" => PathSelector::Composite,
            other => {
                return Err(BlockchainError::InvalidParameter(format!(
                    "Path should be direct, auto, composite or a list of pool ids, got '{}'",
                    other
                )))
            }
        },
    })
}

fn parse_vmmap_kind(kind: &str) -> Result<VmMapKind, BlockchainError> {
    VmMapKind::from_str(kind).map_err(|_| BlockchainError::InvalidParameter(format!("Unknown vmmap type '{}'", kind)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenEntry<'a> {
    symbol_key: String,
    #[serde(flatten)]
    token: &'a Token,
    is_dat: bool,
    is_lps: bool,
    is_loan_token: bool,
    mintable: bool,
    tradeable: bool,
    finalized: bool,
}

impl<'a> TokenEntry<'a> {
    fn new(id: TokenId, token: &'a Token) -> Self {
        Self {
            symbol_key: token.display_symbol(id),
            token,
            is_dat: token.is_dat(),
            is_lps: token.is_pool_share(),
            is_loan_token: token.is_loan_token(),
            mintable: token.is_mintable(),
            tradeable: token.is_tradeable(),
            finalized: token.is_finalized(),
        }
    }
}

// Reward accumulators are internal and left out
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolEntry<'a> {
    symbol: String,
    id_token_a: TokenId,
    id_token_b: TokenId,
    reserve_a: Amount,
    reserve_b: Amount,
    total_liquidity: Amount,
    commission: Amount,
    status: bool,
    owner: &'a Script,
    creation_tx: &'a Hash,
    creation_height: u32,
    custom_rewards: &'a Balances,
    reward_escrow: &'a Balances,
}

impl<'a> PoolEntry<'a> {
    fn new(symbol: String, pool: &'a PoolPair) -> Self {
        Self {
            symbol,
            id_token_a: pool.token_a,
            id_token_b: pool.token_b,
            reserve_a: pool.reserve_a,
            reserve_b: pool.reserve_b,
            total_liquidity: pool.total_liquidity,
            commission: pool.commission,
            status: pool.status,
            owner: &pool.owner,
            creation_tx: &pool.creation_tx,
            creation_height: pool.creation_height,
            custom_rewards: &pool.custom_rewards,
            reward_escrow: &pool.reward_escrow,
        }
    }
}

fn pool_symbol<S: Storage>(storage: &S, pool_id: TokenId) -> Result<String, BlockchainError> {
    Ok(storage.get_token_or_err(pool_id)?.display_symbol(pool_id))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenPrice<'a> {
    token: &'a str,
    currency: &'a str,
    amount: Amount,
    timestamp: i64,
}

// Oracle prices are keyed by pair, which is not a valid JSON key
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OracleEntry<'a> {
    oracle_id: &'a OracleId,
    address: &'a Script,
    weightage: u8,
    price_feeds: Vec<&'a CurrencyPair>,
    token_prices: Vec<TokenPrice<'a>>,
}

impl<'a> OracleEntry<'a> {
    fn new(id: &'a OracleId, oracle: &'a Oracle) -> Self {
        Self {
            oracle_id: id,
            address: &oracle.owner,
            weightage: oracle.weightage,
            price_feeds: oracle.available_pairs.iter().collect(),
            token_prices: oracle
                .prices
                .iter()
                .map(|(pair, submission)| TokenPrice {
                    token: &pair.token,
                    currency: &pair.currency,
                    amount: submission.price,
                    timestamp: submission.timestamp,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VaultSummary<'a> {
    vault_id: &'a VaultId,
    owner_address: &'a Script,
    loan_scheme_id: &'a str,
    state: VaultState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuctionEntry<'a> {
    vault_id: &'a VaultId,
    owner_address: Script,
    liquidation_height: u32,
    end_height: u32,
    batch_count: u32,
    liquidation_penalty: Amount,
    batches: Vec<AuctionBatch>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MasternodeEntry<'a> {
    id: &'a MasternodeId,
    owner_auth_address: &'a Script,
    operator_auth_address: &'a Script,
    creation_height: u32,
    resign_height: Option<u32>,
    minted_blocks: u32,
    state: &'static str,
}

impl<'a> MasternodeEntry<'a> {
    fn new(id: &'a MasternodeId, masternode: &'a Masternode, height: u32) -> Self {
        Self {
            id,
            owner_auth_address: &masternode.owner,
            operator_auth_address: &masternode.operator,
            creation_height: masternode.creation_height,
            resign_height: masternode.resign_height,
            minted_blocks: masternode.minted_blocks,
            state: if masternode.is_active(height) {
                "ENABLED"
            } else {
                "RESIGNED"
            },
        }
    }
}

fn get_info<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    let storage = blockchain.storage();
    to_json(&GetInfoResult {
        height: storage.get_tip_height()?,
        median_time: storage.get_tip_time()?.unwrap_or(0),
        network: blockchain.params().network.to_string(),
        evm_block: evm::block_number(storage)?,
    })
}

fn get_token<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetTokenParams = parse_params(body)?;
    let storage = blockchain.storage();
    let id = resolve_token(storage, &params.token)?;
    let token = storage.get_token_or_err(id)?;
    let mut result = IndexMap::new();
    result.insert(id, TokenEntry::new(id, &token));
    to_json(&result)
}

fn list_tokens<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    let tokens = blockchain.storage().list_tokens()?;
    let result: IndexMap<TokenId, TokenEntry> = tokens.iter().map(|(id, token)| (*id, TokenEntry::new(*id, token))).collect();
    to_json(&result)
}

fn get_account<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetAccountParams = parse_params(body)?;
    to_json(&blockchain.storage().get_balances(&params.owner)?)
}

fn list_account_history<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: ListAccountHistoryParams = parse_optional_params(body)?;
    let storage = blockchain.storage();
    let tip = storage.get_tip_height()?.unwrap_or(0);
    let entries = match params.owner {
        Some(owner) => storage.list_history(&HistorySubject::Account(owner.into_owned()), &params.filter, tip)?,
        None => storage.list_all_account_history(&params.filter, tip)?,
    };
    to_json(&entries)
}

fn get_pool_pair<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetPoolPairParams = parse_params(body)?;
    let storage = blockchain.storage();
    let id = resolve_token(storage, &params.pool)?;
    let pool = storage.get_pool(id)?.ok_or(BlockchainError::PoolNotFound(id))?;
    let mut result = IndexMap::new();
    result.insert(id, PoolEntry::new(pool_symbol(storage, id)?, &pool));
    to_json(&result)
}

fn list_pool_pairs<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    let storage = blockchain.storage();
    let pools = storage.list_pools()?;
    let mut result = IndexMap::new();
    for (id, pool) in pools.iter() {
        result.insert(*id, PoolEntry::new(pool_symbol(storage, *id)?, pool));
    }
    to_json(&result)
}

fn test_pool_swap<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: TestPoolSwapParams = parse_params(body)?;
    let storage = blockchain.storage();
    let token_from = resolve_token(storage, &params.token_from)?;
    let token_to = resolve_token(storage, &params.token_to)?;
    let selector = parse_path(&params.path)?;
    let outcome = dex::test_swap(storage, token_from, params.amount_from, token_to, &selector)?;
    to_json(&outcome)
}

fn get_pending_rewards<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetPendingRewardsParams = parse_params(body)?;
    to_json(&dex::pending_rewards(blockchain.storage(), params.pool_id, &params.owner)?)
}

// Aggregated oracle price at the tip time
fn get_price<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetPriceParams = parse_params(body)?;
    let pair = parse_pair(&params.pair)?;
    let ctx = blockchain.tip_context()?;
    to_json(&oracle::aggregate_price(blockchain.storage(), &pair, ctx.time)?)
}

fn get_fixed_interval_price<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetPriceParams = parse_params(body)?;
    let pair = parse_pair(&params.pair)?;
    let price = blockchain
        .storage()
        .get_fixed_interval_price(&pair)?
        .ok_or(BlockchainError::PriceNotFound(pair))?;
    to_json(&price)
}

fn list_fixed_interval_prices<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    to_json(&blockchain.storage().list_fixed_interval_prices()?)
}

fn get_oracle_data<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetOracleDataParams = parse_params(body)?;
    let oracle = blockchain.storage().get_oracle_or_err(&params.oracle_id)?;
    to_json(&OracleEntry::new(&params.oracle_id, &oracle))
}

fn list_oracles<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    let oracles = blockchain.storage().list_oracles()?;
    let ids: Vec<&OracleId> = oracles.iter().map(|(id, _)| id).collect();
    to_json(&ids)
}

fn get_loan_scheme<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetLoanSchemeParams = parse_params(body)?;
    to_json(&blockchain.storage().get_loan_scheme_or_err(&params.id)?)
}

fn list_loan_schemes<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    to_json(&blockchain.storage().list_loan_schemes()?)
}

fn list_collateral_tokens<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    to_json(&blockchain.storage().list_collateral_tokens()?)
}

fn list_loan_tokens<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    to_json(&blockchain.storage().list_loan_tokens()?)
}

fn get_vault<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetVaultParams = parse_params(body)?;
    let ctx = blockchain.tip_context()?;
    to_json(&loans::get_vault_info(blockchain.storage(), &ctx, &params.vault_id)?)
}

fn list_vaults<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: ListVaultsParams = parse_optional_params(body)?;
    let storage = blockchain.storage();
    let ctx = blockchain.tip_context()?;
    let vaults = storage.list_vaults()?;

    let mut result = Vec::new();
    for (id, vault) in vaults.iter() {
        if params.owner.as_deref().is_some_and(|owner| *owner != vault.owner) {
            continue;
        }
        result.push(VaultSummary {
            vault_id: id,
            owner_address: &vault.owner,
            loan_scheme_id: &vault.scheme_id,
            state: loans::vault_state(storage, &ctx, id)?,
        });
    }
    to_json(&result)
}

fn list_vault_history<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: ListVaultHistoryParams = parse_params(body)?;
    let storage = blockchain.storage();
    let tip = storage.get_tip_height()?.unwrap_or(0);
    let entries = storage.list_history(&HistorySubject::Vault(params.vault_id.into_owned()), &params.filter, tip)?;
    to_json(&entries)
}

fn list_auctions<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    let storage = blockchain.storage();
    let auctions = storage.list_auctions()?;

    let mut result = Vec::with_capacity(auctions.len());
    for (vault_id, auction) in auctions.iter() {
        result.push(AuctionEntry {
            vault_id,
            owner_address: storage.get_vault_or_err(vault_id)?.owner,
            liquidation_height: auction.liquidation_height,
            end_height: auction.end_height,
            batch_count: auction.batch_count,
            liquidation_penalty: auction.liquidation_penalty,
            batches: storage.list_auction_batches(vault_id)?,
        });
    }
    to_json(&result)
}

fn attributes_map<S: Storage>(storage: &S) -> Result<IndexMap<String, String>, BlockchainError> {
    Ok(storage
        .list_attributes()?
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect())
}

fn get_gov<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetGovParams = parse_params(body)?;
    let storage = blockchain.storage();
    let mut result = IndexMap::new();
    if params.name == "ATTRIBUTES" {
        result.insert(params.name, attributes_map(storage)?);
        return to_json(&result);
    }

    let key = AttributeKey::from_str(&params.name).map_err(BlockchainError::from)?;
    let mut value = IndexMap::new();
    if let Some(current) = storage.get_attribute(&key)? {
        value.insert(key.to_string(), current.to_string());
    }
    result.insert(params.name, value);
    to_json(&result)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GovList {
    attributes: IndexMap<String, String>,
    // Activation height to the attributes it sets
    pending: IndexMap<u32, IndexMap<String, String>>,
}

fn list_govs<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    let storage = blockchain.storage();
    let mut pending: IndexMap<u32, IndexMap<String, String>> = IndexMap::new();
    for (height, key, value) in storage.list_scheduled_attributes()? {
        pending.entry(height).or_default().insert(key.to_string(), value.to_string());
    }
    to_json(&GovList {
        attributes: attributes_map(storage)?,
        pending,
    })
}

fn get_gov_proposal<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetGovProposalParams = parse_params(body)?;
    let ctx = blockchain.tip_context()?;
    to_json(&governance::get_proposal_info(blockchain.storage(), &ctx, &params.proposal_id)?)
}

fn list_gov_proposals<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: ListGovProposalsParams = parse_optional_params(body)?;
    let storage = blockchain.storage();
    let ctx = blockchain.tip_context()?;

    let mut result = Vec::new();
    for (id, proposal) in storage.list_proposals()? {
        if params.status.is_some_and(|status| status != proposal.status) {
            continue;
        }
        result.push(governance::get_proposal_info(storage, &ctx, &id)?);
    }
    to_json(&result)
}

fn list_gov_proposal_votes<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: ListGovProposalVotesParams = parse_params(body)?;
    let storage = blockchain.storage();
    let proposal = storage.get_proposal_or_err(&params.proposal_id)?;
    let cycle = params.cycle.unwrap_or(proposal.current_cycle);

    let votes: Vec<GovProposalVote> = storage
        .get_votes(&params.proposal_id, cycle)?
        .into_iter()
        .map(|(masternode_id, vote)| GovProposalVote {
            masternode_id,
            cycle,
            vote,
        })
        .collect();
    to_json(&votes)
}

fn get_masternode<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: GetMasternodeParams = parse_params(body)?;
    let storage = blockchain.storage();
    let masternode = storage.get_masternode_or_err(&params.id)?;
    let height = storage.get_tip_height()?.unwrap_or(0);
    to_json(&MasternodeEntry::new(&params.id, &masternode, height))
}

fn list_masternodes<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    let storage = blockchain.storage();
    let height = storage.get_tip_height()?.unwrap_or(0);
    let masternodes = storage.list_masternodes()?;
    let result: Vec<MasternodeEntry> = masternodes
        .iter()
        .map(|(id, masternode)| MasternodeEntry::new(id, masternode, height))
        .collect();
    to_json(&result)
}

fn vmmap<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: VmMapParams = parse_params(body)?;
    let kind = parse_vmmap_kind(&params.kind)?;
    let output = evm::vmmap(blockchain.storage(), kind, &params.input)?;
    to_json(&IndexMap::from([("input", params.input), ("type", kind.to_string()), ("output", output)]))
}

fn log_vmmaps<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: LogVmMapsParams = parse_params(body)?;
    let kind = parse_vmmap_kind(&params.kind)?;
    to_json(&evm::log_vmmaps(blockchain.storage(), kind)?)
}

fn get_token_balances<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: EthAddressParams = parse_params(body)?;
    to_json(&evm::get_token_balances(blockchain.storage(), &params.address)?)
}

fn eth_chain_id<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    to_json(&format!("{:#x}", blockchain.params().evm.chain_id))
}

fn eth_block_number<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    let number = evm::block_number(blockchain.storage())?.unwrap_or(0);
    to_json(&format!("{:#x}", number))
}

fn eth_get_balance<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: EthAddressParams = parse_params(body)?;
    to_json(&evm::get_balance(blockchain.storage(), &params.address)?)
}

fn eth_get_transaction_count<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: EthAddressParams = parse_params(body)?;
    let count = evm::get_transaction_count(blockchain.storage(), &params.address)?;
    to_json(&format!("{:#x}", count))
}

fn eth_get_transaction_receipt<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: EthReceiptParams = parse_params(body)?;
    to_json(&evm::get_receipt(blockchain.storage(), &params.hash)?)
}

// Base fee of the next block plus the suggested tip
fn eth_gas_price<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    let storage = blockchain.storage();
    let base_fee = evm::current_base_fee(storage, blockchain.params())?;
    to_json(&base_fee.saturating_add(evm::suggest_priority_fee(storage)?))
}

fn eth_max_priority_fee_per_gas<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    require_no_params(body)?;
    to_json(&evm::suggest_priority_fee(blockchain.storage())?)
}

fn eth_fee_history<S: Storage>(blockchain: &Blockchain<S>, body: Value) -> Result<Value, RpcError> {
    let params: EthFeeHistoryParams = parse_params(body)?;
    let history = evm::fee_history(
        blockchain.storage(),
        blockchain.params(),
        params.block_count,
        params.newest_block,
        &params.reward_percentiles,
    )?;
    to_json(&history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ChainParams,
        core::{
            blockchain::BlockInput,
            storage::{ChainStore, MemoryBackend},
        },
    };
    use serde_json::json;
    use tessera_common::{
        amount::{COIN, NATIVE_TOKEN},
        transaction::{CustomTransaction, CustomTxMessage, UtxosToAccountMessage},
    };
    use std::collections::BTreeMap;

    fn setup() -> (Blockchain<ChainStore<MemoryBackend>>, RpcHandler<ChainStore<MemoryBackend>>, Script) {
        let mut chain = Blockchain::new(ChainStore::in_memory(), ChainParams::regtest()).unwrap();
        let alice = Script::p2pkh([1; 20]);
        let message = CustomTxMessage::UtxosToAccount(UtxosToAccountMessage {
            to: BTreeMap::from([(alice.clone(), Balances::from_single(NATIVE_TOKEN, 5 * COIN))]),
        });
        let tx = CustomTransaction::new(Hash::new([1; 32]), &message, vec![]).with_burnt_value(5 * COIN);
        chain.apply_block(&BlockInput::new(1, 100).with_txs(vec![tx])).unwrap();
        (chain, RpcHandler::new(), alice)
    }

    #[test]
    fn test_token_and_account_queries() {
        let (chain, handler, alice) = setup();

        let tokens = handler.call(&chain, "listTokens", Value::Null).unwrap();
        assert_eq!(tokens["0"]["symbolKey"], "DFI");
        assert_eq!(tokens["0"]["isDat"], true);

        let token = handler.call(&chain, "getToken", json!({ "token": "DFI" })).unwrap();
        assert_eq!(token["0"]["minted"], 5 * COIN);

        let account = handler
            .call(&chain, "getAccount", json!({ "owner": alice.to_string() }))
            .unwrap();
        assert_eq!(account["0"], 5 * COIN);

        let history = handler
            .call(&chain, "listAccountHistory", json!({ "owner": alice.to_string(), "limit": 10 }))
            .unwrap();
        assert_eq!(history.as_array().map(|entries| entries.len()), Some(1));
    }

    #[test]
    fn test_errors_carry_kind_prefix() {
        let (chain, handler, _) = setup();

        let err = handler.call(&chain, "getToken", json!({ "token": "NOPE" })).unwrap_err();
        assert_eq!(err.get_code(), -5);
        assert!(err.to_string().starts_with("not-found"));

        let err = handler.call(&chain, "getGov", json!({ "name": "v0/bogus/path" })).unwrap_err();
        assert!(err.to_string().starts_with("invalid-parameter"));

        let err = handler.call(&chain, "getToken", Value::Null).unwrap_err();
        assert_eq!(err.get_code(), -32602);

        let response = handler.handle_request(&chain, json!({ "jsonrpc": "2.0", "id": 7, "method": "nope" }));
        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], -32601);
    }

    #[test]
    fn test_info_and_evm_reads() {
        let (chain, handler, _) = setup();
        let response = handler.handle_request(&chain, json!({ "jsonrpc": "2.0", "id": 1, "method": "getInfo" }));
        assert_eq!(response["result"]["height"], 1);
        assert_eq!(response["result"]["medianTime"], 100);
        assert_eq!(response["result"]["network"], "regtest");

        assert_eq!(handler.call(&chain, "eth_blockNumber", Value::Null).unwrap(), "0x0");
        let balance = handler
            .call(&chain, "eth_getBalance", json!({ "address": "0x0000000000000000000000000000000000000001" }))
            .unwrap();
        assert_eq!(balance, "0x0");

        let err = handler
            .call(&chain, "vmmap", json!({ "input": "0", "type": "nonsense" }))
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid-parameter"));
    }
}
