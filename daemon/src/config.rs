use std::{fs, path::Path};

use anyhow::Context;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tessera_common::{
    amount::{Amount, COIN},
    config::*,
    evm::{DEFAULT_BLOCK_GAS_LIMIT, INITIAL_BASE_FEE},
    script::Script,
};

use crate::core::{
    error::BlockchainError,
    hard_fork::{ForkSchedule, HardFork},
};

// Default cache size for token records
pub const DEFAULT_CACHE_SIZE: usize = 1024;

// Blocks a masternode may go without minting before it loses its vote
pub const DEFAULT_ACTIVATION_WINDOW: u32 = GOV_ACTIVATION_WINDOW;

// Highest number of entries a history query may return
pub const MAX_HISTORY_LIMIT: usize = 10_000;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
    Regtest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovParams {
    pub voting_period: u32,
    pub emergency_period: u32,
    pub quorum: Amount,
    pub emergency_quorum: Amount,
    pub cfp_approval_threshold: Amount,
    pub voc_approval_threshold: Amount,
    pub emergency_approval_threshold: Amount,
    pub cfp_fee: Amount,
    pub cfp_min_fee: Amount,
    pub voc_fee: Amount,
    pub emergency_fee: Amount,
    pub fee_burn_pct: Amount,
    pub cfp_max_cycles: u8,
    pub activation_window: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmParams {
    pub chain_id: u64,
    pub block_gas_limit: u64,
    // In wei
    pub initial_base_fee: u64,
}

/// Consensus parameters of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainParams {
    pub network: Network,
    pub forks: ForkSchedule,
    pub fixed_interval_blocks: u32,
    pub price_deviation_threshold: Amount,
    pub blocks_per_day: u32,
    pub auction_duration: u32,
    pub liquidation_penalty: Amount,
    pub max_loan_per_batch: Amount,
    pub vault_creation_fee: Amount,
    // Native coin distributed to pools each block, split by `v0/params/lp_splits`
    pub lp_block_reward: Amount,
    pub gov: GovParams,
    pub foundation_members: Vec<Script>,
    pub community_fund: Script,
    pub burn_address: Script,
    pub evm: EvmParams,
}

const MAINNET_HARD_FORKS: [(HardFork, u32); 10] = [
    (HardFork::Bayfront, 405_000),
    (HardFork::Eunos, 894_000),
    (HardFork::FortCanning, 1_367_000),
    (HardFork::FortCanningHill, 1_604_999),
    (HardFork::FortCanningRoad, 1_786_000),
    (HardFork::FortCanningCrunch, 1_936_000),
    (HardFork::FortCanningEpilogue, 2_257_500),
    (HardFork::GrandCentral, 2_479_000),
    (HardFork::Metachain, 3_462_000),
    (HardFork::NextNetworkUpgrade, 4_000_000),
];

const TESTNET_HARD_FORKS: [(HardFork, u32); 10] = [
    (HardFork::Bayfront, 3_000),
    (HardFork::Eunos, 354_950),
    (HardFork::FortCanning, 686_200),
    (HardFork::FortCanningHill, 906_200),
    (HardFork::FortCanningRoad, 893_700),
    (HardFork::FortCanningCrunch, 1_011_600),
    (HardFork::FortCanningEpilogue, 1_244_000),
    (HardFork::GrandCentral, 1_366_000),
    (HardFork::Metachain, 1_500_000),
    (HardFork::NextNetworkUpgrade, 1_600_000),
];

// Well known burn script, an unspendable P2PKH
const BURN_KEY_HASH: [u8; 20] = [0x0f; 20];

const COMMUNITY_FUND_KEY_HASH: [u8; 20] = [0xcf; 20];

const REGTEST_FOUNDATION_KEY_HASH: [u8; 20] = [0x42; 20];

lazy_static! {
    static ref DEFAULT_GOV_PARAMS: GovParams = GovParams {
        voting_period: GOV_VOTING_PERIOD,
        emergency_period: GOV_EMERGENCY_PERIOD,
        quorum: GOV_QUORUM,
        emergency_quorum: GOV_EMERGENCY_QUORUM,
        cfp_approval_threshold: GOV_CFP_APPROVAL,
        voc_approval_threshold: GOV_VOC_APPROVAL,
        emergency_approval_threshold: GOV_EMERGENCY_APPROVAL,
        cfp_fee: GOV_CFP_FEE_PCT,
        cfp_min_fee: GOV_MIN_CFP_FEE,
        voc_fee: GOV_VOC_FEE,
        emergency_fee: GOV_EMERGENCY_FEE,
        fee_burn_pct: GOV_FEE_BURN_PCT,
        cfp_max_cycles: GOV_CFP_MAX_CYCLES,
        activation_window: DEFAULT_ACTIVATION_WINDOW,
    };

    static ref MAINNET_PARAMS: ChainParams = ChainParams::base(
        Network::Mainnet,
        ForkSchedule::from_heights(&MAINNET_HARD_FORKS),
        1130,
    );

    static ref TESTNET_PARAMS: ChainParams = ChainParams::base(
        Network::Testnet,
        ForkSchedule::from_heights(&TESTNET_HARD_FORKS),
        1131,
    );

    static ref DEVNET_PARAMS: ChainParams = {
        let mut params = ChainParams::base(Network::Devnet, ForkSchedule::all_at(0), 1132);
        params.fixed_interval_blocks = 60;
        params
    };

    // Every fork active from genesis, short intervals for functional testing
    static ref REGTEST_PARAMS: ChainParams = {
        let mut params = ChainParams::base(Network::Regtest, ForkSchedule::all_at(0), 1133);
        params.fixed_interval_blocks = 6;
        params.gov.voting_period = 70;
        params.gov.emergency_period = 50;
        params.gov.activation_window = 10;
        params.lp_block_reward = 0;
        params.foundation_members = vec![Script::p2pkh(REGTEST_FOUNDATION_KEY_HASH)];
        params
    };
}

impl ChainParams {
    fn base(network: Network, forks: ForkSchedule, chain_id: u64) -> Self {
        Self {
            network,
            forks,
            fixed_interval_blocks: FIXED_INTERVAL_PRICE_BLOCKS,
            price_deviation_threshold: PRICE_DEVIATION_THRESHOLD,
            blocks_per_day: BLOCKS_PER_DAY,
            auction_duration: AUCTION_DURATION_BLOCKS,
            liquidation_penalty: DEFAULT_LIQUIDATION_PENALTY,
            max_loan_per_batch: MAX_LOAN_PER_BATCH,
            vault_creation_fee: VAULT_CREATION_FEE,
            lp_block_reward: 25 * COIN,
            gov: DEFAULT_GOV_PARAMS.clone(),
            foundation_members: Vec::new(),
            community_fund: Script::p2sh(COMMUNITY_FUND_KEY_HASH),
            burn_address: Script::p2pkh(BURN_KEY_HASH),
            evm: EvmParams {
                chain_id,
                block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
                initial_base_fee: INITIAL_BASE_FEE,
            },
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => MAINNET_PARAMS.clone(),
            Network::Testnet => TESTNET_PARAMS.clone(),
            Network::Devnet => DEVNET_PARAMS.clone(),
            Network::Regtest => REGTEST_PARAMS.clone(),
        }
    }

    pub fn regtest() -> Self {
        Self::for_network(Network::Regtest)
    }

    pub fn with_fork(mut self, fork: HardFork, height: u32) -> Self {
        self.forks.set(fork, height);
        self
    }

    pub fn without_fork(mut self, fork: HardFork) -> Self {
        self.forks.remove(fork);
        self
    }

    pub fn is_fork_active(&self, fork: HardFork, height: u32) -> bool {
        self.forks.is_active(fork, height)
    }

    pub fn blocks_per_year(&self) -> u32 {
        self.blocks_per_day * 365
    }

    pub fn is_foundation_member(&self, script: &Script) -> bool {
        self.foundation_members.iter().any(|m| m == script)
    }

    pub fn from_json(json: &str) -> Result<Self, BlockchainError> {
        let params = serde_json::from_str(json).context("Error while parsing chain params")?;
        Ok(params)
    }

    pub fn load(path: &Path) -> Result<Self, BlockchainError> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Error while reading chain params from {}", path.display()))?;
        Self::from_json(&content)
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::for_network(Network::Mainnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let mainnet = ChainParams::for_network(Network::Mainnet);
        assert!(!mainnet.is_fork_active(HardFork::Bayfront, 404_999));
        assert!(mainnet.is_fork_active(HardFork::Bayfront, 405_000));
        assert_eq!(mainnet.blocks_per_year(), 2880 * 365);

        let regtest = ChainParams::regtest();
        assert!(regtest.is_fork_active(HardFork::Metachain, 0));
        assert_eq!(regtest.fixed_interval_blocks, 6);
        assert_eq!(regtest.foundation_members.len(), 1);
    }

    #[test]
    fn test_json_round_trip() {
        let params = ChainParams::regtest().with_fork(HardFork::FortCanningHill, 150);
        let json = serde_json::to_string_pretty(&params).unwrap();
        let back = ChainParams::from_json(&json).unwrap();
        assert_eq!(back, params);
        assert!(!back.is_fork_active(HardFork::FortCanningHill, 149));
    }

    #[test]
    fn test_invalid_json() {
        assert!(ChainParams::from_json("{\"network\": 1}").is_err());
    }
}
