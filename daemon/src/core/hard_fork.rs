use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Named consensus milestones, in activation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum HardFork {
    // Pools and swaps
    Bayfront,
    // Oracles and fixed interval prices
    Eunos,
    // Loans, vaults and auctions
    FortCanning,
    // High precision interest, minimum native collateral rule
    FortCanningHill,
    // DUSD counts as native collateral, token level dex fees
    FortCanningRoad,
    // Token locks and splits
    FortCanningCrunch,
    // DUSD loans require native coin collateral
    FortCanningEpilogue,
    // On-chain governance
    GrandCentral,
    // EVM side ledger and transfer domain
    Metachain,
    // Neutral votes no longer count toward approval
    NextNetworkUpgrade,
}

/// Activation height of every fork, as handed over by the block processor.
///
/// A fork missing from the schedule never activates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkSchedule(BTreeMap<HardFork, u32>);

impl ForkSchedule {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    // Every fork active from the given height
    pub fn all_at(height: u32) -> Self {
        Self(HardFork::iter().map(|fork| (fork, height)).collect())
    }

    pub fn from_heights(heights: &[(HardFork, u32)]) -> Self {
        Self(heights.iter().copied().collect())
    }

    pub fn set(&mut self, fork: HardFork, height: u32) {
        self.0.insert(fork, height);
    }

    pub fn remove(&mut self, fork: HardFork) {
        self.0.remove(&fork);
    }

    pub fn height_of(&self, fork: HardFork) -> Option<u32> {
        self.0.get(&fork).copied()
    }

    pub fn is_active(&self, fork: HardFork, height: u32) -> bool {
        self.0.get(&fork).map_or(false, |h| height >= *h)
    }

    pub fn iter(&self) -> impl Iterator<Item = (HardFork, u32)> + '_ {
        self.0.iter().map(|(fork, height)| (*fork, *height))
    }
}

// Get the latest hard fork active at a given height
pub fn get_hard_fork_at_height(schedule: &ForkSchedule, height: u32) -> Option<HardFork> {
    let mut hardfork = None;
    for fork in HardFork::iter() {
        if schedule.is_active(fork, height) {
            hardfork = Some(fork);
        }
    }

    hardfork
}

// Returns true if the given fork activates exactly at this height
pub fn has_hard_fork_at_height(schedule: &ForkSchedule, fork: HardFork, height: u32) -> bool {
    schedule.height_of(fork) == Some(height)
}
