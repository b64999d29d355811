use tessera_common::script::Script;

use crate::config::ChainParams;

use super::hard_fork::HardFork;

/// Position of the engine inside the block being applied.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext<'a> {
    pub params: &'a ChainParams,
    pub height: u32,
    // Median time of the block, in seconds
    pub time: i64,
}

impl<'a> BlockContext<'a> {
    pub fn new(params: &'a ChainParams, height: u32, time: i64) -> Self {
        Self { params, height, time }
    }

    pub fn is_active(&self, fork: HardFork) -> bool {
        self.params.is_fork_active(fork, self.height)
    }

    pub fn burn_address(&self) -> &Script {
        &self.params.burn_address
    }
}

/// Transaction currently interpreted, used for history and ids.
#[derive(Debug, Clone, Copy)]
pub struct TxContext<'a> {
    pub block: BlockContext<'a>,
    pub index: u32,
    pub hash: &'a tessera_common::crypto::Hash,
}
