use log::trace;
use tessera_common::{
    amount::TokenId,
    dex::{PoolPair, RewardCheckpoint},
    script::Script,
};

use crate::core::{
    error::BlockchainError,
    storage::{build_pair_key, build_reward_checkpoint_key, ChainStore, Column, StorageBackend},
};

/// Pool pairs are keyed by the id of their share token.
pub trait PoolProvider {
    fn get_pool(&self, pool_id: TokenId) -> Result<Option<PoolPair>, BlockchainError>;

    fn set_pool(&mut self, pool_id: TokenId, pool: &PoolPair) -> Result<(), BlockchainError>;

    // Order of the tokens does not matter
    fn get_pool_by_pair(&self, token_a: TokenId, token_b: TokenId) -> Result<Option<(TokenId, PoolPair)>, BlockchainError>;

    fn list_pools(&self) -> Result<Vec<(TokenId, PoolPair)>, BlockchainError>;

    fn get_reward_checkpoint(&self, pool_id: TokenId, owner: &Script) -> Result<RewardCheckpoint, BlockchainError>;

    fn set_reward_checkpoint(
        &mut self,
        pool_id: TokenId,
        owner: &Script,
        checkpoint: &RewardCheckpoint,
    ) -> Result<(), BlockchainError>;

    fn get_pool_or_err(&self, pool_id: TokenId) -> Result<PoolPair, BlockchainError> {
        self.get_pool(pool_id)?.ok_or(BlockchainError::PoolNotFound(pool_id))
    }
}

impl<B: StorageBackend> PoolProvider for ChainStore<B> {
    fn get_pool(&self, pool_id: TokenId) -> Result<Option<PoolPair>, BlockchainError> {
        self.load_optional_from_disk(Column::PoolPairs, &pool_id.to_be_bytes())
    }

    fn set_pool(&mut self, pool_id: TokenId, pool: &PoolPair) -> Result<(), BlockchainError> {
        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "set pool {} reserves {}/{} liquidity {}",
                pool_id,
                pool.reserve_a,
                pool.reserve_b,
                pool.total_liquidity
            );
        }

        let pair_key = build_pair_key(pool.token_a, pool.token_b);
        if !self.contains_data(Column::PoolByPair, &pair_key)? {
            self.insert_into_disk(Column::PoolByPair, pair_key, &pool_id)?;
        }
        self.insert_into_disk(Column::PoolPairs, pool_id.to_be_bytes(), pool)
    }

    fn get_pool_by_pair(&self, token_a: TokenId, token_b: TokenId) -> Result<Option<(TokenId, PoolPair)>, BlockchainError> {
        let pair_key = build_pair_key(token_a, token_b);
        let Some(pool_id) = self.load_optional_from_disk::<_, TokenId>(Column::PoolByPair, &pair_key)? else {
            return Ok(None);
        };
        Ok(self.get_pool(pool_id)?.map(|pool| (pool_id, pool)))
    }

    fn list_pools(&self) -> Result<Vec<(TokenId, PoolPair)>, BlockchainError> {
        self.scan_prefix::<PoolPair>(Column::PoolPairs, &[])?
            .into_iter()
            .map(|(key, pool)| {
                let raw: [u8; 4] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| BlockchainError::InvalidState("Corrupted pool key".to_owned()))?;
                Ok((TokenId::from_be_bytes(raw), pool))
            })
            .collect()
    }

    fn get_reward_checkpoint(&self, pool_id: TokenId, owner: &Script) -> Result<RewardCheckpoint, BlockchainError> {
        let key = build_reward_checkpoint_key(pool_id, owner);
        Ok(self
            .load_optional_from_disk(Column::PoolRewardCheckpoints, &key)?
            .unwrap_or_default())
    }

    fn set_reward_checkpoint(
        &mut self,
        pool_id: TokenId,
        owner: &Script,
        checkpoint: &RewardCheckpoint,
    ) -> Result<(), BlockchainError> {
        let key = build_reward_checkpoint_key(pool_id, owner);
        if checkpoint.0.is_empty() {
            self.remove_from_disk(Column::PoolRewardCheckpoints, key)
        } else {
            self.insert_into_disk(Column::PoolRewardCheckpoints, key, checkpoint)
        }
    }
}
