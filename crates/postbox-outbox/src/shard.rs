//! Write-time shard assignment.
//!
//! Spreading writes over several shard values keeps the `(topic, created_at)`
//! index from turning into a single hot partition. Reads pay for it by
//! fanning out one query per shard.

use crate::{OutboxError, OutboxResult};
use postbox_config_and_utils::MAX_SHARDS;
use rand::Rng;

/// Picks a shard for each new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardAssigner {
    num_shards: u32,
}

impl ShardAssigner {
    /// Fails with a configuration error when `num_shards` exceeds [`MAX_SHARDS`].
    /// 0 and 1 both mean a single shard.
    pub fn new(num_shards: u32) -> OutboxResult<Self> {
        if num_shards > MAX_SHARDS {
            return Err(OutboxError::Configuration(format!(
                "num_shards must be at most {}, got {}",
                MAX_SHARDS, num_shards
            )));
        }
        Ok(Self {
            num_shards: num_shards.max(1),
        })
    }

    /// Number of distinct shard values.
    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// A uniformly random shard in `[0, num_shards)`.
    pub fn assign(&self) -> u32 {
        if self.num_shards <= 1 {
            return 0;
        }
        rand::thread_rng().gen_range(0..self.num_shards)
    }

    /// Every shard value, for read fan-out.
    pub fn shards(&self) -> impl Iterator<Item = u32> {
        0..self.num_shards
    }
}
