//! Create/delete churn over a single tenant.
//!
//! Every round deletes a random share of the live items and registers the same number
//! of new ones, so freed slots are reused, drained chunks are parked and relinked, and
//! iteration runs over a fragmented chain.

use std::sync::Arc;

use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use rusty_pool::{
    Error,
    error::PoolError,
    pool::{ChunkedPool, IdSchema, Tenant},
};

use crate::items::BenchItem;

/// Configuration for the churn workload.
pub struct ChurnConfig {
    /// Items kept live between rounds.
    pub live_items: usize,
    /// Share of live items replaced per round.
    pub churn_rate: f64,
    /// Chunk bit width of the pool.
    pub chunk_bit: u32,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            live_items: 100_000,
            churn_rate: 0.1,
            chunk_bit: 10,
            seed: 12345,
        }
    }
}

pub struct Churn {
    tenant: Arc<Tenant<BenchItem>>,
    live: Vec<u32>,
    churn_rate: f64,
    rng: ChaCha8Rng,
    next_value: u64,
}

impl Churn {
    pub fn new(config: ChurnConfig) -> Result<Self, Error> {
        let pool = ChunkedPool::new(IdSchema::new(config.chunk_bit)?);
        let tenant = pool.new_tenant()?;
        let mut churn = Self {
            tenant,
            live: Vec::with_capacity(config.live_items),
            churn_rate: config.churn_rate,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            next_value: 0,
        };
        for _ in 0..config.live_items {
            churn.create()?;
        }
        Ok(churn)
    }

    pub fn tenant(&self) -> &Tenant<BenchItem> {
        &self.tenant
    }

    fn create(&mut self) -> Result<(), PoolError> {
        let id = self
            .tenant
            .register(Arc::new(BenchItem::new(self.next_value)), None)?;
        self.next_value += 1;
        self.live.push(id);
        Ok(())
    }

    /// Replace a random share of the live items.
    pub fn round(&mut self) -> Result<(), PoolError> {
        let count = (self.live.len() as f64 * self.churn_rate) as usize;
        self.live.shuffle(&mut self.rng);
        for id in self.live.drain(..count) {
            self.tenant.free_id(id)?;
        }
        for _ in 0..count {
            self.create()?;
        }
        Ok(())
    }

    /// Delete a random run of items, leaving holes that `round` will refill.
    pub fn punch_holes(&mut self, max: usize) -> Result<usize, PoolError> {
        let count = self.rng.gen_range(0..=max.min(self.live.len()));
        for _ in 0..count {
            let index = self.rng.gen_range(0..self.live.len());
            let id = self.live.swap_remove(index);
            self.tenant.free_id(id)?;
        }
        for _ in 0..count {
            self.create()?;
        }
        Ok(count)
    }

    /// Sum every live item's value.
    pub fn iterate(&self) -> u64 {
        self.tenant.iter().map(|item| **item).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ChurnConfig {
        ChurnConfig {
            live_items: 1_000,
            churn_rate: 0.25,
            chunk_bit: 4,
            seed: 7,
        }
    }

    #[test]
    fn rounds_keep_live_count() {
        // Given
        let mut churn = Churn::new(small()).unwrap();

        // When
        for _ in 0..10 {
            churn.round().unwrap();
        }
        churn.punch_holes(50).unwrap();

        // Then
        assert_eq!(churn.tenant().len(), 1_000);
        assert_eq!(churn.tenant().iter().count(), 1_000);
    }

    #[test]
    fn rounds_reuse_chunks() {
        // Given
        let mut churn = Churn::new(small()).unwrap();
        let chunks = churn.tenant().chunk_count();

        // When
        for _ in 0..10 {
            churn.round().unwrap();
        }

        // Then - freed slots are taken before the chain grows
        assert_eq!(churn.tenant().chunk_count(), chunks);
    }
}
