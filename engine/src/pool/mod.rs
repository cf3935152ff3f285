//! Chunked object pool.
//!
//! A [`ChunkedPool`] hands out [`Tenant`]s, one per archetype. Every tenant owns a chain
//! of fixed-size [`LinkedChunk`]s and allocates 32-bit identifiers whose layout is
//! described by the pool's [`IdSchema`]. Payloads are shared with the pool through an
//! `Arc` and must implement [`Item`] so the pool can record where they live.
//!
//! # Architecture
//!
//! - [`IdSchema`]: splits an identifier into a chunk index (high bits) and an offset
//!   within the chunk (low `chunk_bit` bits). Bit 31 tags detached identifiers.
//! - [`LinkedChunk`]: a fixed block of slots with a bump pointer, a LIFO free stack and
//!   links to its neighbours.
//! - [`Tenant`]: the chain of one archetype. Allocation takes a freed slot first, then
//!   the next unused slot of the last chunk, and only then grows the chain.
//! - [`ChunkedPool`]: the registry of tenants.
//!
//! # Performance Considerations
//!
//! - Allocation and free lock only the chunk that owns the slot. The chain lock is
//!   taken when the chain grows or a drained chunk is parked.
//! - Chunks that reopen a free stack are queued on a lock-free `SegQueue`, so reuse
//!   never scans the chain.
//! - Drained chunks are parked and linked again on the next growth instead of being
//!   released, so churn does not reallocate slot arrays.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rusty_pool::pool::{ChunkedPool, IdSchema, Item, Pooled};
//!
//! let pool = ChunkedPool::new(IdSchema::new(4).unwrap());
//! let tenant = pool.new_tenant().unwrap();
//!
//! let item = Arc::new(Pooled::new("player"));
//! let id = tenant.register(Arc::clone(&item), None).unwrap();
//! assert_eq!(item.id(), id);
//!
//! tenant.free_id(id).unwrap();
//! assert!(tenant.is_empty());
//! ```

mod chunk;
mod item;
mod schema;
mod tenant;

pub use chunk::{ChunkIter, LinkedChunk};
pub use item::{ChunkRef, Item, ItemHeader, Pooled};
pub use schema::IdSchema;
pub use tenant::{Iter, Positions, Tenant};

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use dashmap::DashMap;
use log::debug;

use crate::error::PoolError;

/// A set of tenants sharing one identifier layout.
#[derive(Debug)]
pub struct ChunkedPool<T> {
    schema: IdSchema,
    tenants: DashMap<u32, Arc<Tenant<T>>>,
    next_tenant: AtomicU32,
    closed: AtomicBool,
}

impl<T: Item> ChunkedPool<T> {
    /// Construct an empty pool.
    pub fn new(schema: IdSchema) -> Self {
        Self {
            schema,
            tenants: DashMap::new(),
            next_tenant: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// The identifier layout of every tenant in this pool.
    #[inline]
    pub fn schema(&self) -> IdSchema {
        self.schema
    }

    /// Create a tenant with an empty head chunk.
    pub fn new_tenant(&self) -> Result<Arc<Tenant<T>>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let id = self.next_tenant.fetch_add(1, Ordering::Relaxed);
        let tenant = Arc::new(Tenant::new(id, self.schema));
        self.tenants.insert(id, Arc::clone(&tenant));

        // Lost a race with close.
        if self.is_closed() {
            self.tenants.remove(&id);
            tenant.close();
            return Err(PoolError::Closed);
        }
        debug!("created tenant {} with {}", id, self.schema);
        Ok(tenant)
    }

    /// Get a tenant by id.
    pub fn tenant(&self, id: u32) -> Option<Arc<Tenant<T>>> {
        self.tenants.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Close a tenant and drop it from the pool.
    pub fn remove_tenant(&self, id: u32) -> Option<Arc<Tenant<T>>> {
        let (_, tenant) = self.tenants.remove(&id)?;
        tenant.close();
        Some(tenant)
    }

    /// Number of open tenants.
    #[inline]
    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    /// Check if the pool has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every tenant and refuse new ones.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let tenants: Vec<_> = self
            .tenants
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.tenants.clear();
        for tenant in tenants {
            tenant.close();
        }
        debug!("pool closed");
    }
}

impl<T: Item> Default for ChunkedPool<T> {
    fn default() -> Self {
        Self::new(IdSchema::default())
    }
}
