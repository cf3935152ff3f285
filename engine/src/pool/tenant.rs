use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock,
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
};

use crossbeam::{queue::SegQueue, utils::CachePadded};
use fixedbitset::FixedBitSet;
use log::{debug, trace, warn};

use crate::{
    error::PoolError,
    pool::{
        chunk::{LinkedChunk, SlotError},
        item::{ChunkRef, Item},
        schema::IdSchema,
    },
};

/// Index of the chunk every chain starts with. It is never parked.
const HEAD: u32 = 0;

/// Chain bookkeeping that only changes when the chain grows or shrinks.
#[derive(Debug)]
struct Chain {
    /// The last linked chunk, which is also the one fresh slots are taken from.
    tail: u32,
    /// Drained chunks waiting to be linked again.
    parked: Vec<u32>,
}

/// The chunk chain of one archetype.
///
/// Identifiers are handed out by taking a previously freed slot if one exists, and
/// otherwise the next unused slot of the current (last) chunk. When the current chunk
/// is full the chain grows by one chunk; if several threads race to grow it, exactly
/// one links the new chunk and the others retry against it.
///
/// # Concurrency
///
/// Every allocation and every free is one atomic step on the chunk that owns the slot,
/// so concurrent [`next_id`](Self::next_id) calls never return the same identifier and
/// a freed slot cannot be handed out before its [`free_id`](Self::free_id) returns.
/// Iteration is weakly consistent: it never yields a freed payload, but may miss
/// slots that are freed or appended while it runs. Passes visit chunks by index
/// rather than through the links, so relinking a parked chunk never cuts a pass
/// short.
#[derive(Debug)]
pub struct Tenant<T> {
    id: u32,
    schema: IdSchema,
    /// All chunks ever created, indexed by chunk index.
    chunks: RwLock<Vec<Arc<LinkedChunk<T>>>>,
    chain: Mutex<Chain>,
    /// Mirror of `Chain::tail` for lock-free allocation.
    current: AtomicU32,
    /// Chunks whose free stack became non-empty. May hold stale entries.
    reusable: SegQueue<u32>,
    live: CachePadded<AtomicUsize>,
    chunk_count: AtomicU32,
    closed: AtomicBool,
}

impl<T: Item> Tenant<T> {
    /// Construct a tenant with its head chunk.
    pub(crate) fn new(id: u32, schema: IdSchema) -> Self {
        let head = Arc::new(LinkedChunk::new(HEAD, schema.chunk_capacity()));
        Self {
            id,
            schema,
            chunks: RwLock::new(vec![head]),
            chain: Mutex::new(Chain {
                tail: HEAD,
                parked: Vec::new(),
            }),
            current: AtomicU32::new(HEAD),
            reusable: SegQueue::new(),
            live: CachePadded::new(AtomicUsize::new(0)),
            chunk_count: AtomicU32::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// The id of this tenant within its pool.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The identifier layout shared with the pool.
    #[inline]
    pub fn schema(&self) -> IdSchema {
        self.schema
    }

    /// Number of live slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Check if no slot is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of chunks created so far, linked or parked.
    #[inline]
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count.load(Ordering::Relaxed)
    }

    /// Check if the tenant has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    fn ensure_open(&self) -> Result<(), PoolError> {
        if self.is_closed() {
            Err(PoolError::Closed)
        } else {
            Ok(())
        }
    }

    #[inline]
    fn lock_chain(&self) -> MutexGuard<'_, Chain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a chunk by index.
    pub fn chunk(&self, index: u32) -> Option<Arc<LinkedChunk<T>>> {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index as usize)
            .cloned()
    }

    /// Allocate a new identifier.
    pub fn next_id(&self) -> Result<u32, PoolError> {
        let (chunk, offset) = self.allocate()?;
        Ok(self.schema.encode(chunk.index(), offset))
    }

    /// Allocate a slot and store `item` in it, recording the slot on the item. A state
    /// item, if given, is stored in the parallel state slot and records the same slot.
    pub fn register(&self, item: Arc<T>, state_item: Option<Arc<T>>) -> Result<u32, PoolError> {
        let (chunk, offset) = self.allocate()?;
        let id = self.schema.encode(chunk.index(), offset);
        let chunk_ref = ChunkRef::new(self.id, chunk.index());

        item.set_id(id);
        item.set_chunk(Some(chunk_ref));
        if let Some(state_item) = state_item {
            state_item.set_state_id(id);
            state_item.set_state_chunk(Some(chunk_ref));
            chunk.put_state(offset, state_item);
        }
        chunk.put(offset, item);
        trace!("tenant {} registered {:#x}", self.id, id);
        Ok(id)
    }

    fn allocate(&self) -> Result<(Arc<LinkedChunk<T>>, u32), PoolError> {
        self.ensure_open()?;

        // Freed slots first.
        while let Some(index) = self.reusable.pop() {
            let Some(chunk) = self.chunk(index) else {
                continue;
            };
            if let Some((offset, more)) = chunk.reuse() {
                if more {
                    self.reusable.push(index);
                }
                self.live.fetch_add(1, Ordering::Relaxed);
                return Ok((chunk, offset));
            }
        }

        loop {
            let current = self.current.load(Ordering::Acquire);
            let chunk = self.chunk(current).ok_or(PoolError::Closed)?;
            if let Some(offset) = chunk.allocate() {
                self.live.fetch_add(1, Ordering::Relaxed);
                return Ok((chunk, offset));
            }
            self.grow(current)?;
        }
    }

    /// Link a chunk after `observed`, unless another thread already moved past it.
    fn grow(&self, observed: u32) -> Result<(), PoolError> {
        let mut chain = self.lock_chain();
        self.ensure_open()?;
        if chain.tail != observed {
            return Ok(());
        }

        let chunk = match chain.parked.pop() {
            Some(index) => {
                let chunk = self.chunk(index).ok_or(PoolError::Closed)?;
                chunk.unpark();
                chunk
            }
            None => {
                let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
                let index = chunks.len() as u32;
                if index >= self.schema.max_chunks() {
                    return Err(PoolError::Exhausted {
                        max_chunks: self.schema.max_chunks(),
                    });
                }
                let chunk = Arc::new(LinkedChunk::new(index, self.schema.chunk_capacity()));
                chunks.push(Arc::clone(&chunk));
                self.chunk_count.fetch_add(1, Ordering::Relaxed);
                chunk
            }
        };

        if let Some(tail) = self.chunk(chain.tail) {
            tail.set_next(Some(chunk.index()));
        }
        chunk.link(Some(chain.tail), None);
        chain.tail = chunk.index();
        self.current.store(chunk.index(), Ordering::Release);
        debug!(
            "tenant {} linked chunk {} ({} chunks)",
            self.id,
            chunk.index(),
            self.chunk_count()
        );
        Ok(())
    }

    /// Free an identifier, returning the payload that was registered at it.
    ///
    /// The payload's chunk references are cleared and its identifier is tagged as
    /// detached, so freeing through a stale copy of it fails instead of freeing a
    /// reused slot. A state payload at the same slot is detached the same way.
    pub fn free_id(&self, id: u32) -> Result<Option<Arc<T>>, PoolError> {
        self.ensure_open()?;
        if IdSchema::is_detached(id) {
            warn!("tenant {} refused to free detached id {:#x}", self.id, id);
            return Err(PoolError::InvalidId(id));
        }

        let (index, offset) = self.schema.decode(id);
        let chunk = self.chunk(index).ok_or(PoolError::InvalidId(id))?;
        let freed = chunk.free(offset).map_err(|error| {
            warn!("tenant {} failed to free {:#x}: {:?}", self.id, id, error);
            match error {
                SlotError::Unallocated => PoolError::InvalidId(id),
                SlotError::AlreadyFree => PoolError::AlreadyFree(id),
            }
        })?;
        self.live.fetch_sub(1, Ordering::Relaxed);

        if let Some(item) = &freed.item {
            item.set_chunk(None);
            item.set_id(IdSchema::detach(id));
        }
        if let Some(state_item) = &freed.state_item {
            state_item.set_state_chunk(None);
            state_item.set_state_id(IdSchema::detach(id));
        }
        if freed.reopened {
            self.reusable.push(index);
        }
        if freed.drained {
            self.reclaim(index);
        }
        Ok(freed.item)
    }

    /// Free the slot an item is registered at. Items registered with another tenant,
    /// or not registered at all, are refused.
    pub fn free_item(&self, item: &T) -> Result<Option<Arc<T>>, PoolError> {
        let id = item.id();
        let owned = item.chunk().is_some_and(|chunk| {
            chunk.tenant() == self.id && chunk.chunk() == self.schema.decode(id).0
        });
        if !owned {
            warn!("tenant {} refused to free foreign item {:#x}", self.id, id);
            return Err(PoolError::InvalidId(id));
        }
        self.free_id(id)
    }

    /// Unlink a drained chunk and park it for the next growth. The head and the current
    /// chunk stay linked.
    fn reclaim(&self, index: u32) {
        if index == HEAD {
            return;
        }
        let mut chain = self.lock_chain();
        if index == chain.tail || self.is_closed() {
            return;
        }
        let Some(chunk) = self.chunk(index) else {
            return;
        };
        if !chunk.park() {
            return;
        }

        let (prev, next) = chunk.unlink();
        if let Some(prev_chunk) = prev.and_then(|p| self.chunk(p)) {
            prev_chunk.set_next(next);
        }
        if let Some(next_chunk) = next.and_then(|n| self.chunk(n)) {
            next_chunk.set_prev(prev);
        }
        chain.parked.push(index);
        debug!("tenant {} parked drained chunk {}", self.id, index);
    }

    /// Get the payload registered at an identifier.
    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        let (index, offset) = self.address(id)?;
        self.chunk(index)?.item(offset)
    }

    /// Check if a payload is registered at an identifier.
    pub fn contains(&self, id: u32) -> bool {
        self.address(id)
            .and_then(|(index, offset)| Some((self.chunk(index)?, offset)))
            .is_some_and(|(chunk, offset)| chunk.is_occupied(offset))
    }

    /// Decode an identifier, refusing detached ones.
    #[inline]
    fn address(&self, id: u32) -> Option<(u32, u32)> {
        (!IdSchema::is_detached(id)).then(|| self.schema.decode(id))
    }

    /// Get the state payload registered at an identifier.
    pub fn state_item(&self, id: u32) -> Option<Arc<T>> {
        let (index, offset) = self.address(id)?;
        self.chunk(index)?.state_item(offset)
    }

    /// Iterate all registered payloads, chunk by chunk from the head.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            walk: ChainWalk::new(self),
            chunk: None,
            offset: 0,
            end: 0,
        }
    }

    /// Iterate the identifiers of all allocated slots without touching their payloads.
    pub fn positions(&self) -> Positions<'_, T> {
        Positions {
            walk: ChainWalk::new(self),
            chunk: 0,
            offset: 0,
            end: 0,
            vacant: FixedBitSet::new(),
        }
    }

    /// Release every chunk and refuse further allocation. Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut chain = self.lock_chain();
        self.chunks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        chain.parked.clear();
        while self.reusable.pop().is_some() {}
        self.live.store(0, Ordering::Relaxed);
        debug!("tenant {} closed", self.id);
    }
}

/// Walks the chunks of a tenant in index order, starting with the head.
///
/// Chunk indices never change, so a chunk that stays linked for the whole pass is
/// visited exactly once no matter how the links are rewritten meanwhile. Parked chunks
/// have no allocated slots and yield nothing.
struct ChainWalk<'a, T> {
    tenant: &'a Tenant<T>,
    next: u32,
}

impl<'a, T: Item> ChainWalk<'a, T> {
    fn new(tenant: &'a Tenant<T>) -> Self {
        Self { tenant, next: HEAD }
    }

    fn next_chunk(&mut self) -> Option<Arc<LinkedChunk<T>>> {
        if self.next >= self.tenant.chunk_count() {
            return None;
        }
        let chunk = self.tenant.chunk(self.next)?;
        self.next += 1;
        Some(chunk)
    }
}

/// Iterator over the registered payloads of a tenant. See [`Tenant::iter`].
pub struct Iter<'a, T> {
    walk: ChainWalk<'a, T>,
    chunk: Option<Arc<LinkedChunk<T>>>,
    offset: u32,
    end: u32,
}

impl<T: Item> Iterator for Iter<'_, T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = &self.chunk {
                while self.offset < self.end {
                    let offset = self.offset;
                    self.offset += 1;
                    if let Some(item) = chunk.item(offset) {
                        return Some(item);
                    }
                }
            }
            let chunk = self.walk.next_chunk()?;
            self.offset = 0;
            self.end = chunk.high_water();
            self.chunk = Some(chunk);
        }
    }
}

/// Iterator over the identifiers of allocated slots. See [`Tenant::positions`].
pub struct Positions<'a, T> {
    walk: ChainWalk<'a, T>,
    chunk: u32,
    offset: u32,
    end: u32,
    vacant: FixedBitSet,
}

impl<T: Item> Iterator for Positions<'_, T> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while self.offset < self.end {
                let offset = self.offset;
                self.offset += 1;
                if !self.vacant.contains(offset as usize) {
                    return Some(self.walk.tenant.schema.encode(self.chunk, offset));
                }
            }
            let chunk = self.walk.next_chunk()?;
            let (end, vacant) = chunk.allocated();
            self.chunk = chunk.index();
            self.offset = 0;
            self.end = end;
            self.vacant = vacant;
        }
    }
}
