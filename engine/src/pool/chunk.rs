use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock,
    atomic::{AtomicU32, Ordering},
};

use fixedbitset::FixedBitSet;

/// Link value meaning "no neighbour".
pub(crate) const NO_LINK: u32 = u32::MAX;

/// A storage slot. `None` is a slot that is unused, freed, or allocated but not yet
/// registered.
type Slot<T> = RwLock<Option<Arc<T>>>;

/// Why a slot could not be freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotError {
    /// The offset lies at or above the high-water mark.
    Unallocated,
    /// The offset is already on the free stack.
    AlreadyFree,
}

/// The outcome of freeing a slot.
#[derive(Debug)]
pub(crate) struct Freed<T> {
    /// The payload that was registered at the slot.
    pub item: Option<Arc<T>>,
    /// The state payload that was registered at the slot.
    pub state_item: Option<Arc<T>>,
    /// The free stack was empty before this free.
    pub reopened: bool,
    /// No live slot is left in the chunk.
    pub drained: bool,
}

/// Allocation bookkeeping, always mutated under one lock so that every allocation and
/// every free is a single atomic step.
#[derive(Debug)]
struct ChunkState {
    /// High-water mark: offsets at or above it have never been handed out.
    next_offset: u32,
    /// LIFO stack of freed offsets.
    free: Vec<u32>,
    /// Membership of `free`, one bit per offset.
    vacant: FixedBitSet,
    /// Number of allocated offsets not on the free stack.
    live: u32,
    /// Parked chunks are unlinked from the chain and refuse allocation.
    parked: bool,
}

/// One fixed-capacity block of slots in a tenant's chunk chain.
///
/// A slot is in exactly one of three states: unused (at or above the high-water
/// mark), live, or freed (present once on the free stack). Chunks link to their
/// neighbours by index; the links are only rewritten by the owning tenant while it
/// holds its chain lock, and are read lock-free by iterators.
#[derive(Debug)]
pub struct LinkedChunk<T> {
    index: u32,
    capacity: u32,
    items: Box<[Slot<T>]>,
    /// Parallel slots for state items, allocated on first use.
    state_items: OnceLock<Box<[Slot<T>]>>,
    state: Mutex<ChunkState>,
    /// Mirror of `ChunkState::next_offset` for lock-free readers.
    high_water: AtomicU32,
    prev: AtomicU32,
    next: AtomicU32,
}

impl<T> LinkedChunk<T> {
    /// Construct an empty, unlinked chunk.
    pub(crate) fn new(index: u32, capacity: u32) -> Self {
        Self {
            index,
            capacity,
            items: Self::slots(capacity),
            state_items: OnceLock::new(),
            state: Mutex::new(ChunkState {
                next_offset: 0,
                free: Vec::new(),
                vacant: FixedBitSet::with_capacity(capacity as usize),
                live: 0,
                parked: false,
            }),
            high_water: AtomicU32::new(0),
            prev: AtomicU32::new(NO_LINK),
            next: AtomicU32::new(NO_LINK),
        }
    }

    fn slots(capacity: u32) -> Box<[Slot<T>]> {
        (0..capacity).map(|_| RwLock::new(None)).collect()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, ChunkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The index of this chunk within its tenant.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of slots in this chunk.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.lock().live as usize
    }

    /// Check if no slot is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current high-water mark.
    #[inline]
    pub fn high_water(&self) -> u32 {
        self.high_water.load(Ordering::Acquire)
    }

    /// Take a slot: the most recently freed offset if any, otherwise the next unused
    /// one. Returns `None` when the chunk is full (or parked).
    pub fn allocate(&self) -> Option<u32> {
        let mut state = self.lock();
        if state.parked {
            return None;
        }
        if let Some(offset) = state.free.pop() {
            state.vacant.set(offset as usize, false);
            state.live += 1;
            return Some(offset);
        }
        if state.next_offset < self.capacity {
            let offset = state.next_offset;
            state.next_offset += 1;
            state.live += 1;
            self.high_water.store(state.next_offset, Ordering::Release);
            return Some(offset);
        }
        None
    }

    /// Take a slot from the free stack only. The flag reports whether freed slots
    /// remain after this one.
    pub(crate) fn reuse(&self) -> Option<(u32, bool)> {
        let mut state = self.lock();
        let offset = state.free.pop()?;
        state.vacant.set(offset as usize, false);
        state.live += 1;
        Some((offset, !state.free.is_empty()))
    }

    /// Return a slot to the free stack and clear its payloads.
    pub(crate) fn free(&self, offset: u32) -> Result<Freed<T>, SlotError> {
        let mut state = self.lock();
        if offset >= state.next_offset {
            return Err(SlotError::Unallocated);
        }
        if state.vacant.contains(offset as usize) {
            return Err(SlotError::AlreadyFree);
        }
        // Clear before the offset becomes reusable.
        let item = Self::take(&self.items[offset as usize]);
        let state_item = self
            .state_items
            .get()
            .and_then(|state_items| Self::take(&state_items[offset as usize]));
        state.free.push(offset);
        state.vacant.insert(offset as usize);
        state.live -= 1;
        Ok(Freed {
            item,
            state_item,
            reopened: state.free.len() == 1,
            drained: state.live == 0,
        })
    }

    fn take(slot: &Slot<T>) -> Option<Arc<T>> {
        slot.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Store a payload at an allocated offset.
    pub(crate) fn put(&self, offset: u32, item: Arc<T>) {
        *self.items[offset as usize]
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(item);
    }

    /// Store a state payload at an allocated offset, creating the state slots on first
    /// use.
    pub(crate) fn put_state(&self, offset: u32, item: Arc<T>) {
        let state_items = self.state_items.get_or_init(|| Self::slots(self.capacity));
        *state_items[offset as usize]
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(item);
    }

    /// The payload at an offset, if one is registered.
    pub fn item(&self, offset: u32) -> Option<Arc<T>> {
        self.items.get(offset as usize).and_then(|slot| {
            slot.read()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .cloned()
        })
    }

    /// The state payload at an offset, if one is registered.
    pub fn state_item(&self, offset: u32) -> Option<Arc<T>> {
        self.state_items
            .get()?
            .get(offset as usize)
            .and_then(|slot| {
                slot.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .cloned()
            })
    }

    /// Check whether an offset holds a payload without cloning it.
    pub(crate) fn is_occupied(&self, offset: u32) -> bool {
        self.items.get(offset as usize).is_some_and(|slot| {
            slot.read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }

    /// Snapshot of the allocated (non-free) offsets below the high-water mark.
    pub(crate) fn allocated(&self) -> (u32, FixedBitSet) {
        let state = self.lock();
        (state.next_offset, state.vacant.clone())
    }

    /// Reset an empty chunk and refuse further allocation until it is reattached.
    /// Returns `false` if a slot became live again or the chunk is already parked.
    pub(crate) fn park(&self) -> bool {
        let mut state = self.lock();
        if state.live != 0 || state.parked {
            return false;
        }
        state.next_offset = 0;
        state.free.clear();
        state.vacant.clear();
        state.parked = true;
        self.high_water.store(0, Ordering::Release);
        true
    }

    /// Accept allocations again after [`park`](Self::park).
    pub(crate) fn unpark(&self) {
        self.lock().parked = false;
    }

    /// Check if the chunk is parked.
    pub fn is_parked(&self) -> bool {
        self.lock().parked
    }

    /// The previous chunk in the chain.
    #[inline]
    pub fn prev(&self) -> Option<u32> {
        Self::link_of(&self.prev)
    }

    /// The next chunk in the chain.
    #[inline]
    pub fn next(&self) -> Option<u32> {
        Self::link_of(&self.next)
    }

    #[inline]
    fn link_of(link: &AtomicU32) -> Option<u32> {
        match link.load(Ordering::Acquire) {
            NO_LINK => None,
            index => Some(index),
        }
    }

    /// Set both neighbours.
    pub(crate) fn link(&self, prev: Option<u32>, next: Option<u32>) {
        self.prev.store(prev.unwrap_or(NO_LINK), Ordering::Release);
        self.next.store(next.unwrap_or(NO_LINK), Ordering::Release);
    }

    pub(crate) fn set_prev(&self, prev: Option<u32>) {
        self.prev.store(prev.unwrap_or(NO_LINK), Ordering::Release);
    }

    pub(crate) fn set_next(&self, next: Option<u32>) {
        self.next.store(next.unwrap_or(NO_LINK), Ordering::Release);
    }

    /// Detach from the chain, returning the former neighbours. The forward link is
    /// left in place so an iterator standing on this chunk can still move on.
    pub(crate) fn unlink(&self) -> (Option<u32>, Option<u32>) {
        let prev = Self::link_of(&self.prev);
        self.prev.store(NO_LINK, Ordering::Release);
        (prev, self.next())
    }

    /// Iterate the registered payloads of this chunk.
    pub fn iter(&self) -> ChunkIter<'_, T> {
        ChunkIter {
            chunk: self,
            offset: 0,
            end: self.high_water(),
        }
    }
}

/// Iterator over the registered payloads of one chunk.
///
/// The high-water mark is read once, so slots appended after the iterator was created
/// are not visited. Freed slots are cleared before they are reused and are skipped.
pub struct ChunkIter<'a, T> {
    chunk: &'a LinkedChunk<T>,
    offset: u32,
    end: u32,
}

impl<T> Iterator for ChunkIter<'_, T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < self.end {
            let offset = self.offset;
            self.offset += 1;
            if let Some(item) = self.chunk.item(offset) {
                return Some(item);
            }
        }
        None
    }
}
