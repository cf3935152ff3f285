use std::{
    ops::Deref,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use crate::pool::schema::IdSchema;

/// A non-owning reference to the chunk a pooled item is stored in.
///
/// The chunk owns the slot; the item only remembers where that slot lives so it can be
/// found again for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRef {
    tenant: u32,
    chunk: u32,
}

impl ChunkRef {
    const NONE: u64 = u64::MAX;

    /// Construct a reference to a chunk of a tenant.
    #[inline]
    pub const fn new(tenant: u32, chunk: u32) -> Self {
        Self { tenant, chunk }
    }

    /// The id of the owning tenant.
    #[inline]
    pub const fn tenant(&self) -> u32 {
        self.tenant
    }

    /// The index of the chunk within its tenant.
    #[inline]
    pub const fn chunk(&self) -> u32 {
        self.chunk
    }

    #[inline]
    const fn pack(this: Option<Self>) -> u64 {
        match this {
            Some(r) => ((r.tenant as u64) << 32) | r.chunk as u64,
            None => Self::NONE,
        }
    }

    #[inline]
    const fn unpack(bits: u64) -> Option<Self> {
        if bits == Self::NONE {
            None
        } else {
            Some(Self::new((bits >> 32) as u32, bits as u32))
        }
    }
}

/// The capability every pooled value must provide.
///
/// Items are shared with the pool through an `Arc`, so setters take `&self` and
/// implementors keep these fields in atomics (see [`ItemHeader`]).
pub trait Item: Send + Sync + 'static {
    /// The identifier of the slot this item is registered at.
    fn id(&self) -> u32;

    /// Record the identifier of the slot this item is registered at.
    fn set_id(&self, id: u32);

    /// Record the identifier of the state slot this item is registered at.
    fn set_state_id(&self, id: u32);

    /// The chunk that owns this item's slot, if registered.
    fn chunk(&self) -> Option<ChunkRef>;

    /// Record the chunk that owns this item's slot.
    fn set_chunk(&self, chunk: Option<ChunkRef>);

    /// Record the chunk that owns this item's state slot.
    fn set_state_chunk(&self, chunk: Option<ChunkRef>);
}

/// Atomic storage for the [`Item`] fields, meant to be embedded in pooled types.
#[derive(Debug)]
pub struct ItemHeader {
    id: AtomicU32,
    state_id: AtomicU32,
    chunk: AtomicU64,
    state_chunk: AtomicU64,
}

impl ItemHeader {
    /// Construct an unregistered header. Its identifiers carry the detached tag until
    /// a tenant registers it.
    pub const fn new() -> Self {
        Self {
            id: AtomicU32::new(IdSchema::DETACHED_BIT),
            state_id: AtomicU32::new(IdSchema::DETACHED_BIT),
            chunk: AtomicU64::new(ChunkRef::NONE),
            state_chunk: AtomicU64::new(ChunkRef::NONE),
        }
    }

    /// The recorded state slot identifier.
    #[inline]
    pub fn state_id(&self) -> u32 {
        self.state_id.load(Ordering::Acquire)
    }

    /// The recorded state chunk.
    #[inline]
    pub fn state_chunk(&self) -> Option<ChunkRef> {
        ChunkRef::unpack(self.state_chunk.load(Ordering::Acquire))
    }
}

impl Default for ItemHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl Item for ItemHeader {
    #[inline]
    fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    #[inline]
    fn set_id(&self, id: u32) {
        self.id.store(id, Ordering::Release);
    }

    #[inline]
    fn set_state_id(&self, id: u32) {
        self.state_id.store(id, Ordering::Release);
    }

    #[inline]
    fn chunk(&self) -> Option<ChunkRef> {
        ChunkRef::unpack(self.chunk.load(Ordering::Acquire))
    }

    #[inline]
    fn set_chunk(&self, chunk: Option<ChunkRef>) {
        self.chunk.store(ChunkRef::pack(chunk), Ordering::Release);
    }

    #[inline]
    fn set_state_chunk(&self, chunk: Option<ChunkRef>) {
        self.state_chunk.store(ChunkRef::pack(chunk), Ordering::Release);
    }
}

/// A value paired with an [`ItemHeader`], the simplest way to pool arbitrary data.
#[derive(Debug, Default)]
pub struct Pooled<V> {
    header: ItemHeader,
    value: V,
}

impl<V> Pooled<V> {
    /// Wrap a value for pooling.
    pub const fn new(value: V) -> Self {
        Self {
            header: ItemHeader::new(),
            value,
        }
    }

    /// The header holding the pool bookkeeping.
    #[inline]
    pub fn header(&self) -> &ItemHeader {
        &self.header
    }

    /// The wrapped value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }
}

impl<V> Deref for Pooled<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<V: Send + Sync + 'static> Item for Pooled<V> {
    #[inline]
    fn id(&self) -> u32 {
        self.header.id()
    }

    #[inline]
    fn set_id(&self, id: u32) {
        self.header.set_id(id);
    }

    #[inline]
    fn set_state_id(&self, id: u32) {
        self.header.set_state_id(id);
    }

    #[inline]
    fn chunk(&self) -> Option<ChunkRef> {
        self.header.chunk()
    }

    #[inline]
    fn set_chunk(&self, chunk: Option<ChunkRef>) {
        self.header.set_chunk(chunk);
    }

    #[inline]
    fn set_state_chunk(&self, chunk: Option<ChunkRef>) {
        self.header.set_state_chunk(chunk);
    }
}
