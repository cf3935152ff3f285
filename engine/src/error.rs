//! Error types for the pool, the class index, their configuration and the
//! composition repository built on top of them.
//!
//! Configuration errors are raised at construction time and are fatal: nothing is
//! partially built. Pool and index errors are caller-input or lifecycle errors and
//! leave the structure they were raised from untouched.

use thiserror::Error;

/// An invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The chunk bit width is outside the supported range.
    #[error("chunk bit width {bits} is out of range, expected {min}..={max}")]
    ChunkBitOutOfRange { bits: u32, min: u32, max: u32 },

    /// The class index hash bit width is outside the supported range.
    #[error("class index hash bit width {bits} is out of range, expected {min}..={max}")]
    HashBitOutOfRange { bits: u32, min: u32, max: u32 },

    /// A configuration override could not be parsed.
    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },
}

/// A failed pool operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The tenant (or its pool) has been closed.
    #[error("tenant is closed")]
    Closed,

    /// Every chunk index the id schema can encode is in use.
    #[error("chunk index space exhausted ({max_chunks} chunks)")]
    Exhausted { max_chunks: u32 },

    /// The identifier does not refer to an allocated slot of this tenant.
    #[error("invalid identifier {0:#010x}")]
    InvalidId(u32),

    /// The identifier's slot is already on its chunk's free stack.
    #[error("identifier {0:#010x} is already free")]
    AlreadyFree(u32),
}

/// A failed class index operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The same type appeared more than once in a type set.
    #[error("duplicate object types are not allowed (code {code})")]
    DuplicateType { code: u32 },

    /// The index has been closed.
    #[error("class index is closed")]
    Closed,
}

/// Any failure of the composition repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Index(#[from] IndexError),
}
