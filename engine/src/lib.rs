//! Storage core of an entity component system.
//!
//! - [`pool`]: a concurrent chunked object pool. Entities of one archetype live in a
//!   [`Tenant`](pool::Tenant), a chain of fixed-size chunks addressed by 32-bit
//!   identifiers.
//! - [`index`]: [`ClassIndex`](index::ClassIndex) assigns small integer codes to
//!   component types and hashes type sets into canonical archetype keys.
//! - [`composition`]: ties both together, mapping type sets to their storage.
//!
//! The library logs through the [`log`] facade and never installs a logger.

pub mod collections;
pub mod composition;
pub mod config;
pub mod error;
pub mod index;
pub mod pool;

pub use composition::{Composition, Compositions};
pub use config::Config;
pub use error::Error;
