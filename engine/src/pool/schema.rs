use std::fmt;

use crate::error::ConfigError;

/// The bit layout of a pooled identifier.
///
/// A 32-bit identifier is split into three fields, from most to least significant:
///
/// ```text
/// | 31       | 30 ..= chunk_bit | chunk_bit - 1 ..= 0 |
/// | detached | chunk index      | object offset       |
/// ```
///
/// The object offset addresses a slot inside a chunk, so a chunk holds
/// `2^chunk_bit` slots. The remaining bits below the detached tag address the chunk
/// within its tenant. The schema is plain data; copies are shared freely between
/// threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSchema {
    chunk_bit: u32,
    object_mask: u32,
    chunk_mask: u32,
}

impl IdSchema {
    /// Smallest supported chunk bit width (4 slots per chunk).
    pub const MIN_CHUNK_BIT: u32 = 2;

    /// Largest supported chunk bit width (65536 slots per chunk).
    pub const MAX_CHUNK_BIT: u32 = 16;

    /// Chunk bit width used when nothing else is configured.
    pub const DEFAULT_CHUNK_BIT: u32 = 14;

    /// Tag bit marking an identifier as detached from its slot.
    pub const DETACHED_BIT: u32 = 1 << 31;

    /// Number of bits shared by the chunk index and the object offset.
    const ADDRESS_BITS: u32 = 31;

    /// Build a schema for the given chunk bit width.
    pub fn new(chunk_bit: u32) -> Result<Self, ConfigError> {
        if chunk_bit < Self::MIN_CHUNK_BIT || chunk_bit > Self::MAX_CHUNK_BIT {
            return Err(ConfigError::ChunkBitOutOfRange {
                bits: chunk_bit,
                min: Self::MIN_CHUNK_BIT,
                max: Self::MAX_CHUNK_BIT,
            });
        }
        Ok(Self {
            chunk_bit,
            object_mask: (1 << chunk_bit) - 1,
            chunk_mask: (1 << (Self::ADDRESS_BITS - chunk_bit)) - 1,
        })
    }

    /// Encode a chunk index and an object offset into an identifier.
    #[inline]
    pub const fn encode(&self, chunk_index: u32, object_offset: u32) -> u32 {
        debug_assert!(chunk_index <= self.chunk_mask);
        debug_assert!(object_offset <= self.object_mask);
        ((chunk_index & self.chunk_mask) << self.chunk_bit) | (object_offset & self.object_mask)
    }

    /// Decode an identifier into its `(chunk_index, object_offset)` pair. The detached
    /// tag is ignored.
    #[inline]
    pub const fn decode(&self, id: u32) -> (u32, u32) {
        (self.chunk_index(id), self.object_offset(id))
    }

    /// The chunk index of an identifier.
    #[inline]
    pub const fn chunk_index(&self, id: u32) -> u32 {
        (id >> self.chunk_bit) & self.chunk_mask
    }

    /// The object offset of an identifier.
    #[inline]
    pub const fn object_offset(&self, id: u32) -> u32 {
        id & self.object_mask
    }

    /// The configured chunk bit width.
    #[inline]
    pub const fn chunk_bit(&self) -> u32 {
        self.chunk_bit
    }

    /// Number of slots in every chunk.
    #[inline]
    pub const fn chunk_capacity(&self) -> u32 {
        1 << self.chunk_bit
    }

    /// Number of chunks a single tenant can address.
    #[inline]
    pub const fn max_chunks(&self) -> u32 {
        self.chunk_mask + 1
    }

    /// Tag an identifier as detached.
    #[inline]
    pub const fn detach(id: u32) -> u32 {
        id | Self::DETACHED_BIT
    }

    /// Check for the detached tag.
    #[inline]
    pub const fn is_detached(id: u32) -> bool {
        id & Self::DETACHED_BIT != 0
    }
}

impl Default for IdSchema {
    fn default() -> Self {
        Self {
            chunk_bit: Self::DEFAULT_CHUNK_BIT,
            object_mask: (1 << Self::DEFAULT_CHUNK_BIT) - 1,
            chunk_mask: (1 << (Self::ADDRESS_BITS - Self::DEFAULT_CHUNK_BIT)) - 1,
        }
    }
}

impl fmt::Display for IdSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IdSchema(detached: 1 bit, chunk index: {} bits, object offset: {} bits)",
            Self::ADDRESS_BITS - self.chunk_bit,
            self.chunk_bit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_small_chunks() {
        // Given
        let schema = IdSchema::new(2).unwrap();

        // When / Then - every offset of a sample of chunks
        for chunk in [0, 1, 2, 1000, schema.max_chunks() - 1] {
            for offset in 0..schema.chunk_capacity() {
                let id = schema.encode(chunk, offset);
                assert_eq!(schema.decode(id), (chunk, offset));
            }
        }
    }

    #[test]
    fn round_trip_default_chunks() {
        // Given
        let schema = IdSchema::default();

        // When
        let last = schema.encode(schema.max_chunks() - 1, schema.chunk_capacity() - 1);

        // Then
        assert_eq!(
            schema.decode(last),
            (schema.max_chunks() - 1, schema.chunk_capacity() - 1)
        );
        assert!(!IdSchema::is_detached(last));
    }

    #[test]
    fn first_chunk_ids_are_offsets() {
        let schema = IdSchema::new(4).unwrap();

        assert_eq!(schema.encode(0, 7), 7);
        assert_eq!(schema.encode(1, 0), 16);
    }

    #[test]
    fn default_matches_new() {
        assert_eq!(
            IdSchema::default(),
            IdSchema::new(IdSchema::DEFAULT_CHUNK_BIT).unwrap()
        );
    }

    #[test]
    fn capacity_and_chunk_count() {
        // Given
        let schema = IdSchema::new(10).unwrap();

        // Then
        assert_eq!(schema.chunk_capacity(), 1024);
        assert_eq!(schema.max_chunks(), 1 << 21);
        assert_eq!(schema.chunk_bit(), 10);
    }

    #[test]
    fn rejects_out_of_range_widths() {
        assert_eq!(
            IdSchema::new(1),
            Err(ConfigError::ChunkBitOutOfRange {
                bits: 1,
                min: 2,
                max: 16
            })
        );
        assert!(IdSchema::new(17).is_err());
        assert!(IdSchema::new(IdSchema::MIN_CHUNK_BIT).is_ok());
        assert!(IdSchema::new(IdSchema::MAX_CHUNK_BIT).is_ok());
    }

    #[test]
    fn detached_tag_does_not_change_address() {
        // Given
        let schema = IdSchema::new(8).unwrap();
        let id = schema.encode(3, 42);

        // When
        let detached = IdSchema::detach(id);

        // Then
        assert!(IdSchema::is_detached(detached));
        assert_eq!(schema.decode(detached), (3, 42));
    }
}
