use std::any::{Any, TypeId};

use crate::{error::IndexError, index::ClassIndex};

/// Anything that can report the component type it stands for.
pub trait TypeKey {
    fn type_key(&self) -> TypeId;
}

impl TypeKey for TypeId {
    #[inline]
    fn type_key(&self) -> TypeId {
        *self
    }
}

impl TypeKey for &dyn Any {
    #[inline]
    fn type_key(&self) -> TypeId {
        (**self).type_id()
    }
}

impl TypeKey for Box<dyn Any> {
    #[inline]
    fn type_key(&self) -> TypeId {
        (**self).type_id()
    }
}

impl TypeKey for Box<dyn Any + Send> {
    #[inline]
    fn type_key(&self) -> TypeId {
        (**self).type_id()
    }
}

impl TypeKey for Box<dyn Any + Send + Sync> {
    #[inline]
    fn type_key(&self) -> TypeId {
        (**self).type_id()
    }
}

/// The fixed component layout of one archetype.
///
/// Component types are kept in ascending class index code order, so the position of a
/// type in that order is a precomputed offset into any component array sorted with
/// [`ComponentIndex::sort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentIndex {
    types: Box<[TypeId]>,
    codes: Box<[u32]>,
}

impl ComponentIndex {
    /// Resolve `types` through the class index and order them by code. A type given
    /// twice is an error.
    pub fn new(index: &ClassIndex, types: &[TypeId]) -> Result<Self, IndexError> {
        let codes = index.get_index_or_add_batch(types)?;
        let mut pairs: Vec<_> = codes.into_iter().zip(types.iter().copied()).collect();
        pairs.sort_unstable_by_key(|(code, _)| *code);
        if let Some(pair) = pairs.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(IndexError::DuplicateType { code: pair[0].0 });
        }
        let (codes, types): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Ok(Self {
            types: types.into_boxed_slice(),
            codes: codes.into_boxed_slice(),
        })
    }

    /// Number of component types.
    #[inline]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if this is the layout of the empty set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// The component types in canonical order.
    #[inline]
    pub fn types(&self) -> &[TypeId] {
        &self.types
    }

    /// The class index codes in ascending order.
    #[inline]
    pub fn codes(&self) -> &[u32] {
        &self.codes
    }

    /// The canonical position of a type, if it belongs to this layout.
    pub fn offset_of(&self, type_id: TypeId) -> Option<usize> {
        self.types.iter().position(|t| *t == type_id)
    }

    /// The class index code of a type, if it belongs to this layout.
    pub fn code_of(&self, type_id: TypeId) -> Option<u32> {
        self.offset_of(type_id).map(|offset| self.codes[offset])
    }

    /// Check if a type belongs to this layout.
    #[inline]
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.offset_of(type_id).is_some()
    }

    fn rank<C: TypeKey>(&self, component: &C) -> usize {
        self.offset_of(component.type_key()).unwrap_or(usize::MAX)
    }

    /// Reorder components in place into canonical order. Components of types outside
    /// this layout move to the end, keeping their relative order.
    pub fn sort<C: TypeKey>(&self, components: &mut [C]) {
        components.sort_by_key(|component| self.rank(component));
    }

    /// Check if components are already in canonical order.
    pub fn is_sorted<C: TypeKey>(&self, components: &[C]) -> bool {
        components.is_sorted_by_key(|component| self.rank(component))
    }
}
