//! Archetype repository.
//!
//! [`Compositions`] maps sets of component types to [`Composition`]s, each owning the
//! [`Tenant`] that stores the entities of that archetype. Type sets are resolved
//! through a graph of nodes: every node stands for one set, keyed by its sorted class
//! index codes, and caches a link per added type to the node of the extended set.
//! Walking the links from the root node type by type therefore reaches the same node
//! for every order of the same set.
//!
//! The canonical hash of a set is only reported through [`Composition::hash`]. Distinct
//! sets may share it (`{1, 2}` and `{33}` both fold to 33), so it never selects a node.

use std::{
    any::TypeId,
    sync::{Arc, OnceLock},
};

use dashmap::DashMap;
use log::{debug, info};

use crate::{
    collections::{ConcurrentIntMap, SparseIntMap},
    config::Config,
    error::{Error, PoolError},
    index::{ClassIndex, ComponentIndex, TypeKey},
    pool::{ChunkedPool, Item, Tenant},
};

/// The storage of one archetype.
#[derive(Debug)]
pub struct Composition<T> {
    hash: u64,
    layout: ComponentIndex,
    tenant: Arc<Tenant<T>>,
}

impl<T> Composition<T> {
    /// The canonical hash of the component type set.
    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// The component types in canonical order.
    #[inline]
    pub fn layout(&self) -> &ComponentIndex {
        &self.layout
    }

    /// The tenant storing the entities of this archetype.
    #[inline]
    pub fn tenant(&self) -> &Arc<Tenant<T>> {
        &self.tenant
    }

    /// Check if this archetype has a component type.
    pub fn has_component_type(&self, type_id: TypeId) -> bool {
        self.layout.contains(type_id)
    }

    /// Sort components in place into this archetype's canonical order.
    pub fn sort_components<C: TypeKey>(&self, components: &mut [C]) {
        self.layout.sort(components);
    }
}

#[derive(Debug)]
struct Node<T> {
    /// Class index code to type.
    types: ConcurrentIntMap<TypeId>,
    /// Class index code of an added type to the node of the extended set.
    links: ConcurrentIntMap<Arc<Node<T>>>,
    composition: OnceLock<Arc<Composition<T>>>,
}

impl<T> Node<T> {
    fn new(types: ConcurrentIntMap<TypeId>) -> Self {
        Self {
            types,
            links: ConcurrentIntMap::new(),
            composition: OnceLock::new(),
        }
    }
}

/// The set of archetypes of one repository. See the [module docs](self).
#[derive(Debug)]
pub struct Compositions<T> {
    config: Config,
    index: ClassIndex,
    pool: ChunkedPool<T>,
    /// Sorted codes of a set to its node.
    nodes: DashMap<Box<[u32]>, Arc<Node<T>>>,
    root: Arc<Node<T>>,
}

impl<T: Item> Compositions<T> {
    /// Build the class index and pool described by `config`.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let index = config.class_index()?;
        let pool = ChunkedPool::new(config.id_schema()?);
        info!("{config}");

        let root = Arc::new(Node::new(ConcurrentIntMap::new()));
        let this = Self {
            config,
            index,
            pool,
            nodes: DashMap::new(),
            root: Arc::clone(&root),
        };
        this.nodes.insert(Box::default(), root);
        Ok(this)
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn class_index(&self) -> &ClassIndex {
        &self.index
    }

    #[inline]
    pub fn pool(&self) -> &ChunkedPool<T> {
        &self.pool
    }

    /// Number of distinct type sets seen so far, the empty set included.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The composition of the empty type set.
    pub fn root(&self) -> Result<Arc<Composition<T>>, Error> {
        self.composition(&self.root)
    }

    /// Get the composition of a set of distinct component types, creating it on first
    /// use. The order of `types` does not matter.
    pub fn get_or_create(&self, types: &[TypeId]) -> Result<Arc<Composition<T>>, Error> {
        // Rejects duplicates before any node is created.
        self.index.long_hash_code(types)?;

        let mut node = Arc::clone(&self.root);
        for type_id in types {
            node = self.link(&node, *type_id)?;
        }
        self.composition(&node)
    }

    /// The node of `node`'s set plus `type_id`.
    fn link(&self, node: &Arc<Node<T>>, type_id: TypeId) -> Result<Arc<Node<T>>, Error> {
        let code = self.index.get_index_or_add(&type_id)?;
        if node.types.contains(code) {
            return Ok(Arc::clone(node));
        }
        Ok(node.links.compute_if_absent(code, |code| {
            let types = node.types.clone();
            types.put(code, type_id);
            self.node(types)
        }))
    }

    fn node(&self, types: ConcurrentIntMap<TypeId>) -> Arc<Node<T>> {
        let key = types.keys().into_boxed_slice();
        Arc::clone(
            self.nodes
                .entry(key)
                .or_insert_with(|| Arc::new(Node::new(types)))
                .value(),
        )
    }

    fn composition(&self, node: &Node<T>) -> Result<Arc<Composition<T>>, Error> {
        if let Some(composition) = node.composition.get() {
            return Ok(Arc::clone(composition));
        }

        let layout = ComponentIndex::new(&self.index, &node.types.values())?;
        let tenant = self.pool.new_tenant()?;
        let created = Arc::new(Composition {
            hash: node.types.sorted_keys_hash_code(),
            layout,
            tenant,
        });
        if node.composition.set(Arc::clone(&created)).is_err() {
            // Another thread won; drop the spare tenant.
            self.pool.remove_tenant(created.tenant.id());
        } else {
            debug!(
                "composition {:#x} with {} component types on tenant {}",
                created.hash,
                created.layout.len(),
                created.tenant.id()
            );
        }
        node.composition
            .get()
            .cloned()
            .ok_or(Error::Pool(PoolError::Closed))
    }

    /// Close the pool and the class index. Closing twice is a no-op.
    pub fn close(&self) {
        self.pool.close();
        self.index.close();
    }
}
