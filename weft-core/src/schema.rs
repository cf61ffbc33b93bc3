//! Property-tree schema engine and the published-trait catalog.
//!
//! A trait's schema is a static tree of nodes: the root, nested
//! structure fields, and dictionary-valued fields whose elements are
//! addressed dynamically by key. The engine answers the ancestry
//! queries the diff solver needs: parent lookup, ancestor tests, and
//! lowest-common-ancestor computation with the "lagging" branch handles
//! on each side.

use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::types::{PathHandle, TraitHandle};

#[derive(Debug, Clone, Copy)]
struct Node {
    parent: u16,
    dictionary: bool,
}

/// Result of a lowest-common-ancestor query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lca {
    /// The deepest node that is an ancestor of both operands.
    pub ancestor: PathHandle,
    /// The child of `ancestor` on the first operand's path, or `None`
    /// when the first operand is the ancestor itself.
    pub branch_a: Option<PathHandle>,
    /// The child of `ancestor` on the second operand's path, or `None`
    /// when the second operand is the ancestor itself.
    pub branch_b: Option<PathHandle>,
}

/// Static schema tree for one trait type.
///
/// Built once via [`SchemaBuilder`] and shared between every instance of
/// the trait. Dictionary nodes may not have static children; their
/// elements are addressed with [`PathHandle::dictionary_element`].
#[derive(Debug, Clone)]
pub struct PropertySchema {
    nodes: Vec<Option<Node>>,
}

impl PropertySchema {
    /// Start building a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Check whether the handle addresses a node of this schema.
    #[must_use]
    pub fn contains(&self, handle: PathHandle) -> bool {
        let Some(node) = self.node(handle.schema_id()) else {
            return false;
        };
        // A keyed handle is only valid on a dictionary node.
        handle.dictionary_key().is_none() || node.dictionary
    }

    /// Get the parent of a node, or `None` for the root and for handles
    /// outside the schema.
    #[must_use]
    pub fn parent(&self, handle: PathHandle) -> Option<PathHandle> {
        if !self.contains(handle) || handle.is_root() {
            return None;
        }
        if handle.dictionary_key().is_some() {
            return Some(handle.without_key());
        }
        let node = self.node(handle.schema_id())?;
        Some(PathHandle::from_schema(node.parent))
    }

    /// Check whether `handle` addresses a dictionary-valued node.
    ///
    /// A dictionary *element* is not itself a dictionary.
    #[must_use]
    pub fn is_dictionary(&self, handle: PathHandle) -> bool {
        handle.dictionary_key().is_none()
            && self.node(handle.schema_id()).is_some_and(|n| n.dictionary)
    }

    /// Check whether `ancestor` is a strict ancestor of `descendant`.
    #[must_use]
    pub fn is_parent(&self, descendant: PathHandle, ancestor: PathHandle) -> bool {
        let mut cursor = self.parent(descendant);
        while let Some(node) = cursor {
            if node == ancestor {
                return true;
            }
            cursor = self.parent(node);
        }
        false
    }

    /// Compute the lowest common ancestor of two nodes.
    ///
    /// Returns `None` if either handle is outside the schema; two valid
    /// handles always share at least the root.
    #[must_use]
    pub fn lowest_common_ancestor(&self, a: PathHandle, b: PathHandle) -> Option<Lca> {
        let chain_a = self.chain_from_root(a)?;
        let chain_b = self.chain_from_root(b)?;

        let mut common = 0;
        while common < chain_a.len() && common < chain_b.len() && chain_a[common] == chain_b[common]
        {
            common += 1;
        }
        if common == 0 {
            return None;
        }

        Some(Lca {
            ancestor: chain_a[common - 1],
            branch_a: chain_a.get(common).copied(),
            branch_b: chain_b.get(common).copied(),
        })
    }

    fn node(&self, schema_id: u16) -> Option<Node> {
        self.nodes.get(schema_id as usize).copied().flatten()
    }

    /// Path from the root down to `handle`, inclusive.
    fn chain_from_root(&self, handle: PathHandle) -> Option<Vec<PathHandle>> {
        if !self.contains(handle) || handle.is_none() {
            return None;
        }
        let mut chain = vec![handle];
        let mut cursor = handle;
        while let Some(parent) = self.parent(cursor) {
            chain.push(parent);
            cursor = parent;
        }
        debug_assert!(chain.last().is_some_and(|h| h.is_root()));
        chain.reverse();
        Some(chain)
    }
}

/// Builder for [`PropertySchema`].
///
/// Nodes must be declared parent-first, which keeps the tree acyclic by
/// construction.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entries: Vec<(u16, u16, bool)>,
}

impl SchemaBuilder {
    /// Create a builder; the root node is implicit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a structure or leaf node under `parent`.
    #[must_use]
    pub fn node(mut self, id: u16, parent: u16) -> Self {
        self.entries.push((id, parent, false));
        self
    }

    /// Declare a dictionary-valued node under `parent`.
    #[must_use]
    pub fn dictionary(mut self, id: u16, parent: u16) -> Self {
        self.entries.push((id, parent, true));
        self
    }

    /// Validate and build the schema.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] on reserved/duplicate ids, unknown
    /// parents, or children declared under a dictionary node.
    pub fn build(self) -> Result<PropertySchema, ConfigError> {
        let max_id = self.entries.iter().map(|&(id, _, _)| id).max().unwrap_or(1);
        let mut nodes: Vec<Option<Node>> = vec![None; max_id as usize + 1];
        nodes[PathHandle::ROOT.schema_id() as usize] =
            Some(Node { parent: 0, dictionary: false });

        for (id, parent, dictionary) in self.entries {
            if id <= PathHandle::ROOT.schema_id() {
                return Err(ConfigError::new("schema node", format!("id {id} is reserved")));
            }
            if nodes[id as usize].is_some() {
                return Err(ConfigError::new("schema node", format!("duplicate id {id}")));
            }
            match nodes.get(parent as usize).copied().flatten() {
                None => {
                    return Err(ConfigError::new(
                        "schema node",
                        format!("node {id} declared under unknown parent {parent}"),
                    ));
                },
                Some(p) if p.dictionary => {
                    return Err(ConfigError::new(
                        "schema node",
                        format!("node {id} declared under dictionary node {parent}"),
                    ));
                },
                Some(_) => {},
            }
            nodes[id as usize] = Some(Node { parent, dictionary });
        }

        Ok(PropertySchema { nodes })
    }
}

/// One published trait instance: its schema, a monotonically increasing
/// version, and the root-dirty escalation flag.
#[derive(Debug, Clone)]
pub struct TraitInstance {
    schema: Arc<PropertySchema>,
    version: u64,
    root_dirty: bool,
}

impl TraitInstance {
    /// Create a new instance at version 0.
    #[must_use]
    pub fn new(schema: Arc<PropertySchema>) -> Self {
        Self { schema, version: 0, root_dirty: false }
    }

    /// Get the instance's schema.
    #[must_use]
    pub fn schema(&self) -> &PropertySchema {
        &self.schema
    }

    /// Current data version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record a mutation, returning the new version.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Whether the whole instance is marked dirty.
    ///
    /// Root-dirty subsumes any granular dirty paths: the next
    /// synchronization resends the entire instance.
    #[must_use]
    pub fn is_root_dirty(&self) -> bool {
        self.root_dirty
    }

    /// Mark the whole instance dirty.
    pub fn set_root_dirty(&mut self) {
        self.root_dirty = true;
    }

    /// Clear the root-dirty flag.
    pub fn clear_root_dirty(&mut self) {
        self.root_dirty = false;
    }
}

/// Fixed table of published trait instances, indexed by [`TraitHandle`].
#[derive(Debug)]
pub struct TraitCatalog {
    instances: Vec<Option<TraitInstance>>,
}

impl TraitCatalog {
    /// Create a catalog with room for `capacity` instances.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { instances: vec![None; capacity] }
    }

    /// Publish an instance into the first free slot.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the catalog is full.
    pub fn publish(&mut self, schema: Arc<PropertySchema>) -> Result<TraitHandle, ConfigError> {
        let slot = self
            .instances
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| ConfigError::new("trait catalog", "no free slots"))?;
        self.instances[slot] = Some(TraitInstance::new(schema));
        #[allow(clippy::cast_possible_truncation)]
        Ok(TraitHandle::new(slot as u16))
    }

    /// Look up an instance.
    #[must_use]
    pub fn get(&self, handle: TraitHandle) -> Option<&TraitInstance> {
        self.instances.get(handle.index()).and_then(Option::as_ref)
    }

    /// Look up an instance mutably.
    #[must_use]
    pub fn get_mut(&mut self, handle: TraitHandle) -> Option<&mut TraitInstance> {
        self.instances.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Iterate over published instances.
    pub fn iter(&self) -> impl Iterator<Item = (TraitHandle, &TraitInstance)> {
        self.instances.iter().enumerate().filter_map(|(i, slot)| {
            #[allow(clippy::cast_possible_truncation)]
            slot.as_ref().map(|inst| (TraitHandle::new(i as u16), inst))
        })
    }

    /// Iterate over published instances mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (TraitHandle, &mut TraitInstance)> {
        self.instances.iter_mut().enumerate().filter_map(|(i, slot)| {
            #[allow(clippy::cast_possible_truncation)]
            slot.as_mut().map(|inst| (TraitHandle::new(i as u16), inst))
        })
    }

    /// Number of published instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.iter().filter(|s| s.is_some()).count()
    }

    /// Check whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for TraitCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraitCatalog({}/{} published)", self.len(), self.instances.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root(1) -> s(2) -> { x(3), y(4), z(5) }, root -> w(6),
    /// root -> dict(7) (dictionary)
    fn test_schema() -> PropertySchema {
        PropertySchema::builder()
            .node(2, 1)
            .node(3, 2)
            .node(4, 2)
            .node(5, 2)
            .node(6, 1)
            .dictionary(7, 1)
            .build()
            .unwrap()
    }

    fn h(id: u16) -> PathHandle {
        PathHandle::from_schema(id)
    }

    #[test]
    fn test_builder_rejects_bad_trees() {
        assert!(PropertySchema::builder().node(1, 1).build().is_err());
        assert!(PropertySchema::builder().node(2, 1).node(2, 1).build().is_err());
        assert!(PropertySchema::builder().node(2, 9).build().is_err());
        // No static children under a dictionary.
        assert!(PropertySchema::builder().dictionary(2, 1).node(3, 2).build().is_err());
    }

    #[test]
    fn test_parent_chain() {
        let schema = test_schema();
        assert_eq!(schema.parent(h(3)), Some(h(2)));
        assert_eq!(schema.parent(h(2)), Some(PathHandle::ROOT));
        assert_eq!(schema.parent(PathHandle::ROOT), None);

        let elem = PathHandle::dictionary_element(h(7), 4);
        assert_eq!(schema.parent(elem), Some(h(7)));
    }

    #[test]
    fn test_contains_and_dictionary() {
        let schema = test_schema();
        assert!(schema.contains(h(3)));
        assert!(!schema.contains(h(99)));
        assert!(schema.is_dictionary(h(7)));
        assert!(!schema.is_dictionary(h(2)));

        let elem = PathHandle::dictionary_element(h(7), 0);
        assert!(schema.contains(elem));
        assert!(!schema.is_dictionary(elem));
        // Keyed handle on a non-dictionary node is invalid.
        assert!(!schema.contains(PathHandle::dictionary_element(h(2), 0)));
    }

    #[test]
    fn test_is_parent_is_strict() {
        let schema = test_schema();
        assert!(schema.is_parent(h(3), h(2)));
        assert!(schema.is_parent(h(3), PathHandle::ROOT));
        assert!(!schema.is_parent(h(3), h(3)));
        assert!(!schema.is_parent(h(2), h(3)));
    }

    #[test]
    fn test_lca_siblings() {
        let schema = test_schema();
        let lca = schema.lowest_common_ancestor(h(3), h(4)).unwrap();
        assert_eq!(lca.ancestor, h(2));
        assert_eq!(lca.branch_a, Some(h(3)));
        assert_eq!(lca.branch_b, Some(h(4)));
    }

    #[test]
    fn test_lca_across_subtrees() {
        let schema = test_schema();
        let lca = schema.lowest_common_ancestor(h(3), h(6)).unwrap();
        assert_eq!(lca.ancestor, PathHandle::ROOT);
        assert_eq!(lca.branch_a, Some(h(2)));
        assert_eq!(lca.branch_b, Some(h(6)));
    }

    #[test]
    fn test_lca_ancestor_operand() {
        let schema = test_schema();
        let lca = schema.lowest_common_ancestor(h(2), h(4)).unwrap();
        assert_eq!(lca.ancestor, h(2));
        assert_eq!(lca.branch_a, None);
        assert_eq!(lca.branch_b, Some(h(4)));

        let lca = schema.lowest_common_ancestor(h(4), h(4)).unwrap();
        assert_eq!(lca.ancestor, h(4));
        assert_eq!(lca.branch_a, None);
        assert_eq!(lca.branch_b, None);
    }

    #[test]
    fn test_lca_dictionary_elements() {
        let schema = test_schema();
        let e1 = PathHandle::dictionary_element(h(7), 1);
        let e2 = PathHandle::dictionary_element(h(7), 2);
        let lca = schema.lowest_common_ancestor(e1, e2).unwrap();
        assert_eq!(lca.ancestor, h(7));
        assert_eq!(lca.branch_a, Some(e1));
        assert_eq!(lca.branch_b, Some(e2));
    }

    #[test]
    fn test_catalog_publish_and_lookup() {
        let schema = Arc::new(test_schema());
        let mut catalog = TraitCatalog::new(2);
        let t0 = catalog.publish(Arc::clone(&schema)).unwrap();
        let t1 = catalog.publish(Arc::clone(&schema)).unwrap();
        assert_ne!(t0, t1);
        assert!(catalog.publish(schema).is_err());

        assert_eq!(catalog.get(t0).unwrap().version(), 0);
        catalog.get_mut(t0).unwrap().bump_version();
        assert_eq!(catalog.get(t0).unwrap().version(), 1);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_root_dirty_flag() {
        let schema = Arc::new(test_schema());
        let mut instance = TraitInstance::new(schema);
        assert!(!instance.is_root_dirty());
        instance.set_root_dirty();
        assert!(instance.is_root_dirty());
        instance.clear_root_dirty();
        assert!(!instance.is_root_dirty());
    }
}
