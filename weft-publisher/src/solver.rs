//! Graph-diffing dirty tracking.
//!
//! The solver records which property paths changed since the last
//! synchronization and, at retrieval time, folds them into the minimal
//! enclosing subtree: one data element rooted at the lowest common
//! ancestor of every dirty path, with the immediate children to merge
//! and the dictionary keys to delete. Wire semantics constrain the
//! merge set to immediate children of the common handle (first nesting
//! level merges, deeper levels replace).
//!
//! Both stores are fixed arena arrays. Overflow escalates the owning
//! trait to root-dirty and purges its entries; the next retrieval then
//! resends the whole instance.

use smallvec::SmallVec;
use tracing::{debug, trace};

use weft_core::schema::{Lca, PropertySchema, TraitCatalog, TraitInstance};
use weft_core::types::{PathHandle, TraitHandle, TraitPath};

use crate::builder::NotifyRequestBuilder;
use crate::config::SolverConfig;
use crate::error::{PublisherError, PublisherResult};
use crate::subscription::SubscriptionHandler;

/// Fixed-capacity set of trait paths with validity-flagged slots.
#[derive(Debug)]
pub struct DirtyStore {
    slots: Vec<Option<TraitPath>>,
    occupied: usize,
}

impl DirtyStore {
    /// Create a store with the given slot count.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![None; capacity], occupied: 0 }
    }

    /// Slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slot count.
    #[must_use]
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.occupied, self.slots.iter().filter(|s| s.is_some()).count());
        self.occupied
    }

    /// Check whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Check whether every slot is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.occupied == self.slots.len()
    }

    /// Check membership.
    #[must_use]
    pub fn contains(&self, entry: TraitPath) -> bool {
        self.slots.iter().any(|slot| *slot == Some(entry))
    }

    /// Insert an entry; returns false when the store is full.
    pub fn insert(&mut self, entry: TraitPath) -> bool {
        let Some(free) = self.slots.iter().position(Option::is_none) else {
            return false;
        };
        self.slots[free] = Some(entry);
        self.occupied += 1;
        true
    }

    /// Remove every entry matching the predicate; returns the count.
    pub fn remove_matching<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(TraitPath) -> bool,
    {
        let mut removed = 0;
        for slot in &mut self.slots {
            if slot.is_some_and(&mut predicate) {
                *slot = None;
                removed += 1;
            }
        }
        self.occupied -= removed;
        removed
    }

    /// Remove every entry belonging to a trait; returns the count.
    pub fn purge_trait(&mut self, trait_handle: TraitHandle) -> usize {
        self.remove_matching(|entry| entry.trait_handle == trait_handle)
    }

    /// Iterate the paths stored for one trait.
    pub fn entries_for(&self, trait_handle: TraitHandle) -> impl Iterator<Item = PathHandle> + '_ {
        self.slots.iter().filter_map(move |slot| match slot {
            Some(entry) if entry.trait_handle == trait_handle => Some(entry.path),
            _ => None,
        })
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.occupied = 0;
    }
}

/// The merge handle set of one data element.
///
/// `Unbounded` means "send every child of the common handle" — the
/// graceful degradation when the bounded set overflows or the common
/// handle itself is wholly dirty. Inserts against `Unbounded` are
/// no-ops by construction, so no candidate is ever compared against a
/// stale bounded set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MergeSet {
    /// Merge exactly these immediate children of the common handle.
    /// Empty means the element covers all children.
    Bounded(SmallVec<[PathHandle; 8]>),
    /// Send all children of the common handle.
    #[default]
    Unbounded,
}

impl MergeSet {
    /// Create an empty bounded set.
    #[must_use]
    pub fn new() -> Self {
        Self::Bounded(SmallVec::new())
    }

    /// Insert a handle, deduplicating; overflow degrades to `Unbounded`.
    pub fn insert(&mut self, handle: PathHandle, capacity: usize) {
        match self {
            Self::Unbounded => {},
            Self::Bounded(handles) => {
                if handles.contains(&handle) {
                    return;
                }
                if handles.len() >= capacity {
                    trace!(%handle, "merge set overflow, degrading to all children");
                    *self = Self::Unbounded;
                } else {
                    handles.push(handle);
                }
            },
        }
    }

    /// The bounded handles, or `None` when unbounded.
    #[must_use]
    pub fn handles(&self) -> Option<&[PathHandle]> {
        match self {
            Self::Bounded(handles) => Some(handles),
            Self::Unbounded => None,
        }
    }

    /// Whether the element covers every child of the common handle.
    #[must_use]
    pub fn covers_all_children(&self) -> bool {
        match self {
            Self::Bounded(handles) => handles.is_empty(),
            Self::Unbounded => true,
        }
    }
}

/// Root-dirty-only solver: the fallback that knows nothing finer than
/// "this instance changed". Also owns the subscriber-flag walk shared
/// with the granular solver.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicGraphSolver;

impl BasicGraphSolver {
    /// Mark a whole trait instance dirty.
    ///
    /// # Errors
    /// Returns [`PublisherError::UnknownTrait`] for unpublished handles.
    pub fn set_dirty(
        catalog: &mut TraitCatalog,
        subscriptions: &mut [Option<SubscriptionHandler>],
        trait_handle: TraitHandle,
    ) -> PublisherResult<()> {
        let instance = catalog
            .get_mut(trait_handle)
            .ok_or(PublisherError::UnknownTrait(trait_handle))?;
        instance.bump_version();
        instance.set_root_dirty();
        Self::mark_subscribers_dirty(subscriptions, trait_handle);
        Ok(())
    }

    /// Set the dirty flag on every active subscription's matching trait
    /// instance entries. Returns how many entries were marked.
    pub fn mark_subscribers_dirty(
        subscriptions: &mut [Option<SubscriptionHandler>],
        trait_handle: TraitHandle,
    ) -> usize {
        let mut marked = 0;
        for handler in subscriptions.iter_mut().flatten() {
            marked += handler.mark_trait_dirty(trait_handle);
        }
        marked
    }

    /// Clear the root-dirty flag on every published instance.
    pub fn clear_dirty(catalog: &mut TraitCatalog) {
        for (_, instance) in catalog.iter_mut() {
            instance.clear_root_dirty();
        }
    }
}

/// Granular solver: tracks dirty paths and dictionary deletions per
/// trait and computes the minimal LCA diff at retrieval time.
#[derive(Debug)]
pub struct IntermediateGraphSolver {
    config: SolverConfig,
    dirty: DirtyStore,
    deleted: DirtyStore,
}

impl IntermediateGraphSolver {
    /// Create a solver with the given store bounds.
    ///
    /// # Errors
    /// Returns an error when the configuration fails validation.
    pub fn new(config: SolverConfig) -> PublisherResult<Self> {
        config.validate()?;
        let dirty = DirtyStore::new(config.dirty_store_capacity);
        let deleted = DirtyStore::new(config.delete_store_capacity);
        Ok(Self { config, dirty, deleted })
    }

    /// Occupied dirty-store slots.
    #[must_use]
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Occupied delete-store slots.
    #[must_use]
    pub fn deleted_len(&self) -> usize {
        self.deleted.len()
    }

    /// Mark `path` of `trait_handle` changed.
    ///
    /// Escalates the instance to root-dirty when the store is full,
    /// purging its granular entries. The subscriber-flag walk always
    /// runs, whatever branch is taken.
    ///
    /// # Errors
    /// Returns [`PublisherError::UnknownTrait`] for unpublished handles.
    pub fn set_dirty(
        &mut self,
        catalog: &mut TraitCatalog,
        subscriptions: &mut [Option<SubscriptionHandler>],
        trait_handle: TraitHandle,
        path: PathHandle,
    ) -> PublisherResult<()> {
        let entry = TraitPath::new(trait_handle, path);
        let instance = catalog
            .get_mut(trait_handle)
            .ok_or(PublisherError::UnknownTrait(trait_handle))?;
        debug_assert!(instance.schema().contains(path), "dirty path must exist in the schema");
        instance.bump_version();

        if instance.is_root_dirty() {
            // Already maximally dirty.
        } else if self.dirty.contains(entry) {
            // Duplicate mark.
        } else if self.dirty.is_full() {
            self.escalate(instance, trait_handle);
        } else {
            if self.config.delete_store_capacity > 0 {
                let schema = instance.schema();
                // An add/modify supersedes a pending delete of the same
                // or an enclosing element.
                self.deleted.remove_matching(|pending| {
                    pending.trait_handle == trait_handle
                        && (pending.path == path || schema.is_parent(path, pending.path))
                });
            }
            let inserted = self.dirty.insert(entry);
            debug_assert!(inserted);
        }

        BasicGraphSolver::mark_subscribers_dirty(subscriptions, trait_handle);
        Ok(())
    }

    /// Record the deletion of a dictionary element.
    ///
    /// Symmetric to [`Self::set_dirty`]: duplicate and root-dirty marks
    /// are no-ops, a full delete store escalates, and a recorded delete
    /// purges pending modifications of the key or anything beneath it.
    ///
    /// # Errors
    /// Returns [`PublisherError::UnknownTrait`] for unpublished handles.
    pub fn delete_key(
        &mut self,
        catalog: &mut TraitCatalog,
        subscriptions: &mut [Option<SubscriptionHandler>],
        trait_handle: TraitHandle,
        path: PathHandle,
    ) -> PublisherResult<()> {
        let entry = TraitPath::new(trait_handle, path);
        let instance = catalog
            .get_mut(trait_handle)
            .ok_or(PublisherError::UnknownTrait(trait_handle))?;
        debug_assert!(path.dictionary_key().is_some(), "deletions address dictionary elements");
        debug_assert!(instance.schema().is_dictionary(path.without_key()));
        instance.bump_version();

        if self.config.delete_store_capacity == 0 {
            // Delete tracking disabled: the whole instance resyncs.
            if !instance.is_root_dirty() {
                self.escalate(instance, trait_handle);
            }
        } else if instance.is_root_dirty() {
            // Already maximally dirty.
        } else if self.deleted.contains(entry) {
            // Duplicate delete.
        } else if self.deleted.is_full() {
            self.escalate(instance, trait_handle);
        } else {
            let schema = instance.schema();
            self.dirty.remove_matching(|pending| {
                pending.trait_handle == trait_handle
                    && (pending.path == path || schema.is_parent(pending.path, path))
            });
            let inserted = self.deleted.insert(entry);
            debug_assert!(inserted);
        }

        BasicGraphSolver::mark_subscribers_dirty(subscriptions, trait_handle);
        Ok(())
    }

    /// Serialize the minimal diff for one trait instance into the
    /// builder's data list.
    ///
    /// With `retrieve_all` set, or when the instance is root-dirty, a
    /// single whole-instance element is written. Otherwise every stored
    /// dirty path and deletion for the trait is folded into one element
    /// under their lowest common ancestor.
    ///
    /// # Errors
    ///
    /// Propagates wire errors; out-of-space errors leave the builder
    /// rolled back to the element boundary (caller's checkpoint).
    ///
    /// # Panics
    ///
    /// Panics if invoked for a trait with no dirty state, or if the
    /// accumulated state breaks the solver's invariants (paths without a
    /// common ancestor, deletions under a non-dictionary handle). These
    /// are solver bugs, not runtime conditions.
    pub fn retrieve_trait_instance_data(
        &self,
        builder: &mut NotifyRequestBuilder,
        catalog: &TraitCatalog,
        trait_handle: TraitHandle,
        retrieve_all: bool,
    ) -> PublisherResult<()> {
        let instance =
            catalog.get(trait_handle).ok_or(PublisherError::UnknownTrait(trait_handle))?;
        if retrieve_all || instance.is_root_dirty() {
            builder.write_data_element(
                trait_handle,
                PathHandle::ROOT,
                instance.version(),
                &MergeSet::new(),
                &[],
                true,
            )?;
            return Ok(());
        }

        let schema = instance.schema();
        let mut diff = DiffAccumulator::new(
            schema,
            self.config.merge_set_capacity,
            self.config.delete_set_capacity,
        );
        let mut candidates = 0usize;
        for path in self.dirty.entries_for(trait_handle) {
            candidates += 1;
            diff.add_modification(path);
        }
        for path in self.deleted.entries_for(trait_handle) {
            candidates += 1;
            diff.add_deletion(path);
        }
        assert!(candidates > 0, "retrieval invoked for trait {trait_handle} with no dirty state");

        let common = diff.common.expect("candidates imply a common handle");
        if !diff.deletes.is_empty() {
            assert!(
                schema.is_dictionary(common),
                "deletions require a dictionary common handle"
            );
        }
        builder.write_data_element(
            trait_handle,
            common,
            instance.version(),
            &diff.merge,
            &diff.deletes,
            false,
        )?;
        Ok(())
    }

    /// Discard all granular and root-dirty state.
    ///
    /// Only call once every active subscription reports no further
    /// dirty trait instances; a slower subscriber still needs this
    /// state until then.
    pub fn clear_dirty(&mut self, catalog: &mut TraitCatalog) {
        BasicGraphSolver::clear_dirty(catalog);
        self.dirty.clear();
        self.deleted.clear();
        trace!("dirty state cleared at global quiescence");
    }

    fn escalate(&mut self, instance: &mut TraitInstance, trait_handle: TraitHandle) {
        let purged = self.dirty.purge_trait(trait_handle) + self.deleted.purge_trait(trait_handle);
        instance.set_root_dirty();
        debug!(%trait_handle, purged, "store overflow, trait escalated to root-dirty");
    }
}

/// Running state of one retrieval's LCA fold.
struct DiffAccumulator<'a> {
    schema: &'a PropertySchema,
    merge_capacity: usize,
    delete_capacity: usize,
    common: Option<PathHandle>,
    merge: MergeSet,
    deletes: SmallVec<[PathHandle; 4]>,
    downgraded: bool,
}

impl<'a> DiffAccumulator<'a> {
    fn new(schema: &'a PropertySchema, merge_capacity: usize, delete_capacity: usize) -> Self {
        Self {
            schema,
            merge_capacity,
            delete_capacity,
            common: None,
            merge: MergeSet::new(),
            deletes: SmallVec::new(),
            downgraded: false,
        }
    }

    fn add_modification(&mut self, path: PathHandle) {
        let Some(cur) = self.common else {
            // The first candidate IS the common handle: everything
            // under it is dirty, not just listed children.
            self.common = Some(path);
            self.collapse_onto_common(path);
            return;
        };
        if path == cur {
            self.collapse_onto_common(path);
            return;
        }
        let lca = self.lca(cur, path);
        if lca.ancestor != cur && !self.deletes.is_empty() {
            // The common handle is leaving the dictionary the
            // accumulated deletions hang off; fold them into a merge
            // first, then reprocess this candidate.
            self.downgrade_deletes();
            self.add_modification(path);
            return;
        }
        if path == lca.ancestor {
            // The candidate encloses the current common handle.
            self.common = Some(path);
            self.collapse_onto_common(path);
            return;
        }
        if lca.ancestor != cur {
            // The ancestor moved up: the accumulated set was relative to
            // a stale common handle. Reseed with the two lagging
            // branches; the branch holding the old common subsumes
            // whatever the old set held, bounded or not.
            self.merge = MergeSet::new();
            if let Some(branch) = lca.branch_a {
                self.merge.insert(branch, self.merge_capacity);
            }
            self.common = Some(lca.ancestor);
        }
        if let Some(branch) = lca.branch_b {
            self.merge.insert(branch, self.merge_capacity);
        }
    }

    fn add_deletion(&mut self, path: PathHandle) {
        let dictionary = self.deleted_dictionary(path);
        if self.downgraded {
            // Latched: deletions render as whole-dictionary replaces.
            self.add_modification(dictionary);
            return;
        }
        match self.common {
            None => {
                self.common = Some(dictionary);
                self.push_delete(path);
            },
            Some(cur) if cur == dictionary => {
                self.push_delete(path);
            },
            Some(_) => {
                // This deletion's dictionary diverges from the common
                // handle: everything accumulated downgrades, this one
                // included.
                self.downgrade_deletes();
                self.add_modification(dictionary);
            },
        }
    }

    fn collapse_onto_common(&mut self, path: PathHandle) {
        if self.schema.is_dictionary(path) {
            // A literal match on a dictionary handle renders as
            // "replace this dictionary" under its parent, never "merge
            // one element into it".
            let parent =
                self.schema.parent(path).expect("dictionary nodes always have a parent");
            self.common = Some(parent);
            self.merge = MergeSet::new();
            self.merge.insert(path, self.merge_capacity);
            // Pending deletions under it are subsumed by the replace.
            self.deletes.clear();
        } else {
            debug_assert!(
                self.deletes.is_empty(),
                "genuine deletions imply a dictionary common handle"
            );
            self.merge = MergeSet::Unbounded;
        }
    }

    fn push_delete(&mut self, path: PathHandle) {
        if self.deletes.contains(&path) {
            return;
        }
        if self.deletes.len() >= self.delete_capacity {
            let dictionary = self.deleted_dictionary(path);
            self.downgrade_deletes();
            self.add_modification(dictionary);
            return;
        }
        self.deletes.push(path);
    }

    /// One-way conversion of accumulated deletions into a
    /// replace-whole-dictionary merge entry under the dictionary's
    /// parent. Further deletions render as modifications.
    fn downgrade_deletes(&mut self) {
        self.downgraded = true;
        if self.deletes.is_empty() {
            return;
        }
        let dictionary = self.deleted_dictionary(self.deletes[0]);
        let parent =
            self.schema.parent(dictionary).expect("dictionary nodes always have a parent");
        self.deletes.clear();
        self.common = Some(parent);
        self.merge = MergeSet::new();
        self.merge.insert(dictionary, self.merge_capacity);
        trace!(%dictionary, "deletions downgraded to whole-dictionary replace");
    }

    fn deleted_dictionary(&self, path: PathHandle) -> PathHandle {
        debug_assert!(path.dictionary_key().is_some(), "deletions address dictionary elements");
        path.without_key()
    }

    fn lca(&self, a: PathHandle, b: PathHandle) -> Lca {
        self.schema.lowest_common_ancestor(a, b).unwrap_or_else(|| {
            panic!("dirty paths {a} and {b} share no ancestor; solver state is corrupt")
        })
    }
}
