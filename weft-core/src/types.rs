//! Common identifier types used throughout the Weft system.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle identifying one published trait instance in a [`crate::schema::TraitCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TraitHandle(pub u16);

impl TraitHandle {
    /// Create a new trait handle.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw handle value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Get the handle as a catalog table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TraitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for TraitHandle {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Handle identifying one node inside a trait's property tree.
///
/// The low 16 bits hold the schema node id; the high 16 bits hold a
/// dictionary key biased by one (zero means "no key"). Two values are
/// reserved: [`PathHandle::NONE`] (absent) and [`PathHandle::ROOT`]
/// (the whole trait instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathHandle(u32);

impl PathHandle {
    /// The absent path handle.
    pub const NONE: Self = Self(0);

    /// The root of the property tree (the whole trait instance).
    pub const ROOT: Self = Self(1);

    /// Create a handle for a static schema node.
    #[must_use]
    pub const fn from_schema(node: u16) -> Self {
        Self(node as u32)
    }

    /// Create a handle for one element of a dictionary-valued node.
    ///
    /// Keys are limited to `0..u16::MAX` (the top key value is reserved
    /// by the bias encoding).
    #[must_use]
    pub const fn dictionary_element(dictionary: Self, key: u16) -> Self {
        debug_assert!(key < u16::MAX);
        Self((dictionary.0 & 0xFFFF) | ((key as u32 + 1) << 16))
    }

    /// Get the schema node id portion of this handle.
    #[must_use]
    pub const fn schema_id(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Get the dictionary key, if this handle addresses a dictionary element.
    #[must_use]
    pub const fn dictionary_key(self) -> Option<u16> {
        match self.0 >> 16 {
            0 => None,
            biased => Some((biased - 1) as u16),
        }
    }

    /// Drop the dictionary-key portion, leaving the static node handle.
    #[must_use]
    pub const fn without_key(self) -> Self {
        Self(self.0 & 0xFFFF)
    }

    /// Check whether this is the absent handle.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Check whether this handle addresses the whole trait instance.
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == 1
    }

    /// Get the raw encoded value (for wire serialization).
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Reconstruct a handle from its raw encoded value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for PathHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dictionary_key() {
            Some(key) => write!(f, "{}[{}]", self.schema_id(), key),
            None => write!(f, "{}", self.schema_id()),
        }
    }
}

/// One node inside one published trait instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraitPath {
    /// The owning trait instance.
    pub trait_handle: TraitHandle,
    /// The node within the trait's property tree.
    pub path: PathHandle,
}

impl TraitPath {
    /// Create a new trait path.
    #[must_use]
    pub const fn new(trait_handle: TraitHandle, path: PathHandle) -> Self {
        Self { trait_handle, path }
    }
}

impl fmt::Display for TraitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trait_handle, self.path)
    }
}

/// Retention priority tier for events and telemetry.
///
/// Higher importance data is retained longer and evicted last, so
/// `Production` compares greater than `Info`, which compares greater
/// than `Debug`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum Importance {
    /// Diagnostic events, shortest retention.
    #[default]
    Debug = 0,
    /// Operational events.
    Info = 1,
    /// Business-critical events, longest retention.
    Production = 2,
}

impl Importance {
    /// Number of importance tiers.
    pub const COUNT: usize = 3;

    /// All tiers in descending priority order (most important first).
    #[must_use]
    pub const fn by_priority() -> [Self; Self::COUNT] {
        [Self::Production, Self::Info, Self::Debug]
    }

    /// All tiers in ascending priority order (least important first).
    #[must_use]
    pub const fn ascending() -> [Self; Self::COUNT] {
        [Self::Debug, Self::Info, Self::Production]
    }

    /// Get the tier as a dense array index.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Get the wire representation of this tier.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a tier from its wire representation.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Debug),
            1 => Some(Self::Info),
            2 => Some(Self::Production),
            _ => None,
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Identifier of one logged event within an importance tier.
///
/// Ids are vended by a per-tier monotonic counter and never reused.
/// [`EventId::NONE`] is the sentinel returned for events that were
/// filtered out before an id was consumed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventId(pub u64);

impl EventId {
    /// Sentinel for "no event was logged".
    pub const NONE: Self = Self(0);

    /// Create a new event id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check whether this is the sentinel id.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Event timestamp in milliseconds.
///
/// Stored absolute; delta-encoded on the wire per fetch pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a new timestamp from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since an earlier timestamp, saturating at zero.
    #[must_use]
    pub const fn delta_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Identifier of one active subscription.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    /// Create a new subscription id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_handle_schema_only() {
        let h = PathHandle::from_schema(7);
        assert_eq!(h.schema_id(), 7);
        assert_eq!(h.dictionary_key(), None);
        assert!(!h.is_none());
        assert!(!h.is_root());
    }

    #[test]
    fn test_path_handle_dictionary_element() {
        let dict = PathHandle::from_schema(12);
        let elem = PathHandle::dictionary_element(dict, 0);
        assert_eq!(elem.schema_id(), 12);
        assert_eq!(elem.dictionary_key(), Some(0));
        assert_eq!(elem.without_key(), dict);

        let elem = PathHandle::dictionary_element(dict, 41);
        assert_eq!(elem.dictionary_key(), Some(41));
        assert_ne!(elem, PathHandle::dictionary_element(dict, 42));
    }

    #[test]
    fn test_path_handle_raw_round_trip() {
        let elem = PathHandle::dictionary_element(PathHandle::from_schema(3), 9);
        assert_eq!(PathHandle::from_raw(elem.raw()), elem);
    }

    #[test]
    fn test_reserved_handles() {
        assert!(PathHandle::NONE.is_none());
        assert!(PathHandle::ROOT.is_root());
        assert_ne!(PathHandle::NONE, PathHandle::ROOT);
    }

    #[test]
    fn test_importance_ordering() {
        assert!(Importance::Production > Importance::Info);
        assert!(Importance::Info > Importance::Debug);
        assert_eq!(Importance::by_priority()[0], Importance::Production);
        assert_eq!(Importance::ascending()[0], Importance::Debug);
    }

    #[test]
    fn test_importance_wire_round_trip() {
        for imp in Importance::ascending() {
            assert_eq!(Importance::from_u8(imp.as_u8()), Some(imp));
        }
        assert_eq!(Importance::from_u8(9), None);
    }

    #[test]
    fn test_event_id_sentinel() {
        assert!(EventId::NONE.is_none());
        assert!(!EventId::new(1).is_none());
        assert_eq!(EventId::new(1).next(), EventId::new(2));
    }

    #[test]
    fn test_timestamp_delta() {
        let a = Timestamp::from_millis(1_000);
        let b = Timestamp::from_millis(1_750);
        assert_eq!(b.delta_since(a), 750);
        assert_eq!(a.delta_since(b), 0);
    }
}
