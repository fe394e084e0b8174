// SPDX-License-Identifier: Apache-2.0

//! Monotonic, never-reused, per-type identifiers.
//!
//! Every id-keyed record in this workspace (channel lists, packet
//! sources) is addressed by a 16-bit id that is allocated monotonically
//! starting at 1, with `0` reserved to mean "none" or "invalid". This
//! module factors that pattern out of the channel-list registry and the
//! packet-source table so both use the same type and the same
//! allocation discipline.

#![forbid(unsafe_code)]

use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// The reserved "no id" / "invalid id" sentinel shared by every [`Id<T>`].
pub const NONE: u16 = 0;

/// An id for a `T`, monotonically allocated by an [`IdSequence<T>`].
///
/// `Id::none()` (equivalently `Id::from(0)`) is a valid value used
/// throughout this workspace to mean "no id" — e.g. a [`PacketSource`]
/// that has not yet been assigned a channel list.
///
/// [`PacketSource`]: https://docs.rs/pst-tracker (not a real link; see `tracker::sources`)
#[repr(transparent)]
pub struct Id<T> {
    raw: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Wrap a raw id value. `0` is the reserved "none" sentinel.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Id {
            raw,
            _marker: PhantomData,
        }
    }

    /// The reserved "none" / "invalid" id.
    #[must_use]
    pub const fn none() -> Self {
        Id::new(NONE)
    }

    /// `true` if this is the reserved "none" id.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.raw == NONE
    }

    /// The raw `u16` value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.raw
    }
}

impl<T> From<u16> for Id<T> {
    fn from(raw: u16) -> Self {
        Id::new(raw)
    }
}

impl<T> From<Id<T>> for u16 {
    fn from(id: Id<T>) -> Self {
        id.raw
    }
}

// Manual impls throughout: `#[derive(...)]` would require `T: Trait`,
// but `Id<T>` never actually holds a `T` (it's a phantom tag), so the
// bound should not leak onto callers.

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Id({})", self.raw)
    }
}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.raw, f)
    }
}

#[cfg(feature = "serde")]
impl<T> serde::Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.raw)
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for Id<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u16::deserialize(deserializer).map(Id::new)
    }
}

/// A monotonic allocator of [`Id<T>`] values, starting at 1.
///
/// Each registry (the channel-list registry, the packet-source table)
/// owns one of these; ids are never reused within the registry's
/// lifetime, matching spec.md's source-id-uniqueness invariant.
#[derive(Debug)]
pub struct IdSequence<T> {
    next: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> IdSequence<T> {
    /// A fresh sequence; the first call to [`IdSequence::next_id`] returns `1`.
    #[must_use]
    pub const fn new() -> Self {
        IdSequence {
            next: 1,
            _marker: PhantomData,
        }
    }

    /// Allocate the next id, or `None` if the 16-bit space is exhausted
    /// (65535 live allocations in one process lifetime — not expected
    /// in practice, but handled rather than silently wrapping into a
    /// reused id).
    pub fn next_id(&mut self) -> Option<Id<T>> {
        if self.next == 0 {
            return None;
        }
        let id = Id::new(self.next);
        self.next = self.next.checked_add(1).unwrap_or(0);
        Some(id)
    }

    /// Bump the sequence so that future [`IdSequence::next_id`] calls
    /// never hand out `id` or anything before it.
    ///
    /// Used when an id is assigned by an external authority rather than
    /// by this sequence — e.g. the IPC bridge inserting a
    /// server-allocated id into the helper's own table (spec.md §4.E) —
    /// so the two allocators can't later collide on the same value.
    pub fn ensure_past(&mut self, id: Id<T>) {
        if self.next != 0 && id.raw >= self.next {
            self.next = id.raw.checked_add(1).unwrap_or(0);
        }
    }
}

impl<T> Default for IdSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Widget;

    #[test]
    fn starts_at_one() {
        let mut seq = IdSequence::<Widget>::new();
        assert_eq!(seq.next_id().unwrap().get(), 1);
        assert_eq!(seq.next_id().unwrap().get(), 2);
        assert_eq!(seq.next_id().unwrap().get(), 3);
    }

    #[test]
    fn none_is_zero() {
        assert!(Id::<Widget>::none().is_none());
        assert_eq!(Id::<Widget>::none().get(), 0);
        assert!(!Id::<Widget>::new(1).is_none());
    }

    #[test]
    fn ensure_past_bumps_future_allocations() {
        let mut seq = IdSequence::<Widget>::new();
        seq.ensure_past(Id::new(10));
        assert_eq!(seq.next_id().unwrap().get(), 11);
    }

    #[test]
    fn ensure_past_is_a_no_op_if_already_ahead() {
        let mut seq = IdSequence::<Widget>::new();
        let _ = seq.next_id(); // 1
        let _ = seq.next_id(); // 2
        seq.ensure_past(Id::new(1));
        assert_eq!(seq.next_id().unwrap().get(), 3);
    }

    #[test]
    fn ids_are_never_equal_to_a_different_value() {
        let mut seq = IdSequence::<Widget>::new();
        let a = seq.next_id().unwrap();
        let b = seq.next_id().unwrap();
        assert_ne!(a, b);
    }
}
