// SPDX-License-Identifier: Apache-2.0

//! §9 "Back-references in the packet chain": a captured packet carries
//! a weak reference to its originating source rather than a raw
//! pointer, so the out-of-scope packet-processing chain can demangle
//! link-layer specifics without creating a cycle with the source
//! table, and survives source removal gracefully.

use crate::source::{PacketSource, SourceId};

/// A packet chain's weak reference to the source that captured it.
/// Resolved through a [`ChainResolver`], never dereferenced directly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceRef(SourceId);

impl SourceRef {
    #[must_use]
    pub fn new(id: SourceId) -> Self {
        SourceRef(id)
    }

    #[must_use]
    pub fn id(&self) -> SourceId {
        self.0
    }
}

/// Implemented by whatever owns the live `SourceTable` (the core
/// itself, in practice) so the packet chain — an out-of-scope
/// collaborator per spec.md §1 — can turn a [`SourceRef`] back into a
/// `&PacketSource` without holding one directly.
pub trait ChainResolver {
    /// Resolve a back-reference. Returns `None` once the source has
    /// been removed — the chain's documented behavior on a miss is
    /// "unknown, drop", not a panic.
    fn resolve(&self, source_ref: SourceRef) -> Option<&PacketSource>;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::SourceTable;

    struct TableResolver<'a>(&'a SourceTable);

    impl ChainResolver for TableResolver<'_> {
        fn resolve(&self, source_ref: SourceRef) -> Option<&PacketSource> {
            self.0.get(source_ref.id())
        }
    }

    #[test]
    fn unknown_source_ref_resolves_to_none() {
        let table = SourceTable::new();
        let resolver = TableResolver(&table);
        assert!(resolver.resolve(SourceRef::new(SourceId::new(99))).is_none());
    }
}
