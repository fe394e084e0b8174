// SPDX-License-Identifier: Apache-2.0

//! 4.A Channel-list registry: named, id-keyed collections of
//! `(channel, dwell-weight)` pairs.

use id::IdSequence;
use ordermap::OrderMap;
use radio::{Channel, ChannelList, ChannelListId, LowercaseName};
use tracing::warn;

/// Named, id-keyed collection of channel lists.
///
/// `by_name` and `by_id` are kept in lockstep rather than folded into a
/// single `multi_index_map` table, because `upsert_from_ipc` needs to
/// replace a list's channel sequence in place while the name stays
/// fixed — a mutation shape `multi_index_map`'s generated accessors
/// don't model as cleanly as a plain pair of maps does here.
#[derive(Debug, Default)]
pub struct ChannelListRegistry {
    sequence: IdSequence<ChannelList>,
    by_id: OrderMap<ChannelListId, ChannelList>,
    by_name: OrderMap<LowercaseName, ChannelListId>,
}

impl ChannelListRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `spec` (spec.md §4.A grammar) and register it, returning
    /// the assigned id, or `Id::none()` on a parse failure (logged,
    /// never propagated — the caller decides whether a bad channel
    /// list spec is fatal).
    pub fn add_from_spec(&mut self, spec: &str) -> ChannelListId {
        let (name, channels) = match radio::parse_channel_list_spec(spec) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%spec, error = %err, "could not parse channel list spec");
                return ChannelListId::none();
            }
        };
        if let Some(&existing) = self.by_name.get(&name) {
            warn!(%name, "channel list name already registered, keeping first registration");
            return existing;
        }
        let Some(id) = self.sequence.next_id() else {
            warn!("channel list id space exhausted");
            return ChannelListId::none();
        };
        let list = ChannelList::new(id, name.clone(), channels);
        self.by_id.insert(id, list);
        self.by_name.insert(name, id);
        id
    }

    #[must_use]
    pub fn get(&self, id: ChannelListId) -> Option<&ChannelList> {
        self.by_id.get(&id)
    }

    #[must_use]
    pub fn find_by_name(&self, name: &LowercaseName) -> Option<ChannelListId> {
        self.by_name.get(name).copied()
    }

    /// Insert, or replace the channel sequence of an existing id,
    /// keeping any source's `channel_list_id` reference valid. This is
    /// only ever called with an id received from the authoritative
    /// side of the IPC bridge (spec.md §3, ChannelList invariant).
    pub fn upsert_from_ipc(&mut self, id: ChannelListId, name: LowercaseName, channels: Vec<Channel>) {
        if let Some(existing) = self.by_id.get_mut(&id) {
            existing.replace_channels(channels);
            return;
        }
        self.by_id.insert(id, ChannelList::new(id, name.clone(), channels));
        self.by_name.insert(name, id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_from_spec_assigns_monotonic_ids() {
        let mut reg = ChannelListRegistry::new();
        let a = reg.add_from_spec("ieee80211b:1,6,11");
        let b = reg.add_from_spec("ieee80211a:36,40");
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
    }

    #[test]
    fn bad_spec_returns_none_id() {
        let mut reg = ChannelListRegistry::new();
        assert!(reg.add_from_spec("no-colon-here").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn upsert_from_ipc_replaces_channels_in_place() {
        let mut reg = ChannelListRegistry::new();
        let id = reg.add_from_spec("w:1,6,11");
        let name = reg.get(id).unwrap().name().clone();
        reg.upsert_from_ipc(id, name, vec![Channel::new(36, 1).unwrap()]);
        assert_eq!(reg.get(id).unwrap().len(), 1);
    }

    #[test]
    fn find_by_name_is_lowercased() {
        let mut reg = ChannelListRegistry::new();
        let id = reg.add_from_spec("IEEE80211B:1,6,11");
        let name: LowercaseName = "ieee80211b".to_string().try_into().unwrap();
        assert_eq!(reg.find_by_name(&name), Some(id));
    }
}
