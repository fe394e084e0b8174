// SPDX-License-Identifier: Apache-2.0

//! The read-only snapshot spec.md §6 names under "Wire protocol to
//! external viewers": interface, type, username, current channel,
//! UUID, packet count, hopping flag, velocity, dwell, hop-elapsed, and
//! channel-list name. The actual STATUS/CARD wire encoding to remote
//! clients is an out-of-scope collaborator (§1); this module is the
//! seam the core exposes to it — one flat, owned struct derived from a
//! live [`PacketSource`] plus its resolved channel list name.

use crate::chanlist::ChannelListRegistry;
use crate::source::{PacketSource, SourceId, SourceMode, SourceTable};
use uuid::Uuid;

/// A point-in-time, owned copy of everything an external viewer needs
/// to render one capture source's status line. Deliberately flat and
/// `Clone` — unlike [`PacketSource`] it holds no driver handle and
/// outlives the source it was taken from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub id: SourceId,
    pub interface: String,
    pub type_tag: String,
    /// The original `kismet` `CARD` protocol's `username` field: the
    /// verbatim source definition the user typed, not an OS account
    /// name (see `original_source/packetsourcetracker.cc`'s
    /// `CARD_username`/`source_line` pairing).
    pub username: String,
    pub channel: u32,
    pub uuid: Uuid,
    pub packets: u64,
    pub hopping: bool,
    pub velocity: u32,
    pub dwell: u32,
    pub hop_elapsed: std::time::Duration,
    pub channel_list_name: Option<String>,
}

impl SourceSnapshot {
    fn from_source(source: &PacketSource, chanlists: &ChannelListRegistry) -> Self {
        let channel_list_name = chanlists
            .get(source.channel_list_id)
            .map(|list| list.name().as_str().to_string());
        SourceSnapshot {
            id: source.id,
            interface: source.driver.interface().to_string(),
            type_tag: source.proto_ref.as_str().to_string(),
            username: source.source_line.clone(),
            channel: source.channel_cursor,
            uuid: source.uuid,
            packets: source.packets,
            hopping: !matches!(source.mode, SourceMode::Locked(_)),
            velocity: source.rate,
            dwell: source.dwell_seconds,
            hop_elapsed: source.hop_elapsed,
            channel_list_name,
        }
    }
}

impl SourceTable {
    /// Take a [`SourceSnapshot`] of one live source, or `None` if `id`
    /// isn't (or is no longer) live.
    #[must_use]
    pub fn snapshot(&self, id: SourceId, chanlists: &ChannelListRegistry) -> Option<SourceSnapshot> {
        self.get(id).map(|source| SourceSnapshot::from_source(source, chanlists))
    }

    /// Snapshot every live source, in insertion order — the batch an
    /// external viewer's periodic STATUS/CARD refresh would send.
    pub fn snapshot_all(&self, chanlists: &ChannelListRegistry) -> Vec<SourceSnapshot> {
        self.iter()
            .map(|source| SourceSnapshot::from_source(source, chanlists))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::StubDriver;
    use crate::events::Observers;
    use crate::proto::{ProtoRegistry, ProtoSource};
    use crate::source::SourceDefaults;
    use radio::LowercaseName;

    fn protos() -> ProtoRegistry {
        let mut reg = ProtoRegistry::new();
        reg.register(ProtoSource {
            type_tag: LowercaseName::new("test").unwrap(),
            probe: |_| true,
            factory: |interface, _| Ok(Box::new(StubDriver::new(Uuid::new_v4(), interface, "test"))),
            default_channellist: None,
            requires_root: false,
        })
        .unwrap();
        reg
    }

    #[test]
    fn snapshot_reflects_live_source_state() {
        let mut sources = SourceTable::new();
        let mut observers = Observers::new();
        let protos = protos();
        let mut chanlists = ChannelListRegistry::new();
        chanlists.add_from_spec("w:1,6,11");

        let id = sources
            .add_source(
                "wlan0:channellist=w,velocity=3",
                &protos,
                &chanlists,
                SourceDefaults {
                    rate: 3,
                    dwell_seconds: 0,
                    slices_per_sec: 10,
                },
                None,
                &mut observers,
            )
            .unwrap();

        let snapshot = sources.snapshot(id, &chanlists).unwrap();
        assert_eq!(snapshot.interface, "wlan0");
        assert_eq!(snapshot.type_tag, "test");
        assert!(snapshot.hopping);
        assert_eq!(snapshot.velocity, 3);
        assert_eq!(snapshot.channel_list_name.as_deref(), Some("w"));
        assert_eq!(snapshot.packets, 0);
    }

    #[test]
    fn unknown_id_has_no_snapshot() {
        let sources = SourceTable::new();
        let chanlists = ChannelListRegistry::new();
        assert!(sources.snapshot(SourceId::new(99), &chanlists).is_none());
    }

    #[test]
    fn snapshot_all_is_insertion_ordered() {
        let mut sources = SourceTable::new();
        let mut observers = Observers::new();
        let protos = protos();
        let chanlists = ChannelListRegistry::new();

        let defaults = SourceDefaults {
            rate: 0,
            dwell_seconds: 0,
            slices_per_sec: 10,
        };
        let a = sources
            .add_source("wlan0:hop=false,channel=1", &protos, &chanlists, defaults, None, &mut observers)
            .unwrap();
        let b = sources
            .add_source("wlan1:hop=false,channel=6", &protos, &chanlists, defaults, None, &mut observers)
            .unwrap();

        let snapshots = sources.snapshot_all(&chanlists);
        assert_eq!(snapshots.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a, b]);
    }
}
