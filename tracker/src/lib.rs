// SPDX-License-Identifier: Apache-2.0

//! The packet-source tracker core: channel-list registry, proto-source
//! registry, packet-source table, hop scheduler, IPC bridge, and poll
//! integrator, wired together behind one [`Tracker`] that either side
//! of the privilege boundary constructs with its own [`ipc::Role`].
//!
//! §2's component split is kept as separate modules (`chanlist`,
//! `proto`, `source`, `scheduler`, `bridge`, `poll`) so each can be
//! tested against its own invariants in isolation; `Tracker` is the
//! thin orchestration layer spec.md §2's "control flow" paragraph
//! describes, not a restatement of their logic.

pub mod bridge;
pub mod chain;
pub mod chanlist;
pub mod driver;
pub mod error;
pub mod events;
pub mod options;
pub mod poll;
pub mod proto;
pub mod scheduler;
pub mod snapshot;
pub mod source;

pub use bridge::{Bridge, DispatchOutcome};
pub use chain::{ChainResolver, SourceRef};
pub use chanlist::ChannelListRegistry;
pub use driver::{DriverHandle, StubDriver};
pub use error::{DriverError, ProtoSourceError, SourceConfigError};
pub use events::{Event, Observers};
pub use ipc::Role;
pub use options::{parse_source_line, OptionBag};
pub use poll::PollIntegrator;
pub use proto::{ProtoRegistry, ProtoSource};
pub use scheduler::{HopScheduler, ReportBoundary, SLICES_PER_SEC};
pub use snapshot::SourceSnapshot;
pub use source::{PacketSource, SourceDefaults, SourceId, SourceMode, SourceTable};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument};

/// Process-wide "give up" flag (spec.md §6, "a fatal configuration
/// error sets the process-wide fatal flag"). `Clone`d freely; every
/// clone observes the same underlying flag.
#[derive(Clone, Debug, Default)]
pub struct FatalFlag(Arc<AtomicBool>);

impl FatalFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The core, fully wired: both the Server and the Helper construct one
/// of these, differing only in `role` — per §9's "dual-role code path"
/// design note, gating happens inside [`Bridge`] and this type, not by
/// having two separate orchestration structs.
pub struct Tracker {
    role: Role,
    chanlists: ChannelListRegistry,
    protos: ProtoRegistry,
    sources: SourceTable,
    scheduler: HopScheduler,
    observers: Observers,
    bridge: Bridge,
    poll: PollIntegrator,
    fatal: FatalFlag,
    defaults: SourceDefaults,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("role", &self.role)
            .field("sources", &self.sources.len())
            .field("chanlists", &self.chanlists.len())
            .field("fatal", &self.fatal.is_set())
            .finish_non_exhaustive()
    }
}

impl Tracker {
    /// Build a fresh core for one side of the privilege boundary.
    /// `defaults` carries the resolved `default_channel_rate` /
    /// `default_channel_dwell` pair from `pst-config`.
    pub fn new(role: Role, defaults: SourceDefaults) -> Result<Self, ipc::RegistryError> {
        Ok(Tracker {
            role,
            chanlists: ChannelListRegistry::new(),
            protos: ProtoRegistry::new(),
            sources: SourceTable::new(),
            scheduler: HopScheduler::with_slices_per_sec(defaults.slices_per_sec),
            observers: Observers::new(),
            bridge: Bridge::new(role)?,
            poll: PollIntegrator::new(),
            fatal: FatalFlag::new(),
            defaults,
        })
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn fatal_flag(&self) -> FatalFlag {
        self.fatal.clone()
    }

    pub fn register_observer(&mut self, callback: impl FnMut(&Event) + 'static) {
        self.observers.register(callback);
    }

    /// Register a capture-source type (§4.B). Only meaningful on the
    /// side that owns drivers directly; the helper calls this for its
    /// own real protos, the server for `local_only` ones it opens
    /// itself (e.g. a pcap-file replay source).
    pub fn register_proto(&mut self, proto: ProtoSource) -> Result<(), ProtoSourceError> {
        self.protos.register(proto)
    }

    /// Register a channel list from a `name:ch[:dwell],…` spec (§4.A).
    /// Queues the matching `SOURCEADDCHAN` the first time any source
    /// references it; see [`Bridge::queue_source_add`].
    pub fn add_channel_list(&mut self, spec: &str) -> radio::ChannelListId {
        self.chanlists.add_from_spec(spec)
    }

    /// §4.C `add_source`, plus the role-gated IPC side effect: a
    /// non-`local_only` source added on the Server is queued as
    /// `SOURCEADDCHAN` (if needed) + `SOURCEADD` for the helper.
    #[instrument(skip(self, strong_driver), fields(role = ?self.role))]
    pub fn add_source(
        &mut self,
        source_line: &str,
        strong_driver: Option<Box<dyn DriverHandle>>,
    ) -> Result<SourceId, SourceConfigError> {
        let id = self.sources.add_source(
            source_line,
            &self.protos,
            &self.chanlists,
            self.defaults,
            strong_driver,
            &mut self.observers,
        )?;
        if let Some(source) = self.sources.get(id) {
            self.bridge.queue_source_add(source, &self.chanlists);
        }
        Ok(id)
    }

    /// §4.D "split-offset assignment". Call once configuration intake
    /// has finished adding sources.
    pub fn assign_split_offsets(&mut self) {
        scheduler::assign_split_offsets(&mut self.sources, &self.chanlists, &mut self.observers);
    }

    /// §4.C `remove_source`, plus the matching `SOURCEREMOVE` queue on
    /// the Server side.
    pub fn remove_source(&mut self, id: SourceId) -> bool {
        if let Some(source) = self.sources.get(id) {
            self.bridge.queue_source_remove(source);
        }
        self.sources.remove_source(id, &mut self.observers)
    }

    /// Start (or stop) a source's driver.
    ///
    /// S5 — privilege deferral: on the Server, if the source's proto
    /// requires root and this process isn't running as root, the
    /// driver is never opened locally; a `SOURCERUN` is queued for the
    /// helper instead and this returns `Ok(())` without touching the
    /// driver.
    pub fn start_source(&mut self, id: SourceId, start: bool) -> Result<(), SourceConfigError> {
        let defer_to_helper = self.role == Role::Server
            && start
            && self.sources.get(id).is_some_and(|source| !source.local_only)
            && self
                .sources
                .get(id)
                .and_then(|source| self.protos.get(&source.proto_ref))
                .is_some_and(|proto| proto.requires_root)
            && !running_as_root();

        if defer_to_helper {
            if let Some(source) = self.sources.get(id) {
                self.bridge.queue_source_run(source, start);
                info!(%id, "deferring source start to helper (unprivileged, root-requiring proto)");
            }
            return Ok(());
        }

        let Some(source) = self.sources.get_mut(id) else {
            return Ok(());
        };
        if start {
            source
                .driver
                .enable_monitor()
                .and_then(|()| source.driver.open())
                .map_err(SourceConfigError::from)?;
        } else {
            source.driver.close();
        }
        if self.role == Role::Server && !source.local_only {
            self.bridge.queue_source_run(source, start);
        }
        Ok(())
    }

    /// Advance the hop scheduler by one slice (§4.D). On the Helper,
    /// every report boundary is turned into a queued `SOURCEREPORT`.
    #[instrument(skip(self))]
    pub fn tick(&mut self) -> Vec<ReportBoundary> {
        let reports = self
            .scheduler
            .tick(&mut self.sources, &self.chanlists, &mut self.observers);
        if self.role == Role::Helper {
            for report in &reports {
                if let Some(source) = self.sources.get(report.id) {
                    self.bridge.queue_source_report(
                        source,
                        report.hop_elapsed.as_secs() as u32,
                        report.hop_elapsed.subsec_micros(),
                    );
                }
            }
        }
        reports
    }

    /// Apply one inbound IPC frame to live state (§4.E dispatch).
    pub fn dispatch_inbound(&mut self, frame: &ipc::Frame) -> DispatchOutcome {
        self.bridge.dispatch(
            frame,
            &mut self.sources,
            &mut self.chanlists,
            &self.protos,
            self.defaults,
            &mut self.observers,
        )
    }

    /// Take every frame queued since the last drain (outbound IPC).
    pub fn drain_outbox(&mut self) -> Vec<ipc::Frame> {
        self.bridge.drain_outbox()
    }

    /// Queue the server's one-time ack that configuration intake is
    /// complete (spec.md §4.E `SYNCCOMPLETE`), once the control socket
    /// is up. No-op on the Helper.
    pub fn queue_sync_complete(&mut self) {
        self.bridge.queue_sync_complete();
    }

    /// §4.F: fold live descriptors into `poll`, then collect whichever
    /// come back ready.
    pub fn merge_fds(&mut self, poll: &mio::Poll) -> std::io::Result<usize> {
        self.poll.merge_fds(poll, &self.sources)
    }

    pub fn poll_sources(
        &mut self,
        mio_poll: &mut mio::Poll,
        timeout: Option<std::time::Duration>,
    ) -> std::io::Result<Vec<SourceId>> {
        self.poll.poll(mio_poll, &mut self.sources, timeout)
    }

    /// §5 cancellation: from this point on, `merge_fds`/`poll_sources`
    /// are no-ops.
    pub fn spindown(&mut self) {
        self.poll.spindown();
    }

    #[must_use]
    pub fn sources(&self) -> &SourceTable {
        &self.sources
    }

    #[must_use]
    pub fn chanlists(&self) -> &ChannelListRegistry {
        &self.chanlists
    }

    /// The read-only snapshot spec.md §6 describes for external
    /// viewers, taken across every live source in insertion order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<SourceSnapshot> {
        self.sources.snapshot_all(&self.chanlists)
    }
}

impl ChainResolver for Tracker {
    fn resolve(&self, source_ref: SourceRef) -> Option<&PacketSource> {
        self.sources.get(source_ref.id())
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: geteuid() has no failure mode and takes no pointers.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use uuid::Uuid;

    fn defaults() -> SourceDefaults {
        SourceDefaults {
            rate: 3,
            dwell_seconds: 0,
            slices_per_sec: SLICES_PER_SEC,
        }
    }

    fn register_test_proto(tracker: &mut Tracker) {
        tracker
            .register_proto(ProtoSource {
                type_tag: radio::LowercaseName::new("test").unwrap(),
                probe: |_| true,
                factory: |interface, _| {
                    Ok(Box::new(StubDriver::new(Uuid::new_v4(), interface, "test")))
                },
                default_channellist: None,
                requires_root: false,
            })
            .unwrap();
    }

    #[test]
    fn server_queues_source_add_for_a_non_local_source() {
        let mut tracker = Tracker::new(Role::Server, defaults()).unwrap();
        register_test_proto(&mut tracker);
        let list_id = tracker.add_channel_list("w:1,6,11");
        let _ = list_id;
        let _id = tracker
            .add_source("wlan0:channellist=w,velocity=3", None)
            .unwrap();
        let frames = tracker.drain_outbox();
        // SOURCEADDCHAN (new list) then SOURCEADD.
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn local_only_source_never_touches_the_outbox() {
        let mut tracker = Tracker::new(Role::Server, defaults()).unwrap();
        register_test_proto(&mut tracker);
        let strong = Box::new(StubDriver::new(Uuid::new_v4(), "wlan9", "test"));
        let _id = tracker
            .add_source("wlan9:hop=false,channel=1", Some(strong))
            .unwrap();
        assert!(tracker.drain_outbox().is_empty());
    }

    #[test]
    fn fatal_flag_is_observable_after_set() {
        let tracker = Tracker::new(Role::Server, defaults()).unwrap();
        let flag = tracker.fatal_flag();
        assert!(!flag.is_set());
        flag.set();
        assert!(tracker.fatal_flag().is_set());
    }
}
