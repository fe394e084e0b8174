// SPDX-License-Identifier: Apache-2.0

//! 4.C Packet-source table: the central `PacketSource` record and the
//! table that owns it, keyed by both 16-bit id and UUID.

use crate::driver::DriverHandle;
use crate::events::{Event, Observers};
use crate::error::SourceConfigError;
use crate::options::{parse_source_line, OptionBag};
use crate::proto::ProtoRegistry;
use derive_builder::Builder;
use id::Id;
use multi_index_map::MultiIndexMap;
use radio::{ChannelListId, LowercaseName};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Maximum consecutive channel-set failures before a source is closed
/// and marked errored (spec.md §4.D, §7 kind 3).
pub const MAX_CONSEC_CHAN_ERR: u32 = 5;

pub type SourceId = Id<PacketSource>;

/// The three channel-management modes of a source (§3, GLOSSARY).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceMode {
    /// Fixed on one channel; `rate`/`dwell_seconds` are ignored.
    Locked(u32),
    Hop,
    Dwell,
}

/// The central live-capture-source record (§3 `PacketSource`).
///
/// Not `Clone`/`Eq`/`Ord` at the struct level — `driver` is a trait
/// object and `hop_start`/the timers are mutated every scheduler tick,
/// so those derives (which the teacher's simpler, all-Copy
/// `multi_index_map` records pick up for free) don't apply here; only
/// the two indexed fields need their own trait bounds, which `Id<T>`
/// and `Uuid` already satisfy.
#[derive(Builder, Debug, MultiIndexMap)]
#[builder(pattern = "owned", build_fn(error = "PacketSourceBuilderError"))]
#[multi_index_derive(Debug)]
pub struct PacketSource {
    #[multi_index(hashed_unique)]
    pub id: SourceId,
    #[multi_index(hashed_unique)]
    pub uuid: Uuid,

    pub source_line: String,
    pub proto_ref: LowercaseName,
    pub driver: Box<dyn DriverHandle>,

    pub channel_list_id: ChannelListId,
    /// Index into the channel list's `channels` sequence.
    pub channel_position: usize,
    /// The channel number currently tuned (cache of
    /// `channels[channel_position].channel_number`, kept alongside the
    /// index so observers don't need the registry to read it).
    pub channel_cursor: u32,

    pub mode: SourceMode,
    pub rate: u32,
    pub dwell_seconds: u32,
    pub split: bool,

    pub rate_timer: i64,
    pub dwell_timer: i64,

    pub hop_start: Instant,
    #[builder(default)]
    pub hop_elapsed: Duration,

    #[builder(default)]
    pub consec_errors: u32,
    #[builder(default)]
    pub error: bool,
    #[builder(default)]
    pub local_only: bool,

    /// Running count of packets drained from this source's driver —
    /// the `CARD_packets` field of spec.md §6's read-only snapshot.
    #[builder(default)]
    pub packets: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("packet source builder: {0}")]
pub struct PacketSourceBuilderError(String);

impl From<derive_builder::UninitializedFieldError> for PacketSourceBuilderError {
    fn from(value: derive_builder::UninitializedFieldError) -> Self {
        PacketSourceBuilderError(value.to_string())
    }
}

impl PacketSource {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self.mode, SourceMode::Locked(_))
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.driver.descriptor() >= 0 && !self.error
    }

    /// Bump the packet counter. Called once per successful drain by the
    /// poll integrator (spec.md §6's `packets` snapshot field).
    pub fn record_packet(&mut self) {
        self.packets = self.packets.saturating_add(1);
    }
}

/// Default channel rate/dwell a newly-added source falls back to when
/// the source line doesn't override them (§4.C step 6, and the
/// `default_channel_rate`/`default_channel_dwell` mutual-fallback
/// pairing from the original that `pst-config::Defaults` implements).
#[derive(Copy, Clone, Debug)]
pub struct SourceDefaults {
    pub rate: u32,
    pub dwell_seconds: u32,
    pub slices_per_sec: u32,
}

/// 4.C: the live table of packet sources, insertion-ordered alongside
/// the id/uuid indices `multi_index_map` generates.
#[derive(Debug, Default)]
pub struct SourceTable {
    map: MultiIndexPacketSourceMap,
    sequence: id::IdSequence<PacketSource>,
    insertion_order: Vec<SourceId>,
}

impl SourceTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.C `add_source`. `strong_driver`, when given, is a
    /// caller-constructed driver (marks the source `local_only`); when
    /// absent the proto's factory constructs one.
    #[allow(clippy::too_many_arguments)]
    pub fn add_source(
        &mut self,
        source_line: &str,
        protos: &ProtoRegistry,
        chanlists: &crate::chanlist::ChannelListRegistry,
        defaults: SourceDefaults,
        strong_driver: Option<Box<dyn DriverHandle>>,
        observers: &mut Observers,
    ) -> Result<SourceId, SourceConfigError> {
        let Some(id) = self.sequence.next_id() else {
            return Err(SourceConfigError::BadOptionValue {
                name: "id",
                value: String::new(),
                expected: "available source id",
            });
        };
        self.insert_with_id(id, source_line, protos, chanlists, defaults, strong_driver, observers)
    }

    /// As [`SourceTable::add_source`], but the id is supplied by the
    /// caller instead of allocated locally.
    ///
    /// Used by the IPC bridge's helper-side `SOURCEADD` handler: the
    /// server allocated this id when the source was first added, and
    /// `SOURCEREPORT`/`SOURCEREMOVE`/`SOURCESETCHAN` correlate by that
    /// same id across the wire, so the helper's copy of the record must
    /// carry it rather than minting a fresh one.
    #[allow(clippy::too_many_arguments)]
    pub fn add_source_with_id(
        &mut self,
        id: SourceId,
        source_line: &str,
        protos: &ProtoRegistry,
        chanlists: &crate::chanlist::ChannelListRegistry,
        defaults: SourceDefaults,
        strong_driver: Option<Box<dyn DriverHandle>>,
        observers: &mut Observers,
    ) -> Result<SourceId, SourceConfigError> {
        self.sequence.ensure_past(id);
        self.insert_with_id(id, source_line, protos, chanlists, defaults, strong_driver, observers)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_with_id(
        &mut self,
        id: SourceId,
        source_line: &str,
        protos: &ProtoRegistry,
        chanlists: &crate::chanlist::ChannelListRegistry,
        defaults: SourceDefaults,
        strong_driver: Option<Box<dyn DriverHandle>>,
        observers: &mut Observers,
    ) -> Result<SourceId, SourceConfigError> {
        let (interface, options) = parse_source_line(source_line)?;

        let proto = resolve_proto(protos, &interface, &options)?;

        let local_only = strong_driver.is_some();
        let mut driver = match strong_driver {
            Some(driver) => driver,
            None => (proto.factory)(&interface, &options)?,
        };

        let channel_list_name = match options.get("channellist") {
            Some("n/a") => None,
            Some(name) => Some(LowercaseName::new(name).map_err(|_| {
                SourceConfigError::UnknownChannelList(name.to_string())
            })?),
            None => proto.default_channellist.clone(),
        };
        let channel_list_id = match channel_list_name {
            None => ChannelListId::none(),
            Some(name) => chanlists
                .find_by_name(&name)
                .ok_or_else(|| SourceConfigError::UnknownChannelList(name.as_str().to_string()))?,
        };

        let mode = decide_mode(&*driver, &options, channel_list_id)?;

        let (rate, dwell_seconds) = resolve_rate_dwell(&mode, &options, defaults)?;

        let split = match options.get("split") {
            Some(v) => !matches!(v, "false" | "0" | "no"),
            // Supplemental feature 3: hopping sources default to split
            // participation unless explicitly disabled.
            None => true,
        };

        let uuid = driver.uuid();

        // A hopping/dwelling source starts already "on" position 0 of
        // its list; the scheduler's countdown is primed with that
        // channel's own reload so the first tick it actually fires
        // advances to position 1, not position 0 again (verified
        // against the S1/S2 tick counts in scheduler.rs).
        let (initial_channel, initial_timer) = match mode {
            SourceMode::Locked(ch) => (ch, 0i64),
            SourceMode::Hop | SourceMode::Dwell => {
                let list = chanlists.get(channel_list_id).ok_or_else(|| {
                    SourceConfigError::EmptyChannelList(channel_list_id.to_string())
                })?;
                let first = list.channels().first().copied().ok_or_else(|| {
                    SourceConfigError::EmptyChannelList(list.name().as_str().to_string())
                })?;
                let reload = match mode {
                    SourceMode::Hop => i64::from(first.dwell_weight) * i64::from(defaults.slices_per_sec - rate),
                    SourceMode::Dwell => {
                        i64::from(first.dwell_weight) * i64::from(defaults.slices_per_sec * dwell_seconds)
                    }
                    SourceMode::Locked(_) => unreachable!("matched above"),
                };
                (first.channel_number, reload)
            }
        };
        if !matches!(mode, SourceMode::Locked(_)) {
            let _ = driver.set_channel(initial_channel);
        }

        let source = PacketSourceBuilder::default()
            .id(id)
            .uuid(uuid)
            .source_line(source_line.to_string())
            .proto_ref(proto.type_tag.clone())
            .driver(driver)
            .channel_list_id(channel_list_id)
            .channel_position(0)
            .channel_cursor(initial_channel)
            .mode(mode)
            .rate(rate)
            .dwell_seconds(dwell_seconds)
            .split(split)
            .rate_timer(if matches!(mode, SourceMode::Hop) { initial_timer } else { 0 })
            .dwell_timer(if matches!(mode, SourceMode::Dwell) { initial_timer } else { 0 })
            .hop_start(Instant::now())
            .local_only(local_only)
            .build()
            .map_err(|e| SourceConfigError::BadOptionValue {
                name: "source",
                value: e.to_string(),
                expected: "a fully-specified source",
            })?;

        self.map
            .try_insert(source)
            .map_err(|_| SourceConfigError::BadOptionValue {
                name: "id",
                value: id.to_string(),
                expected: "an id not already in the table",
            })?;
        self.insertion_order.push(id);

        info!(%id, %uuid, source_line, "source added");
        observers.fire(&Event::Added(id));
        if !matches!(mode, SourceMode::Locked(_)) {
            observers.fire(&Event::HopEnabled(id));
        }

        Ok(id)
    }

    /// §4.C `remove_source`: erase from both indices and the insertion
    /// sequence, close the driver unless already errored.
    pub fn remove_source(&mut self, id: SourceId, observers: &mut Observers) -> bool {
        let Some(mut source) = self.map.remove_by_id(&id) else {
            return false;
        };
        self.insertion_order.retain(|&existing| existing != id);
        if !source.error {
            source.driver.close();
        }
        observers.fire(&Event::Removed(id));
        true
    }

    /// Apply a `SOURCESETCHAN` command (spec.md §4.E) to a live source:
    /// `channel_list_id = None` means the wire's `chanset_id == 0`,
    /// i.e. "no channel list change" (see DESIGN.md's "Open Questions
    /// resolved" entry on the literal field mapping this preserves).
    #[allow(clippy::too_many_arguments)]
    pub fn apply_remote_chan_set(
        &mut self,
        id: SourceId,
        channel_list_id: Option<ChannelListId>,
        channel: u32,
        mode: SourceMode,
        rate: u32,
        dwell_seconds: u32,
        split: bool,
        observers: &mut Observers,
    ) -> bool {
        let Some(source) = self.map.get_mut_by_id(&id) else {
            return false;
        };

        if let Some(list_id) = channel_list_id {
            if source.channel_list_id != list_id {
                source.channel_list_id = list_id;
                observers.fire(&Event::ChannelListChanged(id));
            }
        }

        let hop_settings_changed = source.rate != rate || source.dwell_seconds != dwell_seconds;

        source.mode = mode;
        source.split = split;
        match mode {
            SourceMode::Locked(locked_channel) => {
                source.rate = 0;
                source.dwell_seconds = 0;
                source.channel_cursor = locked_channel;
            }
            SourceMode::Hop => {
                source.rate = rate;
                source.dwell_seconds = 0;
                source.channel_cursor = channel;
            }
            SourceMode::Dwell => {
                source.rate = 0;
                source.dwell_seconds = dwell_seconds;
                source.channel_cursor = channel;
            }
        }

        if hop_settings_changed && !matches!(mode, SourceMode::Locked(_)) {
            observers.fire(&Event::HopDwellChanged(id));
        }
        true
    }

    #[must_use]
    pub fn get(&self, id: SourceId) -> Option<&PacketSource> {
        self.map.get_by_id(&id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: SourceId) -> Option<&mut PacketSource> {
        self.map.get_mut_by_id(&id)
    }

    #[must_use]
    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<&PacketSource> {
        self.map.get_by_uuid(&uuid)
    }

    /// §4.C `find_by_driver`: linear scan by descriptor, since a driver
    /// reference isn't an index key in its own right (descriptors
    /// aren't unique across the lifetime of the table the way ids and
    /// UUIDs are — a closed driver's old descriptor can be reused by
    /// the OS for a later source).
    #[must_use]
    pub fn find_by_descriptor(&self, descriptor: std::os::unix::io::RawFd) -> Option<&PacketSource> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.map.get_by_id(id))
            .find(|source| source.driver.descriptor() == descriptor)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketSource> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.map.get_by_id(id))
    }

    pub fn iter_mut_ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.insertion_order.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn resolve_proto<'a>(
    protos: &'a ProtoRegistry,
    interface: &str,
    options: &OptionBag,
) -> Result<&'a crate::proto::ProtoSource, SourceConfigError> {
    match options.get("type") {
        Some("auto") | None => protos
            .autotype_probe(interface)
            .ok_or_else(|| SourceConfigError::NoMatchingType(interface.to_string())),
        Some(type_tag) => {
            let name = LowercaseName::new(type_tag)
                .map_err(|_| SourceConfigError::UnknownType(type_tag.to_string()))?;
            protos
                .get(&name)
                .ok_or_else(|| SourceConfigError::UnknownType(type_tag.to_string()))
        }
    }
}

fn decide_mode(
    driver: &dyn DriverHandle,
    options: &OptionBag,
    channel_list_id: ChannelListId,
) -> Result<SourceMode, SourceConfigError> {
    if !driver.is_channel_capable() {
        return Ok(SourceMode::Locked(0));
    }
    if matches!(options.get("hop"), Some("false") | Some("0") | Some("no")) {
        let channel = options
            .get("channel")
            .ok_or(SourceConfigError::MissingLockedChannel)?;
        let channel: u32 = channel
            .parse()
            .map_err(|_| SourceConfigError::BadOptionValue {
                name: "channel",
                value: channel.to_string(),
                expected: "an integer channel number",
            })?;
        return Ok(SourceMode::Locked(channel));
    }
    let _ = channel_list_id;
    // dwell and velocity both set -> velocity wins (§4.C step 5).
    if options.get("velocity").is_some() {
        Ok(SourceMode::Hop)
    } else if options.get("dwell").is_some() {
        Ok(SourceMode::Dwell)
    } else {
        Ok(SourceMode::Hop)
    }
}

fn resolve_rate_dwell(
    mode: &SourceMode,
    options: &OptionBag,
    defaults: SourceDefaults,
) -> Result<(u32, u32), SourceConfigError> {
    if matches!(mode, SourceMode::Locked(_)) {
        return Ok((0, 0));
    }
    let explicit_velocity = match options.get("velocity") {
        Some(v) => Some(v.parse().map_err(|_| SourceConfigError::BadOptionValue {
            name: "velocity",
            value: v.to_string(),
            expected: "an integer rate",
        })?),
        None => None,
    };
    let explicit_dwell = match options.get("dwell") {
        Some(v) => Some(v.parse().map_err(|_| SourceConfigError::BadOptionValue {
            name: "dwell",
            value: v.to_string(),
            expected: "an integer dwell in seconds",
        })?),
        None => None,
    };

    // §3 invariant 5: mode=Dwell => rate=0, mode=Hop => dwell_seconds=0.
    // `decide_mode` already resolved an explicit-both conflict in
    // velocity's favor (mode=Hop), so the warning only fires there, and
    // only when the user actually wrote both options — a nonzero
    // default rate alongside an explicit `dwell=` must not trip it.
    let (mut rate, dwell) = match mode {
        SourceMode::Dwell => (0, explicit_dwell.unwrap_or(defaults.dwell_seconds)),
        _ => (explicit_velocity.unwrap_or(defaults.rate), 0),
    };
    if matches!(mode, SourceMode::Hop) {
        if let (Some(rate), Some(_)) = (explicit_velocity, explicit_dwell) {
            warn!(rate, "rate and dwell both set; rate wins");
        }
    }

    // §3 invariant 6: rate is clamped to SLICES_PER_SEC.
    if rate > defaults.slices_per_sec {
        warn!(rate, max = defaults.slices_per_sec, "rate clamped");
        rate = defaults.slices_per_sec;
    }
    Ok((rate, dwell))
}
