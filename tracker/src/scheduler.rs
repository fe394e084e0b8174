// SPDX-License-Identifier: Apache-2.0

//! 4.D Hop scheduler: the tick-driven loop that advances each open,
//! hopping source's channel cursor and commands its driver.

use crate::chanlist::ChannelListRegistry;
use crate::events::{Event, Observers};
use crate::source::{SourceId, SourceMode, SourceTable, MAX_CONSEC_CHAN_ERR};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

/// Slices per wall-clock second — the ceiling on hop rate (GLOSSARY,
/// §4.D).
pub const SLICES_PER_SEC: u32 = 10;

/// Emitted when a source's channel cursor wraps past the end of its
/// list — the scheduler's report-boundary, which both doubles as the
/// liveness heartbeat and carries the interval's elapsed time. The IPC
/// bridge turns these into `SOURCEREPORT` frames.
#[derive(Copy, Clone, Debug)]
pub struct ReportBoundary {
    pub id: SourceId,
    pub hop_elapsed: std::time::Duration,
}

/// Ticks every open, non-`Locked` source with a resolvable channel
/// list once per scheduler slice.
#[derive(Debug, Default)]
pub struct HopScheduler {
    slices_per_sec: u32,
}

impl HopScheduler {
    #[must_use]
    pub fn new() -> Self {
        HopScheduler {
            slices_per_sec: SLICES_PER_SEC,
        }
    }

    #[must_use]
    pub fn with_slices_per_sec(slices_per_sec: u32) -> Self {
        HopScheduler { slices_per_sec }
    }

    /// Advance every eligible source by one scheduler slice.
    pub fn tick(
        &self,
        sources: &mut SourceTable,
        chanlists: &ChannelListRegistry,
        observers: &mut Observers,
    ) -> Vec<ReportBoundary> {
        let mut reports = Vec::new();
        let ids: Vec<SourceId> = sources.iter_mut_ids().collect();
        for id in ids {
            self.tick_one(id, sources, chanlists, observers, &mut reports);
        }
        reports
    }

    fn tick_one(
        &self,
        id: SourceId,
        sources: &mut SourceTable,
        chanlists: &ChannelListRegistry,
        observers: &mut Observers,
        reports: &mut Vec<ReportBoundary>,
    ) {
        let Some(source) = sources.get_mut(id) else {
            return;
        };
        if source.is_locked() || !source.is_open() {
            return;
        }
        if source.channel_list_id.is_none() {
            return;
        }
        let Some(list) = chanlists.get(source.channel_list_id) else {
            return;
        };
        if list.is_empty() {
            return;
        }

        // Countdown before the <=0 check per the design note: a
        // freshly-reloaded 0 fires on the same tick.
        let timer = match source.mode {
            SourceMode::Hop => &mut source.rate_timer,
            SourceMode::Dwell => &mut source.dwell_timer,
            SourceMode::Locked(_) => unreachable!("checked above"),
        };
        *timer -= 1;
        if *timer > 0 {
            return;
        }

        // `channel_position` names the channel we're *currently* on;
        // the candidate is the one we're about to hop to. Computing
        // the reload from the candidate (not the outgoing channel)
        // means a wrap's reload already reflects the channel we land
        // on, matching the dwell-weighted reload sequence.
        let mut candidate = source.channel_position + 1;
        let mut wrapped = false;
        if candidate >= list.len() {
            candidate = 0;
            wrapped = true;
        }

        let channel = list.channels()[candidate];
        let reload = match source.mode {
            SourceMode::Hop => {
                i64::from(channel.dwell_weight) * i64::from(self.slices_per_sec - source.rate)
            }
            SourceMode::Dwell => {
                i64::from(channel.dwell_weight)
                    * i64::from(self.slices_per_sec * source.dwell_seconds)
            }
            SourceMode::Locked(_) => unreachable!("checked above"),
        };
        // Reload applies whether or not the tune below succeeds: a
        // failing channel is retried once per dwell period, not once
        // per tick, so a slow-dwelling source doesn't spin.
        match source.mode {
            SourceMode::Hop => source.rate_timer = reload,
            SourceMode::Dwell => source.dwell_timer = reload,
            SourceMode::Locked(_) => unreachable!("checked above"),
        }

        match source.driver.set_channel(channel.channel_number) {
            Ok(()) => {
                source.consec_errors = 0;
                source.channel_cursor = channel.channel_number;
                source.channel_position = candidate;
            }
            Err(err) => {
                source.consec_errors += 1;
                warn!(%id, error = %err, consec_errors = source.consec_errors, "channel set failed");
                if source.consec_errors > MAX_CONSEC_CHAN_ERR {
                    source.driver.close();
                    source.error = true;
                    observers.fire(&Event::HopDisabled(id));
                }
            }
        }

        if wrapped {
            let now = Instant::now();
            let hop_elapsed = now.saturating_duration_since(source.hop_start);
            source.hop_elapsed = hop_elapsed;
            source.hop_start = now;
            info!(%id, ?hop_elapsed, "report boundary");
            reports.push(ReportBoundary { id, hop_elapsed });
        }
    }
}

/// §4.D "Split-offset assignment": runs once at configuration-complete
/// time. For each channel list used by >= 2 hopping, split-enabled
/// sources, assigns staggered starting positions.
pub fn assign_split_offsets(
    sources: &mut SourceTable,
    chanlists: &ChannelListRegistry,
    observers: &mut Observers,
) {
    let mut groups: HashMap<radio::ChannelListId, Vec<SourceId>> = HashMap::new();
    for source in sources.iter() {
        if source.is_locked() || !source.split || source.channel_list_id.is_none() {
            continue;
        }
        groups
            .entry(source.channel_list_id)
            .or_default()
            .push(source.id);
    }

    for (list_id, mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        let Some(list) = chanlists.get(list_id) else {
            continue;
        };
        let list_len = list.len();
        if list_len == 0 {
            continue;
        }
        members.sort_by_key(|id| id.get());

        let rates: Vec<u32> = members
            .iter()
            .filter_map(|id| sources.get(*id))
            .map(|s| s.rate)
            .collect();
        let dwells: Vec<u32> = members
            .iter()
            .filter_map(|id| sources.get(*id))
            .map(|s| s.dwell_seconds)
            .collect();
        if rates.iter().any(|r| *r != rates[0]) || dwells.iter().any(|d| *d != dwells[0]) {
            warn!(?list_id, "split-sharing sources disagree on rate/dwell; they will drift");
        }

        let offset = list_len / (members.len() + 1);
        for (k, id) in members.into_iter().enumerate() {
            if let Some(source) = sources.get_mut(id) {
                source.channel_position = k * offset;
            }
        }
    }
}


/// spec.md §8's universal invariants, asserted under random operation
/// sequences rather than the fixed scenarios above.
#[cfg(test)]
mod property_test {
    use super::*;
    use crate::chanlist::ChannelListRegistry;
    use crate::driver::StubDriver;
    use crate::events::Observers;
    use crate::proto::{ProtoRegistry, ProtoSource};
    use crate::source::{SourceDefaults, SourceMode, SourceTable};
    use radio::LowercaseName;
    use uuid::Uuid;

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

    /// (rate clamp) + (wrap correctness): for any configured velocity
    /// and any number of ticks, the stored rate never exceeds
    /// `SLICES_PER_SEC` and `channel_position` never leaves the list's
    /// bounds.
    #[test]
    fn rate_is_clamped_and_position_stays_in_bounds() {
        bolero::check!()
            .with_type::<(u8, u8, bool)>()
            .for_each(|&(velocity, ticks, as_dwell)| {
                let mut chanlists = ChannelListRegistry::new();
                chanlists.add_from_spec("w:1,6,11,36,40");
                let mut sources = SourceTable::new();
                let mut observers = Observers::new();
                // A nonzero default rate must never leak into a Dwell
                // source's stored rate, so exercise that default
                // alongside both explicit-velocity (Hop) source lines.
                let source_line = if as_dwell {
                    "wlan0:channellist=w,dwell=2".to_string()
                } else {
                    format!("wlan0:channellist=w,velocity={velocity}")
                };
                let id = sources
                    .add_source(
                        &source_line,
                        &protos(),
                        &chanlists,
                        SourceDefaults {
                            rate: velocity as u32,
                            dwell_seconds: 0,
                            slices_per_sec: SLICES_PER_SEC,
                        },
                        None,
                        &mut observers,
                    )
                    .unwrap();
                sources.get_mut(id).unwrap().driver.open().unwrap();

                let source = sources.get(id).unwrap();
                assert!(source.rate <= SLICES_PER_SEC);
                match source.mode {
                    SourceMode::Hop => assert_eq!(source.dwell_seconds, 0),
                    SourceMode::Dwell => assert_eq!(source.rate, 0),
                    SourceMode::Locked(_) => {}
                }

                let scheduler = HopScheduler::new();
                for _ in 0..ticks {
                    scheduler.tick(&mut sources, &chanlists, &mut observers);
                    let position = sources.get(id).unwrap().channel_position;
                    assert!(position < 5, "position {position} out of bounds for a 5-channel list");
                }
            });
    }

    /// A Dwell source must end up with `rate == 0` even when the
    /// tracker-wide default rate is nonzero; only an explicit
    /// `velocity=` should ever put nonzero rate on the record.
    #[test]
    fn dwell_mode_rate_is_zero_under_a_nonzero_default_rate() {
        let mut chanlists = ChannelListRegistry::new();
        chanlists.add_from_spec("w:1,6,11,36,40");
        let mut sources = SourceTable::new();
        let mut observers = Observers::new();
        let id = sources
            .add_source(
                "wlan0:channellist=w,dwell=2",
                &protos(),
                &chanlists,
                SourceDefaults {
                    rate: 5,
                    dwell_seconds: 0,
                    slices_per_sec: SLICES_PER_SEC,
                },
                None,
                &mut observers,
            )
            .unwrap();

        let source = sources.get(id).unwrap();
        assert!(matches!(source.mode, SourceMode::Dwell));
        assert_eq!(source.rate, 0);
        assert!(source.dwell_seconds > 0);
    }

    /// (split coverage): for N split-sharing sources on a list of
    /// length L, assigned positions are `{k*(L/(N+1)) : k in 0..N}`.
    #[test]
    fn split_offsets_cover_the_expected_positions() {
        bolero::check!()
            .with_type::<u8>()
            .for_each(|&raw_n| {
                let n = (raw_n % 6) as usize + 2; // 2..=7 split-sharing sources
                let list_len = 24usize;
                let spec = format!(
                    "w:{}",
                    (1..=list_len).map(|c| c.to_string()).collect::<Vec<_>>().join(",")
                );
                let mut chanlists = ChannelListRegistry::new();
                chanlists.add_from_spec(&spec);
                let mut sources = SourceTable::new();
                let mut observers = Observers::new();

                let mut ids = Vec::new();
                for k in 0..n {
                    let source_line = format!("wlan{k}:channellist=w,velocity=3");
                    let id = sources
                        .add_source(
                            &source_line,
                            &protos(),
                            &chanlists,
                            SourceDefaults {
                                rate: 3,
                                dwell_seconds: 0,
                                slices_per_sec: SLICES_PER_SEC,
                            },
                            None,
                            &mut observers,
                        )
                        .unwrap();
                    ids.push(id);
                }

                assign_split_offsets(&mut sources, &chanlists, &mut observers);

                let offset = list_len / (n + 1);
                for (k, id) in ids.into_iter().enumerate() {
                    assert_eq!(sources.get(id).unwrap().channel_position, k * offset);
                }
            });
    }
}
