// SPDX-License-Identifier: Apache-2.0

//! Domain types for radio channels and channel lists.
//!
//! This crate holds the validated value types shared by the
//! channel-list registry and the packet-source table (`pst-tracker`):
//! [`Channel`], [`ChannelList`], and the small lowercased-identifier
//! wrappers used for channel-list names and capture-source type tags.
//! Parsing the `name:ch[:dwell],…` channel-list grammar from spec.md
//! §4.A lives here too, since it only produces these value types and
//! has no dependency on the registry that stores them.

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};
use thiserror::Error;

pub use id::Id;

/// A single channel entry: a channel number (or frequency in MHz —
/// the driver decides which) and a dwell weight.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Channel {
    pub channel_number: u32,
    pub dwell_weight: u32,
}

/// A `dwell_weight` of `0` was supplied; weights must be at least 1.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("dwell weight must be >= 1, got 0")]
pub struct ZeroDwellWeight;

impl Channel {
    /// Construct a channel entry. `dwell_weight` must be `>= 1`;
    /// weights greater than 5 are legal but logged at `warn` level,
    /// per spec.md §3.
    pub fn new(channel_number: u32, dwell_weight: u32) -> Result<Self, ZeroDwellWeight> {
        if dwell_weight == 0 {
            return Err(ZeroDwellWeight);
        }
        if dwell_weight > 5 {
            tracing::warn!(
                channel_number,
                dwell_weight,
                "dwell weight > 5 is unusual but legal"
            );
        }
        Ok(Channel {
            channel_number,
            dwell_weight,
        })
    }
}

/// A string validated to be non-empty; comparisons and storage always
/// use the lowercased form, matching spec.md's "names are unique after
/// lowercasing" rule for channel lists and capture-source type tags.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct LowercaseName(String);

/// An empty string was supplied where a name was required.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("name must not be empty")]
pub struct EmptyName;

impl LowercaseName {
    pub fn new(raw: &str) -> Result<Self, EmptyName> {
        if raw.is_empty() {
            return Err(EmptyName);
        }
        Ok(LowercaseName(raw.to_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LowercaseName {
    type Error = EmptyName;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        LowercaseName::new(&value)
    }
}

impl From<LowercaseName> for String {
    fn from(value: LowercaseName) -> Self {
        value.0
    }
}

impl Display for LowercaseName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A [`ChannelList`]'s id, per spec.md §3 — `0` is reserved for
/// "none/invalid", ids are allocated monotonically starting at `1`.
pub type ChannelListId = Id<ChannelList>;

/// A named, id-keyed, ordered sequence of channels.
///
/// Lists are append-only once created, except a replacement under the
/// same id received over IPC from the authoritative side (§4.A
/// `upsert_from_ipc`) — that operation lives on the registry in
/// `pst-tracker`, not here; this type is the plain value.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelList {
    pub id: ChannelListId,
    pub name: LowercaseName,
    pub channels: Vec<Channel>,
}

impl ChannelList {
    #[must_use]
    pub fn new(id: ChannelListId, name: LowercaseName, channels: Vec<Channel>) -> Self {
        ChannelList { id, name, channels }
    }

    #[must_use]
    pub fn id(&self) -> ChannelListId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &LowercaseName {
        &self.name
    }

    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Replace the channel sequence in place, keeping `id` and `name`
    /// fixed. Used by `upsert_from_ipc` (spec.md §4.A) when the
    /// authoritative side resends a list under an id already known
    /// locally — existing `channel_position` references into this list
    /// stay valid because the id doesn't change.
    pub fn replace_channels(&mut self, channels: Vec<Channel>) {
        self.channels = channels;
    }
}

/// Failure to parse a `name:ch[:dwell],…` channel-list specification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelListSpecError {
    #[error("channel list spec has no ':' separating name from channels")]
    MissingSeparator,
    #[error("channel list name is empty")]
    EmptyName(#[from] EmptyName),
    #[error("channel list has no entries")]
    EmptyList,
    #[error("channel entry {0:?} is not a valid channel number")]
    BadChannelNumber(String),
    #[error("channel entry {0:?} has an invalid dwell weight: {1}")]
    BadDwellWeight(String, ZeroDwellWeight),
    #[error("channel entry {0:?} has a non-numeric dwell weight")]
    NonNumericDwellWeight(String),
}

/// Parse spec.md §4.A's exact grammar: a list name, `:`, then one or
/// more comma-separated entries, each a channel number optionally
/// followed by `:<dwell-weight>`.
///
/// Does not allocate an id — that's the registry's job.
pub fn parse_channel_list_spec(
    spec: &str,
) -> Result<(LowercaseName, Vec<Channel>), ChannelListSpecError> {
    let (name, rest) = spec
        .split_once(':')
        .ok_or(ChannelListSpecError::MissingSeparator)?;
    let name = LowercaseName::new(name)?;

    let mut channels = Vec::new();
    for entry in rest.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(2, ':');
        let chan_str = parts.next().unwrap_or("");
        let channel_number = chan_str
            .parse::<u32>()
            .map_err(|_| ChannelListSpecError::BadChannelNumber(entry.to_string()))?;
        let dwell_weight = match parts.next() {
            Some(dwell_str) => dwell_str
                .parse::<u32>()
                .map_err(|_| ChannelListSpecError::NonNumericDwellWeight(entry.to_string()))?,
            None => 1,
        };
        let channel = Channel::new(channel_number, dwell_weight)
            .map_err(|e| ChannelListSpecError::BadDwellWeight(entry.to_string(), e))?;
        channels.push(channel);
    }

    if channels.is_empty() {
        return Err(ChannelListSpecError::EmptyList);
    }

    Ok((name, channels))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_basic_spec() {
        let (name, channels) = parse_channel_list_spec("IEEE80211b:1,6,11").unwrap();
        assert_eq!(name.as_str(), "ieee80211b");
        assert_eq!(
            channels,
            vec![
                Channel::new(1, 1).unwrap(),
                Channel::new(6, 1).unwrap(),
                Channel::new(11, 1).unwrap(),
            ]
        );
    }

    #[test]
    fn parses_dwell_weights() {
        let (_, channels) = parse_channel_list_spec("W:1:1,6:3,11:1").unwrap();
        assert_eq!(
            channels,
            vec![
                Channel::new(1, 1).unwrap(),
                Channel::new(6, 3).unwrap(),
                Channel::new(11, 1).unwrap(),
            ]
        );
    }

    #[test]
    fn empty_list_is_an_error() {
        assert_eq!(
            parse_channel_list_spec("empty:"),
            Err(ChannelListSpecError::EmptyList)
        );
    }

    #[test]
    fn missing_colon_is_an_error() {
        assert_eq!(
            parse_channel_list_spec("nocolonhere"),
            Err(ChannelListSpecError::MissingSeparator)
        );
    }

    #[test]
    fn names_are_lowercased() {
        let (name, _) = parse_channel_list_spec("MixedCase:1").unwrap();
        assert_eq!(name.as_str(), "mixedcase");
    }

    #[test]
    fn bad_channel_number_is_rejected() {
        assert!(matches!(
            parse_channel_list_spec("x:notanumber"),
            Err(ChannelListSpecError::BadChannelNumber(_))
        ));
    }
}
