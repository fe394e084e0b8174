// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Kind 1 in the error taxonomy: a source definition that can't be
/// turned into a live `PacketSource`. Configuration-time; the caller
/// logs and drops the one source rather than treating it as fatal,
/// except at initial load where `pst-config` escalates it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceConfigError {
    #[error("source line has no interface name")]
    EmptyInterface,
    #[error("option {0:?} has no `=value`")]
    MalformedOption(String),
    #[error("no registered type matches interface {0:?} (and none was given)")]
    NoMatchingType(String),
    #[error("unknown capture type {0:?}")]
    UnknownType(String),
    #[error("channel list {0:?} is not registered")]
    UnknownChannelList(String),
    #[error("hop-capable source is missing a `channel=` option while hop=false")]
    MissingLockedChannel,
    #[error("channel list {0:?} has no channels to hop across")]
    EmptyChannelList(String),
    #[error("option {name} value {value:?} is not a valid {expected}")]
    BadOptionValue {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// A driver-local failure, surfaced through `DriverHandle` methods.
/// Runtime (kind 2/3) failures: the caller marks the source errored
/// rather than propagating.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DriverError(pub String);

/// Kind 1: duplicate proto-source registration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoSourceError {
    #[error("capture type {0:?} is already registered")]
    DuplicateType(String),
}
