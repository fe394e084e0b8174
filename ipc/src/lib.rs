// SPDX-License-Identifier: Apache-2.0

//! The length-prefixed control protocol between the privileged helper
//! and the unprivileged server (spec.md §4.E).
//!
//! This crate is the wire format only: the frame header, the
//! per-command payload encodings, and the name-keyed command registry
//! that lets both processes agree on command ids without a shared
//! constants file. Dispatch against live tracker state lives in
//! `pst-tracker`, which depends on this crate.

#![forbid(unsafe_code)]

mod commands;
mod frame;
mod registry;
mod role;

pub use commands::{
    FieldTooLong, SourceAdd, SourceAddChanList, SourceChanSet, SourceFrame, SourceRemove,
    SourceReport, SourceReportFlags, SourceRun, SyncComplete, WireMode, MAX_SOURCE_LINE_LEN,
    MAX_TYPE_TAG_LEN,
};
pub use frame::{Frame, FrameHeader, IpcFrameError, HEADER_LEN};
pub use registry::{CommandId, CommandRegistry, RegistryError};
pub use role::Role;
