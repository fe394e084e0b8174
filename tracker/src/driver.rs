// SPDX-License-Identifier: Apache-2.0

//! The capability record §9 calls for in place of a concrete driver
//! class hierarchy: a `DriverHandle` trait object owned by each
//! `PacketSource`, plus the stub used on the unprivileged side where
//! no descriptor is ever actually opened.

use crate::error::DriverError;
use std::os::unix::io::RawFd;
use uuid::Uuid;

/// Everything the core needs from a concrete capture driver. Variants
/// (a real 802.11 monitor-mode driver, a pcap-file replay driver, the
/// unprivileged-side stub) live behind this trait rather than as sibling
/// subclasses.
pub trait DriverHandle: std::fmt::Debug {
    /// The OS descriptor, or a negative value if not open. Per spec.md
    /// §3 invariant 7, the unprivileged side's stub always returns
    /// negative; the privileged side returns ≥ 0 once `open` succeeds.
    fn descriptor(&self) -> RawFd;

    /// Put the interface into the mode needed to take channel-set
    /// commands (e.g. monitor mode). Called once, before `open`.
    fn enable_monitor(&mut self) -> Result<(), DriverError>;

    /// Acquire the OS descriptor.
    fn open(&mut self) -> Result<(), DriverError>;

    /// Release the OS descriptor. Idempotent.
    fn close(&mut self);

    fn set_channel(&mut self, channel_number: u32) -> Result<(), DriverError>;

    /// Drain whatever is ready on `descriptor()` into the packet chain.
    /// The core calls this only when the poll integrator has observed
    /// readiness; the driver owns framing and hand-off into the chain.
    fn poll(&mut self) -> Result<(), DriverError>;

    fn uuid(&self) -> Uuid;
    fn interface(&self) -> &str;
    fn type_tag(&self) -> &str;
    fn is_channel_capable(&self) -> bool;
}

/// A placeholder driver with no real hardware behind it: used as the
/// unprivileged side's stand-in for a source whose real driver lives
/// on the helper (spec.md §5), and doubles as the scheduler/source
/// test double elsewhere in this crate. `descriptor()` tracks `open`
/// state like a real driver would — `-1` until `open()` succeeds, a
/// fixed placeholder fd afterward — so `PacketSource::is_open()` can
/// treat it the same as any other `DriverHandle`.
#[derive(Debug, Clone)]
pub struct StubDriver {
    uuid: Uuid,
    interface: String,
    type_tag: String,
    channel_capable: bool,
    open: bool,
}

impl StubDriver {
    #[must_use]
    pub fn new(uuid: Uuid, interface: impl Into<String>, type_tag: impl Into<String>) -> Self {
        StubDriver {
            uuid,
            interface: interface.into(),
            type_tag: type_tag.into(),
            channel_capable: true,
            open: false,
        }
    }

    #[must_use]
    pub fn not_channel_capable(mut self) -> Self {
        self.channel_capable = false;
        self
    }
}

impl DriverHandle for StubDriver {
    fn descriptor(&self) -> RawFd {
        if self.open {
            3
        } else {
            -1
        }
    }

    fn enable_monitor(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn open(&mut self) -> Result<(), DriverError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn set_channel(&mut self, _channel_number: u32) -> Result<(), DriverError> {
        Ok(())
    }

    fn poll(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn interface(&self) -> &str {
        &self.interface
    }

    fn type_tag(&self) -> &str {
        &self.type_tag
    }

    fn is_channel_capable(&self) -> bool {
        self.channel_capable
    }
}
