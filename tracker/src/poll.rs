// SPDX-License-Identifier: Apache-2.0

//! 4.F Poll integrator: merges capture descriptors into the host I/O
//! loop and drains the ones that come back ready.
//!
//! spec.md describes this in `select`/`fd_set` terms
//! (`merge_fds(max_fd, read_set) -> new_max_fd`, `poll(read_set)`)
//! because the original is a single-threaded C event loop. This
//! workspace's host loop is `mio::Poll` instead (already a teacher
//! dependency, used the same way in `dataplane`'s kernel driver), so
//! the two operations become "register every live descriptor with the
//! `Poll` instance" and "turn a batch of `mio::Events` back into the
//! sources that produced them" — the same contract, different plumbing.

use crate::source::{SourceId, SourceTable};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{trace, warn};

/// Merges live capture descriptors into a host `mio::Poll` and maps
/// ready events back to the `SourceId` that owns the descriptor.
///
/// Cancellation is process-level (spec.md §5): once [`PollIntegrator::spindown`]
/// is called, [`PollIntegrator::merge_fds`] stops registering anything
/// new and [`PollIntegrator::poll`] becomes a no-op, letting the host
/// exit without further capture work.
pub struct PollIntegrator {
    registered: HashMap<RawFd, (Token, SourceId)>,
    next_token: usize,
    spindown: bool,
}

impl std::fmt::Debug for PollIntegrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollIntegrator")
            .field("registered", &self.registered.len())
            .field("spindown", &self.spindown)
            .finish()
    }
}

impl Default for PollIntegrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PollIntegrator {
    #[must_use]
    pub fn new() -> Self {
        PollIntegrator {
            registered: HashMap::new(),
            next_token: 0,
            spindown: false,
        }
    }

    /// Set the process-wide cancellation flag. Per spec.md §5, from
    /// this point `merge_fds` returns without registering anything new
    /// and `poll` is a no-op.
    pub fn spindown(&mut self) {
        self.spindown = true;
    }

    #[must_use]
    pub fn is_spinning_down(&self) -> bool {
        self.spindown
    }

    /// `merge_fds(max_fd, read_set) -> new_max_fd`: register every
    /// live, open descriptor in `sources` with `poll` that isn't
    /// already registered, and deregister any that closed since the
    /// last call. Returns the number of descriptors now registered
    /// (the `mio` analogue of the returned `new_max_fd`). During
    /// shutdown, registration state is left unchanged.
    pub fn merge_fds(&mut self, poll: &Poll, sources: &SourceTable) -> io::Result<usize> {
        if self.spindown {
            return Ok(self.registered.len());
        }

        let mut live: HashMap<RawFd, SourceId> = HashMap::new();
        for source in sources.iter() {
            let fd = source.driver.descriptor();
            if fd >= 0 {
                live.insert(fd, source.id);
            }
        }

        let stale: Vec<RawFd> = self
            .registered
            .keys()
            .copied()
            .filter(|fd| !live.contains_key(fd))
            .collect();
        for fd in stale {
            if let Some((_, id)) = self.registered.remove(&fd) {
                let mut source_fd = SourceFd(&fd);
                let _ = poll.registry().deregister(&mut source_fd);
                trace!(%id, fd, "deregistered closed descriptor");
            }
        }

        for (fd, id) in live {
            if self.registered.contains_key(&fd) {
                continue;
            }
            let token = Token(self.next_token);
            self.next_token += 1;
            let mut source_fd = SourceFd(&fd);
            poll.registry()
                .register(&mut source_fd, token, Interest::READABLE)?;
            self.registered.insert(fd, (token, id));
            trace!(%id, fd, "registered descriptor");
        }

        Ok(self.registered.len())
    }

    /// `poll(read_set)`: block up to `timeout` for readiness, then
    /// invoke each ready source's `DriverHandle::poll`. Returns the ids
    /// of the sources that were drained. A no-op during shutdown.
    pub fn poll(
        &mut self,
        mio_poll: &mut Poll,
        sources: &mut SourceTable,
        timeout: Option<Duration>,
    ) -> io::Result<Vec<SourceId>> {
        if self.spindown {
            return Ok(Vec::new());
        }

        let mut events = Events::with_capacity(self.registered.len().max(1));
        match mio_poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(err) => return Err(err),
        }

        let mut drained = Vec::new();
        for event in &events {
            let token = event.token();
            let Some(&id) = self
                .registered
                .values()
                .find_map(|(t, id)| (*t == token).then_some(id))
            else {
                continue;
            };
            let Some(source) = sources.get_mut(id) else {
                continue;
            };
            if let Err(err) = source.driver.poll() {
                warn!(%id, error = %err, "driver poll failed");
                continue;
            }
            source.record_packet();
            drained.push(id);
        }
        Ok(drained)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::DriverHandle;
    use crate::error::DriverError;
    use std::os::unix::io::AsRawFd;

    #[derive(Debug)]
    struct PipeDriver {
        read_fd: std::os::unix::io::OwnedFd,
        write_fd: std::os::unix::io::OwnedFd,
        uuid: uuid::Uuid,
    }

    impl PipeDriver {
        fn new() -> Self {
            let (read_fd, write_fd) = rustix_pipe();
            PipeDriver {
                read_fd,
                write_fd,
                uuid: uuid::Uuid::new_v4(),
            }
        }
    }

    fn rustix_pipe() -> (std::os::unix::io::OwnedFd, std::os::unix::io::OwnedFd) {
        let mut fds = [0i32; 2];
        // SAFETY: `fds` is a valid, appropriately sized output buffer for pipe(2).
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe(2) failed");
        use std::os::unix::io::FromRawFd;
        // SAFETY: pipe(2) succeeded, so fds[0] and fds[1] are freshly-opened,
        // uniquely-owned descriptors that nothing else holds yet.
        unsafe {
            (
                std::os::unix::io::OwnedFd::from_raw_fd(fds[0]),
                std::os::unix::io::OwnedFd::from_raw_fd(fds[1]),
            )
        }
    }

    impl DriverHandle for PipeDriver {
        fn descriptor(&self) -> RawFd {
            self.read_fd.as_raw_fd()
        }
        fn enable_monitor(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        fn open(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        fn close(&mut self) {}
        fn set_channel(&mut self, _channel_number: u32) -> Result<(), DriverError> {
            Ok(())
        }
        fn poll(&mut self) -> Result<(), DriverError> {
            let mut buf = [0u8; 16];
            // SAFETY: `buf` is a valid, appropriately sized buffer for read(2)
            // on a descriptor this struct owns exclusively.
            unsafe {
                libc::read(self.read_fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len());
            }
            Ok(())
        }
        fn uuid(&self) -> uuid::Uuid {
            self.uuid
        }
        fn interface(&self) -> &str {
            "pipe0"
        }
        fn type_tag(&self) -> &str {
            "pipe"
        }
        fn is_channel_capable(&self) -> bool {
            false
        }
    }

    #[test]
    fn merge_fds_registers_and_poll_drains_a_ready_descriptor() {
        let mut sources = SourceTable::new();
        let mut observers = crate::events::Observers::new();
        let chanlists = crate::chanlist::ChannelListRegistry::new();
        let mut protos = crate::proto::ProtoRegistry::new();
        let driver = PipeDriver::new();
        // The raw fd stays valid for the test's duration: it's owned by
        // `driver`, which moves into the table below and isn't dropped
        // until the test function returns.
        let write_fd = driver.write_fd.as_raw_fd();

        protos
            .register(crate::proto::ProtoSource {
                type_tag: radio::LowercaseName::new("pipe").unwrap(),
                probe: |_| true,
                factory: |_, _| unreachable!("strong driver supplied"),
                default_channellist: None,
                requires_root: false,
            })
            .unwrap();

        let id = sources
            .add_source(
                "pipe0:hop=false,channel=0",
                &protos,
                &chanlists,
                crate::source::SourceDefaults {
                    rate: 0,
                    dwell_seconds: 0,
                    slices_per_sec: 10,
                },
                Some(Box::new(driver)),
                &mut observers,
            )
            .unwrap();

        let mut mio_poll = Poll::new().unwrap();
        let mut integrator = PollIntegrator::new();
        integrator.merge_fds(&mio_poll, &sources).unwrap();

        // SAFETY: write_fd is a valid, open descriptor owned by the driver's pipe.
        unsafe {
            libc::write(write_fd, b"x".as_ptr().cast(), 1);
        }

        let drained = integrator
            .poll(&mut mio_poll, &mut sources, Some(Duration::from_millis(500)))
            .unwrap();
        assert_eq!(drained, vec![id]);
    }

    #[test]
    fn spindown_makes_poll_a_no_op() {
        let mut sources = SourceTable::new();
        let mut mio_poll = Poll::new().unwrap();
        let mut integrator = PollIntegrator::new();
        integrator.spindown();
        let before = integrator.merge_fds(&mio_poll, &sources).unwrap();
        assert_eq!(before, 0);
        let drained = integrator
            .poll(&mut mio_poll, &mut sources, Some(Duration::from_millis(10)))
            .unwrap();
        assert!(drained.is_empty());
    }
}
