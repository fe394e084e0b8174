// SPDX-License-Identifier: Apache-2.0

//! The two-process wiring described by spec.md §6: one `trackerd`
//! invocation runs as the unprivileged server (loads configuration,
//! mirrors sources to the helper over IPC), a second runs as the
//! privileged helper (owns the real capture drivers), and the two talk
//! the `pst-ipc` frame protocol over a Unix domain control socket. Same
//! binary, same [`tracker::Tracker`], only `--role` differs — mirroring
//! the dual-role design note in spec.md §9.
//!
//! Capture-source *types* are demonstration stand-ins
//! ([`tracker::StubDriver`]): spec.md's non-goals rule out shipping an
//! actual wifi driver, so this binary registers a single permissive
//! proto to exercise the rest of the pipeline end to end.

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use mio::net::UnixStream;
use mio::Poll;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream as StdUnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracker::{DispatchOutcome, ProtoSource, Role, SourceDefaults, StubDriver, Tracker};
use tracing::{debug, info, warn};

/// One scheduler slice, matching [`tracker::SLICES_PER_SEC`].
fn slice_duration() -> Duration {
    Duration::from_millis(1000 / u64::from(tracker::SLICES_PER_SEC))
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum RoleArg {
    Server,
    Helper,
}

#[derive(Parser, Debug)]
#[command(name = "trackerd", about = "Packet-source tracker daemon")]
struct Args {
    #[arg(long, value_enum)]
    role: RoleArg,

    /// Path to the Unix domain control socket shared by both roles.
    #[arg(long, value_name = "path", default_value = "/run/trackerd/control.sock")]
    control_socket: PathBuf,

    #[command(flatten)]
    cmd: config::CmdArgs,
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

fn install_sigint_handler() {
    // SAFETY: `handle_sigint` only stores to an `AtomicBool`, which is
    // async-signal-safe; no other signal disposition is touched.
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_sigint as libc::sighandler_t);
    }
}

fn early_init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_level(true)
        .with_line_number(true)
        .init();
    color_eyre::install()
}

fn register_demo_proto(tracker: &mut Tracker) -> Result<()> {
    tracker
        .register_proto(ProtoSource {
            type_tag: radio::LowercaseName::new("ieee80211").map_err(|e| color_eyre::eyre::eyre!("{e}"))?,
            probe: |_interface| true,
            factory: |interface, _options| {
                Ok(Box::new(StubDriver::new(uuid::Uuid::new_v4(), interface, "ieee80211")))
            },
            default_channellist: None,
            requires_root: true,
        })
        .wrap_err("registering the demonstration capture-source type")?;
    Ok(())
}

/// Load the config file (if given) and CLI overlays into a
/// [`config::LoadedConfig`], returning a tracker-ready [`SourceDefaults`]
/// alongside it.
fn load(cmd: &config::CmdArgs) -> Result<(config::LoadedConfig, SourceDefaults)> {
    let mut loaded = match &cmd.config_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading config file {}", path.display()))?;
            config::parse_config(&text).wrap_err("parsing config file")?
        }
        None => config::LoadedConfig::default(),
    };
    loaded.apply_cli(cmd);
    let defaults = loaded.defaults();
    let source_defaults = SourceDefaults {
        rate: defaults.rate,
        dwell_seconds: defaults.dwell_seconds,
        slices_per_sec: tracker::SLICES_PER_SEC,
    };
    Ok((loaded, source_defaults))
}

/// Apply a loaded config's channel lists and capture sources to a fresh
/// tracker, skipping anything `enablesources` filters out.
///
/// Every configured source goes through the registered proto's factory
/// (`strong_driver = None`): which side ends up actually opening the
/// descriptor is a `start_source`/IPC question (§5's privilege
/// deferral), not something decided at intake time.
fn apply_config(tracker: &mut Tracker, loaded: &config::LoadedConfig) -> Result<()> {
    for spec in &loaded.channellists {
        tracker.add_channel_list(spec);
    }
    for source_line in &loaded.ncsources {
        let interface = source_line.split(':').next().unwrap_or(source_line);
        if !loaded.is_enabled(interface) {
            info!(interface, "source disabled by enablesources filter, skipping");
            continue;
        }
        match tracker.add_source(source_line, None) {
            Ok(id) => info!(%id, source_line, "configured source"),
            Err(err) => {
                tracker.fatal_flag().set();
                return Err(color_eyre::eyre::eyre!(err)).wrap_err("adding configured source");
            }
        }
    }
    tracker.assign_split_offsets();
    Ok(())
}

fn connect_control_socket(path: &PathBuf, role: Role) -> Result<StdUnixStream> {
    match role {
        Role::Server => {
            let _ = std::fs::remove_file(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let listener = UnixListener::bind(path)
                .wrap_err_with(|| format!("binding control socket {}", path.display()))?;
            info!(path = %path.display(), "waiting for helper to connect");
            let (stream, _) = listener.accept().wrap_err("accepting helper connection")?;
            Ok(stream)
        }
        Role::Helper => {
            let mut attempt = 0;
            loop {
                match StdUnixStream::connect(path) {
                    Ok(stream) => return Ok(stream),
                    Err(err) if attempt < 50 => {
                        attempt += 1;
                        debug!(attempt, error = %err, "control socket not ready yet, retrying");
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    Err(err) => {
                        return Err(err).wrap_err_with(|| {
                            format!("connecting to control socket {}", path.display())
                        })
                    }
                }
            }
        }
    }
}

fn main() -> Result<()> {
    early_init()?;
    install_sigint_handler();

    let args = Args::parse();
    let role = match args.role {
        RoleArg::Server => Role::Server,
        RoleArg::Helper => Role::Helper,
    };

    let (loaded, defaults) = load(&args.cmd)?;

    let mut core = Tracker::new(role, defaults).map_err(|e| color_eyre::eyre::eyre!(e))?;
    register_demo_proto(&mut core)?;
    apply_config(&mut core, &loaded)?;
    if core.fatal_flag().is_set() {
        return Err(color_eyre::eyre::eyre!("fatal configuration error, refusing to start"));
    }

    let std_stream = connect_control_socket(&args.control_socket, role)?;
    std_stream.set_nonblocking(true).wrap_err("setting control socket nonblocking")?;
    let mut control = UnixStream::from_std(std_stream);

    // The control socket is nonblocking and drained unconditionally every
    // loop iteration below, so it is never registered with `mio_poll`:
    // capture descriptors are the only fds that poll waits on. Giving the
    // control socket its own `mio_poll.poll()` call instead would double
    // up on the one `PollIntegrator::poll` already does for capture fds,
    // and since mio's epoll backend is edge-triggered, the first call
    // would consume a capture descriptor's readiness edge before the
    // second call (the one that actually services it) ever saw it.
    let mut mio_poll = Poll::new().wrap_err("creating poll instance")?;

    if role == Role::Server {
        core.queue_sync_complete();
        for frame in core.drain_outbox() {
            control.write_all(&frame.to_bytes()).wrap_err("writing control socket")?;
        }
    }

    let mut inbound_buf: Vec<u8> = Vec::new();
    let mut read_chunk = [0u8; 4096];

    info!(?role, "tracker event loop starting");

    loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            info!("interrupt received, spinning down");
            core.spindown();
            break;
        }

        core.merge_fds(&mio_poll).wrap_err("merging capture descriptors into poll")?;

        // Nonblocking drain of the control socket, independent of the
        // capture-descriptor wait below: `control` isn't registered with
        // `mio_poll`, so there is no readiness edge to miss here.
        loop {
            match control.read(&mut read_chunk) {
                Ok(0) => {
                    warn!("control socket closed by peer, shutting down");
                    core.spindown();
                    INTERRUPTED.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(n) => inbound_buf.extend_from_slice(&read_chunk[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err).wrap_err("reading control socket"),
            }
        }

        loop {
            match ipc::Frame::try_decode(&inbound_buf) {
                Ok(Some((frame, consumed))) => {
                    inbound_buf.drain(0..consumed);
                    match core.dispatch_inbound(&frame) {
                        DispatchOutcome::Applied => {}
                        other => warn!(?other, cmd_num = frame.cmd_num, "frame not applied"),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "dropping malformed control frame");
                    inbound_buf.clear();
                    break;
                }
            }
        }

        // Blocks up to one scheduler slice waiting for a capture
        // descriptor to become ready; this is what paces `tick()` below
        // rather than a separate sleep.
        let _drained = core
            .poll_sources(&mut mio_poll, Some(slice_duration()))
            .wrap_err("polling capture descriptors")?;

        core.tick();

        for frame in core.drain_outbox() {
            control.write_all(&frame.to_bytes()).wrap_err("writing control socket")?;
        }
    }

    Ok(())
}
