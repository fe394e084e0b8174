// SPDX-License-Identifier: Apache-2.0

//! Per-command payload encodings (spec.md §4.E's "Payload summary"
//! column).
//!
//! Each payload is encoded as a sequence of fixed-width little pieces
//! (`u16`/`u32` in host byte order, per [`super::frame`]) followed by
//! any variable-length bytes, length-prefixed rather than packed into
//! a fixed-size C-style array. The spec's `type[64]`/`source_line[4096]`
//! notation is read here as a validation bound enforced at
//! construction time (see [`FieldTooLong`]), not a literal byte layout
//! — the original's fixed arrays exist to make the struct `memcpy`-able
//! across a C ABI boundary, a constraint this workspace doesn't have.

use crate::frame::IpcFrameError;
use bitflags::bitflags;
use thiserror::Error;

pub const MAX_TYPE_TAG_LEN: usize = 64;
pub const MAX_SOURCE_LINE_LEN: usize = 4096;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("field exceeds maximum length of {max} bytes (got {got})")]
pub struct FieldTooLong {
    pub max: usize,
    pub got: usize,
}

fn write_bounded_string(out: &mut Vec<u8>, s: &str, max: usize) -> Result<(), FieldTooLong> {
    if s.len() > max {
        return Err(FieldTooLong {
            max,
            got: s.len(),
        });
    }
    out.extend_from_slice(&(s.len() as u32).to_ne_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_bounded_string(
    buf: &[u8],
    pos: &mut usize,
    max: usize,
) -> Result<String, IpcFrameError> {
    let len = read_u32(buf, pos)? as usize;
    if len > max {
        return Err(IpcFrameError::LengthMismatch {
            declared: len as u32,
            actual: buf.len(),
        });
    }
    if buf.len() < *pos + len {
        return Err(IpcFrameError::Truncated {
            expected: *pos + len,
            got: buf.len(),
        });
    }
    let s = String::from_utf8_lossy(&buf[*pos..*pos + len]).into_owned();
    *pos += len;
    Ok(s)
}

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_ne_bytes());
}
fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_ne_bytes());
}
fn write_bool(out: &mut Vec<u8>, v: bool) {
    out.push(u8::from(v));
}

fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16, IpcFrameError> {
    let end = *pos + 2;
    if buf.len() < end {
        return Err(IpcFrameError::Truncated {
            expected: end,
            got: buf.len(),
        });
    }
    let v = u16::from_ne_bytes(buf[*pos..end].try_into().expect("2 bytes"));
    *pos = end;
    Ok(v)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, IpcFrameError> {
    let end = *pos + 4;
    if buf.len() < end {
        return Err(IpcFrameError::Truncated {
            expected: end,
            got: buf.len(),
        });
    }
    let v = u32::from_ne_bytes(buf[*pos..end].try_into().expect("4 bytes"));
    *pos = end;
    Ok(v)
}

fn read_bool(buf: &[u8], pos: &mut usize) -> Result<bool, IpcFrameError> {
    if buf.len() < *pos + 1 {
        return Err(IpcFrameError::Truncated {
            expected: *pos + 1,
            got: buf.len(),
        });
    }
    let v = buf[*pos] != 0;
    *pos += 1;
    Ok(v)
}

/// Wire encoding of the channel-set mode a `SOURCEADD`/`SOURCESETCHAN`
/// frame is asking for. Mirrors `tracker::sources::SourceMode`, kept
/// independent so this crate doesn't depend on `pst-tracker`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum WireMode {
    Locked = 0,
    Hop = 1,
    Dwell = 2,
}

impl WireMode {
    fn to_u32(self) -> u32 {
        self as u32
    }

    fn from_u32(v: u32) -> Result<Self, IpcFrameError> {
        match v {
            0 => Ok(WireMode::Locked),
            1 => Ok(WireMode::Hop),
            2 => Ok(WireMode::Dwell),
            other => Err(IpcFrameError::LengthMismatch {
                declared: other,
                actual: 0,
            }),
        }
    }
}

/// `SOURCEADD` (S→H): id, type, source_line, channel_list_id, initial
/// channel, mode, rate, dwell, position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceAdd {
    pub id: u16,
    pub type_tag: String,
    pub source_line: String,
    pub channel_list_id: u16,
    pub initial_channel: u32,
    pub mode: WireMode,
    pub rate: u32,
    pub dwell: u32,
    pub position: u32,
}

impl SourceAdd {
    pub fn encode(&self) -> Result<Vec<u8>, FieldTooLong> {
        let mut out = Vec::new();
        write_u16(&mut out, self.id);
        write_bounded_string(&mut out, &self.type_tag, MAX_TYPE_TAG_LEN)?;
        write_bounded_string(&mut out, &self.source_line, MAX_SOURCE_LINE_LEN)?;
        write_u16(&mut out, self.channel_list_id);
        write_u32(&mut out, self.initial_channel);
        write_u32(&mut out, self.mode.to_u32());
        write_u32(&mut out, self.rate);
        write_u32(&mut out, self.dwell);
        write_u32(&mut out, self.position);
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IpcFrameError> {
        let mut pos = 0;
        let id = read_u16(buf, &mut pos)?;
        let type_tag = read_bounded_string(buf, &mut pos, MAX_TYPE_TAG_LEN)?;
        let source_line = read_bounded_string(buf, &mut pos, MAX_SOURCE_LINE_LEN)?;
        let channel_list_id = read_u16(buf, &mut pos)?;
        let initial_channel = read_u32(buf, &mut pos)?;
        let mode = WireMode::from_u32(read_u32(buf, &mut pos)?)?;
        let rate = read_u32(buf, &mut pos)?;
        let dwell = read_u32(buf, &mut pos)?;
        let position = read_u32(buf, &mut pos)?;
        Ok(SourceAdd {
            id,
            type_tag,
            source_line,
            channel_list_id,
            initial_channel,
            mode,
            rate,
            dwell,
            position,
        })
    }
}

/// `SOURCEADDCHAN` (S→H): channel_list_id, count, channels[], dwells[].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceAddChanList {
    pub channel_list_id: u16,
    pub channels: Vec<(u32, u32)>,
}

impl SourceAddChanList {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u16(&mut out, self.channel_list_id);
        write_u32(&mut out, self.channels.len() as u32);
        for (channel_number, dwell_weight) in &self.channels {
            write_u32(&mut out, *channel_number);
            write_u32(&mut out, *dwell_weight);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IpcFrameError> {
        let mut pos = 0;
        let channel_list_id = read_u16(buf, &mut pos)?;
        let count = read_u32(buf, &mut pos)? as usize;
        let mut channels = Vec::with_capacity(count);
        for _ in 0..count {
            let channel_number = read_u32(buf, &mut pos)?;
            let dwell_weight = read_u32(buf, &mut pos)?;
            channels.push((channel_number, dwell_weight));
        }
        Ok(SourceAddChanList {
            channel_list_id,
            channels,
        })
    }
}

/// `SOURCESETCHAN` (S→H): id, channel_list_id or 0, channel, mode,
/// rate, dwell, split.
///
/// See DESIGN.md's "Open Questions resolved" entry for the literal
/// `chanset_id` field mapping this preserves rather than reinterprets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceChanSet {
    pub id: u16,
    pub channel_list_id: u16,
    pub channel: u32,
    pub mode: WireMode,
    pub rate: u32,
    pub dwell: u32,
    pub split: bool,
}

impl SourceChanSet {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u16(&mut out, self.id);
        write_u16(&mut out, self.channel_list_id);
        write_u32(&mut out, self.channel);
        write_u32(&mut out, self.mode.to_u32());
        write_u32(&mut out, self.rate);
        write_u32(&mut out, self.dwell);
        write_bool(&mut out, self.split);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IpcFrameError> {
        let mut pos = 0;
        let id = read_u16(buf, &mut pos)?;
        let channel_list_id = read_u16(buf, &mut pos)?;
        let channel = read_u32(buf, &mut pos)?;
        let mode = WireMode::from_u32(read_u32(buf, &mut pos)?)?;
        let rate = read_u32(buf, &mut pos)?;
        let dwell = read_u32(buf, &mut pos)?;
        let split = read_bool(buf, &mut pos)?;
        Ok(SourceChanSet {
            id,
            channel_list_id,
            channel,
            mode,
            rate,
            dwell,
            split,
        })
    }
}

/// `SOURCERUN` (S→H): id, start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceRun {
    pub id: u16,
    pub start: bool,
}

impl SourceRun {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u16(&mut out, self.id);
        write_bool(&mut out, self.start);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IpcFrameError> {
        let mut pos = 0;
        let id = read_u16(buf, &mut pos)?;
        let start = read_bool(buf, &mut pos)?;
        Ok(SourceRun { id, start })
    }
}

/// `SOURCEREMOVE` (S→H): id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceRemove {
    pub id: u16,
}

impl SourceRemove {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u16(&mut out, self.id);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IpcFrameError> {
        let mut pos = 0;
        let id = read_u16(buf, &mut pos)?;
        Ok(SourceRemove { id })
    }
}

bitflags! {
    /// Flags carried in a `SOURCEREPORT` frame.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct SourceReportFlags: u32 {
        const RUNNING = 0b01;
        const ERROR   = 0b10;
    }
}

/// `SOURCEREPORT` (H→S): id, channel_list_id, capabilities, flags,
/// hop_elapsed (sec, usec).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceReport {
    pub id: u16,
    pub channel_list_id: u16,
    pub capabilities: u32,
    pub flags: SourceReportFlags,
    pub hop_elapsed_sec: u32,
    pub hop_elapsed_usec: u32,
}

impl SourceReport {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u16(&mut out, self.id);
        write_u16(&mut out, self.channel_list_id);
        write_u32(&mut out, self.capabilities);
        write_u32(&mut out, self.flags.bits());
        write_u32(&mut out, self.hop_elapsed_sec);
        write_u32(&mut out, self.hop_elapsed_usec);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IpcFrameError> {
        let mut pos = 0;
        let id = read_u16(buf, &mut pos)?;
        let channel_list_id = read_u16(buf, &mut pos)?;
        let capabilities = read_u32(buf, &mut pos)?;
        let flags = SourceReportFlags::from_bits_truncate(read_u32(buf, &mut pos)?);
        let hop_elapsed_sec = read_u32(buf, &mut pos)?;
        let hop_elapsed_usec = read_u32(buf, &mut pos)?;
        Ok(SourceReport {
            id,
            channel_list_id,
            capabilities,
            flags,
            hop_elapsed_sec,
            hop_elapsed_usec,
        })
    }
}

/// `SOURCEFRAME` (H→S): id, tv_sec, tv_usec, dlt, length, bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFrame {
    pub id: u16,
    pub tv_sec: u32,
    pub tv_usec: u32,
    pub dlt: u32,
    pub bytes: Vec<u8>,
}

impl SourceFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u16(&mut out, self.id);
        write_u32(&mut out, self.tv_sec);
        write_u32(&mut out, self.tv_usec);
        write_u32(&mut out, self.dlt);
        write_u32(&mut out, self.bytes.len() as u32);
        out.extend_from_slice(&self.bytes);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IpcFrameError> {
        let mut pos = 0;
        let id = read_u16(buf, &mut pos)?;
        let tv_sec = read_u32(buf, &mut pos)?;
        let tv_usec = read_u32(buf, &mut pos)?;
        let dlt = read_u32(buf, &mut pos)?;
        let length = read_u32(buf, &mut pos)? as usize;
        if buf.len() < pos + length {
            return Err(IpcFrameError::Truncated {
                expected: pos + length,
                got: buf.len(),
            });
        }
        let bytes = buf[pos..pos + length].to_vec();
        Ok(SourceFrame {
            id,
            tv_sec,
            tv_usec,
            dlt,
            bytes,
        })
    }
}

/// `SYNCCOMPLETE` (S→H): no payload, the helper's ack of initial
/// registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncComplete;

impl SyncComplete {
    pub fn encode(&self) -> Vec<u8> {
        Vec::new()
    }

    pub fn decode(_buf: &[u8]) -> Result<Self, IpcFrameError> {
        Ok(SyncComplete)
    }
}
