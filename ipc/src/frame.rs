// SPDX-License-Identifier: Apache-2.0

use static_assertions::const_assert_eq;
use thiserror::Error;

/// `cmd_num: u32`, `ack_flag: u32`, `data_len: u32` — 12 bytes, host
/// byte order (spec.md §4.E: "the two ends are the same process
/// family", so there is no cross-architecture concern that would
/// require a wire-fixed endianness).
pub const HEADER_LEN: usize = 12;
const_assert_eq!(HEADER_LEN, 3 * size_of::<u32>());

/// The fixed-size header in front of every IPC frame's payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub cmd_num: u32,
    pub ack_flag: bool,
    pub data_len: u32,
}

impl FrameHeader {
    #[must_use]
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.cmd_num.to_ne_bytes());
        buf[4..8].copy_from_slice(&u32::from(self.ack_flag).to_ne_bytes());
        buf[8..12].copy_from_slice(&self.data_len.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, IpcFrameError> {
        if buf.len() < HEADER_LEN {
            return Err(IpcFrameError::Truncated {
                expected: HEADER_LEN,
                got: buf.len(),
            });
        }
        let cmd_num = u32::from_ne_bytes(buf[0..4].try_into().expect("slice is 4 bytes"));
        let ack_flag = u32::from_ne_bytes(buf[4..8].try_into().expect("slice is 4 bytes")) != 0;
        let data_len = u32::from_ne_bytes(buf[8..12].try_into().expect("slice is 4 bytes"));
        Ok(FrameHeader {
            cmd_num,
            ack_flag,
            data_len,
        })
    }
}

/// A full IPC frame: header plus command-specific payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub cmd_num: u32,
    pub ack_flag: bool,
    pub data: Vec<u8>,
}

/// An IPC structural failure (spec.md §7, kind 4): a frame shorter than
/// its declared struct, or a declared length that disagrees with what
/// actually arrived. Callers are expected to drop the frame and count
/// it toward a rate-limited warning log rather than treat it as fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IpcFrameError {
    #[error("frame truncated: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("frame declared data_len {declared} but payload was {actual} bytes")]
    LengthMismatch { declared: u32, actual: usize },
}

impl Frame {
    #[must_use]
    pub fn new(cmd_num: u32, ack_flag: bool, data: Vec<u8>) -> Self {
        Frame {
            cmd_num,
            ack_flag,
            data,
        }
    }

    /// Serialize header + payload for writing to the control socket.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = FrameHeader {
            cmd_num: self.cmd_num,
            ack_flag: self.ack_flag,
            data_len: self.data.len() as u32,
        };
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode one complete frame from the front of `buf`, returning the
    /// frame and the number of bytes consumed, or `None` if `buf`
    /// doesn't yet hold a complete frame (the caller should wait for
    /// more bytes — this is not an error, just a partial read, per
    /// spec.md §5's note that IPC writes may short-write).
    pub fn try_decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, IpcFrameError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::from_bytes(buf)?;
        let data_len = header.data_len as usize;
        let total = HEADER_LEN + data_len;
        if buf.len() < total {
            return Ok(None);
        }
        let data = buf[HEADER_LEN..total].to_vec();
        Ok(Some((
            Frame {
                cmd_num: header.cmd_num,
                ack_flag: header.ack_flag,
                data,
            },
            total,
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips() {
        let frame = Frame::new(7, true, vec![1, 2, 3, 4, 5]);
        let bytes = frame.to_bytes();
        let (decoded, consumed) = Frame::try_decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn partial_frame_is_not_an_error() {
        let frame = Frame::new(1, false, vec![9; 32]);
        let bytes = frame.to_bytes();
        assert_eq!(Frame::try_decode(&bytes[..HEADER_LEN + 5]).unwrap(), None);
        assert_eq!(Frame::try_decode(&bytes[..4]).unwrap(), None);
    }

    #[test]
    fn header_round_trips() {
        let header = FrameHeader {
            cmd_num: 42,
            ack_flag: true,
            data_len: 100,
        };
        assert_eq!(FrameHeader::from_bytes(&header.to_bytes()).unwrap(), header);
    }
}
