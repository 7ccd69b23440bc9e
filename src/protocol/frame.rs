//! Frame codec.
//!
//! Every unit on a worker pipe is a frame: an 8 byte textual header followed
//! by the raw payload.
//!
//! ```text
//! offset 0..3 : payload length, 4 hex digits, space padded on the left
//! offset 4    : '_'
//! offset 5..6 : command id, 2 hex digits, space padded on the left
//! offset 7    : '_'
//! offset 8..  : payload (only when length > 0)
//! ```
//!
//! The header has a fixed width so a peer can pick it up with a single
//! read. Reads are retried on `EINTR`; a stream that ends part way through
//! a frame is a fatal [`FrameError::ShortRead`].
use std::io::{self, ErrorKind, Read, Write};

use log::trace;
use thiserror::Error;

/// Width of the textual frame header.
pub const HEADER_SIZE: usize = 8;

/// Largest payload the receiving side pre-allocates room for.
pub const MAX_PAYLOAD: usize = 0xFFFF;

/// Largest command id that fits the two hex digit header field.
pub const MAX_COMMAND: u16 = 0xFF;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("short write: expected {expected} bytes, wrote {wrote}")]
    ShortWrite { expected: usize, wrote: usize },

    #[error("payload of {len} bytes exceeds the {max} byte buffer")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("command id {0:#x} does not fit the frame header")]
    CommandOutOfRange(u16),

    #[error("malformed frame header '{0}'")]
    MalformedHeader(String),
}

/// A received frame, borrowing the reader's buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub command: u16,
    pub payload: &'a [u8],
}

/// Anything that can put a frame on the wire.
pub trait FrameSender {
    fn send_frame(&mut self, command: u16, payload: &[u8]) -> Result<(), FrameError>;
}

pub fn encode_header(len: usize, command: u16) -> Result<[u8; HEADER_SIZE], FrameError> {
    if len > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }
    if command > MAX_COMMAND {
        return Err(FrameError::CommandOutOfRange(command));
    }

    let text = format!("{len:4x}_{command:2x}_");
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(text.as_bytes());
    Ok(header)
}

pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(usize, u16), FrameError> {
    let malformed = || FrameError::MalformedHeader(String::from_utf8_lossy(header).into_owned());

    if header[4] != b'_' || header[7] != b'_' {
        return Err(malformed());
    }

    let field = |bytes: &[u8]| -> Result<usize, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| malformed())?;
        let digits = text.trim_start_matches(' ');
        if digits.is_empty() {
            return Err(malformed());
        }
        usize::from_str_radix(digits, 16).map_err(|_| malformed())
    };

    let len = field(&header[0..4])?;
    let command = field(&header[5..7])? as u16;
    Ok((len, command))
}

/// Reads until `buf` is full or the stream ends, retrying on `EINTR`.
/// Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn write_full<W: Write>(writer: &mut W, buf: &[u8]) -> Result<(), FrameError> {
    let mut wrote = 0;
    while wrote < buf.len() {
        match writer.write(&buf[wrote..]) {
            Ok(0) => {
                return Err(FrameError::ShortWrite {
                    expected: buf.len(),
                    wrote,
                });
            }
            Ok(n) => wrote += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Receiving half of the codec.
///
/// The payload buffer is allocated once and reused; after every successful
/// read the byte following the payload is set to NUL.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    max_payload: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_payload(inner, MAX_PAYLOAD)
    }

    pub fn with_max_payload(inner: R, max_payload: usize) -> Self {
        let max_payload = max_payload.min(MAX_PAYLOAD);
        Self {
            inner,
            buffer: vec![0; max_payload + 1],
            max_payload,
        }
    }

    /// Blocks for one frame. `Ok(None)` means the peer closed the stream
    /// cleanly between frames.
    pub fn receive(&mut self) -> Result<Option<Frame<'_>>, FrameError> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.inner, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(FrameError::ShortRead {
                expected: HEADER_SIZE,
                got,
            });
        }

        let (len, command) = decode_header(&header)?;
        if len > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                len,
                max: self.max_payload,
            });
        }

        if len > 0 {
            let got = read_full(&mut self.inner, &mut self.buffer[..len])?;
            if got < len {
                return Err(FrameError::ShortRead { expected: len, got });
            }
        }
        self.buffer[len] = 0;

        trace!("received frame {command:#04x} ({len} bytes)");
        Ok(Some(Frame {
            command,
            payload: &self.buffer[..len],
        }))
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

/// Sending half of the codec.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    max_payload: usize,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_max_payload(inner, MAX_PAYLOAD)
    }

    pub fn with_max_payload(inner: W, max_payload: usize) -> Self {
        Self {
            inner,
            max_payload: max_payload.min(MAX_PAYLOAD),
        }
    }

    /// Writes one frame. Oversized payloads are rejected before anything
    /// reaches the stream.
    pub fn send(&mut self, command: u16, payload: &[u8]) -> Result<(), FrameError> {
        if payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload,
            });
        }

        let header = encode_header(payload.len(), command)?;
        write_full(&mut self.inner, &header)?;
        write_full(&mut self.inner, payload)?;
        self.inner.flush()?;

        trace!("sent frame {command:#04x} ({} bytes)", payload.len());
        Ok(())
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> FrameSender for FrameWriter<W> {
    fn send_frame(&mut self, command: u16, payload: &[u8]) -> Result<(), FrameError> {
        self.send(command, payload)
    }
}
