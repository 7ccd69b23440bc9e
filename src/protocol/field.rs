//! Fixed-width payload fields.
//!
//! Integers and flags sit at fixed offsets ahead of any variable-length
//! string so they can be read back without a full parse. Integers are
//! space-padded lower-case hex, flags a single `0`/`1`, strings are
//! NUL-terminated.
use super::{ChannelError, CommandId};

#[derive(Debug, Default)]
pub(crate) struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&mut self, value: bool) -> &mut Self {
        self.buf.push(if value { b'1' } else { b'0' });
        self
    }

    /// `{value:8x}_`, rejecting values wider than the field.
    pub fn hex8(&mut self, field: &'static str, value: u64) -> Result<&mut Self, ChannelError> {
        if value > u64::from(u32::MAX) {
            return Err(ChannelError::FieldOverflow { field, value });
        }
        self.buf.extend(format!("{value:8x}_").as_bytes());
        Ok(self)
    }

    /// `{value:4x}_`, used by error codes.
    pub fn hex4(&mut self, value: u16) -> &mut Self {
        self.buf.extend(format!("{value:4x}_").as_bytes());
        self
    }

    /// A lone `{value:8x}` number closed by NUL. Wider values are written
    /// unpadded since nothing follows them.
    pub fn number(&mut self, value: u64) -> &mut Self {
        self.buf.extend(format!("{value:8x}").as_bytes());
        self.buf.push(0);
        self
    }

    pub fn string(&mut self, field: &'static str, value: &str) -> Result<&mut Self, ChannelError> {
        if value.as_bytes().contains(&0) {
            return Err(ChannelError::EmbeddedNul(field));
        }
        self.buf.extend(value.as_bytes());
        self.buf.push(0);
        Ok(self)
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend(value);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[derive(Debug)]
pub(crate) struct PayloadReader<'a> {
    command: CommandId,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(command: CommandId, bytes: &'a [u8]) -> Self {
        Self {
            command,
            bytes,
            pos: 0,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> ChannelError {
        ChannelError::Malformed {
            command: self.command,
            reason: reason.into(),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ChannelError> {
        let end = self.pos + len;
        if end > self.bytes.len() {
            return Err(self.malformed(format!(
                "needed {len} bytes at offset {}, payload is {} bytes",
                self.pos,
                self.bytes.len()
            )));
        }
        let bytes: &'a [u8] = self.bytes;
        let out = &bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn parse_hex(&self, raw: &[u8]) -> Result<u64, ChannelError> {
        let text = std::str::from_utf8(raw).map_err(|_| self.malformed("non-ASCII number"))?;
        let digits = text.trim_start_matches(' ');
        u64::from_str_radix(digits, 16)
            .map_err(|_| self.malformed(format!("invalid hex field '{text}'")))
    }

    fn separator(&mut self) -> Result<(), ChannelError> {
        match self.take(1)? {
            b"_" => Ok(()),
            other => Err(self.malformed(format!("expected '_', found {other:?}"))),
        }
    }

    pub fn flag(&mut self) -> Result<bool, ChannelError> {
        match self.take(1)? {
            b"0" => Ok(false),
            b"1" => Ok(true),
            other => Err(self.malformed(format!("invalid flag {other:?}"))),
        }
    }

    pub fn hex8(&mut self) -> Result<u64, ChannelError> {
        let raw = self.take(8)?;
        let value = self.parse_hex(raw)?;
        self.separator()?;
        Ok(value)
    }

    pub fn hex4(&mut self) -> Result<u16, ChannelError> {
        let raw = self.take(4)?;
        let value = self.parse_hex(raw)?;
        self.separator()?;
        Ok(value as u16)
    }

    pub fn number(&mut self) -> Result<u64, ChannelError> {
        let raw = self.until_nul()?;
        self.parse_hex(raw)
    }

    pub fn string(&mut self) -> Result<String, ChannelError> {
        let raw = self.until_nul()?;
        String::from_utf8(raw.to_vec()).map_err(|_| self.malformed("string is not UTF-8"))
    }

    fn until_nul(&mut self) -> Result<&'a [u8], ChannelError> {
        let bytes: &'a [u8] = self.bytes;
        let rest = &bytes[self.pos..];
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| self.malformed("unterminated string"))?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let bytes: &'a [u8] = self.bytes;
        let out = &bytes[self.pos..];
        self.pos = bytes.len();
        out
    }
}
