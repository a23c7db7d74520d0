//! Big-endian framing helpers shared by the envelope and onion formats.

use pars_identity::SessionId;

/// A framing violation. Callers map it to their own error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WireError(pub &'static str);

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

pub(crate) type WireResult<T> = std::result::Result<T, WireError>;

/// Cursor over untrusted bytes. Every read is bounds-checked.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(WireError("truncated input"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    fn array<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> WireResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> WireResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> WireResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> WireResult<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> WireResult<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// A `u32` length followed by that many bytes, at most `max`.
    pub(crate) fn bytes_u32(&mut self, max: usize) -> WireResult<&'a [u8]> {
        let len = self.u32()? as usize;
        if len > max {
            return Err(WireError("length field exceeds limit"));
        }
        self.take(len)
    }

    /// A `u16` length followed by that many bytes, at most `max`.
    pub(crate) fn bytes_u16(&mut self, max: usize) -> WireResult<&'a [u8]> {
        let len = self.u16()? as usize;
        if len > max {
            return Err(WireError("length field exceeds limit"));
        }
        self.take(len)
    }

    pub(crate) fn session_id(&mut self) -> WireResult<SessionId> {
        SessionId::from_bytes(self.take(SessionId::WIRE_SIZE)?)
            .map_err(|_| WireError("invalid session id"))
    }

    /// Fails unless every byte was consumed.
    pub(crate) fn finish(&self) -> WireResult<()> {
        if self.remaining() != 0 {
            return Err(WireError("trailing bytes"));
        }
        Ok(())
    }
}

/// Append a `u32` length prefix and the bytes.
pub(crate) fn put_bytes_u32(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Append a `u16` length prefix and the bytes.
pub(crate) fn put_bytes_u16(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}
