//! Checksummed frame codec shared by WAL, segment and snapshot files
//!
//! Frame layout (little endian):
//!
//! ```text
//! | body_len (u32) | crc32(body) (u32) | body (body_len bytes) |
//! ```
//!
//! Bodies are built with `BodyWriter` and parsed with `BodyReader`; strings
//! and byte blobs are u32 length-prefixed.

use std::io::{self, Read};

use crc32fast::Hasher;

/// Frame header size: length + checksum
pub const FRAME_HEADER_LEN: u64 = 8;

/// Upper bound on a single frame body. Anything larger is treated as
/// corruption rather than allocated.
pub const MAX_FRAME_BODY: u32 = 64 * 1024 * 1024;

/// CRC32 (IEEE) over `data`
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// fsync a directory so entries created or removed in it are durable
pub fn fsync_dir(path: &std::path::Path) -> io::Result<()> {
    std::fs::File::open(path)?.sync_all()
}

/// Outcome of reading one frame
#[derive(Debug)]
pub enum FrameRead {
    /// A complete frame whose checksum verified
    Frame { body: Vec<u8>, frame_len: u64 },
    /// Clean end of input at a frame boundary
    Eof,
    /// Input ended inside the frame
    Truncated,
    /// Frame is complete but damaged
    Corrupt { reason: String, frame_len: u64 },
}

/// Read one frame. `remaining` is the number of bytes left in the input
/// starting at the frame, used to tell truncation from damage.
pub fn read_frame<R: Read>(reader: &mut R, remaining: u64) -> io::Result<FrameRead> {
    if remaining == 0 {
        return Ok(FrameRead::Eof);
    }
    if remaining < FRAME_HEADER_LEN {
        return Ok(FrameRead::Truncated);
    }

    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    let body_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    if body_len > MAX_FRAME_BODY {
        return Ok(FrameRead::Corrupt {
            reason: format!("frame length {} exceeds limit", body_len),
            frame_len: remaining,
        });
    }

    let frame_len = FRAME_HEADER_LEN + body_len as u64;
    if frame_len > remaining {
        return Ok(FrameRead::Truncated);
    }

    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body)?;

    let actual = compute_checksum(&body);
    if actual != expected {
        return Ok(FrameRead::Corrupt {
            reason: format!(
                "checksum mismatch: expected {:08x}, found {:08x}",
                expected, actual
            ),
            frame_len,
        });
    }

    Ok(FrameRead::Frame { body, frame_len })
}

/// Little-endian body builder
#[derive(Debug, Default)]
pub struct BodyWriter {
    buf: Vec<u8>,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    pub fn put_str(&mut self, v: &str) -> &mut Self {
        self.put_bytes(v.as_bytes())
    }

    /// Wrap the body in a frame header
    pub fn into_frame(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.buf.len() + FRAME_HEADER_LEN as usize);
        frame.extend_from_slice(&(self.buf.len() as u32).to_le_bytes());
        frame.extend_from_slice(&compute_checksum(&self.buf).to_le_bytes());
        frame.extend_from_slice(&self.buf);
        frame
    }
}

/// Cursor over a frame body
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "frame body shorter than declared fields",
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> io::Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> io::Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn get_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn get_string(&mut self) -> io::Result<String> {
        String::from_utf8(self.get_bytes()?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Returns true if every byte has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }
}
