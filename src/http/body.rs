//! Pull-based response body sources.
//!
//! The session asks a source for bytes chunk by chunk while it writes the
//! response, so large files never have to sit in memory.

use std::io::{self, Read};

pub trait BodySource: Send {
    /// Total number of bytes this source yields, if known in advance.
    /// Sources of unknown size are sent with chunked transfer coding.
    fn size(&self) -> Option<u64>;

    /// Fills `buf` with the next bytes. Returns 0 only once exhausted.
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// An in-memory body.
pub struct BytesBody {
    data: Vec<u8>,
    pos: usize,
}

impl BytesBody {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

impl BodySource for BytesBody {
    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = &self.data[self.pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// A body read from any [`Read`] implementation, e.g. an opened file.
pub struct ReaderBody<R> {
    reader: R,
    size: Option<u64>,
    remaining: Option<u64>,
}

impl<R: Read + Send> ReaderBody<R> {
    /// A body of exactly `size` bytes.
    pub fn sized(reader: R, size: u64) -> Self {
        Self {
            reader,
            size: Some(size),
            remaining: Some(size),
        }
    }

    /// A body that lasts until the reader reports end of file.
    pub fn until_eof(reader: R) -> Self {
        Self {
            reader,
            size: None,
            remaining: None,
        }
    }
}

impl<R: Read + Send> BodySource for ReaderBody<R> {
    fn size(&self) -> Option<u64> {
        self.size
    }

    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(remaining) = self.remaining else {
            return self.reader.read(buf);
        };
        if remaining == 0 {
            return Ok(0);
        }
        let want = remaining.min(buf.len() as u64) as usize;
        let n = self.reader.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "body source ended before its declared size",
            ));
        }
        self.remaining = Some(remaining - n as u64);
        Ok(n)
    }
}
