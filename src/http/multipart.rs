//! Range and `multipart/byteranges` response bodies.
//!
//! [`RangeReader`] turns a [`RangeSet`] and a seekable source into the exact
//! byte stream of a `206 Partial Content` body. A single range is a plain
//! slice of the source. Several ranges become a multipart body: one part per
//! range, each introduced by a boundary line and its own `Content-Type` and
//! `Content-Range` headers, followed by a closing boundary.
//!
//! The plan is built once. Parts are stored back to front so the part being
//! sent is always the last element and can be popped in O(1).

use std::io::{self, Read, Seek, SeekFrom};

use rand::Rng;

use crate::error::Result;
use crate::http::body::BodySource;
use crate::http::ranges::RangeSet;

const BOUNDARY_LEN: usize = 18;
const HEX: &[u8; 16] = b"0123456789abcdef";

/// Random boundary of hex digits.
pub fn make_boundary() -> String {
    let mut rng = rand::thread_rng();
    (0..BOUNDARY_LEN)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

#[derive(Debug)]
struct Segment {
    header: String,
    header_sent: usize,
    start: u64,
    end: u64,
}

impl Segment {
    fn len(&self) -> u64 {
        self.header.len() as u64 + (self.end - self.start)
    }
}

#[derive(Debug)]
enum Plan {
    Single { remaining: u64 },
    Multipart { boundary: String, segments: Vec<Segment> },
}

#[derive(Debug)]
pub struct RangeReader<R> {
    source: R,
    plan: Plan,
    file_size: u64,
    size: u64,
    consumed: u64,
    content_range: Option<String>,
}

impl<R: Read + Seek> RangeReader<R> {
    /// Validates `ranges` against the source and prepares the body.
    ///
    /// Fails with [`Error::InvalidRange`](crate::Error::InvalidRange) if any
    /// range ends past the source or before its start.
    pub fn new(mut source: R, ranges: &RangeSet, content_type: &str) -> Result<Self> {
        let file_size = source.seek(SeekFrom::End(0))?;
        ranges.validate(file_size)?;

        if let [range] = ranges.ranges.as_slice() {
            source.seek(SeekFrom::Start(range.start))?;
            return Ok(Self {
                source,
                plan: Plan::Single {
                    remaining: range.len(),
                },
                file_size,
                size: range.len(),
                consumed: 0,
                content_range: Some(range.content_range(file_size)),
            });
        }

        let boundary = make_boundary();
        let mut segments = Vec::with_capacity(ranges.ranges.len() + 1);
        for (i, range) in ranges.ranges.iter().enumerate() {
            let lead = if i == 0 { "" } else { "\r\n" };
            segments.push(Segment {
                header: format!(
                    "{lead}--{boundary}\r\nContent-Type: {content_type}\r\nContent-Range: {}\r\n\r\n",
                    range.content_range(file_size)
                ),
                header_sent: 0,
                start: range.start,
                end: range.end,
            });
        }
        segments.push(Segment {
            header: format!("\r\n--{boundary}--\r\n"),
            header_sent: 0,
            start: 0,
            end: 0,
        });
        let size = segments.iter().map(Segment::len).sum();
        segments.reverse();

        Ok(Self {
            source,
            plan: Plan::Multipart { boundary, segments },
            file_size,
            size,
            consumed: 0,
            content_range: None,
        })
    }

    /// Total number of body bytes, headers and boundaries included.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.consumed
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn boundary(&self) -> Option<&str> {
        match &self.plan {
            Plan::Multipart { boundary, .. } => Some(boundary),
            Plan::Single { .. } => None,
        }
    }

    /// `Content-Range` header value for a single range body.
    pub fn content_range(&self) -> Option<&str> {
        self.content_range.as_deref()
    }

    /// `Content-Type` header value for a multipart body.
    pub fn multipart_content_type(&self) -> Option<String> {
        self.boundary()
            .map(|b| format!("multipart/byteranges; boundary={b}"))
    }

    /// Writes the next bytes of the body into `buf`. Returns 0 only once
    /// the whole body was produced.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let written = match &mut self.plan {
            Plan::Single { remaining } => {
                if *remaining == 0 || buf.is_empty() {
                    return Ok(0);
                }
                let want = (*remaining).min(buf.len() as u64) as usize;
                let n = self.source.read(&mut buf[..want])?;
                if n == 0 {
                    return Err(short_source());
                }
                *remaining -= n as u64;
                n
            }
            Plan::Multipart { segments, .. } => {
                Self::read_segments(&mut self.source, segments, buf)?
            }
        };
        self.consumed += written as u64;
        Ok(written)
    }

    fn read_segments(source: &mut R, segments: &mut Vec<Segment>, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let Some(segment) = segments.last_mut() else {
                break;
            };
            let room = buf.len() - written;

            if segment.header_sent < segment.header.len() {
                let pending = &segment.header.as_bytes()[segment.header_sent..];
                let n = pending.len().min(room);
                buf[written..written + n].copy_from_slice(&pending[..n]);
                segment.header_sent += n;
                written += n;
                continue;
            }

            if segment.start < segment.end {
                let want = (segment.end - segment.start).min(room as u64) as usize;
                source.seek(SeekFrom::Start(segment.start))?;
                let n = source.read(&mut buf[written..written + want])?;
                if n == 0 {
                    return Err(short_source());
                }
                segment.start += n as u64;
                written += n;
                continue;
            }

            segments.pop();
        }
        Ok(written)
    }
}

fn short_source() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "range source shrank while reading")
}

impl<R: Read + Seek + Send> BodySource for RangeReader<R> {
    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}
