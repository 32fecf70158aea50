use std::io::{Seek, SeekFrom, Write};

use portcullis::Error;
use portcullis::http::multipart::RangeReader;
use portcullis::http::ranges::RangeSet;

fn fixture() -> std::fs::File {
    let mut file = tempfile::tempfile().unwrap();
    let data: Vec<u8> = (0..1000u32).map(|i| b'a' + (i % 26) as u8).collect();
    file.write_all(&data).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file
}

fn drain(reader: &mut RangeReader<std::fs::File>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 100];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[test]
fn test_single_range_from_file() {
    let ranges = RangeSet::parse("bytes=26-52").unwrap();
    let mut reader = RangeReader::new(fixture(), &ranges, "text/plain").unwrap();

    assert_eq!(reader.file_size(), 1000);
    assert_eq!(reader.content_range(), Some("bytes 26-52/1000"));
    assert!(reader.multipart_content_type().is_none());

    let body = drain(&mut reader);
    assert_eq!(body, b"abcdefghijklmnopqrstuvwxyz");
}

#[test]
fn test_multipart_body_matches_declared_size() {
    let ranges = RangeSet::parse("bytes=0-3, 500-510, 990-1000").unwrap();
    let mut reader = RangeReader::new(fixture(), &ranges, "text/plain").unwrap();
    let size = reader.size();
    let boundary = reader.boundary().unwrap().to_string();

    assert!(reader.content_range().is_none());
    assert_eq!(
        reader.multipart_content_type().unwrap(),
        format!("multipart/byteranges; boundary={boundary}")
    );

    let body = drain(&mut reader);
    assert_eq!(body.len() as u64, size);

    let text = String::from_utf8(body).unwrap();
    assert!(text.starts_with(&format!("--{boundary}\r\n")));
    assert!(text.ends_with(&format!("\r\n--{boundary}--\r\n")));
    assert_eq!(text.matches(&format!("--{boundary}\r\n")).count(), 3);
    assert!(text.contains("Content-Type: text/plain\r\nContent-Range: bytes 0-3/1000\r\n\r\nabc\r\n"));
    assert!(text.contains("Content-Range: bytes 990-1000/1000\r\n\r\ncdefghijkl\r\n"));
}

#[test]
fn test_range_past_end_is_rejected() {
    let ranges = RangeSet::parse("bytes=900-1001").unwrap();
    let res = RangeReader::new(fixture(), &ranges, "text/plain");
    assert!(matches!(res, Err(Error::InvalidRange)));
}

#[test]
fn test_empty_range_yields_empty_body() {
    let ranges = RangeSet::parse("bytes=10-10").unwrap();
    let mut reader = RangeReader::new(fixture(), &ranges, "text/plain").unwrap();
    assert_eq!(reader.size(), 0);
    assert!(drain(&mut reader).is_empty());
}
