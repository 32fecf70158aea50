use std::fs::File;

use crate::continuation::Continuation;
use crate::error::{Error, Result};
use crate::http::body::ReaderBody;
use crate::http::multipart::RangeReader;
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::session::{SendBuilder, Session};

impl Session {
    /// Sends `file` as the answer to `request`, honouring its `Range`
    /// header: one range yields a plain `206`, several a
    /// `multipart/byteranges` body. Unsatisfiable ranges get a `400`.
    pub fn send_file(&self, request: &Request, file: File, content_type: &str) -> Continuation<bool> {
        match self.file_response(request, file, content_type) {
            Ok(builder) => builder.commit(),
            Err(Error::InvalidRange) => self
                .send_standard_response(StatusCode::BadRequest, Some("invalid range"))
                .commit(),
            Err(e) => Continuation::rejected(e),
        }
    }

    fn file_response(&self, request: &Request, file: File, content_type: &str) -> Result<SendBuilder> {
        let size = file.metadata()?.len();

        let Some(ranges) = request.ranges()? else {
            let response = Response::builder(StatusCode::Ok)
                .header("Content-Type", content_type)
                .header("Accept-Ranges", "bytes")
                .build();
            return Ok(self.send(response).body_source(ReaderBody::sized(file, size)));
        };
        if !ranges.unit.eq_ignore_ascii_case("bytes") {
            return Err(Error::InvalidRange);
        }

        let reader = RangeReader::new(file, &ranges, content_type)?;
        let mut builder = Response::builder(StatusCode::PartialContent).header("Accept-Ranges", "bytes");
        if let Some(content_range) = reader.content_range() {
            builder = builder
                .header("Content-Range", content_range)
                .header("Content-Type", content_type);
        } else if let Some(multipart) = reader.multipart_content_type() {
            builder = builder.header("Content-Type", multipart);
        }
        Ok(self.send(builder.build()).body_source(reader))
    }
}
