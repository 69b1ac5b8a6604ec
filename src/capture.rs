//! Buffers a handler's response so it can be stored before it is forwarded.
//!
//! The inner service never learns that its output is captured: whatever
//! status and headers it sets are recorded as-is and replayed on later hits.
//! Bodies are fully materialized in memory.

use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use http::{Response, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;

use crate::backend::CachedEntry;
use crate::error::BoxError;

/// Accumulates the status, headers and body written by one handler execution.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    status: Option<StatusCode>,
    headers: Vec<(String, Vec<u8>)>,
    body: BytesMut,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Records `value` for `name` unless the name was already recorded.
    pub fn set_header(&mut self, name: &str, value: &[u8]) {
        let name = name.to_ascii_lowercase();
        if self.headers.iter().any(|(stored, _)| *stored == name) {
            return;
        }
        self.headers.push((name, value.to_vec()));
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// Status written so far, `200 OK` when none was set.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Drains `response` into a fresh buffer and returns its snapshot.
    ///
    /// Trailers are dropped. A body error is returned as the handler's error.
    pub async fn capture<B>(response: Response<B>) -> Result<Snapshot, BoxError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = response.into_parts();
        let mut buffer = Self::new();
        buffer.set_status(parts.status);
        for name in parts.headers.keys() {
            if let Some(value) = parts.headers.get(name) {
                buffer.set_header(name.as_str(), value.as_bytes());
            }
        }

        let mut body = std::pin::pin!(body);
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(Into::into)?;
            if let Ok(data) = frame.into_data() {
                buffer.write(&data);
            }
        }

        Ok(buffer.into_snapshot())
    }

    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            status: self.status(),
            headers: self.headers,
            body: self.body.freeze(),
        }
    }
}

/// The cache-worthy result of a handler execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub status: StatusCode,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

impl Snapshot {
    /// Stamps the snapshot with a generation time and ETag.
    pub fn into_entry(self, etag: String, last_valid: SystemTime) -> CachedEntry {
        CachedEntry::new(self.status, self.headers, self.body, last_valid, etag)
    }
}
