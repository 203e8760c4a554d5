//! Buffered body collection for urlencoded, JSON and raw requests.
//!
//! Reading stops at the first chunk that pushes the total past the limit; the
//! buffer is dropped and the result carries the overflow marker instead of an
//! error, so the dispatcher can still answer with `#431`.

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use crate::error::BodyError;

/// Collected body bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    pub bytes: Bytes,
    pub overflow: bool,
}

impl Collected {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Read `body` up to `limit` bytes.
pub async fn collect(body: Body, limit: usize) -> Result<Collected, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buffer = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BodyError::Stream(e.to_string()))?;
        if buffer.len() + chunk.len() > limit {
            tracing::debug!(limit = limit, "Request body exceeds limit");
            return Ok(Collected {
                bytes: Bytes::new(),
                overflow: true,
            });
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(Collected {
        bytes: buffer.freeze(),
        overflow: false,
    })
}

/// Parse an urlencoded body into ordered pairs.
pub fn parse_form(bytes: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(bytes).into_owned().collect()
}
