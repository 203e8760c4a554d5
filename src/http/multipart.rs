//! Multipart body decoding.
//!
//! # Responsibilities
//! - Split `multipart/form-data` bodies into fields and uploaded files
//! - Stream `multipart/x-mixed-replace` parts one at a time
//! - Enforce the route's size limit and run the XSS predicate on text fields
//!
//! # Data Flow
//! ```text
//! Body data stream
//!     → PartSplitter (boundary search across chunk edges)
//!     → RawPart (headers + bytes)
//!     → form-data: text field | file written to the temp directory
//!     → mixed: MixedPart yielded to the dispatcher
//! ```
//!
//! # Design Decisions
//! - `MultipartDecoder` is the seam; applications can plug in their own decoder
//! - The buffered default holds one part at a time in memory

use std::collections::VecDeque;
use std::path::PathBuf;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, StreamExt};
use serde::Serialize;

use crate::error::BodyError;
use crate::routing::handler::XssDetector;

/// Limits applied while decoding one request.
#[derive(Clone)]
pub struct DecodeLimits {
    /// Maximum total body size in bytes; a mixed body applies it per part.
    pub max_size: usize,
    pub temp_dir: PathBuf,
    pub xss: Option<XssDetector>,
}

impl std::fmt::Debug for DecodeLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeLimits")
            .field("max_size", &self.max_size)
            .field("temp_dir", &self.temp_dir)
            .field("xss", &self.xss.is_some())
            .finish()
    }
}

/// A file part stored in the temp directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    /// Form field name.
    pub name: String,
    /// Client-supplied file name.
    pub filename: String,
    pub content_type: String,
    pub path: PathBuf,
    pub size: usize,
}

/// Outcome of a form-data decode.
#[derive(Debug, Default)]
pub struct Decoded {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadedFile>,
    /// The size limit was exceeded; fields and files are incomplete.
    pub overflow: bool,
    /// The XSS predicate matched a text field.
    pub xss: bool,
}

/// One part of a `multipart/x-mixed-replace` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedPart {
    pub headers: Vec<(String, String)>,
    pub content_type: String,
    pub body: Bytes,
}

/// Pluggable multipart decoder.
pub trait MultipartDecoder: Send + Sync {
    fn decode(
        &self,
        body: Body,
        boundary: String,
        limits: DecodeLimits,
    ) -> BoxFuture<'static, Result<Decoded, BodyError>>;

    fn decode_mixed(
        &self,
        body: Body,
        boundary: String,
        limits: DecodeLimits,
    ) -> BoxStream<'static, Result<MixedPart, BodyError>>;
}

/// Default decoder built on [`PartSplitter`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferedDecoder;

impl MultipartDecoder for BufferedDecoder {
    fn decode(
        &self,
        body: Body,
        boundary: String,
        limits: DecodeLimits,
    ) -> BoxFuture<'static, Result<Decoded, BodyError>> {
        decode_form(body, boundary, limits).boxed()
    }

    fn decode_mixed(
        &self,
        body: Body,
        boundary: String,
        limits: DecodeLimits,
    ) -> BoxStream<'static, Result<MixedPart, BodyError>> {
        decode_mixed(body, boundary, limits).boxed()
    }
}

async fn decode_form(body: Body, boundary: String, limits: DecodeLimits) -> Result<Decoded, BodyError> {
    let mut decoded = Decoded::default();
    match fill_form(body, &boundary, &limits, &mut decoded).await {
        Ok(()) => Ok(decoded),
        Err(e) => {
            // Parts stored before the failure never reach the request.
            remove_files(&decoded.files).await;
            Err(e)
        }
    }
}

async fn fill_form(
    body: Body,
    boundary: &str,
    limits: &DecodeLimits,
    decoded: &mut Decoded,
) -> Result<(), BodyError> {
    let mut splitter = PartSplitter::new(boundary);
    let mut data = body.into_data_stream();
    let mut total = 0usize;

    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(|e| BodyError::Stream(e.to_string()))?;
        total += chunk.len();
        if total > limits.max_size {
            decoded.overflow = true;
            decoded.fields.clear();
            remove_files(&decoded.files).await;
            decoded.files.clear();
            return Ok(());
        }
        for part in splitter.push(&chunk)? {
            store_part(part, limits, decoded).await?;
        }
    }
    splitter.finish()
}

async fn store_part(part: RawPart, limits: &DecodeLimits, decoded: &mut Decoded) -> Result<(), BodyError> {
    let disposition = part.header("content-disposition").unwrap_or_default();
    let (name, filename) = parse_disposition(disposition);
    let name = name.unwrap_or_default();

    match filename {
        Some(filename) => {
            if filename.is_empty() && part.body.is_empty() {
                return Ok(());
            }
            let path = limits
                .temp_dir
                .join(format!("upload-{}", uuid::Uuid::new_v4().simple()));
            tokio::fs::write(&path, &part.body).await?;
            tracing::trace!(field = %name, path = %path.display(), size = part.body.len(), "Upload stored");
            decoded.files.push(UploadedFile {
                name,
                filename,
                content_type: part
                    .header("content-type")
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                path,
                size: part.body.len(),
            });
        }
        None => {
            let value = String::from_utf8_lossy(&part.body).into_owned();
            if let Some(xss) = &limits.xss {
                if xss(&value) {
                    decoded.xss = true;
                }
            }
            decoded.fields.push((name, value));
        }
    }
    Ok(())
}

async fn remove_files(files: &[UploadedFile]) {
    for file in files {
        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            tracing::debug!(path = %file.path.display(), error = %e, "Failed to remove upload");
        }
    }
}

fn decode_mixed(
    body: Body,
    boundary: String,
    limits: DecodeLimits,
) -> impl futures_util::Stream<Item = Result<MixedPart, BodyError>> + Send + 'static {
    struct State {
        data: axum::body::BodyDataStream,
        splitter: PartSplitter,
        ready: VecDeque<RawPart>,
        max_size: usize,
        finished: bool,
    }

    let state = State {
        data: body.into_data_stream(),
        splitter: PartSplitter::new(&boundary),
        ready: VecDeque::new(),
        max_size: limits.max_size,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(part) = state.ready.pop_front() {
                let content_type = part.header("content-type").unwrap_or_default().to_string();
                let item = MixedPart {
                    headers: part.headers,
                    content_type,
                    body: part.body,
                };
                return Some((Ok(item), state));
            }
            if state.finished {
                return None;
            }
            if state.splitter.pending() > state.max_size {
                state.finished = true;
                return Some((Err(BodyError::Overflow(state.max_size)), state));
            }

            match state.data.next().await {
                Some(Ok(chunk)) => match state.splitter.push(&chunk) {
                    Ok(parts) => state.ready.extend(parts),
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(BodyError::Stream(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    if let Err(e) = state.splitter.finish() {
                        return Some((Err(e), state));
                    }
                }
            }
        }
    })
}

/// One undecoded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPart {
    /// Lowercased names, trimmed values.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RawPart {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn parse(content: &[u8]) -> Result<Self, BodyError> {
        let content = content.strip_prefix(b"\r\n").unwrap_or(content);
        let split = find(content, b"\r\n\r\n")
            .ok_or_else(|| BodyError::Multipart("part without header terminator".into()))?;

        let head = String::from_utf8_lossy(&content[..split]);
        let headers = head
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
            .collect();

        Ok(Self {
            headers,
            body: Bytes::copy_from_slice(&content[split + 4..]),
        })
    }
}

/// Incremental boundary splitter.
///
/// Feed chunks with [`push`](Self::push); completed parts come back as soon as
/// the delimiter that ends them has arrived.
#[derive(Debug)]
pub struct PartSplitter {
    delimiter: Vec<u8>,
    buffer: BytesMut,
    started: bool,
    done: bool,
}

impl PartSplitter {
    pub fn new(boundary: &str) -> Self {
        let mut buffer = BytesMut::new();
        // The first delimiter has no leading CRLF on the wire.
        buffer.extend_from_slice(b"\r\n");
        Self {
            delimiter: format!("\r\n--{}", boundary).into_bytes(),
            buffer,
            started: false,
            done: false,
        }
    }

    /// Bytes buffered for the part in progress.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RawPart>, BodyError> {
        let mut parts = Vec::new();
        if self.done {
            return Ok(parts);
        }
        self.buffer.extend_from_slice(chunk);

        loop {
            if self.started {
                if self.buffer.len() < 2 {
                    break;
                }
                if self.buffer.starts_with(b"--") {
                    self.done = true;
                    self.buffer.clear();
                    break;
                }
            }

            let Some(index) = find(&self.buffer, &self.delimiter) else {
                break;
            };
            let content = self.buffer.split_to(index);
            let _ = self.buffer.split_to(self.delimiter.len());

            if self.started {
                parts.push(RawPart::parse(&content)?);
            } else {
                self.started = true;
            }
        }

        Ok(parts)
    }

    /// Fails unless the closing delimiter was seen.
    pub fn finish(&self) -> Result<(), BodyError> {
        if self.done {
            Ok(())
        } else {
            Err(BodyError::Multipart("missing closing boundary".into()))
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// `boundary` parameter of a multipart content type.
pub fn boundary(content_type: &str) -> Result<String, BodyError> {
    content_type
        .split(';')
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
        .ok_or(BodyError::MissingBoundary)
}

/// `name` and `filename` of a `content-disposition` header.
pub fn parse_disposition(value: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut filename = None;
    for param in value.split(';').skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim().trim_matches('"').to_string();
        match key.trim().to_lowercase().as_str() {
            "name" => name = Some(raw),
            "filename" => filename = Some(raw),
            _ => {}
        }
    }
    (name, filename)
}
