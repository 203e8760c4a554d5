//! Controller: the handle application code uses to answer a request.
//!
//! # Responsibilities
//! - Expose the request context, the matched route and per-request storage
//! - Provide the response primitives (view, json, plain, file, redirect, stream, ...)
//! - Guarantee a single terminal write through the shared [`ResponseSlot`]
//!
//! # Design Decisions
//! - Every primitive checks the slot first and is a no-op once it is taken,
//!   so a late write after a timeout or error fallback is silently dropped
//! - Controllers are cheap clones; partial hooks and the handler share one

use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::header::CONTENT_DISPOSITION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures_util::stream::{self, Stream};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::AppError;
use crate::http::context::RequestContext;
use crate::http::multipart::MixedPart;
use crate::http::response;
use crate::observability::metrics::{ResponseStat, Stats};
use crate::routing::WebRoute;

const STREAM_BUFFER: usize = 16;
const FILE_CHUNK: usize = 16 * 1024;

/// Turns a named view and its model into HTML. Template engines plug in here.
pub trait ViewRenderer: Send + Sync {
    /// Render `name`; an unknown view is an error.
    fn render(&self, name: &str, model: &serde_json::Value, ctx: &RequestContext) -> Result<String, AppError>;
}

/// One-shot response channel shared by every attempt at answering a request.
#[derive(Debug)]
pub struct ResponseSlot {
    done: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Response<Body>>>>,
}

impl ResponseSlot {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Response<Body>>) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            done: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        };
        (Arc::new(slot), rx)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Deliver `response` unless one was already delivered.
    pub fn respond(&self, response: Response<Body>) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(tx) = self.tx.lock().expect("response slot lock poisoned").take() {
            let _ = tx.send(response);
        }
        true
    }
}

struct ControllerInner {
    route: Arc<WebRoute>,
    ctx: Arc<RequestContext>,
    slot: Arc<ResponseSlot>,
    stats: Arc<Stats>,
    renderer: Option<Arc<dyn ViewRenderer>>,
    part: Option<MixedPart>,
    canceled: AtomicBool,
    status: AtomicU16,
    headers: Mutex<HeaderMap>,
    repository: DashMap<String, serde_json::Value>,
}

#[derive(Clone)]
pub struct Controller(Arc<ControllerInner>);

impl Controller {
    pub fn new(
        route: Arc<WebRoute>,
        ctx: Arc<RequestContext>,
        slot: Arc<ResponseSlot>,
        stats: Arc<Stats>,
        renderer: Option<Arc<dyn ViewRenderer>>,
        part: Option<MixedPart>,
    ) -> Self {
        Self(Arc::new(ControllerInner {
            route,
            ctx,
            slot,
            stats,
            renderer,
            part,
            canceled: AtomicBool::new(false),
            status: AtomicU16::new(200),
            headers: Mutex::new(HeaderMap::new()),
            repository: DashMap::new(),
        }))
    }

    pub fn route(&self) -> &Arc<WebRoute> {
        &self.0.route
    }

    pub fn context(&self) -> &Arc<RequestContext> {
        &self.0.ctx
    }

    /// Current part of a mixed upload.
    pub fn part(&self) -> Option<&MixedPart> {
        self.0.part.as_ref()
    }

    pub fn user<T: 'static>(&self) -> Option<&T> {
        self.0.ctx.user::<T>()
    }

    /// Storage shared by the partial hooks and the handler of this request.
    pub fn repository(&self) -> &DashMap<String, serde_json::Value> {
        &self.0.repository
    }

    /// Status used by the next response primitive.
    pub fn set_status(&self, status: u16) -> &Self {
        self.0.status.store(status, Ordering::Relaxed);
        self
    }

    pub fn status(&self) -> u16 {
        self.0.status.load(Ordering::Relaxed)
    }

    /// Extra header for the eventual response. Invalid names or values are ignored.
    pub fn set_header(&self, name: &str, value: &str) -> &Self {
        match (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.0
                    .headers
                    .lock()
                    .expect("controller headers lock poisoned")
                    .insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Invalid response header ignored"),
        }
        self
    }

    fn headers(&self) -> HeaderMap {
        self.0
            .headers
            .lock()
            .expect("controller headers lock poisoned")
            .clone()
    }

    pub fn is_responded(&self) -> bool {
        self.0.slot.is_done()
    }

    pub fn is_canceled(&self) -> bool {
        self.0.canceled.load(Ordering::Acquire)
    }

    /// Stop the handler before it produces output.
    pub fn cancel(&self) {
        self.0.canceled.store(true, Ordering::Release);
    }

    fn respond(&self, stat: Option<ResponseStat>, response: Response<Body>) -> bool {
        if self.is_canceled() {
            tracing::debug!(
                request_id = %self.0.ctx.request_id(),
                route = %self.0.route.name,
                "Write after cancel ignored"
            );
            return false;
        }
        if !self.0.slot.respond(response) {
            tracing::trace!(
                request_id = %self.0.ctx.request_id(),
                route = %self.0.route.name,
                "Response already sent"
            );
            return false;
        }
        if let Some(stat) = stat {
            self.0.stats.response(stat);
        }
        true
    }

    /// Render `name` with `model` as HTML.
    ///
    /// A missing renderer or view is returned as an error, which the
    /// lifecycle turns into `#500`.
    pub fn view<T: Serialize + ?Sized>(&self, name: &str, model: &T) -> Result<bool, AppError> {
        if self.is_responded() {
            return Ok(false);
        }
        let Some(renderer) = &self.0.renderer else {
            return Err(AppError::msg(format!("no view renderer for \"{}\"", name)));
        };
        let model = serde_json::to_value(model)?;
        let html = renderer.render(name, &model, &self.0.ctx)?;
        Ok(self.respond(
            Some(ResponseStat::View),
            response::content(self.status(), html, "text/html", &self.headers()),
        ))
    }

    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<bool, AppError> {
        if self.is_responded() {
            return Ok(false);
        }
        let body = serde_json::to_vec(value)?;
        Ok(self.respond(
            Some(ResponseStat::Json),
            response::content(self.status(), body, "application/json", &self.headers()),
        ))
    }

    pub fn plain(&self, text: impl Into<String>) -> bool {
        self.respond(
            Some(ResponseStat::Plain),
            response::content(self.status(), text.into(), "text/plain", &self.headers()),
        )
    }

    /// Body with an explicit content type.
    pub fn content(&self, body: impl Into<Body>, content_type: &str) -> bool {
        self.respond(
            None,
            response::content(self.status(), body, content_type, &self.headers()),
        )
    }

    pub fn empty(&self) -> bool {
        self.respond(
            Some(ResponseStat::Empty),
            response::content(self.status(), Body::empty(), "text/plain", &self.headers()),
        )
    }

    pub fn redirect(&self, location: &str, permanent: bool) -> bool {
        self.respond(
            Some(ResponseStat::Redirect),
            response::redirect(location, permanent),
        )
    }

    pub fn binary(&self, bytes: impl Into<Bytes>, content_type: &str) -> bool {
        self.respond(
            Some(ResponseStat::Binary),
            response::content(self.status(), bytes.into(), content_type, &self.headers()),
        )
    }

    /// Pipe a byte stream as the response body.
    pub fn stream<S, E>(&self, content_type: &str, body: S) -> bool
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.respond(
            Some(ResponseStat::Stream),
            response::content(self.status(), Body::from_stream(body), content_type, &self.headers()),
        )
    }

    /// Stream the file at `path`. A file that can't be opened answers `404`.
    ///
    /// With `download` set the client is asked to save it under that name.
    pub async fn file(&self, path: impl AsRef<Path>, content_type: &str, download: Option<&str>) -> bool {
        if self.is_responded() || self.is_canceled() {
            return false;
        }
        let path = path.as_ref();
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(
                    request_id = %self.0.ctx.request_id(),
                    path = %path.display(),
                    error = %e,
                    "File unavailable"
                );
                return self.status_page(404);
            }
        };

        let mut headers = self.headers();
        if let Some(name) = download {
            match HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name)) {
                Ok(value) => {
                    headers.insert(CONTENT_DISPOSITION, value);
                }
                Err(_) => tracing::warn!(download = %name, "Invalid download name ignored"),
            }
        }
        self.respond(
            Some(ResponseStat::File),
            response::content(self.status(), Body::from_stream(file_stream(file)), content_type, &headers),
        )
    }

    /// Hand over a fully built response.
    pub fn custom(&self, response: Response<Body>) -> bool {
        self.respond(Some(ResponseStat::Custom), response)
    }

    /// Plain status page such as `404: Not Found`.
    pub fn status_page(&self, status: u16) -> bool {
        self.respond(ResponseStat::error_status(status), response::status_page(status))
    }

    /// Open a server-sent events stream; `None` if a response was already sent.
    pub fn sse(&self) -> Option<EventStream> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let response = response::streaming(
            self.status(),
            Body::from_stream(channel_stream(rx)),
            "text/event-stream",
            &self.headers(),
        );
        if !self.respond(None, response) {
            return None;
        }
        Some(EventStream {
            tx,
            stats: Arc::clone(&self.0.stats),
            retry: self.0.route.timeout.as_millis() as u64,
        })
    }

    /// Open a `multipart/x-mixed-replace` stream; `None` if a response was already sent.
    pub fn mmr(&self) -> Option<MixedStream> {
        let boundary: String = std::iter::once("----switchyard".to_string())
            .chain(
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(10)
                    .map(|c| char::from(c).to_string()),
            )
            .collect();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let content_type = format!("multipart/x-mixed-replace; boundary={}", boundary);
        let response = response::streaming(
            self.status(),
            Body::from_stream(channel_stream(rx)),
            &content_type,
            &self.headers(),
        );
        if !self.respond(None, response) {
            return None;
        }
        Some(MixedStream {
            tx,
            boundary,
            stats: Arc::clone(&self.0.stats),
        })
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("route", &self.0.route.name)
            .field("request_id", &self.0.ctx.request_id())
            .field("responded", &self.is_responded())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

fn file_stream(file: File) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    stream::unfold(Some(file), |file| async move {
        let Some(mut file) = file else {
            return None;
        };
        let mut chunk = BytesMut::with_capacity(FILE_CHUNK);
        match file.read_buf(&mut chunk).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(chunk.freeze()), Some(file))),
            Err(e) => Some((Err(e), None)),
        }
    })
}

fn channel_stream(rx: mpsc::Receiver<Bytes>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok(chunk), rx))
    })
}

/// Writer half of a server-sent events response.
#[derive(Debug, Clone)]
pub struct EventStream {
    tx: mpsc::Sender<Bytes>,
    stats: Arc<Stats>,
    retry: u64,
}

impl EventStream {
    /// Send one event. Returns false once the client has gone away.
    pub async fn send(&self, data: &str, event: Option<&str>, id: Option<&str>) -> bool {
        let data = data.replace('\n', "\\n").replace('\r', "\\r");
        self.write(format_event(&data, event, id, self.retry)).await
    }

    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T, event: Option<&str>) -> Result<bool, AppError> {
        let data = serde_json::to_string(value)?;
        Ok(self.write(format_event(&data, event, None, self.retry)).await)
    }

    async fn write(&self, frame: String) -> bool {
        let sent = self.tx.send(Bytes::from(frame)).await.is_ok();
        if sent {
            self.stats.response(ResponseStat::Sse);
        }
        sent
    }
}

fn format_event(data: &str, event: Option<&str>, id: Option<&str>, retry: u64) -> String {
    let mut frame = String::new();
    if let Some(event) = event.filter(|e| !e.is_empty()) {
        frame.push_str(&format!("event: {}\n", event));
    }
    frame.push_str(&format!("data: {}\n", data));
    if let Some(id) = id.filter(|i| !i.is_empty()) {
        frame.push_str(&format!("id: {}\n", id));
    }
    if retry > 0 {
        frame.push_str(&format!("retry: {}\n", retry));
    }
    frame.push('\n');
    frame
}

/// Writer half of a `multipart/x-mixed-replace` response.
#[derive(Debug, Clone)]
pub struct MixedStream {
    tx: mpsc::Sender<Bytes>,
    boundary: String,
    stats: Arc<Stats>,
}

impl MixedStream {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Push one replacement part.
    pub async fn send(&self, content_type: &str, body: impl Into<Bytes>) -> bool {
        let head = format!("--{}\r\nContent-Type: {}\r\n\r\n", self.boundary, content_type);
        if self.tx.send(Bytes::from(head)).await.is_err() {
            return false;
        }
        if self.tx.send(body.into()).await.is_err() {
            return false;
        }
        self.stats.response(ResponseStat::Mmr);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_accepts_one_response() {
        let (slot, mut rx) = ResponseSlot::new();
        assert!(slot.respond(response::status_page(200)));
        assert!(!slot.respond(response::status_page(500)));
        assert_eq!(rx.try_recv().unwrap().status(), 200);
    }

    #[test]
    fn test_event_format() {
        assert_eq!(
            format_event("hi", Some("tick"), Some("7"), 3000),
            "event: tick\ndata: hi\nid: 7\nretry: 3000\n\n"
        );
        assert_eq!(format_event("x", None, None, 0), "data: x\n\n");
    }
}
