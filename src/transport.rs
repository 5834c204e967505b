use std::fmt;
use std::io::{self, Read};
use std::time::Instant;

use anyhow::Result;
use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

pub mod config;
pub mod http;

pub use config::BridgeConfig;
pub use http::HttpTransport;

/// Performs one network round trip. Installed into an
/// [`ExecContext`](crate::context::ExecContext) by the embedder before guests can reach `fetch`.
///
/// Errors are handed to the guest's failure callback unmodified.
pub trait Transport: Send + Sync {
    fn round_trip(&self, request: Request) -> Result<Response>;
}

/// Redirect handling requested by the guest (`options.redirect`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    #[default]
    Follow,
    Error,
    Manual,
}

impl RedirectMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "follow" => Some(Self::Follow),
            "error" => Some(Self::Error),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Credentials mode requested by the guest (`options.credentials`). Carried through to the
/// transport, which decides what it means for a native host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

impl CredentialsMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "omit" => Some(Self::Omit),
            "same-origin" => Some(Self::SameOrigin),
            "include" => Some(Self::Include),
            _ => None,
        }
    }
}

/// Native request built from the guest's `fetch(url, options)`.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub redirect: RedirectMode,
    pub credentials: CredentialsMode,
    /// Deadline of the execution context that called `then`.
    pub deadline: Option<Instant>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            redirect: RedirectMode::default(),
            credentials: CredentialsMode::default(),
            deadline: None,
        }
    }
}

/// Native response returned by a transport. The body is still open.
pub struct Response {
    pub status: u16,
    /// Final URL after redirects, when the transport knows it.
    pub url: Option<Url>,
    pub headers: HeaderMap,
    pub body: Box<dyn BodyReader>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A readable response body that must be closed once.
pub trait BodyReader: Read + Send {
    fn close(&mut self) -> io::Result<()>;
}

/// Owning wrapper around a [`BodyReader`] that closes it exactly once: either explicitly through
/// [`Body::drain`] or when dropped undrained.
pub(crate) struct Body {
    reader: Option<Box<dyn BodyReader>>,
}

impl Body {
    pub(crate) fn new(reader: Box<dyn BodyReader>) -> Self { Self { reader: Some(reader) } }

    /// Read everything, then close regardless of the read outcome.
    pub(crate) fn drain(mut self) -> io::Result<Vec<u8>> {
        let Some(mut reader) = self.reader.take() else {
            return Err(io::Error::new(io::ErrorKind::Other, "body already closed"));
        };
        let mut buf = Vec::new();
        let read = reader.read_to_end(&mut buf);
        if let Err(e) = reader.close() {
            tracing::warn!("closing response body failed: {}", e);
        }
        read.map(|_| buf)
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            tracing::debug!("closing undrained response body");
            if let Err(e) = reader.close() {
                tracing::warn!("closing response body failed: {}", e);
            }
        }
    }
}

/// In-memory body, for transports that already hold the whole payload.
pub struct BytesBody {
    inner: io::Cursor<Vec<u8>>,
    closed: bool,
}

impl BytesBody {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { inner: io::Cursor::new(bytes.into()), closed: false }
    }
}

impl Read for BytesBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "body closed"));
        }
        self.inner.read(buf)
    }
}

impl BodyReader for BytesBody {
    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}
