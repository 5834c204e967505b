use std::io::{self, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use futures::stream::{BoxStream, StreamExt};
use reqwest::redirect::Policy;
use reqwest::Client;
use tokio::runtime::Runtime;

use super::{BodyReader, BridgeConfig, RedirectMode, Request, Response, Transport};

/// [`Transport`] backed by reqwest, driven to completion on a private single-threaded tokio
/// runtime so that `round_trip` can block the calling guest.
///
/// `round_trip` and body reads call `Runtime::block_on`; they must not be called from inside
/// another tokio runtime (use `spawn_blocking` there).
pub struct HttpTransport {
    config: BridgeConfig,
    runtime: Arc<Runtime>,
    // Clients are per redirect policy; reqwest fixes the policy at build time.
    follow: Client,
    manual: Client,
}

impl HttpTransport {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build transport runtime")?;
        let follow = Client::builder()
            .user_agent(config.user_agent())
            .redirect(follow_policy(&config))
            .build()
            .context("failed to build http client")?;
        let manual = Client::builder()
            .user_agent(config.user_agent())
            .redirect(Policy::none())
            .build()
            .context("failed to build http client")?;
        Ok(Self { config, runtime: Arc::new(runtime), follow, manual })
    }

    pub fn config(&self) -> &BridgeConfig { &self.config }

    // Shorter of the configured timeout and what is left of the caller's deadline.
    fn effective_timeout(&self, deadline: Option<Instant>) -> Duration {
        let configured = self.config.timeout();
        match deadline {
            Some(d) => configured.min(d.saturating_duration_since(Instant::now())),
            None => configured,
        }
    }
}

/// Follow redirects up to the configured limit, re-checking every hop against the allowlist.
fn follow_policy(config: &BridgeConfig) -> Policy {
    let config = config.clone();
    let max = config.max_redirects();
    Policy::custom(move |attempt| {
        if attempt.previous().len() > max {
            return attempt.error(format!("too many redirects (max {})", max));
        }
        if !config.url_allowed(attempt.url()) {
            let target = attempt.url().to_string();
            tracing::warn!("blocked redirect to {}: host not allowed", target);
            return attempt.error(format!("redirect to host not allowed: {}", target));
        }
        attempt.follow()
    })
}

impl Transport for HttpTransport {
    fn round_trip(&self, request: Request) -> Result<Response> {
        if !self.config.url_allowed(&request.url) {
            tracing::warn!("blocked request to {}: host not allowed", request.url);
            bail!("host not allowed: {}", request.url.host_str().unwrap_or(""));
        }
        let client = match request.redirect {
            RedirectMode::Follow => &self.follow,
            RedirectMode::Error | RedirectMode::Manual => &self.manual,
        };
        let mut builder = client.request(request.method.clone(), request.url.clone()).headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let timeout = self.effective_timeout(request.deadline);
        let deadline = Instant::now() + timeout;

        let start = Instant::now();
        let res = self.runtime.block_on(async {
            match tokio::time::timeout(timeout, builder.send()).await {
                Ok(res) => res.map_err(anyhow::Error::from),
                Err(elapsed) => Err(anyhow::Error::from(elapsed)),
            }
        })?;
        tracing::debug!("{} {} -> {} in {:?}", request.method, request.url, res.status(), start.elapsed());

        if request.redirect == RedirectMode::Error && res.status().is_redirection() {
            bail!("redirect mode is \"error\" but {} redirected with {}", request.url, res.status());
        }

        let status = res.status().as_u16();
        let url = Some(res.url().clone());
        let headers = res.headers().clone();
        let stream = res.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed();
        let body = StreamBody {
            runtime: self.runtime.clone(),
            stream: Some(stream),
            chunk: Vec::new(),
            offset: 0,
            total: 0,
            limit: self.config.max_body_bytes,
            deadline,
        };
        Ok(Response { status, url, headers, body: Box::new(body) })
    }
}

/// Pulls body chunks from the reqwest stream on demand.
struct StreamBody {
    runtime: Arc<Runtime>,
    stream: Option<BoxStream<'static, reqwest::Result<Vec<u8>>>>,
    chunk: Vec<u8>,
    offset: usize,
    total: u64,
    limit: Option<u64>,
    deadline: Instant,
}

impl StreamBody {
    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let stream = self.stream.as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "body closed"))?;
        let deadline = tokio::time::Instant::from_std(self.deadline);
        let next = self.runtime.block_on(async { tokio::time::timeout_at(deadline, stream.next()).await });
        match next {
            Err(elapsed) => Err(io::Error::new(io::ErrorKind::TimedOut, elapsed)),
            Ok(None) => Ok(None),
            Ok(Some(Err(e))) => Err(io::Error::new(io::ErrorKind::Other, e)),
            Ok(Some(Ok(bytes))) => Ok(Some(bytes)),
        }
    }
}

impl Read for StreamBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset >= self.chunk.len() {
            match self.next_chunk()? {
                None => return Ok(0),
                Some(bytes) => {
                    self.total += bytes.len() as u64;
                    if let Some(limit) = self.limit {
                        if self.total > limit {
                            let msg = format!("response body exceeds {} bytes", limit);
                            return Err(io::Error::new(io::ErrorKind::Other, msg));
                        }
                    }
                    self.chunk = bytes;
                    self.offset = 0;
                }
            }
        }
        let n = buf.len().min(self.chunk.len() - self.offset);
        buf[..n].copy_from_slice(&self.chunk[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

impl BodyReader for StreamBody {
    fn close(&mut self) -> io::Result<()> {
        // Dropping the stream releases the connection.
        self.stream = None;
        self.chunk.clear();
        Ok(())
    }
}
