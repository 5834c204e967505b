//! Stub transports and bodies shared by the unit tests.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Read};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::realm::Realm;
use crate::transport::{BodyReader, Request, Response, Transport};
use crate::value::Value;

/// Shared counter of `close` calls on a test body.
#[derive(Clone, Default)]
pub(crate) struct CloseCount(Arc<AtomicUsize>);

impl CloseCount {
    pub(crate) fn get(&self) -> usize { self.0.load(Ordering::SeqCst) }

    fn bump(&self) { self.0.fetch_add(1, Ordering::SeqCst); }
}

/// Body that counts `close` calls.
pub(crate) struct CountingBody {
    inner: io::Cursor<Vec<u8>>,
    closes: CloseCount,
}

impl CountingBody {
    pub(crate) fn new(bytes: Vec<u8>) -> (Self, CloseCount) {
        let closes = CloseCount::default();
        (Self { inner: io::Cursor::new(bytes), closes: closes.clone() }, closes)
    }
}

impl Read for CountingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.inner.read(buf) }
}

impl BodyReader for CountingBody {
    fn close(&mut self) -> io::Result<()> {
        self.closes.bump();
        Ok(())
    }
}

/// Body that yields one byte and then fails.
pub(crate) struct FailingBody {
    bytes: Vec<u8>,
    served: bool,
    closes: CloseCount,
}

impl FailingBody {
    pub(crate) fn new(bytes: Vec<u8>) -> (Self, CloseCount) {
        let closes = CloseCount::default();
        (Self { bytes, served: false, closes: closes.clone() }, closes)
    }
}

impl Read for FailingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.served && !self.bytes.is_empty() && !buf.is_empty() {
            self.served = true;
            buf[0] = self.bytes[0];
            return Ok(1);
        }
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset mid-body"))
    }
}

impl BodyReader for FailingBody {
    fn close(&mut self) -> io::Result<()> {
        self.closes.bump();
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct StubFailure(pub(crate) &'static str);

impl fmt::Display for StubFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.0) }
}

impl std::error::Error for StubFailure {}

type ResponseFactory = Box<dyn Fn(&Request) -> Result<Response> + Send + Sync>;

/// Transport that records requests and answers from a factory.
pub(crate) struct StubTransport {
    calls: AtomicUsize,
    seen: Mutex<Vec<Request>>,
    respond: ResponseFactory,
}

impl StubTransport {
    pub(crate) fn new(respond: impl Fn(&Request) -> Result<Response> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), seen: Mutex::new(Vec::new()), respond: Box::new(respond) })
    }

    /// Answers every request with `status`, `headers` and an in-memory body.
    pub(crate) fn ok(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Arc<Self> {
        let headers = header_map(headers);
        let body = body.to_vec();
        Self::new(move |req| Ok(Response {
            status,
            url: Some(req.url.clone()),
            headers: headers.clone(),
            body: Box::new(crate::transport::BytesBody::new(body.clone())),
        }))
    }

    pub(crate) fn failing(message: &'static str) -> Arc<Self> {
        Self::new(move |_| Err(anyhow::Error::new(StubFailure(message))))
    }

    pub(crate) fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    pub(crate) fn last_request(&self) -> Option<Request> {
        self.seen.lock().unwrap().last().cloned()
    }
}

impl Transport for StubTransport {
    fn round_trip(&self, request: Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let res = (self.respond)(&request);
        self.seen.lock().unwrap().push(request);
        res
    }
}

pub(crate) fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
        map.append(HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
    }
    map
}

/// Guest callback that records the arguments it was called with and returns `ret`.
pub(crate) fn recorder(realm: &mut Realm, ret: Value) -> (Value, Rc<RefCell<Vec<Vec<Value>>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let sink = calls.clone();
    let f = realm.function(move |_: &mut Realm, args: Vec<Value>| {
        sink.borrow_mut().push(args);
        Ok(ret.clone())
    });
    (f, calls)
}
