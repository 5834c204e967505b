//! Synchronous promise emulation.
//!
//! Nothing is scheduled: `then` performs the pending operation itself and calls exactly one of
//! the two callbacks before returning that callback's result.

use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::realm::{arg, Realm};
use crate::refs::{unexpected, HostObject};
use crate::response;
use crate::transport::{Body, Request, Transport};
use crate::value::{Ref, RefKind, Value};

const UNIMPLEMENTED_METHODS: &[&str] = &["catch", "finally"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// Payload waiting for the first `then`. Taking it is what makes settlement happen once.
struct Settlement<T> {
    state: PromiseState,
    payload: Option<T>,
}

impl<T> Settlement<T> {
    fn new(payload: T) -> Self { Self { state: PromiseState::Pending, payload: Some(payload) } }

    fn begin(&mut self, kind: RefKind) -> Result<T> {
        self.payload.take().ok_or(BridgeError::AlreadySettled { kind })
    }

    fn finish(&mut self, outcome: PromiseState) { self.state = outcome; }
}

struct PendingFetch {
    transport: Arc<dyn Transport>,
    request: Request,
}

/// Returned by `fetch`; owns the request until the first `then`.
pub struct FetchPromise {
    settlement: Settlement<PendingFetch>,
}

impl FetchPromise {
    pub(crate) fn new(transport: Arc<dyn Transport>, request: Request) -> Self {
        Self { settlement: Settlement::new(PendingFetch { transport, request }) }
    }

    pub fn state(&self) -> PromiseState { self.settlement.state }
}

/// Returned by `Response.arrayBuffer()`; owns the body until the first `then`.
pub struct ArrayPromise {
    settlement: Settlement<Body>,
}

impl ArrayPromise {
    pub(crate) fn new(body: Body) -> Self { Self { settlement: Settlement::new(body) } }

    pub fn state(&self) -> PromiseState { self.settlement.state }
}

pub(crate) fn call_fetch_promise(realm: &mut Realm, this: Ref, method: &str, args: Vec<Value>) -> Result<Value> {
    match method {
        "then" => fetch_then(realm, this, &args),
        _ => Err(BridgeError::unknown_method(RefKind::FetchPromise, method, UNIMPLEMENTED_METHODS)),
    }
}

pub(crate) fn call_array_promise(realm: &mut Realm, this: Ref, method: &str, args: Vec<Value>) -> Result<Value> {
    match method {
        "then" => array_then(realm, this, &args),
        _ => Err(BridgeError::unknown_method(RefKind::ArrayPromise, method, UNIMPLEMENTED_METHODS)),
    }
}

fn fetch_then(realm: &mut Realm, this: Ref, args: &[Value]) -> Result<Value> {
    // Validate callbacks before consuming the request.
    let on_success = realm.expect_function(arg(args, 0, "then")?)?;
    let on_failure = realm.expect_function(arg(args, 1, "then")?)?;

    let pending = match realm.refs_mut().get_mut(this)? {
        HostObject::FetchPromise(p) => p.settlement.begin(RefKind::FetchPromise)?,
        other => return Err(unexpected(RefKind::FetchPromise, other)),
    };
    let PendingFetch { transport, mut request } = pending;
    request.deadline = realm.context().deadline();
    tracing::debug!("fetch {} {}", request.method, request.url);

    let outcome = transport.round_trip(request);
    let state = if outcome.is_ok() { PromiseState::Fulfilled } else { PromiseState::Rejected };
    if let Ok(HostObject::FetchPromise(p)) = realm.refs_mut().get_mut(this) {
        p.settlement.finish(state);
    }

    match outcome {
        Ok(res) => {
            tracing::debug!("fetch resolved with status {}", res.status);
            let result = response::wrap(realm, res);
            on_success.invoke(realm, vec![result])
        }
        Err(err) => {
            tracing::debug!("fetch rejected: {:#}", err);
            let err = realm.alloc(HostObject::Error(err));
            on_failure.invoke(realm, vec![Value::Ref(err)])
        }
    }
}

fn array_then(realm: &mut Realm, this: Ref, args: &[Value]) -> Result<Value> {
    let on_success = realm.expect_function(arg(args, 0, "then")?)?;
    let on_failure = realm.expect_function(arg(args, 1, "then")?)?;

    let body = match realm.refs_mut().get_mut(this)? {
        HostObject::ArrayPromise(p) => p.settlement.begin(RefKind::ArrayPromise)?,
        other => return Err(unexpected(RefKind::ArrayPromise, other)),
    };
    // Closes the reader whatever the read outcome.
    let drained = body.drain();
    let state = if drained.is_ok() { PromiseState::Fulfilled } else { PromiseState::Rejected };
    if let Ok(HostObject::ArrayPromise(p)) = realm.refs_mut().get_mut(this) {
        p.settlement.finish(state);
    }

    match drained {
        Ok(bytes) => {
            tracing::debug!("body drained: {} bytes", bytes.len());
            let buf = realm.uint8_array(bytes);
            on_success.invoke(realm, vec![buf])
        }
        Err(err) => {
            tracing::debug!("body drain failed: {}", err);
            let err = realm.alloc(HostObject::Error(anyhow::Error::new(err)));
            on_failure.invoke(realm, vec![Value::Ref(err)])
        }
    }
}

/// State of a promise ref, for embedders and tests.
pub fn promise_state(realm: &Realm, value: &Value) -> Result<PromiseState> {
    let this = realm.expect_ref(value)?;
    match realm.refs().get(this)? {
        HostObject::FetchPromise(p) => Ok(p.state()),
        HostObject::ArrayPromise(p) => Ok(p.state()),
        other => Err(unexpected(RefKind::FetchPromise, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecContext;
    use crate::testing::{recorder, CountingBody, FailingBody, StubFailure, StubTransport};
    use crate::transport::Response;

    fn start_fetch(realm: &mut Realm) -> Value {
        let global = realm.global();
        let fetch = realm.get(&global, "fetch").unwrap();
        let opts = realm.object([("method", Value::from("GET"))]);
        realm.invoke(&fetch, vec!["https://example.test/".into(), opts]).unwrap()
    }

    #[test]
    fn then_resolves_inline_and_returns_callback_result() {
        let stub = StubTransport::ok(200, &[("content-type", "text/plain")], b"hi");
        let mut realm = Realm::new(ExecContext::new().with_transport(stub.clone()));
        let promise = start_fetch(&mut realm);
        let (ok, ok_calls) = recorder(&mut realm, Value::from("from success"));
        let (fail, fail_calls) = recorder(&mut realm, Value::from("from failure"));

        let ret = realm.call(&promise, "then", vec![ok, fail]).unwrap();
        assert_eq!(ret, Value::from("from success"));
        assert_eq!(stub.calls(), 1);
        assert!(fail_calls.borrow().is_empty());
        let calls = ok_calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(realm.kind(&calls[0][0]).unwrap(), RefKind::Response);
        assert_eq!(promise_state(&realm, &promise).unwrap(), PromiseState::Fulfilled);
    }

    #[test]
    fn transport_error_reaches_failure_unmodified() {
        let stub = StubTransport::failing("dial tcp: connection refused");
        let mut realm = Realm::new(ExecContext::new().with_transport(stub.clone()));
        let promise = start_fetch(&mut realm);
        let (ok, ok_calls) = recorder(&mut realm, Value::Undefined);
        let (fail, fail_calls) = recorder(&mut realm, Value::from("handled"));

        assert_eq!(realm.call(&promise, "then", vec![ok, fail]).unwrap(), Value::from("handled"));
        assert!(ok_calls.borrow().is_empty());
        let err_ref = fail_calls.borrow()[0][0].clone();
        let native = realm.native_error(&err_ref).unwrap();
        assert_eq!(native.downcast_ref::<StubFailure>().unwrap().0, "dial tcp: connection refused");
        assert_eq!(realm.get(&err_ref, "message").unwrap(), Value::from("dial tcp: connection refused"));
        assert_eq!(promise_state(&realm, &promise).unwrap(), PromiseState::Rejected);
    }

    #[test]
    fn second_then_is_already_settled_without_io() {
        let stub = StubTransport::ok(200, &[], b"");
        let mut realm = Realm::new(ExecContext::new().with_transport(stub.clone()));
        let promise = start_fetch(&mut realm);
        let (ok, ok_calls) = recorder(&mut realm, Value::Undefined);
        let (fail, _) = recorder(&mut realm, Value::Undefined);

        realm.call(&promise, "then", vec![ok.clone(), fail.clone()]).unwrap();
        assert_eq!(
            realm.call(&promise, "then", vec![ok, fail]).unwrap_err(),
            BridgeError::AlreadySettled { kind: RefKind::FetchPromise }
        );
        assert_eq!(stub.calls(), 1);
        assert_eq!(ok_calls.borrow().len(), 1);
    }

    #[test]
    fn wrong_callback_kind_does_not_consume_the_promise() {
        let stub = StubTransport::ok(200, &[], b"");
        let mut realm = Realm::new(ExecContext::new().with_transport(stub.clone()));
        let promise = start_fetch(&mut realm);
        let (ok, _) = recorder(&mut realm, Value::Undefined);
        let not_fn = realm.object([("a", Value::Null)]);

        assert_eq!(
            realm.call(&promise, "then", vec![ok.clone(), not_fn]).unwrap_err(),
            BridgeError::UnexpectedRefKind { expected: RefKind::Function, found: RefKind::Object }
        );
        assert_eq!(stub.calls(), 0);
        assert_eq!(promise_state(&realm, &promise).unwrap(), PromiseState::Pending);

        let (fail, _) = recorder(&mut realm, Value::Undefined);
        realm.call(&promise, "then", vec![ok, fail]).unwrap();
        assert_eq!(stub.calls(), 1);
    }

    #[test]
    fn then_hands_context_deadline_to_transport() {
        let stub = StubTransport::ok(200, &[], b"");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let context = ExecContext::new().with_transport(stub.clone()).with_deadline(deadline);
        let mut realm = Realm::new(context);
        let promise = start_fetch(&mut realm);
        let (ok, _) = recorder(&mut realm, Value::Undefined);
        let (fail, _) = recorder(&mut realm, Value::Undefined);

        realm.call(&promise, "then", vec![ok, fail]).unwrap();
        assert_eq!(stub.last_request().unwrap().deadline, Some(deadline));
    }

    #[test]
    fn catch_is_not_implemented() {
        let mut realm = Realm::new(ExecContext::new().with_transport(StubTransport::ok(200, &[], b"")));
        let promise = start_fetch(&mut realm);
        assert_eq!(
            realm.call(&promise, "catch", vec![]).unwrap_err(),
            BridgeError::NotImplemented { kind: RefKind::FetchPromise, member: "catch" }
        );
    }

    #[test]
    fn reentrant_then_from_callback_is_rejected() {
        let stub = StubTransport::ok(200, &[], b"");
        let mut realm = Realm::new(ExecContext::new().with_transport(stub.clone()));
        let promise = start_fetch(&mut realm);
        let inner = promise.clone();
        let ok = realm.function(move |realm, _| {
            let noop = realm.function(|_, _| Ok(Value::Undefined));
            let err = realm.call(&inner, "then", vec![noop.clone(), noop]).unwrap_err();
            Ok(Value::String(err.to_string()))
        });
        let (fail, _) = recorder(&mut realm, Value::Undefined);
        let ret = realm.call(&promise, "then", vec![ok, fail]).unwrap();
        assert_eq!(ret, Value::from("fetch Promise already settled"));
        assert_eq!(stub.calls(), 1);
    }

    fn response_with_body(body: Box<dyn crate::transport::BodyReader>) -> std::sync::Arc<StubTransport> {
        let body = std::sync::Mutex::new(Some(body));
        StubTransport::new(move |_| Ok(Response {
            status: 200,
            url: None,
            headers: Default::default(),
            body: body.lock().unwrap().take().expect("single request"),
        }))
    }

    fn fetch_response(realm: &mut Realm) -> Value {
        let promise = start_fetch(realm);
        let (ok, ok_calls) = recorder(realm, Value::Undefined);
        let (fail, _) = recorder(realm, Value::Undefined);
        realm.call(&promise, "then", vec![ok, fail]).unwrap();
        let res = ok_calls.borrow()[0][0].clone();
        res
    }

    #[test]
    fn array_buffer_delivers_bytes_and_closes_once() {
        let (body, closes) = CountingBody::new(vec![1, 2, 3]);
        let mut realm = Realm::new(ExecContext::new().with_transport(response_with_body(Box::new(body))));
        let res = fetch_response(&mut realm);

        let pending = realm.call(&res, "arrayBuffer", vec![]).unwrap();
        assert_eq!(closes.get(), 0);
        let (ok, ok_calls) = recorder(&mut realm, Value::Undefined);
        let (fail, fail_calls) = recorder(&mut realm, Value::Undefined);
        realm.call(&pending, "then", vec![ok.clone(), fail.clone()]).unwrap();

        assert!(fail_calls.borrow().is_empty());
        let buf = ok_calls.borrow()[0][0].clone();
        assert_eq!(realm.bytes(&buf).unwrap(), &[1, 2, 3]);
        assert_eq!(closes.get(), 1);

        assert_eq!(
            realm.call(&pending, "then", vec![ok, fail]).unwrap_err(),
            BridgeError::AlreadySettled { kind: RefKind::ArrayPromise }
        );
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn failed_drain_still_closes_once() {
        let (body, closes) = FailingBody::new(vec![1, 2, 3]);
        let mut realm = Realm::new(ExecContext::new().with_transport(response_with_body(Box::new(body))));
        let res = fetch_response(&mut realm);

        let pending = realm.call(&res, "arrayBuffer", vec![]).unwrap();
        let (ok, ok_calls) = recorder(&mut realm, Value::Undefined);
        let (fail, fail_calls) = recorder(&mut realm, Value::Undefined);
        realm.call(&pending, "then", vec![ok, fail]).unwrap();

        assert!(ok_calls.borrow().is_empty());
        let err = fail_calls.borrow()[0][0].clone();
        let io = realm.native_error(&err).unwrap().downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::ConnectionReset);
        assert_eq!(closes.get(), 1);
        assert_eq!(promise_state(&realm, &pending).unwrap(), PromiseState::Rejected);

        // Releasing everything afterwards must not close again.
        realm.release(&pending).unwrap();
        realm.release(&res).unwrap();
        assert_eq!(closes.get(), 1);
    }
}
