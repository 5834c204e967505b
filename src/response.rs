use reqwest::StatusCode;
use url::Url;

use crate::error::{BridgeError, Result};
use crate::headers::HeaderCollection;
use crate::promise::ArrayPromise;
use crate::realm::Realm;
use crate::refs::{unexpected, HostObject};
use crate::transport::{Body, Response};
use crate::value::{Ref, RefKind, Value};

const UNIMPLEMENTED_PROPERTIES: &[&str] = &["redirected", "type", "trailer"];
const UNIMPLEMENTED_METHODS: &[&str] = &["text", "json", "blob", "formData", "clone"];

/// A settled `fetch`: status, headers and the still-open body.
pub struct FetchResult {
    status: u16,
    url: Option<Url>,
    headers: Ref,
    // `None` once `arrayBuffer()` took it.
    body: Option<Body>,
}

impl FetchResult {
    pub fn status(&self) -> u16 { self.status }

    pub fn body_used(&self) -> bool { self.body.is_none() }
}

/// Expose a native response to the guest. Headers become their own ref so repeated reads of
/// `headers` return the same object.
pub(crate) fn wrap(realm: &mut Realm, res: Response) -> Value {
    let headers = HeaderCollection::from_header_map(&res.headers);
    let headers = realm.alloc(HostObject::Headers(headers));
    let result = FetchResult { status: res.status, url: res.url, headers, body: Some(Body::new(res.body)) };
    Value::Ref(realm.alloc(HostObject::Response(result)))
}

fn result_mut(realm: &mut Realm, this: Ref) -> Result<&mut FetchResult> {
    match realm.refs_mut().get_mut(this)? {
        HostObject::Response(r) => Ok(r),
        other => Err(unexpected(RefKind::Response, other)),
    }
}

pub(crate) fn get(realm: &mut Realm, this: Ref, key: &str) -> Result<Value> {
    let r = result_mut(realm, this)?;
    match key {
        "headers" => Ok(Value::Ref(r.headers)),
        "status" => Ok(Value::from(r.status as u32)),
        "ok" => Ok(Value::Bool((200..300).contains(&r.status))),
        "statusText" => {
            let reason = StatusCode::from_u16(r.status).ok().and_then(|s| s.canonical_reason()).unwrap_or("");
            Ok(Value::from(reason))
        }
        "url" => Ok(Value::String(r.url.as_ref().map(Url::to_string).unwrap_or_default())),
        "bodyUsed" => Ok(Value::Bool(r.body_used())),
        // The body is only reachable through `arrayBuffer()`.
        "body" => Ok(Value::Undefined),
        _ => Err(BridgeError::unknown_property(RefKind::Response, key, UNIMPLEMENTED_PROPERTIES)),
    }
}

pub(crate) fn call(realm: &mut Realm, this: Ref, method: &str, _args: Vec<Value>) -> Result<Value> {
    match method {
        "arrayBuffer" => {
            let body = result_mut(realm, this)?.body.take().ok_or(BridgeError::BodyUsed)?;
            Ok(Value::Ref(realm.alloc(HostObject::ArrayPromise(ArrayPromise::new(body)))))
        }
        _ => {
            result_mut(realm, this)?;
            Err(BridgeError::unknown_method(RefKind::Response, method, UNIMPLEMENTED_METHODS))
        }
    }
}
