use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

use crate::error::{BridgeError, Result};
use crate::headers::collection_from_init;
use crate::promise::FetchPromise;
use crate::realm::{string_arg, Realm};
use crate::refs::HostObject;
use crate::transport::{CredentialsMode, RedirectMode, Request};
use crate::value::{RefKind, Value};

/// Request options the bridge knows about but does not honour.
const UNIMPLEMENTED_OPTIONS: &[&str] = &[
    "mode", "cache", "signal", "integrity", "keepalive", "referrer", "referrerPolicy", "priority", "duplex",
];

/// Typed view of the guest's `fetch` options bag.
///
/// Defaults: `GET`, no headers, no body, `same-origin` credentials, `follow` redirects.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub credentials: CredentialsMode,
    pub redirect: RedirectMode,
}

impl FetchOptions {
    /// Validate an options value: `undefined`/`null` or an Object ref.
    pub fn from_value(realm: &Realm, options: Option<&Value>) -> Result<Self> {
        let mut opts = FetchOptions::default();
        let bag = match options {
            None | Some(Value::Undefined) | Some(Value::Null) => return Ok(opts),
            Some(v) => match realm.refs().get(realm.expect_ref(v)?)? {
                HostObject::Object(bag) => bag,
                other => return Err(BridgeError::UnexpectedRefKind { expected: RefKind::Object, found: other.kind() }),
            },
        };

        for (key, value) in bag.iter() {
            if matches!(value, Value::Undefined) { continue; }
            match key {
                "method" => opts.method = parse_method(expect_str(value)?)?,
                "headers" => opts.headers = headers_from_value(realm, value)?,
                "body" => opts.body = body_from_value(realm, value)?,
                "credentials" => {
                    let s = expect_str(value)?;
                    opts.credentials = CredentialsMode::parse(s)
                        .ok_or_else(|| BridgeError::InvalidRequest(format!("invalid credentials mode: {:?}", s)))?;
                }
                "redirect" => {
                    let s = expect_str(value)?;
                    opts.redirect = RedirectMode::parse(s)
                        .ok_or_else(|| BridgeError::InvalidRequest(format!("invalid redirect mode: {:?}", s)))?;
                }
                _ => return Err(BridgeError::unknown_property(RefKind::Object, key, UNIMPLEMENTED_OPTIONS)),
            }
        }

        if opts.body.is_some() && (opts.method == Method::GET || opts.method == Method::HEAD) {
            return Err(BridgeError::InvalidRequest(format!("{} request cannot have a body", opts.method)));
        }
        Ok(opts)
    }

    pub fn into_request(self, url: Url) -> Request {
        let mut request = Request::new(self.method, url);
        request.headers = self.headers;
        request.body = self.body;
        request.credentials = self.credentials;
        request.redirect = self.redirect;
        request
    }
}

fn expect_str(value: &Value) -> Result<&str> {
    value.as_str().ok_or(BridgeError::UnexpectedValue { expected: "string", found: value.type_name() })
}

/// Standard methods are matched case-insensitively and upper-cased; anything else must be a
/// valid token and is kept verbatim.
fn parse_method(s: &str) -> Result<Method> {
    const NORMALIZED: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT"];
    let upper = s.to_ascii_uppercase();
    let name = if NORMALIZED.contains(&upper.as_str()) { upper.as_str() } else { s };
    Method::from_bytes(name.as_bytes()).map_err(|_| BridgeError::InvalidRequest(format!("invalid method: {:?}", s)))
}

fn headers_from_value(realm: &Realm, value: &Value) -> Result<HeaderMap> {
    collection_from_init(realm, value)?.to_header_map()
}

fn body_from_value(realm: &Realm, value: &Value) -> Result<Option<Vec<u8>>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone().into_bytes())),
        _ => realm.bytes(value).map(|b| Some(b.to_vec())),
    }
}

/// `fetch(url, options)`: validates synchronously and returns a pending promise. No I/O happens
/// until `then`.
pub(crate) fn invoke(realm: &mut Realm, args: Vec<Value>) -> Result<Value> {
    let transport = realm.context().transport().ok_or(BridgeError::TransportUnavailable)?;
    let raw = string_arg(&args, 0, "fetch")?;
    let url = Url::parse(raw).map_err(|e| BridgeError::InvalidRequest(format!("invalid url {:?}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(BridgeError::InvalidRequest(format!("unsupported url scheme: {}", url.scheme())));
    }
    let options = FetchOptions::from_value(realm, args.get(1))?;
    let request = options.into_request(url);
    tracing::debug!("fetch requested: {} {}", request.method, request.url);
    let promise = FetchPromise::new(transport, request);
    Ok(Value::Ref(realm.alloc(HostObject::FetchPromise(promise))))
}
