use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{BridgeError, Result};
use crate::realm::{string_arg, Realm};
use crate::refs::{unexpected, HostObject};
use crate::value::{Ref, RefKind, Value};

const UNIMPLEMENTED_METHODS: &[&str] = &["set", "delete", "forEach", "keys", "values"];

/// Canonical MIME header form: first letter and every letter after a `-` upper case, the rest
/// lower case. Names containing bytes that are not valid in a header token are returned as-is.
pub fn canonical_header_name(name: &str) -> String {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return name.to_string();
    }
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() };
            upper = c == '-';
            out
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Ordered header multimap keyed by canonical name.
///
/// Appending an existing name adds a value under the same entry; enumeration yields one entry
/// per distinct name with its values joined by `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderCollection {
    names: Vec<String>,
    values: HashMap<String, Vec<String>>,
}

impl HeaderCollection {
    pub fn new() -> Self { Self::default() }

    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map {
            headers.append(name.as_str(), &header_value_string(value));
        }
        headers
    }

    pub fn append(&mut self, name: &str, value: &str) {
        let name = canonical_header_name(name);
        if !self.values.contains_key(&name) {
            self.names.push(name.clone());
        }
        self.values.entry(name).or_default().push(value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values.get(&canonical_header_name(name)).map(|v| v.join(", "))
    }

    pub fn has(&self, name: &str) -> bool { self.values.contains_key(&canonical_header_name(name)) }

    /// Distinct names in insertion order.
    pub fn names(&self) -> &[String] { &self.names }

    pub fn len(&self) -> usize { self.names.len() }

    pub fn is_empty(&self) -> bool { self.names.is_empty() }

    /// Snapshot of (name, joined value) pairs sorted by name.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut names = self.names.clone();
        names.sort();
        names.into_iter()
            .map(|name| {
                let value = self.values.get(&name).map(|v| v.join(", ")).unwrap_or_default();
                (name, value)
            })
            .collect()
    }

    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for name in &self.names {
            let key = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| BridgeError::InvalidRequest(format!("invalid header name: {:?}", name)))?;
            for value in self.values.get(name).into_iter().flatten() {
                let value = HeaderValue::from_str(value)
                    .map_err(|_| BridgeError::InvalidRequest(format!("invalid value for header {}", name)))?;
                map.append(key.clone(), value);
            }
        }
        Ok(map)
    }
}

fn header_value_string(value: &HeaderValue) -> String {
    match value.to_str() {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
    }
}

/// Forward-only iterator over a snapshot taken by `entries()`.
#[derive(Debug, Clone)]
pub struct HeadersIterator {
    entries: Vec<(String, String)>,
    cursor: usize,
}

impl HeadersIterator {
    pub fn new(entries: Vec<(String, String)>) -> Self { Self { entries, cursor: 0 } }

    pub fn is_done(&self) -> bool { self.cursor >= self.entries.len() }

    /// Current pair; moves the cursor forward.
    pub fn advance(&mut self) -> Result<(String, String)> {
        let len = self.entries.len();
        let pair = self.entries.get(self.cursor).cloned()
            .ok_or(BridgeError::IndexOutOfRange { index: self.cursor, len })?;
        self.cursor += 1;
        Ok(pair)
    }
}

/// Build a collection from a `HeadersInit`: another Headers object (copied) or a plain object
/// of string values. `undefined` gives an empty collection.
pub(crate) fn collection_from_init(realm: &Realm, init: &Value) -> Result<HeaderCollection> {
    if init.is_undefined() {
        return Ok(HeaderCollection::new());
    }
    match realm.refs().get(realm.expect_ref(init)?)? {
        HostObject::Headers(h) => Ok(h.clone()),
        HostObject::Object(bag) => {
            let mut h = HeaderCollection::new();
            for (name, v) in bag.iter() {
                let value = v.as_str().ok_or(BridgeError::UnexpectedValue { expected: "string", found: v.type_name() })?;
                h.append(name, value);
            }
            Ok(h)
        }
        other => Err(unexpected(RefKind::Headers, other)),
    }
}

fn collection(realm: &Realm, this: Ref) -> Result<&HeaderCollection> {
    match realm.refs().get(this)? {
        HostObject::Headers(h) => Ok(h),
        other => Err(unexpected(RefKind::Headers, other)),
    }
}

fn collection_mut(realm: &mut Realm, this: Ref) -> Result<&mut HeaderCollection> {
    match realm.refs_mut().get_mut(this)? {
        HostObject::Headers(h) => Ok(h),
        other => Err(unexpected(RefKind::Headers, other)),
    }
}

fn iterator_mut(realm: &mut Realm, this: Ref) -> Result<&mut HeadersIterator> {
    match realm.refs_mut().get_mut(this)? {
        HostObject::HeadersIterator(it) => Ok(it),
        other => Err(unexpected(RefKind::HeadersIterator, other)),
    }
}

pub(crate) fn call(realm: &mut Realm, this: Ref, method: &str, args: Vec<Value>) -> Result<Value> {
    match method {
        "append" => {
            let name = string_arg(&args, 0, "Headers.append")?;
            let value = string_arg(&args, 1, "Headers.append")?;
            collection_mut(realm, this)?.append(name, value);
            Ok(Value::Undefined)
        }
        "entries" => {
            let entries = collection(realm, this)?.entries();
            tracing::trace!("headers iterator over {} entries", entries.len());
            Ok(Value::Ref(realm.alloc(HostObject::HeadersIterator(HeadersIterator::new(entries)))))
        }
        "get" => {
            let name = string_arg(&args, 0, "Headers.get")?;
            Ok(collection(realm, this)?.get(name).map(Value::String).unwrap_or(Value::Null))
        }
        "has" => {
            let name = string_arg(&args, 0, "Headers.has")?;
            Ok(Value::Bool(collection(realm, this)?.has(name)))
        }
        _ => Err(BridgeError::unknown_method(RefKind::Headers, method, UNIMPLEMENTED_METHODS)),
    }
}

pub(crate) fn iterator_call(realm: &mut Realm, this: Ref, method: &str, _args: Vec<Value>) -> Result<Value> {
    iterator_mut(realm, this)?;
    match method {
        // The iterator is its own result object; `done` and `value` are read from it.
        "next" => Ok(Value::Ref(this)),
        _ => Err(BridgeError::unknown_method(RefKind::HeadersIterator, method, &["return", "throw"])),
    }
}

pub(crate) fn iterator_get(realm: &mut Realm, this: Ref, key: &str) -> Result<Value> {
    let it = iterator_mut(realm, this)?;
    match key {
        "done" => Ok(Value::Bool(it.is_done())),
        "value" => {
            let (name, value) = it.advance()?;
            Ok(realm.array(vec![Value::String(name), Value::String(value)]))
        }
        _ => Err(BridgeError::UnknownProperty { kind: RefKind::HeadersIterator, key: key.to_string() }),
    }
}
