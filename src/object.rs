//! Plain guest values held by reference: option bags, arrays, byte buffers and errors.

use crate::error::{BridgeError, Result};
use crate::realm::Realm;
use crate::refs::HostObject;
use crate::value::{Operation, Ref, RefKind, Value};

/// Insertion-ordered property map built by the guest, e.g. the `fetch` options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    props: Vec<(String, Value)>,
}

impl PropertyBag {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.props.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.props.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.props.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.props.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize { self.props.len() }

    pub fn is_empty(&self) -> bool { self.props.is_empty() }
}

impl<K: Into<String>> FromIterator<(K, Value)> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut bag = PropertyBag::new();
        for (k, v) in iter { bag.set(k, v); }
        bag
    }
}

pub(crate) fn get(realm: &mut Realm, this: Ref, key: &str) -> Result<Value> {
    let object = realm.refs().get(this)?;
    let kind = object.kind();
    match object {
        // A missing key on a guest bag is legitimately absent.
        HostObject::Object(bag) => Ok(bag.get(key).cloned().unwrap_or(Value::Undefined)),
        HostObject::Array(values) => match key {
            "length" => Ok(Value::from(values.len() as u32)),
            _ => {
                let index = parse_index(kind, key)?;
                values.get(index).cloned()
                    .ok_or(BridgeError::IndexOutOfRange { index, len: values.len() })
            }
        },
        HostObject::Uint8Array(bytes) => match key {
            "length" | "byteLength" => Ok(Value::from(bytes.len() as u32)),
            _ => {
                let index = parse_index(kind, key)?;
                bytes.get(index).map(|b| Value::from(*b as u32))
                    .ok_or(BridgeError::IndexOutOfRange { index, len: bytes.len() })
            }
        },
        HostObject::Error(err) => match key {
            "message" => Ok(Value::String(err.to_string())),
            "name" => Ok(Value::from("Error")),
            _ => Err(BridgeError::unknown_property(kind, key, &["stack", "cause"])),
        },
        _ => Err(BridgeError::Unsupported { kind, operation: Operation::Get }),
    }
}

pub(crate) fn set(realm: &mut Realm, this: Ref, key: &str, value: Value) -> Result<()> {
    match realm.refs_mut().get_mut(this)? {
        HostObject::Object(bag) => {
            bag.set(key, value);
            Ok(())
        }
        other => Err(BridgeError::Unsupported { kind: other.kind(), operation: Operation::Set }),
    }
}

fn parse_index(kind: RefKind, key: &str) -> Result<usize> {
    key.parse::<usize>().map_err(|_| BridgeError::UnknownProperty { kind, key: key.to_string() })
}
