use std::fmt;

/// Opaque handle to a host object living in a [`RefTable`](crate::refs::RefTable).
///
/// The generation makes a released slot unreachable through old handles, so a ref is never
/// reused for an unrelated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Ref {
    /// Raw id suitable for passing through a guest ABI.
    pub fn to_bits(self) -> u64 { ((self.generation as u64) << 32) | self.index as u64 }

    pub fn from_bits(bits: u64) -> Self {
        Self { index: bits as u32, generation: (bits >> 32) as u32 }
    }
}

/// A value crossing the guest/host boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Ref(Ref),
}

impl Value {
    pub fn is_undefined(&self) -> bool { matches!(self, Value::Undefined) }

    pub fn as_str(&self) -> Option<&str> {
        match self { Value::String(s) => Some(s), _ => None }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { Value::Bool(b) => Some(*b), _ => None }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self { Value::Number(n) => Some(*n), _ => None }
    }

    pub fn as_handle(&self) -> Option<Ref> {
        match self { Value::Ref(r) => Some(*r), _ => None }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Ref(_) => "ref",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::String(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(s) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self { Value::Number(n as f64) }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self { Value::Ref(r) }
}

/// Kind tag of a host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Global,
    Fetch,
    HeadersConstructor,
    Object,
    Array,
    Function,
    FetchPromise,
    Response,
    Headers,
    HeadersIterator,
    ArrayPromise,
    Uint8Array,
    Error,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefKind::Global => "global",
            RefKind::Fetch => "fetch",
            RefKind::HeadersConstructor => "Headers constructor",
            RefKind::Object => "Object",
            RefKind::Array => "Array",
            RefKind::Function => "Function",
            RefKind::FetchPromise => "fetch Promise",
            RefKind::Response => "Response",
            RefKind::Headers => "Headers",
            RefKind::HeadersIterator => "Headers iterator",
            RefKind::ArrayPromise => "arrayBuffer Promise",
            RefKind::Uint8Array => "Uint8Array",
            RefKind::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Dispatch capability, named in `Unsupported` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Set,
    Call,
    Invoke,
    Release,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Call => "call",
            Operation::Invoke => "invoke",
            Operation::Release => "release",
        };
        f.write_str(name)
    }
}
