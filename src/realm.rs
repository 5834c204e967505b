use std::rc::Rc;

use crate::context::ExecContext;
use crate::error::{BridgeError, Result};
use crate::headers::{self, HeaderCollection};
use crate::object::{self, PropertyBag};
use crate::refs::{unexpected, HostObject, RefTable};
use crate::value::{Operation, Ref, RefKind, Value};
use crate::{fetch, promise, response};

/// A guest callback (`success`, `failure`, ...). Implemented by the embedder, which calls back
/// into the guest module.
pub trait GuestFunction {
    fn invoke(&self, realm: &mut Realm, args: Vec<Value>) -> Result<Value>;
}

struct ClosureFunction<F>(F);

impl<F> GuestFunction for ClosureFunction<F>
where F: Fn(&mut Realm, Vec<Value>) -> Result<Value> {
    fn invoke(&self, realm: &mut Realm, args: Vec<Value>) -> Result<Value> { (self.0)(realm, args) }
}

/// The host side of one guest: owns every ref the guest can see and dispatches `get`, `set`,
/// `call` and `invoke` on them.
pub struct Realm {
    refs: RefTable,
    context: ExecContext,
    global: Ref,
    fetch: Ref,
    headers_ctor: Ref,
}

impl Realm {
    pub fn new(context: ExecContext) -> Self {
        let mut refs = RefTable::new();
        let global = refs.alloc(HostObject::Global);
        let fetch = refs.alloc(HostObject::Fetch);
        let headers_ctor = refs.alloc(HostObject::HeadersConstructor);
        Self { refs, context, global, fetch, headers_ctor }
    }

    pub fn context(&self) -> &ExecContext { &self.context }

    pub fn context_mut(&mut self) -> &mut ExecContext { &mut self.context }

    /// The global object. `fetch` reads as `undefined` on it until a transport is installed.
    pub fn global(&self) -> Value { Value::Ref(self.global) }

    pub fn refs(&self) -> &RefTable { &self.refs }

    pub(crate) fn refs_mut(&mut self) -> &mut RefTable { &mut self.refs }

    pub(crate) fn alloc(&mut self, object: HostObject) -> Ref { self.refs.alloc(object) }

    // --- values the guest constructs ---

    pub fn object<K: Into<String>>(&mut self, props: impl IntoIterator<Item = (K, Value)>) -> Value {
        let bag: PropertyBag = props.into_iter().collect();
        Value::Ref(self.alloc(HostObject::Object(bag)))
    }

    pub fn array(&mut self, values: Vec<Value>) -> Value { Value::Ref(self.alloc(HostObject::Array(values))) }

    pub fn uint8_array(&mut self, bytes: Vec<u8>) -> Value { Value::Ref(self.alloc(HostObject::Uint8Array(bytes))) }

    pub fn function<F>(&mut self, f: F) -> Value
    where F: Fn(&mut Realm, Vec<Value>) -> Result<Value> + 'static {
        self.guest_function(Rc::new(ClosureFunction(f)))
    }

    pub fn guest_function(&mut self, f: Rc<dyn GuestFunction>) -> Value {
        Value::Ref(self.alloc(HostObject::Function(f)))
    }

    /// Equivalent of `new Headers()`.
    pub fn headers(&mut self) -> Value { Value::Ref(self.alloc(HostObject::Headers(HeaderCollection::new()))) }

    // --- typed recovery ---

    pub fn kind(&self, value: &Value) -> Result<RefKind> { self.refs.kind(self.expect_ref(value)?) }

    pub fn bytes(&self, value: &Value) -> Result<&[u8]> {
        match self.refs.get(self.expect_ref(value)?)? {
            HostObject::Uint8Array(bytes) => Ok(bytes),
            other => Err(unexpected(RefKind::Uint8Array, other)),
        }
    }

    /// The native error carried by an error ref, as produced by the transport or body reader.
    pub fn native_error(&self, value: &Value) -> Result<&anyhow::Error> {
        match self.refs.get(self.expect_ref(value)?)? {
            HostObject::Error(err) => Ok(err),
            other => Err(unexpected(RefKind::Error, other)),
        }
    }

    pub(crate) fn expect_ref(&self, value: &Value) -> Result<Ref> {
        value.as_handle().ok_or(BridgeError::UnexpectedValue { expected: "ref", found: value.type_name() })
    }

    pub(crate) fn expect_function(&self, value: &Value) -> Result<Rc<dyn GuestFunction>> {
        match self.refs.get(self.expect_ref(value)?)? {
            HostObject::Function(f) => Ok(f.clone()),
            other => Err(unexpected(RefKind::Function, other)),
        }
    }

    // --- dispatch ---

    pub fn get(&mut self, target: &Value, key: &str) -> Result<Value> {
        let this = self.expect_ref(target)?;
        let kind = self.refs.kind(this)?;
        tracing::trace!("get {}.{}", kind, key);
        match kind {
            RefKind::Global => self.global_get(key),
            RefKind::Object | RefKind::Array | RefKind::Uint8Array | RefKind::Error => object::get(self, this, key),
            RefKind::Response => response::get(self, this, key),
            RefKind::HeadersIterator => headers::iterator_get(self, this, key),
            _ => Err(BridgeError::Unsupported { kind, operation: Operation::Get }),
        }
    }

    pub fn set(&mut self, target: &Value, key: &str, value: Value) -> Result<()> {
        let this = self.expect_ref(target)?;
        object::set(self, this, key, value)
    }

    pub fn call(&mut self, target: &Value, method: &str, args: Vec<Value>) -> Result<Value> {
        let this = self.expect_ref(target)?;
        let kind = self.refs.kind(this)?;
        tracing::trace!("call {}.{}({} args)", kind, method, args.len());
        match kind {
            RefKind::FetchPromise => promise::call_fetch_promise(self, this, method, args),
            RefKind::ArrayPromise => promise::call_array_promise(self, this, method, args),
            RefKind::Response => response::call(self, this, method, args),
            RefKind::Headers => headers::call(self, this, method, args),
            RefKind::HeadersIterator => headers::iterator_call(self, this, method, args),
            _ => Err(BridgeError::Unsupported { kind, operation: Operation::Call }),
        }
    }

    pub fn invoke(&mut self, target: &Value, args: Vec<Value>) -> Result<Value> {
        let this = self.expect_ref(target)?;
        match self.refs.get(this)? {
            HostObject::Fetch => fetch::invoke(self, args),
            HostObject::HeadersConstructor => {
                let headers = match args.first() {
                    Some(init) => headers::collection_from_init(self, init)?,
                    None => HeaderCollection::new(),
                };
                Ok(Value::Ref(self.alloc(HostObject::Headers(headers))))
            }
            HostObject::Function(f) => {
                let f = f.clone();
                f.invoke(self, args)
            }
            other => Err(BridgeError::Unsupported { kind: other.kind(), operation: Operation::Invoke }),
        }
    }

    /// Drop the guest's handle. Releasing an undrained response closes its body.
    pub fn release(&mut self, target: &Value) -> Result<()> {
        let this = self.expect_ref(target)?;
        if this == self.global || this == self.fetch || this == self.headers_ctor {
            return Err(BridgeError::Unsupported { kind: self.refs.kind(this)?, operation: Operation::Release });
        }
        self.refs.release(this).map(drop)
    }

    fn global_get(&self, key: &str) -> Result<Value> {
        match key {
            "fetch" if self.context.has_transport() => Ok(Value::Ref(self.fetch)),
            "fetch" => Ok(Value::Undefined),
            "Headers" => Ok(Value::Ref(self.headers_ctor)),
            "AbortController" | "ReadableStream" => Ok(Value::Undefined),
            _ => Err(BridgeError::UnknownProperty { kind: RefKind::Global, key: key.to_string() }),
        }
    }
}

/// Positional argument, or `MissingArgument`.
pub(crate) fn arg<'a>(args: &'a [Value], index: usize, callee: &'static str) -> Result<&'a Value> {
    args.get(index).ok_or(BridgeError::MissingArgument { callee, index })
}

pub(crate) fn string_arg<'a>(args: &'a [Value], index: usize, callee: &'static str) -> Result<&'a str> {
    let v = arg(args, index, callee)?;
    v.as_str().ok_or(BridgeError::UnexpectedValue { expected: "string", found: v.type_name() })
}
