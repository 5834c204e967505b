use std::fmt;
use std::rc::Rc;

use crate::error::{BridgeError, Result};
use crate::headers::{HeaderCollection, HeadersIterator};
use crate::object::PropertyBag;
use crate::promise::{ArrayPromise, FetchPromise};
use crate::realm::GuestFunction;
use crate::response::FetchResult;
use crate::value::{Ref, RefKind};

/// Every value the bridge hands out by reference.
pub(crate) enum HostObject {
    Global,
    Fetch,
    HeadersConstructor,
    Object(PropertyBag),
    Array(Vec<crate::value::Value>),
    Function(Rc<dyn GuestFunction>),
    FetchPromise(FetchPromise),
    Response(FetchResult),
    Headers(HeaderCollection),
    HeadersIterator(HeadersIterator),
    ArrayPromise(ArrayPromise),
    Uint8Array(Vec<u8>),
    Error(anyhow::Error),
}

impl HostObject {
    pub(crate) fn kind(&self) -> RefKind {
        match self {
            HostObject::Global => RefKind::Global,
            HostObject::Fetch => RefKind::Fetch,
            HostObject::HeadersConstructor => RefKind::HeadersConstructor,
            HostObject::Object(_) => RefKind::Object,
            HostObject::Array(_) => RefKind::Array,
            HostObject::Function(_) => RefKind::Function,
            HostObject::FetchPromise(_) => RefKind::FetchPromise,
            HostObject::Response(_) => RefKind::Response,
            HostObject::Headers(_) => RefKind::Headers,
            HostObject::HeadersIterator(_) => RefKind::HeadersIterator,
            HostObject::ArrayPromise(_) => RefKind::ArrayPromise,
            HostObject::Uint8Array(_) => RefKind::Uint8Array,
            HostObject::Error(_) => RefKind::Error,
        }
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "HostObject({})", self.kind()) }
}

struct Slot {
    generation: u32,
    object: Option<HostObject>,
}

/// Arena owning every live host object. Lookups are O(1) by index and checked against the
/// slot generation, which is bumped on release.
#[derive(Default)]
pub struct RefTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl RefTable {
    pub fn new() -> Self { Self::default() }

    /// Number of live refs.
    pub fn len(&self) -> usize { self.live }

    pub fn is_empty(&self) -> bool { self.live == 0 }

    pub(crate) fn alloc(&mut self, object: HostObject) -> Ref {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            return Ref { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, object: Some(object) });
        Ref { index, generation: 0 }
    }

    pub(crate) fn get(&self, r: Ref) -> Result<&HostObject> {
        match self.slots.get(r.index as usize) {
            Some(Slot { generation, object: Some(object) }) if *generation == r.generation => Ok(object),
            _ => Err(BridgeError::InvalidRef),
        }
    }

    pub(crate) fn get_mut(&mut self, r: Ref) -> Result<&mut HostObject> {
        match self.slots.get_mut(r.index as usize) {
            Some(Slot { generation, object: Some(object) }) if *generation == r.generation => Ok(object),
            _ => Err(BridgeError::InvalidRef),
        }
    }

    pub fn kind(&self, r: Ref) -> Result<RefKind> { self.get(r).map(HostObject::kind) }

    /// Remove the object and invalidate every copy of `r`.
    pub(crate) fn release(&mut self, r: Ref) -> Result<HostObject> {
        self.get(r)?;
        let slot = &mut self.slots[r.index as usize];
        let object = slot.object.take().ok_or(BridgeError::InvalidRef)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(r.index);
        self.live -= 1;
        Ok(object)
    }
}

pub(crate) fn unexpected(expected: RefKind, found: &HostObject) -> BridgeError {
    BridgeError::UnexpectedRefKind { expected, found: found.kind() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_slot_is_reused_with_new_generation() {
        let mut table = RefTable::new();
        let a = table.alloc(HostObject::Uint8Array(vec![1]));
        table.release(a).unwrap();
        let b = table.alloc(HostObject::Uint8Array(vec![2]));
        assert_eq!(a.index, b.index);
        assert_ne!(a, b);
        assert_eq!(table.get(a).unwrap_err(), BridgeError::InvalidRef);
        assert!(matches!(table.get(b).unwrap(), HostObject::Uint8Array(v) if v == &[2]));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn double_release_is_rejected() {
        let mut table = RefTable::new();
        let a = table.alloc(HostObject::Global);
        table.release(a).unwrap();
        assert_eq!(table.release(a).unwrap_err(), BridgeError::InvalidRef);
        assert!(table.is_empty());
    }

    #[test]
    fn out_of_range_index_is_invalid() {
        let table = RefTable::new();
        assert_eq!(table.kind(Ref { index: 3, generation: 0 }).unwrap_err(), BridgeError::InvalidRef);
    }
}
