//! Host side of a browser-style object model for sandboxed guests.
//!
//! A guest sees opaque [`Ref`] handles and drives them through [`Realm::get`], [`Realm::set`],
//! [`Realm::call`] and [`Realm::invoke`]. The realm exposes a `fetch` global backed by an
//! injected [`Transport`], a `Headers` collection, and promises that settle synchronously on
//! their first `then`.

pub mod context;
pub mod error;
pub mod fetch;
pub mod headers;
pub mod object;
pub mod promise;
pub mod realm;
pub mod refs;
pub mod response;
pub mod transport;
pub mod value;

#[cfg(test)]
mod testing;

pub use context::ExecContext;
pub use error::{BridgeError, Result};
pub use realm::{GuestFunction, Realm};
pub use transport::Transport;
pub use value::{Ref, RefKind, Value};

// --- Library API for embedding ---

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::context::ExecContext;
    pub use crate::error::BridgeError;
    pub use crate::fetch::FetchOptions;
    pub use crate::headers::HeaderCollection;
    pub use crate::promise::{promise_state, PromiseState};
    pub use crate::realm::{GuestFunction, Realm};
    pub use crate::transport::{BodyReader, BridgeConfig, BytesBody, HttpTransport, Request, Response, Transport};
    pub use crate::value::{Operation, Ref, RefKind, Value};
}
