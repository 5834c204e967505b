use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::transport::Transport;

/// Per-realm execution context: the injected transport and the caller's deadline.
///
/// The bridge has no timeout of its own; the deadline is handed to the transport with every
/// request.
#[derive(Clone, Default)]
pub struct ExecContext {
    transport: Option<Arc<dyn Transport>>,
    deadline: Option<Instant>,
}

impl ExecContext {
    pub fn new() -> Self { Self::default() }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self { self.with_deadline(Instant::now() + timeout) }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> { self.transport.clone() }

    pub fn has_transport(&self) -> bool { self.transport.is_some() }

    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    pub fn set_transport(&mut self, transport: Option<Arc<dyn Transport>>) { self.transport = transport; }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) { self.deadline = deadline; }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("transport", &self.transport.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}
