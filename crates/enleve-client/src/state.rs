//! State shared by every screen.
//!
//! [`AppState`] is built once per process and handed to the screens behind
//! an `Arc`, so every action sees the same backend, session cache and
//! notice sink.

use std::sync::Arc;
use std::time::Duration;

use enleve_shared::backend::{AdminFunctions, Backend};

use crate::events::{Notice, Notifier};
use crate::session::SessionProvider;

pub struct AppState {
    /// Records, storage, change feed and identity.
    pub backend: Arc<dyn Backend>,

    /// Cached view of who is signed in.
    pub session: SessionProvider,

    /// Where user-facing notices go.
    pub notifier: Arc<dyn Notifier>,

    /// Server-side functions. `None` when the backend has no function
    /// runtime (local mode).
    pub functions: Option<Arc<dyn AdminFunctions>>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn Backend>,
        session_ttl: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            session: SessionProvider::new(backend.clone(), session_ttl),
            backend,
            notifier,
            functions: None,
        }
    }

    pub fn with_functions(mut self, functions: Arc<dyn AdminFunctions>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn notify(&self, notice: Notice) {
        self.notifier.notify(notice);
    }
}
