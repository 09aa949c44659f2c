//! Lazily created, resettable control-plane client.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LeaseError;

type Factory<C> = Box<dyn Fn() -> Result<C, LeaseError> + Send + Sync>;

/// Holds at most one client, created on first use.
///
/// After a failed call the owner calls [`ClientCell::reset`] so the next
/// [`ClientCell::get`] builds a fresh client. Callers that already hold an
/// `Arc` to the old client keep using it until they drop it.
pub struct ClientCell<C> {
    factory: Factory<C>,
    slot: Mutex<Option<Arc<C>>>,
}

impl<C> ClientCell<C> {
    /// Create a cell that builds clients with `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<C, LeaseError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            slot: Mutex::new(None),
        }
    }

    /// Create a cell that hands out clones of `client`.
    pub fn from_client(client: C) -> Self
    where
        C: Clone + Send + Sync + 'static,
    {
        Self::new(move || Ok(client.clone()))
    }

    /// The current client, creating it if needed.
    pub fn get(&self) -> Result<Arc<C>, LeaseError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new((self.factory)()?);
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Drop the current client so the next `get` recreates it.
    pub fn reset(&self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Whether a client currently exists.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<C> fmt::Debug for ClientCell<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCell")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
