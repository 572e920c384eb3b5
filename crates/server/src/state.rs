//! Application state shared across request handlers.

use crate::relay::RelayHandle;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayHandle,
}

impl AppState {
    pub fn new(relay: RelayHandle) -> Self {
        Self { relay }
    }
}
