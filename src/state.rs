//! Process-wide state threaded into every per-connection path-IO facade.

use std::sync::Arc;

use crate::pathio::{SerialPathIo, SharedState, Templates};
use crate::serial::SerialChannel;

/// Owns the single serial channel and listing cache for the process's
/// lifetime, and hands out a fresh [`SerialPathIo`] per FTP connection.
#[derive(Clone)]
pub struct AppState {
    shared: Arc<SharedState>,
}

impl AppState {
    pub fn new(channel: Arc<SerialChannel>, templates: Templates) -> Self {
        Self {
            shared: SharedState::new(channel, templates),
        }
    }

    pub fn new_backend(&self) -> SerialPathIo {
        SerialPathIo::new(self.shared.clone())
    }
}
