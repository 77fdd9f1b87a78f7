//! Fan-out of [`SessionEvent`]s and [`SessionState`] to whoever is watching.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::types::{SessionEvent, SessionState};

/// Optional event channel. Cloned into every loop; emitting never blocks.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    /// An event sink plus the receiving end for the UI.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more
            let _ = tx.send(event);
        }
    }
}

/// Shared writer for the run's state machine.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<SessionState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: SessionState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "session state");
        }
    }

    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
