//! Auto-stop: a hard cap on continuous playback.
//!
//! Every `play` arms a fresh timer for the full cap. Pausing cancels it, so
//! there is never a countdown running while paused and never a partial one
//! resumed. Firing does exactly what a user quit does: `stop()` on the
//! session and cancellation of the send loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::EventSink;
use crate::protocol::MusicSession;
use crate::types::SessionEvent;

/// One armed countdown.
pub struct AutoStopTimer {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AutoStopTimer {
    fn spawn(
        id: u64,
        duration: Duration,
        session: Arc<dyn MusicSession>,
        send_loop: CancellationToken,
        fired: Arc<AtomicBool>,
        events: EventSink,
    ) -> Self {
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!(timer.id = id, "auto-stop timer cancelled");
                    return;
                }
                _ = tokio::time::sleep(duration) => {}
            }

            info!(timer.id = id, cap = ?duration, "playback cap reached, stopping");
            fired.store(true, Ordering::Release);
            if let Err(e) = session.stop().await {
                warn!(error = %e, "stop on auto-stop failed");
            }
            send_loop.cancel();
            events.emit(SessionEvent::AutoStopped);
        });

        Self { id, cancel, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Holds at most one live [`AutoStopTimer`].
pub struct TimerSlot {
    duration: Duration,
    session: Arc<dyn MusicSession>,
    send_loop: CancellationToken,
    events: EventSink,
    fired: Arc<AtomicBool>,
    current: Option<AutoStopTimer>,
    next_id: u64,
}

impl TimerSlot {
    /// `send_loop` is cancelled when a timer fires.
    pub fn new(
        duration: Duration,
        session: Arc<dyn MusicSession>,
        send_loop: CancellationToken,
        events: EventSink,
    ) -> Self {
        Self {
            duration,
            session,
            send_loop,
            events,
            fired: Arc::new(AtomicBool::new(false)),
            current: None,
            next_id: 0,
        }
    }

    /// Cancel the live timer, if any, then arm a new one. Returns its id.
    pub fn replace(&mut self) -> u64 {
        self.cancel();

        self.next_id += 1;
        let timer = AutoStopTimer::spawn(
            self.next_id,
            self.duration,
            Arc::clone(&self.session),
            self.send_loop.clone(),
            Arc::clone(&self.fired),
            self.events.clone(),
        );
        debug!(timer.id = timer.id(), cap = ?self.duration, "auto-stop timer armed");
        let id = timer.id();
        self.current = Some(timer);
        id
    }

    /// Cancel the live timer. Returns true if one was armed and had not fired.
    pub fn cancel(&mut self) -> bool {
        match self.current.take() {
            Some(timer) => {
                timer.cancel();
                !timer.is_finished()
            }
            None => false,
        }
    }

    /// Id of the armed timer, if it is still counting down.
    pub fn current_id(&self) -> Option<u64> {
        self.current
            .as_ref()
            .filter(|t| !t.is_finished())
            .map(|t| t.id())
    }

    /// Whether any timer from this slot has fired.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
