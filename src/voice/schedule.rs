//! Cancellable delayed actions posted back onto the event loop

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::{Event, ScheduledAction};

/// Handle to at most one pending delayed action
///
/// Cancelling is idempotent, including after the action already fired.
/// Cancellation only aborts the timer task; an action already queued on
/// the channel must still be rejected by its epoch at fire time.
#[derive(Default)]
pub struct Delay {
    handle: Option<JoinHandle<()>>,
}

impl Delay {
    /// Post `action` after `delay`, replacing whatever was pending
    pub fn schedule(
        &mut self,
        events: &mpsc::UnboundedSender<Event>,
        delay: Duration,
        action: ScheduledAction,
    ) {
        self.cancel();
        let events = events.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::Scheduled(action));
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether the timer has not fired yet
    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        self.cancel();
    }
}
