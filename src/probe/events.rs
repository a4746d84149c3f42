//! Event sinks the engine reports through

use crate::probe::models::{ProbeEvent, SessionEvent};
use tokio::sync::mpsc;

/// Receiver of engine events, one logical channel per session id
pub trait EventSink: Send + Sync {
    fn emit(&self, session_id: &str, event: ProbeEvent);
}

/// Sending never fails the batch; a dropped receiver just loses events.
impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, session_id: &str, event: ProbeEvent) {
        let _ = self.send(SessionEvent {
            session_id: session_id.to_string(),
            event,
        });
    }
}

/// Create an unbounded channel usable as an [`EventSink`]
pub fn channel() -> (
    mpsc::UnboundedSender<SessionEvent>,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    mpsc::unbounded_channel()
}
