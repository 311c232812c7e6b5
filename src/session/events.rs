use serde::Serialize;
use tokio::sync::broadcast;

use crate::{config::EVENT_CHANNEL_CAPACITY, model::Phase};

/// Happenings a UI layer subscribes to. Everything here is derived from
/// store snapshots or local writes; no event is itself coordination state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MatchEvent {
    /// Bootstrap finished; the session document is live and watched.
    #[serde(rename_all = "camelCase")]
    SessionReady {
        /// Store id of the session document.
        session_id: String,
    },
    /// A phase window opened.
    #[serde(rename_all = "camelCase")]
    PhaseStarted {
        /// The phase that began.
        phase: Phase,
        /// Epoch-ms start recorded on the document.
        started_at_ms: u64,
        /// Epoch-ms deadline of the window.
        deadline_ms: u64,
    },
    /// The readiness mirror for the current phase changed.
    #[serde(rename_all = "camelCase")]
    ReadinessChanged {
        /// Phase the counts refer to.
        phase: Phase,
        /// Participants with a submitted result.
        ready: u32,
        /// Roster size.
        total: u32,
    },
    /// A peer crossed the staleness horizon in either direction.
    #[serde(rename_all = "camelCase")]
    PresenceChanged {
        /// The peer whose classification flipped.
        user_id: String,
        /// New classification.
        online: bool,
    },
    /// A submission landed on the document.
    #[serde(rename_all = "camelCase")]
    SubmissionRecorded {
        /// Whose work was recorded.
        user_id: String,
        /// Phase the work belongs to.
        phase: Phase,
        /// Whether it was a deadline auto-submission.
        auto: bool,
    },
    /// All phases finished.
    MatchCompleted,
    /// The session was given up on.
    #[serde(rename_all = "camelCase")]
    SessionAbandoned {
        /// Why coordination stopped.
        reason: String,
    },
    /// The session document disappeared out from under the match.
    #[serde(rename_all = "camelCase")]
    SessionGone {
        /// Store id of the vanished document.
        session_id: String,
    },
}

/// Wrapper around the broadcast channel used to fan out match events to
/// local subscribers.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<MatchEvent>,
}

impl EventHub {
    /// Create a hub with the given buffered capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event to every subscriber. Send errors only mean nobody
    /// is listening right now, which is fine.
    pub fn broadcast(&self, event: MatchEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn events_serialize_with_type_tags() {
        let event = MatchEvent::PhaseStarted {
            phase: Phase::Review,
            started_at_ms: 1_000,
            deadline_ms: 901_000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("phaseStarted"));
        assert_eq!(value["phase"], json!(2));
        assert_eq!(value["deadlineMs"], json!(901_000));
    }

    #[tokio::test]
    async fn hub_fans_out_to_subscribers() {
        let hub = EventHub::default();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.broadcast(MatchEvent::MatchCompleted);

        assert_eq!(first.recv().await.unwrap(), MatchEvent::MatchCompleted);
        assert_eq!(second.recv().await.unwrap(), MatchEvent::MatchCompleted);
    }

    #[test]
    fn broadcast_without_subscribers_is_a_noop() {
        let hub = EventHub::default();
        hub.broadcast(MatchEvent::SessionAbandoned {
            reason: "nobody left".into(),
        });
    }
}
