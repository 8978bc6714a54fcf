//! Publisher-to-subscribers fan-out
//!
//! One hub per server. The publisher's connection task pushes frames in;
//! every subscriber's connection task holds a receiver and forwards what
//! its own playback state allows. The channel is bounded: a subscriber
//! that cannot keep up sees `Lagged` instead of growing an unbounded
//! queue, and resynchronizes at the next keyframe.
//!
//! ```text
//!                     Arc<RelayHub>
//!              ┌────────────────────────┐
//!              │ publisher: Option<id>  │
//!              │ metadata cache         │
//!              │ broadcast::Sender ─────┼──┬───────────┐
//!              └────────────────────────┘  │           │
//!                        ▲                 ▼           ▼
//!                  [publisher]       [subscriber] [subscriber]
//!                  handle_video      forward_event forward_event
//! ```
//!
//! The publisher slot holds a session id, never a session reference, so a
//! disconnecting publisher is released with a single compare.

use std::fmt;

use bytes::Bytes;
use tokio::sync::{broadcast, RwLock};

use crate::amf::AmfObject;

/// Frame or state change fanned out to subscribers
///
/// Cheap to clone: payloads are reference-counted `Bytes`.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Audio frame, forwarded verbatim with the publisher's timestamp
    Audio { timestamp: u32, data: Bytes },
    /// Video frame; `keyframe` drives subscriber readiness
    Video {
        timestamp: u32,
        data: Bytes,
        keyframe: bool,
    },
    /// Encoded onMetaData notify payload
    Metadata { payload: Bytes },
    /// The publisher disconnected; subscribers drop back to unready
    PublisherGone,
}

/// Errors raised by hub operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The publisher slot is already taken
    PublisherBusy,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::PublisherBusy => write!(f, "already have a publisher"),
        }
    }
}

impl std::error::Error for RelayError {}

#[derive(Debug, Default)]
struct HubState {
    publisher: Option<u64>,
    metadata: Option<AmfObject>,
    subscribers: u32,
}

/// Shared relay state for the single live stream
pub struct RelayHub {
    state: RwLock<HubState>,
    tx: broadcast::Sender<RelayEvent>,
}

impl RelayHub {
    /// Create a hub whose broadcast channel buffers up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            state: RwLock::new(HubState::default()),
            tx,
        }
    }

    /// Claim the unique publisher slot
    ///
    /// A fresh publisher starts with a clean metadata cache; cached
    /// metadata never outlives the publisher that posted it.
    pub async fn claim_publisher(&self, session_id: u64) -> Result<(), RelayError> {
        let mut state = self.state.write().await;
        if state.publisher.is_some() {
            return Err(RelayError::PublisherBusy);
        }
        state.publisher = Some(session_id);
        state.metadata = None;
        tracing::info!(session_id, "Publisher connected");
        Ok(())
    }

    /// Release the publisher slot if this session holds it
    ///
    /// Tells every subscriber the publisher is gone; they stay connected
    /// and wait for the next publisher's keyframe.
    pub async fn release_publisher(&self, session_id: u64) {
        let mut state = self.state.write().await;
        if state.publisher != Some(session_id) {
            return;
        }
        state.publisher = None;
        drop(state);
        let _ = self.tx.send(RelayEvent::PublisherGone);
        tracing::info!(session_id, "Publisher disconnected");
    }

    /// True if any session holds the publisher slot
    pub async fn has_publisher(&self) -> bool {
        self.state.read().await.publisher.is_some()
    }

    /// True if this session holds the publisher slot
    pub async fn is_publisher(&self, session_id: u64) -> bool {
        self.state.read().await.publisher == Some(session_id)
    }

    /// Cache stream metadata
    pub async fn set_metadata(&self, metadata: AmfObject) {
        self.state.write().await.metadata = Some(metadata);
    }

    /// Last cached metadata, if the current publisher posted any
    pub async fn metadata(&self) -> Option<AmfObject> {
        self.state.read().await.metadata.clone()
    }

    /// Register a subscriber and get its event receiver
    pub async fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        let mut state = self.state.write().await;
        state.subscribers += 1;
        tracing::debug!(subscribers = state.subscribers, "Subscriber added");
        self.tx.subscribe()
    }

    /// Drop a subscriber from the count
    pub async fn unsubscribe(&self) {
        let mut state = self.state.write().await;
        state.subscribers = state.subscribers.saturating_sub(1);
        tracing::debug!(subscribers = state.subscribers, "Subscriber removed");
    }

    /// Number of playing subscribers
    pub async fn subscriber_count(&self) -> u32 {
        self.state.read().await.subscribers
    }

    /// Fan an event out to every subscriber
    pub fn broadcast(&self, event: RelayEvent) {
        // send only errors when there are no receivers, which is fine
        let _ = self.tx.send(event);
    }
}
