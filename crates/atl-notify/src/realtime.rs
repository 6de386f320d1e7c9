//! Realtime channel: topic per user id, fire-and-forget.

use atl_schemas::Notification;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::DeliveryError;

/// Payload pushed to a connected client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// Emitted as SSE event `notification:new`.
    NotificationNew(Notification),
    Heartbeat { ts_millis: i64 },
}

impl RealtimeEvent {
    pub fn sse_event_name(&self) -> &'static str {
        match self {
            RealtimeEvent::NotificationNew(_) => "notification:new",
            RealtimeEvent::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// An event addressed to one user topic. `None` means every subscriber.
#[derive(Clone, Debug)]
pub struct RoutedEvent {
    pub topic: Option<Uuid>,
    pub event: RealtimeEvent,
}

impl RoutedEvent {
    pub fn is_for(&self, user_id: Uuid) -> bool {
        self.topic.map_or(true, |t| t == user_id)
    }
}

pub trait RealtimeChannel: Send + Sync {
    /// Publish to `user_id`'s topic. Returns how many subscribers received it;
    /// nobody listening is not a failure.
    fn publish(&self, user_id: Uuid, event: RealtimeEvent) -> Result<usize, DeliveryError>;
}

/// In-process bus shared by the outbox worker and the SSE endpoint.
#[derive(Clone)]
pub struct BroadcastRealtime {
    bus: broadcast::Sender<RoutedEvent>,
}

impl BroadcastRealtime {
    pub fn new(capacity: usize) -> Self {
        let (bus, _rx) = broadcast::channel(capacity);
        Self { bus }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutedEvent> {
        self.bus.subscribe()
    }

    /// Send to every subscriber regardless of topic.
    pub fn broadcast(&self, event: RealtimeEvent) -> usize {
        self.bus
            .send(RoutedEvent { topic: None, event })
            .unwrap_or(0)
    }
}

impl Default for BroadcastRealtime {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl RealtimeChannel for BroadcastRealtime {
    fn publish(&self, user_id: Uuid, event: RealtimeEvent) -> Result<usize, DeliveryError> {
        // `send` only errors when there are no receivers at all.
        Ok(self
            .bus
            .send(RoutedEvent {
                topic: Some(user_id),
                event,
            })
            .unwrap_or(0))
    }
}
