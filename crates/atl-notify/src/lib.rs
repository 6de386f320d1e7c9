//! atl-notify
//!
//! Notification delivery. Business transactions persist notification rows
//! together with an outbox row; this crate only delivers what the outbox
//! holds:
//!
//! - [`realtime`]: per-user topics over an in-process broadcast bus
//!   (surfaced to clients as SSE by the daemon).
//! - [`push`]: mobile push through the Expo push API.
//! - [`dispatcher`]: claims due outbox rows, delivers them best-effort, and
//!   records the outcome.
//!
//! Delivery failures are logged and recorded on the outbox row; they never
//! reach the workflow operation that produced the notification.

pub mod dispatcher;
mod error;
pub mod push;
pub mod realtime;

pub use dispatcher::{Dispatcher, DrainReport};
pub use error::DeliveryError;
pub use push::{is_expo_push_token, ExpoPushGateway, NoopPushGateway, PushGateway, PushMessage};
pub use realtime::{BroadcastRealtime, RealtimeChannel, RealtimeEvent, RoutedEvent};
