//! Lifecycle event stream.
//!
//! The engine emits `started`, `completed`, `failed`, `retry` and
//! `cancelled` events through a [`NotificationHub`], which forwards them to
//! a broadcast channel and any configured sinks.

mod broadcast;
mod event;
mod hub;
mod log;
mod sink;
mod webhook;

pub use broadcast::BroadcastSink;
pub use event::{JobEvent, JobEventKind};
pub use hub::NotificationHub;
pub use log::TracingSink;
pub use sink::NotificationSink;
pub use webhook::WebhookSink;
