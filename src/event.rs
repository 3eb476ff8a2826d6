//! Optional observability hook.
//!
//! Events are emitted alongside the `tracing` output and never influence the
//! request/response flow.

use crate::message::{Method, RequestId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Started { name: String },
    Connected { host: String, port: u16 },
    Disconnected { reason: String },
    RequestSent { id: RequestId, method: Method, target: String },
    ResponseReceived { id: RequestId, status: u16 },
    Stopped { name: String },
}

/// Receives [`ClientEvent`]s from the client's background sender.
///
/// Implementations must return quickly; they run inline with the round trip.
///
/// ```
/// use mq_client::{ClientEvent, EventSink};
///
/// let sink = |event: &ClientEvent| println!("{}", serde_json::to_string(event).unwrap());
/// sink.on_event(&ClientEvent::Started { name: "alice".into() });
/// ```
pub trait EventSink: Send + Sync + 'static {
    fn on_event(&self, event: &ClientEvent);
}

impl<F> EventSink for F
where
    F: Fn(&ClientEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &ClientEvent) {
        self(event)
    }
}
