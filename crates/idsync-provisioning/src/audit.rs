//! Audit and notification events.
//!
//! Every attempted pull or push action produces one [`ProvisioningEvent`]
//! whatever its outcome.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::types::{AnyKind, Direction};

/// Result carried by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventResult {
    /// The action completed.
    Success,
    /// The action failed.
    Failure,
}

impl EventResult {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventResult::Success => "SUCCESS",
            EventResult::Failure => "FAILURE",
        }
    }
}

/// One audited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningEvent {
    /// Pull or push.
    pub category: Direction,
    /// Kind of record.
    pub kind: AnyKind,
    /// Resource concerned.
    pub resource: String,
    /// Event name (lowercase rule name, or `delete`).
    pub event: String,
    /// Result.
    pub result: EventResult,
    /// State before the action, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// State after the action, or the error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// When the event was emitted.
    pub at: DateTime<Utc>,
}

impl ProvisioningEvent {
    /// Create an event.
    pub fn new(
        category: Direction,
        kind: AnyKind,
        resource: impl Into<String>,
        event: impl Into<String>,
        result: EventResult,
    ) -> Self {
        Self {
            category,
            kind,
            resource: resource.into(),
            event: event.into(),
            result,
            before: None,
            output: None,
            at: Utc::now(),
        }
    }

    /// Attach the before-state.
    #[must_use]
    pub fn with_before<T: Serialize>(mut self, before: Option<&T>) -> Self {
        self.before = before.and_then(|b| serde_json::to_value(b).ok());
        self
    }

    /// Attach the output (after-state or error).
    #[must_use]
    pub fn with_output(mut self, output: Option<serde_json::Value>) -> Self {
        self.output = output;
        self
    }
}

/// Receiver of audit and notification events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record an event. Sinks must not fail the caller.
    async fn emit(&self, event: ProvisioningEvent);
}

/// Sink writing events to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: ProvisioningEvent) {
        info!(
            target: "idsync::audit",
            category = event.category.as_str(),
            kind = event.kind.as_str(),
            resource = %event.resource,
            event = %event.event,
            result = event.result.as_str(),
            "Provisioning event"
        );
    }
}

/// Sink collecting events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<ProvisioningEvent>>>,
}

impl MemoryEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected events.
    pub async fn events(&self) -> Vec<ProvisioningEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, event: ProvisioningEvent) {
        self.events.lock().await.push(event);
    }
}

/// Fan-out to several sinks.
#[derive(Clone, Default)]
pub struct EventSinks {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventSinks {
    /// Create with no sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink using builder pattern.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Emit to every sink in order.
    pub async fn emit(&self, event: ProvisioningEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out() {
        let first = MemoryEventSink::new();
        let second = MemoryEventSink::new();
        let sinks = EventSinks::new()
            .with(Arc::new(first.clone()))
            .with(Arc::new(second.clone()))
            .with(Arc::new(TracingEventSink));

        let event = ProvisioningEvent::new(
            Direction::Push,
            AnyKind::User,
            "ldap",
            "update",
            EventResult::Failure,
        )
        .with_output(Some(serde_json::json!("boom")));
        sinks.emit(event).await;

        assert_eq!(first.events().await.len(), 1);
        let events = second.events().await;
        assert_eq!(events[0].result, EventResult::Failure);
        assert_eq!(events[0].output, Some(serde_json::json!("boom")));
    }

    #[test]
    fn test_with_before_serializes() {
        let event = ProvisioningEvent::new(
            Direction::Pull,
            AnyKind::Group,
            "ldap",
            "link",
            EventResult::Success,
        )
        .with_before(Some(&vec!["a"]));
        assert_eq!(event.before, Some(serde_json::json!(["a"])));
    }
}
