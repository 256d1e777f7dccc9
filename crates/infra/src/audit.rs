//! Audit trail for security-relevant events.
//!
//! Emission is fire-and-forget: `AuditEmitter::emit` spawns the write and
//! only logs failures, so a broken sink never affects the request.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use forgeguard_core::PrincipalId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    /// `None` for anonymous callers (e.g. failed login).
    pub actor: Option<PrincipalId>,
    /// Dotted action name, e.g. `auth.login`.
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub detail: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            actor: None,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            detail: None,
        }
    }

    pub fn actor(mut self, actor: PrincipalId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn entity(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Writes events as `tracing` records on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let detail = event
            .detail
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        info!(
            target: "audit",
            action = %event.action,
            actor = ?event.actor.map(|a| a.to_string()),
            entity_type = %event.entity_type,
            entity_id = ?event.entity_id,
            detail = %detail,
            "audit event"
        );
        Ok(())
    }
}

/// Collects events in memory (tests); can be switched to failing.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    failing: std::sync::atomic::AtomicBool,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.action).collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AuditError::Unavailable("sink offline".to_string()));
        }
        self.events
            .lock()
            .map_err(|_| AuditError::Unavailable("lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

/// Fire-and-forget front of an `AuditSink`.
#[derive(Clone)]
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, event: AuditEvent) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let action = event.action.clone();
            if let Err(e) = sink.record(event).await {
                warn!(action = %action, error = %e, "audit event dropped");
            }
        })
    }
}

impl core::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditEmitter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_events_reach_the_sink() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let emitter = AuditEmitter::new(sink.clone());
        let actor = PrincipalId::new();

        emitter
            .emit(
                AuditEvent::new("auth.login", "session")
                    .actor(actor)
                    .entity("abc")
                    .detail(serde_json::json!({ "ip": "10.0.0.1" })),
            )
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, Some(actor));
        assert_eq!(events[0].entity_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let sink = Arc::new(InMemoryAuditSink::new());
        sink.set_failing(true);
        let emitter = AuditEmitter::new(sink.clone());

        // The task completes normally even though the sink rejected the event.
        emitter
            .emit(AuditEvent::new("auth.logout", "session"))
            .await
            .unwrap();
        assert!(sink.events().is_empty());
    }
}
