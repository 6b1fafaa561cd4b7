//! Audit trail. Supplemented ambient concern (not a numbered spec
//! component): every gate decision and executor transition is emitted
//! through an [`AuditEmitter`] so the pipeline can be observed without
//! coupling gates to a specific sink.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub circle: String,
    pub intersection: Option<String>,
    pub subject_id: String,
    pub subject_type: String,
    pub provider: Option<String>,
    pub trace: String,
    pub metadata: BTreeMap<String, String>,
}

pub trait AuditEmitter: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Reference emitter used by the demo router and tests: routes every
/// event through `tracing`, matching the teacher's logging idiom.
#[derive(Default)]
pub struct TracingAuditEmitter;

impl TracingAuditEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl AuditEmitter for TracingAuditEmitter {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(
            event_type = %event.event_type,
            circle = %event.circle,
            intersection = ?event.intersection,
            subject_id = %event.subject_id,
            subject_type = %event.subject_type,
            provider = ?event.provider,
            trace = %event.trace,
            metadata = ?event.metadata,
            "execution boundary audit event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_emitter_does_not_panic() {
        let emitter = TracingAuditEmitter::new();
        let mut metadata = BTreeMap::new();
        metadata.insert("outcome".to_string(), "passed".to_string());
        metadata.insert("detail".to_string(), "all circles verified".to_string());
        emitter.emit(AuditEvent {
            event_type: "validation_check".into(),
            timestamp: Utc::now(),
            circle: "circle-1".into(),
            intersection: None,
            subject_id: "env-1".into(),
            subject_type: "envelope".into(),
            provider: Some("mock-write".into()),
            trace: "trace-1".into(),
            metadata,
        });
    }
}
