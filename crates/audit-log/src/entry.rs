use serde::{Deserialize, Serialize};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub component: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission: Option<AdmissionRecord>,
}

impl AuditEntry {
    /// Create an entry with a fresh UUID v4 and the current UTC time.
    pub fn new(
        event_type: AuditEventType,
        component: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            component: component.into(),
            details,
            admission: None,
        }
    }

    /// Entry for one admission decision. The event type follows the record's
    /// outcome.
    pub fn admission(component: impl Into<String>, record: AdmissionRecord) -> Self {
        let event_type = match record.outcome {
            AdmissionOutcome::Admitted => AuditEventType::RequestAdmitted,
            AdmissionOutcome::Denied => AuditEventType::RequestDenied,
            AdmissionOutcome::Malformed => AuditEventType::RequestMalformed,
        };
        Self {
            admission: Some(record),
            ..Self::new(event_type, component, serde_json::Value::Null)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ProxyStarted,
    ProxyStopped,
    PolicyLoaded,
    RequestAdmitted,
    RequestDenied,
    RequestMalformed,
    BackendUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionOutcome {
    Admitted,
    Denied,
    Malformed,
}

/// What the gate decided for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub request_id: uuid::Uuid,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub outcome: AdmissionOutcome,
    /// Policy layer that admitted or denied the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AdmissionRecord {
    pub fn new(
        request_id: uuid::Uuid,
        method: impl Into<String>,
        path: impl Into<String>,
        outcome: AdmissionOutcome,
    ) -> Self {
        Self {
            request_id,
            method: method.into(),
            path: path.into(),
            client: None,
            outcome,
            layer: None,
            reason: None,
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
