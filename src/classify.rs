//! Intent-classifier seam.
//!
//! Free text becomes a [`StructuredRequest`] through an external
//! classifier (typically LLM-backed). Only the boundary lives here; the
//! engine consumes the structured result and never sees raw model output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::reminders::model::{NewReminder, ReminderUpdate};
use crate::tasks::model::NewTask;

/// A structured request derived from an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum StructuredRequest {
    CreateReminder(NewReminder),
    ListReminders,
    UpdateReminder {
        id: String,
        #[serde(default)]
        changes: ReminderUpdate,
    },
    AcknowledgeReminder {
        id: String,
    },
    DeleteReminder {
        id: String,
    },
    DeleteAllReminders,
    CreateTask(NewTask),
    ListTasks,
    ToggleTask {
        id: String,
    },
    DeleteTask {
        id: String,
    },
    /// Nothing actionable was recognized.
    Unknown,
}

/// External intent classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<StructuredRequest, ClassifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serde_roundtrip() {
        let request = StructuredRequest::AcknowledgeReminder {
            id: "n_1_100".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("acknowledge_reminder"));
        let parsed: StructuredRequest = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, StructuredRequest::AcknowledgeReminder { id } if id == "n_1_100"));
    }

    #[test]
    fn unknown_request_parses() {
        let parsed: StructuredRequest =
            serde_json::from_str(r#"{"intent": "unknown"}"#).unwrap();
        assert!(matches!(parsed, StructuredRequest::Unknown));
    }
}
