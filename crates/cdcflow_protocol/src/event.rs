//! Storage notification and trigger response payloads.
//!
//! The notification follows the common object-created event envelope:
//!
//! ```json
//! {"Records":[{"s3":{"bucket":{"name":"b"},"object":{"key":"in/people%2B1.csv"}}}]}
//! ```
//!
//! Every field is optional at the serde level so that a structurally valid
//! JSON payload with missing members can be rejected as a malformed event by
//! the adapter rather than as a parse failure.

use serde::{Deserialize, Serialize};

use crate::types::JobRunId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreatedEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "eventName", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default)]
    pub s3: Option<S3Entity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Entity {
    #[serde(default)]
    pub bucket: Option<BucketEntity>,
    #[serde(default)]
    pub object: Option<ObjectEntity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEntity {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntity {
    /// Percent-encoded object key (`+` stands for a space).
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ObjectCreatedEvent {
    /// Build a single-record notification for an already encoded key.
    pub fn for_object(bucket: impl Into<String>, encoded_key: impl Into<String>) -> Self {
        Self {
            records: vec![EventRecord {
                event_name: Some("ObjectCreated:Put".to_string()),
                s3: Some(S3Entity {
                    bucket: Some(BucketEntity {
                        name: Some(bucket.into()),
                    }),
                    object: Some(ObjectEntity {
                        key: Some(encoded_key.into()),
                        size: None,
                    }),
                }),
            }],
        }
    }
}

/// Structured acknowledgment returned by the trigger adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// JSON-encoded [`TriggerBody`].
    pub body: String,
}

impl TriggerResponse {
    pub fn ok(body: &TriggerBody) -> Result<Self, serde_json::Error> {
        Ok(Self {
            status_code: 200,
            body: serde_json::to_string(body)?,
        })
    }

    pub fn parse_body(&self) -> Result<TriggerBody, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    pub message: String,
    pub bucket: String,
    pub file: String,
    pub job_run_id: JobRunId,
}
