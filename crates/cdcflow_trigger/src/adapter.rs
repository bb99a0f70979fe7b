use cdcflow_protocol::defaults::TRIGGER_SUCCESS_MESSAGE;
use cdcflow_protocol::{JobArguments, ObjectCreatedEvent, TriggerBody, TriggerResponse};
use thiserror::Error;
use tracing::{info, warn};

use crate::dispatch::{DispatchError, JobDispatcher};
use crate::event::decode_notification;

#[derive(Debug, Error)]
pub enum TriggerError {
    /// Payload is missing required members; nothing was dispatched.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("failed to serialize trigger response: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Turns one notification into one job run.
pub struct TriggerAdapter<D: JobDispatcher> {
    dispatcher: D,
    job_name: String,
}

impl<D: JobDispatcher> TriggerAdapter<D> {
    pub fn new(dispatcher: D, job_name: impl Into<String>) -> Self {
        Self {
            dispatcher,
            job_name: job_name.into(),
        }
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Dispatch a merge for the notified object and acknowledge it.
    ///
    /// Does not wait for the run to finish.
    pub fn handle(&self, event: &ObjectCreatedEvent) -> Result<TriggerResponse, TriggerError> {
        let location = match decode_notification(event) {
            Ok(location) => location,
            Err(err) => {
                warn!(error = %err, "rejecting notification");
                return Err(err);
            }
        };
        info!(bucket = %location.bucket, key = %location.key, "new object notification");

        let args = JobArguments::new(location.bucket.clone(), location.file_name.clone());
        let job_run_id = self.dispatcher.start_job_run(&self.job_name, &args)?;
        info!(
            job = %self.job_name,
            job_run_id = %job_run_id,
            file = %location.file_name,
            "merge job started"
        );

        Ok(TriggerResponse::ok(&TriggerBody {
            message: TRIGGER_SUCCESS_MESSAGE.to_string(),
            bucket: location.bucket,
            file: location.file_name,
            job_run_id,
        })?)
    }

    /// Parse a raw JSON payload, then [`handle`](Self::handle) it.
    pub fn handle_json(&self, payload: &str) -> Result<TriggerResponse, TriggerError> {
        let event: ObjectCreatedEvent = serde_json::from_str(payload)
            .map_err(|e| TriggerError::MalformedEvent(format!("invalid notification JSON: {}", e)))?;
        self.handle(&event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdcflow_protocol::JobRunId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        calls: Mutex<Vec<(String, JobArguments)>>,
        fail: bool,
    }

    impl JobDispatcher for RecordingDispatcher {
        fn start_job_run(&self, job_name: &str, args: &JobArguments) -> Result<JobRunId, DispatchError> {
            if self.fail {
                return Err(DispatchError::Unavailable("service down".to_string()));
            }
            self.calls
                .lock()
                .unwrap()
                .push((job_name.to_string(), args.clone()));
            Ok(JobRunId::new())
        }
    }

    const EVENT: &str = r#"{"Records":[{"s3":{"bucket":{"name":"people"},"object":{"key":"intermediate_data/world/Person_Lewis/batch+0001.csv"}}}]}"#;

    #[test]
    fn test_dispatches_once_and_acknowledges() {
        let adapter = TriggerAdapter::new(RecordingDispatcher::default(), "consolidate");
        let response = adapter.handle_json(EVENT).unwrap();

        assert_eq!(response.status_code, 200);
        let body = response.parse_body().unwrap();
        assert_eq!(body.message, TRIGGER_SUCCESS_MESSAGE);
        assert_eq!(body.bucket, "people");
        assert_eq!(body.file, "batch 0001.csv");

        let calls = adapter.dispatcher().calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "consolidate".to_string(),
                JobArguments::new("people", "batch 0001.csv")
            )]
        );
    }

    #[test]
    fn test_malformed_payload_is_not_dispatched() {
        let adapter = TriggerAdapter::new(RecordingDispatcher::default(), "consolidate");
        for payload in ["not json", r#"{"Records":[{"s3":{}}]}"#] {
            assert!(matches!(
                adapter.handle_json(payload),
                Err(TriggerError::MalformedEvent(_))
            ));
        }
        assert!(adapter.dispatcher().calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_failure_surfaces() {
        let adapter = TriggerAdapter::new(
            RecordingDispatcher {
                fail: true,
                ..Default::default()
            },
            "consolidate",
        );
        assert!(matches!(
            adapter.handle_json(EVENT),
            Err(TriggerError::Dispatch(DispatchError::Unavailable(_)))
        ));
    }
}
