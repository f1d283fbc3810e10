//! Job wire format and dead-letter records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Exponents above this would overflow any sane retry horizon.
const MAX_BACKOFF_EXPONENT: u32 = 30;

const DEFAULT_ATTEMPTS: u32 = 1;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job type tag used to route a job to its handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub const AUDIT_LOG: &'static str = "AUDIT_LOG";
    pub const EMAIL_NOTIFICATION: &'static str = "EMAIL_NOTIFICATION";
    pub const REPORT_GENERATION: &'static str = "REPORT_GENERATION";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn audit_log() -> Self {
        Self::new(Self::AUDIT_LOG)
    }

    pub fn email_notification() -> Self {
        Self::new(Self::EMAIL_NOTIFICATION)
    }

    pub fn report_generation() -> Self {
        Self::new(Self::REPORT_GENERATION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of asynchronous work, as producers serialize it onto a queue.
///
/// Fields the worker does not know about are kept in `extra` and written
/// back unchanged on retry and dead-lettering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Producer-assigned identifier.
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default = "empty_payload")]
    pub payload: Value,
    /// Attempt currently being made (1 on first delivery).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Epoch milliseconds before which the job must not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

fn default_attempts() -> u32 {
    DEFAULT_ATTEMPTS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Job {
    /// Create a job on its first attempt with a fresh UUIDv7 id.
    pub fn new(job_type: JobType, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            job_type,
            payload,
            attempts: DEFAULT_ATTEMPTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_after: None,
            extra: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_after(mut self, at: DateTime<Utc>) -> Self {
        self.retry_after = Some(at.timestamp_millis());
        self
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// False while `retryAfter` lies in the future.
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.retry_after
            .is_none_or(|at| at <= now.timestamp_millis())
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Delay before the next attempt once attempt number `attempts` has failed:
    /// `2^attempts` whole seconds.
    pub fn backoff_for(attempts: u32) -> Duration {
        Duration::from_secs(1u64 << attempts.min(MAX_BACKOFF_EXPONENT))
    }

    /// Advance to the next attempt and stamp when it becomes eligible.
    pub fn prepare_retry(&mut self, now: DateTime<Utc>) {
        let delay = Self::backoff_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.retry_after = Some(now.timestamp_millis() + delay.as_millis() as i64);
    }
}

/// A job popped from a queue, together with the queue it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub queue: String,
    pub job: Job,
}

impl ClaimedJob {
    pub fn new(queue: impl Into<String>, job: Job) -> Self {
        Self {
            queue: queue.into(),
            job,
        }
    }
}

/// Terminal record for a job that will never be retried automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    #[serde(flatten)]
    pub job: Job,
    pub failed_at: DateTime<Utc>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Queue the job was popped from.
    pub queue: String,
}

impl DeadLetterRecord {
    pub fn new(
        claimed: ClaimedJob,
        error: impl Into<String>,
        stack: Option<String>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job: claimed.job,
            failed_at,
            error: error.into(),
            stack,
            queue: claimed.queue,
        }
    }
}

/// Dead-letter entry for a payload that could not be decoded as a [`Job`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndecodableRecord {
    pub raw: String,
    pub queue: String,
    pub failed_at: DateTime<Utc>,
    pub error: String,
}

impl UndecodableRecord {
    pub fn new(queue: impl Into<String>, raw: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            queue: queue.into(),
            failed_at: Utc::now(),
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn decode_applies_wire_defaults() {
        let job = Job::decode(r#"{"id":"j1","type":"AUDIT_LOG","payload":{"action":"LOGIN"}}"#)
            .unwrap();

        assert_eq!(job.id, "j1");
        assert_eq!(job.job_type, JobType::audit_log());
        assert_eq!(job.attempts, 1);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.retry_after, None);
        assert_eq!(job.payload["action"], "LOGIN");
    }

    #[test]
    fn decode_rejects_missing_type() {
        assert!(Job::decode(r#"{"id":"j1","payload":{}}"#).is_err());
        assert!(Job::decode("not json").is_err());
    }

    #[test]
    fn encode_uses_camel_case_and_omits_unset_retry() {
        let job = Job::new(JobType::email_notification(), json!({"to": "a@b.co"}))
            .with_id("j2")
            .with_max_attempts(5);

        let value: Value = serde_json::from_str(&job.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "EMAIL_NOTIFICATION");
        assert_eq!(value["maxAttempts"], 5);
        assert_eq!(value["attempts"], 1);
        assert!(value.get("retryAfter").is_none());
    }

    #[test]
    fn unknown_producer_fields_survive_a_round_trip() {
        let raw = r#"{"id":"j3","type":"REPORT_GENERATION","payload":{},"createdAt":"2024-01-01T00:00:00Z"}"#;
        let job = Job::decode(raw).unwrap();
        assert_eq!(job.extra["createdAt"], "2024-01-01T00:00:00Z");

        let value: Value = serde_json::from_str(&job.encode().unwrap()).unwrap();
        assert_eq!(value["createdAt"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn backoff_is_two_to_the_failed_attempt() {
        assert_eq!(Job::backoff_for(1), Duration::from_secs(2));
        assert_eq!(Job::backoff_for(2), Duration::from_secs(4));
        assert_eq!(Job::backoff_for(3), Duration::from_secs(8));
    }

    #[test]
    fn prepare_retry_increments_attempts_and_sets_retry_after() {
        let mut job = Job::new(JobType::audit_log(), json!({}));
        job.prepare_retry(at(10_000));

        assert_eq!(job.attempts, 2);
        assert_eq!(job.retry_after, Some(12_000));

        job.prepare_retry(at(20_000));
        assert_eq!(job.attempts, 3);
        assert_eq!(job.retry_after, Some(24_000));
    }

    #[test]
    fn readiness_follows_retry_after() {
        let job = Job::new(JobType::audit_log(), json!({})).with_retry_after(at(5_000));
        assert!(!job.is_ready_at(at(4_999)));
        assert!(job.is_ready_at(at(5_000)));
        assert!(Job::new(JobType::audit_log(), json!({})).is_ready_at(at(0)));
    }

    #[test]
    fn attempts_left_until_max() {
        let mut job = Job::new(JobType::audit_log(), json!({})).with_max_attempts(2);
        assert!(job.has_attempts_left());
        job.attempts = 2;
        assert!(!job.has_attempts_left());
    }

    #[test]
    fn dead_letter_record_keeps_job_fields() {
        let job = Job::new(JobType::email_notification(), json!({"to": "x@y.co"})).with_id("j1");
        let record = DeadLetterRecord::new(
            ClaimedJob::new("queue:email_notification", job),
            "smtp down",
            None,
            at(0),
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "j1");
        assert_eq!(value["type"], "EMAIL_NOTIFICATION");
        assert_eq!(value["payload"]["to"], "x@y.co");
        assert_eq!(value["error"], "smtp down");
        assert_eq!(value["queue"], "queue:email_notification");
        assert_eq!(value["failedAt"], "1970-01-01T00:00:00Z");
        assert!(value.get("stack").is_none());
    }

    proptest! {
        #[test]
        fn backoff_doubles_per_attempt(attempts in 0u32..MAX_BACKOFF_EXPONENT) {
            prop_assert_eq!(Job::backoff_for(attempts + 1), Job::backoff_for(attempts) * 2);
        }

        #[test]
        fn retried_job_is_never_ready_immediately(attempts in 1u32..20, now in 0i64..4_000_000_000_000) {
            let mut job = Job::new(JobType::audit_log(), json!({}));
            job.attempts = attempts;
            job.prepare_retry(at(now));
            prop_assert!(!job.is_ready_at(at(now)));
            prop_assert_eq!(job.attempts, attempts + 1);
        }
    }
}
