//! Best-effort audit trail of routed conversation turns
//!
//! Store errors are logged and dropped here, never handed back to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::types::{HandlerId, Urgency};

/// Caller id used when the request did not carry one
pub const ANONYMOUS_CALLER: &str = "anonymous";

/// One persisted conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub caller_id: String,
    pub input: String,
    pub output: String,
    pub handler_id: HandlerId,
    pub urgency: Urgency,
    pub expires_at: DateTime<Utc>,
}

/// Durable, append-only destination for conversation records.
/// Expiry of old records is the store's responsibility.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn put(&self, record: ConversationRecord) -> anyhow::Result<()>;
}

/// How long records of each urgency are kept
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionPolicy {
    #[serde(default = "default_critical_days")]
    pub critical_days: u32,
    #[serde(default = "default_high_days")]
    pub high_days: u32,
    #[serde(default = "default_sensitive_days")]
    pub sensitive_days: u32,
    #[serde(default = "default_routine_days")]
    pub routine_days: u32,
}

fn default_critical_days() -> u32 {
    365
}

fn default_high_days() -> u32 {
    180
}

fn default_sensitive_days() -> u32 {
    180
}

fn default_routine_days() -> u32 {
    30
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            critical_days: default_critical_days(),
            high_days: default_high_days(),
            sensitive_days: default_sensitive_days(),
            routine_days: default_routine_days(),
        }
    }
}

impl RetentionPolicy {
    pub fn retention(&self, urgency: Urgency) -> Duration {
        let days = match urgency {
            Urgency::Critical => self.critical_days,
            Urgency::High => self.high_days,
            Urgency::Sensitive => self.sensitive_days,
            Urgency::Routine => self.routine_days,
        };
        Duration::days(i64::from(days))
    }
}

#[derive(Clone)]
pub struct ConversationRecorder {
    store: Arc<dyn ConversationStore>,
    retention: RetentionPolicy,
    in_flight: TaskTracker,
}

impl ConversationRecorder {
    pub fn new(store: Arc<dyn ConversationStore>, retention: RetentionPolicy) -> Self {
        Self {
            store,
            retention,
            in_flight: TaskTracker::new(),
        }
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Build the record for one completed turn
    pub fn build_record(
        &self,
        conversation_id: &str,
        caller_id: &str,
        input: &str,
        output: &str,
        handler_id: HandlerId,
        urgency: Urgency,
    ) -> ConversationRecord {
        let now = Utc::now();
        let caller_id = if caller_id.trim().is_empty() {
            ANONYMOUS_CALLER
        } else {
            caller_id
        };
        ConversationRecord {
            conversation_id: conversation_id.to_string(),
            timestamp: now,
            caller_id: caller_id.to_string(),
            input: input.to_string(),
            output: output.to_string(),
            handler_id,
            urgency,
            expires_at: now + self.retention.retention(urgency),
        }
    }

    /// Write one record, logging (not returning) any failure
    pub async fn record(
        &self,
        conversation_id: &str,
        caller_id: &str,
        input: &str,
        output: &str,
        handler_id: HandlerId,
        urgency: Urgency,
    ) {
        let record = self.build_record(conversation_id, caller_id, input, output, handler_id, urgency);
        self.write(record).await;
    }

    /// Write on a detached task so the record lands even if the request
    /// that produced it has already gone away.
    pub fn record_detached(&self, record: ConversationRecord) -> tokio::task::JoinHandle<()> {
        let recorder = self.clone();
        self.in_flight.spawn(async move { recorder.write(record).await })
    }

    /// Wait for every detached write started so far
    pub async fn flush(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }

    async fn write(&self, record: ConversationRecord) {
        let conversation_id = record.conversation_id.clone();
        match self.store.put(record).await {
            Ok(()) => debug!("Recorded turn for conversation {}", conversation_id),
            Err(e) => warn!(
                "Failed to record turn for conversation {}: {:#}",
                conversation_id, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct VecStore {
        records: Mutex<Vec<ConversationRecord>>,
    }

    #[async_trait]
    impl ConversationStore for VecStore {
        async fn put(&self, record: ConversationRecord) -> anyhow::Result<()> {
            self.records.lock().await.push(record);
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ConversationStore for FailingStore {
        async fn put(&self, _record: ConversationRecord) -> anyhow::Result<()> {
            Err(anyhow!("table unavailable"))
        }
    }

    #[test]
    fn test_retention_longer_for_urgent() {
        let policy = RetentionPolicy::default();
        assert!(policy.retention(Urgency::Critical) > policy.retention(Urgency::Routine));
        assert!(policy.retention(Urgency::Sensitive) > policy.retention(Urgency::Routine));
        assert_eq!(policy.retention(Urgency::Routine), Duration::days(30));
    }

    #[tokio::test]
    async fn test_record_writes_expiry() {
        let store = Arc::new(VecStore::default());
        let recorder = ConversationRecorder::new(store.clone(), RetentionPolicy::default());

        recorder
            .record("c1", "", "help", "answer", HandlerId::Safety, Urgency::Critical)
            .await;

        let records = store.records.lock().await;
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.caller_id, ANONYMOUS_CALLER);
        assert_eq!(r.handler_id, HandlerId::Safety);
        assert_eq!(r.expires_at - r.timestamp, Duration::days(365));
    }

    #[tokio::test]
    async fn test_record_failure_is_swallowed() {
        let recorder = ConversationRecorder::new(Arc::new(FailingStore), RetentionPolicy::default());
        // Must return normally.
        recorder
            .record("c2", "u", "in", "out", HandlerId::GeneralWellness, Urgency::Routine)
            .await;
        let record = recorder.build_record("c3", "u", "in", "out", HandlerId::GeneralWellness, Urgency::Routine);
        recorder.record_detached(record).await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_waits_for_detached_writes() {
        let store = Arc::new(VecStore::default());
        let recorder = ConversationRecorder::new(store.clone(), RetentionPolicy::default());
        for i in 0..5 {
            let record = recorder.build_record(&format!("c{}", i), "u", "in", "out", HandlerId::Safety, Urgency::Critical);
            drop(recorder.record_detached(record));
        }
        recorder.flush().await;
        assert_eq!(store.records.lock().await.len(), 5);

        // Still usable after a flush
        let record = recorder.build_record("c9", "u", "in", "out", HandlerId::Safety, Urgency::Critical);
        drop(recorder.record_detached(record));
        recorder.flush().await;
        assert_eq!(store.records.lock().await.len(), 6);
    }

    #[tokio::test]
    async fn test_record_detached_completes() {
        let store = Arc::new(VecStore::default());
        let recorder = ConversationRecorder::new(store.clone(), RetentionPolicy::default());
        let record = recorder.build_record("c4", "u", "in", "out", HandlerId::IllnessTriage, Urgency::High);
        recorder.record_detached(record).await.unwrap();
        assert_eq!(store.records.lock().await.len(), 1);
    }
}
