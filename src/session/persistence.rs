use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::metrics::MetricSnapshot;
use crate::config::RetryPolicy;
use crate::error::StorageResult;
use crate::storage::{Evaluation, Session, SessionStatus, Storage, Turn};

/// Best-effort writes on behalf of a live session.
///
/// Writes retry with bounded backoff and are then dropped with a warning:
/// the in-memory session stays authoritative. After `create_session` fails
/// the wrapper is degraded and skips every later write.
#[derive(Clone)]
pub struct Persistence {
    storage: Arc<dyn Storage>,
    retry: RetryPolicy,
    degraded: Arc<AtomicBool>,
}

impl Persistence {
    pub fn new(storage: Arc<dyn Storage>, retry: RetryPolicy) -> Self {
        Self {
            storage,
            retry,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Returns false, and switches to degraded mode, when the row could not
    /// be created.
    pub async fn create_session(&self, session: &Session) -> bool {
        match self.storage.create_session(session).await {
            Ok(()) => {
                info!(session_id = %session.id, mode = %session.mode, "Session persisted");
                true
            }
            Err(e) => {
                warn!(
                    session_id = %session.id,
                    error = %e,
                    "Session could not be persisted, continuing unpersisted"
                );
                self.degraded.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    pub async fn append_turn(&self, turn: &Turn) -> bool {
        self.with_retry("append_turn", &turn.session_id, || {
            self.storage.append_turn(turn)
        })
        .await
    }

    pub async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        active_duration_secs: u64,
    ) -> bool {
        self.with_retry("update_status", session_id, || {
            self.storage
                .update_status(session_id, status, active_duration_secs)
        })
        .await
    }

    pub async fn end_session(&self, session: &Session, final_score: Option<u8>) -> bool {
        self.with_retry("end_session", &session.id, || {
            self.storage.end_session(session, final_score)
        })
        .await
    }

    pub async fn upsert_evaluation(&self, evaluation: &Evaluation) -> bool {
        self.with_retry("upsert_evaluation", &evaluation.session_id, || {
            self.storage.upsert_evaluation(evaluation)
        })
        .await
    }

    /// Record every metric of `snapshot` in the background. Failures are
    /// logged and dropped.
    pub fn record_metrics(&self, session_id: &str, snapshot: &MetricSnapshot) {
        if self.is_degraded() {
            return;
        }

        let storage = Arc::clone(&self.storage);
        let records = snapshot.records(session_id);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            for record in records {
                if let Err(e) = storage.record_metric(&record).await {
                    warn!(
                        session_id = %session_id,
                        metric = %record.name,
                        error = %e,
                        "Metric write dropped"
                    );
                }
            }
        });
    }

    async fn with_retry<F, Fut>(&self, op: &'static str, session_id: &str, mut call: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<()>>,
    {
        if self.is_degraded() {
            debug!(op, session_id, "Unpersisted session, write skipped");
            return false;
        }

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }

            match call().await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(op, session_id, retry = attempt, error = %e, "Storage write failed");
                }
            }
        }

        warn!(
            op,
            session_id,
            retries = self.retry.max_retries,
            "Storage write abandoned"
        );
        false
    }
}
