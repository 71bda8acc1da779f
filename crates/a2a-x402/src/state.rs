//! Per-task payment state and the store that owns it.
//!
//! Each active task lives behind its own `tokio::sync::Mutex`, so work on
//! one task never waits on another. Terminal tasks leave a tombstone with
//! their final status; both are purged after the retention window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::delegate::{CapabilityResult, TaskOutput};
use crate::error::{ErrorReport, X402Error};
use crate::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "payment-required")]
    PaymentRequired,
    #[serde(rename = "payment-submitted")]
    PaymentSubmitted,
    #[serde(rename = "payment-verified")]
    PaymentVerified,
    #[serde(rename = "payment-settled")]
    PaymentSettled,
    #[serde(rename = "payment-failed")]
    PaymentFailed,
    #[serde(rename = "payment-completed")]
    Completed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PaymentRequired => "payment-required",
            Self::PaymentSubmitted => "payment-submitted",
            Self::PaymentVerified => "payment-verified",
            Self::PaymentSettled => "payment-settled",
            Self::PaymentFailed => "payment-failed",
            Self::Completed => "payment-completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Created,
            Self::PaymentRequired,
            Self::PaymentSubmitted,
            Self::PaymentVerified,
            Self::PaymentSettled,
            Self::PaymentFailed,
            Self::Completed,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PaymentFailed | Self::Completed)
    }

    /// Forward-only transition table.
    pub fn can_transition_to(self, next: Self) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Created, PaymentRequired)
                | (Created, Completed)
                | (PaymentRequired, PaymentSubmitted)
                | (PaymentSubmitted, PaymentVerified)
                | (PaymentSubmitted, PaymentFailed)
                | (PaymentVerified, PaymentSettled)
                | (PaymentVerified, PaymentFailed)
                | (PaymentVerified, Completed)
                | (PaymentSettled, Completed)
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the negotiator knows about one task's payment.
#[derive(Debug, Clone)]
pub struct TaskPaymentState {
    pub task_id: String,
    pub context_id: String,
    status: PaymentStatus,
    pub resource: String,
    /// Requirements last issued, in preference order.
    pub accepts: Vec<PaymentRequirements>,
    pub issued_at: Instant,
    /// The one payload under consideration.
    pub payload: Option<PaymentPayload>,
    /// Requirement the payload was matched against.
    pub selected: Option<PaymentRequirements>,
    pub verify_response: Option<VerifyResponse>,
    pub settle_response: Option<SettleResponse>,
    pub settle_attempted: bool,
    /// Injected result waiting for the one delegate re-invocation.
    pub pending_injection: Option<CapabilityResult>,
    /// Output held back until settlement (settle-after-deliver).
    pub tentative_output: Option<TaskOutput>,
    pub error: Option<ErrorReport>,
}

impl TaskPaymentState {
    pub fn new(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        resource: impl Into<String>,
        accepts: Vec<PaymentRequirements>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            status: PaymentStatus::Created,
            resource: resource.into(),
            accepts,
            issued_at: Instant::now(),
            payload: None,
            selected: None,
            verify_response: None,
            settle_response: None,
            settle_attempted: false,
            pending_injection: None,
            tentative_output: None,
            error: None,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    /// Move forward to `next`. Anything off the table is a state error and
    /// leaves the state untouched.
    pub fn advance(&mut self, next: PaymentStatus) -> Result<(), X402Error> {
        if !self.status.can_transition_to(next) {
            return Err(X402Error::State(format!(
                "task {} cannot move from {} to {next}",
                self.task_id, self.status
            )));
        }
        tracing::debug!(task_id = %self.task_id, from = %self.status, to = %next, "payment status transition");
        self.status = next;
        Ok(())
    }

    /// Longest timeout among the issued requirements.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.accepts
                .iter()
                .map(|r| r.max_timeout_seconds)
                .max()
                .unwrap_or(0),
        )
    }

    pub fn is_requirement_expired(&self, timeout_secs: u64) -> bool {
        self.issued_at.elapsed() > Duration::from_secs(timeout_secs)
    }
}

/// Handle to a locked task state.
pub type TaskStateGuard = OwnedMutexGuard<TaskPaymentState>;

/// Process-wide store of payment states keyed by task id.
pub struct PaymentStateStore {
    active: DashMap<String, Arc<Mutex<TaskPaymentState>>>,
    finished: DashMap<String, (PaymentStatus, Instant)>,
    retention: Duration,
}

impl PaymentStateStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            active: DashMap::new(),
            finished: DashMap::new(),
            retention,
        }
    }

    /// Insert a fresh state. A task id that is active or finished is a state error.
    pub fn create(&self, state: TaskPaymentState) -> Result<(), X402Error> {
        if self.finished.contains_key(&state.task_id) {
            return Err(X402Error::State(format!(
                "task {} already finished",
                state.task_id
            )));
        }
        match self.active.entry(state.task_id.clone()) {
            Entry::Occupied(_) => Err(X402Error::State(format!(
                "task {} already has payment state",
                state.task_id
            ))),
            Entry::Vacant(v) => {
                v.insert(Arc::new(Mutex::new(state)));
                Ok(())
            }
        }
    }

    /// Lock one task's state; `None` if the task has no active state.
    pub async fn lock(&self, task_id: &str) -> Option<TaskStateGuard> {
        // Clone the Arc out so the map shard is not held across the await.
        let slot = self.active.get(task_id).map(|s| Arc::clone(s.value()))?;
        Some(slot.lock_owned().await)
    }

    /// Drop the active state and keep a tombstone with its final status.
    ///
    /// The tombstone lands first so a concurrent lookup always finds the
    /// task in one of the two maps.
    pub fn finish(&self, task_id: &str, status: PaymentStatus) {
        self.finished
            .insert(task_id.to_string(), (status, Instant::now()));
        self.active.remove(task_id);
    }

    pub fn finished_status(&self, task_id: &str) -> Option<PaymentStatus> {
        self.finished.get(task_id).map(|entry| entry.0)
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.active.contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Drop tombstones past retention and abandoned states past their
    /// requirement timeout plus retention. Locked states are skipped.
    pub fn purge_expired(&self) -> usize {
        let retention = self.retention;
        let before = self.finished.len() + self.active.len();

        self.finished.retain(|_, (_, at)| at.elapsed() < retention);
        self.active.retain(|task_id, slot| match slot.try_lock() {
            Ok(state) => {
                let keep = state.issued_at.elapsed() < state.timeout() + retention;
                if !keep {
                    tracing::info!(task_id = %task_id, status = %state.status(), "purging abandoned payment state");
                }
                keep
            }
            Err(_) => true,
        });

        before - (self.finished.len() + self.active.len())
    }

    /// Purge on a background interval.
    pub fn start_cleanup(self: &Arc<Self>, every: Duration) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::info!(purged, "purged expired payment states");
                }
            }
        });
    }
}
