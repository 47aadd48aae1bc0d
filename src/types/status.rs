//! Publishing status of a build on one remote target.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::exchange::FailedExchange;
use super::ids::TargetName;

/// Publishing state of a build on one target.
///
/// ```text
/// PENDING -> IN_PROGRESS -> SUCCESS
///                        -> FAILURE_PENDING -> IN_PROGRESS (retry)
///                                           -> INTERRUPTED (removed by operator)
///                                           -> PENDING     (publish again)
/// ```
///
/// `SUCCESS` and `INTERRUPTED` are terminal until an operator re-triggers
/// publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    Pending,
    InProgress,
    Success,
    Failure,
    FailurePending,
    Interrupted,
}

impl PublishState {
    /// Returns true if the build is (or should be) in the target's queue.
    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            PublishState::Pending | PublishState::InProgress | PublishState::FailurePending
        )
    }

    /// State to use when an operator asks to publish the build again.
    ///
    /// A hard failure re-enters the queue as a pending failure; everything else
    /// starts over as pending.
    pub fn for_publish_again(self) -> PublishState {
        match self {
            PublishState::Failure => PublishState::FailurePending,
            _ => PublishState::Pending,
        }
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublishState::Pending => "PENDING",
            PublishState::InProgress => "IN_PROGRESS",
            PublishState::Success => "SUCCESS",
            PublishState::Failure => "FAILURE",
            PublishState::FailurePending => "FAILURE_PENDING",
            PublishState::Interrupted => "INTERRUPTED",
        };
        write!(f, "{}", s)
    }
}

/// An error captured on a status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedError {
    /// Error message including its source chain.
    pub message: String,

    /// The server exchange that failed, if the error came from a remote response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<FailedExchange>,
}

impl RecordedError {
    /// Records an error and its full source chain.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        RecordedError {
            message,
            exchange: None,
        }
    }

    pub fn with_exchange(mut self, exchange: Option<FailedExchange>) -> Self {
        self.exchange = exchange;
        self
    }
}

/// The status record attached to a build for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: PublishState,

    /// Human-readable description of the state.
    pub message: String,

    /// The target this record describes.
    pub target: TargetName,

    /// The error behind a failure state, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordedError>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(state: PublishState, message: impl Into<String>, target: TargetName) -> Self {
        StatusRecord {
            state,
            message: message.into(),
            target,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: RecordedError) -> Self {
        self.error = Some(error);
        self
    }

    /// Status for a build that was just added to a queue.
    pub fn pending(target: TargetName) -> Self {
        StatusRecord::new(PublishState::Pending, "Waiting in queue", target)
    }

    /// Status for a build being transmitted.
    pub fn in_progress(target: TargetName) -> Self {
        StatusRecord::new(
            PublishState::InProgress,
            "Build is being transmitted",
            target,
        )
    }

    /// Status for a build that was published successfully.
    pub fn success(target: TargetName) -> Self {
        StatusRecord::new(
            PublishState::Success,
            "Build transmission was successfully completed",
            target,
        )
    }

    /// Status for a build whose publication failed and will be retried.
    pub fn failure_pending(target: TargetName, error: RecordedError) -> Self {
        StatusRecord::new(
            PublishState::FailurePending,
            "Error during build publishing",
            target,
        )
        .with_error(error)
    }

    /// Status for a build removed from the queue without being published.
    pub fn interrupted(target: TargetName, message: impl Into<String>) -> Self {
        StatusRecord::new(PublishState::Interrupted, message, target)
    }

    /// Returns the record an operator's "publish again" would attach.
    ///
    /// The message and error are kept; only the state changes.
    pub fn republished(&self) -> Self {
        StatusRecord {
            state: self.state.for_publish_again(),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}
