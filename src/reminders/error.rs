//! Error types for the reminder pipeline.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Appointment store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("appointment {appointment_id} has unknown status '{status}'")]
    UnknownStatus { appointment_id: Uuid, status: String },

    #[error("appointment {0} not found")]
    NotFound(Uuid),
}

/// A reminder that could not be handed to the mail transport.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("appointment {0} has no patient email address")]
    MissingRecipient(Uuid),

    #[error("mail relay rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("mail transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Transport(err.to_string())
    }
}

/// Failures that abort a whole dispatch pass.
///
/// Per-appointment send failures never end up here; they are recorded in the
/// pass summary instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("reminder candidate lookup failed: {0}")]
    Query(#[from] StoreError),

    #[error("dispatch pass did not finish within {0:?}")]
    TimedOut(Duration),
}
