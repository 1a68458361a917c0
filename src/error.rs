use thiserror::Error;
use uuid::Uuid;

use crate::interventions::InterventionStatus;
use crate::models::FeeStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssessmentError {
    #[error("{metric} must be a finite percentage between 0 and 100, got {value}")]
    OutOfRange { metric: &'static str, value: f64 },

    #[error("fee status {status} is inconsistent with {periods} overdue billing periods")]
    InconsistentFees { status: FeeStatus, periods: u32 },
}

/// Failures talking to the dashboard backend.
///
/// Every variant collapses to a single user-facing message through
/// [`ApiError::user_message`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server responded with {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected payload: {0}")]
    Payload(String),
}

impl ApiError {
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            ApiError::Status { message, .. } if !message.trim().is_empty() => message.clone(),
            ApiError::Status { status, .. } => {
                format!("The server rejected the request ({status}).")
            }
            ApiError::Payload(_) => "The server returned data in an unexpected format.".to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("no recipients specified")]
    NoRecipients,

    #[error("student id is required")]
    MissingStudent,

    #[error("message text is required for SMS alerts")]
    EmptyMessage,

    #[error("bulk alert for {0} has no recipients")]
    BulkWithoutRecipients(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterventionError {
    #[error("intervention {0} not found")]
    NotFound(Uuid),

    #[error("cannot move intervention from {from} to {to}")]
    InvalidTransition {
        from: InterventionStatus,
        to: InterventionStatus,
    },

    #[error("{0} must not be empty")]
    MissingField(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error(
        "{metric}: high-risk threshold {high} must not be looser than medium threshold {medium}"
    )]
    InvertedThresholds {
        metric: &'static str,
        high: f64,
        medium: f64,
    },

    #[error("risk weights must be non-negative and sum to more than zero")]
    InvalidWeights,

    #[error("timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error("dashboard_limit must be greater than zero")]
    ZeroFetchLimit,

    #[error("api_url must not be empty")]
    MissingApiUrl,
}
