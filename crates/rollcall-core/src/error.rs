use thiserror::Error;

/// Failures of the attendance state machine.
///
/// None of these are fatal: callers turn them into a notice for the user
/// and carry on. A duplicate check-in is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttendanceError {
    #[error("no active session")]
    NoActiveSession,
    #[error("a session is already active; use restart to replace it")]
    SessionAlreadyActive,
    #[error("student not found: {0}")]
    UnknownStudent(String),
    #[error("QR or PIN mismatch")]
    CredentialMismatch,
    #[error("invalid QR data: {0}")]
    MalformedCredential(String),
}
