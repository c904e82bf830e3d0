//! Error Classifier
//!
//! Decides whether a database failure is worth retrying.
//! Unrecognized failures are treated as permanent.

use sqlx::error::DatabaseError;

/// Retry classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to resolve on its own (network blip, lock contention)
    Transient,
    /// Will recur no matter how often it is retried
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        self == ErrorClass::Transient
    }
}

/// SQLSTATE codes that are retryable even though their class is not
const TRANSIENT_CODES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57014", // query_canceled (statement / lock timeout)
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
];

/// SQLSTATE classes whose every code is retryable
const TRANSIENT_CLASSES: &[&str] = &[
    "08", // connection exception
    "53", // insufficient resources
];

/// SQLSTATE classes that indicate bad input or a programming error
const PERMANENT_CLASSES: &[&str] = &[
    "22", // data exception
    "23", // integrity constraint violation
    "42", // syntax error or access rule violation
];

/// Message fragments that identify network and timeout failures
const TRANSIENT_MESSAGES: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection closed",
    "connection terminated",
    "server closed the connection",
    "broken pipe",
    "too many connections",
    "timed out",
    "timeout",
    "network",
    "econnreset",
    "econnrefused",
    "etimedout",
];

/// Classify a database failure
pub fn classify(error: &sqlx::Error) -> ErrorClass {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => ErrorClass::Transient,
        sqlx::Error::Database(db) => classify_database_error(&**db),
        sqlx::Error::Protocol(message) => classify_message(message),
        _ => ErrorClass::Permanent,
    }
}

/// Whether a database failure should be retried
pub fn is_transient_error(error: &sqlx::Error) -> bool {
    classify(error).is_transient()
}

fn classify_database_error(error: &dyn DatabaseError) -> ErrorClass {
    classify_sqlstate(error.code().as_deref(), error.message())
}

/// Classify a server-reported failure by SQLSTATE, falling back to its message
pub fn classify_sqlstate(code: Option<&str>, message: &str) -> ErrorClass {
    if let Some(code) = code {
        if TRANSIENT_CODES.contains(&code) {
            return ErrorClass::Transient;
        }

        let class = code.get(..2).unwrap_or(code);
        if TRANSIENT_CLASSES.contains(&class) {
            return ErrorClass::Transient;
        }
        if PERMANENT_CLASSES.contains(&class) {
            return ErrorClass::Permanent;
        }
    }

    classify_message(message)
}

/// Classify free-form error text
pub fn classify_message(message: &str) -> ErrorClass {
    let message = message.to_ascii_lowercase();
    if TRANSIENT_MESSAGES.iter().any(|pattern| message.contains(pattern)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}
