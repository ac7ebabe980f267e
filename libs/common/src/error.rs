//! Error taxonomy for the resolution pipeline.
//!
//! Every error that can reach a caller is `Clone`: one fetch outcome is
//! fanned out to all requests waiting on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Binary-level error (configuration, filesystem).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Validation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    Empty,
    Malformed,
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationReason::Empty => f.write_str("empty"),
            ValidationReason::Malformed => f.write_str("malformed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid rsID {input:?}: {reason}")]
pub struct ValidationError {
    pub reason: ValidationReason,
    pub input: String,
}

// ── Fetch ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Timeout, connection failure, HTTP 5xx or 429. Retried by the client.
    Transient,
    /// Malformed payload, or a payload violating the frequency invariants.
    InvalidData,
    /// Upstream has no such identifier (HTTP 404).
    NotFound,
    /// The caller's cancellation token fired or its deadline passed.
    Cancelled,
    /// Any other non-success status (4xx other than 404/429).
    Rejected,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchErrorKind::Transient => "transient",
            FetchErrorKind::InvalidData => "invalid_data",
            FetchErrorKind::NotFound => "not_found",
            FetchErrorKind::Cancelled => "cancelled",
            FetchErrorKind::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dbSNP fetch failed ({kind}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transient, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InvalidData, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, message)
    }

    pub fn cancelled() -> Self {
        Self::new(FetchErrorKind::Cancelled, "request cancelled")
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }
}

// ── Computation / storage ─────────────────────────────────────────────

/// A frequency invariant was violated after validation. Indicates a defect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Computation invariant violated: {0}")]
pub struct ComputationError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cache store error: {0}")]
pub struct CacheError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("History store error: {0}")]
pub struct HistoryError(pub String);

// ── Resolution ────────────────────────────────────────────────────────

/// What a caller can do about a failed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The identifier itself is wrong; retrying will not help.
    InvalidInput,
    /// The data source is unavailable right now; try later.
    Unavailable,
    /// The identifier is well-formed but unknown upstream.
    NotFound,
    /// The requester exceeded their quota.
    RateLimited,
    /// A defect in this service or unusable upstream data.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Computation(#[from] ComputationError),

    #[error("Rate limited: {requester} exceeded {limit} requests per hour")]
    RateLimited { requester: String, limit: u32 },
}

impl ResolveError {
    pub fn category(&self) -> FailureCategory {
        match self {
            ResolveError::Validation(_) => FailureCategory::InvalidInput,
            ResolveError::Fetch(e) => match e.kind {
                FetchErrorKind::Transient | FetchErrorKind::Cancelled => {
                    FailureCategory::Unavailable
                }
                FetchErrorKind::NotFound => FailureCategory::NotFound,
                FetchErrorKind::InvalidData | FetchErrorKind::Rejected => {
                    FailureCategory::Internal
                }
            },
            ResolveError::Computation(_) => FailureCategory::Internal,
            ResolveError::RateLimited { .. } => FailureCategory::RateLimited,
        }
    }
}
