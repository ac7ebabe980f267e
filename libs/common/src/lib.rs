//! Shared types, config, and error definitions for the SNP frequency bot.

pub mod config;
pub mod error;
pub mod types;

pub use config::ServiceConfig;
pub use error::{
    CacheError, ComputationError, Error, FailureCategory, FetchError, FetchErrorKind,
    HistoryError, ResolveError, ValidationError, ValidationReason,
};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Normalize and validate a raw rsID string.
pub fn validate(raw: &str) -> std::result::Result<VariantIdentifier, ValidationError> {
    VariantIdentifier::parse(raw)
}
