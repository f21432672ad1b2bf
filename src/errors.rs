//! Error types for the price cache crate.
//!
//! Task-level outcomes ([`TaskError`]) live in the [`crate::task`] module;
//! this module defines the crate-wide error enum that fetchers and the
//! cache propagate.

use thiserror::Error;

use crate::task::TaskError;

/// Type alias for Result using our error type.
pub type Result<T> = std::result::Result<T, PriceCacheError>;

/// Errors that can occur while fetching or caching prices.
///
/// Expected backend outcomes (task cancellation, reported task failures)
/// are converted into sentinel values by the batch fetcher and never reach
/// this type; a `PriceCacheError` always means the affected keys are reset
/// for retry.
#[derive(Error, Debug)]
pub enum PriceCacheError {
    /// A backend task could not be submitted or awaited.
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// The task result did not match the expected response schema.
    /// Terminal for the fetch; the raw payload must not be used.
    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    /// A cache key could not be decoded back into its domain identifiers.
    #[error("Invalid cache key: {0}")]
    InvalidCacheKey(String),
}
