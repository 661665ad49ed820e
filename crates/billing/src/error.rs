//! Billing error types
//!
//! All external failures are flattened to message-carrying variants so callers
//! can fold them into per-item cleanup results without holding onto the
//! underlying client error types.

use thiserror::Error;

/// Errors from billing cleanup operations
#[derive(Debug, Error)]
pub enum BillingError {
    /// Stripe API call failed (network, auth, validation - not discriminated)
    #[error("stripe api error: {0}")]
    Stripe(String),

    /// Database read or write failed
    #[error("database error: {0}")]
    Database(String),

    /// Missing or invalid configuration
    #[error("config error: {0}")]
    Config(String),

    /// A persisted status string outside the known set
    #[error("unknown subscription status: {0}")]
    UnknownStatus(String),

    /// Organization row not found
    #[error("organization not found: {0}")]
    OrganizationNotFound(uuid::Uuid),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::Stripe(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
