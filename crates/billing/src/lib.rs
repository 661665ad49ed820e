// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! GovDoc Billing Cleanup
//!
//! Reconciles subscription cancellation state between Stripe and the local
//! database. A canceled subscription must be reflected in both the external
//! system of record (Stripe) and the local mirror of that state; this crate
//! drives that two-phase cancellation over a scoped candidate set and reports
//! an itemized summary that tolerates partial failure.
//!
//! ## Entry points
//!
//! - [`cleanup_organization_subscriptions`]: retire an org's old
//!   subscriptions after a plan change
//! - [`emergency_cleanup_all_subscriptions`]: bulk cleanup for manual
//!   administrative invocation
//! - [`ensure_single_active_subscription`]: repair a duplicate-active state,
//!   keeping the most recently touched row
//!
//! The provider and store sit behind traits; production wires
//! [`StripeSubscriptionProvider`] and [`PostgresSubscriptionStore`], tests use
//! the in-memory implementations.

pub mod cleanup;
pub mod client;
pub mod error;
pub mod models;
pub mod provider;
pub mod store;


// Cleanup
pub use cleanup::{
    cleanup_organization_subscriptions, emergency_cleanup_all_subscriptions,
    ensure_single_active_subscription, CleanupOptions, CleanupResult, CleanupSummary,
    SubscriptionCancellationManager,
};

// Client
pub use client::{StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Models
pub use models::{OrganizationRecord, SubscriptionRecord, SubscriptionStatus};

// Provider
pub use provider::{
    MockSubscriptionProvider, ProviderSubscription, StripeSubscriptionProvider,
    SubscriptionProvider,
};

// Store
pub use store::{
    CandidateFilter, InMemorySubscriptionStore, PostgresSubscriptionStore, SubscriptionStore,
};
