//! Payment provider seam
//!
//! The cleanup flow only needs two provider operations: retrieve a
//! subscription's current status and cancel it immediately. Putting those
//! behind a trait keeps the reconciliation logic testable without a Stripe
//! account.

use async_trait::async_trait;

use crate::error::BillingResult;

/// Remote subscription state, reduced to what reconciliation inspects
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub id: String,
    /// Raw provider status string (e.g. "active", "canceled")
    pub status: String,
}

impl ProviderSubscription {
    pub fn is_canceled(&self) -> bool {
        self.status == "canceled"
    }
}

#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    async fn retrieve_subscription(&self, id: &str) -> BillingResult<ProviderSubscription>;

    async fn cancel_subscription(&self, id: &str) -> BillingResult<()>;
}

mod live;
mod mock;

pub use live::StripeSubscriptionProvider;
pub use mock::MockSubscriptionProvider;
