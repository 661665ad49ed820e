//! Stripe-backed provider

use async_trait::async_trait;
use stripe::{CancelSubscription, Subscription, SubscriptionId};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::provider::{ProviderSubscription, SubscriptionProvider};

/// `SubscriptionProvider` backed by the Stripe API
#[derive(Clone)]
pub struct StripeSubscriptionProvider {
    stripe: StripeClient,
}

impl StripeSubscriptionProvider {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    fn parse_id(id: &str) -> BillingResult<SubscriptionId> {
        id.parse()
            .map_err(|e| BillingError::Stripe(format!("invalid subscription ID '{}': {}", id, e)))
    }
}

fn status_str(status: stripe::SubscriptionStatus) -> &'static str {
    match status {
        stripe::SubscriptionStatus::Active => "active",
        stripe::SubscriptionStatus::Canceled => "canceled",
        stripe::SubscriptionStatus::Incomplete => "incomplete",
        stripe::SubscriptionStatus::IncompleteExpired => "incomplete_expired",
        stripe::SubscriptionStatus::PastDue => "past_due",
        stripe::SubscriptionStatus::Trialing => "trialing",
        stripe::SubscriptionStatus::Unpaid => "unpaid",
        stripe::SubscriptionStatus::Paused => "paused",
    }
}

#[async_trait]
impl SubscriptionProvider for StripeSubscriptionProvider {
    async fn retrieve_subscription(&self, id: &str) -> BillingResult<ProviderSubscription> {
        let sub_id = Self::parse_id(id)?;
        let subscription = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        Ok(ProviderSubscription {
            id: subscription.id.to_string(),
            status: status_str(subscription.status).to_string(),
        })
    }

    async fn cancel_subscription(&self, id: &str) -> BillingResult<()> {
        let sub_id = Self::parse_id(id)?;

        let params = CancelSubscription {
            cancellation_details: None,
            invoice_now: None,
            prorate: None,
        };
        let subscription = Subscription::cancel(self.stripe.inner(), &sub_id, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            status = %status_str(subscription.status),
            "Cancelled subscription in Stripe"
        );

        Ok(())
    }
}
