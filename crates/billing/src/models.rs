//! Subscription and organization records
//!
//! Row-shaped types shared by the Postgres store and the in-memory store.
//! Statuses are persisted as snake_case text, matching the Stripe status
//! vocabulary for the subset we track.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Local subscription status
///
/// Closed set: rows with any other persisted status are never selected as
/// cleanup candidates (selection filters on these values at the query
/// boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> BillingResult<Self> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            other => Err(BillingError::UnknownStatus(other.to_string())),
        }
    }

    /// Statuses that grant access and are eligible for cleanup
    pub fn is_active_family(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A subscription row
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    /// External reference; absent for rows created before provider sync
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub plan_type: String,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// An organization row, reduced to the fields the cleanup flow touches
///
/// `plan_type` and `subscription_status` are a denormalized mirror of the
/// organization's current subscription and must be cleared when that
/// subscription is canceled.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationRecord {
    pub id: Uuid,
    pub name: String,
    pub plan_type: Option<String>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub stripe_customer_id: Option<String>,
}
