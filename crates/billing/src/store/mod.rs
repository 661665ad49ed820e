//! Subscription store seam
//!
//! Reads and writes against the subscriptions/organizations tables, behind a
//! trait so the reconciliation flow can run against Postgres in production and
//! an in-memory store in tests.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{OrganizationRecord, SubscriptionRecord, SubscriptionStatus};

/// Candidate selection for a cleanup run
///
/// Selection happens at the query boundary: rows outside `statuses` are never
/// returned, scoped runs pass `org_id`, and plan-change flows exclude the
/// subscription they just created.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    pub org_id: Option<Uuid>,
    pub exclude_subscription_id: Option<Uuid>,
    pub statuses: Vec<SubscriptionStatus>,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// List subscriptions matching the filter
    ///
    /// No ordering guarantee; callers that need a deterministic order must
    /// use `list_active_for_org`.
    async fn list_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> BillingResult<Vec<SubscriptionRecord>>;

    /// List the org's active-family subscriptions, most recently touched
    /// first (`updated_at DESC, created_at DESC`)
    async fn list_active_for_org(&self, org_id: Uuid) -> BillingResult<Vec<SubscriptionRecord>>;

    async fn find_organization(&self, org_id: Uuid)
        -> BillingResult<Option<OrganizationRecord>>;

    /// Mark a subscription canceled: status `canceled`, `canceled_at` set,
    /// `cancel_at_period_end` true
    async fn cancel_subscription(
        &self,
        id: Uuid,
        canceled_at: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Clear the org's denormalized plan mirror: `subscription_status` to
    /// canceled, `plan_type` to null
    async fn clear_organization_plan(&self, org_id: Uuid) -> BillingResult<()>;
}

mod memory;
mod postgres;

pub use memory::InMemorySubscriptionStore;
pub use postgres::PostgresSubscriptionStore;
