//! Subscription cleanup / cancellation reconciliation
//!
//! Drives one or more subscriptions through a two-phase cancellation: best
//! effort against the payment provider, then the local store, which is the
//! system of record for access. Provider flakiness never blocks the local
//! update; every item is reported in the returned summary even when some
//! fail.
//!
//! Rows left with `canceled_in_database = true, canceled_in_stripe = false`
//! are the input to a later reconciliation pass that retries only the
//! provider phase.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{OrganizationRecord, SubscriptionRecord, SubscriptionStatus};
use crate::provider::SubscriptionProvider;
use crate::store::{CandidateFilter, SubscriptionStore};

/// Options controlling a cleanup run
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// Restrict to one organization; `None` means all organizations
    pub organization_id: Option<Uuid>,
    /// Skip this subscription, e.g. the one a plan change just created
    pub exclude_subscription_id: Option<Uuid>,
    /// Simulate the run without touching the provider or the store's write path
    pub dry_run: bool,
    pub include_trialing: bool,
    pub include_past_due: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            organization_id: None,
            exclude_subscription_id: None,
            dry_run: false,
            include_trialing: true,
            include_past_due: true,
        }
    }
}

/// Outcome for a single subscription
#[derive(Debug, Clone, Serialize)]
pub struct CleanupResult {
    pub subscription_id: Uuid,
    pub org_id: Uuid,
    pub org_name: Option<String>,
    pub plan_type: String,
    pub original_status: SubscriptionStatus,
    pub current_status: SubscriptionStatus,
    pub canceled_in_stripe: bool,
    pub canceled_in_database: bool,
    pub error: Option<String>,
}

impl CleanupResult {
    fn new(sub: &SubscriptionRecord) -> Self {
        Self {
            subscription_id: sub.id,
            org_id: sub.org_id,
            org_name: None,
            plan_type: sub.plan_type.clone(),
            original_status: sub.status,
            current_status: sub.status,
            canceled_in_stripe: false,
            canceled_in_database: false,
            error: None,
        }
    }

    fn already_canceled(&self) -> bool {
        self.original_status == SubscriptionStatus::Canceled
    }

    fn record_stripe_error(&mut self, message: &str) {
        self.error = Some(format!("Stripe: {}", message));
    }

    fn record_database_error(&mut self, message: &str) {
        let suffix = format!("Database: {}", message);
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{}; {}", existing, suffix),
            None => suffix,
        });
    }
}

/// Aggregate report for one cleanup invocation
#[derive(Debug, Clone, Serialize)]
pub struct CleanupSummary {
    pub total_processed: usize,
    pub successful_cancellations: usize,
    pub failed_cancellations: usize,
    pub already_canceled: usize,
    pub stripe_errors: usize,
    pub database_errors: usize,
    pub results: Vec<CleanupResult>,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub duration_ms: i64,
}

/// Orchestrates two-phase cancellation over a scoped candidate set
///
/// A stateless service value: construct one per invocation with its scope and
/// options. No hidden shared state between runs.
pub struct SubscriptionCancellationManager {
    provider: Arc<dyn SubscriptionProvider>,
    store: Arc<dyn SubscriptionStore>,
    options: CleanupOptions,
}

impl SubscriptionCancellationManager {
    pub fn new(
        provider: Arc<dyn SubscriptionProvider>,
        store: Arc<dyn SubscriptionStore>,
        options: CleanupOptions,
    ) -> Self {
        Self {
            provider,
            store,
            options,
        }
    }

    fn candidate_filter(&self) -> CandidateFilter {
        let mut statuses = vec![SubscriptionStatus::Active];
        if self.options.include_trialing {
            statuses.push(SubscriptionStatus::Trialing);
        }
        if self.options.include_past_due {
            statuses.push(SubscriptionStatus::PastDue);
        }
        CandidateFilter {
            org_id: self.options.organization_id,
            exclude_subscription_id: self.options.exclude_subscription_id,
            statuses,
        }
    }

    /// Run the cleanup over all matching subscriptions
    ///
    /// Per-item failures are folded into the summary; only a failure of the
    /// candidate listing itself propagates, with no partial summary.
    pub async fn execute_cleanup(&self) -> BillingResult<CleanupSummary> {
        let started_at = OffsetDateTime::now_utc();

        let candidates = self.store.list_candidates(&self.candidate_filter()).await?;

        tracing::info!(
            candidates = candidates.len(),
            org_id = ?self.options.organization_id,
            dry_run = self.options.dry_run,
            "Starting subscription cleanup"
        );

        let mut results = Vec::with_capacity(candidates.len());
        let mut successful = 0;
        let mut failed = 0;
        let mut already_canceled = 0;
        let mut stripe_errors = 0;
        let mut database_errors = 0;

        for sub in &candidates {
            let result = self.cancel_one(sub).await;

            if result.already_canceled() {
                already_canceled += 1;
            } else {
                if !result.canceled_in_stripe {
                    stripe_errors += 1;
                }
                if result.canceled_in_database {
                    successful += 1;
                } else {
                    failed += 1;
                    database_errors += 1;
                }
            }

            results.push(result);
        }

        let finished_at = OffsetDateTime::now_utc();
        let summary = CleanupSummary {
            total_processed: results.len(),
            successful_cancellations: successful,
            failed_cancellations: failed,
            already_canceled,
            stripe_errors,
            database_errors,
            results,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).whole_milliseconds() as i64,
        };

        tracing::info!(
            total = summary.total_processed,
            successful = summary.successful_cancellations,
            failed = summary.failed_cancellations,
            already_canceled = summary.already_canceled,
            duration_ms = summary.duration_ms,
            "Subscription cleanup finished"
        );

        Ok(summary)
    }

    /// Two-phase cancellation of a single subscription
    ///
    /// Never returns an error: both phases fold their failures into the
    /// result so the batch loop keeps going.
    async fn cancel_one(&self, sub: &SubscriptionRecord) -> CleanupResult {
        let mut result = CleanupResult::new(sub);

        // Org lookup is a read, so it runs even in dry-run mode. A failure
        // here only loses the name and the mirror check.
        let org = match self.store.find_organization(sub.org_id).await {
            Ok(org) => {
                result.org_name = org.as_ref().map(|o| o.name.clone());
                org
            }
            Err(e) => {
                tracing::warn!(
                    subscription_id = %sub.id,
                    org_id = %sub.org_id,
                    error = %e,
                    "Organization lookup failed during cleanup"
                );
                None
            }
        };

        // Idempotent short-circuit: nothing to do remotely or locally.
        if result.already_canceled() {
            result.canceled_in_stripe = true;
            result.canceled_in_database = true;
            tracing::debug!(
                subscription_id = %sub.id,
                "Subscription already canceled, skipping"
            );
            return result;
        }

        if self.options.dry_run {
            result.canceled_in_stripe = true;
            result.canceled_in_database = true;
            tracing::info!(
                subscription_id = %sub.id,
                org_id = %sub.org_id,
                plan_type = %sub.plan_type,
                "Dry run: would cancel subscription"
            );
            return result;
        }

        // Phase 1: provider, best effort. A failure here is recorded and the
        // local phase still runs.
        match &sub.stripe_subscription_id {
            Some(stripe_id) => match self.cancel_in_stripe(stripe_id).await {
                Ok(()) => result.canceled_in_stripe = true,
                Err(e) => {
                    result.record_stripe_error(&e.to_string());
                    tracing::warn!(
                        subscription_id = %sub.id,
                        stripe_subscription_id = %stripe_id,
                        error = %e,
                        "Stripe cancellation failed, continuing to database phase"
                    );
                }
            },
            // No external reference, nothing to cancel remotely.
            None => result.canceled_in_stripe = true,
        }

        // Phase 2: local store, the system of record.
        match self.cancel_in_database(sub, org.as_ref()).await {
            Ok(()) => {
                result.canceled_in_database = true;
                result.current_status = SubscriptionStatus::Canceled;
                tracing::info!(
                    subscription_id = %sub.id,
                    org_id = %sub.org_id,
                    plan_type = %sub.plan_type,
                    "Cancelled subscription"
                );
            }
            Err(e) => {
                result.record_database_error(&e.to_string());
                tracing::error!(
                    subscription_id = %sub.id,
                    org_id = %sub.org_id,
                    error = %e,
                    "Database cancellation failed"
                );
            }
        }

        result
    }

    async fn cancel_in_stripe(&self, stripe_id: &str) -> BillingResult<()> {
        let remote = self.provider.retrieve_subscription(stripe_id).await?;
        if remote.is_canceled() {
            tracing::debug!(
                stripe_subscription_id = %stripe_id,
                "Subscription already canceled in Stripe"
            );
            return Ok(());
        }
        self.provider.cancel_subscription(stripe_id).await
    }

    async fn cancel_in_database(
        &self,
        sub: &SubscriptionRecord,
        org: Option<&OrganizationRecord>,
    ) -> BillingResult<()> {
        self.store
            .cancel_subscription(sub.id, OffsetDateTime::now_utc())
            .await?;

        // Clear the org's denormalized mirror only when it still points at
        // this subscription's plan. Plan-type equality is an approximate
        // match; see ensure_single_active_subscription for why it is not
        // used there.
        if let Some(org) = org {
            if org.plan_type.as_deref() == Some(sub.plan_type.as_str()) {
                self.store.clear_organization_plan(org.id).await?;
                tracing::info!(
                    org_id = %org.id,
                    plan_type = %sub.plan_type,
                    "Cleared organization plan mirror"
                );
            }
        }

        Ok(())
    }
}

/// Cancel an organization's matching subscriptions
///
/// Typically invoked right after a plan change created a new subscription,
/// with `exclude_subscription_id` set to the new one so it survives.
pub async fn cleanup_organization_subscriptions(
    provider: Arc<dyn SubscriptionProvider>,
    store: Arc<dyn SubscriptionStore>,
    organization_id: Uuid,
    exclude_subscription_id: Option<Uuid>,
    dry_run: bool,
) -> BillingResult<CleanupSummary> {
    let manager = SubscriptionCancellationManager::new(
        provider,
        store,
        CleanupOptions {
            organization_id: Some(organization_id),
            exclude_subscription_id,
            dry_run,
            ..CleanupOptions::default()
        },
    );
    manager.execute_cleanup().await
}

/// Bulk cleanup across all organizations, or one, for manual invocation
pub async fn emergency_cleanup_all_subscriptions(
    provider: Arc<dyn SubscriptionProvider>,
    store: Arc<dyn SubscriptionStore>,
    organization_id: Option<Uuid>,
    dry_run: bool,
) -> BillingResult<CleanupSummary> {
    let manager = SubscriptionCancellationManager::new(
        provider,
        store,
        CleanupOptions {
            organization_id,
            dry_run,
            ..CleanupOptions::default()
        },
    );
    manager.execute_cleanup().await
}

/// Repair a duplicate-active-subscription state for one organization
///
/// Keeps the most recently touched active subscription and cancels the rest,
/// best effort in both phases. The organization's plan mirror is left alone:
/// the survivor stays active, and a duplicate sharing its plan type would
/// otherwise wipe the mirror out from under it.
pub async fn ensure_single_active_subscription(
    provider: Arc<dyn SubscriptionProvider>,
    store: Arc<dyn SubscriptionStore>,
    organization_id: Uuid,
) -> BillingResult<()> {
    let subs = store.list_active_for_org(organization_id).await?;

    if subs.len() <= 1 {
        return Ok(());
    }

    let (survivor, duplicates) = match subs.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };

    tracing::warn!(
        org_id = %organization_id,
        active_count = subs.len(),
        survivor_id = %survivor.id,
        "Organization has multiple active subscriptions, cancelling duplicates"
    );

    for sub in duplicates {
        if let Some(stripe_id) = &sub.stripe_subscription_id {
            match provider.retrieve_subscription(stripe_id).await {
                Ok(remote) if remote.is_canceled() => {}
                Ok(_) => {
                    if let Err(e) = provider.cancel_subscription(stripe_id).await {
                        tracing::warn!(
                            subscription_id = %sub.id,
                            stripe_subscription_id = %stripe_id,
                            error = %e,
                            "Failed to cancel duplicate subscription in Stripe"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %sub.id,
                        stripe_subscription_id = %stripe_id,
                        error = %e,
                        "Failed to retrieve duplicate subscription from Stripe"
                    );
                }
            }
        }

        match store
            .cancel_subscription(sub.id, OffsetDateTime::now_utc())
            .await
        {
            Ok(()) => tracing::info!(
                subscription_id = %sub.id,
                org_id = %organization_id,
                "Cancelled duplicate subscription"
            ),
            Err(e) => tracing::error!(
                subscription_id = %sub.id,
                org_id = %organization_id,
                error = %e,
                "Failed to cancel duplicate subscription in database"
            ),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockSubscriptionProvider;
    use crate::store::InMemorySubscriptionStore;
    use time::Duration;

    fn subscription(
        org_id: Uuid,
        stripe_id: Option<&str>,
        status: SubscriptionStatus,
        plan_type: &str,
    ) -> SubscriptionRecord {
        let now = OffsetDateTime::now_utc();
        SubscriptionRecord {
            id: Uuid::new_v4(),
            org_id,
            stripe_subscription_id: stripe_id.map(str::to_string),
            status,
            plan_type: plan_type.to_string(),
            cancel_at_period_end: false,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn organization(id: Uuid, plan_type: Option<&str>) -> OrganizationRecord {
        OrganizationRecord {
            id,
            name: "Acme Federal".to_string(),
            plan_type: plan_type.map(str::to_string),
            subscription_status: plan_type.map(|_| SubscriptionStatus::Active),
            stripe_customer_id: Some("cus_test_1".to_string()),
        }
    }

    fn seed(
        store: &InMemorySubscriptionStore,
        provider: &MockSubscriptionProvider,
        org_id: Uuid,
        plan_type: &str,
        n: usize,
    ) -> Vec<SubscriptionRecord> {
        store.insert_organization(organization(org_id, Some(plan_type)));
        (0..n)
            .map(|i| {
                let stripe_id = format!("sub_{}_{}", org_id.simple(), i);
                provider.insert(&stripe_id, "active");
                let sub = subscription(
                    org_id,
                    Some(&stripe_id),
                    SubscriptionStatus::Active,
                    plan_type,
                );
                store.insert_subscription(sub.clone());
                sub
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cancels_all_candidates_both_phases() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        let subs = seed(&store, &provider, org_id, "pro", 2);

        let summary = emergency_cleanup_all_subscriptions(
            provider.clone(),
            store.clone(),
            None,
            false,
        )
        .await
        .unwrap();

        assert_eq!(summary.total_processed, 2);
        assert_eq!(summary.successful_cancellations, 2);
        assert_eq!(summary.failed_cancellations, 0);
        assert_eq!(summary.stripe_errors, 0);

        for sub in &subs {
            let row = store.subscription(sub.id).unwrap();
            assert_eq!(row.status, SubscriptionStatus::Canceled);
            assert!(row.cancel_at_period_end);
            assert!(row.canceled_at.is_some());
            let stripe_id = sub.stripe_subscription_id.as_deref().unwrap();
            assert_eq!(provider.status_of(stripe_id).unwrap(), "canceled");
        }
    }

    #[tokio::test]
    async fn test_second_run_is_all_already_canceled() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        seed(&store, &provider, org_id, "pro", 3);

        let first =
            emergency_cleanup_all_subscriptions(provider.clone(), store.clone(), None, false)
                .await
                .unwrap();
        assert_eq!(first.successful_cancellations, 3);

        // Canceled rows no longer match the candidate filter, so the second
        // run sees nothing at all.
        let second =
            emergency_cleanup_all_subscriptions(provider.clone(), store.clone(), None, false)
                .await
                .unwrap();
        assert_eq!(second.total_processed, 0);
        assert_eq!(second.successful_cancellations, 0);
    }

    #[tokio::test]
    async fn test_already_canceled_row_short_circuits() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        store.insert_organization(organization(org_id, Some("pro")));

        let sub = subscription(org_id, Some("sub_done"), SubscriptionStatus::Canceled, "pro");
        store.insert_subscription(sub.clone());
        provider.insert("sub_done", "canceled");

        let manager = SubscriptionCancellationManager::new(
            provider.clone(),
            store.clone(),
            CleanupOptions {
                organization_id: Some(org_id),
                ..CleanupOptions::default()
            },
        );
        // Force the row through the per-item path despite the filter.
        let result = manager.cancel_one(&sub).await;

        assert!(result.canceled_in_stripe);
        assert!(result.canceled_in_database);
        assert!(result.error.is_none());
        assert_eq!(provider.retrieve_call_count(), 0);
        assert_eq!(provider.cancel_call_count(), 0);
        assert_eq!(store.write_call_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_has_no_side_effects() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        let subs = seed(&store, &provider, org_id, "pro", 2);

        let summary =
            emergency_cleanup_all_subscriptions(provider.clone(), store.clone(), None, true)
                .await
                .unwrap();

        assert_eq!(summary.total_processed, 2);
        assert_eq!(summary.successful_cancellations, 2);
        for result in &summary.results {
            assert!(result.canceled_in_stripe);
            assert!(result.canceled_in_database);
        }

        // No provider traffic, no store writes.
        assert_eq!(provider.retrieve_call_count(), 0);
        assert_eq!(provider.cancel_call_count(), 0);
        assert_eq!(store.write_call_count(), 0);
        for sub in &subs {
            assert_eq!(
                store.subscription(sub.id).unwrap().status,
                SubscriptionStatus::Active
            );
        }
    }

    #[tokio::test]
    async fn test_database_failure_is_isolated_to_one_item() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        let subs = seed(&store, &provider, org_id, "pro", 3);
        store.fail_cancel_for(subs[1].id);

        let summary =
            emergency_cleanup_all_subscriptions(provider.clone(), store.clone(), None, false)
                .await
                .unwrap();

        assert_eq!(summary.total_processed, 3);
        assert_eq!(summary.successful_cancellations, 2);
        assert_eq!(summary.failed_cancellations, 1);
        assert_eq!(summary.database_errors, 1);

        let failures: Vec<_> = summary
            .results
            .iter()
            .filter(|r| r.error.is_some())
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].subscription_id, subs[1].id);
        assert!(failures[0].error.as_deref().unwrap().contains("Database:"));
        assert!(!failures[0].canceled_in_database);
        // Provider phase still went through for the failed item.
        assert!(failures[0].canceled_in_stripe);
    }

    #[tokio::test]
    async fn test_stripe_failure_does_not_block_database() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        let subs = seed(&store, &provider, org_id, "pro", 1);
        let stripe_id = subs[0].stripe_subscription_id.as_deref().unwrap();
        provider.fail_cancel_for(stripe_id);

        let summary =
            emergency_cleanup_all_subscriptions(provider.clone(), store.clone(), None, false)
                .await
                .unwrap();

        assert_eq!(summary.stripe_errors, 1);
        assert_eq!(summary.successful_cancellations, 1);

        let result = &summary.results[0];
        assert!(!result.canceled_in_stripe);
        assert!(result.canceled_in_database);
        assert!(result.error.as_deref().unwrap().contains("Stripe:"));
        assert_eq!(
            store.subscription(subs[0].id).unwrap().status,
            SubscriptionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_stripe_and_database_errors_are_both_recorded() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        let subs = seed(&store, &provider, org_id, "pro", 1);
        provider.fail_cancel_for(subs[0].stripe_subscription_id.as_deref().unwrap());
        store.fail_cancel_for(subs[0].id);

        let summary =
            emergency_cleanup_all_subscriptions(provider.clone(), store.clone(), None, false)
                .await
                .unwrap();

        let error = summary.results[0].error.as_deref().unwrap();
        assert!(error.contains("Stripe:"));
        assert!(error.contains("Database:"));
        assert_eq!(summary.stripe_errors, 1);
        assert_eq!(summary.database_errors, 1);
        assert_eq!(summary.failed_cancellations, 1);
    }

    #[tokio::test]
    async fn test_scope_filtering_leaves_other_org_untouched() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        seed(&store, &provider, org_a, "pro", 2);
        let b_subs = seed(&store, &provider, org_b, "team", 2);

        let summary = cleanup_organization_subscriptions(
            provider.clone(),
            store.clone(),
            org_a,
            None,
            false,
        )
        .await
        .unwrap();

        assert_eq!(summary.total_processed, 2);
        assert!(summary.results.iter().all(|r| r.org_id == org_a));
        for sub in &b_subs {
            assert_eq!(
                store.subscription(sub.id).unwrap().status,
                SubscriptionStatus::Active
            );
        }
    }

    #[tokio::test]
    async fn test_exclusion_filter_spares_new_subscription() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        let subs = seed(&store, &provider, org_id, "pro", 2);
        let keep = &subs[0];
        let retire = &subs[1];

        let summary = cleanup_organization_subscriptions(
            provider.clone(),
            store.clone(),
            org_id,
            Some(keep.id),
            false,
        )
        .await
        .unwrap();

        assert_eq!(summary.total_processed, 1);
        assert_eq!(summary.results[0].subscription_id, retire.id);
        assert_eq!(
            store.subscription(keep.id).unwrap().status,
            SubscriptionStatus::Active
        );
        assert_eq!(
            store.subscription(retire.id).unwrap().status,
            SubscriptionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_include_trialing_false_excludes_trialing_rows() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        store.insert_organization(organization(org_id, Some("pro")));

        let active = subscription(org_id, Some("sub_a"), SubscriptionStatus::Active, "pro");
        let trialing = subscription(org_id, Some("sub_t"), SubscriptionStatus::Trialing, "pro");
        provider.insert("sub_a", "active");
        provider.insert("sub_t", "trialing");
        store.insert_subscription(active.clone());
        store.insert_subscription(trialing.clone());

        let manager = SubscriptionCancellationManager::new(
            provider.clone(),
            store.clone(),
            CleanupOptions {
                organization_id: Some(org_id),
                include_trialing: false,
                ..CleanupOptions::default()
            },
        );
        let summary = manager.execute_cleanup().await.unwrap();

        // The trialing row is not even listed, let alone skipped.
        assert_eq!(summary.total_processed, 1);
        assert_eq!(summary.results[0].subscription_id, active.id);
        assert_eq!(
            store.subscription(trialing.id).unwrap().status,
            SubscriptionStatus::Trialing
        );
    }

    #[tokio::test]
    async fn test_missing_stripe_id_skips_provider() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        store.insert_organization(organization(org_id, Some("pro")));

        let sub = subscription(org_id, None, SubscriptionStatus::Active, "pro");
        store.insert_subscription(sub.clone());

        let summary =
            emergency_cleanup_all_subscriptions(provider.clone(), store.clone(), None, false)
                .await
                .unwrap();

        assert_eq!(summary.successful_cancellations, 1);
        assert!(summary.results[0].canceled_in_stripe);
        assert_eq!(provider.retrieve_call_count(), 0);
        assert_eq!(provider.cancel_call_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_already_canceled_skips_cancel_call() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        store.insert_organization(organization(org_id, Some("pro")));

        // Local row still active, remote already canceled by another run.
        let sub = subscription(org_id, Some("sub_raced"), SubscriptionStatus::Active, "pro");
        provider.insert("sub_raced", "canceled");
        store.insert_subscription(sub.clone());

        let summary =
            emergency_cleanup_all_subscriptions(provider.clone(), store.clone(), None, false)
                .await
                .unwrap();

        assert!(summary.results[0].canceled_in_stripe);
        assert_eq!(summary.successful_cancellations, 1);
        assert_eq!(provider.retrieve_call_count(), 1);
        assert_eq!(provider.cancel_call_count(), 0);
    }

    #[tokio::test]
    async fn test_org_mirror_cleared_only_on_plan_match() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());

        // Org A mirrors the plan being canceled; org B mirrors a different one.
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        store.insert_organization(organization(org_a, Some("pro")));
        store.insert_organization(organization(org_b, Some("team")));

        let sub_a = subscription(org_a, Some("sub_ma"), SubscriptionStatus::Active, "pro");
        let sub_b = subscription(org_b, Some("sub_mb"), SubscriptionStatus::Active, "pro");
        provider.insert("sub_ma", "active");
        provider.insert("sub_mb", "active");
        store.insert_subscription(sub_a);
        store.insert_subscription(sub_b);

        emergency_cleanup_all_subscriptions(provider.clone(), store.clone(), None, false)
            .await
            .unwrap();

        let a = store.organization(org_a).unwrap();
        assert_eq!(a.plan_type, None);
        assert_eq!(a.subscription_status, Some(SubscriptionStatus::Canceled));

        let b = store.organization(org_b).unwrap();
        assert_eq!(b.plan_type.as_deref(), Some("team"));
        assert_eq!(b.subscription_status, Some(SubscriptionStatus::Active));
    }

    #[tokio::test]
    async fn test_ensure_single_keeps_most_recently_updated() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        store.insert_organization(organization(org_id, Some("pro")));

        let now = OffsetDateTime::now_utc();
        let mut subs = Vec::new();
        for (i, age_minutes) in [30i64, 10, 20].iter().enumerate() {
            let stripe_id = format!("sub_dup_{}", i);
            provider.insert(&stripe_id, "active");
            let mut sub =
                subscription(org_id, Some(&stripe_id), SubscriptionStatus::Active, "pro");
            sub.updated_at = now - Duration::minutes(*age_minutes);
            sub.created_at = sub.updated_at;
            store.insert_subscription(sub.clone());
            subs.push(sub);
        }

        ensure_single_active_subscription(provider.clone(), store.clone(), org_id)
            .await
            .unwrap();

        // subs[1] has the latest updated_at and must survive.
        assert_eq!(
            store.subscription(subs[1].id).unwrap().status,
            SubscriptionStatus::Active
        );
        assert_eq!(
            store.subscription(subs[0].id).unwrap().status,
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            store.subscription(subs[2].id).unwrap().status,
            SubscriptionStatus::Canceled
        );

        // The org mirror is untouched by the repair path.
        assert_eq!(store.organization(org_id).unwrap().plan_type.as_deref(), Some("pro"));
    }

    #[tokio::test]
    async fn test_ensure_single_noop_with_one_active() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        let subs = seed(&store, &provider, org_id, "pro", 1);

        ensure_single_active_subscription(provider.clone(), store.clone(), org_id)
            .await
            .unwrap();

        assert_eq!(
            store.subscription(subs[0].id).unwrap().status,
            SubscriptionStatus::Active
        );
        assert_eq!(store.write_call_count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_single_tolerates_provider_failure() {
        let provider = Arc::new(MockSubscriptionProvider::new());
        let store = Arc::new(InMemorySubscriptionStore::new());
        let org_id = Uuid::new_v4();
        store.insert_organization(organization(org_id, Some("pro")));

        let now = OffsetDateTime::now_utc();
        let mut survivor = subscription(org_id, Some("sub_s"), SubscriptionStatus::Active, "pro");
        survivor.updated_at = now;
        let mut dup = subscription(org_id, Some("sub_d"), SubscriptionStatus::Active, "pro");
        dup.updated_at = now - Duration::hours(1);
        provider.insert("sub_s", "active");
        provider.insert("sub_d", "active");
        provider.fail_cancel_for("sub_d");
        store.insert_subscription(survivor.clone());
        store.insert_subscription(dup.clone());

        ensure_single_active_subscription(provider.clone(), store.clone(), org_id)
            .await
            .unwrap();

        // Remote cancel failed, local cancel still happened.
        assert_eq!(provider.status_of("sub_d").unwrap(), "active");
        assert_eq!(
            store.subscription(dup.id).unwrap().status,
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            store.subscription(survivor.id).unwrap().status,
            SubscriptionStatus::Active
        );
    }
}
