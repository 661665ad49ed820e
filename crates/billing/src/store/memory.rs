//! In-memory subscription store for tests and dry-run verification harnesses

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{OrganizationRecord, SubscriptionRecord, SubscriptionStatus};
use crate::store::{CandidateFilter, SubscriptionStore};

/// `SubscriptionStore` backed by in-memory maps
///
/// Mirrors the Postgres store's filter and sort semantics. Tracks write calls
/// and supports failure injection per subscription ID so tests can exercise
/// the fatal database phase.
#[derive(Clone, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<Mutex<HashMap<Uuid, SubscriptionRecord>>>,
    organizations: Arc<Mutex<HashMap<Uuid, OrganizationRecord>>>,
    fail_cancel: Arc<Mutex<HashSet<Uuid>>>,
    fail_list: Arc<Mutex<bool>>,
    pub write_calls: Arc<Mutex<usize>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_subscription(&self, sub: SubscriptionRecord) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sub.id, sub);
    }

    pub fn insert_organization(&self, org: OrganizationRecord) {
        self.organizations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(org.id, org);
    }

    /// Make `cancel_subscription` fail for this row
    pub fn fail_cancel_for(&self, id: Uuid) {
        self.fail_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }

    /// Make `list_candidates` fail, simulating a lost database connection
    pub fn fail_listing(&self) {
        *self.fail_list.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn subscription(&self, id: Uuid) -> Option<SubscriptionRecord> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn organization(&self, id: Uuid) -> Option<OrganizationRecord> {
        self.organizations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn write_call_count(&self) -> usize {
        *self.write_calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn list_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> BillingResult<Vec<SubscriptionRecord>> {
        if *self.fail_list.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(BillingError::Database(
                "injected listing failure".to_string(),
            ));
        }

        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subs
            .values()
            .filter(|s| filter.statuses.contains(&s.status))
            .filter(|s| filter.org_id.map_or(true, |org| s.org_id == org))
            .filter(|s| filter.exclude_subscription_id != Some(s.id))
            .cloned()
            .collect())
    }

    async fn list_active_for_org(&self, org_id: Uuid) -> BillingResult<Vec<SubscriptionRecord>> {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<SubscriptionRecord> = subs
            .values()
            .filter(|s| s.org_id == org_id && s.status.is_active_family())
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(rows)
    }

    async fn find_organization(
        &self,
        org_id: Uuid,
    ) -> BillingResult<Option<OrganizationRecord>> {
        let orgs = self.organizations.lock().unwrap_or_else(|e| e.into_inner());
        Ok(orgs.get(&org_id).cloned())
    }

    async fn cancel_subscription(
        &self,
        id: Uuid,
        canceled_at: OffsetDateTime,
    ) -> BillingResult<()> {
        *self.write_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        if self
            .fail_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
        {
            return Err(BillingError::Database(format!(
                "injected update failure for {}",
                id
            )));
        }

        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        match subs.get_mut(&id) {
            Some(sub) => {
                sub.status = SubscriptionStatus::Canceled;
                sub.canceled_at = Some(canceled_at);
                sub.cancel_at_period_end = true;
                sub.updated_at = OffsetDateTime::now_utc();
                Ok(())
            }
            None => Err(BillingError::Database(format!(
                "no such subscription: {}",
                id
            ))),
        }
    }

    async fn clear_organization_plan(&self, org_id: Uuid) -> BillingResult<()> {
        *self.write_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        let mut orgs = self.organizations.lock().unwrap_or_else(|e| e.into_inner());
        match orgs.get_mut(&org_id) {
            Some(org) => {
                org.subscription_status = Some(SubscriptionStatus::Canceled);
                org.plan_type = None;
                Ok(())
            }
            None => Err(BillingError::OrganizationNotFound(org_id)),
        }
    }
}
