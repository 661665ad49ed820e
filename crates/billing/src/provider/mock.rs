//! In-memory provider for tests and dry-run verification harnesses

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{BillingError, BillingResult};
use crate::provider::{ProviderSubscription, SubscriptionProvider};

/// `SubscriptionProvider` backed by an in-memory map
///
/// Tracks call counts and supports failure injection per subscription ID so
/// tests can exercise the best-effort provider phase.
#[derive(Clone, Default)]
pub struct MockSubscriptionProvider {
    subscriptions: Arc<Mutex<HashMap<String, String>>>,
    fail_cancel: Arc<Mutex<HashSet<String>>>,
    fail_retrieve: Arc<Mutex<HashSet<String>>>,
    pub retrieve_calls: Arc<Mutex<usize>>,
    pub cancel_calls: Arc<Mutex<usize>>,
}

impl MockSubscriptionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a remote subscription with the given status
    pub fn insert(&self, id: &str, status: &str) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), status.to_string());
    }

    /// Make `cancel_subscription` fail for this ID
    pub fn fail_cancel_for(&self, id: &str) {
        self.fail_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string());
    }

    /// Make `retrieve_subscription` fail for this ID
    pub fn fail_retrieve_for(&self, id: &str) {
        self.fail_retrieve
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string());
    }

    /// Current remote status, if the subscription exists
    pub fn status_of(&self, id: &str) -> Option<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn retrieve_call_count(&self) -> usize {
        *self.retrieve_calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cancel_call_count(&self) -> usize {
        *self.cancel_calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SubscriptionProvider for MockSubscriptionProvider {
    async fn retrieve_subscription(&self, id: &str) -> BillingResult<ProviderSubscription> {
        *self.retrieve_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        if self
            .fail_retrieve
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
        {
            return Err(BillingError::Stripe(format!(
                "injected retrieve failure for {}",
                id
            )));
        }

        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        match subs.get(id) {
            Some(status) => Ok(ProviderSubscription {
                id: id.to_string(),
                status: status.clone(),
            }),
            None => Err(BillingError::Stripe(format!(
                "no such subscription: {}",
                id
            ))),
        }
    }

    async fn cancel_subscription(&self, id: &str) -> BillingResult<()> {
        *self.cancel_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        if self
            .fail_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
        {
            return Err(BillingError::Stripe(format!(
                "injected cancel failure for {}",
                id
            )));
        }

        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        match subs.get_mut(id) {
            Some(status) => {
                *status = "canceled".to_string();
                Ok(())
            }
            None => Err(BillingError::Stripe(format!(
                "no such subscription: {}",
                id
            ))),
        }
    }
}
