//! Postgres-backed subscription store

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{OrganizationRecord, SubscriptionRecord, SubscriptionStatus};
use crate::store::{CandidateFilter, SubscriptionStore};

/// Raw subscription row; status is decoded after the fetch
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    org_id: Uuid,
    stripe_subscription_id: Option<String>,
    status: String,
    plan_type: String,
    cancel_at_period_end: bool,
    canceled_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl SubscriptionRow {
    fn into_record(self) -> BillingResult<SubscriptionRecord> {
        Ok(SubscriptionRecord {
            id: self.id,
            org_id: self.org_id,
            stripe_subscription_id: self.stripe_subscription_id,
            status: SubscriptionStatus::parse(&self.status)?,
            plan_type: self.plan_type,
            cancel_at_period_end: self.cancel_at_period_end,
            canceled_at: self.canceled_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    plan_type: Option<String>,
    subscription_status: Option<String>,
    stripe_customer_id: Option<String>,
}

impl OrganizationRow {
    fn into_record(self) -> BillingResult<OrganizationRecord> {
        let subscription_status = match self.subscription_status {
            Some(s) => Some(SubscriptionStatus::parse(&s)?),
            None => None,
        };
        Ok(OrganizationRecord {
            id: self.id,
            name: self.name,
            plan_type: self.plan_type,
            subscription_status,
            stripe_customer_id: self.stripe_customer_id,
        })
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, org_id, stripe_subscription_id, status, plan_type, \
     cancel_at_period_end, canceled_at, created_at, updated_at";

/// `SubscriptionStore` backed by Postgres
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn list_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> BillingResult<Vec<SubscriptionRecord>> {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM subscriptions WHERE status = ANY(",
            SUBSCRIPTION_COLUMNS
        ));
        builder.push_bind(statuses).push(")");

        if let Some(org_id) = filter.org_id {
            builder.push(" AND org_id = ").push_bind(org_id);
        }
        if let Some(exclude_id) = filter.exclude_subscription_id {
            builder.push(" AND id != ").push_bind(exclude_id);
        }

        let rows: Vec<SubscriptionRow> =
            builder.build_query_as().fetch_all(&self.pool).await?;

        rows.into_iter().map(SubscriptionRow::into_record).collect()
    }

    async fn list_active_for_org(&self, org_id: Uuid) -> BillingResult<Vec<SubscriptionRecord>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE org_id = $1
              AND status IN ('active', 'trialing', 'past_due')
            ORDER BY updated_at DESC, created_at DESC
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SubscriptionRow::into_record).collect()
    }

    async fn find_organization(
        &self,
        org_id: Uuid,
    ) -> BillingResult<Option<OrganizationRecord>> {
        let row: Option<OrganizationRow> = sqlx::query_as(
            r#"
            SELECT id, name, plan_type, subscription_status, stripe_customer_id
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrganizationRow::into_record).transpose()
    }

    async fn cancel_subscription(
        &self,
        id: Uuid,
        canceled_at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled',
                canceled_at = $1,
                cancel_at_period_end = true,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(canceled_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_organization_plan(&self, org_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET subscription_status = 'canceled',
                plan_type = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
