// Purchase Reconciler
// The sole mutation path that turns a payment into pack credits. Safe under
// at-least-once webhook delivery: the idempotency key is checked before any
// grant, the grant and the purchase upsert share one row-locked transaction,
// and the unique constraint on idempotency_key converts lookup-then-insert
// races into detectable conflicts that resolve to "already applied".

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DieselPool;
use crate::models::pack::CreditPack;
use crate::models::profile::Profile;
use crate::models::purchase::{NewPurchase, Purchase, PurchaseStatus};
use crate::models::quota::UserQuota;
use crate::services::payments::{HttpPaymentClient, PaymentError};
use crate::services::quota::{QuotaError, QuotaService};

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("Database error: {0}")]
    Database(#[from] DieselError),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Unknown or inactive pack: {0}")]
    UnknownPack(String),

    #[error("Payment provider error: {0}")]
    Provider(#[from] PaymentError),
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for PurchaseError {
    fn from(e: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        PurchaseError::Pool(e.to_string())
    }
}

impl From<QuotaError> for PurchaseError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::Database(e) => PurchaseError::Database(e),
            QuotaError::Pool(s) => PurchaseError::Pool(s),
        }
    }
}

/// Result of applying (or re-applying) a payment to the ledger.
#[derive(Debug, Clone)]
pub struct PackGrant {
    pub creations_added: i32,
    pub saves_added: i32,
    /// True when the idempotency key had already been reconciled; the call
    /// had no side effects.
    pub already_applied: bool,
}

impl PackGrant {
    fn already_applied() -> Self {
        Self {
            creations_added: 0,
            saves_added: 0,
            already_applied: true,
        }
    }
}

/// Result of initiating (or re-surfacing) a checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutInitiation {
    pub purchase_id: Uuid,
    pub session_id: Option<String>,
    pub checkout_url: Option<String>,
    /// The idempotency key already reached `completed`; no new session was
    /// created and the client should not collect payment again.
    pub already_completed: bool,
}

pub struct PurchaseService {
    pool: DieselPool,
    payments: Arc<HttpPaymentClient>,
}

impl PurchaseService {
    pub fn new(pool: DieselPool, payments: Arc<HttpPaymentClient>) -> Self {
        Self { pool, payments }
    }

    /// Read-only idempotency-key lookup, used by checkout initiation to
    /// short-circuit retried client requests.
    pub async fn check_idempotency(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Purchase>, PurchaseError> {
        let mut conn = self.pool.get().await?;
        Ok(Purchase::find_by_idempotency_key(&mut conn, idempotency_key).await?)
    }

    /// Apply a pack's credits to the user's quota exactly once per
    /// idempotency key. Duplicate deliveries report success with no
    /// additional grant.
    #[instrument(skip(self, metadata))]
    pub async fn apply_pack_credits(
        &self,
        user_id: Uuid,
        sku: &str,
        idempotency_key: &str,
        amount_cents: Option<i32>,
        provider_session_id: Option<&str>,
        metadata: Option<JsonValue>,
    ) -> Result<PackGrant, PurchaseError> {
        let mut conn = self.pool.get().await?;

        // Idempotency lookup before anything else - the load-bearing check.
        if let Some(existing) =
            Purchase::find_by_idempotency_key(&mut conn, idempotency_key).await?
        {
            if existing.is_completed() {
                info!(
                    purchase_id = %existing.id,
                    "Duplicate reconciliation for idempotency key, already applied"
                );
                return Ok(PackGrant::already_applied());
            }
        }

        let pack = CreditPack::find_active_by_sku(&mut conn, sku)
            .await?
            .ok_or_else(|| PurchaseError::UnknownPack(sku.to_string()))?;

        QuotaService::get_or_init_on(&mut conn, user_id).await?;

        let grant = Self::grant_in_transaction(
            &mut conn,
            user_id,
            Some(pack.sku.clone()),
            pack.adds_creations,
            pack.adds_saves,
            idempotency_key,
            amount_cents.unwrap_or(pack.price_cents),
            provider_session_id,
            metadata,
        )
        .await;

        match grant {
            Ok(grant) => {
                if !grant.already_applied {
                    info!(
                        user_id = %user_id,
                        sku = %pack.sku,
                        creations = grant.creations_added,
                        saves = grant.saves_added,
                        "Pack credits applied"
                    );
                }
                Ok(grant)
            },
            Err(e) => Self::resolve_unique_conflict(&mut conn, idempotency_key, e).await,
        }
    }

    /// Best-effort recovery for payments that arrive without structured pack
    /// metadata: infer the grant from the charged amount. Degraded mode, not
    /// a primary path - every use is logged and the purchase is tagged.
    #[instrument(skip(self))]
    pub async fn recover_purchase_from_amount(
        &self,
        user_id: Uuid,
        amount_cents: i32,
        idempotency_key: &str,
        provider_session_id: Option<&str>,
    ) -> Result<PackGrant, PurchaseError> {
        let (creations, saves) = infer_credits_from_amount(amount_cents);
        warn!(
            user_id = %user_id,
            amount_cents,
            creations,
            saves,
            "Recovering pack credits from payment amount; event carried no pack metadata"
        );

        let mut conn = self.pool.get().await?;

        if let Some(existing) =
            Purchase::find_by_idempotency_key(&mut conn, idempotency_key).await?
        {
            if existing.is_completed() {
                return Ok(PackGrant::already_applied());
            }
        }

        QuotaService::get_or_init_on(&mut conn, user_id).await?;

        let metadata = json!({
            "recovered": true,
            "inferred_creations": creations,
            "inferred_saves": saves,
        });

        let grant = Self::grant_in_transaction(
            &mut conn,
            user_id,
            None,
            creations,
            saves,
            idempotency_key,
            amount_cents,
            provider_session_id,
            Some(metadata),
        )
        .await;

        match grant {
            Ok(grant) => Ok(grant),
            Err(e) => Self::resolve_unique_conflict(&mut conn, idempotency_key, e).await,
        }
    }

    /// One transaction covering the whole reconciliation: re-check the key
    /// under lock, grant credits under the quota row lock, upsert the
    /// purchase to completed.
    #[allow(clippy::too_many_arguments)]
    async fn grant_in_transaction(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        sku: Option<String>,
        creations: i32,
        saves: i32,
        idempotency_key: &str,
        amount_cents: i32,
        provider_session_id: Option<&str>,
        metadata: Option<JsonValue>,
    ) -> Result<PackGrant, PurchaseError> {
        use crate::schema::{purchases, user_quotas};

        let idempotency_key = idempotency_key.to_string();
        let provider_session_id = provider_session_id.map(str::to_string);

        conn.transaction::<PackGrant, PurchaseError, _>(|conn| {
            async move {
                // Re-check under lock: a concurrent reconciler may have
                // finished between the fast-path lookup and here.
                let existing =
                    Purchase::find_by_idempotency_key_for_update(conn, &idempotency_key).await?;
                if let Some(ref purchase) = existing {
                    if purchase.is_completed() {
                        return Ok(PackGrant::already_applied());
                    }
                }

                let now = chrono::Utc::now();

                let locked = UserQuota::find_for_update(conn, user_id).await?;
                diesel::update(user_quotas::dsl::user_quotas.find(user_id))
                    .set((
                        user_quotas::dsl::bonus_creations_remaining
                            .eq(locked.bonus_creations_remaining + creations),
                        user_quotas::dsl::save_slots_remaining
                            .eq(locked.save_slots_remaining + saves),
                        user_quotas::dsl::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                match existing {
                    Some(purchase) => {
                        diesel::update(purchases::dsl::purchases.find(purchase.id))
                            .set((
                                purchases::dsl::status.eq(PurchaseStatus::Completed.as_str()),
                                purchases::dsl::amount_cents.eq(amount_cents),
                                purchases::dsl::provider_session_id.eq(provider_session_id
                                    .clone()
                                    .or(purchase.provider_session_id.clone())),
                                purchases::dsl::metadata
                                    .eq(metadata.clone().or(purchase.metadata.clone())),
                                purchases::dsl::completed_at.eq(Some(now)),
                                purchases::dsl::updated_at.eq(now),
                            ))
                            .execute(conn)
                            .await?;
                    },
                    None => {
                        Purchase::insert(
                            conn,
                            &NewPurchase {
                                user_id,
                                sku,
                                amount_cents,
                                status: PurchaseStatus::Completed.as_str().to_string(),
                                idempotency_key,
                                provider_session_id,
                                metadata,
                                completed_at: Some(now),
                            },
                        )
                        .await?;
                    },
                }

                Ok(PackGrant {
                    creations_added: creations,
                    saves_added: saves,
                    already_applied: false,
                })
            }
            .scope_boxed()
        })
        .await
    }

    /// A unique violation on idempotency_key means a concurrent reconciler
    /// won the insert race. If its purchase completed, this delivery is a
    /// duplicate; anything else propagates.
    async fn resolve_unique_conflict(
        conn: &mut AsyncPgConnection,
        idempotency_key: &str,
        err: PurchaseError,
    ) -> Result<PackGrant, PurchaseError> {
        if let PurchaseError::Database(DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            _,
        )) = err
        {
            if let Some(existing) =
                Purchase::find_by_idempotency_key(conn, idempotency_key).await?
            {
                if existing.is_completed() {
                    info!(
                        purchase_id = %existing.id,
                        "Concurrent reconciliation won the race, treating as already applied"
                    );
                    return Ok(PackGrant::already_applied());
                }
            }
        }
        Err(err)
    }

    /// Initiate a hosted checkout for a pack. Retried client requests with
    /// the same idempotency key get the prior session back instead of a
    /// second charge.
    #[instrument(skip(self))]
    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        sku: &str,
        idempotency_key: &str,
    ) -> Result<CheckoutInitiation, PurchaseError> {
        use crate::schema::purchases::dsl;

        let mut conn = self.pool.get().await?;

        if let Some(existing) =
            Purchase::find_by_idempotency_key(&mut conn, idempotency_key).await?
        {
            let checkout_url = existing
                .metadata
                .as_ref()
                .and_then(|m| m["checkout_url"].as_str())
                .map(str::to_string);

            if existing.is_completed() {
                return Ok(CheckoutInitiation {
                    purchase_id: existing.id,
                    session_id: existing.provider_session_id,
                    checkout_url,
                    already_completed: true,
                });
            }

            if existing.provider_session_id.is_some() {
                return Ok(CheckoutInitiation {
                    purchase_id: existing.id,
                    session_id: existing.provider_session_id,
                    checkout_url,
                    already_completed: false,
                });
            }
        }

        let pack = CreditPack::find_active_by_sku(&mut conn, sku)
            .await?
            .ok_or_else(|| PurchaseError::UnknownPack(sku.to_string()))?;

        Profile::ensure_exists(&mut conn, user_id).await?;

        let purchase = match Purchase::insert(
            &mut conn,
            &NewPurchase {
                user_id,
                sku: Some(pack.sku.clone()),
                amount_cents: pack.price_cents,
                status: PurchaseStatus::Pending.as_str().to_string(),
                idempotency_key: idempotency_key.to_string(),
                provider_session_id: None,
                metadata: None,
                completed_at: None,
            },
        )
        .await
        {
            Ok(purchase) => purchase,
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                // A concurrent initiation with the same key got here first.
                Purchase::find_by_idempotency_key(&mut conn, idempotency_key)
                    .await?
                    .ok_or(DieselError::NotFound)?
            },
            Err(e) => return Err(e.into()),
        };

        let session = self
            .payments
            .create_checkout_session(user_id, &pack, idempotency_key)
            .await?;

        diesel::update(dsl::purchases.find(purchase.id))
            .set((
                dsl::provider_session_id.eq(Some(session.id.clone())),
                dsl::metadata.eq(Some(json!({ "checkout_url": session.url }))),
                dsl::updated_at.eq(chrono::Utc::now()),
            ))
            .execute(&mut conn)
            .await?;

        info!(user_id = %user_id, sku = %pack.sku, session_id = %session.id, "Checkout session created");

        Ok(CheckoutInitiation {
            purchase_id: purchase.id,
            session_id: Some(session.id),
            checkout_url: Some(session.url),
            already_completed: false,
        })
    }

    /// Abandoned or expired checkout: pending purchases only. A completed
    /// purchase never regresses.
    pub async fn mark_failed_by_session(&self, session_id: &str) -> Result<bool, PurchaseError> {
        use crate::schema::purchases::dsl;

        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            dsl::purchases
                .filter(dsl::provider_session_id.eq(session_id))
                .filter(dsl::status.eq(PurchaseStatus::Pending.as_str())),
        )
        .set((
            dsl::status.eq(PurchaseStatus::Failed.as_str()),
            dsl::updated_at.eq(chrono::Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        Ok(updated > 0)
    }

    /// Provider refund: recorded for support tooling. Credits are not clawed
    /// back - they may already be spent and counters never go negative.
    pub async fn mark_refunded_by_session(&self, session_id: &str) -> Result<bool, PurchaseError> {
        use crate::schema::purchases::dsl;

        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            dsl::purchases
                .filter(dsl::provider_session_id.eq(session_id))
                .filter(dsl::status.eq(PurchaseStatus::Completed.as_str())),
        )
        .set((
            dsl::status.eq(PurchaseStatus::Refunded.as_str()),
            dsl::updated_at.eq(chrono::Utc::now()),
        ))
        .execute(&mut conn)
        .await?;

        if updated > 0 {
            warn!(session_id, "Purchase refunded; credits left in place");
        }

        Ok(updated > 0)
    }
}

/// Coarse amount→credit buckets anchored to the seeded catalog's price
/// points. Only the recovery path consults this; structured metadata always
/// wins when the event carries it.
pub fn infer_credits_from_amount(amount_cents: i32) -> (i32, i32) {
    match amount_cents {
        c if c <= 349 => (10, 10),
        c if c <= 749 => (25, 25),
        _ => (60, 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_credits_buckets() {
        assert_eq!(infer_credits_from_amount(299), (10, 10));
        assert_eq!(infer_credits_from_amount(349), (10, 10));
        assert_eq!(infer_credits_from_amount(499), (25, 25));
        assert_eq!(infer_credits_from_amount(999), (60, 60));
        assert_eq!(infer_credits_from_amount(5000), (60, 60));
    }

    #[test]
    fn test_already_applied_grant_is_empty() {
        let grant = PackGrant::already_applied();
        assert!(grant.already_applied);
        assert_eq!(grant.creations_added, 0);
        assert_eq!(grant.saves_added, 0);
    }
}
