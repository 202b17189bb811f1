// Purchase Reconciler integration tests
// Exactly-once credit application under duplicate webhook delivery, the
// pending-to-completed transition, the unknown-pack guard, and the
// amount-inference recovery path.

mod common;

use std::sync::Arc;

use snaplist_backend_core::app_config;
use snaplist_backend_core::models::purchase::{NewPurchase, Purchase, PurchaseStatus};
use snaplist_backend_core::services::payments::HttpPaymentClient;
use snaplist_backend_core::services::purchases::{PurchaseError, PurchaseService};
use snaplist_backend_core::services::quota::QuotaService;
use uuid::Uuid;

use common::{force_quota, fresh_user, setup_pool};

fn unique_key() -> String {
    format!("idem_{}", Uuid::new_v4().simple())
}

async fn purchase_service(pool: &snaplist_backend_core::DieselPool) -> PurchaseService {
    let payments = Arc::new(
        HttpPaymentClient::new(&app_config::config().payments).expect("payment client"),
    );
    PurchaseService::new(pool.clone(), payments)
}

#[tokio::test]
async fn pack_credits_apply_exactly_once() {
    let pool = setup_pool().await;
    let quota = QuotaService::new(pool.clone());
    let service = purchase_service(&pool).await;
    let user = fresh_user();
    let key = unique_key();

    quota.get_or_init_quota(user).await.unwrap();
    force_quota(&pool, user, 10, 0, 0).await;

    let first = service
        .apply_pack_credits(user, "credits_25", &key, Some(499), None, None)
        .await
        .unwrap();
    assert!(!first.already_applied);
    assert_eq!(first.creations_added, 25);
    assert_eq!(first.saves_added, 25);

    // Duplicate delivery: success, zero additional grant.
    let second = service
        .apply_pack_credits(user, "credits_25", &key, Some(499), None, None)
        .await
        .unwrap();
    assert!(second.already_applied);
    assert_eq!(second.creations_added, 0);

    let snapshot = quota.get_or_init_quota(user).await.unwrap();
    assert_eq!(snapshot.bonus_creations_remaining, 25);
    assert_eq!(snapshot.save_slots_remaining, 35);

    let mut conn = pool.get().await.unwrap();
    let purchase = Purchase::find_by_idempotency_key(&mut conn, &key)
        .await
        .unwrap()
        .expect("purchase recorded");
    assert!(purchase.is_completed());
    assert!(purchase.completed_at.is_some());
    assert_eq!(purchase.sku.as_deref(), Some("credits_25"));
}

#[tokio::test]
async fn unknown_pack_fails_without_mutation() {
    let pool = setup_pool().await;
    let quota = QuotaService::new(pool.clone());
    let service = purchase_service(&pool).await;
    let user = fresh_user();

    quota.get_or_init_quota(user).await.unwrap();

    let result = service
        .apply_pack_credits(user, "credits_9999", &unique_key(), None, None, None)
        .await;
    assert!(matches!(result, Err(PurchaseError::UnknownPack(_))));

    let snapshot = quota.get_or_init_quota(user).await.unwrap();
    assert_eq!(snapshot.bonus_creations_remaining, 0);
    assert_eq!(snapshot.save_slots_remaining, 10);
}

#[tokio::test]
async fn pending_purchase_transitions_to_completed() {
    let pool = setup_pool().await;
    let quota = QuotaService::new(pool.clone());
    let service = purchase_service(&pool).await;
    let user = fresh_user();
    let key = unique_key();
    let session = format!("cs_{}", Uuid::new_v4().simple());

    quota.get_or_init_quota(user).await.unwrap();

    // Simulate checkout initiation having recorded the attempt.
    let mut conn = pool.get().await.unwrap();
    Purchase::insert(
        &mut conn,
        &NewPurchase {
            user_id: user,
            sku: Some("credits_10".to_string()),
            amount_cents: 299,
            status: PurchaseStatus::Pending.as_str().to_string(),
            idempotency_key: key.clone(),
            provider_session_id: None,
            metadata: None,
            completed_at: None,
        },
    )
    .await
    .unwrap();
    drop(conn);

    let grant = service
        .apply_pack_credits(user, "credits_10", &key, Some(299), Some(&session), None)
        .await
        .unwrap();
    assert!(!grant.already_applied);

    let mut conn = pool.get().await.unwrap();
    let purchase = Purchase::find_by_idempotency_key(&mut conn, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(purchase.status, "completed");
    assert_eq!(purchase.provider_session_id.as_deref(), Some(session.as_str()));
}

#[tokio::test]
async fn insufficient_quota_is_resolved_by_a_pack() {
    let pool = setup_pool().await;
    let quota = QuotaService::new(pool.clone());
    let service = purchase_service(&pool).await;
    let user = fresh_user();

    quota.get_or_init_quota(user).await.unwrap();
    force_quota(&pool, user, 10, 0, 0).await;

    assert!(!quota.decrement_creation_quota(user, 1).await.unwrap());

    service
        .apply_pack_credits(user, "credits_10", &unique_key(), None, None, None)
        .await
        .unwrap();

    assert!(quota.decrement_creation_quota(user, 1).await.unwrap());
    let snapshot = quota.get_or_init_quota(user).await.unwrap();
    assert_eq!(snapshot.bonus_creations_remaining, 9);
}

#[tokio::test]
async fn recovery_path_infers_credits_from_amount() {
    let pool = setup_pool().await;
    let quota = QuotaService::new(pool.clone());
    let service = purchase_service(&pool).await;
    let user = fresh_user();
    let key = unique_key();
    let session = format!("cs_{}", Uuid::new_v4().simple());

    quota.get_or_init_quota(user).await.unwrap();
    force_quota(&pool, user, 10, 0, 0).await;

    let grant = service
        .recover_purchase_from_amount(user, 499, &key, Some(&session))
        .await
        .unwrap();
    assert_eq!(grant.creations_added, 25);
    assert_eq!(grant.saves_added, 25);

    // Recovered purchases are tagged and carry no sku.
    let mut conn = pool.get().await.unwrap();
    let purchase = Purchase::find_by_idempotency_key(&mut conn, &key)
        .await
        .unwrap()
        .unwrap();
    assert!(purchase.sku.is_none());
    assert_eq!(purchase.metadata.as_ref().unwrap()["recovered"], true);
    drop(conn);

    // Recovery is idempotent like the primary path.
    let again = service
        .recover_purchase_from_amount(user, 499, &key, Some(&session))
        .await
        .unwrap();
    assert!(again.already_applied);

    let snapshot = quota.get_or_init_quota(user).await.unwrap();
    assert_eq!(snapshot.bonus_creations_remaining, 25);
}

#[tokio::test]
async fn idempotency_lookup_round_trips() {
    let pool = setup_pool().await;
    let quota = QuotaService::new(pool.clone());
    let service = purchase_service(&pool).await;
    let user = fresh_user();
    let key = unique_key();

    assert!(service.check_idempotency(&key).await.unwrap().is_none());

    quota.get_or_init_quota(user).await.unwrap();
    service
        .apply_pack_credits(user, "credits_10", &key, None, None, None)
        .await
        .unwrap();

    let found = service.check_idempotency(&key).await.unwrap().unwrap();
    assert!(found.is_completed());
    assert_eq!(found.user_id, user);
}

#[tokio::test]
async fn completed_purchase_never_regresses() {
    let pool = setup_pool().await;
    let quota = QuotaService::new(pool.clone());
    let service = purchase_service(&pool).await;
    let user = fresh_user();
    let key = unique_key();
    let session = format!("cs_{}", Uuid::new_v4().simple());

    quota.get_or_init_quota(user).await.unwrap();
    service
        .apply_pack_credits(user, "credits_10", &key, None, Some(&session), None)
        .await
        .unwrap();

    // An expired-session event arriving late must not downgrade it.
    assert!(!service.mark_failed_by_session(&session).await.unwrap());

    // A refund is recorded, and credits stay in place.
    assert!(service.mark_refunded_by_session(&session).await.unwrap());

    let mut conn = pool.get().await.unwrap();
    let purchase = Purchase::find_by_idempotency_key(&mut conn, &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(purchase.status, "refunded");
    drop(conn);

    let snapshot = quota.get_or_init_quota(user).await.unwrap();
    assert_eq!(snapshot.bonus_creations_remaining, 10);
}
