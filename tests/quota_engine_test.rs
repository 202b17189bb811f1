// Quota Engine integration tests
// Exercises the ledger-backed behavior: lazy initialization, daily reset,
// free-before-bonus precedence, pro bypass, and the no-double-spend guarantee
// under concurrent decrements.

mod common;

use std::sync::Arc;

use snaplist_backend_core::services::quota::{
    QuotaService, DEFAULT_DAILY_CREATIONS, DEFAULT_SAVE_SLOTS,
};

use common::{backdate_last_reset, force_quota, fresh_user, set_plan, setup_pool};

#[tokio::test]
async fn first_access_creates_default_quota() {
    let pool = setup_pool().await;
    let service = QuotaService::new(pool.clone());
    let user = fresh_user();

    let snapshot = service.get_or_init_quota(user).await.unwrap();

    assert_eq!(snapshot.save_slots_remaining, DEFAULT_SAVE_SLOTS);
    assert_eq!(snapshot.creations_remaining_today, DEFAULT_DAILY_CREATIONS);
    assert_eq!(snapshot.bonus_creations_remaining, 0);
    assert!(!snapshot.is_pro);
}

#[tokio::test]
async fn get_or_init_is_idempotent_within_a_day() {
    let pool = setup_pool().await;
    let service = QuotaService::new(pool.clone());
    let user = fresh_user();

    service.get_or_init_quota(user).await.unwrap();
    assert!(service.decrement_creation_quota(user, 3).await.unwrap());

    // A second read on the same UTC day must not reset the counter.
    let snapshot = service.get_or_init_quota(user).await.unwrap();
    assert_eq!(
        snapshot.creations_remaining_today,
        DEFAULT_DAILY_CREATIONS - 3
    );
}

#[tokio::test]
async fn stale_reset_date_rolls_over_on_read() {
    let pool = setup_pool().await;
    let service = QuotaService::new(pool.clone());
    let user = fresh_user();

    service.get_or_init_quota(user).await.unwrap();
    force_quota(&pool, user, DEFAULT_SAVE_SLOTS, 2, 4).await;
    backdate_last_reset(&pool, user, 1).await;

    let snapshot = service.get_or_init_quota(user).await.unwrap();

    // Daily allowance is restored; purchased credits are untouched.
    assert_eq!(snapshot.creations_remaining_today, DEFAULT_DAILY_CREATIONS);
    assert_eq!(snapshot.bonus_creations_remaining, 4);

    // The rollover happened exactly once: reading again keeps the state.
    assert!(service.decrement_creation_quota(user, 1).await.unwrap());
    let again = service.get_or_init_quota(user).await.unwrap();
    assert_eq!(
        again.creations_remaining_today,
        DEFAULT_DAILY_CREATIONS - 1
    );
}

#[tokio::test]
async fn concurrent_reads_across_reset_boundary_reset_once() {
    let pool = setup_pool().await;
    let service = Arc::new(QuotaService::new(pool.clone()));
    let user = fresh_user();

    service.get_or_init_quota(user).await.unwrap();
    force_quota(&pool, user, DEFAULT_SAVE_SLOTS, 0, 0).await;
    backdate_last_reset(&pool, user, 2).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(
            async move { service.get_or_init_quota(user).await },
        ));
    }

    for handle in handles {
        let snapshot = handle.await.unwrap().unwrap();
        assert_eq!(snapshot.creations_remaining_today, DEFAULT_DAILY_CREATIONS);
    }
}

#[tokio::test]
async fn creation_debit_prefers_free_allowance() {
    let pool = setup_pool().await;
    let service = QuotaService::new(pool.clone());
    let user = fresh_user();

    service.get_or_init_quota(user).await.unwrap();
    force_quota(&pool, user, DEFAULT_SAVE_SLOTS, 3, 5).await;

    assert!(service.decrement_creation_quota(user, 5).await.unwrap());

    let snapshot = service.get_or_init_quota(user).await.unwrap();
    assert_eq!(snapshot.creations_remaining_today, 0);
    assert_eq!(snapshot.bonus_creations_remaining, 3);
}

#[tokio::test]
async fn insufficient_quota_denies_without_mutation() {
    let pool = setup_pool().await;
    let service = QuotaService::new(pool.clone());
    let user = fresh_user();

    service.get_or_init_quota(user).await.unwrap();
    force_quota(&pool, user, DEFAULT_SAVE_SLOTS, 1, 1).await;

    assert!(!service.decrement_creation_quota(user, 3).await.unwrap());

    let snapshot = service.get_or_init_quota(user).await.unwrap();
    assert_eq!(snapshot.creations_remaining_today, 1);
    assert_eq!(snapshot.bonus_creations_remaining, 1);
}

#[tokio::test]
async fn pro_plan_bypasses_creation_quota() {
    let pool = setup_pool().await;
    let service = QuotaService::new(pool.clone());
    let user = fresh_user();

    set_plan(&pool, user, "pro").await;
    service.get_or_init_quota(user).await.unwrap();
    force_quota(&pool, user, 0, 0, 0).await;

    assert!(service.decrement_creation_quota(user, 1).await.unwrap());
    assert!(service.decrement_save_slots(user, 1).await.unwrap());

    // No counter mutation happened.
    let snapshot = service.get_or_init_quota(user).await.unwrap();
    assert!(snapshot.is_pro);
    assert_eq!(snapshot.creations_remaining_today, 0);
    assert_eq!(snapshot.bonus_creations_remaining, 0);
    assert_eq!(snapshot.save_slots_remaining, 0);
}

#[tokio::test]
async fn save_slots_are_a_single_pool() {
    let pool = setup_pool().await;
    let service = QuotaService::new(pool.clone());
    let user = fresh_user();

    service.get_or_init_quota(user).await.unwrap();

    assert!(service
        .decrement_save_slots(user, DEFAULT_SAVE_SLOTS)
        .await
        .unwrap());
    assert!(!service.decrement_save_slots(user, 1).await.unwrap());

    let snapshot = service.get_or_init_quota(user).await.unwrap();
    assert_eq!(snapshot.save_slots_remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decrements_never_double_spend() {
    let pool = setup_pool().await;
    let service = Arc::new(QuotaService::new(pool.clone()));
    let user = fresh_user();

    service.get_or_init_quota(user).await.unwrap();
    force_quota(&pool, user, DEFAULT_SAVE_SLOTS, 5, 0).await;

    // 5 units of quota, 12 concurrent spenders: exactly 5 may win.
    let mut handles = Vec::new();
    for _ in 0..12 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.decrement_creation_quota(user, 1).await
        }));
    }

    let mut successes = 0;
    let mut failures = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            true => successes += 1,
            false => failures += 1,
        }
    }

    assert_eq!(successes, 5);
    assert_eq!(failures, 7);

    let snapshot = service.get_or_init_quota(user).await.unwrap();
    assert_eq!(snapshot.creations_remaining_today, 0);
    assert_eq!(snapshot.bonus_creations_remaining, 0);
}
