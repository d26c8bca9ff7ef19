use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use deal_queue::{
    clock::{Clock, ManualClock},
    store::{ClaimFilter, JobStore, MemoryJobStore},
    JobPayload, JobPriority, JobRecord, JobStatus, QueueError,
};

/// Test factory functions
fn create_test_record(priority: JobPriority, now: chrono::DateTime<Utc>) -> JobRecord {
    create_tenant_record("test_tenant", priority, now)
}

fn create_tenant_record(tenant: &str, priority: JobPriority, now: chrono::DateTime<Utc>) -> JobRecord {
    JobRecord::new(
        tenant.to_string(),
        "deal_analysis".to_string(),
        JobPayload::deal("deal-1"),
        "deal-1".to_string(),
        priority,
        now,
        "conformance".to_string(),
        now,
    )
}

fn create_store() -> (MemoryJobStore, ManualClock) {
    let clock = ManualClock::default();
    (MemoryJobStore::with_clock(Arc::new(clock.clone())), clock)
}

/// A1. Claim Moves Queued Rows Atomically
#[tokio::test]
async fn test_claim_is_conditional_on_queued() {
    let (store, clock) = create_store();
    let now = clock.now();

    // Arrange: one queued row
    let job_id = store.insert(create_test_record(JobPriority::Normal, now)).await.unwrap();

    // Act: claim it
    let claimed = store
        .claim_batch("deal_analysis", 5, &ClaimFilter::new(now, "worker-1"))
        .await
        .unwrap();

    // Assert: claimed exactly once, with claim details recorded
    assert_eq!(claimed.len(), 1);
    let record = store.get(job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Claimed);
    assert_eq!(record.worker_id.as_deref(), Some("worker-1"));
    assert_eq!(record.claimed_at, Some(now));

    // A processing row is never claimed again
    store.update_status(job_id, JobStatus::Processing, None).await.unwrap();
    let again = store
        .claim_batch("deal_analysis", 5, &ClaimFilter::new(now, "worker-2"))
        .await
        .unwrap();
    assert!(again.is_empty());
}

/// A2. Priority Then FIFO
#[tokio::test]
async fn test_claim_orders_by_priority_then_age() {
    let (store, clock) = create_store();

    let low = store.insert(create_test_record(JobPriority::Low, clock.now())).await.unwrap();
    clock.advance(Duration::seconds(1));
    let normal_old = store.insert(create_test_record(JobPriority::Normal, clock.now())).await.unwrap();
    clock.advance(Duration::seconds(1));
    let high = store.insert(create_test_record(JobPriority::High, clock.now())).await.unwrap();
    clock.advance(Duration::seconds(1));
    let normal_new = store.insert(create_test_record(JobPriority::Normal, clock.now())).await.unwrap();

    let claimed: Vec<_> = store
        .claim_batch("deal_analysis", 10, &ClaimFilter::new(clock.now(), "w"))
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.id)
        .collect();

    assert_eq!(claimed, vec![high, normal_old, normal_new, low]);
}

/// A3. Same-Instant Inserts Keep Insertion Order
#[tokio::test]
async fn test_ties_broken_by_insertion_sequence() {
    let (store, clock) = create_store();
    let now = clock.now();

    let mut inserted = Vec::new();
    for _ in 0..5 {
        inserted.push(store.insert(create_test_record(JobPriority::Normal, now)).await.unwrap());
    }

    let claimed: Vec<_> = store
        .claim_batch("deal_analysis", 5, &ClaimFilter::new(now, "w"))
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.id)
        .collect();

    assert_eq!(claimed, inserted);
}

/// A4. Not-Before Is Respected
#[tokio::test]
async fn test_delayed_rows_are_not_claimed_early() {
    let (store, clock) = create_store();
    let now = clock.now();

    let mut delayed = create_test_record(JobPriority::High, now);
    delayed.not_before = now + Duration::minutes(15);
    let delayed_id = store.insert(delayed).await.unwrap();

    let claimed = store
        .claim_batch("deal_analysis", 10, &ClaimFilter::new(now, "w"))
        .await
        .unwrap();
    assert!(claimed.is_empty());

    clock.advance(Duration::minutes(15));
    let claimed = store
        .claim_batch("deal_analysis", 10, &ClaimFilter::new(clock.now(), "w"))
        .await
        .unwrap();
    assert_eq!(claimed[0].id, delayed_id);
}

/// A5. Claim Respects Limit And Queue
#[tokio::test]
async fn test_claim_limit_and_queue_isolation() {
    let (store, clock) = create_store();
    let now = clock.now();

    for _ in 0..4 {
        store.insert(create_test_record(JobPriority::Normal, now)).await.unwrap();
    }
    let mut other = create_test_record(JobPriority::High, now);
    other.queue = "document_analysis".to_string();
    store.insert(other).await.unwrap();

    let first = store
        .claim_batch("deal_analysis", 3, &ClaimFilter::new(now, "w"))
        .await
        .unwrap();
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|record| record.queue == "deal_analysis"));

    let none = store
        .claim_batch("deal_analysis", 0, &ClaimFilter::new(now, "w"))
        .await
        .unwrap();
    assert!(none.is_empty());

    let missing = store
        .claim_batch("no_such_queue", 3, &ClaimFilter::new(now, "w"))
        .await
        .unwrap();
    assert!(missing.is_empty());
}

/// A6. Concurrent Claimers Never Share A Row
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_disjoint() {
    let (store, clock) = create_store();
    let now = clock.now();

    for _ in 0..40 {
        store.insert(create_test_record(JobPriority::Normal, now)).await.unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .claim_batch("deal_analysis", 7, &ClaimFilter::new(now, format!("w{}", worker)))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for record in handle.await.unwrap() {
            assert!(seen.insert(record.id), "job {} claimed twice", record.id);
            total += 1;
        }
    }
    assert_eq!(total, 40);
}

/// A7. Lifecycle Never Moves Backward
#[tokio::test]
async fn test_update_status_rejects_backward_transitions() {
    let (store, clock) = create_store();
    let job_id = store.insert(create_test_record(JobPriority::Normal, clock.now())).await.unwrap();

    // Queued rows cannot jump straight to completed
    let result = store.update_status(job_id, JobStatus::Completed, None).await;
    assert!(matches!(result, Err(QueueError::InvalidTransition { .. })));

    store
        .claim_batch("deal_analysis", 1, &ClaimFilter::new(clock.now(), "w"))
        .await
        .unwrap();
    store.update_status(job_id, JobStatus::Processing, None).await.unwrap();
    store.update_status(job_id, JobStatus::Completed, None).await.unwrap();

    let result = store.update_status(job_id, JobStatus::Queued, None).await;
    assert!(matches!(result, Err(QueueError::InvalidTransition { .. })));
    assert_eq!(store.get(job_id).await.unwrap().status, JobStatus::Completed);
}

/// A8. Tenant Filter And Stats
#[tokio::test]
async fn test_tenant_scoped_claims_and_stats() {
    let (store, clock) = create_store();
    let now = clock.now();

    store.insert(create_tenant_record("fund-a", JobPriority::Normal, now)).await.unwrap();
    store.insert(create_tenant_record("fund-a", JobPriority::Normal, now)).await.unwrap();
    store.insert(create_tenant_record("fund-b", JobPriority::High, now)).await.unwrap();

    let claimed = store
        .claim_batch("deal_analysis", 10, &ClaimFilter::new(now, "w").for_tenant("fund-a"))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 2);
    assert!(claimed.iter().all(|record| record.tenant_id == "fund-a"));

    let fund_a = store.stats(Some("fund-a")).await.unwrap();
    assert_eq!(fund_a.count(JobStatus::Claimed), 2);
    assert_eq!(fund_a.total(), 2);

    let all = store.stats(None).await.unwrap();
    assert_eq!(all.count(JobStatus::Queued), 1);
    assert_eq!(all.total(), 3);
}

/// A9. Stale Claims Expire
#[tokio::test]
async fn test_expire_stale_only_touches_in_flight_rows() {
    let (store, clock) = create_store();
    let now = clock.now();

    let stuck = store.insert(create_test_record(JobPriority::Normal, now)).await.unwrap();
    store
        .claim_batch("deal_analysis", 1, &ClaimFilter::new(now, "crashed"))
        .await
        .unwrap();
    let waiting = store.insert(create_test_record(JobPriority::Normal, now)).await.unwrap();

    clock.advance(Duration::minutes(31));
    let expired = store.expire_stale(clock.now() - Duration::minutes(30)).await.unwrap();

    assert_eq!(expired, 1);
    let record = store.get(stuck).await.unwrap();
    assert_eq!(record.status, JobStatus::Expired);
    assert_eq!(record.last_error.as_deref(), Some("claim abandoned"));
    assert_eq!(store.get(waiting).await.unwrap().status, JobStatus::Queued);
}
