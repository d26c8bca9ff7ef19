use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use deal_queue::{
    clock::{Clock, ManualClock},
    observability::ObservabilityLayer,
    resilience::{Admission, CircuitBreakerRegistry, IdempotencyGuard},
    store::{ClaimFilter, JobStore, MemoryJobStore},
    BreakerConfig, JobPayload, JobPriority, JobRecord, SkipReason,
};

fn priority_strategy() -> impl Strategy<Value = JobPriority> {
    prop_oneof![
        Just(JobPriority::Low),
        Just(JobPriority::Normal),
        Just(JobPriority::High),
    ]
}

proptest! {
    /// Admitted calls per window never exceed the budget, whatever the outcomes
    #[test]
    fn call_budget_bounds_admissions(
        budget in 1u32..10,
        outcomes in prop::collection::vec(any::<bool>(), 1..30),
    ) {
        let clock = ManualClock::default();
        let breakers = CircuitBreakerRegistry::new(Arc::new(clock), Arc::new(ObservabilityLayer::new()));
        // Failures never trip the breaker here, so only the budget can reject
        let config = BreakerConfig::default()
            .with_call_budget(budget)
            .with_failure_threshold(u32::MAX);

        let mut admitted = 0u32;
        for (i, success) in outcomes.iter().enumerate() {
            match breakers.admit("score_deal", &config) {
                Admission::Allowed => {
                    admitted += 1;
                    if *success {
                        breakers.record_success("score_deal");
                    } else {
                        breakers.record_failure("score_deal");
                    }
                }
                Admission::Rejected(reason) => {
                    prop_assert_eq!(reason, SkipReason::CallBudgetExceeded);
                    prop_assert!(i as u32 >= budget);
                }
            }
        }

        prop_assert_eq!(admitted, budget.min(outcomes.len() as u32));
    }

    /// Claims come out highest priority first, insertion order within a tier
    #[test]
    fn claims_follow_priority_then_fifo(priorities in prop::collection::vec(priority_strategy(), 1..25)) {
        let clock = ManualClock::default();
        let store = MemoryJobStore::with_clock(Arc::new(clock.clone()));

        let claimed = tokio_test::block_on(async {
            let mut inserted = Vec::new();
            for priority in &priorities {
                let now = clock.now();
                let record = JobRecord::new(
                    "fund-p".to_string(),
                    "deal_analysis".to_string(),
                    JobPayload::deal("deal-p"),
                    "deal-p".to_string(),
                    *priority,
                    now,
                    "property".to_string(),
                    now,
                );
                inserted.push((store.insert(record).await.unwrap(), *priority));
            }

            let claimed = store
                .claim_batch("deal_analysis", priorities.len(), &ClaimFilter::new(clock.now(), "w"))
                .await
                .unwrap();
            (inserted, claimed)
        });
        let (inserted, claimed) = claimed;

        let mut expected = inserted.clone();
        // Stable sort keeps insertion order within a priority
        expected.sort_by_key(|(_, priority)| std::cmp::Reverse(*priority));
        let expected: Vec<_> = expected.into_iter().map(|(id, _)| id).collect();
        let actual: Vec<_> = claimed.into_iter().map(|record| record.id).collect();

        prop_assert_eq!(actual, expected);
    }

    /// At most one holder per key across any sequence of acquires and releases
    #[test]
    fn idempotency_matches_a_set_model(ops in prop::collection::vec((0usize..4, any::<bool>()), 1..60)) {
        let guard = IdempotencyGuard::new(Arc::new(ManualClock::default()));
        let mut leases = HashMap::new();

        for (subject, acquire) in ops {
            let subject_id = format!("deal-{}", subject);
            if acquire {
                let acquired = guard.try_acquire("deal_analysis", &subject_id, None).into_lease();
                prop_assert_eq!(acquired.is_some(), !leases.contains_key(&subject));
                if let Some(lease) = acquired {
                    leases.insert(subject, lease);
                }
            } else {
                leases.remove(&subject);
                prop_assert!(!guard.is_held("deal_analysis", &subject_id));
            }
        }

        prop_assert_eq!(guard.active_locks().len(), leases.len());
    }
}
