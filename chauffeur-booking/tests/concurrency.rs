mod common;

use chrono::Duration;
use std::time::Duration as StdDuration;

use chauffeur_booking::{BookingError, StatusRequest, WriteOptions};
use chauffeur_core::{ActorContext, BookingRepository, BusinessRules};
use chauffeur_shared::{BookingChanges, BookingStatus};

use common::{round_trip_draft, Harness};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_order_operations_on_a_pair_do_not_deadlock() {
    let h = Harness::new();
    let customer = ActorContext::customer("cust-1");

    for round in 0..10 {
        let created = h
            .service
            .create_booking(
                &round_trip_draft(Duration::days(2), Duration::days(5) + Duration::minutes(round)),
                &customer,
                WriteOptions::silent(),
            )
            .await
            .unwrap();
        let outbound_id = created.booking.id;
        let return_id = created.sibling.unwrap().id;

        let from_outbound = {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .transition_status(
                        outbound_id,
                        StatusRequest::to(BookingStatus::Confirmed),
                        &ActorContext::admin("ops-1"),
                        WriteOptions::silent(),
                    )
                    .await
            })
        };
        let from_return = {
            let service = h.service.clone();
            tokio::spawn(async move {
                let changes = BookingChanges {
                    admin_comment: Some(Some("meet at door 4".to_string())),
                    ..BookingChanges::default()
                };
                service
                    .update_booking(return_id, &changes, &ActorContext::admin("ops-2"), WriteOptions::silent())
                    .await
            })
        };

        let (a, b) = tokio::time::timeout(StdDuration::from_secs(10), async {
            (from_outbound.await.unwrap(), from_return.await.unwrap())
        })
        .await
        .expect("pair operations finished");
        a.unwrap();
        b.unwrap();

        let outbound = h.service.get_booking(outbound_id).await.unwrap();
        let return_leg = h.service.get_booking(return_id).await.unwrap();
        assert_eq!(outbound.status, BookingStatus::Confirmed);
        assert_eq!(return_leg.status, BookingStatus::Confirmed);
        assert_eq!(return_leg.admin_comment.as_deref(), Some("meet at door 4"));
        assert_eq!(outbound.linked_booking, Some(return_id));
        assert_eq!(return_leg.linked_booking, Some(outbound_id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_competing_cancellations_apply_once() {
    let h = Harness::new();
    let created = h
        .service
        .create_booking(
            &round_trip_draft(Duration::days(2), Duration::days(5)),
            &ActorContext::admin("ops-1"),
            WriteOptions::silent(),
        )
        .await
        .unwrap();
    let ids = [created.booking.id, created.sibling.unwrap().id];

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .cancel_round_trip(id, "trip called off", &ActorContext::customer("cust-1"), WriteOptions::silent())
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(BookingError::InvalidTransition { from, .. }) => assert!(from.is_cancellation()),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(succeeded, 1);

    for id in ids {
        let leg = h.service.get_booking(id).await.unwrap();
        assert_eq!(leg.status, BookingStatus::Cancelled);
        let cancellations = h
            .service
            .history(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|entry| entry.action == chauffeur_shared::HistoryAction::Cancelled)
            .count();
        assert_eq!(cancellations, 1);
    }
}

#[tokio::test]
async fn test_held_row_lock_surfaces_as_concurrent_modification() {
    let rules = BusinessRules { lock_timeout_ms: 50, ..BusinessRules::default() };
    let h = Harness::with_rules(rules);
    let created = h
        .service
        .create_booking(&round_trip_draft(Duration::days(2), Duration::days(5)), &ActorContext::admin("ops-1"), WriteOptions::silent())
        .await
        .unwrap();
    let return_id = created.sibling.unwrap().id;

    let mut blocker = h.repo.begin().await.unwrap();
    h.repo.lock_booking(&mut blocker, return_id).await.unwrap();

    let err = h
        .service
        .transition_status(
            created.booking.id,
            StatusRequest::to(BookingStatus::TripNotCovered),
            &ActorContext::admin("ops-2"),
            WriteOptions::silent(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::ConcurrentModification { booking_id } if booking_id == created.booking.id));
    assert!(err.is_retryable());

    h.repo.rollback(blocker).await.unwrap();
    let outbound = h.service.get_booking(created.booking.id).await.unwrap();
    assert_eq!(outbound.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_transaction_deadline_rolls_back_the_pair() {
    // The row lock would wait two seconds; the transaction gives up first.
    let rules = BusinessRules { transaction_deadline_ms: 50, lock_timeout_ms: 2000, ..BusinessRules::default() };
    let h = Harness::with_rules(rules);
    let created = h
        .service
        .create_booking(&round_trip_draft(Duration::days(2), Duration::days(5)), &ActorContext::admin("ops-1"), WriteOptions::silent())
        .await
        .unwrap();
    let outbound_id = created.booking.id;
    let return_id = created.sibling.unwrap().id;
    let outbound_history = h.service.history(outbound_id).await.unwrap().len();
    let return_history = h.service.history(return_id).await.unwrap().len();
    h.notifier.clear();

    let mut blocker = h.repo.begin().await.unwrap();
    h.repo.lock_booking(&mut blocker, return_id).await.unwrap();

    let err = h
        .service
        .cancel_round_trip(outbound_id, "trip called off", &ActorContext::admin("ops-2"), WriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Timeout(_)));
    h.repo.rollback(blocker).await.unwrap();

    for id in [outbound_id, return_id] {
        assert_eq!(h.service.get_booking(id).await.unwrap().status, BookingStatus::Confirmed);
    }
    assert_eq!(h.service.history(outbound_id).await.unwrap().len(), outbound_history);
    assert_eq!(h.service.history(return_id).await.unwrap().len(), return_history);
    assert!(h.notifier.events().is_empty());
}
