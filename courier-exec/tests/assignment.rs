//! Driver assignment and acceptance.

use courier_domain::{OrderStatus, PaymentMethod};
use courier_exec::ExecError;
use courier_testkit::{Harness, OrderSeed};
use rust_decimal_macros::dec;

fn unassigned() -> OrderSeed {
    OrderSeed {
        with_driver: false,
        ..OrderSeed::default()
    }
}

#[tokio::test]
async fn test_assign_driver_to_created_order() {
    let h = Harness::new();
    let f = h.seed_order(unassigned()).await.unwrap();

    let report = h.orders.assign_driver(&f.order.tracking_number, f.driver.id).await.unwrap();

    assert_eq!(report.order.status, OrderStatus::Assigned);
    assert_eq!(report.order.driver, Some(f.driver.id));
    assert!(report.posted.is_empty());

    let sent = h.notifier.sent_to(f.driver.id);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].description.contains(f.order.tracking_number.as_str()));
}

#[tokio::test]
async fn test_assign_on_delivered_order_fails_and_mutates_nothing() {
    let h = Harness::new();
    let f = h.seed_order(OrderSeed::default()).await.unwrap();
    let delivered = h
        .orders
        .update_status(&f.order.tracking_number, OrderStatus::Delivered, None)
        .await
        .unwrap()
        .order;
    let other = h.driver("Other").await.unwrap();

    let err = h.orders.assign_driver(&f.order.tracking_number, other.id).await.unwrap_err();
    assert_eq!(err.code(), "already_assigned");

    let order = h.orders.get(&f.order.tracking_number).await.unwrap();
    assert_eq!(order, delivered);
    assert_eq!(h.ledger.entries_for_order(f.order.id).await.unwrap().len(), 2);
    assert!(h.notifier.sent_to(other.id).is_empty());
}

#[tokio::test]
async fn test_assign_requires_driver_account() {
    let h = Harness::new();
    let f = h.seed_order(unassigned()).await.unwrap();

    let err = h.orders.assign_driver(&f.order.tracking_number, f.trader.id).await.unwrap_err();
    assert_eq!(err.code(), "role_mismatch");
}

#[tokio::test]
async fn test_notification_failure_does_not_roll_back() {
    let h = Harness::new();
    let f = h.seed_order(unassigned()).await.unwrap();
    h.notifier.set_failing(true);

    let report = h.orders.assign_driver(&f.order.tracking_number, f.driver.id).await.unwrap();
    assert_eq!(report.order.status, OrderStatus::Assigned);
    assert!(h.notifier.sent().is_empty());

    let stored = h.orders.get(&f.order.tracking_number).await.unwrap();
    assert_eq!(stored.driver, Some(f.driver.id));
}

#[tokio::test]
async fn test_bulk_assign_commits_every_order() {
    let h = Harness::new();
    let f = h.seed_order(unassigned()).await.unwrap();
    let second = h
        .orders
        .create(h.draft(f.trader.id, f.zone, PaymentMethod::Cod, dec!(40)).unwrap(), None)
        .await
        .unwrap();

    let trackings =
        vec![f.order.tracking_number.to_string(), second.tracking_number.to_string()];
    let confirmations = h.orders.bulk_assign_driver(&trackings, f.driver.id).await.unwrap();

    assert_eq!(confirmations.len(), 2);
    assert!(confirmations.iter().all(|c| c.status == OrderStatus::Assigned));
    assert_eq!(h.notifier.sent_to(f.driver.id).len(), 2);
    assert_eq!(h.orders.get(&second.tracking_number).await.unwrap().driver, Some(f.driver.id));
}

#[tokio::test]
async fn test_bulk_assign_is_all_or_nothing() {
    let h = Harness::new();
    let f = h.seed_order(unassigned()).await.unwrap();
    let cancelled = h
        .orders
        .create(h.draft(f.trader.id, f.zone, PaymentMethod::Paid, dec!(10)).unwrap(), None)
        .await
        .unwrap();
    h.orders.update_status(&cancelled.tracking_number, OrderStatus::Cancelled, None).await.unwrap();

    let trackings = vec![
        f.order.tracking_number.to_string(),
        cancelled.tracking_number.to_string(),
        "not-a-tracking-number".to_string(),
        "TRK0000000000AA".to_string(),
    ];
    let err = h.orders.bulk_assign_driver(&trackings, f.driver.id).await.unwrap_err();

    let ExecError::BatchValidation(items) = &err else {
        panic!("expected batch validation, got {:?}", err);
    };
    assert_eq!(items.len(), 3);
    assert!(items.iter().any(|i| i.item == cancelled.tracking_number.as_str()
        && i.code == "already_assigned"));
    assert!(items.iter().any(|i| i.code == "invalid_tracking_number"));
    assert!(items.iter().any(|i| i.code == "not_found"));

    let untouched = h.orders.get(&f.order.tracking_number).await.unwrap();
    assert_eq!(untouched.status, OrderStatus::Created);
    assert!(untouched.driver.is_none());
    assert!(h.notifier.sent_to(f.driver.id).is_empty());
}

#[tokio::test]
async fn test_accept_by_reference_code() {
    let h = Harness::new();
    let f = h.seed_order(unassigned()).await.unwrap();

    let confirmations = h
        .orders
        .accept_orders(&[f.order.reference_code.clone()], f.driver.id)
        .await
        .unwrap();

    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].order_id, f.order.id);
    assert_eq!(confirmations[0].status, OrderStatus::Assigned);
    assert_eq!(h.orders.get(&f.order.tracking_number).await.unwrap().driver, Some(f.driver.id));
}

#[tokio::test]
async fn test_accept_in_progress_order() {
    let h = Harness::new();
    let f = h.seed_order(unassigned()).await.unwrap();
    h.orders.update_status(&f.order.tracking_number, OrderStatus::Cancelled, None).await.unwrap();
    h.orders.update_status(&f.order.tracking_number, OrderStatus::InProgress, None).await.unwrap();

    let confirmations = h
        .orders
        .accept_orders(&[f.order.reference_code.clone()], f.driver.id)
        .await
        .unwrap();
    assert_eq!(confirmations[0].status, OrderStatus::Assigned);
}

#[tokio::test]
async fn test_accept_batch_with_unknown_reference_mutates_nothing() {
    let h = Harness::new();
    let f = h.seed_order(unassigned()).await.unwrap();

    let err = h
        .orders
        .accept_orders(&[f.order.reference_code.clone(), "UNKNOWN-REF".to_string()], f.driver.id)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "batch_validation");
    assert_eq!(err.items().len(), 1);
    assert_eq!(err.items()[0].item, "UNKNOWN-REF");

    let order = h.orders.get(&f.order.tracking_number).await.unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    assert!(order.driver.is_none());
}

#[tokio::test]
async fn test_accept_ambiguous_reference() {
    let h = Harness::new();
    let f = h.seed_order(unassigned()).await.unwrap();
    let mut draft = h.draft(f.trader.id, f.zone, PaymentMethod::Paid, dec!(10)).unwrap();
    draft.reference_code = f.order.reference_code.clone();
    h.orders.create(draft, None).await.unwrap();

    let err = h
        .orders
        .accept_orders(&[f.order.reference_code.clone()], f.driver.id)
        .await
        .unwrap_err();
    assert_eq!(err.items()[0].code, "ambiguous_reference");
}

#[tokio::test]
async fn test_accept_refuses_order_of_another_driver() {
    let h = Harness::new();
    let f = h.seed_order(OrderSeed::default()).await.unwrap();
    let other = h.driver("Other").await.unwrap();

    let err = h
        .orders
        .accept_orders(&[f.order.reference_code.clone()], other.id)
        .await
        .unwrap_err();
    assert_eq!(err.items()[0].code, "already_assigned");

    let order = h.orders.get(&f.order.tracking_number).await.unwrap();
    assert_eq!(order.driver, Some(f.driver.id));
}
