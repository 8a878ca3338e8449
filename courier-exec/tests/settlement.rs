//! Settlement scenarios run through the order service.

use std::sync::Arc;

use courier_domain::{Direction, EntryKind, OrderStatus, Role};
use courier_testkit::{money, Harness, OrderSeed};
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_cod_delivery_settles_both_parties() {
    let h = Harness::new();
    let seed = OrderSeed {
        extra_delivery_cost: dec!(5),
        ..OrderSeed::cod()
    };
    let f = h.seed_order(seed).await.unwrap();

    let report = h
        .orders
        .update_status(&f.order.tracking_number, OrderStatus::Delivered, Some("office"))
        .await
        .unwrap();

    assert_eq!(report.posted.len(), 4);
    assert!(report.skipped.is_empty());
    assert!(report.reversed.is_empty());
    assert_eq!(report.order.status, OrderStatus::Delivered);

    // trader: +15 (withdraw tmc) -100 (deposit product)
    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(-85));
    // driver: +115 (cash collected) -15 (fee incl. extra)
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(100));
}

#[tokio::test]
async fn test_paid_delivery() {
    let h = Harness::new();
    let f = h.seed_order(OrderSeed::default()).await.unwrap();

    h.orders.update_status(&f.order.tracking_number, OrderStatus::Delivered, None).await.unwrap();

    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(15));
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(-10));

    let entries = h.ledger.entries_for_order(f.order.id).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.kind == EntryKind::Settlement && e.is_active()));
    assert!(entries
        .iter()
        .any(|e| e.role == Some(Role::Trader) && e.direction == Direction::Withdraw));
}

#[tokio::test]
async fn test_remaining_fees_delivery_moves_driver_only() {
    let h = Harness::new();
    let f = h.seed_order(OrderSeed::remaining_fees()).await.unwrap();

    h.orders.update_status(&f.order.tracking_number, OrderStatus::Delivered, None).await.unwrap();

    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(0));
    // -10 fee, +15 tmc
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(5));
}

#[tokio::test]
async fn test_cancel_charges_trader_and_pays_driver() {
    let h = Harness::new();
    let seed = OrderSeed {
        trader_merchant_cost: dec!(20),
        ..OrderSeed::default()
    };
    let f = h.seed_order(seed).await.unwrap();

    h.orders.update_status(&f.order.tracking_number, OrderStatus::Cancelled, None).await.unwrap();

    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(-20));
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(-10));

    let notified = h.notifier.sent_to(f.trader.id);
    assert_eq!(notified.len(), 1);
    assert!(notified[0].description.contains("CANCELLED"));
}

#[tokio::test]
async fn test_cancel_without_driver_only_touches_trader() {
    let h = Harness::new();
    let seed = OrderSeed {
        with_driver: false,
        ..OrderSeed::default()
    };
    let f = h.seed_order(seed).await.unwrap();

    let report = h
        .orders
        .update_status(&f.order.tracking_number, OrderStatus::Cancelled, None)
        .await
        .unwrap();

    assert_eq!(report.posted.len(), 1);
    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(-15));
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(0));
}

#[tokio::test]
async fn test_delivered_resave_posts_nothing() {
    let h = Harness::new();
    let f = h.seed_order(OrderSeed::default()).await.unwrap();
    let tracking = &f.order.tracking_number;

    h.orders.update_status(tracking, OrderStatus::Delivered, None).await.unwrap();
    let again = h.orders.update_status(tracking, OrderStatus::Delivered, None).await.unwrap();

    assert!(again.transition.is_resave());
    assert!(again.posted.is_empty());
    assert_eq!(again.skipped.len(), 2);
    assert_eq!(h.ledger.entries_for_order(f.order.id).await.unwrap().len(), 2);
    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(15));
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(-10));

    // Re-saves do not notify again
    assert_eq!(h.notifier.sent_to(f.trader.id).len(), 1);
}

#[tokio::test]
async fn test_reopen_then_cancel_nets_to_cancellation() {
    let h = Harness::new();
    let seed = OrderSeed {
        extra_delivery_cost: dec!(5),
        ..OrderSeed::cod()
    };
    let f = h.seed_order(seed).await.unwrap();
    let tracking = &f.order.tracking_number;

    h.orders.update_status(tracking, OrderStatus::Delivered, None).await.unwrap();

    let reopened = h.orders.update_status(tracking, OrderStatus::InProgress, None).await.unwrap();
    assert!(reopened.transition.reopens());
    assert_eq!(reopened.reversed.len(), 4);
    assert!(reopened.posted.is_empty());
    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(0));
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(0));

    h.orders.update_status(tracking, OrderStatus::Cancelled, None).await.unwrap();

    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(-15));
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(-15));

    let entries = h.ledger.entries_for_order(f.order.id).await.unwrap();
    assert_eq!(entries.iter().filter(|e| e.is_active()).count(), 2);
    assert_eq!(entries.iter().filter(|e| e.kind == EntryKind::Reversal).count(), 4);

    assert!(h.ledger.verify_balance(f.trader.id).await.unwrap().is_consistent());
    assert!(h.ledger.verify_balance(f.driver.id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_postpone_charges_each_time() {
    let h = Harness::new();
    let f = h.seed_order(OrderSeed::default()).await.unwrap();
    let tracking = &f.order.tracking_number;

    let first = h.orders.update_status(tracking, OrderStatus::Postponed, None).await.unwrap();
    assert_eq!(first.order.postpone_count, 1);
    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(-15));

    h.orders.update_status(tracking, OrderStatus::Assigned, None).await.unwrap();
    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(0));

    let second = h.orders.update_status(tracking, OrderStatus::Postponed, None).await.unwrap();
    assert_eq!(second.order.postpone_count, 2);
    assert_eq!(second.posted.len(), 1);
    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(-15));
}

#[tokio::test]
async fn test_invalid_transition_changes_nothing() {
    let h = Harness::new();
    let seed = OrderSeed {
        with_driver: false,
        ..OrderSeed::default()
    };
    let f = h.seed_order(seed).await.unwrap();

    let err = h
        .orders
        .update_status(&f.order.tracking_number, OrderStatus::Delivered, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_transition");

    let order = h.orders.get(&f.order.tracking_number).await.unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(order.version, f.order.version);
    assert!(h.ledger.entries_for_order(f.order.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_assigned_requires_driver() {
    let h = Harness::new();
    let seed = OrderSeed {
        with_driver: false,
        ..OrderSeed::default()
    };
    let f = h.seed_order(seed).await.unwrap();

    let err = h
        .orders
        .update_status(&f.order.tracking_number, OrderStatus::Assigned, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "driver_required");
}

#[tokio::test]
async fn test_transition_events_are_recorded() {
    let h = Harness::new();
    let f = h.seed_order(OrderSeed::default()).await.unwrap();

    h.orders
        .update_status(&f.order.tracking_number, OrderStatus::Delivered, Some("office"))
        .await
        .unwrap();

    let history = h.orders.history(f.order.id).await.unwrap();
    let types: Vec<&str> = history.iter().map(|e| e.event_type()).collect();
    assert!(types.contains(&"order_created"));
    assert!(types.contains(&"status_changed"));
    assert_eq!(types.iter().filter(|t| **t == "entry_posted").count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_transitions_post_once() {
    let h = Arc::new(Harness::new());
    let f = h.seed_order(OrderSeed::cod()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        let tracking = f.order.tracking_number.clone();
        handles.push(tokio::spawn(async move {
            h.orders.update_status(&tracking, OrderStatus::Delivered, None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entries = h.ledger.entries_for_order(f.order.id).await.unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(-85));
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(105));
}

#[tokio::test]
async fn test_pricing_changes_do_not_reach_existing_orders() {
    let h = Harness::new();
    let f = h.seed_order(OrderSeed::default()).await.unwrap();

    h.pricing.set_delivery_cost(f.zone, money(dec!(50)).unwrap());
    h.pricing.set_trader_price(f.trader.id, f.zone, money(dec!(40)).unwrap());

    let report = h
        .orders
        .update_status(&f.order.tracking_number, OrderStatus::Delivered, None)
        .await
        .unwrap();

    assert_eq!(report.order.delivery_cost.as_decimal(), dec!(10));
    assert_eq!(report.order.trader_merchant_cost.as_decimal(), dec!(15));

    let trader_entry = report.posted.iter().find(|e| e.role == Some(Role::Trader)).unwrap();
    assert_eq!(trader_entry.direction, Direction::Withdraw);
    assert_eq!(trader_entry.amount.as_decimal(), dec!(15));
    let driver_entry = report.posted.iter().find(|e| e.role == Some(Role::Driver)).unwrap();
    assert_eq!(driver_entry.direction, Direction::Deposit);
    assert_eq!(driver_entry.amount.as_decimal(), dec!(10));

    assert_eq!(h.balance(f.trader.id).await.unwrap(), dec!(15));
    assert_eq!(h.balance(f.driver.id).await.unwrap(), dec!(-10));
}
