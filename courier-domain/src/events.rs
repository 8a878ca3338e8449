//! Domain Events for Courier
//!
//! Events are immutable records of committed state changes.
//! They are appended to the audit log in the same changeset as the
//! state they describe.

use crate::entities::{AccountId, LedgerEntryId, OrderId};
use crate::status::OrderStatus;
use crate::value_objects::{Direction, Money, Role, TrackingNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain events for the order and ledger lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Order registered
    OrderCreated {
        /// Order identifier
        order_id: OrderId,
        /// Generated tracking number
        tracking_number: TrackingNumber,
        /// Initial status (CREATED or ASSIGNED)
        status: OrderStatus,
        /// When the order was created
        timestamp: DateTime<Utc>,
    },

    /// Order moved between statuses (including re-saves)
    StatusChanged {
        /// Order identifier
        order_id: OrderId,
        /// Status before
        from: OrderStatus,
        /// Status after
        to: OrderStatus,
        /// Who requested the change
        actor: Option<String>,
        /// When the change was committed
        timestamp: DateTime<Utc>,
    },

    /// Driver attached to an order (office assignment or acceptance)
    DriverAssigned {
        /// Order identifier
        order_id: OrderId,
        /// Driver account
        driver: AccountId,
        /// When the assignment was committed
        timestamp: DateTime<Utc>,
    },

    /// Ledger entry written
    EntryPosted {
        /// Entry identifier
        entry_id: LedgerEntryId,
        /// Account the entry moves
        account_id: AccountId,
        /// Related order (none for manual entries)
        order_id: Option<OrderId>,
        /// Role on the order, if any
        role: Option<Role>,
        /// Movement direction
        direction: Direction,
        /// Amount moved
        amount: Money,
        /// When the entry was written
        timestamp: DateTime<Utc>,
    },

    /// Ledger entry rolled back with a compensating entry
    EntryReversed {
        /// Entry that was rolled back
        entry_id: LedgerEntryId,
        /// Compensating entry
        compensation_id: LedgerEntryId,
        /// Account the entry moved
        account_id: AccountId,
        /// When the reversal was committed
        timestamp: DateTime<Utc>,
    },

    /// Order soft-deleted
    OrderDeleted {
        /// Order identifier
        order_id: OrderId,
        /// When the order was deleted
        timestamp: DateTime<Utc>,
    },

    /// Account soft-deleted
    AccountDeleted {
        /// Account identifier
        account_id: AccountId,
        /// Orders the account was detached from
        detached_orders: Vec<OrderId>,
        /// When the account was deleted
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::OrderCreated { timestamp, .. }
            | Event::StatusChanged { timestamp, .. }
            | Event::DriverAssigned { timestamp, .. }
            | Event::EntryPosted { timestamp, .. }
            | Event::EntryReversed { timestamp, .. }
            | Event::OrderDeleted { timestamp, .. }
            | Event::AccountDeleted { timestamp, .. } => *timestamp,
        }
    }

    /// Order this event concerns, if any
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            Event::OrderCreated { order_id, .. }
            | Event::StatusChanged { order_id, .. }
            | Event::DriverAssigned { order_id, .. }
            | Event::OrderDeleted { order_id, .. } => Some(*order_id),
            Event::EntryPosted { order_id, .. } => *order_id,
            Event::EntryReversed { .. } | Event::AccountDeleted { .. } => None,
        }
    }

    /// Get the event type name (for logging and storage)
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::StatusChanged { .. } => "status_changed",
            Event::DriverAssigned { .. } => "driver_assigned",
            Event::EntryPosted { .. } => "entry_posted",
            Event::EntryReversed { .. } => "entry_reversed",
            Event::OrderDeleted { .. } => "order_deleted",
            Event::AccountDeleted { .. } => "account_deleted",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_event_json_format() {
        let event = Event::StatusChanged {
            order_id: Uuid::now_v7(),
            from: OrderStatus::Assigned,
            to: OrderStatus::Delivered,
            actor: Some("office".to_string()),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["from"], "ASSIGNED");
        assert_eq!(json["to"], "DELIVERED");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_accessors() {
        let order_id = Uuid::now_v7();
        let posted = Event::EntryPosted {
            entry_id: Uuid::now_v7(),
            account_id: Uuid::now_v7(),
            order_id: Some(order_id),
            role: Some(Role::Trader),
            direction: Direction::Withdraw,
            amount: Money::new(dec!(15)).unwrap(),
            timestamp: Utc::now(),
        };
        assert_eq!(posted.order_id(), Some(order_id));
        assert_eq!(posted.event_type(), "entry_posted");

        let deleted = Event::AccountDeleted {
            account_id: Uuid::now_v7(),
            detached_orders: vec![order_id],
            timestamp: Utc::now(),
        };
        assert_eq!(deleted.order_id(), None);
    }
}
