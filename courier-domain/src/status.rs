//! Order status state machine
//!
//! ```text
//!   CREATED ──► ASSIGNED ──► IN_PROGRESS ──► DELIVERED
//!      │           │  ▲           │               │
//!      │           │  └───────────┼──(reopen)─────┤
//!      ▼           ▼              ▼               │
//!   CANCELLED ◄── POSTPONED ◄─────┘               │
//!      │                                          │
//!      └──────────(reopen)──► ASSIGNED / IN_PROGRESS
//! ```
//!
//! DELIVERED and CANCELLED are terminal for settlement purposes. Moving
//! an order out of DELIVERED, POSTPONED or CANCELLED back into an active
//! editable state (ASSIGNED, IN_PROGRESS) reopens it: every settlement
//! posting made for the order must be reversed first.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::value_objects::DomainError;

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order registered, no driver yet
    Created,
    /// Driver attached, waiting for pickup
    Assigned,
    /// Driver is on the way
    InProgress,
    /// Delivered to the customer
    Delivered,
    /// Cancelled by the office
    Cancelled,
    /// Delayed, pending rescheduling
    Postponed,
}

impl OrderStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Created,
        OrderStatus::Assigned,
        OrderStatus::InProgress,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Postponed,
    ];

    /// Canonical uppercase name
    pub fn name(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Assigned => "ASSIGNED",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Postponed => "POSTPONED",
        }
    }

    /// Statuses directly reachable from this one
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Created => &[Assigned, Cancelled],
            Assigned => &[InProgress, Delivered, Cancelled, Postponed],
            InProgress => &[Delivered, Cancelled, Postponed],
            Postponed => &[Assigned, InProgress, Cancelled],
            Delivered => &[Assigned, InProgress],
            Cancelled => &[Assigned, InProgress],
        }
    }

    /// Check if `next` is reachable (same status counts as a re-save)
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        *self == next || self.allowed_transitions().contains(&next)
    }

    /// DELIVERED and CANCELLED: no further settlement once reached
    pub fn is_settled(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// States an order is actively worked in
    pub fn is_active_editable(&self) -> bool {
        matches!(self, OrderStatus::Assigned | OrderStatus::InProgress)
    }

    /// States whose settlement postings must be reversed when left
    pub fn holds_settlement(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Postponed | OrderStatus::Cancelled
        )
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.name() == normalized)
            .ok_or_else(|| DomainError::InvalidValue(format!("order status {}", s)))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Transition
// =============================================================================

/// A validated status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Status before the change
    pub from: OrderStatus,
    /// Status after the change
    pub to: OrderStatus,
}

impl Transition {
    /// Validate a transition against the table
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTransition` if `to` is not reachable.
    pub fn validate(from: OrderStatus, to: OrderStatus) -> Result<Self, DomainError> {
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidTransition { from, to });
        }
        Ok(Self { from, to })
    }

    /// Saving the same status again
    pub fn is_resave(&self) -> bool {
        self.from == self.to
    }

    /// Leaving a settled/postponed state back into active work
    pub fn reopens(&self) -> bool {
        !self.is_resave() && self.from.holds_settlement() && self.to.is_active_editable()
    }

    /// Entering POSTPONED from another status
    pub fn enters_postponed(&self) -> bool {
        !self.is_resave() && self.to == OrderStatus::Postponed
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn test_forward_transitions() {
        assert!(Created.can_transition_to(Assigned));
        assert!(Created.can_transition_to(Cancelled));
        assert!(Assigned.can_transition_to(Delivered));
        assert!(InProgress.can_transition_to(Postponed));
        assert!(Postponed.can_transition_to(InProgress));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!Created.can_transition_to(Delivered));
        assert!(!Created.can_transition_to(InProgress));
        assert!(!Created.can_transition_to(Postponed));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Delivered));
        assert!(!Postponed.can_transition_to(Delivered));
    }

    #[test]
    fn test_validate_reports_both_ends() {
        let err = Transition::validate(Created, Delivered).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: Created,
                to: Delivered
            }
        );
    }

    #[test]
    fn test_resave_is_allowed_and_not_reopen() {
        let t = Transition::validate(Delivered, Delivered).unwrap();
        assert!(t.is_resave());
        assert!(!t.reopens());
    }

    #[test]
    fn test_reopen_detection() {
        assert!(Transition::validate(Delivered, InProgress).unwrap().reopens());
        assert!(Transition::validate(Cancelled, Assigned).unwrap().reopens());
        assert!(Transition::validate(Postponed, Assigned).unwrap().reopens());
        // Postponed -> Cancelled keeps the postponement charge
        assert!(!Transition::validate(Postponed, Cancelled).unwrap().reopens());
        assert!(!Transition::validate(Assigned, InProgress).unwrap().reopens());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("in_progress".parse::<OrderStatus>().unwrap(), InProgress);
        assert_eq!("IN-PROGRESS".parse::<OrderStatus>().unwrap(), InProgress);
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_status_serde_matches_name() {
        for status in OrderStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.name()));
        }
    }
}
