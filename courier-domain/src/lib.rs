//! Courier Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains entities, value objects, and the order status state machine.

#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod events;
pub mod status;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    Account, AccountId, CustomerId, EntryKind, LedgerEntry, LedgerEntryId, Order, OrderDraft,
    OrderId, RoleProfile, ZoneId,
};
pub use events::Event;
pub use status::{OrderStatus, Transition};
pub use value_objects::{Direction, DomainError, Money, PaymentMethod, Role, TrackingNumber};
