//! State management for orders.
//!
//! Pure transition rules plus the persisted state machine that applies them
//! with compare-and-swap.

pub mod order;

pub use order::{advance, check, Check, OrderStateError, OrderStateMachine, Step};
