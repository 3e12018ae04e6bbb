//! Periodic verification of orders under monitoring.
//!
//! The scheduler owns the poll timer, serializes cycles and bounds the number
//! of verifier calls in flight.

pub mod scheduler;

pub use scheduler::{CycleReport, MonitorScheduler};
