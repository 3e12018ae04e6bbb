//! Core fulfillment engine.
//!
//! Ties together the order state machine, credential issuer and monitoring
//! scheduler behind the [`FulfillmentEngine`] facade, and provides the
//! builder that assembles an engine from configuration.

pub mod builder;
pub mod clock;
pub mod credential;
pub mod engine;
pub mod monitoring;
pub mod state;

pub use builder::{BuilderError, FulfillmentBuilder, FulfillmentFactories};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::{CredentialError, CredentialIssuer};
pub use engine::{event_bus::EventBus, EngineError, FulfillmentEngine};
pub use monitoring::{CycleReport, MonitorScheduler};
pub use state::{OrderStateError, OrderStateMachine};
