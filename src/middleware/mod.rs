//! Request-path middleware.
//!
//! The coordinator middleware fronts every root endpoint that starts a
//! multi-service transaction; the participant middleware fronts every
//! endpoint that can be called as a saga stage.

pub mod coordinator;
pub mod participant;

pub use coordinator::{tx_coordinator, CoordinatorSpec};
pub use participant::tx_participant;
