//! Shared types for the till order-staging engine
//!
//! Domain models, change-bus event types, and id/time utilities used by
//! both the engine and its consumers (terminals, station displays).

pub mod event;
pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use event::{BusEvent, ChangeKind, ChangePayload, Topic};
