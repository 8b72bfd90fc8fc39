//! Domain models
//!
//! Serialized as JSON into the engine's redb tables; monetary fields are
//! `f64` at rest, all arithmetic happens in `rust_decimal` inside the engine.

mod draft;
mod operator;
mod order;
mod product;
mod session;

pub use draft::{AddonInput, DraftItem, DraftItemInput, DraftOrder, ItemAddon, ItemChanges};
pub use operator::{Operator, Role};
pub use order::{Order, OrderStatus};
pub use product::Product;
pub use session::{OrderSession, SessionStatus};
