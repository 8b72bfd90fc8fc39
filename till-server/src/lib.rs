//! Till server: order-staging and stock-reservation engine
//!
//! Stages in-progress orders (drafts) per operator, holds optimistic stock
//! reservations against a shared catalog, freezes confirmed orders into
//! table sessions with synchronously recomputed aggregates, and propagates
//! row-level changes to subscribed terminals.
//!
//! Entry point is [`engine::StagingEngine`]; everything else is a component
//! behind it. The catalog and user directory are external collaborators
//! injected as trait objects.

pub mod bus;
pub mod catalog;
pub mod config;
pub mod directory;
pub mod drafts;
pub mod engine;
pub mod error;
pub mod guard;
pub mod logger;
pub mod money;
pub mod sessions;
pub mod stock;
pub mod storage;
pub mod sweeper;

pub use catalog::{Catalog, MemoryCatalog};
pub use config::EngineConfig;
pub use directory::{MemoryDirectory, UserDirectory};
pub use engine::StagingEngine;
pub use error::{EngineError, EngineResult};
pub use logger::{init_logger, init_logger_with_file};
