//! Shared domain types for the quoroom engine.
//!
//! Everything in this crate is plain data: the persisted entity model, the
//! status enums with their wire/database spellings, the shared error type,
//! the engine configuration, and the quiet-hours window. No I/O lives here.

pub mod config;
pub mod error;
pub mod model;
pub mod quiet;

pub use config::EngineConfig;
pub use error::{Error, ErrorKind, Result};
pub use quiet::QuietHours;
