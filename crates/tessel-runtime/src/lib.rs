//! Tessel Runtime
//!
//! Reference CPU executor for compiled task graphs: region storage with
//! layout-described columns, parallel per-key launches with collected
//! effects, operator-tagged reductions, and insert/delete with
//! defragmentation.

pub mod error;
pub mod executor;
pub mod operators;
pub mod storage;
pub mod types;

pub use error::{Error, Result};
pub use executor::Machine;
pub use storage::Region;
pub use types::Value;
