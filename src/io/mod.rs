//! Input/output helpers.
//!
//! - dataset JSON ingest + validation (`dataset`)
//! - per-model and final result checkpoints (`checkpoint`)
//! - selection summary export to CSV (`export`)

pub mod checkpoint;
pub mod dataset;
pub mod export;

pub use checkpoint::*;
pub use dataset::*;
pub use export::*;
