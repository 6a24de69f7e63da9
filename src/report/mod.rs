//! Reporting utilities: run summaries, selection tables and fitted values.

pub mod format;

pub use format::*;
