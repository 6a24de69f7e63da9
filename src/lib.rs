//! `disp-fit` library crate.
//!
//! The binary (`dispfit`) is a thin wrapper around this library so that:
//!
//! - the model loop is testable without spawning processes
//! - the rate-function and checkpoint seams can be swapped by callers
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod checks;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
