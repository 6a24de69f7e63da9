//! Numerical building blocks: constraints, grid search, simplex minimiser and statistics.

pub mod constraints;
pub mod grid;
pub mod simplex;
pub mod stats;

pub use constraints::*;
pub use grid::*;
pub use simplex::*;
pub use stats::*;
