//! Dispersion model definitions.
//!
//! - parameter catalogue (`param`)
//! - static model registry (`registry`)
//! - nesting / equivalence table (`nesting`)
//! - rate functions behind the `RateFunction` seam (`rates`)

pub mod nesting;
pub mod param;
pub mod rates;
pub mod registry;

pub use nesting::*;
pub use param::*;
pub use rates::*;
pub use registry::*;
