//! Model fitting orchestration.
//!
//! Responsibilities:
//!
//! - map a cluster's parameters to and from a flat vector (`codec`)
//! - chi-squared objectives over rates and decay curves (`objective`)
//! - seed, minimise, eliminate and simulate one cluster (`pipeline`)
//! - run cluster jobs on a worker pool and merge the results (`dispatch`)
//! - drive every requested model and pick a winner per cluster
//!   (`analysis`, `selection`)

pub mod analysis;
pub mod codec;
pub mod dispatch;
pub mod eliminate;
pub mod monte_carlo;
pub mod objective;
pub mod pipeline;
pub mod r2eff;
pub mod seed;
pub mod selection;

pub use analysis::*;
pub use codec::*;
pub use dispatch::*;
pub use eliminate::*;
pub use monte_carlo::*;
pub use objective::*;
pub use pipeline::*;
pub use r2eff::*;
pub use seed::*;
pub use selection::*;
