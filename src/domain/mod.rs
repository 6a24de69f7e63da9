//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - experiment metadata (`ExpType`, `ConditionKey`, `FieldKey`, `Experiment`)
//! - per-site state (`Site`, `ParamKey`, `FitStats`)
//! - the site & cluster store (`SiteStore`, `ClusterId`)
//! - per-model run state (`RunState`, `ModelType`)
//! - run policy (`AnalysisConfig`, `Criterion`)

pub mod config;
pub mod experiment;
pub mod finite;
pub mod pairs;
pub mod run;
pub mod site;
pub mod store;

pub use config::*;
pub use experiment::*;
pub use run::*;
pub use site::*;
pub use store::*;
