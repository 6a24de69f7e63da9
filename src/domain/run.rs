//! Per-model run state.
//!
//! A `RunState` is built once per model and shared read-only (behind an `Arc`)
//! with every cluster job of that model. It is replaced, never mutated, when
//! the next model starts.

use std::sync::Arc;

use crate::domain::{CurveType, Experiment, FieldKey};
use crate::error::AppError;
use crate::models::{ModelId, Param};

/// What kind of analysis a model performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Derivation of R2eff/R1rho values from peak intensities.
    RawRate,
    /// Fit of an exchange model to the derived rates.
    Dispersion,
}

impl ModelType {
    pub fn of(model: ModelId) -> Self {
        if model == ModelId::R2eff {
            ModelType::RawRate
        } else {
            ModelType::Dispersion
        }
    }

    /// Whether fitted models of this type compete in model selection.
    pub fn competes(self) -> bool {
        self == ModelType::Dispersion
    }

    /// Fixed-time raw rates are calculated directly instead of optimised.
    pub fn calculates_only(self, curve: CurveType) -> bool {
        self == ModelType::RawRate && curve == CurveType::FixedTime
    }
}

#[derive(Debug, Clone)]
pub struct RunState {
    pub model_type: ModelType,
    pub model: ModelId,
    pub params: Vec<Param>,
    pub curve_type: CurveType,
    pub experiment: Arc<Experiment>,
    /// Sorted (experiment type, field) pairs of the experiment.
    pub fields: Vec<FieldKey>,
    pub sim_number: usize,
}

impl RunState {
    pub fn new(model: ModelId, experiment: Arc<Experiment>, sim_number: usize) -> Result<Self, AppError> {
        let curve_type = experiment.curve_type()?;
        let fields = experiment.field_keys();
        Ok(Self {
            model_type: ModelType::of(model),
            model,
            params: model.parameters_for(curve_type),
            curve_type,
            experiment,
            fields,
            sim_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::tests::cpmg;

    #[test]
    fn raw_rate_state_for_fixed_time_calculates_only() {
        let exp = Arc::new(Experiment::new(vec![
            cpmg("ref", 600.0, None, 0.04),
            cpmg("a", 600.0, Some(100.0), 0.04),
        ]));
        let run = RunState::new(ModelId::R2eff, exp, 0).unwrap();
        assert_eq!(run.model_type, ModelType::RawRate);
        assert!(run.model_type.calculates_only(run.curve_type));
        assert!(!run.model_type.competes());
        assert_eq!(run.params, vec![Param::R2eff]);
        assert_eq!(run.fields.len(), 1);
    }
}
