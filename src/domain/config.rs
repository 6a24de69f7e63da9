//! Run policy configuration.
//!
//! Defaults follow the conventions of the dispersion auto-analysis:
//! an 11-increment grid, 500 Monte Carlo simulations and AIC selection.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::ModelId;

/// Information criterion used for model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Criterion {
    #[serde(rename = "AIC")]
    #[value(name = "AIC")]
    Aic,
    #[serde(rename = "AICc")]
    #[value(name = "AICc")]
    Aicc,
    #[serde(rename = "BIC")]
    #[value(name = "BIC")]
    Bic,
}

impl Criterion {
    pub fn label(self) -> &'static str {
        match self {
            Criterion::Aic => "AIC",
            Criterion::Aicc => "AICc",
            Criterion::Bic => "BIC",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Criterion {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AIC" => Ok(Criterion::Aic),
            "AICc" => Ok(Criterion::Aicc),
            "BIC" => Ok(Criterion::Bic),
            _ => Err(AppError::UnsupportedCriterion {
                name: s.to_string(),
            }),
        }
    }
}

/// Admissible windows applied by fit elimination.
///
/// These encode scientific convention rather than structural requirements,
/// so they are configurable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EliminationLimits {
    pub pa_min: f64,
    pub pa_max: f64,
    /// Exchange-time ceiling in seconds (`tex = 1/kex`).
    pub tex_max: f64,
}

impl Default for EliminationLimits {
    fn default() -> Self {
        Self {
            pa_min: 0.501,
            pa_max: 0.999,
            tex_max: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Models to fit, in order.
    pub models: Vec<ModelId>,
    /// Grid increments per dimension; `None` disables the grid search.
    pub grid_inc: Option<usize>,
    /// Monte Carlo simulations for dispersion models.
    pub mc_sim_num: usize,
    /// Monte Carlo simulations for exponential-curve R2eff derivation.
    pub exp_mc_sim_num: Option<usize>,
    pub modsel: Criterion,
    /// Directory of a previous run used to seed optimisation.
    pub pre_run_dir: Option<PathBuf>,
    /// Deselect sites whose dispersion spread is below this level (0 disables).
    pub insignificance: f64,
    /// Exclude analytic models from the final selection.
    pub numeric_only: bool,
    /// Run Monte Carlo error analysis for every model, not just the winners.
    pub mc_sim_all_models: bool,
    pub eliminate: bool,
    pub elimination: EliminationLimits,
    /// Collapse the R20 grid dimensions onto the minimum observed R2eff.
    pub set_grid_r20: bool,
    pub results_dir: PathBuf,
    /// Worker threads; `None` uses every core.
    pub workers: Option<usize>,
    pub seed: u64,
    pub func_tol: f64,
    pub max_iterations: usize,
    pub scaling: bool,
    pub constraints: bool,
    /// Optional cap on grid points per cluster; larger grids are coarsened.
    pub grid_max_points: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            models: vec![ModelId::R2eff],
            grid_inc: Some(11),
            mc_sim_num: 500,
            exp_mc_sim_num: None,
            modsel: Criterion::Aic,
            pre_run_dir: None,
            insignificance: 0.0,
            numeric_only: false,
            mc_sim_all_models: false,
            eliminate: true,
            elimination: EliminationLimits::default(),
            set_grid_r20: false,
            results_dir: PathBuf::from("results"),
            workers: None,
            seed: 42,
            func_tol: 1e-25,
            max_iterations: 10_000_000,
            scaling: true,
            constraints: true,
            grid_max_points: None,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.models.is_empty() {
            return Err(AppError::MissingModel);
        }
        if let Some(inc) = self.grid_inc {
            if inc == 0 {
                return Err(AppError::invalid("Grid increments must be > 0."));
            }
        }
        if !(self.insignificance.is_finite() && self.insignificance >= 0.0) {
            return Err(AppError::invalid("The insignificance level must be >= 0."));
        }
        if !(self.func_tol.is_finite() && self.func_tol >= 0.0) {
            return Err(AppError::invalid("The function tolerance must be >= 0."));
        }
        if self.max_iterations == 0 {
            return Err(AppError::invalid("The maximum iteration count must be > 0."));
        }
        let lim = &self.elimination;
        if !(lim.pa_min <= lim.pa_max) {
            return Err(AppError::invalid("Invalid elimination population window."));
        }
        Ok(())
    }

    /// Monte Carlo simulation count for `model`.
    pub fn sim_count(&self, model: ModelId) -> usize {
        match (model, self.exp_mc_sim_num) {
            (ModelId::R2eff, Some(n)) => n,
            _ => self.mc_sim_num,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criterion_parsing() {
        assert_eq!("AICc".parse::<Criterion>().ok(), Some(Criterion::Aicc));
        assert!(matches!(
            "CV".parse::<Criterion>(),
            Err(AppError::UnsupportedCriterion { .. })
        ));
    }

    #[test]
    fn partial_config_json_uses_defaults() {
        let cfg: AnalysisConfig =
            serde_json::from_str(r#"{"models": ["R2eff", "CR72"], "modsel": "BIC"}"#).unwrap();
        assert_eq!(cfg.models, vec![ModelId::R2eff, ModelId::Cr72]);
        assert_eq!(cfg.modsel, Criterion::Bic);
        assert_eq!(cfg.grid_inc, Some(11));
        assert_eq!(cfg.elimination.pa_min, 0.501);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn exp_sim_count_only_applies_to_r2eff() {
        let cfg = AnalysisConfig {
            exp_mc_sim_num: Some(3),
            ..AnalysisConfig::default()
        };
        assert_eq!(cfg.sim_count(ModelId::R2eff), 3);
        assert_eq!(cfg.sim_count(ModelId::Cr72), 500);
    }

    #[test]
    fn empty_model_list_is_a_setup_error() {
        let cfg = AnalysisConfig {
            models: vec![],
            ..AnalysisConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(AppError::MissingModel)));
    }
}
