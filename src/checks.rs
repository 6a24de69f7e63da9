//! Setup guards.
//!
//! Every check runs before any optimisation starts and fails with a typed
//! error naming the unmet precondition. [`check_setup`] runs the full set in
//! a fixed order and returns the run's curve type.

use crate::domain::{AnalysisConfig, CurveType, Experiment};
use crate::error::AppError;
use crate::models::{ModelId, RateFunction};

/// At least one spectrum must be described.
pub fn check_spectrum_ids(experiment: &Experiment) -> Result<(), AppError> {
    if experiment.spectra.is_empty() {
        return Err(AppError::invalid("No spectra have been defined."));
    }
    Ok(())
}

pub fn check_exp_type(experiment: &Experiment) -> Result<(), AppError> {
    match experiment.spectra.iter().find(|s| s.exp_type.is_none()) {
        Some(s) => Err(AppError::MissingExpType {
            spectrum: s.id.clone(),
        }),
        None => Ok(()),
    }
}

pub fn check_spectrometer_frq(experiment: &Experiment) -> Result<(), AppError> {
    match experiment.spectra.iter().find(|s| s.field.is_none()) {
        Some(s) => Err(AppError::MissingSpectrometerFrq {
            spectrum: s.id.clone(),
        }),
        None => Ok(()),
    }
}

/// Every non-reference spectrum needs its CPMG frequency or spin-lock field.
pub fn check_disp_points(experiment: &Experiment) -> Result<(), AppError> {
    match experiment
        .spectra
        .iter()
        .find(|s| !s.reference && s.point.is_none())
    {
        Some(s) => Err(AppError::MissingDispersionPoints {
            spectrum: s.id.clone(),
        }),
        None => Ok(()),
    }
}

/// Relaxation times are needed whenever raw rates are derived from intensities.
pub fn check_relax_times(experiment: &Experiment) -> Result<(), AppError> {
    match experiment.spectra.iter().find(|s| s.relax_time.is_none()) {
        Some(s) => Err(AppError::MissingRelaxTime {
            spectrum: s.id.clone(),
        }),
        None => Ok(()),
    }
}

pub fn check_model_selected(models: &[ModelId]) -> Result<(), AppError> {
    if models.is_empty() {
        return Err(AppError::MissingModel);
    }
    Ok(())
}

pub fn check_mixed_curve_types(experiment: &Experiment) -> Result<CurveType, AppError> {
    experiment.curve_type()
}

/// Every dispersion model of the run must have a rate function.
pub fn check_rate_functions(models: &[ModelId], rates: &dyn RateFunction) -> Result<(), AppError> {
    for &model in models {
        if model != ModelId::R2eff && !rates.supports(model) {
            return Err(AppError::RateFunctionUnavailable {
                model: model.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Every model must apply to every experiment type of the data.
pub fn check_model_experiments(models: &[ModelId], experiment: &Experiment) -> Result<(), AppError> {
    for &model in models {
        let family = model.family();
        if let Some(exp) = experiment.exp_types().into_iter().find(|e| !family.supports(*e)) {
            return Err(AppError::invalid(format!(
                "The '{model}' model cannot be applied to '{exp}' data."
            )));
        }
    }
    Ok(())
}

/// Run all checks for a run over `config.models`.
pub fn check_setup(
    config: &AnalysisConfig,
    experiment: &Experiment,
    rates: &dyn RateFunction,
) -> Result<CurveType, AppError> {
    config.validate()?;
    check_model_selected(&config.models)?;
    check_spectrum_ids(experiment)?;
    check_exp_type(experiment)?;
    check_spectrometer_frq(experiment)?;
    check_disp_points(experiment)?;
    if config.models.contains(&ModelId::R2eff) {
        check_relax_times(experiment)?;
    }
    let curve = check_mixed_curve_types(experiment)?;
    check_model_experiments(&config.models, experiment)?;
    check_rate_functions(&config.models, rates)?;
    Ok(curve)
}
