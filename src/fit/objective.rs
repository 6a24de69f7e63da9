//! Chi-squared objectives.
//!
//! `chi2 = Σ ((observed - predicted) / error)²`. A non-positive error weights
//! its point by 1, so error-free synthetic data still has a well-defined
//! minimum of exactly zero.

use nalgebra::DVector;

use crate::domain::{ConditionKey, Site};
use crate::error::AppError;
use crate::fit::ParamLayout;
use crate::models::{ModelId, Param, RateFunction, SiteParams, exponential_decay};

/// Something the optimiser can minimise.
pub trait Objective: Sync {
    fn chi2(&self, x: &DVector<f64>) -> f64;
    fn data_points(&self) -> usize;
}

fn weight(error: f64) -> f64 {
    if error > 0.0 && error.is_finite() {
        1.0 / error
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Copy)]
struct RatePoint {
    site: usize,
    key: ConditionKey,
    observed: f64,
    weight: f64,
}

/// Dispersion curves of a cluster against a model's rate function.
pub struct DispersionObjective<'a> {
    layout: &'a ParamLayout,
    rates: &'a dyn RateFunction,
    model: ModelId,
    base: Vec<SiteParams>,
    points: Vec<RatePoint>,
}

impl<'a> DispersionObjective<'a> {
    /// Collect the observed rates of `sites` (primary data or simulation `sim`).
    pub fn new(
        layout: &'a ParamLayout,
        rates: &'a dyn RateFunction,
        sites: &[Site],
        sim: Option<usize>,
    ) -> Result<Self, AppError> {
        let mut points = Vec::new();
        for (i, site) in sites.iter().enumerate() {
            let before = points.len();
            for (key, obs) in &site.rates {
                let Some(observed) = obs.value_for(sim) else {
                    continue;
                };
                if !observed.is_finite() {
                    continue;
                }
                points.push(RatePoint {
                    site: i,
                    key: *key,
                    observed,
                    weight: weight(obs.error),
                });
            }
            if points.len() == before {
                return Err(AppError::NoData {
                    site: site.id.clone(),
                    model: layout.model.name().to_string(),
                });
            }
        }
        Ok(Self {
            layout,
            rates,
            model: layout.model,
            base: sites.iter().map(|s| SiteParams::new(s.isotope)).collect(),
            points,
        })
    }

    fn predict(&self, x: &DVector<f64>, site: usize, key: &ConditionKey) -> f64 {
        let p = self.layout.site_params(x, site, key, self.base[site]);
        self.rates.predict(self.model, &p, key)
    }

    /// Model values at every observed point: `(site index, key, value)`.
    pub fn back_calc(&self, x: &DVector<f64>) -> Vec<(usize, ConditionKey, f64)> {
        self.points
            .iter()
            .map(|pt| (pt.site, pt.key, self.predict(x, pt.site, &pt.key)))
            .collect()
    }
}

impl Objective for DispersionObjective<'_> {
    fn chi2(&self, x: &DVector<f64>) -> f64 {
        let mut sum = 0.0;
        for pt in &self.points {
            let pred = self.predict(x, pt.site, &pt.key);
            if !pred.is_finite() {
                return f64::INFINITY;
            }
            let r = (pt.observed - pred) * pt.weight;
            sum += r * r;
        }
        sum
    }

    fn data_points(&self) -> usize {
        self.points.len()
    }
}

/// One intensity of an exponential decay curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayPoint {
    pub time: f64,
    pub intensity: f64,
    pub error: f64,
}

/// Single-exponential decay `I0·exp(-R2eff·t)` over `[r2eff, i0]`.
pub struct DecayObjective {
    points: Vec<DecayPoint>,
    r2eff_at: usize,
    i0_at: usize,
}

impl DecayObjective {
    pub fn new(layout: &ParamLayout, points: Vec<DecayPoint>) -> Result<Self, AppError> {
        let find = |p: Param| {
            layout
                .entries()
                .iter()
                .position(|e| e.key.param == p)
                .ok_or_else(|| AppError::invalid(format!("Decay fit layout lacks '{p}'.")))
        };
        Ok(Self {
            points,
            r2eff_at: find(Param::R2eff)?,
            i0_at: find(Param::I0)?,
        })
    }
}

impl Objective for DecayObjective {
    fn chi2(&self, x: &DVector<f64>) -> f64 {
        let (r2eff, i0) = (x[self.r2eff_at], x[self.i0_at]);
        self.points
            .iter()
            .map(|p| {
                let r = (p.intensity - exponential_decay(i0, r2eff, p.time)) * weight(p.error);
                r * r
            })
            .sum()
    }

    fn data_points(&self) -> usize {
        self.points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurveType, ExpType, FieldKey, Observation};
    use crate::models::{BuiltinRates, Param};

    fn key(point: f64) -> ConditionKey {
        ConditionKey {
            exp_type: ExpType::CpmgSq,
            field: 600.0,
            offset: 0.0,
            point,
        }
    }

    #[test]
    fn no_rex_chi2_matches_hand_computation() {
        let model = ModelId::NoRex;
        let fields = [FieldKey::new(ExpType::CpmgSq, 600.0)];
        let layout = ParamLayout::new(model, model.model().params, 1, &fields, None);
        let mut site = Site::new("a");
        site.select_model(model, CurveType::FixedTime);
        site.rates.insert(key(100.0), Observation::new(12.0, 0.5));
        site.rates.insert(key(200.0), Observation::new(10.0, 0.0));

        let sites = [site];
        let obj = DispersionObjective::new(&layout, &BuiltinRates, &sites, None).unwrap();
        let x = DVector::from_vec(vec![11.0]);
        // ((12-11)/0.5)² + ((10-11)/1)²
        assert!((obj.chi2(&x) - 5.0).abs() < 1e-12);
        assert_eq!(obj.data_points(), 2);
    }

    #[test]
    fn site_without_rates_is_a_data_error() {
        let model = ModelId::NoRex;
        let layout = ParamLayout::new(model, model.model().params, 1, &[], None);
        let sites = [Site::new("empty")];
        assert!(matches!(
            DispersionObjective::new(&layout, &BuiltinRates, &sites, None),
            Err(AppError::NoData { .. })
        ));
    }

    #[test]
    fn decay_objective_is_zero_on_exact_curve() {
        let k = key(100.0);
        let layout = ParamLayout::new(ModelId::R2eff, &[Param::R2eff, Param::I0], 1, &[], Some(k));
        let points = [0.0, 0.02, 0.04]
            .iter()
            .map(|&t| DecayPoint {
                time: t,
                intensity: exponential_decay(1000.0, 20.0, t),
                error: 5.0,
            })
            .collect();
        let obj = DecayObjective::new(&layout, points).unwrap();
        assert_eq!(obj.chi2(&DVector::from_vec(vec![20.0, 1000.0])), 0.0);
        assert!(obj.chi2(&DVector::from_vec(vec![21.0, 1000.0])) > 0.0);
    }
}
