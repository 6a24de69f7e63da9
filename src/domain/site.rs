//! Per-site state: measurements, fitted values, errors and simulation arrays.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{ConditionKey, CurveType, FieldKey};
use crate::models::{Isotope, ModelId, Param};

/// A measured quantity with its error and optional Monte Carlo replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: f64,
    pub error: f64,
    /// Synthetic replicas, one per simulation (empty outside error analysis).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sims: Vec<f64>,
}

impl Observation {
    pub fn new(value: f64, error: f64) -> Self {
        Self {
            value,
            error,
            sims: Vec::new(),
        }
    }

    /// Value seen by the optimiser: the primary value or simulation `sim`.
    pub fn value_for(&self, sim: Option<usize>) -> Option<f64> {
        match sim {
            None => Some(self.value),
            Some(j) => self.sims.get(j).copied(),
        }
    }
}

/// Where a parameter value lives on a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    Scalar,
    Field(FieldKey),
    Condition(ConditionKey),
}

/// A parameter together with its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamKey {
    pub param: Param,
    pub slot: Slot,
}

impl ParamKey {
    pub fn scalar(param: Param) -> Self {
        Self {
            param,
            slot: Slot::Scalar,
        }
    }

    pub fn field(param: Param, key: FieldKey) -> Self {
        Self {
            param,
            slot: Slot::Field(key),
        }
    }

    pub fn condition(param: Param, key: ConditionKey) -> Self {
        Self {
            param,
            slot: Slot::Condition(key),
        }
    }
}

/// Optimisation diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitStats {
    #[serde(with = "crate::domain::finite")]
    pub chi2: f64,
    pub iter: usize,
    pub f_count: usize,
    pub g_count: usize,
    pub h_count: usize,
    #[serde(default)]
    pub warning: Option<String>,
}

impl FitStats {
    /// Add another fit's counts onto these; the latest warning wins.
    ///
    /// Absorbing into default stats is a plain copy.
    pub fn absorb(&mut self, other: &FitStats) {
        self.chi2 += other.chi2;
        self.iter += other.iter;
        self.f_count += other.f_count;
        self.g_count += other.g_count;
        self.h_count += other.h_count;
        if other.warning.is_some() {
            self.warning = other.warning.clone();
        }
    }
}

/// One observed resonance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub select: bool,
    #[serde(default)]
    pub isotope: Isotope,
    #[serde(default)]
    pub model: Option<ModelId>,
    #[serde(default)]
    pub params: Vec<Param>,

    #[serde(default, with = "crate::domain::pairs")]
    pub values: BTreeMap<ParamKey, f64>,
    #[serde(default, with = "crate::domain::pairs")]
    pub errors: BTreeMap<ParamKey, f64>,
    #[serde(default, with = "crate::domain::pairs")]
    pub sims: BTreeMap<ParamKey, Vec<f64>>,

    /// Peak intensities keyed by spectrum id.
    #[serde(default)]
    pub intensities: BTreeMap<String, Observation>,
    /// Observed R2eff / R1rho rates keyed by dispersion point.
    #[serde(default, with = "crate::domain::pairs")]
    pub rates: BTreeMap<ConditionKey, Observation>,

    #[serde(default)]
    pub stats: FitStats,
    #[serde(default)]
    pub stats_sim: Vec<FitStats>,
    #[serde(default)]
    pub select_sim: Vec<bool>,
}

impl Site {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            select: true,
            isotope: Isotope::default(),
            model: None,
            params: Vec::new(),
            values: BTreeMap::new(),
            errors: BTreeMap::new(),
            sims: BTreeMap::new(),
            intensities: BTreeMap::new(),
            rates: BTreeMap::new(),
            stats: FitStats::default(),
            stats_sim: Vec::new(),
            select_sim: Vec::new(),
        }
    }

    /// Switch the site to `model`, discarding all results of a previous model.
    pub fn select_model(&mut self, model: ModelId, curve: CurveType) {
        self.model = Some(model);
        self.params = model.parameters_for(curve);
        self.values.clear();
        self.errors.clear();
        self.sims.clear();
        self.stats = FitStats::default();
        self.stats_sim.clear();
        self.select_sim.clear();
        for obs in self.rates.values_mut() {
            obs.sims.clear();
        }
        for obs in self.intensities.values_mut() {
            obs.sims.clear();
        }
    }

    pub fn value(&self, key: &ParamKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn value_or_default(&self, key: &ParamKey) -> f64 {
        self.value(key).unwrap_or_else(|| key.param.default_value())
    }

    pub fn set_value(&mut self, key: ParamKey, value: f64) {
        self.values.insert(key, value);
    }

    /// Value of simulation `sim`, falling back to the primary value.
    pub fn sim_value(&self, key: &ParamKey, sim: usize) -> Option<f64> {
        self.sims
            .get(key)
            .and_then(|v| v.get(sim).copied())
            .or_else(|| self.value(key))
    }

    pub fn set_sim_value(&mut self, key: ParamKey, sim: usize, value: f64) {
        let entry = self.sims.entry(key).or_default();
        if entry.len() <= sim {
            entry.resize(sim + 1, f64::NAN);
        }
        entry[sim] = value;
    }

    /// Number of usable observed rates for the optimiser.
    pub fn data_points(&self) -> usize {
        self.rates
            .values()
            .filter(|o| o.value.is_finite())
            .count()
    }

    /// Prepare the simulation bookkeeping for `n` simulations.
    pub fn init_sims(&mut self, n: usize) {
        self.sims.clear();
        self.stats_sim = vec![FitStats::default(); n];
        self.select_sim = vec![true; n];
    }

    pub fn sim_selected(&self, sim: usize) -> bool {
        self.select_sim.get(sim).copied().unwrap_or(true)
    }

    pub fn has_param(&self, param: Param) -> bool {
        self.params.contains(&param)
    }

    /// All values stored for `param`, whatever their slot.
    pub fn values_of(&self, param: Param) -> impl Iterator<Item = (&ParamKey, &f64)> {
        self.values.iter().filter(move |(k, _)| k.param == param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExpType;

    #[test]
    fn select_model_resets_results_but_keeps_data() {
        let key = ConditionKey {
            exp_type: ExpType::CpmgSq,
            field: 600.0,
            offset: 0.0,
            point: 100.0,
        };
        let mut site = Site::new(":5@N");
        site.rates.insert(key, Observation::new(12.0, 0.3));
        site.set_value(ParamKey::scalar(Param::Kex), 1500.0);
        site.stats.chi2 = 4.2;

        site.select_model(ModelId::Cr72, CurveType::FixedTime);
        assert_eq!(site.model, Some(ModelId::Cr72));
        assert_eq!(site.params, vec![Param::R2, Param::PA, Param::Dw, Param::Kex]);
        assert!(site.values.is_empty());
        assert_eq!(site.stats.chi2, 0.0);
        assert_eq!(site.data_points(), 1);
    }

    #[test]
    fn sim_values_grow_on_demand() {
        let mut site = Site::new("a");
        let key = ParamKey::scalar(Param::PA);
        site.set_value(key, 0.9);
        site.set_sim_value(key, 2, 0.8);
        assert_eq!(site.sim_value(&key, 2), Some(0.8));
        assert!(site.sim_value(&key, 0).is_some_and(f64::is_nan));
        assert_eq!(site.sim_value(&ParamKey::scalar(Param::Kex), 0), None);
    }

    #[test]
    fn site_json_round_trip_keeps_struct_keys() {
        let mut site = Site::new("a");
        let fk = FieldKey::new(ExpType::CpmgSq, 600.0);
        site.set_value(ParamKey::field(Param::R2, fk), 11.5);
        let json = serde_json::to_string(&site).unwrap();
        let back: Site = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value(&ParamKey::field(Param::R2, fk)), Some(11.5));
    }
}
