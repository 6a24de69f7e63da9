//! Post-fit policy gates.
//!
//! - elimination: converged but unphysical parameter sets (population outside
//!   the admissible window, exchange time above the ceiling) make a cluster
//!   ineligible for model selection, or deselect a single simulation
//! - insignificance: sites whose dispersion curves are flat are deselected
//!   before any exchange model is optimised
//!
//! Neither gate raises; both are soft policy results.

use std::collections::BTreeMap;

use crate::domain::{EliminationLimits, FieldKey, ParamKey, Site, SiteStore};
use crate::models::{ModelId, Param};

fn lookup(site: &Site, param: Param, sim: Option<usize>) -> Option<f64> {
    let key = ParamKey::scalar(param);
    match sim {
        None => site.value(&key),
        Some(j) => site.sim_value(&key, j),
    }
}

/// Reason the fit of `site` (or its simulation `sim`) is unphysical.
///
/// Only parameters the model optimises are checked; the `tex` derived from
/// `kex` is reporting output and never eliminates a fit.
pub fn elimination_reason(
    model: ModelId,
    site: &Site,
    sim: Option<usize>,
    limits: &EliminationLimits,
) -> Option<String> {
    let params = model.model().params;
    if params.contains(&Param::PA) {
        if let Some(pa) = lookup(site, Param::PA, sim) {
            if pa < limits.pa_min {
                return Some(format!("pA of {pa:.5} is less than {:.5}", limits.pa_min));
            }
            if pa > limits.pa_max {
                return Some(format!("pA of {pa:.5} is greater than {:.5}", limits.pa_max));
            }
        }
    }
    if params.contains(&Param::Tex) {
        if let Some(tex) = lookup(site, Param::Tex, sim) {
            if tex > limits.tex_max {
                return Some(format!("tex of {tex:.5} is greater than {:.5}", limits.tex_max));
            }
        }
    }
    None
}

/// First elimination reason over the cluster's sites.
pub fn cluster_elimination(
    model: ModelId,
    sites: &[Site],
    sim: Option<usize>,
    limits: &EliminationLimits,
) -> Option<String> {
    sites
        .iter()
        .find_map(|s| elimination_reason(model, s, sim, limits))
}

/// Largest spread of observed rates within any single dispersion curve.
///
/// A curve is one (experiment type, field, offset) combination.
pub fn max_curve_spread(site: &Site) -> f64 {
    let mut curves: BTreeMap<(FieldKey, u64), (f64, f64)> = BTreeMap::new();
    for (key, obs) in &site.rates {
        if !obs.value.is_finite() {
            continue;
        }
        let id = (key.field_key(), key.offset.to_bits());
        let e = curves.entry(id).or_insert((obs.value, obs.value));
        e.0 = e.0.min(obs.value);
        e.1 = e.1.max(obs.value);
    }
    curves
        .values()
        .map(|(lo, hi)| hi - lo)
        .fold(0.0, f64::max)
}

/// Deselect every selected site whose curves all vary by less than `level`.
///
/// A level of zero disables the check. Returns the deselected site ids.
pub fn deselect_insignificant(store: &mut SiteStore, level: f64) -> Vec<String> {
    if level <= 0.0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for site in store.site_iter_mut() {
        if site.select && max_curve_spread(site) < level {
            site.select = false;
            out.push(site.id.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConditionKey, ExpType, Observation};

    fn site_with_pa(pa: f64) -> Site {
        let mut s = Site::new("a");
        s.set_value(ParamKey::scalar(Param::PA), pa);
        s.set_value(ParamKey::scalar(Param::Tex), 1e-3);
        s
    }

    #[test]
    fn low_population_is_eliminated() {
        let lim = EliminationLimits::default();
        assert!(elimination_reason(ModelId::Cr72, &site_with_pa(0.40), None, &lim).is_some());
        assert!(elimination_reason(ModelId::Cr72, &site_with_pa(0.75), None, &lim).is_none());
        assert!(elimination_reason(ModelId::Cr72, &site_with_pa(0.9995), None, &lim).is_some());
    }

    #[test]
    fn slow_exchange_is_eliminated() {
        let lim = EliminationLimits::default();
        let mut s = site_with_pa(0.8);
        s.set_value(ParamKey::scalar(Param::Tex), 2.0);
        assert!(elimination_reason(ModelId::It99, &s, None, &lim)
            .is_some_and(|r| r.starts_with("tex")));
    }

    #[test]
    fn derived_exchange_time_is_not_checked() {
        let lim = EliminationLimits::default();
        let mut cr72 = site_with_pa(0.9);
        cr72.set_value(ParamKey::scalar(Param::Kex), 0.8);
        cr72.set_value(ParamKey::scalar(Param::Tex), 1.25);
        assert_eq!(elimination_reason(ModelId::Cr72, &cr72, None, &lim), None);

        let mut lm63 = Site::new("b");
        lm63.set_value(ParamKey::scalar(Param::Kex), 0.5);
        lm63.set_value(ParamKey::scalar(Param::Tex), 2.0);
        assert_eq!(elimination_reason(ModelId::Lm63, &lm63, None, &lim), None);
    }

    #[test]
    fn population_is_only_checked_when_fitted() {
        let lim = EliminationLimits::default();
        // LM63 has no pA; a stray value left on the site is ignored
        assert_eq!(elimination_reason(ModelId::Lm63, &site_with_pa(0.2), None, &lim), None);
    }

    #[test]
    fn thresholds_are_overridable() {
        let lim = EliminationLimits {
            pa_min: 0.3,
            ..EliminationLimits::default()
        };
        assert!(elimination_reason(ModelId::Cr72, &site_with_pa(0.40), None, &lim).is_none());
    }

    #[test]
    fn simulations_are_checked_on_their_own_values() {
        let lim = EliminationLimits::default();
        let mut s = site_with_pa(0.8);
        s.set_sim_value(ParamKey::scalar(Param::PA), 1, 0.2);
        assert!(elimination_reason(ModelId::Cr72, &s, Some(0), &lim).is_none());
        assert!(elimination_reason(ModelId::Cr72, &s, Some(1), &lim).is_some());
    }

    #[test]
    fn flat_sites_are_deselected() {
        let key = |field: f64, point: f64| ConditionKey {
            exp_type: ExpType::CpmgSq,
            field,
            offset: 0.0,
            point,
        };
        let mut flat = Site::new("flat");
        flat.rates.insert(key(600.0, 100.0), Observation::new(10.0, 0.1));
        flat.rates.insert(key(600.0, 500.0), Observation::new(10.5, 0.1));
        flat.rates.insert(key(800.0, 100.0), Observation::new(20.0, 0.1));
        let mut steep = Site::new("steep");
        steep.rates.insert(key(600.0, 100.0), Observation::new(20.0, 0.1));
        steep.rates.insert(key(600.0, 500.0), Observation::new(12.0, 0.1));

        let mut store = SiteStore::new(vec![flat, steep]).unwrap();
        assert!(deselect_insignificant(&mut store, 0.0).is_empty());
        assert_eq!(deselect_insignificant(&mut store, 1.0), vec!["flat".to_string()]);
        assert!(!store.get("flat").unwrap().select);
        assert!(store.get("steep").unwrap().select);
    }
}
