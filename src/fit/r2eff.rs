//! Raw-rate derivation from peak intensities.
//!
//! - fixed-time data: two-point calculation against the reference spectrum
//! - exponential data: decay points per dispersion condition, fitted by the
//!   optimisation pipeline
//!
//! Replicated spectra (same condition and time) are averaged: mean value,
//! error `sqrt(Σσ²)/n`.

use std::collections::BTreeMap;

use crate::domain::{ConditionKey, Experiment, Observation, ParamKey, Site};
use crate::fit::DecayPoint;
use crate::models::{Param, raw_rate_from_two_point};

/// Mean value and combined error of replicated intensities.
fn average(obs: &[&Observation], sim: Option<usize>) -> Option<(f64, f64)> {
    if obs.is_empty() {
        return None;
    }
    let n = obs.len() as f64;
    let mut sum = 0.0;
    let mut var = 0.0;
    for o in obs {
        sum += o.value_for(sim)?;
        var += o.error * o.error;
    }
    Some((sum / n, var.sqrt() / n))
}

/// Two-point R2eff/R1rho for every condition where the site has usable intensities.
///
/// Values and errors are stored as per-condition `r2eff` parameters. Returns
/// the number of conditions derived.
pub fn calc_two_point(site: &mut Site, experiment: &Experiment) -> usize {
    let mut derived = 0;
    for key in experiment.condition_keys() {
        let relaxed: Vec<&Observation> = experiment
            .spectra_for(&key)
            .filter_map(|s| site.intensities.get(&s.id))
            .collect();
        let refs: Vec<&Observation> = experiment
            .references_for(&key)
            .filter_map(|s| site.intensities.get(&s.id))
            .collect();
        let time = experiment.spectra_for(&key).find_map(|s| s.relax_time);

        let (Some((i, i_err)), Some((i_ref, i_ref_err)), Some(time)) =
            (average(&relaxed, None), average(&refs, None), time)
        else {
            continue;
        };
        let (value, error) = raw_rate_from_two_point(time, i_ref, i, i_ref_err, i_err);
        // non-positive intensities give no usable rate
        if !value.is_finite() {
            continue;
        }
        let pk = ParamKey::condition(Param::R2eff, key);
        site.set_value(pk, value);
        site.errors.insert(pk, error);
        derived += 1;
    }
    derived
}

/// Decay curve of `site` at `key`, one point per relaxation time.
pub fn decay_points(
    site: &Site,
    experiment: &Experiment,
    key: &ConditionKey,
    sim: Option<usize>,
) -> Vec<DecayPoint> {
    let mut by_time: BTreeMap<u64, (f64, Vec<&Observation>)> = BTreeMap::new();
    for s in experiment.spectra_for(key) {
        let (Some(t), Some(obs)) = (s.relax_time, site.intensities.get(&s.id)) else {
            continue;
        };
        by_time.entry(t.to_bits()).or_insert((t, Vec::new())).1.push(obs);
    }

    let mut points: Vec<DecayPoint> = by_time
        .into_values()
        .filter_map(|(time, obs)| {
            average(&obs, sim).map(|(intensity, error)| DecayPoint {
                time,
                intensity,
                error,
            })
        })
        .collect();
    points.sort_by(|a, b| a.time.total_cmp(&b.time));
    points
}

/// Conditions for which `site` has at least two decay times.
pub fn decay_conditions(site: &Site, experiment: &Experiment) -> Vec<ConditionKey> {
    experiment
        .condition_keys()
        .into_iter()
        .filter(|k| decay_points(site, experiment, k, None).len() >= 2)
        .collect()
}

/// Largest intensity recorded for the site (scales `i0`).
pub fn max_intensity(site: &Site) -> f64 {
    site.intensities
        .values()
        .map(|o| o.value)
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max)
}

/// Copy derived R2eff values and errors into the site's observed rates.
///
/// Conditions without a derived value are left out, so downstream models only
/// fit usable points.
pub fn rates_from_r2eff(target: &mut Site, r2eff_site: &Site) {
    target.rates.clear();
    for (key, &value) in r2eff_site.values_of(Param::R2eff) {
        let crate::domain::Slot::Condition(ck) = key.slot else {
            continue;
        };
        let error = r2eff_site.errors.get(key).copied().unwrap_or(0.0);
        target.rates.insert(ck, Observation::new(value, error));
    }
}
