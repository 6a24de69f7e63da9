//! Monte Carlo error estimation helpers.
//!
//! Replicas are built from the back-calculated (noise-free) model values plus
//! Gaussian noise scaled by each measurement's error. Errors are the sample
//! standard deviation over the selected simulations.
//!
//! Each cluster draws from its own RNG, seeded from the run seed, the model
//! and the cluster id, so replicas do not depend on scheduling order.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::domain::{ClusterId, ConditionKey, Experiment, Site};
use crate::error::AppError;
use crate::math::std_dev;
use crate::models::{ModelId, exponential_decay};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the run seed, the model name and the cluster id.
///
/// Fixed so replicas are identical across builds and platforms.
pub fn stream_seed(seed: u64, model: ModelId, cluster: &ClusterId) -> u64 {
    let bytes = seed
        .to_le_bytes()
        .into_iter()
        .chain(model.name().bytes())
        .chain([0u8])
        .chain(cluster.as_str().bytes());
    bytes.fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Deterministic RNG for one (model, cluster) pair.
pub fn cluster_rng(seed: u64, model: ModelId, cluster: &ClusterId) -> StdRng {
    StdRng::seed_from_u64(stream_seed(seed, model, cluster))
}

/// Standard normal sampler for replica noise.
pub fn unit_normal() -> Result<Normal<f64>, AppError> {
    Normal::new(0.0, 1.0).map_err(|e| AppError::invalid(format!("Noise distribution error: {e}")))
}

fn noisy(base: f64, error: f64, rng: &mut StdRng, normal: &Normal<f64>) -> f64 {
    let z = normal.sample(rng);
    if error > 0.0 && error.is_finite() {
        base + z * error
    } else {
        base
    }
}

/// Fill the rate replicas of `sites` from back-calculated values.
///
/// `back` holds `(site index, condition, value)` triples as produced by the
/// dispersion objective. Replicas are drawn simulation by simulation.
pub fn create_rate_sims(
    sites: &mut [Site],
    back: &[(usize, ConditionKey, f64)],
    n: usize,
    rng: &mut StdRng,
    normal: &Normal<f64>,
) {
    for site in sites.iter_mut() {
        for obs in site.rates.values_mut() {
            obs.sims = vec![f64::NAN; n];
        }
    }
    for j in 0..n {
        for (i, key, value) in back {
            if let Some(obs) = sites[*i].rates.get_mut(key) {
                obs.sims[j] = noisy(*value, obs.error, rng, normal);
            }
        }
    }
}

/// Fill the intensity replicas of one decay curve.
pub fn create_decay_sims(
    site: &mut Site,
    experiment: &Experiment,
    key: &ConditionKey,
    (r2eff, i0): (f64, f64),
    n: usize,
    rng: &mut StdRng,
    normal: &Normal<f64>,
) {
    let spectra: Vec<(String, f64)> = experiment
        .spectra_for(key)
        .filter_map(|s| s.relax_time.map(|t| (s.id.clone(), t)))
        .collect();
    for (id, _) in &spectra {
        if let Some(obs) = site.intensities.get_mut(id) {
            obs.sims = vec![f64::NAN; n];
        }
    }
    for j in 0..n {
        for (id, t) in &spectra {
            if let Some(obs) = site.intensities.get_mut(id) {
                let base = exponential_decay(i0, r2eff, *t);
                obs.sims[j] = noisy(base, obs.error, rng, normal);
            }
        }
    }
}

/// Replace the site's errors by the spread of its simulation values.
///
/// Unselected simulations are skipped but kept in the arrays.
pub fn error_analysis(site: &mut Site) {
    let errors: Vec<_> = site
        .sims
        .iter()
        .map(|(key, values)| (*key, std_dev(values, &site.select_sim)))
        .collect();
    for (key, err) in errors {
        site.errors.insert(key, err);
    }
}
