//! Per-cluster optimisation pipeline.
//!
//! One [`ClusterJob`] covers one (model, cluster) pair and runs strictly in
//! sequence:
//!
//! 1. seed (pre-run copy, nesting copy, grid search or defaults)
//! 2. constrained simplex minimisation in scaled coordinates
//! 3. elimination of unphysical fits (optional)
//! 4. Monte Carlo error estimation (optional)
//!
//! A job owns a snapshot of its sites and hands them back in a
//! [`ClusterOutcome`]; it never sees another cluster's state. Errors inside a
//! job (e.g. a site without data) become a reported failure, never a panic.
//!
//! Raw-rate derivation runs through the same stages, one decay curve at a
//! time; fixed-time data is calculated directly.

use std::sync::Arc;

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{
    AnalysisConfig, ClusterId, FieldKey, FitStats, ModelType, ParamKey, RunState, Site,
};
use crate::error::AppError;
use crate::fit::{
    DecayObjective, DispersionObjective, Objective, ParamLayout, SeedKind, SeedSource,
    apply_derived, calc_two_point, cluster_elimination, cluster_rng, create_decay_sims,
    create_rate_sims, decay_conditions, decay_points, error_analysis, grid_seed, max_intensity,
    r20_overrides, seed_from_nesting, seed_from_pre_run, unit_normal,
};
use crate::math::{SimplexOptions, minimise};
use crate::models::{Magnitudes, ModelId, NestingTable, Param, RateFunction, Relation};

/// Which stages a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Seed, minimise, eliminate, then `sims` Monte Carlo simulations.
    Optimise { sims: usize },
    /// Monte Carlo only, around the values already on the sites.
    ErrorsOnly { sims: usize },
}

impl Stage {
    pub fn sims(self) -> usize {
        match self {
            Stage::Optimise { sims } | Stage::ErrorsOnly { sims } => sims,
        }
    }
}

/// One unit of work for the dispatch layer.
pub struct ClusterJob {
    pub cluster: ClusterId,
    pub sites: Vec<Site>,
    pub run: Arc<RunState>,
    pub config: Arc<AnalysisConfig>,
    pub rates: Arc<dyn RateFunction>,
    pub seed: SeedSource,
    pub stage: Stage,
}

/// What happened to one cluster, kept with the model's checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub cluster: ClusterId,
    pub sites: Vec<String>,
    pub seed: Option<SeedKind>,
    /// Feasible grid points evaluated, when the grid ran.
    pub grid_points: Option<u64>,
    #[serde(with = "crate::domain::finite")]
    pub chi2: f64,
    pub warning: Option<String>,
    pub eliminated: Option<String>,
    pub failure: Option<String>,
    /// Simulations flagged unselected by elimination.
    pub rejected_sims: usize,
}

impl ClusterReport {
    pub fn new(cluster: &ClusterId, sites: &[Site]) -> Self {
        Self {
            cluster: cluster.clone(),
            sites: sites.iter().map(|s| s.id.clone()).collect(),
            ..Self::default()
        }
    }

    /// Whether the cluster's fit may compete in model selection.
    pub fn eligible(&self) -> bool {
        self.eliminated.is_none() && self.failure.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub report: ClusterReport,
    /// Updated sites; empty when the job could not return them.
    pub sites: Vec<Site>,
}

impl ClusterOutcome {
    /// Outcome of a job that failed; its sites are returned unchanged.
    pub fn failed(cluster: &ClusterId, sites: Vec<Site>, message: String) -> Self {
        let mut report = ClusterReport::new(cluster, &sites);
        report.failure = Some(message);
        Self { report, sites }
    }
}

/// Run the pipeline for one cluster.
pub fn run_cluster(job: ClusterJob) -> ClusterOutcome {
    let mut sites = job.sites.clone();
    let mut report = ClusterReport::new(&job.cluster, &sites);

    let result = match job.run.model_type {
        ModelType::RawRate => raw_rates(&job, &mut sites, &mut report),
        ModelType::Dispersion => dispersion(&job, &mut sites, &mut report),
    };
    match result {
        Ok(()) => {
            debug!(
                cluster = %job.cluster,
                model = %job.run.model,
                chi2 = report.chi2,
                seed = ?report.seed,
                "cluster optimised"
            );
            ClusterOutcome { report, sites }
        }
        Err(e) => {
            let err = AppError::WorkerFailed {
                cluster: job.cluster.to_string(),
                message: e.to_string(),
            };
            warn!("{err}");
            ClusterOutcome::failed(&job.cluster, job.sites, err.to_string())
        }
    }
}

fn dispersion(job: &ClusterJob, sites: &mut [Site], report: &mut ClusterReport) -> Result<(), AppError> {
    let run = &job.run;
    let cfg = &job.config;
    let rates = job.rates.as_ref();
    let layout = ParamLayout::new(run.model, &run.params, sites.len(), &run.fields, None);
    let mags = vec![Magnitudes::default(); sites.len()];

    if let Stage::Optimise { .. } = job.stage {
        let objective = DispersionObjective::new(&layout, rates, sites, None)?;
        let r20 = if cfg.set_grid_r20 {
            r20_overrides(sites)
        } else {
            Vec::new()
        };
        let x0 = seed_start(job, &layout, sites, &objective, &mags, &r20, report)?;
        let stats = minimise_scaled(&objective, &layout, &x0, &mags, cfg, sites, None);
        report.chi2 = stats.chi2;
        report.warning = stats.warning.clone();

        if cfg.eliminate {
            if let Some(reason) = cluster_elimination(run.model, sites, None, &cfg.elimination) {
                warn!(cluster = %job.cluster, model = %run.model, "eliminated: {reason}");
                for site in sites.iter_mut() {
                    site.select = false;
                }
                report.eliminated = Some(reason);
                return Ok(());
            }
        }
    }

    let sims = job.stage.sims();
    if sims == 0 {
        return Ok(());
    }
    let (mut rng, normal) = (cluster_rng(cfg.seed, run.model, &job.cluster), unit_normal()?);
    let x_fit = layout.assemble(sites, None);
    let back = DispersionObjective::new(&layout, rates, sites, None)?.back_calc(&x_fit);
    for site in sites.iter_mut() {
        site.init_sims(sims);
    }
    create_rate_sims(sites, &back, sims, &mut rng, &normal);
    report.rejected_sims = simulate(&layout, sites, sims, &mags, cfg, run.model, |s, j| {
        DispersionObjective::new(&layout, rates, s, Some(j))
    })?;
    Ok(())
}

fn raw_rates(job: &ClusterJob, sites: &mut [Site], report: &mut ClusterReport) -> Result<(), AppError> {
    let run = &job.run;
    let cfg = &job.config;
    let experiment = run.experiment.as_ref();
    let no_data = |site: &Site| AppError::NoData {
        site: site.id.clone(),
        model: run.model.name().to_string(),
    };

    if run.model_type.calculates_only(run.curve_type) {
        for site in sites.iter_mut() {
            if calc_two_point(site, experiment) == 0 {
                return Err(no_data(site));
            }
        }
        return Ok(());
    }

    let sims = job.stage.sims();
    let (mut rng, normal): (StdRng, Normal<f64>) =
        (cluster_rng(cfg.seed, run.model, &job.cluster), unit_normal()?);

    for i in 0..sites.len() {
        let unit = std::slice::from_mut(&mut sites[i]);
        let conditions = decay_conditions(&unit[0], experiment);
        if conditions.is_empty() {
            return Err(no_data(&unit[0]));
        }
        let peak = max_intensity(&unit[0]);
        let mags = [if peak > 0.0 {
            Magnitudes { max_intensity: peak }
        } else {
            Magnitudes::default()
        }];
        if sims > 0 {
            unit[0].init_sims(sims);
        }

        for key in conditions {
            let layout = ParamLayout::new(run.model, &run.params, 1, &[], Some(key));
            let objective_for = |s: &[Site], sim: Option<usize>| {
                DecayObjective::new(&layout, decay_points(&s[0], experiment, &key, sim))
            };

            if let Stage::Optimise { .. } = job.stage {
                let objective = objective_for(unit, None)?;
                let x0 = seed_start(job, &layout, unit, &objective, &mags, &[], report)?;
                let stats = minimise_scaled(&objective, &layout, &x0, &mags, cfg, unit, None);
                report.chi2 += stats.chi2;
                if stats.warning.is_some() {
                    report.warning = stats.warning;
                }
            }

            if sims > 0 {
                let fitted = |p: Param| unit[0].value(&ParamKey::condition(p, key)).unwrap_or(p.default_value());
                let curve = (fitted(Param::R2eff), fitted(Param::I0));
                create_decay_sims(&mut unit[0], experiment, &key, curve, sims, &mut rng, &normal);
                report.rejected_sims += simulate(&layout, unit, sims, &mags, cfg, run.model, |s, j| {
                    objective_for(s, Some(j))
                })?;
            }
        }
    }
    Ok(())
}

/// Step 1: write the seed onto `sites` and return the starting vector.
fn seed_start(
    job: &ClusterJob,
    layout: &ParamLayout,
    sites: &mut [Site],
    objective: &dyn Objective,
    mags: &[Magnitudes],
    r20: &[std::collections::BTreeMap<FieldKey, f64>],
    report: &mut ClusterReport,
) -> Result<DVector<f64>, AppError> {
    let model = job.run.model;
    let kind = match &job.seed {
        SeedSource::PreRun(previous) => {
            seed_from_pre_run(layout, sites, previous);
            SeedKind::PreRun
        }
        SeedSource::Nested {
            source,
            relation,
            sites: previous,
        } => {
            let table = NestingTable::validated()?;
            seed_from_nesting(table, model, *source, sites, previous);
            match relation {
                Relation::Nested => SeedKind::Nested(*source),
                Relation::Equivalent => SeedKind::Equivalent(*source),
            }
        }
        SeedSource::Grid { inc } => {
            let cfg = &job.config;
            let constraints = cfg.constraints.then(|| layout.linear_constraints());
            let best = grid_seed(
                layout,
                objective,
                *inc,
                mags,
                r20,
                constraints.as_ref().filter(|c| !c.is_empty()),
                cfg.grid_max_points,
            )?;
            report.seed = Some(SeedKind::Grid);
            *report.grid_points.get_or_insert(0) += best.evaluated;
            layout.disassemble(&best.x, sites, None);
            return Ok(best.x);
        }
        SeedSource::Defaults => SeedKind::Defaults,
    };
    report.seed = Some(kind);
    Ok(layout.assemble(sites, None))
}

/// Step 2: minimise from `x0` and record the result on `sites`.
///
/// The optimiser works on `y = x / s`; constraints are rescaled to match and
/// an infeasible start is projected back into the feasible region first.
fn minimise_scaled(
    objective: &dyn Objective,
    layout: &ParamLayout,
    x0: &DVector<f64>,
    mags: &[Magnitudes],
    cfg: &AnalysisConfig,
    sites: &mut [Site],
    sim: Option<usize>,
) -> FitStats {
    let (x, stats) = optimise(objective, layout, x0, mags, cfg);
    layout.disassemble(&x, sites, sim);
    for site in sites.iter_mut() {
        match sim {
            None => site.stats.absorb(&stats),
            Some(j) => {
                if let Some(s) = site.stats_sim.get_mut(j) {
                    s.absorb(&stats);
                }
            }
        }
        apply_derived(layout.model, site, sim);
    }
    stats
}

fn optimise(
    objective: &dyn Objective,
    layout: &ParamLayout,
    x0: &DVector<f64>,
    mags: &[Magnitudes],
    cfg: &AnalysisConfig,
) -> (DVector<f64>, FitStats) {
    let n = layout.param_count();
    let s = layout.scaling_matrix(mags, cfg.scaling);
    let scale = if s.nrows() == n && n > 0 {
        s.diagonal()
    } else {
        DVector::from_element(n, 1.0)
    };

    let constraints = cfg
        .constraints
        .then(|| layout.linear_constraints().scaled(&scale))
        .filter(|c| !c.is_empty());
    let mut y0 = x0.component_div(&scale);
    if let Some(c) = &constraints {
        match c.repair(&y0) {
            Some(y) => y0 = y,
            None => {
                let stats = FitStats {
                    chi2: objective.chi2(x0),
                    warning: Some("Infeasible starting point.".to_string()),
                    ..FitStats::default()
                };
                return (x0.clone(), stats);
            }
        }
    }

    let opts = SimplexOptions {
        func_tol: cfg.func_tol,
        max_iterations: cfg.max_iterations,
        f_floor: Some(0.0),
        ..SimplexOptions::default()
    };
    let f = |y: &DVector<f64>| objective.chi2(&y.component_mul(&scale));
    let res = minimise(&f, &y0, constraints.as_ref(), &opts);
    let stats = FitStats {
        chi2: res.f,
        iter: res.iter,
        f_count: res.f_count,
        g_count: 0,
        h_count: 0,
        warning: res.warning,
    };
    (res.x.component_mul(&scale), stats)
}

/// Step 4: refit every replica from the fitted values.
///
/// Replicas failing elimination are flagged unselected on every site, keeping
/// the simulation arrays aligned. Returns the number of rejected replicas.
fn simulate<O, F>(
    layout: &ParamLayout,
    sites: &mut [Site],
    sims: usize,
    mags: &[Magnitudes],
    cfg: &AnalysisConfig,
    model: ModelId,
    objective_for: F,
) -> Result<usize, AppError>
where
    O: Objective,
    F: Fn(&[Site], usize) -> Result<O, AppError>,
{
    let x_fit = layout.assemble(sites, None);
    let mut rejected = 0;
    for j in 0..sims {
        let objective = objective_for(sites, j)?;
        minimise_scaled(&objective, layout, &x_fit, mags, cfg, sites, Some(j));
        if cfg.eliminate && cluster_elimination(model, sites, Some(j), &cfg.elimination).is_some() {
            for site in sites.iter_mut() {
                if let Some(flag) = site.select_sim.get_mut(j) {
                    *flag = false;
                }
            }
            rejected += 1;
        }
    }
    for site in sites.iter_mut() {
        error_analysis(site);
    }
    Ok(rejected)
}
