//! The model loop.
//!
//! [`run_analysis`] fits every requested model in order, then selects a model
//! per cluster and estimates the winners' errors:
//!
//! 1. setup checks (fatal before any work starts)
//! 2. per model: load its checkpoint if one exists, otherwise copy the base
//!    store, pick a seed source, dispatch one job per cluster, merge and
//!    write the checkpoint
//! 3. model selection across the competing models
//! 4. a final Monte Carlo pass on the winners, unless every model already
//!    had one
//!
//! Models are fitted strictly one after another; only clusters of the same
//! model run concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::checks::check_setup;
use crate::domain::{AnalysisConfig, ClusterId, CurveType, Experiment, RunState, Site, SiteStore};
use crate::error::AppError;
use crate::fit::{
    ClusterJob, ClusterReport, ModelFit, SeedSource, SelectionSummary, Stage, WorkQueue,
    deselect_insignificant, merge_outcomes, rates_from_r2eff, select_models,
};
use crate::io::{CheckpointStore, DirCheckpointStore, FinalCheckpoint, ModelCheckpoint};
use crate::models::{ModelId, NestingTable, RateFunction};

/// Analytic models worth fitting in a numeric-only run, as nesting sources.
const NESTING_SOURCES: [ModelId; 3] = [ModelId::Cr72, ModelId::MmqCr72, ModelId::Mp05];

/// Results of one model.
#[derive(Debug, Clone)]
pub struct ModelRun {
    pub model: ModelId,
    /// Loaded from an existing checkpoint instead of being fitted.
    pub resumed: bool,
    pub store: SiteStore,
    pub reports: Vec<ClusterReport>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub curve_type: CurveType,
    pub runs: Vec<ModelRun>,
    /// Absent when fewer than two models were requested.
    pub selection: Option<SelectionSummary>,
    /// Sites carrying their cluster's winning model.
    pub final_store: Option<SiteStore>,
    /// Reports of the final error pass.
    pub final_reports: Vec<ClusterReport>,
}

impl AnalysisOutput {
    pub fn run(&self, model: ModelId) -> Option<&ModelRun> {
        self.runs.iter().find(|r| r.model == model)
    }
}

/// Everything a model run needs besides its own store.
struct Context<'a> {
    config: Arc<AnalysisConfig>,
    experiment: Arc<Experiment>,
    rates: Arc<dyn RateFunction>,
    curve: CurveType,
    pre_run: Option<DirCheckpointStore>,
    table: &'a NestingTable,
}

/// Run the complete analysis over `base`.
pub fn run_analysis(
    config: &AnalysisConfig,
    base: &SiteStore,
    experiment: Arc<Experiment>,
    rates: Arc<dyn RateFunction>,
    checkpoints: &dyn CheckpointStore,
    queue: &mut dyn WorkQueue,
) -> Result<AnalysisOutput, AppError> {
    let curve = check_setup(config, &experiment, rates.as_ref())?;
    if config.numeric_only {
        for model in config.models.iter().filter(|m| m.is_analytic()) {
            if !NESTING_SOURCES.contains(model) {
                warn!(model = %model, "analytic model will be optimised but not used in a numeric-only analysis");
            }
        }
    }

    let ctx = Context {
        config: Arc::new(config.clone()),
        experiment,
        rates,
        curve,
        pre_run: config.pre_run_dir.as_ref().map(DirCheckpointStore::new),
        table: NestingTable::validated()?,
    };

    let mut runs: Vec<ModelRun> = Vec::new();
    for &model in &config.models {
        info!(model = %model, "starting model");
        let run = if checkpoints.exists(model) {
            info!(model = %model, "results already present, loading instead of optimising");
            let cp = checkpoints.load(model)?;
            ModelRun {
                model,
                resumed: true,
                store: cp.store,
                reports: cp.reports,
            }
        } else {
            let run = fit_model(&ctx, model, base, &runs, queue)?;
            checkpoints.write(&ModelCheckpoint::new(
                model,
                run.store.clone(),
                run.reports.clone(),
            ))?;
            run
        };
        log_reports(model, &run.reports);
        runs.push(run);
    }

    let mut output = AnalysisOutput {
        curve_type: curve,
        runs,
        selection: None,
        final_store: None,
        final_reports: Vec::new(),
    };
    if config.models.len() < 2 {
        warn!(
            models = config.models.len(),
            "model selection skipped, fewer than two models were optimised"
        );
        return Ok(output);
    }

    let fields = ctx.experiment.field_keys();
    let fits: Vec<ModelFit<'_>> = output
        .runs
        .iter()
        .map(|r| ModelFit {
            model: r.model,
            store: &r.store,
            reports: &r.reports,
        })
        .collect();
    let selection = select_models(&fits, &fields, config.modsel, config.numeric_only);
    for choice in &selection.clusters {
        match choice.winner {
            Some(w) => info!(cluster = %choice.cluster, winner = %w, "model selected"),
            None => warn!(cluster = %choice.cluster, "no eligible model for cluster"),
        }
    }

    let mut final_store = winners_store(base, &output.runs, &selection)?;
    if !config.mc_sim_all_models && config.mc_sim_num > 0 {
        output.final_reports = final_errors(&ctx, &mut final_store, &selection, queue)?;
    }
    checkpoints.write_final(&FinalCheckpoint::new(
        selection.clone(),
        final_store.clone(),
    ))?;
    output.selection = Some(selection);
    output.final_store = Some(final_store);
    Ok(output)
}

/// Monte Carlo simulations run during the model's own fit.
fn model_sims(config: &AnalysisConfig, model: ModelId) -> usize {
    if model == ModelId::R2eff || config.mc_sim_all_models || config.models.len() < 2 {
        config.sim_count(model)
    } else {
        0
    }
}

fn fit_model(
    ctx: &Context<'_>,
    model: ModelId,
    base: &SiteStore,
    earlier: &[ModelRun],
    queue: &mut dyn WorkQueue,
) -> Result<ModelRun, AppError> {
    let cfg = ctx.config.as_ref();
    let mut store = base.clone();
    let r2eff = earlier.iter().find(|r| r.model == ModelId::R2eff);
    for site in store.site_iter_mut() {
        site.select_model(model, ctx.curve);
        if model != ModelId::R2eff {
            if let Some(derived) = r2eff.and_then(|r| r.store.get(&site.id)) {
                rates_from_r2eff(site, derived);
            }
        }
    }

    if !matches!(model, ModelId::R2eff | ModelId::NoRex) {
        let dropped = deselect_insignificant(&mut store, cfg.insignificance);
        if !dropped.is_empty() {
            info!(model = %model, sites = ?dropped, "deselected insignificant sites");
        }
    }

    let sims = model_sims(cfg, model);
    let run = Arc::new(RunState::new(model, ctx.experiment.clone(), sims)?);
    let seed = seed_source(ctx, model, earlier)?;

    let units = store.cluster_iter();
    info!(model = %model, clusters = units.len(), sims, "dispatching clusters");
    for (cluster, sites) in units {
        let sites: Vec<Site> = sites.into_iter().cloned().collect();
        queue.enqueue(ClusterJob {
            seed: seed_for(&seed, &sites),
            cluster,
            sites,
            run: run.clone(),
            config: ctx.config.clone(),
            rates: ctx.rates.clone(),
            stage: Stage::Optimise { sims },
        });
    }
    let reports = merge_outcomes(&mut store, queue.collect())?;
    Ok(ModelRun {
        model,
        resumed: false,
        store,
        reports,
    })
}

/// Pick the seed source for `model`: pre-run, nesting, grid, then defaults.
fn seed_source(
    ctx: &Context<'_>,
    model: ModelId,
    earlier: &[ModelRun],
) -> Result<SeedSource, AppError> {
    if let Some(pre) = &ctx.pre_run {
        if pre.exists(model) {
            let cp = pre.load(model)?;
            info!(model = %model, dir = %pre.root().display(), "seeding from pre-run results");
            return Ok(SeedSource::PreRun(
                cp.store.site_iter(crate::domain::Selection::All).cloned().collect(),
            ));
        }
        warn!(model = %model, dir = %pre.root().display(), "no pre-run results for model");
    }

    let fitted: Vec<ModelId> = earlier.iter().map(|r| r.model).collect();
    if let Some(res) = ctx.table.resolve(model, &fitted) {
        if let Some(source) = earlier.iter().find(|r| r.model == res.source) {
            info!(model = %model, source = %res.source, relation = ?res.relation, "seeding from converged model");
            return Ok(SeedSource::Nested {
                source: res.source,
                relation: res.relation,
                sites: source
                    .store
                    .site_iter(crate::domain::Selection::All)
                    .cloned()
                    .collect(),
            });
        }
    }

    Ok(match ctx.config.grid_inc {
        Some(inc) => SeedSource::Grid { inc },
        None => SeedSource::Defaults,
    })
}

/// Narrow a seed source down to the sites of one job.
fn seed_for(seed: &SeedSource, sites: &[Site]) -> SeedSource {
    let keep = |previous: &[Site]| -> Vec<Site> {
        previous
            .iter()
            .filter(|p| sites.iter().any(|s| s.id == p.id))
            .cloned()
            .collect()
    };
    match seed {
        SeedSource::PreRun(previous) => SeedSource::PreRun(keep(previous)),
        SeedSource::Nested {
            source,
            relation,
            sites: previous,
        } => SeedSource::Nested {
            source: *source,
            relation: *relation,
            sites: keep(previous),
        },
        other => other.clone(),
    }
}

/// Base store with every selected cluster's sites taken from its winner.
///
/// Sites of clusters without a winner are deselected.
fn winners_store(
    base: &SiteStore,
    runs: &[ModelRun],
    selection: &SelectionSummary,
) -> Result<SiteStore, AppError> {
    let mut store = base.clone();
    let mut covered: Vec<&str> = Vec::new();
    for choice in &selection.clusters {
        let Some(run) = choice
            .winner
            .and_then(|w| runs.iter().find(|r| r.model == w))
        else {
            continue;
        };
        for id in &choice.sites {
            if let Some(site) = run.store.get(id) {
                store.replace(site.clone())?;
                covered.push(id.as_str());
            }
        }
    }
    for site in store.site_iter_mut() {
        if !covered.contains(&site.id.as_str()) {
            site.select = false;
        }
    }
    Ok(store)
}

/// Monte Carlo pass for the winning model of every cluster.
fn final_errors(
    ctx: &Context<'_>,
    store: &mut SiteStore,
    selection: &SelectionSummary,
    queue: &mut dyn WorkQueue,
) -> Result<Vec<ClusterReport>, AppError> {
    let sims = ctx.config.mc_sim_num;
    let mut states: BTreeMap<ModelId, Arc<RunState>> = BTreeMap::new();
    let winners: BTreeMap<ClusterId, ModelId> = selection.winners();
    info!(clusters = winners.len(), sims, "final error analysis");

    for choice in &selection.clusters {
        let Some(&model) = winners.get(&choice.cluster) else {
            continue;
        };
        let run = match states.get(&model) {
            Some(run) => run.clone(),
            None => {
                let run = Arc::new(RunState::new(model, ctx.experiment.clone(), sims)?);
                states.insert(model, run.clone());
                run
            }
        };
        let sites: Vec<Site> = choice
            .sites
            .iter()
            .filter_map(|id| store.get(id))
            .cloned()
            .collect();
        queue.enqueue(ClusterJob {
            cluster: choice.cluster.clone(),
            sites,
            run,
            config: ctx.config.clone(),
            rates: ctx.rates.clone(),
            seed: SeedSource::Defaults,
            stage: Stage::ErrorsOnly { sims },
        });
    }
    let reports = merge_outcomes(store, queue.collect())?;
    log_reports_final(&reports);
    Ok(reports)
}

fn log_reports(model: ModelId, reports: &[ClusterReport]) {
    for r in reports {
        if let Some(f) = &r.failure {
            warn!(model = %model, cluster = %r.cluster, "cluster failed: {f}");
        }
    }
    let eliminated = reports.iter().filter(|r| r.eliminated.is_some()).count();
    let failed = reports.iter().filter(|r| r.failure.is_some()).count();
    info!(
        model = %model,
        clusters = reports.len(),
        eliminated,
        failed,
        "model finished"
    );
}

fn log_reports_final(reports: &[ClusterReport]) {
    for r in reports {
        if let Some(f) = &r.failure {
            warn!(cluster = %r.cluster, "final error analysis failed: {f}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::tests::cpmg;
    use crate::domain::{ConditionKey, Observation, ParamKey};
    use crate::fit::{SeedKind, SerialQueue};
    use crate::models::{BuiltinRates, Param};

    fn experiment() -> Arc<Experiment> {
        Arc::new(Experiment::new(vec![
            cpmg("ref", 600.0, None, 0.04),
            cpmg("p1", 600.0, Some(100.0), 0.04),
            cpmg("p2", 600.0, Some(400.0), 0.04),
            cpmg("p3", 600.0, Some(900.0), 0.04),
        ]))
    }

    fn flat_store(exp: &Experiment) -> SiteStore {
        let keys: Vec<ConditionKey> = exp.condition_keys();
        let mut site = Site::new("a");
        for (k, v) in keys.iter().zip([12.0, 11.0, 10.0]) {
            site.rates.insert(*k, Observation::new(v, 0.5));
        }
        SiteStore::new(vec![site]).unwrap()
    }

    fn config(models: &[ModelId], dir: &std::path::Path) -> AnalysisConfig {
        AnalysisConfig {
            models: models.to_vec(),
            results_dir: dir.to_path_buf(),
            mc_sim_num: 0,
            grid_inc: Some(5),
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn nested_model_skips_the_grid() {
        let dir = tempfile::tempdir().unwrap();
        let exp = experiment();
        let cfg = config(&[ModelId::Cr72, ModelId::Cr72Full], dir.path());
        let out = run_analysis(
            &cfg,
            &flat_store(&exp),
            exp,
            Arc::new(BuiltinRates),
            &DirCheckpointStore::new(dir.path()),
            &mut SerialQueue::default(),
        )
        .unwrap();

        let cr72 = &out.run(ModelId::Cr72).unwrap().reports[0];
        assert_eq!(cr72.seed, Some(SeedKind::Grid));
        let full = &out.run(ModelId::Cr72Full).unwrap().reports[0];
        assert_eq!(full.seed, Some(SeedKind::Nested(ModelId::Cr72)));
        assert_eq!(full.grid_points, None);
        assert!(out.selection.is_some());
    }

    #[test]
    fn single_model_skips_selection() {
        let dir = tempfile::tempdir().unwrap();
        let exp = experiment();
        let cfg = config(&[ModelId::NoRex], dir.path());
        let cps = DirCheckpointStore::new(dir.path());
        let out = run_analysis(
            &cfg,
            &flat_store(&exp),
            exp,
            Arc::new(BuiltinRates),
            &cps,
            &mut SerialQueue::default(),
        )
        .unwrap();
        assert!(out.selection.is_none());
        assert!(cps.exists(ModelId::NoRex));
        assert!(!cps.final_path().exists());
        let site = out.runs[0].store.get("a").unwrap();
        assert!(site.values_of(Param::R2).next().is_some());
        assert!(site.value(&ParamKey::scalar(Param::Kex)).is_none());
    }

    #[test]
    fn setup_errors_stop_before_any_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut spectra = experiment().spectra.clone();
        spectra[1].field = None;
        let exp = Arc::new(Experiment::new(spectra));
        let cfg = config(&[ModelId::NoRex, ModelId::Lm63], dir.path());
        let cps = DirCheckpointStore::new(dir.path());
        let err = run_analysis(
            &cfg,
            &SiteStore::new(vec![Site::new("a")]).unwrap(),
            exp,
            Arc::new(BuiltinRates),
            &cps,
            &mut SerialQueue::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::MissingSpectrometerFrq { .. }));
        assert!(!cps.exists(ModelId::NoRex));
    }

    #[test]
    fn per_model_sims_follow_run_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&[ModelId::R2eff, ModelId::Cr72], dir.path());
        cfg.mc_sim_num = 7;
        assert_eq!(model_sims(&cfg, ModelId::R2eff), 7);
        assert_eq!(model_sims(&cfg, ModelId::Cr72), 0);
        cfg.mc_sim_all_models = true;
        assert_eq!(model_sims(&cfg, ModelId::Cr72), 7);
        cfg.models = vec![ModelId::Cr72];
        cfg.mc_sim_all_models = false;
        assert_eq!(model_sims(&cfg, ModelId::Cr72), 7);
    }
}
