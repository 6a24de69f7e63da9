//! End-to-end properties of the model loop.

use std::path::Path;
use std::sync::Arc;

use disp_fit::domain::{
    AnalysisConfig, ExpType, Experiment, FieldKey, Observation, ParamKey, Selection, Site,
    SiteStore, Spectrum,
};
use disp_fit::fit::{AnalysisOutput, RayonQueue, SeedKind, SerialQueue, WorkQueue, run_analysis};
use disp_fit::io::{CheckpointStore, DirCheckpointStore, ModelCheckpoint};
use disp_fit::models::{BuiltinRates, ModelId, Param, RateFunction, SiteParams};

fn spectrum(id: &str, point: Option<f64>) -> Spectrum {
    Spectrum {
        id: id.to_string(),
        exp_type: Some(ExpType::CpmgSq),
        field: Some(600.0),
        point,
        reference: point.is_none(),
        offset: 0.0,
        relax_time: Some(0.04),
    }
}

fn experiment() -> Experiment {
    let mut spectra = vec![spectrum("ref", None)];
    for (i, nu) in [50.0, 100.0, 200.0, 400.0, 600.0, 1000.0].iter().enumerate() {
        spectra.push(spectrum(&format!("nu{i}"), Some(*nu)));
    }
    Experiment::new(spectra)
}

fn field() -> FieldKey {
    FieldKey::new(ExpType::CpmgSq, 600.0)
}

/// Rates back-calculated from `truth`, with a fixed per-point wobble.
fn synthetic_site(
    id: &str,
    model: ModelId,
    exp: &Experiment,
    truth: &[(Param, f64)],
    error: f64,
    wobble: f64,
) -> Site {
    let mut params = SiteParams::new(Default::default());
    for (p, v) in truth {
        params.set(*p, *v);
    }
    let mut site = Site::new(id);
    for (i, key) in exp.condition_keys().into_iter().enumerate() {
        let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
        let v = BuiltinRates.predict(model, &params, &key) + sign * wobble;
        site.rates.insert(key, Observation::new(v, error));
    }
    site
}

fn exchanging_store(exp: &Experiment) -> SiteStore {
    let lm63 = |kex: f64| [(Param::R2, 10.0), (Param::PhiEx, 0.8), (Param::Kex, kex)];
    let sites = vec![
        synthetic_site(":1@N", ModelId::Lm63, exp, &lm63(1200.0), 0.3, 0.05),
        synthetic_site(":2@N", ModelId::Lm63, exp, &lm63(1500.0), 0.3, 0.05),
        synthetic_site(":3@N", ModelId::Lm63, exp, &lm63(1500.0), 0.3, 0.04),
        synthetic_site(":4@N", ModelId::NoRex, exp, &[(Param::R2, 12.0)], 0.3, 0.1),
    ];
    let mut store = SiteStore::new(sites).unwrap();
    store
        .cluster("pair", &[":2@N".to_string(), ":3@N".to_string()])
        .unwrap();
    store
}

fn config(models: &[ModelId], dir: &Path) -> AnalysisConfig {
    AnalysisConfig {
        models: models.to_vec(),
        results_dir: dir.to_path_buf(),
        grid_inc: Some(5),
        mc_sim_num: 3,
        max_iterations: 20_000,
        ..AnalysisConfig::default()
    }
}

fn analyse(
    cfg: &AnalysisConfig,
    store: &SiteStore,
    exp: &Experiment,
    queue: &mut dyn WorkQueue,
) -> AnalysisOutput {
    run_analysis(
        cfg,
        store,
        Arc::new(exp.clone()),
        Arc::new(BuiltinRates),
        &DirCheckpointStore::new(&cfg.results_dir),
        queue,
    )
    .unwrap()
}

fn store_json(store: &SiteStore) -> String {
    serde_json::to_string(store).unwrap()
}

#[test]
fn resumed_run_reproduces_the_final_results() {
    let dir = tempfile::tempdir().unwrap();
    let exp = experiment();
    let store = exchanging_store(&exp);
    let cfg = config(&[ModelId::NoRex, ModelId::Lm63], dir.path());

    let first = analyse(&cfg, &store, &exp, &mut RayonQueue::new(Some(2)).unwrap());
    assert!(first.runs.iter().all(|r| !r.resumed));
    let cps = DirCheckpointStore::new(dir.path());
    assert!(cps.exists(ModelId::NoRex) && cps.exists(ModelId::Lm63));
    assert!(cps.final_path().is_file());

    let second = analyse(&cfg, &store, &exp, &mut SerialQueue::default());
    assert!(second.runs.iter().all(|r| r.resumed));

    let (a, b) = (first.selection.unwrap(), second.selection.unwrap());
    assert_eq!(a.winners(), b.winners());
    assert_eq!(a, b);
    assert_eq!(
        store_json(first.final_store.as_ref().unwrap()),
        store_json(second.final_store.as_ref().unwrap())
    );
    assert_eq!(cps.load_final().unwrap().selection, a);
}

#[test]
fn results_do_not_depend_on_the_queue() {
    let exp = experiment();
    let store = exchanging_store(&exp);
    let (d1, d2) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let models = [ModelId::NoRex, ModelId::Lm63];

    let serial = analyse(&config(&models, d1.path()), &store, &exp, &mut SerialQueue::default());
    let parallel = analyse(
        &config(&models, d2.path()),
        &store,
        &exp,
        &mut RayonQueue::new(None).unwrap(),
    );
    for model in models {
        let (s, p) = (serial.run(model).unwrap(), parallel.run(model).unwrap());
        assert_eq!(s.reports, p.reports);
        assert_eq!(store_json(&s.store), store_json(&p.store));
    }
    assert_eq!(serial.selection, parallel.selection);
}

#[test]
fn named_cluster_is_one_work_unit() {
    let dir = tempfile::tempdir().unwrap();
    let exp = experiment();
    let out = analyse(
        &config(&[ModelId::NoRex, ModelId::Lm63], dir.path()),
        &exchanging_store(&exp),
        &exp,
        &mut SerialQueue::default(),
    );
    let lm63 = out.run(ModelId::Lm63).unwrap();
    assert_eq!(lm63.reports.len(), 3);
    let pair = lm63.reports.iter().find(|r| r.cluster.as_str() == "pair").unwrap();
    assert_eq!(pair.sites, vec![":2@N".to_string(), ":3@N".to_string()]);

    // cluster-shared kex is identical on both members
    let kex = |id: &str| lm63.store.get(id).unwrap().value(&ParamKey::scalar(Param::Kex));
    assert_eq!(kex(":2@N"), kex(":3@N"));
    assert!(kex(":2@N").is_some());
}

#[test]
fn nesting_and_pre_run_skip_the_grid() {
    let exp = experiment();
    let store = exchanging_store(&exp);
    let models = [ModelId::Cr72, ModelId::Cr72Full];

    let first_dir = tempfile::tempdir().unwrap();
    let first = analyse(&config(&models, first_dir.path()), &store, &exp, &mut SerialQueue::default());
    for r in &first.run(ModelId::Cr72).unwrap().reports {
        assert_eq!(r.seed, Some(SeedKind::Grid), "{}", r.cluster);
        assert!(r.grid_points.is_some_and(|n| n > 0));
    }
    for r in &first.run(ModelId::Cr72Full).unwrap().reports {
        assert_eq!(r.seed, Some(SeedKind::Nested(ModelId::Cr72)), "{}", r.cluster);
        assert_eq!(r.grid_points, None);
    }

    let second_dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&models, second_dir.path());
    cfg.pre_run_dir = Some(first_dir.path().to_path_buf());
    let second = analyse(&cfg, &store, &exp, &mut SerialQueue::default());
    for run in &second.runs {
        for r in &run.reports {
            assert_eq!(r.seed, Some(SeedKind::PreRun), "{} {}", run.model, r.cluster);
            assert_eq!(r.grid_points, None);
        }
    }
}

#[test]
fn zero_noise_replicas_give_zero_errors() {
    let dir = tempfile::tempdir().unwrap();
    let exp = experiment();
    let truth = [(Param::R2, 11.0), (Param::PhiEx, 0.6), (Param::Kex, 2000.0)];
    let store = SiteStore::new(vec![
        synthetic_site("a", ModelId::Lm63, &exp, &truth, 0.0, 0.0),
        synthetic_site("b", ModelId::Lm63, &exp, &truth, 0.0, 0.2),
    ])
    .unwrap();
    let mut cfg = config(&[ModelId::Lm63], dir.path());
    cfg.mc_sim_num = 5;
    cfg.eliminate = false;

    let out = analyse(&cfg, &store, &exp, &mut SerialQueue::default());
    let run = out.run(ModelId::Lm63).unwrap();
    for site in run.store.site_iter(Selection::Selected) {
        assert_eq!(site.select_sim.len(), 5);
        assert!(site.errors.contains_key(&ParamKey::scalar(Param::Kex)));
        for (key, err) in &site.errors {
            assert_eq!(*err, 0.0, "{} {key:?}", site.id);
        }
    }
}

/// CR72 pre-run values reproducing the data exactly, so the fit stays put.
fn cr72_at(pa: f64, dir: &Path) -> (Experiment, SiteStore) {
    let exp = experiment();
    let truth = [(Param::R2, 10.0), (Param::PA, pa), (Param::Dw, 1.5), (Param::Kex, 1000.0)];
    let data = synthetic_site("s", ModelId::Cr72, &exp, &truth, 0.0, 0.0);

    let mut previous = data.clone();
    previous.set_value(ParamKey::field(Param::R2, field()), 10.0);
    previous.set_value(ParamKey::scalar(Param::PA), pa);
    previous.set_value(ParamKey::scalar(Param::Dw), 1.5);
    previous.set_value(ParamKey::scalar(Param::Kex), 1000.0);
    DirCheckpointStore::new(dir)
        .write(&ModelCheckpoint::new(
            ModelId::Cr72,
            SiteStore::new(vec![previous]).unwrap(),
            Vec::new(),
        ))
        .unwrap();
    (exp, SiteStore::new(vec![data]).unwrap())
}

fn elimination_run(pa: f64) -> AnalysisOutput {
    let (pre, dir) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let (exp, store) = cr72_at(pa, pre.path());
    let mut cfg = config(&[ModelId::NoRex, ModelId::Cr72], dir.path());
    cfg.pre_run_dir = Some(pre.path().to_path_buf());
    cfg.scaling = false;
    cfg.constraints = false;
    cfg.mc_sim_num = 0;
    analyse(&cfg, &store, &exp, &mut SerialQueue::default())
}

#[test]
fn population_outside_the_window_is_eliminated() {
    let out = elimination_run(0.40);
    let cr72 = out.run(ModelId::Cr72).unwrap();
    assert_eq!(cr72.reports[0].seed, Some(SeedKind::PreRun));
    let reason = cr72.reports[0].eliminated.clone().unwrap();
    assert!(reason.starts_with("pA of 0.40000"), "{reason}");
    // without a pre-run checkpoint, No Rex falls back to the grid
    assert_eq!(out.run(ModelId::NoRex).unwrap().reports[0].seed, Some(SeedKind::Grid));

    let choice = &out.selection.unwrap().clusters[0];
    assert_eq!(choice.winner, Some(ModelId::NoRex));
    assert!(choice.skipped.iter().any(|(m, _)| *m == ModelId::Cr72));
}

#[test]
fn population_inside_the_window_competes() {
    let out = elimination_run(0.75);
    let cr72 = out.run(ModelId::Cr72).unwrap();
    assert!(cr72.reports[0].eligible());
    let site = cr72.store.get("s").unwrap();
    assert_eq!(site.value(&ParamKey::scalar(Param::PA)), Some(0.75));
    assert_eq!(site.stats.chi2, 0.0);

    let choice = &out.selection.unwrap().clusters[0];
    assert_eq!(choice.candidates.len(), 2);
    assert_eq!(choice.winner, Some(ModelId::Cr72));
}
