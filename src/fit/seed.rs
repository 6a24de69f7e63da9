//! Starting points for the local minimiser.
//!
//! In order of precedence:
//!
//! 1. pre-run results (a previous analysis of the same model)
//! 2. a nested or equivalent model already fitted in this run
//! 3. a grid search over the parameter bounds
//! 4. registry defaults, only when the grid is disabled
//!
//! The first two bypass the grid entirely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{FieldKey, Site};
use crate::error::AppError;
use crate::fit::{Objective, ParamLayout};
use crate::math::{GridResult, LinearConstraints, axis, grid_search, point_count};
use crate::models::{Magnitudes, ModelId, NestingTable, Relation};

/// How a cluster's starting point was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedKind {
    PreRun,
    Nested(ModelId),
    Equivalent(ModelId),
    Grid,
    Defaults,
}

impl SeedKind {
    pub fn skips_grid(self) -> bool {
        !matches!(self, SeedKind::Grid)
    }
}

/// Seed data handed to a cluster job.
#[derive(Debug, Clone)]
pub enum SeedSource {
    /// Previous-run sites, matched by id.
    PreRun(Vec<Site>),
    /// Converged sites of `source`, matched by id.
    Nested {
        source: ModelId,
        relation: Relation,
        sites: Vec<Site>,
    },
    Grid { inc: usize },
    Defaults,
}

/// Copy previous-run values onto `sites`.
///
/// Per-site and per-field values are copied directly; cluster-shared values
/// are averaged over the previous sites that carry them, since the previous
/// run may have grouped the sites differently.
pub fn seed_from_pre_run(layout: &ParamLayout, sites: &mut [Site], previous: &[Site]) {
    let find = |id: &str| previous.iter().find(|p| p.id == id);
    let matched: Vec<&Site> = sites.iter().filter_map(|s| find(&s.id)).collect();

    for e in layout.entries() {
        match e.site {
            Some(i) => {
                if let Some(v) = find(&sites[i].id).and_then(|p| p.value(&e.key)) {
                    sites[i].set_value(e.key, v);
                }
            }
            None => {
                let values: Vec<f64> = matched.iter().filter_map(|p| p.value(&e.key)).collect();
                if values.is_empty() {
                    continue;
                }
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                for site in sites.iter_mut() {
                    site.set_value(e.key, mean);
                }
            }
        }
    }
}

/// Copy a nested model's converged values onto the selected `sites`.
///
/// Returns the number of values written.
pub fn seed_from_nesting(
    table: &NestingTable,
    model: ModelId,
    source: ModelId,
    sites: &mut [Site],
    previous: &[Site],
) -> usize {
    let mut written = 0;
    for site in sites.iter_mut().filter(|s| s.select) {
        if let Some(prev) = previous.iter().find(|p| p.id == site.id) {
            written += table.copy_parameters(model, source, site, prev);
        }
    }
    written
}

/// Minimum observed rate per (site, field): the collapsed R20 grid value.
pub fn r20_overrides(sites: &[Site]) -> Vec<BTreeMap<FieldKey, f64>> {
    sites
        .iter()
        .map(|site| {
            let mut out: BTreeMap<FieldKey, f64> = BTreeMap::new();
            for (key, obs) in &site.rates {
                if !obs.value.is_finite() {
                    continue;
                }
                let e = out.entry(key.field_key()).or_insert(obs.value);
                *e = e.min(obs.value);
            }
            out
        })
        .collect()
}

/// Grid search over the layout's bounds with `inc` points per dimension.
///
/// Points violating `constraints` are skipped. With a `max_points` cap, a
/// grid that would exceed it is coarsened one increment at a time until it
/// fits, so the cluster is still seeded.
pub fn grid_seed(
    layout: &ParamLayout,
    objective: &dyn Objective,
    inc: usize,
    mags: &[Magnitudes],
    r20: &[BTreeMap<FieldKey, f64>],
    constraints: Option<&LinearConstraints>,
    max_points: Option<u64>,
) -> Result<GridResult, AppError> {
    let bounds = layout.grid_bounds(mags, r20);
    let axes_for = |inc: usize| -> Vec<Vec<f64>> {
        bounds.iter().map(|&(lo, hi)| axis(lo, hi, inc)).collect()
    };
    let mut used = inc;
    let mut axes = axes_for(used);
    if let Some(limit) = max_points {
        while used > 1 && point_count(&axes) > u128::from(limit) {
            used -= 1;
            axes = axes_for(used);
        }
        if used < inc {
            warn!(
                model = %layout.model,
                requested = inc,
                used,
                limit,
                "grid over the point limit, coarsened increments"
            );
        }
    }
    grid_search(
        layout.model.name(),
        &axes,
        |x| objective.chi2(x),
        |x| constraints.is_none_or(|c| c.is_satisfied(x)),
        max_points.unwrap_or(u64::MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConditionKey, CurveType, ExpType, Observation, ParamKey};
    use crate::fit::DispersionObjective;
    use crate::models::{BuiltinRates, Param};

    fn field() -> FieldKey {
        FieldKey::new(ExpType::CpmgSq, 600.0)
    }

    fn site(id: &str, model: ModelId) -> Site {
        let mut s = Site::new(id);
        s.select_model(model, CurveType::FixedTime);
        s
    }

    #[test]
    fn pre_run_averages_shared_values() {
        let model = ModelId::Cr72;
        let layout = ParamLayout::new(model, model.model().params, 2, &[field()], None);
        let mut prev_a = site("a", model);
        prev_a.set_value(ParamKey::scalar(Param::Kex), 1000.0);
        prev_a.set_value(ParamKey::scalar(Param::Dw), 1.5);
        let mut prev_b = site("b", model);
        prev_b.set_value(ParamKey::scalar(Param::Kex), 3000.0);

        let mut sites = vec![site("a", model), site("b", model)];
        seed_from_pre_run(&layout, &mut sites, &[prev_a, prev_b]);
        assert_eq!(sites[0].value(&ParamKey::scalar(Param::Dw)), Some(1.5));
        assert_eq!(sites[1].value(&ParamKey::scalar(Param::Dw)), None);
        for s in &sites {
            assert_eq!(s.value(&ParamKey::scalar(Param::Kex)), Some(2000.0));
        }
    }

    #[test]
    fn nesting_copies_to_selected_sites_only() {
        let table = NestingTable::validated().unwrap();
        let mut prev = site("a", ModelId::Cr72);
        prev.set_value(ParamKey::field(Param::R2, field()), 12.0);
        prev.set_value(ParamKey::scalar(Param::Kex), 800.0);
        let mut prev_b = prev.clone();
        prev_b.id = "b".into();

        let mut sites = vec![site("a", ModelId::Cr72Full), site("b", ModelId::Cr72Full)];
        sites[1].select = false;
        let n = seed_from_nesting(table, ModelId::Cr72Full, ModelId::Cr72, &mut sites, &[prev, prev_b]);
        assert_eq!(n, 3);
        assert_eq!(sites[0].value(&ParamKey::scalar(Param::Kex)), Some(800.0));
        assert_eq!(sites[0].value(&ParamKey::field(Param::R2a, field())), Some(12.0));
        assert_eq!(sites[0].value(&ParamKey::field(Param::R2b, field())), Some(12.0));
        assert_eq!(sites[0].value(&ParamKey::scalar(Param::PA)), None);
        assert!(sites[1].values.is_empty());
    }

    #[test]
    fn r20_override_is_minimum_per_field() {
        let k = |field: f64, point: f64| ConditionKey {
            exp_type: ExpType::CpmgSq,
            field,
            offset: 0.0,
            point,
        };
        let mut s = Site::new("a");
        s.rates.insert(k(600.0, 100.0), Observation::new(14.0, 0.1));
        s.rates.insert(k(600.0, 900.0), Observation::new(11.0, 0.1));
        s.rates.insert(k(800.0, 100.0), Observation::new(17.0, 0.1));
        let r = r20_overrides(&[s]);
        assert_eq!(r[0][&field()], 11.0);
        assert_eq!(r[0][&FieldKey::new(ExpType::CpmgSq, 800.0)], 17.0);
    }

    #[test]
    fn grid_finds_no_rex_level() {
        let model = ModelId::NoRex;
        let layout = ParamLayout::new(model, model.model().params, 1, &[field()], None);
        let mut s = site("a", model);
        for point in [100.0, 200.0] {
            let key = ConditionKey {
                exp_type: ExpType::CpmgSq,
                field: 600.0,
                offset: 0.0,
                point,
            };
            s.rates.insert(key, Observation::new(15.0, 1.0));
        }
        let sites = [s];
        let obj = DispersionObjective::new(&layout, &BuiltinRates, &sites, None).unwrap();
        // r2 bounds (5, 30) with 6 points: 5, 10, 15, ...
        let best = grid_seed(&layout, &obj, 6, &[Magnitudes::default()], &[], None, Some(1000)).unwrap();
        assert_eq!(best.x[0], 15.0);
        assert_eq!(best.f, 0.0);
    }

    #[test]
    fn oversized_grid_is_coarsened_not_refused() {
        let model = ModelId::Cr72;
        let fields = [field(), FieldKey::new(ExpType::CpmgSq, 800.0)];
        let layout = ParamLayout::new(model, model.model().params, 2, &fields, None);
        let mut sites = vec![site("a", model), site("b", model)];
        for s in &mut sites {
            for fk in &fields {
                for point in [50.0, 400.0, 1000.0] {
                    let key = ConditionKey {
                        exp_type: fk.exp_type,
                        field: fk.field,
                        offset: 0.0,
                        point,
                    };
                    s.rates.insert(key, Observation::new(15.0, 1.0));
                }
            }
        }
        let obj = DispersionObjective::new(&layout, &BuiltinRates, &sites, None).unwrap();
        let mags = [Magnitudes::default(), Magnitudes::default()];
        // r2 for 2 sites x 2 fields, dw per site, shared pA and kex: 11^8 points uncapped
        let best = grid_seed(&layout, &obj, 11, &mags, &[], None, Some(5_000)).unwrap();
        assert!(best.evaluated > 0 && best.evaluated <= 5_000, "{}", best.evaluated);
        assert!(best.f.is_finite());
    }
}
