//! Parameter vector codec.
//!
//! A [`ParamLayout`] fixes the order of the flat optimisation vector for one
//! cluster and model:
//!
//! - per-site parameters, site by site, in registry order; per-field
//!   parameters are expanded over the sorted field list and per-condition
//!   parameters use the single condition being fitted
//! - then every cluster-shared parameter once, in registry order
//!
//! The same layout is used to assemble the vector, write it back, build the
//! diagonal scaling matrix, the linear constraints and the grid bounds, so all
//! of them agree on positions.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use crate::domain::{ConditionKey, FieldKey, ParamKey, Site, Slot};
use crate::math::LinearConstraints;
use crate::models::{Magnitudes, ModelId, Param, Scope, SiteParams};

/// One position of the parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Owning site (index into the cluster), `None` for cluster-shared values.
    pub site: Option<usize>,
    pub key: ParamKey,
}

#[derive(Debug, Clone)]
pub struct ParamLayout {
    pub model: ModelId,
    entries: Vec<Entry>,
    site_count: usize,
}

impl ParamLayout {
    /// Layout for `params` over `site_count` sites.
    ///
    /// `condition` must be given when `params` contains per-condition
    /// parameters (raw-rate derivation); it is ignored otherwise.
    pub fn new(
        model: ModelId,
        params: &[Param],
        site_count: usize,
        fields: &[FieldKey],
        condition: Option<ConditionKey>,
    ) -> Self {
        let mut entries = Vec::new();
        for site in 0..site_count {
            for &p in params {
                match p.scope() {
                    Scope::PerSite => entries.push(Entry {
                        site: Some(site),
                        key: ParamKey::scalar(p),
                    }),
                    Scope::PerField => {
                        for &fk in fields {
                            entries.push(Entry {
                                site: Some(site),
                                key: ParamKey::field(p, fk),
                            });
                        }
                    }
                    Scope::PerCondition => {
                        if let Some(ck) = condition {
                            entries.push(Entry {
                                site: Some(site),
                                key: ParamKey::condition(p, ck),
                            });
                        }
                    }
                    Scope::Cluster => {}
                }
            }
        }
        for &p in params {
            if p.scope() == Scope::Cluster {
                entries.push(Entry {
                    site: None,
                    key: ParamKey::scalar(p),
                });
            }
        }
        Self {
            model,
            entries,
            site_count,
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn param_count(&self) -> usize {
        self.entries.len()
    }

    pub fn site_count(&self) -> usize {
        self.site_count
    }

    /// Cluster-shared values are read from the first site.
    fn read(&self, entry: &Entry, sites: &[Site], sim: Option<usize>) -> f64 {
        let site = &sites[entry.site.unwrap_or(0)];
        let v = match sim {
            None => site.value(&entry.key),
            Some(j) => site.sim_value(&entry.key, j),
        };
        v.unwrap_or_else(|| entry.key.param.default_value())
    }

    /// Concatenate the current values (primary or simulation `sim`).
    ///
    /// Missing values take their registry default.
    pub fn assemble(&self, sites: &[Site], sim: Option<usize>) -> DVector<f64> {
        DVector::from_iterator(
            self.entries.len(),
            self.entries.iter().map(|e| self.read(e, sites, sim)),
        )
    }

    /// Write `x` back onto the sites (primary values or simulation `sim`).
    ///
    /// Cluster-shared values are written to every site.
    pub fn disassemble(&self, x: &DVector<f64>, sites: &mut [Site], sim: Option<usize>) {
        for (e, &v) in self.entries.iter().zip(x.iter()) {
            let targets: Vec<usize> = match e.site {
                Some(i) => vec![i],
                None => (0..sites.len()).collect(),
            };
            for i in targets {
                match sim {
                    None => sites[i].set_value(e.key, v),
                    Some(j) => sites[i].set_sim_value(e.key, j, v),
                }
            }
        }
    }

    /// Diagonal of the scaling matrix.
    pub fn scaling_vector(&self, mags: &[Magnitudes]) -> DVector<f64> {
        DVector::from_iterator(
            self.entries.len(),
            self.entries.iter().map(|e| {
                let mag = e.site.and_then(|i| mags.get(i)).copied().unwrap_or_default();
                e.key.param.scaling(&mag)
            }),
        )
    }

    /// Diagonal scaling matrix, or a 0×0 matrix when scaling is disabled.
    pub fn scaling_matrix(&self, mags: &[Magnitudes], enabled: bool) -> DMatrix<f64> {
        if !enabled {
            return DMatrix::zeros(0, 0);
        }
        DMatrix::from_diagonal(&self.scaling_vector(mags))
    }

    /// Physical bounds as `A·x ≥ b` in unscaled coordinates.
    ///
    /// Returns an empty set when no parameter carries a constraint.
    pub fn linear_constraints(&self) -> LinearConstraints {
        let n = self.entries.len();
        let pos = |p: Param| {
            self.entries
                .iter()
                .position(|e| e.site.is_none() && e.key.param == p)
        };
        let three_site = self.model.has_three_sites();

        let mut rows: Vec<(Vec<(usize, f64)>, f64)> = Vec::new();
        for (i, e) in self.entries.iter().enumerate() {
            match e.key.param {
                Param::R2eff | Param::I0 => rows.push((vec![(i, 1.0)], 0.0)),
                Param::R2 | Param::R2a | Param::R2b => {
                    rows.push((vec![(i, 1.0)], 0.0));
                    rows.push((vec![(i, -1.0)], -200.0));
                }
                Param::PA => {
                    if three_site {
                        rows.push((vec![(i, 1.0)], 0.0));
                    } else {
                        rows.push((vec![(i, 1.0)], 0.5));
                    }
                    rows.push((vec![(i, -1.0)], -1.0));
                }
                Param::PB => {
                    rows.push((vec![(i, 1.0)], 0.0));
                    if let Some(a) = pos(Param::PA) {
                        rows.push((vec![(a, -1.0), (i, -1.0)], -1.0));
                        rows.push((vec![(a, 1.0), (i, -1.0)], 0.0));
                    }
                }
                Param::PhiEx | Param::PhiExB | Param::PhiExC => {
                    rows.push((vec![(i, 1.0)], 0.0))
                }
                Param::Dw | Param::DwAB | Param::DwBC => rows.push((vec![(i, 1.0)], 0.0)),
                Param::DwH | Param::DwHAB | Param::DwHBC => {}
                Param::Kex
                | Param::KexAB
                | Param::KexBC
                | Param::KexAC
                | Param::KB
                | Param::KC => {
                    rows.push((vec![(i, 1.0)], 0.0));
                    rows.push((vec![(i, -1.0)], -1e6));
                }
                Param::Tex | Param::KAB => rows.push((vec![(i, 1.0)], 0.0)),
            }
        }
        if rows.is_empty() {
            return LinearConstraints::empty(n);
        }
        LinearConstraints::from_rows(n, &rows)
    }

    /// Grid-search bounds per position.
    ///
    /// `r20_override` collapses per-field R20 dimensions of a site onto a
    /// single value (minimum observed R2eff for that field).
    pub fn grid_bounds(
        &self,
        mags: &[Magnitudes],
        r20_override: &[BTreeMap<FieldKey, f64>],
    ) -> Vec<(f64, f64)> {
        self.entries
            .iter()
            .map(|e| {
                if let (Some(i), Slot::Field(fk)) = (e.site, e.key.slot) {
                    if e.key.param.is_r20() {
                        if let Some(&v) = r20_override.get(i).and_then(|m| m.get(&fk)) {
                            return (v, v);
                        }
                    }
                }
                let mag = e.site.and_then(|i| mags.get(i)).copied().unwrap_or_default();
                e.key.param.grid_bounds(&mag)
            })
            .collect()
    }

    /// Resolve the values seen by the rate function for site `site` at `key`.
    pub fn site_params(
        &self,
        x: &DVector<f64>,
        site: usize,
        key: &ConditionKey,
        base: SiteParams,
    ) -> SiteParams {
        let mut p = base;
        let fk = key.field_key();
        for (e, &v) in self.entries.iter().zip(x.iter()) {
            if e.site.is_some_and(|s| s != site) {
                continue;
            }
            let applies = match e.key.slot {
                Slot::Scalar => true,
                Slot::Field(f) => f == fk,
                Slot::Condition(c) => c == *key,
            };
            if applies {
                p.set(e.key.param, v);
            }
        }
        p
    }
}

/// Derived auxiliary values stored next to the fitted ones.
///
/// 2-site models without `pB` get `pB = 1 - pA`; models without `tex` get
/// `tex = 1/kex`, and `tex`-parameterised models get `kex = 1/tex`.
pub fn derived_values(model: ModelId, site: &Site, sim: Option<usize>) -> Vec<(ParamKey, f64)> {
    let params = model.model().params;
    let get = |p: Param| {
        let key = ParamKey::scalar(p);
        match sim {
            None => site.value(&key),
            Some(j) => site.sim_value(&key, j),
        }
    };
    let mut out = Vec::new();
    if params.contains(&Param::PA) && !params.contains(&Param::PB) {
        if let Some(pa) = get(Param::PA) {
            out.push((ParamKey::scalar(Param::PB), 1.0 - pa));
        }
    }
    if params.contains(&Param::Kex) && !params.contains(&Param::Tex) {
        if let Some(kex) = get(Param::Kex).filter(|k| *k > 0.0) {
            out.push((ParamKey::scalar(Param::Tex), 1.0 / kex));
        }
    }
    if params.contains(&Param::Tex) && !params.contains(&Param::Kex) {
        if let Some(tex) = get(Param::Tex).filter(|t| *t > 0.0) {
            out.push((ParamKey::scalar(Param::Kex), 1.0 / tex));
        }
    }
    out
}

/// Store derived values on the site (primary or simulation `sim`).
pub fn apply_derived(model: ModelId, site: &mut Site, sim: Option<usize>) {
    for (key, v) in derived_values(model, site, sim) {
        match sim {
            None => site.set_value(key, v),
            Some(j) => site.set_sim_value(key, j, v),
        }
    }
}

/// Parameters reported with errors: the model's own plus derived ones.
pub fn reported_params(model: ModelId) -> Vec<Param> {
    let params = model.model().params;
    let mut out = params.to_vec();
    if params.contains(&Param::PA) && !params.contains(&Param::PB) {
        out.push(Param::PB);
    }
    if params.contains(&Param::Kex) && !params.contains(&Param::Tex) {
        out.push(Param::Tex);
    }
    if params.contains(&Param::Tex) && !params.contains(&Param::Kex) {
        out.push(Param::Kex);
    }
    out
}
