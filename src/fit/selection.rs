//! Model selection by information criterion.
//!
//! For every cluster, each competing model that produced an eligible fit is
//! scored with AIC, AICc or BIC:
//!
//! - k = parameter vector length for the cluster
//! - n = observed data points summed over the cluster's sites
//! - chi2 = the cluster's chi-squared (shared by all of its sites)
//!
//! The lowest score wins; on a tie the model listed first in the run wins.
//! Clusters are decided independently of one another. Raw-rate derivation
//! never competes, and analytic models can be excluded while still being fit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{ClusterId, Criterion, FieldKey, ModelType, SiteStore};
use crate::fit::{ClusterReport, ParamLayout};
use crate::math::criterion_score;
use crate::models::ModelId;

/// One model's fitted results, as input to selection.
#[derive(Debug, Clone, Copy)]
pub struct ModelFit<'a> {
    pub model: ModelId,
    pub store: &'a SiteStore,
    pub reports: &'a [ClusterReport],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub model: ModelId,
    pub k: usize,
    pub n: usize,
    #[serde(with = "crate::domain::finite")]
    pub chi2: f64,
    #[serde(with = "crate::domain::finite")]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterChoice {
    pub cluster: ClusterId,
    pub sites: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub winner: Option<ModelId>,
    /// Models left out for this cluster and why.
    pub skipped: Vec<(ModelId, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub criterion: Criterion,
    pub clusters: Vec<ClusterChoice>,
}

impl SelectionSummary {
    /// Cluster → winning model.
    pub fn winners(&self) -> BTreeMap<ClusterId, ModelId> {
        self.clusters
            .iter()
            .filter_map(|c| c.winner.map(|w| (c.cluster.clone(), w)))
            .collect()
    }

    /// Distinct winning models, in registry order.
    pub fn winning_models(&self) -> BTreeSet<ModelId> {
        self.clusters.iter().filter_map(|c| c.winner).collect()
    }
}

/// Whether `model` takes part in selection.
pub fn competes(model: ModelId, numeric_only: bool) -> bool {
    ModelType::of(model).competes() && !(numeric_only && model.is_analytic())
}

fn candidate(
    fit: &ModelFit<'_>,
    report: &ClusterReport,
    fields: &[FieldKey],
    criterion: Criterion,
) -> Result<Candidate, String> {
    if let Some(f) = &report.failure {
        return Err(format!("failed: {f}"));
    }
    if let Some(e) = &report.eliminated {
        return Err(format!("eliminated: {e}"));
    }
    let sites: Vec<_> = report
        .sites
        .iter()
        .filter_map(|id| fit.store.get(id))
        .collect();
    let Some(first) = sites.first() else {
        return Err("no fitted sites".to_string());
    };
    let params = first.params.clone();
    let k = ParamLayout::new(fit.model, &params, sites.len(), fields, None).param_count();
    let n: usize = sites.iter().map(|s| s.data_points()).sum();
    let chi2 = first.stats.chi2;
    Ok(Candidate {
        model: fit.model,
        k,
        n,
        chi2,
        score: criterion_score(criterion, chi2, k, n),
    })
}

/// Pick the best model for every cluster seen in `fits`.
pub fn select_models(
    fits: &[ModelFit<'_>],
    fields: &[FieldKey],
    criterion: Criterion,
    numeric_only: bool,
) -> SelectionSummary {
    let competing: Vec<&ModelFit<'_>> = fits
        .iter()
        .filter(|f| competes(f.model, numeric_only))
        .collect();

    let mut clusters: BTreeMap<ClusterId, Vec<String>> = BTreeMap::new();
    for fit in &competing {
        for r in fit.reports {
            clusters
                .entry(r.cluster.clone())
                .or_insert_with(|| r.sites.clone());
        }
    }

    let choices = clusters
        .into_iter()
        .map(|(cluster, sites)| {
            let mut choice = ClusterChoice {
                cluster: cluster.clone(),
                sites,
                candidates: Vec::new(),
                winner: None,
                skipped: Vec::new(),
            };
            for fit in &competing {
                let Some(report) = fit.reports.iter().find(|r| r.cluster == cluster) else {
                    choice.skipped.push((fit.model, "not fitted".to_string()));
                    continue;
                };
                match candidate(fit, report, fields, criterion) {
                    Ok(c) => choice.candidates.push(c),
                    Err(reason) => choice.skipped.push((fit.model, reason)),
                }
            }
            let mut best: Option<&Candidate> = None;
            for c in &choice.candidates {
                if best.is_none_or(|b| c.score < b.score) {
                    best = Some(c);
                }
            }
            choice.winner = best.map(|c| c.model);
            choice
        })
        .collect();

    SelectionSummary {
        criterion,
        clusters: choices,
    }
}
