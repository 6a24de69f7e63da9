//! Formatted terminal output.
//!
//! Formatting lives in one place so the fitting code stays free of printing
//! and output changes stay localized.

use crate::domain::{AnalysisConfig, ParamKey, Selection, SiteStore, Slot};
use crate::fit::{AnalysisOutput, ClusterReport, SelectionSummary, reported_params};

/// Format the full run summary: per-model outcomes, selection and winners.
pub fn format_run_summary(output: &AnalysisOutput, config: &AnalysisConfig) -> String {
    let mut out = String::new();

    out.push_str("=== dispfit - relaxation dispersion auto-analysis ===\n");
    out.push_str(&format!("Curve type: {:?}\n", output.curve_type));
    out.push_str(&format!(
        "Models: {}\n",
        config
            .models
            .iter()
            .map(|m| m.name())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    out.push_str(&format!(
        "Grid: {} | MC sims: {} | selection: {}\n",
        config
            .grid_inc
            .map(|i| format!("{i} increments"))
            .unwrap_or_else(|| "disabled".to_string()),
        config.mc_sim_num,
        config.modsel,
    ));

    out.push_str("\nModel runs:\n");
    for run in &output.runs {
        let eliminated = run.reports.iter().filter(|r| r.eliminated.is_some()).count();
        let failed = run.reports.iter().filter(|r| r.failure.is_some()).count();
        out.push_str(&format!(
            "- {:<26} clusters={} eliminated={} failed={}{}\n",
            run.model.name(),
            run.reports.len(),
            eliminated,
            failed,
            if run.resumed { " (loaded)" } else { "" }
        ));
        out.push_str(&format_problems(&run.reports));
    }

    match &output.selection {
        Some(selection) => out.push_str(&format_selection(selection)),
        None => out.push_str("\nModel selection skipped (fewer than two models).\n"),
    }

    if !output.final_reports.is_empty() {
        let failed = output
            .final_reports
            .iter()
            .filter(|r| r.failure.is_some())
            .count();
        out.push_str(&format!(
            "\nFinal error analysis: clusters={} failed={failed}\n",
            output.final_reports.len()
        ));
        out.push_str(&format_problems(&output.final_reports));
    }

    out
}

fn format_problems(reports: &[ClusterReport]) -> String {
    let mut out = String::new();
    for r in reports {
        if let Some(reason) = &r.eliminated {
            out.push_str(&format!("    {} eliminated: {reason}\n", r.cluster));
        }
        if let Some(f) = &r.failure {
            out.push_str(&format!("    {} failed: {f}\n", r.cluster));
        }
    }
    out
}

/// Per-cluster criterion table; the winner is starred.
pub fn format_selection(selection: &SelectionSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("\nModel selection ({}):\n", selection.criterion));
    for choice in &selection.clusters {
        out.push_str(&format!(
            "{} [{}]\n",
            choice.cluster,
            truncate(&choice.sites.join(", "), 60)
        ));
        for c in &choice.candidates {
            let chosen = if choice.winner == Some(c.model) { "*" } else { " " };
            out.push_str(&format!(
                "  {chosen} {:<26} k={:<3} n={:<4} chi2={:.4} {}={:.4}\n",
                c.model.name(),
                c.k,
                c.n,
                c.chi2,
                selection.criterion,
                c.score
            ));
        }
        for (model, reason) in &choice.skipped {
            out.push_str(&format!("    (skipped {}) {reason}\n", model.name()));
        }
        if choice.winner.is_none() {
            out.push_str("    no eligible model\n");
        }
    }
    out
}

/// Fitted values and errors of every selected site.
pub fn format_site_values(store: &SiteStore) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<16} {:<26} {:<28} {:>14} {:>14}\n",
        "site", "model", "parameter", "value", "error"
    ));
    out.push_str(&format!(
        "{:-<16} {:-<26} {:-<28} {:->14} {:->14}\n",
        "", "", "", "", ""
    ));
    for site in store.site_iter(Selection::Selected) {
        let Some(model) = site.model else {
            continue;
        };
        let params = reported_params(model);
        for (key, value) in site.values.iter().filter(|(k, _)| params.contains(&k.param)) {
            let Some(label) = key_label(key) else {
                continue;
            };
            let error = site
                .errors
                .get(key)
                .map(|e| format!("{e:.6}"))
                .unwrap_or_default();
            out.push_str(
                format!(
                    "{:<16} {:<26} {:<28} {:>14.6} {:>14}\n",
                    truncate(&site.id, 16),
                    model.name(),
                    label,
                    value,
                    error
                )
                .trim_end(),
            );
            out.push('\n');
        }
    }
    out
}

/// Per-condition values are too many to list.
fn key_label(key: &ParamKey) -> Option<String> {
    match key.slot {
        Slot::Scalar => Some(key.param.name().to_string()),
        Slot::Field(fk) => Some(format!("{}[{fk}]", key.param.name())),
        Slot::Condition(_) => None,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClusterId, Criterion, CurveType, ExpType, FieldKey, Site};
    use crate::fit::{Candidate, ClusterChoice, ModelRun};
    use crate::models::{ModelId, Param};

    fn summary() -> SelectionSummary {
        SelectionSummary {
            criterion: Criterion::Aic,
            clusters: vec![ClusterChoice {
                cluster: ClusterId::named("helix"),
                sites: vec![":3@N".into(), ":4@N".into()],
                candidates: vec![
                    Candidate { model: ModelId::NoRex, k: 2, n: 20, chi2: 40.0, score: 44.0 },
                    Candidate { model: ModelId::Cr72, k: 5, n: 20, chi2: 18.0, score: 28.0 },
                ],
                winner: Some(ModelId::Cr72),
                skipped: vec![(ModelId::Lm63, "failed: boom".into())],
            }],
        }
    }

    #[test]
    fn selection_table_stars_the_winner() {
        let text = format_selection(&summary());
        assert!(text.contains("Model selection (AIC)"));
        let winner = text.lines().find(|l| l.contains("CR72")).unwrap();
        assert!(winner.trim_start().starts_with('*'));
        assert!(text.contains("(skipped LM63) failed: boom"));
    }

    #[test]
    fn run_summary_lists_models_and_problems() {
        let report = ClusterReport {
            cluster: ClusterId::free("a"),
            sites: vec!["a".into()],
            eliminated: Some("pA of 0.40000 is less than 0.50100".into()),
            ..ClusterReport::default()
        };
        let output = AnalysisOutput {
            curve_type: CurveType::FixedTime,
            runs: vec![ModelRun {
                model: ModelId::Cr72,
                resumed: true,
                store: SiteStore::default(),
                reports: vec![report],
            }],
            selection: None,
            final_store: None,
            final_reports: Vec::new(),
        };
        let text = format_run_summary(&output, &AnalysisConfig::default());
        assert!(text.contains("eliminated=1"));
        assert!(text.contains("(loaded)"));
        assert!(text.contains("free:a eliminated: pA of 0.40000"));
        assert!(text.contains("Model selection skipped"));
    }

    #[test]
    fn site_values_show_field_slots_and_errors() {
        let mut site = Site::new(":7@N");
        site.select_model(ModelId::Lm63, CurveType::FixedTime);
        let fk = FieldKey::new(ExpType::CpmgSq, 600.0);
        site.set_value(ParamKey::field(Param::R2, fk), 11.5);
        site.set_value(ParamKey::scalar(Param::Kex), 1500.0);
        site.errors.insert(ParamKey::scalar(Param::Kex), 12.25);
        let store = SiteStore::new(vec![site]).unwrap();
        let text = format_site_values(&store);
        assert!(text.contains("r2[SQ CPMG 600 MHz]"));
        let kex = text.lines().find(|l| l.contains(" kex")).unwrap();
        assert!(kex.ends_with("12.250000"));
    }
}
