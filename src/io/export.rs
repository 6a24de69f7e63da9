//! Export the model-selection summary to CSV.
//!
//! One row per (cluster, model): scored candidates carry their criterion
//! inputs, skipped models carry the reason instead.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::AppError;
use crate::fit::SelectionSummary;

/// Write the selection summary to a CSV file.
pub fn write_selection_csv(path: &Path, summary: &SelectionSummary) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::io(format!("Failed to create export CSV '{}'", path.display()), e))?;
    let mut out = BufWriter::new(file);
    write_selection(&mut out, summary)
        .and_then(|_| out.flush())
        .map_err(|e| AppError::io(format!("Failed to write export CSV '{}'", path.display()), e))
}

fn write_selection<W: Write>(out: &mut W, summary: &SelectionSummary) -> std::io::Result<()> {
    writeln!(out, "cluster,sites,model,k,n,chi2,criterion,score,selected,skipped")?;
    for choice in &summary.clusters {
        let sites = choice.sites.join(";");
        for c in &choice.candidates {
            writeln!(
                out,
                "{},{},{},{},{},{:.6},{},{:.6},{},",
                csv_field(choice.cluster.as_str()),
                csv_field(&sites),
                csv_field(c.model.name()),
                c.k,
                c.n,
                c.chi2,
                summary.criterion,
                c.score,
                choice.winner == Some(c.model),
            )?;
        }
        for (model, reason) in &choice.skipped {
            writeln!(
                out,
                "{},{},{},,,,{},,false,{}",
                csv_field(choice.cluster.as_str()),
                csv_field(&sites),
                csv_field(model.name()),
                summary.criterion,
                csv_field(reason),
            )?;
        }
    }
    Ok(())
}

/// Quote a field containing a separator or quote.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClusterId, Criterion};
    use crate::fit::{Candidate, ClusterChoice};
    use crate::models::ModelId;

    #[test]
    fn rows_per_candidate_and_skip() {
        let summary = SelectionSummary {
            criterion: Criterion::Aic,
            clusters: vec![ClusterChoice {
                cluster: ClusterId::free(":5@N"),
                sites: vec![":5@N".into()],
                candidates: vec![Candidate {
                    model: ModelId::NoRex,
                    k: 1,
                    n: 10,
                    chi2: 12.0,
                    score: 14.0,
                }],
                winner: Some(ModelId::NoRex),
                skipped: vec![(ModelId::Cr72, "eliminated: pA of 0.40000, too low".into())],
            }],
        };
        let mut buf = Vec::new();
        write_selection(&mut buf, &summary).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "free::5@N,:5@N,No Rex,1,10,12.000000,AIC,14.000000,true,");
        assert!(lines[2].ends_with("\"eliminated: pA of 0.40000, too low\""));
    }

    #[test]
    fn file_export_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selection.csv");
        let summary = SelectionSummary {
            criterion: Criterion::Bic,
            clusters: Vec::new(),
        };
        write_selection_csv(&path, &summary).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("cluster,sites,model"));
    }
}
