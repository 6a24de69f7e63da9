//! Shared "analysis pipeline" logic behind `dispfit run`.
//!
//! Keeping this in one place keeps the workflow testable without a process:
//! dataset load -> worker pool -> model loop -> selection -> exports

use std::path::Path;
use std::sync::Arc;

use crate::domain::AnalysisConfig;
use crate::error::AppError;
use crate::fit::{AnalysisOutput, RayonQueue, run_analysis};
use crate::io::{Dataset, DirCheckpointStore, load_dataset, write_selection_csv};
use crate::models::BuiltinRates;

/// All computed outputs of a single `dispfit run`.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub dataset: Dataset,
    pub analysis: AnalysisOutput,
}

/// Load the dataset and run the complete analysis.
pub fn run_dataset(data: &Path, config: &AnalysisConfig) -> Result<RunOutput, AppError> {
    let dataset = load_dataset(data)?;
    run_with_dataset(dataset, config)
}

/// Run the analysis on an already loaded dataset, with the bundled rate functions.
pub fn run_with_dataset(dataset: Dataset, config: &AnalysisConfig) -> Result<RunOutput, AppError> {
    let checkpoints = DirCheckpointStore::new(&config.results_dir);
    let mut queue = RayonQueue::new(config.workers)?;
    let analysis = run_analysis(
        config,
        &dataset.store,
        Arc::new(dataset.experiment.clone()),
        Arc::new(BuiltinRates),
        &checkpoints,
        &mut queue,
    )?;
    Ok(RunOutput { dataset, analysis })
}

/// Write the optional selection CSV.
pub fn export_summary(path: &Path, output: &AnalysisOutput) -> Result<(), AppError> {
    match &output.selection {
        Some(selection) => write_selection_csv(path, selection),
        None => {
            tracing::warn!(path = %path.display(), "no model selection to export");
            Ok(())
        }
    }
}
