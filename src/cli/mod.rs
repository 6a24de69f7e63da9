//! Command-line parsing for the dispersion auto-analysis.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting code; `app` turns the parsed arguments into an `AnalysisConfig`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::Criterion;
use crate::models::ModelId;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "dispfit", version, about = "Relaxation dispersion model fitting and selection")]
pub struct Cli {
    /// Log debug events (overridden by DISPFIT_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every requested model, select a model per cluster and estimate errors.
    Run(RunArgs),
    /// List the model registry.
    Models,
}

/// Options for `dispfit run`.
///
/// Flags left unset keep the value from `--config` (or the defaults).
#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Dataset JSON (spectra, sites and clusters).
    #[arg(long, value_name = "JSON")]
    pub data: PathBuf,

    /// Analysis configuration JSON.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Model to fit; repeat in fitting order.
    #[arg(short = 'm', long = "model", value_enum)]
    pub models: Vec<ModelId>,

    /// Directory for per-model and final checkpoints.
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Information criterion for model selection.
    #[arg(long, value_enum)]
    pub modsel: Option<Criterion>,

    /// Grid search increments per dimension.
    #[arg(long, conflicts_with = "no_grid")]
    pub grid_inc: Option<usize>,

    /// Start from registry defaults instead of a grid search.
    #[arg(long)]
    pub no_grid: bool,

    /// Monte Carlo simulations for dispersion models.
    #[arg(long)]
    pub mc_sim_num: Option<usize>,

    /// Monte Carlo simulations for exponential-curve R2eff fitting.
    #[arg(long)]
    pub exp_mc_sim_num: Option<usize>,

    /// Results directory of a previous run used as the starting point.
    #[arg(long)]
    pub pre_run_dir: Option<PathBuf>,

    /// Deselect sites whose dispersion is smaller than this (rad/s).
    #[arg(long)]
    pub insignificance: Option<f64>,

    /// Exclude analytic models from model selection.
    #[arg(long)]
    pub numeric_only: bool,

    /// Run Monte Carlo simulations for every model, not just the winners.
    #[arg(long)]
    pub mc_sim_all_models: bool,

    /// Keep fits with unphysical populations or exchange times.
    #[arg(long)]
    pub no_eliminate: bool,

    /// Collapse the R20 grid dimensions onto the minimum R2eff.
    #[arg(long)]
    pub set_grid_r20: bool,

    /// Worker threads (default: all cores).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Random seed for Monte Carlo noise.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Export the model-selection summary to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_summary: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "dispfit",
            "run",
            "--data",
            "d.json",
            "-m",
            "R2eff",
            "--model",
            "NS CPMG 2-site expanded",
            "--modsel",
            "AICc",
            "--no-grid",
            "--no-eliminate",
            "-v",
        ]);
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.models, vec![ModelId::R2eff, ModelId::NsCpmg2SiteExpanded]);
        assert_eq!(args.modsel, Some(Criterion::Aicc));
        assert!(args.no_grid && args.no_eliminate);
        assert_eq!(args.grid_inc, None);
    }

    #[test]
    fn grid_flags_conflict() {
        let res = Cli::try_parse_from([
            "dispfit", "run", "--data", "d.json", "--grid-inc", "5", "--no-grid",
        ]);
        assert!(res.is_err());
    }
}
