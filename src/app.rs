//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and sets up logging
//! - parses CLI arguments
//! - builds the analysis configuration (file, then flags)
//! - runs the model loop and prints the reports
//! - writes optional exports

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use clap::Parser;

use crate::cli::{Cli, Command, RunArgs};
use crate::domain::AnalysisConfig;
use crate::error::AppError;
use crate::models::ModelId;

pub mod logging;
pub mod pipeline;

/// Entry point for the `dispfit` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Models => {
            println!("{}", format_registry());
            Ok(())
        }
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let base = match &args.config {
        Some(path) => read_config(path)?,
        None => AnalysisConfig::default(),
    };
    let config = config_from_args(&args, base);
    let run = pipeline::run_dataset(&args.data, &config)?;

    println!(
        "{}",
        crate::report::format_run_summary(&run.analysis, &config)
    );
    let values = run
        .analysis
        .final_store
        .as_ref()
        .or_else(|| run.analysis.runs.last().map(|r| &r.store));
    if let Some(store) = values {
        println!("{}", crate::report::format_site_values(store));
    }

    if let Some(path) = &args.export_summary {
        pipeline::export_summary(path, &run.analysis)?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<AnalysisConfig, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open config '{}'", path.display()), e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::json(format!("Invalid config '{}'", path.display()), e))
}

/// Overlay the flags that were given onto `config`.
pub fn config_from_args(args: &RunArgs, mut config: AnalysisConfig) -> AnalysisConfig {
    if !args.models.is_empty() {
        config.models = args.models.clone();
    }
    if let Some(dir) = &args.results_dir {
        config.results_dir = dir.clone();
    }
    if let Some(c) = args.modsel {
        config.modsel = c;
    }
    if let Some(inc) = args.grid_inc {
        config.grid_inc = Some(inc);
    }
    if args.no_grid {
        config.grid_inc = None;
    }
    if let Some(n) = args.mc_sim_num {
        config.mc_sim_num = n;
    }
    if args.exp_mc_sim_num.is_some() {
        config.exp_mc_sim_num = args.exp_mc_sim_num;
    }
    if args.pre_run_dir.is_some() {
        config.pre_run_dir = args.pre_run_dir.clone();
    }
    if let Some(level) = args.insignificance {
        config.insignificance = level;
    }
    config.numeric_only |= args.numeric_only;
    config.mc_sim_all_models |= args.mc_sim_all_models;
    if args.no_eliminate {
        config.eliminate = false;
    }
    config.set_grid_r20 |= args.set_grid_r20;
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config
}

/// One line per registered model.
pub fn format_registry() -> String {
    let mut out = String::new();
    for model in ModelId::ALL {
        let kind = if model.is_analytic() {
            "analytic"
        } else if model.is_numeric() {
            "numeric"
        } else {
            "-"
        };
        let params: Vec<&str> = model.model().params.iter().map(|p| p.name()).collect();
        out.push_str(&format!(
            "{:<26} {:<9} {:<14} {}\n",
            model.name(),
            kind,
            format!("{:?}", model.family()),
            params.join(", ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Criterion;

    fn args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["dispfit", "run", "--data", "d.json"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Command::Run(a) => a,
            Command::Models => panic!("expected run"),
        }
    }

    #[test]
    fn flags_override_the_config_file() {
        let base = AnalysisConfig {
            models: vec![ModelId::R2eff, ModelId::Cr72],
            mc_sim_num: 50,
            ..AnalysisConfig::default()
        };
        let cfg = config_from_args(&args(&["--modsel", "BIC", "--no-grid", "--seed", "7"]), base);
        assert_eq!(cfg.models, vec![ModelId::R2eff, ModelId::Cr72]);
        assert_eq!(cfg.mc_sim_num, 50);
        assert_eq!(cfg.modsel, Criterion::Bic);
        assert_eq!(cfg.grid_inc, None);
        assert_eq!(cfg.seed, 7);
        assert!(cfg.eliminate);
    }

    #[test]
    fn registry_listing_has_every_model() {
        let text = format_registry();
        assert_eq!(text.lines().count(), ModelId::ALL.len());
        assert!(text.lines().any(|l| l.starts_with("CR72 ") && l.contains("analytic")));
    }
}
