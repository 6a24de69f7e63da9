//! Crate-wide error type.
//!
//! Every variant maps onto a process exit code (see [`AppError::exit_code`]):
//!
//! - `2`: setup / usage errors raised before any optimisation starts
//! - `3`: data errors (a site or cluster has nothing to fit)
//! - `4`: numeric / worker failures
//! - `5`: persistence (checkpoint and dataset files)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unknown dispersion model '{name}'; valid models are: {valid}.")]
    UnknownModel { name: String, valid: String },

    #[error("Unsupported model selection technique '{name}'; use one of AIC, AICc or BIC.")]
    UnsupportedCriterion { name: String },

    #[error("The relaxation dispersion experiment type has not been specified for spectrum '{spectrum}'.")]
    MissingExpType { spectrum: String },

    #[error("The spectrometer frequency has not been set for spectrum '{spectrum}'.")]
    MissingSpectrometerFrq { spectrum: String },

    #[error("The CPMG frequency or spin-lock field strength has not been set for spectrum '{spectrum}'.")]
    MissingDispersionPoints { spectrum: String },

    #[error("The relaxation time has not been set for spectrum '{spectrum}'.")]
    MissingRelaxTime { spectrum: String },

    #[error("No dispersion model has been selected for the run.")]
    MissingModel,

    #[error("Mixed fixed-time and exponential curve experiments cannot be analysed in one run ({detail}).")]
    MixedCurveTypes { detail: String },

    #[error("No rate function is available for model '{model}'.")]
    RateFunctionUnavailable { model: String },

    #[error("Site '{site}' has no usable measurements for model '{model}'.")]
    NoData { site: String, model: String },

    #[error("The grid search for model '{model}' would evaluate {points} points (limit {limit}).")]
    GridTooLarge { model: String, points: u128, limit: u64 },

    #[error("Optimisation of cluster '{cluster}' failed: {message}")]
    WorkerFailed { cluster: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl AppError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UnknownModel { .. }
            | Self::UnsupportedCriterion { .. }
            | Self::MissingExpType { .. }
            | Self::MissingSpectrometerFrq { .. }
            | Self::MissingDispersionPoints { .. }
            | Self::MissingRelaxTime { .. }
            | Self::MissingModel
            | Self::MixedCurveTypes { .. }
            | Self::RateFunctionUnavailable { .. }
            | Self::InvalidInput(_) => 2,
            Self::NoData { .. } => 3,
            Self::GridTooLarge { .. } | Self::WorkerFailed { .. } => 4,
            Self::Io { .. } | Self::Json { .. } => 5,
        }
    }

    /// Setup errors abort the run before any optimisation starts.
    pub fn is_setup(&self) -> bool {
        self.exit_code() == 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_share_exit_code() {
        let e = AppError::MissingRelaxTime {
            spectrum: "ncyc_2".into(),
        };
        assert_eq!(e.exit_code(), 2);
        assert!(e.is_setup());
        assert!(e.to_string().contains("ncyc_2"));
    }

    #[test]
    fn worker_failure_names_cluster() {
        let e = AppError::WorkerFailed {
            cluster: "free:#A:5".into(),
            message: "Maximum number of iterations reached.".into(),
        };
        assert_eq!(e.exit_code(), 4);
        assert!(!e.is_setup());
        assert!(e.to_string().contains("free:#A:5"));
    }
}
