//! Per-model result checkpoints.
//!
//! A checkpoint is the complete site store after one model has been fit,
//! plus the per-cluster reports. The directory layout is:
//!
//! - `<results_dir>/<model-slug>/results.json` per model
//! - `<results_dir>/final/results.json` for the selected models
//!
//! An existing model checkpoint is loaded instead of refitting, which makes
//! a run restartable at model granularity. Checkpoints of a previous run also
//! serve as pre-run seeds.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::domain::SiteStore;
use crate::error::AppError;
use crate::fit::{ClusterReport, SelectionSummary};
use crate::models::ModelId;

const RESULTS_FILE: &str = "results.json";
const FINAL_DIR: &str = "final";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub tool: String,
    pub model: ModelId,
    pub written_at: DateTime<Utc>,
    pub store: SiteStore,
    pub reports: Vec<ClusterReport>,
}

impl ModelCheckpoint {
    pub fn new(model: ModelId, store: SiteStore, reports: Vec<ClusterReport>) -> Self {
        Self {
            tool: "dispfit".to_string(),
            model,
            written_at: Utc::now(),
            store,
            reports,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalCheckpoint {
    pub tool: String,
    pub written_at: DateTime<Utc>,
    pub selection: SelectionSummary,
    /// Sites carrying the winning model's values (and final errors).
    pub store: SiteStore,
}

impl FinalCheckpoint {
    pub fn new(selection: SelectionSummary, store: SiteStore) -> Self {
        Self {
            tool: "dispfit".to_string(),
            written_at: Utc::now(),
            selection,
            store,
        }
    }
}

/// Persistence used for resumability.
pub trait CheckpointStore {
    fn exists(&self, model: ModelId) -> bool;
    fn load(&self, model: ModelId) -> Result<ModelCheckpoint, AppError>;
    fn write(&self, checkpoint: &ModelCheckpoint) -> Result<(), AppError>;
    fn write_final(&self, checkpoint: &FinalCheckpoint) -> Result<(), AppError>;
}

/// Checkpoints as JSON files under one results directory.
#[derive(Debug, Clone)]
pub struct DirCheckpointStore {
    root: PathBuf,
}

impl DirCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_path(&self, model: ModelId) -> PathBuf {
        self.root.join(model.slug()).join(RESULTS_FILE)
    }

    pub fn final_path(&self) -> PathBuf {
        self.root.join(FINAL_DIR).join(RESULTS_FILE)
    }

    pub fn load_final(&self) -> Result<FinalCheckpoint, AppError> {
        read_json(&self.final_path())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open checkpoint '{}'", path.display()), e))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| AppError::json(format!("Invalid checkpoint '{}'", path.display()), e))
}

/// Written to a temporary file, then renamed into place.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::io(format!("Failed to create '{}'", dir.display()), e))?;
    }
    let tmp = path.with_extension("json.tmp");
    let file = File::create(&tmp)
        .map_err(|e| AppError::io(format!("Failed to create checkpoint '{}'", tmp.display()), e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| AppError::json(format!("Failed to write checkpoint '{}'", tmp.display()), e))?;
    fs::rename(&tmp, path)
        .map_err(|e| AppError::io(format!("Failed to move checkpoint to '{}'", path.display()), e))
}

impl CheckpointStore for DirCheckpointStore {
    fn exists(&self, model: ModelId) -> bool {
        self.model_path(model).is_file()
    }

    fn load(&self, model: ModelId) -> Result<ModelCheckpoint, AppError> {
        let cp: ModelCheckpoint = read_json(&self.model_path(model))?;
        if cp.model != model {
            return Err(AppError::invalid(format!(
                "Checkpoint '{}' holds model '{}', expected '{}'.",
                self.model_path(model).display(),
                cp.model,
                model
            )));
        }
        Ok(cp)
    }

    fn write(&self, checkpoint: &ModelCheckpoint) -> Result<(), AppError> {
        write_json(&self.model_path(checkpoint.model), checkpoint)
    }

    fn write_final(&self, checkpoint: &FinalCheckpoint) -> Result<(), AppError> {
        write_json(&self.final_path(), checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ParamKey, Site};
    use crate::models::Param;

    #[test]
    fn model_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cps = DirCheckpointStore::new(dir.path());
        assert!(!cps.exists(ModelId::Cr72));

        let mut site = Site::new(":12@N");
        site.set_value(ParamKey::scalar(Param::Kex), 1234.5);
        let store = SiteStore::new(vec![site]).unwrap();
        cps.write(&ModelCheckpoint::new(ModelId::Cr72, store, Vec::new()))
            .unwrap();

        assert!(cps.exists(ModelId::Cr72));
        assert!(cps.model_path(ModelId::NsCpmg2Site3d).ends_with("NS_CPMG_2-site_3D/results.json"));
        let back = cps.load(ModelId::Cr72).unwrap();
        let kex = back.store.get(":12@N").unwrap().value(&ParamKey::scalar(Param::Kex));
        assert_eq!(kex, Some(1234.5));
    }

    #[test]
    fn corrupt_checkpoint_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let cps = DirCheckpointStore::new(dir.path());
        let path = cps.model_path(ModelId::NoRex);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        let err = cps.load(ModelId::NoRex).unwrap_err();
        assert!(matches!(err, AppError::Json { .. }));
        assert_eq!(err.exit_code(), 5);
    }
}
