//! Dataset JSON ingest.
//!
//! A dataset carries everything the fitting core takes from upstream:
//!
//! - spectrum metadata (experiment type, field, dispersion point, time)
//! - sites with peak intensities per spectrum and/or pre-derived rates
//! - named cluster definitions
//!
//! Metadata completeness is not checked here; the setup checks report a
//! missing field with the offending spectrum. Structural problems (duplicate
//! ids, unknown references) are rejected on load.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{ConditionKey, ExpType, Experiment, Observation, Site, SiteStore, Spectrum};
use crate::error::AppError;
use crate::models::Isotope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatePoint {
    pub exp_type: ExpType,
    pub field: f64,
    #[serde(default)]
    pub offset: f64,
    pub point: f64,
    pub value: f64,
    pub error: f64,
}

impl RatePoint {
    pub fn key(&self) -> ConditionKey {
        ConditionKey {
            exp_type: self.exp_type,
            field: self.field,
            offset: self.offset,
            point: self.point,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: String,
    #[serde(default)]
    pub isotope: Isotope,
    #[serde(default = "selected")]
    pub select: bool,
    /// Peak intensities keyed by spectrum id.
    #[serde(default)]
    pub intensities: BTreeMap<String, Observation>,
    #[serde(default)]
    pub rates: Vec<RatePoint>,
}

fn selected() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub name: String,
    pub sites: Vec<String>,
}

/// On-disk dataset schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetFile {
    pub spectra: Vec<Spectrum>,
    pub sites: Vec<SiteRecord>,
    #[serde(default)]
    pub clusters: Vec<ClusterRecord>,
}

/// Loaded dataset: experiment metadata plus the base site store.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub experiment: Experiment,
    pub store: SiteStore,
}

impl Dataset {
    /// Validate a parsed dataset and build the store.
    pub fn from_file(file: DatasetFile) -> Result<Self, AppError> {
        let mut ids = BTreeSet::new();
        for s in &file.spectra {
            if !ids.insert(s.id.as_str()) {
                return Err(AppError::invalid(format!("Duplicate spectrum id '{}'.", s.id)));
            }
        }

        let experiment = Experiment::new(file.spectra.clone());
        let mut sites = Vec::with_capacity(file.sites.len());
        for rec in file.sites {
            if let Some(unknown) = rec.intensities.keys().find(|k| !ids.contains(k.as_str())) {
                return Err(AppError::invalid(format!(
                    "Site '{}' has an intensity for unknown spectrum '{unknown}'.",
                    rec.id
                )));
            }
            let mut site = Site::new(rec.id);
            site.isotope = rec.isotope;
            site.select = rec.select;
            site.intensities = rec.intensities;
            for r in &rec.rates {
                if !(r.value.is_finite() && r.error.is_finite()) {
                    return Err(AppError::invalid(format!(
                        "Site '{}' has a non-finite rate at {}.",
                        site.id,
                        r.key()
                    )));
                }
                if site.rates.insert(r.key(), Observation::new(r.value, r.error)).is_some() {
                    return Err(AppError::invalid(format!(
                        "Site '{}' has two rates at {}.",
                        site.id,
                        r.key()
                    )));
                }
            }
            sites.push(site);
        }

        let mut store = SiteStore::new(sites)?;
        for c in &file.clusters {
            store.cluster(&c.name, &c.sites)?;
        }
        Ok(Self { experiment, store })
    }
}

/// Load a dataset JSON file.
pub fn load_dataset(path: &Path) -> Result<Dataset, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open dataset '{}'", path.display()), e))?;
    let parsed: DatasetFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::json(format!("Invalid dataset '{}'", path.display()), e))?;
    Dataset::from_file(parsed)
}
