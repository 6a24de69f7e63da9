//! Experiment metadata: spectra, experiment types and dispersion conditions.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Relaxation dispersion experiment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExpType {
    #[serde(rename = "SQ CPMG")]
    CpmgSq,
    #[serde(rename = "DQ CPMG")]
    CpmgDq,
    #[serde(rename = "MQ CPMG")]
    CpmgMq,
    #[serde(rename = "ZQ CPMG")]
    CpmgZq,
    #[serde(rename = "1H SQ CPMG")]
    CpmgProtonSq,
    #[serde(rename = "1H MQ CPMG")]
    CpmgProtonMq,
    #[serde(rename = "R1rho")]
    R1rho,
}

impl ExpType {
    pub fn label(self) -> &'static str {
        match self {
            ExpType::CpmgSq => "SQ CPMG",
            ExpType::CpmgDq => "DQ CPMG",
            ExpType::CpmgMq => "MQ CPMG",
            ExpType::CpmgZq => "ZQ CPMG",
            ExpType::CpmgProtonSq => "1H SQ CPMG",
            ExpType::CpmgProtonMq => "1H MQ CPMG",
            ExpType::R1rho => "R1rho",
        }
    }

    pub fn is_cpmg(self) -> bool {
        self != ExpType::R1rho
    }
}

impl fmt::Display for ExpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether peak intensities were recorded at one or several relaxation times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveType {
    /// One relaxation time per condition plus a reference spectrum.
    FixedTime,
    /// Several relaxation times per condition (exponential decay curves).
    Exponential,
}

/// Key of one (experiment type, field strength) pair.
///
/// Per-field parameters such as `r2` carry one value per `FieldKey`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FieldKey {
    pub exp_type: ExpType,
    /// Spectrometer proton frequency in MHz.
    pub field: f64,
}

impl FieldKey {
    pub fn new(exp_type: ExpType, field: f64) -> Self {
        Self { exp_type, field }
    }
}

impl PartialEq for FieldKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldKey {}

impl PartialOrd for FieldKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.exp_type
            .cmp(&other.exp_type)
            .then(self.field.total_cmp(&other.field))
    }
}

impl Hash for FieldKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.exp_type.hash(state);
        self.field.to_bits().hash(state);
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} MHz", self.exp_type, self.field)
    }
}

/// One point of a dispersion curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConditionKey {
    pub exp_type: ExpType,
    /// Spectrometer proton frequency in MHz.
    pub field: f64,
    /// Spin-lock offset in ppm (0 for CPMG).
    pub offset: f64,
    /// CPMG frequency or spin-lock field strength in Hz.
    pub point: f64,
}

impl ConditionKey {
    pub fn field_key(&self) -> FieldKey {
        FieldKey::new(self.exp_type, self.field)
    }
}

impl PartialEq for ConditionKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ConditionKey {}

impl PartialOrd for ConditionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConditionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.exp_type
            .cmp(&other.exp_type)
            .then(self.field.total_cmp(&other.field))
            .then(self.offset.total_cmp(&other.offset))
            .then(self.point.total_cmp(&other.point))
    }
}

impl Hash for ConditionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.exp_type.hash(state);
        self.field.to_bits().hash(state);
        self.offset.to_bits().hash(state);
        self.point.to_bits().hash(state);
    }
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} MHz, offset {} ppm, {} Hz",
            self.exp_type, self.field, self.offset, self.point
        )
    }
}

/// Metadata for one recorded spectrum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectrum {
    pub id: String,
    #[serde(default)]
    pub exp_type: Option<ExpType>,
    /// Spectrometer proton frequency in MHz.
    #[serde(default)]
    pub field: Option<f64>,
    /// CPMG frequency or spin-lock field strength in Hz; absent for reference spectra.
    #[serde(default)]
    pub point: Option<f64>,
    /// Reference (no CPMG block / no spin-lock) spectrum.
    #[serde(default)]
    pub reference: bool,
    #[serde(default)]
    pub offset: f64,
    /// Relaxation time period in seconds.
    #[serde(default)]
    pub relax_time: Option<f64>,
}

impl Spectrum {
    /// Condition key for a non-reference spectrum with complete metadata.
    pub fn condition(&self) -> Option<ConditionKey> {
        if self.reference {
            return None;
        }
        Some(ConditionKey {
            exp_type: self.exp_type?,
            field: self.field?,
            offset: self.offset,
            point: self.point?,
        })
    }

    fn matches_reference_for(&self, key: &ConditionKey) -> bool {
        self.reference
            && self.exp_type == Some(key.exp_type)
            && self.field == Some(key.field)
            && self.offset.total_cmp(&key.offset) == Ordering::Equal
    }
}

/// All spectrum metadata for the analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Experiment {
    pub spectra: Vec<Spectrum>,
}

impl Experiment {
    pub fn new(spectra: Vec<Spectrum>) -> Self {
        Self { spectra }
    }

    pub fn spectrum(&self, id: &str) -> Option<&Spectrum> {
        self.spectra.iter().find(|s| s.id == id)
    }

    pub fn exp_types(&self) -> BTreeSet<ExpType> {
        self.spectra.iter().filter_map(|s| s.exp_type).collect()
    }

    /// Sorted dispersion points of the whole experiment.
    pub fn condition_keys(&self) -> Vec<ConditionKey> {
        let keys: BTreeSet<ConditionKey> =
            self.spectra.iter().filter_map(|s| s.condition()).collect();
        keys.into_iter().collect()
    }

    /// Sorted (experiment type, field) pairs.
    pub fn field_keys(&self) -> Vec<FieldKey> {
        let keys: BTreeSet<FieldKey> = self
            .condition_keys()
            .iter()
            .map(|k| k.field_key())
            .collect();
        keys.into_iter().collect()
    }

    /// Non-reference spectra recorded at `key`.
    pub fn spectra_for<'a>(&'a self, key: &'a ConditionKey) -> impl Iterator<Item = &'a Spectrum> {
        self.spectra
            .iter()
            .filter(move |s| s.condition().as_ref() == Some(key))
    }

    /// Reference spectra matching the experiment type, field and offset of `key`.
    pub fn references_for<'a>(
        &'a self,
        key: &'a ConditionKey,
    ) -> impl Iterator<Item = &'a Spectrum> {
        self.spectra
            .iter()
            .filter(move |s| s.matches_reference_for(key))
    }

    /// Determine the curve type, rejecting mixtures of fixed-time and exponential data.
    pub fn curve_type(&self) -> Result<CurveType, AppError> {
        let mut times: BTreeMap<ExpType, BTreeSet<u64>> = BTreeMap::new();
        for s in &self.spectra {
            if let (Some(exp), Some(t)) = (s.exp_type, s.relax_time) {
                times.entry(exp).or_default().insert(t.to_bits());
            }
        }

        let mut fixed = Vec::new();
        let mut exponential = Vec::new();
        for (exp, set) in &times {
            if set.len() > 1 {
                exponential.push(exp.label());
            } else {
                fixed.push(exp.label());
            }
        }

        match (fixed.is_empty(), exponential.is_empty()) {
            (_, true) => Ok(CurveType::FixedTime),
            (true, false) => Ok(CurveType::Exponential),
            (false, false) => Err(AppError::MixedCurveTypes {
                detail: format!(
                    "fixed-time: {}; exponential: {}",
                    fixed.join(", "),
                    exponential.join(", ")
                ),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn cpmg(id: &str, field: f64, point: Option<f64>, time: f64) -> Spectrum {
        Spectrum {
            id: id.to_string(),
            exp_type: Some(ExpType::CpmgSq),
            field: Some(field),
            point,
            reference: point.is_none(),
            offset: 0.0,
            relax_time: Some(time),
        }
    }

    #[test]
    fn condition_keys_are_sorted_and_deduplicated() {
        let exp = Experiment::new(vec![
            cpmg("ref", 600.0, None, 0.04),
            cpmg("b", 600.0, Some(200.0), 0.04),
            cpmg("a", 600.0, Some(100.0), 0.04),
            cpmg("a2", 600.0, Some(100.0), 0.04),
            cpmg("c", 800.0, Some(100.0), 0.04),
        ]);
        let keys = exp.condition_keys();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].point, 100.0);
        assert_eq!(keys[1].point, 200.0);
        assert_eq!(keys[2].field, 800.0);
        assert_eq!(exp.field_keys().len(), 2);
        assert_eq!(exp.spectra_for(&keys[0]).count(), 2);
        assert_eq!(exp.references_for(&keys[0]).count(), 1);
        assert_eq!(exp.references_for(&keys[2]).count(), 0);
    }

    #[test]
    fn curve_type_detection() {
        let fixed = Experiment::new(vec![
            cpmg("ref", 600.0, None, 0.04),
            cpmg("a", 600.0, Some(100.0), 0.04),
        ]);
        assert_eq!(fixed.curve_type().ok(), Some(CurveType::FixedTime));

        let exp = Experiment::new(vec![
            cpmg("a", 600.0, Some(100.0), 0.01),
            cpmg("b", 600.0, Some(100.0), 0.02),
        ]);
        assert_eq!(exp.curve_type().ok(), Some(CurveType::Exponential));
    }

    #[test]
    fn mixed_curve_types_rejected() {
        let mut r1rho = cpmg("r", 600.0, Some(1000.0), 0.01);
        r1rho.exp_type = Some(ExpType::R1rho);
        let mut r1rho2 = r1rho.clone();
        r1rho2.id = "r2".into();
        r1rho2.relax_time = Some(0.05);
        let exp = Experiment::new(vec![cpmg("a", 600.0, Some(100.0), 0.04), r1rho, r1rho2]);
        assert!(matches!(
            exp.curve_type(),
            Err(AppError::MixedCurveTypes { .. })
        ));
    }
}
