//! Parameter catalogue shared by every dispersion model.
//!
//! Each parameter knows its name, registry default, how it is shared between
//! sites (its [`Scope`]), its natural magnitude for optimiser scaling, and the
//! default grid-search bounds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// How a parameter value is shared inside a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// One value per site per dispersion condition (raw-rate derivation only).
    PerCondition,
    /// One value per site per (experiment type, field strength).
    PerField,
    /// One value per site.
    PerSite,
    /// One value shared by every site in the cluster.
    Cluster,
}

/// A model parameter.
///
/// The declaration order is the canonical order used when listing or
/// serialising parameters; per-model ordering comes from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Param {
    #[serde(rename = "r2eff")]
    R2eff,
    #[serde(rename = "i0")]
    I0,
    #[serde(rename = "r2")]
    R2,
    #[serde(rename = "r2a")]
    R2a,
    #[serde(rename = "r2b")]
    R2b,
    #[serde(rename = "pA")]
    PA,
    #[serde(rename = "pB")]
    PB,
    #[serde(rename = "phi_ex")]
    PhiEx,
    #[serde(rename = "phi_ex_B")]
    PhiExB,
    #[serde(rename = "phi_ex_C")]
    PhiExC,
    #[serde(rename = "dw")]
    Dw,
    #[serde(rename = "dw_AB")]
    DwAB,
    #[serde(rename = "dw_BC")]
    DwBC,
    #[serde(rename = "dwH")]
    DwH,
    #[serde(rename = "dwH_AB")]
    DwHAB,
    #[serde(rename = "dwH_BC")]
    DwHBC,
    #[serde(rename = "kex")]
    Kex,
    #[serde(rename = "kex_AB")]
    KexAB,
    #[serde(rename = "kex_BC")]
    KexBC,
    #[serde(rename = "kex_AC")]
    KexAC,
    #[serde(rename = "kB")]
    KB,
    #[serde(rename = "kC")]
    KC,
    #[serde(rename = "tex")]
    Tex,
    #[serde(rename = "k_AB")]
    KAB,
}

/// Context needed to size parameters whose magnitude depends on the data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Magnitudes {
    /// Largest peak intensity seen for the site (sets the `i0` scale).
    pub max_intensity: f64,
}

impl Default for Magnitudes {
    fn default() -> Self {
        Self {
            max_intensity: 10000.0,
        }
    }
}

impl Param {
    pub const ALL: [Param; 24] = [
        Param::R2eff,
        Param::I0,
        Param::R2,
        Param::R2a,
        Param::R2b,
        Param::PA,
        Param::PB,
        Param::PhiEx,
        Param::PhiExB,
        Param::PhiExC,
        Param::Dw,
        Param::DwAB,
        Param::DwBC,
        Param::DwH,
        Param::DwHAB,
        Param::DwHBC,
        Param::Kex,
        Param::KexAB,
        Param::KexBC,
        Param::KexAC,
        Param::KB,
        Param::KC,
        Param::Tex,
        Param::KAB,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Dense index into per-site parameter arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Param::R2eff => "r2eff",
            Param::I0 => "i0",
            Param::R2 => "r2",
            Param::R2a => "r2a",
            Param::R2b => "r2b",
            Param::PA => "pA",
            Param::PB => "pB",
            Param::PhiEx => "phi_ex",
            Param::PhiExB => "phi_ex_B",
            Param::PhiExC => "phi_ex_C",
            Param::Dw => "dw",
            Param::DwAB => "dw_AB",
            Param::DwBC => "dw_BC",
            Param::DwH => "dwH",
            Param::DwHAB => "dwH_AB",
            Param::DwHBC => "dwH_BC",
            Param::Kex => "kex",
            Param::KexAB => "kex_AB",
            Param::KexBC => "kex_BC",
            Param::KexAC => "kex_AC",
            Param::KB => "kB",
            Param::KC => "kC",
            Param::Tex => "tex",
            Param::KAB => "k_AB",
        }
    }

    pub fn scope(self) -> Scope {
        match self {
            Param::R2eff | Param::I0 => Scope::PerCondition,
            Param::R2 | Param::R2a | Param::R2b => Scope::PerField,
            Param::PhiEx
            | Param::PhiExB
            | Param::PhiExC
            | Param::Dw
            | Param::DwAB
            | Param::DwBC
            | Param::DwH
            | Param::DwHAB
            | Param::DwHBC => Scope::PerSite,
            Param::PA
            | Param::PB
            | Param::Kex
            | Param::KexAB
            | Param::KexBC
            | Param::KexAC
            | Param::KB
            | Param::KC
            | Param::Tex
            | Param::KAB => Scope::Cluster,
        }
    }

    pub fn default_value(self) -> f64 {
        match self {
            Param::R2eff | Param::R2 | Param::R2a | Param::R2b => 15.0,
            Param::I0 => 10000.0,
            Param::PA | Param::PB => 0.5,
            Param::PhiEx | Param::PhiExB | Param::PhiExC => 5.0,
            Param::Dw | Param::DwAB | Param::DwBC => 0.0,
            Param::DwH | Param::DwHAB | Param::DwHBC => 0.0,
            Param::Kex | Param::KexAB | Param::KexBC | Param::KexAC => 10000.0,
            Param::KB | Param::KC | Param::KAB => 10000.0,
            Param::Tex => 1.0 / 10000.0,
        }
    }

    /// Natural magnitude used for the diagonal scaling matrix.
    pub fn scaling(self, mag: &Magnitudes) -> f64 {
        match self {
            Param::R2eff | Param::R2 | Param::R2a | Param::R2b => 10.0,
            Param::I0 => {
                if mag.max_intensity.is_finite() && mag.max_intensity > 0.0 {
                    mag.max_intensity
                } else {
                    1.0
                }
            }
            Param::Kex | Param::KexAB | Param::KexBC | Param::KexAC | Param::KB | Param::KC => {
                10000.0
            }
            Param::KAB => 10000.0,
            Param::Tex => 1e-4,
            _ => 1.0,
        }
    }

    /// Default grid-search bounds `(lower, upper)`.
    pub fn grid_bounds(self, mag: &Magnitudes) -> (f64, f64) {
        match self {
            Param::R2eff => (8.0, 200.0),
            Param::I0 => (0.0, 2.0 * mag.max_intensity.max(1.0)),
            Param::R2 | Param::R2a | Param::R2b => (5.0, 30.0),
            Param::PA => (0.5, 1.0),
            Param::PB => (0.0, 0.5),
            Param::PhiEx | Param::PhiExB | Param::PhiExC => (0.0, 10.0),
            Param::Dw | Param::DwAB | Param::DwBC => (0.0, 10.0),
            Param::DwH | Param::DwHAB | Param::DwHBC => (0.0, 3.0),
            Param::Kex | Param::KexAB | Param::KexBC | Param::KexAC | Param::KB | Param::KC => {
                (1.0, 100000.0)
            }
            Param::KAB => (1.0, 100000.0),
            Param::Tex => (1e-5, 1.0),
        }
    }

    pub fn is_r20(self) -> bool {
        matches!(self, Param::R2 | Param::R2a | Param::R2b)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Param {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Param::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| AppError::invalid(format!("Unknown parameter '{s}'.")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for p in Param::ALL {
            assert_eq!(p.name().parse::<Param>().ok(), Some(p));
        }
        assert!("k_BA".parse::<Param>().is_err());
    }

    #[test]
    fn dense_index_matches_declaration_order() {
        for (i, p) in Param::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
        }
    }

    #[test]
    fn exchange_rates_are_cluster_shared() {
        assert_eq!(Param::Kex.scope(), Scope::Cluster);
        assert_eq!(Param::PA.scope(), Scope::Cluster);
        assert_eq!(Param::Dw.scope(), Scope::PerSite);
        assert_eq!(Param::R2a.scope(), Scope::PerField);
        assert_eq!(Param::R2eff.scope(), Scope::PerCondition);
    }

    #[test]
    fn grid_bounds_contain_defaults_for_exchange_params() {
        let mag = Magnitudes::default();
        for p in [Param::PA, Param::Kex, Param::Tex, Param::R2] {
            let (lo, hi) = p.grid_bounds(&mag);
            let d = p.default_value();
            assert!(lo <= d && d <= hi, "{p}");
        }
    }
}
