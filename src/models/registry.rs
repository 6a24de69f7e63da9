//! Static model registry.
//!
//! The registry is a fixed table: model identity → ordered parameter list,
//! analytic/numeric classification, experiment family and description.
//! Models never change at runtime.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{CurveType, ExpType};
use crate::error::AppError;
use crate::models::param::Param;

/// Identity of a dispersion model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
pub enum ModelId {
    #[serde(rename = "R2eff")]
    #[value(name = "R2eff")]
    R2eff,
    #[serde(rename = "No Rex")]
    #[value(name = "No Rex")]
    NoRex,
    #[serde(rename = "LM63")]
    #[value(name = "LM63")]
    Lm63,
    #[serde(rename = "LM63 3-site")]
    #[value(name = "LM63 3-site")]
    Lm63ThreeSite,
    #[serde(rename = "CR72")]
    #[value(name = "CR72")]
    Cr72,
    #[serde(rename = "CR72 full")]
    #[value(name = "CR72 full")]
    Cr72Full,
    #[serde(rename = "IT99")]
    #[value(name = "IT99")]
    It99,
    #[serde(rename = "TSMFK01")]
    #[value(name = "TSMFK01")]
    Tsmfk01,
    #[serde(rename = "M61")]
    #[value(name = "M61")]
    M61,
    #[serde(rename = "M61 skew")]
    #[value(name = "M61 skew")]
    M61Skew,
    #[serde(rename = "DPL94")]
    #[value(name = "DPL94")]
    Dpl94,
    #[serde(rename = "TP02")]
    #[value(name = "TP02")]
    Tp02,
    #[serde(rename = "TAP03")]
    #[value(name = "TAP03")]
    Tap03,
    #[serde(rename = "MP05")]
    #[value(name = "MP05")]
    Mp05,
    #[serde(rename = "NS CPMG 2-site 3D")]
    #[value(name = "NS CPMG 2-site 3D")]
    NsCpmg2Site3d,
    #[serde(rename = "NS CPMG 2-site 3D full")]
    #[value(name = "NS CPMG 2-site 3D full")]
    NsCpmg2Site3dFull,
    #[serde(rename = "NS CPMG 2-site star")]
    #[value(name = "NS CPMG 2-site star")]
    NsCpmg2SiteStar,
    #[serde(rename = "NS CPMG 2-site star full")]
    #[value(name = "NS CPMG 2-site star full")]
    NsCpmg2SiteStarFull,
    #[serde(rename = "NS CPMG 2-site expanded")]
    #[value(name = "NS CPMG 2-site expanded")]
    NsCpmg2SiteExpanded,
    #[serde(rename = "NS R1rho 2-site")]
    #[value(name = "NS R1rho 2-site")]
    NsR1rho2Site,
    #[serde(rename = "NS R1rho 3-site")]
    #[value(name = "NS R1rho 3-site")]
    NsR1rho3Site,
    #[serde(rename = "NS R1rho 3-site linear")]
    #[value(name = "NS R1rho 3-site linear")]
    NsR1rho3SiteLinear,
    #[serde(rename = "MMQ CR72")]
    #[value(name = "MMQ CR72")]
    MmqCr72,
    #[serde(rename = "NS MMQ 2-site")]
    #[value(name = "NS MMQ 2-site")]
    NsMmq2Site,
    #[serde(rename = "NS MMQ 3-site")]
    #[value(name = "NS MMQ 3-site")]
    NsMmq3Site,
    #[serde(rename = "NS MMQ 3-site linear")]
    #[value(name = "NS MMQ 3-site linear")]
    NsMmq3SiteLinear,
}

/// Experiment family a model applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    /// Raw-rate derivation, valid for every experiment type.
    Raw,
    /// Exchange-free baseline, valid for every experiment type.
    Any,
    Cpmg,
    R1rho,
    MultiQuantum,
}

impl Family {
    pub fn supports(self, exp: ExpType) -> bool {
        match self {
            Family::Raw | Family::Any => true,
            Family::Cpmg => exp == ExpType::CpmgSq || exp == ExpType::CpmgProtonSq,
            Family::R1rho => exp == ExpType::R1rho,
            Family::MultiQuantum => exp.is_cpmg(),
        }
    }
}

/// Immutable model description.
#[derive(Debug)]
pub struct Model {
    pub id: ModelId,
    pub name: &'static str,
    pub params: &'static [Param],
    pub analytic: bool,
    pub family: Family,
    pub description: &'static str,
}

use Param::*;

const P_2SITE: &[Param] = &[R2, PA, Dw, Kex];
const P_2SITE_FULL: &[Param] = &[R2a, R2b, PA, Dw, Kex];

static MODELS: [Model; 26] = [
    Model {
        id: ModelId::R2eff,
        name: "R2eff",
        params: &[R2eff, I0],
        analytic: false,
        family: Family::Raw,
        description: "Direct R2eff/R1rho derivation from peak intensities, no exchange model.",
    },
    Model {
        id: ModelId::NoRex,
        name: "No Rex",
        params: &[R2],
        analytic: false,
        family: Family::Any,
        description: "No chemical exchange.",
    },
    Model {
        id: ModelId::Lm63,
        name: "LM63",
        params: &[R2, PhiEx, Kex],
        analytic: true,
        family: Family::Cpmg,
        description: "Luz and Meiboom (1963) 2-site fast exchange CPMG model.",
    },
    Model {
        id: ModelId::Lm63ThreeSite,
        name: "LM63 3-site",
        params: &[R2, PhiExB, PhiExC, KB, KC],
        analytic: true,
        family: Family::Cpmg,
        description: "Luz and Meiboom (1963) 3-site fast exchange CPMG model.",
    },
    Model {
        id: ModelId::Cr72,
        name: "CR72",
        params: P_2SITE,
        analytic: true,
        family: Family::Cpmg,
        description: "Carver and Richards (1972) 2-site CPMG model with R20A = R20B.",
    },
    Model {
        id: ModelId::Cr72Full,
        name: "CR72 full",
        params: P_2SITE_FULL,
        analytic: true,
        family: Family::Cpmg,
        description: "Carver and Richards (1972) 2-site CPMG model.",
    },
    Model {
        id: ModelId::It99,
        name: "IT99",
        params: &[R2, PA, Dw, Tex],
        analytic: true,
        family: Family::Cpmg,
        description: "Ishima and Torchia (1999) 2-site CPMG model for all timescales.",
    },
    Model {
        id: ModelId::Tsmfk01,
        name: "TSMFK01",
        params: &[R2a, Dw, KAB],
        analytic: true,
        family: Family::Cpmg,
        description: "Tollinger et al. (2001) 2-site very slow exchange CPMG model.",
    },
    Model {
        id: ModelId::M61,
        name: "M61",
        params: &[R2, PhiEx, Kex],
        analytic: true,
        family: Family::R1rho,
        description: "Meiboom (1961) 2-site fast exchange R1rho model.",
    },
    Model {
        id: ModelId::M61Skew,
        name: "M61 skew",
        params: P_2SITE,
        analytic: true,
        family: Family::R1rho,
        description: "Meiboom (1961) 2-site fast exchange R1rho model with skewed populations.",
    },
    Model {
        id: ModelId::Dpl94,
        name: "DPL94",
        params: &[R2, PhiEx, Kex],
        analytic: true,
        family: Family::R1rho,
        description: "Davis, Perlman and London (1994) 2-site fast exchange R1rho model.",
    },
    Model {
        id: ModelId::Tp02,
        name: "TP02",
        params: P_2SITE,
        analytic: true,
        family: Family::R1rho,
        description: "Trott and Palmer (2002) 2-site R1rho model.",
    },
    Model {
        id: ModelId::Tap03,
        name: "TAP03",
        params: P_2SITE,
        analytic: true,
        family: Family::R1rho,
        description: "Trott, Abergel and Palmer (2003) 2-site R1rho model.",
    },
    Model {
        id: ModelId::Mp05,
        name: "MP05",
        params: P_2SITE,
        analytic: true,
        family: Family::R1rho,
        description: "Miloushev and Palmer (2005) 2-site R1rho model.",
    },
    Model {
        id: ModelId::NsCpmg2Site3d,
        name: "NS CPMG 2-site 3D",
        params: P_2SITE,
        analytic: false,
        family: Family::Cpmg,
        description: "Numerical 2-site CPMG solution using 3D magnetisation vectors.",
    },
    Model {
        id: ModelId::NsCpmg2Site3dFull,
        name: "NS CPMG 2-site 3D full",
        params: P_2SITE_FULL,
        analytic: false,
        family: Family::Cpmg,
        description: "Numerical 2-site CPMG solution using 3D magnetisation vectors, R20A != R20B.",
    },
    Model {
        id: ModelId::NsCpmg2SiteStar,
        name: "NS CPMG 2-site star",
        params: P_2SITE,
        analytic: false,
        family: Family::Cpmg,
        description: "Numerical 2-site CPMG solution using complex conjugate matrices.",
    },
    Model {
        id: ModelId::NsCpmg2SiteStarFull,
        name: "NS CPMG 2-site star full",
        params: P_2SITE_FULL,
        analytic: false,
        family: Family::Cpmg,
        description: "Numerical 2-site CPMG solution using complex conjugate matrices, R20A != R20B.",
    },
    Model {
        id: ModelId::NsCpmg2SiteExpanded,
        name: "NS CPMG 2-site expanded",
        params: P_2SITE,
        analytic: false,
        family: Family::Cpmg,
        description: "Numerical 2-site CPMG solution expanded using Maple.",
    },
    Model {
        id: ModelId::NsR1rho2Site,
        name: "NS R1rho 2-site",
        params: P_2SITE,
        analytic: false,
        family: Family::R1rho,
        description: "Numerical 2-site R1rho solution.",
    },
    Model {
        id: ModelId::NsR1rho3Site,
        name: "NS R1rho 3-site",
        params: &[R2, PA, DwAB, KexAB, PB, DwBC, KexBC, KexAC],
        analytic: false,
        family: Family::R1rho,
        description: "Numerical 3-site R1rho solution.",
    },
    Model {
        id: ModelId::NsR1rho3SiteLinear,
        name: "NS R1rho 3-site linear",
        params: &[R2, PA, DwAB, KexAB, PB, DwBC, KexBC],
        analytic: false,
        family: Family::R1rho,
        description: "Numerical 3-site R1rho solution, linearised with kAC = kCA = 0.",
    },
    Model {
        id: ModelId::MmqCr72,
        name: "MMQ CR72",
        params: &[R2, PA, Dw, DwH, Kex],
        analytic: true,
        family: Family::MultiQuantum,
        description: "Carver and Richards (1972) 2-site model extended to MMQ CPMG data.",
    },
    Model {
        id: ModelId::NsMmq2Site,
        name: "NS MMQ 2-site",
        params: &[R2, PA, Dw, DwH, Kex],
        analytic: false,
        family: Family::MultiQuantum,
        description: "Numerical 2-site solution for MMQ CPMG data.",
    },
    Model {
        id: ModelId::NsMmq3Site,
        name: "NS MMQ 3-site",
        params: &[R2, PA, DwAB, DwHAB, KexAB, PB, DwBC, DwHBC, KexBC, KexAC],
        analytic: false,
        family: Family::MultiQuantum,
        description: "Numerical 3-site solution for MMQ CPMG data.",
    },
    Model {
        id: ModelId::NsMmq3SiteLinear,
        name: "NS MMQ 3-site linear",
        params: &[R2, PA, DwAB, DwHAB, KexAB, PB, DwBC, DwHBC, KexBC],
        analytic: false,
        family: Family::MultiQuantum,
        description: "Numerical 3-site solution for MMQ CPMG data, linearised with kAC = kCA = 0.",
    },
];

impl ModelId {
    pub const ALL: [ModelId; 26] = [
        ModelId::R2eff,
        ModelId::NoRex,
        ModelId::Lm63,
        ModelId::Lm63ThreeSite,
        ModelId::Cr72,
        ModelId::Cr72Full,
        ModelId::It99,
        ModelId::Tsmfk01,
        ModelId::M61,
        ModelId::M61Skew,
        ModelId::Dpl94,
        ModelId::Tp02,
        ModelId::Tap03,
        ModelId::Mp05,
        ModelId::NsCpmg2Site3d,
        ModelId::NsCpmg2Site3dFull,
        ModelId::NsCpmg2SiteStar,
        ModelId::NsCpmg2SiteStarFull,
        ModelId::NsCpmg2SiteExpanded,
        ModelId::NsR1rho2Site,
        ModelId::NsR1rho3Site,
        ModelId::NsR1rho3SiteLinear,
        ModelId::MmqCr72,
        ModelId::NsMmq2Site,
        ModelId::NsMmq3Site,
        ModelId::NsMmq3SiteLinear,
    ];

    pub fn model(self) -> &'static Model {
        &MODELS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.model().name
    }

    pub fn is_analytic(self) -> bool {
        self.model().analytic
    }

    pub fn is_numeric(self) -> bool {
        !self.model().analytic && !matches!(self, ModelId::R2eff | ModelId::NoRex)
    }

    pub fn family(self) -> Family {
        self.model().family
    }

    /// Directory-safe name used for checkpoint paths.
    pub fn slug(self) -> String {
        self.name().replace(' ', "_")
    }

    /// Models with a separate pB parameter (3-site models).
    pub fn has_three_sites(self) -> bool {
        self.model().params.contains(&Param::PB)
    }

    /// Ordered parameter list for this model under the given curve type.
    ///
    /// The raw-rate derivation only fits `i0` when intensities decay over
    /// several relaxation times.
    pub fn parameters_for(self, curve: CurveType) -> Vec<Param> {
        let params = self.model().params;
        if self == ModelId::R2eff && curve == CurveType::FixedTime {
            return vec![Param::R2eff];
        }
        params.to_vec()
    }

    /// Registry default for one of this model's parameters.
    pub fn default(self, param: Param) -> Result<f64, AppError> {
        if !self.model().params.contains(&param) {
            return Err(AppError::invalid(format!(
                "The parameter '{param}' is not part of the '{}' model.",
                self.name()
            )));
        }
        Ok(param.default_value())
    }

    pub fn valid_names() -> String {
        ModelId::ALL
            .iter()
            .map(|m| format!("'{}'", m.name()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Ordered parameter list for `model` (free function form of [`ModelId::parameters_for`]).
pub fn parameters_for(model: ModelId, curve: CurveType) -> Vec<Param> {
    model.parameters_for(curve)
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| AppError::UnknownModel {
                name: s.to_string(),
                valid: ModelId::valid_names(),
            })
    }
}
