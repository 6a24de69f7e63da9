//! Rate functions: parameter values → predicted R2eff / R1rho.
//!
//! The orchestration treats the physics as a black box behind
//! [`RateFunction`]. [`BuiltinRates`] bundles the closed-form models; numeric
//! models need an external implementation.
//!
//! Units:
//! - chemical shift differences (`dw*`) in ppm, converted with the site's
//!   isotope and the spectrometer field
//! - `phi_ex*` in ppm²
//! - CPMG frequencies and spin-lock field strengths in Hz
//! - rates in rad/s

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::domain::ConditionKey;
use crate::models::{ModelId, Param};

/// Observed nucleus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Isotope {
    #[default]
    #[serde(rename = "15N")]
    N15,
    #[serde(rename = "13C")]
    C13,
    #[serde(rename = "1H")]
    H1,
}

impl Isotope {
    /// Gyromagnetic ratio in rad/s/T.
    pub fn gyromagnetic_ratio(self) -> f64 {
        match self {
            Isotope::N15 => -2.7126e7,
            Isotope::C13 => 6.728e7,
            Isotope::H1 => 26.7522212e7,
        }
    }

    /// rad/s per ppm at a proton frequency of `field_mhz`.
    pub fn ppm_to_rad(self, field_mhz: f64) -> f64 {
        let ratio = (self.gyromagnetic_ratio() / Isotope::H1.gyromagnetic_ratio()).abs();
        2.0 * PI * field_mhz * ratio
    }
}

/// Parameter values of one site resolved for one dispersion condition.
///
/// Per-field parameters hold the value for the condition's field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteParams {
    values: [f64; Param::COUNT],
    pub isotope: Isotope,
}

impl SiteParams {
    pub fn new(isotope: Isotope) -> Self {
        let mut values = [0.0; Param::COUNT];
        for p in Param::ALL {
            values[p.index()] = p.default_value();
        }
        Self { values, isotope }
    }

    pub fn get(&self, p: Param) -> f64 {
        self.values[p.index()]
    }

    pub fn set(&mut self, p: Param, v: f64) {
        self.values[p.index()] = v;
    }
}

/// Model-indexed prediction of a relaxation rate.
pub trait RateFunction: Send + Sync {
    fn supports(&self, model: ModelId) -> bool;

    /// Predicted rate for `key`. Must be pure; non-finite values mark the
    /// parameter set as unusable.
    fn predict(&self, model: ModelId, params: &SiteParams, key: &ConditionKey) -> f64;
}

/// Closed-form rate functions shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRates;

impl RateFunction for BuiltinRates {
    fn supports(&self, model: ModelId) -> bool {
        matches!(
            model,
            ModelId::NoRex
                | ModelId::Lm63
                | ModelId::Lm63ThreeSite
                | ModelId::Cr72
                | ModelId::Cr72Full
                | ModelId::Tsmfk01
                | ModelId::M61
        )
    }

    fn predict(&self, model: ModelId, p: &SiteParams, key: &ConditionKey) -> f64 {
        let frq = p.isotope.ppm_to_rad(key.field);
        match model {
            ModelId::NoRex => p.get(Param::R2),
            ModelId::Lm63 => {
                p.get(Param::R2) + lm63_term(p.get(Param::PhiEx) * frq * frq, p.get(Param::Kex), key.point)
            }
            ModelId::Lm63ThreeSite => {
                p.get(Param::R2)
                    + lm63_term(p.get(Param::PhiExB) * frq * frq, p.get(Param::KB), key.point)
                    + lm63_term(p.get(Param::PhiExC) * frq * frq, p.get(Param::KC), key.point)
            }
            ModelId::Cr72 => cr72(
                p.get(Param::R2),
                p.get(Param::R2),
                p.get(Param::PA),
                p.get(Param::Dw) * frq,
                p.get(Param::Kex),
                key.point,
            ),
            ModelId::Cr72Full => cr72(
                p.get(Param::R2a),
                p.get(Param::R2b),
                p.get(Param::PA),
                p.get(Param::Dw) * frq,
                p.get(Param::Kex),
                key.point,
            ),
            ModelId::Tsmfk01 => tsmfk01(
                p.get(Param::R2a),
                p.get(Param::Dw) * frq,
                p.get(Param::KAB),
                key.point,
            ),
            ModelId::M61 => {
                let w1 = 2.0 * PI * key.point;
                let phi = p.get(Param::PhiEx) * frq * frq;
                let kex = p.get(Param::Kex);
                let numer = phi * kex;
                if numer == 0.0 {
                    return p.get(Param::R2);
                }
                p.get(Param::R2) + numer / (kex * kex + w1 * w1)
            }
            _ => f64::NAN,
        }
    }
}

/// Fast-exchange CPMG contribution `phi/kex · (1 - 4ν/kex · tanh(kex/4ν))`.
fn lm63_term(phi: f64, kex: f64, cpmg_frq: f64) -> f64 {
    if phi == 0.0 || kex == 0.0 {
        return 0.0;
    }
    let x = 4.0 * cpmg_frq / kex;
    phi / kex * (1.0 - x * (kex / (4.0 * cpmg_frq)).tanh())
}

/// Carver-Richards 2-site CPMG equation.
fn cr72(r20a: f64, r20b: f64, pa: f64, dw: f64, kex: f64, cpmg_frq: f64) -> f64 {
    let pb = 1.0 - pa;
    if dw == 0.0 || kex == 0.0 || pb == 0.0 {
        return r20a;
    }
    let k_bpa = kex * pa;
    let k_apb = kex * pb;
    let r20_kex = (r20a + r20b + kex) / 2.0;

    let diff = r20a - r20b - k_bpa + k_apb;
    let psi = diff * diff - dw * dw + 4.0 * pa * pb * kex * kex;
    let zeta = 2.0 * dw * diff;
    let sqrt_psi2_zeta2 = (psi * psi + zeta * zeta).sqrt();

    let d_part = (psi + 2.0 * dw * dw) / sqrt_psi2_zeta2;
    let d_pos = 0.5 * (1.0 + d_part);
    let d_neg = 0.5 * (-1.0 + d_part);

    let eta_scale = 2.0_f64.powf(-1.5);
    let eta_pos = eta_scale * (psi + sqrt_psi2_zeta2).sqrt() / cpmg_frq;
    let eta_neg = eta_scale * (-psi + sqrt_psi2_zeta2).max(0.0).sqrt() / cpmg_frq;

    let mut arg = d_pos * eta_pos.cosh() - d_neg * eta_neg.cos();
    // Rounding can push the fast-pulsing limit just below 1.
    if arg < 1.0 && arg > 1.0 - 1e-12 {
        arg = 1.0;
    }
    if !(arg >= 1.0) {
        return f64::NAN;
    }
    r20_kex - cpmg_frq * arg.acosh()
}

/// Very slow exchange CPMG equation.
fn tsmfk01(r20a: f64, dw: f64, k_ab: f64, cpmg_frq: f64) -> f64 {
    if dw == 0.0 || k_ab == 0.0 {
        return r20a;
    }
    let tcp = 1.0 / (4.0 * cpmg_frq);
    let x = dw * tcp;
    r20a + k_ab - k_ab * x.sin() / x
}

/// Two-point R2eff/R1rho derivation from a reference and a relaxed intensity.
///
/// Returns `(value, error)`: `-ln(I/I_ref)/T` and
/// `sqrt((σ_ref/I_ref)² + (σ/I)²)/T`.
pub fn raw_rate_from_two_point(
    time: f64,
    i_ref: f64,
    i: f64,
    i_ref_err: f64,
    i_err: f64,
) -> (f64, f64) {
    let value = -(i / i_ref).ln() / time;
    let error = ((i_ref_err / i_ref).powi(2) + (i_err / i).powi(2)).sqrt() / time;
    (value, error)
}

/// Single-exponential decay `I0 · exp(-r2eff · t)`.
pub fn exponential_decay(i0: f64, r2eff: f64, t: f64) -> f64 {
    i0 * (-r2eff * t).exp()
}
