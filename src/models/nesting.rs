//! Model nesting and equivalence.
//!
//! A fixed table lists, for each complex model, the simpler (nested) models
//! and the analytic equivalents whose converged values can seed it. Parameter
//! transfer is a declared mapping: same-name copy by default, plus explicit
//! one-to-many fan-outs. [`NestingTable::validated`] checks every mapping
//! against the registry once, before any run uses it.

use std::sync::OnceLock;

use crate::domain::Site;
use crate::error::AppError;
use crate::models::{ModelId, Param};

/// How a seed model relates to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Strictly simpler model.
    Nested,
    /// Same functional form, different numerical method.
    Equivalent,
}

/// Candidate seed models for one target, in priority order.
#[derive(Debug)]
pub struct NestingRule {
    pub target: ModelId,
    pub relation: Relation,
    pub sources: &'static [ModelId],
}

/// One source parameter copied into one or more target parameters.
#[derive(Debug)]
pub struct FanOut {
    pub target: ModelId,
    pub from: Param,
    pub to: &'static [Param],
}

/// Outcome of resolving a target against the run's model list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub source: ModelId,
    pub relation: Relation,
}

use ModelId as M;

static RULES: &[NestingRule] = &[
    NestingRule {
        target: M::Lm63ThreeSite,
        relation: Relation::Nested,
        sources: &[M::Lm63],
    },
    NestingRule {
        target: M::Cr72Full,
        relation: Relation::Nested,
        sources: &[M::Cr72],
    },
    NestingRule {
        target: M::MmqCr72,
        relation: Relation::Nested,
        sources: &[M::Cr72],
    },
    NestingRule {
        target: M::NsCpmg2Site3dFull,
        relation: Relation::Nested,
        sources: &[M::NsCpmg2Site3d],
    },
    NestingRule {
        target: M::NsCpmg2SiteStarFull,
        relation: Relation::Nested,
        sources: &[M::NsCpmg2SiteStar],
    },
    NestingRule {
        target: M::NsMmq3SiteLinear,
        relation: Relation::Nested,
        sources: &[M::NsMmq2Site],
    },
    NestingRule {
        target: M::NsMmq3Site,
        relation: Relation::Nested,
        sources: &[M::NsMmq3SiteLinear, M::NsMmq2Site],
    },
    NestingRule {
        target: M::NsR1rho3SiteLinear,
        relation: Relation::Nested,
        sources: &[M::NsR1rho2Site],
    },
    NestingRule {
        target: M::NsR1rho3Site,
        relation: Relation::Nested,
        sources: &[M::NsR1rho3SiteLinear, M::NsR1rho2Site],
    },
    NestingRule {
        target: M::NsCpmg2Site3d,
        relation: Relation::Equivalent,
        sources: &[M::Cr72],
    },
    NestingRule {
        target: M::NsCpmg2SiteExpanded,
        relation: Relation::Equivalent,
        sources: &[M::Cr72],
    },
    NestingRule {
        target: M::NsCpmg2SiteStar,
        relation: Relation::Equivalent,
        sources: &[M::Cr72],
    },
    NestingRule {
        target: M::NsMmq2Site,
        relation: Relation::Equivalent,
        sources: &[M::MmqCr72],
    },
    NestingRule {
        target: M::NsR1rho2Site,
        relation: Relation::Equivalent,
        sources: &[M::Mp05],
    },
];

const R20_SPLIT: &[Param] = &[Param::R2a, Param::R2b];

static FAN_OUTS: &[FanOut] = &[
    FanOut {
        target: M::Cr72Full,
        from: Param::R2,
        to: R20_SPLIT,
    },
    FanOut {
        target: M::NsCpmg2Site3dFull,
        from: Param::R2,
        to: R20_SPLIT,
    },
    FanOut {
        target: M::NsCpmg2SiteStarFull,
        from: Param::R2,
        to: R20_SPLIT,
    },
    FanOut {
        target: M::Lm63ThreeSite,
        from: Param::PhiEx,
        to: &[Param::PhiExB, Param::PhiExC],
    },
    FanOut {
        target: M::Lm63ThreeSite,
        from: Param::Kex,
        to: &[Param::KB, Param::KC],
    },
];

/// The validated nesting table.
#[derive(Debug)]
pub struct NestingTable {
    rules: &'static [NestingRule],
    fan_outs: &'static [FanOut],
}

static TABLE: OnceLock<Result<NestingTable, String>> = OnceLock::new();

impl NestingTable {
    /// The built-in table, validated against the registry on first use.
    pub fn validated() -> Result<&'static NestingTable, AppError> {
        TABLE
            .get_or_init(|| {
                let table = NestingTable {
                    rules: RULES,
                    fan_outs: FAN_OUTS,
                };
                table.check().map(|_| table)
            })
            .as_ref()
            .map_err(|msg| AppError::invalid(msg.clone()))
    }

    fn check(&self) -> Result<(), String> {
        for rule in self.rules {
            if rule.sources.contains(&rule.target) {
                return Err(format!("Model '{}' cannot seed itself.", rule.target));
            }
            if rule.target == ModelId::R2eff || rule.sources.contains(&ModelId::R2eff) {
                return Err("The R2eff model takes no part in nesting.".to_string());
            }
            let dup = self
                .rules
                .iter()
                .filter(|r| r.target == rule.target && r.relation == rule.relation)
                .count();
            if dup > 1 {
                return Err(format!("Duplicate nesting rule for '{}'.", rule.target));
            }
        }
        for f in self.fan_outs {
            let target_params = f.target.model().params;
            if let Some(bad) = f.to.iter().find(|p| !target_params.contains(p)) {
                return Err(format!(
                    "Fan-out destination '{bad}' is not a parameter of '{}'.",
                    f.target
                ));
            }
            let seeded_by_source = self
                .rules
                .iter()
                .filter(|r| r.target == f.target)
                .flat_map(|r| r.sources.iter())
                .any(|s| s.model().params.contains(&f.from));
            if !seeded_by_source {
                return Err(format!(
                    "Fan-out source '{}' for '{}' is not provided by any seed model.",
                    f.from, f.target
                ));
            }
        }
        Ok(())
    }

    /// Pick the seed model for `target` among `run_models`.
    ///
    /// Nested predecessors win over equivalence partners; within a rule the
    /// first listed source present in the run wins.
    pub fn resolve(&self, target: ModelId, run_models: &[ModelId]) -> Option<Resolution> {
        for relation in [Relation::Nested, Relation::Equivalent] {
            let found = self
                .rules
                .iter()
                .filter(|r| r.target == target && r.relation == relation)
                .flat_map(|r| r.sources.iter())
                .find(|s| run_models.contains(s));
            if let Some(&source) = found {
                return Some(Resolution { source, relation });
            }
        }
        None
    }

    /// Parameter transfer list `(source param, target param)` for a seed.
    ///
    /// Fan-outs replace the same-name copy for their source parameter. Target
    /// parameters without a counterpart are not listed.
    pub fn mapping(&self, target: ModelId, source: ModelId) -> Vec<(Param, Param)> {
        let source_params = source.model().params;
        let fans: Vec<&FanOut> = self
            .fan_outs
            .iter()
            .filter(|f| f.target == target && source_params.contains(&f.from))
            .collect();

        let mut out = Vec::new();
        for &p in target.model().params {
            if let Some(f) = fans.iter().find(|f| f.to.contains(&p)) {
                out.push((f.from, p));
            } else if source_params.contains(&p) && !fans.iter().any(|f| f.from == p) {
                out.push((p, p));
            }
        }
        out
    }

    /// Copy `source`'s converged values onto `target` following [`Self::mapping`].
    ///
    /// Every slot of a per-field parameter is copied. Returns the number of
    /// values written.
    pub fn copy_parameters(
        &self,
        target_model: ModelId,
        source_model: ModelId,
        target: &mut Site,
        source: &Site,
    ) -> usize {
        let mut written = 0;
        for (from, to) in self.mapping(target_model, source_model) {
            let values: Vec<_> = source
                .values_of(from)
                .map(|(k, v)| (k.slot, *v))
                .collect();
            for (slot, v) in values {
                target.set_value(crate::domain::ParamKey { param: to, slot }, v);
                written += 1;
            }
        }
        written
    }
}
