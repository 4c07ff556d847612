// Optimizer - Host optimizer settings and their device-facing descriptor
//
// The device runs the optimizer itself; the host only describes it. A
// HostOptimizer is the host-side description (family name plus parameter
// groups of hyper-parameters, as a training loop would build it). The
// device receives an OptimizerDescriptor:
//
//   { kind: Sgd | Adam, "lr": (0.01, false), "momentum": (0.0, true), ... }
//
// Each value is paired with a flag saying it still equals the family
// default. The runtime treats flagged values as compile-time constants.
// The learning rate is never flagged: it is the value most often changed
// between steps.
//
// Descriptors compare by value. The orchestrator only pushes a new one to
// the device when it differs from the last one pushed.

use std::collections::BTreeMap;

use serde::Serialize;

use ipuflow_core::{Error, Result};

const SGD: &str = "sgd";
const ADAM: &str = "adam";

/// A hyper-parameter value in a parameter group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HyperParameter {
    Float(f64),
    Pair(f64, f64),
    Bool(bool),
}

impl From<f64> for HyperParameter {
    fn from(v: f64) -> Self {
        HyperParameter::Float(v)
    }
}

impl From<(f64, f64)> for HyperParameter {
    fn from((a, b): (f64, f64)) -> Self {
        HyperParameter::Pair(a, b)
    }
}

impl From<bool> for HyperParameter {
    fn from(v: bool) -> Self {
        HyperParameter::Bool(v)
    }
}

/// Hyper-parameters applying to one group of model parameters.
pub type ParamGroup = BTreeMap<String, HyperParameter>;

/// A host-side optimizer description.
#[derive(Debug, Clone, PartialEq)]
pub struct HostOptimizer {
    family: String,
    param_groups: Vec<ParamGroup>,
}

impl HostOptimizer {
    /// An optimizer of an arbitrary family with a single empty group.
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            param_groups: vec![ParamGroup::new()],
        }
    }

    /// Stochastic gradient descent. Momentum, dampening and weight decay
    /// start at 0.
    pub fn sgd(lr: f64) -> Self {
        Self::new(SGD)
            .with("lr", lr)
            .with("momentum", 0.0)
            .with("dampening", 0.0)
            .with("weight_decay", 0.0)
            .with("nesterov", false)
    }

    /// Adam with betas (0.9, 0.999) and eps 1e-8.
    pub fn adam(lr: f64) -> Self {
        Self::new(ADAM)
            .with("lr", lr)
            .with("betas", (0.9, 0.999))
            .with("eps", 1e-8)
            .with("weight_decay", 0.0)
            .with("amsgrad", false)
    }

    /// Set a hyper-parameter on every group.
    pub fn with(mut self, name: &str, value: impl Into<HyperParameter>) -> Self {
        let value = value.into();
        for group in &mut self.param_groups {
            group.insert(name.to_string(), value);
        }
        self
    }

    pub fn with_momentum(self, momentum: f64) -> Self {
        self.with("momentum", momentum)
    }

    pub fn with_dampening(self, dampening: f64) -> Self {
        self.with("dampening", dampening)
    }

    pub fn with_weight_decay(self, weight_decay: f64) -> Self {
        self.with("weight_decay", weight_decay)
    }

    pub fn with_betas(self, beta1: f64, beta2: f64) -> Self {
        self.with("betas", (beta1, beta2))
    }

    pub fn with_eps(self, eps: f64) -> Self {
        self.with("eps", eps)
    }

    pub fn with_amsgrad(self, amsgrad: bool) -> Self {
        self.with("amsgrad", amsgrad)
    }

    /// Add a further parameter group (a copy of the first one, overridden
    /// by `overrides`).
    pub fn add_param_group(mut self, overrides: ParamGroup) -> Self {
        let mut group = self.param_groups.first().cloned().unwrap_or_default();
        group.extend(overrides);
        self.param_groups.push(group);
        self
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn param_groups(&self) -> &[ParamGroup] {
        &self.param_groups
    }
}

/// Optimizer families the device knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OptimizerType {
    Sgd = 0,
    Adam = 1,
}

/// Device-facing optimizer description: `name → (value, is_default)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizerDescriptor {
    kind: OptimizerType,
    params: BTreeMap<String, (f64, bool)>,
}

impl OptimizerDescriptor {
    /// Convert a host optimizer.
    ///
    /// Fails if there is more than one parameter group, if the family is
    /// neither SGD nor Adam, or for AMSGrad Adam.
    pub fn from_optimizer(optimizer: &HostOptimizer) -> Result<Self> {
        let group = match optimizer.param_groups() {
            [group] => group,
            groups => {
                return Err(Error::MultipleParamGroups {
                    count: groups.len(),
                })
            }
        };
        let family = optimizer.family();
        if family != SGD && family != ADAM {
            return Err(Error::UnsupportedOptimizer {
                family: family.to_string(),
            });
        }
        let float = |name: &str| match group.get(name) {
            Some(HyperParameter::Float(v)) => Ok(*v),
            _ => Err(Error::MissingHyperParameter {
                family: family.to_string(),
                name: name.to_string(),
            }),
        };

        let lr = float("lr")?;
        let weight_decay = float("weight_decay")?;

        let mut params = BTreeMap::new();
        let kind = match family {
            SGD => {
                let momentum = float("momentum")?;
                let dampening = float("dampening")?;
                params.insert("momentum".to_string(), (momentum, momentum == 0.0));
                params.insert("dampening".to_string(), (dampening, dampening == 0.0));
                OptimizerType::Sgd
            }
            ADAM => {
                let (beta1, beta2) = match group.get("betas") {
                    Some(HyperParameter::Pair(b1, b2)) => (*b1, *b2),
                    _ => {
                        return Err(Error::MissingHyperParameter {
                            family: family.to_string(),
                            name: "betas".to_string(),
                        })
                    }
                };
                let eps = float("eps")?;
                if let Some(HyperParameter::Bool(true)) = group.get("amsgrad") {
                    return Err(Error::UnsupportedOptimizerVariant {
                        family: family.to_string(),
                        variant: "amsgrad".to_string(),
                    });
                }
                params.insert("beta1".to_string(), (beta1, false));
                params.insert("beta2".to_string(), (beta2, false));
                params.insert("eps".to_string(), (eps, eps == 1e-08));
                OptimizerType::Adam
            }
            other => {
                return Err(Error::UnsupportedOptimizer {
                    family: other.to_string(),
                })
            }
        };
        params.insert("lr".to_string(), (lr, false));
        params.insert("weight_decay".to_string(), (weight_decay, weight_decay == 0.0));

        Ok(Self { kind, params })
    }

    pub fn kind(&self) -> OptimizerType {
        self.kind
    }

    /// `(value, is_default)` for a hyper-parameter.
    pub fn get(&self, name: &str) -> Option<(f64, bool)> {
        self.params.get(name).copied()
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, (f64, bool))> {
        self.params.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
