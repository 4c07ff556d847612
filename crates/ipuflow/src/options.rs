// Options - Layered configuration for compiling and running a model
//
// Options are assembled on the host before the first call and flattened into
// one key → value mapping when the model is compiled.
//
//   set()           only updates keys declared when the store was built, and
//                   only with a value of the same type.
//   create_or_set() declares the key on first use and behaves like set()
//                   afterwards. Used for optional knobs (ipu_id, pipelining).
//
// LAYOUT:
//
//   Options            top-level device/batching/anchoring settings
//     ├── jit          trace vs script frontend (never serialised)
//     ├── training     gradient accumulation
//     └── popart       free-form backend passthrough
//
// `to_dict()` merges popart, top-level and training keys into a single
// mapping and refuses to serialise while the anchor mode is still Default:
// the wrapper constructors resolve it to Final (training) or All (inference).

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use ipuflow_core::{Error, Result};

/// A single option value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl OptionValue {
    /// Type name used in mismatch diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Int(_) => "int",
            OptionValue::Float(_) => "float",
            OptionValue::Str(_) => "str",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            OptionValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        OptionValue::Int(i)
    }
}

impl From<u32> for OptionValue {
    fn from(i: u32) -> Self {
        OptionValue::Int(i64::from(i))
    }
}

impl From<f64> for OptionValue {
    fn from(f: f64) -> Self {
        OptionValue::Float(f)
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Str(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Str(s)
    }
}

// OptionsDict

/// Lockable option store: only declared keys can be `set`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsDict {
    values: BTreeMap<String, OptionValue>,
}

impl OptionsDict {
    /// Store whose declared keys are exactly `defaults`.
    pub fn with_defaults<K, V>(defaults: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<OptionValue>,
    {
        Self {
            values: defaults
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Update a declared key. The new value must have the type of the
    /// current one.
    pub fn set(&mut self, option: &str, value: impl Into<OptionValue>) -> Result<()> {
        let value = value.into();
        let current = self.get(option)?;
        if current.type_name() != value.type_name() {
            return Err(Error::TypeMismatch {
                option: option.to_string(),
                expected: current.type_name(),
                got: value.type_name(),
            });
        }
        self.values.insert(option.to_string(), value);
        Ok(())
    }

    /// Declare `option` if unknown, otherwise `set` it.
    pub fn create_or_set(&mut self, option: &str, value: impl Into<OptionValue>) -> Result<()> {
        if self.contains(option) {
            self.set(option, value)
        } else {
            self.values.insert(option.to_string(), value.into());
            Ok(())
        }
    }

    pub fn get(&self, option: &str) -> Result<&OptionValue> {
        self.values.get(option).ok_or_else(|| Error::InvalidOption {
            option: option.to_string(),
            valid: self.values.keys().cloned().collect(),
        })
    }

    pub fn contains(&self, option: &str) -> bool {
        self.values.contains_key(option)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy every entry into `out`, failing if any key is already present.
    fn merge_into(&self, out: &mut BTreeMap<String, OptionValue>) -> Result<()> {
        let common: Vec<String> = self
            .values
            .keys()
            .filter(|k| out.contains_key(*k))
            .cloned()
            .collect();
        if !common.is_empty() {
            return Err(Error::OptionKeyConflict { keys: common });
        }
        out.extend(self.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn int(&self, option: &str) -> i64 {
        self.values.get(option).and_then(OptionValue::as_int).unwrap_or_default()
    }

    fn bool(&self, option: &str) -> bool {
        self.values.get(option).and_then(OptionValue::as_bool).unwrap_or_default()
    }
}

// Enumerated options

/// How much of the per-iteration output the runtime hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorMode {
    /// Return the last batch.
    Final,
    /// Return every N batches; N is the anchor return period.
    EveryN,
    /// Return a result for each batch.
    All,
    /// Return the sum of all the batches.
    Sum,
    /// Unresolved: All for inference, Final for training.
    Default,
}

impl AnchorMode {
    pub fn code(self) -> i64 {
        match self {
            AnchorMode::Final => 0,
            AnchorMode::EveryN => 1,
            AnchorMode::All => 2,
            AnchorMode::Sum => 3,
            AnchorMode::Default => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => AnchorMode::Final,
            1 => AnchorMode::EveryN,
            2 => AnchorMode::All,
            3 => AnchorMode::Sum,
            4 => AnchorMode::Default,
            _ => return None,
        })
    }
}

/// When to attach to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Attach from the start.
    Always,
    /// Attach once the executable is ready to run.
    OnDemand,
    /// Never attach. Compilation still happens (offline artifacts) but
    /// nothing is executed.
    Never,
}

impl ConnectionType {
    pub fn code(self) -> i64 {
        match self {
            ConnectionType::Always => 0,
            ConnectionType::OnDemand => 1,
            ConnectionType::Never => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => ConnectionType::Always,
            1 => ConnectionType::OnDemand,
            2 => ConnectionType::Never,
            _ => return None,
        })
    }
}

/// Synchronisation pattern between IPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPattern {
    Full,
    SinglePipeline,
    PingPong,
}

impl SyncPattern {
    pub fn code(self) -> i64 {
        match self {
            SyncPattern::Full => 0,
            SyncPattern::SinglePipeline => 1,
            SyncPattern::PingPong => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => SyncPattern::Full,
            1 => SyncPattern::SinglePipeline,
            2 => SyncPattern::PingPong,
            _ => return None,
        })
    }
}

// Sub-groups

/// Options for the graph-capture frontend.
#[derive(Debug, Clone, PartialEq)]
pub struct JitOptions {
    values: OptionsDict,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            values: OptionsDict::with_defaults([("trace_model", true)]),
        }
    }
}

impl JitOptions {
    /// `true`: capture by tracing. `false`: capture by scripting.
    pub fn trace_model(&self) -> bool {
        self.values.bool("trace_model")
    }

    pub fn set_trace_model(&mut self, trace_model: bool) -> &mut Self {
        self.values.values.insert("trace_model".into(), trace_model.into());
        self
    }

    pub fn dict(&self) -> &OptionsDict {
        &self.values
    }
}

/// Options that only matter when training.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOptions {
    values: OptionsDict,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            values: OptionsDict::with_defaults([("gradient_accumulation", 1_i64)]),
        }
    }
}

impl TrainingOptions {
    pub fn gradient_accumulation(&self) -> i64 {
        self.values.int("gradient_accumulation")
    }

    pub fn set_gradient_accumulation(&mut self, gradient_accumulation: u32) -> &mut Self {
        self.values
            .values
            .insert("gradient_accumulation".into(), gradient_accumulation.into());
        self
    }

    pub fn dict(&self) -> &OptionsDict {
        &self.values
    }
}

/// Free-form options forwarded to the backend. Advanced users only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopartOptions {
    values: OptionsDict,
}

impl PopartOptions {
    pub fn set(&mut self, key: &str, value: impl Into<OptionValue>) -> &mut Self {
        self.values.values.insert(key.to_string(), value.into());
        self
    }

    pub fn dict(&self) -> &OptionsDict {
        &self.values
    }
}

// Options

/// The complete configuration of one model wrapper.
///
/// Built fluently before the first call:
///
/// ```
/// use ipuflow::options::{AnchorMode, Options};
///
/// let opts = Options::new()
///     .with_device_iterations(4)
///     .with_replication_factor(2)
///     .with_anchor_mode(AnchorMode::EveryN, Some(2))
///     .unwrap();
/// assert_eq!(opts.device_iterations(), 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    values: OptionsDict,
    jit: JitOptions,
    training: TrainingOptions,
    popart: PopartOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    pub fn new() -> Self {
        let values = OptionsDict::with_defaults([
            ("replication_factor", OptionValue::Int(1)),
            ("device_iterations", OptionValue::Int(1)),
            ("log_dir", OptionValue::from(".")),
            ("profile", OptionValue::Bool(false)),
            ("anchor_mode", OptionValue::Int(AnchorMode::Default.code())),
            ("anchor_return_period", OptionValue::Int(1)),
            ("use_model", OptionValue::Bool(false)),
            (
                "connection_type",
                OptionValue::Int(ConnectionType::Always.code()),
            ),
            ("sync_pattern", OptionValue::Int(SyncPattern::Full.code())),
        ]);
        Self {
            values,
            jit: JitOptions::default(),
            training: TrainingOptions::default(),
            popart: PopartOptions::default(),
        }
    }

    // Raw access

    /// Update a declared top-level option. See [`OptionsDict::set`].
    pub fn set(&mut self, option: &str, value: impl Into<OptionValue>) -> Result<&mut Self> {
        self.values.set(option, value)?;
        Ok(self)
    }

    /// Declare or update a top-level option. See
    /// [`OptionsDict::create_or_set`].
    pub fn create_or_set(
        &mut self,
        option: &str,
        value: impl Into<OptionValue>,
    ) -> Result<&mut Self> {
        self.values.create_or_set(option, value)?;
        Ok(self)
    }

    pub fn get(&self, option: &str) -> Result<&OptionValue> {
        self.values.get(option)
    }

    pub fn jit(&self) -> &JitOptions {
        &self.jit
    }

    pub fn jit_mut(&mut self) -> &mut JitOptions {
        &mut self.jit
    }

    pub fn training(&self) -> &TrainingOptions {
        &self.training
    }

    pub fn training_mut(&mut self) -> &mut TrainingOptions {
        &mut self.training
    }

    pub fn popart(&self) -> &PopartOptions {
        &self.popart
    }

    pub fn popart_mut(&mut self) -> &mut PopartOptions {
        &mut self.popart
    }

    // Typed accessors

    pub fn device_iterations(&self) -> i64 {
        self.values.int("device_iterations")
    }

    pub fn replication_factor(&self) -> i64 {
        self.values.int("replication_factor")
    }

    pub fn gradient_accumulation(&self) -> i64 {
        self.training.gradient_accumulation()
    }

    /// `None` if the stored code was overwritten with something unknown
    /// through raw [`set`](Self::set).
    pub fn anchor_mode(&self) -> Option<AnchorMode> {
        AnchorMode::from_code(self.values.int("anchor_mode"))
    }

    pub fn anchor_return_period(&self) -> i64 {
        self.values.int("anchor_return_period")
    }

    /// Whether the anchor mode is still the unresolved Default.
    pub fn is_default_anchor_mode(&self) -> bool {
        self.anchor_mode() == Some(AnchorMode::Default)
    }

    pub fn connection_type(&self) -> Option<ConnectionType> {
        ConnectionType::from_code(self.values.int("connection_type"))
    }

    pub fn sync_pattern(&self) -> Option<SyncPattern> {
        SyncPattern::from_code(self.values.int("sync_pattern"))
    }

    pub fn uses_ipu_model(&self) -> bool {
        self.values.bool("use_model")
    }

    pub fn trace_model(&self) -> bool {
        self.jit.trace_model()
    }

    // Fluent setters

    /// Number of iterations run on the device per execution (default 1).
    pub fn with_device_iterations(mut self, device_iterations: u32) -> Self {
        self.put("device_iterations", device_iterations);
        self
    }

    /// Number of model replicas (default 1). A model using one IPU with a
    /// replication factor of 2 uses 2 IPUs.
    pub fn with_replication_factor(mut self, replication_factor: u32) -> Self {
        self.put("replication_factor", replication_factor);
        self
    }

    pub fn with_gradient_accumulation(mut self, gradient_accumulation: u32) -> Self {
        self.training.set_gradient_accumulation(gradient_accumulation);
        self
    }

    /// Where to save log files (default: current directory).
    pub fn with_log_dir(mut self, log_dir: impl Into<String>) -> Self {
        self.put("log_dir", log_dir.into());
        self
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.put("profile", profile);
        self
    }

    /// Run on the IPU model simulator instead of hardware.
    pub fn with_ipu_model(mut self, use_model: bool) -> Self {
        self.put("use_model", use_model);
        self
    }

    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.put("connection_type", connection_type.code());
        self
    }

    pub fn with_sync_pattern(mut self, sync_pattern: SyncPattern) -> Self {
        self.put("sync_pattern", sync_pattern.code());
        self
    }

    /// Use the IPU id reported by the device manager. The id must cover the
    /// number of IPUs used by the graph times the replication factor.
    ///
    /// Fails with `TypeMismatch` if `ipu_id` was already declared with
    /// another type through [`create_or_set`](Self::create_or_set).
    pub fn with_ipu_id(mut self, ipu_id: u32) -> Result<Self> {
        self.create_or_set("ipu_id", ipu_id)?;
        Ok(self)
    }

    /// Compile for an offline IPU target of the given version. Implies
    /// [`ConnectionType::Never`].
    pub fn with_offline_ipu_target(self, ipu_version: u32) -> Result<Self> {
        let mut opts = self.with_connection_type(ConnectionType::Never);
        opts.create_or_set("ipu_version", ipu_version)?;
        Ok(opts)
    }

    pub fn with_pipelining(mut self, enable_pipelining: bool) -> Result<Self> {
        self.create_or_set("enable_pipelining", enable_pipelining)?;
        Ok(self)
    }

    pub fn with_random_seed(mut self, random_seed: u32) -> Result<Self> {
        self.create_or_set("random_seed", random_seed)?;
        Ok(self)
    }

    pub fn with_trace_model(mut self, trace_model: bool) -> Self {
        self.jit.set_trace_model(trace_model);
        self
    }

    pub fn with_popart_option(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.popart.set(key, value);
        self
    }

    /// Choose how much data the runtime returns. See
    /// [`set_anchor_mode`](Self::set_anchor_mode).
    pub fn with_anchor_mode(
        mut self,
        anchor_mode: AnchorMode,
        return_period: Option<u32>,
    ) -> Result<Self> {
        self.set_anchor_mode(anchor_mode, return_period)?;
        Ok(self)
    }

    /// Choose how much data the runtime returns.
    ///
    /// `EveryN` requires a positive `return_period`. Any other mode ignores
    /// the period (stored as 1) and says so at info level.
    pub fn set_anchor_mode(
        &mut self,
        anchor_mode: AnchorMode,
        return_period: Option<u32>,
    ) -> Result<&mut Self> {
        let period = match (anchor_mode, return_period) {
            (AnchorMode::EveryN, Some(period)) if period > 0 => period,
            (AnchorMode::EveryN, _) => return Err(Error::InvalidAnchorReturnPeriod),
            (mode, Some(period)) if period != 0 => {
                info!(
                    "Anchor return period argument ignored with anchor_mode set to {:?}",
                    mode
                );
                1
            }
            _ => 1,
        };
        self.put("anchor_mode", anchor_mode.code());
        self.put("anchor_return_period", period);
        Ok(self)
    }

    /// Overwrite a key declared in [`Options::new`] with a value of its
    /// declared type. `set` keeps those types fixed, so the check is skipped.
    fn put(&mut self, option: &str, value: impl Into<OptionValue>) {
        self.values.values.insert(option.to_string(), value.into());
    }

    /// Flatten popart, top-level and training options into one mapping for
    /// the compiler. JIT options are frontend-only and are left out.
    pub fn to_dict(&self) -> Result<FlatOptions> {
        if self.is_default_anchor_mode() {
            return Err(Error::UnresolvedAnchorMode);
        }
        let mut out = BTreeMap::new();
        self.popart.values.merge_into(&mut out)?;
        self.values.merge_into(&mut out)?;
        self.training.values.merge_into(&mut out)?;
        Ok(FlatOptions(out))
    }
}

/// Options flattened for the compiler boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FlatOptions(BTreeMap<String, OptionValue>);

impl FlatOptions {
    pub fn get(&self, option: &str) -> Option<&OptionValue> {
        self.0.get(option)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON object form, as consumed by backends that take a serialised
    /// option string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::msg(format!("serialising options: {e}")))
    }
}
