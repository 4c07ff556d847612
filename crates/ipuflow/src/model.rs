// Model - What the orchestrator needs to know about a host model
//
// A model has a forward signature, named parameters and layers that can be
// cast between precisions. The orchestrator never computes with it: the
// runtime captures it into a graph and the device runs that graph.
//
// SHARED MODELS AND STALENESS:
//
// A training wrapper and an inference wrapper may wrap the same model, each
// with its own device copy of the weights. After a training step the host
// parameters are out of date. Every clone of a ModelRef shares one HostSync,
// and `training_model` installs its device state there:
//
//   ModelRef ─┐
//   ModelRef ─┼──► HostSync { hook: DeviceState of the training wrapper,
//   ModelRef ─┘               refreshes }
//                       │
//      forward() / named_parameters() through any handle
//                       │
//          hook.copy_weights_to_host_if_needed() → refreshes += 1
//
// An inference wrapper resolves the hook before every step and pushes the
// weights to its own device whenever `refreshes` moved since it last looked,
// whichever handle triggered the copy.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use ipuflow_core::{ArgTree, DType, Error, HostTensor, Result};

use crate::args::Signature;
use crate::runtime::Runtime;

/// A group of parameters that is cast between precisions as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    pub name: String,
    pub param_dtypes: Vec<DType>,
}

impl LayerInfo {
    /// The reduced-precision dtype of this layer, if any parameter has one.
    pub fn half_dtype(&self) -> Option<DType> {
        self.param_dtypes.iter().copied().find(DType::is_half)
    }
}

/// A host model that can be captured and compiled.
pub trait Model {
    /// Declared forward parameters, receiver excluded.
    fn signature(&self) -> Signature;

    /// Run the model on the host.
    fn forward(&self, inputs: &[ArgTree]) -> Result<ArgTree>;

    /// Parameters keyed by dotted path (`encoder.linear.weight`).
    fn named_parameters(&self) -> Result<Vec<(String, HostTensor)>>;

    /// Parameters grouped by owning layer: everything before the last `.`
    /// of the parameter path. Top-level parameters belong to layer `""`.
    fn layers(&self) -> Result<Vec<LayerInfo>> {
        let mut layers: BTreeMap<String, Vec<DType>> = BTreeMap::new();
        for (path, param) in self.named_parameters()? {
            let layer = path.rsplit_once('.').map(|(l, _)| l).unwrap_or("");
            layers.entry(layer.to_string()).or_default().push(param.dtype());
        }
        Ok(layers
            .into_iter()
            .map(|(name, param_dtypes)| LayerInfo { name, param_dtypes })
            .collect())
    }

    /// Convert every parameter of `layer` to `dtype`.
    fn cast_layer(&mut self, layer: &str, _dtype: DType) -> Result<()> {
        Err(Error::UnknownLayer {
            name: layer.to_string(),
        })
    }

    /// Staleness state shared with other wrappers of the same model.
    fn host_sync(&self) -> Option<Rc<HostSync>> {
        None
    }
}

/// Something that can bring host weights up to date with a device.
pub trait StalenessResolvable {
    /// Copy device weights back if the host copy is stale. Returns whether a
    /// copy happened.
    fn copy_weights_to_host_if_needed(&self) -> Result<bool>;
}

// HostSync

/// Host staleness of one model, shared by all of its handles.
#[derive(Default)]
pub struct HostSync {
    hook: RefCell<Option<Rc<dyn StalenessResolvable>>>,
    refreshes: Cell<u64>,
}

impl fmt::Debug for HostSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSync")
            .field("installed", &self.is_installed())
            .field("refreshes", &self.refreshes.get())
            .finish()
    }
}

impl HostSync {
    /// Resolve staleness through `hook` from now on, replacing any previous
    /// hook.
    pub fn install(&self, hook: Rc<dyn StalenessResolvable>) {
        *self.hook.borrow_mut() = Some(hook);
    }

    pub fn is_installed(&self) -> bool {
        self.hook.borrow().is_some()
    }

    /// Pull trained weights back if they are stale. Returns whether a copy
    /// happened.
    pub fn resolve(&self) -> Result<bool> {
        let hook = self.hook.borrow().clone();
        let copied = match hook {
            Some(hook) => hook.copy_weights_to_host_if_needed()?,
            None => false,
        };
        if copied {
            self.refreshes.set(self.refreshes.get() + 1);
        }
        Ok(copied)
    }

    /// How many times host weights were refreshed from a device.
    pub fn refreshes(&self) -> u64 {
        self.refreshes.get()
    }
}

// ModelRef

/// Shared handle to a model. Clones see the same weights and the same
/// [`HostSync`].
pub struct ModelRef<M> {
    inner: Rc<RefCell<M>>,
    sync: Rc<HostSync>,
}

impl<M> Clone for ModelRef<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            sync: Rc::clone(&self.sync),
        }
    }
}

impl<M> fmt::Debug for ModelRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRef")
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl<M> ModelRef<M> {
    pub fn new(model: M) -> Self {
        Self {
            inner: Rc::new(RefCell::new(model)),
            sync: Rc::new(HostSync::default()),
        }
    }

    /// Resolve staleness through `hook` before reads, on every handle to
    /// this model.
    pub fn set_host_sync(&self, hook: Rc<dyn StalenessResolvable>) {
        self.sync.install(hook);
    }

    /// Pull trained weights back if they are stale.
    pub fn sync_host(&self) -> Result<bool> {
        self.sync.resolve()
    }

    /// Borrow the model without resolving staleness.
    pub fn borrow(&self) -> Result<Ref<'_, M>> {
        self.inner
            .try_borrow()
            .map_err(|_| Error::msg("model is already mutably borrowed"))
    }

    pub fn borrow_mut(&self) -> Result<RefMut<'_, M>> {
        self.inner
            .try_borrow_mut()
            .map_err(|_| Error::msg("model is already borrowed"))
    }

    /// Whether both handles point at the same model.
    pub fn same_model(&self, other: &ModelRef<M>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<M: Model> Model for ModelRef<M> {
    fn signature(&self) -> Signature {
        match self.borrow() {
            Ok(m) => m.signature(),
            Err(_) => Signature::new(),
        }
    }

    fn forward(&self, inputs: &[ArgTree]) -> Result<ArgTree> {
        self.sync_host()?;
        self.borrow()?.forward(inputs)
    }

    fn named_parameters(&self) -> Result<Vec<(String, HostTensor)>> {
        self.sync_host()?;
        self.borrow()?.named_parameters()
    }

    fn layers(&self) -> Result<Vec<LayerInfo>> {
        self.borrow()?.layers()
    }

    fn cast_layer(&mut self, layer: &str, dtype: DType) -> Result<()> {
        self.borrow_mut()?.cast_layer(layer, dtype)
    }

    fn host_sync(&self) -> Option<Rc<HostSync>> {
        Some(Rc::clone(&self.sync))
    }
}

// DeviceState

/// The device side of one wrapper: its executable and staleness flags.
pub struct DeviceState<R: Runtime> {
    runtime: Rc<R>,
    executable: RefCell<Option<R::Executable>>,
    host_stale: Cell<bool>,
    device_stale: Cell<bool>,
}

impl<R: Runtime> DeviceState<R> {
    pub fn new(runtime: Rc<R>) -> Self {
        Self {
            runtime,
            executable: RefCell::new(None),
            host_stale: Cell::new(false),
            device_stale: Cell::new(false),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn is_compiled(&self) -> bool {
        self.executable.borrow().is_some()
    }

    pub(crate) fn set_executable(&self, executable: R::Executable) {
        *self.executable.borrow_mut() = Some(executable);
    }

    /// Run `f` on the executable, or fail with `NotCompiled`.
    pub fn with_executable<T>(&self, f: impl FnOnce(&R, &R::Executable) -> Result<T>) -> Result<T> {
        let executable = self
            .executable
            .try_borrow()
            .map_err(|_| Error::msg("executable is being replaced"))?;
        match executable.as_ref() {
            Some(exe) => f(&self.runtime, exe),
            None => Err(Error::NotCompiled),
        }
    }

    /// Host weights are older than the device's.
    pub fn host_stale(&self) -> bool {
        self.host_stale.get()
    }

    pub fn mark_host_stale(&self) {
        self.host_stale.set(true);
    }

    /// Device weights are older than the host's.
    pub fn device_stale(&self) -> bool {
        self.device_stale.get()
    }

    pub fn mark_device_stale(&self) {
        self.device_stale.set(true);
    }

    pub fn copy_weights_to_host(&self) -> Result<()> {
        self.with_executable(|rt, exe| rt.copy_weights_to_host(exe))?;
        self.host_stale.set(false);
        Ok(())
    }

    pub fn copy_weights_to_device(&self) -> Result<()> {
        self.with_executable(|rt, exe| rt.copy_weights_to_device(exe))?;
        self.device_stale.set(false);
        Ok(())
    }
}

impl<R: Runtime> StalenessResolvable for DeviceState<R> {
    fn copy_weights_to_host_if_needed(&self) -> Result<bool> {
        if !self.host_stale() {
            return Ok(false);
        }
        debug!("Implicit copyWeightsToHost()");
        self.copy_weights_to_host()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Linear {
        weight: HostTensor,
        bias: HostTensor,
        scale: HostTensor,
    }

    impl Model for Linear {
        fn signature(&self) -> Signature {
            Signature::new().required("x")
        }

        fn forward(&self, inputs: &[ArgTree]) -> Result<ArgTree> {
            Ok(inputs[0].clone())
        }

        fn named_parameters(&self) -> Result<Vec<(String, HostTensor)>> {
            Ok(vec![
                ("fc.weight".into(), self.weight.clone()),
                ("fc.bias".into(), self.bias.clone()),
                ("scale".into(), self.scale.clone()),
            ])
        }
    }

    struct Flag(Cell<bool>, Cell<usize>);

    impl StalenessResolvable for Flag {
        fn copy_weights_to_host_if_needed(&self) -> Result<bool> {
            self.1.set(self.1.get() + 1);
            Ok(self.0.replace(false))
        }
    }

    fn linear() -> Linear {
        Linear {
            weight: HostTensor::zeros((2, 2), DType::F16),
            bias: HostTensor::zeros(2, DType::F32),
            scale: HostTensor::zeros(1, DType::F32),
        }
    }

    #[test]
    fn test_default_layers_group_by_prefix() {
        let layers = linear().layers().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].name, "");
        assert_eq!(layers[0].half_dtype(), None);
        assert_eq!(layers[1].name, "fc");
        assert_eq!(layers[1].half_dtype(), Some(DType::F16));
    }

    #[test]
    fn test_default_cast_layer_is_unknown() {
        let err = linear().cast_layer("fc", DType::F32).unwrap_err();
        assert!(matches!(err, Error::UnknownLayer { name } if name == "fc"));
    }

    #[test]
    fn test_host_sync_is_shared_by_clones() {
        let flag = Rc::new(Flag(Cell::new(true), Cell::new(0)));
        let model = ModelRef::new(linear());
        let alias = model.clone();
        assert!(alias.same_model(&model));

        model.set_host_sync(flag.clone());
        let sync = alias.host_sync().unwrap();
        assert!(sync.is_installed());

        alias.named_parameters().unwrap();
        assert!(!flag.0.get());
        assert_eq!(sync.refreshes(), 1);
        model.forward(&[ArgTree::from(1_i64)]).unwrap();
        assert_eq!(flag.1.get(), 2);
        assert_eq!(sync.refreshes(), 1);
    }

    #[test]
    fn test_model_ref_without_hook_never_syncs() {
        let model = ModelRef::new(linear());
        assert!(!model.sync_host().unwrap());
        assert_eq!(model.host_sync().unwrap().refreshes(), 0);
        assert!(linear().host_sync().is_none());
    }
}
