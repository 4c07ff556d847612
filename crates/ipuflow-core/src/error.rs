use crate::dtype::DType;
use crate::shape::Shape;

/// All errors raised by ipuflow.
///
/// Every variant except [`Error::Runtime`] is a programmer or configuration
/// error: it is raised synchronously, before or instead of any device
/// interaction, and nothing in the library retries it. Failures of the
/// external compiler/runtime are carried through unchanged in
/// [`Error::Runtime`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Host tensors
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    #[error("narrow out of bounds: dim {dim}, start {start}, len {len}, dim_size {dim_size}")]
    NarrowOutOfBounds {
        dim: usize,
        start: usize,
        len: usize,
        dim_size: usize,
    },

    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("value is not representable as {dtype}")]
    UnrepresentableValue { dtype: DType },

    // Options
    #[error("invalid option {option}, valid options are {valid:?}")]
    InvalidOption { option: String, valid: Vec<String> },

    #[error("unexpected type {got} for option {option}, expected {expected}")]
    TypeMismatch {
        option: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("an anchor mode must be picked before serialisation")]
    UnresolvedAnchorMode,

    #[error("EveryN anchor must have anchor_return_period set to a valid positive integer")]
    InvalidAnchorReturnPeriod,

    #[error("can't merge options, they have some keys in common: {keys:?}")]
    OptionKeyConflict { keys: Vec<String> },

    // Argument binding
    #[error("too many arguments provided: expected {expected:?} ({}) but got {got}", .expected.len())]
    TooManyArguments { expected: Vec<String>, got: usize },

    #[error("parameter {name} was passed more than once")]
    DuplicateArgument { name: String },

    #[error("unexpected keyword argument {name}")]
    UnexpectedKeywordArgument { name: String },

    #[error("mandatory parameter {name} missing")]
    MissingMandatoryArgument { name: String },

    #[error(
        "cannot pass {name}: tensors can't be passed after the following parameters \
         have defaulted to None: {}",
        .defaulted.join(", ")
    )]
    TrailingTensorAfterNone { name: String, defaulted: Vec<String> },

    // Batching
    #[error(
        "invalid batch dimension: in the input {shape}, the batch dimension ({batch_size}) \
         must be a multiple of device_iterations({device_iterations}) * \
         replication_factor({replication_factor}) * \
         gradient_accumulation({gradient_accumulation}) = {multiplier} because it is used \
         to calculate the batch size which will be executed on the device in any given iteration"
    )]
    BatchDimension {
        shape: Shape,
        batch_size: usize,
        device_iterations: usize,
        replication_factor: usize,
        gradient_accumulation: usize,
        multiplier: usize,
    },

    #[error(
        "device_iterations({device_iterations}) * replication_factor({replication_factor}) * \
         gradient_accumulation({gradient_accumulation}) overflows the batch multiplier"
    )]
    BatchMultiplierOverflow {
        device_iterations: usize,
        replication_factor: usize,
        gradient_accumulation: usize,
    },

    // Optimizers
    #[error("unsupported optimizer type {family}, supported types are [sgd, adam]")]
    UnsupportedOptimizer { family: String },

    #[error("only one parameter group is supported (all parameters), got {count}")]
    MultipleParamGroups { count: usize },

    #[error("{variant} is not supported for {family} optimizers")]
    UnsupportedOptimizerVariant { family: String, variant: String },

    #[error("{family} optimizer is missing hyper-parameter {name}")]
    MissingHyperParameter { family: String, name: String },

    // Execution
    #[error("the model has not been compiled yet")]
    NotCompiled,

    #[error("unknown layer {name}")]
    UnknownLayer { name: String },

    #[error("unsupported reduction type {name}")]
    UnsupportedReduction { name: String },

    /// A failure reported by the external compiler/runtime, passed through
    /// untouched.
    #[error("runtime error: {0}")]
    Runtime(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{0}")]
    Msg(String),
}

impl Error {
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Wrap an error coming out of the external compiler/runtime.
    pub fn runtime(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Runtime(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted [`Error::Msg`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
