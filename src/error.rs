use thiserror::Error;

/// Errors raised by distributed arrays and their collective operations.
///
/// Every check that produces one of these depends only on metadata that is
/// replicated across the process group, so all processes fail together.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DArrayError {
    /// Two operands do not have the same global shape
    #[error("Shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// An axis argument is out of range for the array
    #[error("Axis {axis} is out of bounds for array of dimension {ndim}")]
    InvalidAxis { axis: usize, ndim: usize },

    /// Two operands are partitioned along different axes
    #[error("Split mismatch: {left:?} vs {right:?}")]
    SplitMismatch {
        left: Option<usize>,
        right: Option<usize>,
    },

    /// Local shards cannot be combined into a valid global array
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// A reduction was requested over zero elements
    #[error("Cannot compute {0} of an empty selection")]
    EmptyReduction(&'static str),

    /// A global index does not address an existing element
    #[error("Index {index} is out of bounds for axis of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A peer left the process group while a collective was pending
    #[error("Collective aborted: a peer process left the group")]
    CollectiveAborted,

    /// The root of a broadcast did not supply a value
    #[error("Broadcast root {0} did not provide a value")]
    MissingBroadcastValue(usize),

    /// Processes entered the same collective with different payload types
    #[error("Collective payload type mismatch between processes")]
    CollectiveTypeMismatch,
}

/// Error types for the k-medoids estimator
#[derive(Error, Debug)]
pub enum KMedoidsError {
    /// The number of clusters k is invalid (must be > 0)
    #[error("Invalid k value: {0}")]
    InvalidK(String),

    /// The iteration budget is invalid (must be > 0)
    #[error("Invalid max_iter value: {0}")]
    InvalidMaxIter(String),

    /// Unrecognized initialization strategy
    #[error("Invalid init strategy: {0}")]
    InvalidInit(String),

    /// Not enough data points for the requested number of clusters
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Model has not been fitted yet
    #[error("Model has not been fitted. Call fit() first.")]
    NotFitted,

    /// Dimension mismatch between data and model or explicit centers
    #[error("Dimension mismatch: {0}")]
    InvalidDimensions(String),

    /// Input data does not have the expected rank
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failure inside the distributed array layer
    #[error(transparent)]
    Array(#[from] DArrayError),
}
