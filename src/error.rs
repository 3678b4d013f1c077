use std::path::PathBuf;

/// Errors from forest training, prediction, and persistence.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when num_trees is zero.
    #[error("num_trees must be at least 1, got {num_trees}")]
    InvalidTreeCount {
        /// The invalid num_trees value provided.
        num_trees: usize,
    },

    /// Returned when alpha is outside (0, 0.25].
    #[error("alpha must be in (0, 0.25], got {alpha}")]
    InvalidAlpha {
        /// The invalid alpha value provided.
        alpha: f64,
    },

    /// Returned when sample_fraction is outside (0, 1].
    #[error("sample_fraction must be in (0.0, 1.0], got {sample_fraction}")]
    InvalidSampleFraction {
        /// The invalid sample_fraction value provided.
        sample_fraction: f64,
    },

    /// Returned when ci_group_size is zero or does not divide num_trees.
    #[error("ci_group_size {ci_group_size} must be at least 1 and divide num_trees {num_trees}")]
    InvalidCiGroupSize {
        /// The invalid ci_group_size value provided.
        ci_group_size: usize,
        /// The configured number of trees.
        num_trees: usize,
    },

    /// Returned when mtry resolves to 0 or exceeds the number of feature columns.
    #[error("mtry resolved to {mtry}, but must be in [1, {num_features}]")]
    InvalidMtry {
        /// The resolved mtry value.
        mtry: usize,
        /// The number of feature columns (excluding the outcome).
        num_features: usize,
    },

    /// Returned when min_node_size is zero.
    #[error("min_node_size must be at least 1, got {min_node_size}")]
    InvalidMinNodeSize {
        /// The invalid min_node_size value provided.
        min_node_size: usize,
    },

    /// Returned when imbalance_penalty is negative.
    #[error("imbalance_penalty must be non-negative, got {imbalance_penalty}")]
    InvalidImbalancePenalty {
        /// The invalid imbalance_penalty value provided.
        imbalance_penalty: f64,
    },

    /// Returned when the training dataset has zero rows or zero columns.
    #[error("training data has zero rows or zero columns")]
    EmptyData,

    /// Returned when no outcome column has been designated on the data.
    #[error("no outcome column designated on the training data")]
    MissingOutcome,

    /// Returned when the outcome column index is out of range.
    #[error("outcome index {outcome_index} out of range for {num_cols} columns")]
    OutcomeIndexOutOfRange {
        /// The offending outcome column index.
        outcome_index: usize,
        /// The number of columns in the data.
        num_cols: usize,
    },

    /// Returned when an outcome value is NaN or infinite.
    #[error("non-finite outcome at row {row}")]
    NonFiniteOutcome {
        /// The zero-based row of the offending outcome.
        row: usize,
    },

    /// Returned when a feature value is infinite. NaN denotes missingness
    /// and is allowed.
    #[error("infinite feature value at row {row}, column {col}")]
    InfiniteFeature {
        /// The zero-based row of the offending value.
        row: usize,
        /// The zero-based column of the offending value.
        col: usize,
    },

    /// Returned when a dense value buffer does not match rows x cols.
    #[error("dense storage holds {got} values, expected {expected}")]
    ShapeMismatch {
        /// The expected number of values (rows x cols).
        expected: usize,
        /// The actual buffer length.
        got: usize,
    },

    /// Returned when a CSC buffer triple is internally inconsistent.
    #[error("invalid sparse layout: {reason}")]
    InvalidSparseLayout {
        /// Human-readable description of the inconsistency.
        reason: String,
    },

    /// Returned when the cluster vector length does not match the row count.
    #[error("clusters has {got} entries, expected one per row ({expected})")]
    ClusterLengthMismatch {
        /// The number of rows in the data.
        expected: usize,
        /// The actual cluster vector length.
        got: usize,
    },

    /// Returned when clustering is enabled with samples_per_cluster of zero.
    #[error("samples_per_cluster must be at least 1 when clusters are provided")]
    InvalidSamplesPerCluster,

    /// Returned when the sample weight vector does not match the draw-unit count.
    #[error("sample_weights has {got} entries, expected {expected}")]
    SampleWeightLengthMismatch {
        /// The number of draw units (rows, or clusters when clustering).
        expected: usize,
        /// The actual weight vector length.
        got: usize,
    },

    /// Returned when sample weights are negative, non-finite, or sum to zero.
    #[error("sample_weights must be non-negative, finite, and not all zero")]
    InvalidSampleWeights,

    /// Returned when prediction data has a different column count than the
    /// data the forest was trained on.
    #[error("prediction data has {got} columns, expected {expected}")]
    QueryShapeMismatch {
        /// The column count of the training data.
        expected: usize,
        /// The column count of the prediction data.
        got: usize,
    },

    /// Returned when no ridge penalty values are supplied.
    #[error("at least one ridge penalty value is required")]
    EmptyLambdas,

    /// Returned when a linear correction variable is out of range or is the
    /// outcome column.
    #[error("linear correction variable {var} invalid for {num_cols} columns")]
    InvalidCorrectionVariable {
        /// The offending column index.
        var: usize,
        /// The number of columns in the data.
        num_cols: usize,
    },

    /// Returned when the worker pool could not be constructed.
    #[error("failed to build worker pool")]
    ThreadPool {
        /// The underlying rayon error.
        source: rayon::ThreadPoolBuildError,
    },

    /// Returned when forest serialization fails.
    #[error("failed to serialize forest")]
    SerializeForest {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when forest deserialization fails.
    #[error("failed to deserialize forest")]
    DeserializeForest {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when writing the forest file fails.
    #[error("failed to write forest to {path}")]
    WriteForest {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the forest file fails.
    #[error("failed to read forest from {path}")]
    ReadForest {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when loading a forest with an incompatible format version.
    #[error("incompatible forest format version: expected {expected}, found {found}")]
    IncompatibleFormatVersion {
        /// The format version this build expects.
        expected: u32,
        /// The format version found in the stream.
        found: u32,
    },
}
