//! Generalized random forest engine: train, serialize, predict.
//!
//! Grows ensembles of honest, randomized regression trees and turns them
//! into a per-query forest kernel: a sparse weight distribution over the
//! training rows induced by leaf co-membership. Two estimators consume the
//! kernel: the weighted mean (regression) and a weighted ridge regression
//! on query-centered covariates (local linear). Trees grown in CI groups
//! sharing a first-stage subsample support half-sampling variance
//! estimates. Training parallelizes over tree groups via rayon, with
//! per-group ChaCha8 seeding for thread-count-independent reproducibility.

mod data;
mod error;
mod forest;
mod linalg;
mod local_linear;
mod options;
mod predict;
mod regression;
mod relabel;
mod sampling;
mod serialize;
mod splitting;
mod tree;
mod variance;

pub use data::Data;
pub use error::ForestError;
pub use forest::Forest;
pub use local_linear::{LocalLinearOptions, RidgeType};
pub use options::{ForestOptions, SamplingOptions, TreeOptions};
pub use predict::Prediction;
pub use relabel::RelabelingStrategy;
pub use sampling::RandomSampler;
pub use tree::{Node, NodeIndex, Tree};
