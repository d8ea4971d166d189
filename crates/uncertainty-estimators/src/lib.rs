//! Uncertainty Estimation Strategies
//!
//! Interchangeable estimators that turn raw model predictions into
//! (point estimate, uncertainty) pairs, selected at runtime through a
//! name-keyed registry. The rest of the system talks to exactly one
//! surface: resolve a strategy key into an [`UncertaintyDispatcher`] and
//! call [`UncertaintyDispatcher::estimate`].

use ndarray::{s, Array2, Array3};
use uncertainty_core::{
    BatchSource, InferenceEngine, Model, PredictionTensor, UncertaintyError,
};

pub mod classification;
pub mod conformal;
pub mod dropout;
pub mod ensemble;
pub mod null;
pub mod parametric;
pub mod registry;
pub mod spectra;
pub mod testing;

pub use classification::ClassificationConfidenceEstimator;
pub use conformal::{
    ConformalArtifact, ConformalQuantileEstimator, ConformalRegressionEstimator,
    UnfinishedEstimator,
};
pub use dropout::DropoutEstimator;
pub use ensemble::EnsembleEstimator;
pub use null::NullEstimator;
pub use parametric::{DirichletEstimator, EvidentialComponent, EvidentialEstimator, MveEstimator};
pub use registry::{
    builtin_registry, EstimatorConfig, EstimatorRegistry, UncertaintyDispatcher, STRATEGY_NONE,
};
pub use spectra::RoundRobinSpectraEstimator;

/// Enforce the exactly-one-model precondition shared by the single-model
/// strategies, before any inference runs.
pub(crate) fn single_model<'a>(
    models: &'a [std::sync::Arc<dyn Model>],
    strategy: &str,
) -> Result<&'a dyn Model, UncertaintyError> {
    match models.len() {
        0 => Err(UncertaintyError::InsufficientModels(format!(
            "{strategy} needs exactly one model, got 0"
        ))),
        1 => Ok(models[0].as_ref()),
        n => Err(UncertaintyError::TooManyModels(format!(
            "{strategy} accepts exactly one model, got {n}"
        ))),
    }
}

/// Run one full pass of a model over the batch source and concatenate the
/// per-batch outputs along the sample axis, in batch order.
pub(crate) fn run_full_pass(
    engine: &dyn InferenceEngine,
    model: &dyn Model,
    batches: &dyn BatchSource,
) -> Result<PredictionTensor, UncertaintyError> {
    let per_batch = engine.run(model, batches)?;
    if per_batch.len() != batches.num_batches() {
        return Err(UncertaintyError::Inference(format!(
            "engine returned {} batches, expected {}",
            per_batch.len(),
            batches.num_batches()
        )));
    }
    PredictionTensor::concat(&per_batch)
}

/// Collapse (sample, target, class) probability vectors to the arg-max
/// class index per (sample, target).
pub(crate) fn argmax_classes(probs: &Array3<f64>) -> Array2<f64> {
    let (n, t, _) = probs.dim();
    Array2::from_shape_fn((n, t), |(i, j)| {
        let mut best = 0usize;
        let mut best_p = f64::NEG_INFINITY;
        for (k, &p) in probs.slice(s![i, j, ..]).iter().enumerate() {
            if p > best_p {
                best_p = p;
                best = k;
            }
        }
        best as f64
    })
}

/// Maximum class probability per (sample, target).
pub(crate) fn max_class_prob(probs: &Array3<f64>) -> Array2<f64> {
    let (n, t, _) = probs.dim();
    Array2::from_shape_fn((n, t), |(i, j)| {
        probs
            .slice(s![i, j, ..])
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    })
}
