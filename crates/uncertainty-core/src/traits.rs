use std::sync::Arc;

use crate::{PredictionTensor, SamplingMode, TaskKind, UncertaintyError, UncertaintyEstimate};

/// Ordered, finite, re-iterable source of input batches.
///
/// Iteration itself is performed by the [`InferenceEngine`]; estimators
/// only read the counts. Implementors must yield the same batches in the
/// same order on every engine run, since multi-pass estimators align
/// per-sample accumulators positionally across passes.
pub trait BatchSource: Send + Sync {
    fn num_batches(&self) -> usize;
    fn num_samples(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }
}

/// Opaque trained model.
///
/// Estimators read the task kind and may toggle the sampling mode of the
/// model's stochastic-regularization sublayers; they never train or
/// persist a model. `set_sampling_mode` uses interior mutability so a
/// model can be shared behind `Arc` with the rest of the system.
pub trait Model: Send + Sync {
    fn task_kind(&self) -> TaskKind;
    fn sampling_mode(&self) -> SamplingMode;
    fn set_sampling_mode(&self, mode: SamplingMode);
}

/// External collaborator that runs a model over a batch source.
///
/// Returns one tensor per batch, in batch order. Stateless from this
/// layer's perspective; any internal parallelism or device placement is
/// the engine's own business.
pub trait InferenceEngine: Send + Sync {
    fn run(
        &self,
        model: &dyn Model,
        batches: &dyn BatchSource,
    ) -> Result<Vec<PredictionTensor>, UncertaintyError>;
}

/// Common contract every uncertainty strategy implements.
///
/// `estimate` is a blocking call that runs to completion or fails; output
/// rows are aligned index-for-index with the batch source's iteration
/// order. Estimators must not mutate the batch source or the model
/// collection's membership; toggling a model's sampling mode is the only
/// permitted side effect, and the prior mode must be restored on every
/// exit path.
pub trait UncertaintyEstimator: Send + Sync {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError>;
}
