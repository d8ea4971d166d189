use std::sync::Arc;

use ndarray::Array2;
use uncertainty_core::{
    BatchSource, InferenceEngine, Model, PredictionTensor, SamplingMode, UncertaintyError,
    UncertaintyEstimate, UncertaintyEstimator,
};

use crate::run_full_pass;

/// Monte Carlo dropout: an artificial ensemble built from repeated
/// stochastic forward passes of a single model with dropout kept active.
///
/// Each of the `sampling_size` passes re-executes the full forward
/// computation over the batch source, so cost scales linearly with
/// `sampling_size` x batches. This is the dominant cost driver of the
/// whole estimation layer; callers wanting to bound it must impose their
/// own timeout around the call.
pub struct DropoutEstimator {
    sampling_size: usize,
    dropout_p: f64,
    clamp_negative_variance: bool,
}

impl DropoutEstimator {
    pub fn new(sampling_size: usize, dropout_p: f64) -> Result<Self, UncertaintyError> {
        if sampling_size == 0 {
            return Err(UncertaintyError::InvalidConfig(
                "sampling_size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&dropout_p) {
            return Err(UncertaintyError::InvalidConfig(format!(
                "dropout_p must be in [0, 1), got {dropout_p}"
            )));
        }
        Ok(Self {
            sampling_size,
            dropout_p,
            clamp_negative_variance: true,
        })
    }

    /// Expose the raw sum-of-squares identity instead of clamping small
    /// negative floating-point residue to zero.
    pub fn with_raw_variance(mut self) -> Self {
        self.clamp_negative_variance = false;
        self
    }
}

/// Restores the model's prior sampling mode on every exit path.
struct SamplingGuard<'a> {
    model: &'a dyn Model,
    saved: SamplingMode,
}

impl<'a> SamplingGuard<'a> {
    fn activate(model: &'a dyn Model, dropout_p: f64) -> Self {
        let saved = model.sampling_mode();
        model.set_sampling_mode(SamplingMode::Stochastic { dropout_p });
        Self { model, saved }
    }
}

impl Drop for SamplingGuard<'_> {
    fn drop(&mut self) {
        self.model.set_sampling_mode(self.saved);
    }
}

impl UncertaintyEstimator for DropoutEstimator {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        // Ambiguous which member the artificial ensemble should come
        // from, so more than one model is a configuration misuse.
        let model = crate::single_model(models, "monte carlo dropout")?;

        let _guard = SamplingGuard::activate(model, self.dropout_p);

        let mut sum: Option<Array2<f64>> = None;
        let mut sum_squared: Option<Array2<f64>> = None;
        for pass in 0..self.sampling_size {
            let preds = match run_full_pass(engine, model, batches)? {
                PredictionTensor::Targets(t) => t,
                _ => {
                    return Err(UncertaintyError::IncompatibleModelOutput(
                        "monte carlo dropout expects point predictions".to_string(),
                    ))
                }
            };
            tracing::debug!(
                "dropout sampling pass {}/{} complete",
                pass + 1,
                self.sampling_size
            );

            match (&mut sum, &mut sum_squared) {
                (Some(s), Some(sq)) => {
                    if s.dim() != preds.dim() {
                        return Err(UncertaintyError::Inference(
                            "prediction shape changed between sampling passes".to_string(),
                        ));
                    }
                    *sq += &preds.mapv(|x| x * x);
                    *s += &preds;
                }
                _ => {
                    sum_squared = Some(preds.mapv(|x| x * x));
                    sum = Some(preds);
                }
            }
        }

        let n = self.sampling_size as f64;
        let sum = sum.ok_or_else(|| {
            UncertaintyError::Inference("no sampling passes completed".to_string())
        })?;
        let sum_squared = sum_squared.ok_or_else(|| {
            UncertaintyError::Inference("no sampling passes completed".to_string())
        })?;

        let means = sum / n;
        let mut vars = sum_squared / n - means.mapv(|m| m * m);

        if self.clamp_negative_variance {
            // The identity can underflow to tiny negatives from
            // floating-point cancellation.
            let clamped = vars.iter().filter(|v| **v < 0.0).count();
            if clamped > 0 {
                tracing::debug!(
                    "clamped {} negative variance values to zero",
                    clamped
                );
                vars.mapv_inplace(|v| v.max(0.0));
            }
        }

        Ok(UncertaintyEstimate::new(means, vars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{column, FailingEngine, ScriptedEngine, StaticBatches, StubModel};
    use approx::assert_relative_eq;
    use statrs::statistics::Statistics;

    fn one_model() -> (Arc<StubModel>, Vec<Arc<dyn Model>>) {
        let model = Arc::new(StubModel::regression());
        let collection: Vec<Arc<dyn Model>> = vec![model.clone()];
        (model, collection)
    }

    #[test]
    fn test_mean_and_population_variance() {
        let batches = StaticBatches::single(1);
        let engine = ScriptedEngine::single_batch(vec![
            column(&[2.0]),
            column(&[4.0]),
            column(&[6.0]),
            column(&[8.0]),
        ]);
        let (_, models) = one_model();

        let estimator = DropoutEstimator::new(4, 0.2).unwrap();
        let result = estimator.estimate(&batches, &models, &engine).unwrap();

        assert_relative_eq!(result.preds[[0, 0]], 5.0);
        assert_relative_eq!(result.uncertainties.unwrap()[[0, 0]], 5.0);
        assert_eq!(engine.calls(), 4);
    }

    #[test]
    fn test_single_pass_variance_is_zero() {
        let batches = StaticBatches::single(2);
        let engine = ScriptedEngine::single_batch(vec![column(&[3.5, -1.0])]);
        let (_, models) = one_model();

        let estimator = DropoutEstimator::new(1, 0.1).unwrap();
        let result = estimator.estimate(&batches, &models, &engine).unwrap();

        assert_relative_eq!(result.preds[[0, 0]], 3.5);
        assert_relative_eq!(result.preds[[1, 0]], -1.0);
        let vars = result.uncertainties.unwrap();
        assert_relative_eq!(vars[[0, 0]], 0.0);
        assert_relative_eq!(vars[[1, 0]], 0.0);
    }

    #[test]
    fn test_identity_matches_direct_population_variance() {
        for n in [2usize, 5, 17, 50] {
            let samples: Vec<f64> = (0..n).map(|i| 0.37 * i as f64 - 3.1).collect();
            let batches = StaticBatches::single(1);
            let engine =
                ScriptedEngine::single_batch(samples.iter().map(|&v| column(&[v])).collect());
            let (_, models) = one_model();

            let estimator = DropoutEstimator::new(n, 0.1).unwrap();
            let result = estimator.estimate(&batches, &models, &engine).unwrap();

            let direct = samples.iter().copied().population_variance();
            assert_relative_eq!(
                result.uncertainties.unwrap()[[0, 0]],
                direct,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_negative_residue_is_clamped_by_default() {
        // Identical large-magnitude samples: the identity cancels to a
        // value at or below zero up to rounding.
        let v = 1.0e4 + 0.123_456_7;
        let batches = StaticBatches::single(1);
        let engine = ScriptedEngine::single_batch(vec![column(&[v]), column(&[v]), column(&[v])]);
        let (_, models) = one_model();

        let estimator = DropoutEstimator::new(3, 0.1).unwrap();
        let result = estimator.estimate(&batches, &models, &engine).unwrap();

        assert!(result.uncertainties.unwrap()[[0, 0]] >= 0.0);
    }

    #[test]
    fn test_raw_variance_exposes_identity() {
        let v = 1.0e4 + 0.123_456_7;
        let batches = StaticBatches::single(1);
        let engine = ScriptedEngine::single_batch(vec![column(&[v]), column(&[v]), column(&[v])]);
        let (_, models) = one_model();

        let estimator = DropoutEstimator::new(3, 0.1).unwrap().with_raw_variance();
        let result = estimator.estimate(&batches, &models, &engine).unwrap();

        // Exact value is rounding-dependent; the raw identity must stay
        // within cancellation distance of zero in either direction.
        let var = result.uncertainties.unwrap()[[0, 0]];
        assert!(var.abs() < 1e-6);
    }

    #[test]
    fn test_two_models_rejected_before_any_inference() {
        let batches = StaticBatches::single(1);
        let engine = ScriptedEngine::single_batch(vec![column(&[1.0])]);
        let models: Vec<Arc<dyn Model>> = vec![
            Arc::new(StubModel::regression()),
            Arc::new(StubModel::regression()),
        ];

        let estimator = DropoutEstimator::new(4, 0.1).unwrap();
        let err = estimator.estimate(&batches, &models, &engine).unwrap_err();

        assert!(matches!(err, UncertaintyError::TooManyModels(_)));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn test_sampling_mode_restored_after_success() {
        let batches = StaticBatches::single(1);
        let engine = ScriptedEngine::single_batch(vec![column(&[1.0]), column(&[2.0])]);
        let (model, models) = one_model();
        model.set_sampling_mode(SamplingMode::Deterministic);

        let estimator = DropoutEstimator::new(2, 0.3).unwrap();
        estimator.estimate(&batches, &models, &engine).unwrap();

        assert_eq!(model.sampling_mode(), SamplingMode::Deterministic);
    }

    #[test]
    fn test_sampling_mode_restored_after_engine_failure() {
        let batches = StaticBatches::single(1);
        let (model, models) = one_model();

        let estimator = DropoutEstimator::new(2, 0.3).unwrap();
        let err = estimator
            .estimate(&batches, &models, &FailingEngine)
            .unwrap_err();

        assert!(matches!(err, UncertaintyError::Inference(_)));
        assert_eq!(model.sampling_mode(), SamplingMode::Deterministic);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            DropoutEstimator::new(0, 0.1),
            Err(UncertaintyError::InvalidConfig(_))
        ));
        assert!(matches!(
            DropoutEstimator::new(4, 1.0),
            Err(UncertaintyError::InvalidConfig(_))
        ));
        assert!(matches!(
            DropoutEstimator::new(4, -0.1),
            Err(UncertaintyError::InvalidConfig(_))
        ));
    }
}
