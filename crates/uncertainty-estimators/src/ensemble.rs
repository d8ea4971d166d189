use std::sync::Arc;

use ndarray::Axis;
use uncertainty_core::{
    BatchSource, InferenceEngine, Model, PredictionTensor, UncertaintyError, UncertaintyEstimate,
    UncertaintyEstimator,
};

use crate::{argmax_classes, run_full_pass};

/// Uncertainty from disagreement among independently trained models.
///
/// Runs the engine once per model, stacks the per-model predictions on a
/// new ensemble axis, and reports the element-wise mean as the point
/// estimate and the element-wise population variance (divisor = ensemble
/// size) as the uncertainty. Multiclass outputs are collapsed to the
/// arg-max class index before aggregation. Cost is O(models x batches).
pub struct EnsembleEstimator;

impl UncertaintyEstimator for EnsembleEstimator {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        if models.len() < 2 {
            return Err(UncertaintyError::InsufficientModels(format!(
                "ensemble disagreement needs at least 2 models, got {}",
                models.len()
            )));
        }

        let mut member_preds = Vec::with_capacity(models.len());
        for model in models {
            let preds = match run_full_pass(engine, model.as_ref(), batches)? {
                PredictionTensor::Targets(t) => t,
                PredictionTensor::ClassProbs(p) => argmax_classes(&p),
                PredictionTensor::DistributionParams(_) => {
                    return Err(UncertaintyError::IncompatibleModelOutput(
                        "ensemble disagreement expects point predictions, got a parametric head"
                            .to_string(),
                    ))
                }
            };
            member_preds.push(preds);
        }
        tracing::debug!(
            "ensemble pass complete: {} members, {} samples",
            member_preds.len(),
            member_preds[0].nrows()
        );

        let views: Vec<_> = member_preds.iter().map(|p| p.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views).map_err(|_| {
            UncertaintyError::IncompatibleModelOutput(
                "ensemble members disagree on output shape".to_string(),
            )
        })?;

        let means = stacked
            .mean_axis(Axis(0))
            .ok_or_else(|| UncertaintyError::Inference("empty ensemble stack".to_string()))?;
        let vars = stacked.var_axis(Axis(0), 0.0);

        Ok(UncertaintyEstimate::new(means, vars))
    }
}
