use std::sync::Arc;

use uncertainty_core::{
    BatchSource, InferenceEngine, Model, PredictionTensor, TaskKind, UncertaintyError,
    UncertaintyEstimate, UncertaintyEstimator,
};

use crate::{argmax_classes, max_class_prob, run_full_pass, single_model};

/// Converts class-probability outputs into a per-sample confidence score.
///
/// Binary heads report the positive-class probability p as the point
/// estimate with uncertainty 1 - max(p, 1 - p); multiclass heads report
/// the arg-max class index with uncertainty 1 - max probability.
pub struct ClassificationConfidenceEstimator;

impl UncertaintyEstimator for ClassificationConfidenceEstimator {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        let model = single_model(models, "classification confidence")?;
        if !model.task_kind().is_classification() {
            return Err(UncertaintyError::IncompatibleModelOutput(format!(
                "classification confidence requires a classification model, got {:?}",
                model.task_kind()
            )));
        }

        match run_full_pass(engine, model, batches)? {
            PredictionTensor::Targets(probs) => {
                if model.task_kind() != TaskKind::BinaryClassification {
                    return Err(UncertaintyError::IncompatibleModelOutput(
                        "flat probabilities from a non-binary classifier".to_string(),
                    ));
                }
                let uncertainties = probs.mapv(|p| 1.0 - p.max(1.0 - p));
                Ok(UncertaintyEstimate::new(probs, uncertainties))
            }
            PredictionTensor::ClassProbs(probs) => {
                let preds = argmax_classes(&probs);
                let uncertainties = max_class_prob(&probs).mapv(|p| 1.0 - p);
                Ok(UncertaintyEstimate::new(preds, uncertainties))
            }
            PredictionTensor::DistributionParams(_) => Err(
                UncertaintyError::IncompatibleModelOutput(
                    "classification confidence expects class probabilities, got a parametric head"
                        .to_string(),
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{column, ScriptedEngine, StaticBatches, StubModel};
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn one_model(task: TaskKind) -> Vec<Arc<dyn Model>> {
        vec![Arc::new(StubModel::new(task)) as Arc<dyn Model>]
    }

    #[test]
    fn test_binary_confidence() {
        let batches = StaticBatches::single(3);
        let engine = ScriptedEngine::single_batch(vec![column(&[0.9, 0.5, 0.2])]);

        let result = ClassificationConfidenceEstimator
            .estimate(&batches, &one_model(TaskKind::BinaryClassification), &engine)
            .unwrap();

        let unc = result.uncertainties.unwrap();
        assert_relative_eq!(result.preds[[0, 0]], 0.9);
        assert_relative_eq!(unc[[0, 0]], 0.1, epsilon = 1e-12);
        // Maximal uncertainty at p = 0.5.
        assert_relative_eq!(unc[[1, 0]], 0.5);
        assert_relative_eq!(unc[[2, 0]], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_multiclass_confidence() {
        let batches = StaticBatches::single(1);
        let probs = Array3::from_shape_vec((1, 1, 3), vec![0.1, 0.7, 0.2]).unwrap();
        let engine = ScriptedEngine::single_batch(vec![PredictionTensor::ClassProbs(probs)]);

        let result = ClassificationConfidenceEstimator
            .estimate(
                &batches,
                &one_model(TaskKind::MulticlassClassification),
                &engine,
            )
            .unwrap();

        assert_relative_eq!(result.preds[[0, 0]], 1.0);
        assert_relative_eq!(
            result.uncertainties.unwrap()[[0, 0]],
            0.3,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rejects_regression_model() {
        let batches = StaticBatches::single(1);
        let engine = ScriptedEngine::single_batch(vec![column(&[1.0])]);

        let err = ClassificationConfidenceEstimator
            .estimate(&batches, &one_model(TaskKind::Regression), &engine)
            .unwrap_err();

        assert!(matches!(err, UncertaintyError::IncompatibleModelOutput(_)));
        assert_eq!(engine.calls(), 0);
    }
}
