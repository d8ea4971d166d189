use std::sync::Arc;

use uncertainty_core::{
    BatchSource, InferenceEngine, Model, UncertaintyError, UncertaintyEstimate,
    UncertaintyEstimator,
};

/// Passthrough estimator used when uncertainty quantification is disabled.
///
/// Runs no inference and never fails; always returns the designated
/// no-uncertainty result. Callers must treat the output as "no uncertainty
/// available", never as zero uncertainty.
pub struct NullEstimator;

impl UncertaintyEstimator for NullEstimator {
    fn estimate(
        &self,
        _batches: &dyn BatchSource,
        _models: &[Arc<dyn Model>],
        _engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        Ok(UncertaintyEstimate::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEngine, StaticBatches, StubModel};

    #[test]
    fn test_null_never_raises() {
        let batches = StaticBatches::single(3);
        let models: Vec<Arc<dyn Model>> = vec![];

        // Even a failing engine is irrelevant: no inference runs.
        let result = NullEstimator
            .estimate(&batches, &models, &FailingEngine)
            .unwrap();

        assert!(!result.has_uncertainty());
        assert_eq!(result.num_samples(), 0);
    }

    #[test]
    fn test_null_ignores_model_collection() {
        let batches = StaticBatches::single(1);
        let models: Vec<Arc<dyn Model>> = vec![
            Arc::new(StubModel::regression()),
            Arc::new(StubModel::regression()),
        ];

        let result = NullEstimator
            .estimate(&batches, &models, &FailingEngine)
            .unwrap();
        assert!(!result.has_uncertainty());
    }
}
