use std::sync::Arc;

use ndarray::Axis;
use uncertainty_core::{
    BatchSource, InferenceEngine, Model, PredictionTensor, UncertaintyError, UncertaintyEstimate,
    UncertaintyEstimator,
};

use crate::run_full_pass;

/// Round-robin aggregation of cross-validated spectral sub-models.
///
/// Each sub-model predicts the full spectrum once; target column t takes
/// its point estimate from sub-model t mod n, so every sub-model
/// contributes an interleaved share of the spectrum. The dispersion
/// measure is the population variance across sub-models per
/// (sample, target).
pub struct RoundRobinSpectraEstimator;

impl UncertaintyEstimator for RoundRobinSpectraEstimator {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        if models.len() < 2 {
            return Err(UncertaintyError::InsufficientModels(format!(
                "round-robin spectra aggregation needs at least 2 sub-models, got {}",
                models.len()
            )));
        }

        let mut member_preds = Vec::with_capacity(models.len());
        for model in models {
            let preds = match run_full_pass(engine, model.as_ref(), batches)? {
                PredictionTensor::Targets(t) => t,
                _ => {
                    return Err(UncertaintyError::IncompatibleModelOutput(
                        "round-robin spectra aggregation expects dense intensity predictions"
                            .to_string(),
                    ))
                }
            };
            member_preds.push(preds);
        }

        let views: Vec<_> = member_preds.iter().map(|p| p.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views).map_err(|_| {
            UncertaintyError::IncompatibleModelOutput(
                "spectral sub-models disagree on output shape".to_string(),
            )
        })?;

        let m = member_preds.len();
        let (n, t) = member_preds[0].dim();
        let preds = ndarray::Array2::from_shape_fn((n, t), |(i, j)| stacked[[j % m, i, j]]);
        let vars = stacked.var_axis(Axis(0), 0.0);

        Ok(UncertaintyEstimate::new(preds, vars))
    }
}
