//! Conformal prediction-interval estimators.
//!
//! Both variants wrap a point-prediction model together with a pre-fit
//! calibration artifact (fitted elsewhere, on held-out data) and report
//! interval half-width as the uncertainty rather than a variance.

use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use uncertainty_core::{
    BatchSource, InferenceEngine, Model, PredictionTensor, UncertaintyError, UncertaintyEstimate,
    UncertaintyEstimator,
};

use crate::{run_full_pass, single_model};

/// Pre-fit conformal calibration: one non-conformity offset per target,
/// valid at the stated confidence level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformalArtifact {
    pub confidence_level: f64,
    pub offsets: Vec<f64>,
}

impl ConformalArtifact {
    pub fn new(confidence_level: f64, offsets: Vec<f64>) -> Result<Self, UncertaintyError> {
        if !(0.0..1.0).contains(&confidence_level) || confidence_level == 0.0 {
            return Err(UncertaintyError::InvalidConfig(format!(
                "confidence level must be in (0, 1), got {confidence_level}"
            )));
        }
        if offsets.is_empty() {
            return Err(UncertaintyError::InvalidConfig(
                "conformal artifact has no per-target offsets".to_string(),
            ));
        }
        if offsets.iter().any(|o| !o.is_finite() || *o < 0.0) {
            return Err(UncertaintyError::InvalidConfig(
                "conformal offsets must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self {
            confidence_level,
            offsets,
        })
    }

    fn check_targets(&self, num_targets: usize, strategy: &str) -> Result<(), UncertaintyError> {
        if self.offsets.len() != num_targets {
            return Err(UncertaintyError::IncompatibleModelOutput(format!(
                "{strategy}: artifact covers {} targets but the model emits {num_targets}",
                self.offsets.len()
            )));
        }
        Ok(())
    }
}

/// Conformalized quantile regression: the model emits (lower, upper)
/// quantile predictions per target; the artifact widens them. Point
/// estimate is the interval midpoint, uncertainty the half-width.
pub struct ConformalQuantileEstimator {
    artifact: ConformalArtifact,
}

impl ConformalQuantileEstimator {
    pub fn new(artifact: ConformalArtifact) -> Self {
        Self { artifact }
    }
}

impl UncertaintyEstimator for ConformalQuantileEstimator {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        let model = single_model(models, "conformal quantile regression")?;
        let quantiles = match run_full_pass(engine, model, batches)? {
            PredictionTensor::DistributionParams(p) if p.dim().2 == 2 => p,
            _ => {
                return Err(UncertaintyError::IncompatibleModelOutput(
                    "conformal quantile regression expects (lower, upper) quantile pairs"
                        .to_string(),
                ))
            }
        };
        let (n, t, _) = quantiles.dim();
        self.artifact.check_targets(t, "conformal quantile regression")?;

        let mut preds = Array2::zeros((n, t));
        let mut half_widths = Array2::zeros((n, t));
        for i in 0..n {
            for j in 0..t {
                let lower = quantiles[[i, j, 0]] - self.artifact.offsets[j];
                let upper = quantiles[[i, j, 1]] + self.artifact.offsets[j];
                preds[[i, j]] = (lower + upper) / 2.0;
                half_widths[[i, j]] = (upper - lower) / 2.0;
            }
        }

        Ok(UncertaintyEstimate::new(preds, half_widths))
    }
}

/// Residual-based split conformal regression: the model emits point
/// predictions and the artifact's per-target offset is the interval
/// half-width around each of them.
pub struct ConformalRegressionEstimator {
    artifact: ConformalArtifact,
}

impl ConformalRegressionEstimator {
    pub fn new(artifact: ConformalArtifact) -> Self {
        Self { artifact }
    }
}

impl UncertaintyEstimator for ConformalRegressionEstimator {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        let model = single_model(models, "conformal regression")?;
        let preds = match run_full_pass(engine, model, batches)? {
            PredictionTensor::Targets(p) => p,
            _ => {
                return Err(UncertaintyError::IncompatibleModelOutput(
                    "conformal regression expects point predictions".to_string(),
                ))
            }
        };
        let (n, t) = preds.dim();
        self.artifact.check_targets(t, "conformal regression")?;

        let half_widths =
            Array2::from_shape_fn((n, t), |(_, j)| self.artifact.offsets[j]);

        Ok(UncertaintyEstimate::new(preds, half_widths))
    }
}

/// Declared strategy whose reduction has not been built yet.
///
/// Registered so resolution succeeds and the gap surfaces as an explicit
/// error at estimate time, distinguishable from the intentional no-op of
/// the null estimator.
pub struct UnfinishedEstimator {
    key: &'static str,
}

impl UnfinishedEstimator {
    pub fn new(key: &'static str) -> Self {
        Self { key }
    }
}

impl UncertaintyEstimator for UnfinishedEstimator {
    fn estimate(
        &self,
        _batches: &dyn BatchSource,
        _models: &[Arc<dyn Model>],
        _engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        Err(UncertaintyError::NotImplemented(self.key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{targets, ScriptedEngine, StaticBatches, StubModel};
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn one_model() -> Vec<Arc<dyn Model>> {
        vec![Arc::new(StubModel::regression()) as Arc<dyn Model>]
    }

    #[test]
    fn test_artifact_validation() {
        assert!(ConformalArtifact::new(0.9, vec![0.5]).is_ok());
        assert!(matches!(
            ConformalArtifact::new(1.0, vec![0.5]),
            Err(UncertaintyError::InvalidConfig(_))
        ));
        assert!(matches!(
            ConformalArtifact::new(0.9, vec![]),
            Err(UncertaintyError::InvalidConfig(_))
        ));
        assert!(matches!(
            ConformalArtifact::new(0.9, vec![-0.1]),
            Err(UncertaintyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_quantile_interval_midpoint_and_half_width() {
        let batches = StaticBatches::single(1);
        // lower = 1.0, upper = 3.0, offset = 0.5:
        //   interval [0.5, 3.5], midpoint 2.0, half-width 1.5.
        let engine = ScriptedEngine::single_batch(vec![PredictionTensor::DistributionParams(
            Array3::from_shape_vec((1, 1, 2), vec![1.0, 3.0]).unwrap(),
        )]);
        let artifact = ConformalArtifact::new(0.9, vec![0.5]).unwrap();

        let result = ConformalQuantileEstimator::new(artifact)
            .estimate(&batches, &one_model(), &engine)
            .unwrap();

        assert_relative_eq!(result.preds[[0, 0]], 2.0);
        assert_relative_eq!(result.uncertainties.unwrap()[[0, 0]], 1.5);
    }

    #[test]
    fn test_regression_half_width_is_constant_per_target() {
        let batches = StaticBatches::single(2);
        let engine =
            ScriptedEngine::single_batch(vec![targets(&[&[1.0, 10.0], &[2.0, 20.0]])]);
        let artifact = ConformalArtifact::new(0.95, vec![0.25, 2.5]).unwrap();

        let result = ConformalRegressionEstimator::new(artifact)
            .estimate(&batches, &one_model(), &engine)
            .unwrap();

        assert_relative_eq!(result.preds[[1, 1]], 20.0);
        let widths = result.uncertainties.unwrap();
        assert_relative_eq!(widths[[0, 0]], 0.25);
        assert_relative_eq!(widths[[1, 0]], 0.25);
        assert_relative_eq!(widths[[0, 1]], 2.5);
    }

    #[test]
    fn test_target_count_mismatch() {
        let batches = StaticBatches::single(1);
        let engine = ScriptedEngine::single_batch(vec![targets(&[&[1.0, 2.0]])]);
        let artifact = ConformalArtifact::new(0.9, vec![0.5]).unwrap();

        let err = ConformalRegressionEstimator::new(artifact)
            .estimate(&batches, &one_model(), &engine)
            .unwrap_err();
        assert!(matches!(err, UncertaintyError::IncompatibleModelOutput(_)));
    }

    #[test]
    fn test_unfinished_estimator_surfaces_gap() {
        let batches = StaticBatches::single(1);
        let engine = ScriptedEngine::new(vec![]);

        let err = UnfinishedEstimator::new("conformal-multilabel")
            .estimate(&batches, &one_model(), &engine)
            .unwrap_err();

        assert!(matches!(err, UncertaintyError::NotImplemented(_)));
        assert_eq!(engine.calls(), 0);
    }
}
