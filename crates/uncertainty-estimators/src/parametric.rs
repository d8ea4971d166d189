//! Parametric-head estimators.
//!
//! These read distribution parameters the model's output layer already
//! emits and reduce them analytically; no repeated sampling occurs. Each
//! variant differs only in which closed-form reduction it applies.

use std::sync::Arc;

use ndarray::{Array2, Array3, Axis};
use uncertainty_core::{
    BatchSource, InferenceEngine, Model, PredictionTensor, UncertaintyError, UncertaintyEstimate,
    UncertaintyEstimator,
};

use crate::{argmax_classes, run_full_pass, single_model};

fn parametric_output(
    engine: &dyn InferenceEngine,
    model: &dyn Model,
    batches: &dyn BatchSource,
    strategy: &str,
    expected_params: usize,
) -> Result<Array3<f64>, UncertaintyError> {
    let params = match run_full_pass(engine, model, batches)? {
        PredictionTensor::DistributionParams(p) => p,
        _ => {
            return Err(UncertaintyError::IncompatibleModelOutput(format!(
                "{strategy} expects a parametric output head"
            )))
        }
    };
    if params.dim().2 != expected_params {
        return Err(UncertaintyError::IncompatibleModelOutput(format!(
            "{strategy} expects {expected_params} parameters per target, got {}",
            params.dim().2
        )));
    }
    Ok(params)
}

/// Mean-variance estimation: the head jointly predicts (mean, variance)
/// per target.
pub struct MveEstimator;

impl UncertaintyEstimator for MveEstimator {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        let model = single_model(models, "mean-variance estimation")?;
        let params = parametric_output(engine, model, batches, "mean-variance estimation", 2)?;

        let means = params.index_axis(Axis(2), 0).to_owned();
        let vars = params.index_axis(Axis(2), 1).to_owned();
        Ok(UncertaintyEstimate::new(means, vars))
    }
}

/// Which component of the evidential decomposition is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidentialComponent {
    Total,
    Epistemic,
    Aleatoric,
}

/// Evidential regression over a Normal-Inverse-Gamma head emitting
/// (gamma, lambda, alpha, beta) per target.
///
/// aleatoric = beta / (alpha - 1)
/// epistemic = beta / (lambda * (alpha - 1))
/// total     = aleatoric + epistemic
pub struct EvidentialEstimator {
    component: EvidentialComponent,
}

impl EvidentialEstimator {
    pub fn new(component: EvidentialComponent) -> Self {
        Self { component }
    }
}

impl UncertaintyEstimator for EvidentialEstimator {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        let model = single_model(models, "evidential regression")?;
        let params = parametric_output(engine, model, batches, "evidential regression", 4)?;

        let gamma = params.index_axis(Axis(2), 0).to_owned();
        let lambda = params.index_axis(Axis(2), 1);
        let alpha = params.index_axis(Axis(2), 2);
        let beta = params.index_axis(Axis(2), 3);

        let (n, t) = gamma.dim();
        let uncertainties = Array2::from_shape_fn((n, t), |(i, j)| {
            let aleatoric = beta[[i, j]] / (alpha[[i, j]] - 1.0);
            let epistemic = aleatoric / lambda[[i, j]];
            match self.component {
                EvidentialComponent::Total => aleatoric + epistemic,
                EvidentialComponent::Epistemic => epistemic,
                EvidentialComponent::Aleatoric => aleatoric,
            }
        });

        Ok(UncertaintyEstimate::new(gamma, uncertainties))
    }
}

/// Dirichlet classification head emitting per-class concentrations.
///
/// Probabilities are alpha / S with S the per-target concentration sum;
/// the point estimate is the arg-max class and the uncertainty is the
/// vacuity K / S for K classes.
pub struct DirichletEstimator;

impl UncertaintyEstimator for DirichletEstimator {
    fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        let model = single_model(models, "dirichlet")?;
        let alphas = match run_full_pass(engine, model, batches)? {
            PredictionTensor::DistributionParams(p) => p,
            _ => {
                return Err(UncertaintyError::IncompatibleModelOutput(
                    "dirichlet expects per-class concentration parameters".to_string(),
                ))
            }
        };

        let num_classes = alphas.dim().2;
        if num_classes < 2 {
            return Err(UncertaintyError::IncompatibleModelOutput(format!(
                "dirichlet needs at least 2 classes, got {num_classes}"
            )));
        }

        let preds = argmax_classes(&alphas);
        let strength = alphas.sum_axis(Axis(2));
        let vacuity = strength.mapv(|s| num_classes as f64 / s);

        Ok(UncertaintyEstimate::new(preds, vacuity))
    }
}
