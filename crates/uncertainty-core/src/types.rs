use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::UncertaintyError;

/// Prediction task a model was trained for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Single-target regression
    Regression,
    /// Multi-target regression
    MultitaskRegression,
    /// Binary classification (per-target positive-class probability)
    BinaryClassification,
    /// Multiclass classification (per-target class-probability vector)
    MulticlassClassification,
    /// Spectral prediction (dense multi-target intensity vector)
    Spectral,
}

impl TaskKind {
    pub fn is_classification(&self) -> bool {
        matches!(
            self,
            TaskKind::BinaryClassification | TaskKind::MulticlassClassification
        )
    }
}

/// Inference-mode flag for a model's stochastic-regularization sublayers.
///
/// `Deterministic` is the normal inference state (dropout inactive).
/// `Stochastic` keeps dropout active during inference with the given drop
/// probability, overriding whatever rate the model was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SamplingMode {
    Deterministic,
    Stochastic { dropout_p: f64 },
}

/// Raw per-batch model output, shape depending on task kind and head.
#[derive(Debug, Clone)]
pub enum PredictionTensor {
    /// (sample, target) point predictions: regression values, binary
    /// probabilities, or spectral intensities.
    Targets(Array2<f64>),
    /// (sample, target, class) probability vectors for multiclass tasks.
    ClassProbs(Array3<f64>),
    /// (sample, target, param) parameters emitted by a parametric head
    /// (mean/variance pairs, evidential parameters, Dirichlet
    /// concentrations, quantile pairs).
    DistributionParams(Array3<f64>),
}

impl PredictionTensor {
    pub fn num_samples(&self) -> usize {
        match self {
            PredictionTensor::Targets(t) => t.nrows(),
            PredictionTensor::ClassProbs(p) => p.dim().0,
            PredictionTensor::DistributionParams(p) => p.dim().0,
        }
    }

    pub fn num_targets(&self) -> usize {
        match self {
            PredictionTensor::Targets(t) => t.ncols(),
            PredictionTensor::ClassProbs(p) => p.dim().1,
            PredictionTensor::DistributionParams(p) => p.dim().1,
        }
    }

    pub fn as_targets(&self) -> Option<&Array2<f64>> {
        match self {
            PredictionTensor::Targets(t) => Some(t),
            _ => None,
        }
    }

    /// Concatenate per-batch tensors along the sample axis, preserving
    /// batch order. All batches must carry the same variant and trailing
    /// shape.
    pub fn concat(batches: &[PredictionTensor]) -> Result<PredictionTensor, UncertaintyError> {
        let first = batches.first().ok_or_else(|| {
            UncertaintyError::Inference("engine returned no batches".to_string())
        })?;

        match first {
            PredictionTensor::Targets(_) => {
                let views = batches
                    .iter()
                    .map(|b| match b {
                        PredictionTensor::Targets(t) => Ok(t.view()),
                        _ => Err(mixed_batches()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let joined = ndarray::concatenate(Axis(0), &views)
                    .map_err(|e| UncertaintyError::Inference(e.to_string()))?;
                Ok(PredictionTensor::Targets(joined))
            }
            PredictionTensor::ClassProbs(_) => {
                let views = batches
                    .iter()
                    .map(|b| match b {
                        PredictionTensor::ClassProbs(p) => Ok(p.view()),
                        _ => Err(mixed_batches()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let joined = ndarray::concatenate(Axis(0), &views)
                    .map_err(|e| UncertaintyError::Inference(e.to_string()))?;
                Ok(PredictionTensor::ClassProbs(joined))
            }
            PredictionTensor::DistributionParams(_) => {
                let views = batches
                    .iter()
                    .map(|b| match b {
                        PredictionTensor::DistributionParams(p) => Ok(p.view()),
                        _ => Err(mixed_batches()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let joined = ndarray::concatenate(Axis(0), &views)
                    .map_err(|e| UncertaintyError::Inference(e.to_string()))?;
                Ok(PredictionTensor::DistributionParams(joined))
            }
        }
    }
}

fn mixed_batches() -> UncertaintyError {
    UncertaintyError::IncompatibleModelOutput(
        "engine returned mixed tensor variants across batches".to_string(),
    )
}

/// Uncalibrated point estimates and their per-sample uncertainties.
///
/// `uncertainties` shares the (sample, target) shape of `preds`.
/// `None` means no uncertainty is available (quantification disabled),
/// which is distinct from an uncertainty of zero.
#[derive(Debug, Clone)]
pub struct UncertaintyEstimate {
    pub preds: Array2<f64>,
    pub uncertainties: Option<Array2<f64>>,
}

impl UncertaintyEstimate {
    pub fn new(preds: Array2<f64>, uncertainties: Array2<f64>) -> Self {
        Self {
            preds,
            uncertainties: Some(uncertainties),
        }
    }

    /// The designated no-uncertainty result.
    pub fn none() -> Self {
        Self {
            preds: Array2::zeros((0, 0)),
            uncertainties: None,
        }
    }

    pub fn has_uncertainty(&self) -> bool {
        self.uncertainties.is_some()
    }

    pub fn num_samples(&self) -> usize {
        self.preds.nrows()
    }
}
