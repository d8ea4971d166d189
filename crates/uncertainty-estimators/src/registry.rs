//! Strategy registry and dispatch entry point.
//!
//! Maps configuration keys (including the designated `"none"`) to
//! estimator factories. The built-in table is populated exactly once, at
//! first use, and lives for the process lifetime; duplicate registration
//! is fatal there rather than at call time.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use uncertainty_core::{
    BatchSource, InferenceEngine, Model, UncertaintyError, UncertaintyEstimate,
    UncertaintyEstimator,
};

use crate::classification::ClassificationConfidenceEstimator;
use crate::conformal::{
    ConformalArtifact, ConformalQuantileEstimator, ConformalRegressionEstimator,
    UnfinishedEstimator,
};
use crate::dropout::DropoutEstimator;
use crate::ensemble::EnsembleEstimator;
use crate::null::NullEstimator;
use crate::parametric::{
    DirichletEstimator, EvidentialComponent, EvidentialEstimator, MveEstimator,
};
use crate::spectra::RoundRobinSpectraEstimator;

/// Key selecting the no-uncertainty passthrough.
pub const STRATEGY_NONE: &str = "none";

/// Construction-time settings shared by the estimator factories. Fields
/// irrelevant to the resolved strategy are ignored; a strategy that needs
/// a missing field fails resolution with `InvalidConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Number of stochastic passes for monte carlo dropout.
    pub sampling_size: usize,
    /// Drop probability override for monte carlo dropout, in [0, 1).
    pub dropout_p: f64,
    /// Clamp negative floating-point residue in the dropout variance
    /// identity to zero.
    pub clamp_negative_variance: bool,
    /// Pre-fit calibration artifact for the conformal strategies.
    pub conformal: Option<ConformalArtifact>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sampling_size: 10,
            dropout_p: 0.1,
            clamp_negative_variance: true,
            conformal: None,
        }
    }
}

type EstimatorFactory =
    fn(&EstimatorConfig) -> Result<Box<dyn UncertaintyEstimator>, UncertaintyError>;

pub struct EstimatorRegistry {
    factories: HashMap<String, EstimatorFactory>,
}

impl Default for EstimatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EstimatorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Bind a unique key to an estimator factory.
    pub fn register(&mut self, key: &str, factory: EstimatorFactory) -> Result<(), UncertaintyError> {
        if self.factories.contains_key(key) {
            return Err(UncertaintyError::DuplicateStrategy(key.to_string()));
        }
        self.factories.insert(key.to_string(), factory);
        Ok(())
    }

    /// Resolve a key into a configured estimator instance.
    pub fn resolve(
        &self,
        key: &str,
        config: &EstimatorConfig,
    ) -> Result<Box<dyn UncertaintyEstimator>, UncertaintyError> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| UncertaintyError::UnknownStrategy(key.to_string()))?;
        factory(config)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

fn conformal_artifact(config: &EstimatorConfig) -> Result<ConformalArtifact, UncertaintyError> {
    config.conformal.clone().ok_or_else(|| {
        UncertaintyError::InvalidConfig(
            "conformal strategies require a pre-fit calibration artifact".to_string(),
        )
    })
}

fn build_builtins() -> Result<EstimatorRegistry, UncertaintyError> {
    let mut registry = EstimatorRegistry::new();

    registry.register(STRATEGY_NONE, |_| Ok(Box::new(NullEstimator)))?;
    registry.register("ensemble", |_| Ok(Box::new(EnsembleEstimator)))?;
    registry.register("dropout", |cfg| {
        let estimator = DropoutEstimator::new(cfg.sampling_size, cfg.dropout_p)?;
        let estimator = if cfg.clamp_negative_variance {
            estimator
        } else {
            estimator.with_raw_variance()
        };
        Ok(Box::new(estimator))
    })?;
    registry.register("mve", |_| Ok(Box::new(MveEstimator)))?;
    registry.register("evidential-total", |_| {
        Ok(Box::new(EvidentialEstimator::new(EvidentialComponent::Total)))
    })?;
    registry.register("evidential-epistemic", |_| {
        Ok(Box::new(EvidentialEstimator::new(
            EvidentialComponent::Epistemic,
        )))
    })?;
    registry.register("evidential-aleatoric", |_| {
        Ok(Box::new(EvidentialEstimator::new(
            EvidentialComponent::Aleatoric,
        )))
    })?;
    registry.register("dirichlet", |_| Ok(Box::new(DirichletEstimator)))?;
    registry.register("classification", |_| {
        Ok(Box::new(ClassificationConfidenceEstimator))
    })?;
    registry.register("conformal-quantile-regression", |cfg| {
        Ok(Box::new(ConformalQuantileEstimator::new(
            conformal_artifact(cfg)?,
        )))
    })?;
    registry.register("conformal-regression", |cfg| {
        Ok(Box::new(ConformalRegressionEstimator::new(
            conformal_artifact(cfg)?,
        )))
    })?;
    registry.register("spectra-roundrobin", |_| {
        Ok(Box::new(RoundRobinSpectraEstimator))
    })?;
    registry.register("conformal-multiclass", |_| {
        Ok(Box::new(UnfinishedEstimator::new("conformal-multiclass")))
    })?;
    registry.register("conformal-multilabel", |_| {
        Ok(Box::new(UnfinishedEstimator::new("conformal-multilabel")))
    })?;

    Ok(registry)
}

/// The process-wide strategy table.
pub fn builtin_registry() -> &'static EstimatorRegistry {
    static REGISTRY: OnceLock<EstimatorRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        build_builtins().expect("builtin strategy table must not contain duplicate keys")
    })
}

/// Thin callable wrapper over the active estimator; the only surface the
/// rest of the system touches.
pub struct UncertaintyDispatcher {
    strategy: String,
    estimator: Box<dyn UncertaintyEstimator>,
}

impl std::fmt::Debug for UncertaintyDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UncertaintyDispatcher")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl UncertaintyDispatcher {
    /// Resolve a strategy key from the built-in registry.
    pub fn from_key(key: &str, config: &EstimatorConfig) -> Result<Self, UncertaintyError> {
        let estimator = builtin_registry().resolve(key, config)?;
        tracing::info!("resolved uncertainty strategy '{}'", key);
        Ok(Self {
            strategy: key.to_string(),
            estimator,
        })
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// Forward to the active estimator. Blocking; runs to completion or
    /// fails, and any failure discards all accumulated state for the call.
    pub fn estimate(
        &self,
        batches: &dyn BatchSource,
        models: &[Arc<dyn Model>],
        engine: &dyn InferenceEngine,
    ) -> Result<UncertaintyEstimate, UncertaintyError> {
        tracing::debug!(
            "dispatching '{}' over {} batches / {} samples with {} model(s)",
            self.strategy,
            batches.num_batches(),
            batches.num_samples(),
            models.len()
        );
        self.estimator.estimate(batches, models, engine)
    }
}
