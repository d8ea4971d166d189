//! Deterministic test doubles shared by the unit and integration suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ndarray::Array2;
use uncertainty_core::{
    BatchSource, InferenceEngine, Model, PredictionTensor, SamplingMode, TaskKind,
    UncertaintyError,
};

/// Batch source with fixed counts; contents live inside the engine script.
pub struct StaticBatches {
    num_batches: usize,
    num_samples: usize,
}

impl StaticBatches {
    pub fn new(num_batches: usize, num_samples: usize) -> Self {
        Self {
            num_batches,
            num_samples,
        }
    }

    /// Single batch holding `num_samples` samples.
    pub fn single(num_samples: usize) -> Self {
        Self::new(1, num_samples)
    }
}

impl BatchSource for StaticBatches {
    fn num_batches(&self) -> usize {
        self.num_batches
    }

    fn num_samples(&self) -> usize {
        self.num_samples
    }
}

/// Model stub exposing a task kind and a mutable sampling mode.
pub struct StubModel {
    task: TaskKind,
    mode: Mutex<SamplingMode>,
}

impl StubModel {
    pub fn new(task: TaskKind) -> Self {
        Self {
            task,
            mode: Mutex::new(SamplingMode::Deterministic),
        }
    }

    pub fn regression() -> Self {
        Self::new(TaskKind::Regression)
    }
}

impl Model for StubModel {
    fn task_kind(&self) -> TaskKind {
        self.task
    }

    fn sampling_mode(&self) -> SamplingMode {
        *self.mode.lock().unwrap()
    }

    fn set_sampling_mode(&self, mode: SamplingMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

/// Engine that replays a script: call k returns the k-th entry, each a
/// per-batch output list. Errs once the script is exhausted.
pub struct ScriptedEngine {
    runs: Mutex<Vec<Vec<PredictionTensor>>>,
    cursor: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(runs: Vec<Vec<PredictionTensor>>) -> Self {
        Self {
            runs: Mutex::new(runs),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Script where every call returns a single-batch output.
    pub fn single_batch(outputs: Vec<PredictionTensor>) -> Self {
        Self::new(outputs.into_iter().map(|o| vec![o]).collect())
    }

    /// Number of inference runs performed so far.
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl InferenceEngine for ScriptedEngine {
    fn run(
        &self,
        _model: &dyn Model,
        _batches: &dyn BatchSource,
    ) -> Result<Vec<PredictionTensor>, UncertaintyError> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let runs = self.runs.lock().unwrap();
        runs.get(idx)
            .cloned()
            .ok_or_else(|| UncertaintyError::Inference("engine script exhausted".to_string()))
    }
}

/// Engine whose every run fails.
pub struct FailingEngine;

impl InferenceEngine for FailingEngine {
    fn run(
        &self,
        _model: &dyn Model,
        _batches: &dyn BatchSource,
    ) -> Result<Vec<PredictionTensor>, UncertaintyError> {
        Err(UncertaintyError::Inference("device lost".to_string()))
    }
}

/// (sample, target) tensor from row slices.
pub fn targets(rows: &[&[f64]]) -> PredictionTensor {
    let ncols = rows.first().map_or(0, |r| r.len());
    let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    let arr = Array2::from_shape_vec((rows.len(), ncols), flat)
        .expect("row slices must have equal lengths");
    PredictionTensor::Targets(arr)
}

/// Single-target column tensor from a flat sample list.
pub fn column(values: &[f64]) -> PredictionTensor {
    let arr = Array2::from_shape_vec((values.len(), 1), values.to_vec())
        .expect("shape follows from input length");
    PredictionTensor::Targets(arr)
}
