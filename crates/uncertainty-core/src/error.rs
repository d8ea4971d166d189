use thiserror::Error;

#[derive(Error, Debug)]
pub enum UncertaintyError {
    #[error("Unknown uncertainty strategy: {0}")]
    UnknownStrategy(String),

    #[error("Duplicate uncertainty strategy: {0}")]
    DuplicateStrategy(String),

    #[error("Insufficient models: {0}")]
    InsufficientModels(String),

    #[error("Too many models: {0}")]
    TooManyModels(String),

    #[error("Incompatible model output: {0}")]
    IncompatibleModelOutput(String),

    #[error("Strategy not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid estimator configuration: {0}")]
    InvalidConfig(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}
