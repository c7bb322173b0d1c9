//! Error taxonomy shared by every stage of the generation pipeline.
//!
//! Nothing in teppan retries. Every variant is surfaced to the caller as soon as it
//! is observed; the single tolerated failure is [`GenerationError::AlreadyInitialized`]
//! coming out of [`ProcessGroup::init`](crate::distributed::ProcessGroup::init),
//! which the driver swallows.

use std::path::PathBuf;

/// Everything that can go wrong while planning, sampling or persisting a run.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// A seed-spec token matched neither `N` nor `A-B`
    #[error("invalid seed spec token '{token}': {reason}")]
    InvalidSeedSpec { token: String, reason: &'static str },

    /// A config override named a field that does not exist
    #[error("unknown generation config field '{0}'")]
    UnknownConfigField(String),

    /// A config field was given a value outside its domain
    #[error("invalid value for '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("either latents or seeds must be provided")]
    MissingInput,

    #[error("invalid batch plan: {0}")]
    InvalidBatchPlan(String),

    #[error("class index {class} is out of range for label dimension {label_dim}")]
    InvalidLabel { class: usize, label_dim: usize },

    #[error("expected a tensor of rank {expected}, got shape {actual:?}")]
    RankMismatch { expected: usize, actual: Vec<usize> },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("cannot write images with {0} channels, expected 1 or 3")]
    UnsupportedChannels(usize),

    /// Raised by `load_model` while a model is resident
    #[error("model '{}' is already loaded; call `unload_model` before loading another", .path.display())]
    ModelAlreadyLoaded { path: PathBuf },

    #[error("no model is loaded; call `load_model` first")]
    ModelNotLoaded,

    #[error("cannot create output directory '{}'", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("device error: {0}")]
    Device(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    /// Failures reported by a non-candle tensor backend
    #[error("tensor backend error: {0}")]
    Backend(String),

    /// Failures reported by a model loader or denoiser implementation
    #[error("model error: {0}")]
    Model(String),

    #[error("process group is already initialized")]
    AlreadyInitialized,

    #[error("coordination error: {0}")]
    Coordination(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, GenerationError>;
