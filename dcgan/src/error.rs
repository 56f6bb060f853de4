use std::path::PathBuf;

/// Everything that can go wrong while building, training or inspecting a GAN.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failure inside a dfdx tensor op, allocation or optimizer step.
    #[error("tensor error: {0}")]
    Tensor(#[from] dfdx::tensor::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("safetensors error at {path}: {source:?}")]
    SafeTensors {
        path: PathBuf,
        source: dfdx::safetensors::SafeTensorError,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("plot error: {0}")]
    Plot(String),

    /// Batch norm statistics need at least two samples.
    #[error("batch of {0} images, at least 2 are needed")]
    BatchTooSmall(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
