// Copyright @yucwang 2026

use thiserror::Error;

/// Errors raised by the renderer core.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("shape error: {0}")]
    Shape(String),

    #[error("transformation and data batch size mismatch: {transforms} - {batch}")]
    BatchMismatch { transforms: usize, batch: usize },

    #[error("all cameras must have the same resolution (DHW), found {0}; sort cameras into batches first")]
    MixedResolution(String),

    #[error("configuration conflict: {0}")]
    Config(String),

    #[error("static camera setup does not match: {0}")]
    StaticMismatch(String),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("no backward rule registered for {0}")]
    MissingGradient(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("OpenEXR error: {0}")]
    Exr(#[from] exr::error::Error),

    #[error("invalid settings: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;
