//! Library error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmberError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
