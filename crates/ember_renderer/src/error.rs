use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the renderer crate.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Core(#[from] ember_core::EmberError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse render settings from {path}: {source}")]
    Settings {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("render driver is in state {0:?}, operation not available")]
    InvalidState(crate::driver::RenderState),
}
