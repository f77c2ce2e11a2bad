//! Render settings, deserializable from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// Which integrator drives the render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorKind {
    Path,
    Bdpt,
    LightTrace,
    Sppm,
}

/// Parameters specific to stochastic progressive photon mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SppmSettings {
    /// Photon-shoot + camera-pass iterations.
    pub iterations: u32,
    /// Photons emitted from the lights per iteration.
    pub photon_budget: u32,
    /// Photons gathered per density estimate.
    pub gather_count: usize,
    /// Initial squared search radius per pixel.
    pub initial_radius2: f32,
    /// Emit a separate caustic map (specular-to-diffuse photons).
    pub caustics: bool,
}

impl Default for SppmSettings {
    fn default() -> Self {
        Self {
            iterations: 8,
            photon_budget: 100_000,
            gather_count: 100,
            initial_radius2: 0.001,
            caustics: true,
        }
    }
}

/// Top-level render configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub integrator: IntegratorKind,
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u32,
    /// Maximum bounces for any subpath.
    pub max_depth: u32,
    /// Russian-roulette survival probability.
    pub russian_roulette: f32,
    /// Worker threads; None = hardware concurrency.
    pub num_threads: Option<usize>,
    pub sppm: SppmSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            integrator: IntegratorKind::Path,
            width: 512,
            height: 512,
            samples_per_pixel: 16,
            max_depth: 8,
            russian_roulette: 0.7,
            num_threads: None,
            sppm: SppmSettings::default(),
        }
    }
}

impl RenderSettings {
    pub fn from_json_file(path: &Path) -> Result<Self, RenderError> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| RenderError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }
}
