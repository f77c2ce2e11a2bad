//! EMBER core scene model.
//!
//! Everything the renderer consumes but does not own: spectra, shapes,
//! materials, lights, the thin-lens camera, the film, and the samplers.
//! Geometry is expressed with closed tagged enums rather than trait objects;
//! the shape and material sets are known at compile time.

mod camera;
mod error;
mod film;
mod light;
pub mod lowdiscrepancy;
mod material;
mod primitive;
mod sampler;
pub mod sampling;
mod scene;
mod shape;
mod spectrum;

pub use camera::{Camera, CameraWiSample};
pub use error::EmberError;
pub use film::{Film, FilmTile, Pixel};
pub use light::{AreaLight, LightLeSample, LightLiSample};
pub use material::{BsdfSample, Material, TransportMode};
pub use primitive::{Intersection, Primitive};
pub use sampler::{Sampler, StratifiedSampler};
pub use scene::Scene;
pub use shape::{Shape, ShapeHit, ShapePoint, Sphere, Triangle, TriangleMesh};
pub use spectrum::{Spectrum, SpectrumExt};

/// Re-export common math types
pub use ember_math::{abs_dot, Bounds2i, Bounds3, Ray, Vec2, Vec3};
