//! Offline renderer: BVH acceleration, a blocking worker pool, four light
//! transport integrators and the state-machine driver that ties them to a
//! film.
//!
//! Scene content and sampling primitives live in `ember_core`; this crate
//! adds everything needed to turn a populated [`ember_core::Scene`] into an
//! image. The usual entry point is [`RenderDriver`]:
//!
//! ```no_run
//! use ember_renderer::{RenderDriver, RenderSettings};
//! # fn scene() -> ember_core::Scene { ember_core::Scene::new() }
//! # fn camera() -> ember_core::Camera { unimplemented!() }
//! let mut driver = RenderDriver::new(RenderSettings::default());
//! driver.set_scene(scene());
//! driver.set_camera(camera());
//! driver.render(std::path::Path::new("out.ppm")).unwrap();
//! ```

pub mod accel;
pub mod config;
pub mod driver;
mod error;
pub mod integrator;
pub mod parallel;
pub mod photon;

pub use accel::{Bvh, SplitMethod};
pub use config::{IntegratorKind, RenderSettings, SppmSettings};
pub use driver::{RenderDriver, RenderState};
pub use error::RenderError;
pub use integrator::{
    BdptIntegrator, Integrator, LightTraceIntegrator, PathIntegrator, RenderContext,
    SppmIntegrator,
};
pub use parallel::Scheduler;
pub use photon::PhotonMap;
