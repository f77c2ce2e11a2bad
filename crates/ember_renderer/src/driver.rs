//! Render driver state machine.
//!
//! The driver owns the scene, camera, film and worker pool and moves through
//! `Init -> Ready -> {Visualize | Rendering} -> Done`. Scene and camera
//! setters gate the `Init -> Ready` edge; `start_raytracing` runs a full
//! render synchronously, handing film tiles to the active integrator through
//! the scheduler; `stop` is the only way back to `Ready`, honoured between
//! tiles through a shared cancel flag.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use ember_core::{Camera, Film, Scene};

use crate::accel::{Bvh, SplitMethod};
use crate::config::{IntegratorKind, RenderSettings};
use crate::error::RenderError;
use crate::integrator::{
    BdptIntegrator, Integrator, LightTraceIntegrator, PathIntegrator, RenderContext,
    SppmIntegrator,
};
use crate::parallel::Scheduler;

const BVH_MAX_LEAF_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Init,
    Ready,
    Visualize,
    Rendering,
    Done,
}

pub struct RenderDriver {
    settings: RenderSettings,
    scheduler: Scheduler,
    scene: Scene,
    camera: Option<Camera>,
    film: Mutex<Film>,
    state: RenderState,
    cancel: Arc<AtomicBool>,
    tiles_done: AtomicU32,
    last_percent: AtomicU32,
}

impl RenderDriver {
    pub fn new(settings: RenderSettings) -> Self {
        let scheduler = Scheduler::new(settings.num_threads);
        let film = Mutex::new(Film::new(settings.width, settings.height));
        Self {
            settings,
            scheduler,
            scene: Scene::new(),
            camera: None,
            film,
            state: RenderState::Init,
            cancel: Arc::new(AtomicBool::new(false)),
            tiles_done: AtomicU32::new(0),
            last_percent: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Shared cancel flag; setting it stops the render after the tile in
    /// flight.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Install the scene. Only honoured before the first render setup; any
    /// later call is a no-op.
    pub fn set_scene(&mut self, scene: Scene) {
        if self.state != RenderState::Init {
            log::warn!("set_scene ignored in state {:?}", self.state);
            return;
        }
        self.scene = scene;
    }

    /// Install the camera and arm the driver.
    pub fn set_camera(&mut self, camera: Camera) {
        match self.state {
            RenderState::Init | RenderState::Ready => {
                self.camera = Some(camera);
                self.state = RenderState::Ready;
            }
            _ => log::warn!("set_camera ignored in state {:?}", self.state),
        }
    }

    /// Enter the live-display mode: `frame` can be polled until `stop`.
    pub fn visualize(&mut self) -> Result<(), RenderError> {
        if self.state != RenderState::Ready {
            return Err(RenderError::InvalidState(self.state));
        }
        self.state = RenderState::Visualize;
        Ok(())
    }

    /// Run every pass of the configured integrator to completion, blocking
    /// the caller. Ends in `Done`, or back in `Ready` when cancelled.
    pub fn start_raytracing(&mut self) -> Result<(), RenderError> {
        if self.state != RenderState::Ready {
            return Err(RenderError::InvalidState(self.state));
        }
        let camera = self.camera.clone().ok_or(RenderError::InvalidState(self.state))?;
        self.state = RenderState::Rendering;
        self.cancel.store(false, Ordering::Relaxed);
        self.tiles_done.store(0, Ordering::Relaxed);
        self.last_percent.store(0, Ordering::Relaxed);
        {
            let mut film = self.film.lock().unwrap();
            *film = Film::new(self.settings.width, self.settings.height);
        }

        log::info!(
            "building BVH over {} primitives",
            self.scene.primitives().len()
        );
        let bvh = Bvh::build(
            self.scene.primitives().to_vec(),
            BVH_MAX_LEAF_SIZE,
            SplitMethod::Sah,
        );
        let ctx = RenderContext {
            bvh: &bvh,
            lights: self.scene.lights(),
            camera: &camera,
        };
        let integrator = self.build_integrator();
        let passes = integrator.passes();
        let extent = self.film.lock().unwrap().whole_bounds();
        let tiles_total = tile_count(extent, &self.scheduler) * passes;
        log::info!(
            "rendering {}x{} on {} threads, {} pass(es)",
            self.settings.width,
            self.settings.height,
            self.scheduler.thread_count(),
            passes
        );

        for pass in 0..passes {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            integrator.begin_pass(&ctx, &self.scheduler, pass);
            self.scheduler.parallel_for_2d(extent, |tile| {
                if self.cancel.load(Ordering::Relaxed) {
                    return;
                }
                integrator.render_tile(&ctx, &self.film, tile, pass);
                let done = self.tiles_done.fetch_add(1, Ordering::Relaxed) + 1;
                let percent = done * 100 / tiles_total.max(1);
                if percent > self.last_percent.swap(percent, Ordering::Relaxed) {
                    log::info!("progress {}%", percent);
                }
            });
        }

        if self.cancel.load(Ordering::Relaxed) {
            log::info!("render cancelled");
            self.state = RenderState::Ready;
        } else {
            integrator.finish(&ctx, &self.film);
            self.state = RenderState::Done;
        }
        Ok(())
    }

    /// Return to `Ready` from any active or finished mode.
    pub fn stop(&mut self) {
        match self.state {
            RenderState::Visualize | RenderState::Done => self.state = RenderState::Ready,
            RenderState::Rendering => {
                self.cancel.store(true, Ordering::Relaxed);
                self.state = RenderState::Ready;
            }
            _ => {}
        }
    }

    /// Synchronous convenience: render and write a binary PPM.
    pub fn render(&mut self, path: &Path) -> Result<(), RenderError> {
        self.start_raytracing()?;
        if self.state == RenderState::Done {
            self.save_image(path)?;
        }
        Ok(())
    }

    pub fn save_image(&self, path: &Path) -> Result<(), RenderError> {
        let film = self.film.lock().unwrap();
        film.write_ppm(path, 1.0)?;
        log::info!("wrote {}", path.display());
        Ok(())
    }

    /// Current film as packed 8-bit RGBA for live display.
    pub fn frame(&self) -> Vec<u8> {
        self.film.lock().unwrap().to_rgba(1.0)
    }

    fn build_integrator(&self) -> Box<dyn Integrator> {
        let s = &self.settings;
        // stratified samplers want a power-of-two sample count
        let spp = s.samples_per_pixel.next_power_of_two();
        match s.integrator {
            IntegratorKind::Path => {
                Box::new(PathIntegrator::new(spp, s.max_depth, s.russian_roulette))
            }
            IntegratorKind::Bdpt => {
                Box::new(BdptIntegrator::new(spp, s.max_depth, s.russian_roulette))
            }
            IntegratorKind::LightTrace => {
                Box::new(LightTraceIntegrator::new(spp, s.max_depth, s.russian_roulette))
            }
            IntegratorKind::Sppm => Box::new(SppmIntegrator::new(
                s.width,
                s.height,
                s.sppm.iterations,
                s.sppm.photon_budget,
                s.sppm.gather_count,
                s.sppm.initial_radius2,
                s.sppm.caustics,
                s.max_depth,
                s.russian_roulette,
            )),
        }
    }
}

/// Number of tiles `parallel_for_2d` will hand out for `extent`, mirroring
/// its square tiling.
fn tile_count(extent: ember_math::Bounds2i, scheduler: &Scheduler) -> u32 {
    let w = (extent.max.x - extent.min.x).max(0);
    let h = (extent.max.y - extent.min.y).max(0);
    let tile = crate::parallel::tile_size(extent, scheduler.thread_count());
    let tiles_x = (w + tile - 1) / tile;
    let tiles_y = (h + tile - 1) / tile;
    (tiles_x * tiles_y) as u32
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_core::{Shape, Spectrum, TriangleMesh, Vec3};

    use super::*;

    fn tiny_settings(kind: IntegratorKind) -> RenderSettings {
        RenderSettings {
            integrator: kind,
            width: 8,
            height: 8,
            samples_per_pixel: 2,
            max_depth: 3,
            num_threads: Some(2),
            ..RenderSettings::default()
        }
    }

    fn tiny_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_light(
            Shape::Mesh(Arc::new(TriangleMesh::new(
                vec![
                    Vec3::new(-2.0, -2.0, 4.0),
                    Vec3::new(2.0, -2.0, 4.0),
                    Vec3::new(2.0, 2.0, 4.0),
                    Vec3::new(-2.0, 2.0, 4.0),
                ],
                vec![[0, 1, 2], [0, 2, 3]],
            ))),
            Spectrum::splat(4.0),
            true,
            None,
        );
        scene
    }

    fn tiny_camera() -> Camera {
        Camera::new(Vec3::ZERO, Vec3::Z, Vec3::Y, 45.0, (8, 8), 0.0, 1.0)
    }

    #[test]
    fn test_state_machine_gates() {
        let mut driver = RenderDriver::new(tiny_settings(IntegratorKind::Path));
        assert_eq!(driver.state(), RenderState::Init);
        // not armed yet
        assert!(driver.start_raytracing().is_err());
        assert!(driver.visualize().is_err());

        driver.set_scene(tiny_scene());
        assert_eq!(driver.state(), RenderState::Init);
        driver.set_camera(tiny_camera());
        assert_eq!(driver.state(), RenderState::Ready);

        // scene swaps are no longer honoured
        driver.set_scene(Scene::new());
        assert!(!driver.scene.lights().is_empty());

        driver.visualize().unwrap();
        assert_eq!(driver.state(), RenderState::Visualize);
        assert!(driver.start_raytracing().is_err());
        driver.stop();
        assert_eq!(driver.state(), RenderState::Ready);
    }

    #[test]
    fn test_render_reaches_done_and_restarts() {
        let mut driver = RenderDriver::new(tiny_settings(IntegratorKind::Path));
        driver.set_scene(tiny_scene());
        driver.set_camera(tiny_camera());
        driver.start_raytracing().unwrap();
        assert_eq!(driver.state(), RenderState::Done);
        // emitter fills the frame
        let frame = driver.frame();
        assert_eq!(frame.len(), 8 * 8 * 4);
        assert!(frame[0] > 0);

        assert!(driver.start_raytracing().is_err());
        driver.stop();
        assert_eq!(driver.state(), RenderState::Ready);
        driver.start_raytracing().unwrap();
        assert_eq!(driver.state(), RenderState::Done);
    }

    #[test]
    fn test_cancel_before_start_is_cleared() {
        let mut driver = RenderDriver::new(tiny_settings(IntegratorKind::Path));
        driver.set_scene(tiny_scene());
        driver.set_camera(tiny_camera());
        driver.cancel_flag().store(true, Ordering::Relaxed);
        driver.start_raytracing().unwrap();
        assert_eq!(driver.state(), RenderState::Done);
    }

    #[test]
    fn test_render_writes_ppm() {
        let mut driver = RenderDriver::new(tiny_settings(IntegratorKind::Path));
        driver.set_scene(tiny_scene());
        driver.set_camera(tiny_camera());
        let path = std::env::temp_dir().join("ember_driver_test.ppm");
        driver.render(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P6"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sppm_driver_round_trip() {
        let mut settings = tiny_settings(IntegratorKind::Sppm);
        settings.sppm.iterations = 2;
        settings.sppm.photon_budget = 500;
        let mut driver = RenderDriver::new(settings);
        driver.set_scene(tiny_scene());
        driver.set_camera(tiny_camera());
        driver.start_raytracing().unwrap();
        assert_eq!(driver.state(), RenderState::Done);
    }
}
