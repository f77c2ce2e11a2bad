//! Renders a Cornell box with a mirror and a glass sphere.
//!
//! Usage: cornell [settings.json] [output.ppm]
//!
//! Without arguments it path-traces at the default settings; a JSON settings
//! file can switch the integrator (`path`, `bdpt`, `light_trace`, `sppm`)
//! and every sampling knob.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use ember_core::{Camera, Material, Scene, Shape, Spectrum, Sphere, TriangleMesh, Vec3};
use ember_renderer::{RenderDriver, RenderSettings};

fn quad(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> Shape {
    Shape::Mesh(Arc::new(TriangleMesh::new(
        vec![a, b, c, d],
        vec![[0, 1, 2], [0, 2, 3]],
    )))
}

fn cornell_box() -> Scene {
    let mut scene = Scene::new();
    let white = Material::diffuse(Spectrum::new(0.73, 0.73, 0.73));
    let red = Material::diffuse(Spectrum::new(0.63, 0.065, 0.05));
    let green = Material::diffuse(Spectrum::new(0.14, 0.45, 0.09));

    // box interior, 555 units a side, open towards the camera at -z
    let (x0, x1, y0, y1, z0, z1) = (0.0, 555.0, 0.0, 555.0, 0.0, 555.0);
    scene.add(
        quad(
            Vec3::new(x0, y0, z0),
            Vec3::new(x1, y0, z0),
            Vec3::new(x1, y0, z1),
            Vec3::new(x0, y0, z1),
        ),
        white.clone(),
    );
    scene.add(
        quad(
            Vec3::new(x0, y1, z0),
            Vec3::new(x0, y1, z1),
            Vec3::new(x1, y1, z1),
            Vec3::new(x1, y1, z0),
        ),
        white.clone(),
    );
    scene.add(
        quad(
            Vec3::new(x0, y0, z1),
            Vec3::new(x1, y0, z1),
            Vec3::new(x1, y1, z1),
            Vec3::new(x0, y1, z1),
        ),
        white,
    );
    scene.add(
        quad(
            Vec3::new(x0, y0, z0),
            Vec3::new(x0, y0, z1),
            Vec3::new(x0, y1, z1),
            Vec3::new(x0, y1, z0),
        ),
        red,
    );
    scene.add(
        quad(
            Vec3::new(x1, y0, z0),
            Vec3::new(x1, y1, z0),
            Vec3::new(x1, y1, z1),
            Vec3::new(x1, y0, z1),
        ),
        green,
    );

    scene.add(
        Shape::Sphere(Sphere {
            center: Vec3::new(180.0, 100.0, 370.0),
            radius: 100.0,
        }),
        Material::mirror(Spectrum::splat(0.95)),
    );
    scene.add(
        Shape::Sphere(Sphere {
            center: Vec3::new(400.0, 100.0, 220.0),
            radius: 100.0,
        }),
        Material::glass(Spectrum::splat(0.98), Spectrum::splat(0.98), 1.0, 1.5),
    );

    scene.add_light(
        quad(
            Vec3::new(213.0, 554.0, 227.0),
            Vec3::new(343.0, 554.0, 227.0),
            Vec3::new(343.0, 554.0, 332.0),
            Vec3::new(213.0, 554.0, 332.0),
        ),
        Spectrum::new(17.0, 12.0, 4.0),
        false,
        None,
    );
    scene
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => RenderSettings::from_json_file(Path::new(&path))?,
        None => RenderSettings::default(),
    };
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("cornell.ppm"));

    let camera = Camera::new(
        Vec3::new(278.0, 278.0, -800.0),
        Vec3::new(278.0, 278.0, 0.0),
        Vec3::Y,
        40.0,
        (settings.width, settings.height),
        0.0,
        10.0,
    );

    let mut driver = RenderDriver::new(settings);
    driver.set_scene(cornell_box());
    driver.set_camera(camera);
    driver.render(&output)?;
    println!("wrote {}", output.display());
    Ok(())
}
