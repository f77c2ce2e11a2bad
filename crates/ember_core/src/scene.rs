//! Scene container: primitives plus the list of lights.

use std::sync::Arc;

use crate::light::AreaLight;
use crate::material::Material;
use crate::primitive::Primitive;
use crate::shape::{Shape, Triangle, TriangleMesh};
use crate::spectrum::Spectrum;

/// Flat lists of primitives and lights. Acceleration structures are built
/// over the primitive list by the renderer, not stored here.
#[derive(Default)]
pub struct Scene {
    primitives: Vec<Arc<Primitive>>,
    lights: Vec<Arc<AreaLight>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shape with a material. Meshes are expanded to per-triangle
    /// primitives so the acceleration structure can split them.
    pub fn add(&mut self, shape: Shape, material: Material) {
        let material = Arc::new(material);
        match shape {
            Shape::Mesh(mesh) => self.add_mesh(mesh, material),
            other => self
                .primitives
                .push(Arc::new(Primitive::new(Arc::new(other), material))),
        }
    }

    fn add_mesh(&mut self, mesh: Arc<TriangleMesh>, material: Arc<Material>) {
        for tri_index in 0..mesh.triangle_count() {
            self.primitives.push(Arc::new(Primitive::new(
                Arc::new(Shape::Triangle(Triangle {
                    mesh: Arc::clone(&mesh),
                    tri_index,
                })),
                Arc::clone(&material),
            )));
        }
    }

    /// Add an emitting shape. The light and its geometry share the shape so
    /// a ray hitting the primitive reports the emitter's radiance.
    pub fn add_light(
        &mut self,
        shape: Shape,
        le: Spectrum,
        two_sided: bool,
        material: Option<Material>,
    ) {
        let shape = Arc::new(shape);
        let light = Arc::new(AreaLight::new(le, Arc::clone(&shape), two_sided));
        self.lights.push(Arc::clone(&light));
        match shape.as_ref() {
            Shape::Mesh(mesh) => {
                let material = material.map(Arc::new);
                for tri_index in 0..mesh.triangle_count() {
                    self.primitives.push(Arc::new(Primitive::emissive(
                        Arc::new(Shape::Triangle(Triangle {
                            mesh: Arc::clone(mesh),
                            tri_index,
                        })),
                        material.clone(),
                        Arc::clone(&light),
                    )));
                }
            }
            _ => self.primitives.push(Arc::new(Primitive::emissive(
                shape,
                material.map(Arc::new),
                light,
            ))),
        }
    }

    pub fn primitives(&self) -> &[Arc<Primitive>] {
        &self.primitives
    }

    pub fn lights(&self) -> &[Arc<AreaLight>] {
        &self.lights
    }

    pub fn clear(&mut self) {
        self.primitives.clear();
        self.lights.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Sphere;
    use ember_math::Vec3;

    fn quad() -> Shape {
        Shape::Mesh(Arc::new(TriangleMesh::new(
            vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )))
    }

    #[test]
    fn test_mesh_expands_to_triangles() {
        let mut scene = Scene::new();
        scene.add(quad(), Material::diffuse(Spectrum::splat(0.5)));
        assert_eq!(scene.primitives().len(), 2);
        assert!(matches!(
            scene.primitives()[0].shape.as_ref(),
            Shape::Triangle(_)
        ));
    }

    #[test]
    fn test_light_shared_with_primitive() {
        let mut scene = Scene::new();
        scene.add_light(
            Shape::Sphere(Sphere {
                center: Vec3::ZERO,
                radius: 1.0,
            }),
            Spectrum::splat(5.0),
            false,
            None,
        );
        assert_eq!(scene.lights().len(), 1);
        assert_eq!(scene.primitives().len(), 1);
        assert!(scene.primitives()[0].area_light.is_some());
    }

    #[test]
    fn test_mesh_light_expansion_keeps_one_light() {
        let mut scene = Scene::new();
        scene.add_light(quad(), Spectrum::ONE, true, None);
        assert_eq!(scene.lights().len(), 1);
        assert_eq!(scene.primitives().len(), 2);
        assert!(scene.primitives().iter().all(|p| p.area_light.is_some()));
    }
}
