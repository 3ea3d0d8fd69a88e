//! Leaf against terrain triangle contact generation
//!
//! Everything here is f32 relative to the triangle buffer's anchor. Spheres
//! use a closest-point test, every other leaf goes through parry.

use glam::{DVec3, Vec3};
use rapier3d::na::Isometry3;
use rapier3d::parry::query;
use rapier3d::parry::shape::Triangle as ParryTriangle;

use super::leaf::{Leaf, LeafShape, NarrowShape};
use super::triangle::Triangle;
use crate::math::{closest_point_on_triangle, from_na_point, from_na_vector, to_na_point};

/// One contact between a leaf and a triangle, anchor-relative
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleContact {
    pub point_on_body: Vec3,
    pub point_on_triangle: Vec3,
    /// Unit normal from the triangle toward the body
    pub normal: Vec3,
    /// Signed separation, negative when penetrating
    pub distance: f32,
}

/// How a leaf is collided against triangles
pub enum ContactStrategy {
    Sphere { center: Vec3, radius: f32 },
    Capsule { iso: Isometry3<f32>, shape: NarrowShape },
    Convex { iso: Isometry3<f32>, shape: NarrowShape },
}

impl ContactStrategy {
    pub fn for_leaf(leaf: &Leaf, anchor: DVec3) -> Self {
        match &leaf.shape {
            LeafShape::Sphere { radius } => ContactStrategy::Sphere {
                center: (leaf.transform.translation - anchor).as_vec3(),
                radius: *radius,
            },
            LeafShape::Capsule { .. } => ContactStrategy::Capsule {
                iso: leaf.transform.to_na_relative(anchor),
                shape: leaf.shape.narrow(),
            },
            LeafShape::Cuboid { .. } | LeafShape::Convex(_) => ContactStrategy::Convex {
                iso: leaf.transform.to_na_relative(anchor),
                shape: leaf.shape.narrow(),
            },
        }
    }

    /// Contact with one triangle closer than `prediction`
    pub fn collide(&self, triangle: &Triangle, prediction: f32) -> Option<TriangleContact> {
        match self {
            ContactStrategy::Sphere { center, radius } => sphere_triangle(*center, *radius, triangle, prediction),
            ContactStrategy::Capsule { iso, shape } | ContactStrategy::Convex { iso, shape } => {
                let tri = ParryTriangle::new(to_na_point(triangle.a), to_na_point(triangle.b), to_na_point(triangle.c));
                let contact = match query::contact(iso, shape.as_shape(), &Isometry3::identity(), &tri, prediction) {
                    Ok(Some(c)) => c,
                    Ok(None) => return None,
                    Err(_) => {
                        tracing::trace!("unsupported shape pair in terrain narrow phase");
                        return None;
                    }
                };
                (contact.dist < prediction).then(|| TriangleContact {
                    point_on_body: from_na_point(&contact.point1),
                    point_on_triangle: from_na_point(&contact.point2),
                    normal: from_na_vector(&contact.normal2),
                    distance: contact.dist,
                })
            }
        }
    }

    /// Collide against every triangle, appending `(triangle index, contact)`
    pub fn generate(&self, triangles: &[Triangle], prediction: f32, out: &mut Vec<(usize, TriangleContact)>) {
        out.extend(
            triangles
                .iter()
                .enumerate()
                .filter_map(|(i, t)| self.collide(t, prediction).map(|c| (i, c))),
        );
    }
}

fn sphere_triangle(center: Vec3, radius: f32, triangle: &Triangle, prediction: f32) -> Option<TriangleContact> {
    let closest = closest_point_on_triangle(center, triangle.a, triangle.b, triangle.c);
    let delta = center - closest;
    let face = triangle.normal();

    // Behind the face the sphere is pushed out along the face normal
    let (normal, distance) = match delta.dot(face) {
        d if d < 0.0 && face != Vec3::ZERO => (face, d - radius),
        _ => {
            let len = delta.length();
            let normal = if len > 1.0e-6 { delta / len } else { face };
            (normal, len - radius)
        }
    };

    if normal == Vec3::ZERO || distance >= prediction {
        return None;
    }

    Some(TriangleContact {
        point_on_body: center - normal * radius,
        point_on_triangle: closest,
        normal,
        distance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::DIsometry;
    use crate::shape::ShapeAxis;

    fn ground() -> Triangle {
        Triangle::new(Vec3::new(-5.0, 0.0, -5.0), Vec3::new(0.0, 0.0, 5.0), Vec3::new(5.0, 0.0, -5.0))
    }

    fn leaf(shape: LeafShape, y: f64) -> Leaf {
        Leaf {
            shape,
            transform: DIsometry::from_translation(DVec3::new(0.0, 6.0e6 + y, 0.0)),
        }
    }

    const ANCHOR: DVec3 = DVec3::new(0.0, 6.0e6, 0.0);

    #[test]
    fn test_sphere_resting_contact() {
        let strategy = ContactStrategy::for_leaf(&leaf(LeafShape::Sphere { radius: 0.5 }, 0.49), ANCHOR);
        let contact = strategy.collide(&ground(), 0.005).unwrap();
        assert!((contact.distance + 0.01).abs() < 1e-4);
        assert!((contact.normal - Vec3::Y).length() < 1e-5);
        assert!(contact.point_on_body.y.abs() < 1e-4);
    }

    #[test]
    fn test_sphere_out_of_prediction() {
        let strategy = ContactStrategy::for_leaf(&leaf(LeafShape::Sphere { radius: 0.5 }, 0.52), ANCHOR);
        assert!(strategy.collide(&ground(), 0.005).is_none());
    }

    #[test]
    fn test_sphere_centre_below_face() {
        let strategy = ContactStrategy::for_leaf(&leaf(LeafShape::Sphere { radius: 0.5 }, -0.1), ANCHOR);
        let contact = strategy.collide(&ground(), 0.005).unwrap();
        assert!((contact.normal - Vec3::Y).length() < 1e-5);
        assert!((contact.distance + 0.6).abs() < 1e-4);
    }

    #[test]
    fn test_capsule_contact() {
        let capsule = LeafShape::Capsule {
            radius: 0.3,
            half_height: 1.0,
            axis: ShapeAxis::Y,
        };
        let strategy = ContactStrategy::for_leaf(&leaf(capsule, 1.25), ANCHOR);
        let contact = strategy.collide(&ground(), 0.005).unwrap();
        assert!(contact.distance < 0.0);
        assert!(contact.normal.y > 0.99);
    }

    #[test]
    fn test_cuboid_generate() {
        let cuboid = LeafShape::Cuboid {
            half_extents: Vec3::splat(0.5),
        };
        let strategy = ContactStrategy::for_leaf(&leaf(cuboid, 0.45), ANCHOR);
        let far = Triangle::new(Vec3::new(50.0, 0.0, 0.0), Vec3::new(50.0, 0.0, 1.0), Vec3::new(51.0, 0.0, 0.0));
        let mut out = Vec::new();
        strategy.generate(&[far, ground()], 0.005, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 1);
        assert!(out[0].1.distance < 0.0);
    }
}
