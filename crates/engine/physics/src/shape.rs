//! Collision shapes of bodies taking part in terrain and tree collision
//!
//! Only the subset the terrain pipeline understands is modelled directly.
//! Anything else (triangle meshes) can still be attached to a body, it is just
//! ignored by terrain contact generation.

use std::fmt;
use std::sync::Arc;

use glam::{Quat, Vec3};
use rapier3d::parry::shape::SharedShape;

use crate::math::to_na_point;

/// Local axis a capsule is aligned with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShapeAxis {
    X,
    Y,
    Z,
}

impl ShapeAxis {
    #[inline]
    pub fn unit(self) -> Vec3 {
        match self {
            ShapeAxis::X => Vec3::X,
            ShapeAxis::Y => Vec3::Y,
            ShapeAxis::Z => Vec3::Z,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            ShapeAxis::X => 0,
            ShapeAxis::Y => 1,
            ShapeAxis::Z => 2,
        }
    }
}

/// Convex hull of a point cloud, built once with parry
#[derive(Clone)]
pub struct ConvexHull {
    points: Arc<[Vec3]>,
    shape: SharedShape,
}

impl ConvexHull {
    /// Returns `None` for degenerate (flat or too small) point sets
    pub fn new(points: &[Vec3]) -> Option<Self> {
        let na_points: Vec<_> = points.iter().map(|p| to_na_point(*p)).collect();
        let shape = SharedShape::convex_hull(&na_points)?;
        Some(Self {
            points: points.into(),
            shape,
        })
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn parry_shape(&self) -> &SharedShape {
        &self.shape
    }
}

impl fmt::Debug for ConvexHull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvexHull")
            .field("points", &self.points.len())
            .finish()
    }
}

/// Child of a compound, positioned relative to the compound's frame
#[derive(Debug, Clone)]
pub struct CompoundChild {
    pub translation: Vec3,
    pub rotation: Quat,
    pub shape: CollisionShape,
}

#[derive(Debug, Clone)]
pub enum CollisionShape {
    Sphere {
        radius: f32,
    },
    Capsule {
        radius: f32,
        half_height: f32,
        axis: ShapeAxis,
    },
    Cuboid {
        half_extents: Vec3,
    },
    ConvexHull(ConvexHull),
    /// Children may themselves be compounds
    Compound(Arc<[CompoundChild]>),
    /// Not handled by terrain collision
    TriMesh {
        vertices: Arc<[Vec3]>,
        indices: Arc<[[u32; 3]]>,
    },
}

impl CollisionShape {
    pub fn sphere(radius: f32) -> Self {
        Self::Sphere { radius }
    }

    /// Capsule along the local Y axis
    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::Capsule {
            radius,
            half_height,
            axis: ShapeAxis::Y,
        }
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::Cuboid { half_extents }
    }

    pub fn compound(children: impl IntoIterator<Item = CompoundChild>) -> Self {
        Self::Compound(children.into_iter().collect())
    }

    /// Shape the terrain pipeline generates contacts for.
    ///
    /// Compounds qualify when at least one leaf does; unsupported leaves are
    /// skipped during flattening.
    pub fn is_terrain_collidable(&self) -> bool {
        match self {
            CollisionShape::Sphere { .. }
            | CollisionShape::Capsule { .. }
            | CollisionShape::Cuboid { .. }
            | CollisionShape::ConvexHull(_) => true,
            CollisionShape::Compound(children) => {
                children.iter().any(|c| c.shape.is_terrain_collidable())
            }
            CollisionShape::TriMesh { .. } => false,
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, CollisionShape::Compound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collidable_shapes() {
        assert!(CollisionShape::sphere(1.0).is_terrain_collidable());
        assert!(CollisionShape::capsule(0.5, 1.0).is_terrain_collidable());
        assert!(CollisionShape::cuboid(Vec3::ONE).is_terrain_collidable());

        let mesh = CollisionShape::TriMesh {
            vertices: Arc::from(vec![Vec3::ZERO, Vec3::X, Vec3::Z]),
            indices: Arc::from(vec![[0, 1, 2]]),
        };
        assert!(!mesh.is_terrain_collidable());

        let mixed = CollisionShape::compound([
            CompoundChild {
                translation: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                shape: mesh.clone(),
            },
            CompoundChild {
                translation: Vec3::Y,
                rotation: Quat::IDENTITY,
                shape: CollisionShape::sphere(0.5),
            },
        ]);
        assert!(mixed.is_terrain_collidable());

        let only_mesh = CollisionShape::compound([CompoundChild {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            shape: mesh,
        }]);
        assert!(!only_mesh.is_terrain_collidable());
    }

    #[test]
    fn test_convex_hull_from_cube_corners() {
        let mut corners = Vec::new();
        for x in [-1.0f32, 1.0] {
            for y in [-1.0f32, 1.0] {
                for z in [-1.0f32, 1.0] {
                    corners.push(Vec3::new(x, y, z));
                }
            }
        }
        let hull = ConvexHull::new(&corners).expect("cube hull");
        assert_eq!(hull.points().len(), 8);
        assert!(CollisionShape::ConvexHull(hull).is_terrain_collidable());
    }
}
