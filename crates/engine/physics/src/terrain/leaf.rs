//! Compound flattening and per-leaf query volumes
//!
//! Terrain and tree contact generation work on convex leaves only. A body's
//! shape is flattened into `(leaf, world transform)` pairs with an explicit
//! stack, then each leaf gets an oriented box and a lod dimension for the
//! terrain query.

use glam::{DVec3, Mat3, Vec3};
use rapier3d::parry::shape::{Ball, Capsule, Cuboid, Shape, SharedShape};

use crate::config::PhysicsConfig;
use crate::math::{from_na_point, from_na_vector, to_na_isometry, to_na_point, to_na_vector, DIsometry};
use crate::shape::{CollisionShape, ConvexHull, ShapeAxis};

/// Convex shape a flattened leaf can be
#[derive(Debug, Clone)]
pub enum LeafShape {
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
    Convex(ConvexHull),
}

/// Parry shape for narrow phase, built on the stack where possible
pub enum NarrowShape {
    Ball(Ball),
    Capsule(Capsule),
    Cuboid(Cuboid),
    Shared(SharedShape),
}

impl NarrowShape {
    pub fn as_shape(&self) -> &dyn Shape {
        match self {
            NarrowShape::Ball(s) => s,
            NarrowShape::Capsule(s) => s,
            NarrowShape::Cuboid(s) => s,
            NarrowShape::Shared(s) => &**s,
        }
    }
}

impl LeafShape {
    pub fn narrow(&self) -> NarrowShape {
        match self {
            LeafShape::Sphere { radius } => NarrowShape::Ball(Ball::new(*radius)),
            LeafShape::Capsule {
                radius,
                half_height,
                axis,
            } => {
                let a = axis.unit() * *half_height;
                NarrowShape::Capsule(Capsule::new(to_na_point(-a), to_na_point(a), *radius))
            }
            LeafShape::Cuboid { half_extents } => {
                NarrowShape::Cuboid(Cuboid::new(to_na_vector(*half_extents)))
            }
            LeafShape::Convex(hull) => NarrowShape::Shared(hull.parry_shape().clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Leaf {
    pub shape: LeafShape,
    pub transform: DIsometry,
}

/// Flattens compound shapes into leaves, reusing its stack across calls
#[derive(Debug, Default)]
pub struct CompoundFlattener {
    stack: Vec<(CollisionShape, DIsometry)>,
}

impl CompoundFlattener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `out` with the convex leaves of `shape`.
    ///
    /// Returns the number of unsupported leaves that were skipped.
    pub fn flatten(&mut self, shape: &CollisionShape, transform: DIsometry, out: &mut Vec<Leaf>) -> usize {
        out.clear();
        self.stack.clear();

        let mut skipped = Self::visit(shape, transform, &mut self.stack, out);
        while let Some((shape, transform)) = self.stack.pop() {
            skipped += Self::visit(&shape, transform, &mut self.stack, out);
        }
        skipped
    }

    fn visit(
        shape: &CollisionShape,
        transform: DIsometry,
        stack: &mut Vec<(CollisionShape, DIsometry)>,
        out: &mut Vec<Leaf>,
    ) -> usize {
        let leaf = match shape {
            CollisionShape::Sphere { radius } => LeafShape::Sphere { radius: *radius },
            CollisionShape::Capsule {
                radius,
                half_height,
                axis,
            } => LeafShape::Capsule {
                radius: *radius,
                half_height: *half_height,
                axis: *axis,
            },
            CollisionShape::Cuboid { half_extents } => LeafShape::Cuboid {
                half_extents: *half_extents,
            },
            CollisionShape::ConvexHull(hull) => LeafShape::Convex(hull.clone()),
            CollisionShape::Compound(children) => {
                // Reversed so leaves come out in declaration order
                for child in children.iter().rev() {
                    let child_transform = transform.compose(child.translation, child.rotation);
                    stack.push((child.shape.clone(), child_transform));
                }
                return 0;
            }
            CollisionShape::TriMesh { .. } => return 1,
        };

        out.push(Leaf {
            shape: leaf,
            transform,
        });
        0
    }
}

/// Query volume of one leaf
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafVolume {
    /// Centre of the oriented box
    pub center: DVec3,
    /// Box axes scaled by the half extents
    pub basis: Mat3,
    /// Radius of the sphere used for tree candidate tests
    pub radius: f32,
    /// Feature size terrain detail should resolve
    pub lod_dimension: f32,
}

impl LeafVolume {
    pub fn new(leaf: &Leaf, config: &PhysicsConfig) -> Self {
        let rotation = leaf.transform.rotation;
        let rot = Mat3::from_quat(rotation);

        match &leaf.shape {
            LeafShape::Sphere { radius } => {
                let r = radius + config.sphere_margin;
                Self {
                    center: leaf.transform.translation,
                    basis: rot * Mat3::from_diagonal(Vec3::splat(r)),
                    radius: r,
                    lod_dimension: r,
                }
            }
            LeafShape::Capsule {
                radius,
                half_height,
                axis,
            } => {
                let mut half = Vec3::splat(radius + config.capsule_margin);
                half[axis.index()] += half_height;
                Self {
                    center: leaf.transform.translation,
                    basis: rot * Mat3::from_diagonal(half),
                    radius: radius + half_height + config.capsule_margin,
                    lod_dimension: *radius,
                }
            }
            LeafShape::Cuboid { .. } | LeafShape::Convex(_) => {
                let narrow = leaf.shape.narrow();
                let shape = narrow.as_shape();

                let local = shape.compute_local_aabb();
                let local_center = from_na_point(&local.center());
                let half = from_na_vector(&local.half_extents());

                let sphere = shape.compute_local_bounding_sphere();
                let offset = (from_na_point(sphere.center()) - local_center).length();

                let oriented = shape.compute_aabb(&to_na_isometry(Vec3::ZERO, rotation));
                let world_half = from_na_vector(&oriented.half_extents());

                Self {
                    center: leaf.transform.transform_point(local_center),
                    basis: rot * Mat3::from_diagonal(half),
                    radius: sphere.radius() + offset,
                    lod_dimension: world_half.min_element(),
                }
            }
        }
    }

    /// Half extents of the oriented box
    pub fn half_extents(&self) -> Vec3 {
        Vec3::new(
            self.basis.x_axis.length(),
            self.basis.y_axis.length(),
            self.basis.z_axis.length(),
        )
    }
}
