//! Minimal rigid-body model
//!
//! The dynamics engine owns integration and constraint solving. This layer
//! only needs a body's pose, shape, velocity, mass and activation, plus the
//! one terrain manifold it may hold.

use glam::{DVec3, Quat, Vec3};
use rapier3d::data::{Arena, Index};

use crate::manifold::ManifoldHandle;
use crate::math::DIsometry;
use crate::shape::CollisionShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BodyHandle(pub(crate) Index);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActivationState {
    #[default]
    Active,
    Sleeping,
    /// Excluded from simulation entirely
    Disabled,
}

/// Surface response coefficients, combined multiplicatively with the partner's
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Material {
    pub friction: f32,
    pub rolling_friction: f32,
    pub restitution: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: 0.5,
            rolling_friction: 0.0,
            restitution: 0.0,
        }
    }
}

impl Material {
    /// Combined coefficients for a contact between two surfaces
    pub fn combine(&self, other: &Material) -> Material {
        Material {
            friction: self.friction * other.friction,
            rolling_friction: self.rolling_friction * other.rolling_friction,
            restitution: self.restitution * other.restitution,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Body {
    pub position: DVec3,
    pub rotation: Quat,
    pub shape: CollisionShape,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Zero for static bodies
    pub inverse_mass: f32,
    pub activation: ActivationState,
    pub material: Material,
    pub(crate) terrain_manifold: Option<ManifoldHandle>,
}

impl Body {
    /// Create a dynamic body
    ///
    /// # Arguments
    /// * `shape` - Collision shape
    /// * `mass` - Mass in kg, must be positive
    /// * `position` - World position
    pub fn dynamic(shape: CollisionShape, mass: f32, position: DVec3) -> Self {
        debug_assert!(mass > 0.0, "dynamic body needs a positive mass");
        Self {
            position,
            rotation: Quat::IDENTITY,
            shape,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inverse_mass: if mass > 0.0 { 1.0 / mass } else { 0.0 },
            activation: ActivationState::Active,
            material: Material::default(),
            terrain_manifold: None,
        }
    }

    pub fn fixed(shape: CollisionShape, position: DVec3) -> Self {
        Self {
            inverse_mass: 0.0,
            ..Self::dynamic(shape, 1.0, position)
        }
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.inverse_mass > 0.0
    }

    #[inline]
    pub fn isometry(&self) -> DIsometry {
        DIsometry::new(self.position, self.rotation)
    }

    /// Terrain manifold currently held by this body
    #[inline]
    pub fn terrain_manifold(&self) -> Option<ManifoldHandle> {
        self.terrain_manifold
    }

    /// Reactivate a sleeping body, returns whether anything changed
    pub fn wake_up(&mut self) -> bool {
        if self.activation == ActivationState::Sleeping {
            self.activation = ActivationState::Active;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Default)]
pub struct BodySet {
    bodies: Arena<Body>,
}

impl BodySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, body: Body) -> BodyHandle {
        BodyHandle(self.bodies.insert(body))
    }

    /// Remove a body without touching any manifold it holds.
    ///
    /// Prefer [`TerrainContactPipeline::remove_body`](crate::terrain::TerrainContactPipeline::remove_body),
    /// which releases the terrain manifold and tree pairs first.
    pub fn remove(&mut self, handle: BodyHandle) -> Option<Body> {
        self.bodies.remove(handle.0)
    }

    #[inline]
    pub fn get(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(handle.0)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: BodyHandle) -> Option<&mut Body> {
        self.bodies.get_mut(handle.0)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BodyHandle, &Body)> {
        self.bodies.iter().map(|(i, b)| (BodyHandle(i), b))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (BodyHandle, &mut Body)> {
        self.bodies.iter_mut().map(|(i, b)| (BodyHandle(i), b))
    }

    /// Append all live handles to `out` (cleared first)
    pub fn collect_handles(&self, out: &mut Vec<BodyHandle>) {
        out.clear();
        out.extend(self.bodies.iter().map(|(i, _)| BodyHandle(i)));
    }
}
