use glam::{DVec3, Vec3};

use crate::body::Material;

/// Terrain triangle relative to its buffer's anchor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
    pub material: Material,
    /// Provider-defined surface flags
    pub flags: u32,
    /// Index in the provider's source mesh
    pub index: u32,
}

impl Triangle {
    /// Triangle with default material; counter-clockwise seen from the front
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self {
            a,
            b,
            c,
            material: Material {
                friction: 1.0,
                rolling_friction: 1.0,
                restitution: 1.0,
            },
            flags: 0,
            index: 0,
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    /// Unit front-face normal, zero for degenerate triangles
    pub fn normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a).normalize_or_zero()
    }
}

/// Triangles of one region query sharing a world-space anchor
#[derive(Debug, Clone, Default)]
pub struct TriangleBuffer {
    pub anchor: DVec3,
    pub triangles: Vec<Triangle>,
}

impl TriangleBuffer {
    pub fn clear(&mut self) {
        self.anchor = DVec3::ZERO;
        self.triangles.clear();
    }

    /// Add a triangle given in world space
    pub fn push_world(&mut self, a: DVec3, b: DVec3, c: DVec3) -> &mut Triangle {
        let anchor = self.anchor;
        let local = |p: DVec3| (p - anchor).as_vec3();
        self.triangles.push(Triangle::new(local(a), local(b), local(c)));
        let last = self.triangles.len() - 1;
        &mut self.triangles[last]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_winding() {
        let t = Triangle::new(Vec3::ZERO, Vec3::Z, Vec3::X);
        assert!((t.normal() - Vec3::Y).length() < 1e-6);

        let degenerate = Triangle::new(Vec3::ZERO, Vec3::X, Vec3::X * 2.0);
        assert_eq!(degenerate.normal(), Vec3::ZERO);
    }

    #[test]
    fn test_push_world_is_anchor_relative() {
        let mut buffer = TriangleBuffer {
            anchor: DVec3::new(6.0e6, 0.0, 0.0),
            triangles: Vec::new(),
        };
        let t = buffer
            .push_world(
                DVec3::new(6.0e6, 1.0, 0.0),
                DVec3::new(6.0e6 + 0.5, 0.0, 0.0),
                DVec3::new(6.0e6, 0.0, 0.25),
            )
            .with_index(9);
        assert_eq!(t.index, 9);
        assert_eq!(buffer.triangles[0].a, Vec3::Y);
        assert_eq!(buffer.triangles[0].b, Vec3::new(0.5, 0.0, 0.0));

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
