//! Double-precision volumes and transforms plus rapier conversions
//!
//! World positions are `f64` so that a body thousands of kilometres from the
//! planet centre keeps millimetre precision. Rotations stay `f32` and narrow
//! phase runs in `f32` around a local anchor.

use glam::{DVec3, Mat3, Quat, Vec3, Vec4};
use rapier3d::na::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};

/// Axis-aligned bounding box in world space
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DAabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl DAabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Box centred on `center` with the given half extents
    pub fn from_center_half_extents(center: DVec3, half: DVec3) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn from_sphere(center: DVec3, radius: f64) -> Self {
        Self::from_center_half_extents(center, DVec3::splat(radius))
    }

    /// Bounds of an oriented box whose `basis` columns are its axes scaled by
    /// the half extents
    pub fn from_oriented_box(center: DVec3, basis: Mat3) -> Self {
        let half = basis.x_axis.abs() + basis.y_axis.abs() + basis.z_axis.abs();
        Self::from_center_half_extents(center, half.as_dvec3())
    }

    /// Smallest box containing all points, `None` for an empty iterator
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |acc, p| Self {
            min: acc.min.min(p),
            max: acc.max.max(p),
        }))
    }

    #[inline]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_extents(&self) -> DVec3 {
        (self.max - self.min) * 0.5
    }

    #[inline]
    pub fn intersects(&self, other: &DAabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    #[inline]
    pub fn contains(&self, other: &DAabb) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    #[inline]
    pub fn contains_point(&self, p: DVec3) -> bool {
        self.min.cmple(p).all() && self.max.cmpge(p).all()
    }

    pub fn union(&self, other: &DAabb) -> DAabb {
        DAabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn expanded(&self, margin: f64) -> DAabb {
        DAabb {
            min: self.min - DVec3::splat(margin),
            max: self.max + DVec3::splat(margin),
        }
    }

    /// Half the surface area, the cost metric used for tree insertion
    #[inline]
    pub fn perimeter(&self) -> f64 {
        let d = self.max - self.min;
        d.x * d.y + d.y * d.z + d.z * d.x
    }

    /// Squared distance from a point to the box, zero inside
    pub fn distance_squared_to_point(&self, p: DVec3) -> f64 {
        let clamped = p.clamp(self.min, self.max);
        (p - clamped).length_squared()
    }

    /// Squared distance from a point to the farthest corner
    pub fn max_distance_squared_to_point(&self, p: DVec3) -> f64 {
        let far = (p - self.min).abs().max((self.max - p).abs());
        far.length_squared()
    }

    /// Distance along a normalized ray to where it enters the box, zero when
    /// it starts inside. Slab test clipped to `[0, max_distance]`.
    pub fn ray_entry(&self, origin: DVec3, direction: DVec3, max_distance: f64) -> Option<f64> {
        let mut near = 0.0f64;
        let mut far = max_distance;
        for axis in 0..3 {
            let (o, d) = (origin[axis], direction[axis]);
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if d.abs() < f64::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let (t0, t1) = ((lo - o) * inv, (hi - o) * inv);
            near = near.max(t0.min(t1));
            far = far.min(t0.max(t1));
            if near > far {
                return None;
            }
        }
        Some(near)
    }

    /// Signed distance of the centre to a plane relative to `origin`, and the
    /// half extent of the box projected on the plane normal
    pub fn plane_extent(&self, origin: DVec3, plane: Vec4) -> (f64, f64) {
        let n = plane.truncate().as_dvec3();
        let center = self.center() - origin;
        let dist = n.dot(center) + plane.w as f64;
        let radius = n.abs().dot(self.half_extents());
        (dist, radius)
    }
}

/// Rigid transform with a double-precision translation
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DIsometry {
    pub translation: DVec3,
    pub rotation: Quat,
}

impl Default for DIsometry {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl DIsometry {
    pub const IDENTITY: Self = Self {
        translation: DVec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(translation: DVec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn from_translation(translation: DVec3) -> Self {
        Self::new(translation, Quat::IDENTITY)
    }

    /// Compose with a child transform expressed in this frame
    pub fn compose(&self, local_translation: Vec3, local_rotation: Quat) -> DIsometry {
        DIsometry {
            translation: self.translation + (self.rotation * local_translation).as_dvec3(),
            rotation: (self.rotation * local_rotation).normalize(),
        }
    }

    #[inline]
    pub fn transform_point(&self, local: Vec3) -> DVec3 {
        self.translation + (self.rotation * local).as_dvec3()
    }

    #[inline]
    pub fn inverse_transform_point(&self, world: DVec3) -> Vec3 {
        self.rotation.inverse() * (world - self.translation).as_vec3()
    }

    /// Single-precision rapier isometry relative to `anchor`
    pub fn to_na_relative(&self, anchor: DVec3) -> Isometry3<f32> {
        to_na_isometry((self.translation - anchor).as_vec3(), self.rotation)
    }
}

#[inline]
pub fn to_na_point(v: Vec3) -> Point3<f32> {
    Point3::new(v.x, v.y, v.z)
}

#[inline]
pub fn to_na_vector(v: Vec3) -> Vector3<f32> {
    Vector3::new(v.x, v.y, v.z)
}

#[inline]
pub fn from_na_point(p: &Point3<f32>) -> Vec3 {
    Vec3::new(p.x, p.y, p.z)
}

#[inline]
pub fn from_na_vector(v: &Vector3<f32>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

pub fn to_na_isometry(translation: Vec3, rotation: Quat) -> Isometry3<f32> {
    Isometry3::from_parts(
        Translation3::new(translation.x, translation.y, translation.z),
        UnitQuaternion::from_quaternion(Quaternion::new(
            rotation.w, rotation.x, rotation.y, rotation.z,
        )),
    )
}

/// Squared distance from `p` to the segment `a`-`b`
pub fn distance_squared_point_segment(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return (p - a).length_squared();
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).length_squared()
}

/// Closest point to `p` on triangle `abc` (Voronoi region walk)
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Unit vector along `v`, falling back to `fallback` for degenerate input
#[inline]
pub fn normalize_or(v: DVec3, fallback: DVec3) -> DVec3 {
    let len = v.length();
    if len > f64::EPSILON {
        v / len
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_intersects_and_contains() {
        let a = DAabb::new(DVec3::ZERO, DVec3::ONE);
        let b = DAabb::new(DVec3::splat(0.5), DVec3::splat(2.0));
        let c = DAabb::new(DVec3::splat(0.25), DVec3::splat(0.75));
        let far = DAabb::new(DVec3::splat(3.0), DVec3::splat(4.0));

        assert!(a.intersects(&b));
        assert!(!a.intersects(&far));
        assert!(a.contains(&c));
        assert!(!a.contains(&b));
        assert_eq!(a.union(&far).max, DVec3::splat(4.0));
    }

    #[test]
    fn test_aabb_point_distances() {
        let a = DAabb::new(DVec3::ZERO, DVec3::ONE);
        assert_eq!(a.distance_squared_to_point(DVec3::splat(0.5)), 0.0);
        assert!((a.distance_squared_to_point(DVec3::new(3.0, 0.5, 0.5)) - 4.0).abs() < 1e-12);
        assert!((a.max_distance_squared_to_point(DVec3::ZERO) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_ray_entry() {
        let a = DAabb::new(DVec3::new(2.0, -1.0, -1.0), DVec3::new(4.0, 1.0, 1.0));
        let t = a.ray_entry(DVec3::ZERO, DVec3::X, 10.0).unwrap();
        assert!((t - 2.0).abs() < 1e-12);

        // Too short, pointing away, parallel outside the slab
        assert!(a.ray_entry(DVec3::ZERO, DVec3::X, 1.5).is_none());
        assert!(a.ray_entry(DVec3::ZERO, DVec3::NEG_X, 10.0).is_none());
        assert!(a.ray_entry(DVec3::new(0.0, 2.0, 0.0), DVec3::X, 10.0).is_none());

        assert_eq!(a.ray_entry(DVec3::new(3.0, 0.0, 0.0), DVec3::Y, 0.1), Some(0.0));

        let diagonal = DVec3::new(1.0, 1.0, 0.0).normalize();
        let t = a.ray_entry(DVec3::new(0.0, -2.0, 0.0), diagonal, 10.0).unwrap();
        assert!((t - 2.0 * std::f64::consts::SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_oriented_box_bounds() {
        let basis = Mat3::from_quat(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2))
            * Mat3::from_diagonal(Vec3::new(2.0, 1.0, 0.5));
        let a = DAabb::from_oriented_box(DVec3::new(10.0, 0.0, 0.0), basis);
        assert!((a.half_extents() - DVec3::new(0.5, 1.0, 2.0)).length() < 1e-6);
        assert!((a.center().x - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_plane_extent() {
        let a = DAabb::from_center_half_extents(DVec3::new(0.0, 5.0, 0.0), DVec3::ONE);
        let (dist, radius) = a.plane_extent(DVec3::ZERO, Vec4::new(0.0, 1.0, 0.0, -2.0));
        assert!((dist - 3.0).abs() < 1e-9);
        assert!((radius - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_isometry_round_trip_far_from_origin() {
        let iso = DIsometry::new(
            DVec3::new(6.4e6, 12.0, -3.0e5),
            Quat::from_rotation_y(0.7),
        );
        let local = Vec3::new(0.25, -1.5, 3.0);
        let world = iso.transform_point(local);
        let back = iso.inverse_transform_point(world);
        assert!((back - local).length() < 1e-4);
    }

    #[test]
    fn test_compose_child_offset() {
        let parent = DIsometry::new(DVec3::new(10.0, 0.0, 0.0), Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let child = parent.compose(Vec3::X, Quat::IDENTITY);
        assert!((child.translation - DVec3::new(10.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_closest_point_regions() {
        let a = Vec3::ZERO;
        let b = Vec3::X;
        let c = Vec3::Z;

        // Above the face
        let p = closest_point_on_triangle(Vec3::new(0.2, 1.0, 0.2), a, b, c);
        assert!((p - Vec3::new(0.2, 0.0, 0.2)).length() < 1e-6);

        // Vertex region
        let p = closest_point_on_triangle(Vec3::new(-1.0, 0.0, -1.0), a, b, c);
        assert!(p.length() < 1e-6);

        // Edge region
        let p = closest_point_on_triangle(Vec3::new(0.5, 0.0, -1.0), a, b, c);
        assert!((p - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_point_segment_distance() {
        let d = distance_squared_point_segment(Vec3::new(1.0, 2.0, 0.0), Vec3::ZERO, Vec3::Y * 4.0);
        assert!((d - 1.0).abs() < 1e-6);
        let d = distance_squared_point_segment(Vec3::new(0.0, -2.0, 0.0), Vec3::ZERO, Vec3::Y * 4.0);
        assert!((d - 4.0).abs() < 1e-6);
    }
}
