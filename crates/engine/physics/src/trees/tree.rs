use glam::DVec3;

use crate::math::normalize_or;

/// Two-byte transient state a tree carries while being hit.
///
/// The layout is shared with the renderer, which reads the same bytes to bend
/// trees. A tree is broken when the first byte is `-128` and the second is
/// anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BreakState([i8; 2]);

impl BreakState {
    const BROKEN: i8 = -128;

    pub fn from_bytes(bytes: [i8; 2]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn bytes(&self) -> [i8; 2] {
        self.0
    }

    #[inline]
    pub fn is_broken(&self) -> bool {
        self.0[0] == Self::BROKEN && self.0[1] != Self::BROKEN
    }

    pub fn set_broken(&mut self) {
        self.0 = [Self::BROKEN, 0];
    }

    /// Reset transient state. A broken tree stays broken.
    pub fn clear(&mut self) {
        if !self.is_broken() {
            self.0 = [0, 0];
        }
    }

    /// Store a bend direction for display, each component in -127..=127
    pub fn set_bend(&mut self, x: f32, z: f32) {
        if self.is_broken() {
            return;
        }
        let q = |v: f32| (v.clamp(-1.0, 1.0) * 127.0).round() as i8;
        self.0 = [q(x), q(z)];
    }
}

/// One tree instance on the planet surface
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tree {
    /// Stable across reloads of the owning cell
    pub identifier: u16,
    /// Base of the trunk
    pub pos: DVec3,
    /// Trunk radius
    pub radius: f32,
    pub height: f32,
    /// Second moment of area of the trunk cross-section
    pub i: f32,
    /// Modulus of elasticity
    pub e: f32,
    /// Stress at which the trunk yields
    pub sig_max: f32,
    /// Largest displacement of the crown when flexing
    pub max_flex: f32,
    pub break_state: BreakState,
}

impl Tree {
    /// Tree with a solid circular trunk
    ///
    /// # Arguments
    /// * `identifier` - Identifier unique within the planet
    /// * `pos` - Trunk base in world space
    /// * `radius` - Trunk radius
    /// * `height` - Trunk height
    /// * `sig_max` - Yield stress
    pub fn new(identifier: u16, pos: DVec3, radius: f32, height: f32, sig_max: f32) -> Self {
        Self {
            identifier,
            pos,
            radius,
            height,
            i: std::f32::consts::FRAC_PI_4 * radius.powi(4),
            e: 1.0e10,
            sig_max,
            max_flex: height * 0.1,
            break_state: BreakState::default(),
        }
    }

    /// Unit trunk direction, away from the planet centre
    #[inline]
    pub fn axis(&self) -> DVec3 {
        normalize_or(self.pos, DVec3::Y)
    }

    /// Top of the trunk
    #[inline]
    pub fn top(&self) -> DVec3 {
        self.pos + self.axis() * self.height as f64
    }

    #[inline]
    pub fn is_broken(&self) -> bool {
        self.break_state.is_broken()
    }
}
