//! Per-step statistics and debug geometry
//!
//! Nothing here renders. [`DebugCapture`] collects what the pipeline touched
//! during a step and turns it into world-space line segments for whoever
//! draws them.

use std::collections::BTreeMap;

use glam::{DVec3, Vec3};

use crate::terrain::Triangle;
use crate::trees::Tree;

/// Counters and timings of the last step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhysicsStats {
    pub bodies_processed: u32,
    pub leaves_processed: u32,
    pub leaves_skipped: u32,
    pub triangles_processed: u32,
    pub trees_processed: u32,
    pub terrain_contacts: u32,
    pub terrain_manifolds: u32,
    pub tree_pairs: u32,
    pub pairs_swept: u32,
    pub cache_relocations: u32,

    pub total_time_ms: f32,
    pub terrain_query_time_ms: f32,
    pub triangle_time_ms: f32,
    pub tree_time_ms: f32,
}

impl PhysicsStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// World-space line segment
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugLine {
    pub from: DVec3,
    pub to: DVec3,
    pub kind: DebugLineKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DebugLineKind {
    TerrainEdge,
    Trunk,
    /// Trunk of a tree currently flexing under a body
    FlexedTrunk,
}

#[derive(Debug, Clone, Copy)]
struct TreeSnapshot {
    base: DVec3,
    top: DVec3,
}

#[derive(Debug, Default)]
pub struct DebugCapture {
    enabled: bool,
    triangles: Vec<[DVec3; 3]>,
    trees: BTreeMap<u16, TreeSnapshot>,
    flex: BTreeMap<u16, Vec3>,
}

impl DebugCapture {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.triangles.clear();
        self.trees.clear();
        self.flex.clear();
    }

    pub fn record_triangles(&mut self, anchor: DVec3, triangles: &[Triangle]) {
        self.triangles.extend(
            triangles
                .iter()
                .map(|t| [t.a, t.b, t.c].map(|v| anchor + v.as_dvec3())),
        );
    }

    /// Record a standing tree's trunk
    pub fn record_tree(&mut self, tree: &Tree) {
        debug_assert!(!tree.is_broken(), "broken tree {} recorded", tree.identifier);
        self.trees.insert(
            tree.identifier,
            TreeSnapshot {
                base: tree.pos,
                top: tree.top(),
            },
        );
    }

    /// Current crown displacement of a flexing tree
    pub fn record_flex(&mut self, identifier: u16, displacement: Vec3) {
        self.flex.insert(identifier, displacement);
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn flex(&self, identifier: u16) -> Option<Vec3> {
        self.flex.get(&identifier).copied()
    }

    /// Triangle edges then trunks, in a stable order
    pub fn lines(&self) -> Vec<DebugLine> {
        let mut lines = Vec::with_capacity(self.triangles.len() * 3 + self.trees.len());

        for [a, b, c] in &self.triangles {
            for (from, to) in [(a, b), (b, c), (c, a)] {
                lines.push(DebugLine {
                    from: *from,
                    to: *to,
                    kind: DebugLineKind::TerrainEdge,
                });
            }
        }

        for (id, tree) in &self.trees {
            let (to, kind) = match self.flex.get(id) {
                Some(d) => (tree.top + d.as_dvec3(), DebugLineKind::FlexedTrunk),
                None => (tree.top, DebugLineKind::Trunk),
            };
            lines.push(DebugLine {
                from: tree.base,
                to,
                kind,
            });
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Triangle {
        Triangle::new(Vec3::ZERO, Vec3::X, Vec3::Z)
    }

    #[test]
    fn test_lines_cover_triangles_and_trees() {
        let mut capture = DebugCapture::new(true);
        capture.record_triangles(DVec3::new(0.0, 100.0, 0.0), &[triangle(), triangle()]);

        let tree = Tree::new(7, DVec3::new(0.0, 100.0, 0.0), 0.2, 5.0, 1.0e7);
        capture.record_tree(&tree);
        capture.record_tree(&tree);

        let lines = capture.lines();
        assert_eq!(lines.len(), 7);
        assert!(lines[..6].iter().all(|l| l.kind == DebugLineKind::TerrainEdge));
        assert_eq!(lines[6].kind, DebugLineKind::Trunk);
        assert!((lines[0].from.y - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_flexed_trunk_is_displaced() {
        let mut capture = DebugCapture::new(true);
        let tree = Tree::new(1, DVec3::new(0.0, 10.0, 0.0), 0.2, 5.0, 1.0e7);
        capture.record_tree(&tree);
        capture.record_flex(1, Vec3::new(0.5, 0.0, 0.0));

        let line = capture.lines()[0];
        assert_eq!(line.kind, DebugLineKind::FlexedTrunk);
        assert!((line.to - DVec3::new(0.5, 15.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_disable_clears() {
        let mut capture = DebugCapture::new(true);
        capture.record_triangles(DVec3::ZERO, &[triangle()]);
        capture.set_enabled(false);
        assert_eq!(capture.triangle_count(), 0);
        assert!(capture.lines().is_empty());
    }

    #[test]
    fn test_stats_reset() {
        let mut stats = PhysicsStats {
            bodies_processed: 3,
            total_time_ms: 1.5,
            ..Default::default()
        };
        stats.reset();
        assert_eq!(stats, PhysicsStats::default());
    }
}
