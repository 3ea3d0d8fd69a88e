use glam::Vec3;

use super::cache::{TreeBatchCache, TreeRef};
use super::flex::TreeCollisionContext;
use crate::body::Body;

/// Custom response of a yielding tree.
///
/// Called every step while a pair is in
/// [`FlexPhase::CustomHandling`](super::flex::FlexPhase::CustomHandling). The
/// implementation may change the body's velocity and the tree's break state,
/// and returns the current flex displacement of the crown in world space.
pub trait TreeDeflection {
    fn deflect(
        &mut self,
        body: &mut Body,
        ctx: &TreeCollisionContext,
        tree: TreeRef,
        dt: f32,
        cache: &mut TreeBatchCache,
    ) -> Vec3;
}

impl<F> TreeDeflection for F
where
    F: FnMut(&mut Body, &TreeCollisionContext, TreeRef, f32, &mut TreeBatchCache) -> Vec3,
{
    fn deflect(
        &mut self,
        body: &mut Body,
        ctx: &TreeCollisionContext,
        tree: TreeRef,
        dt: f32,
        cache: &mut TreeBatchCache,
    ) -> Vec3 {
        self(body, ctx, tree, dt, cache)
    }
}

/// Reference deflection: the trunk brakes the body with the yield force and
/// snaps if the body is still pushing into it when the collision time is up.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrakingDeflection;

impl TreeDeflection for BrakingDeflection {
    fn deflect(
        &mut self,
        body: &mut Body,
        ctx: &TreeCollisionContext,
        tree: TreeRef,
        dt: f32,
        cache: &mut TreeBatchCache,
    ) -> Vec3 {
        // force_dir opposes the velocity at impact
        let dir = ctx.force_dir;
        let into = -body.linear_velocity.dot(dir);
        if into > 0.0 {
            let dv = (ctx.braking_force * dt * body.inverse_mass).min(into);
            body.linear_velocity += dir * dv;
        }

        let elapsed = ctx.collision_duration + dt;
        // Same sum the pair accumulates, so this is exactly its final call
        let last_call = elapsed >= ctx.max_collision_duration;
        let progress = (elapsed / ctx.max_collision_duration).clamp(0.0, 1.0);
        let rotation = cache.proxy(tree).map(|p| p.transform.rotation);
        let Some(target) = cache.tree_mut(tree) else {
            return Vec3::ZERO;
        };

        let flex = -dir * progress * target.max_flex;
        let still_pushing = -body.linear_velocity.dot(dir) > 0.0;

        if last_call && still_pushing {
            target.break_state.set_broken();
            tracing::debug!(tree = target.identifier, "tree broke under impact");
        } else if let Some(rotation) = rotation {
            let local = rotation.inverse() * flex;
            let scale = target.max_flex.max(f32::EPSILON);
            target.break_state.set_bend(local.x / scale, local.z / scale);
        }

        flex
    }
}
