//! Tree flex and break model
//!
//! The first time a body touches a tree, the impact is turned into a bending
//! stress at the trunk base:
//!
//! ```text
//! dp  = |v| / inverse_mass          momentum of the body
//! f   = dp / t                      average force over the collision time t
//! sig = f * l * r / I               bending stress, l = height of the contact
//! ```
//!
//! Below the yield stress the tree is rigid and the contact goes to the
//! solver like any other. At or above it the trunk yields: contacts are
//! dropped and a [`TreeDeflection`] brakes the body with the force the trunk
//! can still carry, `sig_max * I / (l * r)`, for the rest of the collision
//! time.

use glam::{DVec3, Vec3};
use rapier3d::parry::query;

use super::cache::{TreeBatchCache, TreeRef};
use super::deflection::TreeDeflection;
use super::pairs::TreeCollisionPair;
use crate::body::{Body, Material};
use crate::config::PhysicsConfig;
use crate::manifold::{ContactPoint, ManifoldDispatcher, ManifoldPartner};
use crate::math::{from_na_point, from_na_vector, to_na_isometry};
use crate::terrain::leaf::{CompoundFlattener, Leaf};

/// Smallest lever arm used in the stress formula
const MIN_LEVER_ARM: f32 = 1.0e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlexPhase {
    /// No penetrating contact seen yet
    #[default]
    Idle,
    /// Touched, tree did not yield
    Colliding,
    /// Tree yields and deflects the body
    CustomHandling,
    /// Collision time elapsed
    Done,
}

/// Flex state of one body/tree pair
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeCollisionContext {
    pub tree_identifier: u16,
    pub phase: FlexPhase,
    /// Height of the contact above the trunk base
    pub lever_arm: f32,
    pub braking_force: f32,
    /// Time spent in custom handling
    pub collision_duration: f32,
    pub max_collision_duration: f32,
    /// Contact point in the tree proxy's frame
    pub force_apply_point: Vec3,
    /// Unit vector against the body's velocity at impact
    pub force_dir: Vec3,
    /// Local up at the body at impact
    pub orig_tree_dir: Vec3,
}

impl TreeCollisionContext {
    pub fn new(tree_identifier: u16, max_collision_duration: f32) -> Self {
        Self {
            tree_identifier,
            phase: FlexPhase::Idle,
            lever_arm: 0.0,
            braking_force: 0.0,
            collision_duration: 0.0,
            max_collision_duration,
            force_apply_point: Vec3::ZERO,
            force_dir: Vec3::ZERO,
            orig_tree_dir: Vec3::ZERO,
        }
    }
}

/// Stress at the trunk base for one impact
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactAssessment {
    pub momentum: f32,
    pub force: f32,
    pub stress: f32,
    /// Set when the trunk yields
    pub braking_force: Option<f32>,
}

/// Evaluate an impact.
///
/// # Arguments
/// * `lever_arm` - Height of the contact above the trunk base
/// * `speed` - Body speed
/// * `inverse_mass` - Body inverse mass, must be positive
/// * `radius` - Trunk radius
/// * `i` - Second moment of area of the trunk
/// * `sig_max` - Yield stress
/// * `collision_time` - Time over which the momentum is absorbed
///
/// # Returns
/// `None` for static bodies.
pub fn assess_impact(
    lever_arm: f32,
    speed: f32,
    inverse_mass: f32,
    radius: f32,
    i: f32,
    sig_max: f32,
    collision_time: f32,
) -> Option<ImpactAssessment> {
    if inverse_mass <= 0.0 || collision_time <= 0.0 || i <= 0.0 {
        return None;
    }

    let l = lever_arm.max(MIN_LEVER_ARM);
    let momentum = speed / inverse_mass;
    let force = momentum / collision_time;
    let stress = force * l * radius / i;

    let braking_force = (stress >= sig_max).then(|| sig_max * i / (l * radius));

    Some(ImpactAssessment {
        momentum,
        force,
        stress,
        braking_force,
    })
}

/// Scratch shared by all pairs of a step
#[derive(Debug, Default)]
pub(crate) struct PairScratch {
    pub(crate) flattener: CompoundFlattener,
    pub(crate) leaves: Vec<Leaf>,
}

/// Advance one pair by one step: narrow phase, then the flex state machine.
///
/// Returns the flex displacement when the tree is deflecting the body.
pub(crate) fn step_pair<D: ManifoldDispatcher + ?Sized>(
    pair: &mut TreeCollisionPair,
    body: &mut Body,
    cache: &mut TreeBatchCache,
    dispatcher: &mut D,
    deflection: &mut dyn TreeDeflection,
    scratch: &mut PairScratch,
    config: &PhysicsConfig,
    dt: f32,
) -> Option<Vec3> {
    let proxy = *cache.proxy(pair.tree)?;
    let (radius, i, sig_max) = {
        let tree = cache.tree(pair.tree)?;
        (tree.radius, tree.i, tree.sig_max)
    };

    let manifold = dispatcher.manifold_mut(pair.manifold)?;
    debug_assert!(
        matches!(manifold.partner(), ManifoldPartner::Tree { epoch, .. } if epoch == cache.epoch()),
        "tree manifold partner not re-linked after cache relocation"
    );
    manifold.clear();

    let ctx = &mut pair.context;
    match ctx.phase {
        FlexPhase::Done => return None,
        FlexPhase::CustomHandling => return deflect(ctx, pair.tree, body, cache, deflection, dt),
        FlexPhase::Idle | FlexPhase::Colliding => {}
    }

    // Narrow phase against the trunk capsule, relative to its centre
    let anchor = proxy.origin();
    let tree_iso = to_na_isometry(Vec3::ZERO, proxy.transform.rotation);
    let inv_rotation = proxy.transform.rotation.inverse();
    let body_iso = body.isometry();

    scratch
        .flattener
        .flatten(&body.shape, body_iso, &mut scratch.leaves);

    for leaf in &scratch.leaves {
        let narrow = leaf.shape.narrow();
        let leaf_iso = leaf.transform.to_na_relative(anchor);
        let contact = match query::contact(
            &leaf_iso,
            narrow.as_shape(),
            &tree_iso,
            &proxy.shape,
            config.contact_prediction,
        ) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(_) => {
                tracing::trace!("unsupported shape pair in tree narrow phase");
                continue;
            }
        };

        let on_body = anchor + from_na_point(&contact.point1).as_dvec3();
        let on_tree = from_na_point(&contact.point2);
        manifold.add_point(ContactPoint {
            local_point_a: body_iso.inverse_transform_point(on_body),
            local_point_b: inv_rotation * on_tree,
            world_point_b: anchor + on_tree.as_dvec3(),
            normal_on_b: from_na_vector(&contact.normal2),
            distance: contact.dist,
            material: body.material.combine(&Material::default()),
            triangle: None,
        });
    }

    if ctx.phase != FlexPhase::Idle || manifold.is_empty() {
        return None;
    }

    // First frame with contacts
    let deepest = manifold.deepest().map(|i| manifold.points()[i])?;
    if deepest.distance >= 0.0 {
        // Not penetrating yet, try again next frame
        manifold.clear();
        return None;
    }
    ctx.phase = FlexPhase::Colliding;

    let lever_arm = proxy.half_height() + deepest.local_point_b.y;
    let speed = body.linear_velocity.length();
    let impact = assess_impact(
        lever_arm,
        speed,
        body.inverse_mass,
        radius,
        i,
        sig_max,
        ctx.max_collision_duration,
    )?;

    let Some(braking_force) = impact.braking_force else {
        tracing::trace!(
            tree = ctx.tree_identifier,
            stress = impact.stress,
            "tree holds under impact"
        );
        return None;
    };

    ctx.phase = FlexPhase::CustomHandling;
    ctx.lever_arm = lever_arm.max(MIN_LEVER_ARM);
    ctx.braking_force = braking_force;
    ctx.force_apply_point = deepest.local_point_b;
    ctx.force_dir = (-body.linear_velocity).normalize_or_zero();
    ctx.orig_tree_dir = body.position.normalize_or(DVec3::Y).as_vec3();
    tracing::debug!(
        tree = ctx.tree_identifier,
        stress = impact.stress,
        braking_force,
        "tree yields under impact"
    );

    manifold.clear();
    deflect(ctx, pair.tree, body, cache, deflection, dt)
}

fn deflect(
    ctx: &mut TreeCollisionContext,
    tree: TreeRef,
    body: &mut Body,
    cache: &mut TreeBatchCache,
    deflection: &mut dyn TreeDeflection,
    dt: f32,
) -> Option<Vec3> {
    if ctx.collision_duration >= ctx.max_collision_duration {
        ctx.phase = FlexPhase::Done;
        return None;
    }
    let displacement = deflection.deflect(body, ctx, tree, dt, cache);
    ctx.collision_duration += dt;
    Some(displacement)
}
