use glam::DVec3;

use crate::body::{BodyHandle, BodySet};
use crate::spatial::CollisionIndex;

/// Wake every sleeping body of the global index within `radius`.
///
/// Island objects are never simulated, so only the global index is searched.
/// Returns the number of bodies woken.
pub fn wake_up_in_radius(
    index: &CollisionIndex<BodyHandle>,
    bodies: &mut BodySet,
    center: DVec3,
    radius: f64,
) -> usize {
    let mut found = Vec::new();
    index.query_sphere(center, radius, &mut found);

    let woken = found
        .into_iter()
        .filter(|&handle| bodies.get_mut(handle).is_some_and(|body| body.wake_up()))
        .count();
    if woken > 0 {
        tracing::trace!(woken, ?center, radius, "woke bodies");
    }
    woken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{ActivationState, Body};
    use crate::math::DAabb;
    use crate::shape::CollisionShape;

    #[test]
    fn test_wakes_only_sleeping_bodies_in_range() {
        let mut bodies = BodySet::new();
        let mut index = CollisionIndex::new(0.1, None);

        let mut handles = Vec::new();
        for (i, activation) in [
            ActivationState::Sleeping,
            ActivationState::Active,
            ActivationState::Sleeping,
        ]
        .into_iter()
        .enumerate()
        {
            let position = DVec3::new(i as f64 * 10.0, 0.0, 0.0);
            let mut body = Body::dynamic(CollisionShape::sphere(0.5), 1.0, position);
            body.activation = activation;
            let handle = bodies.insert(body);
            index.insert(handle, DAabb::from_sphere(position, 0.5), false);
            handles.push(handle);
        }

        assert_eq!(wake_up_in_radius(&index, &mut bodies, DVec3::new(5.0, 0.0, 0.0), 6.0), 1);
        assert_eq!(bodies.get(handles[0]).unwrap().activation, ActivationState::Active);
        assert_eq!(bodies.get(handles[2]).unwrap().activation, ActivationState::Sleeping);
    }
}
