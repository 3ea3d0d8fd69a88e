use glam::{DVec3, Mat3, Vec3, Vec4};
use planet_physics::broadphase::{Group, InteractionGroups};
use planet_physics::{
    BroadphaseRegistry, CollisionIndex, DAabb, FlatPatchProvider, FrustumPolicy, IslandHandle,
    ObjectId, PhysicsConfig,
};

fn cube(center: DVec3, half: f64) -> DAabb {
    DAabb::from_center_half_extents(center, DVec3::splat(half))
}

struct World {
    registry: BroadphaseRegistry,
    index: CollisionIndex<ObjectId>,
    provider: FlatPatchProvider,
    near: IslandHandle,
    far: IslandHandle,
}

/// Two islands 100 m apart, one global object between them
fn world() -> World {
    let config = PhysicsConfig::default();
    let mut registry = BroadphaseRegistry::from_config(&config);
    let mut index = CollisionIndex::from_config(&config);
    let mut provider = FlatPatchProvider::new(0.0, 1.0);

    let near_bounds = cube(DVec3::ZERO, 10.0);
    let near = registry.create(near_bounds.min, near_bounds.max);
    provider.add_island(near, near_bounds);
    let far_bounds = cube(DVec3::new(100.0, 0.0, 0.0), 10.0);
    let far = registry.create(far_bounds.min, far_bounds.max);
    provider.add_island(far, far_bounds);

    registry
        .add_object(near, ObjectId(1), cube(DVec3::new(1.0, 0.0, 0.0), 0.5), InteractionGroups::all())
        .unwrap();
    registry
        .add_procedural_object(near, ObjectId(2), cube(DVec3::new(-3.0, 0.0, 0.0), 0.5), InteractionGroups::all())
        .unwrap();
    registry
        .add_object(far, ObjectId(3), cube(DVec3::new(100.0, 0.0, 0.0), 0.5), InteractionGroups::all())
        .unwrap();
    index.insert(ObjectId(10), cube(DVec3::new(50.0, 0.0, 0.0), 0.5), false);

    World {
        registry,
        index,
        provider,
        near,
        far,
    }
}

#[test]
fn test_sphere_query_spans_index_and_reported_islands() {
    let mut w = world();
    let mut out = Vec::new();

    w.registry
        .query_sphere(&w.index, &mut w.provider, DVec3::ZERO, 5.0, 0, &mut out);
    out.sort();
    assert_eq!(out, vec![ObjectId(1), ObjectId(2)]);
    assert!(w.registry.get(w.near).unwrap().was_used_this_frame());
    assert!(!w.registry.get(w.far).unwrap().was_used_this_frame());

    out.clear();
    w.registry
        .query_sphere(&w.index, &mut w.provider, DVec3::new(75.0, 0.0, 0.0), 30.0, 0, &mut out);
    out.sort();
    assert_eq!(out, vec![ObjectId(3), ObjectId(10)]);

    w.registry.begin_frame();
    assert!(w.registry.iter().all(|(_, island)| !island.was_used_this_frame()));
}

#[test]
fn test_first_in_sphere_honours_exclusion() {
    let mut w = world();

    let first = w
        .registry
        .first_in_sphere(&w.index, &mut w.provider, DVec3::new(1.0, 0.0, 0.0), 0.1, 0, None);
    assert_eq!(first, Some(ObjectId(1)));

    let excluded = w.registry.first_in_sphere(
        &w.index,
        &mut w.provider,
        DVec3::new(1.0, 0.0, 0.0),
        0.1,
        0,
        Some(ObjectId(1)),
    );
    assert_eq!(excluded, None);
}

#[test]
fn test_frustum_query_respects_policy() {
    let mut w = world();
    // Slab -2 <= x <= 200, cutting through object 2 at x in -3.5..-2.5
    let planes = [
        Vec4::new(1.0, 0.0, 0.0, 2.0),
        Vec4::new(-1.0, 0.0, 0.0, 200.0),
    ];

    let mut inclusive = Vec::new();
    w.registry.query_frustum(
        &w.index,
        &mut w.provider,
        DVec3::ZERO,
        &planes,
        FrustumPolicy::Inclusive,
        0,
        &mut inclusive,
    );
    inclusive.sort();
    assert_eq!(inclusive, vec![ObjectId(1), ObjectId(3), ObjectId(10)]);

    // Straddling the plane at x = -2.5 is enough for inclusive
    let planes = [Vec4::new(1.0, 0.0, 0.0, 3.0), Vec4::new(-1.0, 0.0, 0.0, 200.0)];
    let mut straddling = Vec::new();
    w.registry.query_frustum(
        &w.index,
        &mut w.provider,
        DVec3::ZERO,
        &planes,
        FrustumPolicy::Inclusive,
        0,
        &mut straddling,
    );
    assert!(straddling.contains(&ObjectId(2)));

    let mut strict = Vec::new();
    w.registry.query_frustum(
        &w.index,
        &mut w.provider,
        DVec3::ZERO,
        &planes,
        FrustumPolicy::Strict,
        0,
        &mut strict,
    );
    assert!(!strict.contains(&ObjectId(2)));
    assert!(strict.contains(&ObjectId(1)));
}

#[test]
fn test_deleted_island_drops_out_of_queries() {
    let mut w = world();
    let procedural = w.registry.delete(w.near).unwrap();
    assert_eq!(procedural, vec![ObjectId(2)]);

    // The provider still reports the island for a frame
    let mut out = Vec::new();
    w.registry
        .query_sphere(&w.index, &mut w.provider, DVec3::ZERO, 5.0, 0, &mut out);
    assert!(out.is_empty());
    assert!(w.registry.delete(w.near).is_none());
}

#[test]
fn test_sensor_lifecycle_through_rebuilds() {
    let mut w = world();
    let sensor_groups = InteractionGroups::new(Group::GROUP_2, Group::GROUP_1);
    let object_groups = InteractionGroups::new(Group::GROUP_1, Group::GROUP_2);

    let mut bounds = vec![
        (ObjectId(20), cube(DVec3::new(5.0, 0.0, 0.0), 1.0)),
        (ObjectId(21), cube(DVec3::new(5.5, 0.0, 0.0), 0.5)),
    ];
    w.registry
        .add_sensor_object(w.near, bounds[0].0, bounds[0].1, sensor_groups)
        .unwrap();
    w.registry
        .add_object(w.near, bounds[1].0, bounds[1].1, object_groups)
        .unwrap();

    let lookup = |bounds: &[(ObjectId, DAabb)], id: ObjectId| {
        bounds.iter().find(|(o, _)| *o == id).map(|(_, b)| *b).or_else(|| match id.0 {
            1 => Some(cube(DVec3::new(1.0, 0.0, 0.0), 0.5)),
            2 => Some(cube(DVec3::new(-3.0, 0.0, 0.0), 0.5)),
            _ => None,
        })
    };

    let report = w.registry.rebuild(w.near, |id| lookup(&bounds, id)).unwrap();
    assert_eq!(report.removed, 0);
    assert!(w.registry.sensors().find(ObjectId(20), ObjectId(21)).is_some());
    assert_eq!(w.registry.sensors().len(), 1);

    w.registry.consolidate();
    assert_eq!(w.registry.triggered_sensors().len(), 1);

    bounds[1].1 = cube(DVec3::new(9.0, 0.0, 0.0), 0.5);
    let report = w.registry.rebuild(w.near, |id| lookup(&bounds, id)).unwrap();
    assert!(report.overlaps_removed >= 1);
    assert!(w.registry.sensors().find(ObjectId(20), ObjectId(21)).is_none());

    // The snapshot only moves on consolidate
    assert_eq!(w.registry.triggered_sensors().len(), 1);
    w.registry.consolidate();
    assert!(w.registry.triggered_sensors().is_empty());
}

#[test]
fn test_revision_tracks_insertions() {
    let mut w = world();
    let revision = w.registry.get(w.far).unwrap().revision();

    w.registry
        .add_object(w.far, ObjectId(30), cube(DVec3::new(102.0, 0.0, 0.0), 0.5), InteractionGroups::all())
        .unwrap();
    w.registry
        .add_object(w.far, ObjectId(31), cube(DVec3::new(98.0, 0.0, 0.0), 0.5), InteractionGroups::all())
        .unwrap();

    let mut since = Vec::new();
    assert!(w.registry.objects_since(w.far, revision, &mut since));
    assert_eq!(since, vec![ObjectId(30), ObjectId(31)]);
    assert!(w.registry.get(w.far).unwrap().is_dirty());

    let mut aabbs = Vec::new();
    assert!(w.registry.handle_aabbs(w.far, &mut aabbs));
    assert_eq!(aabbs.len(), 3);
}

#[test]
fn test_box_query_uses_islands_overlapping_the_box() {
    let mut w = world();
    let mut out = Vec::new();

    w.registry.query_box(
        &w.index,
        &mut w.provider,
        DVec3::ZERO,
        Mat3::from_diagonal(Vec3::splat(2.0)),
        0,
        &mut out,
    );
    assert_eq!(out, vec![ObjectId(1)]);
    assert!(w.registry.get(w.near).unwrap().was_used_this_frame());
    assert!(!w.registry.get(w.far).unwrap().was_used_this_frame());

    // Between the islands only the global index answers
    out.clear();
    w.registry.query_box(
        &w.index,
        &mut w.provider,
        DVec3::new(50.0, 0.0, 0.0),
        Mat3::IDENTITY,
        0,
        &mut out,
    );
    assert_eq!(out, vec![ObjectId(10)]);
}

#[test]
fn test_cast_ray_crosses_reported_islands_in_order() {
    let mut w = world();
    let mut hits = Vec::new();

    w.registry.cast_ray(
        &w.index,
        &mut w.provider,
        DVec3::new(-10.0, 0.0, 0.0),
        Vec3::new(3.0, 0.0, 0.0),
        120.0,
        &mut hits,
    );
    let order: Vec<ObjectId> = hits.iter().map(|(o, _)| *o).collect();
    assert_eq!(order, vec![ObjectId(2), ObjectId(1), ObjectId(10), ObjectId(3)]);
    assert!((hits[0].1 - 6.5).abs() < 1e-9);
    assert!(hits.windows(2).all(|pair| pair[0].1 <= pair[1].1));
    assert!(w.registry.get(w.far).unwrap().was_used_this_frame());

    // Short of the far island
    hits.clear();
    w.registry.cast_ray(
        &w.index,
        &mut w.provider,
        DVec3::new(-10.0, 0.0, 0.0),
        Vec3::X,
        70.0,
        &mut hits,
    );
    let order: Vec<ObjectId> = hits.iter().map(|(o, _)| *o).collect();
    assert_eq!(order, vec![ObjectId(2), ObjectId(1), ObjectId(10)]);

    hits.clear();
    w.registry
        .cast_ray(&w.index, &mut w.provider, DVec3::ZERO, Vec3::ZERO, 70.0, &mut hits);
    assert!(hits.is_empty());
}

#[test]
fn test_ray_test_against_one_island() {
    let mut w = world();
    let mut hits = Vec::new();

    let from = DVec3::new(-10.0, 0.0, 0.0);
    let to = DVec3::new(120.0, 0.0, 0.0);
    assert!(w.registry.ray_test(&w.index, Some(w.far), from, to, &mut hits));
    let order: Vec<ObjectId> = hits.iter().map(|(o, _)| *o).collect();
    assert_eq!(order, vec![ObjectId(10), ObjectId(3)]);
    assert!(!w.registry.get(w.near).unwrap().was_used_this_frame());
}
