use std::env;
use std::str::FromStr;

use crate::error::{PhysicsError, Result};

/// Tunables of the terrain and tree collision layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhysicsConfig {
    /// Extra radius added to sphere leaves when querying terrain.
    pub sphere_margin: f32,
    /// Extra radius added to capsule leaves when querying terrain.
    pub capsule_margin: f32,
    /// Separation below which a triangle contact is recorded.
    pub contact_prediction: f32,
    /// Contact-breaking threshold of every manifold this layer allocates.
    pub contact_breaking_threshold: f32,
    /// How long (seconds) a yielding tree keeps deflecting a body.
    pub tree_collision_time: f32,
    /// Proxy capacity of a terrain island broadphase.
    pub island_capacity: usize,
    /// Proxy capacity of the global collision index.
    pub world_capacity: usize,
    /// Margin by which AABB tree leaves are fattened.
    pub fat_margin: f64,
    /// Capture debug geometry each step.
    pub debug_capture: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            sphere_margin: 0.02,
            capsule_margin: 0.04,
            contact_prediction: 0.005,
            contact_breaking_threshold: 0.02,
            tree_collision_time: 0.15,
            island_capacity: 5000,
            world_capacity: 10000,
            fat_margin: 0.1,
            debug_capture: false,
        }
    }
}

impl PhysicsConfig {
    /// Builds a configuration from `PLANET_PHYSICS_*` environment variables,
    /// falling back to the defaults for anything unset.
    ///
    /// A variable that is set but does not parse is an error rather than
    /// silently ignored.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            sphere_margin: read_var("PLANET_PHYSICS_SPHERE_MARGIN", defaults.sphere_margin)?,
            capsule_margin: read_var("PLANET_PHYSICS_CAPSULE_MARGIN", defaults.capsule_margin)?,
            contact_prediction: read_var(
                "PLANET_PHYSICS_CONTACT_PREDICTION",
                defaults.contact_prediction,
            )?,
            contact_breaking_threshold: read_var(
                "PLANET_PHYSICS_BREAKING_THRESHOLD",
                defaults.contact_breaking_threshold,
            )?,
            tree_collision_time: read_var(
                "PLANET_PHYSICS_TREE_COLLISION_TIME",
                defaults.tree_collision_time,
            )?,
            island_capacity: read_var("PLANET_PHYSICS_ISLAND_CAPACITY", defaults.island_capacity)?,
            world_capacity: read_var("PLANET_PHYSICS_WORLD_CAPACITY", defaults.world_capacity)?,
            fat_margin: read_var("PLANET_PHYSICS_FAT_MARGIN", defaults.fat_margin)?,
            debug_capture: read_var("PLANET_PHYSICS_DEBUG_CAPTURE", defaults.debug_capture)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&'static str, bool, String); 4] = [
            (
                "PLANET_PHYSICS_TREE_COLLISION_TIME",
                self.tree_collision_time > 0.0,
                self.tree_collision_time.to_string(),
            ),
            (
                "PLANET_PHYSICS_ISLAND_CAPACITY",
                self.island_capacity > 0,
                self.island_capacity.to_string(),
            ),
            (
                "PLANET_PHYSICS_BREAKING_THRESHOLD",
                self.contact_breaking_threshold >= 0.0,
                self.contact_breaking_threshold.to_string(),
            ),
            (
                "PLANET_PHYSICS_FAT_MARGIN",
                self.fat_margin >= 0.0,
                self.fat_margin.to_string(),
            ),
        ];

        for (key, ok, value) in checks {
            if !ok {
                return Err(PhysicsError::InvalidConfig { key, value });
            }
        }
        Ok(())
    }
}

fn read_var<T: FromStr>(key: &'static str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| PhysicsError::InvalidConfig { key, value }),
        Err(_) => Ok(default),
    }
}
