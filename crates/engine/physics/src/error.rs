use thiserror::Error;

use crate::broadphase::ObjectId;

#[derive(Debug, Error)]
pub enum PhysicsError {
    #[error("invalid value {value:?} for {key}")]
    InvalidConfig { key: &'static str, value: String },

    #[error("broadphase island is full ({capacity} proxies)")]
    IslandFull { capacity: usize },

    #[error("broadphase island no longer exists")]
    UnknownIsland,

    #[error("object {0:?} is already registered in this island")]
    DuplicateObject(ObjectId),

    #[error("tree batch already holds {0} trees")]
    BatchFull(usize),
}

pub type Result<T> = std::result::Result<T, PhysicsError>;
