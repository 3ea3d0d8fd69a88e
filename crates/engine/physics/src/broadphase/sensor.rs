use super::ObjectId;

/// A trigger object overlapping a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorPair {
    pub sensor: ObjectId,
    pub trigger: ObjectId,
}

/// Live sensor pairs plus the snapshot handed out once per frame.
///
/// Pairs keep their insertion order; removal does not reorder the rest.
#[derive(Debug, Default)]
pub struct SensorTable {
    pairs: Vec<SensorPair>,
    snapshot: Vec<SensorPair>,
}

impl SensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn find(&self, sensor: ObjectId, trigger: ObjectId) -> Option<usize> {
        self.pairs
            .iter()
            .position(|p| p.sensor == sensor && p.trigger == trigger)
    }

    /// Returns false if the pair was already present
    pub fn add(&mut self, sensor: ObjectId, trigger: ObjectId) -> bool {
        if self.find(sensor, trigger).is_some() {
            return false;
        }
        self.pairs.push(SensorPair { sensor, trigger });
        tracing::trace!(?sensor, ?trigger, "sensor triggered");
        true
    }

    pub fn remove(&mut self, sensor: ObjectId, trigger: ObjectId) -> bool {
        match self.find(sensor, trigger) {
            Some(index) => {
                self.pairs.remove(index);
                tracing::trace!(?sensor, ?trigger, "sensor released");
                true
            }
            None => false,
        }
    }

    /// Drop every pair `object` takes part in, on either side
    pub fn remove_all_for(&mut self, object: ObjectId) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|p| p.sensor != object && p.trigger != object);
        before - self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorPair> {
        self.pairs.iter()
    }

    /// Take this frame's snapshot
    pub fn consolidate(&mut self) {
        self.snapshot.clear();
        self.snapshot.extend_from_slice(&self.pairs);
    }

    /// Pairs as of the last [`consolidate`](Self::consolidate)
    pub fn triggered_sensors(&self) -> &[SensorPair] {
        &self.snapshot
    }
}
