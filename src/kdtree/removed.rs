//! Tombstone bookkeeping for lazily removed points.

use crate::error::{KdIndexError, Result};

/// Liveness of one point identifier.
///
/// `Retired` marks identifiers whose removal was compacted away by a rebuild:
/// they are no longer in any leaf, the tombstone set no longer carries them,
/// and they are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PointState {
    Live = 0,
    Tombstoned = 1,
    Retired = 2,
}

/// The set of logically removed point identifiers.
///
/// Removal is a tombstone, not a structural edit: the tree keeps referencing
/// the identifier until the next rebuild, and search filters it out. State
/// checks are O(1) array reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DeletionTracker {
    states: Vec<PointState>,
    tombstones: usize,
}

impl DeletionTracker {
    pub(crate) fn new(num_points: usize) -> Self {
        Self {
            states: vec![PointState::Live; num_points],
            tombstones: 0,
        }
    }

    /// Register `count` newly added identifiers as live.
    pub(crate) fn grow(&mut self, count: usize) {
        self.states
            .resize(self.states.len() + count, PointState::Live);
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    /// The number of tombstones since the last rebuild.
    pub(crate) fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    #[inline]
    pub(crate) fn is_live(&self, id: u32) -> bool {
        self.states[id as usize] == PointState::Live
    }

    pub(crate) fn state(&self, id: u32) -> PointState {
        self.states[id as usize]
    }

    /// Mark `id` as removed.
    pub(crate) fn remove(&mut self, id: u32) -> Result<()> {
        match self.states.get(id as usize).copied() {
            None => Err(KdIndexError::OutOfRange(id)),
            Some(PointState::Live) => {
                self.states[id as usize] = PointState::Tombstoned;
                self.tombstones += 1;
                Ok(())
            }
            Some(_) => Err(KdIndexError::AlreadyRemoved(id)),
        }
    }

    /// Rebuild compaction: tombstoned identifiers become permanently retired
    /// and the tombstone set is empty afterwards.
    pub(crate) fn retire_tombstones(&mut self) {
        if self.tombstones == 0 {
            return;
        }
        for state in &mut self.states {
            if *state == PointState::Tombstoned {
                *state = PointState::Retired;
            }
        }
        self.tombstones = 0;
    }

    /// Identifiers currently live, in increasing order.
    pub(crate) fn live_ids(&self) -> Vec<u32> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, &s)| s == PointState::Live)
            .map(|(id, _)| id as u32)
            .collect()
    }

    pub(crate) fn from_states(states: Vec<PointState>) -> Self {
        let tombstones = states
            .iter()
            .filter(|&&s| s == PointState::Tombstoned)
            .count();
        Self { states, tombstones }
    }

    pub(crate) fn states(&self) -> &[PointState] {
        &self.states
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn remove_and_double_remove() {
        let mut tracker = DeletionTracker::new(3);
        assert!(tracker.is_live(1));
        tracker.remove(1).unwrap();
        assert!(!tracker.is_live(1));
        assert_eq!(tracker.tombstone_count(), 1);
        assert!(matches!(
            tracker.remove(1),
            Err(KdIndexError::AlreadyRemoved(1))
        ));
        assert!(matches!(
            tracker.remove(9),
            Err(KdIndexError::OutOfRange(9))
        ));
    }

    #[test]
    fn retire_clears_tombstones_but_not_liveness() {
        let mut tracker = DeletionTracker::new(4);
        tracker.remove(2).unwrap();
        tracker.retire_tombstones();
        assert_eq!(tracker.tombstone_count(), 0);
        assert!(!tracker.is_live(2));
        assert_eq!(tracker.live_ids(), vec![0, 1, 3]);
        // a retired id stays removed
        assert!(matches!(
            tracker.remove(2),
            Err(KdIndexError::AlreadyRemoved(2))
        ));
    }

    #[test]
    fn grow_registers_live_ids() {
        let mut tracker = DeletionTracker::new(2);
        tracker.remove(0).unwrap();
        tracker.grow(2);
        assert_eq!(tracker.len(), 4);
        assert_eq!(tracker.live_ids(), vec![1, 2, 3]);
    }
}
