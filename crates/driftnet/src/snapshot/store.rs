use crate::frame;
use crate::snapshot::state::{NetworkId, ObjectState};

/// Per-frame history retained by default: 64 frames is a little over three
/// seconds at 20 Hz, which comfortably covers a laggy client's ack horizon.
pub const DEFAULT_HISTORY: usize = 64;

/// The authoritative record of every replicated object at one frame, plus
/// the ids that were removed in this frame.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub frame: u32,
    /// Dense object list, ordered by ascending id (the replicator builds it
    /// by scanning the slot table).
    pub objects: Vec<ObjectState>,
    pub deleted: Vec<NetworkId>,
}

impl Snapshot {
    pub fn new(frame: u32) -> Self {
        Self {
            frame,
            objects: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Baseline lookup by id. Relies on the ascending-id ordering.
    pub fn object(&self, id: NetworkId) -> Option<&ObjectState> {
        self.objects
            .binary_search_by_key(&id, |o| o.id)
            .ok()
            .map(|i| &self.objects[i])
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Ring of recent snapshots keyed by `frame % capacity`.
///
/// `find` misses once a slot has been overwritten or collected; the encoder
/// then falls back to a full (no-baseline) send for that client.
#[derive(Debug)]
pub struct SnapshotStore {
    slots: Vec<Option<Snapshot>>,
    capacity: usize,
}

impl SnapshotStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
        }
    }

    pub fn append(&mut self, snapshot: Snapshot) {
        let index = snapshot.frame as usize % self.capacity;
        self.slots[index] = Some(snapshot);
    }

    pub fn find(&self, frame: u32) -> Option<&Snapshot> {
        let index = frame as usize % self.capacity;
        self.slots[index].as_ref().filter(|s| s.frame == frame)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        let mut latest: Option<&Snapshot> = None;
        for snapshot in self.slots.iter().flatten() {
            if latest.is_none_or(|l| frame::newer(snapshot.frame, l.frame)) {
                latest = Some(snapshot);
            }
        }
        latest
    }

    /// Drops every snapshot older than `min_acked`. Called once per tick
    /// with the minimum acknowledged frame across clients.
    pub fn gc(&mut self, min_acked: u32) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|s| frame::older(s.frame, min_acked)) {
                *slot = None;
            }
        }
    }

    /// Ids deleted in frames after `after` (exclusive; `None` means "since
    /// the beginning of history") up to and including `upto`.
    pub fn deleted_since(&self, after: Option<u32>, upto: u32) -> Vec<NetworkId> {
        let mut deleted = Vec::new();
        for snapshot in self.slots.iter().flatten() {
            let in_window = match after {
                Some(acked) => frame::newer(snapshot.frame, acked),
                None => true,
            };
            if in_window && !frame::newer(snapshot.frame, upto) {
                deleted.extend_from_slice(&snapshot.deleted);
            }
        }
        deleted
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}
