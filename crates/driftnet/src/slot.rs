//! The scene-handle / network-id slot table.
//!
//! A fixed 4096-entry open-addressed table. The slot index *is* the 12-bit
//! network id, so both peers resolve ids without any extra mapping: the
//! server inserts by hash, the client mirrors with `insert_at`.
//!
//! `find` probes linearly and halts at the first unoccupied slot, so removal
//! backshifts the following cluster instead of just clearing the slot —
//! clearing alone would cut later colliding keys off from their probe path.

use crate::scene::SceneHandle;
use crate::snapshot::{MAX_OBJECTS, NetworkId};

#[derive(Debug, thiserror::Error)]
pub enum SlotTableError {
    /// The 4096-id budget is exhausted. Fatal to the session.
    #[error("slot table exhausted: all network ids are in use")]
    Full,
    #[error("slot {0} is already occupied")]
    Occupied(NetworkId),
}

#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Option<SceneHandle>>,
    len: usize,
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; MAX_OBJECTS],
            len: 0,
        }
    }

    /// XOR of the handle's 12-bit chunks.
    fn home(handle: SceneHandle) -> usize {
        let v = handle.0;
        ((v ^ (v >> 12) ^ (v >> 24) ^ (v >> 36) ^ (v >> 48) ^ (v >> 60)) & 0xFFF) as usize
    }

    /// Assigns the next free slot on the handle's probe path. Returns the
    /// existing id when the handle is already registered.
    pub fn insert(&mut self, handle: SceneHandle) -> Result<NetworkId, SlotTableError> {
        let start = Self::home(handle);
        for step in 0..MAX_OBJECTS {
            let i = (start + step) % MAX_OBJECTS;
            match self.slots[i] {
                None => {
                    self.slots[i] = Some(handle);
                    self.len += 1;
                    return Ok(NetworkId::new(i as u16));
                }
                Some(existing) if existing == handle => {
                    return Ok(NetworkId::new(i as u16));
                }
                Some(_) => {}
            }
        }
        Err(SlotTableError::Full)
    }

    /// Client-side: mirrors the server's assignment at a fixed slot.
    pub fn insert_at(&mut self, id: NetworkId, handle: SceneHandle) -> Result<(), SlotTableError> {
        let i = id.index() as usize;
        if self.slots[i].is_some() {
            return Err(SlotTableError::Occupied(id));
        }
        self.slots[i] = Some(handle);
        self.len += 1;
        Ok(())
    }

    /// Probes the handle's path; halts at the first unoccupied slot.
    pub fn find(&self, handle: SceneHandle) -> Option<NetworkId> {
        let start = Self::home(handle);
        for step in 0..MAX_OBJECTS {
            let i = (start + step) % MAX_OBJECTS;
            match self.slots[i] {
                None => return None,
                Some(existing) if existing == handle => {
                    return Some(NetworkId::new(i as u16));
                }
                Some(_) => {}
            }
        }
        None
    }

    /// Direct lookup without probing.
    pub fn get_at(&self, id: NetworkId) -> Option<SceneHandle> {
        self.slots[id.index() as usize]
    }

    /// Frees a slot, backshifting the cluster behind it so every surviving
    /// entry stays reachable from its home slot.
    pub fn remove_at(&mut self, id: NetworkId) -> Option<SceneHandle> {
        let mut hole = id.index() as usize;
        let removed = self.slots[hole].take()?;
        self.len -= 1;

        let mut i = hole;
        loop {
            i = (i + 1) % MAX_OBJECTS;
            let Some(handle) = self.slots[i] else { break };
            if Self::wraps_past(Self::home(handle), hole, i) {
                self.slots[hole] = Some(handle);
                self.slots[i] = None;
                hole = i;
            }
        }

        Some(removed)
    }

    /// True when `hole` lies on the cyclic probe path [home, i).
    fn wraps_past(home: usize, hole: usize, i: usize) -> bool {
        if home <= i {
            home <= hole && hole < i
        } else {
            home <= hole || hole < i
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Occupied slots in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (NetworkId, SceneHandle)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|h| (NetworkId::new(i as u16), h)))
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Handles of the form `(x << 12) | (x ^ c)` all hash to `c`.
    fn colliding(c: u64, x: u64) -> SceneHandle {
        SceneHandle((x << 12) | (x ^ c))
    }

    #[test]
    fn insert_and_find() {
        let mut table = SlotTable::new();
        let a = SceneHandle(100);
        let b = SceneHandle(200);

        let ida = table.insert(a).unwrap();
        let idb = table.insert(b).unwrap();
        assert_ne!(ida, idb);

        assert_eq!(table.find(a), Some(ida));
        assert_eq!(table.find(b), Some(idb));
        assert_eq!(table.get_at(ida), Some(a));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn insert_is_idempotent_per_handle() {
        let mut table = SlotTable::new();
        let h = SceneHandle(42);
        let first = table.insert(h).unwrap();
        let second = table.insert(h).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn collisions_probe_linearly() {
        let mut table = SlotTable::new();
        let a = colliding(7, 1);
        let b = colliding(7, 2);
        let c = colliding(7, 3);

        assert_eq!(table.insert(a).unwrap().index(), 7);
        assert_eq!(table.insert(b).unwrap().index(), 8);
        assert_eq!(table.insert(c).unwrap().index(), 9);
    }

    #[test]
    fn remove_keeps_collided_successors_findable() {
        let mut table = SlotTable::new();
        let handles: Vec<SceneHandle> = (1..=5).map(|x| colliding(100, x)).collect();
        let ids: Vec<NetworkId> = handles
            .iter()
            .map(|&h| table.insert(h).unwrap())
            .collect();

        // Removing from the middle of the cluster must not orphan the rest.
        table.remove_at(ids[2]);

        assert_eq!(table.find(handles[2]), None);
        for (i, &h) in handles.iter().enumerate() {
            if i == 2 {
                continue;
            }
            assert!(table.find(h).is_some(), "handle {i} became unfindable");
        }
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn backshift_respects_foreign_home_slots() {
        let mut table = SlotTable::new();
        // A cluster at 50 plus an entry whose home is inside the cluster.
        let a = colliding(50, 1);
        let b = colliding(50, 2);
        let native = colliding(51, 3);

        table.insert(a).unwrap(); // slot 50
        table.insert(b).unwrap(); // slot 51
        let nid = table.insert(native).unwrap(); // slot 52, home 51
        assert_eq!(nid.index(), 52);

        table.remove_at(NetworkId::new(50));

        assert_eq!(table.find(b), Some(NetworkId::new(50)));
        // `native` may have shifted into its home slot but stays findable.
        assert!(table.find(native).is_some());
    }

    #[test]
    fn insert_at_mirrors_and_rejects_occupied() {
        let mut table = SlotTable::new();
        let id = NetworkId::new(9);
        table.insert_at(id, SceneHandle(900)).unwrap();
        assert_eq!(table.get_at(id), Some(SceneHandle(900)));

        assert!(matches!(
            table.insert_at(id, SceneHandle(901)),
            Err(SlotTableError::Occupied(_))
        ));
    }

    #[test]
    fn exhaustion_is_fatal() {
        let mut table = SlotTable::new();
        for v in 0..MAX_OBJECTS as u64 {
            table.insert(SceneHandle(v | 0x10_0000)).unwrap();
        }
        assert!(matches!(
            table.insert(SceneHandle(0xDEAD_BEEF)),
            Err(SlotTableError::Full)
        ));
    }

    #[test]
    fn iteration_is_ordered() {
        let mut table = SlotTable::new();
        table.insert_at(NetworkId::new(5), SceneHandle(1)).unwrap();
        table.insert_at(NetworkId::new(2), SceneHandle(2)).unwrap();
        table.insert_at(NetworkId::new(9), SceneHandle(3)).unwrap();

        let ids: Vec<u16> = table.iter().map(|(id, _)| id.index()).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn wraparound_cluster_backshift() {
        let mut table = SlotTable::new();
        // Cluster starting at the last slot wraps to 0.
        let a = colliding(0xFFF, 1);
        let b = colliding(0xFFF, 2);
        let c = colliding(0xFFF, 3);

        assert_eq!(table.insert(a).unwrap().index(), 0xFFF);
        assert_eq!(table.insert(b).unwrap().index(), 0);
        assert_eq!(table.insert(c).unwrap().index(), 1);

        table.remove_at(NetworkId::new(0xFFF));
        assert!(table.find(b).is_some());
        assert!(table.find(c).is_some());
    }
}
