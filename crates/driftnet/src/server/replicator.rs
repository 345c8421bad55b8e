//! Snapshot construction and per-client delta encoding.

use crate::scene::{ReplicaKind, SceneAdapter, SceneHandle};
use crate::server::cursor::ClientCursor;
use crate::slot::{SlotTable, SlotTableError};
use crate::snapshot::{NetworkId, ObjectState, Snapshot, SnapshotStore};
use crate::visibility::{Frustum, should_transmit};
use crate::wire::{CodecConfig, WireError, WireWriter, encode_object};
use crate::{MAX_DATAGRAM, frame};

/// Outcome of encoding one client's datagram.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatagramReport {
    pub bytes: usize,
    pub objects: u16,
    /// Some objects were pushed to a later tick by the 1400-byte cap.
    pub deferred: bool,
    /// The client's baseline was gone; everything went out as a full send.
    pub full_resend: bool,
}

/// Sticky per-object replication settings, fixed at registration.
#[derive(Debug, Clone, Copy)]
struct ObjectMeta {
    kind: ReplicaKind,
    compressed_motion: bool,
    attached_to: Option<NetworkId>,
}

/// The server-side replication core: owns the slot table, the snapshot
/// history, and the per-object attachment state. One instance per session.
pub struct Replicator {
    slots: SlotTable,
    store: SnapshotStore,
    meta: Vec<Option<ObjectMeta>>,
    pending_deleted: Vec<NetworkId>,
    next_frame: u32,
}

impl Replicator {
    pub fn new(history: usize) -> Self {
        Self {
            slots: SlotTable::new(),
            store: SnapshotStore::new(history),
            meta: vec![None; crate::snapshot::MAX_OBJECTS],
            pending_deleted: Vec::new(),
            next_frame: 0,
        }
    }

    /// Brings a scene object under replication. Fatal when the 4096-id
    /// budget is exhausted.
    pub fn register(
        &mut self,
        handle: SceneHandle,
        kind: ReplicaKind,
        compressed_motion: bool,
    ) -> Result<NetworkId, SlotTableError> {
        let id = self.slots.insert(handle)?;
        self.meta[id.index() as usize] = Some(ObjectMeta {
            kind,
            compressed_motion,
            attached_to: None,
        });
        log::debug!("registered {handle:?} as {id}");
        Ok(id)
    }

    /// Removes an object from replication. Clients observe the deletion in
    /// the next snapshot whose delta window covers this frame.
    pub fn unregister(&mut self, id: NetworkId) {
        if self.slots.remove_at(id).is_some() {
            self.meta[id.index() as usize] = None;
            self.pending_deleted.push(id);
            log::debug!("unregistered {id}");
        }
    }

    /// Parents `id` to `parent` by logical id. While attached, transform
    /// fields stay off the wire.
    pub fn attach(&mut self, id: NetworkId, parent: NetworkId) {
        if let Some(meta) = self.meta[id.index() as usize].as_mut() {
            meta.attached_to = Some(parent);
        }
    }

    pub fn detach(&mut self, id: NetworkId) {
        if let Some(meta) = self.meta[id.index() as usize].as_mut() {
            meta.attached_to = None;
        }
    }

    pub fn id_of(&self, handle: SceneHandle) -> Option<NetworkId> {
        self.slots.find(handle)
    }

    pub fn handle_of(&self, id: NetworkId) -> Option<SceneHandle> {
        self.slots.get_at(id)
    }

    pub fn object_count(&self) -> usize {
        self.slots.len()
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Frame index the next `build_snapshot` call will produce.
    pub fn next_frame(&self) -> u32 {
        self.next_frame
    }

    /// Samples every registered object and appends `Snapshot(t)` to the
    /// store, carrying the deletions accumulated since the previous tick.
    /// Handles the scene no longer knows are unregistered on the spot.
    pub fn build_snapshot(&mut self, scene: &dyn SceneAdapter) -> u32 {
        let frame_idx = self.next_frame;
        self.next_frame = frame::next(self.next_frame);

        let entries: Vec<(NetworkId, SceneHandle)> = self.slots.iter().collect();
        let mut objects = Vec::with_capacity(entries.len());
        let mut stale = Vec::new();

        for (id, handle) in entries {
            let Some(sample) = scene.sample(handle) else {
                stale.push(id);
                continue;
            };
            let meta = match self.meta[id.index() as usize] {
                Some(meta) => meta,
                None => continue,
            };

            let mut state = ObjectState::new(id, meta.kind.is_2d());
            state.compressed_motion = meta.compressed_motion;
            state.position = sample.position;
            state.orientation = sample.orientation;
            state.scale = sample.scale;
            state.velocity = sample.velocity;
            state.model = sample.model;
            state.animation = sample.animation;
            state.particle = sample.particle;
            state.sound = sample.sound;
            state.sound_radius = sample.sound_radius;
            state.view_radius = sample.view_radius;
            state.attached_to = meta.attached_to;
            state.blob = sample.blob;
            objects.push(state);
        }

        for id in stale {
            self.unregister(id);
        }

        let mut snapshot = Snapshot::new(frame_idx);
        snapshot.objects = objects;
        snapshot.deleted = std::mem::take(&mut self.pending_deleted);
        self.store.append(snapshot);

        frame_idx
    }

    /// Encodes the latest snapshot for one client into its scratch buffer
    /// and returns the datagram length. The result never exceeds 1400
    /// bytes; objects that would overflow are deferred to a later tick.
    pub fn encode_datagram(
        &self,
        cursor: &mut ClientCursor,
        cfg: &CodecConfig,
    ) -> Result<DatagramReport, WireError> {
        let Some(snapshot) = self.store.latest() else {
            cursor.scratch.clear();
            return Ok(DatagramReport::default());
        };

        let baseline = cursor.last_acked_frame.and_then(|f| self.store.find(f));
        let full_resend = baseline.is_none() && cursor.last_acked_frame.is_some();
        if full_resend {
            log::debug!(
                "baseline {} for player {} collected, falling back to full send",
                cursor.last_acked_frame.unwrap_or(0),
                cursor.player_index
            );
        }

        let mut deleted = self
            .store
            .deleted_since(cursor.last_acked_frame, snapshot.frame);
        let max_deletions = (MAX_DATAGRAM - 7) / 2;
        if deleted.len() > max_deletions {
            log::warn!(
                "deletion list of {} ids exceeds one datagram, truncating",
                deleted.len()
            );
            deleted.truncate(max_deletions);
        }
        let budget = MAX_DATAGRAM - (2 + 2 * deleted.len());

        let frustum = Frustum::from_view(&cursor.view);

        let mut w = WireWriter::with_capacity(MAX_DATAGRAM);
        w.write_u24(snapshot.frame);
        let count_pos = w.len();
        w.write_u16(0);

        let mut count: u16 = 0;
        let mut deferred = false;
        for object in &snapshot.objects {
            if Some(object.id) == cursor.in_game_object {
                continue;
            }
            if !should_transmit(object, &frustum, cursor.view.position) {
                continue;
            }

            let object_baseline = baseline.and_then(|b| b.object(object.id));
            let mark = w.len();
            let written = encode_object(&mut w, object, object_baseline, cfg)?;
            if written == 0 {
                continue;
            }
            if w.len() > budget {
                w.truncate(mark);
                deferred = true;
                break;
            }
            count += 1;
        }
        w.patch_u16(count_pos, count);

        w.write_u16(deleted.len() as u16);
        for id in &deleted {
            w.write_u16(id.index());
        }

        cursor.scratch = w.into_vec();
        Ok(DatagramReport {
            bytes: cursor.scratch.len(),
            objects: count,
            deferred,
            full_resend,
        })
    }

    /// Encodes the bootstrap object block: culling disabled, no baseline,
    /// only the client's own object omitted. Used inside the reliable init
    /// packet, so the 1400-byte datagram cap does not apply.
    pub fn encode_bootstrap_objects(
        &self,
        w: &mut WireWriter,
        own_object: Option<NetworkId>,
        cfg: &CodecConfig,
    ) -> Result<u16, WireError> {
        let Some(snapshot) = self.store.latest() else {
            w.write_u16(0);
            return Ok(0);
        };

        let count_pos = w.len();
        w.write_u16(0);
        let mut count: u16 = 0;
        for object in &snapshot.objects {
            if Some(object.id) == own_object {
                continue;
            }
            if encode_object(w, object, None, cfg)? > 0 {
                count += 1;
            }
        }
        w.patch_u16(count_pos, count);
        Ok(count)
    }

    /// Drops history every client has moved past. A connected client that
    /// has not acked anything yet pins the whole history (the ring still
    /// bounds it); with no clients at all only the latest snapshot is kept.
    pub fn collect_history<'a>(&mut self, cursors: impl Iterator<Item = &'a ClientCursor>) {
        let mut min_acked: Option<u32> = None;
        let mut any_client = false;
        for cursor in cursors {
            any_client = true;
            match cursor.last_acked_frame {
                None => return,
                Some(acked) => {
                    min_acked = Some(match min_acked {
                        Some(m) if frame::older(m, acked) => m,
                        Some(_) | None => acked,
                    });
                }
            }
        }

        match (any_client, min_acked, self.store.latest().map(|s| s.frame)) {
            (true, Some(min), _) => self.store.gc(min),
            (false, _, Some(latest)) => self.store.gc(latest),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precache::PrecacheTables;
    use crate::scene::SceneSample;
    use crate::wire::{WireReader, decode_object};
    use glam::Vec3;
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestScene {
        next: u64,
        samples: HashMap<SceneHandle, SceneSample>,
    }

    impl TestScene {
        fn spawn(&mut self, sample: SceneSample) -> SceneHandle {
            self.next += 1;
            let handle = SceneHandle(self.next);
            self.samples.insert(handle, sample);
            handle
        }

        fn sample_mut(&mut self, handle: SceneHandle) -> &mut SceneSample {
            self.samples.get_mut(&handle).unwrap()
        }
    }

    impl SceneAdapter for TestScene {
        fn sample(&self, handle: SceneHandle) -> Option<SceneSample> {
            self.samples.get(&handle).cloned()
        }

        fn precache(&mut self, _tables: &PrecacheTables) {}

        fn instantiate(&mut self, _kind: ReplicaKind) -> SceneHandle {
            self.next += 1;
            let handle = SceneHandle(self.next);
            self.samples.insert(handle, SceneSample::default());
            handle
        }

        fn destroy(&mut self, handle: SceneHandle) {
            self.samples.remove(&handle);
        }

        fn set_position(&mut self, handle: SceneHandle, position: Vec3) {
            self.sample_mut(handle).position = position;
        }

        fn set_orientation(&mut self, handle: SceneHandle, orientation: Vec3) {
            self.sample_mut(handle).orientation = orientation;
        }

        fn set_scale(&mut self, handle: SceneHandle, scale: Vec3) {
            self.sample_mut(handle).scale = scale;
        }

        fn set_velocity(&mut self, handle: SceneHandle, velocity: Vec3) {
            self.sample_mut(handle).velocity = velocity;
        }

        fn set_model(&mut self, handle: SceneHandle, index: i16) {
            self.sample_mut(handle).model = index;
        }

        fn set_animation(&mut self, handle: SceneHandle, index: i16) {
            self.sample_mut(handle).animation = index;
        }

        fn set_particle(&mut self, handle: SceneHandle, index: i16) {
            self.sample_mut(handle).particle = index;
        }

        fn play_spatial_sound(&mut self, handle: SceneHandle, index: i16, radius: u8) {
            let sample = self.sample_mut(handle);
            sample.sound = index;
            sample.sound_radius = radius;
        }

        fn play_flat_sound(&mut self, handle: SceneHandle, index: i16) {
            self.sample_mut(handle).sound = -(index + 2);
        }

        fn stop_sounds(&mut self, handle: SceneHandle) {
            self.sample_mut(handle).sound = -1;
        }

        fn apply_blob(&mut self, _handle: SceneHandle, _data: &[u8]) {}

        fn sync_viewports(&mut self) {}
    }

    fn sample_at(position: Vec3) -> SceneSample {
        SceneSample {
            position,
            ..SceneSample::default()
        }
    }

    struct DecodedDatagram {
        frame: u32,
        objects: Vec<crate::wire::ObjectDelta>,
        deleted: Vec<NetworkId>,
    }

    fn decode_datagram(bytes: &[u8], cfg: &CodecConfig) -> DecodedDatagram {
        let mut r = WireReader::new(bytes);
        let frame = r.read_u24().unwrap();
        let count = r.read_u16().unwrap();
        let mut objects = Vec::new();
        for _ in 0..count {
            objects.push(decode_object(&mut r, cfg).unwrap());
        }
        let deleted_count = r.read_u16().unwrap();
        let mut deleted = Vec::new();
        for _ in 0..deleted_count {
            let (id, _) = NetworkId::from_wire(r.read_u16().unwrap());
            deleted.push(id);
        }
        assert!(r.is_empty());
        DecodedDatagram {
            frame,
            objects,
            deleted,
        }
    }

    #[test]
    fn snapshot_sampling_and_ordering() {
        let mut scene = TestScene::default();
        let mut replicator = Replicator::new(16);

        let a = scene.spawn(sample_at(Vec3::new(1.0, 0.0, 0.0)));
        let b = scene.spawn(sample_at(Vec3::new(2.0, 0.0, 0.0)));
        replicator.register(a, ReplicaKind::Spatial, false).unwrap();
        replicator.register(b, ReplicaKind::Spatial, false).unwrap();

        let frame = replicator.build_snapshot(&scene);
        let snapshot = replicator.store().find(frame).unwrap();
        assert_eq!(snapshot.objects.len(), 2);
        assert!(snapshot.objects.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn datagram_never_exceeds_the_cap() {
        let mut scene = TestScene::default();
        let mut replicator = Replicator::new(16);

        // 100 objects with maximal blobs cannot possibly fit one datagram.
        for i in 0..100 {
            let mut sample = sample_at(Vec3::new(0.0, 0.0, -(i as f32) - 1.0));
            sample.blob = Some(vec![0xAB; 255]);
            let handle = scene.spawn(sample);
            replicator
                .register(handle, ReplicaKind::Spatial, false)
                .unwrap();
        }

        replicator.build_snapshot(&scene);
        let mut cursor = ClientCursor::new(0);
        let report = replicator
            .encode_datagram(&mut cursor, &CodecConfig::default())
            .unwrap();

        assert!(report.bytes <= MAX_DATAGRAM, "datagram was {} bytes", report.bytes);
        assert!(report.deferred);
        let decoded = decode_datagram(&cursor.scratch, &CodecConfig::default());
        assert!(decoded.objects.len() < 100, "nothing was deferred");
    }

    #[test]
    fn culled_objects_are_skipped() {
        let mut scene = TestScene::default();
        let mut replicator = Replicator::new(16);

        let visible = scene.spawn(sample_at(Vec3::new(0.0, 0.0, -10.0)));
        let behind = scene.spawn(sample_at(Vec3::new(0.0, 0.0, 10.0)));
        let vid = replicator
            .register(visible, ReplicaKind::Spatial, false)
            .unwrap();
        let bid = replicator
            .register(behind, ReplicaKind::Spatial, false)
            .unwrap();

        replicator.build_snapshot(&scene);
        let mut cursor = ClientCursor::new(0);
        replicator
            .encode_datagram(&mut cursor, &CodecConfig::default())
            .unwrap();

        let decoded = decode_datagram(&cursor.scratch, &CodecConfig::default());
        let ids: Vec<NetworkId> = decoded.objects.iter().map(|o| o.id).collect();
        assert!(ids.contains(&vid));
        assert!(!ids.contains(&bid));
    }

    #[test]
    fn own_object_is_never_sent() {
        let mut scene = TestScene::default();
        let mut replicator = Replicator::new(16);

        let own = scene.spawn(sample_at(Vec3::new(0.0, 0.0, -5.0)));
        let own_id = replicator
            .register(own, ReplicaKind::Spatial, false)
            .unwrap();

        replicator.build_snapshot(&scene);
        let mut cursor = ClientCursor::new(0);
        cursor.in_game_object = Some(own_id);
        replicator
            .encode_datagram(&mut cursor, &CodecConfig::default())
            .unwrap();

        let decoded = decode_datagram(&cursor.scratch, &CodecConfig::default());
        assert!(decoded.objects.is_empty());
    }

    #[test]
    fn deletions_cover_the_unacked_window() {
        let mut scene = TestScene::default();
        let mut replicator = Replicator::new(16);

        let a = scene.spawn(sample_at(Vec3::new(0.0, 0.0, -5.0)));
        let id = replicator.register(a, ReplicaKind::Spatial, false).unwrap();

        let f0 = replicator.build_snapshot(&scene); // frame 0: object alive
        scene.destroy(a);
        replicator.unregister(id);
        replicator.build_snapshot(&scene); // frame 1: deletion recorded
        replicator.build_snapshot(&scene); // frame 2

        let mut cursor = ClientCursor::new(0);
        cursor.advance_ack(f0);
        replicator
            .encode_datagram(&mut cursor, &CodecConfig::default())
            .unwrap();
        let decoded = decode_datagram(&cursor.scratch, &CodecConfig::default());
        assert_eq!(decoded.frame, 2);
        assert_eq!(decoded.deleted, vec![id]);

        // Once the client acks past the deletion it is never repeated.
        cursor.advance_ack(2);
        replicator
            .encode_datagram(&mut cursor, &CodecConfig::default())
            .unwrap();
        let decoded = decode_datagram(&cursor.scratch, &CodecConfig::default());
        assert!(decoded.deleted.is_empty());
    }

    #[test]
    fn gc_fallback_sends_full_state() {
        let mut scene = TestScene::default();
        let mut replicator = Replicator::new(4);

        let handle = scene.spawn(sample_at(Vec3::new(0.0, 0.0, -5.0)));
        replicator
            .register(handle, ReplicaKind::Spatial, false)
            .unwrap();

        let f0 = replicator.build_snapshot(&scene);
        // Enough frames to evict f0 from the 4-slot ring.
        for i in 0..6 {
            scene.set_position(handle, Vec3::new(i as f32, 0.0, -5.0));
            replicator.build_snapshot(&scene);
        }
        assert!(replicator.store().find(f0).is_none());

        let mut cursor = ClientCursor::new(0);
        cursor.advance_ack(f0);
        let report = replicator
            .encode_datagram(&mut cursor, &CodecConfig::default())
            .unwrap();
        assert!(report.full_resend);

        // Baseline lost: the object arrives as a full no-baseline record.
        let decoded = decode_datagram(&cursor.scratch, &CodecConfig::default());
        assert_eq!(decoded.objects.len(), 1);
        assert!(decoded.objects[0].position.is_some());
    }

    #[test]
    fn history_collection_follows_min_ack() {
        let mut scene = TestScene::default();
        let mut replicator = Replicator::new(16);

        let handle = scene.spawn(sample_at(Vec3::new(0.0, 0.0, -5.0)));
        replicator
            .register(handle, ReplicaKind::Spatial, false)
            .unwrap();

        for _ in 0..8 {
            replicator.build_snapshot(&scene);
        }

        let mut fast = ClientCursor::new(0);
        fast.advance_ack(6);
        let mut slow = ClientCursor::new(1);
        slow.advance_ack(3);

        replicator.collect_history([&fast, &slow].into_iter());
        assert!(replicator.store().find(2).is_none());
        assert!(replicator.store().find(3).is_some());
        assert!(replicator.store().find(7).is_some());
    }

    #[test]
    fn unacked_client_pins_history() {
        let mut scene = TestScene::default();
        let mut replicator = Replicator::new(16);
        let handle = scene.spawn(sample_at(Vec3::ZERO));
        replicator
            .register(handle, ReplicaKind::Spatial, false)
            .unwrap();

        for _ in 0..5 {
            replicator.build_snapshot(&scene);
        }

        let fresh = ClientCursor::new(0);
        replicator.collect_history([&fresh].into_iter());
        assert_eq!(replicator.store().len(), 5);
    }

    #[test]
    fn vanished_scene_objects_are_unregistered() {
        let mut scene = TestScene::default();
        let mut replicator = Replicator::new(16);

        let handle = scene.spawn(sample_at(Vec3::ZERO));
        let id = replicator
            .register(handle, ReplicaKind::Spatial, false)
            .unwrap();

        scene.destroy(handle);
        // The vanished handle is dropped during this build, so the deletion
        // lands in this frame's list.
        let frame = replicator.build_snapshot(&scene);
        let snapshot = replicator.store().find(frame).unwrap();
        assert!(snapshot.objects.is_empty());
        assert_eq!(snapshot.deleted, vec![id]);
        assert_eq!(replicator.object_count(), 0);
    }
}
