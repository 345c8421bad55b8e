//! Client-side snapshot application.
//!
//! Datagrams are decoded in full before anything is applied, so a truncated
//! packet is dropped whole and the ack cursor never moves for it. Field
//! application follows the wire order exactly; per-object state (velocity,
//! attachment, smoothing) lives here, and absolute transforms are pushed
//! into the host scene every render frame.

use std::collections::HashMap;

use glam::Vec3;

use crate::client::smoothing::TransformSmoother;
use crate::frame;
use crate::precache::PrecacheTables;
use crate::scene::{ReplicaKind, SceneAdapter, SceneHandle};
use crate::slot::SlotTable;
use crate::snapshot::{NetworkId, SoundKind};
use crate::wire::{CodecConfig, ObjectDelta, WireError, WireReader, decode_object};

#[derive(Debug)]
struct ReplicaState {
    handle: SceneHandle,
    kind: ReplicaKind,
    velocity: Vec3,
    attached_to: Option<NetworkId>,
    smoother: TransformSmoother,
}

impl ReplicaState {
    fn new(handle: SceneHandle, kind: ReplicaKind) -> Self {
        Self {
            handle,
            kind,
            velocity: Vec3::ZERO,
            attached_to: None,
            smoother: TransformSmoother::new(),
        }
    }
}

/// A decoded-but-not-yet-applied datagram.
struct DecodedDatagram {
    frame_idx: u32,
    objects: Vec<ObjectDelta>,
    deleted: Vec<NetworkId>,
}

/// The client-side replication core: mirrors the server's slot assignments
/// and keeps every replica moving between snapshots.
pub struct Reconciler {
    slots: SlotTable,
    replicas: HashMap<NetworkId, ReplicaState>,
    last_frame: Option<u32>,
    tables: PrecacheTables,
    cfg: CodecConfig,
}

impl Reconciler {
    pub fn new(tables: PrecacheTables, cfg: CodecConfig) -> Self {
        Self {
            slots: SlotTable::new(),
            replicas: HashMap::new(),
            last_frame: None,
            tables,
            cfg,
        }
    }

    /// The newest frame applied so far; echoed back to the server as the
    /// acknowledgement in every input packet.
    pub fn last_acked_frame(&self) -> Option<u32> {
        self.last_frame
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn handle_of(&self, id: NetworkId) -> Option<SceneHandle> {
        self.slots.get_at(id)
    }

    /// The position currently displayed for a replica (after smoothing and
    /// dead reckoning).
    pub fn replica_position(&self, id: NetworkId) -> Option<Vec3> {
        self.replicas.get(&id).map(|r| r.smoother.position())
    }

    pub fn replica_velocity(&self, id: NetworkId) -> Option<Vec3> {
        self.replicas.get(&id).map(|r| r.velocity)
    }

    pub fn replica_attachment(&self, id: NetworkId) -> Option<NetworkId> {
        self.replicas.get(&id).and_then(|r| r.attached_to)
    }

    pub fn replica_kind(&self, id: NetworkId) -> Option<ReplicaKind> {
        self.replicas.get(&id).map(|r| r.kind)
    }

    /// Applies one snapshot datagram. Returns false when the datagram is
    /// stale (its frame is not newer than the last applied one) and was
    /// ignored. Decode errors drop the datagram without touching any state.
    pub fn apply_datagram(
        &mut self,
        bytes: &[u8],
        scene: &mut dyn SceneAdapter,
    ) -> Result<bool, WireError> {
        let decoded = self.decode_datagram(bytes)?;

        if self
            .last_frame
            .is_some_and(|last| !frame::newer(decoded.frame_idx, last))
        {
            return Ok(false);
        }

        self.apply_decoded(decoded, scene);
        Ok(true)
    }

    /// Applies the bootstrap object block parsed out of the init packet.
    /// The init frame seeds the ack cursor.
    pub fn apply_bootstrap(
        &mut self,
        frame_idx: u32,
        objects: Vec<ObjectDelta>,
        scene: &mut dyn SceneAdapter,
    ) {
        self.apply_decoded(
            DecodedDatagram {
                frame_idx,
                objects,
                deleted: Vec::new(),
            },
            scene,
        );
    }

    fn decode_datagram(&self, bytes: &[u8]) -> Result<DecodedDatagram, WireError> {
        let mut r = WireReader::new(bytes);
        let frame_idx = r.read_u24()?;
        let count = r.read_u16()? as usize;

        let mut objects = Vec::with_capacity(count);
        for _ in 0..count {
            objects.push(decode_object(&mut r, &self.cfg)?);
        }

        let deleted_count = r.read_u16()? as usize;
        let mut deleted = Vec::with_capacity(deleted_count);
        for _ in 0..deleted_count {
            let (id, _) = NetworkId::from_wire(r.read_u16()?);
            deleted.push(id);
        }

        Ok(DecodedDatagram {
            frame_idx,
            objects,
            deleted,
        })
    }

    fn apply_decoded(&mut self, decoded: DecodedDatagram, scene: &mut dyn SceneAdapter) {
        for delta in decoded.objects {
            self.apply_object(delta, scene);
        }

        for id in decoded.deleted {
            self.destroy_replica(id, scene);
        }

        self.last_frame = Some(match self.last_frame {
            Some(last) if frame::newer(last, decoded.frame_idx) => last,
            _ => decoded.frame_idx,
        });

        scene.sync_viewports();
    }

    fn apply_object(&mut self, delta: ObjectDelta, scene: &mut dyn SceneAdapter) {
        let id = delta.id;

        if !self.replicas.contains_key(&id) {
            let kind = if delta.is_2d {
                ReplicaKind::Flat
            } else {
                ReplicaKind::Spatial
            };
            let handle = scene.instantiate(kind);
            if self.slots.insert_at(id, handle).is_err() {
                // The slot is occupied but we lost the replica record;
                // resynchronize by adopting the existing handle.
                log::warn!("slot {id} occupied without a replica, adopting");
                if let Some(existing) = self.slots.get_at(id) {
                    scene.destroy(handle);
                    self.replicas.insert(id, ReplicaState::new(existing, kind));
                }
            } else {
                self.replicas.insert(id, ReplicaState::new(handle, kind));
            }
        }

        let Some(replica) = self.replicas.get_mut(&id) else {
            return;
        };
        let handle = replica.handle;

        // Attachment target changed: adopt it and drop any kinematic motion
        // (attachment and velocity are mutually exclusive).
        if let Some(target) = delta.attached_to {
            replica.attached_to = Some(target);
            replica.velocity = Vec3::ZERO;
        }

        // Fields apply in wire order. Velocity first: its presence means the
        // object moves kinematically again, so detach before applying.
        if let Some(velocity) = delta.velocity {
            replica.attached_to = None;
            replica.velocity = velocity;
            scene.set_velocity(handle, velocity);
        }

        let attached = replica.attached_to.is_some();

        if let Some(position) = delta.position {
            if !attached {
                replica.smoother.correct_position(position);
            }
        }
        if let Some(orientation) = delta.orientation {
            if !attached {
                replica.smoother.correct_orientation(orientation);
            }
        }
        if let Some(scale) = delta.scale {
            if !attached {
                replica.smoother.correct_scale(scale);
            }
        }

        if let Some((sound, radius)) = delta.sound {
            match SoundKind::from_wire(sound, radius) {
                SoundKind::None => scene.stop_sounds(handle),
                SoundKind::Spatial { index, radius } => {
                    if self.tables.sound_name(index).is_some() {
                        scene.play_spatial_sound(handle, index, radius);
                    } else {
                        log::warn!("sound index {index} out of range on {id}, skipping");
                    }
                }
                SoundKind::Flat { index } => {
                    if self.tables.sound_name(index).is_some() {
                        scene.play_flat_sound(handle, index);
                    } else {
                        log::warn!("sound index {index} out of range on {id}, skipping");
                    }
                }
            }
        }

        if let Some(model) = delta.model {
            if model == -1 || self.tables.model_name(model).is_some() {
                scene.set_model(handle, model);
            } else {
                log::warn!("model index {model} out of range on {id}, skipping");
            }
        }
        if let Some(animation) = delta.animation {
            if animation == -1 || self.tables.animation_name(animation).is_some() {
                scene.set_animation(handle, animation);
            } else {
                log::warn!("animation index {animation} out of range on {id}, skipping");
            }
        }
        if let Some(particle) = delta.particle {
            if particle == -1 || self.tables.particle_name(particle).is_some() {
                scene.set_particle(handle, particle);
            } else {
                log::warn!("particle index {particle} out of range on {id}, skipping");
            }
        }

        if let Some(blob) = delta.blob {
            scene.apply_blob(handle, &blob);
        }
    }

    fn destroy_replica(&mut self, id: NetworkId, scene: &mut dyn SceneAdapter) {
        if let Some(replica) = self.replicas.remove(&id) {
            scene.stop_sounds(replica.handle);
            scene.destroy(replica.handle);
        }
        self.slots.remove_at(id);
    }

    /// Advances one render frame: dead reckoning plus smoothing for free
    /// replicas, then parent transform copies for attached ones, and pushes
    /// the results into the scene.
    pub fn update(&mut self, dt: f32, scene: &mut dyn SceneAdapter) {
        for replica in self.replicas.values_mut() {
            if replica.attached_to.is_none() {
                replica.smoother.advance(dt, replica.velocity);
            }
        }

        // Attached replicas copy their parent's displayed transform,
        // bypassing interpolation.
        let copies: Vec<(NetworkId, NetworkId)> = self
            .replicas
            .iter()
            .filter_map(|(&id, r)| r.attached_to.map(|parent| (id, parent)))
            .collect();
        for (id, parent) in copies {
            let Some(parent_state) = self.replicas.get(&parent) else {
                // Target vanished: stop copying, keep the last transform.
                continue;
            };
            let position = parent_state.smoother.position();
            let orientation = parent_state.smoother.orientation();
            let scale = parent_state.smoother.scale();
            if let Some(replica) = self.replicas.get_mut(&id) {
                replica.smoother.snap(position, orientation, scale);
            }
        }

        for replica in self.replicas.values() {
            scene.set_position(replica.handle, replica.smoother.position());
            scene.set_orientation(replica.handle, replica.smoother.orientation());
            scene.set_scale(replica.handle, replica.smoother.scale());
        }
    }
}
