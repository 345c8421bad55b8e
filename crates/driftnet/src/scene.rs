//! The boundary to the host scene.
//!
//! The replication core never touches scene internals directly: the server
//! samples object state through this trait and the client pushes decoded
//! state back through it. Handles are opaque to the core.

use glam::Vec3;

use crate::precache::PrecacheTables;

/// Opaque host-scene object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneHandle(pub u64);

/// Replicas come in two shapes. Flat replicas live in a 2D plane: their wire
/// vectors carry two components and their rotation is a single angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaKind {
    Flat,
    Spatial,
}

impl ReplicaKind {
    pub fn is_2d(self) -> bool {
        matches!(self, ReplicaKind::Flat)
    }
}

/// One server-side sample of a scene object, taken once per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSample {
    pub position: Vec3,
    /// Euler angles in radians; flat objects use only the Y component.
    pub orientation: Vec3,
    pub scale: Vec3,
    pub velocity: Vec3,
    pub model: i16,
    pub animation: i16,
    pub particle: i16,
    /// Sign-encoded sound index (see `ObjectState::sound`).
    pub sound: i16,
    pub sound_radius: u8,
    /// Bounding-sphere radius for visibility culling.
    pub view_radius: f32,
    pub blob: Option<Vec<u8>>,
}

impl Default for SceneSample {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Vec3::ZERO,
            scale: Vec3::ONE,
            velocity: Vec3::ZERO,
            model: -1,
            animation: -1,
            particle: -1,
            sound: -1,
            sound_radius: 0,
            view_radius: 0.0,
            blob: None,
        }
    }
}

/// Everything the replication core needs from the host scene.
///
/// Server sessions call only the sampling half; client sessions call only
/// the mutation half. A host embedding both roles implements the whole
/// trait on its one scene.
pub trait SceneAdapter {
    /// Samples the current state of a registered object. `None` means the
    /// host no longer knows the handle; the object should be unregistered.
    fn sample(&self, handle: SceneHandle) -> Option<SceneSample>;

    /// Loads every asset referenced by the tables. Called once on the
    /// client before any object exists.
    fn precache(&mut self, tables: &PrecacheTables);

    /// Creates a replica of the given shape at the scene root and returns
    /// its handle.
    fn instantiate(&mut self, kind: ReplicaKind) -> SceneHandle;

    /// Destroys a replica (deletion observed from the server).
    fn destroy(&mut self, handle: SceneHandle);

    fn set_position(&mut self, handle: SceneHandle, position: Vec3);
    fn set_orientation(&mut self, handle: SceneHandle, orientation: Vec3);
    fn set_scale(&mut self, handle: SceneHandle, scale: Vec3);
    fn set_velocity(&mut self, handle: SceneHandle, velocity: Vec3);

    fn set_model(&mut self, handle: SceneHandle, index: i16);
    fn set_animation(&mut self, handle: SceneHandle, index: i16);
    fn set_particle(&mut self, handle: SceneHandle, index: i16);

    /// Starts a positional sound player on the replica. The player's
    /// maximum audible distance is `radius` meters and its attenuation unit
    /// size `0.15 * radius`; players free themselves on completion.
    fn play_spatial_sound(&mut self, handle: SceneHandle, index: i16, radius: u8);

    /// Starts a non-positional (2D) sound player on the replica.
    fn play_flat_sound(&mut self, handle: SceneHandle, index: i16);

    /// Stops and frees every sound player attached to the replica.
    fn stop_sounds(&mut self, handle: SceneHandle);

    /// Hands an opaque application payload to the host.
    fn apply_blob(&mut self, handle: SceneHandle, data: &[u8]);

    /// Called after a datagram has been fully applied so the host can
    /// propagate transforms and attachments to auxiliary viewports.
    fn sync_viewports(&mut self);
}
