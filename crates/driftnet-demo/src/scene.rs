use std::collections::HashMap;

use glam::Vec3;

use driftnet::{PrecacheTables, ReplicaKind, SceneAdapter, SceneHandle, SceneSample};

/// A minimal in-memory scene: enough host surface for the replication core
/// to sample from and write back into.
#[derive(Default)]
pub struct DemoScene {
    next: u64,
    objects: HashMap<SceneHandle, SceneSample>,
    kinds: HashMap<SceneHandle, ReplicaKind>,
}

impl DemoScene {
    pub fn spawn(&mut self, sample: SceneSample) -> SceneHandle {
        self.next += 1;
        let handle = SceneHandle(self.next);
        self.objects.insert(handle, sample);
        self.kinds.insert(handle, ReplicaKind::Spatial);
        handle
    }

    pub fn get_mut(&mut self, handle: SceneHandle) -> Option<&mut SceneSample> {
        self.objects.get_mut(&handle)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl SceneAdapter for DemoScene {
    fn sample(&self, handle: SceneHandle) -> Option<SceneSample> {
        self.objects.get(&handle).cloned()
    }

    fn precache(&mut self, tables: &PrecacheTables) {
        log::info!(
            "precached {} sounds, {} models, {} animations, {} particles",
            tables.sound_count(),
            tables.model_count(),
            tables.animation_count(),
            tables.particle_count()
        );
    }

    fn instantiate(&mut self, kind: ReplicaKind) -> SceneHandle {
        self.next += 1;
        let handle = SceneHandle(self.next);
        self.objects.insert(handle, SceneSample::default());
        self.kinds.insert(handle, kind);
        log::debug!("instantiated {kind:?} replica {handle:?}");
        handle
    }

    fn destroy(&mut self, handle: SceneHandle) {
        self.objects.remove(&handle);
        self.kinds.remove(&handle);
        log::debug!("destroyed replica {handle:?}");
    }

    fn set_position(&mut self, handle: SceneHandle, position: Vec3) {
        if let Some(sample) = self.objects.get_mut(&handle) {
            sample.position = position;
        }
    }

    fn set_orientation(&mut self, handle: SceneHandle, orientation: Vec3) {
        if let Some(sample) = self.objects.get_mut(&handle) {
            sample.orientation = orientation;
        }
    }

    fn set_scale(&mut self, handle: SceneHandle, scale: Vec3) {
        if let Some(sample) = self.objects.get_mut(&handle) {
            sample.scale = scale;
        }
    }

    fn set_velocity(&mut self, handle: SceneHandle, velocity: Vec3) {
        if let Some(sample) = self.objects.get_mut(&handle) {
            sample.velocity = velocity;
        }
    }

    fn set_model(&mut self, handle: SceneHandle, index: i16) {
        if let Some(sample) = self.objects.get_mut(&handle) {
            sample.model = index;
        }
    }

    fn set_animation(&mut self, handle: SceneHandle, index: i16) {
        if let Some(sample) = self.objects.get_mut(&handle) {
            sample.animation = index;
        }
    }

    fn set_particle(&mut self, handle: SceneHandle, index: i16) {
        if let Some(sample) = self.objects.get_mut(&handle) {
            sample.particle = index;
        }
    }

    fn play_spatial_sound(&mut self, handle: SceneHandle, index: i16, radius: u8) {
        log::debug!("3d sound {index} (radius {radius}m) on {handle:?}");
    }

    fn play_flat_sound(&mut self, handle: SceneHandle, index: i16) {
        log::debug!("2d sound {index} on {handle:?}");
    }

    fn stop_sounds(&mut self, handle: SceneHandle) {
        log::debug!("sounds stopped on {handle:?}");
    }

    fn apply_blob(&mut self, handle: SceneHandle, data: &[u8]) {
        log::debug!("{} blob bytes for {handle:?}", data.len());
    }

    fn sync_viewports(&mut self) {}
}
