//! End-to-end replication scenarios over loopback channels: one server role,
//! one client role, each with its own in-memory scene.

use std::collections::HashMap;

use glam::Vec3;

use driftnet::{
    ClientSession, NetworkId, PrecacheTables, ReplicaKind, SceneAdapter, SceneHandle, SceneSample,
    ServerSession, SessionConfig, VectorPrecision,
};

/// Seconds per replication tick.
const DT: f32 = 1.0 / 20.0;

#[derive(Default)]
struct TestScene {
    next: u64,
    objects: HashMap<SceneHandle, SceneSample>,
    kinds: HashMap<SceneHandle, ReplicaKind>,
    precached: bool,
    spatial_sounds: Vec<(SceneHandle, i16, u8)>,
    flat_sounds: Vec<(SceneHandle, i16)>,
    stopped: Vec<SceneHandle>,
    destroyed: Vec<SceneHandle>,
    blobs: Vec<(SceneHandle, Vec<u8>)>,
    animations_set: Vec<(SceneHandle, i16)>,
    viewport_syncs: usize,
}

impl TestScene {
    fn spawn(&mut self, sample: SceneSample) -> SceneHandle {
        self.next += 1;
        let handle = SceneHandle(self.next);
        self.objects.insert(handle, sample);
        self.kinds.insert(handle, ReplicaKind::Spatial);
        handle
    }

    fn object(&self, handle: SceneHandle) -> &SceneSample {
        &self.objects[&handle]
    }

    fn object_mut(&mut self, handle: SceneHandle) -> &mut SceneSample {
        self.objects.get_mut(&handle).expect("unknown handle")
    }
}

impl SceneAdapter for TestScene {
    fn sample(&self, handle: SceneHandle) -> Option<SceneSample> {
        self.objects.get(&handle).cloned()
    }

    fn precache(&mut self, _tables: &PrecacheTables) {
        self.precached = true;
    }

    fn instantiate(&mut self, kind: ReplicaKind) -> SceneHandle {
        self.next += 1;
        let handle = SceneHandle(self.next);
        self.objects.insert(handle, SceneSample::default());
        self.kinds.insert(handle, kind);
        handle
    }

    fn destroy(&mut self, handle: SceneHandle) {
        self.objects.remove(&handle);
        self.destroyed.push(handle);
    }

    fn set_position(&mut self, handle: SceneHandle, position: Vec3) {
        self.object_mut(handle).position = position;
    }

    fn set_orientation(&mut self, handle: SceneHandle, orientation: Vec3) {
        self.object_mut(handle).orientation = orientation;
    }

    fn set_scale(&mut self, handle: SceneHandle, scale: Vec3) {
        self.object_mut(handle).scale = scale;
    }

    fn set_velocity(&mut self, handle: SceneHandle, velocity: Vec3) {
        self.object_mut(handle).velocity = velocity;
    }

    fn set_model(&mut self, handle: SceneHandle, index: i16) {
        self.object_mut(handle).model = index;
    }

    fn set_animation(&mut self, handle: SceneHandle, index: i16) {
        self.object_mut(handle).animation = index;
        self.animations_set.push((handle, index));
    }

    fn set_particle(&mut self, handle: SceneHandle, index: i16) {
        self.object_mut(handle).particle = index;
    }

    fn play_spatial_sound(&mut self, handle: SceneHandle, index: i16, radius: u8) {
        self.spatial_sounds.push((handle, index, radius));
    }

    fn play_flat_sound(&mut self, handle: SceneHandle, index: i16) {
        self.flat_sounds.push((handle, index));
    }

    fn stop_sounds(&mut self, handle: SceneHandle) {
        self.stopped.push(handle);
    }

    fn apply_blob(&mut self, handle: SceneHandle, data: &[u8]) {
        self.blobs.push((handle, data.to_vec()));
    }

    fn sync_viewports(&mut self) {
        self.viewport_syncs += 1;
    }
}

struct Harness {
    server: ServerSession,
    client: ClientSession,
    server_scene: TestScene,
    client_scene: TestScene,
}

impl Harness {
    fn new(tables: PrecacheTables) -> Self {
        let config = SessionConfig::default();
        let mut server = ServerSession::local_only(&config, tables);
        let (reliable, udp) = server.connect_local();
        let client = ClientSession::from_channels(reliable, udp, VectorPrecision::Full);

        Self {
            server,
            client,
            server_scene: TestScene::default(),
            client_scene: TestScene::default(),
        }
    }

    fn step(&mut self) {
        self.server.update(DT, &mut self.server_scene).unwrap();
        self.client.update(DT, &mut self.client_scene).unwrap();
    }

    /// Runs the full bootstrap: accept, init, ACK, endpoint probe, and the
    /// first snapshot round.
    fn bootstrap(&mut self) {
        for _ in 0..4 {
            self.step();
        }
        assert!(self.client.is_ready(), "bootstrap did not complete");
        assert!(self.server.is_started(), "snapshot loop never started");
    }

    fn client_handle(&self, id: NetworkId) -> SceneHandle {
        self.client
            .reconciler()
            .expect("client not bootstrapped")
            .handle_of(id)
            .expect("replica missing")
    }
}

fn tables_with_assets() -> PrecacheTables {
    let mut tables = PrecacheTables::new();
    tables.add_sound("explosion.wav").unwrap();
    tables.add_sound("hum.wav").unwrap();
    tables.add_model("cube.mesh").unwrap();
    tables.add_model("barrel.mesh").unwrap();
    tables.add_model("crate.mesh").unwrap();
    tables.add_model("rocket.mesh").unwrap();
    tables.add_animation("idle").unwrap();
    tables.add_animation("walk").unwrap();
    tables.add_particle("smoke").unwrap();
    tables
}

/// S1: a single static cube survives the bootstrap intact.
#[test]
fn static_cube_bootstrap() {
    let mut harness = Harness::new(tables_with_assets());

    let cube = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(10.0, 0.0, 5.0),
        model: 3,
        ..SceneSample::default()
    });
    let cube_id = harness
        .server
        .replicator_mut()
        .register(cube, ReplicaKind::Spatial, false)
        .unwrap();

    harness.bootstrap();

    assert!(harness.client_scene.precached);
    let reconciler = harness.client.reconciler().unwrap();
    // The cube is the only replica: the client's own object is excluded.
    assert_eq!(reconciler.replica_count(), 1);

    let handle = harness.client_handle(cube_id);
    let replica = harness.client_scene.object(handle);
    assert!((replica.position - Vec3::new(10.0, 0.0, 5.0)).length() < 0.01);
    assert_eq!(replica.model, 3);
    assert_eq!(replica.scale, Vec3::ONE);
}

/// S2: a constant-velocity projectile is dead-reckoned, not retransmitted.
#[test]
fn projectile_dead_reckoning() {
    let mut harness = Harness::new(tables_with_assets());

    // Flies straight down the view axis so culling never hides it.
    let projectile = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(0.0, 0.0, -10.0),
        velocity: Vec3::new(0.0, 0.0, -100.0),
        ..SceneSample::default()
    });
    let id = harness
        .server
        .replicator_mut()
        .register(projectile, ReplicaKind::Spatial, false)
        .unwrap();

    harness.bootstrap();

    let encoded_after_bootstrap = harness.server.stats().objects_encoded;

    // The server integrates the projectile exactly as dead reckoning
    // predicts; nothing about it should hit the wire.
    let before = harness
        .client
        .reconciler()
        .unwrap()
        .replica_position(id)
        .unwrap();
    for _ in 0..4 {
        let pos = harness.server_scene.object(projectile).position;
        harness
            .server_scene
            .object_mut(projectile)
            .position = pos + Vec3::new(0.0, 0.0, -100.0 * DT);
        harness.step();
    }

    assert_eq!(
        harness.server.stats().objects_encoded,
        encoded_after_bootstrap,
        "projectile state was retransmitted"
    );

    let after = harness
        .client
        .reconciler()
        .unwrap()
        .replica_position(id)
        .unwrap();
    let travelled = (after - before).z;
    let expected = -100.0 * DT * 4.0;
    assert!(
        (travelled - expected).abs() < 1.5,
        "client integrated {travelled}, expected about {expected}"
    );
}

/// S3: lost datagrams are absorbed; a later delta against the old baseline
/// still applies, and history is collected once acks catch up.
#[test]
fn lossy_delivery_recovers() {
    let mut harness = Harness::new(tables_with_assets());

    let mover = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(0.0, 0.0, -10.0),
        ..SceneSample::default()
    });
    let id = harness
        .server
        .replicator_mut()
        .register(mover, ReplicaKind::Spatial, false)
        .unwrap();

    harness.bootstrap();

    // Two snapshots vanish in flight.
    for i in 0..2 {
        harness
            .server_scene
            .object_mut(mover)
            .position = Vec3::new(1.0 + i as f32, 0.0, -10.0);
        harness.server.update(DT, &mut harness.server_scene).unwrap();
        let lost = harness.client.drop_pending_datagrams();
        assert!(lost > 0, "expected traffic to drop");
        harness.client.update(DT, &mut harness.client_scene).unwrap();
    }

    // The next one arrives and carries the accumulated difference.
    harness
        .server_scene
        .object_mut(mover)
        .position = Vec3::new(5.0, 0.0, -10.0);
    for _ in 0..3 {
        harness.step();
    }

    let pos = harness
        .client
        .reconciler()
        .unwrap()
        .replica_position(id)
        .unwrap();
    assert!((pos - Vec3::new(5.0, 0.0, -10.0)).length() < 0.1);

    // Acks caught up, so old history is gone.
    let latest = harness.server.replicator().store().latest().unwrap().frame;
    assert!(harness.server.replicator().store().find(0).is_none());
    assert!(harness.server.replicator().store().find(latest).is_some());
}

/// S4: attach, idle, detach-with-velocity.
#[test]
fn attachment_transitions() {
    let mut harness = Harness::new(tables_with_assets());

    let carrier = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(0.0, 0.0, -20.0),
        ..SceneSample::default()
    });
    let cargo = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(3.0, 0.0, -20.0),
        velocity: Vec3::new(2.0, 0.0, 0.0),
        ..SceneSample::default()
    });
    let carrier_id = harness
        .server
        .replicator_mut()
        .register(carrier, ReplicaKind::Spatial, false)
        .unwrap();
    let cargo_id = harness
        .server
        .replicator_mut()
        .register(cargo, ReplicaKind::Spatial, false)
        .unwrap();

    harness.bootstrap();

    harness.server.replicator_mut().attach(cargo_id, carrier_id);
    for _ in 0..2 {
        harness.step();
    }
    let reconciler = harness.client.reconciler().unwrap();
    assert_eq!(reconciler.replica_attachment(cargo_id), Some(carrier_id));
    // The attached replica displays its parent's transform.
    let cargo_pos = reconciler.replica_position(cargo_id).unwrap();
    let carrier_pos = reconciler.replica_position(carrier_id).unwrap();
    assert!((cargo_pos - carrier_pos).length() < 0.01);

    // A few unchanged ticks keep it attached.
    for _ in 0..2 {
        harness.step();
    }
    assert_eq!(
        harness
            .client
            .reconciler()
            .unwrap()
            .replica_attachment(cargo_id),
        Some(carrier_id)
    );

    // Detach with fresh velocity: the client resumes kinematic motion.
    harness.server.replicator_mut().detach(cargo_id);
    harness.server_scene.object_mut(cargo).velocity = Vec3::new(40.0, 0.0, 0.0);
    harness.server_scene.object_mut(cargo).position = Vec3::new(1.0, 0.0, -20.0);
    for _ in 0..2 {
        harness.step();
    }
    let reconciler = harness.client.reconciler().unwrap();
    assert_eq!(reconciler.replica_attachment(cargo_id), None);
    assert_eq!(
        reconciler.replica_velocity(cargo_id),
        Some(Vec3::new(40.0, 0.0, 0.0))
    );
}

/// S5: destroying an emitting object stops its sound and frees the replica.
#[test]
fn sound_stops_on_deletion() {
    let mut harness = Harness::new(tables_with_assets());

    let siren = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(0.0, 0.0, -10.0),
        sound: 1,
        sound_radius: 20,
        ..SceneSample::default()
    });
    let id = harness
        .server
        .replicator_mut()
        .register(siren, ReplicaKind::Spatial, false)
        .unwrap();

    harness.bootstrap();

    let handle = harness.client_handle(id);
    assert!(
        harness
            .client_scene
            .spatial_sounds
            .contains(&(handle, 1, 20))
    );

    harness.server_scene.destroy(siren);
    harness.server.replicator_mut().unregister(id);
    for _ in 0..3 {
        harness.step();
    }

    assert!(harness.client_scene.stopped.contains(&handle));
    assert!(harness.client_scene.destroyed.contains(&handle));
    assert_eq!(harness.client.reconciler().unwrap().replica_count(), 0);
    assert!(
        harness
            .client
            .reconciler()
            .unwrap()
            .handle_of(id)
            .is_none()
    );
}

/// S6: an out-of-range precache index skips that field only.
#[test]
fn precache_miss_skips_field() {
    let mut harness = Harness::new(tables_with_assets());

    // Animation index 7 with only two animations precached.
    let glitchy = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(4.0, 0.0, -8.0),
        animation: 7,
        model: 1,
        ..SceneSample::default()
    });
    let id = harness
        .server
        .replicator_mut()
        .register(glitchy, ReplicaKind::Spatial, false)
        .unwrap();

    harness.bootstrap();

    let handle = harness.client_handle(id);
    let replica = harness.client_scene.object(handle);
    // Position and model applied, the bad animation skipped.
    assert!((replica.position - Vec3::new(4.0, 0.0, -8.0)).length() < 0.01);
    assert_eq!(replica.model, 1);
    assert!(
        !harness
            .client_scene
            .animations_set
            .iter()
            .any(|&(h, a)| h == handle && a == 7)
    );
}

/// Flat replicas come back as 2D objects with two-component transforms.
#[test]
fn flat_replicas_bootstrap_as_2d() {
    let mut harness = Harness::new(tables_with_assets());

    let hud = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(120.0, 40.0, 0.0),
        ..SceneSample::default()
    });
    harness.server_scene.kinds.insert(hud, ReplicaKind::Flat);
    let id = harness
        .server
        .replicator_mut()
        .register(hud, ReplicaKind::Flat, false)
        .unwrap();

    harness.bootstrap();

    let reconciler = harness.client.reconciler().unwrap();
    assert_eq!(reconciler.replica_kind(id), Some(ReplicaKind::Flat));
    let handle = harness.client_handle(id);
    assert_eq!(harness.client_scene.kinds[&handle], ReplicaKind::Flat);
    let replica = harness.client_scene.object(handle);
    assert!((replica.position - Vec3::new(120.0, 40.0, 0.0)).length() < 0.01);
}

/// 2D sounds and blobs ride the same object records.
#[test]
fn flat_sound_and_blob_roundtrip() {
    let mut harness = Harness::new(tables_with_assets());

    let jukebox = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(0.0, 0.0, -6.0),
        sound: -(1 + 2), // 2D sound index 1
        blob: Some(vec![9, 9, 9]),
        ..SceneSample::default()
    });
    let id = harness
        .server
        .replicator_mut()
        .register(jukebox, ReplicaKind::Spatial, false)
        .unwrap();

    harness.bootstrap();

    let handle = harness.client_handle(id);
    assert!(harness.client_scene.flat_sounds.contains(&(handle, 1)));
    assert!(
        harness
            .client_scene
            .blobs
            .contains(&(handle, vec![9, 9, 9]))
    );
    assert!(harness.client_scene.viewport_syncs > 0);
}

/// Two clients with opposite views receive different update streams.
#[test]
fn visibility_is_per_client() {
    let config = SessionConfig::default();
    let mut server = ServerSession::local_only(&config, tables_with_assets());
    let mut server_scene = TestScene::default();

    let (reliable_a, udp_a) = server.connect_local();
    let mut client_a = ClientSession::from_channels(reliable_a, udp_a, VectorPrecision::Full);
    let mut scene_a = TestScene::default();

    let (reliable_b, udp_b) = server.connect_local();
    let mut client_b = ClientSession::from_channels(reliable_b, udp_b, VectorPrecision::Full);
    let mut scene_b = TestScene::default();

    let target = server_scene.spawn(SceneSample {
        position: Vec3::new(0.0, 0.0, -30.0),
        ..SceneSample::default()
    });
    let id = server
        .replicator_mut()
        .register(target, ReplicaKind::Spatial, false)
        .unwrap();

    // Client B faces the other way.
    client_b.set_view(driftnet::ViewPoint {
        position: Vec3::ZERO,
        orientation: Vec3::new(0.0, std::f32::consts::PI, 0.0),
    });

    for _ in 0..5 {
        server.update(DT, &mut server_scene).unwrap();
        client_a.update(DT, &mut scene_a).unwrap();
        client_b.update(DT, &mut scene_b).unwrap();
    }
    assert!(client_a.is_ready() && client_b.is_ready());
    assert!(server.is_started());

    // Both saw the target in the uncalled bootstrap snapshot.
    let start_a = client_a
        .reconciler()
        .unwrap()
        .replica_position(id)
        .unwrap();
    let start_b = client_b
        .reconciler()
        .unwrap()
        .replica_position(id)
        .unwrap();
    assert!((start_a - start_b).length() < 0.01);

    // Only the client facing the object receives its movement.
    server_scene.object_mut(target).position = Vec3::new(0.0, 5.0, -30.0);
    for _ in 0..4 {
        server.update(DT, &mut server_scene).unwrap();
        client_a.update(DT, &mut scene_a).unwrap();
        client_b.update(DT, &mut scene_b).unwrap();
    }

    let seen_a = client_a
        .reconciler()
        .unwrap()
        .replica_position(id)
        .unwrap();
    let seen_b = client_b
        .reconciler()
        .unwrap()
        .replica_position(id)
        .unwrap();
    assert!((seen_a.y - 5.0).abs() < 0.1, "client A missed the update");
    assert!(seen_b.y.abs() < 0.01, "client B saw a culled update");
}

/// A full server rejects further connections without disturbing the
/// existing ones.
#[test]
fn server_full_rejects_new_clients() {
    let config = SessionConfig {
        max_clients: 1,
        ..SessionConfig::default()
    };
    let mut server = ServerSession::local_only(&config, tables_with_assets());
    let mut server_scene = TestScene::default();

    let (reliable_a, udp_a) = server.connect_local();
    let mut client_a = ClientSession::from_channels(reliable_a, udp_a, VectorPrecision::Full);
    let mut scene_a = TestScene::default();

    let (reliable_b, udp_b) = server.connect_local();
    let mut client_b = ClientSession::from_channels(reliable_b, udp_b, VectorPrecision::Full);
    let mut scene_b = TestScene::default();

    for _ in 0..5 {
        server.update(DT, &mut server_scene).unwrap();
        client_a.update(DT, &mut scene_a).unwrap();
        client_b.update(DT, &mut scene_b).unwrap();
    }

    assert_eq!(server.client_count(), 1);
    assert!(client_a.is_ready());
    assert!(!client_b.is_ready());
}

/// A client joining after the loop started bootstraps against the live
/// world.
#[test]
fn late_joiner_bootstraps_mid_session() {
    let mut harness = Harness::new(tables_with_assets());

    let obj = harness.server_scene.spawn(SceneSample {
        position: Vec3::new(2.0, 0.0, -15.0),
        ..SceneSample::default()
    });
    let id = harness
        .server
        .replicator_mut()
        .register(obj, ReplicaKind::Spatial, false)
        .unwrap();

    harness.bootstrap();
    for _ in 0..3 {
        harness.step();
    }
    assert!(harness.server.is_started());

    let (reliable, udp) = harness.server.connect_local();
    let mut late_client = ClientSession::from_channels(reliable, udp, VectorPrecision::Full);
    let mut late_scene = TestScene::default();

    for _ in 0..4 {
        harness.step();
        late_client.update(DT, &mut late_scene).unwrap();
    }

    assert!(late_client.is_ready());
    let reconciler = late_client.reconciler().unwrap();
    // Sees the pre-existing object plus the first client's avatar.
    assert_eq!(reconciler.replica_count(), 2);
    let pos = reconciler.replica_position(id).unwrap();
    assert!((pos - Vec3::new(2.0, 0.0, -15.0)).length() < 0.01);
}

/// Inputs flow back: the server sees the client's view and sequence.
#[test]
fn inputs_reach_the_server() {
    let mut harness = Harness::new(tables_with_assets());
    harness.bootstrap();

    harness.client.set_view(driftnet::ViewPoint {
        position: Vec3::new(7.0, 1.0, -2.0),
        orientation: Vec3::new(0.0, 1.0, 0.0),
    });
    for _ in 0..3 {
        harness.step();
    }

    let inputs = harness.server.drain_inputs();
    assert!(!inputs.is_empty());
    let last = inputs.last().unwrap();
    assert_eq!(last.position, Vec3::new(7.0, 1.0, -2.0));
    assert!(last.acked_frame.is_some());
    assert!(last.sequence >= 1);
}
