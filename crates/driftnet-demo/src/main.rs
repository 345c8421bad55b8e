mod scene;

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use glam::Vec3;

use driftnet::{
    PrecacheTables, ReplicaKind, Role, SceneSample, Session, SessionConfig, SessionEvent,
    VectorPrecision, ViewPoint,
};
use scene::DemoScene;

#[derive(Parser)]
#[command(name = "driftnet-demo")]
#[command(about = "Snapshot replication demo host")]
struct Args {
    #[arg(long, value_enum, default_value = "both")]
    role: RoleArg,

    #[arg(long, default_value = "127.0.0.1:27960", help = "Reliable endpoint")]
    reliable: String,

    #[arg(long, default_value = "127.0.0.1:27961", help = "Datagram endpoint")]
    datagram: String,

    #[arg(long, default_value_t = 16)]
    max_clients: usize,

    #[arg(long, help = "Encode transform floats as IEEE half precision")]
    half_floats: bool,

    #[arg(long, default_value_t = 30, help = "Seconds to run before exiting")]
    run_secs: u64,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum RoleArg {
    Server,
    Client,
    Both,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Server => Role::Server,
            RoleArg::Client => Role::Client,
            RoleArg::Both => Role::Both,
        }
    }
}

fn build_tables() -> Result<PrecacheTables> {
    let mut tables = PrecacheTables::new();
    tables.add_sound("sfx/hum.wav")?;
    tables.add_sound("sfx/launch.wav")?;
    tables.add_model("models/drone.mesh")?;
    tables.add_model("models/rocket.mesh")?;
    tables.add_animation("anims/hover")?;
    tables.add_particle("fx/exhaust")?;
    Ok(tables)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SessionConfig {
        role: args.role.into(),
        reliable_addr: args.reliable.clone(),
        datagram_addr: args.datagram.clone(),
        max_clients: args.max_clients,
        precision: if args.half_floats {
            VectorPrecision::Half
        } else {
            VectorPrecision::Full
        },
        ..SessionConfig::default()
    };

    let mut scene = DemoScene::default();
    let mut session = Session::new(&config, build_tables()?)?;

    // The authoritative role carries a little world: a patrolling drone and
    // a rocket on a ballistic arc.
    let mut drone = None;
    let mut rocket = None;
    if let Some(server) = session.server_mut() {
        let handle = scene.spawn(SceneSample {
            position: Vec3::new(0.0, 2.0, -10.0),
            model: 0,
            animation: 0,
            sound: 0,
            sound_radius: 25,
            view_radius: 2.0,
            ..SceneSample::default()
        });
        server
            .replicator_mut()
            .register(handle, ReplicaKind::Spatial, false)?;
        drone = Some(handle);

        let handle = scene.spawn(SceneSample {
            position: Vec3::new(-5.0, 0.0, -20.0),
            velocity: Vec3::new(8.0, 12.0, 0.0),
            model: 1,
            particle: 0,
            view_radius: 1.0,
            ..SceneSample::default()
        });
        server
            .replicator_mut()
            .register(handle, ReplicaKind::Spatial, true)?;
        rocket = Some(handle);

        log::info!("world ready: {} objects", server.replicator().object_count());
    }

    let deadline = Instant::now() + Duration::from_secs(args.run_secs);
    let mut last = Instant::now();
    let mut elapsed_total = 0.0f32;
    let mut players: std::collections::HashMap<u8, driftnet::SceneHandle> =
        std::collections::HashMap::new();

    while Instant::now() < deadline {
        let now = Instant::now();
        let dt = (now - last).as_secs_f32();
        last = now;
        elapsed_total += dt;

        // Host-side simulation of the authoritative objects.
        if let Some(handle) = drone {
            if let Some(sample) = scene.get_mut(handle) {
                sample.position.x = (elapsed_total * 0.5).sin() * 6.0;
                sample.orientation.y = elapsed_total * 0.8;
            }
        }
        if let Some(handle) = rocket {
            if let Some(sample) = scene.get_mut(handle) {
                sample.velocity.y -= 9.8 * dt;
                let velocity = sample.velocity;
                sample.position += velocity * dt;
                if sample.position.y < 0.0 {
                    sample.position = Vec3::new(-5.0, 0.0, -20.0);
                    sample.velocity = Vec3::new(8.0, 12.0, 0.0);
                }
            }
        }

        // Steer accepted inputs into the player objects.
        let inputs: Vec<_> = session
            .server_mut()
            .map(|s| s.drain_inputs())
            .unwrap_or_default();
        for input in inputs {
            if let Some(&handle) = players.get(&input.player_index) {
                if let Some(sample) = scene.get_mut(handle) {
                    sample.position = input.position;
                    sample.orientation = input.orientation;
                }
            }
        }

        if let Some(client) = session.client_mut() {
            client.set_view(ViewPoint {
                position: Vec3::ZERO,
                orientation: Vec3::ZERO,
            });
        }

        session.update(dt, &mut scene)?;

        for event in session.drain_events() {
            match event {
                SessionEvent::ClientConnected {
                    player_index,
                    object,
                    handle,
                } => {
                    players.insert(player_index, handle);
                    log::info!("player {player_index} connected as {object}");
                }
                SessionEvent::ClientReady { player_index } => {
                    log::info!("player {player_index} ready");
                }
                SessionEvent::ClientDisconnected { player_index } => {
                    players.remove(&player_index);
                    log::info!("player {player_index} left");
                }
                SessionEvent::UdpConfirmed { player_index } => {
                    log::info!("player {player_index} datagram endpoint confirmed");
                }
                SessionEvent::BootstrapComplete { player_index } => {
                    log::info!("bootstrap complete, we are player {player_index}");
                }
                SessionEvent::Error { message } => log::error!("{message}"),
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    if let Some(server) = session.server() {
        let stats = server.stats();
        log::info!(
            "server sent {} datagrams / {} bytes, {} objects encoded, {} full resends",
            stats.datagrams_sent,
            stats.bytes_sent,
            stats.objects_encoded,
            stats.full_resends
        );
    }
    if let Some(client) = session.client() {
        let stats = client.stats();
        log::info!(
            "client received {} datagrams / {} bytes, scene holds {} objects",
            stats.datagrams_received,
            stats.bytes_received,
            scene.object_count()
        );
    }

    Ok(())
}
