//! Session lifecycle: bootstrap, tick loop, and role wiring.
//!
//! A [`Session`] owns up to two roles. The server role accepts reliable
//! connections, runs the 20 Hz replication tick, and fans snapshots out over
//! the datagram channel; the client role bootstraps over the reliable
//! channel and feeds received snapshots into its reconciler. When one
//! process hosts both, the roles are wired through in-process loopback
//! channels instead of a shared globals bag.

mod channels;
mod handshake;
mod tick;

pub use channels::{
    ChannelError, DatagramChannel, MAX_RELIABLE_PAYLOAD, ReliableChannel, ReliableListener,
};
pub use handshake::{
    HandshakeError, InitPacket, MAX_INPUT_PACKET, PACKET_PLAYER_INPUT, PACKET_TCP_ACK,
    PACKET_UDP_HERE, PlayerInput, encode_ack, read_init_packet,
};
pub use tick::FixedTimestep;

use std::collections::VecDeque;
use std::net::{SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::client::Reconciler;
use crate::precache::PrecacheTables;
use crate::scene::{ReplicaKind, SceneAdapter, SceneHandle};
use crate::server::{ClientCursor, Replicator};
use crate::slot::SlotTableError;
use crate::snapshot::{DEFAULT_HISTORY, NetworkId};
use crate::visibility::ViewPoint;
use crate::wire::{CodecConfig, VectorPrecision, WireError, WireReader, WireWriter};

/// Replication tick rate, Hz. Fixed; rendering runs at its own rate.
pub const TICK_RATE: u32 = 20;

pub const DEFAULT_RELIABLE_PORT: u16 = 27960;
pub const DEFAULT_DATAGRAM_PORT: u16 = 27961;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Server,
    Client,
    Both,
}

/// Process-level configuration, supplied by the host at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub role: Role,
    /// Reliable listen (server) or connect (client) endpoint.
    pub reliable_addr: String,
    /// Unreliable listen (server) or connect (client) endpoint.
    pub datagram_addr: String,
    /// Informational cap; the hard limit stays the 4096-id slot table.
    pub max_clients: usize,
    pub precision: VectorPrecision,
    /// Snapshot history depth, frames.
    pub history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            reliable_addr: format!("127.0.0.1:{DEFAULT_RELIABLE_PORT}"),
            datagram_addr: format!("127.0.0.1:{DEFAULT_DATAGRAM_PORT}"),
            max_clients: 16,
            precision: VectorPrecision::Full,
            history: DEFAULT_HISTORY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Slots(#[from] SlotTableError),
    #[error("no usable address in '{0}'")]
    BadAddress(String),
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A client finished the reliable handshake's first half: it exists,
    /// has a player index, and its in-world object has been created.
    ClientConnected {
        player_index: u8,
        object: NetworkId,
        handle: SceneHandle,
    },
    /// The client acknowledged the init packet and will be included in the
    /// snapshot fan-out.
    ClientReady { player_index: u8 },
    ClientDisconnected { player_index: u8 },
    UdpConfirmed { player_index: u8 },
    /// Client side: the init packet was applied and the scene is populated.
    BootstrapComplete { player_index: u8 },
    Error { message: String },
}

/// Transfer counters, kept per role.
#[derive(Debug, Clone, Default)]
pub struct NetStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub objects_encoded: u64,
    pub full_resends: u64,
}

/// Callback writing an application-specific prefix into the init packet.
pub type InitPrefixWriter = Box<dyn FnMut(&mut WireWriter)>;
/// Callback consuming that prefix on the client.
pub type InitPrefixReader = Box<dyn FnMut(&mut WireReader<'_>)>;

struct ServerClient {
    cursor: ClientCursor,
    reliable: ReliableChannel,
    tcp_addr: Option<SocketAddr>,
    udp_addr: Option<SocketAddr>,
    /// Dedicated channel for a same-process client; `None` for socket peers.
    loopback_udp: Option<DatagramChannel>,
    init_frame: u32,
}

/// The authoritative role: accepts clients, ticks the replicator, fans out
/// snapshots, and collects input.
pub struct ServerSession {
    listener: Option<ReliableListener>,
    udp: DatagramChannel,
    replicator: Replicator,
    tables: PrecacheTables,
    cfg: CodecConfig,
    clients: Vec<ServerClient>,
    pending_local: Vec<(ReliableChannel, DatagramChannel)>,
    next_player_index: u8,
    max_clients: usize,
    timestep: FixedTimestep,
    started: bool,
    events: VecDeque<SessionEvent>,
    inputs: VecDeque<PlayerInput>,
    stats: NetStats,
    init_prefix: Option<InitPrefixWriter>,
}

impl ServerSession {
    pub fn new(config: &SessionConfig, tables: PrecacheTables) -> Result<Self, SessionError> {
        let listener = ReliableListener::bind(&config.reliable_addr)?;
        let udp = DatagramChannel::bind(&config.datagram_addr)?;
        log::info!(
            "server listening on {} (reliable) / {} (datagrams)",
            config.reliable_addr,
            config.datagram_addr
        );
        Ok(Self::with_parts(Some(listener), udp, config, tables))
    }

    /// A server with no socket surface at all: every client joins through
    /// `connect_local`. Used by same-process setups and tests.
    pub fn local_only(config: &SessionConfig, tables: PrecacheTables) -> Self {
        let (udp, _) = DatagramChannel::loopback_pair();
        Self::with_parts(None, udp, config, tables)
    }

    fn with_parts(
        listener: Option<ReliableListener>,
        udp: DatagramChannel,
        config: &SessionConfig,
        tables: PrecacheTables,
    ) -> Self {
        let cfg = CodecConfig::new(config.precision, &tables);
        Self {
            listener,
            udp,
            replicator: Replicator::new(config.history),
            tables,
            cfg,
            clients: Vec::new(),
            pending_local: Vec::new(),
            next_player_index: 0,
            max_clients: config.max_clients,
            timestep: FixedTimestep::new(TICK_RATE),
            started: false,
            events: VecDeque::new(),
            inputs: VecDeque::new(),
            stats: NetStats::default(),
            init_prefix: None,
        }
    }

    /// Registers the application prefix writer for future init packets.
    pub fn set_init_prefix(&mut self, writer: InitPrefixWriter) {
        self.init_prefix = Some(writer);
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    pub fn replicator_mut(&mut self) -> &mut Replicator {
        &mut self.replicator
    }

    pub fn tables(&self) -> &PrecacheTables {
        &self.tables
    }

    pub fn codec_config(&self) -> &CodecConfig {
        &self.cfg
    }

    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn drain_inputs(&mut self) -> Vec<PlayerInput> {
        self.inputs.drain(..).collect()
    }

    /// Wires a same-process client in: returns the client's channel ends.
    /// The bootstrap itself happens on the next `poll`, exactly as it would
    /// for a socket peer.
    pub fn connect_local(&mut self) -> (ReliableChannel, DatagramChannel) {
        let (server_reliable, client_reliable) = ReliableChannel::loopback_pair();
        let (server_udp, client_udp) = DatagramChannel::loopback_pair();
        self.pending_local.push((server_reliable, server_udp));
        (client_reliable, client_udp)
    }

    /// Drains sockets and queues: accepts new connections, processes
    /// reliable ACKs, learns UDP endpoints, and collects input packets.
    pub fn poll(&mut self, scene: &mut dyn SceneAdapter) -> Result<(), SessionError> {
        let accepted: Vec<(ReliableChannel, SocketAddr)> = match self.listener.as_mut() {
            Some(listener) => listener.accept_pending(),
            None => Vec::new(),
        };
        for (channel, addr) in accepted {
            self.accept_client(channel, Some(addr), None, scene)?;
        }

        let pending: Vec<(ReliableChannel, DatagramChannel)> =
            self.pending_local.drain(..).collect();
        for (reliable, udp) in pending {
            self.accept_client(reliable, None, Some(udp), scene)?;
        }

        self.poll_reliable(scene);
        self.poll_datagrams();
        Ok(())
    }

    /// Advances time: network intake plus as many 20 Hz ticks as the
    /// accumulator yields.
    pub fn update(&mut self, dt: f32, scene: &mut dyn SceneAdapter) -> Result<(), SessionError> {
        self.poll(scene)?;
        self.timestep.accumulate(dt);
        while self.timestep.consume_tick() {
            self.tick(scene);
        }
        Ok(())
    }

    fn accept_client(
        &mut self,
        mut reliable: ReliableChannel,
        tcp_addr: Option<SocketAddr>,
        loopback_udp: Option<DatagramChannel>,
        scene: &mut dyn SceneAdapter,
    ) -> Result<(), SessionError> {
        if self.clients.len() >= self.max_clients {
            log::warn!("rejecting connection: server is full");
            return Ok(());
        }

        let player_index = self.next_player_index;
        self.next_player_index = self.next_player_index.wrapping_add(1);

        // The client's in-world representation exists before the first
        // snapshot so every other peer sees it immediately.
        let handle = scene.instantiate(ReplicaKind::Spatial);
        let object = self.replicator.register(handle, ReplicaKind::Spatial, false)?;

        let init_frame = self.replicator.build_snapshot(scene);

        let mut w = WireWriter::new();
        if let Some(prefix) = self.init_prefix.as_mut() {
            prefix(&mut w);
        }
        w.write_u8(player_index);
        self.tables.write(&mut w);
        w.write_u24(init_frame);
        self.replicator
            .encode_bootstrap_objects(&mut w, Some(object), &self.cfg)?;

        if let Err(e) = reliable.send(w.as_slice()) {
            log::warn!("failed to send init packet to player {player_index}: {e}");
            self.replicator.unregister(object);
            scene.destroy(handle);
            return Ok(());
        }

        let mut cursor = ClientCursor::new(player_index);
        cursor.in_game_object = Some(object);

        self.clients.push(ServerClient {
            cursor,
            reliable,
            tcp_addr,
            udp_addr: None,
            loopback_udp,
            init_frame,
        });

        log::info!("player {player_index} connected, init packet sent (frame {init_frame})");
        self.events.push_back(SessionEvent::ClientConnected {
            player_index,
            object,
            handle,
        });
        Ok(())
    }

    fn poll_reliable(&mut self, scene: &mut dyn SceneAdapter) {
        let mut dropped = Vec::new();

        for client in &mut self.clients {
            let payloads = match client.reliable.poll() {
                Ok(payloads) => payloads,
                Err(e) => {
                    log::info!(
                        "reliable stream for player {} failed: {e}",
                        client.cursor.player_index
                    );
                    dropped.push(client.cursor.player_index);
                    continue;
                }
            };

            for payload in payloads {
                match payload.first() {
                    Some(&PACKET_TCP_ACK) if payload.len() >= 2 => {
                        if payload[1] != client.cursor.player_index {
                            continue;
                        }
                        if !client.cursor.ready_for_game {
                            client.cursor.ready_for_game = true;
                            // The init snapshot travelled reliably, so it is
                            // a guaranteed baseline.
                            client.cursor.advance_ack(client.init_frame);
                            self.events.push_back(SessionEvent::ClientReady {
                                player_index: client.cursor.player_index,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        for player_index in dropped {
            self.disconnect(player_index, scene);
        }
    }

    fn poll_datagrams(&mut self) {
        let packets = self.udp.poll();
        for (payload, addr) in packets {
            self.stats.datagrams_received += 1;
            self.stats.bytes_received += payload.len() as u64;
            self.handle_socket_datagram(&payload, addr);
        }

        for i in 0..self.clients.len() {
            let packets = match self.clients[i].loopback_udp.as_mut() {
                Some(channel) => channel.poll(),
                None => continue,
            };
            for (payload, _) in packets {
                self.stats.datagrams_received += 1;
                self.stats.bytes_received += payload.len() as u64;
                self.handle_client_datagram(i, &payload);
            }
        }
    }

    fn handle_socket_datagram(&mut self, payload: &[u8], addr: SocketAddr) {
        match payload.first() {
            Some(&PACKET_UDP_HERE) if payload.len() == 1 => {
                self.confirm_endpoint(addr);
            }
            Some(&PACKET_PLAYER_INPUT) => {
                let input = match PlayerInput::decode(&payload[1..]) {
                    Ok(input) => input,
                    Err(e) => {
                        log::debug!("dropping malformed input from {addr}: {e}");
                        return;
                    }
                };
                let Some(i) = self
                    .clients
                    .iter()
                    .position(|c| c.cursor.player_index == input.player_index)
                else {
                    return;
                };
                // Inputs double as endpoint discovery.
                if !self.clients[i].cursor.udp_confirmed {
                    self.clients[i].udp_addr = Some(addr);
                    self.clients[i].cursor.udp_confirmed = true;
                    self.events.push_back(SessionEvent::UdpConfirmed {
                        player_index: input.player_index,
                    });
                }
                self.apply_input(i, input);
            }
            _ => {}
        }
    }

    fn handle_client_datagram(&mut self, i: usize, payload: &[u8]) {
        match payload.first() {
            Some(&PACKET_UDP_HERE) if payload.len() == 1 => {
                if !self.clients[i].cursor.udp_confirmed {
                    self.clients[i].cursor.udp_confirmed = true;
                    self.events.push_back(SessionEvent::UdpConfirmed {
                        player_index: self.clients[i].cursor.player_index,
                    });
                }
            }
            Some(&PACKET_PLAYER_INPUT) => {
                let input = match PlayerInput::decode(&payload[1..]) {
                    Ok(input) => input,
                    Err(e) => {
                        log::debug!("dropping malformed loopback input: {e}");
                        return;
                    }
                };
                if input.player_index != self.clients[i].cursor.player_index {
                    return;
                }
                self.apply_input(i, input);
            }
            _ => {}
        }
    }

    /// Matches a UDP-HERE probe to a client. The probe carries no id, so
    /// the source IP is matched against reliable peers first, falling back
    /// to the oldest client without a confirmed endpoint.
    fn confirm_endpoint(&mut self, addr: SocketAddr) {
        if self.clients.iter().any(|c| c.udp_addr == Some(addr)) {
            return;
        }

        let by_ip = self.clients.iter().position(|c| {
            !c.cursor.udp_confirmed && c.tcp_addr.map(|a| a.ip()) == Some(addr.ip())
        });
        let chosen = by_ip.or_else(|| {
            self.clients
                .iter()
                .position(|c| !c.cursor.udp_confirmed && c.loopback_udp.is_none())
        });

        if let Some(i) = chosen {
            self.clients[i].udp_addr = Some(addr);
            self.clients[i].cursor.udp_confirmed = true;
            log::debug!(
                "player {} datagram endpoint is {addr}",
                self.clients[i].cursor.player_index
            );
            self.events.push_back(SessionEvent::UdpConfirmed {
                player_index: self.clients[i].cursor.player_index,
            });
        }
    }

    fn apply_input(&mut self, i: usize, input: PlayerInput) {
        let cursor = &mut self.clients[i].cursor;
        if !cursor.accept_input(input.sequence) {
            return;
        }
        if let Some(acked) = input.acked_frame {
            cursor.advance_ack(acked);
        }
        cursor.view = ViewPoint {
            position: input.position,
            orientation: input.orientation,
        };
        self.inputs.push_back(input);
    }

    fn tick(&mut self, scene: &mut dyn SceneAdapter) {
        if !self.started {
            let all_ready =
                !self.clients.is_empty() && self.clients.iter().all(|c| c.cursor.ready_for_game);
            if !all_ready {
                return;
            }
            self.started = true;
            log::info!("all clients ready, snapshot loop running");
        }

        self.replicator.build_snapshot(scene);

        for client in &mut self.clients {
            if !client.cursor.ready_for_game || !client.cursor.udp_confirmed {
                continue;
            }

            let report = match self.replicator.encode_datagram(&mut client.cursor, &self.cfg) {
                Ok(report) => report,
                Err(e) => {
                    log::warn!(
                        "failed to encode datagram for player {}: {e}",
                        client.cursor.player_index
                    );
                    continue;
                }
            };
            if report.bytes == 0 {
                continue;
            }
            self.stats.objects_encoded += report.objects as u64;
            if report.full_resend {
                self.stats.full_resends += 1;
            }

            let sent = match (&mut client.loopback_udp, client.udp_addr) {
                (Some(channel), _) => channel.send(&client.cursor.scratch),
                (None, Some(addr)) => self.udp.send_to(&client.cursor.scratch, addr),
                (None, None) => continue,
            };
            match sent {
                Ok(bytes) => {
                    self.stats.datagrams_sent += 1;
                    self.stats.bytes_sent += bytes as u64;
                }
                Err(e) => log::debug!(
                    "snapshot send to player {} failed: {e}",
                    client.cursor.player_index
                ),
            }
        }

        self.replicator
            .collect_history(self.clients.iter().map(|c| &c.cursor));
    }

    fn disconnect(&mut self, player_index: u8, scene: &mut dyn SceneAdapter) {
        let Some(i) = self
            .clients
            .iter()
            .position(|c| c.cursor.player_index == player_index)
        else {
            return;
        };
        let client = self.clients.remove(i);
        if let Some(object) = client.cursor.in_game_object {
            if let Some(handle) = self.replicator.handle_of(object) {
                scene.destroy(handle);
            }
            self.replicator.unregister(object);
        }
        log::info!("player {player_index} disconnected");
        self.events
            .push_back(SessionEvent::ClientDisconnected { player_index });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    AwaitingInit,
    Ready,
    Disconnected,
}

/// The replica role: bootstraps over the reliable channel, applies
/// snapshots, and reports input plus acks at the tick rate.
pub struct ClientSession {
    reliable: ReliableChannel,
    udp: DatagramChannel,
    state: ClientState,
    reconciler: Option<Reconciler>,
    player_index: Option<u8>,
    input_sequence: u32,
    local_view: ViewPoint,
    timestep: FixedTimestep,
    got_snapshot: bool,
    precision: VectorPrecision,
    init_prefix: Option<InitPrefixReader>,
    events: VecDeque<SessionEvent>,
    stats: NetStats,
}

impl ClientSession {
    pub fn connect(config: &SessionConfig) -> Result<Self, SessionError> {
        let reliable = ReliableChannel::connect(&config.reliable_addr)?;
        let mut udp = DatagramChannel::bind("0.0.0.0:0")?;
        let remote = config
            .datagram_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SessionError::BadAddress(config.datagram_addr.clone()))?;
        udp.set_remote(remote);
        log::info!(
            "connecting to {} (reliable) / {} (datagrams)",
            config.reliable_addr,
            config.datagram_addr
        );
        Ok(Self::from_channels(reliable, udp, config.precision))
    }

    /// Builds the role on already-wired channels (loopback or test doubles).
    pub fn from_channels(
        reliable: ReliableChannel,
        udp: DatagramChannel,
        precision: VectorPrecision,
    ) -> Self {
        Self {
            reliable,
            udp,
            state: ClientState::AwaitingInit,
            reconciler: None,
            player_index: None,
            input_sequence: 0,
            local_view: ViewPoint::default(),
            timestep: FixedTimestep::new(TICK_RATE),
            got_snapshot: false,
            precision,
            init_prefix: None,
            events: VecDeque::new(),
            stats: NetStats::default(),
        }
    }

    pub fn set_init_prefix(&mut self, reader: InitPrefixReader) {
        self.init_prefix = Some(reader);
    }

    pub fn reconciler(&self) -> Option<&Reconciler> {
        self.reconciler.as_ref()
    }

    pub fn player_index(&self) -> Option<u8> {
        self.player_index
    }

    pub fn is_ready(&self) -> bool {
        self.state == ClientState::Ready
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == ClientState::Disconnected
    }

    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    /// The host reports its avatar's transform here; it rides out in every
    /// input packet.
    pub fn set_view(&mut self, view: ViewPoint) {
        self.local_view = view;
    }

    /// Throws away every queued incoming datagram, returning the count.
    /// A deterministic stand-in for packet loss in tests and diagnostics.
    pub fn drop_pending_datagrams(&mut self) -> usize {
        self.udp.discard_incoming()
    }

    pub fn poll(&mut self, scene: &mut dyn SceneAdapter) -> Result<(), SessionError> {
        if self.state == ClientState::Disconnected {
            return Ok(());
        }

        let payloads = match self.reliable.poll() {
            Ok(payloads) => payloads,
            Err(e) => {
                log::warn!("reliable stream lost: {e}");
                self.state = ClientState::Disconnected;
                self.events.push_back(SessionEvent::Error {
                    message: format!("reliable stream lost: {e}"),
                });
                return Ok(());
            }
        };
        for payload in payloads {
            self.handle_reliable(&payload, scene)?;
        }

        let packets = self.udp.poll();
        for (payload, _) in packets {
            self.stats.datagrams_received += 1;
            self.stats.bytes_received += payload.len() as u64;
            if let Some(reconciler) = self.reconciler.as_mut() {
                match reconciler.apply_datagram(&payload, scene) {
                    Ok(true) => self.got_snapshot = true,
                    Ok(false) => {}
                    Err(e) => log::debug!("dropping malformed snapshot: {e}"),
                }
            }
        }

        Ok(())
    }

    fn handle_reliable(
        &mut self,
        payload: &[u8],
        scene: &mut dyn SceneAdapter,
    ) -> Result<(), SessionError> {
        if self.state != ClientState::AwaitingInit {
            return Ok(());
        }

        let prefix: Option<&mut dyn FnMut(&mut WireReader<'_>)> = match &mut self.init_prefix {
            Some(boxed) => Some(&mut **boxed),
            None => None,
        };
        let (init, cfg) = read_init_packet(payload, self.precision, prefix)?;

        scene.precache(&init.tables);
        let mut reconciler = Reconciler::new(init.tables, cfg);
        reconciler.apply_bootstrap(init.frame_idx, init.objects, scene);

        self.reliable.send(&encode_ack(init.player_index))?;
        self.player_index = Some(init.player_index);
        self.reconciler = Some(reconciler);
        self.state = ClientState::Ready;
        log::info!(
            "bootstrap complete: player {} at frame {}",
            init.player_index,
            init.frame_idx
        );
        self.events.push_back(SessionEvent::BootstrapComplete {
            player_index: init.player_index,
        });
        Ok(())
    }

    /// Advances render time and emits the 20 Hz client traffic: UDP-HERE
    /// probes until the first snapshot lands, then input packets.
    pub fn update(&mut self, dt: f32, scene: &mut dyn SceneAdapter) -> Result<(), SessionError> {
        self.poll(scene)?;

        if let Some(reconciler) = self.reconciler.as_mut() {
            reconciler.update(dt, scene);
        }

        if self.state == ClientState::Disconnected {
            return Ok(());
        }

        self.timestep.accumulate(dt);
        while self.timestep.consume_tick() {
            if !self.got_snapshot {
                if let Err(e) = self.udp.send(&[PACKET_UDP_HERE]) {
                    log::debug!("probe send failed: {e}");
                } else {
                    self.stats.datagrams_sent += 1;
                    self.stats.bytes_sent += 1;
                }
                continue;
            }

            if self.state != ClientState::Ready {
                continue;
            }
            let Some(player_index) = self.player_index else {
                continue;
            };

            self.input_sequence += 1;
            let input = PlayerInput {
                player_index,
                sequence: self.input_sequence,
                acked_frame: self.reconciler.as_ref().and_then(|r| r.last_acked_frame()),
                position: self.local_view.position,
                orientation: self.local_view.orientation,
            };
            let bytes = input.encode();
            match self.udp.send(&bytes) {
                Ok(sent) => {
                    self.stats.datagrams_sent += 1;
                    self.stats.bytes_sent += sent as u64;
                }
                Err(e) => log::debug!("input send failed: {e}"),
            }
        }

        Ok(())
    }
}

/// Top-level handle owning whichever roles the process plays.
pub struct Session {
    server: Option<ServerSession>,
    client: Option<ClientSession>,
}

impl Session {
    /// Builds the configured roles. For `Role::Both` the client half is
    /// wired to the server through loopback channels; its bootstrap runs
    /// through the ordinary accept path on the first update.
    pub fn new(config: &SessionConfig, tables: PrecacheTables) -> Result<Self, SessionError> {
        match config.role {
            Role::Server => Ok(Self {
                server: Some(ServerSession::new(config, tables)?),
                client: None,
            }),
            Role::Client => Ok(Self {
                server: None,
                client: Some(ClientSession::connect(config)?),
            }),
            Role::Both => {
                let mut server = ServerSession::new(config, tables)?;
                let (reliable, udp) = server.connect_local();
                let client = ClientSession::from_channels(reliable, udp, config.precision);
                Ok(Self {
                    server: Some(server),
                    client: Some(client),
                })
            }
        }
    }

    pub fn server(&self) -> Option<&ServerSession> {
        self.server.as_ref()
    }

    pub fn server_mut(&mut self) -> Option<&mut ServerSession> {
        self.server.as_mut()
    }

    pub fn client(&self) -> Option<&ClientSession> {
        self.client.as_ref()
    }

    pub fn client_mut(&mut self) -> Option<&mut ClientSession> {
        self.client.as_mut()
    }

    /// Advances every hosted role by `dt` seconds against the shared scene.
    pub fn update(&mut self, dt: f32, scene: &mut dyn SceneAdapter) -> Result<(), SessionError> {
        if let Some(server) = self.server.as_mut() {
            server.update(dt, scene)?;
        }
        if let Some(client) = self.client.as_mut() {
            client.update(dt, scene)?;
        }
        Ok(())
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if let Some(server) = self.server.as_mut() {
            events.extend(server.drain_events());
        }
        if let Some(client) = self.client.as_mut() {
            events.extend(client.drain_events());
        }
        events
    }
}
