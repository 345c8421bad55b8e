//! Bootstrap and input packet layouts.
//!
//! Unreliable client→server packets carry a type byte: `0` UDP-HERE (one
//! byte total, endpoint discovery) or `1` player input. The reliable
//! channel carries the server's init packet one way and a 2-byte ACK the
//! other. Server→client datagrams have no type byte: they are always
//! snapshots.

use glam::Vec3;

use crate::frame::FRAME_NONE;
use crate::precache::{PrecacheError, PrecacheTables};
use crate::wire::{
    CodecConfig, ObjectDelta, VectorPrecision, WireError, WireReader, WireWriter, decode_object,
};

/// Client→server unreliable: endpoint discovery probe, one byte total.
pub const PACKET_UDP_HERE: u8 = 0;
/// Client→server unreliable: player input.
pub const PACKET_PLAYER_INPUT: u8 = 1;
/// Client→server reliable: bootstrap acknowledgement.
pub const PACKET_TCP_ACK: u8 = 0;

/// Upper bound on a client input packet.
pub const MAX_INPUT_PACKET: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Precache(#[from] PrecacheError),
    #[error("input packet of {0} bytes exceeds the 1024-byte bound")]
    InputTooLarge(usize),
}

/// One per-frame input report from a client. Doubles as the snapshot
/// acknowledgement: `acked_frame` is the only mechanism that advances the
/// server's delta baseline for this client.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInput {
    pub player_index: u8,
    pub sequence: u32,
    pub acked_frame: Option<u32>,
    pub position: Vec3,
    pub orientation: Vec3,
}

impl PlayerInput {
    /// Serializes the full packet including the leading type byte.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(40);
        w.write_u8(PACKET_PLAYER_INPUT);
        w.write_u8(self.player_index);
        w.write_u32(self.sequence);
        w.write_u24(self.acked_frame.unwrap_or(FRAME_NONE));
        for v in [self.position, self.orientation] {
            w.write_f32(v.x);
            w.write_f32(v.y);
            w.write_f32(v.z);
        }
        w.into_vec()
    }

    /// Parses the packet body (everything after the type byte).
    pub fn decode(body: &[u8]) -> Result<Self, HandshakeError> {
        if body.len() > MAX_INPUT_PACKET {
            return Err(HandshakeError::InputTooLarge(body.len()));
        }
        let mut r = WireReader::new(body);
        let player_index = r.read_u8()?;
        let sequence = r.read_u32()?;
        let acked = r.read_u24()?;
        let acked_frame = (acked != FRAME_NONE).then_some(acked);
        let position = Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?);
        let orientation = Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?);
        Ok(Self {
            player_index,
            sequence,
            acked_frame,
            position,
            orientation,
        })
    }
}

/// The 2-byte reliable bootstrap acknowledgement.
pub fn encode_ack(player_index: u8) -> [u8; 2] {
    [PACKET_TCP_ACK, player_index]
}

/// The parsed init packet: everything a client needs before the first
/// delta datagram.
pub struct InitPacket {
    pub player_index: u8,
    pub tables: PrecacheTables,
    pub frame_idx: u32,
    pub objects: Vec<ObjectDelta>,
}

/// Parses the reliable init payload. `prefix` consumes any
/// application-specific bytes registered ahead of the core layout; the
/// codec config for the object block is derived from the freshly parsed
/// tables.
pub fn read_init_packet(
    payload: &[u8],
    precision: VectorPrecision,
    prefix: Option<&mut dyn FnMut(&mut WireReader<'_>)>,
) -> Result<(InitPacket, CodecConfig), HandshakeError> {
    let mut r = WireReader::new(payload);
    if let Some(prefix) = prefix {
        prefix(&mut r);
    }

    let player_index = r.read_u8()?;
    let tables = PrecacheTables::read(&mut r)?;
    let frame_idx = r.read_u24()?;
    let cfg = CodecConfig::new(precision, &tables);

    let count = r.read_u16()? as usize;
    let mut objects = Vec::with_capacity(count);
    for _ in 0..count {
        objects.push(decode_object(&mut r, &cfg)?);
    }

    Ok((
        InitPacket {
            player_index,
            tables,
            frame_idx,
            objects,
        },
        cfg,
    ))
}
