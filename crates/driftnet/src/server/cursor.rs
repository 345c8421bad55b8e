use crate::frame;
use crate::snapshot::NetworkId;
use crate::visibility::ViewPoint;

/// Per-client replication state on the server.
///
/// The ack cursor only ever moves forward: stale input packets (older
/// sequence or older acked frame) are dropped without effect.
#[derive(Debug)]
pub struct ClientCursor {
    pub player_index: u8,
    /// Last frame the client acknowledged; `None` until the bootstrap ACK.
    pub last_acked_frame: Option<u32>,
    /// Set once a UDP-HERE probe has revealed the client's datagram endpoint.
    pub udp_confirmed: bool,
    /// Set by the reliable bootstrap ACK.
    pub ready_for_game: bool,
    /// The scene object representing this client, excluded from its own
    /// deltas.
    pub in_game_object: Option<NetworkId>,
    /// Highest accepted input sequence number.
    pub input_sequence: u32,
    /// The client's last reported viewpoint, used for culling.
    pub view: ViewPoint,
    /// Per-client datagram scratch, overwritten every tick.
    pub scratch: Vec<u8>,
}

impl ClientCursor {
    pub fn new(player_index: u8) -> Self {
        Self {
            player_index,
            last_acked_frame: None,
            udp_confirmed: false,
            ready_for_game: false,
            in_game_object: None,
            input_sequence: 0,
            view: ViewPoint::default(),
            scratch: Vec::new(),
        }
    }

    /// Advances the ack cursor, ignoring regressions from reordered
    /// datagrams. Returns true when the cursor moved.
    pub fn advance_ack(&mut self, acked: u32) -> bool {
        match self.last_acked_frame {
            Some(current) if !frame::newer(acked, current) => false,
            _ => {
                self.last_acked_frame = Some(acked);
                true
            }
        }
    }

    /// Accepts an input only when its sequence is strictly newer than the
    /// last accepted one. Returns true when accepted.
    pub fn accept_input(&mut self, sequence: u32) -> bool {
        if sequence > self.input_sequence {
            self.input_sequence = sequence;
            true
        } else {
            false
        }
    }
}
