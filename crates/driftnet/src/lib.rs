pub mod client;
pub mod frame;
pub mod precache;
pub mod scene;
pub mod server;
pub mod session;
pub mod slot;
pub mod snapshot;
pub mod visibility;
pub mod wire;

/// Hard cap on one unreliable datagram. Snapshots that would exceed it
/// defer objects to a later tick.
pub const MAX_DATAGRAM: usize = 1400;

pub use client::{Reconciler, SMOOTHING_WINDOW, SNAP_EPSILON, TransformSmoother};
pub use precache::{IndexWidth, PrecacheError, PrecacheTables};
pub use scene::{ReplicaKind, SceneAdapter, SceneHandle, SceneSample};
pub use server::{ClientCursor, DatagramReport, Replicator};
pub use session::{
    ChannelError, ClientSession, DatagramChannel, FixedTimestep, NetStats, PlayerInput,
    ReliableChannel, ReliableListener, Role, ServerSession, Session, SessionConfig, SessionError,
    SessionEvent, TICK_RATE,
};
pub use slot::{SlotTable, SlotTableError};
pub use snapshot::{
    InlineFlags, MAX_OBJECTS, NetworkId, ObjectState, Snapshot, SnapshotStore, SoundKind,
};
pub use visibility::{Frustum, ViewPoint, should_transmit};
pub use wire::{
    CodecConfig, FieldMask, ObjectDelta, VectorPrecision, WireError, WireReader, WireWriter,
    byte_to_dir, decode_object, dir_to_byte, encode_full, encode_object,
};
