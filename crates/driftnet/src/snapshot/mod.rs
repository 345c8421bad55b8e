mod state;
mod store;

pub use state::{InlineFlags, MAX_OBJECTS, NetworkId, ObjectState, SoundKind};
pub use store::{DEFAULT_HISTORY, Snapshot, SnapshotStore};
