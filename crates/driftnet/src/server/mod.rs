mod cursor;
mod replicator;

pub use cursor::ClientCursor;
pub use replicator::{DatagramReport, Replicator};
