mod connection;
mod protocol;
mod registry;
mod session;

#[cfg(test)]
mod test_utils;

pub use connection::{ClientConnection, ConnectionState};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{SessionConfig, SessionRegistry, SyncStats};
pub use session::{ConnectionId, Frame, Presence, ProjectSession, SessionEvent};
