//! Everything needed to talk to the remote avatar controller.

pub mod protocol;
mod session;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use protocol::{InjectMode, ParameterValue, PluginInfo, RigMessage, RigRequest, RigResponse};
pub use session::{AuthState, ConnectionState, RigSession, SharedRig};
pub use transport::{Transport, WebSocketTransport};
