//! Relay transport, the relay itself and the sync session

pub mod memory;
pub mod relay;
pub mod session;
pub mod transport;

pub use memory::MemoryConnector;
pub use relay::{Relay, RelayHandle, Router};
pub use session::{CloseReason, InboundOutcome, SessionEvent, SessionState, Snapshot, SyncSession};
pub use transport::{relay_url, ws_connection, Connection, Connector, MessageSink, MessageSource, WsConnector};
