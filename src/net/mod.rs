// Network layer module
// Listener, protocol router and per-connection device sessions

pub mod connection;
pub mod listener;
pub mod router;
pub mod session;

pub use connection::Connection;
pub use listener::TcpServer;
pub use session::{DeviceSession, SessionSettings, SessionState};
