pub mod codec;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod net;
pub mod store;
pub mod telemetry;
