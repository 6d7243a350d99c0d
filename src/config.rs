use clap::Parser;

use crate::constants;

/// Ingestion Server Configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Listen on [host:]port for device connections. Repeatable; a shared
    /// port is content-routed between protocols.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:23000")]
    pub listen: Vec<String>,

    /// PostgreSQL connection string for the telemetry store.
    #[arg(long, env = "DATABASE_URL", value_name = "URL")]
    pub database_url: String,

    /// Maximum connections in the database pool.
    #[arg(long, default_value_t = 16)]
    pub db_pool_size: u32,

    /// Graceful shutdown drain budget in seconds.
    #[arg(long, default_value_t = constants::SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,

    /// Idle read timeout for TFMS90 connections in seconds.
    #[arg(long, default_value_t = constants::IDLE_TIMEOUT_TFMS90_SECS)]
    pub idle_timeout_tfms90: u64,

    /// Idle read timeout for Teltonika connections in seconds.
    #[arg(long, default_value_t = constants::IDLE_TIMEOUT_TELTONIKA_SECS)]
    pub idle_timeout_teltonika: u64,

    /// Minimum interval between device last-seen updates per connection,
    /// in seconds.
    #[arg(long, default_value_t = constants::TOUCH_COALESCE_SECS)]
    pub coalesce_interval: u64,

    /// Per-connection insert queue depth before records are dropped.
    #[arg(long, default_value_t = constants::INSERT_QUEUE_DEPTH)]
    pub drop_queue: usize,

    /// Protocol router peek budget in seconds.
    #[arg(long, default_value_t = constants::ROUTER_PEEK_TIMEOUT_SECS)]
    pub peek_timeout: u64,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}
