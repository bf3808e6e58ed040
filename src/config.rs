//! Process-wide static configuration.
//!
//! Parsed once from the command line (with environment-variable fallback
//! via `clap`'s `env` feature) and handed out as an immutable [`Config`]
//! for the rest of the process lifetime. Mirrors the shape of
//! `original_source/postpass/config.go`, but loaded the way the rest of
//! this corpus loads configuration (`clap::Parser`, e.g.
//! `storage_controller/src/main.rs`'s `Cli`) instead of being baked in as
//! constants.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Command-line interface. See each field's doc comment for the
/// corresponding `original_source/postpass/config.go` constant.
#[derive(Parser, Debug)]
#[command(author, version, about = "cost-based admission gateway for read-only PostGIS queries")]
pub struct Cli {
    /// Address to listen on for HTTP requests.
    #[arg(long, env = "POSTPASS_LISTEN", default_value = "127.0.0.1:8081")]
    pub listen: SocketAddr,

    /// Backend Postgres host.
    #[arg(long, env = "POSTPASS_DB_HOST", default_value = "localhost")]
    pub db_host: String,

    /// Backend Postgres port.
    #[arg(long, env = "POSTPASS_DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    /// Backend Postgres role. Must be a read-only user; the gateway does
    /// not enforce this itself (see §9 "SQL injection" in the design doc).
    #[arg(long, env = "POSTPASS_DB_USER", default_value = "readonly")]
    pub db_user: String,

    /// Backend Postgres password. Prefer the environment variable over
    /// the flag in production so it doesn't show up in `ps`.
    #[arg(long, env = "POSTPASS_DB_PASSWORD", default_value = "readonly")]
    pub db_password: String,

    /// Backend database name.
    #[arg(long, env = "POSTPASS_DB_NAME", default_value = "gis")]
    pub db_name: String,

    /// Statement timeout applied to every backend connection.
    #[arg(long, env = "POSTPASS_STATEMENT_TIMEOUT", default_value = "10h")]
    pub statement_timeout: humantime::Duration,

    /// Cost below which a query is classified Quick.
    #[arg(long, env = "POSTPASS_QUICK_MEDIUM_THRESHOLD", default_value_t = 150)]
    pub quick_medium_threshold: i64,

    /// Cost below which a query is classified Medium (else Slow).
    #[arg(long, env = "POSTPASS_MEDIUM_SLOW_THRESHOLD", default_value_t = 150_000)]
    pub medium_slow_threshold: i64,

    /// Executors in the Quick pool.
    #[arg(long, env = "POSTPASS_QUICK_WORKERS", default_value_t = 10)]
    pub quick_workers: usize,

    /// Executors in the Medium pool.
    #[arg(long, env = "POSTPASS_MEDIUM_WORKERS", default_value_t = 4)]
    pub medium_workers: usize,

    /// Executors in the Slow pool.
    #[arg(long, env = "POSTPASS_SLOW_WORKERS", default_value_t = 2)]
    pub slow_workers: usize,

    /// Bounded queue capacity, shared by all three classes.
    #[arg(long, env = "POSTPASS_QUEUE_CAPACITY", default_value_t = 50)]
    pub queue_capacity: usize,

    /// Number of connections held open for planner `EXPLAIN` probes.
    /// Defaults to the Quick pool size, since probe volume tracks
    /// inbound request rate rather than query cost.
    #[arg(long, env = "POSTPASS_PROBE_POOL_SIZE")]
    pub probe_pool_size: Option<usize>,

    /// `generator` string embedded into wrapped JSON responses.
    #[arg(long, env = "POSTPASS_GENERATOR", default_value = "Postpass API 0.2")]
    pub generator: String,
}

/// Immutable, validated configuration derived from [`Cli`].
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub statement_timeout: Duration,
    pub quick_medium_threshold: i64,
    pub medium_slow_threshold: i64,
    pub quick_workers: usize,
    pub medium_workers: usize,
    pub slow_workers: usize,
    pub queue_capacity: usize,
    pub probe_pool_size: usize,
    pub generator: String,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let probe_pool_size = cli.probe_pool_size.unwrap_or(cli.quick_workers);
        Config {
            listen: cli.listen,
            db_host: cli.db_host,
            db_port: cli.db_port,
            db_user: cli.db_user,
            db_password: cli.db_password,
            db_name: cli.db_name,
            statement_timeout: cli.statement_timeout.into(),
            quick_medium_threshold: cli.quick_medium_threshold,
            medium_slow_threshold: cli.medium_slow_threshold,
            quick_workers: cli.quick_workers,
            medium_workers: cli.medium_workers,
            slow_workers: cli.slow_workers,
            queue_capacity: cli.queue_capacity,
            probe_pool_size,
            generator: cli.generator,
        }
    }
}

impl Config {
    /// Parse from `std::env::args`, applying environment-variable fallback.
    pub fn from_args() -> Self {
        Cli::parse().into()
    }
}
