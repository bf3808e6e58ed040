//! Shared connection plumbing.
//!
//! `tokio_postgres` splits a connection into a [`Client`] handle and a
//! [`tokio_postgres::Connection`] future that must be polled to drive
//! network I/O; every connector in the corpus (e.g.
//! `proxy::serverless::backend::TokioMechanism::connect_once`) spawns
//! that future onto its own task and keeps only the `Client`. This
//! module is the one place that pattern lives so the planner-probe pool
//! and the worker pool both connect identically.

use std::time::Duration;

use tokio_postgres::{Client, NoTls};

use crate::config::Config;

/// Builds fresh backend connections using the process configuration.
/// Cheap to clone — it only holds an `Arc`-free copy of the bits needed
/// to build a `tokio_postgres::Config`.
#[derive(Clone)]
pub struct ConnFactory {
    host: String,
    port: u16,
    user: String,
    password: String,
    dbname: String,
    statement_timeout: Duration,
}

impl ConnFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.db_host.clone(),
            port: config.db_port,
            user: config.db_user.clone(),
            password: config.db_password.clone(),
            dbname: config.db_name.clone(),
            statement_timeout: config.statement_timeout,
        }
    }

    /// Open one new connection, spawn its driver task, and return the
    /// usable client. The statement timeout is applied as a `-c`
    /// startup option, exactly as `original_source/cmd/postpass/main.go`
    /// does via its `options='-c statement_timeout=...'` connstring
    /// parameter.
    pub async fn connect(&self) -> Result<Client, tokio_postgres::Error> {
        let timeout_ms = self.statement_timeout.as_millis();
        let options = format!("-c statement_timeout={timeout_ms}");

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.dbname)
            .options(&options)
            .ssl_mode(tokio_postgres::config::SslMode::Disable);

        let (client, connection) = pg_config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::warn!(%error, "backend connection closed with an error");
            }
        });
        Ok(client)
    }
}
