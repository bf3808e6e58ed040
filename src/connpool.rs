//! Connection pool for the Planner Probe (spec §3, §6.3).
//!
//! The teacher crate hand-rolls its own pool (`proxy`'s
//! `GlobalConnPool`, referenced from `serverless/backend.rs` as
//! `Arc<GlobalConnPool<tokio_postgres::Client>>`) rather than reaching
//! for `deadpool`/`bb8`. This does the same, built on the exact bounded
//! channel primitive the Worker Pool itself uses: a fixed number of
//! live connections are pushed into a `tokio::sync::mpsc` channel at
//! startup, `acquire` is a `recv`, and returning a connection after use
//! is a `send`. The channel capacity is the pool's "max open" cap (spec
//! §6.3); acquiring when every connection is checked out is the
//! suspension point.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::pg::ConnFactory;

#[derive(Clone)]
pub struct ConnPool {
    checkout: mpsc::Sender<tokio_postgres::Client>,
    checkin: Arc<tokio::sync::Mutex<mpsc::Receiver<tokio_postgres::Client>>>,
    factory: ConnFactory,
}

/// A connection borrowed from the pool. Returned on drop unless the
/// holder explicitly discards it (see [`Lease::discard`]) because the
/// connection is known to be unusable (e.g. after an error mid-query) —
/// in that case a replacement is opened in the background so the pool
/// doesn't shrink.
pub struct Lease {
    client: Option<tokio_postgres::Client>,
    checkout: mpsc::Sender<tokio_postgres::Client>,
    factory: ConnFactory,
}

impl std::ops::Deref for Lease {
    type Target = tokio_postgres::Client;
    fn deref(&self) -> &Self::Target {
        self.client.as_ref().expect("lease used after discard")
    }
}

impl Lease {
    pub fn discard(mut self) {
        let client = self.client.take();
        debug_assert!(client.is_some());
        let checkout = self.checkout.clone();
        let factory = self.factory.clone();
        tokio::spawn(async move {
            match factory.connect().await {
                Ok(fresh) => {
                    let _ = checkout.send(fresh).await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to open replacement probe connection");
                }
            }
        });
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            let checkout = self.checkout.clone();
            // try_send first: the common case is a free slot since this
            // connection just vacated one. Fall back to a spawned send
            // in the pathological case of a concurrent discard racing
            // us for the slot.
            if let Err(mpsc::error::TrySendError::Full(client)) = checkout.try_send(client) {
                tokio::spawn(async move {
                    let _ = checkout.send(client).await;
                });
            }
        }
    }
}

impl ConnPool {
    /// Open `size` connections up front and register them as available.
    pub async fn new(factory: ConnFactory, size: usize) -> Result<Self, tokio_postgres::Error> {
        let (checkout, checkin) = mpsc::channel(size);
        for _ in 0..size {
            let client = factory.connect().await?;
            checkout
                .try_send(client)
                .expect("probe pool channel sized to its own connection count");
        }
        Ok(Self {
            checkout,
            checkin: Arc::new(tokio::sync::Mutex::new(checkin)),
            factory,
        })
    }

    /// Borrow a connection. Blocks if every connection is checked out —
    /// the pool's admission back-pressure for probe traffic.
    pub async fn acquire(&self) -> Lease {
        let client = {
            let mut checkin = self.checkin.lock().await;
            checkin
                .recv()
                .await
                .expect("ConnPool owns the sending half for its own lifetime")
        };
        Lease {
            client: Some(client),
            checkout: self.checkout.clone(),
            factory: self.factory.clone(),
        }
    }
}
