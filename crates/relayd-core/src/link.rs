//! Connectivity manager.
//!
//! The daemon runs on hosts with flaky uplinks, so the link is verified by
//! probing the messaging backend itself rather than trusting interface state.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::{errors::Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[async_trait]
pub trait Link: Send + Sync {
    fn state(&self) -> LinkState;

    /// Cheap, bounded check; polled once per loop iteration.
    async fn is_connected(&self) -> bool;

    /// Block until connected or the connect timeout elapses.
    async fn connect(&self) -> Result<()>;
}

const RETRY_INTERVAL: Duration = Duration::from_millis(250);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Link that is "up" when a TCP handshake with `probe_addr` succeeds.
pub struct TcpProbeLink {
    probe_addr: String,
    connect_timeout: Duration,
    probe_timeout: Duration,
    state: std::sync::Mutex<LinkState>,
    // Serializes connect attempts.
    connecting: Mutex<()>,
}

impl TcpProbeLink {
    pub fn new(probe_addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            probe_addr: probe_addr.into(),
            connect_timeout,
            probe_timeout: PROBE_TIMEOUT.min(connect_timeout),
            state: std::sync::Mutex::new(LinkState::Disconnected),
            connecting: Mutex::new(()),
        }
    }

    fn set_state(&self, next: LinkState) {
        if let Ok(mut st) = self.state.lock() {
            if *st != next {
                debug!(from = ?*st, to = ?next, "link state");
                *st = next;
            }
        }
    }

    async fn probe(&self) -> bool {
        match timeout(self.probe_timeout, TcpStream::connect(&self.probe_addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(addr = %self.probe_addr, "link probe failed: {e}");
                false
            }
            Err(_) => {
                debug!(addr = %self.probe_addr, "link probe timed out");
                false
            }
        }
    }
}

#[async_trait]
impl Link for TcpProbeLink {
    fn state(&self) -> LinkState {
        self.state
            .lock()
            .map(|st| *st)
            .unwrap_or(LinkState::Disconnected)
    }

    async fn is_connected(&self) -> bool {
        let up = self.probe().await;
        match (self.state(), up) {
            (_, true) => self.set_state(LinkState::Connected),
            (LinkState::Connected, false) => {
                warn!(addr = %self.probe_addr, "link lost");
                self.set_state(LinkState::Connecting);
            }
            (_, false) => {}
        }
        up
    }

    async fn connect(&self) -> Result<()> {
        let _guard = self.connecting.lock().await;
        if self.state() == LinkState::Connected && self.probe().await {
            return Ok(());
        }

        info!(addr = %self.probe_addr, "connecting");
        self.set_state(LinkState::Connecting);
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            if self.probe().await {
                self.set_state(LinkState::Connected);
                info!(addr = %self.probe_addr, "link up");
                return Ok(());
            }
            if Instant::now() + RETRY_INTERVAL >= deadline {
                self.set_state(LinkState::Disconnected);
                return Err(Error::Link(format!(
                    "no connectivity to {} within {:?}",
                    self.probe_addr, self.connect_timeout
                )));
            }
            sleep(RETRY_INTERVAL).await;
        }
    }
}
