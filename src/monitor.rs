//! Chain head monitoring
//!
//! Polls the daemon for its chain head and returns once it moves away from the
//! head the current template was built on.

use crate::client::DaemonClient;
use crate::{Error, Hash, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Waits for the daemon's chain head to change
#[async_trait]
pub trait ChainMonitor: Send + Sync {
    /// Return once the chain head differs from `known_head`.
    ///
    /// Returns `Error::Cancelled` when `cancellation` fires first.
    async fn wait_chain_update(&self, known_head: Hash, cancellation: CancellationToken)
        -> Result<()>;
}

/// Chain monitor polling `getlastblockheader` every scan period
pub struct DaemonChainMonitor {
    daemon: Arc<dyn DaemonClient>,
    scan_period: Duration,
}

impl DaemonChainMonitor {
    pub fn new(daemon: Arc<dyn DaemonClient>, scan_period: Duration) -> Self {
        Self {
            daemon,
            scan_period,
        }
    }
}

#[async_trait]
impl ChainMonitor for DaemonChainMonitor {
    async fn wait_chain_update(
        &self,
        known_head: Hash,
        cancellation: CancellationToken,
    ) -> Result<()> {
        debug!(known_head = %known_head, "Monitoring chain head");

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    return Err(Error::cancelled("chain monitoring"));
                }
                _ = tokio::time::sleep(self.scan_period) => {}
            }

            match self.daemon.last_block_hash().await {
                Ok(head) if head != known_head => {
                    info!(previous = %known_head, current = %head, "Blockchain updated");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_unreachable() => {
                    warn!("Couldn't poll daemon for chain head: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
