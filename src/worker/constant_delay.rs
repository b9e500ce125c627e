//! Constant delay worker for deterministic testing
//!
//! Produces blocks at a constant rate regardless of difficulty. The daemon
//! must accept blocks without proof-of-work validation (a test chain).

use super::{mining_span, MiningStats, MiningWorker};
use crate::{BlockMiningParameters, BlockTemplate, Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

/// Constant delay worker that produces blocks at regular intervals
pub struct ConstantDelayWorker {
    block_time: Duration,
    stats: Mutex<MiningStats>,
}

impl ConstantDelayWorker {
    /// Create a new constant delay worker with specified block time
    pub fn new(block_time: Duration) -> Self {
        info!("Creating constant delay worker with block time: {:?}", block_time);

        Self {
            block_time,
            stats: Mutex::new(MiningStats::default()),
        }
    }

    pub fn block_time(&self) -> Duration {
        self.block_time
    }
}

#[async_trait]
impl MiningWorker for ConstantDelayWorker {
    fn worker_type(&self) -> &'static str {
        "constant-delay"
    }

    async fn mine(
        &self,
        params: BlockMiningParameters,
        _thread_count: usize,
        cancellation: CancellationToken,
    ) -> Result<BlockTemplate> {
        let span = mining_span(self.worker_type(), params.difficulty);

        async move {
            let start_time = Instant::now();
            debug!(
                "Waiting {:?} before producing block (ignoring difficulty {})",
                self.block_time, params.difficulty
            );

            tokio::select! {
                _ = sleep(self.block_time) => {
                    let mut block = params.block_template;
                    block.nonce = rand::rng().random();

                    let elapsed = start_time.elapsed();
                    {
                        let mut stats = self.stats.lock();
                        stats.solutions_found += 1;
                        // No real hashing; one nominal hash per block
                        stats.total_hashes += 1;
                        stats.mining_time_secs += elapsed.as_secs();
                        stats.average_hash_rate = super::compute_hash_rate(1, elapsed);
                    }

                    info!(
                        "Constant delay worker produced block after {:?} with nonce {}",
                        elapsed, block.nonce
                    );
                    Ok(block)
                }
                _ = cancellation.cancelled() => {
                    debug!("Constant delay mining cancelled");
                    Err(Error::cancelled("Constant delay mining"))
                }
            }
        }
        .instrument(span)
        .await
    }

    fn stats(&self) -> MiningStats {
        self.stats.lock().clone()
    }
}
