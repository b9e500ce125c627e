//! Mining worker implementations
//!
//! Provides the CPU proof-of-work search and a constant delay worker for
//! test chains.

use crate::config::WorkerKind;
use crate::crypto::{check_hash, Blake2sHasher};
use crate::{BlockMiningParameters, BlockTemplate, HashingBlob, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Span;

pub mod constant_delay;
pub mod cpu;

pub use constant_delay::ConstantDelayWorker;
pub use cpu::CpuWorker;

/// Mining statistics for a worker
#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    /// Total hashes computed
    pub total_hashes: u64,
    /// Number of solutions found
    pub solutions_found: u64,
    /// Time spent mining (seconds)
    pub mining_time_secs: u64,
    /// Average hash rate (hashes per second)
    pub average_hash_rate: f64,
}

/// Mining worker trait
///
/// Workers are shared between mining cycles, so `mine` takes `&self`; any
/// per-run state lives inside the call.
#[async_trait]
pub trait MiningWorker: Send + Sync {
    /// Get the worker type name for logging
    fn worker_type(&self) -> &'static str;

    /// Search for a nonce that makes the template meet `params.difficulty`.
    ///
    /// Returns the template with the winning nonce set, or `Error::Cancelled`
    /// once `cancellation` fires.
    async fn mine(
        &self,
        params: BlockMiningParameters,
        thread_count: usize,
        cancellation: CancellationToken,
    ) -> Result<BlockTemplate>;

    /// Get current mining statistics
    fn stats(&self) -> MiningStats {
        MiningStats::default()
    }
}

/// Worker factory for creating different types of mining workers
pub struct WorkerFactory;

impl WorkerFactory {
    /// Create a CPU mining worker
    pub fn create_cpu_worker() -> Arc<dyn MiningWorker> {
        Arc::new(CpuWorker::new())
    }

    /// Create a constant delay worker
    pub fn create_constant_delay_worker(block_time: Duration) -> Arc<dyn MiningWorker> {
        Arc::new(ConstantDelayWorker::new(block_time))
    }

    pub fn create(kind: WorkerKind, block_time: Duration) -> Arc<dyn MiningWorker> {
        match kind {
            WorkerKind::Cpu => Self::create_cpu_worker(),
            WorkerKind::ConstantDelay => Self::create_constant_delay_worker(block_time),
        }
    }
}

/// Inject `nonce` into the blob and check the resulting hash against `difficulty`
pub fn inject_nonce_and_check(
    blob: &mut HashingBlob,
    nonce: u32,
    difficulty: u64,
    hasher: &mut Blake2sHasher,
) -> bool {
    blob.inject_nonce(nonce);
    check_hash(&hasher.hash(blob.bytes()), difficulty)
}

/// Utility function to compute hash rate over a time period
pub fn compute_hash_rate(hashes: u64, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        hashes as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}

/// Create a tracing span for mining operations
pub fn mining_span(worker_type: &str, difficulty: u64) -> Span {
    tracing::info_span!("mining", worker_type = worker_type, difficulty = difficulty)
}
