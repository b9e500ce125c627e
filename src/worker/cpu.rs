//! CPU mining worker implementation
//!
//! Multi-threaded Blake2s nonce search. Thread `i` of `n` tries nonces
//! `i, i + n, i + 2n, ...` so threads never overlap.

use super::{compute_hash_rate, inject_nonce_and_check, mining_span, MiningStats, MiningWorker};
use crate::crypto::{proof_of_work_blob, Blake2sHasher};
use crate::{BlockMiningParameters, BlockTemplate, Error, HashingBlob, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Nonces tried between cancellation checks
const BATCH_SIZE: u32 = 4096;

/// CPU mining worker using blocking threads
///
/// Every `mine` call counts into its own [`SearchStats`]; finished searches
/// are folded into the worker totals, so a cancelled search still winding
/// down never disturbs the one that replaced it.
pub struct CpuWorker {
    totals: Mutex<CpuTotals>,
    active_searches: AtomicUsize,
}

/// Counters of a single search, shared with its threads
#[derive(Debug)]
struct SearchStats {
    total_hashes: AtomicU64,
    solutions_found: AtomicU64,
    started: Instant,
}

impl SearchStats {
    fn new() -> Self {
        Self {
            total_hashes: AtomicU64::new(0),
            solutions_found: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

/// Accumulated statistics of finished searches
#[derive(Debug, Default)]
struct CpuTotals {
    total_hashes: u64,
    solutions_found: u64,
    mining_time: Duration,
}

impl CpuTotals {
    fn absorb(&mut self, search: &SearchStats) {
        self.total_hashes += search.total_hashes.load(Ordering::Relaxed);
        self.solutions_found += search.solutions_found.load(Ordering::Relaxed);
        self.mining_time += search.started.elapsed();
    }

    fn to_mining_stats(&self) -> MiningStats {
        MiningStats {
            total_hashes: self.total_hashes,
            solutions_found: self.solutions_found,
            mining_time_secs: self.mining_time.as_secs(),
            average_hash_rate: compute_hash_rate(self.total_hashes, self.mining_time),
        }
    }
}

/// Marks a search as running until dropped
struct ActiveSearch<'a>(&'a AtomicUsize);

impl<'a> ActiveSearch<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveSearch<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CpuWorker {
    pub fn new() -> Self {
        Self {
            totals: Mutex::new(CpuTotals::default()),
            active_searches: AtomicUsize::new(0),
        }
    }

    /// Whether a search is currently running
    pub fn is_mining(&self) -> bool {
        self.active_searches() > 0
    }

    /// Number of `mine` calls currently searching
    pub fn active_searches(&self) -> usize {
        self.active_searches.load(Ordering::SeqCst)
    }

    /// Search one nonce stride on a blocking thread
    fn mine_thread(
        thread_id: u32,
        stride: u32,
        mut blob: HashingBlob,
        difficulty: u64,
        stats: Arc<SearchStats>,
        cancellation: CancellationToken,
        solution_tx: mpsc::UnboundedSender<u32>,
    ) {
        debug!("Starting mining thread {}", thread_id);

        let mut hasher = Blake2sHasher::new();
        let mut next = Some(thread_id);
        let mut hashes_computed = 0u64;
        let mut last_report = Instant::now();

        while let Some(start) = next {
            if cancellation.is_cancelled() {
                debug!("Thread {} cancelled", thread_id);
                return;
            }

            let mut nonce = start;
            let mut batch = 0u32;
            next = loop {
                if inject_nonce_and_check(&mut blob, nonce, difficulty, &mut hasher) {
                    info!("Solution found by thread {} with nonce {}", thread_id, nonce);
                    stats.total_hashes.fetch_add(batch as u64 + 1, Ordering::Relaxed);
                    stats.solutions_found.fetch_add(1, Ordering::Relaxed);
                    // Receiver is gone once another thread won
                    let _ = solution_tx.send(nonce);
                    return;
                }

                batch += 1;
                match nonce.checked_add(stride) {
                    Some(following) if batch < BATCH_SIZE => nonce = following,
                    following => break following,
                }
            };

            hashes_computed += batch as u64;
            stats.total_hashes.fetch_add(batch as u64, Ordering::Relaxed);

            if last_report.elapsed() >= Duration::from_secs(10) {
                debug!(
                    "Thread {} - Hash rate: {:.2} kH/s, Total hashes: {}",
                    thread_id,
                    compute_hash_rate(hashes_computed, last_report.elapsed()) / 1_000.0,
                    hashes_computed
                );
                hashes_computed = 0;
                last_report = Instant::now();
            }
        }

        debug!("Thread {} exhausted its nonce range", thread_id);
    }
}

impl Default for CpuWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MiningWorker for CpuWorker {
    fn worker_type(&self) -> &'static str {
        "cpu"
    }

    async fn mine(
        &self,
        params: BlockMiningParameters,
        thread_count: usize,
        cancellation: CancellationToken,
    ) -> Result<BlockTemplate> {
        let span = mining_span(self.worker_type(), params.difficulty);

        async move {
            let thread_count = if thread_count == 0 {
                num_cpus::get()
            } else {
                thread_count
            };
            let stride = u32::try_from(thread_count)
                .map_err(|_| Error::worker("cpu", format!("Too many threads: {}", thread_count)))?;

            info!(
                "Starting CPU mining with {} threads (difficulty: {})",
                thread_count, params.difficulty
            );

            let blob = proof_of_work_blob(&params.block_template)?;

            let _active = ActiveSearch::enter(&self.active_searches);
            let search_stats = Arc::new(SearchStats::new());

            // Stops sibling threads once a solution is in, without touching the caller's token
            let search = cancellation.child_token();
            let (solution_tx, mut solution_rx) = mpsc::unbounded_channel();

            let handles: Vec<_> = (0..stride)
                .map(|thread_id| {
                    let blob = blob.clone();
                    let stats = Arc::clone(&search_stats);
                    let search = search.clone();
                    let solution_tx = solution_tx.clone();
                    let difficulty = params.difficulty;
                    task::spawn_blocking(move || {
                        Self::mine_thread(
                            thread_id,
                            stride,
                            blob,
                            difficulty,
                            stats,
                            search,
                            solution_tx,
                        )
                    })
                })
                .collect();

            // Channel closes when every thread has finished
            drop(solution_tx);

            let result = tokio::select! {
                solution = solution_rx.recv() => match solution {
                    Some(nonce) => {
                        let mut block = params.block_template;
                        block.nonce = nonce;
                        Ok(block)
                    }
                    None => {
                        warn!("All mining threads completed without finding solution");
                        Err(Error::worker("cpu", "Nonce space exhausted without a solution"))
                    }
                },
                _ = cancellation.cancelled() => {
                    debug!("CPU mining cancelled");
                    Err(Error::cancelled("CPU mining"))
                }
            };

            search.cancel();
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Mining thread panicked: {}", e);
                }
            }

            let hashes = search_stats.total_hashes.load(Ordering::Relaxed);
            info!(
                "CPU mining completed. Total hashes: {}, Hash rate: {:.2} kH/s",
                hashes,
                compute_hash_rate(hashes, search_stats.started.elapsed()) / 1_000.0
            );
            self.totals.lock().absorb(&search_stats);

            result
        }
        .instrument(span)
        .await
    }

    fn stats(&self) -> MiningStats {
        self.totals.lock().to_mining_stats()
    }
}
