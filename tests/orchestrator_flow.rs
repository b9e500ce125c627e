//! End-to-end orchestrator scenarios against in-process collaborators

use async_trait::async_trait;
use cryptonote_mining_client::{
    client::DaemonClient,
    merge_mining::merge_mining_tags,
    monitor::ChainMonitor,
    worker::MiningWorker,
    BlockMiningParameters, BlockTemplate, Error, Hash, MiningConfig, MiningOrchestrator,
    ParentBlock, Result, Termination, Transaction,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn template(major_version: u8, head: u8) -> BlockTemplate {
    let parent_block = (major_version >= 2).then(|| ParentBlock {
        major_version: 1,
        previous_block_hash: Hash::new([0xee; 32]),
        transaction_count: 1,
        base_transaction: Transaction {
            version: 1,
            height: 900,
            extra: vec![0x02, 0x01, 0x00],
            ..Transaction::default()
        },
        ..ParentBlock::default()
    });

    BlockTemplate {
        major_version,
        minor_version: 0,
        timestamp: 1_700_000_000 + head as u64,
        previous_block_hash: Hash::new([head; 32]),
        nonce: 0,
        parent_block,
        base_transaction: Transaction {
            version: 1,
            height: head as u64,
            ..Transaction::default()
        },
        transaction_hashes: vec![],
    }
}

/// Daemon serving scripted template responses; once the script runs out it
/// keeps serving templates on a fresh head
struct MockDaemon {
    major_version: u8,
    responses: Mutex<VecDeque<Result<()>>>,
    submit_failures: AtomicUsize,
    fetches: Mutex<Vec<Instant>>,
    submitted: Mutex<Vec<BlockTemplate>>,
}

impl MockDaemon {
    fn new(major_version: u8) -> Arc<Self> {
        Self::scripted(major_version, vec![])
    }

    fn scripted(major_version: u8, responses: Vec<Result<()>>) -> Arc<Self> {
        Arc::new(Self {
            major_version,
            responses: Mutex::new(responses.into()),
            submit_failures: AtomicUsize::new(0),
            fetches: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        })
    }

    fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }

    fn submitted(&self) -> Vec<BlockTemplate> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl DaemonClient for MockDaemon {
    async fn get_mining_parameters(&self, address: &str) -> Result<BlockMiningParameters> {
        assert_eq!(address, "TestAddress");
        let fetch = {
            let mut fetches = self.fetches.lock();
            fetches.push(Instant::now());
            fetches.len()
        };

        if let Some(response) = self.responses.lock().pop_front() {
            response?;
        }

        Ok(BlockMiningParameters {
            difficulty: 1,
            block_template: template(self.major_version, fetch as u8),
        })
    }

    async fn submit_block(&self, block: &BlockTemplate) -> Result<()> {
        let failures = self.submit_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.submit_failures.store(failures - 1, Ordering::SeqCst);
            return Err(Error::protocol("submitblock status is not OK: BUSY"));
        }
        self.submitted.lock().push(block.clone());
        Ok(())
    }

    async fn last_block_hash(&self) -> Result<Hash> {
        Ok(Hash::default())
    }
}

/// What a scripted worker does on one call
#[derive(Clone, Copy)]
enum Mine {
    /// Return the template with this nonce right away
    Now(u32),
    /// Return the template with this nonce after a delay unless cancelled first
    After(Duration, u32),
    /// Wait for cancellation, then return a result anyway
    LateResult(u32),
    /// Fail with a worker error
    Fail,
    /// Wait for cancellation and report it
    Never,
}

struct ScriptedWorker {
    script: Mutex<VecDeque<Mine>>,
    fallback: Mine,
    calls: AtomicUsize,
}

impl ScriptedWorker {
    fn new(script: Vec<Mine>, fallback: Mine) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MiningWorker for ScriptedWorker {
    fn worker_type(&self) -> &'static str {
        "scripted"
    }

    async fn mine(
        &self,
        params: BlockMiningParameters,
        thread_count: usize,
        cancellation: CancellationToken,
    ) -> Result<BlockTemplate> {
        assert_eq!(thread_count, 2);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(self.fallback);

        let mut block = params.block_template;
        match step {
            Mine::Now(nonce) => {
                block.nonce = nonce;
                Ok(block)
            }
            Mine::After(delay, nonce) => tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    block.nonce = nonce;
                    Ok(block)
                }
                _ = cancellation.cancelled() => Err(Error::cancelled("scripted mining")),
            },
            Mine::LateResult(nonce) => {
                cancellation.cancelled().await;
                block.nonce = nonce;
                Ok(block)
            }
            Mine::Fail => Err(Error::worker("scripted", "hardware error")),
            Mine::Never => {
                cancellation.cancelled().await;
                Err(Error::cancelled("scripted mining"))
            }
        }
    }
}

/// Monitor reporting a chain update after the scripted delays, one per call;
/// afterwards it waits for cancellation
struct ScriptedMonitor {
    delays: Mutex<VecDeque<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedMonitor {
    fn new(delays: Vec<Duration>) -> Arc<Self> {
        Arc::new(Self {
            delays: Mutex::new(delays.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn idle() -> Arc<Self> {
        Self::new(vec![])
    }
}

#[async_trait]
impl ChainMonitor for ScriptedMonitor {
    async fn wait_chain_update(
        &self,
        _known_head: Hash,
        cancellation: CancellationToken,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().pop_front();

        match delay {
            Some(delay) => tokio::select! {
                _ = tokio::time::sleep(delay) => Ok(()),
                _ = cancellation.cancelled() => Err(Error::cancelled("chain monitoring")),
            },
            None => {
                cancellation.cancelled().await;
                Err(Error::cancelled("chain monitoring"))
            }
        }
    }
}

fn config(limit: u64) -> MiningConfig {
    MiningConfig {
        address: "TestAddress".to_string(),
        scan_period: Duration::from_secs(10),
        thread_count: 2,
        blocks_limit: limit,
        ..MiningConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_stops_after_exactly_limit_blocks() {
    for limit in [1, 3, 5] {
        let daemon = MockDaemon::new(1);
        let worker = ScriptedWorker::new(vec![], Mine::Now(7));
        let mut orchestrator =
            MiningOrchestrator::new(config(limit), daemon.clone(), worker.clone(), ScriptedMonitor::idle());

        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.termination, Termination::BlockLimitReached);
        assert_eq!(summary.blocks_mined, limit);
        assert_eq!(daemon.submitted().len() as u64, limit);
        assert_eq!(worker.calls.load(Ordering::SeqCst) as u64, limit);
    }
}

#[tokio::test(start_paused = true)]
async fn test_startup_retries_unreachable_daemon() {
    let daemon = MockDaemon::scripted(
        1,
        vec![
            Err(Error::unreachable("connection refused")),
            Err(Error::unreachable("connection refused")),
            Err(Error::unreachable("connection refused")),
        ],
    );
    let worker = ScriptedWorker::new(vec![], Mine::Now(1));
    let mut orchestrator =
        MiningOrchestrator::new(config(1), daemon.clone(), worker, ScriptedMonitor::idle());

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.blocks_mined, 1);

    // Three failed attempts plus the successful one, each a scan period apart
    let fetches = daemon.fetches.lock().clone();
    assert!(fetches.len() >= 4);
    for pair in fetches[..4].windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_secs(10) && gap < Duration::from_secs(11), "{:?}", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn test_startup_protocol_error_is_fatal() {
    let daemon = MockDaemon::scripted(1, vec![Err(Error::protocol("status is not OK: BUSY"))]);
    let worker = ScriptedWorker::new(vec![], Mine::Now(1));
    let mut orchestrator =
        MiningOrchestrator::new(config(1), daemon.clone(), worker.clone(), ScriptedMonitor::idle());

    let result = orchestrator.run().await;
    assert!(matches!(result, Err(Error::Protocol { .. })));
    assert_eq!(daemon.fetch_count(), 1);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_block_is_submitted_and_run_ends() {
    let daemon = MockDaemon::new(3);
    let worker = ScriptedWorker::new(vec![], Mine::Now(42));
    let mut orchestrator =
        MiningOrchestrator::new(config(1), daemon.clone(), worker, ScriptedMonitor::idle());

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.blocks_mined, 1);

    let submitted = daemon.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].nonce, 42);
    assert_eq!(orchestrator.last_block_timestamp(), Some(submitted[0].timestamp));

    let extra = &submitted[0].parent_block.as_ref().unwrap().base_transaction.extra;
    let tags = merge_mining_tags(extra).unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].depth, 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_block_from_replaced_cycle_is_ignored() {
    let daemon = MockDaemon::new(1);
    // The first mining task keeps going until cancelled and still returns a block
    let worker = ScriptedWorker::new(vec![Mine::LateResult(111)], Mine::Now(222));
    let monitor = ScriptedMonitor::new(vec![Duration::from_secs(5)]);
    let mut orchestrator =
        MiningOrchestrator::new(config(1), daemon.clone(), worker.clone(), monitor.clone());

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.blocks_mined, 1);

    let submitted = daemon.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].nonce, 222);
    // Mined against the template fetched after the chain update
    assert_eq!(submitted[0].previous_block_hash, Hash::new([2; 32]));
    assert_eq!(worker.calls.load(Ordering::SeqCst), 2);
    assert_eq!(monitor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(orchestrator.stale_events(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_block_and_chain_update_at_same_instant() {
    let daemon = MockDaemon::new(1);
    // Both tasks of the first cycle finish at 5s, so both events are queued
    // before the orchestrator handles either one
    let worker = ScriptedWorker::new(vec![Mine::After(Duration::from_secs(5), 111)], Mine::Now(222));
    let monitor = ScriptedMonitor::new(vec![Duration::from_secs(5)]);
    let mut orchestrator =
        MiningOrchestrator::new(config(1), daemon.clone(), worker.clone(), monitor.clone());

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.blocks_mined, 1);

    // The chain update replaced the first cycle; its block was dropped unsubmitted
    assert_eq!(orchestrator.stale_events(), 1);
    let submitted = daemon.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].nonce, 222);
    assert_eq!(submitted[0].previous_block_hash, Hash::new([2; 32]));
    assert_eq!(daemon.fetch_count(), 2);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_submission_starts_fresh_cycle() {
    let daemon = MockDaemon::new(1);
    daemon.submit_failures.store(1, Ordering::SeqCst);
    let worker = ScriptedWorker::new(vec![], Mine::Now(5));
    let mut orchestrator =
        MiningOrchestrator::new(config(1), daemon.clone(), worker.clone(), ScriptedMonitor::idle());

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.blocks_mined, 1);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 2);
    assert_eq!(daemon.fetch_count(), 2);

    // Only the accepted block counts for timestamp pacing
    let submitted = daemon.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].previous_block_hash, Hash::new([2; 32]));
    assert_eq!(orchestrator.last_block_timestamp(), Some(submitted[0].timestamp));
}

#[tokio::test(start_paused = true)]
async fn test_refetch_failure_after_start_is_fatal() {
    let daemon = MockDaemon::scripted(
        1,
        vec![Ok(()), Err(Error::unreachable("connection refused"))],
    );
    let worker = ScriptedWorker::new(vec![], Mine::Now(5));
    let mut orchestrator =
        MiningOrchestrator::new(config(0), daemon.clone(), worker, ScriptedMonitor::idle());

    let result = orchestrator.run().await;
    assert!(matches!(result, Err(Error::Unreachable { .. })));
    assert_eq!(daemon.fetch_count(), 2);
    assert_eq!(daemon.submitted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_paced_timestamps() {
    let daemon = MockDaemon::new(2);
    let worker = ScriptedWorker::new(vec![], Mine::Now(9));
    let config = MiningConfig {
        first_block_timestamp: 1_000,
        block_timestamp_interval: 60,
        ..config(3)
    };
    let mut orchestrator =
        MiningOrchestrator::new(config, daemon.clone(), worker, ScriptedMonitor::idle());

    orchestrator.run().await.unwrap();

    let timestamps: Vec<u64> = daemon.submitted().iter().map(|b| b.timestamp).collect();
    assert_eq!(timestamps, vec![1_000, 1_060, 1_120]);
}

#[tokio::test(start_paused = true)]
async fn test_mining_failure_recovers_on_chain_update() {
    let daemon = MockDaemon::new(1);
    let worker = ScriptedWorker::new(vec![Mine::Fail], Mine::Now(3));
    let monitor = ScriptedMonitor::new(vec![Duration::from_secs(30)]);
    let mut orchestrator =
        MiningOrchestrator::new(config(1), daemon.clone(), worker.clone(), monitor);

    let started = Instant::now();
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.blocks_mined, 1);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_active_cycle() {
    let daemon = MockDaemon::new(1);
    let worker = ScriptedWorker::new(vec![], Mine::Never);
    let mut orchestrator =
        MiningOrchestrator::new(config(0), daemon.clone(), worker.clone(), ScriptedMonitor::idle());

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        shutdown.cancel();
    });

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.termination, Termination::Shutdown);
    assert_eq!(summary.blocks_mined, 0);
    assert!(daemon.submitted().is_empty());
}
