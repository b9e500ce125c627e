//! Mining orchestration
//!
//! The orchestrator owns one mining cycle at a time: a mining task and a chain
//! monitoring task working on the same adjusted template. Both report through
//! the event queue; the event loop reacts to whichever finishes first, tears
//! the cycle down and starts a fresh one from newly fetched parameters.
//!
//! Each cycle owns its result slots. A task from a replaced cycle finds its
//! slot closed and never reaches the event loop, and an event whose slot is
//! empty in the current cycle is ignored, so a late result is never acted on.

use crate::adjuster::adjust_block_template;
use crate::client::DaemonClient;
use crate::config::MiningConfig;
use crate::crypto::block_hash;
use crate::events::{EventQueue, MinerEvent};
use crate::monitor::ChainMonitor;
use crate::utils::{format_block_timestamp, format_duration};
use crate::worker::MiningWorker;
use crate::{BlockMiningParameters, BlockTemplate, Error, Hash, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Fetching and adjusting parameters; no task is running
    AwaitingParameters,
    /// Mining and monitoring tasks both running
    Active,
    /// Tasks of the current cycle are being cancelled
    Draining,
}

/// Why a run ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    BlockLimitReached,
    Shutdown,
}

/// Outcome of [`MiningOrchestrator::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Blocks the daemon accepted during the run
    pub blocks_mined: u64,
    pub termination: Termination,
}

/// Tasks and result slots of one set of mining parameters
struct MiningCycle {
    generation: u64,
    miner_cancel: CancellationToken,
    monitor_cancel: CancellationToken,
    mined_block: oneshot::Receiver<BlockTemplate>,
    chain_update: oneshot::Receiver<()>,
}

impl MiningCycle {
    fn cancel(&self) {
        self.miner_cancel.cancel();
        self.monitor_cancel.cancel();
    }
}

/// Drives mining cycles against a daemon
pub struct MiningOrchestrator {
    config: MiningConfig,
    daemon: Arc<dyn DaemonClient>,
    worker: Arc<dyn MiningWorker>,
    monitor: Arc<dyn ChainMonitor>,
    events: Arc<EventQueue>,
    state: OrchestratorState,
    last_block_timestamp: Option<u64>,
    blocks_mined: u64,
    stale_events: u64,
    generation: u64,
    cycle: Option<MiningCycle>,
    shutdown: CancellationToken,
}

impl MiningOrchestrator {
    pub fn new(
        config: MiningConfig,
        daemon: Arc<dyn DaemonClient>,
        worker: Arc<dyn MiningWorker>,
        monitor: Arc<dyn ChainMonitor>,
    ) -> Self {
        Self {
            config,
            daemon,
            worker,
            monitor,
            events: Arc::new(EventQueue::new()),
            state: OrchestratorState::AwaitingParameters,
            last_block_timestamp: None,
            blocks_mined: 0,
            stale_events: 0,
            generation: 0,
            cycle: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the run when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined
    }

    /// Timestamp of the last block the daemon accepted during this run
    pub fn last_block_timestamp(&self) -> Option<u64> {
        self.last_block_timestamp
    }

    /// Events dropped because their cycle had already been replaced
    pub fn stale_events(&self) -> u64 {
        self.stale_events
    }

    /// Mine until the block limit is reached or the shutdown token fires.
    ///
    /// An unreachable daemon is retried every scan period while fetching the
    /// first parameters. After that any failure to fetch parameters ends the
    /// run with that error.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let started = Instant::now();
        info!(
            address = %self.config.address,
            threads = self.config.thread_count,
            limit = self.config.blocks_limit,
            worker = self.worker.worker_type(),
            "Starting miner"
        );

        let result = match self.request_initial_parameters().await {
            Ok(Some(params)) => match self.start_cycle(params) {
                Ok(()) => self.event_loop().await,
                Err(e) => Err(e),
            },
            Ok(None) => Ok(Termination::Shutdown),
            Err(e) => Err(e),
        };

        self.stop_cycle();
        self.state = OrchestratorState::AwaitingParameters;

        let termination = result?;
        info!(
            blocks_mined = self.blocks_mined,
            "Miner stopped after {} ({:?})",
            format_duration(started.elapsed().as_secs()),
            termination
        );

        Ok(RunSummary {
            blocks_mined: self.blocks_mined,
            termination,
        })
    }

    /// Fetch the first parameters, waiting out an unreachable daemon.
    ///
    /// Returns `None` if shutdown was requested while waiting.
    async fn request_initial_parameters(&self) -> Result<Option<BlockMiningParameters>> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(None);
            }

            match self.daemon.get_mining_parameters(&self.config.address).await {
                Ok(params) => return Ok(Some(params)),
                Err(e) if e.is_unreachable() => {
                    warn!(
                        "Couldn't connect to daemon: {}. Retrying in {:?}",
                        e, self.config.scan_period
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(self.config.scan_period) => {}
                    }
                }
                Err(e) => {
                    error!("Error while requesting mining parameters: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn event_loop(&mut self) -> Result<Termination> {
        let events = Arc::clone(&self.events);
        let shutdown = self.shutdown.clone();

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    return Ok(Termination::Shutdown);
                }
                event = events.wait_one() => event,
            };

            debug!(?event, generation = self.generation, "Received event");

            match event {
                MinerEvent::BlockMined => {
                    if let Some(termination) = self.on_block_mined().await? {
                        return Ok(termination);
                    }
                }
                MinerEvent::ChainUpdated => self.on_chain_updated().await?,
            }
        }
    }

    async fn on_block_mined(&mut self) -> Result<Option<Termination>> {
        let Some(block) = self
            .cycle
            .as_mut()
            .and_then(|cycle| cycle.mined_block.try_recv().ok())
        else {
            debug!("Ignoring block from a replaced mining cycle");
            self.stale_events += 1;
            return Ok(None);
        };

        self.transition(OrchestratorState::Draining);
        self.stop_chain_monitoring();

        match self.submit(&block).await {
            Ok(()) => {
                self.last_block_timestamp = Some(block.timestamp);
                self.blocks_mined += 1;

                if self.config.blocks_limit != 0 && self.blocks_mined == self.config.blocks_limit {
                    info!("Miner mined requested {} blocks. Quitting", self.blocks_mined);
                    return Ok(Some(Termination::BlockLimitReached));
                }
            }
            Err(e) => warn!("{}", e),
        }

        self.restart_cycle().await?;
        Ok(None)
    }

    async fn on_chain_updated(&mut self) -> Result<()> {
        let current = self
            .cycle
            .as_mut()
            .is_some_and(|cycle| cycle.chain_update.try_recv().is_ok());
        if !current {
            debug!("Ignoring chain update from a replaced monitoring cycle");
            self.stale_events += 1;
            return Ok(());
        }

        info!("Blockchain updated, restarting mining");
        self.transition(OrchestratorState::Draining);
        self.restart_cycle().await
    }

    async fn submit(&self, block: &BlockTemplate) -> Result<()> {
        let hash = block_hash(block)
            .map(|hash| hash.to_hex())
            .unwrap_or_else(|_| "<unhashable>".to_string());

        self.daemon
            .submit_block(block)
            .await
            .map_err(|e| Error::submission_failed(hash.clone(), e.to_string()))?;

        info!(
            "Block {} has been successfully submitted (timestamp {})",
            hash,
            format_block_timestamp(block.timestamp)
        );
        Ok(())
    }

    /// Cancel the current cycle, fetch new parameters and start the next one
    async fn restart_cycle(&mut self) -> Result<()> {
        self.stop_cycle();
        self.transition(OrchestratorState::AwaitingParameters);

        let params = self
            .daemon
            .get_mining_parameters(&self.config.address)
            .await
            .inspect_err(|e| error!("Error while requesting mining parameters: {}", e))?;

        self.start_cycle(params)
    }

    /// Adjust the template and spawn the monitoring and mining tasks
    fn start_cycle(&mut self, params: BlockMiningParameters) -> Result<()> {
        let block_template = adjust_block_template(
            params.block_template,
            self.last_block_timestamp,
            &self.config,
        )?;
        let params = BlockMiningParameters {
            difficulty: params.difficulty,
            block_template,
        };

        self.generation += 1;
        let generation = self.generation;
        debug!(
            generation,
            difficulty = params.difficulty,
            timestamp = params.block_template.timestamp,
            "Starting mining cycle"
        );

        let monitor_cancel = self.shutdown.child_token();
        let (update_tx, chain_update) = oneshot::channel();
        self.spawn_monitoring(
            params.block_template.previous_block_hash,
            monitor_cancel.clone(),
            update_tx,
        );

        let miner_cancel = self.shutdown.child_token();
        let (block_tx, mined_block) = oneshot::channel();
        self.spawn_mining(params, miner_cancel.clone(), block_tx);

        self.cycle = Some(MiningCycle {
            generation,
            miner_cancel,
            monitor_cancel,
            mined_block,
            chain_update,
        });
        self.transition(OrchestratorState::Active);
        Ok(())
    }

    fn spawn_monitoring(
        &self,
        known_head: Hash,
        cancellation: CancellationToken,
        update_tx: oneshot::Sender<()>,
    ) {
        let monitor = Arc::clone(&self.monitor);
        let events = Arc::clone(&self.events);

        tokio::spawn(async move {
            match monitor.wait_chain_update(known_head, cancellation.clone()).await {
                Ok(()) if cancellation.is_cancelled() => {
                    debug!("Chain update observed after cancellation");
                }
                Ok(()) => {
                    if update_tx.send(()).is_ok() {
                        events.push(MinerEvent::ChainUpdated);
                    }
                }
                Err(e) if e.is_cancelled() => debug!("Chain monitoring stopped"),
                Err(e) => error!("Chain monitoring failed: {}", e),
            }
        });
    }

    fn spawn_mining(
        &self,
        params: BlockMiningParameters,
        cancellation: CancellationToken,
        block_tx: oneshot::Sender<BlockTemplate>,
    ) {
        let worker = Arc::clone(&self.worker);
        let events = Arc::clone(&self.events);
        let thread_count = self.config.thread_count;

        tokio::spawn(async move {
            match worker.mine(params, thread_count, cancellation.clone()).await {
                Ok(_) if cancellation.is_cancelled() => {
                    debug!("Discarding block mined after cancellation");
                }
                Ok(block) => {
                    if block_tx.send(block).is_ok() {
                        events.push(MinerEvent::BlockMined);
                    }
                }
                Err(e) if e.is_cancelled() => debug!("Mining stopped"),
                Err(e) => error!("Mining failed: {}", e),
            }
        });
    }

    fn stop_chain_monitoring(&self) {
        if let Some(cycle) = &self.cycle {
            cycle.monitor_cancel.cancel();
        }
    }

    /// Signal both tasks of the current cycle to stop and drop its result slots
    fn stop_cycle(&mut self) {
        if let Some(cycle) = self.cycle.take() {
            debug!(generation = cycle.generation, "Stopping mining cycle");
            cycle.cancel();
        }
    }

    fn transition(&mut self, next: OrchestratorState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "State transition");
            self.state = next;
        }
    }
}

impl Drop for MiningOrchestrator {
    fn drop(&mut self) {
        if let Some(cycle) = self.cycle.take() {
            cycle.cancel();
        }
    }
}
