//! CryptoNote Mining Client
//!
//! An async solo mining client for CryptoNote daemons:
//! - Fetches block templates over JSON-RPC and submits mined blocks
//! - Attaches merge-mining tags and paces block timestamps for test chains
//! - Restarts work as soon as the daemon's chain head moves
//! - Multi-threaded CPU mining and a constant delay worker for testing

pub mod adjuster;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod merge_mining;
pub mod monitor;
pub mod orchestrator;
pub mod serialization;
pub mod types;
pub mod utils;
pub mod worker;

pub use config::{Config, MiningConfig};
pub use error::{Error, Result};
pub use orchestrator::{MiningOrchestrator, RunSummary, Termination};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "cryptonote-mining-client";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
