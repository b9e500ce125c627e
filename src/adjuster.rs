//! Block template adjustment
//!
//! Applied to every freshly fetched template before mining starts: attach the
//! merge-mining tag, then pace the block timestamp.

use crate::config::MiningConfig;
use crate::crypto::aux_block_header_hash;
use crate::merge_mining::{append_merge_mining_tag, MergeMiningTag};
use crate::{BlockTemplate, Error, Result};
use tracing::debug;

/// Adjust a template for mining.
///
/// `last_block_timestamp` is the timestamp of the last block submitted
/// successfully during this run, if any.
pub fn adjust_block_template(
    mut template: BlockTemplate,
    last_block_timestamp: Option<u64>,
    config: &MiningConfig,
) -> Result<BlockTemplate> {
    if template.supports_merge_mining() {
        attach_merge_mining_tag(&mut template)?;
    }
    pace_timestamp(&mut template, last_block_timestamp, config);
    Ok(template)
}

/// Replace the parent base transaction extra with a depth-0 merge-mining tag
/// committing to the template's own header hash
pub fn attach_merge_mining_tag(template: &mut BlockTemplate) -> Result<()> {
    let merkle_root = aux_block_header_hash(template)
        .map_err(|e| Error::protocol(format!("Couldn't get block header hash: {}", e)))?;

    let parent = template
        .parent_block
        .as_mut()
        .ok_or_else(|| Error::protocol("Couldn't append merge mining tag: no parent block"))?;

    let extra = &mut parent.base_transaction.extra;
    extra.clear();
    append_merge_mining_tag(extra, &MergeMiningTag::new(merkle_root))
        .map_err(|e| Error::protocol(format!("Couldn't append merge mining tag: {}", e)))?;

    debug!(merkle_root = %merkle_root, "Attached merge mining tag");
    Ok(())
}

/// Override the template timestamp when a first-block timestamp is configured
pub fn pace_timestamp(
    template: &mut BlockTemplate,
    last_block_timestamp: Option<u64>,
    config: &MiningConfig,
) {
    if config.first_block_timestamp == 0 {
        return;
    }

    match last_block_timestamp {
        None => template.timestamp = config.first_block_timestamp,
        Some(last) if config.block_timestamp_interval != 0 => {
            template.timestamp = last.saturating_add(config.block_timestamp_interval);
        }
        Some(_) => {}
    }
}
