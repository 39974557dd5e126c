use thiserror::Error;

use crate::contract::InconsistentTx;

/// Crate-wide error kinds (§7). Call sites that need to choose retry/skip/abort behavior match
/// on the variant; everywhere else this converts freely into `anyhow::Error` the way the rest
/// of the workspace's binaries already do at their application boundary.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Upstream RPC failure. Retriable by the chain driver.
    #[error("node unavailable: {0}")]
    NodeUnavailable(#[source] anyhow::Error),

    /// Contract decode failed, unknown contract type, or zero contracts in `raw_data`.
    /// Per-transaction: the offending tx is skipped, the block continues.
    #[error(transparent)]
    InconsistentTx(#[from] InconsistentTx),

    /// `BlockTxs` missing for a height inside a reorg range, or a fixed-width field length
    /// mismatch in a stored blob. Fatal: the operator must rebuild the index.
    #[error("index corruption, rebuild required: {0}")]
    IndexCorruption(String),

    /// Not an error condition, just a shape of result: the normalizer emitted no transfer.
    #[error("not a transfer")]
    NotATransfer,

    /// The tx cache was asked to classify a non-Tron chain type. Programming error.
    #[error("unknown chain: {0}")]
    UnknownChain(String),
}
