//! Chain driver (component J): orchestrates the decoder/indexer pipeline (B→C→D→E) into a
//! runnable polling loop against a live node, with reorg detection and cooperative shutdown.
//! Grounded in the shape of the corpus's single-task poller with exponential-backoff restart,
//! generalized here from per-instance EVM log polling to Tron block polling.

use std::time::Duration;

use anyhow::{Context, Result};
use prost::Message;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tron::{ConnectBatch, HeightMeta, IndexerError, NodeApi, PendingTx, Store, Trc20Cache, Transfer};

use crate::config::AppConfig;

pub async fn run(cfg: AppConfig, shutdown: CancellationToken) -> Result<()> {
    let store = Store::open(&cfg.store_path)
        .with_context(|| format!("open store at {}", cfg.store_path.display()))?;
    let node = tron::TronGrpc::connect(&cfg.node_grpc_url)
        .await
        .with_context(|| format!("connect to tron node at {}", cfg.node_grpc_url))?;
    let trc20 = Trc20Cache::new();

    let mut local_tip = store.best_height()?.unwrap_or(cfg.start_height.saturating_sub(1));

    let mut ticker = time::interval(cfg.poll_interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let mut chunk_current = cfg.chunk_blocks.max(1);
    let mut transient_attempts: u32 = 0;
    let mut transient_backoff = Duration::from_millis(250);

    info!(
        node = %cfg.node_grpc_url,
        store = %cfg.store_path.display(),
        confirmations = cfg.confirmations,
        poll_interval_secs = cfg.poll_interval.as_secs(),
        chunk_blocks = cfg.chunk_blocks,
        reorg_scan_depth = cfg.reorg_scan_depth,
        resume_from = local_tip.wrapping_add(1),
        "indexer starting"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let tip = match node.get_now_block().await {
            Ok(b) => block_height(&b)?,
            Err(e) => {
                warn!(err = %e, "get_now_block failed; will retry next tick");
                continue;
            }
        };
        let safe_head = tip.saturating_sub(cfg.confirmations);

        if let Some(local_hash) = store.get_height_meta(local_tip)?.map(|m| m.block_hash) {
            match detect_reorg_start(&store, &node, local_tip, local_hash, cfg.reorg_scan_depth).await {
                Ok(Some(fork_point)) => {
                    warn!(fork_point, local_tip, "reorg detected; disconnecting");
                    if let Err(e) = store.disconnect_range(fork_point, local_tip) {
                        error!(err = %e, "disconnect_range failed");
                        return Err(e);
                    }
                    local_tip = fork_point.saturating_sub(1);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(err = %e, "reorg check failed; will retry next tick");
                    continue;
                }
            }
        }

        while local_tip < safe_head {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let from = local_tip + 1;
            let to = safe_head.min(from.saturating_add(chunk_current.saturating_sub(1)));

            match ingest_range(&store, &node, &trc20, from, to).await {
                Ok(()) => {
                    local_tip = to;
                    transient_attempts = 0;
                    transient_backoff = Duration::from_millis(250);
                    chunk_current = grow_chunk(chunk_current, cfg.chunk_blocks);
                }
                Err(e) if is_transient(&e) && transient_attempts < 5 => {
                    transient_attempts += 1;
                    warn!(from, to, attempt = transient_attempts, err = %e, "transient error; retrying range");
                    time::sleep(transient_backoff).await;
                    transient_backoff = (transient_backoff * 2).min(Duration::from_secs(5));
                }
                Err(e) if chunk_current > 1 => {
                    chunk_current = shrink_chunk(chunk_current);
                    warn!(from, to, chunk_blocks = chunk_current, err = %e, "ingest failed; shrinking chunk");
                    transient_attempts = 0;
                    transient_backoff = Duration::from_millis(250);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn ingest_range(
    store: &Store,
    node: &impl NodeApi,
    trc20: &Trc20Cache,
    from: u32,
    to: u32,
) -> Result<()> {
    for height in from..=to {
        let block = node
            .get_block_by_num(height as u64)
            .await
            .map_err(|e| IndexerError::NodeUnavailable(e.into()))?;

        let meta = HeightMeta {
            block_hash: sized32(&block.blockid)?,
            timestamp: block
                .block_header
                .as_ref()
                .and_then(|h| h.raw_data.as_ref())
                .map(|r| r.timestamp)
                .unwrap_or_default(),
        };

        let mut pending = Vec::with_capacity(block.transactions.len());
        for tx_ext in &block.transactions {
            let Some(tx) = &tx_ext.transaction else {
                continue;
            };
            let Some(contract) = tx
                .raw_data
                .as_ref()
                .and_then(|rd| rd.contract.first())
            else {
                warn!(height, "tx with no contracts in raw_data, skipping");
                continue;
            };

            let info = match node.get_transaction_info_by_id(sized32(&tx_ext.txid)?).await {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(height, err = %e, "get_transaction_info_by_id failed, indexing without receipt");
                    None
                }
            };

            let transfer: Option<Transfer> = match tron::transfer::normalize(contract, info.as_ref()) {
                Ok(t) => t,
                Err(e) => {
                    warn!(height, err = %e, "InconsistentTx, skipping transaction");
                    None
                }
            };

            pending.push(PendingTx {
                btxid: sized32(&tx_ext.txid)?,
                raw_tx: tx.encode_to_vec(),
                raw_info: info.map(|i| i.encode_to_vec()).unwrap_or_default(),
                transfer,
            });
        }

        let batch: ConnectBatch = store
            .prepare_connect(height, meta, pending, node, trc20)
            .await?;
        store.commit_connect(batch)?;
    }
    Ok(())
}

/// Binary-searches backward from `local_tip` for the highest height whose node-reported hash
/// still matches the store's, returning the height one past it (the first divergent height,
/// i.e. the first height to disconnect) if a divergence exists at all.
async fn detect_reorg_start(
    store: &Store,
    node: &impl NodeApi,
    local_tip: u32,
    local_tip_hash: [u8; 32],
    scan_depth: u32,
) -> Result<Option<u32>> {
    let node_hash = sized32(&block_height_hash(node, local_tip as u64).await?)?;
    if node_hash == local_tip_hash {
        return Ok(None);
    }

    let floor = local_tip.saturating_sub(scan_depth);
    let mut lo = floor;
    let mut hi = local_tip;
    // Invariant: heights < lo (that we've checked) match; [lo, hi] still undetermined.
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let Some(stored) = store.get_height_meta(mid)?.map(|m| m.block_hash) else {
            // No local record this far back; treat as the earliest point we can recover to.
            hi = mid;
            continue;
        };
        let live = sized32(&block_height_hash(node, mid as u64).await?)?;
        if live == stored {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    Ok(Some(lo))
}

async fn block_height_hash(node: &impl NodeApi, height: u64) -> Result<Vec<u8>> {
    let block = node
        .get_block_by_num(height)
        .await
        .map_err(|e| IndexerError::NodeUnavailable(e.into()))?;
    Ok(block.blockid)
}

fn block_height(b: &tron::protocol::BlockExtention) -> Result<u32> {
    let n = b
        .block_header
        .as_ref()
        .and_then(|h| h.raw_data.as_ref())
        .map(|r| r.number)
        .unwrap_or(0);
    u32::try_from(n).context("block number does not fit in u32")
}

fn sized32(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 32-byte field, got {} bytes", bytes.len()))
}

fn grow_chunk(current: u32, target: u32) -> u32 {
    if current >= target {
        return current;
    }
    current.saturating_mul(2).min(target)
}

fn shrink_chunk(current: u32) -> u32 {
    (current / 2).max(1)
}

fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(IndexerError::NodeUnavailable(_)) = err.downcast_ref::<IndexerError>() {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("rate limit")
        || msg.contains("connection reset")
        || msg.contains("unavailable")
}
