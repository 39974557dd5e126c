use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `java-tron`-compatible gRPC endpoint, e.g. `http://127.0.0.1:50051`.
    pub node_grpc_url: String,
    /// Where the embedded column-family store lives on disk.
    pub store_path: PathBuf,

    pub confirmations: u32,
    pub poll_interval: Duration,
    pub chunk_blocks: u32,
    pub reorg_scan_depth: u32,
    pub rpc_timeout: Duration,

    /// Height to start ingest from when the store is empty. Defaults to 0 (genesis), which is
    /// rarely what an operator wants for a multi-billion-block chain; set explicitly in
    /// production.
    pub start_height: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Env {
    node_grpc_url: String,
    store_path: String,

    confirmations: u32,
    poll_interval_secs: u64,
    chunk_blocks: u32,
    reorg_scan_depth: u32,
    rpc_timeout_secs: u64,
    start_height: u32,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            node_grpc_url: String::new(),
            store_path: DEFAULT_STORE_PATH.to_string(),
            confirmations: DEFAULT_CONFIRMATIONS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            chunk_blocks: DEFAULT_CHUNK_BLOCKS,
            reorg_scan_depth: DEFAULT_REORG_SCAN_DEPTH,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            start_height: 0,
        }
    }
}

pub fn load_config() -> Result<AppConfig> {
    let env: Env = envy::from_env().context("load env config")?;
    if env.node_grpc_url.trim().is_empty() {
        anyhow::bail!("NODE_GRPC_URL must be set");
    }

    Ok(AppConfig {
        node_grpc_url: env.node_grpc_url,
        store_path: PathBuf::from(env.store_path),
        confirmations: env.confirmations,
        poll_interval: Duration::from_secs(env.poll_interval_secs.max(1)),
        chunk_blocks: env.chunk_blocks.max(1),
        reorg_scan_depth: env.reorg_scan_depth.max(1),
        rpc_timeout: Duration::from_secs(env.rpc_timeout_secs.max(1)),
        start_height: env.start_height,
    })
}

const DEFAULT_STORE_PATH: &str = "./data/tron-index";
const DEFAULT_CONFIRMATIONS: u32 = 19;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_CHUNK_BLOCKS: u32 = 200;
const DEFAULT_REORG_SCAN_DEPTH: u32 = 256;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
