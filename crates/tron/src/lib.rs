//! Tron chain indexing core: decodes raw node blocks into a single canonical transfer per
//! transaction (native TRX or TRC-20), and maintains a reversible, address-keyed index over
//! them in an embedded key/value store.

pub mod address;
pub mod contract;
pub mod error;
pub mod grpc;
pub mod protocol;
pub mod store;
pub mod trc20_cache;
pub mod transfer;
pub mod txcache;
pub mod txcodec;
pub mod vlq;

pub use address::TronAddress;
pub use error::IndexerError;
pub use grpc::{BroadcastResult, NodeApi, NodeApiError, TronGrpc};
pub use store::{AddrContracts, ConnectBatch, ContractEntry, HeightMeta, PendingTx, Store};
pub use trc20_cache::{Trc20Cache, Trc20Metadata};
pub use transfer::Transfer;
pub use txcache::TxWithConfirmations;
pub use txcodec::EnrichedTx;
