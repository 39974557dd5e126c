//! Node RPC client (component K): a `tonic` gRPC client against a `java-tron`-compatible full
//! node, generated from `proto/tron.proto`'s `Wallet` service via `tonic-prost-build`.
//!
//! The indexing core never depends on this concrete client directly — it depends on the
//! [`NodeApi`] trait, so the parser/indexer can be exercised against a fake in tests without a
//! live node (§9 "cyclic reference between indexer and chain-RPC").

use alloy::primitives::U256;
use anyhow::Context;
use thiserror::Error;
use tonic::transport::Channel;

use crate::address::TronAddress;
use crate::protocol::{self, wallet_client::WalletClient};

/// RPC-layer failure. Callers at the driver boundary wrap this into
/// [`crate::error::IndexerError::NodeUnavailable`]; it is retriable by definition (§7).
#[derive(Debug, Error)]
pub enum NodeApiError {
    #[error("transport: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("rpc call failed: {0}")]
    Status(#[from] tonic::Status),
    #[error("node returned a malformed response: {0}")]
    MalformedResponse(String),
}

/// Result of `broadcast_hex`. `accepted` mirrors the node's `ReturnResponseCode_name[0]`
/// ("SUCCESS") check (§6).
#[derive(Debug, Clone)]
pub struct BroadcastResult {
    pub txid: [u8; 32],
    pub accepted: bool,
    pub message: String,
}

/// The upstream node capability (§6): block/tx/receipt lookups, account balance, TRC-20
/// constant calls, and broadcast. Expressed as a trait so the parser/indexer can be exercised
/// against a fake in tests without a live node.
///
/// Native `async fn` in traits (stable since the 2024 edition) is sufficient here: every caller
/// in this crate takes `&impl NodeApi` or is generic over `N: NodeApi`, never `dyn NodeApi`.
pub trait NodeApi {
    async fn get_now_block(&self) -> Result<protocol::BlockExtention, NodeApiError>;
    async fn get_block_by_num(&self, height: u64) -> Result<protocol::BlockExtention, NodeApiError>;
    async fn get_block_by_id(&self, hash: [u8; 32]) -> Result<protocol::Block, NodeApiError>;
    async fn get_transaction_by_id(
        &self,
        txid: [u8; 32],
    ) -> Result<protocol::Transaction, NodeApiError>;
    async fn get_transaction_info_by_id(
        &self,
        txid: [u8; 32],
    ) -> Result<protocol::TransactionInfo, NodeApiError>;
    async fn get_account(&self, address: TronAddress) -> Result<protocol::Account, NodeApiError>;
    async fn trc20_symbol(&self, contract: TronAddress) -> Result<String, NodeApiError>;
    async fn trc20_name(&self, contract: TronAddress) -> Result<String, NodeApiError>;
    async fn trc20_decimals(&self, contract: TronAddress) -> Result<u8, NodeApiError>;
    async fn trc20_balance(
        &self,
        addr: TronAddress,
        contract: TronAddress,
    ) -> Result<U256, NodeApiError>;
    async fn broadcast_hex(&self, raw_hex: &str) -> Result<BroadcastResult, NodeApiError>;
}

/// The production `NodeApi`: a `tonic` client against a single `java-tron`-compatible gRPC
/// endpoint. Cheap to clone (wraps a `tonic::transport::Channel`, itself a cheap handle).
#[derive(Clone)]
pub struct TronGrpc {
    client: WalletClient<Channel>,
}

impl TronGrpc {
    pub async fn connect(endpoint: &str) -> anyhow::Result<Self> {
        let channel = Channel::from_shared(endpoint.to_string())
            .with_context(|| format!("invalid grpc endpoint: {endpoint}"))?
            .connect()
            .await
            .with_context(|| format!("connect to tron node at {endpoint}"))?;
        Ok(Self {
            client: WalletClient::new(channel),
        })
    }

    async fn trigger_constant(
        &self,
        owner: TronAddress,
        contract: TronAddress,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, NodeApiError> {
        let mut client = self.client.clone();
        let resp = client
            .trigger_constant_contract(protocol::TriggerSmartContract {
                owner_address: owner.prefixed_bytes().to_vec(),
                contract_address: contract.prefixed_bytes().to_vec(),
                data,
                ..Default::default()
            })
            .await?
            .into_inner();
        Ok(resp.constant_result.into_iter().next().unwrap_or_default())
    }
}

impl NodeApi for TronGrpc {
    async fn get_now_block(&self) -> Result<protocol::BlockExtention, NodeApiError> {
        let mut client = self.client.clone();
        Ok(client
            .get_now_block2(protocol::EmptyMessage {})
            .await?
            .into_inner())
    }

    async fn get_block_by_num(&self, height: u64) -> Result<protocol::BlockExtention, NodeApiError> {
        let mut client = self.client.clone();
        Ok(client
            .get_block_by_num2(protocol::NumberMessage {
                num: height as i64,
            })
            .await?
            .into_inner())
    }

    async fn get_block_by_id(&self, hash: [u8; 32]) -> Result<protocol::Block, NodeApiError> {
        let mut client = self.client.clone();
        Ok(client
            .get_block_by_id(protocol::BytesMessage {
                value: hash.to_vec(),
            })
            .await?
            .into_inner())
    }

    async fn get_transaction_by_id(
        &self,
        txid: [u8; 32],
    ) -> Result<protocol::Transaction, NodeApiError> {
        let mut client = self.client.clone();
        Ok(client
            .get_transaction_by_id(protocol::BytesMessage {
                value: txid.to_vec(),
            })
            .await?
            .into_inner())
    }

    async fn get_transaction_info_by_id(
        &self,
        txid: [u8; 32],
    ) -> Result<protocol::TransactionInfo, NodeApiError> {
        let mut client = self.client.clone();
        Ok(client
            .get_transaction_info_by_id(protocol::BytesMessage {
                value: txid.to_vec(),
            })
            .await?
            .into_inner())
    }

    async fn get_account(&self, address: TronAddress) -> Result<protocol::Account, NodeApiError> {
        let mut client = self.client.clone();
        Ok(client
            .get_account(protocol::Account {
                address: address.prefixed_bytes().to_vec(),
                ..Default::default()
            })
            .await?
            .into_inner())
    }

    async fn trc20_symbol(&self, contract: TronAddress) -> Result<String, NodeApiError> {
        let data = self
            .trigger_constant(ZERO_CALLER, contract, abi::selector("symbol()").to_vec())
            .await?;
        abi::decode_string(&data)
            .ok_or_else(|| NodeApiError::MalformedResponse("symbol() return".into()))
    }

    async fn trc20_name(&self, contract: TronAddress) -> Result<String, NodeApiError> {
        let data = self
            .trigger_constant(ZERO_CALLER, contract, abi::selector("name()").to_vec())
            .await?;
        abi::decode_string(&data)
            .ok_or_else(|| NodeApiError::MalformedResponse("name() return".into()))
    }

    async fn trc20_decimals(&self, contract: TronAddress) -> Result<u8, NodeApiError> {
        let data = self
            .trigger_constant(ZERO_CALLER, contract, abi::selector("decimals()").to_vec())
            .await?;
        Ok(data.last().copied().unwrap_or(0))
    }

    async fn trc20_balance(
        &self,
        addr: TronAddress,
        contract: TronAddress,
    ) -> Result<U256, NodeApiError> {
        let mut call_data = abi::selector("balanceOf(address)").to_vec();
        call_data.extend_from_slice(&abi::encode_address(addr));
        let data = self.trigger_constant(ZERO_CALLER, contract, call_data).await?;
        Ok(abi::decode_u256(&data))
    }

    async fn broadcast_hex(&self, raw_hex: &str) -> Result<BroadcastResult, NodeApiError> {
        let raw = hex::decode(raw_hex.trim_start_matches("0x"))
            .map_err(|e| NodeApiError::MalformedResponse(format!("invalid hex: {e}")))?;
        let tx = protocol::Transaction::decode_from(&raw)
            .ok_or_else(|| NodeApiError::MalformedResponse("invalid transaction bytes".into()))?;

        let mut client = self.client.clone();
        let resp = client.broadcast_transaction(tx).await?.into_inner();

        let mut txid = [0u8; 32];
        let take = resp.txid.len().min(32);
        txid[..take].copy_from_slice(&resp.txid[..take]);
        Ok(BroadcastResult {
            txid,
            accepted: resp.code == protocol::return_response::ResponseCode::Success as i32,
            message: String::from_utf8_lossy(&resp.message).into_owned(),
        })
    }
}

/// The null account used as `owner_address` for constant calls: TRC-20 `name`/`symbol`/
/// `decimals`/`balanceOf` never depend on `msg.sender`, so any syntactically valid address
/// works, and there is no wallet key involved in a read-only call.
const ZERO_CALLER: TronAddress = TronAddress::from_raw(crate::address::ZERO_ADDRESS);

trait DecodeFrom: Sized {
    fn decode_from(bytes: &[u8]) -> Option<Self>;
}

impl DecodeFrom for protocol::Transaction {
    fn decode_from(bytes: &[u8]) -> Option<Self> {
        use prost::Message;
        Self::decode(bytes).ok()
    }
}

/// Minimal ABI encode/decode for the handful of TRC-20 constant calls this crate makes.
/// Grounded on `apps/solver`'s `abi.rs` `encode_trc20_balance_of`/selector helpers.
mod abi {
    use alloy::primitives::U256;

    use super::TronAddress;

    pub fn selector(sig: &str) -> [u8; 4] {
        let hash = alloy::primitives::keccak256(sig.as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    pub fn encode_address(addr: TronAddress) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[12..].copy_from_slice(&addr.evm());
        out
    }

    pub fn decode_u256(data: &[u8]) -> U256 {
        let mut buf = [0u8; 32];
        if data.len() >= 32 {
            buf.copy_from_slice(&data[..32]);
        } else {
            buf[32 - data.len()..].copy_from_slice(data);
        }
        U256::from_be_bytes(buf)
    }

    /// Decodes a dynamic ABI `string` return value: a 32-byte offset word (ignored, always 32
    /// for a single-return-value call), a 32-byte length word, then the UTF-8 bytes padded to
    /// a 32-byte boundary. Some non-conformant TRC-20 tokens (famously, early USDT-on-Tron
    /// clones) instead return a fixed `bytes32`; fall back to that shape when the dynamic
    /// layout doesn't parse.
    pub fn decode_string(data: &[u8]) -> Option<String> {
        if data.len() >= 64 {
            let len = U256::from_be_bytes::<32>(data[32..64].try_into().ok()?);
            let len = usize::try_from(len).ok()?;
            if let Some(bytes) = data.get(64..64 + len)
                && let Ok(s) = std::str::from_utf8(bytes)
            {
                return Some(s.trim_end_matches('\0').to_string());
            }
        }
        if data.len() == 32 {
            let trimmed: Vec<u8> = data.iter().copied().take_while(|&b| b != 0).collect();
            if let Ok(s) = std::str::from_utf8(&trimmed) {
                return Some(s.to_string());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::abi::*;

    #[test]
    fn decodes_dynamic_abi_string() {
        let mut data = vec![0u8; 32]; // offset word, ignored
        let mut len_word = [0u8; 32];
        len_word[31] = 4; // "USDT".len()
        data.extend_from_slice(&len_word);
        let mut payload = b"USDT".to_vec();
        payload.resize(32, 0);
        data.extend_from_slice(&payload);
        assert_eq!(decode_string(&data).as_deref(), Some("USDT"));
    }

    #[test]
    fn decodes_fixed_bytes32_fallback() {
        let mut data = b"USDT".to_vec();
        data.resize(32, 0);
        assert_eq!(decode_string(&data).as_deref(), Some("USDT"));
    }

    #[test]
    fn decode_u256_handles_short_data() {
        assert_eq!(decode_u256(&[]), alloy::primitives::U256::ZERO);
        assert_eq!(decode_u256(&[0x2a]), alloy::primitives::U256::from(42u64));
    }
}
