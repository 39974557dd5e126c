use std::collections::HashMap;
use std::sync::Mutex;

use crate::address::TronAddress;
use crate::grpc::NodeApi;

/// Token metadata as read from a TRC-20 contract's `name()`/`symbol()`/`decimals()` constant
/// calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trc20Metadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Process-wide memoization of `contractAddress → Option<Trc20Metadata>`. Never evicted:
/// contract metadata is immutable in practice for the lifetime of the process (SPEC_FULL.md
/// §4.H). A missing `symbol()` is cached as `None` and treated by callers as "not a TRC-20
/// contract", so it is never re-queried.
#[derive(Default)]
pub struct Trc20Cache {
    inner: Mutex<HashMap<TronAddress, Option<Trc20Metadata>>>,
}

impl Trc20Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns this contract's metadata, fetching it from `node` on first access. The mutex is
    /// held only for the map lookup/insert; the network call happens unlocked, so a racing
    /// second lookup may perform the same fetch once. The last writer wins, which is safe
    /// because the fetched value is idempotent.
    pub async fn get_or_fetch(
        &self,
        node: &impl NodeApi,
        contract: TronAddress,
    ) -> Option<Trc20Metadata> {
        if let Some(hit) = self.inner.lock().unwrap().get(&contract) {
            return hit.clone();
        }

        let name = node.trc20_name(contract).await.unwrap_or_default();
        let symbol = node.trc20_symbol(contract).await.unwrap_or_default();
        let decimals = node.trc20_decimals(contract).await.unwrap_or(0);

        let value = if symbol.is_empty() {
            None
        } else {
            Some(Trc20Metadata {
                name,
                symbol,
                decimals,
            })
        };

        self.inner
            .lock()
            .unwrap()
            .insert(contract, value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::NodeApiError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeNode {
        calls: AtomicUsize,
        symbol: String,
    }

    impl NodeApi for FakeNode {
        async fn get_now_block(&self) -> Result<crate::protocol::BlockExtention, NodeApiError> {
            unimplemented!()
        }
        async fn get_block_by_num(
            &self,
            _height: u64,
        ) -> Result<crate::protocol::BlockExtention, NodeApiError> {
            unimplemented!()
        }
        async fn get_block_by_id(
            &self,
            _hash: [u8; 32],
        ) -> Result<crate::protocol::Block, NodeApiError> {
            unimplemented!()
        }
        async fn get_transaction_by_id(
            &self,
            _txid: [u8; 32],
        ) -> Result<crate::protocol::Transaction, NodeApiError> {
            unimplemented!()
        }
        async fn get_transaction_info_by_id(
            &self,
            _txid: [u8; 32],
        ) -> Result<crate::protocol::TransactionInfo, NodeApiError> {
            unimplemented!()
        }
        async fn get_account(
            &self,
            _address: TronAddress,
        ) -> Result<crate::protocol::Account, NodeApiError> {
            unimplemented!()
        }
        async fn trc20_symbol(&self, _contract: TronAddress) -> Result<String, NodeApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.symbol.clone())
        }
        async fn trc20_name(&self, _contract: TronAddress) -> Result<String, NodeApiError> {
            Ok("Tether USD".to_string())
        }
        async fn trc20_decimals(&self, _contract: TronAddress) -> Result<u8, NodeApiError> {
            Ok(6)
        }
        async fn trc20_balance(
            &self,
            _addr: TronAddress,
            _contract: TronAddress,
        ) -> Result<alloy::primitives::U256, NodeApiError> {
            unimplemented!()
        }
        async fn broadcast_hex(&self, _raw_hex: &str) -> Result<crate::grpc::BroadcastResult, NodeApiError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn caches_successful_lookup() {
        let node = FakeNode {
            calls: AtomicUsize::new(0),
            symbol: "USDT".into(),
        };
        let cache = Trc20Cache::new();
        let contract = TronAddress::from_hash([1u8; 20]);

        let a = cache.get_or_fetch(&node, contract).await.unwrap();
        let b = cache.get_or_fetch(&node, contract).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(node.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_symbol_caches_as_not_a_contract() {
        let node = FakeNode {
            calls: AtomicUsize::new(0),
            symbol: String::new(),
        };
        let cache = Trc20Cache::new();
        let contract = TronAddress::from_hash([2u8; 20]);

        assert!(cache.get_or_fetch(&node, contract).await.is_none());
        assert!(cache.get_or_fetch(&node, contract).await.is_none());
        assert_eq!(node.calls.load(Ordering::SeqCst), 1);
    }
}
