//! The embedded address/contract index (components E, F, G): an ordered key/value store with
//! column-family support and atomic write batches, in the shape `rocksdb` provides and the
//! retrieved corpus already uses for this exact kind of reversible, column-keyed indexing (see
//! `examples/chainflip-io-chainflip-backend/engine/src/db/persistent/rocksdb_kv.rs`).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use alloy::primitives::U256;
use anyhow::{Context, Result, bail};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use tracing::warn;

use crate::address::{TRON_ADDRESS_LEN, TronAddress, ZERO_ADDRESS};
use crate::error::IndexerError;
use crate::grpc::NodeApi;
use crate::trc20_cache::Trc20Cache;
use crate::transfer::Transfer;
use crate::txcodec::{self, EnrichedTx};
use crate::vlq::{read_bytes, read_uvarint, read_varint, write_bytes, write_uvarint, write_varint};

const CF_TRANSACTIONS: &str = "transactions";
const CF_ADDRESSES: &str = "addresses";
const CF_ADDRESS_CONTRACTS: &str = "address_contracts";
const CF_BLOCK_TXS: &str = "block_txs";
const CF_HEIGHT: &str = "height";
const CF_META: &str = "meta";

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";
/// Bumped on any incompatible change to the on-disk key/value layouts in this module. A store
/// opened with a mismatched version refuses to open rather than silently corrupt itself.
const SCHEMA_VERSION: u32 = 1;

/// A single per-address, per-contract token balance entry (part of `AddrContracts`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContractEntry {
    pub contract: TronAddress,
    pub txs: u64,
    pub symbol: String,
    pub decimals: i64,
    pub name: String,
    /// Decimal-string rendering of the address's current balance in this contract, as read
    /// from the node at the moment this entry was first created (§4.E: "eagerly fetch ...
    /// amount (current balance) from the node"). Not kept live-updated on every touch.
    pub amount: String,
}

/// The per-address summary stored under `cfAddressContracts` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddrContracts {
    pub total_txs: u64,
    pub non_contract_txs: u64,
    pub contracts: Vec<ContractEntry>,
}

impl AddrContracts {
    /// An `AddrContracts` row with no non-contract appearances and no token entries is
    /// considered absent and deleted on write (§3 invariant).
    pub fn is_empty(&self) -> bool {
        self.non_contract_txs == 0 && self.contracts.is_empty()
    }

    fn pack(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_uvarint(self.total_txs, &mut out);
        write_uvarint(self.non_contract_txs, &mut out);
        write_uvarint(self.contracts.len() as u64, &mut out);
        for c in &self.contracts {
            out.extend_from_slice(&c.contract.prefixed_bytes());
            write_uvarint(c.txs, &mut out);
            write_bytes(c.symbol.as_bytes(), &mut out);
            write_varint(c.decimals, &mut out);
            write_bytes(c.name.as_bytes(), &mut out);
            write_bytes(c.amount.as_bytes(), &mut out);
        }
        out
    }

    fn unpack(buf: &[u8]) -> Result<Self> {
        let (total_txs, n) = read_uvarint(buf).context("truncated total_txs")?;
        let rest = &buf[n..];
        let (non_contract_txs, n) = read_uvarint(rest).context("truncated non_contract_txs")?;
        let mut rest = &rest[n..];
        let (count, n) = read_uvarint(rest).context("truncated contracts count")?;
        rest = &rest[n..];

        let mut contracts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if rest.len() < TRON_ADDRESS_LEN {
                bail!("truncated contract address");
            }
            let contract = TronAddress::from_slice(&rest[..TRON_ADDRESS_LEN])?;
            rest = &rest[TRON_ADDRESS_LEN..];
            let (txs, n) = read_uvarint(rest).context("truncated contract txs")?;
            rest = &rest[n..];
            let (symbol, n) = read_bytes(rest).context("truncated symbol")?;
            let symbol = String::from_utf8_lossy(symbol).into_owned();
            rest = &rest[n..];
            let (decimals, n) = read_varint(rest).context("truncated decimals")?;
            rest = &rest[n..];
            let (name, n) = read_bytes(rest).context("truncated name")?;
            let name = String::from_utf8_lossy(name).into_owned();
            rest = &rest[n..];
            let (amount, n) = read_bytes(rest).context("truncated amount")?;
            let amount = String::from_utf8_lossy(amount).into_owned();
            rest = &rest[n..];
            contracts.push(ContractEntry {
                contract,
                txs,
                symbol,
                decimals,
                name,
                amount,
            });
        }

        Ok(Self {
            total_txs,
            non_contract_txs,
            contracts,
        })
    }
}

/// One transaction's row in the `cfBlockTxs` log for a given height (§3). `from`/`to` mirror
/// the transfer's participants (`None` when the tx emitted no transfer); `contracts` pairs an
/// address with the contract it was touched under for `t.from` and, when `from != to`,
/// `t.to` (§4.E step 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTxEntry {
    pub btxid: [u8; 32],
    pub from: Option<TronAddress>,
    pub to: Option<TronAddress>,
    pub contracts: Vec<(TronAddress, TronAddress)>,
}

fn pack_block_txs(entries: &[BlockTxEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for e in entries {
        out.extend_from_slice(&e.btxid);
        out.extend_from_slice(&e.from.map(|a| a.prefixed_bytes()).unwrap_or(ZERO_ADDRESS));
        out.extend_from_slice(&e.to.map(|a| a.prefixed_bytes()).unwrap_or(ZERO_ADDRESS));
        write_uvarint(e.contracts.len() as u64, &mut out);
        for (addr, contract) in &e.contracts {
            out.extend_from_slice(&addr.prefixed_bytes());
            out.extend_from_slice(&contract.prefixed_bytes());
        }
    }
    out
}

fn unpack_block_txs(mut buf: &[u8]) -> Result<Vec<BlockTxEntry>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        if buf.len() < 32 + TRON_ADDRESS_LEN * 2 {
            bail!("truncated block_txs entry");
        }
        let mut btxid = [0u8; 32];
        btxid.copy_from_slice(&buf[..32]);
        buf = &buf[32..];
        let from = addr_or_absent(&buf[..TRON_ADDRESS_LEN])?;
        buf = &buf[TRON_ADDRESS_LEN..];
        let to = addr_or_absent(&buf[..TRON_ADDRESS_LEN])?;
        buf = &buf[TRON_ADDRESS_LEN..];
        let (count, n) = read_uvarint(buf).context("truncated numContracts")?;
        buf = &buf[n..];
        let mut contracts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if buf.len() < TRON_ADDRESS_LEN * 2 {
                bail!("truncated contracts entry");
            }
            let addr = TronAddress::from_slice(&buf[..TRON_ADDRESS_LEN])?;
            buf = &buf[TRON_ADDRESS_LEN..];
            let contract = TronAddress::from_slice(&buf[..TRON_ADDRESS_LEN])?;
            buf = &buf[TRON_ADDRESS_LEN..];
            contracts.push((addr, contract));
        }
        out.push(BlockTxEntry {
            btxid,
            from,
            to,
            contracts,
        });
    }
    Ok(out)
}

fn addr_or_absent(bytes: &[u8]) -> Result<Option<TronAddress>> {
    let a = TronAddress::from_slice(bytes)?;
    Ok(if a.is_zero() { None } else { Some(a) })
}

/// One transaction about to be connected: the decoded contract's normalization result has
/// already been computed by the caller (components B/C); this module owns packing (D) and the
/// address/contract bookkeeping (E).
pub struct PendingTx {
    pub btxid: [u8; 32],
    pub raw_tx: Vec<u8>,
    pub raw_info: Vec<u8>,
    pub transfer: Option<Transfer>,
}

/// Block-level metadata stored under `cfHeight`.
#[derive(Debug, Clone, Copy)]
pub struct HeightMeta {
    pub block_hash: [u8; 32],
    pub timestamp: i64,
}

/// A fully-assembled, not-yet-committed connect operation. Built by [`Store::prepare_connect`]
/// (which may call out to the node for contract metadata/balances) and applied atomically by
/// [`Store::commit_connect`] (pure local I/O, no network).
pub struct ConnectBatch {
    height: u32,
    meta: HeightMeta,
    transactions: Vec<([u8; 32], Vec<u8>)>,
    address_contracts: HashMap<TronAddress, AddrContracts>,
    cf_addresses: HashMap<TronAddress, Vec<([u8; 32], i64)>>,
    block_txs: Vec<BlockTxEntry>,
}

#[derive(Default)]
struct TouchTracker {
    total_txs_counted: HashSet<(TronAddress, [u8; 32])>,
    noncontract_counted: HashSet<(TronAddress, [u8; 32])>,
}

pub struct Store {
    db: DB,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cfs = [
            CF_TRANSACTIONS,
            CF_ADDRESSES,
            CF_ADDRESS_CONTRACTS,
            CF_BLOCK_TXS,
            CF_HEIGHT,
            CF_META,
        ]
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&db_opts, path, cfs)
            .with_context(|| format!("open rocksdb store at {}", path.display()))?;

        let store = Self { db };
        store.check_or_init_schema_version()?;
        Ok(store)
    }

    fn check_or_init_schema_version(&self) -> Result<()> {
        let cf = self.cf(CF_META);
        match self.db.get_cf(cf, SCHEMA_VERSION_KEY)? {
            None => {
                self.db
                    .put_cf(cf, SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_be_bytes())?;
                Ok(())
            }
            Some(raw) => {
                let version = u32::from_be_bytes(
                    raw.as_slice()
                        .try_into()
                        .map_err(|_| anyhow::anyhow!("malformed schema_version value"))?,
                );
                if version != SCHEMA_VERSION {
                    bail!(
                        "store schema version {version} incompatible with this binary's {SCHEMA_VERSION}; rebuild required"
                    );
                }
                Ok(())
            }
        }
    }

    fn cf(&self, name: &str) -> &rocksdb::ColumnFamily {
        self.db
            .cf_handle(name)
            .unwrap_or_else(|| panic!("missing column family: {name}"))
    }

    /// The highest height with a committed `cfHeight` row, if any. The chain driver resumes
    /// ingest from here.
    pub fn best_height(&self) -> Result<Option<u32>> {
        let mut iter = self.db.iterator_cf(self.cf(CF_HEIGHT), IteratorMode::End);
        match iter.next() {
            None => Ok(None),
            Some(item) => {
                let (key, _) = item.context("iterate cfHeight")?;
                if key.len() != 4 {
                    bail!("malformed cfHeight key length {}", key.len());
                }
                Ok(Some(u32::from_be_bytes(key.as_ref().try_into().unwrap())))
            }
        }
    }

    pub fn get_height_meta(&self, height: u32) -> Result<Option<HeightMeta>> {
        let Some(raw) = self.db.get_cf(self.cf(CF_HEIGHT), height.to_be_bytes())? else {
            return Ok(None);
        };
        if raw.len() != 40 {
            bail!("malformed cfHeight value length {}", raw.len());
        }
        let mut block_hash = [0u8; 32];
        block_hash.copy_from_slice(&raw[..32]);
        let timestamp = i64::from_be_bytes(raw[32..40].try_into().unwrap());
        Ok(Some(HeightMeta {
            block_hash,
            timestamp,
        }))
    }

    pub fn get_transaction(&self, txid: &[u8; 32]) -> Result<Option<EnrichedTx>> {
        let Some(raw) = self.db.get_cf(self.cf(CF_TRANSACTIONS), txid)? else {
            return Ok(None);
        };
        txcodec::unpack(&raw).map(Some)
    }

    /// Single best-effort write-through for the tx cache (component I); not part of a block
    /// commit batch.
    pub fn put_transaction(&self, txid: &[u8; 32], tx: &EnrichedTx) -> Result<()> {
        self.db
            .put_cf(self.cf(CF_TRANSACTIONS), txid, txcodec::pack(tx))
            .context("put cfTransactions")
    }

    pub fn get_address_contracts(&self, addr: TronAddress) -> Result<Option<AddrContracts>> {
        let Some(raw) = self
            .db
            .get_cf(self.cf(CF_ADDRESS_CONTRACTS), addr.prefixed_bytes())?
        else {
            return Ok(None);
        };
        AddrContracts::unpack(&raw).map(Some)
    }

    /// Range-scans `cfAddresses` for one address, returning each committed height's
    /// `(btxid, index)` entries in ascending height order (§4.G's "prefix/range iterator over
    /// `cfAddresses` for a given address" read-path primitive; address-history queries
    /// themselves are out of scope, but this iteration primitive is not).
    pub fn address_entries(
        &self,
        addr: TronAddress,
        heights: impl std::ops::RangeBounds<u32>,
    ) -> Result<Vec<(u32, Vec<([u8; 32], i64)>)>> {
        let prefix = addr.prefixed_bytes();
        let from_height = match heights.start_bound() {
            std::ops::Bound::Included(&h) => h,
            std::ops::Bound::Excluded(&h) => h.saturating_add(1),
            std::ops::Bound::Unbounded => 0,
        };
        let seek_key = addresses_key(addr, from_height);

        let mut out = Vec::new();
        let iter = self.db.iterator_cf(
            self.cf(CF_ADDRESSES),
            IteratorMode::From(&seek_key, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.context("iterate cfAddresses")?;
            if key.len() != TRON_ADDRESS_LEN + 4 || key[..TRON_ADDRESS_LEN] != prefix[..] {
                break;
            }
            let height = u32::from_be_bytes(key[TRON_ADDRESS_LEN..].try_into().unwrap());
            if !heights.contains(&height) {
                break;
            }
            out.push((height, unpack_address_entries(&value)?));
        }
        Ok(out)
    }

    /// Builds the full write-batch for connecting one block (component E). May call the node
    /// (for newly-seen contract metadata/balances via `trc20`) and is therefore async; the
    /// actual store mutation happens later, synchronously, in [`Self::commit_connect`].
    pub async fn prepare_connect(
        &self,
        height: u32,
        meta: HeightMeta,
        txs: Vec<PendingTx>,
        node: &impl NodeApi,
        trc20: &Trc20Cache,
    ) -> Result<ConnectBatch> {
        let mut address_contracts: HashMap<TronAddress, AddrContracts> = HashMap::new();
        let mut cf_addresses: HashMap<TronAddress, Vec<([u8; 32], i64)>> = HashMap::new();
        let mut transactions = Vec::new();
        let mut block_txs = Vec::new();
        let mut tracker = TouchTracker::default();

        for tx in txs {
            let Some(transfer) = tx.transfer else {
                block_txs.push(BlockTxEntry {
                    btxid: tx.btxid,
                    from: None,
                    to: None,
                    contracts: vec![],
                });
                continue;
            };

            let enriched = EnrichedTx {
                raw_tx: tx.raw_tx,
                raw_info: tx.raw_info,
                transfer: Some(transfer.clone()),
                height,
            };
            transactions.push((tx.btxid, txcodec::pack(&enriched)));

            // §4.E steps 4-5: the single logical vin/vout pair, derived from the transfer
            // tuple itself (Tron has no UTXO set to decode separately).
            self.touch(
                &mut address_contracts,
                &mut cf_addresses,
                &mut tracker,
                node,
                trc20,
                transfer.to,
                tx.btxid,
                0,
                None,
                true,
            )
            .await?;
            self.touch(
                &mut address_contracts,
                &mut cf_addresses,
                &mut tracker,
                node,
                trc20,
                transfer.from,
                tx.btxid,
                !0i64,
                None,
                transfer.from != transfer.to,
            )
            .await?;

            let mut contracts_touched = Vec::new();
            if let Some(contract) = transfer.contract {
                self.touch(
                    &mut address_contracts,
                    &mut cf_addresses,
                    &mut tracker,
                    node,
                    trc20,
                    transfer.to,
                    tx.btxid,
                    1,
                    Some(contract),
                    true,
                )
                .await?;
                self.touch(
                    &mut address_contracts,
                    &mut cf_addresses,
                    &mut tracker,
                    node,
                    trc20,
                    transfer.from,
                    tx.btxid,
                    !1i64,
                    Some(contract),
                    transfer.from != transfer.to,
                )
                .await?;
                contracts_touched.push((transfer.from, contract));
                if transfer.from != transfer.to {
                    contracts_touched.push((transfer.to, contract));
                }
            }

            block_txs.push(BlockTxEntry {
                btxid: tx.btxid,
                from: Some(transfer.from),
                to: Some(transfer.to),
                contracts: contracts_touched,
            });
        }

        Ok(ConnectBatch {
            height,
            meta,
            transactions,
            address_contracts,
            cf_addresses,
            block_txs,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn touch(
        &self,
        address_contracts: &mut HashMap<TronAddress, AddrContracts>,
        cf_addresses: &mut HashMap<TronAddress, Vec<([u8; 32], i64)>>,
        tracker: &mut TouchTracker,
        node: &impl NodeApi,
        trc20: &Trc20Cache,
        addr: TronAddress,
        btxid: [u8; 32],
        index: i64,
        contract: Option<TronAddress>,
        inc_tx: bool,
    ) -> Result<()> {
        if addr.is_zero() {
            return Ok(());
        }

        let mut entry = match address_contracts.remove(&addr) {
            Some(e) => e,
            None => self.get_address_contracts(addr)?.unwrap_or_default(),
        };

        match contract {
            None => {
                if inc_tx {
                    entry.non_contract_txs += 1;
                    tracker.noncontract_counted.insert((addr, btxid));
                }
            }
            Some(c) => {
                // This appearance turned out to be contract-bearing; undo the non-contract
                // count steps 4-5 applied for the same (addr, tx) pair, so the net effect is
                // mutually exclusive for single-transfer transactions (§4.E touch() pseudocode).
                if tracker.noncontract_counted.remove(&(addr, btxid)) {
                    entry.non_contract_txs = entry.non_contract_txs.saturating_sub(1);
                }

                let idx = match entry.contracts.iter().position(|ce| ce.contract == c) {
                    Some(i) => i,
                    None => {
                        let meta = trc20.get_or_fetch(node, c).await;
                        let balance = node
                            .trc20_balance(addr, c)
                            .await
                            .unwrap_or(U256::ZERO);
                        entry.contracts.push(ContractEntry {
                            contract: c,
                            txs: 0,
                            symbol: meta.as_ref().map(|m| m.symbol.clone()).unwrap_or_default(),
                            decimals: meta.as_ref().map(|m| m.decimals as i64).unwrap_or(0),
                            name: meta.as_ref().map(|m| m.name.clone()).unwrap_or_default(),
                            amount: balance.to_string(),
                        });
                        entry.contracts.len() - 1
                    }
                };
                if inc_tx {
                    entry.contracts[idx].txs += 1;
                }
            }
        }

        if tracker.total_txs_counted.insert((addr, btxid)) {
            entry.total_txs += 1;
        }

        cf_addresses.entry(addr).or_default().push((btxid, index));
        address_contracts.insert(addr, entry);
        Ok(())
    }

    /// Applies a prepared [`ConnectBatch`] atomically. Pure local I/O: no network calls.
    pub fn commit_connect(&self, batch: ConnectBatch) -> Result<()> {
        let mut wb = WriteBatch::default();

        for (txid, packed) in &batch.transactions {
            wb.put_cf(self.cf(CF_TRANSACTIONS), txid, packed);
        }

        for (addr, entries) in &batch.cf_addresses {
            let key = addresses_key(*addr, batch.height);
            wb.put_cf(self.cf(CF_ADDRESSES), key, pack_address_entries(entries));
        }

        for (addr, ac) in &batch.address_contracts {
            let key = addr.prefixed_bytes();
            if ac.is_empty() {
                wb.delete_cf(self.cf(CF_ADDRESS_CONTRACTS), key);
            } else {
                wb.put_cf(self.cf(CF_ADDRESS_CONTRACTS), key, ac.pack());
            }
        }

        wb.put_cf(
            self.cf(CF_BLOCK_TXS),
            batch.height.to_be_bytes(),
            pack_block_txs(&batch.block_txs),
        );

        let mut height_value = Vec::with_capacity(40);
        height_value.extend_from_slice(&batch.meta.block_hash);
        height_value.extend_from_slice(&batch.meta.timestamp.to_be_bytes());
        wb.put_cf(self.cf(CF_HEIGHT), batch.height.to_be_bytes(), height_value);

        self.db.write(wb).context("commit connect batch")?;
        self.db.flush().context("flush after connect")
    }

    /// Disconnects a contiguous, inclusive height range at the chain's head (component F).
    /// Processes heights in strictly descending order; any missing `cfBlockTxs` row is fatal
    /// (`IndexCorruption`) since it means the index cannot be unwound exactly.
    pub fn disconnect_range(&self, lower: u32, higher: u32) -> Result<()> {
        if lower > higher {
            bail!("disconnect_range: lower {lower} > higher {higher}");
        }

        let mut per_height = Vec::new();
        for h in lower..=higher {
            let raw = self
                .db
                .get_cf(self.cf(CF_BLOCK_TXS), h.to_be_bytes())
                .with_context(|| format!("read cfBlockTxs[{h}]"))?
                .ok_or_else(|| {
                    IndexerError::IndexCorruption(format!(
                        "cfBlockTxs missing for height {h} inside disconnect range [{lower}, {higher}]"
                    ))
                })?;
            let entries = unpack_block_txs(&raw).with_context(|| format!("unpack cfBlockTxs[{h}]"))?;
            per_height.push((h, entries));
        }

        let mut wb = WriteBatch::default();
        let mut address_contracts: HashMap<TronAddress, AddrContracts> = HashMap::new();
        let mut tracker = TouchTracker::default();

        for (height, entries) in per_height.into_iter().rev() {
            let mut touched_this_height: HashSet<TronAddress> = HashSet::new();

            for entry in &entries {
                // A contract-bearing transfer's two `None`-contract touch() calls on the
                // forward path (§4.E steps 4-5) are always net-canceled by the matching
                // `Some(c)` calls in step 6 (`touch()`'s `tracker.noncontract_counted.remove`
                // cancellation) — so when this tx also touched a contract, undoing the
                // `None`-side non_contract_txs bump here would double-decrement a bump that was
                // never actually left in place.
                let contract_bearing = !entry.contracts.is_empty();

                if let Some(from) = entry.from {
                    self.undo(
                        &mut address_contracts,
                        &mut tracker,
                        from,
                        entry.btxid,
                        None,
                        contract_bearing,
                    );
                    touched_this_height.insert(from);
                }
                if let Some(to) = entry.to
                    && Some(to) != entry.from
                {
                    self.undo(
                        &mut address_contracts,
                        &mut tracker,
                        to,
                        entry.btxid,
                        None,
                        contract_bearing,
                    );
                    touched_this_height.insert(to);
                }
                for (addr, contract) in &entry.contracts {
                    self.undo(
                        &mut address_contracts,
                        &mut tracker,
                        *addr,
                        entry.btxid,
                        Some(*contract),
                        false,
                    );
                    touched_this_height.insert(*addr);
                }
                wb.delete_cf(self.cf(CF_TRANSACTIONS), entry.btxid);
            }

            for addr in touched_this_height {
                wb.delete_cf(self.cf(CF_ADDRESSES), addresses_key(addr, height));
            }
            wb.delete_cf(self.cf(CF_BLOCK_TXS), height.to_be_bytes());
            wb.delete_cf(self.cf(CF_HEIGHT), height.to_be_bytes());
        }

        for (addr, ac) in &address_contracts {
            let key = addr.prefixed_bytes();
            if ac.is_empty() {
                wb.delete_cf(self.cf(CF_ADDRESS_CONTRACTS), key);
            } else {
                wb.put_cf(self.cf(CF_ADDRESS_CONTRACTS), key, ac.pack());
            }
        }

        self.db.write(wb).context("commit disconnect batch")?;
        self.db.flush().context("flush after disconnect")
    }

    fn undo(
        &self,
        address_contracts: &mut HashMap<TronAddress, AddrContracts>,
        tracker: &mut TouchTracker,
        addr: TronAddress,
        btxid: [u8; 32],
        contract: Option<TronAddress>,
        contract_bearing: bool,
    ) {
        if addr.is_zero() {
            return;
        }

        let mut entry = match address_contracts.remove(&addr) {
            Some(e) => e,
            None => self
                .get_address_contracts(addr)
                .ok()
                .flatten()
                .unwrap_or_default(),
        };

        if tracker.total_txs_counted.insert((addr, btxid)) {
            if let Some(v) = entry.total_txs.checked_sub(1) {
                entry.total_txs = v;
            } else {
                warn!(addr = %addr, "totalTxs underflow during disconnect, clamping to 0");
                entry.total_txs = 0;
            }
        }

        match contract {
            None => {
                if contract_bearing {
                    // touch()'s forward-path cancellation already left this appearance's
                    // non_contract_txs contribution at net zero; nothing to undo.
                } else if let Some(v) = entry.non_contract_txs.checked_sub(1) {
                    entry.non_contract_txs = v;
                } else {
                    warn!(addr = %addr, "nonContractTxs underflow during disconnect, clamping to 0");
                    entry.non_contract_txs = 0;
                }
            }
            Some(c) => {
                if let Some(idx) = entry.contracts.iter().position(|ce| ce.contract == c) {
                    if entry.contracts[idx].txs <= 1 {
                        entry.contracts.remove(idx);
                    } else {
                        entry.contracts[idx].txs -= 1;
                    }
                } else {
                    warn!(addr = %addr, contract = %c, "contract entry missing during disconnect undo");
                }
            }
        }

        address_contracts.insert(addr, entry);
    }
}

fn addresses_key(addr: TronAddress, height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(TRON_ADDRESS_LEN + 4);
    key.extend_from_slice(&addr.prefixed_bytes());
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn pack_address_entries(entries: &[([u8; 32], i64)]) -> Vec<u8> {
    let mut out = Vec::new();
    write_uvarint(entries.len() as u64, &mut out);
    for (btxid, index) in entries {
        out.extend_from_slice(btxid);
        write_varint(*index, &mut out);
    }
    out
}

fn unpack_address_entries(mut buf: &[u8]) -> Result<Vec<([u8; 32], i64)>> {
    let (count, n) = read_uvarint(buf).context("truncated address entries count")?;
    buf = &buf[n..];
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if buf.len() < 32 {
            bail!("truncated btxid in address entry");
        }
        let mut btxid = [0u8; 32];
        btxid.copy_from_slice(&buf[..32]);
        buf = &buf[32..];
        let (index, n) = read_varint(buf).context("truncated index in address entry")?;
        buf = &buf[n..];
        out.push((btxid, index));
    }
    Ok(out)
}
