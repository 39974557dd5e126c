use anyhow::{Context, Result, bail};

use crate::address::{TRON_ADDRESS_LEN, TronAddress};
use crate::transfer::Transfer;
use crate::vlq::{read_bytes, write_bytes};

/// The per-transaction record stored under `cfTransactions`. Carries the raw protobuf
/// transaction and transaction-info blobs opaquely (the store never re-decodes them after
/// ingest), plus the single transfer tuple normalization produced, if any, and the height the
/// transaction was confirmed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedTx {
    pub raw_tx: Vec<u8>,
    pub raw_info: Vec<u8>,
    pub transfer: Option<Transfer>,
    pub height: u32,
}

/// Packs an enriched transaction into its stable on-disk form: two length-prefixed blobs, a
/// presence flag plus fields for the transfer (if any), and a fixed 4-byte big-endian height
/// trailer.
pub fn pack(tx: &EnrichedTx) -> Vec<u8> {
    let mut out = Vec::new();
    write_bytes(&tx.raw_tx, &mut out);
    write_bytes(&tx.raw_info, &mut out);
    match &tx.transfer {
        None => out.push(0),
        Some(t) => {
            out.push(1);
            match t.contract {
                None => out.push(0),
                Some(c) => {
                    out.push(1);
                    out.extend_from_slice(&c.prefixed_bytes());
                }
            }
            out.extend_from_slice(&t.from.prefixed_bytes());
            out.extend_from_slice(&t.to.prefixed_bytes());
            let amount_be = t.amount.to_be_bytes::<32>();
            write_bytes(&amount_be, &mut out);
        }
    }
    out.extend_from_slice(&tx.height.to_be_bytes());
    out
}

/// Unpacks a byte-stable record produced by [`pack`]. `IndexCorruption`-class failures
/// (truncated buffer, unexpected flag byte) are reported as plain errors; the caller decides
/// whether the surrounding operation is fatal.
pub fn unpack(buf: &[u8]) -> Result<EnrichedTx> {
    let (raw_tx, consumed) = read_bytes(buf).context("truncated raw_tx")?;
    let rest = &buf[consumed..];
    let (raw_info, consumed) = read_bytes(rest).context("truncated raw_info")?;
    let rest = &rest[consumed..];

    let Some((has_transfer, mut rest)) = split_first(rest) else {
        bail!("truncated transfer presence flag");
    };

    let transfer = if has_transfer == 0 {
        None
    } else if has_transfer == 1 {
        let Some((has_contract, r)) = split_first(rest) else {
            bail!("truncated contract presence flag");
        };
        rest = r;
        let contract = if has_contract == 1 {
            let (addr, r) = take_address(rest)?;
            rest = r;
            Some(addr)
        } else if has_contract == 0 {
            None
        } else {
            bail!("invalid contract presence flag: {has_contract}");
        };
        let (from, r) = take_address(rest)?;
        rest = r;
        let (to, r) = take_address(rest)?;
        rest = r;
        let (amount_be, consumed) = read_bytes(rest).context("truncated amount")?;
        rest = &rest[consumed..];
        if amount_be.len() != 32 {
            bail!("amount field is not 32 bytes: {}", amount_be.len());
        }
        let mut buf32 = [0u8; 32];
        buf32.copy_from_slice(amount_be);
        Some(Transfer {
            contract,
            from,
            to,
            amount: alloy::primitives::U256::from_be_bytes(buf32),
        })
    } else {
        bail!("invalid transfer presence flag: {has_transfer}");
    };

    if rest.len() != 4 {
        bail!(
            "expected exactly 4 trailing height bytes, found {}",
            rest.len()
        );
    }
    let mut height_be = [0u8; 4];
    height_be.copy_from_slice(rest);
    let height = u32::from_be_bytes(height_be);

    Ok(EnrichedTx {
        raw_tx: raw_tx.to_vec(),
        raw_info: raw_info.to_vec(),
        transfer,
        height,
    })
}

fn split_first(buf: &[u8]) -> Option<(u8, &[u8])> {
    buf.split_first().map(|(&b, rest)| (b, rest))
}

fn take_address(buf: &[u8]) -> Result<(TronAddress, &[u8])> {
    if buf.len() < TRON_ADDRESS_LEN {
        bail!("truncated address field");
    }
    let addr = TronAddress::from_slice(&buf[..TRON_ADDRESS_LEN])?;
    Ok((addr, &buf[TRON_ADDRESS_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transfer() -> Transfer {
        Transfer {
            contract: Some(TronAddress::from_hash([9u8; 20])),
            from: TronAddress::from_hash([1u8; 20]),
            to: TronAddress::from_hash([2u8; 20]),
            amount: alloy::primitives::U256::from(42_000u64),
        }
    }

    #[test]
    fn roundtrip_with_transfer() {
        let tx = EnrichedTx {
            raw_tx: vec![1, 2, 3, 4],
            raw_info: vec![5, 6],
            transfer: Some(sample_transfer()),
            height: 123_456,
        };
        let packed = pack(&tx);
        let unpacked = unpack(&packed).unwrap();
        assert_eq!(tx, unpacked);
    }

    #[test]
    fn roundtrip_native_transfer_has_no_contract() {
        let mut transfer = sample_transfer();
        transfer.contract = None;
        let tx = EnrichedTx {
            raw_tx: vec![],
            raw_info: vec![],
            transfer: Some(transfer),
            height: 1,
        };
        let packed = pack(&tx);
        let unpacked = unpack(&packed).unwrap();
        assert_eq!(tx, unpacked);
    }

    #[test]
    fn roundtrip_without_transfer() {
        let tx = EnrichedTx {
            raw_tx: vec![9; 40],
            raw_info: vec![],
            transfer: None,
            height: 7,
        };
        let packed = pack(&tx);
        let unpacked = unpack(&packed).unwrap();
        assert_eq!(tx, unpacked);
    }

    #[test]
    fn unpack_rejects_truncated_buffer() {
        let tx = EnrichedTx {
            raw_tx: vec![1, 2, 3],
            raw_info: vec![4, 5],
            transfer: Some(sample_transfer()),
            height: 99,
        };
        let packed = pack(&tx);
        assert!(unpack(&packed[..packed.len() - 1]).is_err());
    }
}
