use crate::address::TronAddress;
use crate::contract::{DecodedContract, InconsistentTx, decode_contract};
use crate::protocol;

/// keccak256("Transfer(address,address,uint256)"). Tron reuses the ERC-20 event signature for
/// TRC-20 transfers; recognising this fingerprint at the log level avoids decoding ABI on every
/// transaction.
pub const TRC20_TRANSFER_TOPIC: [u8; 32] = [
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
];

/// Canonical output of normalization: a single transfer tuple. `contract` is `None` for a
/// native TRX transfer, `Some` for a TRC-20 transfer. `amount` is sun for native transfers,
/// token base units for TRC-20 — both fit comfortably in a 256-bit unsigned integer, matching
/// the width a `Transfer(address,address,uint256)` log entry actually carries on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub contract: Option<TronAddress>,
    pub from: TronAddress,
    pub to: TronAddress,
    pub amount: alloy::primitives::U256,
}

/// Reduces a transaction's decoded contract plus its execution info (logs) to zero or one
/// canonical transfer. Called exactly once per transaction; the result is reused both to gate
/// whether the transaction touches the address index and to enumerate the transfer itself
/// (see SPEC_FULL.md §9 — the original source's double invocation is not replicated).
pub fn normalize(
    contract: &protocol::Contract,
    info: Option<&protocol::TransactionInfo>,
) -> Result<Option<Transfer>, InconsistentTx> {
    match decode_contract(contract)? {
        DecodedContract::Transfer {
            owner_address,
            to_address,
            amount,
        } => Ok(Some(Transfer {
            contract: None,
            from: owner_address,
            to: to_address,
            amount: alloy::primitives::U256::from(amount.max(0) as u64),
        })),
        DecodedContract::TriggerSmartContract {
            contract_address, ..
        } => Ok(normalize_trc20_log(contract_address, info)),
        DecodedContract::Other { .. } => Ok(None),
    }
}

fn normalize_trc20_log(
    contract_address: TronAddress,
    info: Option<&protocol::TransactionInfo>,
) -> Option<Transfer> {
    let info = info?;
    let log = info.log.first()?;
    if log.topics.len() < 3 {
        return None;
    }
    if log.topics[0].as_slice() != TRC20_TRANSFER_TOPIC.as_slice() {
        return None;
    }

    let from = topic_to_address(&log.topics[1])?;
    let to = topic_to_address(&log.topics[2])?;
    let amount = be_bytes_to_u256(&log.data);

    Some(Transfer {
        contract: Some(contract_address),
        from,
        to,
        amount,
    })
}

/// A log topic is a 32-byte word with the 20-byte address right-aligned (Ethereum ABI padding).
/// Strips the 12-byte padding and re-prefixes with Tron's `0x41` version byte.
fn topic_to_address(topic: &[u8]) -> Option<TronAddress> {
    if topic.len() != 32 {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&topic[12..32]);
    Some(TronAddress::from_evm(hash))
}

/// Interprets `data` as a big-endian unsigned integer. Per SPEC_FULL.md §9, this always takes
/// the full-width interpretation (not a truncating 64-bit hex/int parse): short data is treated
/// as the low-order bytes of the value (amount becomes zero only when empty), not rejected.
fn be_bytes_to_u256(data: &[u8]) -> alloy::primitives::U256 {
    let mut buf = [0u8; 32];
    if data.is_empty() {
        return alloy::primitives::U256::ZERO;
    }
    let take = data.len().min(32);
    buf[32 - take..].copy_from_slice(&data[data.len() - take..]);
    alloy::primitives::U256::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self as pb, transaction_info::Log};
    use prost::Message;
    use prost_types::Any;

    fn transfer_contract(
        owner: TronAddress,
        to: TronAddress,
        amount: i64,
    ) -> pb::Contract {
        let msg = pb::TransferContract {
            owner_address: owner.prefixed_bytes().to_vec(),
            to_address: to.prefixed_bytes().to_vec(),
            amount,
        };
        pb::Contract {
            r#type: pb::ContractType::TransferContract as i32,
            parameter: Some(Any {
                type_url: String::new(),
                value: msg.encode_to_vec(),
            }),
        }
    }

    fn trigger_contract(owner: TronAddress, contract: TronAddress) -> pb::Contract {
        let msg = pb::TriggerSmartContract {
            owner_address: owner.prefixed_bytes().to_vec(),
            contract_address: contract.prefixed_bytes().to_vec(),
            ..Default::default()
        };
        pb::Contract {
            r#type: pb::ContractType::TriggerSmartContract as i32,
            parameter: Some(Any {
                type_url: String::new(),
                value: msg.encode_to_vec(),
            }),
        }
    }

    fn padded_topic(addr: TronAddress) -> Vec<u8> {
        let mut topic = vec![0u8; 12];
        topic.extend_from_slice(&addr.evm());
        topic
    }

    #[test]
    fn native_transfer_scenario_1() {
        let owner = TronAddress::from_hash([0xAA; 20]);
        let to = TronAddress::from_hash([0xBB; 20]);
        let c = transfer_contract(owner, to, 1_000_000);
        let t = normalize(&c, None).unwrap().unwrap();
        assert_eq!(
            t,
            Transfer {
                contract: None,
                from: owner,
                to,
                amount: alloy::primitives::U256::from(1_000_000u64),
            }
        );
    }

    #[test]
    fn trc20_transfer_scenario_2() {
        let owner = TronAddress::from_hash([0xAA; 20]);
        let token = TronAddress::from_hash([0xCC; 20]);
        let recipient = TronAddress::from_hash([0xBB; 20]);
        let c = trigger_contract(owner, token);
        let info = pb::TransactionInfo {
            log: vec![Log {
                address: token.prefixed_bytes().to_vec(),
                topics: vec![
                    TRC20_TRANSFER_TOPIC.to_vec(),
                    padded_topic(owner),
                    padded_topic(recipient),
                ],
                data: alloy::primitives::U256::from(1000u64).to_be_bytes_vec(),
            }],
            ..Default::default()
        };
        let t = normalize(&c, Some(&info)).unwrap().unwrap();
        assert_eq!(
            t,
            Transfer {
                contract: Some(token),
                from: owner,
                to: recipient,
                amount: alloy::primitives::U256::from(1000u64),
            }
        );
    }

    #[test]
    fn non_transfer_contract_emits_none() {
        let c = pb::Contract {
            r#type: pb::ContractType::VoteWitnessContract as i32,
            parameter: Some(Any {
                type_url: String::new(),
                value: vec![],
            }),
        };
        assert!(normalize(&c, None).unwrap().is_none());
    }

    #[test]
    fn unknown_contract_type_is_inconsistent() {
        let c = pb::Contract {
            r#type: 12345,
            parameter: None,
        };
        assert!(matches!(
            normalize(&c, None),
            Err(InconsistentTx::UnknownContractType(12345))
        ));
    }

    #[test]
    fn short_topic_list_emits_none() {
        let owner = TronAddress::from_hash([1; 20]);
        let token = TronAddress::from_hash([2; 20]);
        let c = trigger_contract(owner, token);
        let info = pb::TransactionInfo {
            log: vec![Log {
                address: token.prefixed_bytes().to_vec(),
                topics: vec![TRC20_TRANSFER_TOPIC.to_vec(), padded_topic(owner)],
                data: vec![],
            }],
            ..Default::default()
        };
        assert!(normalize(&c, Some(&info)).unwrap().is_none());
    }

    #[test]
    fn empty_receipt_emits_none() {
        let owner = TronAddress::from_hash([1; 20]);
        let token = TronAddress::from_hash([2; 20]);
        let c = trigger_contract(owner, token);
        assert!(normalize(&c, None).unwrap().is_none());
    }

    #[test]
    fn wrong_topic0_emits_none() {
        let owner = TronAddress::from_hash([1; 20]);
        let token = TronAddress::from_hash([2; 20]);
        let recipient = TronAddress::from_hash([3; 20]);
        let c = trigger_contract(owner, token);
        let mut bad_topic = TRC20_TRANSFER_TOPIC;
        bad_topic[0] ^= 0xff;
        let info = pb::TransactionInfo {
            log: vec![Log {
                address: token.prefixed_bytes().to_vec(),
                topics: vec![
                    bad_topic.to_vec(),
                    padded_topic(owner),
                    padded_topic(recipient),
                ],
                data: vec![],
            }],
            ..Default::default()
        };
        assert!(normalize(&c, Some(&info)).unwrap().is_none());
    }

    #[test]
    fn large_amount_does_not_truncate() {
        let owner = TronAddress::from_hash([1; 20]);
        let token = TronAddress::from_hash([2; 20]);
        let recipient = TronAddress::from_hash([3; 20]);
        let c = trigger_contract(owner, token);
        // larger than i64::MAX, which the original source's buggy variant would have truncated.
        let amount: u128 = (i64::MAX as u128) * 4;
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&amount.to_be_bytes());
        let info = pb::TransactionInfo {
            log: vec![Log {
                address: token.prefixed_bytes().to_vec(),
                topics: vec![
                    TRC20_TRANSFER_TOPIC.to_vec(),
                    padded_topic(owner),
                    padded_topic(recipient),
                ],
                data,
            }],
            ..Default::default()
        };
        let t = normalize(&c, Some(&info)).unwrap().unwrap();
        assert_eq!(t.amount, alloy::primitives::U256::from(amount));
    }
}
