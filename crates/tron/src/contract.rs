use anyhow::Result;
use prost::Message;
use thiserror::Error;

use crate::address::TronAddress;
use crate::protocol;

/// Per-transaction decode failure: unknown contract tag, explicitly-unsupported
/// `CustomContract`, a malformed `Any` payload, or zero contracts in `raw_data`.
///
/// Callers skip the offending transaction and continue with the rest of the block; this is
/// never fatal to the enclosing block or the store.
#[derive(Debug, Error)]
pub enum InconsistentTx {
    #[error("transaction has no contracts in raw_data")]
    NoContracts,
    #[error("CustomContract is not supported")]
    CustomContractUnsupported,
    #[error("unknown contract type tag: {0}")]
    UnknownContractType(i32),
    #[error("failed to decode {kind} payload: {source}")]
    PayloadDecode {
        kind: &'static str,
        #[source]
        source: prost::DecodeError,
    },
}

/// A decoded contract. Only `Transfer` and `TriggerSmartContract` carry typed fields; every
/// other known tag decodes successfully into `Other`, preserving the raw payload bytes without
/// forcing a full typed decode (see SPEC_FULL.md §9's "tagged sum with a catch-all" note).
#[derive(Debug, Clone)]
pub enum DecodedContract {
    Transfer {
        owner_address: TronAddress,
        to_address: TronAddress,
        amount: i64,
    },
    TriggerSmartContract {
        owner_address: TronAddress,
        contract_address: TronAddress,
        data: Vec<u8>,
    },
    Other {
        type_tag: i32,
        raw: Vec<u8>,
    },
}

/// Decodes the single contract entry in `raw_data.contract[0]`.
///
/// A transaction is expected to carry exactly one contract; the caller is responsible for
/// checking `raw_data.contract` is non-empty and reporting `InconsistentTx::NoContracts`
/// otherwise (see `transfer.rs`, which is the sole caller in this crate).
pub fn decode_contract(contract: &protocol::Contract) -> Result<DecodedContract, InconsistentTx> {
    let type_tag = contract.r#type;
    let payload = contract
        .parameter
        .as_ref()
        .map(|any| any.value.as_slice())
        .unwrap_or(&[]);

    match protocol::ContractType::try_from(type_tag) {
        Ok(protocol::ContractType::CustomContract) => {
            Err(InconsistentTx::CustomContractUnsupported)
        }
        Ok(protocol::ContractType::TransferContract) => {
            let msg = protocol::TransferContract::decode(payload).map_err(|source| {
                InconsistentTx::PayloadDecode {
                    kind: "TransferContract",
                    source,
                }
            })?;
            Ok(DecodedContract::Transfer {
                owner_address: address_or_zero(&msg.owner_address),
                to_address: address_or_zero(&msg.to_address),
                amount: msg.amount,
            })
        }
        Ok(protocol::ContractType::TriggerSmartContract) => {
            let msg = protocol::TriggerSmartContract::decode(payload).map_err(|source| {
                InconsistentTx::PayloadDecode {
                    kind: "TriggerSmartContract",
                    source,
                }
            })?;
            Ok(DecodedContract::TriggerSmartContract {
                owner_address: address_or_zero(&msg.owner_address),
                contract_address: address_or_zero(&msg.contract_address),
                data: msg.data,
            })
        }
        Ok(_known) => Ok(DecodedContract::Other {
            type_tag,
            raw: payload.to_vec(),
        }),
        Err(_) => Err(InconsistentTx::UnknownContractType(type_tag)),
    }
}

/// Tron addresses embedded in protobuf payloads are sometimes zero-length (e.g. a malformed or
/// partially-populated message); treat that as the zero-address sentinel rather than failing
/// the whole contract decode over one field.
fn address_or_zero(bytes: &[u8]) -> TronAddress {
    TronAddress::from_slice(bytes).unwrap_or(TronAddress::from_raw(crate::address::ZERO_ADDRESS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::Any;

    fn contract_with(type_tag: i32, value: Vec<u8>) -> protocol::Contract {
        protocol::Contract {
            r#type: type_tag,
            parameter: Some(Any {
                type_url: String::new(),
                value,
            }),
        }
    }

    #[test]
    fn decodes_transfer_contract() {
        let msg = protocol::TransferContract {
            owner_address: TronAddress::from_hash([1u8; 20]).prefixed_bytes().to_vec(),
            to_address: TronAddress::from_hash([2u8; 20]).prefixed_bytes().to_vec(),
            amount: 1_000_000,
        };
        let c = contract_with(
            protocol::ContractType::TransferContract as i32,
            msg.encode_to_vec(),
        );
        match decode_contract(&c).unwrap() {
            DecodedContract::Transfer {
                owner_address,
                to_address,
                amount,
            } => {
                assert_eq!(owner_address, TronAddress::from_hash([1u8; 20]));
                assert_eq!(to_address, TronAddress::from_hash([2u8; 20]));
                assert_eq!(amount, 1_000_000);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn decodes_trigger_smart_contract() {
        let msg = protocol::TriggerSmartContract {
            owner_address: TronAddress::from_hash([3u8; 20]).prefixed_bytes().to_vec(),
            contract_address: TronAddress::from_hash([4u8; 20]).prefixed_bytes().to_vec(),
            data: vec![0xa9, 0x05, 0x9c, 0xbb],
            ..Default::default()
        };
        let c = contract_with(
            protocol::ContractType::TriggerSmartContract as i32,
            msg.encode_to_vec(),
        );
        match decode_contract(&c).unwrap() {
            DecodedContract::TriggerSmartContract {
                owner_address,
                contract_address,
                data,
            } => {
                assert_eq!(owner_address, TronAddress::from_hash([3u8; 20]));
                assert_eq!(contract_address, TronAddress::from_hash([4u8; 20]));
                assert_eq!(data, vec![0xa9, 0x05, 0x9c, 0xbb]);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn other_variants_preserve_raw_bytes() {
        let c = contract_with(protocol::ContractType::VoteWitnessContract as i32, vec![
            1, 2, 3,
        ]);
        match decode_contract(&c).unwrap() {
            DecodedContract::Other { type_tag, raw } => {
                assert_eq!(type_tag, protocol::ContractType::VoteWitnessContract as i32);
                assert_eq!(raw, vec![1, 2, 3]);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn custom_contract_is_inconsistent() {
        let c = contract_with(protocol::ContractType::CustomContract as i32, vec![]);
        assert!(matches!(
            decode_contract(&c),
            Err(InconsistentTx::CustomContractUnsupported)
        ));
    }

    #[test]
    fn unknown_tag_is_inconsistent() {
        let c = contract_with(9999, vec![]);
        assert!(matches!(
            decode_contract(&c),
            Err(InconsistentTx::UnknownContractType(9999))
        ));
    }
}
