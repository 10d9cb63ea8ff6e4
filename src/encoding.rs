use crate::types::{DelegationAuthorization, UserOperation};
use ethers::types::{Address, Bytes, H256, U256};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

/// Wire shape sent to bundlers and paymasters. The optional `eip7702Auth`
/// object is only present once an authorization tuple (or its estimation
/// placeholder) is installed on the operation.
pub fn user_op_to_json(op: &UserOperation) -> serde_json::Value {
    let mut v = serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    });

    if let Some(auth) = op.eip7702_auth.as_ref() {
        v["eip7702Auth"] = delegation_auth_to_json(auth);
    }

    v
}

pub fn delegation_auth_to_json(auth: &DelegationAuthorization) -> serde_json::Value {
    serde_json::json!({
        "chainId": fmt_u256(U256::from(auth.chain_id)),
        "address": fmt_address(auth.address),
        "nonce": fmt_u256(U256::from(auth.nonce)),
        "yParity": fmt_u256(U256::from(auth.y_parity)),
        "r": format!("0x{:064x}", auth.r),
        "s": format!("0x{:064x}", auth.s),
    })
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}

pub fn parse_bytes(s: &str) -> anyhow::Result<Bytes> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Ok(Bytes::from(hex::decode(s)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn quantity_formatting_is_minimal_hex() {
        assert_eq!(fmt_u256(U256::zero()), "0x0");
        assert_eq!(fmt_u256(U256::from(255u64)), "0xff");
        assert_eq!(parse_u256_quantity("0xff").unwrap(), U256::from(255u64));
        assert_eq!(parse_u256_quantity("0x").unwrap(), U256::zero());
    }

    #[test]
    fn user_op_json_includes_auth_only_when_attached() {
        let mut op = UserOperation {
            sender: Address::zero(),
            nonce: U256::zero(),
            init_code: Bytes::default(),
            call_data: Bytes::default(),
            call_gas_limit: U256::zero(),
            verification_gas_limit: U256::zero(),
            pre_verification_gas: U256::zero(),
            max_fee_per_gas: U256::zero(),
            max_priority_fee_per_gas: U256::zero(),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
            eip7702_auth: None,
        };
        assert!(user_op_to_json(&op).get("eip7702Auth").is_none());

        let delegatee =
            Address::from_str("0xe6Cae83BdE06E4c305530e199D7217f42808555B").unwrap();
        op.eip7702_auth = Some(DelegationAuthorization::placeholder(1337, delegatee));
        let v = user_op_to_json(&op);
        let auth = v.get("eip7702Auth").expect("auth object");
        assert_eq!(auth["chainId"], "0x539");
        assert_eq!(
            auth["r"],
            "0x0000000000000000000000000000000000000000000000000000000000000000"
        );
    }
}
