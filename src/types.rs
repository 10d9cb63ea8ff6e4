use ethers::types::{Address, Bytes, H256, U256};
use serde_json::Value;

use crate::encoding::{parse_h256, parse_u256_quantity};

/// A single contract call to be executed by the smart account.
///
/// Immutable once constructed; one or more of these are aggregated into the
/// `call_data` of a [`UserOperation`].
#[derive(Clone, Debug)]
pub struct Call {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Call {
    pub fn new(to: Address, value: U256, data: Bytes) -> Self {
        Self { to, value, data }
    }
}

/// ERC-4337 UserOperation (EntryPoint v0.6 layout) extended with an optional
/// EIP-7702 delegation authorization tuple.
///
/// The operation is mutated in stages as it moves through the pipeline:
/// paymaster annotation first, signature last. The signature never
/// participates in the pre-image of its own hash.
#[derive(Clone, Debug)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
    pub eip7702_auth: Option<DelegationAuthorization>,
}

/// Signed EIP-7702 authorization tuple.
///
/// Valid only for the exact (chain id, nonce) pair that was hashed; reusing
/// it under another delegator nonce invalidates it on-chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegationAuthorization {
    pub chain_id: u64,
    /// Delegatee contract whose code the EOA will run under.
    pub address: Address,
    /// Delegator account nonce at authorization time.
    pub nonce: u64,
    pub y_parity: u8,
    pub r: U256,
    pub s: U256,
}

impl DelegationAuthorization {
    /// Unsigned placeholder used during gas estimation, before the real
    /// authorization hash has been signed. Overwritten by
    /// `attach_delegation_authorization`.
    pub fn placeholder(chain_id: u64, delegatee: Address) -> Self {
        Self {
            chain_id,
            address: delegatee,
            nonce: 0,
            y_parity: 0,
            r: U256::zero(),
            s: U256::zero(),
        }
    }
}

/// Paymaster's description of an accepted sponsorship.
#[derive(Clone, Debug, Default)]
pub struct SponsorshipMetadata {
    pub policy_id: String,
    pub sponsor_name: Option<String>,
    pub valid_until: Option<u64>,
    pub valid_after: Option<u64>,
}

/// Terminal artifact of an included user operation. Immutable once observed.
#[derive(Clone, Debug)]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub success: bool,
    pub transaction_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    /// Full bundler response, kept for diagnosis of failed executions.
    pub raw: Value,
}

impl UserOperationReceipt {
    /// Parse an `eth_getUserOperationReceipt` result. Bundlers vary in which
    /// optional fields they populate, so everything beyond `success` is
    /// best-effort.
    pub fn from_json(user_op_hash: H256, v: Value) -> Self {
        let success = v.get("success").and_then(Value::as_bool).unwrap_or(false);

        let inner = v.get("receipt");
        let transaction_hash = inner
            .and_then(|r| r.get("transactionHash"))
            .and_then(Value::as_str)
            .and_then(|s| parse_h256(s).ok());
        let block_number = inner
            .and_then(|r| r.get("blockNumber"))
            .and_then(Value::as_str)
            .and_then(|s| u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok());

        let actual_gas_cost = v
            .get("actualGasCost")
            .and_then(Value::as_str)
            .and_then(|s| parse_u256_quantity(s).ok())
            .unwrap_or_default();
        let actual_gas_used = v
            .get("actualGasUsed")
            .and_then(Value::as_str)
            .and_then(|s| parse_u256_quantity(s).ok())
            .unwrap_or_default();

        Self {
            user_op_hash,
            success,
            transaction_hash,
            block_number,
            actual_gas_cost,
            actual_gas_used,
            raw: v,
        }
    }
}
