use crate::encoding::{self, parse_bytes, parse_u256_quantity};
use crate::error::{Error, Result};
use crate::rpc::{json_rpc, RpcFailure};
use crate::types::{SponsorshipMetadata, UserOperation};
use ethers::types::{Address, U256};
use serde_json::Value;

/// Client for a sponsoring paymaster web service.
///
/// Sponsorship (`pm_sponsorUserOperation`) trades an unsigned, gas-estimated
/// operation plus a policy id for a paymaster-annotated copy of the operation
/// and metadata about the sponsorship decision.
#[derive(Debug, Clone)]
pub struct PaymasterClient {
    url: String,
    http: reqwest::Client,
}

impl PaymasterClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }

    /// Request gas sponsorship under `policy_id`.
    ///
    /// Returns a new operation; the caller's operation is never touched, so a
    /// denial leaves it valid for unsponsored submission. A policy-level
    /// rejection surfaces as [`Error::SponsorshipDenied`] — recoverable, the
    /// caller decides whether to abort or retry under another policy.
    pub async fn create_sponsor_paymaster_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_id: &str,
    ) -> Result<(UserOperation, SponsorshipMetadata)> {
        let params = serde_json::json!([
            encoding::user_op_to_json(op),
            encoding::fmt_address(entry_point),
            { "sponsorshipPolicyId": policy_id },
        ]);

        let res = json_rpc(&self.http, &self.url, "pm_sponsorUserOperation", params)
            .await
            .map_err(|e| match e {
                RpcFailure::Rpc { code, message, data } => Error::SponsorshipDenied {
                    policy_id: policy_id.to_string(),
                    code,
                    reason: match data {
                        Some(d) => format!("{message} ({d})"),
                        None => message,
                    },
                },
                other => Error::Estimation {
                    context: "pm_sponsorUserOperation",
                    detail: other.to_string(),
                },
            })?;

        parse_sponsorship(&res, op, policy_id)
    }
}

/// Apply a sponsorship response to a copy of `base`.
///
/// Accepts both the flat shape (`paymasterAndData` and adjusted gas fields at
/// the top level) and the wrapped `{sponsoredUserOperation, sponsorMetadata}`
/// shape; be liberal so the pipeline stays vendor-portable.
fn parse_sponsorship(
    result: &Value,
    base: &UserOperation,
    policy_id: &str,
) -> Result<(UserOperation, SponsorshipMetadata)> {
    let fields = result.get("sponsoredUserOperation").unwrap_or(result);

    let pm_data = fields
        .get("paymasterAndData")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Estimation {
            context: "pm_sponsorUserOperation",
            detail: "missing paymasterAndData in sponsorship response".to_string(),
        })?;
    let pm_data = parse_bytes(pm_data).map_err(|e| Error::Estimation {
        context: "pm_sponsorUserOperation",
        detail: format!("invalid hex in paymasterAndData: {e}"),
    })?;

    let mut sponsored = base.clone();
    sponsored.paymaster_and_data = pm_data;

    // Paymasters may bump gas fields to cover their own validation overhead.
    if let Some(v) = quantity_field(fields, "callGasLimit") {
        sponsored.call_gas_limit = v;
    }
    if let Some(v) = quantity_field(fields, "verificationGasLimit") {
        sponsored.verification_gas_limit = v;
    }
    if let Some(v) = quantity_field(fields, "preVerificationGas") {
        sponsored.pre_verification_gas = v;
    }
    if let Some(v) = quantity_field(fields, "maxFeePerGas") {
        sponsored.max_fee_per_gas = v;
    }
    if let Some(v) = quantity_field(fields, "maxPriorityFeePerGas") {
        sponsored.max_priority_fee_per_gas = v;
    }

    let meta_src = result
        .get("sponsorMetadata")
        .or_else(|| result.get("metadata"));
    let metadata = SponsorshipMetadata {
        policy_id: policy_id.to_string(),
        sponsor_name: meta_src
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        valid_until: meta_src.and_then(|m| numeric_field(m, "validUntil")),
        valid_after: meta_src.and_then(|m| numeric_field(m, "validAfter")),
    };

    Ok((sponsored, metadata))
}

fn quantity_field(v: &Value, key: &str) -> Option<U256> {
    v.get(key)
        .and_then(Value::as_str)
        .and_then(|s| parse_u256_quantity(s).ok())
}

fn numeric_field(v: &Value, key: &str) -> Option<u64> {
    match v.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => u64::from_str_radix(s.strip_prefix("0x")?, 16).ok(),
        _ => None,
    }
}
