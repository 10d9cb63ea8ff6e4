use crate::encoding::{fmt_h256, parse_h256, parse_u256_quantity};
use crate::error::{Error, Result};
use crate::rpc::json_rpc;
use crate::types::UserOperationReceipt;
use ethers::types::{Address, H256, U256};
use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BundlerClient {
    url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

/// Result of feeding one poll response into the inclusion state machine.
#[derive(Debug, Clone)]
pub enum InclusionPoll {
    Pending,
    Included(UserOperationReceipt),
    TimedOut,
}

/// Pure transition function for the inclusion wait. A receipt observed on the
/// deadline poll still wins; a zero timeout disables the deadline entirely.
pub fn advance(
    elapsed: Duration,
    timeout: Duration,
    response: Option<UserOperationReceipt>,
) -> InclusionPoll {
    if let Some(receipt) = response {
        return InclusionPoll::Included(receipt);
    }
    if !timeout.is_zero() && elapsed >= timeout {
        return InclusionPoll::TimedOut;
    }
    InclusionPoll::Pending
}

/// Drive [`advance`] with a poll source until it reaches a terminal state.
///
/// The poll source decides what a "transient" failure is; returning `None`
/// keeps the loop going. Timing out abandons the wait but not the operation:
/// the same hash can be re-polled later.
pub async fn await_inclusion<F, Fut>(
    mut poll: F,
    poll_interval: Duration,
    timeout: Duration,
) -> InclusionPoll
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<UserOperationReceipt>>,
{
    let start = Instant::now();
    loop {
        let response = poll().await;
        match advance(start.elapsed(), timeout, response) {
            InclusionPoll::Pending => tokio::time::sleep(poll_interval).await,
            terminal => return terminal,
        }
    }
}

impl BundlerClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }

    /// `eth_estimateUserOperationGas` for the three gas limit fields.
    pub async fn estimate_user_operation_gas(
        &self,
        user_op: Value,
        entry_point: Address,
    ) -> Result<GasEstimates> {
        let params = serde_json::json!([user_op, crate::encoding::fmt_address(entry_point)]);
        let res = json_rpc(&self.http, &self.url, "eth_estimateUserOperationGas", params)
            .await
            .map_err(|e| Error::Estimation {
                context: "eth_estimateUserOperationGas",
                detail: e.to_string(),
            })?;

        Ok(GasEstimates {
            call_gas_limit: parse_u256_field(&res, "callGasLimit")?,
            verification_gas_limit: parse_u256_field(&res, "verificationGasLimit")?,
            pre_verification_gas: parse_u256_field(&res, "preVerificationGas")?,
        })
    }

    /// Submit a signed operation. Returns immediately with the hash the
    /// bundler will index the pending operation under.
    pub async fn send_user_operation(&self, user_op: Value, entry_point: Address) -> Result<H256> {
        let params = serde_json::json!([user_op, crate::encoding::fmt_address(entry_point)]);
        let res = json_rpc(&self.http, &self.url, "eth_sendUserOperation", params)
            .await
            .map_err(|e| Error::Submission(e.to_string()))?;
        parse_userop_hash(&res)
    }

    /// Single receipt query; `None` while the operation is still pending.
    pub async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>> {
        let params = serde_json::json!([fmt_h256(user_op_hash)]);
        let res = json_rpc(&self.http, &self.url, "eth_getUserOperationReceipt", params)
            .await
            .map_err(|e| Error::Estimation {
                context: "eth_getUserOperationReceipt",
                detail: e.to_string(),
            })?;

        if res.is_null() {
            return Ok(None);
        }
        Ok(Some(UserOperationReceipt::from_json(user_op_hash, res)))
    }

    /// Poll for a receipt until inclusion or timeout.
    ///
    /// A receipt reporting `success == false` is surfaced as
    /// [`Error::ExecutionFailed`] with the full receipt attached.
    pub async fn wait_user_operation_receipt(
        &self,
        user_op_hash: H256,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<UserOperationReceipt> {
        let outcome =
            await_inclusion(|| self.poll_once(user_op_hash), poll_interval, timeout).await;
        receipt_from_outcome(outcome, user_op_hash, timeout)
    }

    async fn poll_once(&self, user_op_hash: H256) -> Option<UserOperationReceipt> {
        match self.get_user_operation_receipt(user_op_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                // transient errors are common on free-tier bundlers; keep polling
                tracing::warn!(error = %e, "bundler receipt poll error");
                None
            }
        }
    }
}

/// Map a terminal poll outcome to the pipeline result. A receipt with
/// `success == false` means the bundle landed but the operation reverted,
/// surfaced as [`Error::ExecutionFailed`] with the receipt attached.
fn receipt_from_outcome(
    outcome: InclusionPoll,
    user_op_hash: H256,
    waited: Duration,
) -> Result<UserOperationReceipt> {
    match outcome {
        InclusionPoll::Included(receipt) if receipt.success => Ok(receipt),
        InclusionPoll::Included(receipt) => Err(Error::ExecutionFailed { receipt }),
        InclusionPoll::TimedOut => Err(Error::Timeout {
            user_op_hash,
            waited,
        }),
        InclusionPoll::Pending => unreachable!("await_inclusion only returns terminal states"),
    }
}

fn parse_u256_field(v: &Value, key: &str) -> Result<U256> {
    let s = v
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| Error::Estimation {
            context: "eth_estimateUserOperationGas",
            detail: format!("missing or invalid field {key}"),
        })?;
    parse_u256_quantity(s).map_err(|e| Error::Estimation {
        context: "eth_estimateUserOperationGas",
        detail: format!("bad quantity in {key}: {e}"),
    })
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string; some wrap
    // it in an object. Accept the shapes seen in the wild.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(Error::Submission(format!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {res}"
        )));
    };

    parse_h256(hash_str).map_err(|e| Error::Submission(format!("bad userOpHash: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn receipt(success: bool) -> UserOperationReceipt {
        UserOperationReceipt::from_json(
            parse_h256(HASH).unwrap(),
            json!({ "success": success }),
        )
    }

    #[test]
    fn parse_userop_hash_from_string() {
        let res = json!(HASH);
        let hash = parse_userop_hash(&res).unwrap();
        assert_eq!(hash, parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_result_object() {
        let res = json!({ "result": HASH });
        let hash = parse_userop_hash(&res).unwrap();
        assert_eq!(hash, parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_useroperation_hash_object() {
        let res = json!({ "userOperationHash": HASH });
        let hash = parse_userop_hash(&res).unwrap();
        assert_eq!(hash, parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_rejects_unknown_shape() {
        let res = json!({ "foo": "bar" });
        assert!(matches!(
            parse_userop_hash(&res),
            Err(Error::Submission(_))
        ));
    }

    #[test]
    fn advance_is_pending_until_receipt_or_deadline() {
        let timeout = Duration::from_secs(10);
        assert!(matches!(
            advance(Duration::from_secs(1), timeout, None),
            InclusionPoll::Pending
        ));
        assert!(matches!(
            advance(Duration::from_secs(11), timeout, None),
            InclusionPoll::TimedOut
        ));
        assert!(matches!(
            advance(Duration::from_secs(11), timeout, Some(receipt(true))),
            InclusionPoll::Included(_)
        ));
    }

    #[test]
    fn advance_with_zero_timeout_never_times_out() {
        assert!(matches!(
            advance(Duration::from_secs(3600), Duration::ZERO, None),
            InclusionPoll::Pending
        ));
    }

    #[test]
    fn successful_receipt_resolves_to_ok() {
        let hash = parse_h256(HASH).unwrap();
        let r = receipt_from_outcome(
            InclusionPoll::Included(receipt(true)),
            hash,
            Duration::from_secs(10),
        )
        .unwrap();
        assert!(r.success);
    }

    #[test]
    fn reverted_receipt_resolves_to_execution_failed() {
        let hash = parse_h256(HASH).unwrap();
        let err = receipt_from_outcome(
            InclusionPoll::Included(receipt(false)),
            hash,
            Duration::from_secs(10),
        )
        .unwrap_err();
        match err {
            Error::ExecutionFailed { receipt } => {
                assert!(!receipt.success);
                assert_eq!(receipt.user_op_hash, hash);
            }
            other => panic!("expected ExecutionFailed, got {other}"),
        }
    }

    #[test]
    fn timed_out_wait_carries_the_hash_and_deadline() {
        let hash = parse_h256(HASH).unwrap();
        let err = receipt_from_outcome(InclusionPoll::TimedOut, hash, Duration::from_secs(10))
            .unwrap_err();
        match err {
            Error::Timeout {
                user_op_hash,
                waited,
            } => {
                assert_eq!(user_op_hash, hash);
                assert_eq!(waited, Duration::from_secs(10));
            }
            other => panic!("expected Timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn inclusion_reported_on_second_poll_is_returned() {
        let polls = Cell::new(0u32);
        let outcome = await_inclusion(
            || {
                let n = polls.get() + 1;
                polls.set(n);
                async move {
                    if n >= 2 {
                        Some(receipt(true))
                    } else {
                        None
                    }
                }
            },
            Duration::from_millis(5),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(polls.get(), 2);
        match outcome {
            InclusionPoll::Included(r) => assert!(r.success),
            other => panic!("expected Included, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inclusion_never_reported_times_out() {
        let outcome = await_inclusion(
            || async { None },
            Duration::from_millis(5),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(outcome, InclusionPoll::TimedOut));
    }
}
