use crate::types::UserOperationReceipt;
use ethers::types::H256;
use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for the user-operation pipeline.
///
/// Every variant carries enough detail for the caller to decide retry vs
/// abort:
/// - `Encoding` is local and non-retryable (bad inputs).
/// - `Estimation` is a node/bundler/paymaster query failure, retryable.
/// - `SponsorshipDenied` is a policy-level rejection; the caller picks a
///   different policy or proceeds unsponsored.
/// - `Submission` means the bundler rejected the operation; not retryable
///   without modifying it.
/// - `Timeout` means inclusion was not observed in time; the operation stays
///   queryable under the same hash, so re-polling is valid.
/// - `ExecutionFailed` is an on-chain revert after bundler acceptance;
///   terminal, with the full receipt attached.
#[derive(Error, Debug)]
pub enum Error {
    #[error("abi encoding failed: {0}")]
    Encoding(String),

    #[error("estimation query failed ({context}): {detail}")]
    Estimation {
        context: &'static str,
        detail: String,
    },

    #[error("paymaster denied sponsorship under policy {policy_id:?}: {reason}")]
    SponsorshipDenied {
        policy_id: String,
        code: Option<i64>,
        reason: String,
    },

    #[error("bundler rejected user operation: {0}")]
    Submission(String),

    #[error("user operation {user_op_hash:?} not included within {waited:?}")]
    Timeout { user_op_hash: H256, waited: Duration },

    #[error("user operation reverted on-chain (tx {tx:?})", tx = .receipt.transaction_hash)]
    ExecutionFailed { receipt: UserOperationReceipt },

    #[error("signer failed: {0}")]
    Signer(String),
}

pub type Result<T> = std::result::Result<T, Error>;
