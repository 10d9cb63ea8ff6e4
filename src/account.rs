use crate::bundler::BundlerClient;
use crate::codec::{self, function_selector};
use crate::encoding;
use crate::error::{Error, Result};
use crate::types::{Call, DelegationAuthorization, UserOperation, UserOperationReceipt};
use ethers::abi::{AbiParser, Token};
use ethers::contract::Contract;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes, H160, H256, U256};
use std::sync::Arc;
use std::time::Duration;

/// Simple7702 delegatee: the contract whose code the upgraded EOA runs under.
pub const DEFAULT_DELEGATEE_ADDRESS: Address = H160([
    0xe6, 0xca, 0xe8, 0x3b, 0xde, 0x06, 0xe4, 0xc3, 0x05, 0x53, 0x0e, 0x19, 0x9d, 0x72, 0x17,
    0xf4, 0x28, 0x08, 0x55, 0x5b,
]);

/// EntryPoint v0.6 (same address on most chains).
pub const DEFAULT_ENTRYPOINT_ADDRESS: Address = H160([
    0x5f, 0xf1, 0x37, 0xd4, 0xb0, 0xfd, 0xcd, 0x49, 0xdc, 0xa3, 0x0c, 0x7c, 0xf5, 0x7e, 0x57,
    0x8a, 0x02, 0x6d, 0x27, 0x89,
]);

const EXECUTE_SIG: &str = "execute(address,uint256,bytes)";
const EXECUTE_BATCH_SIG: &str = "executeBatch((address,uint256,bytes)[])";

/// An EOA being upgraded into a smart account via EIP-7702 delegation.
///
/// Unlike factory-deployed 4337 accounts there is no counterfactual address
/// derivation here: the upgraded account *is* the owner EOA.
#[derive(Clone, Debug)]
pub struct Simple7702Account {
    owner: Address,
    entry_point: Address,
    delegatee: Address,
}

/// Options for [`Simple7702Account::create_user_operation`].
#[derive(Clone, Debug)]
pub struct CreateUserOperationOptions {
    /// Intent to attach an EIP-7702 authorization for this chain. Installs an
    /// unsigned placeholder tuple so bundler gas estimation accounts for the
    /// delegation; the real tuple replaces it later.
    pub eip7702_auth: Option<Eip7702AuthIntent>,
    /// Fee multiplier in basis points applied to the node gas price
    /// (15000 = 1.5x).
    pub gas_multiplier_bps: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct Eip7702AuthIntent {
    pub chain_id: u64,
}

impl Default for CreateUserOperationOptions {
    fn default() -> Self {
        Self {
            eip7702_auth: None,
            gas_multiplier_bps: 10_000,
        }
    }
}

/// Handle returned by a successful submission; `included` awaits the receipt.
#[derive(Debug, Clone)]
pub struct SendUserOperationResponse {
    pub user_operation_hash: H256,
    bundler: BundlerClient,
}

impl SendUserOperationResponse {
    pub async fn included(
        &self,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<UserOperationReceipt> {
        self.bundler
            .wait_user_operation_receipt(self.user_operation_hash, poll_interval, timeout)
            .await
    }
}

impl Simple7702Account {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            entry_point: DEFAULT_ENTRYPOINT_ADDRESS,
            delegatee: DEFAULT_DELEGATEE_ADDRESS,
        }
    }

    /// Account address of the upgraded EOA (identical to the owner address).
    pub fn address(&self) -> Address {
        self.owner
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn delegatee(&self) -> Address {
        self.delegatee
    }

    /// Build an unsigned user operation for `calls`.
    ///
    /// Queries the EntryPoint nonce and gas price from the node and the gas
    /// limits from the bundler; aggregates the calls into a single
    /// `execute`/`executeBatch` payload. The signature field holds a 65-byte
    /// stub until the real signature is attached.
    pub async fn create_user_operation(
        &self,
        calls: &[Call],
        node_url: &str,
        bundler_url: &str,
        options: &CreateUserOperationOptions,
    ) -> Result<UserOperation> {
        let provider = Provider::<Http>::try_from(node_url)
            .map_err(|e| est("node provider", e))?
            .interval(Duration::from_millis(350));
        let client = Arc::new(provider);

        let nonce = self.entry_point_nonce(client.clone()).await?;

        let gas_price = client
            .get_gas_price()
            .await
            .map_err(|e| est("eth_gasPrice", e))?;
        let bps = options.gas_multiplier_bps.max(1);
        let max_priority_fee_per_gas = gas_price * U256::from(bps) / U256::from(10_000u64);
        let max_fee_per_gas = max_priority_fee_per_gas;

        let call_data = batch_call_data(calls)?;

        let mut op = UserOperation {
            sender: self.owner,
            nonce,
            init_code: Bytes::default(),
            call_data,
            call_gas_limit: U256::zero(),
            verification_gas_limit: U256::zero(),
            pre_verification_gas: U256::zero(),
            max_fee_per_gas,
            max_priority_fee_per_gas,
            paymaster_and_data: Bytes::default(),
            signature: Bytes::from(vec![0u8; 65]),
            eip7702_auth: None,
        };

        if let Some(intent) = options.eip7702_auth {
            op.eip7702_auth = Some(DelegationAuthorization::placeholder(
                intent.chain_id,
                self.delegatee,
            ));
        }

        let bundler = BundlerClient::new(bundler_url.to_string());
        let gas = bundler
            .estimate_user_operation_gas(encoding::user_op_to_json(&op), self.entry_point)
            .await?;
        op.call_gas_limit = gas.call_gas_limit;
        op.verification_gas_limit = gas.verification_gas_limit;
        op.pre_verification_gas = gas.pre_verification_gas;

        Ok(op)
    }

    /// Current transaction count of the delegator EOA, the nonce that goes
    /// into the authorization tuple.
    pub async fn delegator_nonce(&self, node_url: &str) -> Result<u64> {
        let provider =
            Provider::<Http>::try_from(node_url).map_err(|e| est("node provider", e))?;
        let nonce = provider
            .get_transaction_count(self.owner, None)
            .await
            .map_err(|e| est("eth_getTransactionCount", e))?;
        Ok(nonce.as_u64())
    }

    /// Submit a fully signed operation; the returned handle exposes the
    /// inclusion wait.
    pub async fn send_user_operation(
        &self,
        op: &UserOperation,
        bundler_url: &str,
    ) -> Result<SendUserOperationResponse> {
        let bundler = BundlerClient::new(bundler_url.to_string());
        let user_operation_hash = bundler
            .send_user_operation(encoding::user_op_to_json(op), self.entry_point)
            .await?;
        Ok(SendUserOperationResponse {
            user_operation_hash,
            bundler,
        })
    }

    async fn entry_point_nonce<M: Middleware + 'static>(&self, client: Arc<M>) -> Result<U256> {
        let abi = AbiParser::default()
            .parse(&["function getNonce(address sender, uint192 key) view returns (uint256)"])
            .map_err(|e| est("entryPoint.getNonce", e))?;
        let entry_point = Contract::new(self.entry_point, abi, client);

        let nonce: U256 = entry_point
            .method("getNonce", (self.owner, U256::zero()))
            .map_err(|e| est("entryPoint.getNonce", e))?
            .call()
            .await
            .map_err(|e| est("entryPoint.getNonce", e))?;
        Ok(nonce)
    }
}

/// Overwrite the operation's authorization tuple. Pure assignment: applying a
/// second authorization replaces the first, never merges.
pub fn attach_delegation_authorization(op: &mut UserOperation, auth: DelegationAuthorization) {
    op.eip7702_auth = Some(auth);
}

/// Aggregate calls into one account-call payload: `execute` for a single
/// call, `executeBatch` over (target, value, data) tuples otherwise.
pub fn batch_call_data(calls: &[Call]) -> Result<Bytes> {
    match calls {
        [] => Err(Error::Encoding(
            "cannot build a user operation from an empty call list".to_string(),
        )),
        [call] => codec::create_call_data(
            function_selector(EXECUTE_SIG),
            &["address", "uint256", "bytes"],
            vec![
                Token::Address(call.to),
                Token::Uint(call.value),
                Token::Bytes(call.data.to_vec()),
            ],
        ),
        many => {
            let tuples = many
                .iter()
                .map(|c| {
                    Token::Tuple(vec![
                        Token::Address(c.to),
                        Token::Uint(c.value),
                        Token::Bytes(c.data.to_vec()),
                    ])
                })
                .collect();
            codec::create_call_data(
                function_selector(EXECUTE_BATCH_SIG),
                &["(address,uint256,bytes)[]"],
                vec![Token::Array(tuples)],
            )
        }
    }
}

fn est(context: &'static str, e: impl std::fmt::Display) -> Error {
    Error::Estimation {
        context,
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{self, ParamType};
    use std::str::FromStr;

    fn nft() -> Address {
        Address::from_str("0x9a7af758aE5d7B6aAE84fe4C5Ba67c041dFE5336").unwrap()
    }

    #[test]
    fn account_address_is_the_owner_eoa() {
        let owner = Address::from_str("0x742d35Cc6634C0532925a3b844Bc9e7595f4e123").unwrap();
        let account = Simple7702Account::new(owner);
        assert_eq!(account.address(), owner);
        assert_eq!(account.entry_point(), DEFAULT_ENTRYPOINT_ADDRESS);
        assert_eq!(account.delegatee(), DEFAULT_DELEGATEE_ADDRESS);
    }

    #[test]
    fn attaching_twice_keeps_only_the_latest_authorization() {
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

        let first = DelegationAuthorization {
            chain_id: 1337,
            address: DEFAULT_DELEGATEE_ADDRESS,
            nonce: 0,
            y_parity: 0,
            r: U256::one(),
            s: U256::one(),
        };
        let second = DelegationAuthorization {
            nonce: 7,
            y_parity: 1,
            ..first.clone()
        };

        attach_delegation_authorization(&mut op, first);
        attach_delegation_authorization(&mut op, second.clone());
        assert_eq!(op.eip7702_auth, Some(second));
    }

    #[test]
    fn single_call_payload_decodes_back_to_the_mint_call() {
        let account_addr = Address::from_str("0x742d35Cc6634C0532925a3b844Bc9e7595f4e123").unwrap();
        let mint_data = codec::create_call_data(
            function_selector("mint(address)"),
            &["address"],
            vec![Token::Address(account_addr)],
        )
        .unwrap();

        let call = Call::new(nft(), U256::zero(), mint_data.clone());
        let payload = batch_call_data(std::slice::from_ref(&call)).unwrap();

        assert_eq!(&payload[..4], &function_selector(EXECUTE_SIG));
        let decoded = abi::decode(
            &[ParamType::Address, ParamType::Uint(256), ParamType::Bytes],
            &payload[4..],
        )
        .unwrap();
        assert_eq!(decoded[0], Token::Address(nft()));
        assert_eq!(decoded[1], Token::Uint(U256::zero()));
        assert_eq!(decoded[2], Token::Bytes(mint_data.to_vec()));

        // The inner bytes still carry the original selector + argument.
        let inner = mint_data.to_vec();
        assert_eq!(&inner[..4], &function_selector("mint(address)"));
        let inner_args = abi::decode(&[ParamType::Address], &inner[4..]).unwrap();
        assert_eq!(inner_args[0], Token::Address(account_addr));
    }

    #[test]
    fn multiple_calls_aggregate_into_execute_batch() {
        let calls = vec![
            Call::new(nft(), U256::zero(), Bytes::from(vec![0x01])),
            Call::new(Address::zero(), U256::from(5u64), Bytes::from(vec![0x02, 0x03])),
        ];
        let payload = batch_call_data(&calls).unwrap();

        assert_eq!(&payload[..4], &function_selector(EXECUTE_BATCH_SIG));
        let tuple_ty = ParamType::Tuple(vec![
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Bytes,
        ]);
        let decoded =
            abi::decode(&[ParamType::Array(Box::new(tuple_ty))], &payload[4..]).unwrap();
        match &decoded[0] {
            Token::Array(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(
                    items[1],
                    Token::Tuple(vec![
                        Token::Address(Address::zero()),
                        Token::Uint(U256::from(5u64)),
                        Token::Bytes(vec![0x02, 0x03]),
                    ])
                );
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn empty_call_list_is_rejected() {
        assert!(matches!(batch_call_data(&[]), Err(Error::Encoding(_))));
    }
}
