use crate::types::UserOperation;
use ethers::abi::{self, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::{keccak256, rlp::RlpStream};

/// EIP-7702 authorization envelope type byte.
const EIP7702_MAGIC: u8 = 0x05;

/// Canonical EIP-7702 delegation-authorization hash:
/// `keccak256(0x05 || rlp([chain_id, delegatee, nonce]))`.
///
/// Pure and deterministic. The signature over this hash is only valid for the
/// exact (chain id, nonce) pair encoded here.
pub fn delegation_authorization_hash(chain_id: u64, delegatee: Address, nonce: u64) -> H256 {
    let mut stream = RlpStream::new_list(3);
    stream.append(&U256::from(chain_id));
    stream.append(&delegatee);
    stream.append(&U256::from(nonce));
    let payload = stream.out();

    let mut pre_image = Vec::with_capacity(1 + payload.len());
    pre_image.push(EIP7702_MAGIC);
    pre_image.extend_from_slice(&payload);

    H256(keccak256(&pre_image))
}

/// Canonical EntryPoint v0.6 user-operation hash:
/// `keccak256(abi.encode(keccak256(pack(op)), entryPoint, chainId))`.
///
/// `pack(op)` covers every field except the signature, with the dynamic byte
/// fields replaced by their keccak hashes. This must match the on-chain
/// `getUserOpHash` computation byte for byte; a divergence surfaces as a
/// signature failure during on-chain validation, never locally.
pub fn user_operation_hash(op: &UserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let packed = abi::encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(op.init_code.as_ref()).to_vec()),
        Token::FixedBytes(keccak256(op.call_data.as_ref()).to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::FixedBytes(keccak256(op.paymaster_and_data.as_ref()).to_vec()),
    ]);
    let inner = keccak256(&packed);

    let outer = abi::encode(&[
        Token::FixedBytes(inner.to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]);

    H256(keccak256(&outer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;
    use std::str::FromStr;

    fn delegatee() -> Address {
        Address::from_str("0xe6Cae83BdE06E4c305530e199D7217f42808555B").unwrap()
    }

    fn entry_point() -> Address {
        Address::from_str("0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789").unwrap()
    }

    fn sample_op() -> UserOperation {
        UserOperation {
            sender: Address::from_str("0x9a7af758aE5d7B6aAE84fe4C5Ba67c041dFE5336").unwrap(),
            nonce: U256::zero(),
            init_code: Bytes::default(),
            call_data: Bytes::from(vec![0x6a, 0x62, 0x78, 0x42]),
            call_gas_limit: U256::from(100_000u64),
            verification_gas_limit: U256::from(100_000u64),
            pre_verification_gas: U256::from(21_000u64),
            max_fee_per_gas: U256::from(1_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
            eip7702_auth: None,
        }
    }

    #[test]
    fn delegation_hash_is_deterministic() {
        let a = delegation_authorization_hash(1337, delegatee(), 0);
        let b = delegation_authorization_hash(1337, delegatee(), 0);
        assert_eq!(a, b);
    }

    #[test]
    fn delegation_hash_changes_with_any_field() {
        let base = delegation_authorization_hash(1337, delegatee(), 0);
        assert_ne!(base, delegation_authorization_hash(1338, delegatee(), 0));
        assert_ne!(base, delegation_authorization_hash(1337, delegatee(), 1));
        assert_ne!(base, delegation_authorization_hash(1337, Address::zero(), 0));
    }

    #[test]
    fn user_op_hash_is_deterministic_and_nonce_sensitive() {
        let op = sample_op();
        let a = user_operation_hash(&op, entry_point(), 1337);
        assert_eq!(a, user_operation_hash(&op, entry_point(), 1337));

        let mut bumped = op.clone();
        bumped.nonce = U256::one();
        assert_ne!(a, user_operation_hash(&bumped, entry_point(), 1337));
        assert_ne!(a, user_operation_hash(&op, entry_point(), 1));
        assert_ne!(a, user_operation_hash(&op, Address::zero(), 1337));
    }

    #[test]
    fn signature_is_excluded_from_the_pre_image() {
        let unsigned = sample_op();
        let before = user_operation_hash(&unsigned, entry_point(), 1337);

        let mut signed = unsigned;
        signed.signature = Bytes::from(vec![0xab; 65]);
        let after = user_operation_hash(&signed, entry_point(), 1337);

        assert_eq!(before, after);
    }
}
