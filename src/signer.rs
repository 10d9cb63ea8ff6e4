use crate::error::{Error, Result};
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::{Bytes, H256, U256};

/// Raw secp256k1 signature components as returned by a signer collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignatureParts {
    pub r: U256,
    pub s: U256,
    pub y_parity: u8,
}

impl SignatureParts {
    /// 65-byte `r || s || v` layout with `v = 27 + yParity`, the format
    /// EntryPoint signature validation expects.
    pub fn to_rsv_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(65);
        let mut buf = [0u8; 32];
        self.r.to_big_endian(&mut buf);
        out.extend_from_slice(&buf);
        self.s.to_big_endian(&mut buf);
        out.extend_from_slice(&buf);
        out.push(27 + self.y_parity);
        Bytes::from(out)
    }
}

/// Capability interface over "something that can sign a 32-byte hash".
///
/// Async so that a remote or hardware signer is a drop-in replacement for the
/// in-memory key; hashing and submission logic never see the difference.
#[async_trait]
pub trait HashSigner: Send + Sync {
    async fn sign_hash(&self, hash: H256) -> Result<SignatureParts>;
}

/// Local in-memory key signer.
#[derive(Clone, Debug)]
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }
}

#[async_trait]
impl HashSigner for LocalSigner {
    async fn sign_hash(&self, hash: H256) -> Result<SignatureParts> {
        let sig = self
            .wallet
            .sign_hash(hash)
            .map_err(|e| Error::Signer(e.to_string()))?;
        Ok(SignatureParts {
            r: sig.r,
            s: sig.s,
            y_parity: (sig.v as u8).wrapping_sub(27) & 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rsv_bytes_layout() {
        let parts = SignatureParts {
            r: U256::one(),
            s: U256::from(2u64),
            y_parity: 1,
        };
        let bytes = parts.to_rsv_bytes();
        assert_eq!(bytes.len(), 65);
        assert_eq!(bytes[31], 1);
        assert_eq!(bytes[63], 2);
        assert_eq!(bytes[64], 28);
    }

    #[tokio::test]
    async fn local_signer_is_deterministic_over_a_hash() {
        let wallet = LocalWallet::from_str(
            "0x01ab6e801c06e59ca97a14fc0a1978b27fa366fc87450e0b65459dd3515b7391",
        )
        .unwrap();
        let signer = LocalSigner::new(wallet);
        let hash = H256::from_low_u64_be(42);

        let a = signer.sign_hash(hash).await.unwrap();
        let b = signer.sign_hash(hash).await.unwrap();
        assert_eq!(a, b);
        assert!(a.y_parity <= 1);
    }
}
