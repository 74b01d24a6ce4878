// src/nonce.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use tracing::debug;

use crate::error::PaymasterError;

abigen!(
    VerifyingPaymaster,
    r#"[
        function senderNonce(address) external view returns (uint256)
    ]"#,
);

/// Source of the paymaster scoped nonce of a sender.
#[async_trait]
pub trait NonceSource: Send + Sync {
    async fn sender_nonce(&self, sender: Address) -> Result<U256, PaymasterError>;
}

/// Reads `senderNonce(sender)` from the deployed paymaster.
pub struct OnChainNonce {
    contract: VerifyingPaymaster<Provider<Http>>,
}

impl OnChainNonce {
    pub fn new(paymaster: Address, eth_rpc_url: &str) -> Result<Self, PaymasterError> {
        let provider = Provider::<Http>::try_from(eth_rpc_url)
            .map_err(|e| PaymasterError::InvalidParameters(e.to_string()))?;
        Ok(Self {
            contract: VerifyingPaymaster::new(paymaster, Arc::new(provider)),
        })
    }
}

#[async_trait]
impl NonceSource for OnChainNonce {
    async fn sender_nonce(&self, sender: Address) -> Result<U256, PaymasterError> {
        let nonce = self
            .contract
            .sender_nonce(sender)
            .call()
            .await
            .map_err(|e| PaymasterError::NonceSource(e.to_string()))?;
        debug!("senderNonce({:?}) = {}", sender, nonce);
        Ok(nonce)
    }
}

/// Always reports the same nonce.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedNonce(pub U256);

#[async_trait]
impl NonceSource for FixedNonce {
    async fn sender_nonce(&self, _sender: Address) -> Result<U256, PaymasterError> {
        Ok(self.0)
    }
}
