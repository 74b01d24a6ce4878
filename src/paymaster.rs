// src/paymaster.rs
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};
use tracing::{debug, info};

use crate::codec::{self, UserOperationCodec, MAX_UINT48};
use crate::config::PaymasterConfig;
use crate::error::PaymasterError;
use crate::nonce::NonceSource;
use crate::types::{DigestScheme, PaymasterAndData, SigningContext, UserOperation};

pub type SponsorshipFuture = Pin<Box<dyn Future<Output = Result<Bytes, PaymasterError>> + Send>>;

/// Turns a UserOperation into the paymasterAndData to attach to it. Empty
/// bytes mean the operation is not sponsored.
pub type ComputeSponsorshipData = Arc<dyn Fn(UserOperation) -> SponsorshipFuture + Send + Sync>;

pub fn is_allow_listed(allow_list: &HashSet<Address>, sender: Address) -> bool {
    allow_list.contains(&sender)
}

/// validUntil for a window opened at `now`, or `None` when it would not fit
/// in a uint48.
pub fn valid_until(now: u64, valid_for: u64) -> Option<u64> {
    now.checked_add(valid_for).filter(|t| *t <= MAX_UINT48)
}

pub struct Paymaster {
    wallet: LocalWallet,
    codec: UserOperationCodec,
    nonces: Arc<dyn NonceSource>,
    allow_list: HashSet<Address>,
    pub paymaster_address: Address,
    entry_point: Address,
    chain_id: u64,
    // Validity window
    valid_for: u64,
    valid_after: u64,
}

impl Paymaster {
    pub fn new(config: &PaymasterConfig, nonces: Arc<dyn NonceSource>) -> Result<Self, PaymasterError> {
        let wallet = codec::signing_key_from_hex(&config.signer_key)?;
        if config.valid_after > MAX_UINT48 || config.valid_for > MAX_UINT48 {
            return Err(PaymasterError::InvalidParameters(format!(
                "validity window (after {}, for {}s) exceeds uint48",
                config.valid_after, config.valid_for
            )));
        }

        info!(
            "Initialized paymaster {:?} (signer {:?}, chain {}, {:?} digest, {} allow-listed senders)",
            config.paymaster_address,
            wallet.address(),
            config.chain_id,
            config.codec.scheme,
            config.allow_list.len()
        );

        Ok(Self {
            wallet,
            codec: config.codec,
            nonces,
            allow_list: config.allow_list.clone(),
            paymaster_address: config.paymaster_address,
            entry_point: config.entry_point,
            chain_id: config.chain_id,
            valid_for: config.valid_for,
            valid_after: config.valid_after,
        })
    }

    pub fn signer_address(&self) -> Address {
        self.wallet.address()
    }

    /// Address the digest is bound to for the configured scheme.
    fn verifying_address(&self) -> Address {
        match self.codec.scheme {
            DigestScheme::LegacyPaymaster => self.paymaster_address,
            DigestScheme::EntryPoint => self.entry_point,
        }
    }

    /// paymasterAndData for `user_op`, or empty bytes when the sender is not
    /// allow-listed.
    pub async fn sponsor(&self, user_op: &UserOperation) -> Result<Bytes, PaymasterError> {
        if !is_allow_listed(&self.allow_list, user_op.sender) {
            info!("Sender {:?} is not allow-listed, not sponsoring", user_op.sender);
            return Ok(Bytes::default());
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PaymasterError::InvalidParameters(e.to_string()))?
            .as_secs();
        let valid_until = valid_until(now, self.valid_for).ok_or_else(|| {
            PaymasterError::InvalidParameters(format!(
                "validUntil {now} + {}s exceeds uint48",
                self.valid_for
            ))
        })?;

        let sender_nonce = self.nonces.sender_nonce(user_op.sender).await?;
        self.sign_user_operation(user_op, sender_nonce, valid_until)
    }

    /// Co-signs `user_op` for a fixed validity window and encodes the result.
    pub fn sign_user_operation(
        &self,
        user_op: &UserOperation,
        sender_nonce: U256,
        valid_until: u64,
    ) -> Result<Bytes, PaymasterError> {
        let context = SigningContext {
            chain_id: self.chain_id,
            verifying_address: self.verifying_address(),
            sender_nonce,
            valid_until,
            valid_after: self.valid_after,
        };

        let signature = self.codec.sign_with(user_op, &context, &self.wallet)?;
        debug!(
            "Signed userOp {:?} for {:?} (senderNonce {}, valid {}..{})",
            codec::user_op_hash(user_op, self.entry_point, self.chain_id),
            user_op.sender,
            sender_nonce,
            context.valid_after,
            context.valid_until
        );

        let paymaster_and_data = codec::encode_paymaster_and_data(&PaymasterAndData {
            paymaster: self.paymaster_address,
            valid_until,
            valid_after: self.valid_after,
            signature: Bytes::from(signature.to_vec()),
        })?;
        Ok(paymaster_and_data)
    }

    /// Exposes `sponsor` as an injectable capability.
    pub fn into_sponsorship(self: Arc<Self>) -> ComputeSponsorshipData {
        Arc::new(move |user_op: UserOperation| -> SponsorshipFuture {
            let paymaster = Arc::clone(&self);
            Box::pin(async move { paymaster.sponsor(&user_op).await })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_paymaster_and_data;
    use crate::nonce::FixedNonce;
    use crate::types::RecoveryConvention;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const SENDER: &str = "0xdA82D492a49d08cF732A47Acf34efb51BE351dd6";
    const PAYMASTER: &str = "0x34A00151460C7Bec401D3b24fE86E9C152EE8284";
    const ENTRY_POINT: &str = "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789";
    const LEGACY_SIGNATURE: &str = "983c4a78abad34f57936a38d2bd6ae60169581e50c3b45a2ce37842c5757b48439818f1b00be1899486a034fc71129fa5364527fc8f0a7b193657cd1901224351c";

    fn config(scheme: DigestScheme) -> PaymasterConfig {
        PaymasterConfig {
            signer_key: TEST_KEY.to_string(),
            chain_id: 44787,
            paymaster_address: PAYMASTER.parse().unwrap(),
            entry_point: ENTRY_POINT.parse().unwrap(),
            allow_list: HashSet::from([SENDER.parse().unwrap()]),
            codec: UserOperationCodec::new(scheme, RecoveryConvention::Offset27),
            valid_for: 600,
            valid_after: 0,
        }
    }

    fn paymaster(scheme: DigestScheme, nonce: u64) -> Paymaster {
        Paymaster::new(&config(scheme), Arc::new(FixedNonce(U256::from(nonce)))).unwrap()
    }

    fn op(sender: &str) -> UserOperation {
        UserOperation {
            sender: sender.parse().unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn allow_list_compares_addresses_not_strings() {
        let allow_list = HashSet::from([SENDER.parse().unwrap()]);
        let lower: Address = SENDER.to_lowercase().parse().unwrap();
        assert!(is_allow_listed(&allow_list, lower));
        assert!(!is_allow_listed(&allow_list, Address::repeat_byte(1)));
        assert!(!is_allow_listed(&HashSet::new(), lower));
    }

    #[test]
    fn rejects_invalid_signer_key() {
        let mut config = config(DigestScheme::LegacyPaymaster);
        config.signer_key = "0x00".to_string();
        assert!(matches!(
            Paymaster::new(&config, Arc::new(FixedNonce::default())),
            Err(PaymasterError::Codec(crate::error::CodecError::InvalidKey(_)))
        ));
    }

    #[test]
    fn paymaster_and_data_carries_golden_signature() {
        let paymaster = paymaster(DigestScheme::LegacyPaymaster, 0);
        let data = paymaster
            .sign_user_operation(&op(SENDER), U256::zero(), 1_700_000_000)
            .unwrap();
        let decoded = decode_paymaster_and_data(&data).unwrap();
        assert_eq!(decoded.paymaster, PAYMASTER.parse::<Address>().unwrap());
        assert_eq!(decoded.valid_until, 1_700_000_000);
        assert_eq!(decoded.valid_after, 0);
        assert_eq!(hex::encode(&decoded.signature), LEGACY_SIGNATURE);
    }

    #[tokio::test]
    async fn sponsors_allow_listed_sender() {
        let paymaster = paymaster(DigestScheme::EntryPoint, 4);
        let user_op = op(SENDER);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let data = paymaster.sponsor(&user_op).await.unwrap();
        let decoded = decode_paymaster_and_data(&data).unwrap();
        assert_eq!(decoded.paymaster, paymaster.paymaster_address);
        assert!(decoded.valid_until >= now + 600);
        assert!(decoded.valid_until <= now + 610);

        let context = SigningContext {
            chain_id: 44787,
            verifying_address: ENTRY_POINT.parse().unwrap(),
            sender_nonce: U256::from(4),
            valid_until: decoded.valid_until,
            valid_after: 0,
        };
        let digest = UserOperationCodec::new(DigestScheme::EntryPoint, RecoveryConvention::Offset27)
            .hash(&user_op, &context)
            .unwrap();
        let signature = ethers::types::Signature::try_from(decoded.signature.as_ref()).unwrap();
        let recovered = signature.recover(codec::personal_message_hash(digest)).unwrap();
        assert_eq!(recovered, paymaster.signer_address());
    }

    #[test]
    fn valid_until_stays_in_uint48() {
        assert_eq!(valid_until(1_700_000_000, 600), Some(1_700_000_600));
        assert_eq!(valid_until(MAX_UINT48 - 600, 600), Some(MAX_UINT48));
        assert_eq!(valid_until(MAX_UINT48 - 599, 600), None);
        assert_eq!(valid_until(1, u64::MAX), None);
    }

    #[test]
    fn rejects_window_beyond_uint48() {
        let mut config = config(DigestScheme::LegacyPaymaster);
        config.valid_for = u64::MAX;
        assert!(matches!(
            Paymaster::new(&config, Arc::new(FixedNonce::default())),
            Err(PaymasterError::InvalidParameters(_))
        ));

        let mut config = self::config(DigestScheme::LegacyPaymaster);
        config.valid_after = MAX_UINT48 + 1;
        assert!(matches!(
            Paymaster::new(&config, Arc::new(FixedNonce::default())),
            Err(PaymasterError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn window_ending_past_uint48_is_a_server_error() {
        let mut config = config(DigestScheme::LegacyPaymaster);
        config.valid_for = MAX_UINT48;
        let paymaster = Paymaster::new(&config, Arc::new(FixedNonce::default())).unwrap();
        let err = paymaster.sponsor(&op(SENDER)).await.unwrap_err();
        assert!(matches!(err, PaymasterError::InvalidParameters(_)));
        assert!(!err.is_invalid_input());
    }

    #[tokio::test]
    async fn ignores_unknown_sender() {
        let paymaster = paymaster(DigestScheme::LegacyPaymaster, 0);
        let data = paymaster
            .sponsor(&op("0x0000000000000000000000000000000000000001"))
            .await
            .unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn sponsorship_capability_delegates_to_paymaster() {
        let sponsorship = Arc::new(paymaster(DigestScheme::LegacyPaymaster, 0)).into_sponsorship();
        let data = sponsorship(op(SENDER)).await.unwrap();
        assert_eq!(data.len(), 20 + 64 + 65);
        assert!(sponsorship(op("0x0000000000000000000000000000000000000002"))
            .await
            .unwrap()
            .is_empty());
    }
}
