// src/codec.rs
//! ABI encoding, hashing and co-signing of UserOperations.
//!
//! Everything here is a pure function of its inputs, so the codec can be
//! shared freely between threads without locking.
use ethers::abi::{self, Token};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::keccak256;

use crate::error::CodecError;
use crate::types::{
    DigestScheme, PaymasterAndData, RecoveryConvention, SigningContext, UserOperation,
};

/// Header of a personal message whose body is a 32 byte digest.
pub const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

pub const MAX_UINT48: u64 = (1 << 48) - 1;

/// validUntil baked into the placeholder paymasterAndData.
const DUMMY_VALID_UNTIL: u64 = 0x0101_0101_0101;

/// Whether the dynamic tails of paymasterAndData and signature stay in the
/// FULL encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    Keep,
    /// Drop the length slots and padded data of the last two dynamic fields.
    /// Their head offsets stay untouched.
    Truncate,
}

/// Stand-ins for paymasterAndData and signature while the real values are
/// still unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl Default for Placeholders {
    fn default() -> Self {
        let signature = Bytes::from(vec![0x01; 65]);
        let paymaster_and_data = PaymasterAndData {
            paymaster: Address::repeat_byte(0x01),
            valid_until: DUMMY_VALID_UNTIL,
            valid_after: 0,
            signature: signature.clone(),
        };
        Self {
            paymaster_and_data: pack_paymaster_and_data(&paymaster_and_data),
            signature,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EncodeMode<'a> {
    /// Dynamic fields replaced by their keccak256, signature left out.
    Digest,
    /// Dynamic fields inlined. With `placeholders` set they replace the op's
    /// own paymasterAndData and signature.
    Full {
        placeholders: Option<&'a Placeholders>,
        tail: Tail,
    },
}

/// ABI encodes `op` in the requested layout.
pub fn encode(op: &UserOperation, mode: EncodeMode<'_>) -> Bytes {
    match mode {
        EncodeMode::Digest => abi::encode(&[
            Token::Address(op.sender),
            Token::Uint(op.nonce),
            Token::FixedBytes(keccak256(&op.init_code).to_vec()),
            Token::FixedBytes(keccak256(&op.call_data).to_vec()),
            Token::Uint(op.call_gas_limit),
            Token::Uint(op.verification_gas_limit),
            Token::Uint(op.pre_verification_gas),
            Token::Uint(op.max_fee_per_gas),
            Token::Uint(op.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
        ])
        .into(),
        EncodeMode::Full { placeholders, tail } => {
            let (paymaster_and_data, signature) = match placeholders {
                Some(p) => (&p.paymaster_and_data, &p.signature),
                None => (&op.paymaster_and_data, &op.signature),
            };
            let mut encoded = abi::encode(&[
                Token::Address(op.sender),
                Token::Uint(op.nonce),
                Token::Bytes(op.init_code.to_vec()),
                Token::Bytes(op.call_data.to_vec()),
                Token::Uint(op.call_gas_limit),
                Token::Uint(op.verification_gas_limit),
                Token::Uint(op.pre_verification_gas),
                Token::Uint(op.max_fee_per_gas),
                Token::Uint(op.max_priority_fee_per_gas),
                Token::Bytes(paymaster_and_data.to_vec()),
                Token::Bytes(signature.to_vec()),
            ]);
            if tail == Tail::Truncate {
                // the two trailing dynamic fields are always encoded last
                let cut = dynamic_tail_len(paymaster_and_data.len())
                    + dynamic_tail_len(signature.len());
                encoded.truncate(encoded.len() - cut);
            }
            encoded.into()
        }
    }
}

/// Bytes a dynamic `bytes` value adds after the head: length slot plus data
/// padded to a 32 byte boundary.
pub fn dynamic_tail_len(len: usize) -> usize {
    32 + len.div_ceil(32) * 32
}

/// Canonical ERC-4337 v0.6 userOpHash.
pub fn user_op_hash(op: &UserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let inner = keccak256(encode(op, EncodeMode::Digest));
    let encoded = abi::encode(&[
        Token::FixedBytes(inner.to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]);
    H256(keccak256(encoded))
}

/// keccak256 of the personal-message framed digest.
pub fn personal_message_hash(digest: H256) -> H256 {
    let mut message = Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + 32);
    message.extend_from_slice(PERSONAL_MESSAGE_PREFIX);
    message.extend_from_slice(digest.as_bytes());
    H256(keccak256(message))
}

/// Parses a raw secp256k1 private key.
pub fn signing_key(bytes: &[u8]) -> Result<LocalWallet, CodecError> {
    if bytes.len() != 32 {
        return Err(CodecError::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    if bytes.iter().all(|b| *b == 0) {
        return Err(CodecError::InvalidKey("key is zero".to_string()));
    }
    LocalWallet::from_bytes(bytes).map_err(|e| CodecError::InvalidKey(e.to_string()))
}

/// Parses a hex encoded private key, `0x` prefix optional.
pub fn signing_key_from_hex(key: &str) -> Result<LocalWallet, CodecError> {
    let key = key.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);
    let bytes = hex::decode(key).map_err(|_| CodecError::InvalidKey("not valid hex".to_string()))?;
    signing_key(&bytes)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserOperationCodec {
    pub scheme: DigestScheme,
    pub recovery: RecoveryConvention,
}

impl UserOperationCodec {
    pub const fn new(scheme: DigestScheme, recovery: RecoveryConvention) -> Self {
        Self { scheme, recovery }
    }

    /// Digest the on-chain verifier recomputes for `op` under `context`.
    pub fn hash(&self, op: &UserOperation, context: &SigningContext) -> Result<H256, CodecError> {
        let valid_until = uint48(context.valid_until, "validUntil")?;
        let valid_after = uint48(context.valid_after, "validAfter")?;

        let encoded = match self.scheme {
            DigestScheme::LegacyPaymaster => {
                let placeholders = Placeholders::default();
                let packed = encode(
                    op,
                    EncodeMode::Full {
                        placeholders: Some(&placeholders),
                        tail: Tail::Truncate,
                    },
                );
                abi::encode(&[
                    Token::Bytes(packed.to_vec()),
                    Token::Uint(U256::from(context.chain_id)),
                    Token::Address(context.verifying_address),
                    Token::Uint(context.sender_nonce),
                    Token::Uint(valid_until),
                    Token::Uint(valid_after),
                ])
            }
            DigestScheme::EntryPoint => {
                let inner = keccak256(encode(op, EncodeMode::Digest));
                abi::encode(&[
                    Token::FixedBytes(inner.to_vec()),
                    Token::Address(context.verifying_address),
                    Token::Uint(U256::from(context.chain_id)),
                    Token::Uint(context.sender_nonce),
                    Token::Uint(valid_until),
                    Token::Uint(valid_after),
                ])
            }
        };

        Ok(H256(keccak256(encoded)))
    }

    /// Signs `op` with a raw private key.
    pub fn sign(
        &self,
        op: &UserOperation,
        context: &SigningContext,
        key: &[u8],
    ) -> Result<Signature, CodecError> {
        let wallet = signing_key(key)?;
        self.sign_with(op, context, &wallet)
    }

    /// Signs `op` with an already parsed key.
    pub fn sign_with(
        &self,
        op: &UserOperation,
        context: &SigningContext,
        wallet: &LocalWallet,
    ) -> Result<Signature, CodecError> {
        let digest = self.hash(op, context)?;
        let mut signature = wallet
            .sign_hash(personal_message_hash(digest))
            .map_err(|e| CodecError::InvalidKey(e.to_string()))?;

        if self.recovery == RecoveryConvention::Raw && signature.v >= 27 {
            signature.v -= 27;
        }
        Ok(signature)
    }
}

/// `paymaster ‖ abi.encode(uint48 validUntil, uint48 validAfter) ‖ signature`
pub fn encode_paymaster_and_data(data: &PaymasterAndData) -> Result<Bytes, CodecError> {
    uint48(data.valid_until, "validUntil")?;
    uint48(data.valid_after, "validAfter")?;
    Ok(pack_paymaster_and_data(data))
}

fn pack_paymaster_and_data(data: &PaymasterAndData) -> Bytes {
    let mut out = Vec::with_capacity(20 + 64 + data.signature.len());
    out.extend_from_slice(data.paymaster.as_bytes());
    out.extend_from_slice(&abi::encode(&[
        Token::Uint(U256::from(data.valid_until)),
        Token::Uint(U256::from(data.valid_after)),
    ]));
    out.extend_from_slice(&data.signature);
    out.into()
}

pub fn decode_paymaster_and_data(bytes: &[u8]) -> Result<PaymasterAndData, CodecError> {
    if bytes.len() < 84 {
        return Err(CodecError::Encoding(format!(
            "paymasterAndData too short: {} bytes",
            bytes.len()
        )));
    }
    let paymaster = Address::from_slice(&bytes[..20]);
    let valid_until = slot_to_uint48(&bytes[20..52], "validUntil")?;
    let valid_after = slot_to_uint48(&bytes[52..84], "validAfter")?;
    Ok(PaymasterAndData {
        paymaster,
        valid_until,
        valid_after,
        signature: Bytes::from(bytes[84..].to_vec()),
    })
}

fn uint48(value: u64, field: &str) -> Result<U256, CodecError> {
    if value > MAX_UINT48 {
        return Err(CodecError::Overflow(format!("{field} {value} exceeds uint48")));
    }
    Ok(U256::from(value))
}

fn slot_to_uint48(slot: &[u8], field: &str) -> Result<u64, CodecError> {
    let value = U256::from_big_endian(slot);
    if value > U256::from(MAX_UINT48) {
        return Err(CodecError::Overflow(format!("{field} exceeds uint48")));
    }
    Ok(value.as_u64())
}
