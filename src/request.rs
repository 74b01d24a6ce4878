// src/request.rs
//! Wire form of a UserOperation as wallets send it: every field optional,
//! integers as JSON numbers, hex quantities or decimal strings.
//!
//! Fields are kept as raw JSON text so integer literals wider than 64 bits
//! reach the parser with every digit intact.
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};

use crate::error::CodecError;
use crate::types::UserOperation;

type Field = Option<Box<RawValue>>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserOperationRequest {
    pub sender: Field,
    pub nonce: Field,
    pub init_code: Field,
    pub call_data: Field,
    pub call_gas_limit: Field,
    pub verification_gas_limit: Field,
    pub pre_verification_gas: Field,
    pub max_fee_per_gas: Field,
    pub max_priority_fee_per_gas: Field,
    pub paymaster_and_data: Field,
    pub signature: Field,
}

impl TryFrom<&UserOperationRequest> for UserOperation {
    type Error = CodecError;

    fn try_from(req: &UserOperationRequest) -> Result<Self, Self::Error> {
        Ok(UserOperation {
            sender: parse_address(required(&req.sender, "sender")?, "sender")?,
            nonce: parse_uint(required(&req.nonce, "nonce")?, "nonce")?,
            init_code: parse_bytes(required(&req.init_code, "initCode")?, "initCode")?,
            call_data: parse_bytes(required(&req.call_data, "callData")?, "callData")?,
            call_gas_limit: parse_uint(
                required(&req.call_gas_limit, "callGasLimit")?,
                "callGasLimit",
            )?,
            verification_gas_limit: parse_uint(
                required(&req.verification_gas_limit, "verificationGasLimit")?,
                "verificationGasLimit",
            )?,
            pre_verification_gas: parse_uint(
                required(&req.pre_verification_gas, "preVerificationGas")?,
                "preVerificationGas",
            )?,
            max_fee_per_gas: parse_uint(
                required(&req.max_fee_per_gas, "maxFeePerGas")?,
                "maxFeePerGas",
            )?,
            max_priority_fee_per_gas: parse_uint(
                required(&req.max_priority_fee_per_gas, "maxPriorityFeePerGas")?,
                "maxPriorityFeePerGas",
            )?,
            paymaster_and_data: parse_bytes(
                required(&req.paymaster_and_data, "paymasterAndData")?,
                "paymasterAndData",
            )?,
            signature: parse_bytes(required(&req.signature, "signature")?, "signature")?,
        })
    }
}

impl TryFrom<UserOperationRequest> for UserOperation {
    type Error = CodecError;

    fn try_from(req: UserOperationRequest) -> Result<Self, Self::Error> {
        UserOperation::try_from(&req)
    }
}

impl From<&UserOperation> for UserOperationRequest {
    fn from(op: &UserOperation) -> Self {
        // serializing a plain string cannot fail
        let text = |s: String| to_raw_value(&s).ok();
        let uint = |v: U256| text(format!("{v:#x}"));
        let bytes = |b: &Bytes| text(format!("0x{}", hex::encode(b)));
        Self {
            sender: text(format!("{:#x}", op.sender)),
            nonce: uint(op.nonce),
            init_code: bytes(&op.init_code),
            call_data: bytes(&op.call_data),
            call_gas_limit: uint(op.call_gas_limit),
            verification_gas_limit: uint(op.verification_gas_limit),
            pre_verification_gas: uint(op.pre_verification_gas),
            max_fee_per_gas: uint(op.max_fee_per_gas),
            max_priority_fee_per_gas: uint(op.max_priority_fee_per_gas),
            paymaster_and_data: bytes(&op.paymaster_and_data),
            signature: bytes(&op.signature),
        }
    }
}

fn required<'a>(value: &'a Field, field: &str) -> Result<&'a RawValue, CodecError> {
    match value {
        Some(v) if v.get().trim() != "null" => Ok(v),
        _ => Err(CodecError::Encoding(format!("missing field {field}"))),
    }
}

/// Unsigned 256-bit integer from a JSON number, a `0x` quantity or a decimal string.
pub fn parse_uint(value: &RawValue, field: &str) -> Result<U256, CodecError> {
    let literal = value.get().trim();
    if literal.starts_with('"') {
        let s = json_string(value, field)?;
        return parse_uint_str(s.trim(), field);
    }
    if literal.starts_with(|c: char| c == '-' || c.is_ascii_digit()) {
        // a number literal; fractions, signs and exponents fail the digit check
        return parse_uint_str(literal, field);
    }
    Err(CodecError::Encoding(format!(
        "{field} must be an integer, got {literal}"
    )))
}

fn parse_uint_str(s: &str, field: &str) -> Result<U256, CodecError> {
    if let Some(digits) = strip_hex_prefix(s) {
        if digits.is_empty() {
            return Ok(U256::zero());
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CodecError::Encoding(format!("{field} is not a hex quantity: {s}")));
        }
        let significant = digits.trim_start_matches('0');
        if significant.len() > 64 {
            return Err(CodecError::Overflow(format!("{field} exceeds 256 bits")));
        }
        if significant.is_empty() {
            return Ok(U256::zero());
        }
        return U256::from_str_radix(significant, 16)
            .map_err(|e| CodecError::Encoding(format!("{field}: {e}")));
    }

    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(CodecError::Encoding(format!(
            "{field} is not an unsigned integer: {s:?}"
        )));
    }
    U256::from_dec_str(s).map_err(|_| CodecError::Overflow(format!("{field} exceeds 256 bits")))
}

pub fn parse_address(value: &RawValue, field: &str) -> Result<Address, CodecError> {
    let bytes = decode_hex(&json_string(value, field)?, field)?;
    match bytes.len() {
        20 => Ok(Address::from_slice(&bytes)),
        n if n > 20 => Err(CodecError::Overflow(format!(
            "{field} is {n} bytes, an address is 20"
        ))),
        n => Err(CodecError::Encoding(format!(
            "{field} is {n} bytes, an address is 20"
        ))),
    }
}

pub fn parse_bytes(value: &RawValue, field: &str) -> Result<Bytes, CodecError> {
    decode_hex(&json_string(value, field)?, field).map(Bytes::from)
}

fn json_string(value: &RawValue, field: &str) -> Result<String, CodecError> {
    serde_json::from_str::<String>(value.get())
        .map_err(|_| CodecError::Encoding(format!("{field} must be a hex string")))
}

/// Quantities, addresses and byte strings share one prefix rule: `0x` or `0X`.
fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

fn decode_hex(s: &str, field: &str) -> Result<Vec<u8>, CodecError> {
    let digits = strip_hex_prefix(s)
        .ok_or_else(|| CodecError::Encoding(format!("{field} is missing the 0x prefix")))?;
    hex::decode(digits).map_err(|e| CodecError::Encoding(format!("{field}: {e}")))
}
