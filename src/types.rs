// src/types.rs
use clap::ValueEnum;
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// ERC-4337 UserOperation (EntryPoint v0.6 layout). Field order matches the
/// Solidity struct and must not change.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// Which on-chain verifier the digest is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DigestScheme {
    /// Verifying paymaster that hashes the truncated packed op together with
    /// the paymaster address.
    #[default]
    LegacyPaymaster,
    /// Verifier keyed by the EntryPoint address, hashing the digest-mode
    /// encoding first.
    EntryPoint,
}

/// How `v` is reported in the 65 byte signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryConvention {
    /// 27 / 28, what `ecrecover` expects.
    #[default]
    Offset27,
    /// 0 / 1
    Raw,
}

/// Context fields mixed into the sponsorship digest. Built fresh for every
/// signing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub chain_id: u64,
    /// Paymaster address for `LegacyPaymaster`, EntryPoint address for `EntryPoint`.
    pub verifying_address: Address,
    /// Paymaster scoped nonce of the sender, not `UserOperation::nonce`.
    pub sender_nonce: U256,
    pub valid_until: u64,
    pub valid_after: u64,
}

/// Decoded form of the paymasterAndData field produced by this paymaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterAndData {
    pub paymaster: Address,
    pub valid_until: u64,
    pub valid_after: u64,
    pub signature: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterResponse {
    pub paymaster_and_data: Bytes,
}
