// src/lib.rs
//! Allow-list paymaster co-signer for ERC-4337 UserOperations.
//!
//! [`codec`] reproduces the ABI encoding and digest the verifying paymaster
//! checks on-chain; [`paymaster`] decides which senders get sponsored and
//! builds their paymasterAndData; [`rpc`] serves that over JSON-RPC.
pub mod codec;
pub mod config;
pub mod error;
pub mod nonce;
pub mod paymaster;
pub mod request;
pub mod rpc;
pub mod types;

pub use codec::UserOperationCodec;
pub use error::{CodecError, PaymasterError};
pub use types::{DigestScheme, RecoveryConvention, SigningContext, UserOperation};
