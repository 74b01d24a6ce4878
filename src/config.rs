// src/config.rs
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, ensure, Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::Address;

use crate::codec::{UserOperationCodec, MAX_UINT48};
use crate::types::{DigestScheme, RecoveryConvention};

pub const DEFAULT_CHAIN_ID: u64 = 44787;
pub const DEFAULT_PAYMASTER: &str = "0x34A00151460C7Bec401D3b24fE86E9C152EE8284";
pub const DEFAULT_ENTRY_POINT: &str = "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789";
pub const DEFAULT_ALLOW_LIST: &str = "0xdA82D492a49d08cF732A47Acf34efb51BE351dd6";

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Private key of the paymaster owner
    #[clap(long, env = "SIGNER_KEY", hide_env_values = true)]
    pub signer_key: String,

    #[clap(long, env = "CHAIN_ID", default_value_t = DEFAULT_CHAIN_ID)]
    pub chain_id: u64,

    #[clap(long, env = "PAYMASTER_ADDRESS", default_value = DEFAULT_PAYMASTER)]
    pub paymaster_address: String,

    #[clap(long, env = "ENTRY_POINT", default_value = DEFAULT_ENTRY_POINT)]
    pub entry_point: String,

    /// Senders eligible for sponsorship, comma separated
    #[clap(long, env = "ALLOW_LIST", value_delimiter = ',', default_value = DEFAULT_ALLOW_LIST)]
    pub allow_list: Vec<String>,

    #[clap(long, value_enum, default_value_t = DigestScheme::LegacyPaymaster)]
    pub digest_scheme: DigestScheme,

    #[clap(long, value_enum, default_value_t = RecoveryConvention::Offset27)]
    pub recovery: RecoveryConvention,

    /// Seconds a sponsorship stays valid
    #[clap(long, default_value_t = 600)]
    pub valid_for: u64,

    #[clap(long, default_value_t = 0)]
    pub valid_after: u64,

    #[clap(long, default_value = "info")]
    pub log_level: tracing::Level,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the JSON-RPC sponsorship server
    Serve {
        #[clap(short, long, default_value = "127.0.0.1:8545")]
        rpc_server_addr: SocketAddr,

        /// Node used to read senderNonce from the paymaster
        #[clap(short, long, env = "ETH_RPC_URL")]
        eth_rpc_url: Option<String>,

        /// senderNonce used when no node is configured
        #[clap(long, default_value_t = 0)]
        sender_nonce: u64,
    },
    /// Sign a UserOperation read from a JSON file and print its paymasterAndData
    Sign {
        #[clap(long)]
        user_op: PathBuf,

        #[clap(long, default_value_t = 0)]
        sender_nonce: u64,

        /// Defaults to now + valid-for
        #[clap(long)]
        valid_until: Option<u64>,
    },
}

/// Validated settings shared by both subcommands.
#[derive(Clone)]
pub struct PaymasterConfig {
    pub signer_key: String,
    pub chain_id: u64,
    pub paymaster_address: Address,
    pub entry_point: Address,
    pub allow_list: HashSet<Address>,
    pub codec: UserOperationCodec,
    pub valid_for: u64,
    pub valid_after: u64,
}

impl fmt::Debug for PaymasterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymasterConfig")
            .field("signer_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("paymaster_address", &self.paymaster_address)
            .field("entry_point", &self.entry_point)
            .field("allow_list", &self.allow_list)
            .field("codec", &self.codec)
            .field("valid_for", &self.valid_for)
            .field("valid_after", &self.valid_after)
            .finish()
    }
}

impl TryFrom<&Args> for PaymasterConfig {
    type Error = anyhow::Error;

    fn try_from(args: &Args) -> Result<Self> {
        let paymaster_address =
            parse_addr(&args.paymaster_address).context("invalid paymaster address")?;
        let entry_point = parse_addr(&args.entry_point).context("invalid entry point address")?;

        let allow_list = args
            .allow_list
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| parse_addr(s).with_context(|| format!("invalid allow-list entry {s}")))
            .collect::<Result<HashSet<_>>>()?;

        // validAfter and validUntil are signed as uint48
        ensure!(
            args.valid_after <= MAX_UINT48,
            "valid-after {} exceeds the uint48 range",
            args.valid_after
        );
        ensure!(
            args.valid_for <= MAX_UINT48,
            "valid-for {} exceeds the uint48 range",
            args.valid_for
        );

        Ok(Self {
            signer_key: args.signer_key.clone(),
            chain_id: args.chain_id,
            paymaster_address,
            entry_point,
            allow_list,
            codec: UserOperationCodec::new(args.digest_scheme, args.recovery),
            valid_for: args.valid_for,
            valid_after: args.valid_after,
        })
    }
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn defaults_target_alfajores_allow_list_paymaster() {
        let args = Args::try_parse_from(["allowlist-paymaster", "--signer-key", KEY, "serve"]).unwrap();
        let config = PaymasterConfig::try_from(&args).unwrap();

        assert_eq!(config.chain_id, 44787);
        assert_eq!(config.paymaster_address, DEFAULT_PAYMASTER.parse::<Address>().unwrap());
        assert_eq!(config.entry_point, DEFAULT_ENTRY_POINT.parse::<Address>().unwrap());
        assert_eq!(config.allow_list, HashSet::from([DEFAULT_ALLOW_LIST.parse::<Address>().unwrap()]));
        assert_eq!(config.codec.scheme, DigestScheme::LegacyPaymaster);
        assert_eq!(config.codec.recovery, RecoveryConvention::Offset27);
        assert_eq!(config.valid_for, 600);
        assert!(matches!(args.command, Command::Serve { eth_rpc_url: None, sender_nonce: 0, .. }));
    }

    #[test]
    fn parses_allow_list_and_scheme() {
        let args = Args::try_parse_from([
            "allowlist-paymaster",
            "--signer-key",
            KEY,
            "--allow-list",
            "0x0000000000000000000000000000000000000001, 0x0000000000000000000000000000000000000002,0x0000000000000000000000000000000000000001",
            "--digest-scheme",
            "entry-point",
            "--recovery",
            "raw",
            "sign",
            "--user-op",
            "op.json",
        ])
        .unwrap();
        let config = PaymasterConfig::try_from(&args).unwrap();
        assert_eq!(config.allow_list.len(), 2);
        assert_eq!(config.codec.scheme, DigestScheme::EntryPoint);
        assert_eq!(config.codec.recovery, RecoveryConvention::Raw);
    }

    #[test]
    fn rejects_bad_allow_list_entry() {
        let args = Args::try_parse_from([
            "allowlist-paymaster",
            "--signer-key",
            KEY,
            "--allow-list",
            "0x1234",
            "serve",
        ])
        .unwrap();
        assert!(PaymasterConfig::try_from(&args).is_err());
    }

    #[test]
    fn rejects_validity_window_beyond_uint48() {
        let parse = |flag: &str, value: &str| {
            let args =
                Args::try_parse_from(["allowlist-paymaster", "--signer-key", KEY, flag, value, "serve"])
                    .unwrap();
            PaymasterConfig::try_from(&args)
        };

        assert!(parse("--valid-for", "281474976710656").is_err());
        assert!(parse("--valid-after", "281474976710656").is_err());
        assert_eq!(parse("--valid-after", "281474976710655").unwrap().valid_after, MAX_UINT48);
        assert_eq!(parse("--valid-for", "3600").unwrap().valid_for, 3600);
    }

    #[test]
    fn debug_output_hides_key() {
        let args = Args::try_parse_from(["allowlist-paymaster", "--signer-key", KEY, "serve"]).unwrap();
        let config = PaymasterConfig::try_from(&args).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains(&KEY[2..]));
        assert!(printed.contains("<redacted>"));
    }
}
