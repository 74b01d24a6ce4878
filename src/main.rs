// src/main.rs
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use allowlist_paymaster::config::{Args, Command, PaymasterConfig};
use allowlist_paymaster::nonce::{FixedNonce, NonceSource, OnChainNonce};
use allowlist_paymaster::paymaster::{is_allow_listed, Paymaster};
use allowlist_paymaster::request::UserOperationRequest;
use allowlist_paymaster::rpc::{self, PaymasterRpcImpl};
use allowlist_paymaster::types::{PaymasterResponse, UserOperation};
use anyhow::{bail, Context};
use clap::Parser;
use dotenv::dotenv;
use ethers::types::U256;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = PaymasterConfig::try_from(&args)?;

    match args.command {
        Command::Serve {
            rpc_server_addr,
            eth_rpc_url,
            sender_nonce,
        } => {
            let nonces: Arc<dyn NonceSource> = match eth_rpc_url {
                Some(url) => Arc::new(OnChainNonce::new(config.paymaster_address, &url)?),
                None => {
                    info!("No ETH_RPC_URL configured, using fixed senderNonce {}", sender_nonce);
                    Arc::new(FixedNonce(U256::from(sender_nonce)))
                }
            };
            let paymaster = Arc::new(Paymaster::new(&config, nonces)?);
            let paymaster_rpc = PaymasterRpcImpl::new(paymaster.into_sponsorship());

            let (addr, server_handle) = rpc::start_server(rpc_server_addr, paymaster_rpc).await?;
            info!("Starting ERC-4337 allow-list paymaster RPC server on {}", addr);

            // Keep the server running until Ctrl+C is pressed
            tokio::signal::ctrl_c().await?;
            server_handle.stop()?;
            info!("Server stopped");
        }
        Command::Sign {
            user_op,
            sender_nonce,
            valid_until,
        } => {
            let op = read_user_op(&user_op)?;
            if !is_allow_listed(&config.allow_list, op.sender) {
                bail!("sender {:?} is not allow-listed", op.sender);
            }

            let valid_until = match valid_until {
                Some(t) => t,
                None => {
                    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
                    allowlist_paymaster::paymaster::valid_until(now, config.valid_for)
                        .context("validity window ends past the uint48 range")?
                }
            };
            let paymaster = Paymaster::new(&config, Arc::new(FixedNonce(U256::from(sender_nonce))))?;
            let paymaster_and_data =
                paymaster.sign_user_operation(&op, U256::from(sender_nonce), valid_until)?;

            let response = PaymasterResponse { paymaster_and_data };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

fn read_user_op(path: &Path) -> anyhow::Result<UserOperation> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read user operation at {}", path.display()))?;
    let request: UserOperationRequest = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse user operation at {}", path.display()))?;
    Ok(UserOperation::try_from(&request)?)
}
