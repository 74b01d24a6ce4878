// src/rpc.rs
use std::net::SocketAddr;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::types::error::{ErrorObject, ErrorObjectOwned, INVALID_PARAMS_CODE};
use tracing::{debug, error, info};

use crate::error::PaymasterError;
use crate::paymaster::ComputeSponsorshipData;
use crate::request::UserOperationRequest;
use crate::types::{PaymasterResponse, UserOperation};

const PAYMASTER_ERROR_CODE: i32 = -32000;

#[rpc(server, namespace = "pm")]
pub trait PaymasterRpc {
    /// Requests the paymaster to sponsor a user operation
    #[method(name = "sponsorUserOperation")]
    async fn sponsor(&self, user_op: UserOperationRequest) -> RpcResult<PaymasterResponse>;
}

pub struct PaymasterRpcImpl {
    sponsorship: ComputeSponsorshipData,
}

impl PaymasterRpcImpl {
    pub fn new(sponsorship: ComputeSponsorshipData) -> Self {
        Self { sponsorship }
    }
}

#[async_trait]
impl PaymasterRpcServer for PaymasterRpcImpl {
    async fn sponsor(&self, user_op: UserOperationRequest) -> RpcResult<PaymasterResponse> {
        let user_op = UserOperation::try_from(&user_op)
            .map_err(|e| to_rpc_error(PaymasterError::from(e)))?;
        debug!("Received sponsor request for sender: {:?}", user_op.sender);

        let sender = user_op.sender;
        match (self.sponsorship)(user_op).await {
            Ok(paymaster_and_data) => {
                if !paymaster_and_data.is_empty() {
                    info!("Successfully sponsored operation for {:?}", sender);
                }
                Ok(PaymasterResponse { paymaster_and_data })
            }
            Err(e) => {
                error!("Failed to sponsor operation: {}", e);
                Err(to_rpc_error(e))
            }
        }
    }
}

fn to_rpc_error(e: PaymasterError) -> ErrorObjectOwned {
    let code = if e.is_invalid_input() {
        INVALID_PARAMS_CODE
    } else {
        PAYMASTER_ERROR_CODE
    };
    ErrorObject::owned(code, format!("Paymaster error: {}", e), None::<()>)
}

pub async fn start_server(
    server_addr: SocketAddr,
    paymaster_rpc: PaymasterRpcImpl,
) -> anyhow::Result<(SocketAddr, ServerHandle)> {
    let server = ServerBuilder::default().build(server_addr).await?;
    let local_addr = server.local_addr()?;
    let server_handle = server.start(paymaster_rpc.into_rpc());

    Ok((local_addr, server_handle))
}
