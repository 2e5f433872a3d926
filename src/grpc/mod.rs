//! gRPC surface (§4.8): one tonic service per `.proto` file, always served
//! over a Unix socket (implicitly trusted, no auth) and optionally also over
//! TCP (bearer-token authenticated via [`AuthInterceptor`]).

pub mod pb;

mod auth_service;
mod convert;
mod devnet_service;
mod network_service;
mod node_service;
mod transaction_service;
mod upgrade_service;

use std::path::Path;
use std::sync::Arc;

use tonic::transport::Server;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Caps concurrent in-flight RPCs on the TCP listener. The unix socket is
/// implicitly trusted local traffic and goes unbounded; a remote caller
/// shouldn't be able to pin the daemon down with unlimited concurrent calls.
const MAX_CONCURRENT_TCP_REQUESTS: usize = 64;

use crate::apikeys::{hash_token, ApiKeyStore};
use crate::chain::ChainClient;
use crate::controller::ControllerManager;
use crate::error::Result;
use crate::network::NetworkRegistry;
use crate::provision_log::ProvisionLogHub;
use crate::reconcile::transaction::TxBroadcaster;
use crate::runtime::NodeRuntime;
use crate::store::Store;
use crate::subnet::SubnetAllocator;

use pb::auth_service_server::AuthServiceServer;
use pb::devnet_service_server::DevnetServiceServer;
use pb::network_service_server::NetworkServiceServer;
use pb::node_service_server::NodeServiceServer;
use pb::transaction_service_server::TransactionServiceServer;
use pb::upgrade_service_server::UpgradeServiceServer;

/// Everything the service handlers need, threaded in at construction rather
/// than reached for through global state (§9).
pub struct GrpcState {
    pub store: Arc<dyn Store>,
    pub controller: Arc<ControllerManager>,
    pub runtime: Arc<dyn NodeRuntime>,
    pub chain: Arc<dyn ChainClient>,
    pub broadcaster: Arc<dyn TxBroadcaster>,
    pub networks: Arc<NetworkRegistry>,
    pub subnets: Arc<SubnetAllocator>,
    pub provision_logs: Arc<ProvisionLogHub>,
}

/// Rejects unauthenticated TCP calls; the Unix socket listener never wraps
/// its services in this, per §3.7's "local callers are implicitly trusted".
#[derive(Clone)]
struct AuthInterceptor {
    api_keys: Arc<ApiKeyStore>,
}

impl tonic::service::Interceptor for AuthInterceptor {
    fn call(&mut self, req: tonic::Request<()>) -> std::result::Result<tonic::Request<()>, tonic::Status> {
        let token = req
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| tonic::Status::unauthenticated("missing bearer token"))?;
        if self.api_keys.authenticate(&hash_token(token)) {
            Ok(req)
        } else {
            Err(tonic::Status::unauthenticated("invalid or revoked bearer token"))
        }
    }
}

fn devnet_svc(state: &Arc<GrpcState>) -> DevnetServiceServer<devnet_service::DevnetServiceImpl> {
    DevnetServiceServer::new(devnet_service::DevnetServiceImpl { state: state.clone() })
}

fn node_svc(state: &Arc<GrpcState>) -> NodeServiceServer<node_service::NodeServiceImpl> {
    NodeServiceServer::new(node_service::NodeServiceImpl { state: state.clone() })
}

fn upgrade_svc(state: &Arc<GrpcState>) -> UpgradeServiceServer<upgrade_service::UpgradeServiceImpl> {
    UpgradeServiceServer::new(upgrade_service::UpgradeServiceImpl { state: state.clone() })
}

fn transaction_svc(state: &Arc<GrpcState>) -> TransactionServiceServer<transaction_service::TransactionServiceImpl> {
    TransactionServiceServer::new(transaction_service::TransactionServiceImpl { state: state.clone() })
}

fn network_svc(state: &Arc<GrpcState>) -> NetworkServiceServer<network_service::NetworkServiceImpl> {
    NetworkServiceServer::new(network_service::NetworkServiceImpl { state: state.clone() })
}

fn auth_svc() -> AuthServiceServer<auth_service::AuthServiceImpl> {
    AuthServiceServer::new(auth_service::AuthServiceImpl)
}

/// Serves every service over the given Unix socket path until `shutdown`
/// resolves. The socket file is removed first if a stale one is left over
/// from an unclean prior shutdown.
pub async fn serve_unix(socket_path: &Path, state: Arc<GrpcState>, shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
    let _ = std::fs::remove_file(socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = tokio::net::UnixListener::bind(socket_path)?;
    let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);

    tracing::info!(path = %socket_path.display(), "serving gRPC on unix socket");
    Server::builder()
        .layer(TraceLayer::new_for_grpc())
        .add_service(devnet_svc(&state))
        .add_service(node_svc(&state))
        .add_service(upgrade_svc(&state))
        .add_service(transaction_svc(&state))
        .add_service(network_svc(&state))
        .add_service(auth_svc())
        .serve_with_incoming_shutdown(incoming, async {
            let _ = shutdown.await;
        })
        .await
        .map_err(|e| crate::error::Error::Internal(format!("unix grpc server error: {e}")))?;
    Ok(())
}

/// Serves every service over TCP, gating every resource service behind a
/// bearer-token interceptor. `AuthService` itself is never wrapped in it —
/// `Ping` and `WhoAmI` both need to work before a caller has a token, the
/// latter specifically to tell a caller it has none. Only started when
/// `bind_tcp` is configured (§3.7: remote access is opt-in).
pub async fn serve_tcp(
    addr: std::net::SocketAddr,
    state: Arc<GrpcState>,
    api_keys: Arc<ApiKeyStore>,
    shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let interceptor = AuthInterceptor { api_keys: api_keys.clone() };
    let layer = ServiceBuilder::new()
        .layer(TraceLayer::new_for_grpc())
        .concurrency_limit(MAX_CONCURRENT_TCP_REQUESTS)
        .into_inner();

    tracing::info!(%addr, "serving gRPC on tcp");
    Server::builder()
        .layer(layer)
        .add_service(DevnetServiceServer::with_interceptor(
            devnet_service::DevnetServiceImpl { state: state.clone() },
            interceptor.clone(),
        ))
        .add_service(NodeServiceServer::with_interceptor(node_service::NodeServiceImpl { state: state.clone() }, interceptor.clone()))
        .add_service(UpgradeServiceServer::with_interceptor(
            upgrade_service::UpgradeServiceImpl { state: state.clone() },
            interceptor.clone(),
        ))
        .add_service(TransactionServiceServer::with_interceptor(
            transaction_service::TransactionServiceImpl { state: state.clone() },
            interceptor.clone(),
        ))
        .add_service(NetworkServiceServer::with_interceptor(
            network_service::NetworkServiceImpl { state: state.clone() },
            interceptor.clone(),
        ))
        .add_service(auth_svc())
        .serve_with_shutdown(addr, async {
            let _ = shutdown.await;
        })
        .await
        .map_err(|e| crate::error::Error::Internal(format!("tcp grpc server error: {e}")))?;
    Ok(())
}
