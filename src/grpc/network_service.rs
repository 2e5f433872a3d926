use std::sync::Arc;

use tonic::{Request, Response, Status};

use super::pb;
use super::pb::network_service_server::NetworkService;
use super::GrpcState;
use crate::network::NetworkModule;

pub struct NetworkServiceImpl {
    pub state: Arc<GrpcState>,
}

fn module_to_pb(module: &dyn NetworkModule) -> pb::NetworkInfo {
    pb::NetworkInfo {
        name: module.name().to_string(),
        display_name: module.display_name().to_string(),
        version: module.version().to_string(),
        binary_name: module.binary_name().to_string(),
        default_chain_id: module.default_chain_id("mainnet"),
        bech32_prefix: module.bech32_prefix().to_string(),
        base_denom: module.base_denom().to_string(),
        available_networks: module.available_networks(),
    }
}

#[tonic::async_trait]
impl NetworkService for NetworkServiceImpl {
    async fn list_networks(&self, _request: Request<pb::NetworkServiceListNetworksRequest>) -> Result<Response<pb::NetworkServiceListNetworksResponse>, Status> {
        let networks = self.state.networks.names().into_iter().map(|name| module_to_pb(self.state.networks.get(name).unwrap())).collect();
        Ok(Response::new(pb::NetworkServiceListNetworksResponse { networks }))
    }

    async fn get_network_info(&self, request: Request<pb::NetworkServiceGetNetworkInfoRequest>) -> Result<Response<pb::NetworkServiceGetNetworkInfoResponse>, Status> {
        let req = request.into_inner();
        let module = self.state.networks.get(&req.plugin)?;
        Ok(Response::new(pb::NetworkServiceGetNetworkInfoResponse { info: Some(module_to_pb(module)) }))
    }

    /// The plugin contract only exposes a single `default_binary_version`
    /// (§6); this reports that one value rather than inventing a release
    /// index the contract doesn't provide.
    async fn list_binary_versions(&self, request: Request<pb::NetworkServiceListBinaryVersionsRequest>) -> Result<Response<pb::NetworkServiceListBinaryVersionsResponse>, Status> {
        let req = request.into_inner();
        let module = self.state.networks.get(&req.plugin)?;
        Ok(Response::new(pb::NetworkServiceListBinaryVersionsResponse { versions: vec![module.default_binary_version().to_string()] }))
    }
}
