use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};

use super::convert;
use super::pb;
use super::pb::node_service_server::NodeService;
use super::GrpcState;
use crate::model::node::NodePhase;
use crate::model::Kind;

pub struct NodeServiceImpl {
    pub state: Arc<GrpcState>,
}

fn require_ref(r: Option<pb::ObjectRef>) -> Result<pb::ObjectRef, Status> {
    r.ok_or_else(|| Status::invalid_argument("ref is required"))
}

#[tonic::async_trait]
impl NodeService for NodeServiceImpl {
    async fn get(&self, request: Request<pb::NodeServiceGetRequest>) -> Result<Response<pb::NodeServiceGetResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let node = self.state.store.get_node(&key).await?;
        Ok(Response::new(pb::NodeServiceGetResponse { node: Some(convert::node_to_pb(&node)) }))
    }

    async fn list(&self, request: Request<pb::NodeServiceListRequest>) -> Result<Response<pb::NodeServiceListResponse>, Status> {
        let req = request.into_inner();
        let namespace = crate::metadata::resolve_namespace(&req.namespace);
        let nodes = self.state.store.list_nodes(namespace, &req.devnet_name).await?;
        Ok(Response::new(pb::NodeServiceListResponse { nodes: nodes.iter().map(convert::node_to_pb).collect() }))
    }

    async fn start(&self, request: Request<pb::NodeServiceStartRequest>) -> Result<Response<pb::NodeServiceStartResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let mut node = self.state.store.get_node(&key).await?;
        node.spec.desired = crate::model::DesiredRunState::Running;
        node.metadata.bump_generation();
        let updated = self.state.store.update_node(node).await?;
        self.state.controller.enqueue(Kind::Node, key);
        Ok(Response::new(pb::NodeServiceStartResponse { node: Some(convert::node_to_pb(&updated)) }))
    }

    async fn stop(&self, request: Request<pb::NodeServiceStopRequest>) -> Result<Response<pb::NodeServiceStopResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let mut node = self.state.store.get_node(&key).await?;
        node.spec.desired = crate::model::DesiredRunState::Stopped;
        node.metadata.bump_generation();
        let updated = self.state.store.update_node(node).await?;
        self.state.controller.enqueue(Kind::Node, key);
        Ok(Response::new(pb::NodeServiceStopResponse { node: Some(convert::node_to_pb(&updated)) }))
    }

    /// Unconditionally bumps `restart_count` and cycles the node back through
    /// `Pending`; whether that increment should be conditioned on an actual
    /// observed crash is left open by the source design (spec.md §9) — this
    /// always counts it, matching `RestartNode`'s documented behavior.
    async fn restart(&self, request: Request<pb::NodeServiceRestartRequest>) -> Result<Response<pb::NodeServiceRestartResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let mut node = self.state.store.get_node(&key).await?;
        node.spec.desired = crate::model::DesiredRunState::Running;
        node.status.phase = NodePhase::Pending;
        node.status.restart_count += 1;
        node.status.instance_id = None;
        node.metadata.bump_generation();
        let updated = self.state.store.update_node(node).await?;
        self.state.controller.enqueue(Kind::Node, key);
        Ok(Response::new(pb::NodeServiceRestartResponse { node: Some(convert::node_to_pb(&updated)) }))
    }

    async fn get_health(&self, request: Request<pb::NodeServiceGetHealthRequest>) -> Result<Response<pb::NodeServiceGetHealthResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let node = self.state.store.get_node(&key).await?;
        Ok(Response::new(pb::NodeServiceGetHealthResponse {
            healthy: node.status.healthy,
            block_height: node.status.block_height,
            peer_count: node.status.peer_count,
            catching_up: node.status.catching_up,
        }))
    }

    async fn get_ports(&self, request: Request<pb::NodeServiceGetPortsRequest>) -> Result<Response<pb::NodeServiceGetPortsResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let node = self.state.store.get_node(&key).await?;
        let ports = crate::subnet::PortOffset::for_index(node.spec.index);
        Ok(Response::new(pb::NodeServiceGetPortsResponse { p2p: ports.p2p as u32, rpc: ports.rpc as u32, rest: ports.rest as u32, grpc: ports.grpc as u32 }))
    }

    async fn exec(&self, request: Request<pb::NodeServiceExecRequest>) -> Result<Response<pb::NodeServiceExecResponse>, Status> {
        let req = request.into_inner();
        let key = convert::object_ref_to_key(&require_ref(req.r#ref)?);
        let node = self.state.store.get_node(&key).await?;
        let timeout = Duration::from_secs(if req.timeout_secs == 0 { 30 } else { req.timeout_secs as u64 });
        let result = self.state.runtime.exec(&node, &req.command, timeout).await?;
        Ok(Response::new(pb::NodeServiceExecResponse {
            exit_code: result.exit_code,
            stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        }))
    }

    type StreamLogsStream = Pin<Box<dyn Stream<Item = Result<pb::LogLine, Status>> + Send + 'static>>;

    async fn stream_logs(&self, request: Request<pb::NodeServiceStreamLogsRequest>) -> Result<Response<Self::StreamLogsStream>, Status> {
        let req = request.into_inner();
        let key = convert::object_ref_to_key(&require_ref(req.r#ref)?);
        let node = self.state.store.get_node(&key).await?;
        let tail = if req.tail_lines == 0 { None } else { Some(req.tail_lines as usize) };
        let rx = self.state.runtime.logs(&node, tail, req.follow).await?;

        let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(|line| {
            Ok(pb::LogLine {
                stderr: line.stream == crate::runtime::LogStream::Stderr,
                line: line.line,
                timestamp_unix_ms: chrono::Utc::now().timestamp_millis(),
            })
        });
        Ok(Response::new(Box::pin(stream)))
    }
}
