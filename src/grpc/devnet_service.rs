use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};

use super::convert;
use super::pb;
use super::pb::devnet_service_server::DevnetService;
use super::GrpcState;
use crate::metadata::LabelSelector;
use crate::model::{Devnet, DevnetDesiredState, Kind};

pub struct DevnetServiceImpl {
    pub state: Arc<GrpcState>,
}

#[tonic::async_trait]
impl DevnetService for DevnetServiceImpl {
    async fn create(
        &self,
        request: Request<pb::DevnetServiceCreateRequest>,
    ) -> Result<Response<pb::DevnetServiceCreateResponse>, Status> {
        let req = request.into_inner().devnet.ok_or_else(|| Status::invalid_argument("devnet is required"))?;
        let metadata = convert::metadata_from_pb_for_create(&req.metadata.unwrap_or_default())?;
        let spec = req.spec.ok_or_else(|| Status::invalid_argument("devnet.spec is required"))?;
        let spec = convert::devnet_spec_from_pb(spec)?;
        spec.validate()?;

        let devnet = Devnet::new(metadata, spec);
        let created = self.state.store.create_devnet(devnet).await?;
        self.state.controller.enqueue(Kind::Devnet, created.metadata.key());
        Ok(Response::new(pb::DevnetServiceCreateResponse { devnet: Some(convert::devnet_to_pb(&created)) }))
    }

    async fn get(&self, request: Request<pb::DevnetServiceGetRequest>) -> Result<Response<pb::DevnetServiceGetResponse>, Status> {
        let req = request.into_inner();
        let key = convert::object_ref_to_key(&req.r#ref.ok_or_else(|| Status::invalid_argument("ref is required"))?);
        let devnet = self.state.store.get_devnet(&key).await?;
        Ok(Response::new(pb::DevnetServiceGetResponse { devnet: Some(convert::devnet_to_pb(&devnet)) }))
    }

    async fn list(&self, request: Request<pb::DevnetServiceListRequest>) -> Result<Response<pb::DevnetServiceListResponse>, Status> {
        let req = request.into_inner();
        let namespace = crate::metadata::resolve_namespace(&req.namespace);
        let selector = LabelSelector::parse(&req.label_selector)?;
        let devnets = self.state.store.list_devnets(namespace, &selector).await?;
        Ok(Response::new(pb::DevnetServiceListResponse { devnets: devnets.iter().map(convert::devnet_to_pb).collect() }))
    }

    async fn delete(&self, request: Request<pb::DevnetServiceDeleteRequest>) -> Result<Response<pb::DevnetServiceDeleteResponse>, Status> {
        let req = request.into_inner();
        let key = convert::object_ref_to_key(&req.r#ref.ok_or_else(|| Status::invalid_argument("ref is required"))?);

        let removed_nodes = self.state.store.delete_nodes_by_devnet(&key.namespace, &key.name).await;
        let removed_upgrades = self.state.store.delete_upgrades_by_devnet(&key.namespace, &key.name).await;
        tracing::info!(namespace = %key.namespace, name = %key.name, removed_nodes, removed_upgrades, "cascading devnet delete");

        self.state.store.delete_devnet(&key).await?;
        if let Err(e) = self.state.subnets.release(&key.name) {
            tracing::warn!(namespace = %key.namespace, name = %key.name, error = %e, "failed to release devnet's subnet");
        }
        Ok(Response::new(pb::DevnetServiceDeleteResponse { deleted: true }))
    }

    async fn start(&self, request: Request<pb::DevnetServiceStartRequest>) -> Result<Response<pb::DevnetServiceStartResponse>, Status> {
        let req = request.into_inner();
        let key = convert::object_ref_to_key(&req.r#ref.ok_or_else(|| Status::invalid_argument("ref is required"))?);
        let mut devnet = self.state.store.get_devnet(&key).await?;
        devnet.spec.desired = DevnetDesiredState::Running;
        devnet.metadata.bump_generation();
        let updated = self.state.store.update_devnet(devnet).await?;
        self.state.controller.enqueue(Kind::Devnet, key);
        Ok(Response::new(pb::DevnetServiceStartResponse { devnet: Some(convert::devnet_to_pb(&updated)) }))
    }

    async fn stop(&self, request: Request<pb::DevnetServiceStopRequest>) -> Result<Response<pb::DevnetServiceStopResponse>, Status> {
        let req = request.into_inner();
        let key = convert::object_ref_to_key(&req.r#ref.ok_or_else(|| Status::invalid_argument("ref is required"))?);
        let mut devnet = self.state.store.get_devnet(&key).await?;
        devnet.spec.desired = DevnetDesiredState::Stopped;
        devnet.metadata.bump_generation();
        let updated = self.state.store.update_devnet(devnet).await?;
        self.state.controller.enqueue(Kind::Devnet, key);
        Ok(Response::new(pb::DevnetServiceStopResponse { devnet: Some(convert::devnet_to_pb(&updated)) }))
    }

    async fn apply(&self, request: Request<pb::DevnetServiceApplyRequest>) -> Result<Response<pb::DevnetServiceApplyResponse>, Status> {
        let req = request.into_inner().devnet.ok_or_else(|| Status::invalid_argument("devnet is required"))?;
        let raw_meta = req.metadata.unwrap_or_default();
        let key = crate::metadata::ResourceKey::new(raw_meta.namespace.clone(), raw_meta.name.clone());
        let spec = req.spec.ok_or_else(|| Status::invalid_argument("devnet.spec is required"))?;
        let spec = convert::devnet_spec_from_pb(spec)?;
        spec.validate()?;

        match self.state.store.get_devnet(&key).await {
            Ok(mut existing) => {
                existing.spec = spec;
                existing.metadata.bump_generation();
                let updated = self.state.store.update_devnet(existing).await?;
                self.state.controller.enqueue(Kind::Devnet, key);
                Ok(Response::new(pb::DevnetServiceApplyResponse { devnet: Some(convert::devnet_to_pb(&updated)), created: false }))
            }
            Err(e) if e.is_not_found() => {
                let metadata = convert::metadata_from_pb_for_create(&raw_meta)?;
                let devnet = Devnet::new(metadata, spec);
                let created = self.state.store.create_devnet(devnet).await?;
                self.state.controller.enqueue(Kind::Devnet, created.metadata.key());
                Ok(Response::new(pb::DevnetServiceApplyResponse { devnet: Some(convert::devnet_to_pb(&created)), created: true }))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, request: Request<pb::DevnetServiceUpdateRequest>) -> Result<Response<pb::DevnetServiceUpdateResponse>, Status> {
        let req = request.into_inner().devnet.ok_or_else(|| Status::invalid_argument("devnet is required"))?;
        let raw_meta = req.metadata.unwrap_or_default();
        let key = crate::metadata::ResourceKey::new(raw_meta.namespace, raw_meta.name);
        let spec = req.spec.ok_or_else(|| Status::invalid_argument("devnet.spec is required"))?;
        let spec = convert::devnet_spec_from_pb(spec)?;
        spec.validate()?;

        let mut existing = self.state.store.get_devnet(&key).await?;
        existing.spec = spec;
        existing.metadata.bump_generation();
        let updated = self.state.store.update_devnet(existing).await?;
        self.state.controller.enqueue(Kind::Devnet, key);
        Ok(Response::new(pb::DevnetServiceUpdateResponse { devnet: Some(convert::devnet_to_pb(&updated)) }))
    }

    type StreamProvisionLogStream = Pin<Box<dyn Stream<Item = Result<pb::ProvisionLogEvent, Status>> + Send + 'static>>;

    async fn stream_provision_log(
        &self,
        request: Request<pb::DevnetServiceStreamProvisionLogRequest>,
    ) -> Result<Response<Self::StreamProvisionLogStream>, Status> {
        let req = request.into_inner();
        let key = convert::object_ref_to_key(&req.r#ref.ok_or_else(|| Status::invalid_argument("ref is required"))?);
        // Confirms the devnet exists before subscribing; the hub would
        // otherwise happily create a topic for a name nobody will ever
        // provision.
        self.state.store.get_devnet(&key).await?;

        let (backlog, rx) = self.state.provision_logs.subscribe(&key);
        let backlog_stream = tokio_stream::iter(backlog.into_iter().map(|message| Ok::<String, Status>(message)));
        let live_stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|event| match event {
            Ok(event) => Some(Ok::<String, Status>(event.message)),
            Err(_lagged) => None,
        });
        let stream = backlog_stream.chain(live_stream).map(|message| {
            message.map(|message| pb::ProvisionLogEvent { message, timestamp_unix_ms: chrono::Utc::now().timestamp_millis() })
        });
        Ok(Response::new(Box::pin(stream)))
    }
}
