use std::sync::Arc;

use tonic::{Request, Response, Status};

use super::convert;
use super::pb;
use super::pb::upgrade_service_server::UpgradeService;
use super::GrpcState;
use crate::model::{Kind, Upgrade};
use crate::reconcile::upgrade as upgrade_ops;

pub struct UpgradeServiceImpl {
    pub state: Arc<GrpcState>,
}

fn require_ref(r: Option<pb::ObjectRef>) -> Result<pb::ObjectRef, Status> {
    r.ok_or_else(|| Status::invalid_argument("ref is required"))
}

#[tonic::async_trait]
impl UpgradeService for UpgradeServiceImpl {
    async fn create(&self, request: Request<pb::UpgradeServiceCreateRequest>) -> Result<Response<pb::UpgradeServiceCreateResponse>, Status> {
        let req = request.into_inner().upgrade.ok_or_else(|| Status::invalid_argument("upgrade is required"))?;
        let metadata = convert::metadata_from_pb_for_create(&req.metadata.unwrap_or_default())?;
        let spec = req.spec.ok_or_else(|| Status::invalid_argument("upgrade.spec is required"))?;
        let devnet_ref = convert::object_ref_to_key(
            spec.devnet_ref.as_ref().ok_or_else(|| Status::invalid_argument("upgrade.spec.devnet_ref is required"))?,
        );
        self.state.store.get_devnet(&devnet_ref).await?;
        let spec = convert::upgrade_spec_from_pb(spec, devnet_ref)?;

        let upgrade = Upgrade::new(metadata, spec);
        let created = self.state.store.create_upgrade(upgrade).await?;
        self.state.controller.enqueue(Kind::Upgrade, created.metadata.key());
        Ok(Response::new(pb::UpgradeServiceCreateResponse { upgrade: Some(convert::upgrade_to_pb(&created)) }))
    }

    async fn get(&self, request: Request<pb::UpgradeServiceGetRequest>) -> Result<Response<pb::UpgradeServiceGetResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let upgrade = self.state.store.get_upgrade(&key).await?;
        Ok(Response::new(pb::UpgradeServiceGetResponse { upgrade: Some(convert::upgrade_to_pb(&upgrade)) }))
    }

    async fn list(&self, request: Request<pb::UpgradeServiceListRequest>) -> Result<Response<pb::UpgradeServiceListResponse>, Status> {
        let req = request.into_inner();
        let namespace = crate::metadata::resolve_namespace(&req.namespace);
        let upgrades = self.state.store.list_upgrades(namespace, &req.devnet_name).await?;
        Ok(Response::new(pb::UpgradeServiceListResponse { upgrades: upgrades.iter().map(convert::upgrade_to_pb).collect() }))
    }

    async fn delete(&self, request: Request<pb::UpgradeServiceDeleteRequest>) -> Result<Response<pb::UpgradeServiceDeleteResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        self.state.store.delete_upgrade(&key).await?;
        Ok(Response::new(pb::UpgradeServiceDeleteResponse { deleted: true }))
    }

    async fn cancel(&self, request: Request<pb::UpgradeServiceCancelRequest>) -> Result<Response<pb::UpgradeServiceCancelResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let mut upgrade = self.state.store.get_upgrade(&key).await?;
        upgrade_ops::cancel(&mut upgrade)?;
        let updated = self.state.store.update_upgrade(upgrade).await?;
        Ok(Response::new(pb::UpgradeServiceCancelResponse { upgrade: Some(convert::upgrade_to_pb(&updated)) }))
    }

    async fn retry(&self, request: Request<pb::UpgradeServiceRetryRequest>) -> Result<Response<pb::UpgradeServiceRetryResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let mut upgrade = self.state.store.get_upgrade(&key).await?;
        upgrade_ops::retry(&mut upgrade)?;
        let updated = self.state.store.update_upgrade(upgrade).await?;
        self.state.controller.enqueue(Kind::Upgrade, key);
        Ok(Response::new(pb::UpgradeServiceRetryResponse { upgrade: Some(convert::upgrade_to_pb(&updated)) }))
    }
}
