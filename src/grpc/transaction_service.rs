use std::sync::Arc;

use tonic::{Request, Response, Status};

use super::convert;
use super::pb;
use super::pb::transaction_service_server::TransactionService;
use super::GrpcState;
use crate::model::transaction::TransactionPhase;
use crate::model::{Kind, Transaction, TransactionSpec};

pub struct TransactionServiceImpl {
    pub state: Arc<GrpcState>,
}

fn require_ref(r: Option<pb::ObjectRef>) -> Result<pb::ObjectRef, Status> {
    r.ok_or_else(|| Status::invalid_argument("ref is required"))
}

#[tonic::async_trait]
impl TransactionService for TransactionServiceImpl {
    async fn submit(&self, request: Request<pb::TransactionServiceSubmitRequest>) -> Result<Response<pb::TransactionServiceSubmitResponse>, Status> {
        let req = request.into_inner().transaction.ok_or_else(|| Status::invalid_argument("transaction is required"))?;
        let metadata = convert::metadata_from_pb_for_create(&req.metadata.unwrap_or_default())?;
        let spec = req.spec.ok_or_else(|| Status::invalid_argument("transaction.spec is required"))?;
        let devnet_ref = convert::object_ref_to_key(
            spec.devnet_ref.as_ref().ok_or_else(|| Status::invalid_argument("transaction.spec.devnet_ref is required"))?,
        );
        self.state.store.get_devnet(&devnet_ref).await?;
        let spec = convert::transaction_spec_from_pb(spec, devnet_ref)?;

        let tx = Transaction::new(metadata, spec);
        let created = self.state.store.create_transaction(tx).await?;
        self.state.controller.enqueue(Kind::Transaction, created.metadata.key());
        Ok(Response::new(pb::TransactionServiceSubmitResponse { transaction: Some(convert::transaction_to_pb(&created)) }))
    }

    async fn get(&self, request: Request<pb::TransactionServiceGetRequest>) -> Result<Response<pb::TransactionServiceGetResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let tx = self.state.store.get_transaction(&key).await?;
        Ok(Response::new(pb::TransactionServiceGetResponse { transaction: Some(convert::transaction_to_pb(&tx)) }))
    }

    async fn list(&self, request: Request<pb::TransactionServiceListRequest>) -> Result<Response<pb::TransactionServiceListResponse>, Status> {
        let req = request.into_inner();
        let namespace = crate::metadata::resolve_namespace(&req.namespace);
        let phase_filter = convert::transaction_phase_from_pb(req.phase_filter);
        let txs = self.state.store.list_transactions(namespace, &req.devnet_name, phase_filter).await?;
        Ok(Response::new(pb::TransactionServiceListResponse { transactions: txs.iter().map(convert::transaction_to_pb).collect() }))
    }

    /// Only `Pending` transactions can be cancelled; once broadcast the
    /// outcome is already in flight on-chain and must run to confirmation.
    async fn cancel(&self, request: Request<pb::TransactionServiceCancelRequest>) -> Result<Response<pb::TransactionServiceCancelResponse>, Status> {
        let key = convert::object_ref_to_key(&require_ref(request.into_inner().r#ref)?);
        let mut tx = self.state.store.get_transaction(&key).await?;
        if tx.status.phase != TransactionPhase::Pending {
            return Err(Status::failed_precondition("transaction already broadcast, cannot cancel"));
        }
        tx.status.phase = TransactionPhase::Failed;
        tx.status.error = Some("cancelled".to_string());
        let updated = self.state.store.update_transaction(tx).await?;
        Ok(Response::new(pb::TransactionServiceCancelResponse { transaction: Some(convert::transaction_to_pb(&updated)) }))
    }

    /// Modeled as a `bank`-style transaction carrying the vote payload
    /// through the same broadcast/confirm pipeline as any other tx, rather
    /// than inventing a parallel governance-vote code path.
    async fn vote(&self, request: Request<pb::TransactionServiceVoteRequest>) -> Result<Response<pb::TransactionServiceVoteResponse>, Status> {
        let req = request.into_inner();
        let devnet_ref = convert::object_ref_to_key(
            &req.devnet_ref.ok_or_else(|| Status::invalid_argument("devnet_ref is required"))?,
        );
        self.state.store.get_devnet(&devnet_ref).await?;
        let memo = format!("vote proposal={} option={}", req.proposal_id, req.option);
        let spec = TransactionSpec {
            devnet_ref: devnet_ref.clone(),
            tx_type: "gov-vote".to_string(),
            signer: req.voter,
            payload: req.proposal_id.into_bytes(),
            gas_limit: 200_000,
            memo,
        };
        let tx = Transaction::new(crate::metadata::Metadata::new(format!("vote-{}", uuid::Uuid::new_v4()), devnet_ref.namespace), spec);
        let created = self.state.store.create_transaction(tx).await?;
        self.state.controller.enqueue(Kind::Transaction, created.metadata.key());
        Ok(Response::new(pb::TransactionServiceVoteResponse { transaction: Some(convert::transaction_to_pb(&created)) }))
    }

    async fn propose(&self, request: Request<pb::TransactionServiceProposeRequest>) -> Result<Response<pb::TransactionServiceProposeResponse>, Status> {
        let req = request.into_inner();
        let devnet_ref = convert::object_ref_to_key(
            &req.devnet_ref.ok_or_else(|| Status::invalid_argument("devnet_ref is required"))?,
        );
        self.state.store.get_devnet(&devnet_ref).await?;
        let proposal_id = uuid::Uuid::new_v4().to_string();
        let memo = format!("propose title={} height={}", req.title, req.upgrade_height);
        let spec = TransactionSpec {
            devnet_ref: devnet_ref.clone(),
            tx_type: "gov-propose".to_string(),
            signer: "daemon".to_string(),
            payload: req.description.into_bytes(),
            gas_limit: 250_000,
            memo,
        };
        let tx = Transaction::new(
            crate::metadata::Metadata::new(format!("proposal-{proposal_id}"), devnet_ref.namespace),
            spec,
        );
        let created = self.state.store.create_transaction(tx).await?;
        self.state.controller.enqueue(Kind::Transaction, created.metadata.key());
        Ok(Response::new(pb::TransactionServiceProposeResponse { proposal_id, transaction: Some(convert::transaction_to_pb(&created)) }))
    }
}
