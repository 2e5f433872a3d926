//! The chain-RPC collaborator the UpgradeCoordinator depends on: submitting
//! governance proposals, casting votes, polling height, and reading back
//! application version — all out of scope per §1 ("consensus or
//! cryptography" is explicitly excluded) and consumed only as a trait so
//! [`crate::reconcile::upgrade::UpgradeReconciler`] stays a pure function of
//! its dependencies.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Node;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submits the on-chain upgrade proposal via `node`, returning its id.
    async fn submit_upgrade_proposal(&self, node: &Node, upgrade_name: &str, target_height: u64) -> Result<String>;

    async fn vote_yes(&self, node: &Node, proposal_id: &str) -> Result<()>;

    async fn proposal_passed(&self, node: &Node, proposal_id: &str) -> Result<bool>;

    async fn current_height(&self, node: &Node) -> Result<u64>;

    async fn app_version(&self, node: &Node) -> Result<String>;
}

#[derive(serde::Deserialize)]
struct RpcEnvelope<T> {
    result: T,
}

#[derive(serde::Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(serde::Deserialize)]
struct SyncInfo {
    latest_block_height: String,
}

#[derive(serde::Deserialize)]
struct AbciInfoResult {
    response: AbciResponse,
}

#[derive(serde::Deserialize)]
struct AbciResponse {
    version: String,
}

/// Default [`ChainClient`]: height and app version are read over Tendermint
/// RPC (the same dialect [`crate::health::HealthController`] probes);
/// governance actions shell out to the node's own binary, since signing a
/// proposal or vote is the keyring's job, not ours (§1 excludes
/// cryptography beyond reading a node-key file).
pub struct CliChainClient {
    http: reqwest::Client,
}

impl CliChainClient {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }

    fn rpc_base(node: &Node) -> String {
        format!("http://127.0.0.1:{}", crate::subnet::PortOffset::for_index(node.spec.index).rpc)
    }

    async fn run_cli(node: &Node, args: &[&str]) -> Result<String> {
        let output = tokio::process::Command::new(&node.spec.binary_path)
            .args(args)
            .arg("--home")
            .arg(&node.spec.home_dir)
            .arg("--output")
            .arg("json")
            .arg("-y")
            .output()
            .await
            .map_err(|e| crate::error::Error::Internal(format!("failed to run {}: {e}", node.spec.binary_path)))?;
        if !output.status.success() {
            return Err(crate::error::Error::FailedPrecondition(format!(
                "{} {:?} exited with {}: {}",
                node.spec.binary_path,
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for CliChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for CliChainClient {
    async fn submit_upgrade_proposal(&self, node: &Node, upgrade_name: &str, target_height: u64) -> Result<String> {
        let height = target_height.to_string();
        let stdout = Self::run_cli(
            node,
            &["tx", "upgrade", "software-upgrade", upgrade_name, "--upgrade-height", &height, "--from", "validator"],
        )
        .await?;
        #[derive(serde::Deserialize)]
        struct TxResponse {
            logs: Vec<serde_json::Value>,
            txhash: String,
        }
        let parsed: TxResponse = serde_json::from_str(&stdout)?;
        let _ = parsed.logs;
        Ok(parsed.txhash)
    }

    async fn vote_yes(&self, node: &Node, proposal_id: &str) -> Result<()> {
        Self::run_cli(node, &["tx", "gov", "vote", proposal_id, "yes", "--from", "validator"]).await?;
        Ok(())
    }

    async fn proposal_passed(&self, node: &Node, proposal_id: &str) -> Result<bool> {
        let stdout = Self::run_cli(node, &["query", "gov", "proposal", proposal_id]).await?;
        #[derive(serde::Deserialize)]
        struct ProposalQuery {
            status: String,
        }
        let parsed: ProposalQuery = serde_json::from_str(&stdout)?;
        Ok(parsed.status.eq_ignore_ascii_case("PROPOSAL_STATUS_PASSED"))
    }

    async fn current_height(&self, node: &Node) -> Result<u64> {
        let resp: RpcEnvelope<StatusResult> = self.http.get(format!("{}/status", Self::rpc_base(node))).send().await?.json().await?;
        resp.result
            .sync_info
            .latest_block_height
            .parse()
            .map_err(|_| crate::error::Error::Internal("non-numeric block height".to_string()))
    }

    async fn app_version(&self, node: &Node) -> Result<String> {
        let resp: RpcEnvelope<AbciInfoResult> = self.http.get(format!("{}/abci_info", Self::rpc_base(node))).send().await?.json().await?;
        Ok(resp.result.response.version)
    }
}
