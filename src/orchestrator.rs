//! The `Orchestrator` collaborator: binary build/fetch, genesis
//! materialisation, and per-node home directory initialisation. Explicitly
//! out of scope per §1 ("Genesis fetch/fork implementation details... are
//! external collaborators") — the DevnetReconciler only depends on this
//! trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::DevnetSpec;
use crate::network::NetworkModule;

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Idempotent: returns immediately if the binary for `spec.binary_source`
    /// is already present (§4.4.1 Provisioning idempotency).
    async fn build_or_fetch_binary(&self, spec: &DevnetSpec, plugin: &dyn NetworkModule) -> Result<String>;

    /// Idempotent: returns the existing genesis path if already materialised.
    async fn materialize_genesis(&self, spec: &DevnetSpec, plugin: &dyn NetworkModule, home_dir: &str) -> Result<String>;

    /// Idempotent: a no-op if `home_dir` is already initialised.
    async fn init_home_dir(&self, plugin: &dyn NetworkModule, home_dir: &str, chain_id: &str, moniker: &str) -> Result<()>;
}

/// Default [`Orchestrator`]: binaries are fetched over HTTP or copied from
/// a local path depending on `binary_source`'s shape; genesis is pulled per
/// [`crate::model::GenesisSource`]; home directories are initialised by
/// shelling out to the plugin's own `init_command` the same way
/// [`crate::runtime::ProcessRuntime`] shells out to `start_command`.
pub struct ShellOrchestrator {
    bin_dir: std::path::PathBuf,
    http: reqwest::Client,
}

impl ShellOrchestrator {
    pub fn new(bin_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { bin_dir: bin_dir.into(), http: reqwest::Client::new() }
    }

    async fn download(&self, url: &str, dest: &std::path::Path) -> Result<()> {
        let bytes = self.http.get(url).send().await?.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(dest).await?.permissions();
            perms.set_mode(0o755);
            tokio::fs::set_permissions(dest, perms).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for ShellOrchestrator {
    async fn build_or_fetch_binary(&self, spec: &crate::model::DevnetSpec, plugin: &dyn NetworkModule) -> Result<String> {
        let build = plugin.build_config(&spec.network_type);
        let dest = self.bin_dir.join(format!("{}-{}", build.binary_name, spec.binary_source.replace('/', "_")));
        if tokio::fs::metadata(&dest).await.is_ok() {
            return Ok(dest.to_string_lossy().into_owned());
        }
        tokio::fs::create_dir_all(&self.bin_dir).await?;
        let parsed = url::Url::parse(&spec.binary_source);
        if matches!(parsed.as_ref().map(url::Url::scheme), Ok("http") | Ok("https")) {
            self.download(&spec.binary_source, &dest).await?;
        } else {
            tokio::fs::copy(&spec.binary_source, &dest).await.map_err(|e| {
                crate::error::Error::Internal(format!("binary_source {:?} is neither a URL nor a readable local path: {e}", spec.binary_source))
            })?;
        }
        Ok(dest.to_string_lossy().into_owned())
    }

    async fn materialize_genesis(&self, spec: &crate::model::DevnetSpec, plugin: &dyn NetworkModule, home_dir: &str) -> Result<String> {
        let genesis_path = format!("{home_dir}/config/genesis.json");
        if tokio::fs::metadata(&genesis_path).await.is_ok() {
            return Ok(genesis_path);
        }
        tokio::fs::create_dir_all(format!("{home_dir}/config")).await?;

        let raw = match &spec.genesis_source {
            crate::model::devnet::GenesisSource::Local { path } => tokio::fs::read(path).await?,
            crate::model::devnet::GenesisSource::Snapshot { url } => self.http.get(url).send().await?.bytes().await?.to_vec(),
            crate::model::devnet::GenesisSource::Rpc { endpoint } => {
                #[derive(serde::Deserialize)]
                struct Envelope {
                    result: GenesisResult,
                }
                #[derive(serde::Deserialize)]
                struct GenesisResult {
                    genesis: serde_json::Value,
                }
                let envelope: Envelope = self.http.get(format!("{endpoint}/genesis")).send().await?.json().await?;
                serde_json::to_vec(&envelope.result.genesis)?
            }
            crate::model::devnet::GenesisSource::Generate => Vec::new(),
        };

        let genesis_opts = crate::network::GenesisOptions {
            chain_id: spec.genesis_overrides.chain_id.clone(),
            voting_period: spec.genesis_overrides.voting_period.clone(),
            unbonding_time: spec.genesis_overrides.unbonding_time.clone(),
            inflation: spec.genesis_overrides.inflation.clone(),
        };
        let genesis = plugin.modify_genesis(raw, &genesis_opts)?;
        tokio::fs::write(&genesis_path, genesis).await?;
        Ok(genesis_path)
    }

    async fn init_home_dir(&self, plugin: &dyn NetworkModule, home_dir: &str, chain_id: &str, moniker: &str) -> Result<()> {
        if tokio::fs::metadata(format!("{home_dir}/config")).await.is_ok() {
            return Ok(());
        }
        let command = plugin.init_command(home_dir, chain_id, moniker);
        let Some((program, args)) = command.split_first() else {
            return Err(crate::error::Error::Internal("plugin init_command returned no program".to_string()));
        };
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| crate::error::Error::Internal(format!("failed to run {program}: {e}")))?;
        if !output.status.success() {
            return Err(crate::error::Error::Internal(format!(
                "{program} init exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}
