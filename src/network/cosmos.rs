//! A generic cosmos-sdk-shaped [`NetworkModule`] — the convention most
//! validator binaries built with the Cosmos SDK follow closely enough
//! (`<bin> init`, `<bin> start --home`, `<bin> export`, a bech32 prefix, a
//! single base denom) that one implementation covers a wide family of
//! chains via construction-time parameters rather than one hardcoded binary
//! name. Chain-specific plugins that deviate from this convention register
//! their own [`NetworkModule`] instead.

use super::{BuildConfig, GenesisOptions, NetworkModule, PortSet};
use crate::error::Result;

pub struct CosmosSdkModule {
    name: String,
    display_name: String,
    version: String,
    binary_name: String,
    bech32_prefix: String,
    base_denom: String,
    docker_image: String,
}

impl CosmosSdkModule {
    pub fn new(name: impl Into<String>, binary_name: impl Into<String>, bech32_prefix: impl Into<String>, base_denom: impl Into<String>) -> Self {
        let name = name.into();
        let binary_name = binary_name.into();
        Self {
            display_name: name.clone(),
            docker_image: format!("{name}:latest"),
            version: "v1.0.0".to_string(),
            name,
            binary_name,
            bech32_prefix: bech32_prefix.into(),
            base_denom: base_denom.into(),
        }
    }
}

impl NetworkModule for CosmosSdkModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn binary_name(&self) -> &str {
        &self.binary_name
    }

    fn default_binary_version(&self) -> &str {
        &self.version
    }

    fn build_config(&self, network_type: &str) -> BuildConfig {
        BuildConfig { binary_name: self.binary_name.clone(), source: format!("{}/{network_type}", self.name) }
    }

    fn default_chain_id(&self, network_type: &str) -> String {
        format!("{}-{network_type}-1", self.name)
    }

    fn bech32_prefix(&self) -> &str {
        &self.bech32_prefix
    }

    fn base_denom(&self) -> &str {
        &self.base_denom
    }

    fn init_command(&self, home: &str, chain_id: &str, moniker: &str) -> Vec<String> {
        vec![
            self.binary_name.clone(),
            "init".to_string(),
            moniker.to_string(),
            "--chain-id".to_string(),
            chain_id.to_string(),
            "--home".to_string(),
            home.to_string(),
        ]
    }

    fn start_command(&self, home: &str) -> Vec<String> {
        vec![self.binary_name.clone(), "start".to_string(), "--home".to_string(), home.to_string()]
    }

    fn export_command(&self, home: &str) -> Vec<String> {
        vec![self.binary_name.clone(), "export".to_string(), "--home".to_string(), home.to_string()]
    }

    /// Applies the overrides that appear verbatim under `app_state.gov` /
    /// `app_state.mint` / `app_state.staking` in a standard cosmos-sdk
    /// genesis document; unset overrides leave the field untouched.
    fn modify_genesis(&self, genesis: Vec<u8>, opts: &GenesisOptions) -> Result<Vec<u8>> {
        if genesis.is_empty() {
            return Ok(genesis);
        }
        let mut doc: serde_json::Value = serde_json::from_slice(&genesis)?;
        if let Some(chain_id) = &opts.chain_id {
            doc["chain_id"] = serde_json::Value::String(chain_id.clone());
        }
        if let Some(voting_period) = &opts.voting_period {
            doc["app_state"]["gov"]["voting_params"]["voting_period"] = serde_json::Value::String(voting_period.clone());
        }
        if let Some(unbonding_time) = &opts.unbonding_time {
            doc["app_state"]["staking"]["params"]["unbonding_time"] = serde_json::Value::String(unbonding_time.clone());
        }
        if let Some(inflation) = &opts.inflation {
            doc["app_state"]["mint"]["minter"]["inflation"] = serde_json::Value::String(inflation.clone());
        }
        Ok(serde_json::to_vec(&doc)?)
    }

    fn rpc_endpoint(&self, _network_type: &str) -> Option<String> {
        None
    }

    fn snapshot_url(&self, _network_type: &str) -> Option<String> {
        None
    }

    fn available_networks(&self) -> Vec<String> {
        vec!["mainnet".to_string(), "testnet".to_string()]
    }

    fn default_ports(&self) -> PortSet {
        PortSet { rpc: 26657, p2p: 26656, grpc: 9090, rest: 1317, evm: None }
    }

    fn docker_image(&self) -> &str {
        &self.docker_image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_embeds_plugin_name_and_network_type() {
        let module = CosmosSdkModule::new("gaia", "gaiad", "cosmos", "uatom");
        assert_eq!(module.default_chain_id("testnet"), "gaia-testnet-1");
    }

    #[test]
    fn modify_genesis_applies_only_set_overrides() {
        let module = CosmosSdkModule::new("gaia", "gaiad", "cosmos", "uatom");
        let genesis = serde_json::json!({
            "chain_id": "old",
            "app_state": { "gov": {}, "staking": {}, "mint": {} },
        });
        let opts = GenesisOptions { chain_id: Some("new-1".to_string()), voting_period: None, unbonding_time: None, inflation: None };
        let out = module.modify_genesis(serde_json::to_vec(&genesis).unwrap(), &opts).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["chain_id"], "new-1");
    }

    #[test]
    fn empty_genesis_bytes_pass_through_unmodified() {
        let module = CosmosSdkModule::new("gaia", "gaiad", "cosmos", "uatom");
        let opts = GenesisOptions { chain_id: None, voting_period: None, unbonding_time: None, inflation: None };
        assert!(module.modify_genesis(Vec::new(), &opts).unwrap().is_empty());
    }
}
