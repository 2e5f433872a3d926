//! The `NetworkModule` plugin contract (§6) and the in-process registry that
//! replaces the source's subprocess-RPC plugin host, per the substitution
//! spec.md §9 explicitly endorses. Modules are loaded once at startup and
//! threaded explicitly through construction rather than registered into
//! process-wide mutable state.

pub mod cosmos;

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PortSet {
    pub rpc: u16,
    pub p2p: u16,
    pub grpc: u16,
    pub rest: u16,
    pub evm: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub binary_name: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct GenesisOptions {
    pub chain_id: Option<String>,
    pub voting_period: Option<String>,
    pub unbonding_time: Option<String>,
    pub inflation: Option<String>,
}

/// Chain-specific knowledge the otherwise chain-agnostic core consumes.
/// Implementations are expected to be cheap to clone or kept behind an
/// `Arc` by the registry; the trait itself stays synchronous because every
/// method here is pure computation over the plugin's static configuration
/// (network calls belong to the NodeRuntime/orchestrator collaborators).
pub trait NetworkModule: Send + Sync {
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;
    fn version(&self) -> &str;

    fn binary_name(&self) -> &str;
    fn default_binary_version(&self) -> &str;
    fn build_config(&self, network_type: &str) -> BuildConfig;

    fn default_chain_id(&self, network_type: &str) -> String;
    fn bech32_prefix(&self) -> &str;
    fn base_denom(&self) -> &str;

    fn init_command(&self, home: &str, chain_id: &str, moniker: &str) -> Vec<String>;
    fn start_command(&self, home: &str) -> Vec<String>;
    fn export_command(&self, home: &str) -> Vec<String>;
    fn default_moniker(&self, index: u32) -> String {
        format!("{}-{index}", self.name())
    }

    fn modify_genesis(&self, genesis: Vec<u8>, opts: &GenesisOptions) -> Result<Vec<u8>>;
    fn rpc_endpoint(&self, network_type: &str) -> Option<String>;
    fn snapshot_url(&self, network_type: &str) -> Option<String>;
    fn available_networks(&self) -> Vec<String>;

    fn default_ports(&self) -> PortSet;

    fn docker_image(&self) -> &str;
    fn docker_image_tag(&self, version: &str) -> String {
        version.to_string()
    }
    fn docker_home_dir(&self) -> &str {
        "/root/.chain"
    }
}

/// Threaded explicitly through `wiring` rather than stashed in a
/// process-wide static, per the Design Notes' rejection of the global
/// mutable registry pattern.
#[derive(Default)]
pub struct NetworkRegistry {
    modules: BTreeMap<String, Box<dyn NetworkModule>>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn NetworkModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    pub fn get(&self, plugin: &str) -> Result<&dyn NetworkModule> {
        self.modules
            .get(plugin)
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::validation(format!("unknown network plugin {plugin:?}")))
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl NetworkModule for Dummy {
        fn name(&self) -> &str {
            "dummy"
        }
        fn display_name(&self) -> &str {
            "Dummy Chain"
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
        fn binary_name(&self) -> &str {
            "dummyd"
        }
        fn default_binary_version(&self) -> &str {
            "v1.0.0"
        }
        fn build_config(&self, network_type: &str) -> BuildConfig {
            BuildConfig { binary_name: "dummyd".to_string(), source: network_type.to_string() }
        }
        fn default_chain_id(&self, network_type: &str) -> String {
            format!("dummy-{network_type}")
        }
        fn bech32_prefix(&self) -> &str {
            "dummy"
        }
        fn base_denom(&self) -> &str {
            "udummy"
        }
        fn init_command(&self, home: &str, chain_id: &str, moniker: &str) -> Vec<String> {
            vec!["dummyd".into(), "init".into(), moniker.into(), "--chain-id".into(), chain_id.into(), "--home".into(), home.into()]
        }
        fn start_command(&self, home: &str) -> Vec<String> {
            vec!["dummyd".into(), "start".into(), "--home".into(), home.into()]
        }
        fn export_command(&self, home: &str) -> Vec<String> {
            vec!["dummyd".into(), "export".into(), "--home".into(), home.into()]
        }
        fn modify_genesis(&self, genesis: Vec<u8>, _opts: &GenesisOptions) -> Result<Vec<u8>> {
            Ok(genesis)
        }
        fn rpc_endpoint(&self, _network_type: &str) -> Option<String> {
            None
        }
        fn snapshot_url(&self, _network_type: &str) -> Option<String> {
            None
        }
        fn available_networks(&self) -> Vec<String> {
            vec!["testnet".to_string()]
        }
        fn default_ports(&self) -> PortSet {
            PortSet { rpc: 26657, p2p: 26656, grpc: 9090, rest: 1317, evm: None }
        }
        fn docker_image(&self) -> &str {
            "dummy/dummyd"
        }
    }

    #[test]
    fn unknown_plugin_is_a_validation_error() {
        let registry = NetworkRegistry::new();
        assert!(registry.get("nope").is_err());
    }

    #[test]
    fn registered_module_is_retrievable_by_name() {
        let mut registry = NetworkRegistry::new();
        registry.register(Box::new(Dummy));
        assert_eq!(registry.get("dummy").unwrap().display_name(), "Dummy Chain");
    }
}
