//! Declarative resource types: each kind pairs an author-controlled `Spec`
//! with a reconciler-controlled `Status`, joined by the shared
//! [`crate::metadata::Metadata`] envelope (§3).

pub mod devnet;
pub mod node;
pub mod transaction;
pub mod upgrade;

pub use devnet::{Devnet, DevnetDesiredState, DevnetMode, DevnetPhase, DevnetSpec, DevnetStatus, GenesisOverrides, GenesisSource};
pub use node::{DesiredRunState, Node, NodePhase, NodeRole, NodeSpec, NodeStatus};
pub use transaction::{Transaction, TransactionPhase, TransactionSpec, TransactionStatus};
pub use upgrade::{Upgrade, UpgradePhase, UpgradeSpec, UpgradeStatus, UpgradeStrategy};

use crate::metadata::{Metadata, WithMetadata};

impl WithMetadata for Devnet {
    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl WithMetadata for Node {
    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl WithMetadata for Upgrade {
    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl WithMetadata for Transaction {
    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Resource kinds known to the store and controller manager. Used as the
/// routing key between `WorkQueue`s and as the `kind` tag on log spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Devnet,
    Node,
    Upgrade,
    Transaction,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Devnet => "devnet",
            Kind::Node => "node",
            Kind::Upgrade => "upgrade",
            Kind::Transaction => "transaction",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
