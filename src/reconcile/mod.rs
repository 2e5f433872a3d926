//! The reconciler contract (§4.4): one pure-ish async function per resource
//! kind that loads current state, diffs it against desired state, calls
//! collaborators, and writes the result back.

pub mod devnet;
pub mod node;
pub mod transaction;
pub mod upgrade;

use async_trait::async_trait;

use crate::metadata::ResourceKey;

/// What a reconcile pass tells the [`crate::controller::ControllerManager`]
/// to do with the key next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing more to do until the next external change.
    Success,
    /// Transient failure; re-queue with backoff. Carries a diagnostic.
    Retry(String),
    /// Unrecoverable; do not re-queue. The reconciler has already recorded
    /// the failure on the resource's Status.
    Fatal(String),
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &ResourceKey) -> Outcome;
}
