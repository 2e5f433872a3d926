use serde::{Deserialize, Serialize};

use crate::metadata::{Metadata, ResourceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeStrategy {
    GovProposal,
    BinarySwap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeSpec {
    pub devnet_ref: ResourceKey,
    pub upgrade_name: String,
    pub target_height: u64,
    pub new_binary: String,
    pub strategy: UpgradeStrategy,
}

/// Forward-only state machine (§4.7); the only backwards edge permitted is
/// `Failed -> Pending` via an explicit `Retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradePhase {
    Pending,
    Proposing,
    Voting,
    WaitingForHeight,
    Switching,
    Verifying,
    Completed,
    Failed,
}

impl Default for UpgradePhase {
    fn default() -> Self {
        UpgradePhase::Pending
    }
}

impl UpgradePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, UpgradePhase::Completed | UpgradePhase::Failed)
    }

    /// Cancellation is rejected once a fleet-wide binary swap is underway —
    /// see §4.7, the switch/verify phases are irreversible.
    pub fn cancellable(self) -> bool {
        matches!(
            self,
            UpgradePhase::Pending
                | UpgradePhase::Proposing
                | UpgradePhase::Voting
                | UpgradePhase::WaitingForHeight
        )
    }

    /// The ordering used by the phase-monotonicity property (§8.6): every
    /// phase sequence observed for one upgrade must be non-decreasing here,
    /// except for the single terminal jump to `Failed`.
    pub fn ordinal(self) -> u8 {
        match self {
            UpgradePhase::Pending => 0,
            UpgradePhase::Proposing => 1,
            UpgradePhase::Voting => 2,
            UpgradePhase::WaitingForHeight => 3,
            UpgradePhase::Switching => 4,
            UpgradePhase::Verifying => 5,
            UpgradePhase::Completed => 6,
            UpgradePhase::Failed => 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeStatus {
    pub phase: UpgradePhase,
    pub proposal_id: Option<String>,
    pub current_height: u64,
    pub error: Option<String>,
    pub message: String,
    /// Set on entry to `Voting` or `Verifying`; the reconciler fails the
    /// upgrade once this elapses without the phase completing (§4.7).
    pub phase_deadline: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for UpgradeStatus {
    fn default() -> Self {
        Self {
            phase: UpgradePhase::default(),
            proposal_id: None,
            current_height: 0,
            error: None,
            message: String::new(),
            phase_deadline: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upgrade {
    pub metadata: Metadata,
    pub spec: UpgradeSpec,
    pub status: UpgradeStatus,
}

impl Upgrade {
    pub fn new(metadata: Metadata, spec: UpgradeSpec) -> Self {
        Self { metadata, spec, status: UpgradeStatus::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellable_phases() {
        assert!(UpgradePhase::Pending.cancellable());
        assert!(UpgradePhase::WaitingForHeight.cancellable());
        assert!(!UpgradePhase::Switching.cancellable());
        assert!(!UpgradePhase::Verifying.cancellable());
    }

    #[test]
    fn ordinal_is_monotonic_along_happy_path() {
        let happy = [
            UpgradePhase::Pending,
            UpgradePhase::Proposing,
            UpgradePhase::Voting,
            UpgradePhase::WaitingForHeight,
            UpgradePhase::Switching,
            UpgradePhase::Verifying,
            UpgradePhase::Completed,
        ];
        for w in happy.windows(2) {
            assert!(w[0].ordinal() < w[1].ordinal());
        }
    }
}
