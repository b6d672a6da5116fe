use crate::foundation::{NodeError, OperatorAddress, Result};
use serde::{Deserialize, Serialize};

/// Keep lifecycle as recorded by the host chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum KeepState {
    AwaitingKey,
    Active,
    AwaitingSignature,
    Closed,
    Terminated,
}

/// Signing-group shape announced at keep creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupParameters {
    pub members: Vec<OperatorAddress>,
    pub honest_threshold: u64,
}

impl GroupParameters {
    pub fn new(members: Vec<OperatorAddress>, honest_threshold: u64) -> Self {
        Self { members, honest_threshold }
    }

    /// Only groups where the honest threshold equals the group size and the
    /// group has at least two members are supported; anything else is
    /// refused before key generation is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.members.len() < 2 {
            return Err(NodeError::Config(format!(
                "group has {} members; only groups with at least 2 members are supported",
                self.members.len()
            )));
        }
        if self.honest_threshold != self.members.len() as u64 {
            return Err(NodeError::Config(format!(
                "group has honest threshold {} and {} members; only groups with honest threshold equal to group size are supported",
                self.honest_threshold,
                self.members.len()
            )));
        }
        Ok(())
    }

    pub fn contains(&self, operator: &OperatorAddress) -> bool {
        self.members.contains(operator)
    }

    /// Zero-based position of the operator within the ordered member list.
    pub fn member_index(&self, operator: &OperatorAddress) -> Option<u32> {
        self.members.iter().position(|member| member == operator).map(|index| index as u32)
    }
}
