//! Resources created during provisioning that must be deleted again unless
//! provisioning completes.

use std::fmt;

use tracing::{error, info};

use crate::cloud::{ApiError, CloudApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    SshKey,
    PlacementGroup,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SshKey => "ssh key",
            Self::PlacementGroup => "placement group",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeletion {
    pub kind: ResourceKind,
    pub id: i64,
    pub name: String,
}

/// What happened to one pending deletion during rollback.
#[derive(Debug)]
pub struct RollbackOutcome {
    pub resource: PendingDeletion,
    pub error: Option<ApiError>,
}

#[derive(Debug, Default)]
pub struct DanglingResources {
    pending: Vec<PendingDeletion>,
}

impl DanglingResources {
    pub fn register(&mut self, kind: ResourceKind, id: i64, name: impl Into<String>) {
        self.pending.push(PendingDeletion {
            kind,
            id,
            name: name.into(),
        });
    }

    pub fn pending(&self) -> &[PendingDeletion] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget everything; the resources now belong to the machine.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Delete every pending resource in registration order. A failed
    /// deletion is logged and does not stop the others.
    pub async fn destroy_all(&mut self, api: &dyn CloudApi) -> Vec<RollbackOutcome> {
        let mut outcomes = Vec::with_capacity(self.pending.len());
        for resource in std::mem::take(&mut self.pending) {
            let result = match resource.kind {
                ResourceKind::SshKey => api.delete_ssh_key(resource.id).await,
                ResourceKind::PlacementGroup => api.delete_placement_group(resource.id).await,
            };
            let error = match result {
                Ok(()) => {
                    info!(kind = %resource.kind, id = resource.id, name = %resource.name, "rolled back");
                    None
                }
                Err(e) => {
                    error!(kind = %resource.kind, id = resource.id, name = %resource.name, error = %e, "could not roll back");
                    Some(e)
                }
            };
            outcomes.push(RollbackOutcome { resource, error });
        }
        outcomes
    }
}
