use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tfprep_domain::ResourceIdentity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Change {
    Created { resource: ResourceIdentity },
    AlreadyExists { resource: ResourceIdentity },
    ProviderRegistered { namespace: String, retries: u32 },
    PolicyUpdated { vault: ResourceIdentity, principal_id: String },
    PolicyUnchanged { vault: ResourceIdentity, principal_id: String },
    LockCreated { lock: ResourceIdentity },
    LockPresent { lock: ResourceIdentity },
}

impl Change {
    /// Whether this event changed anything in the subscription.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Change::Created { .. }
                | Change::ProviderRegistered { .. }
                | Change::PolicyUpdated { .. }
                | Change::LockCreated { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub changes: Vec<Change>,
}

impl ProvisionReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            changes: Vec::new(),
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn created(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, Change::Created { .. } | Change::LockCreated { .. }))
            .count()
    }

    /// True when the run found everything already in place.
    pub fn is_noop(&self) -> bool {
        !self.changes.iter().any(Change::is_mutation)
    }
}

impl Default for ProvisionReport {
    fn default() -> Self {
        Self::new()
    }
}
