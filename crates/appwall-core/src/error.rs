use thiserror::Error;

use crate::ids::EntityId;

#[derive(Debug, Error)]
pub enum AppwallError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to persist policy for uid {entity}: {reason}")]
    Persistence { entity: EntityId, reason: String },
    #[error("no installed package with uid {0}")]
    UnknownEntity(EntityId),
}

impl AppwallError {
    pub fn persistence(entity: EntityId, err: &anyhow::Error) -> Self {
        AppwallError::Persistence {
            entity,
            reason: format!("{err:#}"),
        }
    }
}
