use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::status::{AppPolicy, ConnectionStatus, FirewallStatus};

/// One installed package as reported by the inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageInfo {
    pub uid: EntityId,
    pub package_name: String,
    pub app_name: String,
    #[serde(default)]
    pub is_system_app: bool,
    #[serde(default)]
    pub app_category: String,
}

/// Inventory row joined with the policy of its identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppInfo {
    pub package: PackageInfo,
    pub policy: AppPolicy,
}

impl AppInfo {
    pub fn new(package: PackageInfo, policy: AppPolicy) -> Self {
        Self { package, policy }
    }

    pub fn uid(&self) -> EntityId {
        self.package.uid
    }

    pub fn app_name(&self) -> &str {
        &self.package.app_name
    }

    pub fn package_name(&self) -> &str {
        &self.package.package_name
    }

    pub fn firewall_status(&self) -> FirewallStatus {
        self.policy.firewall_status
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.policy.connection_status
    }
}
