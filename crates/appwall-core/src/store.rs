use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::anticensor::DialRetryConfig;
use crate::ids::EntityId;
use crate::status::AppPolicy;
use crate::types::{AppInfo, PackageInfo};

/// Persistence boundary for app policies, the app inventory and the
/// anti-censorship settings. A single `save_policy` call must be atomic.
pub trait PolicyStore {
    /// Unknown identities resolve to an untracked policy.
    fn load_policy(&self, entity: EntityId) -> Result<AppPolicy>;
    fn save_policy(&mut self, policy: &AppPolicy) -> Result<()>;
    fn load_dial_retry_config(&self) -> Result<DialRetryConfig>;
    fn save_dial_retry_config(&mut self, config: &DialRetryConfig) -> Result<()>;
    fn list_entities(&self) -> Result<Vec<AppInfo>>;
    fn packages_for(&self, entity: EntityId) -> Result<Vec<PackageInfo>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub policy: AppPolicy,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PolicyState {
    #[serde(default)]
    pub packages: Vec<PackageInfo>,
    #[serde(default)]
    pub policies: Vec<PolicyRecord>,
    #[serde(default)]
    pub dial_retry: DialRetryConfig,
}

impl PolicyState {
    pub fn is_tracked(&self, entity: EntityId) -> bool {
        self.packages.iter().any(|package| package.uid == entity)
    }

    pub fn policy(&self, entity: EntityId) -> AppPolicy {
        if !self.is_tracked(entity) {
            return AppPolicy::untracked(entity);
        }
        self.policies
            .iter()
            .find(|record| record.policy.entity_id == entity)
            .map(|record| record.policy)
            .unwrap_or_else(|| AppPolicy::new(entity))
    }

    pub fn set_policy(&mut self, policy: AppPolicy) {
        let now = OffsetDateTime::now_utc();
        match self
            .policies
            .iter_mut()
            .find(|record| record.policy.entity_id == policy.entity_id)
        {
            Some(record) => {
                record.policy = policy;
                record.updated_at = now;
            }
            None => self.policies.push(PolicyRecord {
                policy,
                updated_at: now,
            }),
        }
    }

    pub fn entities(&self) -> Vec<AppInfo> {
        self.packages
            .iter()
            .map(|package| AppInfo::new(package.clone(), self.policy(package.uid)))
            .collect()
    }

    pub fn packages_for(&self, entity: EntityId) -> Vec<PackageInfo> {
        self.packages
            .iter()
            .filter(|package| package.uid == entity)
            .cloned()
            .collect()
    }

    /// Adds or replaces a package, keyed by package name.
    pub fn upsert_package(&mut self, package: PackageInfo) {
        match self
            .packages
            .iter_mut()
            .find(|existing| existing.package_name == package.package_name)
        {
            Some(existing) => *existing = package,
            None => self.packages.push(package),
        }
    }

    /// Drops a package; the policy goes with the last package of its uid.
    pub fn remove_package(&mut self, package_name: &str) -> bool {
        let Some(index) = self
            .packages
            .iter()
            .position(|package| package.package_name == package_name)
        else {
            return false;
        };
        let removed = self.packages.remove(index);
        if !self.is_tracked(removed.uid) {
            self.policies
                .retain(|record| record.policy.entity_id != removed.uid);
        }
        true
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryPolicyStore {
    pub state: PolicyState,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_packages(packages: Vec<PackageInfo>) -> Self {
        Self {
            state: PolicyState {
                packages,
                ..PolicyState::default()
            },
        }
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn load_policy(&self, entity: EntityId) -> Result<AppPolicy> {
        Ok(self.state.policy(entity))
    }

    fn save_policy(&mut self, policy: &AppPolicy) -> Result<()> {
        self.state.set_policy(*policy);
        Ok(())
    }

    fn load_dial_retry_config(&self) -> Result<DialRetryConfig> {
        Ok(self.state.dial_retry)
    }

    fn save_dial_retry_config(&mut self, config: &DialRetryConfig) -> Result<()> {
        self.state.dial_retry = *config;
        Ok(())
    }

    fn list_entities(&self) -> Result<Vec<AppInfo>> {
        Ok(self.state.entities())
    }

    fn packages_for(&self, entity: EntityId) -> Result<Vec<PackageInfo>> {
        Ok(self.state.packages_for(entity))
    }
}

/// Keeps the whole [`PolicyState`] in one JSON document that is rewritten
/// through a temp file and renamed into place on every save.
#[derive(Debug, Clone)]
pub struct JsonPolicyStore {
    path: PathBuf,
    state: PolicyState,
}

impl JsonPolicyStore {
    pub fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("read policy state {}", path.display()))?;
            serde_json::from_str(&contents).context("parse policy state JSON")?
        } else {
            PolicyState::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &PolicyState {
        &self.state
    }

    pub fn import_packages(&mut self, packages: Vec<PackageInfo>) -> Result<usize> {
        let count = packages.len();
        for package in packages {
            self.state.upsert_package(package);
        }
        self.flush()?;
        Ok(count)
    }

    pub fn remove_package(&mut self, package_name: &str) -> Result<bool> {
        let removed = self.state.remove_package(package_name);
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create state dir {}", parent.display()))?;
        }
        let contents =
            serde_json::to_string_pretty(&self.state).context("render policy state JSON")?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, contents)
            .with_context(|| format!("write policy state {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("replace policy state {}", self.path.display()))?;
        Ok(())
    }

    /// Applies `change` and flushes; the in-memory state is rolled back when
    /// the flush fails so memory never runs ahead of disk.
    fn commit(&mut self, change: impl FnOnce(&mut PolicyState)) -> Result<()> {
        let previous = self.state.clone();
        change(&mut self.state);
        if let Err(err) = self.flush() {
            self.state = previous;
            return Err(err);
        }
        Ok(())
    }
}

impl PolicyStore for JsonPolicyStore {
    fn load_policy(&self, entity: EntityId) -> Result<AppPolicy> {
        Ok(self.state.policy(entity))
    }

    fn save_policy(&mut self, policy: &AppPolicy) -> Result<()> {
        let policy = *policy;
        self.commit(|state| state.set_policy(policy))
    }

    fn load_dial_retry_config(&self) -> Result<DialRetryConfig> {
        Ok(self.state.dial_retry)
    }

    fn save_dial_retry_config(&mut self, config: &DialRetryConfig) -> Result<()> {
        let config = *config;
        self.commit(|state| state.dial_retry = config)
    }

    fn list_entities(&self) -> Result<Vec<AppInfo>> {
        Ok(self.state.entities())
    }

    fn packages_for(&self, entity: EntityId) -> Result<Vec<PackageInfo>> {
        Ok(self.state.packages_for(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anticensor::{DialStrategy, RetryStrategy};
    use crate::status::{ConnectionStatus, FirewallStatus};

    fn package(uid: u32, name: &str) -> PackageInfo {
        PackageInfo {
            uid: EntityId(uid),
            package_name: name.to_string(),
            app_name: name.to_string(),
            is_system_app: false,
            app_category: "Other".to_string(),
        }
    }

    #[test]
    fn test_unknown_uid_is_untracked() {
        let store = MemoryPolicyStore::with_packages(vec![package(10_001, "org.example")]);
        let policy = store.load_policy(EntityId(4242)).unwrap();
        assert_eq!(policy.firewall_status, FirewallStatus::Untracked);
    }

    #[test]
    fn test_first_observation_defaults_to_allow() {
        let store = MemoryPolicyStore::with_packages(vec![package(10_001, "org.example")]);
        let policy = store.load_policy(EntityId(10_001)).unwrap();
        assert_eq!(policy, AppPolicy::new(EntityId(10_001)));
    }

    #[test]
    fn test_json_store_persists_policy_and_dial_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = JsonPolicyStore::open(&path).unwrap();
        store
            .import_packages(vec![package(10_001, "org.example"), package(10_001, "org.example.sync")])
            .unwrap();
        let policy = AppPolicy::with_status(
            EntityId(10_001),
            FirewallStatus::None,
            ConnectionStatus::Metered,
        );
        store.save_policy(&policy).unwrap();
        store
            .save_dial_retry_config(&DialRetryConfig::new(
                DialStrategy::NeverSplit,
                RetryStrategy::RetryNever,
            ))
            .unwrap();

        let reopened = JsonPolicyStore::open(&path).unwrap();
        assert_eq!(reopened.load_policy(EntityId(10_001)).unwrap(), policy);
        assert_eq!(
            reopened.load_dial_retry_config().unwrap().dial_strategy,
            DialStrategy::NeverSplit
        );
        assert_eq!(reopened.packages_for(EntityId(10_001)).unwrap().len(), 2);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_policy_dropped_with_last_package() {
        let mut state = PolicyState::default();
        state.upsert_package(package(10_001, "org.example"));
        state.upsert_package(package(10_001, "org.example.sync"));
        state.set_policy(AppPolicy::with_status(
            EntityId(10_001),
            FirewallStatus::Isolate,
            ConnectionStatus::Allow,
        ));

        assert!(state.remove_package("org.example"));
        assert_eq!(state.policies.len(), 1);
        assert!(state.remove_package("org.example.sync"));
        assert!(state.policies.is_empty());
        assert!(!state.remove_package("org.example.sync"));
    }

    #[test]
    fn test_upsert_replaces_by_package_name() {
        let mut state = PolicyState::default();
        state.upsert_package(package(10_001, "org.example"));
        let mut renamed = package(10_001, "org.example");
        renamed.app_name = "Example".to_string();
        state.upsert_package(renamed);
        assert_eq!(state.packages.len(), 1);
        assert_eq!(state.packages[0].app_name, "Example");
    }
}
