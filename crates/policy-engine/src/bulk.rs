//! Bulk application of one block type over a filtered app set.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use appwall_core::error::AppwallError;
use appwall_core::ids::EntityId;
use appwall_core::status::{AppPolicy, ConnectionStatus, FirewallStatus, Override};
use appwall_core::store::PolicyStore;
use appwall_core::types::{AppInfo, PackageInfo};

use crate::resolver::{Refusal, StatusResolver};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Unmeter,
    Meter,
    Bypass,
    Lockdown,
    Exclude,
    BypassDnsFirewall,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BulkDirection {
    #[default]
    Set,
    Clear,
}

impl BlockType {
    pub const ALL: [BlockType; 6] = [
        BlockType::Unmeter,
        BlockType::Meter,
        BlockType::Bypass,
        BlockType::Lockdown,
        BlockType::Exclude,
        BlockType::BypassDnsFirewall,
    ];

    /// The override this type sets, `None` for the connection bit types.
    pub fn as_override(&self) -> Option<Override> {
        match self {
            BlockType::Unmeter | BlockType::Meter => None,
            BlockType::Bypass => Some(Override::BypassUniversal),
            BlockType::Lockdown => Some(Override::Isolate),
            BlockType::Exclude => Some(Override::Exclude),
            BlockType::BypassDnsFirewall => Some(Override::BypassDnsFirewall),
        }
    }

    /// Types whose direction goes back to `Set` once this type is applied.
    pub fn resets(&self) -> Vec<BlockType> {
        BlockType::ALL
            .into_iter()
            .filter(|other| other != self)
            .filter(|other| self.as_override().is_some() || other.as_override().is_some())
            .collect()
    }
}

impl BulkDirection {
    pub fn flipped(&self) -> Self {
        match self {
            BulkDirection::Set => BulkDirection::Clear,
            BulkDirection::Clear => BulkDirection::Set,
        }
    }
}

/// Per block type direction, kept by the front-end between invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkSession {
    #[serde(default)]
    directions: BTreeMap<BlockType, BulkDirection>,
}

impl BulkSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(&self, block_type: BlockType) -> BulkDirection {
        self.directions
            .get(&block_type)
            .copied()
            .unwrap_or_default()
    }

    /// Flips `block_type` and resets the types it overwrote.
    pub fn advance(&mut self, block_type: BlockType) {
        let next = self.direction(block_type).flipped();
        for other in block_type.resets() {
            self.directions.remove(&other);
        }
        self.directions.insert(block_type, next);
    }
}

/// Policy a bulk run writes for one identity.
pub fn target_policy(
    block_type: BlockType,
    direction: BulkDirection,
    current: &AppPolicy,
) -> AppPolicy {
    let block = direction == BulkDirection::Set;
    let id = current.entity_id;
    let base = if current.firewall_status == FirewallStatus::None {
        current.connection_status
    } else {
        ConnectionStatus::Allow
    };
    match block_type {
        BlockType::Unmeter => {
            AppPolicy::with_status(id, FirewallStatus::None, base.with_wifi_blocked(block))
        }
        BlockType::Meter => {
            AppPolicy::with_status(id, FirewallStatus::None, base.with_mobile_data_blocked(block))
        }
        BlockType::Bypass
        | BlockType::Lockdown
        | BlockType::Exclude
        | BlockType::BypassDnsFirewall => match (direction, block_type.as_override()) {
            (BulkDirection::Set, Some(selected)) => {
                AppPolicy::with_status(id, selected.status(), ConnectionStatus::Allow)
            }
            _ => AppPolicy::new(id),
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntityOutcome {
    Applied { policy: AppPolicy },
    Skipped { refusal: Refusal },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityResult {
    pub entity_id: EntityId,
    pub packages: Vec<String>,
    pub outcome: EntityOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkReport {
    pub batch_id: Uuid,
    pub block_type: BlockType,
    pub direction: BulkDirection,
    pub started_at: OffsetDateTime,
    pub results: Vec<EntityResult>,
}

impl BulkReport {
    fn start(block_type: BlockType, direction: BulkDirection) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            block_type,
            direction,
            started_at: OffsetDateTime::now_utc(),
            results: Vec::new(),
        }
    }

    fn count(&self, wanted: fn(&EntityOutcome) -> bool) -> usize {
        self.results
            .iter()
            .filter(|result| wanted(&result.outcome))
            .count()
    }

    pub fn applied(&self) -> usize {
        self.count(|outcome| matches!(outcome, EntityOutcome::Applied { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, EntityOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, EntityOutcome::Skipped { .. }))
    }

    pub fn is_partial_failure(&self) -> bool {
        self.failed() > 0 && self.applied() > 0
    }

    pub fn human_summary(&self) -> String {
        format!(
            "{} {}: {} applied, {} skipped, {} failed",
            self.direction,
            self.block_type,
            self.applied(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Applies one block type to every identity in a filtered snapshot.
#[derive(Debug, Clone)]
pub struct BulkApplicator {
    resolver: StatusResolver,
}

impl BulkApplicator {
    pub fn new(resolver: StatusResolver) -> Self {
        Self { resolver }
    }

    /// One write per identity. A failed write is recorded and the run
    /// continues with the remaining identities.
    pub fn apply_bulk<S: PolicyStore + ?Sized>(
        &self,
        session: &mut BulkSession,
        block_type: BlockType,
        entities: &[AppInfo],
        store: &mut S,
    ) -> BulkReport {
        let direction = session.direction(block_type);
        let mut report = BulkReport::start(block_type, direction);
        let exclusion_refused = self.resolver.vpn_lockdown() && block_type == BlockType::Exclude;

        for (current, rows) in group_by_entity(entities) {
            let outcome = match sharing_packages(&current, &rows, store) {
                Ok(packages) => self.apply_one(
                    block_type,
                    direction,
                    exclusion_refused,
                    &current,
                    &packages,
                    store,
                ),
                Err(reason) => EntityOutcome::Failed { reason },
            };
            report.results.push(EntityResult {
                entity_id: current.entity_id,
                packages: package_names(&rows),
                outcome,
            });
        }

        if exclusion_refused {
            warn!(
                batch = %report.batch_id,
                skipped = report.skipped(),
                "bulk exclusion refused while the VPN is in lockdown"
            );
            return report;
        }
        session.advance(block_type);

        info!(
            batch = %report.batch_id,
            block_type = %block_type,
            direction = %direction,
            applied = report.applied(),
            skipped = report.skipped(),
            failed = report.failed(),
            "bulk apply finished"
        );
        report
    }

    fn apply_one<S: PolicyStore + ?Sized>(
        &self,
        block_type: BlockType,
        direction: BulkDirection,
        exclusion_refused: bool,
        current: &AppPolicy,
        packages: &[PackageInfo],
        store: &mut S,
    ) -> EntityOutcome {
        if let Some(refusal) = self.resolver.guard(current, packages) {
            return EntityOutcome::Skipped { refusal };
        }
        if exclusion_refused
            || (self.resolver.vpn_lockdown() && current.firewall_status == FirewallStatus::Exclude)
        {
            return EntityOutcome::Skipped {
                refusal: Refusal::ExclusionInLockdown,
            };
        }
        let policy = target_policy(block_type, direction, current);
        match store.save_policy(&policy) {
            Ok(()) => EntityOutcome::Applied { policy },
            Err(err) => {
                let err = AppwallError::persistence(current.entity_id, &err);
                warn!(uid = %current.entity_id, error = %err, "bulk write failed");
                EntityOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Groups rows by uid in first-seen order, keeping the snapshot policy.
fn group_by_entity(entities: &[AppInfo]) -> Vec<(AppPolicy, Vec<PackageInfo>)> {
    let mut groups: Vec<(AppPolicy, Vec<PackageInfo>)> = Vec::new();
    for app in entities {
        match groups
            .iter_mut()
            .find(|(policy, _)| policy.entity_id == app.uid())
        {
            Some((_, packages)) => packages.push(app.package.clone()),
            None => groups.push((app.policy, vec![app.package.clone()])),
        }
    }
    groups
}

/// Every package on the uid: the filtered rows plus stored siblings the
/// filter left out.
fn sharing_packages<S: PolicyStore + ?Sized>(
    current: &AppPolicy,
    rows: &[PackageInfo],
    store: &S,
) -> Result<Vec<PackageInfo>, String> {
    let stored = store
        .packages_for(current.entity_id)
        .map_err(|err| format!("look up packages for uid {}: {err:#}", current.entity_id))?;
    let mut packages = rows.to_vec();
    for package in stored {
        if !packages
            .iter()
            .any(|known| known.package_name == package.package_name)
        {
            packages.push(package);
        }
    }
    Ok(packages)
}

fn package_names(packages: &[PackageInfo]) -> Vec<String> {
    packages
        .iter()
        .map(|package| package.package_name.clone())
        .collect()
}

impl FromStr for BlockType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().replace('_', "-").as_str() {
            "unmeter" | "wifi" => Ok(BlockType::Unmeter),
            "meter" | "mobile" => Ok(BlockType::Meter),
            "bypass" => Ok(BlockType::Bypass),
            "lockdown" | "isolate" => Ok(BlockType::Lockdown),
            "exclude" => Ok(BlockType::Exclude),
            "bypass-dns-firewall" => Ok(BlockType::BypassDnsFirewall),
            _ => Err(format!("unknown block type: {value}")),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            BlockType::Unmeter => "unmeter",
            BlockType::Meter => "meter",
            BlockType::Bypass => "bypass",
            BlockType::Lockdown => "lockdown",
            BlockType::Exclude => "exclude",
            BlockType::BypassDnsFirewall => "bypass-dns-firewall",
        };
        write!(f, "{value}")
    }
}

impl fmt::Display for BulkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkDirection::Set => write!(f, "set"),
            BulkDirection::Clear => write!(f, "clear"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use appwall_core::anticensor::DialRetryConfig;
    use appwall_core::store::MemoryPolicyStore;

    const SELF_PACKAGE: &str = "io.appwall";

    fn package(uid: u32, name: &str) -> PackageInfo {
        PackageInfo {
            uid: EntityId(uid),
            package_name: name.to_string(),
            app_name: name.to_string(),
            is_system_app: false,
            app_category: "Other".to_string(),
        }
    }

    fn row(uid: u32, name: &str, firewall: FirewallStatus, connection: ConnectionStatus) -> AppInfo {
        AppInfo::new(
            package(uid, name),
            AppPolicy::with_status(EntityId(uid), firewall, connection),
        )
    }

    fn applicator(lockdown: bool) -> BulkApplicator {
        BulkApplicator::new(StatusResolver::new(SELF_PACKAGE, lockdown))
    }

    /// Counts writes and fails the ones listed in `failing`.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryPolicyStore,
        writes: usize,
        failing: Vec<EntityId>,
        lookup_fails: bool,
    }

    impl PolicyStore for RecordingStore {
        fn load_policy(&self, entity: EntityId) -> Result<AppPolicy> {
            self.inner.load_policy(entity)
        }

        fn save_policy(&mut self, policy: &AppPolicy) -> Result<()> {
            self.writes += 1;
            if self.failing.contains(&policy.entity_id) {
                return Err(anyhow!("disk full"));
            }
            self.inner.save_policy(policy)
        }

        fn load_dial_retry_config(&self) -> Result<DialRetryConfig> {
            self.inner.load_dial_retry_config()
        }

        fn save_dial_retry_config(&mut self, config: &DialRetryConfig) -> Result<()> {
            self.inner.save_dial_retry_config(config)
        }

        fn list_entities(&self) -> Result<Vec<AppInfo>> {
            self.inner.list_entities()
        }

        fn packages_for(&self, entity: EntityId) -> Result<Vec<PackageInfo>> {
            if self.lookup_fails {
                return Err(anyhow!("inventory unavailable"));
            }
            self.inner.packages_for(entity)
        }
    }

    fn three_apps() -> Vec<AppInfo> {
        vec![
            row(10_001, "com.example.a", FirewallStatus::None, ConnectionStatus::Allow),
            row(10_002, "com.example.b", FirewallStatus::None, ConnectionStatus::Metered),
            row(10_003, "com.example.c", FirewallStatus::Isolate, ConnectionStatus::Allow),
        ]
    }

    #[test]
    fn test_empty_set_writes_nothing() {
        let mut store = RecordingStore::default();
        let mut session = BulkSession::new();
        for block_type in BlockType::ALL {
            let report = applicator(false).apply_bulk(&mut session, block_type, &[], &mut store);
            assert!(report.results.is_empty());
        }
        assert_eq!(store.writes, 0);
    }

    #[test]
    fn test_exclude_set_then_clear() {
        let mut store = RecordingStore::default();
        let mut session = BulkSession::new();
        let apps = three_apps();
        let bulk = applicator(false);

        let report = bulk.apply_bulk(&mut session, BlockType::Exclude, &apps, &mut store);
        assert_eq!(report.direction, BulkDirection::Set);
        assert_eq!(report.applied(), 3);
        for result in &report.results {
            let EntityOutcome::Applied { policy } = &result.outcome else {
                panic!("expected applied outcome");
            };
            assert_eq!(policy.firewall_status, FirewallStatus::Exclude);
        }
        assert_eq!(session.direction(BlockType::Exclude), BulkDirection::Clear);

        let report = bulk.apply_bulk(&mut session, BlockType::Exclude, &apps, &mut store);
        assert_eq!(report.direction, BulkDirection::Clear);
        for result in &report.results {
            assert_eq!(
                result.outcome,
                EntityOutcome::Applied {
                    policy: AppPolicy::new(result.entity_id)
                }
            );
        }
        assert_eq!(session.direction(BlockType::Exclude), BulkDirection::Set);
    }

    #[test]
    fn test_one_write_per_identity() {
        let mut store = RecordingStore::default();
        let mut session = BulkSession::new();
        let apps = vec![
            row(10_001, "com.example.a", FirewallStatus::None, ConnectionStatus::Allow),
            row(10_001, "com.example.a.sync", FirewallStatus::None, ConnectionStatus::Allow),
            row(10_002, "com.example.b", FirewallStatus::None, ConnectionStatus::Allow),
        ];
        let report = applicator(false).apply_bulk(&mut session, BlockType::Meter, &apps, &mut store);
        assert_eq!(store.writes, 2);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].packages.len(), 2);
    }

    #[test]
    fn test_partial_failure_continues() {
        let mut store = RecordingStore {
            failing: vec![EntityId(10_002)],
            ..RecordingStore::default()
        };
        let mut session = BulkSession::new();
        let report =
            applicator(false).apply_bulk(&mut session, BlockType::Bypass, &three_apps(), &mut store);

        assert_eq!(store.writes, 3);
        assert_eq!(report.applied(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.is_partial_failure());
        assert!(matches!(
            &report.results[1].outcome,
            EntityOutcome::Failed { reason } if reason.contains("disk full")
        ));
        assert_eq!(
            store.inner.state.policies.len(),
            2,
            "failed identity must not be persisted"
        );
    }

    #[test]
    fn test_untracked_and_self_are_skipped() {
        let mut store = RecordingStore::default();
        let mut session = BulkSession::new();
        let apps = vec![
            row(10_001, "com.example.a", FirewallStatus::None, ConnectionStatus::Allow),
            row(10_009, "com.example.gone", FirewallStatus::Untracked, ConnectionStatus::Allow),
            row(10_010, SELF_PACKAGE, FirewallStatus::None, ConnectionStatus::Allow),
        ];
        let report = applicator(false).apply_bulk(&mut session, BlockType::Unmeter, &apps, &mut store);
        assert_eq!(report.applied(), 1);
        assert_eq!(report.skipped(), 2);
        assert_eq!(report.failed(), 0);
        assert_eq!(store.writes, 1);
    }

    #[test]
    fn test_exclude_in_lockdown_is_refused() {
        let mut store = RecordingStore::default();
        let mut session = BulkSession::new();
        let report =
            applicator(true).apply_bulk(&mut session, BlockType::Exclude, &three_apps(), &mut store);
        assert_eq!(report.skipped(), 3);
        assert_eq!(store.writes, 0);
        assert_eq!(session.direction(BlockType::Exclude), BulkDirection::Set);
    }

    #[test]
    fn test_exclude_in_lockdown_keeps_guard_reasons() {
        let mut store = RecordingStore::default();
        let mut session = BulkSession::new();
        let apps = vec![
            row(10_001, "com.example.a", FirewallStatus::None, ConnectionStatus::Allow),
            row(10_009, "com.example.gone", FirewallStatus::Untracked, ConnectionStatus::Allow),
            row(10_010, SELF_PACKAGE, FirewallStatus::None, ConnectionStatus::Allow),
        ];
        let report = applicator(true).apply_bulk(&mut session, BlockType::Exclude, &apps, &mut store);

        let refusals: Vec<EntityOutcome> = report
            .results
            .iter()
            .map(|result| result.outcome.clone())
            .collect();
        assert_eq!(
            refusals,
            vec![
                EntityOutcome::Skipped {
                    refusal: Refusal::ExclusionInLockdown
                },
                EntityOutcome::Skipped {
                    refusal: Refusal::Untracked
                },
                EntityOutcome::Skipped {
                    refusal: Refusal::SelfPackage
                },
            ]
        );
        assert_eq!(store.writes, 0);
        assert_eq!(session.direction(BlockType::Exclude), BulkDirection::Set);
    }

    #[test]
    fn test_self_uid_skipped_when_filter_selects_sibling() {
        let helper = package(10_003, "io.appwall.helper");
        let mut store = RecordingStore {
            inner: MemoryPolicyStore::with_packages(vec![
                package(10_003, SELF_PACKAGE),
                helper.clone(),
            ]),
            ..RecordingStore::default()
        };
        let mut session = BulkSession::new();
        let rows = vec![AppInfo::new(helper, AppPolicy::new(EntityId(10_003)))];

        let report = applicator(false).apply_bulk(&mut session, BlockType::Lockdown, &rows, &mut store);
        assert_eq!(
            report.results[0].outcome,
            EntityOutcome::Skipped {
                refusal: Refusal::SelfPackage
            }
        );
        assert_eq!(report.results[0].packages, vec!["io.appwall.helper".to_string()]);
        assert_eq!(store.writes, 0);
    }

    #[test]
    fn test_package_lookup_failure_is_reported() {
        let mut store = RecordingStore {
            lookup_fails: true,
            ..RecordingStore::default()
        };
        let mut session = BulkSession::new();
        let report =
            applicator(false).apply_bulk(&mut session, BlockType::Meter, &three_apps(), &mut store);
        assert_eq!(report.failed(), 3);
        assert_eq!(store.writes, 0);
        assert!(matches!(
            &report.results[0].outcome,
            EntityOutcome::Failed { reason } if reason.contains("inventory unavailable")
        ));
    }

    #[test]
    fn test_connection_targets_keep_other_bit() {
        let metered = AppPolicy::with_status(EntityId(1), FirewallStatus::None, ConnectionStatus::Metered);
        assert_eq!(
            target_policy(BlockType::Unmeter, BulkDirection::Set, &metered).connection_status,
            ConnectionStatus::Both
        );
        assert_eq!(
            target_policy(BlockType::Meter, BulkDirection::Clear, &metered).connection_status,
            ConnectionStatus::Allow
        );

        let isolated = AppPolicy::with_status(EntityId(1), FirewallStatus::Isolate, ConnectionStatus::Both);
        assert_eq!(
            target_policy(BlockType::Unmeter, BulkDirection::Set, &isolated),
            AppPolicy::with_status(EntityId(1), FirewallStatus::None, ConnectionStatus::Unmetered)
        );
        assert_eq!(
            target_policy(BlockType::Meter, BulkDirection::Clear, &isolated),
            AppPolicy::new(EntityId(1))
        );
    }

    #[test]
    fn test_direction_cascade() {
        let mut session = BulkSession::new();
        session.advance(BlockType::Unmeter);
        session.advance(BlockType::Meter);
        session.advance(BlockType::Bypass);
        assert_eq!(session.direction(BlockType::Unmeter), BulkDirection::Set);
        assert_eq!(session.direction(BlockType::Meter), BulkDirection::Set);
        assert_eq!(session.direction(BlockType::Bypass), BulkDirection::Clear);

        session.advance(BlockType::Unmeter);
        session.advance(BlockType::Meter);
        assert_eq!(session.direction(BlockType::Bypass), BulkDirection::Set);
        assert_eq!(session.direction(BlockType::Unmeter), BulkDirection::Clear);
        assert_eq!(session.direction(BlockType::Meter), BulkDirection::Clear);
    }

    #[test]
    fn test_session_round_trips_through_json() {
        let mut session = BulkSession::new();
        session.advance(BlockType::Lockdown);
        let json = serde_json::to_string(&session).unwrap();
        let restored: BulkSession = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
        assert_eq!(restored.direction(BlockType::Lockdown), BulkDirection::Clear);
    }
}
