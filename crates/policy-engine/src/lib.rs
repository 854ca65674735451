use anyhow::Result;
use tracing::info;

use appwall_core::config::Config;
use appwall_core::error::AppwallError;
use appwall_core::ids::EntityId;
use appwall_core::status::AppPolicy;
use appwall_core::store::PolicyStore;
use appwall_core::types::AppInfo;
use appwall_core::{DialStrategy, RetryStrategy};

pub mod bulk;
pub mod coupler;
mod decision;
pub mod filter;
pub mod resolver;

pub use bulk::{
    BlockType, BulkApplicator, BulkDirection, BulkReport, BulkSession, EntityOutcome, EntityResult,
};
pub use coupler::{CouplerEvent, DialRetryCoupler, DialSelection, RetrySelection};
pub use decision::{DisplayLabel, EffectiveDecision};
pub use filter::{Filter, FilterEngine, FirewallFilter, TopLevelFilter};
pub use resolver::{ActionPlan, FirewallAction, Refusal, StatusResolver};

/// Caller's answer to an [`ActionPlan`] that fans out to several packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Granted,
    Withheld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied(AppPolicy),
    /// Plan spans several packages and confirmation was withheld.
    NeedsConfirmation,
}

/// Wires the resolver, coupler, filter and bulk applicator to one store.
#[derive(Debug)]
pub struct FirewallController<S: PolicyStore> {
    store: S,
    resolver: StatusResolver,
    coupler: DialRetryCoupler,
    filter: FilterEngine,
    bulk: BulkApplicator,
}

impl<S: PolicyStore> FirewallController<S> {
    pub fn from_config(config: &Config, store: S) -> Result<Self, AppwallError> {
        let resolver = StatusResolver::from_config(config);
        Ok(Self {
            store,
            coupler: DialRetryCoupler::from_config(config)?,
            filter: FilterEngine,
            bulk: BulkApplicator::new(resolver.clone()),
            resolver,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Direct store access for inventory maintenance.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }

    pub fn coupler(&self) -> &DialRetryCoupler {
        &self.coupler
    }

    /// Current inventory narrowed by `filter`, in store order.
    pub fn list(&self, filter: &Filter) -> Result<Vec<AppInfo>> {
        let entities = self.store.list_entities()?;
        Ok(self.filter.apply(filter, &entities))
    }

    /// Resolves `action` for `entity` without writing anything.
    pub fn plan_action(
        &self,
        entity: EntityId,
        action: FirewallAction,
    ) -> Result<Result<ActionPlan, Refusal>> {
        let current = self.store.load_policy(entity)?;
        let packages = self.store.packages_for(entity)?;
        let plan = self.resolver.plan(action, &current, &packages);
        if let Err(refusal) = &plan {
            info!(uid = %entity, action = %action, reason = %refusal, "action refused");
        }
        Ok(plan)
    }

    pub fn commit(
        &mut self,
        plan: &ActionPlan,
        confirmation: Confirmation,
    ) -> Result<CommitOutcome, AppwallError> {
        if plan.needs_confirmation() && confirmation != Confirmation::Granted {
            return Ok(CommitOutcome::NeedsConfirmation);
        }
        let entity = plan.to.entity_id;
        self.store
            .save_policy(&plan.to)
            .map_err(|err| AppwallError::persistence(entity, &err))?;
        info!(
            uid = %entity,
            action = %plan.action,
            from = %plan.from.firewall_status,
            to = %plan.to.firewall_status,
            connection = %plan.to.connection_status,
            packages = plan.packages.len(),
            "firewall status changed"
        );
        Ok(CommitOutcome::Applied(plan.to))
    }

    /// Stored dial/retry pair, re-validated against this platform.
    pub fn dial_retry(&self) -> Result<DialSelection> {
        let stored = self.store.load_dial_retry_config()?;
        Ok(self.coupler.normalize(&stored))
    }

    pub fn select_dial(&mut self, requested: DialStrategy) -> Result<DialSelection> {
        let current = self.dial_retry()?.config;
        let selection = self.coupler.select_dial(&current, requested);
        self.store.save_dial_retry_config(&selection.config)?;
        Ok(selection)
    }

    pub fn select_retry(&mut self, requested: RetryStrategy) -> Result<RetrySelection> {
        let current = self.dial_retry()?.config;
        let selection = self.coupler.select_retry(&current, requested);
        self.store.save_dial_retry_config(&selection.config)?;
        Ok(selection)
    }

    /// Snapshots the filtered set, then applies `block_type` to it.
    pub fn apply_bulk(
        &mut self,
        session: &mut BulkSession,
        block_type: BlockType,
        filter: &Filter,
    ) -> Result<BulkReport> {
        let snapshot = self.list(filter)?;
        Ok(self
            .bulk
            .apply_bulk(session, block_type, &snapshot, &mut self.store))
    }
}
