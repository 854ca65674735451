//! Per-app status resolution.
//!
//! Maps a `(FirewallStatus, ConnectionStatus)` pair to the decision the
//! packet engine enforces, and defines the single-app transitions:
//! - Wi-Fi and mobile data toggles, each a 4-cycle over the connection status
//! - Override toggles, where selecting the active override clears it

use std::fmt;

use serde::{Deserialize, Serialize};

use appwall_core::config::Config;
use appwall_core::status::{AppPolicy, ConnectionStatus, FirewallStatus, Override};
use appwall_core::types::PackageInfo;

use crate::decision::{DisplayLabel, EffectiveDecision};

/// `None` for untracked apps: nothing may be rendered or enforced for them.
pub fn effective_decision(
    firewall: FirewallStatus,
    connection: ConnectionStatus,
) -> Option<EffectiveDecision> {
    let decision = match firewall {
        FirewallStatus::Exclude => EffectiveDecision::Excluded,
        FirewallStatus::BypassUniversal => EffectiveDecision::Bypassed,
        FirewallStatus::Isolate => EffectiveDecision::Isolated,
        FirewallStatus::BypassDnsFirewall => EffectiveDecision::Bypassed,
        FirewallStatus::Untracked => return None,
        FirewallStatus::None => match connection {
            ConnectionStatus::Allow => EffectiveDecision::Allowed,
            ConnectionStatus::Metered => EffectiveDecision::BlockedMobile,
            ConnectionStatus::Unmetered => EffectiveDecision::BlockedWifi,
            ConnectionStatus::Both => EffectiveDecision::BlockedBoth,
        },
    };
    Some(decision)
}

pub fn resolve_label(firewall: FirewallStatus, connection: ConnectionStatus) -> DisplayLabel {
    match firewall {
        FirewallStatus::Exclude => DisplayLabel::Excluded,
        FirewallStatus::BypassUniversal => DisplayLabel::BypassUniversal,
        FirewallStatus::Isolate => DisplayLabel::Isolated,
        FirewallStatus::BypassDnsFirewall => DisplayLabel::BypassDnsFirewall,
        FirewallStatus::Untracked => DisplayLabel::Unknown,
        FirewallStatus::None => match connection {
            ConnectionStatus::Allow => DisplayLabel::Allowed,
            ConnectionStatus::Metered => DisplayLabel::BlockedOnMobileData,
            ConnectionStatus::Unmetered => DisplayLabel::BlockedOnWifi,
            ConnectionStatus::Both => DisplayLabel::Blocked,
        },
    }
}

/// Flips the Wi-Fi bit.
pub fn cycle_wifi(current: ConnectionStatus) -> ConnectionStatus {
    match current {
        ConnectionStatus::Unmetered => ConnectionStatus::Allow,
        ConnectionStatus::Both => ConnectionStatus::Metered,
        ConnectionStatus::Metered => ConnectionStatus::Both,
        ConnectionStatus::Allow => ConnectionStatus::Unmetered,
    }
}

/// Flips the mobile data bit.
pub fn cycle_mobile_data(current: ConnectionStatus) -> ConnectionStatus {
    match current {
        ConnectionStatus::Metered => ConnectionStatus::Allow,
        ConnectionStatus::Unmetered => ConnectionStatus::Both,
        ConnectionStatus::Both => ConnectionStatus::Unmetered,
        ConnectionStatus::Allow => ConnectionStatus::Metered,
    }
}

pub fn toggle_wifi(current: &AppPolicy) -> AppPolicy {
    AppPolicy::with_status(
        current.entity_id,
        FirewallStatus::None,
        cycle_wifi(current.connection_status),
    )
}

pub fn toggle_mobile_data(current: &AppPolicy) -> AppPolicy {
    AppPolicy::with_status(
        current.entity_id,
        FirewallStatus::None,
        cycle_mobile_data(current.connection_status),
    )
}

/// Selecting the active override clears it; any other override replaces it.
pub fn set_override(current: &AppPolicy, selected: Override) -> AppPolicy {
    if current.firewall_status == selected.status() {
        return AppPolicy::new(current.entity_id);
    }
    AppPolicy::with_status(current.entity_id, selected.status(), ConnectionStatus::Allow)
}

/// A single-app action as triggered from a list row or the app detail view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FirewallAction {
    ToggleWifi,
    ToggleMobileData,
    SetOverride(Override),
}

impl FirewallAction {
    pub fn apply(&self, current: &AppPolicy) -> AppPolicy {
        match self {
            FirewallAction::ToggleWifi => toggle_wifi(current),
            FirewallAction::ToggleMobileData => toggle_mobile_data(current),
            FirewallAction::SetOverride(selected) => set_override(current, *selected),
        }
    }

    fn touches_exclusion(&self, current: &AppPolicy) -> bool {
        match self {
            FirewallAction::SetOverride(Override::Exclude) => true,
            // Leaving an excluded state through any other action also
            // changes the exclusion.
            _ => current.firewall_status == FirewallStatus::Exclude,
        }
    }
}

impl fmt::Display for FirewallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirewallAction::ToggleWifi => write!(f, "toggle wifi"),
            FirewallAction::ToggleMobileData => write!(f, "toggle mobile data"),
            FirewallAction::SetOverride(selected) => write!(f, "toggle {selected}"),
        }
    }
}

/// Why an action produced no plan. None of these are failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Refusal {
    Untracked,
    SelfPackage,
    ExclusionInLockdown,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Refusal::Untracked => "app is not tracked by the firewall",
            Refusal::SelfPackage => "the controller cannot firewall itself",
            Refusal::ExclusionInLockdown => "exclusion cannot change while the VPN is in lockdown",
        };
        f.write_str(message)
    }
}

/// Resolved transition for one identity, fanned out to every package that
/// shares it. Commit only after confirmation when `needs_confirmation`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionPlan {
    pub action: FirewallAction,
    pub from: AppPolicy,
    pub to: AppPolicy,
    pub packages: Vec<String>,
}

impl ActionPlan {
    pub fn needs_confirmation(&self) -> bool {
        self.packages.len() > 1
    }

    pub fn decision(&self) -> Option<EffectiveDecision> {
        effective_decision(self.to.firewall_status, self.to.connection_status)
    }

    pub fn label(&self) -> DisplayLabel {
        resolve_label(self.to.firewall_status, self.to.connection_status)
    }
}

/// Applies the guards that depend on controller configuration before
/// resolving a transition.
#[derive(Debug, Clone)]
pub struct StatusResolver {
    self_package: String,
    vpn_lockdown: bool,
}

impl StatusResolver {
    pub fn new(self_package: impl Into<String>, vpn_lockdown: bool) -> Self {
        Self {
            self_package: self_package.into(),
            vpn_lockdown,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.controller.self_package.clone(),
            config.controller.vpn_lockdown,
        )
    }

    pub fn vpn_lockdown(&self) -> bool {
        self.vpn_lockdown
    }

    pub fn is_self_package(&self, package_name: &str) -> bool {
        package_name == self.self_package
    }

    /// Checks shared by single-app plans and bulk application.
    pub fn guard(&self, current: &AppPolicy, packages: &[PackageInfo]) -> Option<Refusal> {
        if current.firewall_status.is_untracked() || packages.is_empty() {
            return Some(Refusal::Untracked);
        }
        if packages
            .iter()
            .any(|package| self.is_self_package(&package.package_name))
        {
            return Some(Refusal::SelfPackage);
        }
        None
    }

    pub fn plan(
        &self,
        action: FirewallAction,
        current: &AppPolicy,
        packages: &[PackageInfo],
    ) -> Result<ActionPlan, Refusal> {
        if let Some(refusal) = self.guard(current, packages) {
            return Err(refusal);
        }
        if self.vpn_lockdown && action.touches_exclusion(current) {
            return Err(Refusal::ExclusionInLockdown);
        }
        Ok(ActionPlan {
            action,
            from: *current,
            to: action.apply(current),
            packages: packages
                .iter()
                .map(|package| package.package_name.clone())
                .collect(),
        })
    }
}
