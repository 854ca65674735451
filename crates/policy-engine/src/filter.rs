//! App list filtering shared by the list view and bulk selection.
//!
//! A [`Filter`] is a conjunction of four predicates:
//! - top level class (all, installed, system)
//! - firewall class, a coarse tag covering a set of effective decisions
//! - category set, empty matches everything
//! - free text, case-insensitive over app name, package name and uid

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use appwall_core::types::AppInfo;

use crate::decision::EffectiveDecision;
use crate::resolver::effective_decision;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TopLevelFilter {
    #[default]
    All,
    Installed,
    System,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FirewallFilter {
    #[default]
    All,
    Allowed,
    Blocked,
    BlockedWifi,
    BlockedMobileData,
    Bypass,
    Excluded,
    Lockdown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    #[serde(default)]
    pub top_level: TopLevelFilter,
    #[serde(default)]
    pub firewall: FirewallFilter,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub search: String,
}

impl TopLevelFilter {
    pub fn matches(&self, app: &AppInfo) -> bool {
        match self {
            TopLevelFilter::All => true,
            TopLevelFilter::Installed => !app.package.is_system_app,
            TopLevelFilter::System => app.package.is_system_app,
        }
    }
}

impl FirewallFilter {
    /// Decisions covered by this tag. `None` stands for "everything",
    /// untracked rows included.
    pub fn decisions(&self) -> Option<&'static [EffectiveDecision]> {
        let covered: &'static [EffectiveDecision] = match self {
            FirewallFilter::All => return None,
            FirewallFilter::Allowed => &[EffectiveDecision::Allowed],
            FirewallFilter::Blocked => &[
                EffectiveDecision::BlockedWifi,
                EffectiveDecision::BlockedMobile,
                EffectiveDecision::BlockedBoth,
            ],
            FirewallFilter::BlockedWifi => &[EffectiveDecision::BlockedWifi],
            FirewallFilter::BlockedMobileData => &[EffectiveDecision::BlockedMobile],
            FirewallFilter::Bypass => &[EffectiveDecision::Bypassed],
            FirewallFilter::Excluded => &[EffectiveDecision::Excluded],
            FirewallFilter::Lockdown => &[EffectiveDecision::Isolated],
        };
        Some(covered)
    }

    pub fn matches(&self, app: &AppInfo) -> bool {
        let Some(covered) = self.decisions() else {
            return true;
        };
        effective_decision(app.firewall_status(), app.connection_status())
            .is_some_and(|decision| covered.contains(&decision))
    }
}

impl Filter {
    pub fn is_match_all(&self) -> bool {
        self.top_level == TopLevelFilter::All
            && self.firewall == FirewallFilter::All
            && self.categories.is_empty()
            && self.search.trim().is_empty()
    }

    pub fn matches(&self, app: &AppInfo) -> bool {
        self.top_level.matches(app)
            && self.firewall.matches(app)
            && self.matches_category(app)
            && self.matches_search(app)
    }

    fn matches_category(&self, app: &AppInfo) -> bool {
        self.categories.is_empty() || self.categories.contains(&app.package.app_category)
    }

    fn matches_search(&self, app: &AppInfo) -> bool {
        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        app.app_name().to_lowercase().contains(&needle)
            || app.package_name().to_lowercase().contains(&needle)
            || app.uid().to_string().contains(&needle)
    }
}

/// Evaluates filters over an inventory snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterEngine;

impl FilterEngine {
    /// Returns the matching rows in input order.
    pub fn apply(&self, filter: &Filter, entities: &[AppInfo]) -> Vec<AppInfo> {
        entities
            .iter()
            .filter(|app| filter.matches(app))
            .cloned()
            .collect()
    }
}

/// Listing order used by front-ends: case-insensitive app name.
pub fn sort_for_listing(apps: &mut [AppInfo]) {
    apps.sort_by_cached_key(|app| (app.app_name().to_lowercase(), app.package_name().to_string()));
}

impl FromStr for TopLevelFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "all" => Ok(TopLevelFilter::All),
            "installed" => Ok(TopLevelFilter::Installed),
            "system" => Ok(TopLevelFilter::System),
            _ => Err(format!("unknown app class: {value}")),
        }
    }
}

impl fmt::Display for TopLevelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            TopLevelFilter::All => "all",
            TopLevelFilter::Installed => "installed",
            TopLevelFilter::System => "system",
        };
        write!(f, "{value}")
    }
}

impl FromStr for FirewallFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().replace('_', "-").as_str() {
            "all" => Ok(FirewallFilter::All),
            "allowed" => Ok(FirewallFilter::Allowed),
            "blocked" => Ok(FirewallFilter::Blocked),
            "blocked-wifi" => Ok(FirewallFilter::BlockedWifi),
            "blocked-mobile-data" => Ok(FirewallFilter::BlockedMobileData),
            "bypass" => Ok(FirewallFilter::Bypass),
            "excluded" => Ok(FirewallFilter::Excluded),
            "lockdown" | "isolated" => Ok(FirewallFilter::Lockdown),
            _ => Err(format!("unknown firewall filter: {value}")),
        }
    }
}

impl fmt::Display for FirewallFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            FirewallFilter::All => "all",
            FirewallFilter::Allowed => "allowed",
            FirewallFilter::Blocked => "blocked",
            FirewallFilter::BlockedWifi => "blocked-wifi",
            FirewallFilter::BlockedMobileData => "blocked-mobile-data",
            FirewallFilter::Bypass => "bypass",
            FirewallFilter::Excluded => "excluded",
            FirewallFilter::Lockdown => "lockdown",
        };
        write!(f, "{value}")
    }
}
