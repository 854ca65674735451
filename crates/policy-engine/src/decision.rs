use serde::{Deserialize, Serialize};
use std::fmt;

/// Final enforcement outcome for an app, handed to the packet engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveDecision {
    Allowed,
    BlockedWifi,
    BlockedMobile,
    BlockedBoth,
    Bypassed,
    Excluded,
    Isolated,
}

/// Human readable status shown next to an app.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DisplayLabel {
    Allowed,
    BlockedOnWifi,
    BlockedOnMobileData,
    Blocked,
    BypassUniversal,
    BypassDnsFirewall,
    Excluded,
    Isolated,
    Unknown,
}

impl EffectiveDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            EffectiveDecision::BlockedWifi
                | EffectiveDecision::BlockedMobile
                | EffectiveDecision::BlockedBoth
        )
    }
}

impl DisplayLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayLabel::Allowed => "Allowed",
            DisplayLabel::BlockedOnWifi => "Blocked on Wi-Fi",
            DisplayLabel::BlockedOnMobileData => "Blocked on mobile data",
            DisplayLabel::Blocked => "Blocked",
            DisplayLabel::BypassUniversal => "Bypass universal",
            DisplayLabel::BypassDnsFirewall => "Bypass DNS & firewall",
            DisplayLabel::Excluded => "Excluded",
            DisplayLabel::Isolated => "Isolated",
            DisplayLabel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EffectiveDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EffectiveDecision::Allowed => "allowed",
            EffectiveDecision::BlockedWifi => "blocked-wifi",
            EffectiveDecision::BlockedMobile => "blocked-mobile",
            EffectiveDecision::BlockedBoth => "blocked-both",
            EffectiveDecision::Bypassed => "bypassed",
            EffectiveDecision::Excluded => "excluded",
            EffectiveDecision::Isolated => "isolated",
        };
        write!(f, "{value}")
    }
}

impl fmt::Display for DisplayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
