use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::EntityId;

/// Per-app firewall override. Anything other than `None` takes precedence
/// over the app's [`ConnectionStatus`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FirewallStatus {
    None,
    Exclude,
    BypassUniversal,
    Isolate,
    BypassDnsFirewall,
    Untracked,
}

/// Which networks an app is blocked on. Only consulted while the
/// firewall status is `None`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Allow,
    Metered,
    Unmetered,
    Both,
}

/// The four firewall statuses a user can select for an app.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Override {
    Exclude,
    BypassUniversal,
    Isolate,
    BypassDnsFirewall,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppPolicy {
    pub entity_id: EntityId,
    pub firewall_status: FirewallStatus,
    pub connection_status: ConnectionStatus,
}

impl FirewallStatus {
    pub const ALL: [FirewallStatus; 6] = [
        FirewallStatus::None,
        FirewallStatus::Exclude,
        FirewallStatus::BypassUniversal,
        FirewallStatus::Isolate,
        FirewallStatus::BypassDnsFirewall,
        FirewallStatus::Untracked,
    ];

    /// Numeric id understood by the enforcement engine.
    pub fn id(&self) -> u8 {
        match self {
            FirewallStatus::BypassUniversal => 2,
            FirewallStatus::Exclude => 3,
            FirewallStatus::Isolate => 4,
            FirewallStatus::None => 5,
            FirewallStatus::Untracked => 6,
            FirewallStatus::BypassDnsFirewall => 7,
        }
    }

    /// Unknown ids fall back to `None`.
    pub fn from_id(id: u8) -> Self {
        match id {
            2 => FirewallStatus::BypassUniversal,
            3 => FirewallStatus::Exclude,
            4 => FirewallStatus::Isolate,
            6 => FirewallStatus::Untracked,
            7 => FirewallStatus::BypassDnsFirewall,
            _ => FirewallStatus::None,
        }
    }

    pub fn as_override(&self) -> Option<Override> {
        match self {
            FirewallStatus::Exclude => Some(Override::Exclude),
            FirewallStatus::BypassUniversal => Some(Override::BypassUniversal),
            FirewallStatus::Isolate => Some(Override::Isolate),
            FirewallStatus::BypassDnsFirewall => Some(Override::BypassDnsFirewall),
            FirewallStatus::None | FirewallStatus::Untracked => None,
        }
    }

    pub fn is_override(&self) -> bool {
        self.as_override().is_some()
    }

    pub fn is_untracked(&self) -> bool {
        matches!(self, FirewallStatus::Untracked)
    }

    pub fn bypasses(&self) -> bool {
        matches!(
            self,
            FirewallStatus::BypassUniversal | FirewallStatus::BypassDnsFirewall
        )
    }
}

impl ConnectionStatus {
    pub const ALL: [ConnectionStatus; 4] = [
        ConnectionStatus::Allow,
        ConnectionStatus::Metered,
        ConnectionStatus::Unmetered,
        ConnectionStatus::Both,
    ];

    pub fn id(&self) -> u8 {
        match self {
            ConnectionStatus::Both => 0,
            ConnectionStatus::Unmetered => 1,
            ConnectionStatus::Metered => 2,
            ConnectionStatus::Allow => 3,
        }
    }

    /// Unknown ids fall back to `Allow`.
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => ConnectionStatus::Both,
            1 => ConnectionStatus::Unmetered,
            2 => ConnectionStatus::Metered,
            _ => ConnectionStatus::Allow,
        }
    }

    pub fn from_blocks(wifi: bool, mobile_data: bool) -> Self {
        match (wifi, mobile_data) {
            (false, false) => ConnectionStatus::Allow,
            (true, false) => ConnectionStatus::Unmetered,
            (false, true) => ConnectionStatus::Metered,
            (true, true) => ConnectionStatus::Both,
        }
    }

    pub fn blocks_wifi(&self) -> bool {
        matches!(self, ConnectionStatus::Unmetered | ConnectionStatus::Both)
    }

    pub fn blocks_mobile_data(&self) -> bool {
        matches!(self, ConnectionStatus::Metered | ConnectionStatus::Both)
    }

    pub fn is_blocked(&self) -> bool {
        !matches!(self, ConnectionStatus::Allow)
    }

    pub fn with_wifi_blocked(&self, blocked: bool) -> Self {
        Self::from_blocks(blocked, self.blocks_mobile_data())
    }

    pub fn with_mobile_data_blocked(&self, blocked: bool) -> Self {
        Self::from_blocks(self.blocks_wifi(), blocked)
    }
}

impl Override {
    pub const ALL: [Override; 4] = [
        Override::Exclude,
        Override::BypassUniversal,
        Override::Isolate,
        Override::BypassDnsFirewall,
    ];

    pub fn status(&self) -> FirewallStatus {
        match self {
            Override::Exclude => FirewallStatus::Exclude,
            Override::BypassUniversal => FirewallStatus::BypassUniversal,
            Override::Isolate => FirewallStatus::Isolate,
            Override::BypassDnsFirewall => FirewallStatus::BypassDnsFirewall,
        }
    }
}

impl From<Override> for FirewallStatus {
    fn from(value: Override) -> Self {
        value.status()
    }
}

impl AppPolicy {
    /// Policy of an app seen for the first time.
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            firewall_status: FirewallStatus::None,
            connection_status: ConnectionStatus::Allow,
        }
    }

    pub fn untracked(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            firewall_status: FirewallStatus::Untracked,
            connection_status: ConnectionStatus::Allow,
        }
    }

    pub fn with_status(
        entity_id: EntityId,
        firewall_status: FirewallStatus,
        connection_status: ConnectionStatus,
    ) -> Self {
        Self {
            entity_id,
            firewall_status,
            connection_status,
        }
    }

    pub fn active_override(&self) -> Option<Override> {
        self.firewall_status.as_override()
    }
}

impl FromStr for FirewallStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().replace('_', "-").as_str() {
            "none" => Ok(FirewallStatus::None),
            "exclude" => Ok(FirewallStatus::Exclude),
            "bypass-universal" => Ok(FirewallStatus::BypassUniversal),
            "isolate" => Ok(FirewallStatus::Isolate),
            "bypass-dns-firewall" => Ok(FirewallStatus::BypassDnsFirewall),
            "untracked" => Ok(FirewallStatus::Untracked),
            _ => Err(format!("unknown firewall status: {value}")),
        }
    }
}

impl fmt::Display for FirewallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            FirewallStatus::None => "none",
            FirewallStatus::Exclude => "exclude",
            FirewallStatus::BypassUniversal => "bypass-universal",
            FirewallStatus::Isolate => "isolate",
            FirewallStatus::BypassDnsFirewall => "bypass-dns-firewall",
            FirewallStatus::Untracked => "untracked",
        };
        write!(f, "{value}")
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "allow" => Ok(ConnectionStatus::Allow),
            "metered" => Ok(ConnectionStatus::Metered),
            "unmetered" => Ok(ConnectionStatus::Unmetered),
            "both" => Ok(ConnectionStatus::Both),
            _ => Err(format!("unknown connection status: {value}")),
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ConnectionStatus::Allow => "allow",
            ConnectionStatus::Metered => "metered",
            ConnectionStatus::Unmetered => "unmetered",
            ConnectionStatus::Both => "both",
        };
        write!(f, "{value}")
    }
}

impl FromStr for Override {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.parse::<FirewallStatus>()?.as_override() {
            Some(selected) => Ok(selected),
            None => Err(format!("not an override: {value}")),
        }
    }
}

impl fmt::Display for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.status().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip_for_every_variant() {
        for status in FirewallStatus::ALL {
            assert_eq!(FirewallStatus::from_id(status.id()), status);
        }
        for status in ConnectionStatus::ALL {
            assert_eq!(ConnectionStatus::from_id(status.id()), status);
        }
    }

    #[test]
    fn test_unknown_ids_fall_back() {
        assert_eq!(FirewallStatus::from_id(0), FirewallStatus::None);
        assert_eq!(FirewallStatus::from_id(42), FirewallStatus::None);
        assert_eq!(ConnectionStatus::from_id(9), ConnectionStatus::Allow);
    }

    #[test]
    fn test_connection_bits() {
        assert!(ConnectionStatus::Unmetered.blocks_wifi());
        assert!(!ConnectionStatus::Unmetered.blocks_mobile_data());
        assert!(ConnectionStatus::Metered.blocks_mobile_data());
        assert!(ConnectionStatus::Both.blocks_wifi() && ConnectionStatus::Both.blocks_mobile_data());
        assert!(!ConnectionStatus::Allow.is_blocked());

        assert_eq!(
            ConnectionStatus::Metered.with_wifi_blocked(true),
            ConnectionStatus::Both
        );
        assert_eq!(
            ConnectionStatus::Both.with_mobile_data_blocked(false),
            ConnectionStatus::Unmetered
        );
    }

    #[test]
    fn test_override_predicates() {
        assert!(!FirewallStatus::None.is_override());
        assert!(!FirewallStatus::Untracked.is_override());
        for selected in Override::ALL {
            assert!(selected.status().is_override());
            assert_eq!(selected.status().as_override(), Some(selected));
        }
        assert!(FirewallStatus::BypassDnsFirewall.bypasses());
        assert!(!FirewallStatus::Isolate.bypasses());
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(
            "bypass_dns_firewall".parse::<FirewallStatus>().unwrap(),
            FirewallStatus::BypassDnsFirewall
        );
        assert_eq!("Isolate".parse::<Override>().unwrap(), Override::Isolate);
        assert!("none".parse::<Override>().is_err());
        assert!("wifi".parse::<ConnectionStatus>().is_err());
    }
}
