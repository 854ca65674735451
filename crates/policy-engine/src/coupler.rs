//! Dial strategy and retry strategy coupling.
//!
//! The retry strategy follows the dial strategy through [`retry_rule`]:
//!
//! | dial            | retry after selecting the dial        |
//! |-----------------|---------------------------------------|
//! | `SplitAuto`     | forced to `RetryWithSplit`            |
//! | `NeverSplit`    | forced to `RetryNever`, then locked   |
//! | `SplitTcp`      | previous value kept                   |
//! | `SplitTcpTls`   | previous value kept                   |
//! | `Desync`        | previous value kept, platform gated   |

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use appwall_core::anticensor::{DialRetryConfig, DialStrategy, PlatformVersion, RetryStrategy};
use appwall_core::config::Config;
use appwall_core::error::AppwallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryRule {
    Force(RetryStrategy),
    Retain,
}

pub fn retry_rule(dial: DialStrategy) -> RetryRule {
    match dial {
        DialStrategy::SplitAuto => RetryRule::Force(RetryStrategy::RetryWithSplit),
        DialStrategy::NeverSplit => RetryRule::Force(RetryStrategy::RetryNever),
        DialStrategy::SplitTcp | DialStrategy::SplitTcpTls | DialStrategy::Desync => {
            RetryRule::Retain
        }
    }
}

/// Advisory events for the caller to surface. Never fatal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum CouplerEvent {
    /// The requested dial strategy needs a newer platform.
    CapabilityRejected {
        requested: DialStrategy,
        applied: DialStrategy,
        required: PlatformVersion,
        platform: Option<PlatformVersion>,
    },
    /// Selecting the dial strategy changed the retry strategy.
    RetryCascaded {
        from: RetryStrategy,
        to: RetryStrategy,
    },
    /// Retry options are disabled while connections are never split.
    RetryLocked { requested: RetryStrategy },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialSelection {
    pub config: DialRetryConfig,
    pub events: Vec<CouplerEvent>,
}

impl DialSelection {
    pub fn applied_dial(&self) -> DialStrategy {
        self.config.dial_strategy
    }

    pub fn cascaded_retry(&self) -> RetryStrategy {
        self.config.retry_strategy
    }

    pub fn capability_rejected(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, CouplerEvent::CapabilityRejected { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySelection {
    pub config: DialRetryConfig,
    /// Display-only notice when the request was re-pinned.
    pub notice: Option<CouplerEvent>,
}

impl RetrySelection {
    pub fn applied_retry(&self) -> RetryStrategy {
        self.config.retry_strategy
    }
}

#[derive(Debug, Clone)]
pub struct DialRetryCoupler {
    platform: Option<PlatformVersion>,
    desync_min: PlatformVersion,
}

impl DialRetryCoupler {
    /// `platform` is `None` when the version could not be determined, which
    /// gates every capability off.
    pub fn new(platform: Option<PlatformVersion>, desync_min: PlatformVersion) -> Self {
        Self {
            platform,
            desync_min,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, AppwallError> {
        Ok(Self::new(
            config.platform_version()?,
            config.desync_min_version()?,
        ))
    }

    pub fn platform(&self) -> Option<PlatformVersion> {
        self.platform
    }

    pub fn supports(&self, dial: DialStrategy) -> bool {
        match dial {
            DialStrategy::Desync => self
                .platform
                .is_some_and(|version| version >= self.desync_min),
            _ => true,
        }
    }

    pub fn available_dials(&self) -> Vec<DialStrategy> {
        DialStrategy::ALL
            .into_iter()
            .filter(|dial| self.supports(*dial))
            .collect()
    }

    pub fn retry_locked(&self, config: &DialRetryConfig) -> bool {
        config.dial_strategy == DialStrategy::NeverSplit
    }

    pub fn is_legal(&self, config: &DialRetryConfig) -> bool {
        if !self.supports(config.dial_strategy) {
            return false;
        }
        match retry_rule(config.dial_strategy) {
            RetryRule::Force(RetryStrategy::RetryNever) => {
                config.retry_strategy == RetryStrategy::RetryNever
            }
            _ => true,
        }
    }

    pub fn select_dial(&self, current: &DialRetryConfig, requested: DialStrategy) -> DialSelection {
        let mut events = Vec::new();
        let applied = if self.supports(requested) {
            requested
        } else {
            warn!(
                requested = %requested,
                required = %self.desync_min,
                platform = ?self.platform,
                "dial strategy unsupported on this platform, using split-auto"
            );
            events.push(self.rejection(requested));
            DialStrategy::SplitAuto
        };

        let retry = match retry_rule(applied) {
            RetryRule::Force(retry) => retry,
            RetryRule::Retain => {
                let retained = DialRetryConfig::new(applied, current.retry_strategy);
                if self.is_legal(&retained) {
                    current.retry_strategy
                } else {
                    RetryStrategy::RetryWithSplit
                }
            }
        };
        if retry != current.retry_strategy {
            events.push(CouplerEvent::RetryCascaded {
                from: current.retry_strategy,
                to: retry,
            });
        }

        let config = DialRetryConfig::new(applied, retry);
        debug_assert!(self.is_legal(&config));
        info!(dial = %applied, retry = %retry, "anti-censorship dial strategy changed");
        DialSelection { config, events }
    }

    pub fn select_retry(
        &self,
        current: &DialRetryConfig,
        requested: RetryStrategy,
    ) -> RetrySelection {
        let candidate = DialRetryConfig::new(current.dial_strategy, requested);
        if self.is_legal(&candidate) {
            info!(retry = %requested, "anti-censorship retry strategy changed");
            return RetrySelection {
                config: candidate,
                notice: None,
            };
        }

        let pinned = match retry_rule(current.dial_strategy) {
            RetryRule::Force(retry) => retry,
            RetryRule::Retain => current.retry_strategy,
        };
        info!(
            requested = %requested,
            retry = %pinned,
            "retry strategy pinned by dial strategy"
        );
        RetrySelection {
            config: DialRetryConfig::new(current.dial_strategy, pinned),
            notice: Some(CouplerEvent::RetryLocked { requested }),
        }
    }

    /// Re-validates a stored pair, e.g. after a platform downgrade.
    pub fn normalize(&self, stored: &DialRetryConfig) -> DialSelection {
        let mut events = Vec::new();
        let mut config = *stored;
        if !self.supports(config.dial_strategy) {
            warn!(
                dial = %config.dial_strategy,
                "stored dial strategy unsupported on this platform, using split-auto"
            );
            events.push(self.rejection(config.dial_strategy));
            config.dial_strategy = DialStrategy::SplitAuto;
        }
        if let RetryRule::Force(RetryStrategy::RetryNever) = retry_rule(config.dial_strategy) {
            if config.retry_strategy != RetryStrategy::RetryNever {
                events.push(CouplerEvent::RetryCascaded {
                    from: config.retry_strategy,
                    to: RetryStrategy::RetryNever,
                });
                config.retry_strategy = RetryStrategy::RetryNever;
            }
        }
        DialSelection { config, events }
    }

    fn rejection(&self, requested: DialStrategy) -> CouplerEvent {
        CouplerEvent::CapabilityRejected {
            requested,
            applied: DialStrategy::SplitAuto,
            required: self.desync_min,
            platform: self.platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: PlatformVersion = PlatformVersion::new(4, 12, 0);

    fn modern() -> DialRetryCoupler {
        DialRetryCoupler::new(Some(PlatformVersion::new(5, 10, 0)), MIN)
    }

    fn legacy() -> DialRetryCoupler {
        DialRetryCoupler::new(Some(PlatformVersion::new(4, 9, 0)), MIN)
    }

    fn every_config() -> Vec<DialRetryConfig> {
        DialStrategy::ALL
            .into_iter()
            .flat_map(|dial| {
                RetryStrategy::ALL
                    .into_iter()
                    .map(move |retry| DialRetryConfig::new(dial, retry))
            })
            .collect()
    }

    #[test]
    fn test_never_split_forces_retry_never() {
        for coupler in [modern(), legacy()] {
            for current in every_config() {
                let selection = coupler.select_dial(&current, DialStrategy::NeverSplit);
                assert_eq!(selection.applied_dial(), DialStrategy::NeverSplit);
                assert_eq!(selection.cascaded_retry(), RetryStrategy::RetryNever);
            }
        }
    }

    #[test]
    fn test_split_auto_forces_retry_with_split() {
        for current in every_config() {
            let selection = modern().select_dial(&current, DialStrategy::SplitAuto);
            assert_eq!(
                selection.config,
                DialRetryConfig::new(DialStrategy::SplitAuto, RetryStrategy::RetryWithSplit)
            );
        }
    }

    #[test]
    fn test_split_variants_keep_previous_retry() {
        let current = DialRetryConfig::new(DialStrategy::SplitAuto, RetryStrategy::RetryAfterSplit);
        for dial in [DialStrategy::SplitTcp, DialStrategy::SplitTcpTls, DialStrategy::Desync] {
            let selection = modern().select_dial(&current, dial);
            assert_eq!(selection.applied_dial(), dial);
            assert_eq!(selection.cascaded_retry(), RetryStrategy::RetryAfterSplit);
            assert!(selection.events.is_empty());
        }
    }

    #[test]
    fn test_desync_downgrades_on_legacy_platform() {
        for current in every_config() {
            let selection = legacy().select_dial(&current, DialStrategy::Desync);
            assert_eq!(selection.applied_dial(), DialStrategy::SplitAuto);
            assert!(selection.capability_rejected());
        }
    }

    #[test]
    fn test_unknown_platform_gates_desync() {
        let coupler = DialRetryCoupler::new(None, MIN);
        assert!(!coupler.supports(DialStrategy::Desync));
        assert!(!coupler.available_dials().contains(&DialStrategy::Desync));
        assert_eq!(modern().available_dials().len(), DialStrategy::ALL.len());
    }

    #[test]
    fn test_retry_is_pinned_while_never_split() {
        let current = DialRetryConfig::new(DialStrategy::NeverSplit, RetryStrategy::RetryNever);
        assert!(modern().retry_locked(&current));

        let selection = modern().select_retry(&current, RetryStrategy::RetryAfterSplit);
        assert_eq!(selection.applied_retry(), RetryStrategy::RetryNever);
        assert_eq!(
            selection.notice,
            Some(CouplerEvent::RetryLocked {
                requested: RetryStrategy::RetryAfterSplit
            })
        );

        let selection = modern().select_retry(&current, RetryStrategy::RetryNever);
        assert_eq!(selection.notice, None);
    }

    #[test]
    fn test_retry_free_under_split_dials() {
        let current = DialRetryConfig::new(DialStrategy::SplitTcp, RetryStrategy::RetryWithSplit);
        for retry in RetryStrategy::ALL {
            let selection = modern().select_retry(&current, retry);
            assert_eq!(selection.applied_retry(), retry);
            assert!(selection.notice.is_none());
        }
    }

    #[test]
    fn test_every_transition_stays_legal() {
        for coupler in [modern(), legacy()] {
            for current in every_config().into_iter().filter(|c| coupler.is_legal(c)) {
                for dial in DialStrategy::ALL {
                    assert!(coupler.is_legal(&coupler.select_dial(&current, dial).config));
                }
                for retry in RetryStrategy::ALL {
                    assert!(coupler.is_legal(&coupler.select_retry(&current, retry).config));
                }
            }
        }
    }

    #[test]
    fn test_normalize_repairs_stored_pairs() {
        let stored = DialRetryConfig::new(DialStrategy::Desync, RetryStrategy::RetryAfterSplit);
        let selection = legacy().normalize(&stored);
        assert_eq!(
            selection.config,
            DialRetryConfig::new(DialStrategy::SplitAuto, RetryStrategy::RetryAfterSplit)
        );
        assert!(selection.capability_rejected());

        let stored = DialRetryConfig::new(DialStrategy::NeverSplit, RetryStrategy::RetryWithSplit);
        let selection = modern().normalize(&stored);
        assert_eq!(selection.cascaded_retry(), RetryStrategy::RetryNever);

        let legal = DialRetryConfig::new(DialStrategy::Desync, RetryStrategy::RetryNever);
        let selection = modern().normalize(&legal);
        assert_eq!(selection.config, legal);
        assert!(selection.events.is_empty());
    }
}
