//! Anti-censorship dial and retry settings plus the platform version they
//! are gated on.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";
const MIN_VERSION_PARTS: usize = 2;

/// How outgoing connections are split to evade middlebox inspection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DialStrategy {
    SplitAuto,
    SplitTcp,
    SplitTcpTls,
    Desync,
    NeverSplit,
}

/// What to do when a dial attempt fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    RetryWithSplit,
    RetryNever,
    RetryAfterSplit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialRetryConfig {
    pub dial_strategy: DialStrategy,
    pub retry_strategy: RetryStrategy,
}

/// Kernel release of the host, compared numerically part by part.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PlatformVersion {
    pub major: u32,
    pub minor: u32,
    #[serde(default)]
    pub patch: u32,
}

impl DialStrategy {
    pub const ALL: [DialStrategy; 5] = [
        DialStrategy::SplitAuto,
        DialStrategy::SplitTcp,
        DialStrategy::SplitTcpTls,
        DialStrategy::Desync,
        DialStrategy::NeverSplit,
    ];

    pub fn calm_label(&self) -> &'static str {
        match self {
            DialStrategy::SplitAuto => "split automatically",
            DialStrategy::SplitTcp => "split TCP",
            DialStrategy::SplitTcpTls => "split TCP and TLS",
            DialStrategy::Desync => "desync",
            DialStrategy::NeverSplit => "never split",
        }
    }
}

impl RetryStrategy {
    pub const ALL: [RetryStrategy; 3] = [
        RetryStrategy::RetryWithSplit,
        RetryStrategy::RetryNever,
        RetryStrategy::RetryAfterSplit,
    ];

    pub fn calm_label(&self) -> &'static str {
        match self {
            RetryStrategy::RetryWithSplit => "retry with split",
            RetryStrategy::RetryNever => "never retry",
            RetryStrategy::RetryAfterSplit => "retry after split",
        }
    }
}

impl DialRetryConfig {
    pub fn new(dial_strategy: DialStrategy, retry_strategy: RetryStrategy) -> Self {
        Self {
            dial_strategy,
            retry_strategy,
        }
    }
}

impl Default for DialRetryConfig {
    fn default() -> Self {
        Self::new(DialStrategy::SplitAuto, RetryStrategy::RetryWithSplit)
    }
}

impl PlatformVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses a kernel release such as `5.10.110-android12-9`. Anything after
    /// the first `-` is ignored and at least `major.minor` must be present.
    pub fn parse(release: &str) -> Option<Self> {
        let base = release.trim().split('-').next()?;
        let parts: Vec<u32> = base
            .split('.')
            .map_while(|part| part.parse::<u32>().ok())
            .collect();
        if parts.len() < MIN_VERSION_PARTS {
            return None;
        }
        Some(Self::new(parts[0], parts[1], parts.get(2).copied().unwrap_or(0)))
    }

    /// Reads the running kernel release. `None` means the capability check
    /// must treat the platform as unsupported.
    pub fn detect() -> Option<Self> {
        let release = fs::read_to_string(OSRELEASE_PATH).ok()?;
        Self::parse(&release)
    }
}

impl Ord for PlatformVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for PlatformVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for PlatformVersion {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| format!("invalid platform version: {value}"))
    }
}

impl FromStr for DialStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().replace('_', "-").as_str() {
            "split-auto" | "auto" => Ok(DialStrategy::SplitAuto),
            "split-tcp" | "tcp" => Ok(DialStrategy::SplitTcp),
            "split-tcp-tls" | "tls" => Ok(DialStrategy::SplitTcpTls),
            "desync" => Ok(DialStrategy::Desync),
            "never-split" | "never" => Ok(DialStrategy::NeverSplit),
            _ => Err(format!("unknown dial strategy: {value}")),
        }
    }
}

impl fmt::Display for DialStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            DialStrategy::SplitAuto => "split-auto",
            DialStrategy::SplitTcp => "split-tcp",
            DialStrategy::SplitTcpTls => "split-tcp-tls",
            DialStrategy::Desync => "desync",
            DialStrategy::NeverSplit => "never-split",
        };
        write!(f, "{value}")
    }
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().replace('_', "-").as_str() {
            "retry-with-split" | "with-split" => Ok(RetryStrategy::RetryWithSplit),
            "retry-never" | "never" => Ok(RetryStrategy::RetryNever),
            "retry-after-split" | "after-split" => Ok(RetryStrategy::RetryAfterSplit),
            _ => Err(format!("unknown retry strategy: {value}")),
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            RetryStrategy::RetryWithSplit => "retry-with-split",
            RetryStrategy::RetryNever => "retry-never",
            RetryStrategy::RetryAfterSplit => "retry-after-split",
        };
        write!(f, "{value}")
    }
}
