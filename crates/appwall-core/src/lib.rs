pub mod anticensor;
pub mod config;
pub mod error;
pub mod ids;
pub mod status;
pub mod store;
pub mod types;

pub use anticensor::{DialRetryConfig, DialStrategy, PlatformVersion, RetryStrategy};
pub use config::{Config, ConfigPaths};
pub use error::AppwallError;
pub use ids::EntityId;
pub use status::{AppPolicy, ConnectionStatus, FirewallStatus, Override};
pub use store::{JsonPolicyStore, MemoryPolicyStore, PolicyState, PolicyStore};
pub use types::{AppInfo, PackageInfo};
