//! Built-in defaults, used when neither an environment variable nor a
//! loaded TOML override is present.

use std::time::Duration;

pub(super) const DEFAULT_CONFIG_ID: &str = "3";

pub(super) const DEFAULT_PER_APPLIANCE_CONCURRENCY: usize = 8;
pub(super) const DEFAULT_GLOBAL_CONCURRENCY: usize = 64;
pub(super) const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

pub(super) const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(20 * 60);
pub(super) const DEFAULT_PROBE_MIN_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub(super) const DEFAULT_CREDENTIAL_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
pub(super) const DEFAULT_CONFIG_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
pub(super) const DEFAULT_FILE_LIST_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

pub(super) const DEFAULT_DB_ID_PROBE_BOUND: u32 = 10;

pub(super) const DEFAULT_USER_AGENT: &str = concat!("prosbc-core/", env!("CARGO_PKG_VERSION"));

pub(super) const DEFAULT_ACCEPT_INVALID_CERTS: bool = false;
