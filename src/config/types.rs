//! Config value types.

use std::time::Duration;

/// Tunables for the ProSBC Integration Core (§5, §6, §9 Open Questions).
///
/// Every timing/concurrency constant the specification calls out is a field
/// here rather than a hardcoded literal, per Design Note: "collapse into a
/// single implementation whose cache TTLs are configuration, not code."
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// `PROSBC_BASE_URL` — used when an appliance is not explicitly selected.
    pub default_base_url: Option<String>,
    /// `PROSBC_USERNAME`.
    pub default_username: Option<String>,
    /// `PROSBC_PASSWORD`.
    pub default_password: Option<String>,
    /// `PROSBC_CONFIG_ID`, default `"3"`.
    pub default_config_id: String,

    /// Soft per-appliance in-flight request cap (default 8).
    pub per_appliance_concurrency: usize,
    /// Hard global in-flight request cap (default 64).
    pub global_concurrency: usize,
    /// Default per-operation deadline (default 30s).
    pub default_deadline: Duration,

    /// Session TTL since last validation (default 20 min).
    pub session_ttl: Duration,
    /// Minimum interval between validation probes for the same session
    /// (default 5 min) — "probes are cheap and used at most once per 5 min".
    pub probe_min_interval: Duration,

    /// Credential Registry cache TTL (default 10 min).
    pub credential_cache_ttl: Duration,
    /// Config Selector cache TTL (default 10 min per §4.3 step 1; the data
    /// model also allows configurations to be cached up to 15 min — this
    /// field is the selector's own cache window).
    pub config_cache_ttl: Duration,
    /// File-list cache TTL (default 5 min, spec allows 5-15 min).
    pub file_list_cache_ttl: Duration,

    /// Upper bound on the `dbId` 1..N probe (§4.3 step 6, §9 Open Question;
    /// default 10).
    pub db_id_probe_bound: u32,

    /// `User-Agent` header sent on every outbound request (§6).
    pub user_agent: String,

    /// Default TLS verification toggle applied when an [`crate::domain::Appliance`]
    /// does not set its own `accept_invalid_certs` (§6, default `false`).
    pub accept_invalid_certs_default: bool,
}
