//! Configuration loading for the ProSBC Integration Core.
//!
//! Precedence (highest wins), mirroring the layered approach the rest of
//! the ambient stack uses for its own config surfaces:
//! 1. Environment variables (`PROSBC_*`).
//! 2. Built-in defaults (§6, §9 Open Questions).
//!
//! Appliance identities themselves (base URL, credentials) are NOT part of
//! this config in the general case — they come from the
//! [`crate::repository::ApplianceRepository`] the caller wires in. The
//! `PROSBC_*` environment variables exist only as the documented fallback
//! "when an appliance is not explicitly selected" (§6).

mod defaults;
mod env;
mod types;

pub use types::CoreConfig;

impl CoreConfig {
    /// Build configuration from `PROSBC_*` environment variables, falling
    /// back to built-in defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            default_base_url: env::string_var("PROSBC_BASE_URL"),
            default_username: env::string_var("PROSBC_USERNAME"),
            default_password: env::string_var("PROSBC_PASSWORD"),
            default_config_id: env::string_var("PROSBC_CONFIG_ID")
                .unwrap_or_else(|| defaults::DEFAULT_CONFIG_ID.to_string()),

            per_appliance_concurrency: env::usize_var("PROSBC_PER_APPLIANCE_CONCURRENCY")
                .unwrap_or(defaults::DEFAULT_PER_APPLIANCE_CONCURRENCY),
            global_concurrency: env::usize_var("PROSBC_GLOBAL_CONCURRENCY")
                .unwrap_or(defaults::DEFAULT_GLOBAL_CONCURRENCY),
            default_deadline: env::seconds_var("PROSBC_DEADLINE_SECS")
                .unwrap_or(defaults::DEFAULT_DEADLINE),

            session_ttl: env::seconds_var("PROSBC_SESSION_TTL_SECS")
                .unwrap_or(defaults::DEFAULT_SESSION_TTL),
            probe_min_interval: env::seconds_var("PROSBC_PROBE_MIN_INTERVAL_SECS")
                .unwrap_or(defaults::DEFAULT_PROBE_MIN_INTERVAL),

            credential_cache_ttl: env::seconds_var("PROSBC_CREDENTIAL_CACHE_TTL_SECS")
                .unwrap_or(defaults::DEFAULT_CREDENTIAL_CACHE_TTL),
            config_cache_ttl: env::seconds_var("PROSBC_CONFIG_CACHE_TTL_SECS")
                .unwrap_or(defaults::DEFAULT_CONFIG_CACHE_TTL),
            file_list_cache_ttl: env::seconds_var("PROSBC_FILE_LIST_CACHE_TTL_SECS")
                .unwrap_or(defaults::DEFAULT_FILE_LIST_CACHE_TTL),

            db_id_probe_bound: env::u32_var("PROSBC_DB_ID_PROBE_BOUND")
                .unwrap_or(defaults::DEFAULT_DB_ID_PROBE_BOUND),

            user_agent: env::string_var("PROSBC_USER_AGENT")
                .unwrap_or_else(|| defaults::DEFAULT_USER_AGENT.to_string()),

            accept_invalid_certs_default: env::bool_var("PROSBC_ACCEPT_INVALID_CERTS")
                .unwrap_or(defaults::DEFAULT_ACCEPT_INVALID_CERTS),
        }
    }
}

impl Default for CoreConfig {
    /// Built-in defaults with no environment lookups — used by tests.
    fn default() -> Self {
        Self {
            default_base_url: None,
            default_username: None,
            default_password: None,
            default_config_id: defaults::DEFAULT_CONFIG_ID.to_string(),
            per_appliance_concurrency: defaults::DEFAULT_PER_APPLIANCE_CONCURRENCY,
            global_concurrency: defaults::DEFAULT_GLOBAL_CONCURRENCY,
            default_deadline: defaults::DEFAULT_DEADLINE,
            session_ttl: defaults::DEFAULT_SESSION_TTL,
            probe_min_interval: defaults::DEFAULT_PROBE_MIN_INTERVAL,
            credential_cache_ttl: defaults::DEFAULT_CREDENTIAL_CACHE_TTL,
            config_cache_ttl: defaults::DEFAULT_CONFIG_CACHE_TTL,
            file_list_cache_ttl: defaults::DEFAULT_FILE_LIST_CACHE_TTL,
            db_id_probe_bound: defaults::DEFAULT_DB_ID_PROBE_BOUND,
            user_agent: defaults::DEFAULT_USER_AGENT.to_string(),
            accept_invalid_certs_default: defaults::DEFAULT_ACCEPT_INVALID_CERTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_id_matches_spec() {
        assert_eq!(CoreConfig::default().default_config_id, "3");
    }

    #[test]
    fn db_id_probe_bound_defaults_to_ten() {
        assert_eq!(CoreConfig::default().db_id_probe_bound, 10);
    }

    #[test]
    fn from_env_picks_up_base_url_override() {
        std::env::set_var("PROSBC_BASE_URL", "https://sbc.example.test");
        let cfg = CoreConfig::from_env();
        assert_eq!(
            cfg.default_base_url.as_deref(),
            Some("https://sbc.example.test")
        );
        std::env::remove_var("PROSBC_BASE_URL");
    }
}
