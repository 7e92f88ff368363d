//! Config Selector (C3): discovers configurations on an appliance, selects
//! one for the current session, and resolves the *file-database id* used by
//! every subsequent file-listing URL.
//!
//! Design Note (§9): "collapse into a single implementation whose cache
//! TTLs are configuration, not code" — there is exactly one selection path
//! here, gated by one cache TTL from [`crate::config::CoreConfig`], not a
//! family of "enhanced/hyper/ultra" variants.

use crate::config::CoreConfig;
use crate::domain::{Appliance, ConfigRef, FileKind, SelectedConfig};
use crate::error::CoreError;
use crate::scrape;
use crate::transport::{HttpRequest, HttpTransport, RequestBody};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The legacy-prosbc1 (configId, dbId) mapping table (§4.3 step 2, Glossary:
/// "e.g. `config_1-BU` (id=5) → dbId=3"). This is the only documented pair;
/// any other legacy configId falls through to the dbId probe (§4.3 step 6).
fn legacy_prosbc1_mapping() -> &'static HashMap<&'static str, &'static str> {
    static MAP: std::sync::OnceLock<HashMap<&'static str, &'static str>> = std::sync::OnceLock::new();
    MAP.get_or_init(|| HashMap::from([("5", "3"), ("config_1-BU", "3")]))
}

/// Per-appliance config-selection cache and lookup logic (§4.3).
pub struct ConfigSelector {
    transport: Arc<dyn HttpTransport>,
    config: CoreConfig,
    cache: Mutex<HashMap<(String, String), SelectedConfig>>,
}

impl ConfigSelector {
    pub fn new(transport: Arc<dyn HttpTransport>, config: CoreConfig) -> Self {
        Self {
            transport,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop any cached selection for `appliance_id`, forcing the next
    /// `ensure_selected` call to reselect from scratch.
    pub async fn invalidate(&self, appliance_id: &str) {
        let mut guard = self.cache.lock().await;
        guard.retain(|(id, _), _| id != appliance_id);
    }

    /// Resolve `desired` into a `(configId, dbId)` pair for `appliance`,
    /// reusing the cache when fresh (§4.3 step 1).
    pub async fn ensure_selected(
        &self,
        appliance: &Appliance,
        cookie: &str,
        desired: &ConfigRef,
    ) -> Result<(String, String), CoreError> {
        let cache_key = (appliance.id.clone(), desired.cache_key());
        if let Some(selected) = self.cached(&cache_key).await {
            return Ok((selected.config_id, selected.db_id));
        }

        let (config_id, db_id) = if appliance.is_legacy_prosbc1() {
            self.select_legacy(appliance, cookie, desired).await?
        } else {
            self.select_standard(appliance, cookie, desired).await?
        };

        let mut guard = self.cache.lock().await;
        guard.insert(
            cache_key,
            SelectedConfig {
                config_id: config_id.clone(),
                db_id: db_id.clone(),
                cached_at: std::time::Instant::now(),
            },
        );
        Ok((config_id, db_id))
    }

    /// Current cached `(configId, dbId, age)` for `appliance_id` under
    /// `desired`, if any — used by the health-snapshot supplement.
    pub async fn snapshot(
        &self,
        appliance_id: &str,
        desired: &ConfigRef,
    ) -> Option<(String, String, std::time::Duration)> {
        let key = (appliance_id.to_string(), desired.cache_key());
        let guard = self.cache.lock().await;
        let selected = guard.get(&key)?;
        Some((
            selected.config_id.clone(),
            selected.db_id.clone(),
            selected.cached_at.elapsed(),
        ))
    }

    async fn cached(&self, key: &(String, String)) -> Option<SelectedConfig> {
        let guard = self.cache.lock().await;
        let selected = guard.get(key)?;
        if selected.is_fresh(self.config.config_cache_ttl) {
            Some(selected.clone())
        } else {
            None
        }
    }

    /// §4.3 step 2: resolve via the built-in mapping table; if the desired
    /// ref isn't in it, the HTML is "too fragile to parse reliably" so go
    /// straight to the dbId probe (step 6) instead of steps 3-5.
    async fn select_legacy(
        &self,
        appliance: &Appliance,
        cookie: &str,
        desired: &ConfigRef,
    ) -> Result<(String, String), CoreError> {
        let lookup_key = match desired {
            ConfigRef::Id(id) => Some(id.as_str()),
            ConfigRef::Name(name) => Some(name.as_str()),
            ConfigRef::Any => None,
        };
        if let Some(key) = lookup_key {
            if let Some(db_id) = legacy_prosbc1_mapping().get(key) {
                return Ok((key.to_string(), db_id.to_string()));
            }
        }
        let db_id = self.probe_db_id(appliance, cookie).await?;
        let config_id = lookup_key.unwrap_or(&db_id).to_string();
        Ok((config_id, db_id))
    }

    /// §4.3 steps 3-6: list/resolve, choose, validate, and fall back to the
    /// dbId probe on validation failure.
    async fn select_standard(
        &self,
        appliance: &Appliance,
        cookie: &str,
        desired: &ConfigRef,
    ) -> Result<(String, String), CoreError> {
        let (config_id, candidate_db_id) = self.resolve_config_id(appliance, cookie, desired).await?;

        self.choose(appliance, cookie, &config_id).await?;

        if self.validate(appliance, cookie, &candidate_db_id).await? {
            return Ok((config_id, candidate_db_id));
        }

        let db_id = self.probe_db_id(appliance, cookie).await?;
        Ok((config_id, db_id))
    }

    /// GET `/file_dbs` (or the chooser page) and resolve `desired` into an
    /// appliance-local configId + a best-guess dbId (§4.3 step 3).
    async fn resolve_config_id(
        &self,
        appliance: &Appliance,
        cookie: &str,
        desired: &ConfigRef,
    ) -> Result<(String, String), CoreError> {
        let request = HttpRequest::get("/file_dbs").with_cookie(cookie.to_string());
        let response = self.transport.send(appliance, request).await?;

        if response.is_redirect() {
            let location = response.location.clone().unwrap_or_default();
            if let Some(db_id) = extract_db_id_from_path(&location) {
                let config_id = match desired {
                    ConfigRef::Id(id) => id.clone(),
                    _ => db_id.clone(),
                };
                return Ok((config_id, db_id));
            }
            return Err(CoreError::ProtocolError(format!(
                "`/file_dbs` redirected to an unexpected location: {location}"
            )));
        }

        let body = response.body_text();
        let options = scrape::parse_config_options(&body);
        if options.is_empty() {
            return Err(CoreError::ConfigSelectionFailed(
                "no configurations advertised by `/file_dbs`".to_string(),
            ));
        }

        let chosen = match desired {
            ConfigRef::Id(id) => options
                .iter()
                .find(|(value, _)| value == id)
                .ok_or_else(|| CoreError::NotFound(format!("configuration id `{id}` not found")))?,
            ConfigRef::Name(name) => options
                .iter()
                .find(|(_, label)| label == name)
                .ok_or_else(|| CoreError::NotFound(format!("configuration `{name}` not found")))?,
            ConfigRef::Any => &options[0],
        };
        Ok((chosen.0.clone(), chosen.0.clone()))
    }

    /// POST `/configurations/<id>/choose_redirect` (§4.3 step 4).
    async fn choose(&self, appliance: &Appliance, cookie: &str, config_id: &str) -> Result<(), CoreError> {
        let request = HttpRequest::post(
            format!("/configurations/{config_id}/choose_redirect"),
            RequestBody::None,
        )
        .with_cookie(cookie.to_string());
        let response = self.transport.send(appliance, request).await?;

        if response.is_success() {
            return Ok(());
        }
        if response.is_redirect() {
            let location = response.location.clone().unwrap_or_default();
            if location.contains("/configurations") && !location.contains("choose_redirect") {
                return Err(CoreError::ConfigSelectionFailed(format!(
                    "choose_redirect cycled back to the chooser: {location}"
                )));
            }
            return Ok(());
        }
        Err(CoreError::upstream(
            Some(response.status),
            scrape::strip_script_tags(&response.body_text()),
        ))
    }

    /// GET `/file_dbs/<dbId>/edit` and check it's a real file-database page,
    /// not the chooser (§4.3 step 5).
    async fn validate(&self, appliance: &Appliance, cookie: &str, db_id: &str) -> Result<bool, CoreError> {
        let request =
            HttpRequest::get(format!("/file_dbs/{db_id}/edit")).with_cookie(cookie.to_string());
        let response = self.transport.send(appliance, request).await?;
        if !response.is_success() {
            return Ok(false);
        }
        let body = response.body_text();
        let has_legend =
            scrape::contains_legend_for(&body, FileKind::Df) || scrape::contains_legend_for(&body, FileKind::Dm);
        Ok(has_legend && !scrape::contains_chooser_markers(&body))
    }

    /// §4.3 step 6: probe `dbId` in `1..=db_id_probe_bound` for the first
    /// page that validates.
    async fn probe_db_id(&self, appliance: &Appliance, cookie: &str) -> Result<String, CoreError> {
        for candidate in 1..=self.config.db_id_probe_bound {
            let candidate = candidate.to_string();
            if self.validate(appliance, cookie, &candidate).await? {
                return Ok(candidate);
            }
        }
        Err(CoreError::ConfigSelectionFailed(format!(
            "no dbId in 1..={} validated for appliance `{}`",
            self.config.db_id_probe_bound, appliance.id
        )))
    }
}

fn extract_db_id_from_path(location: &str) -> Option<String> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"/file_dbs/(\d+)").unwrap());
    re.captures(location).map(|c| c[1].to_string())
}
