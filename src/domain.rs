//! Data model shared across every component (§3 of the specification).
//!
//! These types are intentionally storage-agnostic: persisted entities carry
//! plain fields and are handed to/from [`crate::repository`] trait objects,
//! so the choice of backing store lives entirely outside this crate.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime};

/// One remote SBC instance, identified by (id, baseUrl).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appliance {
    pub id: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Per-appliance TLS verification toggle (§6: "make this per-appliance
    /// configurable"); true for appliances with self-signed certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Appliance {
    /// True when this appliance is the legacy-prosbc1 variant (§4.3 step 2),
    /// detected by a case-insensitive match on the literal id `prosbc1`.
    pub fn is_legacy_prosbc1(&self) -> bool {
        self.id.eq_ignore_ascii_case("prosbc1")
    }
}

/// The two routing-related file kinds this system manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Routeset Definition files.
    Df,
    /// Digit-Map files.
    Dm,
}

impl FileKind {
    /// URL path segment this kind maps to under `/file_dbs/<dbId>/...`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Df => "routesets_definitions",
            Self::Dm => "routesets_digitmaps",
        }
    }

    /// Multipart form field name carrying the uploaded file bytes.
    pub fn upload_field_name(&self) -> &'static str {
        match self {
            Self::Df => "tbgw_routesets_definition[file]",
            Self::Dm => "tbgw_routesets_digitmap[file]",
        }
    }

    /// Legend text variants this kind's fieldset is identified by (§4.4).
    pub fn legend_candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Df => &["Routesets Definition:", "Routesets Definition"],
            Self::Dm => &["Routesets Digitmap:", "Routesets Digitmap"],
        }
    }
}

/// Caller-supplied reference to a configuration: by numeric id, by name, or
/// "any active / first" when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRef {
    Id(String),
    Name(String),
    Any,
}

impl ConfigRef {
    pub fn from_opt(raw: Option<String>) -> Self {
        match raw {
            None => Self::Any,
            Some(value) if value.chars().all(|c| c.is_ascii_digit()) && !value.is_empty() => {
                Self::Id(value)
            }
            Some(value) => Self::Name(value),
        }
    }

    /// Cache key fragment so distinct refs never collide in the selector cache.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Id(id) => format!("id:{id}"),
            Self::Name(name) => format!("name:{name}"),
            Self::Any => "any".to_string(),
        }
    }
}

/// A named bundle of settings on an appliance (§3 Configuration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub id: String,
    pub name: String,
    pub db_id: String,
    pub active: bool,
}

/// Lifecycle state of a pooled [`Session`] (§3 Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Acquiring,
    Valid,
    Invalid,
}

/// A per-appliance cookie and its validation bookkeeping, held by
/// [`crate::session::SessionPool`]. TTL and probe-throttling are both
/// measured from `last_validated_at`, not `created_at`: a session that keeps
/// passing cheap probes stays alive indefinitely.
#[derive(Debug, Clone)]
pub struct Session {
    pub cookie: String,
    pub created_at: Instant,
    pub last_validated_at: Instant,
    pub state: SessionState,
}

impl Session {
    pub fn fresh(cookie: String) -> Self {
        let now = Instant::now();
        Self {
            cookie,
            created_at: now,
            last_validated_at: now,
            state: SessionState::Valid,
        }
    }

    /// True while `last_validated_at` is within `ttl` (§4.2: "TTL: 20 min
    /// since lastValidatedAt").
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.state == SessionState::Valid && self.last_validated_at.elapsed() < ttl
    }

    /// True once `min_interval` has passed since the last probe, i.e. it is
    /// time to re-probe rather than trust the cached validity (§4.2: "used
    /// at most once per 5 min per session").
    pub fn needs_probe(&self, min_interval: Duration) -> bool {
        self.last_validated_at.elapsed() >= min_interval
    }

    pub fn mark_validated(&mut self) {
        self.last_validated_at = Instant::now();
        self.state = SessionState::Valid;
    }

    pub fn mark_invalid(&mut self) {
        self.state = SessionState::Invalid;
    }
}

/// A resolved, selected (configId, dbId) pair cached on a [`crate::selector::ConfigSelector`].
#[derive(Debug, Clone)]
pub struct SelectedConfig {
    pub config_id: String,
    pub db_id: String,
    pub cached_at: Instant,
}

impl SelectedConfig {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() < ttl
    }
}

/// One row of the DF/DM file-list table (§3 File Descriptor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
    pub kind: FileKind,
    pub config_db_id: String,
    pub update_href: String,
    pub export_href: String,
    pub delete_href: String,
}

/// Upload mode (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Auto,
    Create,
    Update,
    Replace,
}

/// Result of a single-appliance upload/update operation.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub file_name: String,
    pub verified: bool,
}

/// Status of a synced DM inventory row (§3 DmInventoryRow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryStatus {
    Active,
    Syncing,
    Inactive,
}

/// Persistent, keyed by (applianceId, fileName).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmInventoryRow {
    pub appliance_id: String,
    pub file_name: String,
    pub csv_body: String,
    pub extracted_numbers: Vec<String>,
    pub number_count: usize,
    pub last_synced_at: SystemTime,
    pub status: InventoryStatus,
}

impl DmInventoryRow {
    pub fn new(appliance_id: String, file_name: String, csv_body: String, numbers: Vec<String>) -> Self {
        let number_count = numbers.len();
        Self {
            appliance_id,
            file_name,
            csv_body,
            extracted_numbers: numbers,
            number_count,
            last_synced_at: SystemTime::now(),
            status: InventoryStatus::Active,
        }
    }
}

/// Persistent. Active iff `removed_date` is null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerNumber {
    pub number: String,
    pub customer_name: String,
    pub appliance_id: String,
    pub added_date: SystemTime,
    pub removed_date: Option<SystemTime>,
    pub added_by: Option<String>,
    pub removed_by: Option<String>,
}

impl CustomerNumber {
    pub fn is_active(&self) -> bool {
        self.removed_date.is_none()
    }
}

/// Persistent. Invariant: for every pending removal there exists an active
/// [`CustomerNumber`] matching (number, applianceId).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRemoval {
    pub number: String,
    pub customer_name: String,
    pub appliance_id: String,
    pub removal_date: SystemTime,
    pub removed_by: Option<String>,
}

/// Append-only action taken on a single number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberAction {
    Add,
    Remove,
    Update,
}

/// Append-only event record (§3 NumberEvent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberEvent {
    pub number: String,
    pub action: NumberAction,
    pub customer_name: String,
    pub appliance_id: String,
    pub user_id: Option<String>,
    pub file_name: String,
    pub details: String,
    pub timestamp: SystemTime,
}

/// Aggregate change type for a [`CustomerNumberChange`] summary row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Add,
    Remove,
}

/// Append-only aggregate summary (§3 CustomerNumberChange).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerNumberChange {
    pub customer_name: String,
    pub change_type: ChangeType,
    pub count: usize,
    pub appliance_id: String,
    pub user_id: Option<String>,
    pub details: String,
    pub timestamp: SystemTime,
}

/// Per-appliance outcome of a fan-out operation (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceResult {
    pub appliance_id: String,
    pub url: String,
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<String>,
}
