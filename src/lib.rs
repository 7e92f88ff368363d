//! ProSBC Integration Core — a management-plane library that drives a fleet
//! of remote Session Border Controller appliances over their cookie-based
//! HTML admin UI.
//!
//! This crate owns session acquisition, configuration selection, HTML/CSRF
//! scraping, file (DF/DM) operations, cross-appliance fan-out, and the
//! number-inventory sync pipeline. It is consumed as a library by an HTTP
//! router that owns authentication, request logging, and persistence
//! wiring — none of those concerns live here.
//!
//! # Quick start
//!
//! ```no_run
//! use prosbc_core::config::CoreConfig;
//! use prosbc_core::domain::{ConfigRef, FileKind};
//! use prosbc_core::files::OperationContext;
//! use prosbc_core::ProsbcCore;
//!
//! # async fn example() -> Result<(), prosbc_core::error::CoreError> {
//! let config = CoreConfig::from_env();
//! let core = ProsbcCore::new(config);
//!
//! let appliance = core.registry().lookup("app-1").await?;
//! let cookie = core.sessions().acquire(&appliance).await?;
//! let (config_id, db_id) = core
//!     .selector()
//!     .ensure_selected(&appliance, &cookie, &ConfigRef::Any)
//!     .await?;
//! let ctx = OperationContext {
//!     appliance: &appliance,
//!     cookie: &cookie,
//!     config_name: &config_id,
//!     db_id: &db_id,
//! };
//! let files = core.files().list(&ctx, FileKind::Df).await?;
//! println!("{} definition files", files.len());
//! # Ok(())
//! # }
//! ```

/// Compile-time build/version metadata.
pub mod build_info;
/// Config loading, environment defaults, and tunables.
pub mod config;
/// Single-flight per-appliance request context and deadlines.
pub mod context;
/// Data model shared across every component (C1-C6).
pub mod domain;
/// Error taxonomy used across crate modules.
pub mod error;
/// File list/export/upload/update/delete engine (C5).
pub mod files;
/// Fan-out dispatch and number-inventory pipeline (C6).
pub mod orchestrator;
/// Per-appliance credential lookup with a short read-through cache (C1).
pub mod registry;
/// Repository traits the core depends on for persisted entities.
pub mod repository;
/// HTML/CSRF scraping helpers (C4).
pub mod scrape;
/// Config-selection state machine and legacy dbId mapping (C3).
pub mod selector;
/// Per-appliance cookie lifecycle: login, TTL, probe, eviction (C2).
pub mod session;
/// Generic structured single-flight primitive.
pub mod singleflight;
#[cfg(test)]
/// Shared testing utilities compiled only for tests.
pub mod testsupport;
/// Shared text formatting helpers.
pub mod textutil;
/// Injectable HTTP transport seam.
pub mod transport;

use crate::config::CoreConfig;
use crate::files::FileOperations;
use crate::orchestrator::Orchestrator;
use crate::registry::CredentialRegistry;
use crate::repository::{ApplianceRepository, InMemoryApplianceRepository, InventoryRepository};
use crate::selector::ConfigSelector;
use crate::session::SessionPool;
use crate::transport::{HttpTransport, ReqwestTransport};
use std::sync::Arc;

/// Top-level facade wiring the six components together.
///
/// A caller builds one `ProsbcCore` per process (or per tenant) and shares
/// it across requests; all internal state is behind appliance-scoped locks,
/// so handing out `&ProsbcCore` / `Arc<ProsbcCore>` to concurrent callers is
/// the intended usage.
pub struct ProsbcCore {
    config: CoreConfig,
    registry: CredentialRegistry,
    sessions: SessionPool,
    selector: ConfigSelector,
    files: FileOperations,
}

impl ProsbcCore {
    /// Build a core backed by an in-memory appliance repository, useful for
    /// tests and small deployments that configure appliances via `PROSBC_*`
    /// environment variables only.
    pub fn new(config: CoreConfig) -> Self {
        Self::with_repository(config, Arc::new(InMemoryApplianceRepository::default()))
    }

    /// Build a core backed by a caller-supplied appliance repository (e.g. a
    /// database-backed adapter living in the HTTP router crate).
    pub fn with_repository(config: CoreConfig, repository: Arc<dyn ApplianceRepository>) -> Self {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config));
        Self::with_transport(config, repository, transport)
    }

    /// Build a core with an injected HTTP transport seam, used by tests to
    /// run the scenarios in the specification without a real network.
    pub fn with_transport(
        config: CoreConfig,
        repository: Arc<dyn ApplianceRepository>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let registry = CredentialRegistry::new(repository, config.credential_cache_ttl);
        let sessions = SessionPool::new(transport.clone(), config.clone());
        let selector = ConfigSelector::new(transport.clone(), config.clone());
        let files = FileOperations::new(transport, config.clone());
        Self {
            config,
            registry,
            sessions,
            selector,
            files,
        }
    }

    /// Configuration this core was built with.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Credential Registry (C1).
    pub fn registry(&self) -> &CredentialRegistry {
        &self.registry
    }

    /// Session Pool (C2).
    pub fn sessions(&self) -> &SessionPool {
        &self.sessions
    }

    /// Config Selector (C3).
    pub fn selector(&self) -> &ConfigSelector {
        &self.selector
    }

    /// File Operations Engine (C5).
    pub fn files(&self) -> &FileOperations {
        &self.files
    }

    /// Build the Fan-out & Inventory Orchestrator (C6), bound to a caller
    /// supplied inventory repository.
    pub fn orchestrator(&self, inventory: Arc<dyn InventoryRepository>) -> Orchestrator<'_> {
        Orchestrator::new(self, inventory)
    }
}
