//! Fan-out & Inventory Orchestrator (C6): drives C1-C5 across the whole
//! appliance fleet and owns the number-inventory diff/billing pipeline.
//!
//! Design Note (§9): this is the one component that composes the other five
//! rather than owning transport state itself — it borrows [`ProsbcCore`] and
//! is handed a caller-supplied [`InventoryRepository`], matching §6's "the
//! router owns persistence wiring; none of that lives in the core proper"
//! except for the one seam (this trait) the core needs to read/write through.

use crate::context::{ConcurrencyLimiter, Deadline};
use crate::domain::{
    ApplianceResult, ChangeType, CustomerNumber, CustomerNumberChange, DmInventoryRow, FileDescriptor,
    FileKind, NumberAction, NumberEvent, PendingRemoval, UploadMode,
};
use crate::error::{CoreError, FanoutErrorKind};
use crate::files::OperationContext;
use crate::repository::InventoryRepository;
use crate::ProsbcCore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Outcome of one matched-or-not lookup during [`Orchestrator::update_on_all`].
struct FuzzyMatch<'a> {
    descriptor: &'a FileDescriptor,
    diagnostic: Option<(usize, f64)>,
}

/// Per-file result of [`Orchestrator::sync_dm_inventory`].
#[derive(Debug, Clone)]
pub struct SyncedFile {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct SyncError {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub synced: Vec<SyncedFile>,
    pub errors: Vec<SyncError>,
}

/// A synced file's extracted numbers, kept alongside [`SyncOutcome`] only for
/// [`Orchestrator::replace_all`]'s own bookkeeping (never persisted directly).
struct SyncedNumbers {
    file_name: String,
    numbers: Vec<String>,
}

/// Read-only snapshot returned by [`Orchestrator::describe`].
#[derive(Debug, Clone)]
pub struct ApplianceHealth {
    pub appliance_id: String,
    pub base_url: String,
    pub session_valid: Option<bool>,
    pub session_age: Option<Duration>,
    pub selected_config_id: Option<String>,
    pub selected_db_id: Option<String>,
    pub config_cache_age: Option<Duration>,
}

/// Per-appliance summary returned by [`Orchestrator::replace_all`].
#[derive(Debug, Clone, Default)]
pub struct ReplaceAllOutcome {
    pub appliance_id: String,
    pub additions: usize,
    pub renames: usize,
    pub scheduled_removals: usize,
    pub sync_errors: Vec<SyncError>,
}

/// Orchestrates C1-C5 across a fleet and drives the number-inventory
/// pipeline (§4.6). Borrows `core` rather than owning it: the router is
/// expected to build one per request/job, not one per process.
pub struct Orchestrator<'a> {
    core: &'a ProsbcCore,
    inventory: Arc<dyn InventoryRepository>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(core: &'a ProsbcCore, inventory: Arc<dyn InventoryRepository>) -> Self {
        Self { core, inventory }
    }

    /// §4.6 updateOnAll: fan out an upload across every active appliance,
    /// matching the target file by the documented five-step fuzzy chain.
    ///
    /// Implemented as a bounded `buffered` stream rather than `tokio::spawn`
    /// per appliance: `Orchestrator` only borrows `ProsbcCore` (§9 "the
    /// router owns the core's lifetime, not this component"), so the futures
    /// here are never `'static` and can't be spawned onto the runtime — only
    /// driven to completion in place. `buffered` also gives us the
    /// documented "reported in insertion order" guarantee for free.
    pub async fn update_on_all(
        &self,
        kind: FileKind,
        filename: &str,
        bytes: Vec<u8>,
        desired: &crate::domain::ConfigRef,
        deadline: Deadline,
    ) -> Result<Vec<ApplianceResult>, CoreError> {
        use futures::stream::{self, StreamExt};

        let appliances = self.core.registry().list_active().await?;
        let limiter = ConcurrencyLimiter::new(self.core.config());
        let breadth = self.core.config().per_appliance_concurrency.max(1);

        let results = stream::iter(appliances)
            .map(|appliance| {
                let limiter = &limiter;
                let core = self.core;
                let bytes = bytes.clone();
                let filename = filename.to_string();
                let desired = desired.clone();
                async move {
                    update_one(core, limiter, &appliance, kind, &filename, bytes, &desired, deadline).await
                }
            })
            .buffered(breadth)
            .collect::<Vec<_>>()
            .await;
        Ok(results)
    }

    /// §4.6 syncDmInventory: pull every `.csv` DM file (excluding
    /// `called_calling`) and upsert its extracted numbers into the inventory.
    pub async fn sync_dm_inventory(
        &self,
        appliance_id: &str,
        desired: &crate::domain::ConfigRef,
        _acting_user: Option<&str>,
    ) -> Result<SyncOutcome, CoreError> {
        self.sync_dm_inventory_with_numbers(appliance_id, desired)
            .await
            .map(|(outcome, _)| outcome)
    }

    async fn sync_dm_inventory_with_numbers(
        &self,
        appliance_id: &str,
        desired: &crate::domain::ConfigRef,
    ) -> Result<(SyncOutcome, Vec<SyncedNumbers>), CoreError> {
        let appliance = self.core.registry().lookup(appliance_id).await?;
        let cookie = self.core.sessions().acquire(&appliance).await?;
        let (config_id, db_id) = self
            .core
            .selector()
            .ensure_selected(&appliance, &cookie, desired)
            .await?;
        let ctx = OperationContext {
            appliance: &appliance,
            cookie: &cookie,
            config_name: &config_id,
            db_id: &db_id,
        };

        let rows = self.core.files().list(&ctx, FileKind::Dm).await?;
        let candidates: Vec<_> = rows
            .into_iter()
            .filter(|row| row.name.ends_with(".csv") && !row.name.contains("called_calling"))
            .collect();

        let mut outcome = SyncOutcome::default();
        let mut synced_numbers = Vec::new();
        for file in candidates {
            match self.core.files().export(&ctx, FileKind::Dm, &file.id).await {
                Ok(bytes) => {
                    let csv_body = String::from_utf8_lossy(&bytes).into_owned();
                    let numbers = extract_numbers(&csv_body);
                    let row = DmInventoryRow::new(
                        appliance.id.clone(),
                        file.name.clone(),
                        csv_body,
                        numbers.clone(),
                    );
                    let count = row.number_count;
                    self.inventory.upsert_inventory_row(row).await?;
                    outcome.synced.push(SyncedFile {
                        name: file.name.clone(),
                        count,
                    });
                    synced_numbers.push(SyncedNumbers {
                        file_name: file.name,
                        numbers,
                    });
                }
                Err(err) => {
                    let mut inactive = DmInventoryRow::new(
                        appliance.id.clone(),
                        file.name.clone(),
                        String::new(),
                        Vec::new(),
                    );
                    inactive.status = crate::domain::InventoryStatus::Inactive;
                    let _ = self.inventory.upsert_inventory_row(inactive).await;
                    outcome.errors.push(SyncError {
                        name: file.name,
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok((outcome, synced_numbers))
    }

    /// §4.6 replaceAll: resync every active appliance, then diff the newly
    /// observed number set against the persisted active set to compute
    /// additions, renames, and scheduled removals.
    pub async fn replace_all(
        &self,
        desired: &crate::domain::ConfigRef,
        acting_user: Option<&str>,
    ) -> Result<Vec<ReplaceAllOutcome>, CoreError> {
        let appliances = self.core.registry().list_active().await?;
        let mut outcomes = Vec::with_capacity(appliances.len());

        for appliance in appliances {
            let (sync_outcome, synced_numbers) = match self
                .sync_dm_inventory_with_numbers(&appliance.id, desired)
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    outcomes.push(ReplaceAllOutcome {
                        appliance_id: appliance.id.clone(),
                        sync_errors: vec![SyncError {
                            name: "<sync>".to_string(),
                            message: err.to_string(),
                        }],
                        ..Default::default()
                    });
                    continue;
                }
            };

            let new_by_number = build_new_by_number(&synced_numbers);
            let active = self.inventory.active_numbers(&appliance.id).await?;
            let mut active_by_number: HashMap<String, CustomerNumber> = HashMap::new();
            for row in active {
                active_by_number.insert(row.number.clone(), row);
            }

            let now = SystemTime::now();
            let removal_date = last_instant_of_current_month(now);

            let mut additions = 0usize;
            let mut renames = 0usize;
            let mut add_counts: HashMap<String, usize> = HashMap::new();

            for (number, customer_name) in &new_by_number {
                match active_by_number.get(number) {
                    None => {
                        let customer = CustomerNumber {
                            number: number.clone(),
                            customer_name: customer_name.clone(),
                            appliance_id: appliance.id.clone(),
                            added_date: now,
                            removed_date: None,
                            added_by: acting_user.map(str::to_string),
                            removed_by: None,
                        };
                        self.inventory.add_customer_number(customer).await?;
                        self.inventory
                            .append_number_event(NumberEvent {
                                number: number.clone(),
                                action: NumberAction::Add,
                                customer_name: customer_name.clone(),
                                appliance_id: appliance.id.clone(),
                                user_id: acting_user.map(str::to_string),
                                file_name: customer_name.clone(),
                                details: "added by replaceAll".to_string(),
                                timestamp: now,
                            })
                            .await?;
                        additions += 1;
                        *add_counts.entry(customer_name.clone()).or_insert(0) += 1;
                    }
                    Some(existing) if &existing.customer_name != customer_name => {
                        self.inventory
                            .rename_customer_number(
                                &appliance.id,
                                number,
                                &existing.customer_name,
                                customer_name,
                            )
                            .await?;
                        self.inventory
                            .append_number_event(NumberEvent {
                                number: number.clone(),
                                action: NumberAction::Update,
                                customer_name: customer_name.clone(),
                                appliance_id: appliance.id.clone(),
                                user_id: acting_user.map(str::to_string),
                                file_name: customer_name.clone(),
                                details: format!("renamed from `{}`", existing.customer_name),
                                timestamp: now,
                            })
                            .await?;
                        renames += 1;
                    }
                    Some(_) => {}
                }
            }

            let mut scheduled_removals = 0usize;
            let mut remove_counts: HashMap<String, usize> = HashMap::new();
            for (number, existing) in &active_by_number {
                if !new_by_number.contains_key(number) {
                    self.inventory
                        .insert_pending_removal(PendingRemoval {
                            number: number.clone(),
                            customer_name: existing.customer_name.clone(),
                            appliance_id: appliance.id.clone(),
                            removal_date,
                            removed_by: acting_user.map(str::to_string),
                        })
                        .await?;
                    scheduled_removals += 1;
                    *remove_counts.entry(existing.customer_name.clone()).or_insert(0) += 1;
                }
            }

            for (customer_name, count) in add_counts {
                self.inventory
                    .append_customer_number_change(CustomerNumberChange {
                        customer_name,
                        change_type: ChangeType::Add,
                        count,
                        appliance_id: appliance.id.clone(),
                        user_id: acting_user.map(str::to_string),
                        details: "replaceAll".to_string(),
                        timestamp: now,
                    })
                    .await?;
            }
            for (customer_name, count) in remove_counts {
                self.inventory
                    .append_customer_number_change(CustomerNumberChange {
                        customer_name,
                        change_type: ChangeType::Remove,
                        count,
                        appliance_id: appliance.id.clone(),
                        user_id: acting_user.map(str::to_string),
                        details: "replaceAll scheduled removal".to_string(),
                        timestamp: now,
                    })
                    .await?;
            }

            let mut sync_errors = sync_outcome.errors;
            sync_errors.shrink_to_fit();
            outcomes.push(ReplaceAllOutcome {
                appliance_id: appliance.id,
                additions,
                renames,
                scheduled_removals,
                sync_errors,
            });
        }
        Ok(outcomes)
    }

    /// §4.6 processPendingRemovals: apply every removal whose `removal_date`
    /// is at or before `now`.
    pub async fn process_pending_removals(&self, now: SystemTime) -> Result<usize, CoreError> {
        let due = self.inventory.due_pending_removals(now).await?;
        let mut processed = 0usize;
        for removal in due {
            self.inventory
                .mark_customer_number_removed(
                    &removal.appliance_id,
                    &removal.number,
                    &removal.customer_name,
                    removal.removal_date,
                    removal.removed_by.clone(),
                )
                .await?;
            self.inventory
                .append_number_event(NumberEvent {
                    number: removal.number.clone(),
                    action: NumberAction::Remove,
                    customer_name: removal.customer_name.clone(),
                    appliance_id: removal.appliance_id.clone(),
                    user_id: removal.removed_by.clone(),
                    file_name: removal.customer_name.clone(),
                    details: "scheduled removal processed".to_string(),
                    timestamp: removal.removal_date,
                })
                .await?;
            self.inventory
                .append_customer_number_change(CustomerNumberChange {
                    customer_name: removal.customer_name.clone(),
                    change_type: ChangeType::Remove,
                    count: 1,
                    appliance_id: removal.appliance_id.clone(),
                    user_id: removal.removed_by.clone(),
                    details: "processPendingRemovals".to_string(),
                    timestamp: removal.removal_date,
                })
                .await?;
            self.inventory
                .delete_pending_removal(&removal.appliance_id, &removal.number, &removal.customer_name)
                .await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Read-only health snapshot for one appliance (SUPPLEMENT: "useful to
    /// the out-of-scope dashboard collaborator without adding any UI
    /// itself") — session state, selected config, and cache ages, never the
    /// cookie or the appliance's credentials.
    pub async fn describe(
        &self,
        appliance_id: &str,
        desired: &crate::domain::ConfigRef,
    ) -> Result<ApplianceHealth, CoreError> {
        let appliance = self.core.registry().lookup(appliance_id).await?;
        let session = self.core.sessions().snapshot(appliance_id).await;
        let selection = self.core.selector().snapshot(appliance_id, desired).await;
        Ok(ApplianceHealth {
            appliance_id: appliance.id,
            base_url: appliance.base_url,
            session_valid: session.map(|(valid, _)| valid),
            session_age: session.map(|(_, age)| age),
            selected_config_id: selection.as_ref().map(|(config_id, _, _)| config_id.clone()),
            selected_db_id: selection.as_ref().map(|(_, db_id, _)| db_id.clone()),
            config_cache_age: selection.map(|(_, _, age)| age),
        })
    }

    /// §4.6 monthlyUsage: per-customer unique-number counts for the named
    /// calendar month.
    pub async fn monthly_usage(
        &self,
        year: i64,
        month: u32,
        appliance_id: Option<&str>,
    ) -> Result<HashMap<String, usize>, CoreError> {
        let window_start = system_time_from_ymd(year, month, 1);
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let window_end = system_time_from_ymd(next_year, next_month, 1) - Duration::from_secs(1);
        self.inventory
            .monthly_usage(appliance_id, window_start, window_end)
            .await
    }
}

async fn update_one(
    core: &ProsbcCore,
    limiter: &ConcurrencyLimiter,
    appliance: &crate::domain::Appliance,
    kind: FileKind,
    filename: &str,
    bytes: Vec<u8>,
    desired: &crate::domain::ConfigRef,
    deadline: Deadline,
) -> ApplianceResult {
    let appliance_id = appliance.id.clone();
    let url = appliance.base_url.clone();
    let attempt = async {
        let _permit = limiter.acquire(&appliance_id, &deadline).await?;
        let cookie = core.sessions().acquire(appliance).await?;
        let (config_id, db_id) = core
            .selector()
            .ensure_selected(appliance, &cookie, desired)
            .await?;
        let ctx = OperationContext {
            appliance,
            cookie: &cookie,
            config_name: &config_id,
            db_id: &db_id,
        };
        let rows = core.files().list(&ctx, kind).await?;
        let found = find_fuzzy_match(&rows, filename);
        match found {
            None => Ok(ApplianceResult {
                appliance_id: appliance_id.clone(),
                url: url.clone(),
                success: false,
                message: Some("not on this instance".to_string()),
                error: None,
                error_type: None,
            }),
            Some(fuzzy) => {
                let matched_name = fuzzy.descriptor.name.clone();
                let diagnostic = fuzzy.diagnostic;
                let outcome = core
                    .files()
                    .upload(&ctx, kind, &matched_name, bytes.clone(), UploadMode::Update)
                    .await?;
                let message = diagnostic.map(|(distance, relative)| {
                    format!(
                        "matched `{matched_name}` via fuzzy distance={distance} relative={relative:.3}"
                    )
                });
                Ok(ApplianceResult {
                    appliance_id: appliance_id.clone(),
                    url: url.clone(),
                    success: outcome.verified,
                    message,
                    error: None,
                    error_type: None,
                })
            }
        }
    };

    match deadline.race("updateOnAll per-appliance attempt", attempt).await {
        Ok(result) => result,
        Err(err) => ApplianceResult {
            appliance_id,
            url,
            success: false,
            message: None,
            error_type: Some(FanoutErrorKind::from(&err).as_str().to_string()),
            error: Some(err.to_string()),
        },
    }
}

fn build_new_by_number(synced: &[SyncedNumbers]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for file in synced {
        for number in &file.numbers {
            map.insert(number.clone(), file.file_name.clone());
        }
    }
    map
}

/// First column only, trimmed, non-empty, skipping the header literal
/// `called`, deduplicated in encounter order (§4.6 syncDmInventory step 2).
fn extract_numbers(csv_body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in csv_body.lines() {
        let first = line.split(',').next().unwrap_or("").trim();
        if first.is_empty() || first.eq_ignore_ascii_case("called") {
            continue;
        }
        if seen.insert(first.to_string()) {
            out.push(first.to_string());
        }
    }
    out
}

/// Strip zero-width characters and collapse whitespace (§4.6 step 2c).
fn normalize_name(name: &str) -> String {
    let filtered: String = name
        .chars()
        .filter(|c| !matches!(*c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// The §4.6 step-2 five-level fuzzy match chain.
fn find_fuzzy_match<'a>(rows: &'a [FileDescriptor], filename: &str) -> Option<FuzzyMatch<'a>> {
    if let Some(descriptor) = rows.iter().find(|row| row.id == filename) {
        return Some(FuzzyMatch {
            descriptor,
            diagnostic: None,
        });
    }
    if let Some(descriptor) = rows.iter().find(|row| row.name == filename) {
        return Some(FuzzyMatch {
            descriptor,
            diagnostic: None,
        });
    }

    let normalized_target = normalize_name(filename);
    if let Some(descriptor) = rows
        .iter()
        .find(|row| normalize_name(&row.name) == normalized_target)
    {
        return Some(FuzzyMatch {
            descriptor,
            diagnostic: None,
        });
    }
    if let Some(descriptor) = rows.iter().find(|row| {
        let normalized_row = normalize_name(&row.name);
        normalized_row.contains(&normalized_target) || normalized_target.contains(&normalized_row)
    }) {
        return Some(FuzzyMatch {
            descriptor,
            diagnostic: None,
        });
    }

    let mut best: Option<(&FileDescriptor, usize, f64)> = None;
    for row in rows {
        let normalized_row = normalize_name(&row.name);
        let distance = levenshtein(&normalized_row, &normalized_target);
        let max_len = normalized_row
            .chars()
            .count()
            .max(normalized_target.chars().count())
            .max(1);
        let relative = distance as f64 / max_len as f64;
        if distance <= 3 || relative <= 0.20 {
            if best.map_or(true, |(_, best_distance, _)| distance < best_distance) {
                best = Some((row, distance, relative));
            }
        }
    }
    best.map(|(descriptor, distance, relative)| FuzzyMatch {
        descriptor,
        diagnostic: Some((distance, relative)),
    })
}

/// Classic edit-distance DP over chars; no crate in the dependency stack
/// provides this, so it's hand-rolled (§4.6 step 2e).
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let temp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev_diag
            } else {
                1 + prev_diag.min(row[j]).min(row[j - 1])
            };
            prev_diag = temp;
        }
    }
    row[b.len()]
}

/// Days-from-civil / civil-from-days conversion (Howard Hinnant's public
/// domain `chrono`-free algorithm), used because this crate carries no date
/// crate — calendar math for `replaceAll`'s removal date and `monthlyUsage`'s
/// window bounds is the only place that needs it.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = ((m as i64 + 9) % 12) as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

fn system_time_from_ymd(year: i64, month: u32, day: u32) -> SystemTime {
    let days = days_from_civil(year, month, day);
    SystemTime::UNIX_EPOCH + Duration::from_secs((days * 86400) as u64)
}

/// Server-local "last instant of the current calendar month" (§4.6
/// replaceAll's scheduled-removal date). Server-local here is UTC, since this
/// crate carries no timezone database.
fn last_instant_of_current_month(now: SystemTime) -> SystemTime {
    let days_since_epoch = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
        / 86400;
    let (year, month, _) = civil_from_days(days_since_epoch);
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    system_time_from_ymd(next_year, next_month, 1) - Duration::from_secs(1)
}
