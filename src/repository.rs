//! Repository traits for the persisted entities in §3.
//!
//! The specification explicitly keeps "the relational schema beyond the
//! entities the core reads/writes" out of scope (§1) and grants "schema
//! freedom... provided the invariants hold" (§6). These traits are the
//! seam: a caller (the HTTP router crate) implements them against its own
//! database; this crate ships in-memory implementations for tests and for
//! standalone use.

use crate::domain::{
    Appliance, CustomerNumber, CustomerNumberChange, DmInventoryRow, NumberEvent, PendingRemoval,
};
use crate::error::CoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

/// Credential Registry backing store (§4.1).
#[async_trait]
pub trait ApplianceRepository: Send + Sync {
    async fn lookup(&self, id: &str) -> Result<Appliance, CoreError>;
    async fn list_active(&self) -> Result<Vec<Appliance>, CoreError>;
}

/// Backing store for the number-inventory pipeline (§4.6).
#[async_trait]
pub trait InventoryRepository: Send + Sync {
    /// Insert or replace the DM inventory row for (applianceId, fileName).
    async fn upsert_inventory_row(&self, row: DmInventoryRow) -> Result<(), CoreError>;

    /// Active `CustomerNumber` rows for an appliance (all customers).
    async fn active_numbers(&self, appliance_id: &str) -> Result<Vec<CustomerNumber>, CoreError>;

    /// Insert a new active `CustomerNumber` row.
    async fn add_customer_number(&self, number: CustomerNumber) -> Result<(), CoreError>;

    /// Mark an active `CustomerNumber` as removed as of `removed_at`.
    async fn mark_customer_number_removed(
        &self,
        appliance_id: &str,
        number: &str,
        customer_name: &str,
        removed_at: SystemTime,
        removed_by: Option<String>,
    ) -> Result<(), CoreError>;

    /// Rename the owning customer of an active number (keeps it active).
    async fn rename_customer_number(
        &self,
        appliance_id: &str,
        number: &str,
        old_customer_name: &str,
        new_customer_name: &str,
    ) -> Result<(), CoreError>;

    async fn insert_pending_removal(&self, removal: PendingRemoval) -> Result<(), CoreError>;

    /// Pending removals whose `removal_date` is at or before `now`.
    async fn due_pending_removals(&self, now: SystemTime) -> Result<Vec<PendingRemoval>, CoreError>;

    async fn delete_pending_removal(
        &self,
        appliance_id: &str,
        number: &str,
        customer_name: &str,
    ) -> Result<(), CoreError>;

    async fn append_number_event(&self, event: NumberEvent) -> Result<(), CoreError>;

    async fn append_customer_number_change(
        &self,
        change: CustomerNumberChange,
    ) -> Result<(), CoreError>;

    /// Unique active-number count per customer in the window
    /// `addedDate <= end AND (removedDate is null OR removedDate >= start)`.
    async fn monthly_usage(
        &self,
        appliance_id: Option<&str>,
        window_start: SystemTime,
        window_end: SystemTime,
    ) -> Result<HashMap<String, usize>, CoreError>;
}

/// In-memory [`ApplianceRepository`], usable standalone (no external DB) and
/// in tests. Appliances are seeded via [`InMemoryApplianceRepository::insert`].
#[derive(Default)]
pub struct InMemoryApplianceRepository {
    appliances: Mutex<HashMap<String, Appliance>>,
}

impl InMemoryApplianceRepository {
    pub fn insert(&self, appliance: Appliance) {
        let mut guard = self.appliances.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(appliance.id.clone(), appliance);
    }

    pub fn from_appliances(appliances: Vec<Appliance>) -> Self {
        let repo = Self::default();
        for appliance in appliances {
            repo.insert(appliance);
        }
        repo
    }
}

#[async_trait]
impl ApplianceRepository for InMemoryApplianceRepository {
    async fn lookup(&self, id: &str) -> Result<Appliance, CoreError> {
        let guard = self.appliances.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("appliance `{id}` not registered")))
    }

    async fn list_active(&self) -> Result<Vec<Appliance>, CoreError> {
        let guard = self.appliances.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.values().cloned().collect())
    }
}

/// In-memory [`InventoryRepository`], used by tests driving the scenarios
/// in §8 without a database.
#[derive(Default)]
pub struct InMemoryInventoryRepository {
    inventory_rows: Mutex<HashMap<(String, String), DmInventoryRow>>,
    customer_numbers: Mutex<Vec<CustomerNumber>>,
    pending_removals: Mutex<Vec<PendingRemoval>>,
    number_events: Mutex<Vec<NumberEvent>>,
    customer_number_changes: Mutex<Vec<CustomerNumberChange>>,
}

impl InMemoryInventoryRepository {
    pub fn number_events(&self) -> Vec<NumberEvent> {
        self.number_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn customer_number_changes(&self) -> Vec<CustomerNumberChange> {
        self.customer_number_changes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn pending_removals(&self) -> Vec<PendingRemoval> {
        self.pending_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn all_customer_numbers(&self) -> Vec<CustomerNumber> {
        self.customer_numbers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl InventoryRepository for InMemoryInventoryRepository {
    async fn upsert_inventory_row(&self, row: DmInventoryRow) -> Result<(), CoreError> {
        let mut guard = self
            .inventory_rows
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.insert((row.appliance_id.clone(), row.file_name.clone()), row);
        Ok(())
    }

    async fn active_numbers(&self, appliance_id: &str) -> Result<Vec<CustomerNumber>, CoreError> {
        let guard = self
            .customer_numbers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(guard
            .iter()
            .filter(|row| row.appliance_id == appliance_id && row.is_active())
            .cloned()
            .collect())
    }

    async fn add_customer_number(&self, number: CustomerNumber) -> Result<(), CoreError> {
        let mut guard = self
            .customer_numbers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // `ignoreDuplicates` semantics (§5): a matching active row already
        // present makes this call a no-op, keeping replaceAll idempotent.
        let exists = guard.iter().any(|row| {
            row.appliance_id == number.appliance_id
                && row.number == number.number
                && row.customer_name == number.customer_name
                && row.is_active()
        });
        if !exists {
            guard.push(number);
        }
        Ok(())
    }

    async fn mark_customer_number_removed(
        &self,
        appliance_id: &str,
        number: &str,
        customer_name: &str,
        removed_at: SystemTime,
        removed_by: Option<String>,
    ) -> Result<(), CoreError> {
        let mut guard = self
            .customer_numbers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(row) = guard.iter_mut().find(|row| {
            row.appliance_id == appliance_id
                && row.number == number
                && row.customer_name == customer_name
                && row.is_active()
        }) {
            row.removed_date = Some(removed_at);
            row.removed_by = removed_by;
        }
        Ok(())
    }

    async fn rename_customer_number(
        &self,
        appliance_id: &str,
        number: &str,
        old_customer_name: &str,
        new_customer_name: &str,
    ) -> Result<(), CoreError> {
        let mut guard = self
            .customer_numbers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(row) = guard.iter_mut().find(|row| {
            row.appliance_id == appliance_id
                && row.number == number
                && row.customer_name == old_customer_name
                && row.is_active()
        }) {
            row.customer_name = new_customer_name.to_string();
        }
        Ok(())
    }

    async fn insert_pending_removal(&self, removal: PendingRemoval) -> Result<(), CoreError> {
        let mut guard = self
            .pending_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let exists = guard.iter().any(|row| {
            row.appliance_id == removal.appliance_id
                && row.number == removal.number
                && row.customer_name == removal.customer_name
        });
        if !exists {
            guard.push(removal);
        }
        Ok(())
    }

    async fn due_pending_removals(
        &self,
        now: SystemTime,
    ) -> Result<Vec<PendingRemoval>, CoreError> {
        let guard = self
            .pending_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(guard
            .iter()
            .filter(|row| row.removal_date <= now)
            .cloned()
            .collect())
    }

    async fn delete_pending_removal(
        &self,
        appliance_id: &str,
        number: &str,
        customer_name: &str,
    ) -> Result<(), CoreError> {
        let mut guard = self
            .pending_removals
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.retain(|row| {
            !(row.appliance_id == appliance_id
                && row.number == number
                && row.customer_name == customer_name)
        });
        Ok(())
    }

    async fn append_number_event(&self, event: NumberEvent) -> Result<(), CoreError> {
        let mut guard = self
            .number_events
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.push(event);
        Ok(())
    }

    async fn append_customer_number_change(
        &self,
        change: CustomerNumberChange,
    ) -> Result<(), CoreError> {
        let mut guard = self
            .customer_number_changes
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.push(change);
        Ok(())
    }

    async fn monthly_usage(
        &self,
        appliance_id: Option<&str>,
        window_start: SystemTime,
        window_end: SystemTime,
    ) -> Result<HashMap<String, usize>, CoreError> {
        let guard = self
            .customer_numbers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut counts: HashMap<String, std::collections::HashSet<String>> = HashMap::new();
        for row in guard.iter() {
            if let Some(filter) = appliance_id {
                if row.appliance_id != filter {
                    continue;
                }
            }
            let added_in_window = row.added_date <= window_end;
            let still_active_in_window = row
                .removed_date
                .map_or(true, |removed| removed >= window_start);
            if added_in_window && still_active_in_window {
                counts
                    .entry(row.customer_name.clone())
                    .or_default()
                    .insert(row.number.clone());
            }
        }
        Ok(counts.into_iter().map(|(k, v)| (k, v.len())).collect())
    }
}
