/// Persistence abstraction for phases, triggers, and activities.
///
/// The engine talks to storage only through `MonitoringStore`, so the
/// evaluation core runs unchanged against Postgres in production (`db.rs`)
/// and against `MemoryStore` in tests and development replay.
///
/// Two operations carry the concurrency guarantees the engine relies on:
/// `mark_fired` is a conditional update (at-most-one firing per trigger and
/// period key, even under concurrent evaluation), and `confirm_on_chain`
/// only ever moves `transaction_hash` from null to non-null.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Activity, ActivityStatus, Phase, PhaseName, Trigger};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a store backend.
#[derive(Debug)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    Backend(String),
    /// The referenced row does not exist.
    NotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(detail) => write!(f, "Store backend error: {}", detail),
            StoreError::NotFound(what) => write!(f, "Not found: {}", what),
        }
    }
}

impl std::error::Error for StoreError {}

/// Outcome of a phase upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseUpsert {
    Created,
    /// The row already matched; nothing was written, no timestamp moved.
    Unchanged,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

pub trait MonitoringStore {
    /// Idempotent create-or-update keyed by `(river_basin, active_year, name)`.
    fn upsert_phase(
        &self,
        river_basin: &str,
        active_year: i32,
        name: PhaseName,
        now: DateTime<Utc>,
    ) -> Result<PhaseUpsert, StoreError>;

    /// Phases for one basin and year.
    fn phases(&self, river_basin: &str, active_year: i32) -> Result<Vec<Phase>, StoreError>;

    /// Non-deleted triggers for one basin and year, oldest first.
    fn triggers_for_basin(
        &self,
        river_basin: &str,
        active_year: i32,
    ) -> Result<Vec<Trigger>, StoreError>;

    fn trigger(&self, uuid: Uuid) -> Result<Option<Trigger>, StoreError>;

    fn insert_trigger(&self, trigger: &Trigger) -> Result<(), StoreError>;

    /// Conditionally records a firing.
    ///
    /// Fires only when the trigger exists, is not deleted, and either has
    /// never fired or last fired under a different period key. Returns
    /// whether a new firing was recorded — `false` means the condition was
    /// already satisfied for this key and the row is untouched.
    fn mark_fired(
        &self,
        uuid: Uuid,
        period_key: Option<&str>,
        at: DateTime<Utc>,
        by: &str,
    ) -> Result<bool, StoreError>;

    fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError>;

    /// Links an activity to a trigger in the association table.
    fn link_activity(&self, trigger: Uuid, activity: Uuid) -> Result<(), StoreError>;

    /// Activities linked to a trigger, in insertion order.
    fn activities_for_trigger(&self, trigger: Uuid) -> Result<Vec<Activity>, StoreError>;

    fn set_activity_status(&self, uuid: Uuid, status: ActivityStatus) -> Result<(), StoreError>;

    /// Marks an activity completed and records the signed completion delta.
    fn complete_activity(
        &self,
        uuid: Uuid,
        at: DateTime<Utc>,
        by: &str,
        difference: &str,
    ) -> Result<(), StoreError>;

    /// Triggers awaiting on-chain confirmation
    /// (`transaction_hash IS NULL AND NOT is_deleted`), oldest first.
    fn unreconciled_triggers(&self) -> Result<Vec<Trigger>, StoreError>;

    /// Records one confirmation token on every listed trigger.
    fn confirm_on_chain(&self, uuids: &[Uuid], transaction_hash: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    phases: BTreeMap<(String, i32, &'static str), Phase>,
    triggers: BTreeMap<Uuid, Trigger>,
    activities: BTreeMap<Uuid, Activity>,
    /// (trigger, activity) association pairs, insertion-ordered.
    links: Vec<(Uuid, Uuid)>,
}

/// Store backed by process memory. Used by the test suites and by
/// development replay when no database is available.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".to_string()))
    }
}

impl MonitoringStore for MemoryStore {
    fn upsert_phase(
        &self,
        river_basin: &str,
        active_year: i32,
        name: PhaseName,
        now: DateTime<Utc>,
    ) -> Result<PhaseUpsert, StoreError> {
        let mut inner = self.lock()?;
        let key = (river_basin.to_string(), active_year, name.as_str());
        if inner.phases.contains_key(&key) {
            return Ok(PhaseUpsert::Unchanged);
        }
        inner.phases.insert(
            key,
            Phase {
                river_basin: river_basin.to_string(),
                active_year,
                name,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(PhaseUpsert::Created)
    }

    fn phases(&self, river_basin: &str, active_year: i32) -> Result<Vec<Phase>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .phases
            .values()
            .filter(|p| p.river_basin == river_basin && p.active_year == active_year)
            .cloned()
            .collect())
    }

    fn triggers_for_basin(
        &self,
        river_basin: &str,
        active_year: i32,
    ) -> Result<Vec<Trigger>, StoreError> {
        let inner = self.lock()?;
        let mut triggers: Vec<Trigger> = inner
            .triggers
            .values()
            .filter(|t| {
                t.river_basin == river_basin && t.active_year == active_year && !t.is_deleted
            })
            .cloned()
            .collect();
        triggers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.uuid.cmp(&b.uuid)));
        Ok(triggers)
    }

    fn trigger(&self, uuid: Uuid) -> Result<Option<Trigger>, StoreError> {
        Ok(self.lock()?.triggers.get(&uuid).cloned())
    }

    fn insert_trigger(&self, trigger: &Trigger) -> Result<(), StoreError> {
        self.lock()?.triggers.insert(trigger.uuid, trigger.clone());
        Ok(())
    }

    fn mark_fired(
        &self,
        uuid: Uuid,
        period_key: Option<&str>,
        at: DateTime<Utc>,
        by: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let trigger = match inner.triggers.get_mut(&uuid) {
            Some(t) if !t.is_deleted => t,
            _ => return Ok(false),
        };

        if trigger.is_triggered {
            // Fired already: eligible again only under a different, non-null
            // period key.
            match (period_key, trigger.repeat_key.as_deref()) {
                (Some(incoming), Some(fired)) if incoming != fired => {}
                _ => return Ok(false),
            }
        }

        trigger.is_triggered = true;
        trigger.triggered_at = Some(at);
        trigger.triggered_by = Some(by.to_string());
        trigger.repeat_key = period_key.map(String::from);
        Ok(true)
    }

    fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        self.lock()?.activities.insert(activity.uuid, activity.clone());
        Ok(())
    }

    fn link_activity(&self, trigger: Uuid, activity: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.links.contains(&(trigger, activity)) {
            inner.links.push((trigger, activity));
        }
        Ok(())
    }

    fn activities_for_trigger(&self, trigger: Uuid) -> Result<Vec<Activity>, StoreError> {
        let inner = self.lock()?;
        let ids: Vec<Uuid> = inner
            .links
            .iter()
            .filter(|(t, _)| *t == trigger)
            .map(|(_, a)| *a)
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| inner.activities.get(id).cloned())
            .collect())
    }

    fn set_activity_status(&self, uuid: Uuid, status: ActivityStatus) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let activity = inner
            .activities
            .get_mut(&uuid)
            .ok_or_else(|| StoreError::NotFound(format!("activity {}", uuid)))?;
        activity.status = status;
        Ok(())
    }

    fn complete_activity(
        &self,
        uuid: Uuid,
        at: DateTime<Utc>,
        by: &str,
        difference: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let activity = inner
            .activities
            .get_mut(&uuid)
            .ok_or_else(|| StoreError::NotFound(format!("activity {}", uuid)))?;
        activity.status = ActivityStatus::Completed;
        activity.completed_at = Some(at);
        activity.completed_by = Some(by.to_string());
        activity.difference_in_trigger_and_activity_completion = Some(difference.to_string());
        Ok(())
    }

    fn unreconciled_triggers(&self) -> Result<Vec<Trigger>, StoreError> {
        let inner = self.lock()?;
        let mut triggers: Vec<Trigger> = inner
            .triggers
            .values()
            .filter(|t| t.transaction_hash.is_none() && !t.is_deleted)
            .cloned()
            .collect();
        triggers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.uuid.cmp(&b.uuid)));
        Ok(triggers)
    }

    fn confirm_on_chain(&self, uuids: &[Uuid], transaction_hash: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let unique: BTreeSet<Uuid> = uuids.iter().copied().collect();
        for uuid in unique {
            if let Some(trigger) = inner.triggers.get_mut(&uuid) {
                if trigger.transaction_hash.is_none() {
                    trigger.transaction_hash = Some(transaction_hash.to_string());
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
