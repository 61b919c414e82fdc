/// Postgres-backed store.
///
/// Implements `MonitoringStore` over the `aa` schema (see
/// `sql/001_trigger_schema.sql`). The two guarantees the engine leans on are
/// expressed as conditional SQL updates: `mark_fired` guards against double
/// firing in its WHERE clause, and `confirm_on_chain` only touches rows
/// whose `transaction_hash` is still null. Both run as single statements, so
/// row-level locking in Postgres is the only synchronization needed between
/// the evaluator and the reconciler.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use postgres::{Client, NoTls, Row};
use uuid::Uuid;

use crate::model::{
    Activity, ActivityStatus, CommunicationSpec, DataSource, Phase, PhaseName, TargetGroup,
    Trigger,
};
use crate::statement::TriggerStatement;
use crate::store::{MonitoringStore, PhaseUpsert, StoreError};

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Store backed by one Postgres connection. The blocking client is not
/// shareable, so it lives behind a mutex; statements are short and the lock
/// is never held across a network call to anything but the database itself.
pub struct PgStore {
    client: Mutex<Client>,
}

impl PgStore {
    /// Connects and verifies the `aa` schema exists, failing fast with a
    /// pointer at the migration when it does not.
    pub fn connect(database_url: &str) -> Result<PgStore, StoreError> {
        let mut client = Client::connect(database_url, NoTls).map_err(backend)?;

        let row = client
            .query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM information_schema.schemata WHERE schema_name = 'aa'
                 )",
                &[],
            )
            .map_err(backend)?;
        let schema_exists: bool = row.get(0);
        if !schema_exists {
            return Err(StoreError::Backend(
                "schema 'aa' missing - apply sql/001_trigger_schema.sql first".to_string(),
            ));
        }

        Ok(PgStore {
            client: Mutex::new(client),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Client>, StoreError> {
        self.client
            .lock()
            .map_err(|_| StoreError::Backend("database mutex poisoned".to_string()))
    }
}

fn backend(err: postgres::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_phase_name(tag: &str) -> Result<PhaseName, StoreError> {
    PhaseName::parse(tag)
        .ok_or_else(|| StoreError::Backend(format!("unknown phase name '{}' in row", tag)))
}

fn parse_data_source(tag: &str) -> Result<DataSource, StoreError> {
    DataSource::parse(tag)
        .ok_or_else(|| StoreError::Backend(format!("unknown data source '{}' in row", tag)))
}

fn parse_status(tag: &str) -> Result<ActivityStatus, StoreError> {
    ActivityStatus::parse(tag)
        .ok_or_else(|| StoreError::Backend(format!("unknown activity status '{}' in row", tag)))
}

fn parse_target_group(tag: &str) -> Result<TargetGroup, StoreError> {
    match tag {
        "STAKEHOLDERS" => Ok(TargetGroup::Stakeholders),
        "BENEFICIARY" => Ok(TargetGroup::Beneficiary),
        other => Err(StoreError::Backend(format!(
            "unknown target group '{}' in row",
            other
        ))),
    }
}

const TRIGGER_COLUMNS: &str = "uuid, river_basin, active_year, phase, data_source, title, \
     statement, is_mandatory, is_triggered, triggered_at, triggered_by, repeat_key, \
     transaction_hash, is_deleted, created_at, notes";

fn trigger_from_row(row: &Row) -> Result<Trigger, StoreError> {
    let phase: String = row.get(3);
    let source: String = row.get(4);
    let statement_json: serde_json::Value = row.get(6);
    // Statements are validated on the way in; a row that fails to parse here
    // was corrupted outside this service and must not evaluate.
    let statement = TriggerStatement::parse(&statement_json)
        .map_err(|e| StoreError::Backend(format!("stored statement invalid: {}", e)))?;

    Ok(Trigger {
        uuid: row.get(0),
        river_basin: row.get(1),
        active_year: row.get(2),
        phase: parse_phase_name(&phase)?,
        data_source: parse_data_source(&source)?,
        title: row.get(5),
        statement,
        is_mandatory: row.get(7),
        is_triggered: row.get(8),
        triggered_at: row.get(9),
        triggered_by: row.get(10),
        repeat_key: row.get(11),
        transaction_hash: row.get(12),
        is_deleted: row.get(13),
        created_at: row.get(14),
        notes: row.get(15),
    })
}

const ACTIVITY_COLUMNS: &str = "uuid, river_basin, active_year, phase, title, is_automated, \
     status, comm_group, comm_message, comm_audio_url, completed_at, completed_by, \
     completion_difference";

fn activity_from_row(row: &Row) -> Result<Activity, StoreError> {
    let phase: String = row.get(3);
    let status: String = row.get(6);
    let comm_group: Option<String> = row.get(7);

    let communication = match comm_group {
        Some(group) => Some(CommunicationSpec {
            group: parse_target_group(&group)?,
            message: row.get(8),
            audio_url: row.get(9),
        }),
        None => None,
    };

    Ok(Activity {
        uuid: row.get(0),
        river_basin: row.get(1),
        active_year: row.get(2),
        phase: parse_phase_name(&phase)?,
        title: row.get(4),
        is_automated: row.get(5),
        status: parse_status(&status)?,
        communication,
        completed_at: row.get(10),
        completed_by: row.get(11),
        difference_in_trigger_and_activity_completion: row.get(12),
    })
}

// ---------------------------------------------------------------------------
// MonitoringStore implementation
// ---------------------------------------------------------------------------

impl MonitoringStore for PgStore {
    fn upsert_phase(
        &self,
        river_basin: &str,
        active_year: i32,
        name: PhaseName,
        now: DateTime<Utc>,
    ) -> Result<PhaseUpsert, StoreError> {
        let inserted = self
            .lock()?
            .execute(
                "INSERT INTO aa.phases (river_basin, active_year, name, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $4)
                 ON CONFLICT (river_basin, active_year, name) DO NOTHING",
                &[&river_basin, &active_year, &name.as_str(), &now],
            )
            .map_err(backend)?;
        if inserted > 0 {
            Ok(PhaseUpsert::Created)
        } else {
            Ok(PhaseUpsert::Unchanged)
        }
    }

    fn phases(&self, river_basin: &str, active_year: i32) -> Result<Vec<Phase>, StoreError> {
        let rows = self
            .lock()?
            .query(
                "SELECT river_basin, active_year, name, created_at, updated_at
                 FROM aa.phases WHERE river_basin = $1 AND active_year = $2",
                &[&river_basin, &active_year],
            )
            .map_err(backend)?;

        let mut phases = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(2);
            phases.push(Phase {
                river_basin: row.get(0),
                active_year: row.get(1),
                name: parse_phase_name(&name)?,
                created_at: row.get(3),
                updated_at: row.get(4),
            });
        }
        Ok(phases)
    }

    fn triggers_for_basin(
        &self,
        river_basin: &str,
        active_year: i32,
    ) -> Result<Vec<Trigger>, StoreError> {
        let query = format!(
            "SELECT {} FROM aa.triggers
             WHERE river_basin = $1 AND active_year = $2 AND NOT is_deleted
             ORDER BY created_at, uuid",
            TRIGGER_COLUMNS
        );
        let rows = self
            .lock()?
            .query(&query, &[&river_basin, &active_year])
            .map_err(backend)?;
        rows.iter().map(trigger_from_row).collect()
    }

    fn trigger(&self, uuid: Uuid) -> Result<Option<Trigger>, StoreError> {
        let query = format!("SELECT {} FROM aa.triggers WHERE uuid = $1", TRIGGER_COLUMNS);
        let rows = self.lock()?.query(&query, &[&uuid]).map_err(backend)?;
        rows.first().map(trigger_from_row).transpose()
    }

    fn insert_trigger(&self, trigger: &Trigger) -> Result<(), StoreError> {
        self.lock()?
            .execute(
                "INSERT INTO aa.triggers
                 (uuid, river_basin, active_year, phase, data_source, title, statement,
                  is_mandatory, is_triggered, triggered_at, triggered_by, repeat_key,
                  transaction_hash, is_deleted, created_at, notes)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
                &[
                    &trigger.uuid,
                    &trigger.river_basin,
                    &trigger.active_year,
                    &trigger.phase.as_str(),
                    &trigger.data_source.as_str(),
                    &trigger.title,
                    &trigger.statement.to_json(),
                    &trigger.is_mandatory,
                    &trigger.is_triggered,
                    &trigger.triggered_at,
                    &trigger.triggered_by,
                    &trigger.repeat_key,
                    &trigger.transaction_hash,
                    &trigger.is_deleted,
                    &trigger.created_at,
                    &trigger.notes,
                ],
            )
            .map_err(backend)?;
        Ok(())
    }

    fn mark_fired(
        &self,
        uuid: Uuid,
        period_key: Option<&str>,
        at: DateTime<Utc>,
        by: &str,
    ) -> Result<bool, StoreError> {
        // The WHERE clause is the double-fire guard: an already-fired row
        // only matches when both keys are non-null and differ.
        let updated = self
            .lock()?
            .execute(
                "UPDATE aa.triggers
                 SET is_triggered = TRUE, triggered_at = $2, triggered_by = $3, repeat_key = $4
                 WHERE uuid = $1 AND NOT is_deleted
                   AND (NOT is_triggered
                        OR ($4::text IS NOT NULL
                            AND repeat_key IS NOT NULL
                            AND repeat_key <> $4))",
                &[&uuid, &at, &by, &period_key],
            )
            .map_err(backend)?;
        Ok(updated > 0)
    }

    fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        let (group, message, audio_url) = match &activity.communication {
            Some(spec) => (
                Some(spec.group.as_str()),
                spec.message.clone(),
                spec.audio_url.clone(),
            ),
            None => (None, None, None),
        };
        self.lock()?
            .execute(
                "INSERT INTO aa.activities
                 (uuid, river_basin, active_year, phase, title, is_automated, status,
                  comm_group, comm_message, comm_audio_url, completed_at, completed_by,
                  completion_difference)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                &[
                    &activity.uuid,
                    &activity.river_basin,
                    &activity.active_year,
                    &activity.phase.as_str(),
                    &activity.title,
                    &activity.is_automated,
                    &activity.status.as_str(),
                    &group,
                    &message,
                    &audio_url,
                    &activity.completed_at,
                    &activity.completed_by,
                    &activity.difference_in_trigger_and_activity_completion,
                ],
            )
            .map_err(backend)?;
        Ok(())
    }

    fn link_activity(&self, trigger: Uuid, activity: Uuid) -> Result<(), StoreError> {
        self.lock()?
            .execute(
                "INSERT INTO aa.trigger_activities (trigger_uuid, activity_uuid)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&trigger, &activity],
            )
            .map_err(backend)?;
        Ok(())
    }

    fn activities_for_trigger(&self, trigger: Uuid) -> Result<Vec<Activity>, StoreError> {
        let query = format!(
            "SELECT {} FROM aa.activities a
             JOIN aa.trigger_activities ta ON ta.activity_uuid = a.uuid
             WHERE ta.trigger_uuid = $1
             ORDER BY a.uuid",
            ACTIVITY_COLUMNS
                .split(", ")
                .map(|c| format!("a.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let rows = self.lock()?.query(&query, &[&trigger]).map_err(backend)?;
        rows.iter().map(activity_from_row).collect()
    }

    fn set_activity_status(&self, uuid: Uuid, status: ActivityStatus) -> Result<(), StoreError> {
        let updated = self
            .lock()?
            .execute(
                "UPDATE aa.activities SET status = $2 WHERE uuid = $1",
                &[&uuid, &status.as_str()],
            )
            .map_err(backend)?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("activity {}", uuid)));
        }
        Ok(())
    }

    fn complete_activity(
        &self,
        uuid: Uuid,
        at: DateTime<Utc>,
        by: &str,
        difference: &str,
    ) -> Result<(), StoreError> {
        let updated = self
            .lock()?
            .execute(
                "UPDATE aa.activities
                 SET status = 'COMPLETED', completed_at = $2, completed_by = $3,
                     completion_difference = $4
                 WHERE uuid = $1",
                &[&uuid, &at, &by, &difference],
            )
            .map_err(backend)?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("activity {}", uuid)));
        }
        Ok(())
    }

    fn unreconciled_triggers(&self) -> Result<Vec<Trigger>, StoreError> {
        let query = format!(
            "SELECT {} FROM aa.triggers
             WHERE transaction_hash IS NULL AND NOT is_deleted
             ORDER BY created_at, uuid",
            TRIGGER_COLUMNS
        );
        let rows = self.lock()?.query(&query, &[]).map_err(backend)?;
        rows.iter().map(trigger_from_row).collect()
    }

    fn confirm_on_chain(&self, uuids: &[Uuid], transaction_hash: &str) -> Result<(), StoreError> {
        let ids: Vec<Uuid> = uuids.to_vec();
        self.lock()?
            .execute(
                "UPDATE aa.triggers SET transaction_hash = $2
                 WHERE uuid = ANY($1) AND transaction_hash IS NULL",
                &[&ids, &transaction_hash],
            )
            .map_err(backend)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_tag_parsers_reject_unknown_values() {
        assert!(parse_phase_name("ACTIVATION").is_ok());
        assert!(parse_phase_name("RESPONSE").is_err());
        assert!(parse_data_source("GLOFAS").is_ok());
        assert!(parse_data_source("USGS").is_err());
        assert!(parse_status("WORK_IN_PROGRESS").is_ok());
        assert!(parse_status("STARTED").is_err());
        assert!(parse_target_group("BENEFICIARY").is_ok());
        assert!(parse_target_group("EVERYONE").is_err());
    }

    #[test]
    fn test_activity_column_list_aliases_cleanly() {
        // activities_for_trigger prefixes every column with the table alias;
        // a column name containing a comma or whitespace would corrupt the
        // generated SQL.
        for column in ACTIVITY_COLUMNS.split(", ") {
            assert!(
                column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "column '{}' would break the aliased query",
                column
            );
        }
    }
}
