/// Trigger evaluation.
///
/// Consumes one basin's normalized readings plus its stored triggers,
/// decides which conditions are satisfied, and records firings through the
/// store's conditional update. Per trigger the state machine is
/// `PENDING -> FIRED`, terminal for a given period key; a new period key
/// restores eligibility without erasing history.
///
/// Failure semantics: a malformed statement or field mismatch on one
/// trigger never aborts its siblings — failures are collected and returned
/// for the operator channel. Missing data is not a failure: triggers whose
/// source produced nothing this cycle are simply skipped, and previously
/// fired state is never cleared.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ingest::period_key;
use crate::model::{DataSource, FiredTrigger, PhaseName, Reading, Trigger};
use crate::phase::evaluable_phases;
use crate::statement::EvaluationError;
use crate::store::{MonitoringStore, StoreError};

/// Identity recorded in `triggered_by` for automated firings.
pub const EVALUATOR_IDENTITY: &str = "aamon-evaluator";

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// One trigger's evaluation error, kept alongside the batch outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationFailure {
    pub trigger: Uuid,
    pub title: String,
    pub error: EvaluationError,
}

/// Result of evaluating one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationOutcome {
    pub fired: Vec<FiredTrigger>,
    pub failures: Vec<EvaluationFailure>,
    /// Triggers actually evaluated (in scope, with data available).
    pub evaluated: usize,
}

impl EvaluationOutcome {
    fn merge(&mut self, other: EvaluationOutcome) {
        self.fired.extend(other.fired);
        self.failures.extend(other.failures);
        self.evaluated += other.evaluated;
    }
}

// ---------------------------------------------------------------------------
// Batch evaluation
// ---------------------------------------------------------------------------

/// Evaluates every source's readings for one basin and year.
///
/// The period key per source is derived from the readings' publication date,
/// so a trigger fires at most once per publication period.
pub fn evaluate_basin(
    store: &dyn MonitoringStore,
    river_basin: &str,
    active_year: i32,
    readings_by_source: &BTreeMap<DataSource, Vec<Reading>>,
    now: DateTime<Utc>,
) -> Result<EvaluationOutcome, StoreError> {
    let triggers = store.triggers_for_basin(river_basin, active_year)?;
    // Evaluation scope is computed once from this snapshot: a mandatory
    // firing in this batch advances the basin starting next cycle.
    let phases = evaluable_phases(&triggers);

    let mut outcome = EvaluationOutcome::default();
    for (source, readings) in readings_by_source {
        let key = period_key(*source, readings);
        outcome.merge(evaluate_triggers(
            store,
            &triggers,
            &phases,
            *source,
            readings,
            key.as_deref(),
            now,
        )?);
    }
    Ok(outcome)
}

/// Evaluates the triggers matching one source against that source's
/// readings, under an explicit period key.
///
/// A condition is satisfied when any reading satisfies it. Evaluation
/// errors are collected per trigger; an error on one reading does not stop
/// the remaining readings or sibling triggers.
pub fn evaluate_triggers(
    store: &dyn MonitoringStore,
    triggers: &[Trigger],
    phases: &[PhaseName],
    source: DataSource,
    readings: &[Reading],
    period_key: Option<&str>,
    now: DateTime<Utc>,
) -> Result<EvaluationOutcome, StoreError> {
    let mut outcome = EvaluationOutcome::default();
    if readings.is_empty() {
        return Ok(outcome); // no new data this cycle; prior state stands
    }

    for trigger in triggers {
        if trigger.data_source != source || !phases.contains(&trigger.phase) {
            continue;
        }
        if !eligible(trigger, period_key) {
            continue; // already fired for this period key
        }
        outcome.evaluated += 1;

        let mut satisfied = false;
        let mut first_error: Option<EvaluationError> = None;
        for reading in readings {
            match trigger.statement.evaluate(reading) {
                Ok(true) => satisfied = true,
                Ok(false) => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        // Errors are surfaced even when another reading satisfied the
        // condition — a half-working statement is still misconfigured.
        if let Some(error) = first_error {
            outcome.failures.push(EvaluationFailure {
                trigger: trigger.uuid,
                title: trigger.title.clone(),
                error,
            });
        }

        if satisfied
            && store.mark_fired(trigger.uuid, period_key, now, EVALUATOR_IDENTITY)?
        {
            outcome.fired.push(FiredTrigger {
                trigger: trigger.uuid,
                river_basin: trigger.river_basin.clone(),
                active_year: trigger.active_year,
                phase: trigger.phase,
                data_source: trigger.data_source,
                triggered_at: now,
                repeat_key: period_key.map(String::from),
            });
        }
    }
    Ok(outcome)
}

/// Cheap eligibility precheck mirroring the store's conditional update.
/// The store guard remains authoritative under concurrency; this only
/// avoids evaluating statements for triggers that cannot fire.
fn eligible(trigger: &Trigger, period_key: Option<&str>) -> bool {
    if !trigger.is_triggered {
        return true;
    }
    matches!(
        (period_key, trigger.repeat_key.as_deref()),
        (Some(incoming), Some(fired)) if incoming != fired
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SERIES_FORECAST_PROBABILITY;
    use crate::statement::TriggerStatement;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 5, 6, 0, 0).unwrap()
    }

    fn glofas_reading(value: f64) -> Reading {
        Reading {
            river_basin: "Karnali at Chisapani".to_string(),
            source: DataSource::Glofas,
            series_id: SERIES_FORECAST_PROBABILITY.to_string(),
            observed_at: fixed_now(),
            value,
            metadata: Default::default(),
        }
    }

    fn make_trigger(
        store: &MemoryStore,
        phase: PhaseName,
        statement: serde_json::Value,
        mandatory: bool,
    ) -> Trigger {
        let trigger = Trigger {
            uuid: Uuid::new_v4(),
            river_basin: "Karnali at Chisapani".to_string(),
            active_year: 2025,
            phase,
            data_source: DataSource::Glofas,
            title: format!("{} threshold", phase),
            statement: TriggerStatement::parse(&statement).unwrap(),
            is_mandatory: mandatory,
            is_triggered: false,
            triggered_at: None,
            triggered_by: None,
            repeat_key: None,
            transaction_hash: None,
            is_deleted: false,
            created_at: fixed_now() - chrono::Duration::days(30),
            notes: None,
        };
        store.insert_trigger(&trigger).unwrap();
        trigger
    }

    fn evaluate_with_key(
        store: &MemoryStore,
        readings: &[Reading],
        key: &str,
        now: DateTime<Utc>,
    ) -> EvaluationOutcome {
        let triggers = store.triggers_for_basin("Karnali at Chisapani", 2025).unwrap();
        let phases = evaluable_phases(&triggers);
        evaluate_triggers(
            store,
            &triggers,
            &phases,
            DataSource::Glofas,
            readings,
            Some(key),
            now,
        )
        .unwrap()
    }

    #[test]
    fn test_activation_trigger_fires_on_satisfied_condition() {
        // value=120 against {field: "value", op: ">", threshold: 100} on an
        // Activation trigger. Activation is evaluable because it is the
        // phase immediately after the default current phase (Preparedness).
        let store = MemoryStore::new();
        let trigger = make_trigger(
            &store,
            PhaseName::Activation,
            json!({"field": "value", "op": ">", "threshold": 100}),
            true,
        );

        let outcome =
            evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", fixed_now());
        assert_eq!(outcome.fired.len(), 1);
        assert!(outcome.failures.is_empty());

        let stored = store.trigger(trigger.uuid).unwrap().unwrap();
        assert!(stored.is_triggered);
        assert_eq!(stored.triggered_at, Some(fixed_now()));
        assert_eq!(stored.triggered_by.as_deref(), Some(EVALUATOR_IDENTITY));
        assert_eq!(stored.repeat_key.as_deref(), Some("2025-cycle-1"));
    }

    #[test]
    fn test_refiring_same_period_key_is_idempotent() {
        let store = MemoryStore::new();
        let trigger = make_trigger(
            &store,
            PhaseName::Activation,
            json!({"field": "value", "op": ">", "threshold": 100}),
            true,
        );

        evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", fixed_now());
        let later = fixed_now() + chrono::Duration::hours(6);
        let outcome = evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", later);

        assert!(outcome.fired.is_empty(), "same period key must not re-fire");
        let stored = store.trigger(trigger.uuid).unwrap().unwrap();
        assert_eq!(
            stored.triggered_at,
            Some(fixed_now()),
            "triggered_at unchanged on idempotent re-evaluation"
        );
    }

    #[test]
    fn test_new_period_key_produces_exactly_one_new_firing() {
        let store = MemoryStore::new();
        let trigger = make_trigger(
            &store,
            PhaseName::Activation,
            json!({"field": "value", "op": ">", "threshold": 100}),
            true,
        );

        evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", fixed_now());
        let later = fixed_now() + chrono::Duration::days(1);
        let outcome = evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-2", later);

        assert_eq!(outcome.fired.len(), 1, "changed key fires exactly once more");
        let stored = store.trigger(trigger.uuid).unwrap().unwrap();
        assert_eq!(stored.triggered_at, Some(later));
        assert_eq!(stored.repeat_key.as_deref(), Some("2025-cycle-2"));
    }

    #[test]
    fn test_unsatisfied_condition_does_not_fire() {
        let store = MemoryStore::new();
        let trigger = make_trigger(
            &store,
            PhaseName::Activation,
            json!({"field": "value", "op": ">", "threshold": 100}),
            true,
        );

        let outcome =
            evaluate_with_key(&store, &[glofas_reading(80.0)], "2025-cycle-1", fixed_now());
        assert!(outcome.fired.is_empty());
        assert!(!store.trigger(trigger.uuid).unwrap().unwrap().is_triggered);
    }

    #[test]
    fn test_field_mismatch_is_collected_and_siblings_still_fire() {
        let store = MemoryStore::new();
        let broken = make_trigger(
            &store,
            PhaseName::Preparedness,
            json!({"field": "no_such_field", "op": ">", "threshold": 1}),
            true,
        );
        let healthy = make_trigger(
            &store,
            PhaseName::Preparedness,
            json!({"field": "value", "op": ">", "threshold": 100}),
            true,
        );

        let outcome =
            evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", fixed_now());

        assert_eq!(outcome.failures.len(), 1, "misconfigured trigger is reported");
        assert_eq!(outcome.failures[0].trigger, broken.uuid);
        assert_eq!(outcome.fired.len(), 1, "sibling evaluation is isolated");
        assert_eq!(outcome.fired[0].trigger, healthy.uuid);
        assert!(
            !store.trigger(broken.uuid).unwrap().unwrap().is_triggered,
            "an errored evaluation never counts as satisfied"
        );
    }

    #[test]
    fn test_out_of_scope_phase_is_not_evaluated() {
        // With nothing fired, current is Preparedness and only Preparedness
        // and Activation are in scope — a Readiness trigger must wait even
        // if its condition would hold.
        let store = MemoryStore::new();
        let readiness = make_trigger(
            &store,
            PhaseName::Readiness,
            json!({"field": "value", "op": ">", "threshold": 100}),
            true,
        );

        let outcome =
            evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", fixed_now());
        assert!(outcome.fired.is_empty());
        assert_eq!(outcome.evaluated, 0);
        assert!(!store.trigger(readiness.uuid).unwrap().unwrap().is_triggered);
    }

    #[test]
    fn test_phase_advance_unlocks_the_next_phase() {
        let store = MemoryStore::new();
        make_trigger(
            &store,
            PhaseName::Activation,
            json!({"field": "value", "op": ">", "threshold": 100}),
            true,
        );
        let readiness = make_trigger(
            &store,
            PhaseName::Readiness,
            json!({"field": "value", "op": ">", "threshold": 110}),
            true,
        );

        // First cycle: Activation fires (scope was Preparedness+Activation).
        evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", fixed_now());
        // Second cycle: current is now Activation, so Readiness is in scope.
        let later = fixed_now() + chrono::Duration::days(1);
        let outcome = evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-2", later);

        assert!(outcome.fired.iter().any(|f| f.trigger == readiness.uuid));
    }

    #[test]
    fn test_no_readings_leave_prior_state_untouched() {
        let store = MemoryStore::new();
        let trigger = make_trigger(
            &store,
            PhaseName::Activation,
            json!({"field": "value", "op": ">", "threshold": 100}),
            true,
        );
        evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", fixed_now());

        let triggers = store.triggers_for_basin("Karnali at Chisapani", 2025).unwrap();
        let phases = evaluable_phases(&triggers);
        let outcome = evaluate_triggers(
            &store,
            &triggers,
            &phases,
            DataSource::Glofas,
            &[],
            None,
            fixed_now() + chrono::Duration::days(2),
        )
        .unwrap();

        assert_eq!(outcome, EvaluationOutcome::default());
        assert!(
            store.trigger(trigger.uuid).unwrap().unwrap().is_triggered,
            "missing data never clears fired state"
        );
    }

    #[test]
    fn test_source_mismatch_is_skipped() {
        let store = MemoryStore::new();
        let mut manual = make_trigger(
            &store,
            PhaseName::Preparedness,
            json!({"field": "value", "op": ">", "threshold": 0}),
            true,
        );
        manual.data_source = DataSource::Manual;
        store.insert_trigger(&manual).unwrap();

        let outcome =
            evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", fixed_now());
        assert!(
            !outcome.fired.iter().any(|f| f.trigger == manual.uuid),
            "manual triggers are operator-fired, never data-fired"
        );
    }

    #[test]
    fn test_optional_triggers_fire_with_the_same_logic() {
        let store = MemoryStore::new();
        let optional = make_trigger(
            &store,
            PhaseName::Preparedness,
            json!({"field": "value", "op": ">", "threshold": 100}),
            false,
        );
        let outcome =
            evaluate_with_key(&store, &[glofas_reading(120.0)], "2025-cycle-1", fixed_now());
        assert!(outcome.fired.iter().any(|f| f.trigger == optional.uuid));
    }

    #[test]
    fn test_evaluate_basin_derives_period_keys_from_readings() {
        let store = MemoryStore::new();
        let trigger = make_trigger(
            &store,
            PhaseName::Activation,
            json!({"field": "value", "op": ">", "threshold": 100}),
            true,
        );

        let mut by_source = BTreeMap::new();
        by_source.insert(DataSource::Glofas, vec![glofas_reading(120.0)]);

        let outcome =
            evaluate_basin(&store, "Karnali at Chisapani", 2025, &by_source, fixed_now())
                .unwrap();
        assert_eq!(outcome.fired.len(), 1);
        assert_eq!(
            outcome.fired[0].repeat_key.as_deref(),
            Some("GLOFAS:2025-07-05"),
            "period key derives from the publication date"
        );

        // Same publication date on a later cycle: idempotent.
        let later = fixed_now() + chrono::Duration::hours(3);
        let again =
            evaluate_basin(&store, "Karnali at Chisapani", 2025, &by_source, later).unwrap();
        assert!(again.fired.is_empty());
        let stored = store.trigger(trigger.uuid).unwrap().unwrap();
        assert_eq!(stored.triggered_at, Some(fixed_now()));
    }
}
