/// Activity dispatch on trigger firing.
///
/// When a trigger fires, the activities linked to it become actionable.
/// Automated activities (communications, payouts) run their external side
/// effect and move to `COMPLETED` only after the external service reports
/// success; a failed send leaves the activity `WORK_IN_PROGRESS` so the next
/// dispatch cycle retries it (at-least-once — deduplication is the external
/// service's concern, at its own boundary). Manual activities are left
/// `NOT_STARTED`; surfacing them is a presentation concern.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::logging::{self, LogSource};
use crate::model::{ActivityStatus, CommunicationSpec, FiredTrigger};
use crate::store::{MonitoringStore, StoreError};

/// Identity recorded in `completed_by` for automated completions.
pub const DISPATCHER_IDENTITY: &str = "aamon-dispatcher";

// ---------------------------------------------------------------------------
// External collaborator
// ---------------------------------------------------------------------------

/// The external send failed; the activity stays in progress for retry.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchError(pub String);

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dispatch failed: {}", self.0)
    }
}

impl std::error::Error for DispatchError {}

/// Communication/payout dispatch service. Constructed once at process start
/// and injected into the dispatcher — no lazily initialized shared client.
pub trait CommsClient: Send + Sync {
    fn dispatch(&self, spec: &CommunicationSpec) -> Result<(), DispatchError>;
}

/// HTTP implementation posting to the communication service.
pub struct HttpCommsClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpCommsClient {
    pub fn new(client: reqwest::blocking::Client, endpoint: String) -> HttpCommsClient {
        HttpCommsClient { client, endpoint }
    }
}

impl CommsClient for HttpCommsClient {
    fn dispatch(&self, spec: &CommunicationSpec) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(spec)
            .send()
            .map_err(|e| DispatchError(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DispatchError(format!("HTTP {}", response.status())))
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Outcome of one dispatch pass for one fired trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    pub completed: usize,
    /// Automated activities whose external send failed; retried next cycle.
    pub pending: usize,
    pub left_manual: usize,
}

/// Reacts to one trigger firing: runs every linked automated activity's side
/// effect and records completion deltas. Independent activities fail
/// independently — one failed send never blocks the others.
pub fn on_fired(
    store: &dyn MonitoringStore,
    comms: &dyn CommsClient,
    event: &FiredTrigger,
    now: DateTime<Utc>,
) -> Result<DispatchSummary, StoreError> {
    let mut summary = DispatchSummary::default();

    for activity in store.activities_for_trigger(event.trigger)? {
        if !activity.is_automated {
            summary.left_manual += 1;
            continue;
        }
        match activity.status {
            ActivityStatus::NotStarted | ActivityStatus::WorkInProgress => {}
            ActivityStatus::Completed | ActivityStatus::Delayed => continue,
        }

        // Claim the activity before the external call so a failure leaves it
        // in progress rather than untouched.
        if activity.status == ActivityStatus::NotStarted {
            store.set_activity_status(activity.uuid, ActivityStatus::WorkInProgress)?;
        }

        let sent = match &activity.communication {
            Some(spec) => comms.dispatch(spec),
            // Nothing to send: the automated step is vacuous and completes.
            None => Ok(()),
        };

        match sent {
            Ok(()) => {
                let difference =
                    format_signed_duration(now.signed_duration_since(event.triggered_at));
                store.complete_activity(activity.uuid, now, DISPATCHER_IDENTITY, &difference)?;
                summary.completed += 1;
            }
            Err(err) => {
                logging::error(
                    LogSource::Dispatch,
                    Some(&event.river_basin),
                    &format!("activity '{}' send failed: {}", activity.title, err),
                );
                summary.pending += 1;
            }
        }
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Duration formatting
// ---------------------------------------------------------------------------

/// Formats a signed duration as a human-readable breakdown of days, hours,
/// minutes and seconds, omitting zero components: `"2 days 3 hours"`,
/// `"-1 hour"`. Completion before the trigger is an anomaly worth surfacing,
/// so the sign is kept, never clamped.
pub fn format_signed_duration(delta: Duration) -> String {
    let total_seconds = delta.num_seconds();
    let mut remaining = total_seconds.abs();

    let days = remaining / 86_400;
    remaining %= 86_400;
    let hours = remaining / 3_600;
    remaining %= 3_600;
    let minutes = remaining / 60;
    let seconds = remaining % 60;

    let mut parts = Vec::with_capacity(4);
    for (amount, unit) in [
        (days, "day"),
        (hours, "hour"),
        (minutes, "minute"),
        (seconds, "second"),
    ] {
        if amount > 0 {
            let plural = if amount == 1 { "" } else { "s" };
            parts.push(format!("{} {}{}", amount, unit, plural));
        }
    }

    if parts.is_empty() {
        return "0 seconds".to_string();
    }
    let body = parts.join(" ");
    if total_seconds < 0 {
        format!("-{}", body)
    } else {
        body
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Activity, DataSource, PhaseName, TargetGroup};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 5, 6, 0, 0).unwrap()
    }

    /// Scripted comms service: fails the first `fail_first` sends, records
    /// every dispatched message.
    struct ScriptedComms {
        fail_first: Mutex<usize>,
        sent: Mutex<Vec<CommunicationSpec>>,
    }

    impl ScriptedComms {
        fn new(fail_first: usize) -> ScriptedComms {
            ScriptedComms {
                fail_first: Mutex::new(fail_first),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl CommsClient for ScriptedComms {
        fn dispatch(&self, spec: &CommunicationSpec) -> Result<(), DispatchError> {
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DispatchError("simulated outage".to_string()));
            }
            self.sent.lock().unwrap().push(spec.clone());
            Ok(())
        }
    }

    fn fired_event(trigger: Uuid) -> FiredTrigger {
        FiredTrigger {
            trigger,
            river_basin: "Karnali at Chisapani".to_string(),
            active_year: 2025,
            phase: PhaseName::Activation,
            data_source: DataSource::Glofas,
            triggered_at: fixed_now(),
            repeat_key: Some("2025-cycle-1".to_string()),
        }
    }

    fn linked_activity(store: &MemoryStore, trigger: Uuid, automated: bool) -> Activity {
        let activity = Activity {
            uuid: Uuid::new_v4(),
            river_basin: "Karnali at Chisapani".to_string(),
            active_year: 2025,
            phase: PhaseName::Activation,
            title: if automated {
                "Send early-warning SMS".to_string()
            } else {
                "Brief municipal focal points".to_string()
            },
            is_automated: automated,
            status: ActivityStatus::NotStarted,
            communication: automated.then(|| CommunicationSpec {
                group: TargetGroup::Beneficiary,
                message: Some("Move livestock to high ground".to_string()),
                audio_url: None,
            }),
            completed_at: None,
            completed_by: None,
            difference_in_trigger_and_activity_completion: None,
        };
        store.insert_activity(&activity).unwrap();
        store.link_activity(trigger, activity.uuid).unwrap();
        activity
    }

    #[test]
    fn test_automated_activity_completes_after_successful_send() {
        let store = MemoryStore::new();
        let trigger = Uuid::new_v4();
        let activity = linked_activity(&store, trigger, true);
        let comms = ScriptedComms::new(0);

        let completed_at = fixed_now() + Duration::days(2) + Duration::hours(3);
        let summary = on_fired(&store, &comms, &fired_event(trigger), completed_at).unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(comms.sent_count(), 1);

        let stored = &store.activities_for_trigger(trigger).unwrap()[0];
        assert_eq!(stored.status, ActivityStatus::Completed);
        assert_eq!(stored.completed_at, Some(completed_at));
        assert_eq!(stored.completed_by.as_deref(), Some(DISPATCHER_IDENTITY));
        assert_eq!(
            stored
                .difference_in_trigger_and_activity_completion
                .as_deref(),
            Some("2 days 3 hours")
        );
        let _ = activity;
    }

    #[test]
    fn test_failed_send_leaves_activity_in_progress_and_retries() {
        let store = MemoryStore::new();
        let trigger = Uuid::new_v4();
        linked_activity(&store, trigger, true);
        let comms = ScriptedComms::new(1); // first send fails

        let summary = on_fired(&store, &comms, &fired_event(trigger), fixed_now()).unwrap();
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.completed, 0);
        assert_eq!(
            store.activities_for_trigger(trigger).unwrap()[0].status,
            ActivityStatus::WorkInProgress,
            "failed send must leave the activity retryable"
        );

        // Next cycle retries and succeeds.
        let retry = on_fired(&store, &comms, &fired_event(trigger), fixed_now()).unwrap();
        assert_eq!(retry.completed, 1);
        assert_eq!(
            store.activities_for_trigger(trigger).unwrap()[0].status,
            ActivityStatus::Completed
        );
    }

    #[test]
    fn test_manual_activities_are_left_untouched() {
        let store = MemoryStore::new();
        let trigger = Uuid::new_v4();
        linked_activity(&store, trigger, false);
        let comms = ScriptedComms::new(0);

        let summary = on_fired(&store, &comms, &fired_event(trigger), fixed_now()).unwrap();
        assert_eq!(summary.left_manual, 1);
        assert_eq!(comms.sent_count(), 0);
        assert_eq!(
            store.activities_for_trigger(trigger).unwrap()[0].status,
            ActivityStatus::NotStarted
        );
    }

    #[test]
    fn test_completed_activity_is_not_redispatched() {
        let store = MemoryStore::new();
        let trigger = Uuid::new_v4();
        linked_activity(&store, trigger, true);
        let comms = ScriptedComms::new(0);

        on_fired(&store, &comms, &fired_event(trigger), fixed_now()).unwrap();
        on_fired(&store, &comms, &fired_event(trigger), fixed_now()).unwrap();
        assert_eq!(
            comms.sent_count(),
            1,
            "a completed activity must not send again"
        );
    }

    #[test]
    fn test_one_failed_send_does_not_block_siblings() {
        let store = MemoryStore::new();
        let trigger = Uuid::new_v4();
        linked_activity(&store, trigger, true);
        linked_activity(&store, trigger, true);
        let comms = ScriptedComms::new(1); // only the first send fails

        let summary = on_fired(&store, &comms, &fired_event(trigger), fixed_now()).unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 1);
    }

    #[test]
    fn test_completion_before_trigger_is_surfaced_with_sign() {
        let store = MemoryStore::new();
        let trigger = Uuid::new_v4();
        linked_activity(&store, trigger, true);
        let comms = ScriptedComms::new(0);

        // Completion one hour before the firing — an anomaly, not an error.
        let completed_at = fixed_now() - Duration::hours(1);
        on_fired(&store, &comms, &fired_event(trigger), completed_at).unwrap();
        assert_eq!(
            store.activities_for_trigger(trigger).unwrap()[0]
                .difference_in_trigger_and_activity_completion
                .as_deref(),
            Some("-1 hour")
        );
    }

    // --- Duration formatting ------------------------------------------------

    #[test]
    fn test_format_omits_zero_components() {
        assert_eq!(
            format_signed_duration(Duration::days(2) + Duration::hours(3)),
            "2 days 3 hours"
        );
        assert_eq!(
            format_signed_duration(Duration::days(1) + Duration::seconds(5)),
            "1 day 5 seconds"
        );
    }

    #[test]
    fn test_format_singular_and_plural_units() {
        assert_eq!(format_signed_duration(Duration::hours(1)), "1 hour");
        assert_eq!(
            format_signed_duration(Duration::minutes(2) + Duration::seconds(1)),
            "2 minutes 1 second"
        );
    }

    #[test]
    fn test_format_negative_durations_keep_the_sign() {
        assert_eq!(format_signed_duration(Duration::hours(-1)), "-1 hour");
        assert_eq!(
            format_signed_duration(-(Duration::days(2) + Duration::hours(3))),
            "-2 days 3 hours"
        );
    }

    #[test]
    fn test_format_zero_duration() {
        assert_eq!(format_signed_duration(Duration::zero()), "0 seconds");
        assert_eq!(format_signed_duration(Duration::milliseconds(400)), "0 seconds");
    }

    #[test]
    fn test_format_full_breakdown() {
        let delta =
            Duration::days(3) + Duration::hours(4) + Duration::minutes(5) + Duration::seconds(6);
        assert_eq!(format_signed_duration(delta), "3 days 4 hours 5 minutes 6 seconds");
    }
}
