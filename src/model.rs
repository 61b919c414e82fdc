/// Core data types for the anticipatory-action flood trigger service.
///
/// This module defines the shared domain model imported by all other modules:
/// readings, phases, triggers, activities, and the fetch error taxonomy.
/// It contains no I/O — only types and the field lookup used by statement
/// evaluation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::statement::{FieldValue, TriggerStatement};

// ---------------------------------------------------------------------------
// Series identifiers
// ---------------------------------------------------------------------------

/// Series id for DHM rainfall telemetry, in millimetres.
pub const SERIES_RAINFALL: &str = "rainfall";

/// Series id for DHM river water level telemetry, in metres.
pub const SERIES_WATER_LEVEL: &str = "water_level";

/// Series id for the GLOFAS point-forecast maximum probability, in percent.
pub const SERIES_FORECAST_PROBABILITY: &str = "forecast.max_probability";

/// Series id for the GFH discharge forecast probability, in percent.
pub const SERIES_GFH_PROBABILITY: &str = "gfh.probability";

/// Series id for a GLOFAS return-period row, e.g. `forecast.rp_20y`.
pub fn return_period_series(years: u8) -> String {
    format!("forecast.rp_{}y", years)
}

// ---------------------------------------------------------------------------
// Data sources
// ---------------------------------------------------------------------------

/// Upstream data source a reading or trigger belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataSource {
    #[serde(rename = "DHM")]
    Dhm,
    #[serde(rename = "GLOFAS")]
    Glofas,
    #[serde(rename = "GFH")]
    Gfh,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl DataSource {
    /// Tag stored in the database and used in on-chain payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Dhm => "DHM",
            DataSource::Glofas => "GLOFAS",
            DataSource::Gfh => "GFH",
            DataSource::Manual => "MANUAL",
        }
    }

    /// Parses the stored tag. Returns `None` for unknown tags.
    pub fn parse(tag: &str) -> Option<DataSource> {
        match tag {
            "DHM" => Some(DataSource::Dhm),
            "GLOFAS" => Some(DataSource::Glofas),
            "GFH" => Some(DataSource::Gfh),
            "MANUAL" => Some(DataSource::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// A normalized data point for a basin, produced by a source adapter and
/// consumed immediately by the trigger evaluator. Readings are ephemeral —
/// raw daily-monitoring snapshots are persisted elsewhere, outside this core.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub river_basin: String,
    pub source: DataSource,
    pub series_id: String,
    pub observed_at: DateTime<Utc>,
    pub value: f64,
    /// Secondary fields carried alongside the primary value, addressable
    /// from trigger statements by key. Ordered so evaluation and payload
    /// construction are deterministic.
    pub metadata: BTreeMap<String, String>,
}

impl Reading {
    /// Looks up a statement-addressable field on this reading.
    ///
    /// `value` resolves to the primary numeric value; `series_id`, `source`
    /// and `river_basin` resolve to text; any other name resolves through
    /// `metadata`, as a number when the stored text parses as one.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "value" => Some(FieldValue::Number(self.value)),
            "series_id" => Some(FieldValue::Text(self.series_id.clone())),
            "source" => Some(FieldValue::Text(self.source.as_str().to_string())),
            "river_basin" => Some(FieldValue::Text(self.river_basin.clone())),
            other => self.metadata.get(other).map(|raw| {
                match raw.trim().parse::<f64>() {
                    Ok(num) => FieldValue::Number(num),
                    Err(_) => FieldValue::Text(raw.clone()),
                }
            }),
        }
    }
}

/// Time window a fetch covers, in UTC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchWindow {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Window ending at `now` and reaching back `hours` hours.
    pub fn last_hours(now: DateTime<Utc>, hours: i64) -> FetchWindow {
        FetchWindow {
            begin: now - chrono::Duration::hours(hours),
            end: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Preparedness phase names. Ordering among the three is semantic; the
/// canonical sequence lives in `phase::PHASE_SEQUENCE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PhaseName {
    #[serde(rename = "PREPAREDNESS")]
    Preparedness,
    #[serde(rename = "ACTIVATION")]
    Activation,
    #[serde(rename = "READINESS")]
    Readiness,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Preparedness => "PREPAREDNESS",
            PhaseName::Activation => "ACTIVATION",
            PhaseName::Readiness => "READINESS",
        }
    }

    pub fn parse(tag: &str) -> Option<PhaseName> {
        match tag {
            "PREPAREDNESS" => Some(PhaseName::Preparedness),
            "ACTIVATION" => Some(PhaseName::Activation),
            "READINESS" => Some(PhaseName::Readiness),
            _ => None,
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A preparedness phase scoped to `(river_basin, active_year, name)`.
/// Created lazily per configured active year, never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub river_basin: String,
    pub active_year: i32,
    pub name: PhaseName,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// A stored condition over incoming readings, belonging to exactly one phase.
///
/// `repeat_key` records the period key under which the trigger last fired.
/// A fired trigger with a non-null key becomes eligible again only when the
/// evaluation period's key differs; a fired trigger whose key is null is
/// terminal. `transaction_hash` is null until the chain reconciler confirms
/// the trigger on the external ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub uuid: Uuid,
    pub river_basin: String,
    pub active_year: i32,
    pub phase: PhaseName,
    pub data_source: DataSource,
    pub title: String,
    pub statement: TriggerStatement,
    pub is_mandatory: bool,
    pub is_triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub triggered_by: Option<String>,
    pub repeat_key: Option<String>,
    pub transaction_hash: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Event emitted when a trigger transitions to fired. Consumed by the
/// activity dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredTrigger {
    pub trigger: Uuid,
    pub river_basin: String,
    pub active_year: i32,
    pub phase: PhaseName,
    pub data_source: DataSource,
    pub triggered_at: DateTime<Utc>,
    pub repeat_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Activities
// ---------------------------------------------------------------------------

/// Progress state of a downstream activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityStatus {
    NotStarted,
    WorkInProgress,
    Completed,
    Delayed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::NotStarted => "NOT_STARTED",
            ActivityStatus::WorkInProgress => "WORK_IN_PROGRESS",
            ActivityStatus::Completed => "COMPLETED",
            ActivityStatus::Delayed => "DELAYED",
        }
    }

    pub fn parse(tag: &str) -> Option<ActivityStatus> {
        match tag {
            "NOT_STARTED" => Some(ActivityStatus::NotStarted),
            "WORK_IN_PROGRESS" => Some(ActivityStatus::WorkInProgress),
            "COMPLETED" => Some(ActivityStatus::Completed),
            "DELAYED" => Some(ActivityStatus::Delayed),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audience of an automated communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetGroup {
    #[serde(rename = "STAKEHOLDERS")]
    Stakeholders,
    #[serde(rename = "BENEFICIARY")]
    Beneficiary,
}

impl TargetGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetGroup::Stakeholders => "STAKEHOLDERS",
            TargetGroup::Beneficiary => "BENEFICIARY",
        }
    }
}

/// What an automated activity sends when its trigger fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationSpec {
    pub group: TargetGroup,
    pub message: Option<String>,
    pub audio_url: Option<String>,
}

/// A unit of downstream response work linked to a phase and gated by trigger
/// firing through an association the dispatcher reads but does not own.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub uuid: Uuid,
    pub river_basin: String,
    pub active_year: i32,
    pub phase: PhaseName,
    pub title: String,
    pub is_automated: bool,
    pub status: ActivityStatus,
    pub communication: Option<CommunicationSpec>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    /// Signed human-readable delta between the governing trigger's firing and
    /// this activity's completion, e.g. `"2 days 3 hours"` or `"-1 hour"`.
    pub difference_in_trigger_and_activity_completion: Option<String>,
}

// ---------------------------------------------------------------------------
// Fetch error taxonomy
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching from an upstream source. All three
/// degrade to "no new data this cycle" at the adapter boundary — the
/// evaluator never fires on missing data and never clears fired state
/// because data went missing.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// The endpoint could not be reached (DNS, connect, non-2xx response).
    Unreachable(String),
    /// The upstream call exceeded its time box.
    Timeout,
    /// The response arrived but did not match the expected shape.
    UnexpectedFormat(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Unreachable(detail) => write!(f, "Unreachable: {}", detail),
            FetchError::Timeout => write!(f, "Timeout"),
            FetchError::UnexpectedFormat(detail) => {
                write!(f, "Unexpected format: {}", detail)
            }
        }
    }
}

impl std::error::Error for FetchError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::FieldValue;
    use chrono::TimeZone;

    fn sample_reading() -> Reading {
        let mut metadata = BTreeMap::new();
        metadata.insert("alert_level".to_string(), "orange".to_string());
        metadata.insert("peak_forecast".to_string(), "310.5".to_string());
        Reading {
            river_basin: "Karnali at Chisapani".to_string(),
            source: DataSource::Glofas,
            series_id: SERIES_FORECAST_PROBABILITY.to_string(),
            observed_at: Utc.with_ymd_and_hms(2025, 7, 1, 6, 0, 0).unwrap(),
            value: 72.0,
            metadata,
        }
    }

    #[test]
    fn test_field_lookup_resolves_primary_value() {
        assert_eq!(
            sample_reading().field("value"),
            Some(FieldValue::Number(72.0))
        );
    }

    #[test]
    fn test_field_lookup_resolves_identity_fields_as_text() {
        let reading = sample_reading();
        assert_eq!(
            reading.field("source"),
            Some(FieldValue::Text("GLOFAS".to_string()))
        );
        assert_eq!(
            reading.field("river_basin"),
            Some(FieldValue::Text("Karnali at Chisapani".to_string()))
        );
    }

    #[test]
    fn test_field_lookup_coerces_numeric_metadata() {
        let reading = sample_reading();
        assert_eq!(
            reading.field("peak_forecast"),
            Some(FieldValue::Number(310.5))
        );
        assert_eq!(
            reading.field("alert_level"),
            Some(FieldValue::Text("orange".to_string()))
        );
    }

    #[test]
    fn test_field_lookup_returns_none_for_unknown_field() {
        assert!(sample_reading().field("discharge").is_none());
    }

    #[test]
    fn test_data_source_tags_round_trip() {
        for source in [
            DataSource::Dhm,
            DataSource::Glofas,
            DataSource::Gfh,
            DataSource::Manual,
        ] {
            assert_eq!(DataSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(DataSource::parse("USGS"), None);
    }

    #[test]
    fn test_phase_name_tags_round_trip() {
        for name in [
            PhaseName::Preparedness,
            PhaseName::Activation,
            PhaseName::Readiness,
        ] {
            assert_eq!(PhaseName::parse(name.as_str()), Some(name));
        }
        assert_eq!(PhaseName::parse("RESPONSE"), None);
    }

    #[test]
    fn test_activity_status_tags_round_trip() {
        for status in [
            ActivityStatus::NotStarted,
            ActivityStatus::WorkInProgress,
            ActivityStatus::Completed,
            ActivityStatus::Delayed,
        ] {
            assert_eq!(ActivityStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_fetch_window_reaches_back_requested_hours() {
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        let window = FetchWindow::last_hours(now, 6);
        assert_eq!(window.end, now);
        assert_eq!(
            window.begin,
            Utc.with_ymd_and_hms(2025, 7, 1, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_return_period_series_names() {
        assert_eq!(return_period_series(2), "forecast.rp_2y");
        assert_eq!(return_period_series(20), "forecast.rp_20y");
    }
}
