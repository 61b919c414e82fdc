/// Source adapters for the trigger service.
///
/// One adapter per upstream source, all behind the `SourceAdapter`
/// capability trait. Call sites never branch on the source tag — they select
/// an adapter from the registry built here and call `fetch`.
///
/// Submodules:
/// - `dhm` — river telemetry REST API (rainfall, water level series).
/// - `glofas` — forecast HTML pages, via the `forecast_html` parser.
/// - `gfh` — generic flood-hub JSON feed.
/// - `forecast_html` — pure structural parser for GLOFAS pages.
///
/// `MANUAL` triggers are fired by operators, not by data, so no adapter
/// exists for that tag.

pub mod dhm;
pub mod forecast_html;
pub mod gfh;
pub mod glofas;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::basins::BasinConfig;
use crate::config::Settings;
use crate::model::{DataSource, FetchError, FetchWindow, Reading};

// ---------------------------------------------------------------------------
// Capability trait and registry
// ---------------------------------------------------------------------------

pub trait SourceAdapter: Send + Sync {
    /// The tag this adapter serves.
    fn source(&self) -> DataSource;

    /// Fetches normalized readings for one basin over one window.
    ///
    /// Absence of data (no forecast published, empty series) is a legitimate
    /// empty result, distinct from a `FetchError`.
    fn fetch(&self, basin: &BasinConfig, window: FetchWindow) -> Result<Vec<Reading>, FetchError>;
}

/// Builds the adapter lookup table. The HTTP client is constructed once by
/// the caller (with its timeout already applied) and shared by every
/// adapter.
pub fn adapter_registry(
    client: &reqwest::blocking::Client,
    settings: &Settings,
) -> BTreeMap<DataSource, Box<dyn SourceAdapter>> {
    let mut registry: BTreeMap<DataSource, Box<dyn SourceAdapter>> = BTreeMap::new();
    registry.insert(
        DataSource::Dhm,
        Box::new(dhm::DhmAdapter::new(
            client.clone(),
            settings.sources.dhm_base_url.clone(),
            settings.fetch.max_reading_age_minutes,
        )),
    );
    registry.insert(
        DataSource::Glofas,
        Box::new(glofas::GlofasAdapter::new(
            client.clone(),
            settings.sources.glofas_base_url.clone(),
        )),
    );
    registry.insert(
        DataSource::Gfh,
        Box::new(gfh::GfhAdapter::new(
            client.clone(),
            settings.sources.gfh_base_url.clone(),
            settings.fetch.max_reading_age_minutes,
        )),
    );
    registry
}

// ---------------------------------------------------------------------------
// Shared fetch helpers
// ---------------------------------------------------------------------------

/// Maps a transport-level error into the fetch taxonomy.
pub fn classify_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_decode() {
        FetchError::UnexpectedFormat(err.to_string())
    } else {
        FetchError::Unreachable(err.to_string())
    }
}

/// Rejects non-2xx responses. A reachable endpoint answering 5xx is still
/// `Unreachable` for the evaluator's purposes — no usable data arrived.
pub fn ensure_success(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FetchError::Unreachable(format!("HTTP {}", status)))
    }
}

/// Drops readings older than the freshness window. Stale telemetry degrades
/// to "no new data" exactly like a fetch failure — the evaluator must never
/// fire on it.
pub fn fresh_only(
    readings: Vec<Reading>,
    now: DateTime<Utc>,
    max_age_minutes: u64,
) -> Vec<Reading> {
    readings
        .into_iter()
        .filter(|r| {
            let age = now.signed_duration_since(r.observed_at);
            age.num_minutes() <= max_age_minutes as i64
        })
        .collect()
}

/// Derives the evaluation period key for one source's readings: the source
/// tag plus the date of the most recent observation. A fired trigger stays
/// fired for the rest of that period; the next publication date restores
/// eligibility.
pub fn period_key(source: DataSource, readings: &[Reading]) -> Option<String> {
    readings
        .iter()
        .map(|r| r.observed_at)
        .max()
        .map(|latest| format!("{}:{}", source.as_str(), latest.format("%Y-%m-%d")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
