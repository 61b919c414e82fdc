/// DHM (Department of Hydrology and Meteorology) telemetry client.
///
/// Retrieves rainfall and river water-level series from the DHM hydrology
/// API for the basins in the registry. One REST call per configured series
/// id; responses are JSON observation arrays.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::basins::BasinConfig;
use crate::ingest::{
    classify_transport_error, ensure_success, fresh_only, SourceAdapter,
};
use crate::model::{
    DataSource, FetchError, FetchWindow, Reading, SERIES_RAINFALL, SERIES_WATER_LEVEL,
};

// ============================================================================
// DHM API Response Structures
// ============================================================================

/// Observation series response from the DHM hydrology API.
#[derive(Debug, Deserialize)]
pub struct DhmSeriesResponse {
    pub data: Vec<DhmObservation>,
}

/// Single telemetry observation.
#[derive(Debug, Deserialize)]
pub struct DhmObservation {
    #[serde(rename = "observedAt")]
    pub observed_at: String, // ISO 8601 timestamp
    /// Missing when the station reported a gap for this interval.
    pub value: Option<f64>,
    #[serde(rename = "qualityFlag")]
    pub quality_flag: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Telemetry adapter for the DHM source.
pub struct DhmAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    max_reading_age_minutes: u64,
}

impl DhmAdapter {
    pub fn new(
        client: reqwest::blocking::Client,
        base_url: String,
        max_reading_age_minutes: u64,
    ) -> DhmAdapter {
        DhmAdapter {
            client,
            base_url,
            max_reading_age_minutes,
        }
    }

    fn fetch_series(
        &self,
        basin: &BasinConfig,
        series_id: &str,
        series_tag: &str,
        window: FetchWindow,
    ) -> Result<Vec<Reading>, FetchError> {
        let url = format!(
            "{}/api/v1/series/{}/observations?from={}&to={}",
            self.base_url,
            series_id,
            window.begin.format("%Y-%m-%dT%H:%M:%SZ"),
            window.end.format("%Y-%m-%dT%H:%M:%SZ"),
        );

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .map_err(classify_transport_error)?;
        let response = ensure_success(response)?;

        let payload: DhmSeriesResponse = response.json().map_err(classify_transport_error)?;
        readings_from_series(basin, series_tag, &payload)
    }
}

impl SourceAdapter for DhmAdapter {
    fn source(&self) -> DataSource {
        DataSource::Dhm
    }

    fn fetch(&self, basin: &BasinConfig, window: FetchWindow) -> Result<Vec<Reading>, FetchError> {
        let mut readings = Vec::new();
        readings.extend(self.fetch_series(
            basin,
            basin.dhm.rainfall_series,
            SERIES_RAINFALL,
            window,
        )?);
        readings.extend(self.fetch_series(
            basin,
            basin.dhm.water_level_series,
            SERIES_WATER_LEVEL,
            window,
        )?);
        Ok(fresh_only(readings, window.end, self.max_reading_age_minutes))
    }
}

// ============================================================================
// Response mapping
// ============================================================================

/// Maps one series response into readings.
///
/// Gap observations (null value) are skipped; an unparseable timestamp means
/// the upstream contract moved and fails the whole series.
pub fn readings_from_series(
    basin: &BasinConfig,
    series_tag: &str,
    payload: &DhmSeriesResponse,
) -> Result<Vec<Reading>, FetchError> {
    let mut readings = Vec::with_capacity(payload.data.len());

    for obs in &payload.data {
        let value = match obs.value {
            Some(v) => v,
            None => continue,
        };

        let observed_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&obs.observed_at)
            .map_err(|e| {
                FetchError::UnexpectedFormat(format!(
                    "bad observedAt '{}': {}",
                    obs.observed_at, e
                ))
            })?
            .with_timezone(&Utc);

        let mut reading = Reading {
            river_basin: basin.river_basin.to_string(),
            source: DataSource::Dhm,
            series_id: series_tag.to_string(),
            observed_at,
            value,
            metadata: Default::default(),
        };

        if let Some(flag) = &obs.quality_flag {
            reading.metadata.insert("quality_flag".to_string(), flag.clone());
        }

        // Water-level readings carry the official river levels so statements
        // can be audited against them without a registry lookup.
        if series_tag == SERIES_WATER_LEVEL {
            if let Some(warning) = basin.dhm.warning_level_m {
                reading
                    .metadata
                    .insert("warning_level_m".to_string(), warning.to_string());
            }
            if let Some(danger) = basin.dhm.danger_level_m {
                reading
                    .metadata
                    .insert("danger_level_m".to_string(), danger.to_string());
            }
        }

        readings.push(reading);
    }

    Ok(readings)
}

// ============================================================================
// Tests
// ============================================================================
