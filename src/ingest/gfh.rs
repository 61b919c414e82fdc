/// GFH (generic flood hub) feed client.
///
/// The hub publishes gauge-level flood forecasts as JSON keyed by
/// HydroBASINS station id. Structurally the adapter mirrors the DHM
/// telemetry client: fetch, deserialize, normalize into readings. Not every
/// basin is covered by the hub; uncovered basins legitimately produce an
/// empty result.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::basins::BasinConfig;
use crate::ingest::{
    classify_transport_error, ensure_success, fresh_only, SourceAdapter,
};
use crate::model::{DataSource, FetchError, FetchWindow, Reading, SERIES_GFH_PROBABILITY};

// ============================================================================
// GFH API Response Structures
// ============================================================================

/// Forecast feed response for one gauge.
#[derive(Debug, Deserialize)]
pub struct GfhResponse {
    pub forecasts: Vec<GfhForecast>,
}

/// One issued forecast for a gauge.
#[derive(Debug, Deserialize)]
pub struct GfhForecast {
    #[serde(rename = "gaugeId")]
    pub gauge_id: String,
    #[serde(rename = "issuedTime")]
    pub issued_time: String, // ISO 8601 timestamp
    /// Exceedance probability for the warn level, 0-100.
    pub probability: Option<f64>,
    /// Hub severity label, e.g. "WARNING" or "DANGER".
    pub severity: Option<String>,
    #[serde(rename = "forecastTrend")]
    pub trend: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Feed adapter for the GFH source.
pub struct GfhAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    max_reading_age_minutes: u64,
}

impl GfhAdapter {
    pub fn new(
        client: reqwest::blocking::Client,
        base_url: String,
        max_reading_age_minutes: u64,
    ) -> GfhAdapter {
        GfhAdapter {
            client,
            base_url,
            max_reading_age_minutes,
        }
    }
}

impl SourceAdapter for GfhAdapter {
    fn source(&self) -> DataSource {
        DataSource::Gfh
    }

    fn fetch(&self, basin: &BasinConfig, window: FetchWindow) -> Result<Vec<Reading>, FetchError> {
        let station = match basin.gfh_station {
            Some(station) => station,
            None => return Ok(Vec::new()), // basin not covered by the hub
        };

        let url = format!("{}/v1/gauges/{}/forecasts", self.base_url, station);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .map_err(classify_transport_error)?;
        let response = ensure_success(response)?;

        let payload: GfhResponse = response.json().map_err(classify_transport_error)?;
        let readings = readings_from_feed(basin, &payload)?;
        Ok(fresh_only(readings, window.end, self.max_reading_age_minutes))
    }
}

// ============================================================================
// Response mapping
// ============================================================================

/// Normalizes the feed into readings. Forecasts without a probability carry
/// no evaluable signal and are skipped.
pub fn readings_from_feed(
    basin: &BasinConfig,
    payload: &GfhResponse,
) -> Result<Vec<Reading>, FetchError> {
    let mut readings = Vec::with_capacity(payload.forecasts.len());

    for forecast in &payload.forecasts {
        let probability = match forecast.probability {
            Some(p) => p,
            None => continue,
        };

        let observed_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&forecast.issued_time)
            .map_err(|e| {
                FetchError::UnexpectedFormat(format!(
                    "bad issuedTime '{}': {}",
                    forecast.issued_time, e
                ))
            })?
            .with_timezone(&Utc);

        let mut reading = Reading {
            river_basin: basin.river_basin.to_string(),
            source: DataSource::Gfh,
            series_id: SERIES_GFH_PROBABILITY.to_string(),
            observed_at,
            value: probability,
            metadata: Default::default(),
        };
        reading
            .metadata
            .insert("gauge_id".to_string(), forecast.gauge_id.clone());
        if let Some(severity) = &forecast.severity {
            reading.metadata.insert("severity".to_string(), severity.clone());
        }
        if let Some(trend) = &forecast.trend {
            reading.metadata.insert("trend".to_string(), trend.clone());
        }
        readings.push(reading);
    }

    Ok(readings)
}

// ============================================================================
// Tests
// ============================================================================
