/// GLOFAS forecast adapter.
///
/// Requests the reporting-point forecast page for a basin (bounding box and
/// station grid indices as query parameters), hands the body to the
/// `forecast_html` parser, and flattens the resulting bundle into readings:
/// one for the point forecast and one per return-period table's most recent
/// forecast day.
///
/// A page with no forecast published is an EMPTY result, not an error —
/// absence of a forecast is a legitimate outcome the evaluator treats as
/// "no new data". Only transport failures and contract drift are errors.

use chrono::{DateTime, NaiveDate, Utc};

use crate::basins::BasinConfig;
use crate::ingest::forecast_html::{parse_forecast_page, ForecastBundle};
use crate::ingest::{classify_transport_error, ensure_success, SourceAdapter};
use crate::model::{
    return_period_series, DataSource, FetchError, FetchWindow, Reading,
    SERIES_FORECAST_PROBABILITY,
};

// ============================================================================
// Adapter
// ============================================================================

/// Forecast adapter for the GLOFAS source.
///
/// Forecast readings are dated by their publication day, which may lag the
/// fetch by many hours — the telemetry freshness window does not apply here.
pub struct GlofasAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl GlofasAdapter {
    pub fn new(client: reqwest::blocking::Client, base_url: String) -> GlofasAdapter {
        GlofasAdapter { client, base_url }
    }
}

impl SourceAdapter for GlofasAdapter {
    fn source(&self) -> DataSource {
        DataSource::Glofas
    }

    fn fetch(&self, basin: &BasinConfig, _window: FetchWindow) -> Result<Vec<Reading>, FetchError> {
        let [min_lon, min_lat, max_lon, max_lat] = basin.glofas.bounding_box;
        let url = format!(
            "{}/stations/forecast?bbox={},{},{},{}&i={}&j={}",
            self.base_url, min_lon, min_lat, max_lon, max_lat, basin.glofas.i, basin.glofas.j,
        );

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(classify_transport_error)?;
        let response = ensure_success(response)?;
        let body = response.text().map_err(classify_transport_error)?;

        match parse_forecast_page(&body) {
            Some(bundle) => readings_from_bundle(basin, &bundle),
            None => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// Bundle flattening
// ============================================================================

/// Flattens a parsed bundle into readings. Value typing happens here, not in
/// the parser: a point forecast whose probability cell no longer parses is
/// contract drift, surfaced as `UnexpectedFormat`.
pub fn readings_from_bundle(
    basin: &BasinConfig,
    bundle: &ForecastBundle,
) -> Result<Vec<Reading>, FetchError> {
    let point = &bundle.point_forecast;
    let observed_at = parse_forecast_date(&point.forecast_date)?;
    let max_probability = parse_numeric_cell(&point.max_probability).ok_or_else(|| {
        FetchError::UnexpectedFormat(format!(
            "point forecast probability '{}' is not numeric",
            point.max_probability
        ))
    })?;

    let mut readings = Vec::with_capacity(1 + bundle.return_periods.len());

    let mut point_reading = Reading {
        river_basin: basin.river_basin.to_string(),
        source: DataSource::Glofas,
        series_id: SERIES_FORECAST_PROBABILITY.to_string(),
        observed_at,
        value: max_probability,
        metadata: Default::default(),
    };
    point_reading
        .metadata
        .insert("forecast_date".to_string(), point.forecast_date.clone());
    point_reading
        .metadata
        .insert("alert_level".to_string(), point.alert_level.clone());
    point_reading
        .metadata
        .insert("probability_step".to_string(), point.probability_step.clone());
    point_reading
        .metadata
        .insert("peak_forecast".to_string(), point.peak_forecast.clone());
    point_reading
        .metadata
        .insert("image_reference".to_string(), point.image_reference.clone());
    point_reading
        .metadata
        .insert("hydrograph_image".to_string(), bundle.hydrograph_image.clone());
    readings.push(point_reading);

    for table in &bundle.return_periods {
        // The first data row is the most recent forecast day; its peak
        // exceedance probability is the value the evaluator compares.
        let nearest_row = table.rows.first().ok_or_else(|| {
            FetchError::UnexpectedFormat(format!(
                "{}-year table has no data rows",
                table.recurrence_years
            ))
        })?;
        let peak = nearest_row
            .iter()
            .filter_map(|cell| parse_numeric_cell(cell))
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
            .ok_or_else(|| {
                FetchError::UnexpectedFormat(format!(
                    "{}-year table row has no numeric cells",
                    table.recurrence_years
                ))
            })?;

        let mut reading = Reading {
            river_basin: basin.river_basin.to_string(),
            source: DataSource::Glofas,
            series_id: return_period_series(table.recurrence_years),
            observed_at,
            value: peak,
            metadata: Default::default(),
        };
        reading.metadata.insert(
            "recurrence_years".to_string(),
            table.recurrence_years.to_string(),
        );
        reading
            .metadata
            .insert("forecast_date".to_string(), point.forecast_date.clone());
        readings.push(reading);
    }

    Ok(readings)
}

fn parse_forecast_date(text: &str) -> Result<DateTime<Utc>, FetchError> {
    let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|e| {
        FetchError::UnexpectedFormat(format!("bad forecast date '{}': {}", text, e))
    })?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
        FetchError::UnexpectedFormat(format!("bad forecast date '{}'", text))
    })?;
    Ok(DateTime::from_naive_utc_and_offset(midnight, Utc))
}

/// Parses a probability-like cell: "72", "72%", "72.5 %". Dates and labels
/// return `None`.
fn parse_numeric_cell(cell: &str) -> Option<f64> {
    let trimmed = cell.trim().trim_end_matches('%').trim();
    if trimmed.contains('-') || trimmed.is_empty() {
        return None; // dates ("2025-07-05") and empty cells are not values
    }
    trimmed.parse::<f64>().ok()
}

// ============================================================================
// Tests
// ============================================================================
