/// The monitoring cycle: fetch, evaluate, dispatch.
///
/// Fetches for independent basin x source pairs run concurrently on a
/// bounded pool of worker threads — each fetch is time-boxed by the shared
/// HTTP client and fails independently of its siblings. Evaluation and
/// dispatch then run per basin against whatever data arrived; a source that
/// produced nothing this cycle simply leaves its triggers untouched.
///
/// No lock is held across an upstream call: fetching completes before any
/// trigger state is read or written.

use std::collections::BTreeMap;
use std::thread;

use chrono::{DateTime, Utc};

use crate::basins::{BasinConfig, BASIN_REGISTRY};
use crate::config::Settings;
use crate::dispatch::{self, CommsClient};
use crate::evaluator::evaluate_basin;
use crate::ingest::SourceAdapter;
use crate::logging::{self, LogSource};
use crate::model::{DataSource, FetchWindow, FiredTrigger, Reading};
use crate::store::{MonitoringStore, StoreError};

// ---------------------------------------------------------------------------
// Fetch stage
// ---------------------------------------------------------------------------

/// Readings keyed by basin, then by source.
pub type FetchResults = BTreeMap<&'static str, BTreeMap<DataSource, Vec<Reading>>>;

fn log_source_for(source: DataSource) -> LogSource {
    match source {
        DataSource::Dhm => LogSource::Dhm,
        DataSource::Glofas => LogSource::Glofas,
        DataSource::Gfh => LogSource::Gfh,
        DataSource::Manual => LogSource::System,
    }
}

/// Runs every basin x adapter fetch on a pool of `workers` threads.
///
/// Fetch errors are absorbed here: they are logged with classification and
/// the pair contributes no readings, which downstream means "no new data
/// this cycle". Prior trigger state is never affected by a failed fetch.
pub fn fetch_all_readings(
    adapters: &BTreeMap<DataSource, Box<dyn SourceAdapter>>,
    workers: usize,
    window: FetchWindow,
) -> FetchResults {
    let tasks: Vec<(&'static BasinConfig, DataSource)> = BASIN_REGISTRY
        .iter()
        .flat_map(|basin| adapters.keys().map(move |source| (basin, *source)))
        .collect();

    let mut results: FetchResults = BTreeMap::new();
    for chunk in tasks.chunks(workers.max(1)) {
        thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|(basin, source)| {
                    let adapter = &adapters[source];
                    scope.spawn(move || {
                        (basin.river_basin, *source, adapter.fetch(basin, window))
                    })
                })
                .collect();

            for handle in handles {
                let Ok((basin_key, source, outcome)) = handle.join() else {
                    logging::error(LogSource::System, None, "fetch worker panicked");
                    continue;
                };
                match outcome {
                    Ok(readings) => {
                        if !readings.is_empty() {
                            results
                                .entry(basin_key)
                                .or_default()
                                .insert(source, readings);
                        }
                    }
                    Err(err) => {
                        logging::log_fetch_failure(
                            log_source_for(source),
                            basin_key,
                            "fetch",
                            &err,
                        );
                    }
                }
            }
        });
    }
    results
}

// ---------------------------------------------------------------------------
// Cycle stage
// ---------------------------------------------------------------------------

/// Aggregated outcome of one full monitoring cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub readings: usize,
    pub fired: usize,
    pub evaluation_failures: usize,
    pub activities_completed: usize,
    pub activities_pending: usize,
}

/// Runs one cycle over every registry basin and active year: evaluate the
/// fetched readings, dispatch activities for new firings, and retry
/// activities left in progress by earlier cycles.
pub fn run_monitoring_cycle(
    store: &dyn MonitoringStore,
    adapters: &BTreeMap<DataSource, Box<dyn SourceAdapter>>,
    comms: &dyn CommsClient,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<CycleReport, StoreError> {
    let window = FetchWindow::last_hours(now, settings.fetch.window_hours);
    let fetched = fetch_all_readings(adapters, settings.fetch.workers, window);

    let mut report = CycleReport::default();
    report.readings = fetched
        .values()
        .flat_map(|by_source| by_source.values())
        .map(Vec::len)
        .sum();

    let empty = BTreeMap::new();
    for basin in BASIN_REGISTRY {
        let by_source = fetched.get(basin.river_basin).unwrap_or(&empty);

        for &year in &settings.active_years {
            let outcome = evaluate_basin(store, basin.river_basin, year, by_source, now)?;
            for failure in &outcome.failures {
                logging::error(
                    LogSource::Evaluator,
                    Some(basin.river_basin),
                    &format!("trigger '{}': {}", failure.title, failure.error),
                );
            }
            logging::log_cycle_summary(
                basin.river_basin,
                by_source.values().map(Vec::len).sum(),
                outcome.fired.len(),
                outcome.failures.len(),
            );

            let mut just_fired = Vec::with_capacity(outcome.fired.len());
            for event in &outcome.fired {
                just_fired.push(event.trigger);
                let summary = dispatch::on_fired(store, comms, event, now)?;
                report.activities_completed += summary.completed;
                report.activities_pending += summary.pending;
            }
            report.fired += outcome.fired.len();
            report.evaluation_failures += outcome.failures.len();

            // Retry activities that a previous cycle left in progress.
            for trigger in store.triggers_for_basin(basin.river_basin, year)? {
                if !trigger.is_triggered || just_fired.contains(&trigger.uuid) {
                    continue;
                }
                let Some(triggered_at) = trigger.triggered_at else {
                    continue;
                };
                let event = FiredTrigger {
                    trigger: trigger.uuid,
                    river_basin: trigger.river_basin.clone(),
                    active_year: trigger.active_year,
                    phase: trigger.phase,
                    data_source: trigger.data_source,
                    triggered_at,
                    repeat_key: trigger.repeat_key.clone(),
                };
                let summary = dispatch::on_fired(store, comms, &event, now)?;
                report.activities_completed += summary.completed;
                report.activities_pending += summary.pending;
            }
        }
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
