/// Service entry point.
///
/// Daemon mode (default): ensure phases for every registry basin, then loop
/// fetch -> evaluate -> dispatch on the configured interval, reconciling
/// onto the ledger every N cycles.
///
/// `--verify`: check every basin against the live upstream services and
/// print a report, then exit.

use std::error::Error;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use aamon_service::basins::BASIN_REGISTRY;
use aamon_service::chain::{self, HttpChainClient};
use aamon_service::config::{self, Settings};
use aamon_service::cycle::run_monitoring_cycle;
use aamon_service::db::PgStore;
use aamon_service::dispatch::HttpCommsClient;
use aamon_service::ingest::adapter_registry;
use aamon_service::logging::{self, LogLevel, LogSource};
use aamon_service::phase::ensure_phases;
use aamon_service::verify;

const SETTINGS_PATH: &str = "./aamon.toml";

fn load_or_default_settings() -> Settings {
    match config::load_settings(SETTINGS_PATH) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: {}; using default settings", e);
            Settings::default()
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    let settings = load_or_default_settings();

    if std::env::args().any(|arg| arg == "--verify") {
        let report = verify::run_full_verification(&settings)?;
        verify::print_summary(&report);
        return Ok(());
    }

    logging::init_logger(LogLevel::Info, Some("aamon.log"));
    logging::info(LogSource::System, None, "starting trigger service");

    let store = PgStore::connect(&config::database_url()?)?;

    // Phase existence is ensured on every startup; the upsert is idempotent.
    let now = Utc::now();
    for basin in BASIN_REGISTRY {
        let summary = ensure_phases(&store, basin.river_basin, &settings.active_years, now)?;
        logging::info(
            LogSource::System,
            Some(basin.river_basin),
            &format!(
                "phases ensured ({} created, {} existing)",
                summary.created, summary.unchanged
            ),
        );
    }

    // External clients are built once here and injected — none of the
    // components lazily construct their own.
    let http = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(settings.fetch.timeout_secs))
        .build()?;
    let adapters = adapter_registry(&http, &settings);
    let comms = HttpCommsClient::new(http.clone(), settings.comms.endpoint.clone());
    let ledger = HttpChainClient::new(http.clone(), settings.chain.endpoint.clone());

    let mut cycle_count: u64 = 0;
    loop {
        cycle_count += 1;
        let now = Utc::now();

        match run_monitoring_cycle(&store, &adapters, &comms, &settings, now) {
            Ok(report) => logging::info(
                LogSource::System,
                None,
                &format!(
                    "cycle {}: {} readings, {} fired, {} activities completed, {} pending",
                    cycle_count,
                    report.readings,
                    report.fired,
                    report.activities_completed,
                    report.activities_pending
                ),
            ),
            Err(e) => logging::error(LogSource::System, None, &format!("cycle failed: {}", e)),
        }

        if cycle_count % settings.chain.every_n_cycles.max(1) == 0 {
            if let Err(e) = chain::reconcile(&store, &ledger, &settings.chain) {
                logging::error(LogSource::Chain, None, &format!("reconcile failed: {}", e));
            }
        }

        thread::sleep(Duration::from_secs(settings.cycle_interval_secs));
    }
}
