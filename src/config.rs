/// Runtime settings for the trigger service.
///
/// Settings are loaded once at process start from a TOML file (default
/// `./aamon.toml`) and passed into the components that need them — there is
/// no global settings singleton. `DATABASE_URL` comes from the environment
/// (via `.env` in development) so credentials stay out of the settings file.

use std::env;
use std::fmt;
use std::fs;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Settings structures
// ---------------------------------------------------------------------------

/// Top-level settings. Every section has defaults so a missing file section
/// degrades to something usable in development.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Years for which phases are ensured and triggers evaluated.
    #[serde(default = "default_active_years")]
    pub active_years: Vec<i32>,
    /// Seconds between monitoring cycles.
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub sources: SourceSettings,
    #[serde(default)]
    pub chain: ChainSettings,
    #[serde(default)]
    pub comms: CommsSettings,
}

/// Upstream fetch behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    /// Time box for a single upstream call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Worker threads for concurrent basin x source fetches.
    #[serde(default = "default_fetch_workers")]
    pub workers: usize,
    /// How far back a telemetry window reaches.
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    /// Readings older than this are dropped at the adapter boundary.
    #[serde(default = "default_max_reading_age_minutes")]
    pub max_reading_age_minutes: u64,
}

/// Base URLs of the upstream services.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    #[serde(default = "default_dhm_base_url")]
    pub dhm_base_url: String,
    #[serde(default = "default_glofas_base_url")]
    pub glofas_base_url: String,
    #[serde(default = "default_gfh_base_url")]
    pub gfh_base_url: String,
}

/// On-chain reconciliation behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    #[serde(default = "default_chain_endpoint")]
    pub endpoint: String,
    /// Triggers per posted batch. Small by default to respect upstream
    /// rate limits.
    #[serde(default = "default_chain_batch_size")]
    pub batch_size: usize,
    /// Pause between consecutive batch posts, in milliseconds.
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    /// Reconcile once every this many monitoring cycles.
    #[serde(default = "default_reconcile_every_cycles")]
    pub every_n_cycles: u64,
}

/// Communication/payout dispatch endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CommsSettings {
    #[serde(default = "default_comms_endpoint")]
    pub endpoint: String,
}

fn default_active_years() -> Vec<i32> {
    vec![2025]
}
fn default_cycle_interval_secs() -> u64 {
    900 // 15 minutes, matching the telemetry update cadence
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_fetch_workers() -> usize {
    4
}
fn default_window_hours() -> i64 {
    24
}
fn default_max_reading_age_minutes() -> u64 {
    24 * 60
}
fn default_dhm_base_url() -> String {
    "https://hydrology.gov.np".to_string()
}
fn default_glofas_base_url() -> String {
    "https://global-flood.emergency.copernicus.eu".to_string()
}
fn default_gfh_base_url() -> String {
    "https://floodforecasting.googleapis.com".to_string()
}
fn default_chain_endpoint() -> String {
    "http://localhost:8080/chain/actions".to_string()
}
fn default_chain_batch_size() -> usize {
    5
}
fn default_inter_batch_delay_ms() -> u64 {
    1_000
}
fn default_reconcile_every_cycles() -> u64 {
    4
}
fn default_comms_endpoint() -> String {
    "http://localhost:8080/comms/send".to_string()
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            timeout_secs: default_timeout_secs(),
            workers: default_fetch_workers(),
            window_hours: default_window_hours(),
            max_reading_age_minutes: default_max_reading_age_minutes(),
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings {
            dhm_base_url: default_dhm_base_url(),
            glofas_base_url: default_glofas_base_url(),
            gfh_base_url: default_gfh_base_url(),
        }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        ChainSettings {
            endpoint: default_chain_endpoint(),
            batch_size: default_chain_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            every_n_cycles: default_reconcile_every_cycles(),
        }
    }
}

impl Default for CommsSettings {
    fn default() -> Self {
        CommsSettings {
            endpoint: default_comms_endpoint(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            active_years: default_active_years(),
            cycle_interval_secs: default_cycle_interval_secs(),
            fetch: FetchSettings::default(),
            sources: SourceSettings::default(),
            chain: ChainSettings::default(),
            comms: CommsSettings::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Errors raised while loading settings.
#[derive(Debug)]
pub enum SettingsError {
    Io(String),
    Parse(String),
    MissingEnv(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(detail) => write!(f, "Settings file error: {}", detail),
            SettingsError::Parse(detail) => write!(f, "Settings parse error: {}", detail),
            SettingsError::MissingEnv(var) => {
                write!(f, "Missing environment variable: {}", var)
            }
        }
    }
}

impl std::error::Error for SettingsError {}

/// Loads settings from a TOML file.
pub fn load_settings(path: &str) -> Result<Settings, SettingsError> {
    let text = fs::read_to_string(path)
        .map_err(|e| SettingsError::Io(format!("{}: {}", path, e)))?;
    toml::from_str(&text).map_err(|e| SettingsError::Parse(e.to_string()))
}

/// Reads the database connection string from the environment. `.env` files
/// are honored when the caller ran `dotenv::dotenv()` first.
pub fn database_url() -> Result<String, SettingsError> {
    env::var("DATABASE_URL").map_err(|_| SettingsError::MissingEnv("DATABASE_URL".to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
