/// Anticipatory-action flood trigger service.
///
/// Ingests readings for the registry basins from DHM telemetry, GLOFAS
/// forecast pages, and the GFH feed; evaluates stored trigger statements;
/// advances per-basin preparedness phases; dispatches downstream activities
/// when a trigger fires; and reconciles fired triggers onto the external
/// ledger in batches.

pub mod basins;
pub mod chain;
pub mod config;
pub mod cycle;
pub mod db;
pub mod dispatch;
pub mod evaluator;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod phase;
pub mod statement;
pub mod store;
pub mod verify;
