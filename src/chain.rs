/// On-chain reconciliation of fired triggers.
///
/// A pull-based loop, fully decoupled from evaluation: it selects triggers
/// still lacking a ledger confirmation, posts them in small fixed-size
/// batches (oldest first, preserving causal order on the ledger), and
/// records the returned confirmation token. A batch commits all-or-nothing:
/// either every trigger in it gets the token from one successful response,
/// or none do and the whole batch is retried next pass. The reconciler only
/// ever moves `transaction_hash` from null to non-null and never touches
/// `is_triggered`, so it is safe to run repeatedly and concurrently with
/// evaluator writes.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::ChainSettings;
use crate::logging::{self, LogSource};
use crate::model::{DataSource, Trigger};
use crate::store::{MonitoringStore, StoreError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The batch post failed; every trigger in the batch stays unconfirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileError(pub String);

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reconcile failed: {}", self.0)
    }
}

impl std::error::Error for ReconcileError {}

// ---------------------------------------------------------------------------
// Payloads and client
// ---------------------------------------------------------------------------

/// One trigger as posted to the ledger-writing service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerPayload {
    pub id: Uuid,
    pub trigger_type: &'static str,
    pub phase: &'static str,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: &'static str,
    pub river_basin: String,
    /// Condition snapshot at reconciliation time.
    pub params: Value,
    pub is_mandatory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Builds the ledger payload for one trigger.
pub fn payload_for(trigger: &Trigger) -> TriggerPayload {
    TriggerPayload {
        id: trigger.uuid,
        trigger_type: match trigger.data_source {
            DataSource::Manual => "MANUAL",
            _ => "AUTOMATED",
        },
        phase: trigger.phase.as_str(),
        title: trigger.title.clone(),
        description: None,
        source: trigger.data_source.as_str(),
        river_basin: trigger.river_basin.clone(),
        params: trigger.statement.to_json(),
        is_mandatory: trigger.is_mandatory,
        notes: trigger.notes.clone(),
    }
}

/// Ledger-writing service. Returns one confirmation token per accepted
/// batch.
pub trait ChainClient: Send + Sync {
    fn post_batch(&self, batch: &[TriggerPayload]) -> Result<String, ReconcileError>;
}

/// HTTP implementation posting to the on-chain action endpoint.
pub struct HttpChainClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpChainClient {
    pub fn new(client: reqwest::blocking::Client, endpoint: String) -> HttpChainClient {
        HttpChainClient { client, endpoint }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ChainReceipt {
    #[serde(rename = "txHash")]
    tx_hash: String,
}

impl ChainClient for HttpChainClient {
    fn post_batch(&self, batch: &[TriggerPayload]) -> Result<String, ReconcileError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(batch)
            .send()
            .map_err(|e| ReconcileError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ReconcileError(format!("HTTP {}", response.status())));
        }
        let receipt: ChainReceipt = response
            .json()
            .map_err(|e| ReconcileError(format!("bad receipt: {}", e)))?;
        Ok(receipt.tx_hash)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation pass
// ---------------------------------------------------------------------------

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileSummary {
    pub batches: usize,
    pub confirmed: usize,
    pub failed_batches: usize,
}

/// Posts every unconfirmed trigger in fixed-size batches. Failed batches are
/// logged and left for the next pass; later batches still run. The
/// inter-batch delay throttles request rate against the upstream limit.
pub fn reconcile(
    store: &dyn MonitoringStore,
    client: &dyn ChainClient,
    settings: &ChainSettings,
) -> Result<ReconcileSummary, StoreError> {
    let pending = store.unreconciled_triggers()?;
    let mut summary = ReconcileSummary::default();
    if pending.is_empty() {
        return Ok(summary);
    }

    let batch_size = settings.batch_size.max(1);
    for (index, batch) in pending.chunks(batch_size).enumerate() {
        if index > 0 && settings.inter_batch_delay_ms > 0 {
            thread::sleep(Duration::from_millis(settings.inter_batch_delay_ms));
        }
        summary.batches += 1;

        let payloads: Vec<TriggerPayload> = batch.iter().map(payload_for).collect();
        match client.post_batch(&payloads) {
            Ok(transaction_hash) => {
                let uuids: Vec<Uuid> = batch.iter().map(|t| t.uuid).collect();
                store.confirm_on_chain(&uuids, &transaction_hash)?;
                summary.confirmed += uuids.len();
            }
            Err(err) => {
                logging::warn(
                    LogSource::Chain,
                    None,
                    &format!("batch {} post failed, will retry: {}", index, err),
                );
                summary.failed_batches += 1;
            }
        }
    }

    logging::log_reconcile_summary(summary.batches, summary.confirmed, summary.failed_batches);
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PhaseName;
    use crate::statement::TriggerStatement;
    use crate::store::{MemoryStore, MonitoringStore};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn settings(batch_size: usize) -> ChainSettings {
        ChainSettings {
            endpoint: "http://localhost:0/unused".to_string(),
            batch_size,
            inter_batch_delay_ms: 0,
            every_n_cycles: 1,
        }
    }

    /// Scripted ledger: returns the queued results in order, records every
    /// posted batch.
    struct ScriptedChain {
        results: Mutex<Vec<Result<String, ReconcileError>>>,
        posted: Mutex<Vec<Vec<TriggerPayload>>>,
    }

    impl ScriptedChain {
        fn new(results: Vec<Result<String, ReconcileError>>) -> ScriptedChain {
            ScriptedChain {
                results: Mutex::new(results),
                posted: Mutex::new(Vec::new()),
            }
        }

        fn posted_batches(&self) -> Vec<Vec<TriggerPayload>> {
            self.posted.lock().unwrap().clone()
        }
    }

    impl ChainClient for ScriptedChain {
        fn post_batch(&self, batch: &[TriggerPayload]) -> Result<String, ReconcileError> {
            self.posted.lock().unwrap().push(batch.to_vec());
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok("0xdefault".to_string())
            } else {
                results.remove(0)
            }
        }
    }

    fn fired_trigger(store: &MemoryStore, created_days_ago: i64) -> Trigger {
        let created = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
            - chrono::Duration::days(created_days_ago);
        let trigger = Trigger {
            uuid: Uuid::new_v4(),
            river_basin: "Karnali at Chisapani".to_string(),
            active_year: 2025,
            phase: PhaseName::Activation,
            data_source: DataSource::Glofas,
            title: "Forecast probability above threshold".to_string(),
            statement: TriggerStatement::parse(&serde_json::json!({
                "field": "value", "op": ">", "threshold": 100
            }))
            .unwrap(),
            is_mandatory: true,
            is_triggered: true,
            triggered_at: Some(created),
            triggered_by: Some("aamon-evaluator".to_string()),
            repeat_key: None,
            transaction_hash: None,
            is_deleted: false,
            created_at: created,
            notes: Some("protocol trigger".to_string()),
        };
        store.insert_trigger(&trigger).unwrap();
        trigger
    }

    #[test]
    fn test_successful_batch_confirms_every_member() {
        let store = MemoryStore::new();
        let a = fired_trigger(&store, 3);
        let b = fired_trigger(&store, 2);
        let chain = ScriptedChain::new(vec![Ok("0xabc".to_string())]);

        let summary = reconcile(&store, &chain, &settings(5)).unwrap();
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.confirmed, 2);
        assert_eq!(summary.failed_batches, 0);

        for uuid in [a.uuid, b.uuid] {
            let stored = store.trigger(uuid).unwrap().unwrap();
            assert_eq!(stored.transaction_hash.as_deref(), Some("0xabc"));
            assert!(stored.is_triggered, "reconciliation never touches is_triggered");
        }
    }

    #[test]
    fn test_failed_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        let a = fired_trigger(&store, 3);
        let b = fired_trigger(&store, 2);
        let chain = ScriptedChain::new(vec![Err(ReconcileError("HTTP 502".to_string()))]);

        let summary = reconcile(&store, &chain, &settings(5)).unwrap();
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.confirmed, 0);

        for uuid in [a.uuid, b.uuid] {
            assert_eq!(
                store.trigger(uuid).unwrap().unwrap().transaction_hash,
                None,
                "no partial-batch commit on failure"
            );
        }
    }

    #[test]
    fn test_failure_confines_to_its_batch() {
        // Three triggers, batch size 2: first batch succeeds, second fails.
        let store = MemoryStore::new();
        let oldest = fired_trigger(&store, 5);
        let middle = fired_trigger(&store, 4);
        let newest = fired_trigger(&store, 3);
        let chain = ScriptedChain::new(vec![
            Ok("0x1".to_string()),
            Err(ReconcileError("HTTP 429".to_string())),
        ]);

        let summary = reconcile(&store, &chain, &settings(2)).unwrap();
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.confirmed, 2);
        assert_eq!(summary.failed_batches, 1);

        assert_eq!(
            store.trigger(oldest.uuid).unwrap().unwrap().transaction_hash.as_deref(),
            Some("0x1")
        );
        assert_eq!(
            store.trigger(middle.uuid).unwrap().unwrap().transaction_hash.as_deref(),
            Some("0x1")
        );
        assert_eq!(
            store.trigger(newest.uuid).unwrap().unwrap().transaction_hash,
            None,
            "triggers outside the successful batch are untouched"
        );
    }

    #[test]
    fn test_batches_preserve_causal_order() {
        let store = MemoryStore::new();
        let newest = fired_trigger(&store, 1);
        let oldest = fired_trigger(&store, 9);
        let chain = ScriptedChain::new(vec![]);

        reconcile(&store, &chain, &settings(1)).unwrap();
        let posted = chain.posted_batches();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0][0].id, oldest.uuid, "oldest posts first");
        assert_eq!(posted[1][0].id, newest.uuid);
    }

    #[test]
    fn test_second_pass_skips_confirmed_triggers() {
        let store = MemoryStore::new();
        fired_trigger(&store, 2);
        let chain = ScriptedChain::new(vec![Ok("0xabc".to_string())]);

        reconcile(&store, &chain, &settings(5)).unwrap();
        let second = reconcile(&store, &chain, &settings(5)).unwrap();
        assert_eq!(second.batches, 0, "confirmed triggers are never re-posted");
        assert_eq!(chain.posted_batches().len(), 1);
    }

    #[test]
    fn test_payload_shape_matches_the_ledger_contract() {
        let store = MemoryStore::new();
        let trigger = fired_trigger(&store, 1);
        let payload = payload_for(&trigger);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["id"], serde_json::json!(trigger.uuid));
        assert_eq!(json["trigger_type"], "AUTOMATED");
        assert_eq!(json["phase"], "ACTIVATION");
        assert_eq!(json["source"], "GLOFAS");
        assert_eq!(json["river_basin"], "Karnali at Chisapani");
        assert_eq!(json["is_mandatory"], true);
        assert_eq!(json["notes"], "protocol trigger");
        assert_eq!(json["params"]["field"], "value");
        assert_eq!(json["params"]["op"], ">");
        assert_eq!(json["params"]["threshold"], 100.0);
        assert!(
            json.get("description").is_none(),
            "absent description is omitted from the payload"
        );
    }

    #[test]
    fn test_manual_triggers_post_as_manual_type() {
        let store = MemoryStore::new();
        let mut trigger = fired_trigger(&store, 1);
        trigger.data_source = DataSource::Manual;
        assert_eq!(payload_for(&trigger).trigger_type, "MANUAL");
    }

    #[test]
    fn test_empty_pending_set_is_a_quiet_no_op() {
        let store = MemoryStore::new();
        let chain = ScriptedChain::new(vec![]);
        let summary = reconcile(&store, &chain, &settings(5)).unwrap();
        assert_eq!(summary, ReconcileSummary::default());
        assert!(chain.posted_batches().is_empty());
    }
}
