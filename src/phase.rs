/// Phase management for the anticipatory-action protocol.
///
/// Phase *existence* is managed here: `ensure_phases` lazily upserts the
/// three phases for every configured active year. Phase *progression* is a
/// read-only query — the current phase is the most advanced one with at
/// least one fired mandatory trigger, defaulting to Preparedness. The
/// evaluator additionally considers the immediate next phase, which is the
/// mechanism by which a basin advances.

use chrono::{DateTime, Utc};

use crate::model::{PhaseName, Trigger};
use crate::store::{MonitoringStore, PhaseUpsert, StoreError};

// ---------------------------------------------------------------------------
// Phase ordering
// ---------------------------------------------------------------------------

/// Canonical phase order. Progression semantics depend on this exact
/// sequence — it is a tested constant, not an artifact of enum declaration
/// or iteration order.
pub const PHASE_SEQUENCE: [PhaseName; 3] = [
    PhaseName::Preparedness,
    PhaseName::Activation,
    PhaseName::Readiness,
];

/// The phase after `name`, or `None` for the final phase.
pub fn next_phase(name: PhaseName) -> Option<PhaseName> {
    let position = PHASE_SEQUENCE.iter().position(|p| *p == name)?;
    PHASE_SEQUENCE.get(position + 1).copied()
}

// ---------------------------------------------------------------------------
// Phase existence
// ---------------------------------------------------------------------------

/// Outcome of one `ensure_phases` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnsureSummary {
    pub created: usize,
    pub unchanged: usize,
}

/// Upserts `(basin, year, name)` for every phase name and active year.
/// Safe to call on every startup: existing rows are left untouched.
pub fn ensure_phases(
    store: &dyn MonitoringStore,
    river_basin: &str,
    active_years: &[i32],
    now: DateTime<Utc>,
) -> Result<EnsureSummary, StoreError> {
    let mut summary = EnsureSummary::default();
    for &year in active_years {
        for name in PHASE_SEQUENCE {
            match store.upsert_phase(river_basin, year, name, now)? {
                PhaseUpsert::Created => summary.created += 1,
                PhaseUpsert::Unchanged => summary.unchanged += 1,
            }
        }
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Phase progression
// ---------------------------------------------------------------------------

/// The basin's current phase for evaluation purposes: the most advanced
/// phase holding at least one fired mandatory trigger, defaulting to
/// Preparedness when none has fired. Optional triggers do not advance the
/// basin.
pub fn current_phase(triggers: &[Trigger]) -> PhaseName {
    PHASE_SEQUENCE
        .iter()
        .rev()
        .find(|name| {
            triggers
                .iter()
                .any(|t| t.phase == **name && t.is_mandatory && t.is_triggered && !t.is_deleted)
        })
        .copied()
        .unwrap_or(PhaseName::Preparedness)
}

/// Phases whose triggers are eligible for evaluation this cycle: the
/// current phase and, when one exists, the immediate next phase.
pub fn evaluable_phases(triggers: &[Trigger]) -> Vec<PhaseName> {
    let current = current_phase(triggers);
    let mut phases = vec![current];
    if let Some(next) = next_phase(current) {
        phases.push(next);
    }
    phases
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
