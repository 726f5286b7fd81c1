//! The declarative stage table.
//!
//! Ten ordered stages, each with a predicate over prior outcomes and a
//! failure policy. The driver in `pipeline::mod` interprets this table row
//! by row; the branching lives here, in data, where it can be tested.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageId {
    FetchSnapshots,
    ComputePnl,
    PersistReconciled,
    PlaceProtective,
    ModifyEntries,
    ModifyStops,
    RemoveRejected,
    PrepareRegeneration,
    PlaceRegenerated,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    Success,
    Failed,
    Skipped,
}

/// When a stage is allowed to run, expressed over what earlier stages did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunWhen {
    Always,
    Succeeded(StageId),
    /// Stage 9: only when regeneration actually produced order specs.
    RegenerationOutput,
    /// Stage 10: only when an error was recorded; Info-only cycles stay
    /// silent.
    AnyError,
}

/// What a failure of this stage does to the rest of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Stages 1-2: everything downstream consumes their output, so acting
    /// on stale or absent data must be impossible.
    AbortCycle,
    /// Stages 3-9: independent side effects on different resources; one
    /// failing action must not block unrelated ones.
    Continue,
}

pub struct StageSpec {
    pub id: StageId,
    pub runs_when: RunWhen,
    pub on_failure: OnFailure,
}

/// The table from the reconciliation design, one row per stage.
/// Stage 3's "skip stage 4" policy is encoded as stage 4's predicate.
pub fn stage_table() -> [StageSpec; 10] {
    use OnFailure::*;
    use RunWhen::*;
    use StageId::*;
    [
        StageSpec { id: FetchSnapshots, runs_when: Always, on_failure: AbortCycle },
        StageSpec { id: ComputePnl, runs_when: Succeeded(FetchSnapshots), on_failure: AbortCycle },
        StageSpec { id: PersistReconciled, runs_when: Succeeded(ComputePnl), on_failure: Continue },
        StageSpec { id: PlaceProtective, runs_when: Succeeded(PersistReconciled), on_failure: Continue },
        StageSpec { id: ModifyEntries, runs_when: Succeeded(ComputePnl), on_failure: Continue },
        StageSpec { id: ModifyStops, runs_when: Succeeded(ComputePnl), on_failure: Continue },
        StageSpec { id: RemoveRejected, runs_when: Succeeded(ComputePnl), on_failure: Continue },
        StageSpec { id: PrepareRegeneration, runs_when: Succeeded(ComputePnl), on_failure: Continue },
        StageSpec { id: PlaceRegenerated, runs_when: RegenerationOutput, on_failure: Continue },
        StageSpec { id: Report, runs_when: AnyError, on_failure: Continue },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_ordered_and_complete() {
        let table = stage_table();
        assert_eq!(table.len(), 10);
        assert_eq!(table[0].id, StageId::FetchSnapshots);
        assert_eq!(table[9].id, StageId::Report);

        // Only the two load-bearing stages may abort the cycle.
        let aborting: Vec<_> = table
            .iter()
            .filter(|s| s.on_failure == OnFailure::AbortCycle)
            .map(|s| s.id)
            .collect();
        assert_eq!(aborting, vec![StageId::FetchSnapshots, StageId::ComputePnl]);
    }

    #[test]
    fn protective_stage_depends_on_persist_not_compute() {
        let table = stage_table();
        let protective = table
            .iter()
            .find(|s| s.id == StageId::PlaceProtective)
            .unwrap();
        assert_eq!(
            protective.runs_when,
            RunWhen::Succeeded(StageId::PersistReconciled)
        );
    }
}
