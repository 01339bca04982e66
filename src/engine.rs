use crate::advance::advance;
use crate::bracket::BracketState;
use crate::byes::resolve_byes;
use crate::error::EngineError;
use crate::graph::BracketGraph;
use crate::ports::{
    AuditAction, AuditEntry, AuditTrail, MatchRecord, MatchSnapshot, MatchStore, ScoreRules, SetWalkoverRules,
};
use crate::routing::route;
use crate::types::*;
use crate::undo::{self, UndoOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Everything one recorded result changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultOutcome {
    pub match_id: MatchId,
    pub advanced: Option<SlotRef>,
    pub routed: Vec<SlotRef>,
    pub walkovers: Vec<MatchId>,
    /// `None` when the audit trail refused the entry.
    pub audit_entry_id: Option<u64>,
}

/// Wires the components for one tournament category. Every call builds a
/// fresh bracket view from the supplied records, links it with the
/// configured format and commits once.
pub struct Engine<S, A, R> {
    config: EngineConfig,
    store: S,
    audit: A,
    rules: R,
}

impl<S, A, R> Engine<S, A, R>
where
    S: MatchStore,
    A: AuditTrail,
    R: ScoreRules,
{
    pub fn new(config: EngineConfig, store: S, audit: A, rules: R) -> Self {
        Engine { config, store, audit, rules }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    // ── Components ─────────────────────────────────────────────────────

    pub fn advance(
        &mut self,
        records: &[MatchRecord],
        from: MatchId,
        winner: &Entrant,
    ) -> Result<Option<SlotRef>, EngineError> {
        let mut state = BracketState::from_records(records);
        let slot = advance(&mut state, from, winner);
        state.commit(&mut self.store)?;
        Ok(slot)
    }

    pub fn route(&mut self, records: &[MatchRecord], from: MatchId) -> Result<Vec<SlotRef>, EngineError> {
        let mut state = BracketState::from_records(records);
        let graph = self.graph(&state);
        let written = route(&mut state, &graph, from, self.config.allow_grand_final_reset);
        state.commit(&mut self.store)?;
        Ok(written)
    }

    pub fn resolve_byes(&mut self, records: &[MatchRecord]) -> Result<Vec<MatchId>, EngineError> {
        let mut state = BracketState::from_records(records);
        let graph = self.graph(&state);
        let resolved = resolve_byes(&mut state, &graph, &self.rules, self.config.allow_grand_final_reset);
        state.commit(&mut self.store)?;
        Ok(resolved)
    }

    // ── Flows ──────────────────────────────────────────────────────────

    /// Records a result, then advances, routes and resolves any byes it
    /// opened, all in one batch.
    pub fn record_result(
        &mut self,
        records: &[MatchRecord],
        result: &MatchResult,
        now: DateTime<Utc>,
    ) -> Result<ResultOutcome, EngineError> {
        let match_id = result.match_id;
        let mut state = BracketState::from_records(records);
        let current = state.get(match_id).cloned().ok_or(EngineError::MatchNotFound(match_id))?;
        if matches!(current.status, MatchStatus::Done | MatchStatus::Cancelled) {
            return Err(EngineError::MatchNotPlayable {
                match_id,
                reason: format!("status is {:?}", current.status),
            });
        }
        let Some(winner) = current.side(result.winner).cloned() else {
            return Err(EngineError::MatchNotPlayable {
                match_id,
                reason: format!("winner side {} is empty", result.winner),
            });
        };

        let graph = self.graph(&state);
        state.set_result(match_id, result.winner, result.score.clone(), result.score_sets.clone());
        let after = state.get(match_id).map(MatchSnapshot::of);

        let advanced = advance(&mut state, match_id, &winner);
        let routed = route(&mut state, &graph, match_id, self.config.allow_grand_final_reset);
        let walkovers = resolve_byes(&mut state, &graph, &self.rules, self.config.allow_grand_final_reset);
        state.commit(&mut self.store)?;
        info!(match_id, winner = %result.winner, routed = routed.len(), walkovers = walkovers.len(), "recorded result");

        let audit_entry_id = self.append_audit(AuditEntry {
            id: 0,
            match_id,
            action: AuditAction::Result,
            recorded_at: now,
            before: Some(MatchSnapshot::of(&current)),
            after,
            source_entry_id: None,
        });
        Ok(ResultOutcome {
            match_id,
            advanced,
            routed,
            walkovers,
            audit_entry_id,
        })
    }

    /// Takes back the latest result of `match_id`, reopening any walkover
    /// that result had cascaded into.
    pub fn undo(
        &mut self,
        records: &[MatchRecord],
        match_id: MatchId,
        now: DateTime<Utc>,
    ) -> Result<UndoOutcome, EngineError> {
        let mut state = BracketState::from_records(records);
        let graph = self.graph(&state);
        let outcome = match undo::undo(&mut state, &graph, &self.audit, match_id, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(match_id, code = e.code(), "undo refused: {e}");
                return Err(e);
            }
        };
        state.commit(&mut self.store)?;
        self.append_audit(outcome.audit_entry(now));
        Ok(outcome)
    }

    // ── Helpers ────────────────────────────────────────────────────────

    fn graph(&self, state: &BracketState) -> BracketGraph {
        BracketGraph::build(self.config.format, state)
    }

    /// The batch is already committed, so a trail failure only costs the
    /// ability to undo; it is logged rather than returned.
    fn append_audit(&mut self, entry: AuditEntry) -> Option<u64> {
        match self.audit.append(entry) {
            Ok(saved) => Some(saved.id),
            Err(e) => {
                warn!(code = e.code(), "audit append failed: {e}");
                None
            }
        }
    }
}

impl<S, A> Engine<S, A, SetWalkoverRules>
where
    S: MatchStore,
    A: AuditTrail,
{
    /// Engine whose walkover scoreline is read from the config.
    pub fn from_config(config: EngineConfig, store: S, audit: A) -> Self {
        let rules = config.walkover_rules();
        Engine::new(config, store, audit, rules)
    }
}
