use chrono::{DateTime, Utc};

use crate::bracket::BracketState;
use crate::error::EngineError;
use crate::graph::BracketGraph;
use crate::ports::{is_walkover_score, AuditAction, AuditEntry, AuditTrail, MatchSnapshot};
use crate::types::{Match, MatchId, MatchStatus, Side, SlotRef, UNDO_WINDOW_MS};

/// What an undo changed, ready to be committed and audited.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoOutcome {
  pub match_id: MatchId,
  pub source_entry_id: u64,
  pub cleared: Vec<SlotRef>,
  /// Walkovers the result had cascaded into, reopened as pending.
  pub reopened: Vec<MatchId>,
  /// Reset decider reopened because the undone grand final had cancelled it.
  pub revived_reset: Option<MatchId>,
  /// State discarded by the undo.
  pub discarded: MatchSnapshot,
  /// State put back.
  pub restored: MatchSnapshot,
}

impl UndoOutcome {
  pub fn audit_entry(&self, now: DateTime<Utc>) -> AuditEntry {
    AuditEntry {
      id: 0,
      match_id: self.match_id,
      action: AuditAction::Undo,
      recorded_at: now,
      before: Some(self.discarded.clone()),
      after: Some(self.restored.clone()),
      source_entry_id: Some(self.source_entry_id),
    }
  }
}

/// Prior result fields recovered from an audit snapshot.
struct PriorState {
  status: MatchStatus,
  winner: Option<Side>,
  score: serde_json::Value,
  score_sets: Option<serde_json::Value>,
}

/// Reverts the latest result of `match_id` if it is inside the undo window
/// and nothing downstream has consumed it yet. Mutates `state` only on
/// success; the caller commits it and appends the outcome's audit entry.
pub fn undo<A: AuditTrail + ?Sized>(
  state: &mut BracketState,
  graph: &BracketGraph,
  audit: &A,
  match_id: MatchId,
  now: DateTime<Utc>,
) -> Result<UndoOutcome, EngineError> {
  let current = state.get(match_id).cloned().ok_or(EngineError::MatchNotFound(match_id))?;

  let entries = audit.entries(match_id, &[AuditAction::Result, AuditAction::Undo]);
  let latest = match entries.first() {
    Some(entry) if entry.action == AuditAction::Result => entry,
    Some(_) => {
      tracing::info!(match_id, "latest result was already undone");
      return Err(EngineError::UndoNotFound(match_id));
    }
    None => return Err(EngineError::UndoNotFound(match_id)),
  };

  if current.status != MatchStatus::Done {
    return Err(EngineError::UndoInvalid {
      match_id,
      reason: format!("match is {:?}; only a DONE result can be undone", current.status),
    });
  }

  let elapsed_ms = (now - latest.recorded_at).num_milliseconds();
  if elapsed_ms > UNDO_WINDOW_MS {
    tracing::info!(match_id, elapsed_ms, "undo window elapsed");
    return Err(EngineError::UndoExpired { match_id, elapsed_ms });
  }

  let prior = prior_state(&current, latest)?;
  let mut unwind = Unwind::default();
  collect_downstream(state, graph, match_id, match_id, &mut unwind)?;

  for slot in &unwind.slots {
    state.clear_side(slot.match_id, slot.side);
    state.clear_winner(slot.match_id);
  }
  for walkover in unwind.walkovers.iter().copied() {
    state.reopen(walkover);
    tracing::debug!(match_id, walkover, "reopened cascaded walkover");
  }

  let mut revived_reset = None;
  if let (Some(grand_final), Some(reset)) = (graph.grand_final(), graph.grand_final_reset()) {
    let grand_final_undone = grand_final == match_id || unwind.walkovers.contains(&grand_final);
    if grand_final_undone && state.get(reset).map(|m| m.status) == Some(MatchStatus::Cancelled) {
      state.set_status(reset, MatchStatus::Pending);
      revived_reset = Some(reset);
    }
  }

  state.restore(match_id, prior.status, prior.winner, prior.score, prior.score_sets);
  let restored = state
    .get(match_id)
    .map(MatchSnapshot::of)
    .ok_or(EngineError::MatchNotFound(match_id))?;

  tracing::info!(
    match_id,
    cleared = unwind.slots.len(),
    reopened = unwind.walkovers.len(),
    source_entry_id = latest.id,
    "undid result"
  );
  Ok(UndoOutcome {
    match_id,
    source_entry_id: latest.id,
    cleared: unwind.slots,
    reopened: unwind.walkovers,
    revived_reset,
    discarded: MatchSnapshot::of(&current),
    restored,
  })
}

fn prior_state(current: &Match, entry: &AuditEntry) -> Result<PriorState, EngineError> {
  let invalid = |reason: &str| EngineError::UndoInvalid {
    match_id: current.id,
    reason: reason.to_string(),
  };
  let before = entry.before.as_ref().ok_or_else(|| invalid("missing before snapshot"))?;
  let status = before.status.ok_or_else(|| invalid("before snapshot has no status"))?;
  let score = before.score.clone().ok_or_else(|| invalid("before snapshot has no score"))?;

  let winner = match before.winner_side {
    Some(side) if current.is_filled(side) => Some(side),
    Some(side) => return Err(invalid(&format!("before snapshot names empty side {side} as winner"))),
    None => match before.winner_entrant() {
      Some(entrant) => Some(
        current
          .side_of(&entrant)
          .ok_or_else(|| invalid("before snapshot winner is not on either side"))?,
      ),
      None => None,
    },
  };

  Ok(PriorState {
    status,
    winner,
    score,
    score_sets: before.score_sets.clone(),
  })
}

/// Slots to clear and walkovers to reopen when a result is taken back.
#[derive(Default)]
struct Unwind {
  slots: Vec<SlotRef>,
  walkovers: Vec<MatchId>,
}

/// Every slot `from` wrote downstream. A walkover won by the entrant this
/// result delivered is unwound along with whatever it fed in turn; any
/// other match that is no longer pending locks the undo of `origin`.
fn collect_downstream(
  state: &BracketState,
  graph: &BracketGraph,
  origin: MatchId,
  from: MatchId,
  unwind: &mut Unwind,
) -> Result<(), EngineError> {
  for feed in graph.feeds_from(from) {
    let Some(outgoing) = graph.carried_entrant(state, feed) else {
      continue;
    };
    let Some(target) = state.get(feed.to) else {
      continue;
    };
    if target.status == MatchStatus::Cancelled {
      continue;
    }
    let Some(side) = feed
      .candidate_sides()
      .into_iter()
      .find(|side| target.side(*side).map_or(false, |held| held.overlaps(outgoing)))
    else {
      continue;
    };
    let slot = SlotRef {
      match_id: target.id,
      side,
    };
    if unwind.slots.contains(&slot) {
      continue;
    }

    let walked_over = target.status == MatchStatus::Done
      && target.winner == Some(side)
      && target.filled_sides() == 1
      && is_walkover_score(&target.score);
    if walked_over {
      unwind.slots.push(slot);
      if !unwind.walkovers.contains(&target.id) {
        unwind.walkovers.push(target.id);
        collect_downstream(state, graph, origin, target.id, unwind)?;
      }
      continue;
    }
    if target.status != MatchStatus::Pending {
      tracing::info!(match_id = origin, blocking = target.id, "undo refused; downstream match already started");
      return Err(EngineError::DownstreamLocked {
        match_id: origin,
        blocking: target.id,
      });
    }
    unwind.slots.push(slot);
  }
  Ok(())
}
