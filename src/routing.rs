use crate::bracket::BracketState;
use crate::graph::{BracketGraph, Carry, Feed, FeedKind};
use crate::types::{BracketFormat, Entrant, Match, MatchId, MatchStatus, Side, SlotRef};

/// Cross-bracket effects of the result of `from`: loser drops, the losers
/// bracket champion entering the grand final, and the grand-final reset.
///
/// Runs after the plain advance for the same result. Re-running it for a
/// result that was already routed writes nothing.
pub fn route(
  state: &mut BracketState,
  graph: &BracketGraph,
  from: MatchId,
  allow_grand_final_reset: bool,
) -> Vec<SlotRef> {
  let mut written = Vec::new();
  if graph.format() == BracketFormat::SingleElimination {
    return written;
  }
  let Some(source) = state.get(from) else {
    return written;
  };
  if source.winner.is_none() {
    tracing::debug!(match_id = from, "no winner recorded; nothing to route");
    return written;
  }
  let winner = source.winner_entrant().cloned();
  let loser = source.loser_entrant().cloned();

  let feeds = graph
    .feeds_from(from)
    .filter(|feed| matches!(feed.kind, FeedKind::Drop | FeedKind::LosersFinal))
    .copied()
    .collect::<Vec<_>>();
  for feed in feeds {
    let entrant = match feed.carry {
      Carry::Winner => winner.as_ref(),
      Carry::Loser => loser.as_ref(),
      Carry::Entrant(_) => None,
    };
    let Some(entrant) = entrant else {
      tracing::debug!(match_id = from, target = feed.to, "walkover produced no loser to drop");
      continue;
    };
    if let Some(slot) = fill_routed_slot(state, &feed, entrant) {
      written.push(slot);
    }
  }

  if graph.grand_final() == Some(from) {
    written.extend(settle_grand_final_reset(state, graph, from, allow_grand_final_reset));
  }
  written
}

/// Fills the preferred side, or the other one when the feed allows it.
/// A target that already references the entrant counts as routed.
fn fill_routed_slot(state: &mut BracketState, feed: &Feed, entrant: &Entrant) -> Option<SlotRef> {
  let target = state.get(feed.to)?;
  if let Some(side) = target.side_of(entrant) {
    tracing::debug!(target = feed.to, side = %side, "entrant already routed");
    return None;
  }
  for side in feed.candidate_sides() {
    if state.fill_side(feed.to, side, entrant) {
      tracing::info!(from = feed.from, target = feed.to, side = %side, kind = ?feed.kind, "routed entrant");
      return Some(SlotRef {
        match_id: feed.to,
        side,
      });
    }
  }
  tracing::warn!(from = feed.from, target = feed.to, "no free side left for routed entrant");
  None
}

/// Decides the reset decider once the grand final has a winner: the losers
/// bracket champion winning forces a rematch on a clean scoresheet,
/// anything else cancels it and empties both sides.
fn settle_grand_final_reset(
  state: &mut BracketState,
  graph: &BracketGraph,
  grand_final: MatchId,
  allow_grand_final_reset: bool,
) -> Vec<SlotRef> {
  let Some(reset) = graph.grand_final_reset() else {
    return Vec::new();
  };
  let Some(reset_status) = state.get(reset).map(|m| m.status) else {
    return Vec::new();
  };
  if matches!(reset_status, MatchStatus::InProgress | MatchStatus::Done) {
    tracing::info!(match_id = reset, status = ?reset_status, "reset decider already underway; leaving it");
    return Vec::new();
  }
  let Some(gf) = state.get(grand_final).cloned() else {
    return Vec::new();
  };
  let Some(winner_side) = gf.winner else {
    return Vec::new();
  };

  let mut written = Vec::new();
  if !allow_grand_final_reset || !losers_champion_won(state, graph, winner_side) {
    for side in Side::BOTH {
      if state.overwrite_side(reset, side, None) {
        written.push(SlotRef { match_id: reset, side });
      }
    }
    state.clear_winner(reset);
    state.set_status(reset, MatchStatus::Cancelled);
    tracing::info!(match_id = reset, "grand final won by winners bracket side; reset cancelled");
    return written;
  }

  if state.get(reset).map_or(false, carries_result) {
    state.reopen(reset);
  }
  for side in Side::BOTH {
    if state.overwrite_side(reset, side, gf.side(side)) {
      written.push(SlotRef { match_id: reset, side });
    }
  }
  state.set_status(reset, MatchStatus::Pending);
  tracing::info!(match_id = reset, "losers bracket champion won the grand final; reset decider opened");
  written
}

/// Anything left over from an earlier decision: a status other than
/// pending, a winner, a score or score sets.
fn carries_result(m: &Match) -> bool {
  m.status != MatchStatus::Pending
    || m.winner.is_some()
    || m.score_sets.is_some()
    || m.score.as_object().map_or(true, |fields| !fields.is_empty())
}

fn losers_champion_won(state: &BracketState, graph: &BracketGraph, winner_side: Side) -> bool {
  let Some(gf) = graph.grand_final().and_then(|id| state.get(id)) else {
    return false;
  };
  let Some(winner) = gf.side(winner_side) else {
    return false;
  };
  let champion_of = |id: Option<MatchId>| id.and_then(|id| state.get(id)).and_then(|m| m.winner_entrant());
  if let Some(losers_champion) = champion_of(graph.losers_final()) {
    return winner.overlaps(losers_champion);
  }
  if let Some(winners_champion) = champion_of(graph.winners_final()) {
    return !winner.overlaps(winners_champion);
  }
  // Neither final has a recorded winner: the side fed by the winners
  // bracket identifies its champion.
  graph
    .feeds_into(gf.id)
    .find(|feed| feed.kind == FeedKind::Advance)
    .map_or(false, |feed| feed.side != winner_side)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn seeded(id: MatchId, label: &str, a: Option<u64>, b: Option<u64>) -> Match {
    let mut m = Match::new(id, label);
    m.sides = [a.map(Entrant::Pairing), b.map(Entrant::Pairing)];
    m
  }

  fn double_elimination() -> BracketState {
    BracketState::new(vec![
      seeded(1, "A SEMIFINAL", Some(1), Some(4)),
      seeded(2, "A SEMIFINAL", Some(2), Some(3)),
      seeded(3, "A FINAL", Some(1), Some(2)),
      seeded(4, "A GF", None, None),
      seeded(5, "A GF2", None, None),
      seeded(6, "B L1", None, None),
      seeded(7, "B L2", None, None),
    ])
  }

  fn decide(state: &mut BracketState, match_id: MatchId, winner: Side) {
    state.set_result(match_id, winner, serde_json::json!({ "sets": [] }), None);
  }

  #[test]
  fn test_single_elimination_routes_nothing() {
    let mut state = double_elimination();
    decide(&mut state, 1, Side::A);
    let graph = BracketGraph::build(BracketFormat::SingleElimination, &state);
    assert!(route(&mut state, &graph, 1, true).is_empty());
  }

  #[test]
  fn test_losers_drop_and_rerun_is_noop() {
    let mut state = double_elimination();
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    decide(&mut state, 1, Side::A);
    decide(&mut state, 2, Side::B);
    assert_eq!(route(&mut state, &graph, 1, true), vec![SlotRef { match_id: 6, side: Side::A }]);
    assert_eq!(route(&mut state, &graph, 2, true), vec![SlotRef { match_id: 6, side: Side::B }]);
    assert!(route(&mut state, &graph, 1, true).is_empty());
    assert_eq!(state.get(6).and_then(|m| m.side(Side::B)), Some(&Entrant::Pairing(2)));

    decide(&mut state, 3, Side::A);
    assert_eq!(route(&mut state, &graph, 3, true), vec![SlotRef { match_id: 7, side: Side::B }]);
  }

  #[test]
  fn test_parity_side_falls_back_when_taken() {
    let mut state = double_elimination();
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    state.fill_side(6, Side::A, &Entrant::Pairing(77));
    decide(&mut state, 1, Side::A);
    assert_eq!(route(&mut state, &graph, 1, true), vec![SlotRef { match_id: 6, side: Side::B }]);
  }

  #[test]
  fn test_grand_final_reset_and_cancel() {
    let mut state = double_elimination();
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    decide(&mut state, 3, Side::A);
    state.fill_side(4, Side::A, &Entrant::Pairing(1));
    state.fill_side(7, Side::A, &Entrant::Pairing(3));
    state.fill_side(7, Side::B, &Entrant::Pairing(2));
    decide(&mut state, 7, Side::B);
    assert_eq!(route(&mut state, &graph, 7, true), vec![SlotRef { match_id: 4, side: Side::B }]);

    let mut reset = state.clone();
    decide(&mut reset, 4, Side::B);
    let written = route(&mut reset, &graph, 4, true);
    assert_eq!(written.len(), 2);
    let gf2 = reset.get(5).unwrap();
    assert_eq!(gf2.status, MatchStatus::Pending);
    assert_eq!(gf2.side(Side::A), Some(&Entrant::Pairing(1)));
    assert_eq!(gf2.side(Side::B), Some(&Entrant::Pairing(2)));

    let mut cancelled = state.clone();
    decide(&mut cancelled, 4, Side::A);
    assert!(route(&mut cancelled, &graph, 4, true).is_empty());
    assert_eq!(cancelled.get(5).map(|m| m.status), Some(MatchStatus::Cancelled));

    let mut disallowed = state;
    decide(&mut disallowed, 4, Side::B);
    assert!(route(&mut disallowed, &graph, 4, false).is_empty());
    assert_eq!(disallowed.get(5).map(|m| m.status), Some(MatchStatus::Cancelled));
  }

  #[test]
  fn test_played_reset_is_left_alone() {
    let mut state = double_elimination();
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    state.fill_side(4, Side::A, &Entrant::Pairing(1));
    state.fill_side(4, Side::B, &Entrant::Pairing(2));
    state.set_status(5, MatchStatus::InProgress);
    decide(&mut state, 4, Side::A);
    assert!(route(&mut state, &graph, 4, true).is_empty());
    assert_eq!(state.get(5).map(|m| m.status), Some(MatchStatus::InProgress));
  }

  #[test]
  fn test_opened_reset_starts_from_clean_score() {
    let mut state = double_elimination();
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    decide(&mut state, 3, Side::A);
    state.fill_side(4, Side::A, &Entrant::Pairing(1));
    state.fill_side(4, Side::B, &Entrant::Pairing(2));
    state.restore(
      5,
      MatchStatus::Cancelled,
      None,
      json!({ "sets": [{ "teamA": 6, "teamB": 4 }] }),
      Some(json!([{ "teamA": 6, "teamB": 4 }])),
    );

    decide(&mut state, 4, Side::B);
    route(&mut state, &graph, 4, true);
    let gf2 = state.get(5).unwrap();
    assert_eq!(gf2.status, MatchStatus::Pending);
    assert_eq!(gf2.score, json!({}));
    assert_eq!(gf2.score_sets, None);
    assert_eq!(gf2.winner, None);
    assert_eq!(gf2.filled_sides(), 2);
  }

  #[test]
  fn test_cancelled_reset_drops_stale_sides() {
    let mut state = double_elimination();
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    decide(&mut state, 3, Side::A);
    state.fill_side(4, Side::A, &Entrant::Pairing(1));
    state.fill_side(4, Side::B, &Entrant::Pairing(2));
    state.fill_side(5, Side::A, &Entrant::Pairing(1));
    state.fill_side(5, Side::B, &Entrant::Pairing(2));

    decide(&mut state, 4, Side::A);
    let cleared = route(&mut state, &graph, 4, true);
    assert_eq!(cleared.len(), 2);
    let gf2 = state.get(5).unwrap();
    assert_eq!(gf2.status, MatchStatus::Cancelled);
    assert_eq!(gf2.filled_sides(), 0);
  }
}
