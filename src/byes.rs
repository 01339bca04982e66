use crate::advance::advance;
use crate::bracket::BracketState;
use crate::graph::BracketGraph;
use crate::ports::ScoreRules;
use crate::routing::route;
use crate::topology::{BracketId, Topology};
use crate::types::{MatchId, MatchStatus, Side};

/// Walks every bracket in ascending round order and completes single-sided
/// matches as walkovers, cascading each winner forward within the same pass.
///
/// An empty side only counts as a bye when no unresolved feed can still
/// deliver an entrant into it. Returns the matches walked over, in order.
pub fn resolve_byes<R: ScoreRules + ?Sized>(
  state: &mut BracketState,
  graph: &BracketGraph,
  rules: &R,
  allow_grand_final_reset: bool,
) -> Vec<MatchId> {
  let mut resolved = Vec::new();
  for match_id in walk_order(state.topology()) {
    let Some(winner_side) = bye_winner(state, graph, match_id) else {
      continue;
    };
    state.declare_walkover(match_id, winner_side, rules.walkover(winner_side));
    tracing::info!(match_id, side = %winner_side, "declared walkover");
    resolved.push(match_id);

    let Some(winner) = state.get(match_id).and_then(|m| m.winner_entrant()).cloned() else {
      continue;
    };
    advance(state, match_id, &winner);
    route(state, graph, match_id, allow_grand_final_reset);
  }
  if !resolved.is_empty() {
    tracing::info!(count = resolved.len(), "bye pass resolved walkovers");
  }
  resolved
}

fn bye_winner(state: &BracketState, graph: &BracketGraph, match_id: MatchId) -> Option<Side> {
  let m = state.get(match_id)?;
  if m.winner.is_some() || matches!(m.status, MatchStatus::Cancelled | MatchStatus::Done) {
    return None;
  }
  match (m.is_filled(Side::A), m.is_filled(Side::B)) {
    (true, false) if !graph.side_can_fill(state, match_id, Side::B) => Some(Side::A),
    (false, true) if !graph.side_can_fill(state, match_id, Side::A) => Some(Side::B),
    _ => None,
  }
}

/// Main bracket rounds, then the losers bracket, then the grand finals,
/// so every feed is visited before the match it feeds.
fn walk_order(topology: &Topology) -> Vec<MatchId> {
  let mut order = Vec::new();
  let mut grand_finals = Vec::new();
  if let Some(main) = topology.sequence(BracketId::Main) {
    for round in &main.rounds {
      if round.label.kind().is_grand_final() {
        grand_finals.extend(round.matches.iter().copied());
      } else {
        order.extend(round.matches.iter().copied());
      }
    }
  }
  if let Some(losers) = topology.sequence(BracketId::Losers) {
    for round in &losers.rounds {
      order.extend(round.matches.iter().copied());
    }
  }
  order.extend(grand_finals);
  order
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ports::{is_walkover_score, SetWalkoverRules};
  use crate::types::{BracketFormat, Entrant, Match};

  fn seeded(id: MatchId, label: &str, a: Option<u64>, b: Option<u64>) -> Match {
    let mut m = Match::new(id, label);
    m.sides = [a.map(Entrant::Pairing), b.map(Entrant::Pairing)];
    m
  }

  fn run(state: &mut BracketState, format: BracketFormat) -> Vec<MatchId> {
    let graph = BracketGraph::build(format, state);
    resolve_byes(state, &graph, &SetWalkoverRules::default(), true)
  }

  #[test]
  fn test_lone_entrant_cascades_to_final() {
    let mut matches = vec![seeded(1, "R8", Some(9), None)];
    matches.extend((2..=4).map(|id| seeded(id, "R8", None, None)));
    matches.push(seeded(5, "SEMIFINAL", None, None));
    matches.push(seeded(6, "SEMIFINAL", None, None));
    matches.push(seeded(7, "FINAL", None, None));
    let mut state = BracketState::new(matches);

    assert_eq!(run(&mut state, BracketFormat::SingleElimination), vec![1, 5, 7]);
    let final_match = state.get(7).unwrap();
    assert_eq!(final_match.winner_entrant(), Some(&Entrant::Pairing(9)));
    assert_eq!(final_match.status, MatchStatus::Done);
    assert!(is_walkover_score(&final_match.score));
    assert_eq!(state.get(2).map(|m| m.status), Some(MatchStatus::Pending));
    assert_eq!(state.get(6).map(|m| m.filled_sides()), Some(0));
  }

  #[test]
  fn test_waits_for_pending_opponent() {
    let mut state = BracketState::new(vec![
      seeded(1, "SEMIFINAL", Some(1), None),
      seeded(2, "SEMIFINAL", Some(2), Some(3)),
      seeded(3, "FINAL", None, None),
    ]);
    assert_eq!(run(&mut state, BracketFormat::SingleElimination), vec![1]);
    let final_match = state.get(3).unwrap();
    assert_eq!(final_match.side(Side::A), Some(&Entrant::Pairing(1)));
    assert_eq!(final_match.winner, None);
    assert_eq!(final_match.status, MatchStatus::Pending);
  }

  #[test]
  fn test_second_pass_is_noop() {
    let mut state = BracketState::new(vec![
      seeded(1, "SEMIFINAL", None, Some(4)),
      seeded(2, "SEMIFINAL", Some(2), Some(3)),
      seeded(3, "FINAL", None, None),
    ]);
    assert_eq!(run(&mut state, BracketFormat::SingleElimination), vec![1]);
    assert_eq!(state.get(1).and_then(|m| m.winner), Some(Side::B));
    assert!(run(&mut state, BracketFormat::SingleElimination).is_empty());
  }

  #[test]
  fn test_consolation_bye_without_loser() {
    let mut state = BracketState::new(vec![
      seeded(1, "A R8", Some(1), None),
      seeded(2, "A R8", Some(2), Some(3)),
      seeded(3, "A SEMIFINAL", None, None),
      seeded(4, "B FINAL", None, None),
    ]);
    assert_eq!(run(&mut state, BracketFormat::TwoBrackets), vec![1]);
    assert_eq!(state.get(4).map(|m| m.filled_sides()), Some(0));
  }

  fn play(state: &mut BracketState, graph: &BracketGraph, match_id: MatchId, winner: Side) {
    state.set_result(match_id, winner, serde_json::json!({ "sets": [] }), None);
    let entrant = state.get(match_id).and_then(|m| m.winner_entrant()).cloned().unwrap();
    advance(state, match_id, &entrant);
    route(state, graph, match_id, true);
  }

  #[test]
  fn test_losers_match_walks_over_when_other_drop_was_a_bye() {
    let mut state = BracketState::new(vec![
      seeded(1, "A SEMIFINAL", Some(1), Some(4)),
      seeded(2, "A SEMIFINAL", Some(2), None),
      seeded(3, "A FINAL", None, None),
      seeded(4, "B L1", None, None),
      seeded(5, "B L2", None, None),
    ]);
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    let rules = SetWalkoverRules::default();
    assert_eq!(resolve_byes(&mut state, &graph, &rules, true), vec![2]);

    play(&mut state, &graph, 1, Side::A);
    assert_eq!(resolve_byes(&mut state, &graph, &rules, true), vec![4]);
    let losers_first = state.get(4).unwrap();
    assert_eq!(losers_first.winner_entrant(), Some(&Entrant::Pairing(4)));
    assert_eq!(losers_first.status, MatchStatus::Done);
    let losers_final = state.get(5).unwrap();
    assert_eq!(losers_final.side(Side::A), Some(&Entrant::Pairing(4)));
    assert_eq!(losers_final.status, MatchStatus::Pending);
  }

  #[test]
  fn test_consolation_match_with_single_drop_walks_over() {
    let mut state = BracketState::new(vec![
      seeded(1, "A R8", Some(1), Some(8)),
      seeded(2, "A R8", Some(4), Some(5)),
      seeded(3, "A R8", Some(3), Some(6)),
      seeded(4, "A R8", Some(2), None),
      seeded(5, "A SEMIFINAL", None, None),
      seeded(6, "A SEMIFINAL", None, None),
      seeded(7, "A FINAL", None, None),
      seeded(8, "B SEMIFINAL", None, None),
      seeded(9, "B SEMIFINAL", None, None),
      seeded(10, "B FINAL", None, None),
    ]);
    let graph = BracketGraph::build(BracketFormat::TwoBrackets, &state);
    let rules = SetWalkoverRules::default();
    assert_eq!(resolve_byes(&mut state, &graph, &rules, true), vec![4]);

    for id in 1..=3 {
      play(&mut state, &graph, id, Side::A);
    }
    assert_eq!(state.get(9).and_then(|m| m.side(Side::A)), Some(&Entrant::Pairing(6)));
    assert_eq!(resolve_byes(&mut state, &graph, &rules, true), vec![9]);
    assert_eq!(state.get(9).map(|m| m.status), Some(MatchStatus::Done));
    assert_eq!(state.get(10).and_then(|m| m.side(Side::B)), Some(&Entrant::Pairing(6)));
    assert_eq!(state.get(10).map(|m| m.status), Some(MatchStatus::Pending));
  }
}
