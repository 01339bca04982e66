use std::collections::HashMap;

use crate::bracket::BracketState;
use crate::ports::is_walkover_score;
use crate::topology::{BracketId, Round, RoundKind, RoundSequence, Topology};
use crate::types::{BracketFormat, Entrant, Match, MatchId, MatchStatus, Side};

/// What travels along a feed edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Carry {
  Winner,
  Loser,
  /// The entrant on one side of the source, whatever the result.
  Entrant(Side),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedKind {
  /// Winner moving to the next round of its own bracket.
  Advance,
  /// Loser dropping into the losers/consolation bracket.
  Drop,
  /// Winner of the losers bracket entering the grand final.
  LosersFinal,
  /// Grand final entrants copied into the reset decider.
  Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Feed {
  pub from: MatchId,
  pub carry: Carry,
  pub to: MatchId,
  pub side: Side,
  pub kind: FeedKind,
  /// The opposite side may be used when `side` is already taken.
  pub fallback: bool,
}

impl Feed {
  /// Sides of the target this feed may have written.
  pub fn candidate_sides(&self) -> Vec<Side> {
    if self.fallback {
      vec![self.side, self.side.opposite()]
    } else {
      vec![self.side]
    }
  }
}

/// Explicit `(match, outcome) -> (match, side)` edges for one category,
/// derived from its round sequences and format.
#[derive(Clone, Debug)]
pub struct BracketGraph {
  format: BracketFormat,
  feeds: Vec<Feed>,
  outgoing: HashMap<MatchId, Vec<usize>>,
  incoming: HashMap<MatchId, Vec<usize>>,
  grand_final: Option<MatchId>,
  grand_final_reset: Option<MatchId>,
  winners_final: Option<MatchId>,
  losers_final: Option<MatchId>,
}

impl BracketGraph {
  pub fn build(format: BracketFormat, state: &BracketState) -> Self {
    let topology = state.topology();
    let mut graph = BracketGraph {
      format,
      feeds: Vec::new(),
      outgoing: HashMap::new(),
      incoming: HashMap::new(),
      grand_final: None,
      grand_final_reset: None,
      winners_final: None,
      losers_final: None,
    };

    for sequence in topology.sequences() {
      for (round_idx, round) in sequence.rounds.iter().enumerate() {
        for (position, from) in round.matches.iter().enumerate() {
          if let Some((to, side)) = sequence.winner_slot_at(round_idx, position) {
            graph.push(Feed {
              from: *from,
              carry: Carry::Winner,
              to,
              side,
              kind: FeedKind::Advance,
              fallback: false,
            });
          }
        }
      }
    }

    match format {
      BracketFormat::SingleElimination => {}
      BracketFormat::TwoBrackets => graph.link_consolation_drops(state),
      BracketFormat::DoubleElimination => graph.link_double_elimination(topology),
    }
    graph
  }

  fn push(&mut self, feed: Feed) {
    let idx = self.feeds.len();
    self.outgoing.entry(feed.from).or_default().push(idx);
    self.incoming.entry(feed.to).or_default().push(idx);
    self.feeds.push(feed);
  }

  /// First-round losers of the main bracket, counted among matches that
  /// actually have two entrants, drop into the consolation bracket.
  fn link_consolation_drops(&mut self, state: &BracketState) {
    let topology = state.topology();
    let (Some(main), Some(consolation)) = (
      topology.sequence(BracketId::Main),
      topology.sequence(BracketId::Losers),
    ) else {
      return;
    };
    let (Some(first), Some(target_round)) = (main.first(), consolation.first()) else {
      return;
    };
    let playable = first
      .matches
      .iter()
      .copied()
      .filter(|id| state.get(*id).map_or(false, |m| m.filled_sides() == 2))
      .collect::<Vec<_>>();
    let flat = target_round.matches.len() == playable.len();
    for (position, from) in playable.iter().enumerate() {
      let target_idx = if flat { position } else { position / 2 };
      let Some(to) = target_round.matches.get(target_idx).copied() else {
        continue;
      };
      self.push(Feed {
        from: *from,
        carry: Carry::Loser,
        to,
        side: Side::for_position(position),
        kind: FeedKind::Drop,
        fallback: true,
      });
    }
  }

  fn link_double_elimination(&mut self, topology: &Topology) {
    let main = topology.sequence(BracketId::Main);
    let losers = topology.sequence(BracketId::Losers);
    self.grand_final = main.and_then(|seq| first_match_of_kind(seq, RoundKind::GrandFinal));
    self.grand_final_reset = main.and_then(|seq| first_match_of_kind(seq, RoundKind::GrandFinalReset));
    self.winners_final = main.and_then(|seq| {
      seq
        .rounds
        .iter()
        .rev()
        .find(|round| matches!(round.label.kind(), RoundKind::Sized(_)))
        .and_then(|round| round.matches.first().copied())
    });
    self.losers_final = losers.and_then(|seq| {
      seq
        .rounds
        .iter()
        .rev()
        .find(|round| matches!(round.label.kind(), RoundKind::Losers(_)))
        .and_then(|round| round.matches.first().copied())
    });

    if let (Some(main), Some(losers)) = (main, losers) {
      for (w, round) in main.rounds.iter().enumerate() {
        if !matches!(round.label.kind(), RoundKind::Sized(_)) {
          continue;
        }
        let target_number = if w == 0 { 1 } else { 2 * w as u32 };
        let Some(target_round) = losers_round(losers, target_number) else {
          continue;
        };
        for (position, from) in round.matches.iter().enumerate() {
          let target_idx = if w == 0 { position / 2 } else { position };
          let Some(to) = target_round.matches.get(target_idx).copied() else {
            continue;
          };
          let (side, fallback) = if w == 0 {
            (Side::for_position(position), true)
          } else {
            match self.side_free_of_advance(to) {
              Some(side) => (side, false),
              None => continue,
            }
          };
          self.push(Feed {
            from: *from,
            carry: Carry::Loser,
            to,
            side,
            kind: FeedKind::Drop,
            fallback,
          });
        }
      }
    }

    if let (Some(from), Some(to)) = (self.losers_final, self.grand_final) {
      if let Some(side) = self.side_free_of_advance(to) {
        self.push(Feed {
          from,
          carry: Carry::Winner,
          to,
          side,
          kind: FeedKind::LosersFinal,
          fallback: true,
        });
      }
    }

    if let (Some(from), Some(to)) = (self.grand_final, self.grand_final_reset) {
      for side in Side::BOTH {
        self.push(Feed {
          from,
          carry: Carry::Entrant(side),
          to,
          side,
          kind: FeedKind::Reset,
          fallback: false,
        });
      }
    }
  }

  /// The side of `to` that no winner edge writes, preferring B.
  fn side_free_of_advance(&self, to: MatchId) -> Option<Side> {
    let mut fed = [false; 2];
    for feed in self.feeds_into(to) {
      if feed.kind == FeedKind::Advance {
        fed[feed.side.index()] = true;
      }
    }
    [Side::B, Side::A].into_iter().find(|side| !fed[side.index()])
  }

  pub fn format(&self) -> BracketFormat {
    self.format
  }

  pub fn feeds(&self) -> &[Feed] {
    &self.feeds
  }

  pub fn feeds_from(&self, match_id: MatchId) -> impl Iterator<Item = &Feed> + '_ {
    self
      .outgoing
      .get(&match_id)
      .into_iter()
      .flatten()
      .filter_map(move |idx| self.feeds.get(*idx))
  }

  pub fn feeds_into(&self, match_id: MatchId) -> impl Iterator<Item = &Feed> + '_ {
    self
      .incoming
      .get(&match_id)
      .into_iter()
      .flatten()
      .filter_map(move |idx| self.feeds.get(*idx))
  }

  pub fn feed_from(&self, match_id: MatchId, kind: FeedKind) -> Option<&Feed> {
    self.feeds_from(match_id).find(|feed| feed.kind == kind)
  }

  pub fn grand_final(&self) -> Option<MatchId> {
    self.grand_final
  }

  pub fn grand_final_reset(&self) -> Option<MatchId> {
    self.grand_final_reset
  }

  pub fn winners_final(&self) -> Option<MatchId> {
    self.winners_final
  }

  pub fn losers_final(&self) -> Option<MatchId> {
    self.losers_final
  }

  /// Whether `side` of the match holds an entrant or can still receive one
  /// from a feed that has not resolved yet.
  pub fn side_can_fill(&self, state: &BracketState, match_id: MatchId, side: Side) -> bool {
    let Some(m) = state.get(match_id) else {
      return false;
    };
    if m.is_filled(side) {
      return true;
    }
    self
      .feeds_into(match_id)
      .filter(|feed| feed.side == side || feed.fallback)
      .filter(|feed| !delivered(state, m, feed))
      .any(|feed| self.feed_can_yield(state, feed))
  }

  /// The entrant a resolved feed carries, if its source has produced one.
  pub fn carried_entrant<'a>(&self, state: &'a BracketState, feed: &Feed) -> Option<&'a Entrant> {
    carried_by(state, feed)
  }

  fn feed_can_yield(&self, state: &BracketState, feed: &Feed) -> bool {
    let Some(source) = state.get(feed.from) else {
      return false;
    };
    if source.status == MatchStatus::Cancelled {
      return false;
    }
    match feed.carry {
      Carry::Winner => {
        source.winner.is_some()
          || Side::BOTH
            .into_iter()
            .any(|side| self.side_can_fill(state, source.id, side))
      }
      Carry::Loser => match source.winner {
        Some(winner) => source.is_filled(winner.opposite()) && !is_walkover_score(&source.score),
        None => Side::BOTH
          .into_iter()
          .all(|side| self.side_can_fill(state, source.id, side)),
      },
      Carry::Entrant(_) => source.winner.is_none(),
    }
  }
}

fn carried_by<'a>(state: &'a BracketState, feed: &Feed) -> Option<&'a Entrant> {
  let source = state.get(feed.from)?;
  match feed.carry {
    Carry::Winner => source.winner_entrant(),
    Carry::Loser => source.loser_entrant(),
    Carry::Entrant(side) => source.winner.and(source.side(side)),
  }
}

/// A feed whose entrant already sits in the target has nothing left to give.
fn delivered(state: &BracketState, target: &Match, feed: &Feed) -> bool {
  carried_by(state, feed).map_or(false, |entrant| target.side_of(entrant).is_some())
}

fn first_match_of_kind(sequence: &RoundSequence, kind: RoundKind) -> Option<MatchId> {
  sequence
    .rounds_of_kind(|k| k == kind)
    .next()
    .and_then(|round| round.matches.first().copied())
}

fn losers_round(sequence: &RoundSequence, number: u32) -> Option<&Round> {
  sequence
    .rounds_of_kind(|kind| kind == RoundKind::Losers(number))
    .next()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn seeded(id: MatchId, label: &str, a: Option<u64>, b: Option<u64>) -> Match {
    let mut m = Match::new(id, label);
    m.sides = [a.map(Entrant::Pairing), b.map(Entrant::Pairing)];
    m
  }

  fn four_entrant_double() -> BracketState {
    BracketState::new(vec![
      seeded(1, "A SEMIFINAL", Some(1), Some(4)),
      seeded(2, "A SEMIFINAL", Some(2), Some(3)),
      seeded(3, "A FINAL", None, None),
      seeded(4, "A GF", None, None),
      seeded(5, "A GF2", None, None),
      seeded(6, "B L1", None, None),
      seeded(7, "B L2", None, None),
    ])
  }

  fn edge(graph: &BracketGraph, from: MatchId, kind: FeedKind) -> Option<(MatchId, Side)> {
    graph.feed_from(from, kind).map(|feed| (feed.to, feed.side))
  }

  #[test]
  fn test_double_elimination_edges() {
    let state = four_entrant_double();
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    assert_eq!(edge(&graph, 1, FeedKind::Advance), Some((3, Side::A)));
    assert_eq!(edge(&graph, 1, FeedKind::Drop), Some((6, Side::A)));
    assert_eq!(edge(&graph, 2, FeedKind::Drop), Some((6, Side::B)));
    assert_eq!(edge(&graph, 6, FeedKind::Advance), Some((7, Side::A)));
    assert_eq!(edge(&graph, 3, FeedKind::Drop), Some((7, Side::B)));
    assert_eq!(edge(&graph, 3, FeedKind::Advance), Some((4, Side::A)));
    assert_eq!(edge(&graph, 7, FeedKind::LosersFinal), Some((4, Side::B)));
    assert_eq!(graph.feeds_from(4).filter(|f| f.kind == FeedKind::Reset).count(), 2);
    assert_eq!(edge(&graph, 4, FeedKind::Advance), None);
    assert_eq!(graph.winners_final(), Some(3));
    assert_eq!(graph.losers_final(), Some(7));
  }

  #[test]
  fn test_drop_avoids_side_fed_by_winner() {
    let state = BracketState::new(vec![
      seeded(1, "A R8", Some(1), Some(8)),
      seeded(2, "A R8", Some(4), Some(5)),
      seeded(3, "A R8", Some(3), Some(6)),
      seeded(4, "A R8", Some(2), Some(7)),
      seeded(5, "A SEMIFINAL", None, None),
      seeded(6, "A SEMIFINAL", None, None),
      seeded(7, "B L1", None, None),
      seeded(8, "B L1", None, None),
      seeded(9, "B L2", None, None),
      seeded(10, "B L2", None, None),
    ]);
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    assert_eq!(edge(&graph, 8, FeedKind::Advance), Some((10, Side::B)));
    assert_eq!(edge(&graph, 5, FeedKind::Drop), Some((9, Side::B)));
    assert_eq!(edge(&graph, 6, FeedKind::Drop), Some((10, Side::A)));
    assert_eq!(edge(&graph, 3, FeedKind::Drop), Some((8, Side::A)));
  }

  #[test]
  fn test_consolation_counts_playable_matches() {
    let state = BracketState::new(vec![
      seeded(1, "A R8", Some(1), None),
      seeded(2, "A R8", Some(4), Some(5)),
      seeded(3, "A R8", Some(3), Some(6)),
      seeded(4, "A R8", Some(2), None),
      seeded(5, "A SEMIFINAL", None, None),
      seeded(6, "A SEMIFINAL", None, None),
      seeded(7, "B FINAL", None, None),
    ]);
    let graph = BracketGraph::build(BracketFormat::TwoBrackets, &state);
    assert_eq!(edge(&graph, 1, FeedKind::Drop), None);
    assert_eq!(edge(&graph, 2, FeedKind::Drop), Some((7, Side::A)));
    assert_eq!(edge(&graph, 3, FeedKind::Drop), Some((7, Side::B)));
    assert_eq!(edge(&graph, 5, FeedKind::Drop), None);
  }

  #[test]
  fn test_side_liveness_follows_feeds() {
    let state = BracketState::new(vec![
      seeded(1, "SEMIFINAL", Some(1), None),
      seeded(2, "SEMIFINAL", Some(2), Some(3)),
      seeded(3, "SEMIFINAL", None, None),
      seeded(4, "SEMIFINAL", None, None),
      seeded(5, "FINAL", None, None),
      seeded(6, "FINAL", None, None),
    ]);
    let graph = BracketGraph::build(BracketFormat::SingleElimination, &state);
    assert!(!graph.side_can_fill(&state, 1, Side::B));
    assert!(graph.side_can_fill(&state, 5, Side::B));
    assert!(!graph.side_can_fill(&state, 6, Side::A));
  }

  #[test]
  fn test_delivered_feed_does_not_keep_other_side_alive() {
    let mut state = BracketState::new(vec![
      seeded(1, "A SEMIFINAL", Some(1), Some(4)),
      seeded(2, "A SEMIFINAL", Some(2), None),
      seeded(3, "A FINAL", None, None),
      seeded(4, "B L1", Some(4), None),
      seeded(5, "B L2", None, None),
    ]);
    let graph = BracketGraph::build(BracketFormat::DoubleElimination, &state);
    assert!(graph.side_can_fill(&state, 4, Side::B));

    state.set_result(1, Side::A, serde_json::json!({}), None);
    state.set_result(2, Side::A, serde_json::json!({ "walkover": true }), None);
    let drop = graph.feed_from(1, FeedKind::Drop).copied().unwrap();
    assert_eq!(graph.carried_entrant(&state, &drop), Some(&Entrant::Pairing(4)));
    assert!(!graph.side_can_fill(&state, 4, Side::B));
  }
}
