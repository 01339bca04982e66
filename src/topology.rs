use serde::Serialize;
use std::{
  cmp::Ordering,
  collections::{BTreeMap, HashMap},
  fmt,
};

use crate::types::{Match, MatchId, Side};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BracketId {
  /// Labels prefixed `"A "` or carrying no prefix.
  Main,
  /// Labels prefixed `"B "`.
  Losers,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoundKind {
  /// Entrants still alive entering the round (`R16`, `QUARTERFINAL` = 8, `FINAL` = 2).
  Sized(u32),
  /// Sequential losers-bracket round `L<n>`.
  Losers(u32),
  GrandFinal,
  GrandFinalReset,
  Other,
}

impl RoundKind {
  pub fn order_key(self) -> i64 {
    match self {
      RoundKind::Losers(n) => n as i64,
      RoundKind::GrandFinalReset => i64::MAX,
      RoundKind::GrandFinal | RoundKind::Other => i64::MAX - 1,
      RoundKind::Sized(size) => -(size as i64),
    }
  }

  pub fn is_grand_final(self) -> bool {
    matches!(self, RoundKind::GrandFinal | RoundKind::GrandFinalReset)
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoundLabel {
  raw: String,
  bracket: BracketId,
  kind: RoundKind,
}

impl RoundLabel {
  pub fn parse(raw: &str) -> Self {
    let trimmed = raw.trim();
    let (bracket, base) = if let Some(rest) = trimmed.strip_prefix("A ") {
      (BracketId::Main, rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("B ") {
      (BracketId::Losers, rest.trim())
    } else {
      (BracketId::Main, trimmed)
    };
    RoundLabel {
      raw: trimmed.to_string(),
      bracket,
      kind: parse_base_token(base),
    }
  }

  pub fn raw(&self) -> &str {
    &self.raw
  }

  pub fn bracket(&self) -> BracketId {
    self.bracket
  }

  pub fn kind(&self) -> RoundKind {
    self.kind
  }

  pub fn order_key(&self) -> i64 {
    self.kind.order_key()
  }
}

impl Ord for RoundLabel {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .order_key()
      .cmp(&other.order_key())
      .then_with(|| self.raw.cmp(&other.raw))
  }
}

impl PartialOrd for RoundLabel {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl fmt::Display for RoundLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

fn parse_base_token(base: &str) -> RoundKind {
  let upper = base.to_ascii_uppercase();
  match upper.as_str() {
    "GF" | "GRAND_FINAL" | "GRAND FINAL" => RoundKind::GrandFinal,
    "GF2" | "GRAND_FINAL_RESET" | "GRAND FINAL 2" => RoundKind::GrandFinalReset,
    "QUARTERFINAL" => RoundKind::Sized(8),
    "SEMIFINAL" => RoundKind::Sized(4),
    "FINAL" => RoundKind::Sized(2),
    _ => {
      if let Some(size) = numbered_token(&upper, 'R') {
        RoundKind::Sized(size)
      } else if let Some(index) = numbered_token(&upper, 'L') {
        RoundKind::Losers(index)
      } else {
        RoundKind::Other
      }
    }
  }
}

fn numbered_token(token: &str, prefix: char) -> Option<u32> {
  let rest = token.strip_prefix(prefix)?;
  if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  rest.parse().ok()
}

#[derive(Clone, Debug)]
pub struct Round {
  pub label: RoundLabel,
  /// Generation order (ascending id).
  pub matches: Vec<MatchId>,
}

#[derive(Clone, Debug)]
pub struct RoundSequence {
  pub bracket: BracketId,
  pub rounds: Vec<Round>,
}

impl RoundSequence {
  pub fn labels(&self) -> Vec<&str> {
    self.rounds.iter().map(|round| round.label.raw()).collect()
  }

  pub fn first(&self) -> Option<&Round> {
    self.rounds.first()
  }

  pub fn last(&self) -> Option<&Round> {
    self.rounds.last()
  }

  pub fn round_of(&self, match_id: MatchId) -> Option<(usize, usize)> {
    self.rounds.iter().enumerate().find_map(|(round_idx, round)| {
      round
        .matches
        .iter()
        .position(|id| *id == match_id)
        .map(|position| (round_idx, position))
    })
  }

  /// Where the winner of the match at `(round_idx, position)` goes inside this bracket.
  /// Grand-final rounds never feed forward here.
  pub fn winner_slot_at(&self, round_idx: usize, position: usize) -> Option<(MatchId, Side)> {
    let current = self.rounds.get(round_idx)?;
    if current.label.kind().is_grand_final() {
      return None;
    }
    let next = self.rounds.get(round_idx + 1)?;
    let target_idx = if next.matches.len() == current.matches.len() {
      position
    } else {
      position / 2
    };
    let target = *next.matches.get(target_idx)?;
    Some((target, Side::for_position(position)))
  }

  pub fn rounds_of_kind<F>(&self, predicate: F) -> impl Iterator<Item = &Round>
  where
    F: Fn(RoundKind) -> bool,
  {
    self.rounds.iter().filter(move |round| predicate(round.label.kind()))
  }
}

/// Partitions matches by bracket and orders each bracket's distinct labels
/// from the largest round to the terminal one.
pub fn group_by_bracket<'a, I>(matches: I) -> BTreeMap<BracketId, RoundSequence>
where
  I: IntoIterator<Item = &'a Match>,
{
  let mut grouped: BTreeMap<BracketId, BTreeMap<RoundLabel, Vec<MatchId>>> = BTreeMap::new();
  for m in matches {
    grouped
      .entry(m.round.bracket())
      .or_default()
      .entry(m.round.clone())
      .or_default()
      .push(m.id);
  }
  grouped
    .into_iter()
    .map(|(bracket, rounds)| {
      let rounds = rounds
        .into_iter()
        .map(|(label, mut ids)| {
          ids.sort_unstable();
          Round { label, matches: ids }
        })
        .collect();
      (bracket, RoundSequence { bracket, rounds })
    })
    .collect()
}

#[derive(Clone, Debug)]
pub struct Topology {
  sequences: BTreeMap<BracketId, RoundSequence>,
  positions: HashMap<MatchId, (BracketId, usize, usize)>,
}

impl Topology {
  pub fn build<'a, I>(matches: I) -> Self
  where
    I: IntoIterator<Item = &'a Match>,
  {
    let sequences = group_by_bracket(matches);
    let mut positions = HashMap::new();
    for sequence in sequences.values() {
      for (round_idx, round) in sequence.rounds.iter().enumerate() {
        for (position, id) in round.matches.iter().enumerate() {
          positions.insert(*id, (sequence.bracket, round_idx, position));
        }
      }
    }
    Topology { sequences, positions }
  }

  pub fn sequence(&self, bracket: BracketId) -> Option<&RoundSequence> {
    self.sequences.get(&bracket)
  }

  pub fn sequences(&self) -> impl Iterator<Item = &RoundSequence> {
    self.sequences.values()
  }

  pub fn locate(&self, match_id: MatchId) -> Option<(BracketId, usize, usize)> {
    self.positions.get(&match_id).copied()
  }

  pub fn round(&self, match_id: MatchId) -> Option<&Round> {
    let (bracket, round_idx, _) = self.locate(match_id)?;
    self.sequence(bracket)?.rounds.get(round_idx)
  }

  pub fn winner_slot(&self, match_id: MatchId) -> Option<(MatchId, Side)> {
    let (bracket, round_idx, position) = self.locate(match_id)?;
    self.sequence(bracket)?.winner_slot_at(round_idx, position)
  }

  pub fn is_first_round(&self, match_id: MatchId) -> bool {
    matches!(self.locate(match_id), Some((_, 0, _)))
  }
}
