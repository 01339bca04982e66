use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::EngineError;
use crate::ports::{MatchPatch, MatchRecord, MatchStore, SideWrite, WalkoverScore, WinnerWrite};
use crate::topology::Topology;
use crate::types::{Entrant, Match, MatchId, MatchStatus, Side};

/// Fields touched since the last commit.
#[derive(Clone, Copy, Debug, Default)]
struct Dirty {
  sides: [bool; 2],
  winner: bool,
  status: bool,
  score: bool,
}

/// In-memory view of one tournament category for a single call. Every
/// mutation is journaled and flushed through `commit` in one batch.
#[derive(Clone, Debug)]
pub struct BracketState {
  matches: Vec<Match>,
  match_index: HashMap<MatchId, usize>,
  topology: Topology,
  journal: BTreeMap<MatchId, Dirty>,
}

impl BracketState {
  pub fn new(mut matches: Vec<Match>) -> Self {
    matches.sort_by_key(|m| m.id);
    matches.dedup_by_key(|m| m.id);
    let match_index = matches
      .iter()
      .enumerate()
      .map(|(idx, m)| (m.id, idx))
      .collect::<HashMap<_, _>>();
    let topology = Topology::build(&matches);
    BracketState {
      matches,
      match_index,
      topology,
      journal: BTreeMap::new(),
    }
  }

  pub fn from_records(records: &[MatchRecord]) -> Self {
    BracketState::new(records.iter().map(MatchRecord::to_match).collect())
  }

  pub fn get(&self, match_id: MatchId) -> Option<&Match> {
    self.match_index.get(&match_id).and_then(|idx| self.matches.get(*idx))
  }

  pub fn matches(&self) -> &[Match] {
    &self.matches
  }

  pub fn topology(&self) -> &Topology {
    &self.topology
  }

  pub fn contains(&self, match_id: MatchId) -> bool {
    self.match_index.contains_key(&match_id)
  }

  fn get_mut(&mut self, match_id: MatchId) -> Option<(&mut Match, &mut Dirty)> {
    let idx = *self.match_index.get(&match_id)?;
    let dirty = self.journal.entry(match_id).or_default();
    Some((&mut self.matches[idx], dirty))
  }

  /// Writes `entrant` into an unfilled side. An already filled side is
  /// never overwritten, so the first writer wins.
  pub fn fill_side(&mut self, match_id: MatchId, side: Side, entrant: &Entrant) -> bool {
    match self.get(match_id) {
      Some(m) if !m.is_filled(side) => {}
      _ => return false,
    }
    let Some((m, dirty)) = self.get_mut(match_id) else {
      return false;
    };
    m.sides[side.index()] = Some(entrant.clone());
    dirty.sides[side.index()] = true;
    true
  }

  /// Replaces whatever a side holds. Only the grand-final reset uses this,
  /// since the reset decider mirrors the grand final exactly.
  pub fn overwrite_side(&mut self, match_id: MatchId, side: Side, entrant: Option<&Entrant>) -> bool {
    let Some((m, dirty)) = self.get_mut(match_id) else {
      return false;
    };
    if m.side(side) == entrant {
      return false;
    }
    m.sides[side.index()] = entrant.cloned();
    dirty.sides[side.index()] = true;
    true
  }

  pub fn clear_side(&mut self, match_id: MatchId, side: Side) -> bool {
    let Some((m, dirty)) = self.get_mut(match_id) else {
      return false;
    };
    if !m.is_filled(side) {
      return false;
    }
    m.sides[side.index()] = None;
    dirty.sides[side.index()] = true;
    if m.winner == Some(side) {
      m.winner = None;
      dirty.winner = true;
    }
    true
  }

  pub fn clear_winner(&mut self, match_id: MatchId) {
    if let Some((m, dirty)) = self.get_mut(match_id) {
      if m.winner.is_some() {
        m.winner = None;
        dirty.winner = true;
      }
    }
  }

  pub fn set_status(&mut self, match_id: MatchId, status: MatchStatus) {
    if let Some((m, dirty)) = self.get_mut(match_id) {
      if m.status != status {
        m.status = status;
        dirty.status = true;
      }
    }
  }

  /// Marks the match `DONE` with `winner` and the given score payload.
  pub fn set_result(&mut self, match_id: MatchId, winner: Side, score: Value, score_sets: Option<Value>) {
    if let Some((m, dirty)) = self.get_mut(match_id) {
      m.winner = Some(winner);
      m.status = MatchStatus::Done;
      m.score = score;
      m.score_sets = score_sets;
      dirty.winner = true;
      dirty.status = true;
      dirty.score = true;
    }
  }

  pub fn declare_walkover(&mut self, match_id: MatchId, winner: Side, walkover: WalkoverScore) {
    self.set_result(match_id, winner, walkover.score, walkover.score_sets);
  }

  /// Puts back result fields captured before a result was recorded.
  pub fn restore(
    &mut self,
    match_id: MatchId,
    status: MatchStatus,
    winner: Option<Side>,
    score: Value,
    score_sets: Option<Value>,
  ) {
    if let Some((m, dirty)) = self.get_mut(match_id) {
      m.status = status;
      m.winner = winner;
      m.score = score;
      m.score_sets = score_sets;
      dirty.winner = true;
      dirty.status = true;
      dirty.score = true;
    }
  }

  /// Back to `PENDING` with no winner, an empty score and no score sets.
  pub fn reopen(&mut self, match_id: MatchId) {
    self.restore(match_id, MatchStatus::Pending, None, Value::Object(Default::default()), None);
  }

  pub fn is_dirty(&self) -> bool {
    !self.journal.is_empty()
  }

  pub fn pending_patches(&self) -> Vec<MatchPatch> {
    let mut patches = Vec::with_capacity(self.journal.len());
    for (match_id, dirty) in &self.journal {
      let Some(m) = self.get(*match_id) else {
        continue;
      };
      let mut patch = MatchPatch::new(*match_id);
      for side in Side::BOTH {
        if dirty.sides[side.index()] {
          patch.set_side(side, SideWrite::from_entrant(m.side(side)));
        }
      }
      if dirty.winner || dirty.sides.iter().any(|touched| *touched) {
        patch.winner = Some(WinnerWrite::from_side(m.winner, m.winner_entrant()));
      }
      if dirty.status {
        patch.status = Some(m.status);
      }
      if dirty.score {
        patch.score = Some(m.score.clone());
        patch.score_sets = Some(m.score_sets.clone().unwrap_or(Value::Null));
      }
      if !patch.is_empty() {
        patches.push(patch);
      }
    }
    patches
  }

  /// Flushes the journal in one batch and refreshes the view from what the
  /// store returned. On error nothing is cleared, the store kept nothing.
  pub fn commit<S: MatchStore + ?Sized>(&mut self, store: &mut S) -> Result<Vec<MatchRecord>, EngineError> {
    let patches = self.pending_patches();
    if patches.is_empty() {
      self.journal.clear();
      return Ok(Vec::new());
    }
    let refreshed = store.apply_batch(&patches)?;
    for record in &refreshed {
      if let Some(idx) = self.match_index.get(&record.id).copied() {
        self.matches[idx] = record.to_match();
      }
    }
    tracing::debug!(patches = patches.len(), "committed bracket changes");
    self.journal.clear();
    Ok(refreshed)
  }
}
