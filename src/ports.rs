use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

use crate::error::EngineError;
use crate::types::{Entrant, Match, MatchId, MatchStatus, PairingId, ParticipantId, Side};

// ── Persistence records ────────────────────────────────────────────────

/// A match as persisted. Winner identity is dual-written (pairing and
/// participants) plus the side; `to_match` collapses it into one side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: MatchId,
    #[serde(default)]
    pub round_label: String,
    #[serde(default)]
    pub pairing_a_id: Option<PairingId>,
    #[serde(default)]
    pub pairing_b_id: Option<PairingId>,
    #[serde(default)]
    pub side_a_participant_ids: Vec<ParticipantId>,
    #[serde(default)]
    pub side_b_participant_ids: Vec<ParticipantId>,
    #[serde(default)]
    pub winner_pairing_id: Option<PairingId>,
    #[serde(default)]
    pub winner_participant_id: Option<ParticipantId>,
    #[serde(default)]
    pub winner_participant_ids: Vec<ParticipantId>,
    #[serde(default)]
    pub winner_side: Option<Side>,
    pub status: MatchStatus,
    #[serde(default)]
    pub score: Value,
    #[serde(default)]
    pub score_sets: Option<Value>,
}

impl MatchRecord {
    pub fn from_match(m: &Match) -> Self {
        let mut record = MatchRecord {
            id: m.id,
            round_label: m.round.raw().to_string(),
            pairing_a_id: None,
            pairing_b_id: None,
            side_a_participant_ids: Vec::new(),
            side_b_participant_ids: Vec::new(),
            winner_pairing_id: None,
            winner_participant_id: None,
            winner_participant_ids: Vec::new(),
            winner_side: None,
            status: m.status,
            score: m.score.clone(),
            score_sets: m.score_sets.clone(),
        };
        for side in Side::BOTH {
            record.write_side(side, &SideWrite::from_entrant(m.side(side)));
        }
        record.write_winner(&WinnerWrite::from_side(m.winner, m.winner_entrant()));
        record
    }

    pub fn side_entrant(&self, side: Side) -> Option<Entrant> {
        let (pairing, participants) = match side {
            Side::A => (self.pairing_a_id, &self.side_a_participant_ids),
            Side::B => (self.pairing_b_id, &self.side_b_participant_ids),
        };
        Entrant::participants(participants.iter().copied()).or_else(|| pairing.map(Entrant::Pairing))
    }

    /// The side the dual-written winner fields point at, if they agree with a filled side.
    pub fn resolved_winner_side(&self) -> Option<Side> {
        if let Some(side) = self.winner_side {
            if self.side_entrant(side).is_some() {
                return Some(side);
            }
        }
        let claimed = legacy_winner_entrant(
            self.winner_pairing_id,
            self.winner_participant_id,
            &self.winner_participant_ids,
        )?;
        Side::BOTH.into_iter().find(|side| {
            if let Some(entrant) = self.side_entrant(*side) {
                if entrant.overlaps(&claimed) {
                    return true;
                }
            }
            let pairing = match side {
                Side::A => self.pairing_a_id,
                Side::B => self.pairing_b_id,
            };
            pairing.is_some() && pairing == claimed.pairing_id()
        })
    }

    pub fn to_match(&self) -> Match {
        let mut m = Match::new(self.id, &self.round_label);
        m.sides = [self.side_entrant(Side::A), self.side_entrant(Side::B)];
        m.winner = self.resolved_winner_side();
        if m.winner.is_none() && self.has_winner_fields() {
            tracing::warn!(match_id = self.id, "winner fields do not match either side; ignoring them");
        }
        m.status = self.status;
        m.score = self.score.clone();
        m.score_sets = self.score_sets.clone();
        m
    }

    fn has_winner_fields(&self) -> bool {
        self.winner_side.is_some()
            || self.winner_pairing_id.is_some()
            || self.winner_participant_id.is_some()
            || !self.winner_participant_ids.is_empty()
    }

    fn write_side(&mut self, side: Side, write: &SideWrite) {
        match side {
            Side::A => {
                self.pairing_a_id = write.pairing_id;
                self.side_a_participant_ids = write.participant_ids.clone();
            }
            Side::B => {
                self.pairing_b_id = write.pairing_id;
                self.side_b_participant_ids = write.participant_ids.clone();
            }
        }
    }

    fn write_winner(&mut self, write: &WinnerWrite) {
        self.winner_side = write.side;
        self.winner_pairing_id = write.pairing_id;
        self.winner_participant_id = write.participant_id;
        self.winner_participant_ids = write.participant_ids.clone();
    }

    pub fn apply(&mut self, patch: &MatchPatch) {
        if let Some(write) = &patch.side_a {
            self.write_side(Side::A, write);
        }
        if let Some(write) = &patch.side_b {
            self.write_side(Side::B, write);
        }
        if let Some(write) = &patch.winner {
            self.write_winner(write);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(score) = &patch.score {
            self.score = score.clone();
        }
        if let Some(score_sets) = &patch.score_sets {
            self.score_sets = if score_sets.is_null() { None } else { Some(score_sets.clone()) };
        }
    }
}

fn legacy_winner_entrant(
    pairing_id: Option<PairingId>,
    participant_id: Option<ParticipantId>,
    participant_ids: &[ParticipantId],
) -> Option<Entrant> {
    Entrant::participants(participant_ids.iter().copied())
        .or_else(|| participant_id.and_then(|id| Entrant::participants([id])))
        .or_else(|| pairing_id.map(Entrant::Pairing))
}

// ── Patches ────────────────────────────────────────────────────────────

/// Full replacement of one side. An empty write clears the side.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideWrite {
    pub pairing_id: Option<PairingId>,
    pub participant_ids: Vec<ParticipantId>,
}

impl SideWrite {
    pub fn from_entrant(entrant: Option<&Entrant>) -> Self {
        match entrant {
            Some(Entrant::Pairing(id)) => SideWrite {
                pairing_id: Some(*id),
                participant_ids: Vec::new(),
            },
            Some(Entrant::Participants(ids)) => SideWrite {
                pairing_id: None,
                participant_ids: ids.iter().copied().collect(),
            },
            None => SideWrite::default(),
        }
    }
}

/// All legacy winner fields written together so they cannot drift.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerWrite {
    pub side: Option<Side>,
    pub pairing_id: Option<PairingId>,
    pub participant_id: Option<ParticipantId>,
    pub participant_ids: Vec<ParticipantId>,
}

impl WinnerWrite {
    pub fn from_side(side: Option<Side>, entrant: Option<&Entrant>) -> Self {
        let (Some(side), Some(entrant)) = (side, entrant) else {
            return WinnerWrite::default();
        };
        let participant_ids = entrant.participant_ids();
        WinnerWrite {
            side: Some(side),
            pairing_id: entrant.pairing_id(),
            participant_id: participant_ids.first().copied(),
            participant_ids,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPatch {
    pub match_id: MatchId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_a: Option<SideWrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_b: Option<SideWrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<WinnerWrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MatchStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Value>,
    /// `Some(Value::Null)` clears the stored sets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_sets: Option<Value>,
}

impl MatchPatch {
    pub fn new(match_id: MatchId) -> Self {
        MatchPatch {
            match_id,
            ..MatchPatch::default()
        }
    }

    pub fn set_side(&mut self, side: Side, write: SideWrite) {
        match side {
            Side::A => self.side_a = Some(write),
            Side::B => self.side_b = Some(write),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.side_a.is_none()
            && self.side_b.is_none()
            && self.winner.is_none()
            && self.status.is_none()
            && self.score.is_none()
            && self.score_sets.is_none()
    }
}

// ── Audit trail records ────────────────────────────────────────────────

/// Mutable result fields of a match at one point in time. Every field is
/// optional so that entries written before a field existed still load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    #[serde(default)]
    pub status: Option<MatchStatus>,
    #[serde(default)]
    pub winner_side: Option<Side>,
    #[serde(default)]
    pub winner_pairing_id: Option<PairingId>,
    #[serde(default)]
    pub winner_participant_id: Option<ParticipantId>,
    #[serde(default)]
    pub winner_participant_ids: Vec<ParticipantId>,
    #[serde(default)]
    pub score: Option<Value>,
    #[serde(default)]
    pub score_sets: Option<Value>,
}

impl MatchSnapshot {
    pub fn of(m: &Match) -> Self {
        let winner = WinnerWrite::from_side(m.winner, m.winner_entrant());
        MatchSnapshot {
            status: Some(m.status),
            winner_side: winner.side,
            winner_pairing_id: winner.pairing_id,
            winner_participant_id: winner.participant_id,
            winner_participant_ids: winner.participant_ids,
            score: Some(m.score.clone()),
            score_sets: m.score_sets.clone(),
        }
    }

    pub fn winner_entrant(&self) -> Option<Entrant> {
        legacy_winner_entrant(
            self.winner_pairing_id,
            self.winner_participant_id,
            &self.winner_participant_ids,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// A result was recorded for the match.
    Result,
    /// A previously recorded result was reverted.
    Undo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Assigned by the trail on append.
    #[serde(default)]
    pub id: u64,
    pub match_id: MatchId,
    pub action: AuditAction,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub before: Option<MatchSnapshot>,
    #[serde(default)]
    pub after: Option<MatchSnapshot>,
    #[serde(default)]
    pub source_entry_id: Option<u64>,
}

// ── Ports ──────────────────────────────────────────────────────────────

pub trait MatchStore {
    /// Applies every patch or none of them and returns the refreshed
    /// records in patch order.
    fn apply_batch(&mut self, patches: &[MatchPatch]) -> Result<Vec<MatchRecord>, EngineError>;
}

pub trait AuditTrail {
    /// Entries for `match_id` whose action is one of `actions`, newest first.
    fn entries(&self, match_id: MatchId, actions: &[AuditAction]) -> Vec<AuditEntry>;

    fn append(&mut self, entry: AuditEntry) -> Result<AuditEntry, EngineError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct WalkoverScore {
    pub score: Value,
    pub score_sets: Option<Value>,
}

pub trait ScoreRules {
    fn walkover(&self, winner: Side) -> WalkoverScore;
}

pub fn is_walkover_score(score: &Value) -> bool {
    score.get("walkover").and_then(Value::as_bool) == Some(true)
        || score.get("resultType").and_then(Value::as_str) == Some("WALKOVER")
}

// ── In-memory implementations ──────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: BTreeMap<MatchId, MatchRecord>,
    rejected: HashSet<MatchId>,
    batches_applied: usize,
}

impl MemoryStore {
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = MatchRecord>,
    {
        MemoryStore {
            records: records.into_iter().map(|record| (record.id, record)).collect(),
            ..MemoryStore::default()
        }
    }

    pub fn from_matches(matches: &[Match]) -> Self {
        MemoryStore::new(matches.iter().map(MatchRecord::from_match))
    }

    pub fn records(&self) -> Vec<MatchRecord> {
        self.records.values().cloned().collect()
    }

    pub fn get(&self, match_id: MatchId) -> Option<&MatchRecord> {
        self.records.get(&match_id)
    }

    pub fn get_match(&self, match_id: MatchId) -> Option<Match> {
        self.get(match_id).map(MatchRecord::to_match)
    }

    /// Any batch touching `match_id` fails as a whole.
    pub fn reject_writes_to(&mut self, match_id: MatchId) {
        self.rejected.insert(match_id);
    }

    pub fn batches_applied(&self) -> usize {
        self.batches_applied
    }
}

impl MatchStore for MemoryStore {
    fn apply_batch(&mut self, patches: &[MatchPatch]) -> Result<Vec<MatchRecord>, EngineError> {
        for patch in patches {
            if !self.records.contains_key(&patch.match_id) {
                return Err(EngineError::Store(format!("match {} not found", patch.match_id)));
            }
            if self.rejected.contains(&patch.match_id) {
                return Err(EngineError::Store(format!("write to match {} rejected", patch.match_id)));
            }
        }
        let mut refreshed = Vec::with_capacity(patches.len());
        for patch in patches {
            if let Some(record) = self.records.get_mut(&patch.match_id) {
                record.apply(patch);
                refreshed.push(record.clone());
            }
        }
        self.batches_applied += 1;
        Ok(refreshed)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryAuditLog {
    entries: Vec<AuditEntry>,
    next_id: u64,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        MemoryAuditLog::default()
    }

    pub fn all(&self) -> &[AuditEntry] {
        &self.entries
    }
}

impl AuditTrail for MemoryAuditLog {
    fn entries(&self, match_id: MatchId, actions: &[AuditAction]) -> Vec<AuditEntry> {
        let mut out = self
            .entries
            .iter()
            .filter(|entry| entry.match_id == match_id && actions.contains(&entry.action))
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then_with(|| b.id.cmp(&a.id)));
        out
    }

    fn append(&mut self, mut entry: AuditEntry) -> Result<AuditEntry, EngineError> {
        self.next_id += 1;
        entry.id = self.next_id;
        self.entries.push(entry.clone());
        Ok(entry)
    }
}

/// Walkover scoreline of `sets_to_win` sets won `set_games`-0.
#[derive(Clone, Copy, Debug)]
pub struct SetWalkoverRules {
    pub sets_to_win: u8,
    pub set_games: u8,
}

impl Default for SetWalkoverRules {
    fn default() -> Self {
        SetWalkoverRules {
            sets_to_win: 2,
            set_games: 6,
        }
    }
}

impl ScoreRules for SetWalkoverRules {
    fn walkover(&self, winner: Side) -> WalkoverScore {
        let sets = (0..self.sets_to_win.max(1))
            .map(|_| match winner {
                Side::A => json!({ "teamA": self.set_games, "teamB": 0 }),
                Side::B => json!({ "teamA": 0, "teamB": self.set_games }),
            })
            .collect::<Vec<_>>();
        WalkoverScore {
            score: json!({
                "resultType": "WALKOVER",
                "walkover": true,
                "winnerSide": winner,
                "sets": sets,
            }),
            score_sets: Some(Value::Array(sets)),
        }
    }
}
