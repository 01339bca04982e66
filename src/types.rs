use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeSet, fmt, str::FromStr};

use crate::topology::RoundLabel;

// ── Constants ──────────────────────────────────────────────────────────

pub const UNDO_WINDOW_MS: i64 = 60_000;

// ── Identifiers ────────────────────────────────────────────────────────

pub type MatchId = u64;
pub type PairingId = u64;
pub type ParticipantId = u64;

// ── Sides and entrants ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::A, Side::B];

    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// Even positions feed side A, odd positions feed side B.
    pub fn for_position(position: usize) -> Side {
        if position % 2 == 0 {
            Side::A
        } else {
            Side::B
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
        }
    }
}

/// Who occupies one side of a match. Legacy data references a pairing,
/// current data references one or more participants (team-of-N).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Entrant {
    Pairing(PairingId),
    Participants(BTreeSet<ParticipantId>),
}

impl Entrant {
    /// Returns `None` for an empty participant list, which means "unfilled".
    pub fn participants<I>(ids: I) -> Option<Entrant>
    where
        I: IntoIterator<Item = ParticipantId>,
    {
        let ids = ids.into_iter().collect::<BTreeSet<_>>();
        if ids.is_empty() {
            None
        } else {
            Some(Entrant::Participants(ids))
        }
    }

    pub fn pairing_id(&self) -> Option<PairingId> {
        match self {
            Entrant::Pairing(id) => Some(*id),
            Entrant::Participants(_) => None,
        }
    }

    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        match self {
            Entrant::Pairing(_) => Vec::new(),
            Entrant::Participants(ids) => ids.iter().copied().collect(),
        }
    }

    /// Same pairing, or at least one shared participant.
    pub fn overlaps(&self, other: &Entrant) -> bool {
        match (self, other) {
            (Entrant::Pairing(a), Entrant::Pairing(b)) => a == b,
            (Entrant::Participants(a), Entrant::Participants(b)) => !a.is_disjoint(b),
            _ => false,
        }
    }
}

// ── Status and format ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Pending,
    InProgress,
    Done,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BracketFormat {
    SingleElimination,
    /// Main bracket plus a consolation bracket fed by first-round losers.
    TwoBrackets,
    DoubleElimination,
}

impl FromStr for BracketFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "SINGLE_ELIMINATION" | "SINGLE" => Ok(BracketFormat::SingleElimination),
            "TWO_BRACKETS" | "AB" => Ok(BracketFormat::TwoBrackets),
            "DOUBLE_ELIMINATION" | "DOUBLE" => Ok(BracketFormat::DoubleElimination),
            other => Err(format!("Unknown bracket format: {other}")),
        }
    }
}

// ── Match ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Match {
    pub id: MatchId,
    pub round: RoundLabel,
    pub sides: [Option<Entrant>; 2],
    /// The winning entrant is always read from this side, never stored twice.
    pub winner: Option<Side>,
    pub status: MatchStatus,
    pub score: Value,
    pub score_sets: Option<Value>,
}

impl Match {
    pub fn new(id: MatchId, round_label: &str) -> Self {
        Match {
            id,
            round: RoundLabel::parse(round_label),
            sides: [None, None],
            winner: None,
            status: MatchStatus::Pending,
            score: Value::Object(Default::default()),
            score_sets: None,
        }
    }

    pub fn with_side(mut self, side: Side, entrant: Entrant) -> Self {
        self.sides[side.index()] = Some(entrant);
        self
    }

    pub fn side(&self, side: Side) -> Option<&Entrant> {
        self.sides[side.index()].as_ref()
    }

    pub fn is_filled(&self, side: Side) -> bool {
        self.sides[side.index()].is_some()
    }

    pub fn filled_sides(&self) -> usize {
        self.sides.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn winner_entrant(&self) -> Option<&Entrant> {
        self.side(self.winner?)
    }

    pub fn loser_entrant(&self) -> Option<&Entrant> {
        self.side(self.winner?.opposite())
    }

    /// The side currently holding an entrant that overlaps `entrant`.
    pub fn side_of(&self, entrant: &Entrant) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|side| self.side(*side).map_or(false, |held| held.overlaps(entrant)))
    }
}

// ── Results ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub match_id: MatchId,
    pub winner: Side,
    #[serde(default)]
    pub score: Value,
    #[serde(default)]
    pub score_sets: Option<Value>,
}

/// A slot written (or cleared) by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRef {
    pub match_id: MatchId,
    pub side: Side,
}

// ── Config types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub format: BracketFormat,
    pub allow_grand_final_reset: bool,
    pub walkover_sets_to_win: u8,
    pub walkover_set_games: u8,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            format: BracketFormat::SingleElimination,
            allow_grand_final_reset: true,
            walkover_sets_to_win: 2,
            walkover_set_games: 6,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Relative paths resolve against the working directory.
    pub dir: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            filter: "info".to_string(),
        }
    }
}
