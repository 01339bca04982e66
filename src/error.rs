use thiserror::Error;

use crate::types::MatchId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("match {match_id} cannot be undone: match {blocking} already consumed its result")]
    DownstreamLocked { match_id: MatchId, blocking: MatchId },

    #[error("undo window for match {match_id} elapsed ({elapsed_ms} ms since the result)")]
    UndoExpired { match_id: MatchId, elapsed_ms: i64 },

    #[error("no undoable result recorded for match {0}")]
    UndoNotFound(MatchId),

    #[error("cannot undo match {match_id}: {reason}")]
    UndoInvalid { match_id: MatchId, reason: String },

    #[error("match {0} not found")]
    MatchNotFound(MatchId),

    #[error("match {match_id} cannot take a result: {reason}")]
    MatchNotPlayable { match_id: MatchId, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::DownstreamLocked { .. } => "DOWNSTREAM_LOCKED",
            EngineError::UndoExpired { .. } => "UNDO_EXPIRED",
            EngineError::UndoNotFound(_) => "UNDO_NOT_FOUND",
            EngineError::UndoInvalid { .. } => "UNDO_INVALID",
            EngineError::MatchNotFound(_) => "MATCH_NOT_FOUND",
            EngineError::MatchNotPlayable { .. } => "MATCH_NOT_PLAYABLE",
            EngineError::Store(_) => "STORE_ERROR",
            EngineError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Only a downstream lock can clear up, once the dependent match is undone first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::DownstreamLocked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_retry() {
        let locked = EngineError::DownstreamLocked { match_id: 1, blocking: 5 };
        assert_eq!(locked.code(), "DOWNSTREAM_LOCKED");
        assert!(locked.is_retryable());

        let expired = EngineError::UndoExpired { match_id: 1, elapsed_ms: 60_001 };
        assert_eq!(expired.code(), "UNDO_EXPIRED");
        assert!(!expired.is_retryable());
        assert_eq!(EngineError::UndoNotFound(3).code(), "UNDO_NOT_FOUND");
        assert!(locked.to_string().contains("match 5"));
    }
}
