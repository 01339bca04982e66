pub mod types;
pub mod error;
pub mod topology;
pub mod ports;
pub mod bracket;
pub mod graph;
pub mod advance;
pub mod byes;
pub mod routing;
pub mod undo;
pub mod config;
pub mod engine;

pub use advance::advance;
pub use bracket::BracketState;
pub use byes::resolve_byes;
pub use engine::{Engine, ResultOutcome};
pub use error::EngineError;
pub use graph::{BracketGraph, Carry, Feed, FeedKind};
pub use ports::{
    AuditAction, AuditEntry, AuditTrail, MatchPatch, MatchRecord, MatchSnapshot, MatchStore,
    MemoryAuditLog, MemoryStore, ScoreRules, SetWalkoverRules, WalkoverScore,
};
pub use routing::route;
pub use topology::{group_by_bracket, BracketId, RoundKind, RoundLabel, RoundSequence, Topology};
pub use types::*;
pub use undo::{undo, UndoOutcome};

use std::fs;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

// ── Logging ────────────────────────────────────────────────────────────

/// Installs the file logger. Keep the returned guard alive for as long as
/// logs should be flushed. A second call leaves the first subscriber in place.
pub fn init_logging(logging: &LoggingConfig) -> Result<WorkerGuard, EngineError> {
    let logs_dir = config::resolve_log_dir(logging);
    fs::create_dir_all(&logs_dir)
        .map_err(|e| EngineError::Config(format!("create log dir {}: {e}", logs_dir.display())))?;
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "knockout.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .try_init()
        .is_ok();
    if installed {
        info!(dir = %logs_dir.display(), "knockout progression logging started");
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_creates_dir_and_tolerates_reinit() {
        let dir = tempfile::tempdir().unwrap();
        let logging = LoggingConfig {
            dir: dir.path().join("logs").to_string_lossy().to_string(),
            filter: "debug".to_string(),
        };
        let _first = init_logging(&logging).unwrap();
        let _second = init_logging(&logging).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }
}
