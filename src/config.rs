use crate::error::EngineError;
use crate::ports::SetWalkoverRules;
use crate::types::*;
use std::{
  env,
  fs,
  path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_FILE: &str = "knockout.json";

pub fn config_path() -> PathBuf {
  match env_default("KNOCKOUT_CONFIG_PATH") {
    Some(raw) => PathBuf::from(raw),
    None => PathBuf::from(DEFAULT_CONFIG_FILE),
  }
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

pub fn env_flag_true_default(key: &str, default: bool) -> bool {
  match env::var(key) {
    Ok(value) => {
      let value = value.trim().to_ascii_lowercase();
      matches!(value.as_str(), "1" | "true" | "yes" | "on")
    }
    Err(_) => default,
  }
}

pub fn apply_env_defaults(mut config: EngineConfig) -> EngineConfig {
  if let Some(value) = env_default("KNOCKOUT_FORMAT") {
    match value.parse::<BracketFormat>() {
      Ok(format) => config.format = format,
      Err(e) => tracing::warn!("KNOCKOUT_FORMAT ignored: {e}"),
    }
  }
  config.allow_grand_final_reset = env_flag_true_default("KNOCKOUT_ALLOW_GF_RESET", config.allow_grand_final_reset);
  if let Some(value) = env_default("KNOCKOUT_LOG_DIR") {
    config.logging.dir = value;
  }
  if let Some(value) = env_default("KNOCKOUT_LOG_FILTER") {
    config.logging.filter = value;
  }
  config
}

pub fn load_config() -> Result<EngineConfig, EngineError> {
  load_config_from(&config_path())
}

/// A missing file yields the defaults; environment overrides apply either way.
pub fn load_config_from(path: &Path) -> Result<EngineConfig, EngineError> {
  if !path.is_file() {
    return Ok(apply_env_defaults(EngineConfig::default()));
  }
  let data = fs::read_to_string(path)
    .map_err(|e| EngineError::Config(format!("read config {}: {e}", path.display())))?;
  let config = serde_json::from_str::<EngineConfig>(&data)
    .map_err(|e| EngineError::Config(format!("parse config {}: {e}", path.display())))?;
  Ok(apply_env_defaults(config))
}

pub fn save_config_to(path: &Path, config: &EngineConfig) -> Result<(), EngineError> {
  let payload = serde_json::to_string_pretty(config).map_err(|e| EngineError::Config(e.to_string()))?;
  fs::write(path, payload).map_err(|e| EngineError::Config(format!("write config {}: {e}", path.display())))
}

pub fn resolve_log_dir(logging: &LoggingConfig) -> PathBuf {
  let trimmed = logging.dir.trim();
  if trimmed.is_empty() {
    return PathBuf::from(LoggingConfig::default().dir);
  }
  PathBuf::from(trimmed)
}

impl EngineConfig {
  pub fn walkover_rules(&self) -> SetWalkoverRules {
    SetWalkoverRules {
      sets_to_win: self.walkover_sets_to_win,
      set_games: self.walkover_set_games,
    }
  }
}
