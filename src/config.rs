//! Configuration management for pairpad
//!
//! Stores settings in <config_dir>/pairpad/config.json. The API key never
//! lives in this file: it comes from the environment or the system keychain.

use crate::keyring;
use crate::llm::client::OPENROUTER_URL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variables checked for a credential, in order.
const API_KEY_ENV_VARS: [&str; 2] = ["PAIRPAD_API_KEY", "OPENROUTER_API_KEY"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat-completions endpoint
    pub api_base_url: String,
    /// Use this model id for every call instead of the per-purpose tiers
    pub model_override: Option<String>,
    pub analysis: AnalysisSettings,
    pub voice: VoiceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Units per model request
    pub batch_size: usize,
    /// Quiet period after the last edit before a full re-analysis
    pub debounce_ms: u64,
    /// Accumulated changed lines that refresh the preview panel
    pub preview_threshold: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Transcripts matching one of these (case-insensitively) end the session
    pub exit_phrases: Vec<String>,
    /// Cap on conversation history length; 0 keeps everything
    pub max_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: OPENROUTER_URL.to_string(),
            model_override: None,
            analysis: AnalysisSettings::default(),
            voice: VoiceSettings::default(),
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            debounce_ms: 1500,
            preview_threshold: 5,
        }
    }
}

impl AnalysisSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            exit_phrases: ["stop", "done", "end session", "that's all", "we're done"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_history: 0,
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pairpad"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from a specific file. A missing file yields defaults; a
    /// corrupt one is moved aside and defaults are returned.
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Config>(&content) {
            Ok(config) => config.sanitized(),
            Err(err) => {
                preserve_corrupt_config(path, &content);
                warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Clamp values that would break the pipeline.
    fn sanitized(mut self) -> Self {
        if self.analysis.batch_size == 0 {
            self.analysis.batch_size = AnalysisSettings::default().batch_size;
        }
        if self.analysis.preview_threshold == 0 {
            self.analysis.preview_threshold = AnalysisSettings::default().preview_threshold;
        }
        self
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), String> {
        let path =
            Self::config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        #[cfg(unix)]
        {
            write_config_atomic(path, &content)
                .map_err(|e| format!("Failed to write config: {}", e))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        }

        Ok(())
    }

    /// Resolve the API key from the environment, then the system keychain.
    pub fn api_key(&self) -> Option<String> {
        for var in API_KEY_ENV_VARS {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    return Some(key);
                }
            }
        }

        match keyring::get_api_key() {
            Ok(key) => key,
            Err(err) => {
                keyring::warn_keychain_error_once("API key", &err);
                None
            }
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    /// Validate API key format (OpenRouter keys start with sk-)
    pub fn validate_api_key_format(key: &str) -> bool {
        key.starts_with("sk-")
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/pairpad/config.json".to_string())
    }
}

/// Interactive prompt to store an API key in the keychain
pub fn setup_api_key_interactive() -> Result<(), String> {
    use std::io;

    println!();
    println!("  pairpad uses OpenRouter for explanations, reviews, vibe edits and the rubber duck.");
    println!("  1. Get an API key at: https://openrouter.ai/keys");
    println!("  2. Paste it below (saved in your system keychain)");
    println!();
    print!("  API Key: ");
    io::stdout().flush().map_err(|e| e.to_string())?;

    let mut key = String::new();
    io::stdin().read_line(&mut key).map_err(|e| e.to_string())?;
    let key = key.trim();

    if key.is_empty() {
        return Err("No API key provided".to_string());
    }
    if !Config::validate_api_key_format(key) {
        println!("  Warning: Key doesn't look like an OpenRouter key (should start with sk-). Saving anyway...");
    }

    keyring::set_api_key(key).map_err(|e| {
        format!(
            "Failed to store API key in system keychain: {}. Set PAIRPAD_API_KEY instead.",
            e
        )
    })?;

    println!("  + API key saved to the system keychain");
    Ok(())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
        warn!(error = %e, "failed to set temp config file permissions");
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.analysis.batch_size, 5);
        assert_eq!(config.analysis.debounce(), Duration::from_millis(1500));
        assert_eq!(config.analysis.preview_threshold, 5);
        assert!(config.voice.exit_phrases.iter().any(|p| p == "end session"));
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.analysis.batch_size = 3;
        config.model_override = Some("local/model".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults_and_sanitizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"analysis": {"batch_size": 0, "debounce_ms": 200}}"#).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded.analysis.batch_size, 5);
        assert_eq!(loaded.analysis.debounce_ms, 200);
        assert_eq!(loaded.voice, VoiceSettings::default());
    }

    #[test]
    fn test_corrupt_file_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded, Config::default());
        assert!(dir.path().join("config.json.corrupt").exists());
    }

    #[test]
    fn test_validate_api_key_format() {
        assert!(Config::validate_api_key_format("sk-or-123"));
        assert!(!Config::validate_api_key_format("abc"));
    }
}
