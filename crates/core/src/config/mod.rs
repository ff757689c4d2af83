use std::{path::{Path, PathBuf}, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    rig::PluginInfo, LipSyncError, ParameterDefinition, ParameterStreamer, Result, WatchSettings,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rig: RigConfig,
    pub lip_sync: LipSyncConfig,
    pub watch: WatchSettings,
    pub conversation: ConversationConfig,
}

impl AppConfig {
    /// Reads a TOML configuration file. Missing sections fall back to
    /// their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| LipSyncError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| LipSyncError::Config(e.to_string()))
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Where the controller lives and how the plugin introduces itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub url: String,
    pub plugin_name: String,
    pub plugin_developer: String,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8001".to_string(),
            plugin_name: "lipsync".to_string(),
            plugin_developer: "lipsync".to_string(),
        }
    }
}

impl RigConfig {
    pub fn plugin(&self) -> PluginInfo {
        PluginInfo {
            plugin_name: self.plugin_name.clone(),
            plugin_developer: self.plugin_developer.clone(),
        }
    }
}

/// Envelope and streaming parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    pub parameter_id: String,
    pub explanation: String,
    pub default_value: f32,
    pub frame_ms: u32,
    pub weight: f32,
    /// Delay after each parameter update.
    pub pacing_ms: u64,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        let parameter = ParameterDefinition::default();
        Self {
            parameter_id: parameter.id,
            explanation: parameter.explanation,
            default_value: parameter.default_value,
            frame_ms: 30,
            weight: 1.0,
            pacing_ms: 30,
        }
    }
}

impl LipSyncConfig {
    pub fn parameter(&self) -> ParameterDefinition {
        ParameterDefinition {
            id: self.parameter_id.clone(),
            min: 0.0,
            max: 1.0,
            default_value: self.default_value,
            explanation: self.explanation.clone(),
        }
    }

    pub fn streamer(&self) -> ParameterStreamer {
        ParameterStreamer::new(self.parameter_id.clone(), Duration::from_millis(self.pacing_ms))
            .with_weight(self.weight)
    }
}

/// Behaviour of the conversational turn loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Directory synthesized clips are written to.
    pub audio_dir: PathBuf,
    pub max_consecutive_failures: u32,
    pub backoff_ms: u64,
    /// Delete each clip once it has been spoken.
    pub remove_spoken_clips: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("audio"),
            max_consecutive_failures: 3,
            backoff_ms: 1_000,
            remove_spoken_clips: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.rig.url, "ws://127.0.0.1:8001");
        assert_eq!(config.lip_sync.parameter_id, "LipLevel");
        assert_eq!(config.lip_sync.frame_ms, 30);
        assert_eq!(config.conversation.max_consecutive_failures, 3);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [rig]
            url = "ws://10.0.0.2:8001"

            [lip_sync]
            frame_ms = 20
            pacing_ms = 15

            [watch]
            max_wait = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.rig.url, "ws://10.0.0.2:8001");
        assert_eq!(config.rig.plugin_name, "lipsync");
        assert_eq!(config.lip_sync.frame_ms, 20);
        assert_eq!(config.lip_sync.streamer().pacing(), Duration::from_millis(15));
        assert_eq!(config.watch.max_wait, Duration::from_secs(5));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        assert!(matches!(
            AppConfig::from_toml("[lip_sync]\nframe_ms = \"fast\""),
            Err(LipSyncError::Config(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lipsync.toml");
        std::fs::write(&path, "[rig]\nplugin_name = \"riko\"\n").unwrap();

        let config = AppConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.rig.plugin().plugin_name, "riko");
        assert!(AppConfig::load_or_default(None).is_ok());
    }
}
