use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, path::PathBuf, time::Duration};

use crate::{Error, InternalResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KernelConfig {
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Commands running longer than this fail as cancelled. `None` waits
    /// forever.
    #[serde(default, with = "option_duration_ms")]
    pub command_timeout: Option<Duration>,

    #[serde(default)]
    pub profile: ProfileConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Inline code fragments, run in order before the script files.
    #[serde(default)]
    pub scripts: Vec<String>,

    /// Script files; missing files are skipped.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            scripts: Vec::new(),
            paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Unknown commands are started as native programs when set.
    #[serde(default = "default_true")]
    pub allow_native_commands: bool,

    #[serde(default = "default_progress_bar_width")]
    pub progress_bar_width: usize,

    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_native_commands: default_true(),
            progress_bar_width: default_progress_bar_width(),
            history_size: default_history_size(),
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            command_timeout: None,
            profile: ProfileConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl KernelConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        from_file(path)
    }

    pub fn from_str(s: &str) -> InternalResult<Self> {
        from_str(s)
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path.as_ref())
        .map_err(|e| Error::Config(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_event_buffer_size() -> usize {
    1000
}
fn default_true() -> bool {
    true
}
fn default_progress_bar_width() -> usize {
    50
}
fn default_history_size() -> usize {
    4096
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = KernelConfig::from_str("{}").unwrap();
        assert_eq!(config, KernelConfig::default());
        assert_eq!(config.engine.progress_bar_width, 50);
        assert!(config.profile.enabled);
    }

    #[test]
    fn test_timeout_in_milliseconds() {
        let config =
            KernelConfig::from_str(r#"{"command_timeout": 1500, "engine": {"allow_native_commands": false}}"#)
                .unwrap();
        assert_eq!(config.command_timeout, Some(Duration::from_millis(1500)));
        assert!(!config.engine.allow_native_commands);
        assert_eq!(config.engine.history_size, 4096);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["command_timeout"], 1500);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"profile": {{"scripts": ["$profileLoaded = $true"]}}}}"#).unwrap();

        let config = KernelConfig::from_file(file.path()).unwrap();
        assert_eq!(config.profile.scripts, vec!["$profileLoaded = $true"]);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(KernelConfig::from_str("{"), Err(Error::Config(_))));
    }
}
