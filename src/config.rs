use crate::error::Result;
use crate::timing::DEFAULT_TRIGGER_GATE_SEC;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "DIGITAKT_MIDI_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output port is the first whose name contains this.
    pub port_name: String,
    pub client_name: String,
    pub preset_dir: PathBuf,
    /// Note length of track triggers and loop notes.
    pub trigger_gate_sec: f64,
    pub default_bpm: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port_name: "Elektron Digitakt II".to_string(),
            client_name: "digitakt-midi".to_string(),
            preset_dir: PathBuf::from("presets"),
            trigger_gate_sec: DEFAULT_TRIGGER_GATE_SEC,
            default_bpm: 120.0,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let ron_string = fs::read_to_string(path)?;
        let config: Config = ron::from_str(&ron_string)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    /// `--config` wins over the environment; defaults if neither is set.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        let path = cli_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match path {
            Some(path) => {
                tracing::info!("Loading config from {}", path.display());
                Config::load(&path)
            }
            None => Ok(Config::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = ron::from_str("(port_name: \"Digitakt\")").unwrap();
        assert_eq!(config.port_name, "Digitakt");
        assert_eq!(config.default_bpm, 120.0);
        assert_eq!(config.trigger_gate_sec, 0.05);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.ron");
        let config = Config {
            preset_dir: dir.path().join("presets"),
            default_bpm: 96.0,
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::resolve(Some(&path)).unwrap(), config);
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        fs::write(&path, "(default_bpm: \"fast\")").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
