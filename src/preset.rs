use crate::error::{Error, Result};
use crate::tools::PlayRequest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// A named `play_pattern` argument set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub automation: PlayRequest,
}

/// One RON file per preset under a directory.
#[derive(Debug, Clone)]
pub struct PresetStore {
    dir: PathBuf,
}

fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "preset name '{name}' may only contain letters, digits, '_' and '-'"
        )))
    }
}

impl PresetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PresetStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        check_name(name)?;
        Ok(self.dir.join(format!("{name}.ron")))
    }

    /// Overwrites any preset with the same name.
    pub fn save(&self, preset: &Preset) -> Result<PathBuf> {
        let path = self.path_of(&preset.name)?;
        fs::create_dir_all(&self.dir)?;

        let ron_string = ron::ser::to_string_pretty(preset, ron::ser::PrettyConfig::default())?;
        fs::write(&path, ron_string)?;
        info!("Saved preset '{}' to {}", preset.name, path.display());

        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Preset> {
        let path = self.path_of(name)?;
        if !path.exists() {
            return Err(Error::PresetNotFound(name.to_string()));
        }
        let ron_string = fs::read_to_string(&path)?;
        let preset: Preset = ron::from_str(&ron_string)?;

        Ok(preset)
    }

    /// `(name, description)` of every readable preset, sorted by name.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut presets = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ron") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(name) {
                Ok(preset) => presets.push((preset.name, preset.description)),
                Err(e) => tracing::warn!("Skipping unreadable preset {}: {}", path.display(), e),
            }
        }
        presets.sort();
        Ok(presets)
    }
}
