use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::model::Position;

/// Seed values that survive a restart. Never overrides a live backend read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Clone, Debug)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> Result<PathBuf, PersistError> {
        let base = BaseDirs::new().ok_or(PersistError::MissingHome)?;
        Ok(base.home_dir().join(".aligntester").join("state.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<PersistedState, PersistError> {
        if !self.path.exists() {
            return Ok(PersistedState::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| self.io_error(source))?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let serialized = toml::to_string_pretty(state)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        file.write_all(serialized.as_bytes())
            .map_err(|source| self.io_error(source))?;
        Ok(())
    }

    /// Read-modify-write of the whole file. An unreadable file is replaced.
    pub fn update(&self, apply: impl FnOnce(&mut PersistedState)) -> Result<(), PersistError> {
        let mut state = match self.load() {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(
                    target: "align_sync::persist",
                    path = %self.path.display(),
                    error = %err,
                    "discarding unreadable state file"
                );
                PersistedState::default()
            }
        };
        apply(&mut state);
        self.save(&state)
    }

    fn io_error(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
