use crate::sort::{SortConfig, SortDirection, SortMode};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_PROJECT_DIR: &str = "~/Documents/GitHub";
pub const DEFAULT_COMMAND: &str = "claude";
pub const MAX_RECENT_PATHS: usize = 5;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("invalid settings file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// User preferences persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub default_project_dir: String,
    pub default_command: String,
    pub last_project_path: Option<String>,
    pub recent_paths: Vec<String>,
    pub session_sort_mode: SortMode,
    pub session_sort_direction: SortDirection,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_project_dir: DEFAULT_PROJECT_DIR.to_string(),
            default_command: DEFAULT_COMMAND.to_string(),
            last_project_path: None,
            recent_paths: Vec::new(),
            session_sort_mode: SortMode::Created,
            session_sort_direction: SortDirection::Desc,
        }
    }
}

impl Preferences {
    /// Loads preferences from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, &json).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn sort_config(&self) -> SortConfig {
        SortConfig {
            mode: self.session_sort_mode,
            direction: self.session_sort_direction,
        }
    }

    pub fn set_default_project_dir(&mut self, dir: impl Into<String>) {
        self.default_project_dir = dir.into();
    }

    pub fn set_default_command(&mut self, command: impl Into<String>) {
        self.default_command = command.into();
    }

    pub fn set_last_project_path(&mut self, path: impl Into<String>) {
        self.last_project_path = Some(path.into());
    }

    /// Moves `path` to the front of the recent list, keeping at most [`MAX_RECENT_PATHS`].
    pub fn add_recent_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if path.trim().is_empty() {
            return;
        }
        self.recent_paths.retain(|existing| existing != &path);
        self.recent_paths.insert(0, path);
        self.recent_paths.truncate(MAX_RECENT_PATHS);
    }

    pub fn set_session_sort_mode(&mut self, mode: SortMode) {
        self.session_sort_mode = mode;
    }

    pub fn set_session_sort_direction(&mut self, direction: SortDirection) {
        self.session_sort_direction = direction;
    }
}

fn write_atomic(path: &Path, payload: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };

    std::fs::write(&temp_path, payload)?;
    std::fs::rename(&temp_path, path)
}
