use crate::version::{Architecture, UnavailableArchitectureError, Version};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

pub const CONFIG_FILE: &str = "config.json";
pub const GAME_DATA_DIR: &str = "com.mojang";
pub const WORLDS_DIR: &str = "minecraftWorlds";
pub const CONFIG_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstanceIdError {
    #[error("instance directory name is empty")]
    Empty,
    #[error("instance directory name {0:?} contains whitespace")]
    Whitespace(String),
}

/// Directory name of an instance: non-empty and free of whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(value: impl Into<String>) -> Result<Self, InstanceIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(InstanceIdError::Empty);
        }
        if value.chars().any(char::is_whitespace) {
            return Err(InstanceIdError::Whitespace(value));
        }
        Ok(Self(value))
    }

    pub fn from_dir(directory: &Path) -> Result<Self, InstanceIdError> {
        let name = directory
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InstanceId {
    type Error = InstanceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct InstanceConfig {
    pub format_version: u32,
    pub name: String,
    pub version: VersionChoice,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct VersionChoice {
    pub name: String,
    pub architecture_choice: Architecture,
}

/// One managed game folder. Every successful mutator rewrites the
/// instance's `config.json` before returning.
#[derive(Debug, Clone)]
pub struct Instance {
    id: InstanceId,
    directory: PathBuf,
    name: String,
    version: Arc<Version>,
    architecture: Architecture,
}

impl Instance {
    /// Wraps an existing directory without touching the disk.
    pub fn new(
        name: &str,
        version: Arc<Version>,
        architecture: Architecture,
        directory: PathBuf,
    ) -> Result<Self> {
        if !version.offers(architecture) {
            return Err(version.unavailable(architecture).into());
        }
        let id = InstanceId::from_dir(&directory)?;
        Ok(Self {
            id,
            directory,
            name: name.trim().to_string(),
            version,
            architecture,
        })
    }

    /// Sets up a fresh instance in an already allocated, empty `directory`.
    pub fn create(name: &str, version: Arc<Version>, directory: PathBuf) -> Result<Self> {
        let architecture = version
            .available_architectures()
            .first()
            .copied()
            .ok_or_else(|| UnavailableArchitectureError {
                architecture: Architecture::X64,
                version: version.name().to_string(),
            })?;
        Self::create_with(name, version, architecture, directory)
    }

    pub fn create_with(
        name: &str,
        version: Arc<Version>,
        architecture: Architecture,
        directory: PathBuf,
    ) -> Result<Self> {
        let instance = Self::new(name, version, architecture, directory)?;
        instance.populate_directory()?;
        Ok(instance)
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn game_data_dir(&self) -> PathBuf {
        self.directory.join(GAME_DATA_DIR)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Arc<Version> {
        &self.version
    }

    pub fn architecture_choice(&self) -> Architecture {
        self.architecture
    }

    pub fn rename(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name == self.name {
            return Ok(());
        }
        write_config(&self.directory, name, &self.version, self.architecture)?;
        self.name = name.to_string();
        Ok(())
    }

    /// Swaps the version, falling back to its first architecture when the
    /// current choice is not offered. Persists once.
    pub fn change_version(&mut self, version: Arc<Version>) -> Result<()> {
        if *version == *self.version {
            return Ok(());
        }
        let architecture = if version.offers(self.architecture) {
            self.architecture
        } else {
            version
                .available_architectures()
                .first()
                .copied()
                .ok_or_else(|| version.unavailable(self.architecture))?
        };
        write_config(&self.directory, &self.name, &version, architecture)?;
        self.version = version;
        self.architecture = architecture;
        Ok(())
    }

    pub fn set_architecture_choice(&mut self, architecture: Architecture) -> Result<()> {
        if architecture == self.architecture {
            return Ok(());
        }
        if !self.version.offers(architecture) {
            return Err(self.version.unavailable(architecture).into());
        }
        write_config(&self.directory, &self.name, &self.version, architecture)?;
        self.architecture = architecture;
        Ok(())
    }

    pub(crate) fn populate_directory(&self) -> Result<()> {
        fs::create_dir_all(self.game_data_dir()).context("create game data dir")?;
        write_config(&self.directory, &self.name, &self.version, self.architecture)
    }
}

#[cfg(test)]
thread_local! {
    static CONFIG_WRITES: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

fn write_config(
    directory: &Path,
    name: &str,
    version: &Version,
    architecture: Architecture,
) -> Result<()> {
    let config = InstanceConfig {
        format_version: CONFIG_FORMAT_VERSION,
        name: name.to_string(),
        version: VersionChoice {
            name: version.name().to_string(),
            architecture_choice: architecture,
        },
    };
    let raw = serde_json::to_string_pretty(&config).context("serialize instance config")?;
    let path = directory.join(CONFIG_FILE);
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, raw).context("write instance config temp")?;
    fs::rename(&temp, &path).context("finalize instance config")?;
    #[cfg(test)]
    CONFIG_WRITES.with(|writes| writes.set(writes.get() + 1));
    debug!("saved instance config {}", path.display());
    Ok(())
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Instance {}
