use crate::catalog::DEFAULT_VERSIONS_URL;
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const ROOT_ENV: &str = "NICKEL_LAUNCHER_ROOT";
const APP_DIR_NAME: &str = "NickelLauncher";

/// Every directory the launcher writes to, derived from one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherPaths {
    pub root: PathBuf,
    pub instances: PathBuf,
    pub versions: PathBuf,
    pub temp: PathBuf,
    pub logs: PathBuf,
}

impl LauncherPaths {
    pub fn discover() -> Result<Self> {
        if let Some(root) = env::var_os(ROOT_ENV).filter(|root| !root.is_empty()) {
            return Ok(Self::from_root(PathBuf::from(root)));
        }
        let base = BaseDirs::new().context("resolve home dir")?;
        Ok(Self::from_root(base.data_dir().join(APP_DIR_NAME)))
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self {
            instances: root.join("instances"),
            versions: root.join("versions"),
            temp: root.join("temp"),
            logs: root.join("logs"),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.root, &self.instances, &self.versions, &self.temp, &self.logs] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default = "default_versions_url")]
    pub versions_url: String,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            versions_url: default_versions_url(),
            log_level: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LauncherConfig {
    pub fn load_or_create(paths: &LauncherPaths) -> Result<Self> {
        let path = paths.config_file();
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read launcher config")?;
            let config: LauncherConfig =
                serde_json::from_str(&raw).context("parse launcher config")?;
            return Ok(config);
        }

        let config = LauncherConfig::default();
        config.save(&path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create launcher data dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize launcher config")?;
        fs::write(path, raw).context("write launcher config")?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn default_versions_url() -> String {
    DEFAULT_VERSIONS_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}
