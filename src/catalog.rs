use crate::version::{Architecture, Version, VersionType};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, warn};

pub const DEFAULT_VERSIONS_URL: &str =
    "https://raw.githubusercontent.com/dummydummy123456/BedrockDB/main/versions.json";
const USER_AGENT: &str = "NickelLauncher";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("no known version is displayed as {0:?}")]
    UnknownVersion(String),
}

#[derive(Debug, Deserialize)]
struct VersionModel {
    name: String,
    #[serde(rename = "type")]
    kind: VersionType,
    guids: GuidsModel,
}

#[derive(Debug, Deserialize)]
struct GuidsModel {
    x64: Vec<String>,
    x86: Vec<String>,
    arm: Vec<String>,
}

/// Known game versions, backed by `versions/versions.json`.
pub struct VersionCatalog {
    cache_path: PathBuf,
    packages_dir: PathBuf,
    url: String,
    timeout: Duration,
    versions: Mutex<Vec<Arc<Version>>>,
}

impl VersionCatalog {
    pub fn new(versions_dir: &Path, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            cache_path: versions_dir.join("versions.json"),
            packages_dir: versions_dir.to_path_buf(),
            url: url.into(),
            timeout,
            versions: Mutex::new(Vec::new()),
        }
    }

    /// Cached versions, reading the cache file on first use. Never fails:
    /// a missing or malformed cache yields an empty list.
    pub fn versions_locally(&self) -> Vec<Arc<Version>> {
        let mut versions = self.lock();
        if !versions.is_empty() {
            return versions.clone();
        }

        let raw = match fs::read_to_string(&self.cache_path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!("no version cache at {}: {err}", self.cache_path.display());
                return Vec::new();
            }
        };
        *versions = into_shared(parse_versions(&raw, &self.packages_dir));
        versions.clone()
    }

    /// Fetches the manifest, overwrites the cache file with the raw body and
    /// replaces the in-memory list.
    pub fn versions_remotely(&self) -> Result<Vec<Arc<Version>>> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(self.timeout)
            .timeout_read(self.timeout)
            .build();
        let body = agent
            .get(&self.url)
            .set("User-Agent", USER_AGENT)
            .call()
            .context("fetch version manifest")?
            .into_string()
            .context("read version manifest")?;
        self.store_manifest(&body)
    }

    pub(crate) fn store_manifest(&self, raw: &str) -> Result<Vec<Arc<Version>>> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent).context("create versions dir")?;
        }
        fs::write(&self.cache_path, raw).context("write version cache")?;

        let parsed = into_shared(parse_versions(raw, &self.packages_dir));
        let mut versions = self.lock();
        *versions = parsed;
        Ok(versions.clone())
    }

    pub fn find_by_display_name(&self, display_name: &str) -> Option<Arc<Version>> {
        self.versions_locally()
            .into_iter()
            .find(|version| version.display_name() == display_name)
    }

    pub fn require_by_display_name(&self, display_name: &str) -> Result<Arc<Version>> {
        self.find_by_display_name(display_name)
            .ok_or_else(|| CatalogError::UnknownVersion(display_name.to_string()).into())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Version>>> {
        self.versions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn into_shared(versions: Vec<Version>) -> Vec<Arc<Version>> {
    versions.into_iter().map(Arc::new).collect()
}

/// Parses a manifest. Unsupported architectures and empty identifier lists
/// are dropped, and the result is newest first (reverse manifest order).
pub fn parse_versions(raw: &str, packages_dir: &Path) -> Vec<Version> {
    let models: Vec<VersionModel> = match serde_json::from_str(raw) {
        Ok(models) => models,
        Err(err) => {
            warn!("version manifest rejected: {err}");
            return Vec::new();
        }
    };

    models
        .into_iter()
        .rev()
        .map(|model| {
            let guids = [
                (Architecture::X64, model.guids.x64),
                (Architecture::X86, model.guids.x86),
                (Architecture::Arm, model.guids.arm),
            ]
            .into_iter()
            .filter(|(arch, guids)| arch.is_supported() && !guids.is_empty())
            .collect();
            Version::new(model.name, model.kind, guids, packages_dir)
        })
        .collect()
}
