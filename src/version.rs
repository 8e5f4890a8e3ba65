use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};

const UWP_PFN: &str = "Microsoft.MinecraftUWP_8wekyb3d8bbwe";
const PREVIEW_PFN: &str = "Microsoft.MinecraftWindowsBeta_8wekyb3d8bbwe";
const UWP_USER_SID: &str =
    "S-1-15-2-1958404141-86561845-1752920682-3514627264-368642714-62675701-733520436";
const PREVIEW_USER_SID: &str =
    "S-1-15-2-424268864-5579737-879501358-346833251-474568803-887069379-4040235476";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X64,
    X86,
    Arm,
}

impl Architecture {
    pub const SUPPORTED: [Architecture; 2] = [Architecture::X64, Architecture::X86];

    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::X64 => "x64",
            Architecture::X86 => "x86",
            Architecture::Arm => "arm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "x64" => Some(Architecture::X64),
            "x86" => Some(Architecture::X86),
            "arm" => Some(Architecture::Arm),
            _ => None,
        }
    }

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Release,
    Beta,
    Preview,
}

impl VersionType {
    pub const ALL: [VersionType; 3] = [VersionType::Release, VersionType::Beta, VersionType::Preview];

    pub fn as_str(self) -> &'static str {
        match self {
            VersionType::Release => "release",
            VersionType::Beta => "beta",
            VersionType::Preview => "preview",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("architecture {architecture} is not available for version {version}")]
pub struct UnavailableArchitectureError {
    pub architecture: Architecture,
    pub version: String,
}

/// One distributable build of the game.
///
/// `guids` keeps manifest key order, which is also the order of
/// [`Version::available_architectures`]. Every architecture in `guids` has a
/// matching entry in `packages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    name: String,
    kind: VersionType,
    guids: Vec<(Architecture, Vec<String>)>,
    packages: Vec<(Architecture, PathBuf)>,
}

impl Version {
    /// Builds a version whose package files live in `packages_dir`.
    pub fn new(
        name: impl Into<String>,
        kind: VersionType,
        guids: Vec<(Architecture, Vec<String>)>,
        packages_dir: &Path,
    ) -> Self {
        let name = name.into();
        let packages = guids
            .iter()
            .map(|(arch, _)| (*arch, packages_dir.join(format!("{name}_{arch}.Appx"))))
            .collect();
        Self {
            name,
            kind,
            guids,
            packages,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VersionType {
        self.kind
    }

    /// Release names such as `1.20.6201.0` render as `1.20.62`; the legacy
    /// `0.x` scheme packs minor and patch into one field. Other types keep
    /// their raw name.
    pub fn display_name(&self) -> String {
        if self.kind != VersionType::Release {
            return self.name.clone();
        }

        let parts: Vec<&str> = self.name.split('.').collect();
        if parts.len() < 3 {
            return self.name.clone();
        }
        let (major, minor, patch) = (parts[0], parts[1], parts[2]);

        if major == "0" {
            let head: String = minor.chars().take(2).collect();
            let tail: String = minor.chars().skip(2).collect();
            let tail = tail.trim_start_matches('0');
            let tail = if tail.is_empty() { "0" } else { tail };
            format!("{major}.{head}.{tail}")
        } else {
            let keep = patch.chars().count().saturating_sub(2);
            let patch: String = patch.chars().take(keep).collect();
            let patch = if patch.is_empty() { "0".to_string() } else { patch };
            format!("{major}.{minor}.{patch}")
        }
    }

    pub fn available_architectures(&self) -> Vec<Architecture> {
        self.guids.iter().map(|(arch, _)| *arch).collect()
    }

    pub fn offers(&self, architecture: Architecture) -> bool {
        self.guids.iter().any(|(arch, _)| *arch == architecture)
    }

    pub fn guids(&self, architecture: Architecture) -> Result<&[String], UnavailableArchitectureError> {
        self.guids
            .iter()
            .find(|(arch, _)| *arch == architecture)
            .map(|(_, guids)| guids.as_slice())
            .ok_or_else(|| self.unavailable(architecture))
    }

    pub fn package_path(&self, architecture: Architecture) -> Result<&Path, UnavailableArchitectureError> {
        self.packages
            .iter()
            .find(|(arch, _)| *arch == architecture)
            .map(|(_, path)| path.as_path())
            .ok_or_else(|| self.unavailable(architecture))
    }

    pub fn is_downloaded(&self, architecture: Architecture) -> Result<bool, UnavailableArchitectureError> {
        Ok(self.package_path(architecture)?.is_file())
    }

    pub fn pfn(&self) -> &'static str {
        match self.kind {
            VersionType::Release | VersionType::Beta => UWP_PFN,
            VersionType::Preview => PREVIEW_PFN,
        }
    }

    pub fn user_sid(&self) -> &'static str {
        match self.kind {
            VersionType::Release | VersionType::Beta => UWP_USER_SID,
            VersionType::Preview => PREVIEW_USER_SID,
        }
    }

    /// Full package name the OS reports once this build is registered.
    pub fn package_full_name(&self, architecture: Architecture) -> String {
        let (family, publisher) = self.pfn().split_once('_').unwrap_or((self.pfn(), ""));
        format!("{family}_{}_{architecture}__{publisher}", self.name)
    }

    pub(crate) fn unavailable(&self, architecture: Architecture) -> UnavailableArchitectureError {
        UnavailableArchitectureError {
            architecture,
            version: self.name.clone(),
        }
    }
}
