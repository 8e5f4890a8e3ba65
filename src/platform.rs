use crate::{cancel::CancellationToken, shell};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageInfo {
    #[serde(rename = "PackageFullName")]
    pub full_name: String,
}

/// OS operations the launch sequence drives.
pub trait Platform: Send + Sync {
    fn grant_access(&self, directory: &Path, user_sid: &str, token: &CancellationToken) -> Result<()>;
    fn find_packages(&self, family_name: &str, token: &CancellationToken) -> Result<Vec<PackageInfo>>;
    fn remove_package(&self, full_name: &str, token: &CancellationToken) -> Result<()>;
    fn add_package(&self, package: &Path, token: &CancellationToken) -> Result<()>;
    fn launch_package(&self, family_name: &str, app_id: &str, token: &CancellationToken) -> Result<()>;
    /// Parent of the per-package data folders (`%LOCALAPPDATA%\Packages`).
    fn packages_root(&self) -> Result<PathBuf>;
}

/// Shells out to PowerShell and icacls.
#[derive(Debug, Default)]
pub struct WindowsPlatform;

impl WindowsPlatform {
    fn powershell(&self, script: &str, token: &CancellationToken, log_stdout: bool) -> Result<String> {
        shell::run_command("powershell", &["-NoProfile", "-Command", script], Some(token), log_stdout)
    }
}

impl Platform for WindowsPlatform {
    fn grant_access(&self, directory: &Path, user_sid: &str, token: &CancellationToken) -> Result<()> {
        let directory = directory.to_string_lossy();
        let grant = format!("*{user_sid}:(OI)(CI)F");
        shell::run_command(
            "icacls",
            &[directory.as_ref(), "/grant:r", &grant, "/t"],
            Some(token),
            false,
        )?;
        Ok(())
    }

    fn find_packages(&self, family_name: &str, token: &CancellationToken) -> Result<Vec<PackageInfo>> {
        let script = format!(
            "Get-AppxPackage | Where-Object {{$_.PackageFamilyName -eq \"{family_name}\"}} | ConvertTo-Json"
        );
        let output = self.powershell(&script, token, false)?;
        parse_package_list(&output)
    }

    fn remove_package(&self, full_name: &str, token: &CancellationToken) -> Result<()> {
        self.powershell(&format!("Remove-AppxPackage -Package {full_name}"), token, true)?;
        Ok(())
    }

    fn add_package(&self, package: &Path, token: &CancellationToken) -> Result<()> {
        self.powershell(&format!("Add-AppxPackage \"{}\"", package.display()), token, true)?;
        Ok(())
    }

    fn launch_package(&self, family_name: &str, app_id: &str, token: &CancellationToken) -> Result<()> {
        self.powershell(
            &format!("explorer.exe shell:appsFolder\\{family_name}!{app_id}"),
            token,
            true,
        )?;
        Ok(())
    }

    fn packages_root(&self) -> Result<PathBuf> {
        let dirs = BaseDirs::new().context("resolve home directory")?;
        Ok(dirs.data_local_dir().join("Packages"))
    }
}

/// `ConvertTo-Json` prints nothing, a single object or an array.
pub fn parse_package_list(output: &str) -> Result<Vec<PackageInfo>> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(output).context("parse package list")?;
    let packages = if value.is_array() {
        serde_json::from_value(value).context("decode package list")?
    } else {
        vec![serde_json::from_value(value).context("decode package")?]
    };
    debug!("found packages: {packages:?}");
    Ok(packages)
}
