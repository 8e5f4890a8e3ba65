use crate::cancel::{self, CancellationToken};
use anyhow::{Context, Result};
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};
use tracing::{debug, error};
use walkdir::WalkDir;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{program} failed: {message}")]
pub struct ShellError {
    pub program: String,
    pub message: String,
}

/// Runs `program` to completion and returns its stdout.
///
/// With a token the child is polled and killed as soon as the token is
/// cancelled, in which case the error is [`cancel::Cancelled`].
pub fn run_command(
    program: &str,
    args: &[&str],
    token: Option<&CancellationToken>,
    log_stdout: bool,
) -> Result<String> {
    debug!("executing command: {program} {args:?}");
    cancel::check(token)?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    hide_console_window(&mut command);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawn {program}"))?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait().with_context(|| format!("wait for {program}"))? {
            break status;
        }
        if let Err(cancelled) = cancel::check(token) {
            terminate(&mut child);
            return Err(cancelled.into());
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    if !status.success() {
        let message = if stderr.trim().is_empty() {
            match status.code() {
                Some(code) => format!("the process finished with the code {code}"),
                None => "the process was terminated".to_string(),
            }
        } else {
            stderr.trim().to_string()
        };
        error!("{program}: {message}");
        return Err(ShellError {
            program: program.to_string(),
            message,
        }
        .into());
    }

    if log_stdout && !stdout.is_empty() {
        debug!("command result: {stdout}");
    }
    Ok(stdout)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(windows)]
fn hide_console_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_command: &mut Command) {}

/// Removes every entry of `directory`, ignoring entries that refuse to go.
pub fn clear_directory(directory: &Path, token: Option<&CancellationToken>) -> Result<()> {
    let entries = fs::read_dir(directory)
        .with_context(|| format!("read {}", directory.display()))?;
    for entry in entries {
        cancel::check(token)?;
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        let result = if meta.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            remove_file_or_link(&path)
        };
        if let Err(err) = result {
            debug!("could not remove {}: {err}", path.display());
        }
    }
    Ok(())
}

// Directory symlinks on Windows are removed with remove_dir.
fn remove_file_or_link(path: &Path) -> std::io::Result<()> {
    fs::remove_file(path).or_else(|err| fs::remove_dir(path).map_err(|_| err))
}

/// Creates a uniquely named child of `parent` derived from `desired_name`.
pub fn create_subdirectory(desired_name: &str, parent: &Path) -> Result<PathBuf> {
    let base = sanitize_dirname(desired_name);
    let mut name = base.clone();
    let mut suffix = 1;
    while parent.join(&name).exists() {
        name = format!("{base}{suffix}");
        suffix += 1;
    }
    let directory = parent.join(&name);
    fs::create_dir(&directory).with_context(|| format!("create {}", directory.display()))?;
    Ok(directory)
}

pub fn sanitize_dirname(desired_name: &str) -> String {
    let replaced = desired_name.trim().replace(' ', "_");
    let mut name: String = replaced
        .chars()
        .filter(|ch| !ch.is_control() && !ch.is_whitespace())
        .filter(|ch| !matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();
    while name.ends_with('.') {
        name.pop();
    }

    let stem = name.split('.').next().unwrap_or_default().to_ascii_uppercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        name.insert(0, '_');
    }
    if name.is_empty() {
        name.push('1');
    }
    name
}

/// Recursively copies `source` into `dest`, skipping the direct children of
/// `source` listed in `skip_top_level`.
pub fn copy_tree(source: &Path, dest: &Path, skip_top_level: &[&str]) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    let walker = WalkDir::new(source).min_depth(1).into_iter().filter_entry(|entry| {
        entry.depth() != 1
            || !skip_top_level
                .iter()
                .any(|skip| entry.file_name() == std::ffi::OsStr::new(skip))
    });
    for entry in walker {
        let entry = entry.context("walk game data")?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .context("relative game data path")?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitized_names_are_valid_dirnames() {
        assert_eq!(sanitize_dirname("  My World "), "My_World");
        assert_eq!(sanitize_dirname("a<b>:c?"), "abc");
        assert_eq!(sanitize_dirname("..."), "1");
        assert_eq!(sanitize_dirname("   "), "1");
        assert_eq!(sanitize_dirname("con"), "_con");
        assert_eq!(sanitize_dirname("tab\there"), "tabhere");
    }

    #[test]
    fn subdirectories_get_numbered_on_collision() {
        let dir = TempDir::new().unwrap();
        let first = create_subdirectory("My World", dir.path()).unwrap();
        let second = create_subdirectory("My World", dir.path()).unwrap();
        let third = create_subdirectory("My_World", dir.path()).unwrap();
        assert_eq!(first.file_name().unwrap(), "My_World");
        assert_eq!(second.file_name().unwrap(), "My_World1");
        assert_eq!(third.file_name().unwrap(), "My_World2");
        assert!(third.is_dir());
    }

    #[test]
    fn clear_directory_removes_files_dirs_and_links() {
        let dir = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(target.path(), dir.path().join("link")).unwrap();

        clear_directory(dir.path(), None).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(target.path().is_dir());
    }

    #[test]
    fn clear_directory_stops_when_cancelled() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = clear_directory(dir.path(), Some(&token)).unwrap_err();
        assert!(cancel::is_cancelled(&err));
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn copy_tree_skips_top_level_entries_only() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("minecraftWorlds/w1")).unwrap();
        fs::create_dir_all(src.path().join("resource_packs/minecraftWorlds")).unwrap();
        fs::write(src.path().join("options.txt"), "gfx=1").unwrap();

        copy_tree(src.path(), dest.path(), &["minecraftWorlds"]).unwrap();
        assert!(!dest.path().join("minecraftWorlds").exists());
        assert!(dest.path().join("resource_packs/minecraftWorlds").is_dir());
        assert_eq!(
            fs::read_to_string(dest.path().join("options.txt")).unwrap(),
            "gfx=1"
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_carries_stderr() {
        let err = run_command("sh", &["-c", "echo boom >&2; exit 3"], None, true).unwrap_err();
        let shell = err.downcast_ref::<ShellError>().unwrap();
        assert_eq!(shell.message, "boom");
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_command_is_killed() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        let err = run_command("sleep", &["5"], Some(&token), true).unwrap_err();
        handle.join().unwrap();
        assert!(cancel::is_cancelled(&err));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn stdout_is_returned() {
        let out = run_command("sh", &["-c", "printf hello"], None, false).unwrap();
        assert_eq!(out, "hello");
    }
}
