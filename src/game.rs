use crate::{
    cancel::{self, CancellationToken},
    instance::{Instance, InstanceId, GAME_DATA_DIR},
    net::PackageFetcher,
    platform::{PackageInfo, Platform},
    report::{emit, ProgressDetails, Report, ReportHook},
    shell,
    version::{Architecture, Version},
};
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, error, info};

pub const APP_ID: &str = "App";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("Another instance is being launched.")]
    AlreadyLaunching,
    #[error("Nothing is being launched.")]
    NothingLaunching,
    #[error("Couldn't retrieve a download link.")]
    LinkRetrieval,
}

struct ActiveLaunch {
    instance: InstanceId,
    token: CancellationToken,
}

/// Runs one launch at a time: grant access, download, install, relink, launch.
pub struct Game {
    platform: Arc<dyn Platform>,
    fetcher: Arc<dyn PackageFetcher>,
    temp_dir: PathBuf,
    active: Mutex<Option<ActiveLaunch>>,
}

impl Game {
    pub fn new(
        platform: Arc<dyn Platform>,
        fetcher: Arc<dyn PackageFetcher>,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            platform,
            fetcher,
            temp_dir,
            active: Mutex::new(None),
        }
    }

    pub fn launched_instance(&self) -> Option<InstanceId> {
        self.lock().as_ref().map(|active| active.instance.clone())
    }

    /// Signals the in-flight launch; it unwinds at its next checkpoint.
    pub fn cancel_launch(&self) -> Result<()> {
        let active = self.lock();
        let active = active.as_ref().ok_or(LaunchError::NothingLaunching)?;
        info!("cancelling launch of {}", active.instance);
        active.token.cancel();
        Ok(())
    }

    /// Blocks until the game is started, the launch fails or it is cancelled.
    /// Cancellation returns `Ok`; failures are reported and returned.
    pub fn launch(&self, instance: &Instance, hook: Option<ReportHook<'_>>) -> Result<()> {
        let token = self.begin(instance.id())?;
        let _marker = ActiveMarker { active: &self.active };

        info!(
            "launching instance {:?} at {}",
            instance.name(),
            instance.directory().display()
        );
        match self.run(instance, &token, hook) {
            Ok(()) => Ok(()),
            Err(err) if cancel::is_cancelled(&err) => {
                info!("launch of {} cancelled", instance.id());
                Ok(())
            }
            Err(err) => {
                error!("launch of {} failed: {err:#}", instance.id());
                emit(hook, Report::error(err.root_cause().to_string()));
                Err(err)
            }
        }
    }

    fn begin(&self, id: &InstanceId) -> Result<CancellationToken> {
        let mut active = self.lock();
        if active.is_some() {
            return Err(LaunchError::AlreadyLaunching.into());
        }
        let token = CancellationToken::new();
        *active = Some(ActiveLaunch {
            instance: id.clone(),
            token: token.clone(),
        });
        Ok(token)
    }

    fn run(
        &self,
        instance: &Instance,
        token: &CancellationToken,
        hook: Option<ReportHook<'_>>,
    ) -> Result<()> {
        let version = instance.version();
        let architecture = instance.architecture_choice();

        emit(hook, Report::progress("Checking game files"));
        token.check()?;
        self.platform
            .grant_access(&instance.game_data_dir(), version.user_sid(), token)
            .context("grant access to game data")?;

        if !version.is_downloaded(architecture)? {
            info!("downloading Minecraft {}", version.name());
            self.download(version, architecture, token, hook)?;
        }

        let packages = self.platform.find_packages(version.pfn(), token)?;
        if !is_installed(&packages, version, architecture) {
            self.install(version, architecture, &packages, token, hook)?;
        }

        self.relink(instance, token)?;

        info!("launching Minecraft {}", version.name());
        emit(hook, Report::progress("Launching Minecraft"));
        self.platform.launch_package(version.pfn(), APP_ID, token)
    }

    fn download(
        &self,
        version: &Version,
        architecture: Architecture,
        token: &CancellationToken,
        hook: Option<ReportHook<'_>>,
    ) -> Result<()> {
        token.check()?;
        emit(hook, Report::progress("Retrieving download link"));
        let guid = version
            .guids(architecture)?
            .choose(&mut rand::thread_rng())
            .ok_or(LaunchError::LinkRetrieval)?;
        let link = self.fetcher.resolve_link(guid)?.ok_or_else(|| {
            error!("no download link for {guid}");
            LaunchError::LinkRetrieval
        })?;
        token.check()?;

        let package = version.package_path(architecture)?;
        let file_name = package
            .file_name()
            .context("package file name")?
            .to_string_lossy();
        fs::create_dir_all(&self.temp_dir).context("create temp dir")?;
        let partial = self.temp_dir.join(format!("{file_name}.part"));
        debug!("downloading package to {}", partial.display());

        emit(hook, Report::progress("Downloading"));
        let progress = |processed: u64, total: Option<u64>| {
            if token.is_cancelled() {
                return;
            }
            let report = match total {
                Some(total) => {
                    Report::progress_with("Downloading", ProgressDetails::megabytes(processed, total))
                }
                None => Report::progress("Downloading"),
            };
            emit(hook, report);
        };
        if let Err(err) = self.fetcher.download(&link, &partial, token, &progress) {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }

        if let Some(parent) = package.parent() {
            fs::create_dir_all(parent).context("create versions dir")?;
        }
        fs::rename(&partial, package).context("finalize downloaded package")?;
        info!("downloaded {}", package.display());
        Ok(())
    }

    fn install(
        &self,
        version: &Version,
        architecture: Architecture,
        registered: &[PackageInfo],
        token: &CancellationToken,
        hook: Option<ReportHook<'_>>,
    ) -> Result<()> {
        emit(hook, Report::progress("Unlinking old version"));
        for package in registered {
            self.platform.remove_package(&package.full_name, token)?;
        }

        info!("installing Minecraft {}", version.name());
        emit(hook, Report::progress("Installing Minecraft"));
        self.platform
            .add_package(version.package_path(architecture)?, token)
    }

    /// Points the package's default `games/com.mojang` at the instance.
    fn relink(&self, instance: &Instance, token: &CancellationToken) -> Result<()> {
        let games = self
            .platform
            .packages_root()?
            .join(instance.version().pfn())
            .join("LocalState")
            .join("games");
        debug!(
            "relinking {} to {}",
            games.display(),
            instance.game_data_dir().display()
        );
        fs::create_dir_all(&games).context("create default game folder")?;
        shell::clear_directory(&games, Some(token))?;
        create_dir_symlink(&instance.game_data_dir(), &games.join(GAME_DATA_DIR))
            .context("link game data")?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveLaunch>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_installed(registered: &[PackageInfo], version: &Version, architecture: Architecture) -> bool {
    registered
        .first()
        .is_some_and(|package| package.full_name == version.package_full_name(architecture))
}

struct ActiveMarker<'a> {
    active: &'a Mutex<Option<ActiveLaunch>>,
}

impl Drop for ActiveMarker<'_> {
    fn drop(&mut self) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *active = None;
    }
}

#[cfg(windows)]
fn create_dir_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(unix)]
fn create_dir_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(any(unix, windows)))]
fn create_dir_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Other,
        "symlink unavailable on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cancel::Cancelled, net::DownloadProgress, report::ReportKind, version::VersionType};
    use rstest::{fixture, rstest};
    use std::{sync::mpsc, thread, time::Duration};
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingPlatform {
        calls: Mutex<Vec<String>>,
        registered: Mutex<Vec<PackageInfo>>,
        packages_root: PathBuf,
        fail_launch: bool,
    }

    impl RecordingPlatform {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Platform for RecordingPlatform {
        fn grant_access(&self, directory: &Path, user_sid: &str, _: &CancellationToken) -> Result<()> {
            assert!(directory.ends_with(GAME_DATA_DIR));
            self.record(format!("grant {user_sid}"));
            Ok(())
        }

        fn find_packages(&self, family_name: &str, _: &CancellationToken) -> Result<Vec<PackageInfo>> {
            self.record(format!("find {family_name}"));
            Ok(self.registered.lock().unwrap().clone())
        }

        fn remove_package(&self, full_name: &str, _: &CancellationToken) -> Result<()> {
            self.record(format!("remove {full_name}"));
            Ok(())
        }

        fn add_package(&self, package: &Path, _: &CancellationToken) -> Result<()> {
            assert!(package.is_file());
            let name = package.file_name().unwrap().to_string_lossy();
            self.record(format!("add {name}"));
            Ok(())
        }

        fn launch_package(&self, family_name: &str, app_id: &str, _: &CancellationToken) -> Result<()> {
            self.record(format!("launch {family_name}!{app_id}"));
            if self.fail_launch {
                anyhow::bail!("explorer.exe is missing");
            }
            Ok(())
        }

        fn packages_root(&self) -> Result<PathBuf> {
            Ok(self.packages_root.clone())
        }
    }

    enum DownloadBehavior {
        Complete(Vec<u8>),
        BlockUntilCancelled(mpsc::Sender<()>),
    }

    struct FakeFetcher {
        link: Option<String>,
        behavior: Mutex<DownloadBehavior>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(link: Option<&str>, behavior: DownloadBehavior) -> Self {
            Self {
                link: link.map(str::to_string),
                behavior: Mutex::new(behavior),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl PackageFetcher for FakeFetcher {
        fn resolve_link(&self, guid: &str) -> Result<Option<String>> {
            self.calls.lock().unwrap().push(format!("resolve {guid}"));
            Ok(self.link.clone())
        }

        fn download(
            &self,
            url: &str,
            destination: &Path,
            token: &CancellationToken,
            progress: DownloadProgress<'_>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(format!("download {url}"));
            fs::write(destination, b"partial").unwrap();
            match &*self.behavior.lock().unwrap() {
                DownloadBehavior::Complete(bytes) => {
                    fs::write(destination, bytes).unwrap();
                    progress(bytes.len() as u64, Some(bytes.len() as u64));
                    Ok(())
                }
                DownloadBehavior::BlockUntilCancelled(started) => {
                    started.send(()).unwrap();
                    loop {
                        if token.is_cancelled() {
                            return Err(Cancelled.into());
                        }
                        progress(1, None);
                        thread::sleep(Duration::from_millis(10));
                    }
                }
            }
        }
    }

    struct LaunchCtx {
        root: TempDir,
        instance: Instance,
    }

    impl LaunchCtx {
        fn package(&self) -> PathBuf {
            self.instance
                .version()
                .package_path(Architecture::X64)
                .unwrap()
                .to_path_buf()
        }

        fn platform(&self) -> Arc<RecordingPlatform> {
            Arc::new(RecordingPlatform {
                packages_root: self.root.path().join("Packages"),
                ..RecordingPlatform::default()
            })
        }

        fn game(&self, platform: &Arc<RecordingPlatform>, fetcher: &Arc<FakeFetcher>) -> Game {
            Game::new(platform.clone(), fetcher.clone(), self.root.path().join("temp"))
        }

        fn games_link(&self) -> PathBuf {
            self.root
                .path()
                .join("Packages")
                .join(self.instance.version().pfn())
                .join("LocalState/games")
                .join(GAME_DATA_DIR)
        }
    }

    #[fixture]
    fn ctx() -> LaunchCtx {
        let root = TempDir::new().unwrap();
        let version = Arc::new(Version::new(
            "1.20.62.2",
            VersionType::Release,
            vec![(Architecture::X64, vec!["g1".to_string()])],
            &root.path().join("versions"),
        ));
        let directory = root.path().join("instances").join("World");
        fs::create_dir_all(&directory).unwrap();
        let instance = Instance::create("World", version, directory).unwrap();
        LaunchCtx { root, instance }
    }

    fn collect_reports() -> (Arc<Mutex<Vec<Report>>>, impl Fn(Report)) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        (reports, move |report| sink.lock().unwrap().push(report))
    }

    #[rstest]
    fn ready_package_skips_download_and_install(ctx: LaunchCtx) {
        fs::create_dir_all(ctx.package().parent().unwrap()).unwrap();
        fs::write(ctx.package(), b"appx").unwrap();
        let platform = ctx.platform();
        platform.registered.lock().unwrap().push(PackageInfo {
            full_name: "Microsoft.MinecraftUWP_1.20.62.2_x64__8wekyb3d8bbwe".to_string(),
        });
        let fetcher = Arc::new(FakeFetcher::new(None, DownloadBehavior::Complete(Vec::new())));
        let game = ctx.game(&platform, &fetcher);

        let (reports, hook) = collect_reports();
        game.launch(&ctx.instance, Some(&hook)).unwrap();

        assert!(fetcher.calls.lock().unwrap().is_empty());
        let calls = platform.calls.lock().unwrap().clone();
        assert_eq!(calls[0], format!("grant {}", ctx.instance.version().user_sid()));
        assert_eq!(calls[1], "find Microsoft.MinecraftUWP_8wekyb3d8bbwe");
        assert_eq!(calls[2], "launch Microsoft.MinecraftUWP_8wekyb3d8bbwe!App");
        assert_eq!(calls.len(), 3);
        #[cfg(unix)]
        assert_eq!(
            fs::read_link(ctx.games_link()).unwrap(),
            ctx.instance.game_data_dir()
        );

        let texts: Vec<String> = reports.lock().unwrap().iter().map(Report::text).collect();
        assert_eq!(texts, ["Checking game files...", "Launching Minecraft..."]);
        assert!(game.launched_instance().is_none());
    }

    #[rstest]
    fn missing_package_is_downloaded_and_replaces_old_registration(ctx: LaunchCtx) {
        let platform = ctx.platform();
        platform.registered.lock().unwrap().push(PackageInfo {
            full_name: "Microsoft.MinecraftUWP_1.19.0.5_x64__8wekyb3d8bbwe".to_string(),
        });
        let link = "http://tlu.dl.delivery.mp.microsoft.com/files/x";
        let fetcher = Arc::new(FakeFetcher::new(
            Some(link),
            DownloadBehavior::Complete(vec![7; 3 * 1024 * 1024]),
        ));
        let game = ctx.game(&platform, &fetcher);
        let stale_link = ctx.games_link().with_file_name("leftover");
        fs::create_dir_all(&stale_link).unwrap();

        let (reports, hook) = collect_reports();
        game.launch(&ctx.instance, Some(&hook)).unwrap();

        assert_eq!(
            *fetcher.calls.lock().unwrap(),
            ["resolve g1".to_string(), format!("download {link}")]
        );
        assert_eq!(fs::read(ctx.package()).unwrap().len(), 3 * 1024 * 1024);
        assert!(!ctx.root.path().join("temp/1.20.62.2_x64.Appx.part").exists());
        let calls = platform.calls.lock().unwrap().clone();
        assert_eq!(
            calls[2..],
            [
                "remove Microsoft.MinecraftUWP_1.19.0.5_x64__8wekyb3d8bbwe",
                "add 1.20.62.2_x64.Appx",
                "launch Microsoft.MinecraftUWP_8wekyb3d8bbwe!App",
            ]
        );
        assert!(!stale_link.exists());

        let reports = reports.lock().unwrap();
        let downloaded = reports
            .iter()
            .find_map(|report| report.details.clone())
            .unwrap();
        assert_eq!((downloaded.processed, downloaded.total), (3.0, 3.0));
        let texts: Vec<String> = reports
            .iter()
            .filter(|report| report.details.is_none())
            .map(Report::text)
            .collect();
        assert_eq!(
            texts,
            [
                "Checking game files...",
                "Retrieving download link...",
                "Downloading...",
                "Unlinking old version...",
                "Installing Minecraft...",
                "Launching Minecraft...",
            ]
        );
    }

    #[rstest]
    fn cancelling_during_download_stops_quietly(ctx: LaunchCtx) {
        let platform = ctx.platform();
        let (started_tx, started_rx) = mpsc::channel();
        let fetcher = Arc::new(FakeFetcher::new(
            Some("http://tlu.dl.delivery.mp.microsoft.com/files/x"),
            DownloadBehavior::BlockUntilCancelled(started_tx),
        ));
        let game = Arc::new(ctx.game(&platform, &fetcher));

        let worker = {
            let game = game.clone();
            let instance = ctx.instance.clone();
            thread::spawn(move || game.launch(&instance, None))
        };
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(game.launched_instance().as_ref(), Some(ctx.instance.id()));
        assert!(matches!(
            game.launch(&ctx.instance, None).unwrap_err().downcast_ref::<LaunchError>(),
            Some(LaunchError::AlreadyLaunching)
        ));

        game.cancel_launch().unwrap();
        worker.join().unwrap().unwrap();

        let calls = platform.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("grant "));
        assert!(!ctx.package().exists());
        assert!(!ctx.root.path().join("temp/1.20.62.2_x64.Appx.part").exists());
        assert!(game.launched_instance().is_none());
        assert!(matches!(
            game.cancel_launch().unwrap_err().downcast_ref::<LaunchError>(),
            Some(LaunchError::NothingLaunching)
        ));
    }

    #[rstest]
    fn failures_are_reported_and_release_the_marker(ctx: LaunchCtx) {
        let platform = ctx.platform();
        let fetcher = Arc::new(FakeFetcher::new(None, DownloadBehavior::Complete(Vec::new())));
        let game = ctx.game(&platform, &fetcher);

        let (reports, hook) = collect_reports();
        let err = game.launch(&ctx.instance, Some(&hook)).unwrap_err();
        assert!(matches!(err.downcast_ref::<LaunchError>(), Some(LaunchError::LinkRetrieval)));
        let last = reports.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.kind, ReportKind::Error);
        assert_eq!(last.text(), "Couldn't retrieve a download link.");
        assert!(game.launched_instance().is_none());

        fs::create_dir_all(ctx.package().parent().unwrap()).unwrap();
        fs::write(ctx.package(), b"appx").unwrap();
        let failing = Arc::new(RecordingPlatform {
            packages_root: ctx.root.path().join("Packages"),
            fail_launch: true,
            ..RecordingPlatform::default()
        });
        let game = ctx.game(&failing, &fetcher);
        let err = game.launch(&ctx.instance, None).unwrap_err();
        assert_eq!(err.to_string(), "explorer.exe is missing");
        assert!(game.launched_instance().is_none());
    }
}
