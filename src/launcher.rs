use crate::{
    catalog::VersionCatalog,
    config::{LauncherConfig, LauncherPaths},
    game::Game,
    instance::{Instance, InstanceId},
    net::{HttpFetcher, PackageFetcher},
    platform::{Platform, WindowsPlatform},
    report::Report,
    state::{State, StoreError},
    stateload,
    version::{Architecture, Version, VersionType},
    watchdog::{SuppressGuard, Watchdog},
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, info};

/// Receives pushes from the core.
pub trait Frontend: Send + Sync {
    /// Out-of-band changes replaced the whole store.
    fn reload_everything(&self);
    fn launch_report(&self, report: Report);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub name: String,
    pub hidden: bool,
    pub instances: Vec<InstanceView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub name: String,
    pub dirname: String,
    pub version: VersionView,
    pub architecture_choice: Architecture,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionView {
    pub display_name: String,
    pub available_architectures: Vec<Architecture>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionsOfType {
    #[serde(rename = "type")]
    pub kind: VersionType,
    pub versions: Vec<VersionView>,
}

impl From<&Version> for VersionView {
    fn from(version: &Version) -> Self {
        Self {
            display_name: version.display_name(),
            available_architectures: version.available_architectures(),
        }
    }
}

impl From<&Instance> for InstanceView {
    fn from(instance: &Instance) -> Self {
        Self {
            name: instance.name().to_string(),
            dirname: instance.id().to_string(),
            version: VersionView::from(instance.version().as_ref()),
            architecture_choice: instance.architecture_choice(),
        }
    }
}

/// The launcher context: one per process, handed to the frontend.
pub struct Launcher {
    paths: LauncherPaths,
    catalog: Arc<VersionCatalog>,
    state: Arc<Mutex<State>>,
    game: Arc<Game>,
    frontend: Arc<dyn Frontend>,
    watchdog: Mutex<Option<Watchdog>>,
}

impl Launcher {
    /// Wires the Windows package manager and the update service.
    pub fn open(
        paths: LauncherPaths,
        config: &LauncherConfig,
        frontend: Arc<dyn Frontend>,
    ) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(config.request_timeout()));
        Self::new(paths, config, Arc::new(WindowsPlatform), fetcher, frontend)
    }

    pub fn new(
        paths: LauncherPaths,
        config: &LauncherConfig,
        platform: Arc<dyn Platform>,
        fetcher: Arc<dyn PackageFetcher>,
        frontend: Arc<dyn Frontend>,
    ) -> Result<Self> {
        paths.ensure()?;
        let catalog = Arc::new(VersionCatalog::new(
            &paths.versions,
            config.versions_url.clone(),
            config.request_timeout(),
        ));
        let state = stateload::load_state(&paths.instances, &catalog.versions_locally());
        info!(
            "loaded {} instance groups from {}",
            state.instance_groups().len(),
            paths.instances.display()
        );
        let game = Arc::new(Game::new(platform, fetcher, paths.temp.clone()));
        Ok(Self {
            paths,
            catalog,
            state: Arc::new(Mutex::new(state)),
            game,
            frontend,
            watchdog: Mutex::new(None),
        })
    }

    pub fn paths(&self) -> &LauncherPaths {
        &self.paths
    }

    pub fn start_watchdog(&self) -> Result<()> {
        let mut watchdog = lock(&self.watchdog);
        if watchdog.is_some() {
            return Ok(());
        }
        let directory = self.paths.instances.clone();
        let catalog = self.catalog.clone();
        let state = self.state.clone();
        let game = self.game.clone();
        let frontend = self.frontend.clone();
        *watchdog = Some(Watchdog::start(&self.paths.instances, move || {
            reload(&directory, &catalog, &state, &game, frontend.as_ref());
        })?);
        Ok(())
    }

    pub fn stop_watchdog(&self) {
        if lock(&self.watchdog).take().is_some() {
            debug!("watchdog stopped");
        }
    }

    /// Rebuilds the store from disk, as the watchdog does.
    pub fn reload(&self) {
        reload(
            &self.paths.instances,
            &self.catalog,
            &self.state,
            &self.game,
            self.frontend.as_ref(),
        );
    }

    pub fn instance_groups(&self) -> Vec<GroupView> {
        self.state()
            .instance_groups()
            .iter()
            .map(|group| GroupView {
                name: group.name().to_string(),
                hidden: group.hidden(),
                instances: group.instances().iter().map(InstanceView::from).collect(),
            })
            .collect()
    }

    pub fn last_instance(&self) -> Option<InstanceId> {
        self.state().last_instance().map(|instance| instance.id().clone())
    }

    pub fn versions_by_type(&self, remotely: bool) -> Result<Vec<VersionsOfType>> {
        let versions = if remotely {
            self.catalog.versions_remotely()?
        } else {
            self.catalog.versions_locally()
        };
        Ok(VersionType::ALL
            .into_iter()
            .map(|kind| VersionsOfType {
                kind,
                versions: versions
                    .iter()
                    .filter(|version| version.kind() == kind)
                    .map(|version| VersionView::from(version.as_ref()))
                    .collect(),
            })
            .collect())
    }

    pub fn rename_instance_group(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.state().rename_instance_group(old_name, new_name)
    }

    pub fn toggle_instance_group_hidden(&self, name: &str) -> Result<()> {
        self.state().toggle_instance_group_hidden(name)
    }

    pub fn delete_instance_group(&self, name: &str) -> Result<()> {
        self.state().delete_instance_group(name)
    }

    pub fn move_instances(&self, position: usize, group_name: &str, dirnames: &[String]) -> Result<()> {
        let ids = dirnames
            .iter()
            .map(|dirname| instance_id(dirname))
            .collect::<Result<Vec<_>>>()?;
        self.state().move_instances(position, group_name, &ids)
    }

    pub fn rename_instance(&self, dirname: &str, name: &str) -> Result<()> {
        self.state().rename_instance(&instance_id(dirname)?, name)
    }

    pub fn change_version(&self, dirname: &str, version_display_name: &str) -> Result<()> {
        let version = self.catalog.require_by_display_name(version_display_name)?;
        self.state()
            .change_instance_version(&instance_id(dirname)?, version)
    }

    pub fn change_architecture_choice(&self, dirname: &str, architecture: Architecture) -> Result<()> {
        self.state()
            .set_instance_architecture(&instance_id(dirname)?, architecture)
    }

    pub fn create_instance(
        &self,
        name: &str,
        group_name: &str,
        version_display_name: &str,
    ) -> Result<InstanceId> {
        let version = self.catalog.require_by_display_name(version_display_name)?;
        let _suppressed = self.suppress_dir_created();
        self.state().create_instance(name, group_name, version)
    }

    pub fn copy_instance(&self, dirname: &str, copy_worlds: bool) -> Result<InstanceId> {
        let id = instance_id(dirname)?;
        let _suppressed = self.suppress_dir_created();
        self.state().copy_instance(&id, copy_worlds)
    }

    /// Records the instance as the last one and runs the launch, forwarding
    /// reports to the frontend. The store is not locked while launching.
    pub fn launch_instance(&self, dirname: &str) -> Result<()> {
        let id = instance_id(dirname)?;
        let instance = {
            let mut state = self.state();
            state.set_last_instance(&id)?;
            state
                .instance(&id)
                .cloned()
                .ok_or(StoreError::UnknownInstance(id))?
        };
        let frontend = self.frontend.clone();
        let hook = move |report: Report| frontend.launch_report(report);
        self.game.launch(&instance, Some(&hook))
    }

    pub fn cancel_launch(&self) -> Result<()> {
        self.game.cancel_launch()
    }

    pub fn launched_instance(&self) -> Option<InstanceId> {
        self.game.launched_instance()
    }

    fn suppress_dir_created(&self) -> Option<SuppressGuard> {
        lock(&self.watchdog)
            .as_ref()
            .map(Watchdog::suppress_dir_created)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }
}

fn reload(
    directory: &Path,
    catalog: &VersionCatalog,
    state: &Mutex<State>,
    game: &Game,
    frontend: &dyn Frontend,
) {
    let vanished = {
        let mut state = lock(state);
        *state = stateload::load_state(directory, &catalog.versions_locally());
        game.launched_instance()
            .filter(|launched| state.instance(launched).is_none())
    };
    if let Some(launched) = vanished {
        info!("instance {launched} disappeared during launch");
        let _ = game.cancel_launch();
    }
    debug!("state reloaded from {}", directory.display());
    frontend.reload_everything();
}

fn instance_id(dirname: &str) -> Result<InstanceId> {
    InstanceId::new(dirname).with_context(|| format!("invalid instance {dirname:?}"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
