use crate::{
    group::InstanceGroup,
    instance::{Instance, InstanceConfig, InstanceId, CONFIG_FILE, GAME_DATA_DIR},
    state::{GroupEntry, GroupsFile, State, GROUPS_FILE},
    version::Version,
};
use anyhow::{Context, Result};
use std::{fs, path::Path, sync::Arc};
use tracing::{debug, warn};

pub struct LoadResult {
    pub instance_groups: Vec<InstanceGroup>,
    pub last_instance: Option<InstanceId>,
}

pub fn load_state(directory: &Path, versions: &[Arc<Version>]) -> State {
    let result = load(directory, versions);
    State::new(result.instance_groups, result.last_instance, directory.to_path_buf())
}

/// Rebuilds groups from `groups.json` and the instance folders on disk.
///
/// A missing or invalid index degrades to a scan where every instance lands
/// in the unnamed group. Instances that fail to load are dropped silently.
pub fn load(directory: &Path, versions: &[Arc<Version>]) -> LoadResult {
    let index = match read_index(directory) {
        Ok(index) => Some(index),
        Err(err) => {
            debug!("ignoring groups index: {err:#}");
            None
        }
    };
    let (entries, last_dirname) = match index {
        Some(index) => (index.groups, index.last_instance),
        None => (Vec::new(), None),
    };

    let mut instances = scan_instances(directory, versions);
    let mut groups = Vec::new();
    for entry in entries {
        let GroupEntry {
            name,
            hidden,
            instances: dirnames,
        } = entry;
        let mut members = Vec::new();
        for dirname in &dirnames {
            if let Some(index) = instances.iter().position(|instance| instance.id() == dirname) {
                members.push(instances.remove(index));
            }
        }
        if members.is_empty() {
            continue;
        }
        let holds_last = last_dirname
            .as_ref()
            .is_some_and(|last| members.iter().any(|instance| instance.id() == last));
        groups.push(InstanceGroup::new(&name, members, hidden && !holds_last));
    }

    if !instances.is_empty() {
        match groups.first_mut() {
            Some(first) if first.is_unnamed() => {
                let end = first.instances().len();
                first.add_instances(end, instances);
            }
            _ => groups.insert(0, InstanceGroup::unnamed(instances)),
        }
    }

    let last_instance = last_dirname.filter(|last| {
        groups
            .iter()
            .any(|group| group.contains(last))
    });
    LoadResult {
        instance_groups: groups,
        last_instance,
    }
}

fn read_index(directory: &Path) -> Result<GroupsFile> {
    let raw = fs::read_to_string(directory.join(GROUPS_FILE)).context("read groups.json")?;
    let index: GroupsFile = serde_json::from_str(&raw).context("parse groups.json")?;
    index
        .validate()
        .map_err(|reason| anyhow::anyhow!("invalid groups.json: {reason}"))?;
    Ok(index)
}

/// Loadable instances in directory order (sorted by name for stability).
fn scan_instances(directory: &Path, versions: &[Arc<Version>]) -> Vec<Instance> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("cannot scan {}: {err}", directory.display());
            return Vec::new();
        }
    };
    let mut dirs: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs.iter()
        .filter_map(|dir| match load_instance(dir, versions) {
            Ok(instance) => Some(instance),
            Err(err) => {
                debug!("skipping {}: {err:#}", dir.display());
                None
            }
        })
        .collect()
}

pub fn load_instance(directory: &Path, versions: &[Arc<Version>]) -> Result<Instance> {
    InstanceId::from_dir(directory)?;
    if !directory.join(GAME_DATA_DIR).is_dir() {
        anyhow::bail!("missing {GAME_DATA_DIR} folder");
    }
    let raw = fs::read_to_string(directory.join(CONFIG_FILE)).context("read instance config")?;
    let config: InstanceConfig = serde_json::from_str(&raw).context("parse instance config")?;
    let architecture = config.version.architecture_choice;
    let version = versions
        .iter()
        .find(|version| version.name() == config.version.name && version.offers(architecture))
        .with_context(|| {
            format!(
                "version {} ({architecture}) is not in the catalog",
                config.version.name
            )
        })?;
    Instance::new(&config.name, version.clone(), architecture, directory.to_path_buf())
}
