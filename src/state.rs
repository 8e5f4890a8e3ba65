use crate::{
    group::{GroupError, InstanceGroup},
    instance::{Instance, InstanceId, WORLDS_DIR},
    shell,
    version::{Architecture, Version},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};

pub const GROUPS_FILE: &str = "groups.json";
pub const GROUPS_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("an instance group with the name {0:?} already exists")]
    GroupExists(String),
    #[error("no instance group named {0:?}")]
    UnknownGroup(String),
    #[error("no instance with the directory {0}")]
    UnknownInstance(InstanceId),
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GroupsFile {
    pub format_version: u32,
    pub groups: Vec<GroupEntry>,
    pub last_instance: Option<InstanceId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GroupEntry {
    pub name: String,
    pub hidden: bool,
    pub instances: Vec<InstanceId>,
}

impl GroupsFile {
    /// Structural rules a persisted index must satisfy before it is trusted.
    pub fn validate(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        let mut dirnames = HashSet::new();
        for (index, group) in self.groups.iter().enumerate() {
            if group.name.trim() != group.name {
                return Err(format!("group name {:?} has surrounding whitespace", group.name));
            }
            if group.name.is_empty() && index != 0 {
                return Err("the unnamed group must be the first entry".to_string());
            }
            if !names.insert(group.name.as_str()) {
                return Err(format!("duplicate group name {:?}", group.name));
            }
            for dirname in &group.instances {
                if !dirnames.insert(dirname) {
                    return Err(format!("instance {dirname} listed twice"));
                }
            }
        }
        Ok(())
    }
}

/// The instance store: ordered groups plus the last launched instance.
///
/// Every mutating method persists `groups.json` before returning. Groups that
/// end up empty are dropped by the operation that drained them.
#[derive(Debug)]
pub struct State {
    directory: PathBuf,
    groups: Vec<InstanceGroup>,
    last_instance: Option<InstanceId>,
}

impl State {
    pub fn new(
        groups: Vec<InstanceGroup>,
        last_instance: Option<InstanceId>,
        directory: PathBuf,
    ) -> Self {
        Self {
            directory,
            groups,
            last_instance,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn instance_groups(&self) -> &[InstanceGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&InstanceGroup> {
        self.groups.iter().find(|group| group.name() == name)
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.groups.iter().flat_map(|group| group.instances())
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&Instance> {
        self.instances().find(|instance| instance.id() == id)
    }

    pub fn last_instance(&self) -> Option<&Instance> {
        self.last_instance.as_ref().and_then(|id| self.instance(id))
    }

    pub fn set_last_instance(&mut self, id: &InstanceId) -> Result<()> {
        if self.last_instance.as_ref() == Some(id) {
            return Ok(());
        }
        self.require_instance(id)?;
        self.transact(|state| {
            state.last_instance = Some(id.clone());
            Ok(())
        })
    }

    pub fn add_instance_group(&mut self, group: InstanceGroup) -> Result<()> {
        self.transact(|state| state.insert_group(group).map(|_| ()))
    }

    pub fn move_instance_group(&mut self, position: usize, name: &str) -> Result<()> {
        let index = self.group_index(name)?;
        if self.groups[index].is_unnamed() {
            return Err(GroupError::InvalidUnnamed.into());
        }
        self.transact(|state| {
            let group = state.groups.remove(index);
            let first = state.first_named_index();
            let position = position.clamp(first, state.groups.len());
            state.groups.insert(position, group);
            Ok(())
        })
    }

    /// Removes the group, handing its instances to the unnamed group.
    pub fn delete_instance_group(&mut self, name: &str) -> Result<()> {
        let index = self.group_index(name)?;
        if !self.groups[index].is_empty() && self.groups[index].is_unnamed() {
            return Err(GroupError::InvalidUnnamed.into());
        }

        self.transact(|state| {
            let mut group = state.groups.remove(index);
            let orphans = group.take_all();
            if !orphans.is_empty() {
                info!("deleting group {name:?}, moving {} instance(s) to unnamed", orphans.len());
                let unnamed = state.unnamed_group_mut();
                let end = unnamed.instances().len();
                unnamed.add_instances(end, orphans);
            }
            Ok(())
        })
    }

    /// Renames a group; an already taken name merges this group into the
    /// existing one.
    pub fn rename_instance_group(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let index = self.group_index(old_name)?;
        if self.groups[index].is_unnamed() {
            return Err(GroupError::InvalidUnnamed.into());
        }
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(GroupError::InvalidUnnamed.into());
        }
        if new_name == old_name {
            return Ok(());
        }
        if let Some(existing) = self.group(new_name) {
            let position = existing.instances().len();
            let ids: Vec<InstanceId> = self.groups[index]
                .instances()
                .iter()
                .map(|instance| instance.id().clone())
                .collect();
            return self.move_instances(position, new_name, &ids);
        }
        self.transact(|state| {
            state.groups[index].rename(new_name)?;
            Ok(())
        })
    }

    pub fn toggle_instance_group_hidden(&mut self, name: &str) -> Result<()> {
        let index = self.group_index(name)?;
        if self.groups[index].is_unnamed() {
            return Ok(());
        }
        self.transact(|state| {
            state.groups[index].toggle_hidden();
            Ok(())
        })
    }

    /// Moves `ids` (in store order) to `position` within `group_name`,
    /// creating and un-hiding the target as needed.
    pub fn move_instances(
        &mut self,
        position: usize,
        group_name: &str,
        ids: &[InstanceId],
    ) -> Result<()> {
        for id in ids {
            self.require_instance(id)?;
        }

        self.transact(|state| {
            let mut moved = Vec::with_capacity(ids.len());
            for group in &mut state.groups {
                let held: Vec<InstanceId> = group
                    .instances()
                    .iter()
                    .map(|instance| instance.id().clone())
                    .filter(|id| ids.contains(id))
                    .collect();
                if !held.is_empty() {
                    moved.extend(group.remove_instances(&held)?);
                }
            }

            let group_name = group_name.trim();
            let index = match state.groups.iter().position(|group| group.name() == group_name) {
                Some(index) => index,
                None => state.insert_group(InstanceGroup::new(group_name, Vec::new(), false))?,
            };
            let target = &mut state.groups[index];
            target.add_instances(position, moved);
            target.show();

            state.drop_empty_groups();
            Ok(())
        })
    }

    /// Allocates a directory for a new instance and appends it to
    /// `group_name`, creating the group when missing.
    pub fn create_instance(
        &mut self,
        name: &str,
        group_name: &str,
        version: Arc<Version>,
    ) -> Result<InstanceId> {
        let directory = shell::create_subdirectory(name, &self.directory)?;
        let created = self.transact(|state| {
            let instance = Instance::create(name, version, directory.clone())?;
            let id = instance.id().clone();

            let group_name = group_name.trim();
            match state.groups.iter_mut().find(|group| group.name() == group_name) {
                Some(group) => {
                    let end = group.instances().len();
                    group.add_instances(end, vec![instance]);
                    group.show();
                }
                None => {
                    state.insert_group(InstanceGroup::new(group_name, vec![instance], false))?;
                }
            }
            Ok(id)
        });
        match created {
            Ok(id) => {
                info!("created instance {id} ({:?})", name.trim());
                Ok(id)
            }
            Err(err) => {
                discard_directory(&directory);
                Err(err)
            }
        }
    }

    /// Clones an instance's game data into a new instance placed right after
    /// the source. Saved worlds are copied only when `copy_worlds` is set.
    pub fn copy_instance(&mut self, id: &InstanceId, copy_worlds: bool) -> Result<InstanceId> {
        let source = self.require_instance(id)?.clone();
        let directory = shell::create_subdirectory(source.name(), &self.directory)?;
        let copied = self.transact(|state| {
            let copy = Instance::create_with(
                &format!("{}(copy)", source.name()),
                source.version().clone(),
                source.architecture_choice(),
                directory.clone(),
            )?;

            let skip: &[&str] = if copy_worlds { &[] } else { &[WORLDS_DIR] };
            shell::copy_tree(&source.game_data_dir(), &copy.game_data_dir(), skip)
                .context("copy game data")?;
            fs::create_dir_all(copy.game_data_dir().join(WORLDS_DIR))
                .context("create worlds dir")?;

            let copy_id = copy.id().clone();
            let group = state
                .groups
                .iter_mut()
                .find(|group| group.contains(id))
                .ok_or_else(|| StoreError::UnknownInstance(id.clone()))?;
            let position = group.position_of(id).map_or(0, |index| index + 1);
            group.add_instances(position, vec![copy]);
            Ok(copy_id)
        });
        match copied {
            Ok(copy_id) => {
                info!("copied instance {id} to {copy_id}");
                Ok(copy_id)
            }
            Err(err) => {
                discard_directory(&directory);
                Err(err)
            }
        }
    }

    pub fn rename_instance(&mut self, id: &InstanceId, name: &str) -> Result<()> {
        self.instance_mut(id)?.rename(name)
    }

    pub fn change_instance_version(&mut self, id: &InstanceId, version: Arc<Version>) -> Result<()> {
        self.instance_mut(id)?.change_version(version)
    }

    pub fn set_instance_architecture(
        &mut self,
        id: &InstanceId,
        architecture: Architecture,
    ) -> Result<()> {
        self.instance_mut(id)?.set_architecture_choice(architecture)
    }

    pub fn save(&self) -> Result<()> {
        let file = GroupsFile {
            format_version: GROUPS_FORMAT_VERSION,
            groups: self
                .groups
                .iter()
                .map(|group| GroupEntry {
                    name: group.name().to_string(),
                    hidden: group.hidden(),
                    instances: group
                        .instances()
                        .iter()
                        .map(|instance| instance.id().clone())
                        .collect(),
                })
                .collect(),
            last_instance: self.last_instance.clone(),
        };
        let raw = serde_json::to_string_pretty(&file).context("serialize groups.json")?;
        let path = self.directory.join(GROUPS_FILE);
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, raw).context("write groups.json temp")?;
        fs::rename(&temp, &path).context("finalize groups.json")?;
        debug!("saved {}", path.display());
        Ok(())
    }

    /// Applies `change` and saves the index. On any failure the groups and
    /// last instance are restored, so memory never diverges from disk.
    fn transact<T>(&mut self, change: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let groups = self.groups.clone();
        let last_instance = self.last_instance.clone();
        let result = change(self).and_then(|value| self.save().map(|()| value));
        if result.is_err() {
            self.groups = groups;
            self.last_instance = last_instance;
        }
        result
    }

    fn instance_mut(&mut self, id: &InstanceId) -> Result<&mut Instance> {
        self.groups
            .iter_mut()
            .find_map(|group| group.instance_mut(id))
            .ok_or_else(|| StoreError::UnknownInstance(id.clone()).into())
    }

    fn require_instance(&self, id: &InstanceId) -> Result<&Instance> {
        self.instance(id)
            .ok_or_else(|| StoreError::UnknownInstance(id.clone()).into())
    }

    fn group_index(&self, name: &str) -> Result<usize> {
        self.groups
            .iter()
            .position(|group| group.name() == name)
            .ok_or_else(|| StoreError::UnknownGroup(name.to_string()).into())
    }

    fn first_named_index(&self) -> usize {
        match self.groups.first() {
            Some(group) if group.is_unnamed() => 1,
            _ => 0,
        }
    }

    /// Inserts without saving and returns the new index.
    fn insert_group(&mut self, group: InstanceGroup) -> Result<usize> {
        if self.group(group.name()).is_some() {
            return Err(StoreError::GroupExists(group.name().to_string()).into());
        }
        if group.is_unnamed() {
            self.groups.insert(0, group);
            Ok(0)
        } else {
            self.groups.push(group);
            Ok(self.groups.len() - 1)
        }
    }

    fn unnamed_group_mut(&mut self) -> &mut InstanceGroup {
        if self.first_named_index() == 0 {
            self.groups.insert(0, InstanceGroup::unnamed(Vec::new()));
        }
        &mut self.groups[0]
    }

    fn drop_empty_groups(&mut self) {
        self.groups.retain(|group| !group.is_empty());
    }
}

fn discard_directory(directory: &Path) {
    if let Err(err) = fs::remove_dir_all(directory) {
        warn!("could not remove {}: {err}", directory.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instance::{CONFIG_FILE, GAME_DATA_DIR},
        version::VersionType,
    };
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct StoreCtx {
        _root: TempDir,
        version: Arc<Version>,
        state: State,
    }

    fn id(dirname: &str) -> InstanceId {
        InstanceId::new(dirname).unwrap()
    }

    impl StoreCtx {
        fn create(&mut self, name: &str, group: &str) -> InstanceId {
            self.state
                .create_instance(name, group, self.version.clone())
                .unwrap()
        }

        fn layout(&self) -> Vec<(String, Vec<String>)> {
            self.state
                .instance_groups()
                .iter()
                .map(|group| {
                    (
                        group.name().to_string(),
                        group
                            .instances()
                            .iter()
                            .map(|instance| instance.id().to_string())
                            .collect(),
                    )
                })
                .collect()
        }

        fn saved(&self) -> serde_json::Value {
            let raw = fs::read_to_string(self.state.directory().join(GROUPS_FILE)).unwrap();
            serde_json::from_str(&raw).unwrap()
        }
    }

    fn layout_of(groups: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        groups
            .iter()
            .map(|(name, ids)| {
                (
                    name.to_string(),
                    ids.iter().map(|id| id.to_string()).collect(),
                )
            })
            .collect()
    }

    #[fixture]
    fn ctx() -> StoreCtx {
        let root = TempDir::new().unwrap();
        let version = Arc::new(Version::new(
            "1.20.62.2",
            VersionType::Release,
            vec![
                (Architecture::X64, vec!["g1".to_string()]),
                (Architecture::X86, vec!["g2".to_string()]),
            ],
            &root.path().join("versions"),
        ));
        let state = State::new(Vec::new(), None, root.path().to_path_buf());
        StoreCtx {
            _root: root,
            version,
            state,
        }
    }

    #[rstest]
    fn create_instance_allocates_directory_and_group(mut ctx: StoreCtx) {
        let id = ctx.create("My World", "");
        assert_eq!(id.as_str(), "My_World");
        let dir = ctx.state.directory().join("My_World");
        assert!(dir.join(GAME_DATA_DIR).is_dir());
        assert!(dir.join(CONFIG_FILE).is_file());

        ctx.create("Hard", "Survival");
        ctx.create("My World", "Survival");
        assert_eq!(
            ctx.layout(),
            layout_of(&[("", &["My_World"]), ("Survival", &["Hard", "My_World1"])])
        );
        assert_eq!(ctx.saved()["groups"][1]["instances"][1], "My_World1");
    }

    #[rstest]
    fn creating_an_unnamed_group_later_puts_it_first(mut ctx: StoreCtx) {
        ctx.create("a", "Named");
        ctx.create("b", "");
        assert_eq!(ctx.layout(), layout_of(&[("", &["b"]), ("Named", &["a"])]));
    }

    #[rstest]
    fn duplicate_group_names_are_rejected(mut ctx: StoreCtx) {
        ctx.create("a", "Survival");
        let err = ctx
            .state
            .add_instance_group(InstanceGroup::new("Survival", Vec::new(), false))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::GroupExists("Survival".to_string()))
        );
    }

    #[rstest]
    fn deleting_group_moves_instances_to_unnamed(mut ctx: StoreCtx) {
        ctx.create("X", "");
        ctx.create("Y", "Survival");
        ctx.state.delete_instance_group("Survival").unwrap();
        assert_eq!(ctx.layout(), layout_of(&[("", &["X", "Y"])]));
        assert_eq!(ctx.saved()["groups"].as_array().unwrap().len(), 1);
    }

    #[rstest]
    fn deleting_group_creates_unnamed_when_absent(mut ctx: StoreCtx) {
        ctx.create("a", "One");
        ctx.create("b", "Two");
        ctx.state.delete_instance_group("Two").unwrap();
        assert_eq!(ctx.layout(), layout_of(&[("", &["b"]), ("One", &["a"])]));
    }

    #[rstest]
    fn unnamed_group_cannot_be_deleted_moved_or_renamed(mut ctx: StoreCtx) {
        ctx.create("a", "");
        ctx.create("b", "Named");
        for err in [
            ctx.state.delete_instance_group("").unwrap_err(),
            ctx.state.move_instance_group(1, "").unwrap_err(),
            ctx.state.rename_instance_group("", "x").unwrap_err(),
        ] {
            assert_eq!(err.downcast_ref::<GroupError>(), Some(&GroupError::InvalidUnnamed));
        }
        let err = ctx.state.rename_instance_group("Named", " ").unwrap_err();
        assert_eq!(err.downcast_ref::<GroupError>(), Some(&GroupError::InvalidUnnamed));
    }

    #[rstest]
    fn named_groups_reorder_behind_unnamed(mut ctx: StoreCtx) {
        ctx.create("u", "");
        ctx.create("a", "A");
        ctx.create("b", "B");
        ctx.state.move_instance_group(0, "B").unwrap();
        assert_eq!(
            ctx.layout(),
            layout_of(&[("", &["u"]), ("B", &["b"]), ("A", &["a"])])
        );
    }

    #[rstest]
    fn moving_everything_out_drops_the_group(mut ctx: StoreCtx) {
        let a = ctx.create("a", "Old");
        let b = ctx.create("b", "Old");
        ctx.create("c", "Other");
        ctx.state.toggle_instance_group_hidden("Other").unwrap();

        ctx.state.move_instances(0, "Other", &[b, a]).unwrap();
        assert_eq!(ctx.layout(), layout_of(&[("Other", &["a", "b", "c"])]));
        assert!(!ctx.state.group("Other").unwrap().hidden());
    }

    #[rstest]
    fn moving_into_missing_group_creates_it(mut ctx: StoreCtx) {
        let a = ctx.create("a", "Old");
        ctx.create("b", "Old");
        ctx.state.move_instances(0, "Fresh", &[a.clone()]).unwrap();
        assert_eq!(
            ctx.layout(),
            layout_of(&[("Old", &["b"]), ("Fresh", &["a"])])
        );

        ctx.state.move_instances(0, "", &[a]).unwrap();
        assert_eq!(ctx.layout(), layout_of(&[("", &["a"]), ("Old", &["b"])]));
    }

    #[rstest]
    fn moving_within_a_group_reorders(mut ctx: StoreCtx) {
        let a = ctx.create("a", "G");
        ctx.create("b", "G");
        ctx.create("c", "G");
        ctx.state.move_instances(2, "G", &[a]).unwrap();
        assert_eq!(ctx.layout(), layout_of(&[("G", &["b", "c", "a"])]));
    }

    #[rstest]
    fn moving_unknown_instance_changes_nothing(mut ctx: StoreCtx) {
        let a = ctx.create("a", "G");
        let ghost = id("ghost");
        let err = ctx.state.move_instances(0, "H", &[a, ghost]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::UnknownInstance(_))
        ));
        assert_eq!(ctx.layout(), layout_of(&[("G", &["a"])]));
    }

    #[rstest]
    fn renaming_onto_existing_group_merges(mut ctx: StoreCtx) {
        ctx.create("a", "A");
        ctx.create("b", "B");
        ctx.state.rename_instance_group("B", "A").unwrap();
        assert_eq!(ctx.layout(), layout_of(&[("A", &["a", "b"])]));

        ctx.state.rename_instance_group("A", " C ").unwrap();
        assert_eq!(ctx.saved()["groups"][0]["name"], "C");
    }

    #[rstest]
    fn toggling_hidden_persists(mut ctx: StoreCtx) {
        ctx.create("a", "A");
        ctx.state.toggle_instance_group_hidden("A").unwrap();
        assert_eq!(ctx.saved()["groups"][0]["hidden"], true);
        let err = ctx.state.toggle_instance_group_hidden("missing").unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some());
    }

    #[rstest]
    fn copy_goes_after_source_and_skips_worlds(mut ctx: StoreCtx) {
        let a = ctx.create("World", "G");
        ctx.create("other", "G");
        let data = ctx.state.instance(&a).unwrap().game_data_dir();
        fs::create_dir_all(data.join(WORLDS_DIR).join("w1")).unwrap();
        fs::write(data.join("options.txt"), "x").unwrap();
        ctx.state.set_instance_architecture(&a, Architecture::X86).unwrap();

        let copy = ctx.state.copy_instance(&a, false).unwrap();
        assert_eq!(copy.as_str(), "World1");
        assert_eq!(ctx.layout(), layout_of(&[("G", &["World", "World1", "other"])]));

        let copied = ctx.state.instance(&copy).unwrap();
        assert_eq!(copied.name(), "World(copy)");
        assert_eq!(copied.architecture_choice(), Architecture::X86);
        let copied_data = copied.game_data_dir();
        assert!(copied_data.join("options.txt").is_file());
        assert!(copied_data.join(WORLDS_DIR).is_dir());
        assert!(!copied_data.join(WORLDS_DIR).join("w1").exists());

        let with_worlds = ctx.state.copy_instance(&a, true).unwrap();
        let data = ctx.state.instance(&with_worlds).unwrap().game_data_dir();
        assert!(data.join(WORLDS_DIR).join("w1").is_dir());
    }

    #[rstest]
    fn failed_copy_leaves_no_directory_behind(mut ctx: StoreCtx) {
        let src = ctx.create("src", "G");
        fs::remove_dir_all(ctx.state.instance(&src).unwrap().game_data_dir()).unwrap();

        let err = ctx.state.copy_instance(&src, true).unwrap_err();
        assert!(format!("{err:#}").contains("copy game data"));
        assert!(!ctx.state.directory().join("src1").exists());
        assert_eq!(ctx.layout(), layout_of(&[("G", &["src"])]));
        assert_eq!(ctx.saved()["groups"][0]["instances"], serde_json::json!(["src"]));
    }

    #[rstest]
    fn failed_index_write_leaves_memory_untouched(mut ctx: StoreCtx) {
        let a = ctx.create("a", "G");
        ctx.create("b", "H");
        fs::create_dir(ctx.state.directory().join("groups.json.tmp")).unwrap();

        assert!(ctx.state.toggle_instance_group_hidden("G").is_err());
        assert!(ctx.state.move_instances(0, "H", &[a.clone()]).is_err());
        assert!(ctx.state.rename_instance_group("H", "Z").is_err());
        assert!(ctx.state.delete_instance_group("G").is_err());
        assert!(ctx.state.set_last_instance(&a).is_err());
        assert!(ctx.state.create_instance("c", "G", ctx.version.clone()).is_err());

        assert_eq!(ctx.layout(), layout_of(&[("G", &["a"]), ("H", &["b"])]));
        assert!(!ctx.state.group("G").unwrap().hidden());
        assert!(ctx.state.last_instance().is_none());
        assert!(!ctx.state.directory().join("c").exists());
    }

    #[rstest]
    fn last_instance_is_saved_by_dirname(mut ctx: StoreCtx) {
        let a = ctx.create("a", "");
        ctx.state.set_last_instance(&a).unwrap();
        assert_eq!(ctx.saved()["last_instance"], "a");
        assert_eq!(ctx.state.last_instance().map(|i| i.id().clone()), Some(a));
        assert!(ctx.state.set_last_instance(&id("nope")).is_err());
    }

    #[test]
    fn index_validation_rules() {
        let parse = |raw: &str| serde_json::from_str::<GroupsFile>(raw).unwrap();
        assert!(parse(r#"{"format_version":1,"groups":[{"name":"","hidden":false,"instances":["a"]},{"name":"G","hidden":true,"instances":["b"]}],"last_instance":"a"}"#)
            .validate()
            .is_ok());
        assert!(parse(r#"{"format_version":1,"groups":[{"name":"G","hidden":false,"instances":[]},{"name":"","hidden":false,"instances":[]}],"last_instance":null}"#)
            .validate()
            .is_err());
        assert!(parse(r#"{"format_version":1,"groups":[{"name":"G ","hidden":false,"instances":[]}],"last_instance":null}"#)
            .validate()
            .is_err());
        assert!(parse(r#"{"format_version":1,"groups":[{"name":"G","hidden":false,"instances":["a"]},{"name":"H","hidden":false,"instances":["a"]}],"last_instance":null}"#)
            .validate()
            .is_err());
        assert!(parse(r#"{"format_version":1,"groups":[{"name":"G","hidden":false,"instances":[]},{"name":"G","hidden":false,"instances":[]}],"last_instance":null}"#)
            .validate()
            .is_err());
        assert!(serde_json::from_str::<GroupsFile>(
            r#"{"format_version":1,"groups":[{"name":"G","hidden":false,"instances":["a b"]}],"last_instance":null}"#
        )
        .is_err());
    }
}
