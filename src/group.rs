use crate::instance::{Instance, InstanceId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("the unnamed instance group cannot be renamed, hidden or removed")]
    InvalidUnnamed,
    #[error("instance {0} is not in this group")]
    InstanceNotInGroup(InstanceId),
}

/// Ordered bucket of instances. The empty name is the unnamed group, which
/// is never hidden.
///
/// Mutators here only change memory; [`crate::state::State`] wraps each of
/// them with a save of `groups.json`.
#[derive(Debug, Clone)]
pub struct InstanceGroup {
    name: String,
    hidden: bool,
    instances: Vec<Instance>,
}

impl InstanceGroup {
    pub fn new(name: &str, instances: Vec<Instance>, hidden: bool) -> Self {
        let name = name.trim().to_string();
        let hidden = hidden && !name.is_empty();
        Self {
            name,
            hidden,
            instances,
        }
    }

    pub fn unnamed(instances: Vec<Instance>) -> Self {
        Self::new("", instances, false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unnamed(&self) -> bool {
        self.name.is_empty()
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.position_of(id).is_some()
    }

    pub fn position_of(&self, id: &InstanceId) -> Option<usize> {
        self.instances.iter().position(|instance| instance.id() == id)
    }

    pub(crate) fn instance_mut(&mut self, id: &InstanceId) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|instance| instance.id() == id)
    }

    /// Returns whether anything changed; the unnamed group stays visible.
    pub(crate) fn toggle_hidden(&mut self) -> bool {
        if self.is_unnamed() {
            return false;
        }
        self.hidden = !self.hidden;
        true
    }

    pub(crate) fn show(&mut self) {
        self.hidden = false;
    }

    pub(crate) fn rename(&mut self, name: &str) -> Result<bool, GroupError> {
        let name = name.trim();
        if self.is_unnamed() || name.is_empty() {
            return Err(GroupError::InvalidUnnamed);
        }
        if name == self.name {
            return Ok(false);
        }
        self.name = name.to_string();
        Ok(true)
    }

    /// Inserts at `position`, clamped to the end of the group.
    pub(crate) fn add_instances(&mut self, position: usize, instances: Vec<Instance>) {
        let position = position.min(self.instances.len());
        self.instances.splice(position..position, instances);
    }

    /// Removes every listed instance, failing before any change if one is
    /// missing.
    pub(crate) fn remove_instances(&mut self, ids: &[InstanceId]) -> Result<Vec<Instance>, GroupError> {
        if let Some(missing) = ids.iter().find(|id| !self.contains(id)) {
            return Err(GroupError::InstanceNotInGroup(missing.clone()));
        }
        let mut removed = Vec::with_capacity(ids.len());
        let mut kept = Vec::with_capacity(self.instances.len());
        for instance in self.instances.drain(..) {
            if ids.contains(instance.id()) {
                removed.push(instance);
            } else {
                kept.push(instance);
            }
        }
        self.instances = kept;
        Ok(removed)
    }

    pub(crate) fn take_all(&mut self) -> Vec<Instance> {
        std::mem::take(&mut self.instances)
    }
}
