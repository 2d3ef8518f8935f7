//! Task registry
//!
//! Owns every [`RequestGroup`] the engine knows about, in insertion order,
//! and answers the global "is there anything left to do" question.

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::request_group::RequestGroup;
use crate::types::{DownloadId, Fingerprint};

#[derive(Debug, Default)]
pub struct TaskRegistry {
    groups: HashMap<DownloadId, RequestGroup>,
    order: Vec<DownloadId>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task.
    ///
    /// Fails with `AlreadyExists` when an unfinished task already carries
    /// the same fingerprint.
    pub fn add(&mut self, group: RequestGroup) -> Result<DownloadId> {
        if let Some(fp) = group.context().fingerprint() {
            if self.find_by_fingerprint(&fp).is_some() {
                return Err(EngineError::AlreadyExists(fp.to_hex()));
            }
        }

        let id = group.id();
        if self.groups.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id.to_string()));
        }
        self.order.push(id);
        self.groups.insert(id, group);
        Ok(id)
    }

    pub fn get(&self, id: DownloadId) -> Option<&RequestGroup> {
        self.groups.get(&id)
    }

    pub fn get_mut(&mut self, id: DownloadId) -> Option<&mut RequestGroup> {
        self.groups.get_mut(&id)
    }

    /// Unfinished task with the given fingerprint
    pub fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<DownloadId> {
        self.iter()
            .find(|g| {
                !g.state().is_finished() && g.context().fingerprint().as_ref() == Some(fingerprint)
            })
            .map(|g| g.id())
    }

    /// True when no task is waiting or active (vacuously true when empty)
    pub fn all_downloads_finished(&self) -> bool {
        self.groups.values().all(|g| g.state().is_finished())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Tasks in the order they were added
    pub fn iter(&self) -> impl Iterator<Item = &RequestGroup> {
        self.order.iter().filter_map(|id| self.groups.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_group::{DownloadContext, GroupState};

    fn group_with_fingerprint(byte: u8) -> RequestGroup {
        let mut ctx = DownloadContext::new(16384, 1024, "file.bin");
        ctx.set_fingerprint(Fingerprint([byte; 20]));
        RequestGroup::new("/tmp", ctx)
    }

    #[test]
    fn test_empty_registry_is_finished() {
        let registry = TaskRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.all_downloads_finished());
    }

    #[test]
    fn test_finished_tracks_states() {
        let mut registry = TaskRegistry::new();
        let id = registry.add(group_with_fingerprint(1)).unwrap();
        assert!(!registry.all_downloads_finished());

        registry.get_mut(id).unwrap().set_state(GroupState::Active);
        assert!(!registry.all_downloads_finished());

        registry.get_mut(id).unwrap().set_state(GroupState::Error);
        assert!(registry.all_downloads_finished());
    }

    #[test]
    fn test_duplicate_fingerprint_rejected_while_unfinished() {
        let mut registry = TaskRegistry::new();
        let first = registry.add(group_with_fingerprint(7)).unwrap();

        let err = registry.add(group_with_fingerprint(7)).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
        assert_eq!(registry.len(), 1);

        registry.get_mut(first).unwrap().set_state(GroupState::Complete);
        let second = registry.add(group_with_fingerprint(7)).unwrap();
        assert_eq!(
            registry.find_by_fingerprint(&Fingerprint([7; 20])),
            Some(second)
        );
    }

    #[test]
    fn test_groups_without_fingerprint_never_collide() {
        let mut registry = TaskRegistry::new();
        registry
            .add(RequestGroup::new("/tmp", DownloadContext::new(0, 0, "a")))
            .unwrap();
        registry
            .add(RequestGroup::new("/tmp", DownloadContext::new(0, 0, "a")))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_iter_keeps_insertion_order() {
        let mut registry = TaskRegistry::new();
        let ids: Vec<_> = (1..=4)
            .map(|b| registry.add(group_with_fingerprint(b)).unwrap())
            .collect();
        let seen: Vec<_> = registry.iter().map(|g| g.id()).collect();
        assert_eq!(seen, ids);
    }
}
