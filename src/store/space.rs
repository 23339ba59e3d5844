//! Per-space registry of partitions and their engines.

use crate::engine::KvEngine;
use crate::part::Part;
use crate::{PartitionId, SpaceId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Partitions and engines of one space hosted on this store.
///
/// A partition is registered together with its engine and both are removed
/// together, so every registered partition has its engine present.
pub struct SpaceParts {
    space: SpaceId,
    parts: RwLock<HashMap<PartitionId, Arc<Part>>>,
    engines: RwLock<HashMap<PartitionId, Arc<dyn KvEngine>>>,
}

impl SpaceParts {
    pub fn new(space: SpaceId) -> Self {
        Self {
            space,
            parts: RwLock::new(HashMap::new()),
            engines: RwLock::new(HashMap::new()),
        }
    }

    pub fn space_id(&self) -> SpaceId {
        self.space
    }

    pub fn part(&self, part: PartitionId) -> Option<Arc<Part>> {
        self.parts.read().get(&part).cloned()
    }

    pub fn engine(&self, part: PartitionId) -> Option<Arc<dyn KvEngine>> {
        self.engines.read().get(&part).cloned()
    }

    /// Hosted partition ids, ascending.
    pub fn part_ids(&self) -> Vec<PartitionId> {
        let mut ids: Vec<PartitionId> = self.parts.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Hosted partitions, ascending by id.
    pub fn parts(&self) -> Vec<Arc<Part>> {
        let mut parts: Vec<Arc<Part>> = self.parts.read().values().cloned().collect();
        parts.sort_unstable_by_key(|p| p.part_id());
        parts
    }

    pub fn len(&self) -> usize {
        self.parts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.read().is_empty()
    }

    pub(crate) fn insert(&self, part: Arc<Part>) {
        let id = part.part_id();
        // Engine first: a reader that sees the part must find its engine.
        self.engines.write().insert(id, Arc::clone(part.engine()));
        self.parts.write().insert(id, part);
    }

    /// Unregister a partition, its engine after it.
    pub(crate) fn remove(&self, part: PartitionId) -> Option<Arc<Part>> {
        let removed = self.parts.write().remove(&part);
        if removed.is_some() {
            self.engines.write().remove(&part);
        }
        removed
    }

    /// Stop every participant and unregister everything.
    pub(crate) fn clear(&self) -> Vec<Arc<Part>> {
        let parts: Vec<Arc<Part>> = self.parts.write().drain().map(|(_, p)| p).collect();
        for part in &parts {
            part.stop();
        }
        self.engines.write().clear();
        parts
    }
}

impl Drop for SpaceParts {
    fn drop(&mut self) {
        self.parts.get_mut().clear();
        self.engines.get_mut().clear();
    }
}

impl std::fmt::Debug for SpaceParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceParts")
            .field("space", &self.space)
            .field("parts", &self.part_ids())
            .finish()
    }
}
