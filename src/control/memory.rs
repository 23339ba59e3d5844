//! Placement table mutated directly by callers.
//!
//! Used for single-node deployments seeded from configuration and by tests.
//! Every mutation that affects the local host is pushed to the handler.

use super::{local_parts, HandlerSlot, LifecycleHandler, PartMeta, PartsMap, PlacementProvider};
use crate::core::error::StoreResult;
use crate::core::host::HostAddr;
use crate::{PartitionId, SpaceId};
use parking_lot::RwLock;
use std::sync::Weak;

pub struct MemPlacementProvider {
    local: HostAddr,
    table: RwLock<PartsMap>,
    handler: HandlerSlot,
}

impl MemPlacementProvider {
    /// Provider for the host serving at `local`.
    pub fn new(local: HostAddr) -> Self {
        Self {
            local,
            table: RwLock::new(PartsMap::new()),
            handler: HandlerSlot::default(),
        }
    }

    pub fn local_addr(&self) -> HostAddr {
        self.local
    }

    /// Place a partition. Notifies `add_space` when this is the first local
    /// partition of the space, then `add_part` when the partition is new.
    /// Re-adding a local partition only refreshes its peers; re-placing it
    /// away from this host notifies `remove_part`, then `remove_space` when
    /// it was the last local partition of the space.
    pub fn add_part(&self, space: SpaceId, part: PartitionId, peers: Vec<HostAddr>) {
        let meta = PartMeta::new(space, part, peers);
        let now_local = meta.is_placed_on(self.local);
        let (had_space, was_local, has_space) = {
            let mut table = self.table.write();
            let parts = table.entry(space).or_default();
            let had_space = parts.values().any(|m| m.is_placed_on(self.local));
            let was_local = parts
                .insert(part, meta)
                .is_some_and(|m| m.is_placed_on(self.local));
            let has_space = parts.values().any(|m| m.is_placed_on(self.local));
            (had_space, was_local, has_space)
        };

        match (was_local, now_local) {
            (false, true) => {
                tracing::debug!(space, part, new_space = !had_space, "placing partition");
                if !had_space {
                    self.handler.add_space(space);
                }
                self.handler.add_part(space, part);
            }
            (true, false) => {
                tracing::debug!(space, part, emptied = !has_space, "partition moved off this host");
                self.handler.remove_part(space, part);
                if !has_space {
                    self.handler.remove_space(space);
                }
            }
            _ => {}
        }
    }

    /// Remove a partition. Notifies `remove_part`, then `remove_space` once
    /// the space has no local partitions left.
    pub fn remove_part(&self, space: SpaceId, part: PartitionId) {
        let (was_local, emptied) = {
            let mut table = self.table.write();
            let Some(parts) = table.get_mut(&space) else {
                return;
            };
            let Some(meta) = parts.remove(&part) else {
                return;
            };
            let was_local = meta.is_placed_on(self.local);
            let emptied = !parts.values().any(|m| m.is_placed_on(self.local));
            if parts.is_empty() {
                table.remove(&space);
            }
            (was_local, emptied)
        };
        if !was_local {
            return;
        }

        tracing::debug!(space, part, emptied, "removing partition");
        self.handler.remove_part(space, part);
        if emptied {
            self.handler.remove_space(space);
        }
    }

    /// Remove a space with all of its partitions.
    pub fn remove_space(&self, space: SpaceId) {
        let had_local = match self.table.write().remove(&space) {
            Some(parts) => parts.values().any(|m| m.is_placed_on(self.local)),
            None => false,
        };
        if had_local {
            self.handler.remove_space(space);
        }
    }
}

impl PlacementProvider for MemPlacementProvider {
    fn parts_of(&self, host: HostAddr) -> PartsMap {
        local_parts(&self.table.read(), host)
    }

    fn part_meta(&self, space: SpaceId, part: PartitionId) -> Option<PartMeta> {
        self.table.read().get(&space)?.get(&part).cloned()
    }

    fn part_exists(&self, host: HostAddr, space: SpaceId, part: PartitionId) -> bool {
        self.table
            .read()
            .get(&space)
            .and_then(|parts| parts.get(&part))
            .is_some_and(|meta| meta.is_placed_on(host))
    }

    fn space_exists(&self, host: HostAddr, space: SpaceId) -> bool {
        self.table
            .read()
            .get(&space)
            .is_some_and(|parts| parts.values().any(|m| m.is_placed_on(host)))
    }

    fn register_handler(&self, handler: Weak<dyn LifecycleHandler>) -> StoreResult<()> {
        self.handler.register(handler)
    }
}
