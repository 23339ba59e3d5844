//! Placement cache fed by metadata-service change events.
//!
//! The metadata service is an external collaborator. Its change stream is
//! modelled as [`MetaChange`] events, applied one at a time either directly
//! through [`MetaPlacementProvider::apply_change`] or by a listener task
//! draining a channel. Only changes that move a partition onto or off the
//! local host reach the handler.

use super::{local_parts, HandlerSlot, LifecycleHandler, PartMeta, PartsMap, PlacementProvider};
use crate::core::error::StoreResult;
use crate::core::host::HostAddr;
use crate::{PartitionId, SpaceId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A placement change published by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaChange {
    SpaceAdded(SpaceId),
    SpaceRemoved(SpaceId),
    PartAdded(PartMeta),
    /// New peer set of an existing partition.
    PartUpdated(PartMeta),
    PartRemoved { space: SpaceId, part: PartitionId },
}

/// Notification derived from one change, sent after the table lock drops.
#[derive(Debug, PartialEq, Eq)]
enum Notify {
    AddSpace(SpaceId),
    AddPart(SpaceId, PartitionId),
    RemovePart(SpaceId, PartitionId),
    RemoveSpace(SpaceId),
}

pub struct MetaPlacementProvider {
    local: HostAddr,
    table: RwLock<PartsMap>,
    handler: HandlerSlot,
}

impl MetaPlacementProvider {
    pub fn new(local: HostAddr) -> Self {
        Self::with_snapshot(local, PartsMap::new())
    }

    /// Provider primed with a full placement snapshot.
    pub fn with_snapshot(local: HostAddr, snapshot: PartsMap) -> Self {
        Self {
            local,
            table: RwLock::new(snapshot),
            handler: HandlerSlot::default(),
        }
    }

    pub fn local_addr(&self) -> HostAddr {
        self.local
    }

    fn has_local_parts(&self, table: &PartsMap, space: SpaceId) -> bool {
        table
            .get(&space)
            .is_some_and(|parts| parts.values().any(|m| m.is_placed_on(self.local)))
    }

    fn place(&self, table: &mut PartsMap, meta: PartMeta, out: &mut Vec<Notify>) {
        let (space, part) = (meta.space_id, meta.part_id);
        let had_space = self.has_local_parts(table, space);
        let now_local = meta.is_placed_on(self.local);
        let was_local = table
            .entry(space)
            .or_default()
            .insert(part, meta)
            .is_some_and(|m| m.is_placed_on(self.local));

        match (was_local, now_local) {
            (false, true) => {
                if !had_space {
                    out.push(Notify::AddSpace(space));
                }
                out.push(Notify::AddPart(space, part));
            }
            (true, false) => {
                out.push(Notify::RemovePart(space, part));
                if !self.has_local_parts(table, space) {
                    out.push(Notify::RemoveSpace(space));
                }
            }
            _ => {}
        }
    }

    fn evaluate(&self, change: MetaChange) -> Vec<Notify> {
        let mut out = Vec::new();
        let mut table = self.table.write();
        match change {
            MetaChange::SpaceAdded(space) => {
                table.entry(space).or_default();
            }
            MetaChange::SpaceRemoved(space) => {
                let had_local = self.has_local_parts(&table, space);
                table.remove(&space);
                if had_local {
                    out.push(Notify::RemoveSpace(space));
                }
            }
            MetaChange::PartAdded(meta) | MetaChange::PartUpdated(meta) => {
                self.place(&mut table, meta, &mut out);
            }
            MetaChange::PartRemoved { space, part } => {
                let removed = table.get_mut(&space).and_then(|parts| parts.remove(&part));
                if removed.is_some_and(|m| m.is_placed_on(self.local)) {
                    out.push(Notify::RemovePart(space, part));
                    if !self.has_local_parts(&table, space) {
                        out.push(Notify::RemoveSpace(space));
                    }
                }
            }
        }
        out
    }

    /// Apply one change and forward its local effects to the handler.
    pub fn apply_change(&self, change: MetaChange) {
        tracing::debug!(?change, "placement change");
        for notify in self.evaluate(change) {
            match notify {
                Notify::AddSpace(space) => self.handler.add_space(space),
                Notify::AddPart(space, part) => self.handler.add_part(space, part),
                Notify::RemovePart(space, part) => self.handler.remove_part(space, part),
                Notify::RemoveSpace(space) => self.handler.remove_space(space),
            }
        }
    }

    /// Apply changes from `rx` until every sender is dropped.
    pub fn spawn_listener(self: &Arc<Self>, mut rx: mpsc::Receiver<MetaChange>) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                provider.apply_change(change);
            }
            tracing::info!("placement change stream closed");
        })
    }
}

impl PlacementProvider for MetaPlacementProvider {
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
