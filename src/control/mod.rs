//! Placement integration.
//!
//! A [`PlacementProvider`] knows which partitions live on which host and
//! pushes placement changes to the single [`LifecycleHandler`] registered
//! with it. The store registers itself as that handler.
//!
//! - [`memory`] - Placement table mutated directly by callers
//! - [`meta`] - Placement cache fed by metadata-service change events
//!
//! Providers never hold their table lock while notifying the handler, since
//! the handler calls back into [`PlacementProvider::part_meta`].

pub mod memory;
pub mod meta;

pub use memory::MemPlacementProvider;
pub use meta::{MetaChange, MetaPlacementProvider};

use crate::core::error::{StoreError, StoreResult};
use crate::core::host::HostAddr;
use crate::{PartitionId, SpaceId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Placement of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartMeta {
    pub space_id: SpaceId,
    pub part_id: PartitionId,
    /// Service addresses of the replica group, in placement order.
    pub peers: Vec<HostAddr>,
}

impl PartMeta {
    pub fn new(space_id: SpaceId, part_id: PartitionId, peers: Vec<HostAddr>) -> Self {
        Self {
            space_id,
            part_id,
            peers,
        }
    }

    /// Whether `host` holds a replica. An empty peer set places the
    /// partition on every host that asks.
    pub fn is_placed_on(&self, host: HostAddr) -> bool {
        self.peers.is_empty() || self.peers.contains(&host)
    }
}

/// Space to partition to placement.
pub type PartsMap = BTreeMap<SpaceId, BTreeMap<PartitionId, PartMeta>>;

/// Receiver of placement changes.
///
/// Every notification is idempotent and may race with in-flight requests.
pub trait LifecycleHandler: Send + Sync {
    fn add_space(&self, space: SpaceId) -> StoreResult<()>;

    fn add_part(&self, space: SpaceId, part: PartitionId) -> StoreResult<()>;

    fn remove_space(&self, space: SpaceId) -> StoreResult<()>;

    fn remove_part(&self, space: SpaceId, part: PartitionId) -> StoreResult<()>;
}

/// Source of partition placement.
pub trait PlacementProvider: Send + Sync {
    /// Partitions placed on `host`.
    fn parts_of(&self, host: HostAddr) -> PartsMap;

    fn part_meta(&self, space: SpaceId, part: PartitionId) -> Option<PartMeta>;

    fn part_exists(&self, host: HostAddr, space: SpaceId, part: PartitionId) -> bool;

    fn space_exists(&self, host: HostAddr, space: SpaceId) -> bool;

    /// Register the handler receiving change notifications. Only one
    /// handler may ever be registered.
    fn register_handler(&self, handler: Weak<dyn LifecycleHandler>) -> StoreResult<()>;
}

/// Filter a table down to the partitions placed on `host`.
pub(crate) fn local_parts(table: &PartsMap, host: HostAddr) -> PartsMap {
    table
        .iter()
        .filter_map(|(space, parts)| {
            let local: BTreeMap<PartitionId, PartMeta> = parts
                .iter()
                .filter(|(_, meta)| meta.is_placed_on(host))
                .map(|(part, meta)| (*part, meta.clone()))
                .collect();
            (!local.is_empty()).then_some((*space, local))
        })
        .collect()
}

/// The single handler slot of a provider.
#[derive(Default)]
pub(crate) struct HandlerSlot {
    handler: RwLock<Option<Weak<dyn LifecycleHandler>>>,
}

impl HandlerSlot {
    pub(crate) fn register(&self, handler: Weak<dyn LifecycleHandler>) -> StoreResult<()> {
        let mut slot = self.handler.write();
        if slot.is_some() {
            return Err(StoreError::invalid(
                "a lifecycle handler is already registered",
            ));
        }
        *slot = Some(handler);
        Ok(())
    }

    fn get(&self) -> Option<Arc<dyn LifecycleHandler>> {
        self.handler.read().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn add_space(&self, space: SpaceId) {
        if let Some(handler) = self.get() {
            if let Err(e) = handler.add_space(space) {
                tracing::error!(space, error = %e, "add space notification failed");
            }
        }
    }

    pub(crate) fn add_part(&self, space: SpaceId, part: PartitionId) {
        if let Some(handler) = self.get() {
            if let Err(e) = handler.add_part(space, part) {
                tracing::error!(space, part, error = %e, "add part notification failed");
            }
        }
    }

    pub(crate) fn remove_space(&self, space: SpaceId) {
        if let Some(handler) = self.get() {
            if let Err(e) = handler.remove_space(space) {
                tracing::error!(space, error = %e, "remove space notification failed");
            }
        }
    }

    pub(crate) fn remove_part(&self, space: SpaceId, part: PartitionId) {
        if let Some(handler) = self.get() {
            if let Err(e) = handler.remove_part(space, part) {
                tracing::error!(space, part, error = %e, "remove part notification failed");
            }
        }
    }
}
