//! Sticky port allocation from named ranges

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::global::PortRangeSettings;
use crate::errors::LaunchpadError;
use crate::filesys::file::File;
use crate::ports::state::{PortState, RangeCursor};
use crate::storage::document::JsonDocument;

/// Source of ports hard-coded in descriptors
#[async_trait]
pub trait PinnedPorts: Send + Sync {
    async fn pinned_ports(&self) -> Result<BTreeSet<u16>, LaunchpadError>;
}

/// No pinned ports at all
pub struct NoPinnedPorts;

#[async_trait]
impl PinnedPorts for NoPinnedPorts {
    async fn pinned_ports(&self) -> Result<BTreeSet<u16>, LaunchpadError> {
        Ok(BTreeSet::new())
    }
}

/// Port allocator backed by the port state document
pub struct PortAllocator {
    doc: JsonDocument<PortState>,
    ranges: BTreeMap<String, PortRangeSettings>,
    pinned: Arc<dyn PinnedPorts>,
}

impl PortAllocator {
    pub fn new(
        file: File,
        ranges: BTreeMap<String, PortRangeSettings>,
        pinned: Arc<dyn PinnedPorts>,
    ) -> Self {
        Self {
            doc: JsonDocument::new(file),
            ranges,
            pinned,
        }
    }

    /// Current snapshot of the allocation state
    pub async fn state(&self) -> Result<PortState, LaunchpadError> {
        self.doc.load().await
    }

    /// Sticky allocation for `name`, if any
    pub async fn get(&self, name: &str) -> Result<Option<u16>, LaunchpadError> {
        Ok(self.doc.load().await?.allocations.get(name).copied())
    }

    /// Allocate a port for `name` from `range`.
    ///
    /// Returns the existing allocation unchanged when `name` already has one.
    /// Otherwise probes upward from the range cursor, skipping allocated,
    /// reserved, engine-managed and descriptor-pinned ports.
    pub async fn allocate(&self, name: &str, range: &str) -> Result<u16, LaunchpadError> {
        if let Some(port) = self.get(name).await? {
            debug!("Port {} already allocated to {}", port, name);
            return Ok(port);
        }

        let pinned = match self.pinned.pinned_ports().await {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Unable to scan descriptors for pinned ports, using allocation state only: {}", e);
                BTreeSet::new()
            }
        };

        let settings = self.ranges.get(range).copied();
        let port = self
            .doc
            .update(|state| {
                // Another writer may have allocated while we were scanning
                if let Some(port) = state.allocations.get(name) {
                    return Ok(*port);
                }

                let cursor = resolve_cursor(state, range, settings)?;

                let mut used = state.used_ports();
                used.extend(pinned.iter().copied());

                let port = probe(&cursor, &used).ok_or_else(|| LaunchpadError::RangeExhausted {
                    range: range.to_string(),
                    start: cursor.start,
                    end: cursor.end,
                })?;

                state.allocations.insert(name.to_string(), port);
                state.ranges.insert(
                    range.to_string(),
                    RangeCursor {
                        next: port.saturating_add(1),
                        ..cursor
                    },
                );
                Ok(port)
            })
            .await?;

        info!("Allocated port {} to {} from range '{}'", port, name, range);
        Ok(port)
    }

    /// Drop the sticky allocation for `name`. The range cursor is left untouched.
    pub async fn release(&self, name: &str) -> Result<Option<u16>, LaunchpadError> {
        self.doc
            .update(|state| Ok(state.allocations.remove(name)))
            .await
    }

    /// Exclude a port from automatic allocation
    pub async fn reserve(&self, port: u16) -> Result<(), LaunchpadError> {
        self.doc
            .update(|state| {
                state.reserved.insert(port);
                Ok(())
            })
            .await
    }

    /// Record the ports an engine manages itself
    pub async fn register_engine(&self, engine: &str, ports: &[u16]) -> Result<(), LaunchpadError> {
        if self.doc.load().await?.engines.get(engine).map(Vec::as_slice) == Some(ports) {
            return Ok(());
        }
        self.doc
            .update(|state| {
                state.engines.insert(engine.to_string(), ports.to_vec());
                Ok(())
            })
            .await
    }
}

fn resolve_cursor(
    state: &PortState,
    range: &str,
    settings: Option<PortRangeSettings>,
) -> Result<RangeCursor, LaunchpadError> {
    match (state.ranges.get(range), settings) {
        // Configured bounds win, the persisted cursor is kept
        (Some(cursor), Some(settings)) => Ok(RangeCursor {
            start: settings.start,
            end: settings.end,
            next: cursor.next.max(settings.start),
        }),
        (Some(cursor), None) => Ok(*cursor),
        (None, Some(settings)) => Ok(RangeCursor {
            start: settings.start,
            end: settings.end,
            next: settings.start,
        }),
        (None, None) => Err(LaunchpadError::UnknownRange(range.to_string())),
    }
}

fn probe(cursor: &RangeCursor, used: &BTreeSet<u16>) -> Option<u16> {
    (cursor.next..=cursor.end).find(|port| !used.contains(port))
}
