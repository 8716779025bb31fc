//! Persisted port allocation state (`state/ports.json`)

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Port allocation document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortState {
    /// Sticky allocations, name -> port
    #[serde(default)]
    pub allocations: BTreeMap<String, u16>,

    /// Ports that are never handed out automatically
    #[serde(default)]
    pub reserved: BTreeSet<u16>,

    /// Ports managed by engines themselves, engine name -> ports
    #[serde(default)]
    pub engines: BTreeMap<String, Vec<u16>>,

    /// Allocation cursors per named range
    #[serde(default)]
    pub ranges: BTreeMap<String, RangeCursor>,
}

impl PortState {
    /// Ports that must not be handed out: allocated, reserved and engine-managed
    pub fn used_ports(&self) -> BTreeSet<u16> {
        let mut used: BTreeSet<u16> = self.allocations.values().copied().collect();
        used.extend(self.reserved.iter().copied());
        used.extend(self.engines.values().flatten().copied());
        used
    }
}

/// A named range and its monotonically advancing cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCursor {
    pub start: u16,
    pub end: u16,
    pub next: u16,
}
