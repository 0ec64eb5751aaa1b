//! Ports and the pending-update queue
//!
//! A port is a plain integer tag attached to an update batch. It owns no
//! data and holds no reference back to the table; subscribers read the tag
//! off each event to tell their own writes from everyone else's.
//!
//! Port 0 always exists. `make_port` hands out 1, 2, 3, ... per table.

use crate::column::ColumnValue;
use crate::data::Row;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub type PortId = u32;

/// Implicit port used when an update names none.
pub const DEFAULT_PORT: PortId = 0;

/// Allocates port ids for one table.
#[derive(Debug, Clone)]
pub struct PortManager {
    next: PortId,
    live: BTreeSet<PortId>,
}

impl PortManager {
    pub fn new() -> Self {
        PortManager {
            next: DEFAULT_PORT + 1,
            live: BTreeSet::from([DEFAULT_PORT]),
        }
    }

    /// Allocate the next port id.
    pub fn make_port(&mut self) -> PortId {
        let id = self.next;
        self.next += 1;
        self.live.insert(id);
        log::debug!("allocated port {}", id);
        id
    }

    pub fn contains(&self, port: PortId) -> bool {
        self.live.contains(&port)
    }

    /// Live port ids in creation order.
    pub fn ports(&self) -> Vec<PortId> {
        self.live.iter().copied().collect()
    }
}

impl Default for PortManager {
    fn default() -> Self {
        Self::new()
    }
}

/// One validated unit of work queued against a table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Batch {
    /// Rows coerced to the schema. Indexed tables upsert by key.
    Rows(Vec<Row>),
    /// Primary-key values to delete.
    Remove(Vec<ColumnValue>),
    /// Drop every row.
    Clear,
}

/// Batches waiting to be applied, bucketed by port.
///
/// Batches on one port stay FIFO. Draining always picks the lowest port id
/// that has work, so port-creation order decides delivery order.
#[derive(Debug, Default)]
pub(crate) struct PendingBatches {
    by_port: BTreeMap<PortId, VecDeque<Batch>>,
}

impl PendingBatches {
    pub fn push(&mut self, port: PortId, batches: impl IntoIterator<Item = Batch>) {
        self.by_port.entry(port).or_default().extend(batches);
    }

    /// Take every pending batch of the lowest port that has any.
    pub fn take_next(&mut self) -> Option<(PortId, Vec<Batch>)> {
        let port = *self.by_port.keys().next()?;
        let batches = self.by_port.remove(&port)?;
        Some((port, batches.into_iter().collect()))
    }

    pub fn is_empty(&self) -> bool {
        self.by_port.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_port.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_are_monotonic_from_one() {
        let mut ports = PortManager::new();
        let ids: Vec<PortId> = (0..10).map(|_| ports.make_port()).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert!(ports.contains(DEFAULT_PORT));
        assert_eq!(ports.ports().len(), 11);
    }

    #[test]
    fn test_pending_batches_drain_lowest_port_first() {
        let mut pending = PendingBatches::default();
        pending.push(7, [Batch::Clear]);
        pending.push(3, [Batch::Remove(vec![ColumnValue::Integer(1)])]);
        pending.push(7, [Batch::Remove(vec![ColumnValue::Integer(2)])]);

        let (port, batches) = pending.take_next().unwrap();
        assert_eq!(port, 3);
        assert_eq!(batches.len(), 1);

        let (port, batches) = pending.take_next().unwrap();
        assert_eq!(port, 7);
        assert_eq!(batches[0], Batch::Clear);
        assert!(pending.take_next().is_none());
        assert!(pending.is_empty());
    }
}
