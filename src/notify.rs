//! Update notification
//!
//! Views publish one `UpdateEvent` per processed port batch to each of their
//! subscriptions. The payload depends on the subscription mode: nothing but
//! the port id, the changed rows, or the changed cells with old and new
//! values.

use crate::column::ColumnValue;
use crate::data::Row;
use crate::port::PortId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Port id only.
    #[default]
    None,
    /// Every changed output row, in full.
    Row,
    /// Every changed cell with its previous value.
    Cell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellChange {
    /// Primary key (flat views) or joined row path (pivoted views).
    pub row_key: ColumnValue,
    pub column: String,
    pub old: ColumnValue,
    pub new: ColumnValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delta {
    Rows { rows: Vec<Row>, removed: Vec<ColumnValue> },
    Cells(Vec<CellChange>),
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        match self {
            Delta::Rows { rows, removed } => rows.is_empty() && removed.is_empty(),
            Delta::Cells(cells) => cells.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateEvent {
    pub port_id: PortId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
}

pub type UpdateCallback = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

pub type SubscriptionId = u64;

#[derive(Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub mode: UpdateMode,
    pub callback: UpdateCallback,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Where a view is in the notification cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifierPhase {
    #[default]
    Idle,
    ComputingDelta,
    Dispatching,
}

/// A callback invocation queued while the table lock was held.
#[derive(Clone)]
pub(crate) struct PendingDispatch {
    pub view: u64,
    pub subscription: SubscriptionId,
    pub callback: UpdateCallback,
    pub event: UpdateEvent,
}

/// Run queued callbacks. A panicking callback is logged and skipped; the
/// rest still run.
pub(crate) fn dispatch(pending: Vec<PendingDispatch>) {
    for item in pending {
        let callback = item.callback;
        let event = item.event;
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(&event)));
        if outcome.is_err() {
            log::warn!(
                "update callback {} on view {} panicked (port {})",
                item.subscription,
                item.view,
                event.port_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_panicking_callback_does_not_stop_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let good: UpdateCallback = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let bad: UpdateCallback = Arc::new(|_| panic!("subscriber failure"));
        let event = UpdateEvent { port_id: 0, delta: None };

        dispatch(vec![
            PendingDispatch { view: 1, subscription: 0, callback: bad, event: event.clone() },
            PendingDispatch { view: 1, subscription: 1, callback: good, event },
        ]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&UpdateMode::Cell).unwrap(), "\"cell\"");
        let mode: UpdateMode = serde_json::from_str("\"row\"").unwrap();
        assert_eq!(mode, UpdateMode::Row);
        assert!(Delta::Cells(Vec::new()).is_empty());
    }
}
