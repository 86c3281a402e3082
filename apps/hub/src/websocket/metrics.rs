//! Room metric batching
//!
//! Metric-bearing states (sensors) mutate far more often than anyone wants
//! to repaint a dashboard. Instead of fanning out each mutation, updates
//! are coalesced per (room, metric) in a pending buffer and flushed as one
//! `roomMetricsUpdateBatch` after a quiet interval. The timer is trailing
//! edge: the first buffered update arms it, later updates within the window
//! only overwrite their slot.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;

use hearth_statestore::StateValue;

use crate::models::{MetricStatus, Room};

use super::messages::{MetricBatchEntry, MetricUpdate};

/// Static metadata of one configured metric, indexed by its state id
#[derive(Debug, Clone)]
struct MetricRef {
    room_id: String,
    metric_id: String,
    unit: Option<String>,
    label: Option<String>,
    kind: Option<String>,
}

/// Coalesces metric state mutations into per-room batches
#[derive(Clone)]
pub struct RoomMetricsAggregator {
    inner: Arc<AggregatorInner>,
}

struct AggregatorInner {
    /// state id -> metrics reading it (a state can feed several rooms)
    index: RwLock<HashMap<String, Vec<MetricRef>>>,

    /// room id -> metric id -> latest update in the current window
    pending: Mutex<BTreeMap<String, BTreeMap<String, MetricUpdate>>>,

    /// Whether a flush timer is currently armed
    armed: AtomicBool,

    flush_interval: Duration,
    batches: mpsc::UnboundedSender<Vec<MetricBatchEntry>>,
}

impl RoomMetricsAggregator {
    /// Create an aggregator; flushed batches arrive on the returned receiver
    pub fn new(
        flush_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<MetricBatchEntry>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator = Self {
            inner: Arc::new(AggregatorInner {
                index: RwLock::new(HashMap::new()),
                pending: Mutex::new(BTreeMap::new()),
                armed: AtomicBool::new(false),
                flush_interval,
                batches: tx,
            }),
        };
        (aggregator, rx)
    }

    /// Rebuild the state-id index from the current room configuration
    pub fn build_index(&self, rooms: &HashMap<String, Room>) {
        let mut index: HashMap<String, Vec<MetricRef>> = HashMap::new();
        for room in rooms.values() {
            for metric in &room.metrics {
                if metric.state.is_empty() {
                    continue;
                }
                index.entry(metric.state.clone()).or_default().push(MetricRef {
                    room_id: room.id.clone(),
                    metric_id: metric.id.clone(),
                    unit: metric.unit.clone(),
                    label: Some(metric.label.clone()),
                    kind: metric.kind.clone(),
                });
            }
        }
        let total: usize = index.values().map(Vec::len).sum();
        tracing::debug!(states = index.len(), metrics = total, "Metric index rebuilt");
        *self.inner.index.write().unwrap_or_else(|e| e.into_inner()) = index;
    }

    /// All state ids currently feeding metrics
    pub fn metric_state_ids(&self) -> Vec<String> {
        self.inner
            .index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Route one state mutation; returns true when the state feeds a metric
    /// and was absorbed into the pending buffer
    pub fn handle_state_change(&self, state_id: &str, state: &StateValue) -> bool {
        let refs = {
            let index = self.inner.index.read().unwrap_or_else(|e| e.into_inner());
            match index.get(state_id) {
                Some(refs) => refs.clone(),
                None => return false,
            }
        };

        {
            let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
            for r in &refs {
                pending.entry(r.room_id.clone()).or_default().insert(
                    r.metric_id.clone(),
                    MetricUpdate {
                        id: r.metric_id.clone(),
                        value: state.val.clone(),
                        ts: state.ts,
                        status: MetricStatus::from_value(&state.val),
                        unit: r.unit.clone(),
                        label: r.label.clone(),
                        kind: r.kind.clone(),
                    },
                );
            }
        }

        // Trailing edge: only the first update of a window arms the timer.
        if !self.inner.armed.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.flush_interval).await;
                flush(&inner);
            });
        }
        true
    }
}

/// Emit the buffered updates as one batch
///
/// Disarms before draining, so a mutation racing the flush arms a fresh
/// window instead of being lost.
fn flush(inner: &AggregatorInner) {
    inner.armed.store(false, Ordering::SeqCst);
    let pending = std::mem::take(&mut *inner.pending.lock().unwrap_or_else(|e| e.into_inner()));
    if pending.is_empty() {
        return;
    }

    let batch: Vec<MetricBatchEntry> = pending
        .into_iter()
        .map(|(room_id, metrics)| MetricBatchEntry {
            room_id,
            metrics: metrics.into_values().collect(),
        })
        .collect();
    tracing::debug!(rooms = batch.len(), "Flushing room metric batch");
    let _ = inner.batches.send(batch);
}
