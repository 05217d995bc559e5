//! Signal ingestion
//!
//! Narrow adapters that accept asynchronously produced priority signals
//! (expertise deltas, cluster assignments, uncertainty scores, LLM
//! confidence) and merge them into the item store without blocking
//! assignment requests.
//!
//! Producers push immutable `SignalUpdate` messages onto an mpsc channel
//! with a non-blocking `try_send`; a single writer task per engine drains
//! the channel and applies updates to the narrow per-item signal locks. The
//! writer never touches capacity words or ledgers. Priority signals are
//! advisory, not safety-critical: last-write-wins is acceptable and the
//! staleness window is bounded by each producer's cadence.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use corvee_common::events::{EngineEvent, EventBus};
use corvee_common::{ItemId, UserId};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::db;
use crate::engine::expertise::ExpertiseStore;
use crate::engine::metrics::Metrics;
use crate::engine::store::ItemStore;

/// Default capacity of the signal channel
pub const SIGNAL_CHANNEL_CAPACITY: usize = 256;

/// Immutable update message produced by an external job
#[derive(Debug, Clone)]
pub enum SignalUpdate {
    /// Periodic consensus recomputation result for one user
    Expertise {
        user_id: UserId,
        scores: HashMap<String, f64>,
    },
    /// Full cluster assignment map from the embedding/clustering job;
    /// generations are monotonic and start at 1
    Clusters {
        assignments: HashMap<ItemId, u32>,
        generation: u64,
    },
    /// Classifier uncertainty scores from the retraining job
    Uncertainty { scores: HashMap<ItemId, f64> },
    /// Confidence scores from the LLM batch job
    LlmConfidence { scores: HashMap<ItemId, f64> },
}

impl SignalUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalUpdate::Expertise { .. } => "expertise",
            SignalUpdate::Clusters { .. } => "clusters",
            SignalUpdate::Uncertainty { .. } => "uncertainty",
            SignalUpdate::LlmConfidence { .. } => "llm_confidence",
        }
    }
}

/// Result of applying one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// The update was merged; `written` counts per-item/per-category writes
    Applied { written: usize },
    /// The update lost a generation race and was discarded
    Stale { current_generation: u64 },
}

/// Per-user cluster pass bookkeeping plus the applied cluster generation
///
/// Scoped per-run: a new cluster generation resets every pass.
#[derive(Default)]
pub struct ClusterTracker {
    draws: Mutex<HashMap<UserId, HashMap<u32, u32>>>,
    generation: AtomicU64,
}

impl ClusterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the cluster map currently applied (0 = none yet)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn set_generation(&self, generation: u64) {
        self.generation.store(generation, Ordering::Release);
    }

    /// Clusters this user has exhausted in the current pass
    /// (per-pass draws >= threshold)
    pub fn drawn(&self, user: UserId, threshold: u32) -> HashSet<u32> {
        let draws = self.draws.lock().unwrap();
        match draws.get(&user) {
            Some(counts) => counts
                .iter()
                .filter(|(_, &n)| n >= threshold)
                .map(|(&cluster, _)| cluster)
                .collect(),
            None => HashSet::new(),
        }
    }

    /// Record a draw; returns true when the user has now exhausted every
    /// cluster in `present` (pass complete — the user's pass resets)
    pub fn note_draw(
        &self,
        user: UserId,
        cluster: u32,
        present: &HashSet<u32>,
        threshold: u32,
    ) -> bool {
        let mut draws = self.draws.lock().unwrap();
        let counts = draws.entry(user).or_default();
        *counts.entry(cluster).or_insert(0) += 1;

        let complete = !present.is_empty()
            && present
                .iter()
                .all(|c| counts.get(c).copied().unwrap_or(0) >= threshold);
        if complete {
            counts.clear();
        }
        complete
    }

    /// Drop all pass state (new cluster generation arrived)
    pub fn reset_all(&self) {
        self.draws.lock().unwrap().clear();
    }
}

/// Applies updates to the stores; one instance per engine, driven by the
/// writer task (tests may call `apply` directly)
pub struct SignalApplier {
    store: Arc<ItemStore>,
    expertise: Arc<ExpertiseStore>,
    clusters: Arc<ClusterTracker>,
    bus: EventBus,
    metrics: Arc<Metrics>,
    pool: Option<SqlitePool>,
}

impl SignalApplier {
    pub fn new(
        store: Arc<ItemStore>,
        expertise: Arc<ExpertiseStore>,
        clusters: Arc<ClusterTracker>,
        bus: EventBus,
        metrics: Arc<Metrics>,
        pool: Option<SqlitePool>,
    ) -> Self {
        Self {
            store,
            expertise,
            clusters,
            bus,
            metrics,
            pool,
        }
    }

    /// Apply one update; returns whether it was merged or discarded
    pub async fn apply(&self, update: SignalUpdate) -> ApplyResult {
        let result = match update {
            SignalUpdate::Expertise { user_id, scores } => {
                let merged = self.expertise.merge(user_id, &scores);
                if let Some(pool) = &self.pool {
                    if let Err(e) = db::upsert_scores(pool, user_id, &merged).await {
                        warn!(user_id = %user_id, "failed to persist expertise profile: {e}");
                    }
                }
                ApplyResult::Applied {
                    written: scores.len(),
                }
            }
            SignalUpdate::Clusters {
                assignments,
                generation,
            } => {
                let current = self.clusters.generation();
                if generation <= current {
                    debug!(
                        generation,
                        current, "stale cluster assignment generation discarded"
                    );
                    self.metrics
                        .stale_signals_total
                        .fetch_add(1, Ordering::Relaxed);
                    self.bus.emit_lossy(EngineEvent::SignalStale {
                        kind: "clusters".to_string(),
                        current_generation: current,
                        stale_generation: generation,
                        timestamp: chrono::Utc::now(),
                    });
                    return ApplyResult::Stale {
                        current_generation: current,
                    };
                }
                let mut written = 0;
                for (item_id, cluster) in assignments {
                    if self.store.set_cluster(item_id, cluster) {
                        written += 1;
                    }
                }
                self.clusters.set_generation(generation);
                // New generation opens a fresh pass for everyone
                self.clusters.reset_all();
                ApplyResult::Applied { written }
            }
            SignalUpdate::Uncertainty { scores } => {
                let mut written = 0;
                for (item_id, score) in scores {
                    if self.store.set_uncertainty(item_id, score) {
                        written += 1;
                    }
                }
                ApplyResult::Applied { written }
            }
            SignalUpdate::LlmConfidence { scores } => {
                let mut written = 0;
                for (item_id, score) in scores {
                    if self.store.set_llm_confidence(item_id, score) {
                        written += 1;
                    }
                }
                ApplyResult::Applied { written }
            }
        };

        if matches!(result, ApplyResult::Applied { .. }) {
            self.metrics
                .signals_applied_total
                .fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

/// Spawn the single writer task draining the signal channel
pub fn spawn_signal_writer(
    applier: Arc<SignalApplier>,
    mut rx: mpsc::Receiver<SignalUpdate>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            let kind = update.kind();
            if let ApplyResult::Applied { written } = applier.apply(update).await {
                debug!(kind, written, "signal update applied");
            }
        }
        debug!("signal channel closed; writer task exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::ItemDef;
    use uuid::Uuid;

    fn applier(n_items: usize) -> (SignalApplier, Arc<ItemStore>, Arc<ClusterTracker>) {
        let metrics = Arc::new(Metrics::default());
        let bus = EventBus::new(16);
        let defs = (0..n_items)
            .map(|i| ItemDef {
                id: Uuid::from_u128(i as u128 + 1),
                categories: vec!["economics".to_string()],
            })
            .collect();
        let store = Arc::new(ItemStore::new(defs, -1, bus.clone(), metrics.clone()).unwrap());
        let expertise = Arc::new(ExpertiseStore::new(1.0));
        let clusters = Arc::new(ClusterTracker::new());
        let applier = SignalApplier::new(
            store.clone(),
            expertise,
            clusters.clone(),
            bus,
            metrics,
            None,
        );
        (applier, store, clusters)
    }

    fn item_id(i: u128) -> ItemId {
        Uuid::from_u128(i + 1)
    }

    #[tokio::test]
    async fn test_uncertainty_scores_applied() {
        let (applier, store, _) = applier(2);
        let scores = [(item_id(0), 0.9), (item_id(1), 0.4)].into_iter().collect();

        let result = applier.apply(SignalUpdate::Uncertainty { scores }).await;
        assert_eq!(result, ApplyResult::Applied { written: 2 });
        assert_eq!(store.view(item_id(0)).unwrap().uncertainty, Some(0.9));
        assert_eq!(store.view(item_id(1)).unwrap().uncertainty, Some(0.4));
    }

    #[tokio::test]
    async fn test_unknown_items_skipped_not_fatal() {
        let (applier, store, _) = applier(1);
        let scores = [(item_id(0), 0.7), (Uuid::new_v4(), 0.2)]
            .into_iter()
            .collect();

        let result = applier.apply(SignalUpdate::LlmConfidence { scores }).await;
        assert_eq!(result, ApplyResult::Applied { written: 1 });
        assert_eq!(store.view(item_id(0)).unwrap().llm_confidence, Some(0.7));
    }

    #[tokio::test]
    async fn test_stale_cluster_generation_discarded() {
        let (applier, store, clusters) = applier(2);

        let gen2: HashMap<ItemId, u32> = [(item_id(0), 5)].into_iter().collect();
        let result = applier
            .apply(SignalUpdate::Clusters {
                assignments: gen2,
                generation: 2,
            })
            .await;
        assert_eq!(result, ApplyResult::Applied { written: 1 });
        assert_eq!(clusters.generation(), 2);

        // A slower generation-1 recompute arrives late; must be discarded
        let gen1: HashMap<ItemId, u32> = [(item_id(0), 9)].into_iter().collect();
        let result = applier
            .apply(SignalUpdate::Clusters {
                assignments: gen1,
                generation: 1,
            })
            .await;
        assert_eq!(result, ApplyResult::Stale { current_generation: 2 });
        assert_eq!(store.view(item_id(0)).unwrap().cluster_id, Some(5));
    }

    #[tokio::test]
    async fn test_new_generation_resets_passes() {
        let (applier, _, clusters) = applier(1);
        let user = Uuid::new_v4();

        let present: HashSet<u32> = [0, 1].into_iter().collect();
        clusters.note_draw(user, 0, &present, 1);
        assert_eq!(clusters.drawn(user, 1).len(), 1);

        let assignments: HashMap<ItemId, u32> = [(item_id(0), 0)].into_iter().collect();
        applier
            .apply(SignalUpdate::Clusters {
                assignments,
                generation: 1,
            })
            .await;
        assert!(clusters.drawn(user, 1).is_empty());
    }

    #[tokio::test]
    async fn test_writer_task_drains_channel() {
        let (applier, store, _) = applier(1);
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_signal_writer(Arc::new(applier), rx);

        let scores: HashMap<ItemId, f64> = [(item_id(0), 0.33)].into_iter().collect();
        tx.send(SignalUpdate::Uncertainty { scores }).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(store.view(item_id(0)).unwrap().uncertainty, Some(0.33));
    }

    #[test]
    fn test_cluster_pass_completion() {
        let tracker = ClusterTracker::new();
        let user = Uuid::new_v4();
        let present: HashSet<u32> = [0, 1, 2].into_iter().collect();

        assert!(!tracker.note_draw(user, 0, &present, 1));
        assert!(!tracker.note_draw(user, 1, &present, 1));
        // Final cluster completes the pass and resets it
        assert!(tracker.note_draw(user, 2, &present, 1));
        assert!(tracker.drawn(user, 1).is_empty());
    }

    #[test]
    fn test_cluster_pass_threshold_two() {
        let tracker = ClusterTracker::new();
        let user = Uuid::new_v4();
        let present: HashSet<u32> = [0, 1].into_iter().collect();

        assert!(!tracker.note_draw(user, 0, &present, 2));
        assert!(!tracker.note_draw(user, 1, &present, 2));
        assert!(!tracker.note_draw(user, 0, &present, 2));
        assert_eq!(tracker.drawn(user, 2), [0].into_iter().collect());
        assert!(tracker.note_draw(user, 1, &present, 2));
    }
}
