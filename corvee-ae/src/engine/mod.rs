//! Assignment Engine
//!
//! The coordinator is the single entry point for "next item" requests. It
//! holds the concurrency discipline: the idempotent pending path first, then
//! a capacity/category-filtered snapshot, a side-effect-free strategy call
//! outside any lock, a bounded reserve-retry loop, and finally the ledger
//! append. Signal ingestion runs entirely off this path.
//!
//! The engine is an explicitly constructed instance holding its injected
//! parts; nothing here is a global.

pub mod expertise;
pub mod ledger;
pub mod metrics;
pub mod signals;
pub mod store;
pub mod strategy;
pub mod sweeper;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use corvee_common::config::{CategoryFallback, CategoryMode, EngineConfig};
use corvee_common::events::{EngineEvent, EventBus};
use corvee_common::{ItemId, UserId};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::db;
use crate::engine::expertise::ExpertiseStore;
use crate::engine::ledger::Ledger;
use crate::engine::metrics::{Metrics, MetricsSnapshot};
use crate::engine::signals::{
    ClusterTracker, SignalApplier, SignalUpdate, SIGNAL_CHANNEL_CAPACITY,
};
use crate::engine::store::{CategoryFilter, ItemDef, ItemStore, ItemView};
use crate::engine::strategy::{
    pick_random, shared_rng, Selection, SharedRng, Strategy, StrategyRegistry, UserContext,
};
use crate::error::{Error, Result};

/// Bounded retries when a reserve loses a race, before degrading to Random
const MAX_RESERVE_RETRIES: u32 = 3;

/// How a user resolved an assignment
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Annotation submitted with these labels
    Annotated { labels: Vec<String> },
    /// User skipped or left without annotating
    Abandoned,
}

/// Per-user progress summary
#[derive(Debug, Clone, Serialize)]
pub struct UserProgress {
    /// Items ever assigned to this user
    pub assigned: usize,
    /// Items this user has annotated
    pub annotated: usize,
    /// Items still assignable to this user, capped by the per-user limit
    pub remaining: usize,
}

enum FilterPlan {
    Serve(Option<CategoryFilter>),
    NoWork,
}

/// The assignment engine
pub struct Engine {
    config: EngineConfig,
    store: Arc<ItemStore>,
    ledger: Arc<Ledger>,
    registry: StrategyRegistry,
    expertise: Arc<ExpertiseStore>,
    clusters: Arc<ClusterTracker>,
    bus: EventBus,
    metrics: Arc<Metrics>,
    rng: SharedRng,
    /// Outstanding reservations with their grant time, for the TTL sweeper
    reservations: Mutex<HashMap<(UserId, ItemId), Instant>>,
    signal_tx: mpsc::Sender<SignalUpdate>,
    signal_rx: Mutex<Option<mpsc::Receiver<SignalUpdate>>>,
    pool: Option<SqlitePool>,
}

impl Engine {
    /// Build an engine over the given items
    pub fn new(config: EngineConfig, items: Vec<ItemDef>) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::new(config.event_capacity);
        let metrics = Arc::new(Metrics::default());
        let rng = shared_rng(config.random_seed);
        let store = Arc::new(ItemStore::new(
            items,
            config.max_annotations_per_item,
            bus.clone(),
            metrics.clone(),
        )?);
        let registry = StrategyRegistry::from_config(&config, rng.clone())?;
        let expertise = Arc::new(ExpertiseStore::new(
            config.category_assignment.dynamic.learning_rate,
        ));
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

        info!(
            strategy = %config.assignment_strategy,
            items = store.len(),
            "assignment engine constructed"
        );

        Ok(Self {
            config,
            store,
            ledger: Arc::new(Ledger::new()),
            registry,
            expertise,
            clusters: Arc::new(ClusterTracker::new()),
            bus,
            metrics,
            rng,
            reservations: Mutex::new(HashMap::new()),
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            pool: None,
        })
    }

    /// Enable expertise persistence: reload stored profiles and write
    /// merges through to SQLite
    pub async fn with_persistence(mut self, pool: SqlitePool) -> Result<Self> {
        let profiles = db::load_profiles(&pool).await?;
        info!(users = profiles.len(), "loaded persisted expertise profiles");
        self.expertise = Arc::new(ExpertiseStore::with_profiles(
            self.config.category_assignment.dynamic.learning_rate,
            profiles,
        ));
        self.pool = Some(pool);
        Ok(self)
    }

    /// Spawn the background tasks: the signal writer and (when a TTL is
    /// configured) the reservation sweeper
    pub fn start(self: &Arc<Self>) {
        if let Some(rx) = self.signal_rx.lock().unwrap().take() {
            let applier = Arc::new(SignalApplier::new(
                self.store.clone(),
                self.expertise.clone(),
                self.clusters.clone(),
                self.bus.clone(),
                self.metrics.clone(),
                self.pool.clone(),
            ));
            signals::spawn_signal_writer(applier, rx);
        }
        if self.config.reservation_ttl_secs > 0 {
            sweeper::spawn_sweeper(self.clone());
        }
    }

    // ========================================
    // Exposed contract
    // ========================================

    /// Next item for this user, or None when no eligible work exists
    ///
    /// Repeated calls without an intervening outcome return the same item:
    /// the pending path is consulted before any strategy runs.
    pub fn next_instance(&self, user: UserId) -> Option<ItemId> {
        // 1. Idempotent path: unfinished already-assigned work
        if let Some(item) = self.ledger.pending(user) {
            return Some(item);
        }

        // 2. Per-user cap
        let (_, annotated) = self.ledger.progress(user);
        let max_user = self.config.max_annotations_per_user;
        if max_user >= 0 && annotated as i64 >= max_user {
            return self.refuse(user);
        }

        // 3. Snapshot eligible items
        let ctx = self.user_context(user);
        let filter = match self.category_filter(&ctx) {
            FilterPlan::Serve(filter) => filter,
            FilterPlan::NoWork => return self.refuse(user),
        };
        let assigned = self.ledger.assigned_snapshot(user);
        let mut eligible: Vec<ItemView> = self
            .store
            .snapshot(filter.as_ref())
            .into_iter()
            .filter(|v| !assigned.contains(&v.id))
            .collect();
        if eligible.is_empty() {
            return self.refuse(user);
        }

        // 4.-5. Select and reserve, with bounded retry on races
        let strategy = self.registry.active().clone();
        let mut attempts = 0u32;
        let picked = 'outer: loop {
            let candidate = match self.run_strategy(&strategy, &ctx, &eligible) {
                Selection::Picked(id) => id,
                Selection::FellBackToRandom { item_id, reason } => {
                    self.note_random_fallback(strategy.name(), reason);
                    item_id
                }
                Selection::NoEligibleItem => break None,
            };
            if self.store.reserve(candidate) {
                break Some(candidate);
            }
            // Expected race: another request took the last slot
            self.metrics
                .reservation_races_total
                .fetch_add(1, Ordering::Relaxed);
            eligible.retain(|v| v.id != candidate);
            if eligible.is_empty() {
                break None;
            }
            attempts += 1;
            if attempts >= MAX_RESERVE_RETRIES {
                // Degrade to Random among the remaining eligible items
                while let Some(id) = pick_random(&self.rng, &eligible) {
                    if self.store.reserve(id) {
                        break 'outer Some(id);
                    }
                    self.metrics
                        .reservation_races_total
                        .fetch_add(1, Ordering::Relaxed);
                    eligible.retain(|v| v.id != id);
                }
                break None;
            }
        };

        let Some(item) = picked else {
            return self.refuse(user);
        };

        // 6. Ledger append and bookkeeping
        self.ledger.append(user, item);
        self.reservations
            .lock()
            .unwrap()
            .insert((user, item), Instant::now());
        self.metrics.assignments_total.fetch_add(1, Ordering::Relaxed);
        self.note_cluster_draw(user, item);
        self.bus.emit_lossy(EngineEvent::AssignmentMade {
            user_id: user,
            item_id: item,
            strategy: strategy.name().to_string(),
            timestamp: chrono::Utc::now(),
        });
        Some(item)
    }

    /// Resolve a reservation: commit the annotation or release the slot
    ///
    /// Rejects outcomes for reservations that are not held (never granted,
    /// already resolved, or reclaimed by the sweeper) — the commit happens
    /// exactly once per reservation.
    pub fn record_outcome(&self, user: UserId, item: ItemId, outcome: Outcome) -> Result<()> {
        let held = self.reservations.lock().unwrap().remove(&(user, item));
        if held.is_none() {
            self.metrics
                .commits_rejected_total
                .fetch_add(1, Ordering::Relaxed);
            warn!(user_id = %user, item_id = %item, "outcome without outstanding reservation rejected");
            return Err(Error::OutcomeWithoutReservation {
                user_id: user,
                item_id: item,
            });
        }

        let annotated = matches!(outcome, Outcome::Annotated { .. });
        match outcome {
            Outcome::Annotated { labels } => {
                self.store.commit(item, true, &labels);
                self.ledger.mark_annotated(user, item);
            }
            Outcome::Abandoned => {
                self.store.commit(item, false, &[]);
                self.ledger.mark_abandoned(user, item);
            }
        }
        self.bus.emit_lossy(EngineEvent::OutcomeRecorded {
            user_id: user,
            item_id: item,
            annotated,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Read-only item summary for admin/monitoring surfaces
    pub fn item_summary(&self, item: ItemId) -> Option<ItemView> {
        self.store.view(item)
    }

    /// Per-user progress summary
    pub fn user_progress(&self, user: UserId) -> UserProgress {
        let (assigned, annotated) = self.ledger.progress(user);
        let assigned_set = self.ledger.assigned_snapshot(user);
        let open = self
            .store
            .snapshot(None)
            .into_iter()
            .filter(|v| !assigned_set.contains(&v.id))
            .count();
        let cap_left = match self.config.max_annotations_per_user {
            n if n >= 0 => (n as usize).saturating_sub(annotated),
            _ => usize::MAX,
        };
        UserProgress {
            assigned,
            annotated,
            remaining: open.min(cap_left),
        }
    }

    // ========================================
    // Consumed signals (fire-and-forget)
    // ========================================

    /// Annotation submitted through the platform: commits the reservation
    /// and triggers the disagreement recomputation
    pub fn on_annotation_submitted(
        &self,
        item: ItemId,
        user: UserId,
        labels: Vec<String>,
    ) -> Result<()> {
        self.record_outcome(user, item, Outcome::Annotated { labels })
    }

    /// Periodic consensus recomputation result
    pub fn on_expertise_recomputed(&self, user_id: UserId, scores: HashMap<String, f64>) {
        self.try_ingest(SignalUpdate::Expertise { user_id, scores });
    }

    /// New cluster assignment map from the embedding/clustering job
    pub fn on_cluster_assignments_updated(
        &self,
        assignments: HashMap<ItemId, u32>,
        generation: u64,
    ) {
        self.try_ingest(SignalUpdate::Clusters {
            assignments,
            generation,
        });
    }

    /// New uncertainty scores from the classifier retraining job
    pub fn on_uncertainty_scores_updated(&self, scores: HashMap<ItemId, f64>) {
        self.try_ingest(SignalUpdate::Uncertainty { scores });
    }

    /// New confidence scores from the LLM batch job
    pub fn on_llm_confidence_updated(&self, scores: HashMap<ItemId, f64>) {
        self.try_ingest(SignalUpdate::LlmConfidence { scores });
    }

    fn try_ingest(&self, update: SignalUpdate) {
        let kind = update.kind();
        if self.signal_tx.try_send(update).is_err() {
            warn!(kind, "signal channel full; dropping update");
        }
    }

    // ========================================
    // Accessors
    // ========================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn active_strategy_name(&self) -> &'static str {
        self.registry.active().name()
    }

    pub fn registry_mut(&mut self) -> &mut StrategyRegistry {
        &mut self.registry
    }

    pub fn item_count(&self) -> usize {
        self.store.len()
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ========================================
    // Internals
    // ========================================

    fn refuse(&self, user: UserId) -> Option<ItemId> {
        self.metrics.no_work_total.fetch_add(1, Ordering::Relaxed);
        self.bus.emit_lossy(EngineEvent::NoWorkAvailable {
            user_id: user,
            timestamp: chrono::Utc::now(),
        });
        None
    }

    fn note_random_fallback(&self, strategy: &str, reason: &str) {
        self.metrics
            .random_fallbacks_total
            .fetch_add(1, Ordering::Relaxed);
        self.bus.emit_lossy(EngineEvent::StrategyFellBack {
            strategy: strategy.to_string(),
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Run the strategy, catching panics; a fault degrades this single call
    /// to Random and never crashes the request path
    fn run_strategy(
        &self,
        strategy: &Arc<dyn Strategy>,
        ctx: &UserContext,
        eligible: &[ItemView],
    ) -> Selection {
        match catch_unwind(AssertUnwindSafe(|| strategy.select_next(ctx, eligible))) {
            Ok(selection) => selection,
            Err(_) => {
                self.metrics
                    .strategy_faults_total
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    strategy = strategy.name(),
                    "strategy panicked; degrading to random for this call"
                );
                self.bus.emit_lossy(EngineEvent::StrategyFellBack {
                    strategy: strategy.name().to_string(),
                    reason: "strategy fault".to_string(),
                    timestamp: chrono::Utc::now(),
                });
                match pick_random(&self.rng, eligible) {
                    Some(id) => Selection::Picked(id),
                    None => Selection::NoEligibleItem,
                }
            }
        }
    }

    fn user_context(&self, user: UserId) -> UserContext {
        let expertise = self
            .expertise
            .profile(user, self.store.known_categories());
        let threshold = self.config.category_assignment.qualification.threshold;
        let qualified_categories = expertise
            .iter()
            .filter(|(_, score)| **score >= threshold)
            .map(|(category, _)| category.clone())
            .collect();
        let clusters_drawn = self
            .clusters
            .drawn(user, self.config.diversity_ordering.recluster_threshold);
        UserContext {
            user_id: user,
            qualified_categories,
            expertise,
            clusters_drawn,
        }
    }

    /// Category constraint for the snapshot; only the category strategy in
    /// static mode narrows the pool, and the `none` fallback refuses
    /// up front
    fn category_filter(&self, ctx: &UserContext) -> FilterPlan {
        if self.registry.active().name() != "category" {
            return FilterPlan::Serve(None);
        }
        let cfg = &self.config.category_assignment;
        match cfg.mode {
            CategoryMode::Dynamic => FilterPlan::Serve(None),
            CategoryMode::Static => {
                if !ctx.qualified_categories.is_empty() {
                    return FilterPlan::Serve(Some(CategoryFilter {
                        categories: ctx.qualified_categories.clone(),
                        include_uncategorized: false,
                    }));
                }
                match cfg.fallback {
                    CategoryFallback::Uncategorized => FilterPlan::Serve(Some(CategoryFilter {
                        categories: Default::default(),
                        include_uncategorized: true,
                    })),
                    CategoryFallback::Random => FilterPlan::Serve(None),
                    CategoryFallback::None => FilterPlan::NoWork,
                }
            }
        }
    }

    /// Track cluster pass progress while diversity clustering is active;
    /// a completed pass requests a recluster (async, never blocking)
    fn note_cluster_draw(&self, user: UserId, item: ItemId) {
        if self.registry.active().name() != "diversity_clustering" {
            return;
        }
        let Some(view) = self.store.view(item) else {
            return;
        };
        let Some(cluster) = view.cluster_id else {
            return;
        };
        let present = self.store.distinct_clusters();
        let threshold = self.config.diversity_ordering.recluster_threshold;
        if self.clusters.note_draw(user, cluster, &present, threshold) {
            let generation = self.clusters.generation();
            self.metrics
                .recluster_requests_total
                .fetch_add(1, Ordering::Relaxed);
            info!(user_id = %user, generation, "cluster pass complete; requesting recluster");
            self.bus.emit_lossy(EngineEvent::ReclusterRequested {
                user_id: user,
                generation,
                num_clusters: self.config.diversity_ordering.num_clusters,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Reclaim reservations older than the configured TTL
    ///
    /// Required failure-recovery path: without it, abandoned sessions
    /// silently eat item capacity forever. Returns the number reclaimed.
    pub fn sweep_expired_reservations(&self) -> usize {
        let ttl = Duration::from_secs(self.config.reservation_ttl_secs);
        if ttl.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let expired: Vec<((UserId, ItemId), Duration)> = {
            let mut reservations = self.reservations.lock().unwrap();
            let keys: Vec<(UserId, ItemId)> = reservations
                .iter()
                .filter(|(_, &granted)| now.duration_since(granted) >= ttl)
                .map(|(&key, _)| key)
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    reservations
                        .remove(&key)
                        .map(|granted| (key, now.duration_since(granted)))
                })
                .collect()
        };

        let count = expired.len();
        for ((user, item), age) in expired {
            self.store.commit(item, false, &[]);
            self.ledger.mark_abandoned(user, item);
            self.metrics
                .reservations_reclaimed_total
                .fetch_add(1, Ordering::Relaxed);
            warn!(user_id = %user, item_id = %item, age_secs = age.as_secs(), "reclaimed abandoned reservation");
            self.bus.emit_lossy(EngineEvent::ReservationReclaimed {
                user_id: user,
                item_id: item,
                age_secs: age.as_secs(),
                timestamp: chrono::Utc::now(),
            });
        }
        count
    }

    #[cfg(test)]
    fn backdate_reservation(&self, user: UserId, item: ItemId, by: Duration) {
        if let Some(granted) = self.reservations.lock().unwrap().get_mut(&(user, item)) {
            *granted -= by;
        }
    }
}
