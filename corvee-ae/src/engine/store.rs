//! Item Store
//!
//! In-memory table of all annotatable items plus completion counters.
//!
//! The store is the single owner of the capacity-invariant fields
//! (`annotation_count`, `in_flight_count`): both live packed in one atomic
//! word per item, so `reserve`/`commit` are single-CAS linearizable and hold
//! no lock across strategy evaluation. Derived priority fields (disagreement,
//! cluster, uncertainty, LLM confidence) sit behind a separate narrow lock so
//! strategy reads never block on slow signal recomputation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use corvee_common::events::{EngineEvent, EventBus};
use corvee_common::ItemId;
use serde::Serialize;
use tracing::{error, warn};

use crate::engine::metrics::Metrics;
use crate::error::{Error, Result};

/// Item definition captured at dataset load time
#[derive(Debug, Clone)]
pub struct ItemDef {
    pub id: ItemId,
    pub categories: Vec<String>,
}

/// Derived/advisory priority fields, written by the signal writer and by
/// `commit` (disagreement only)
#[derive(Debug, Clone, Default)]
struct SignalState {
    disagreement: f64,
    cluster_id: Option<u32>,
    uncertainty: Option<f64>,
    llm_confidence: Option<f64>,
}

struct Item {
    id: ItemId,
    /// Load-order index; the stable total order FixedOrder relies on
    seq: usize,
    /// Zero or more labels; empty = uncategorized
    categories: Vec<String>,
    /// Packed capacity word: high 32 bits = committed annotation count,
    /// low 32 bits = in-flight reservations
    capacity: AtomicU64,
    /// Submitted label multiset; only `commit` touches it
    labels: Mutex<Vec<String>>,
    signals: RwLock<SignalState>,
}

fn pack(annotations: u32, in_flight: u32) -> u64 {
    ((annotations as u64) << 32) | in_flight as u64
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Read-only item summary handed to strategies and monitoring surfaces
#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    pub id: ItemId,
    pub seq: usize,
    pub categories: Vec<String>,
    pub annotation_count: u32,
    pub in_flight: u32,
    pub disagreement: f64,
    pub cluster_id: Option<u32>,
    pub uncertainty: Option<f64>,
    pub llm_confidence: Option<f64>,
}

/// Category constraint applied when snapshotting eligible items
#[derive(Debug, Clone, Default)]
pub struct CategoryFilter {
    /// Items must carry at least one of these categories
    pub categories: HashSet<String>,
    /// Whether items with an empty category set pass the filter
    pub include_uncategorized: bool,
}

impl CategoryFilter {
    fn matches(&self, categories: &[String]) -> bool {
        if categories.is_empty() {
            return self.include_uncategorized;
        }
        categories.iter().any(|c| self.categories.contains(c))
    }
}

/// In-memory item table with linearizable capacity accounting
pub struct ItemStore {
    items: Vec<Item>,
    index: HashMap<ItemId, usize>,
    /// Distinct categories across the dataset, sorted; captured at load
    known_categories: Vec<String>,
    max_per_item: i64,
    metrics: Arc<Metrics>,
    events: EventBus,
}

impl ItemStore {
    /// Build the store from loaded item definitions
    ///
    /// `max_per_item` of -1 means unlimited. Item order is preserved as the
    /// stable `seq` order.
    pub fn new(
        defs: Vec<ItemDef>,
        max_per_item: i64,
        events: EventBus,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let mut items = Vec::with_capacity(defs.len());
        let mut index = HashMap::with_capacity(defs.len());
        let mut categories = BTreeSet::new();

        for (seq, def) in defs.into_iter().enumerate() {
            if index.insert(def.id, seq).is_some() {
                return Err(Error::Dataset(format!("duplicate item id {}", def.id)));
            }
            for c in &def.categories {
                categories.insert(c.clone());
            }
            items.push(Item {
                id: def.id,
                seq,
                categories: def.categories,
                capacity: AtomicU64::new(0),
                labels: Mutex::new(Vec::new()),
                signals: RwLock::new(SignalState::default()),
            });
        }

        Ok(Self {
            items,
            index,
            known_categories: categories.into_iter().collect(),
            max_per_item,
            metrics,
            events,
        })
    }

    /// Number of items in the store
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store holds no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Distinct categories across the dataset, sorted
    pub fn known_categories(&self) -> &[String] {
        &self.known_categories
    }

    fn item(&self, id: ItemId) -> Option<&Item> {
        self.index.get(&id).map(|&idx| &self.items[idx])
    }

    /// Atomically reserve an in-flight slot on an item
    ///
    /// Checks `annotation_count + in_flight_count < max_annotations_per_item`
    /// and increments the in-flight count in a single CAS. Returns false when
    /// the item is at capacity. Linearizable across all callers.
    ///
    /// Reserving an unknown item is a programmer error: fatal under test,
    /// logged and rejected in release builds.
    pub fn reserve(&self, id: ItemId) -> bool {
        let Some(item) = self.item(id) else {
            debug_assert!(false, "reserve on unknown item {id}");
            error!(item_id = %id, "reserve on unknown item rejected");
            return false;
        };

        loop {
            let word = item.capacity.load(Ordering::Acquire);
            let (annotations, in_flight) = unpack(word);
            if self.max_per_item >= 0
                && (annotations as i64) + (in_flight as i64) >= self.max_per_item
            {
                return false;
            }
            let next = pack(annotations, in_flight + 1);
            if item
                .capacity
                .compare_exchange(word, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.check_invariant(item);
                return true;
            }
            // CAS raced with a concurrent reserve/commit; re-read and retry
        }
    }

    /// Release a reservation, optionally committing an annotation
    ///
    /// Decrements the in-flight count; when `was_annotated`, increments the
    /// annotation count, records the submitted labels, and recomputes the
    /// disagreement score from the new label distribution. Called exactly
    /// once per reservation (on submit, abandonment, or sweeper reclaim).
    ///
    /// A commit with no outstanding reservation is rejected and logged —
    /// defends against double-processing.
    pub fn commit(&self, id: ItemId, was_annotated: bool, labels: &[String]) -> bool {
        let Some(item) = self.item(id) else {
            warn!(item_id = %id, "commit on unknown item rejected");
            self.metrics
                .commits_rejected_total
                .fetch_add(1, Ordering::Relaxed);
            return false;
        };

        loop {
            let word = item.capacity.load(Ordering::Acquire);
            let (annotations, in_flight) = unpack(word);
            if in_flight == 0 {
                warn!(item_id = %id, "commit without outstanding reservation rejected");
                self.metrics
                    .commits_rejected_total
                    .fetch_add(1, Ordering::Relaxed);
                return false;
            }
            let next = if was_annotated {
                pack(annotations + 1, in_flight - 1)
            } else {
                pack(annotations, in_flight - 1)
            };
            if item
                .capacity
                .compare_exchange(word, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        if was_annotated {
            let disagreement = {
                let mut all = item.labels.lock().unwrap();
                all.extend(labels.iter().cloned());
                if all.is_empty() {
                    // Label-free annotation (e.g. free-text schema): nothing
                    // to disagree about
                    0.0
                } else {
                    let unique: HashSet<&String> = all.iter().collect();
                    unique.len() as f64 / all.len() as f64
                }
            };
            item.signals.write().unwrap().disagreement = disagreement;
        }

        self.check_invariant(item);
        true
    }

    /// Read the capacity counters for one item
    pub fn counts(&self, id: ItemId) -> Option<(u32, u32)> {
        self.item(id)
            .map(|item| unpack(item.capacity.load(Ordering::Acquire)))
    }

    /// Read-only summary for one item
    pub fn view(&self, id: ItemId) -> Option<ItemView> {
        self.item(id).map(|item| self.view_of(item))
    }

    fn view_of(&self, item: &Item) -> ItemView {
        let (annotation_count, in_flight) = unpack(item.capacity.load(Ordering::Acquire));
        let signals = item.signals.read().unwrap().clone();
        ItemView {
            id: item.id,
            seq: item.seq,
            categories: item.categories.clone(),
            annotation_count,
            in_flight,
            disagreement: signals.disagreement,
            cluster_id: signals.cluster_id,
            uncertainty: signals.uncertainty,
            llm_confidence: signals.llm_confidence,
        }
    }

    /// Copy-on-read snapshot of items below capacity, optionally constrained
    /// by category
    ///
    /// Each item is summarized under its own brief lock; no lock is held
    /// across the whole call, so a snapshot can interleave with concurrent
    /// reserves. Callers must still treat `reserve` as the only authority on
    /// capacity.
    pub fn snapshot(&self, filter: Option<&CategoryFilter>) -> Vec<ItemView> {
        self.items
            .iter()
            .filter(|item| {
                let (annotations, in_flight) = unpack(item.capacity.load(Ordering::Acquire));
                if self.max_per_item >= 0
                    && (annotations as i64) + (in_flight as i64) >= self.max_per_item
                {
                    return false;
                }
                match filter {
                    Some(f) => f.matches(&item.categories),
                    None => true,
                }
            })
            .map(|item| self.view_of(item))
            .collect()
    }

    /// Distinct cluster ids currently assigned across the store
    pub fn distinct_clusters(&self) -> HashSet<u32> {
        self.items
            .iter()
            .filter_map(|item| item.signals.read().unwrap().cluster_id)
            .collect()
    }

    /// Set the cluster id for one item (signal writer only)
    pub fn set_cluster(&self, id: ItemId, cluster: u32) -> bool {
        match self.item(id) {
            Some(item) => {
                item.signals.write().unwrap().cluster_id = Some(cluster);
                true
            }
            None => {
                warn!(item_id = %id, "cluster assignment for unknown item ignored");
                false
            }
        }
    }

    /// Set the uncertainty score for one item (signal writer only)
    pub fn set_uncertainty(&self, id: ItemId, score: f64) -> bool {
        match self.item(id) {
            Some(item) => {
                item.signals.write().unwrap().uncertainty = Some(score);
                true
            }
            None => {
                warn!(item_id = %id, "uncertainty score for unknown item ignored");
                false
            }
        }
    }

    /// Set the LLM confidence score for one item (signal writer only)
    pub fn set_llm_confidence(&self, id: ItemId, score: f64) -> bool {
        match self.item(id) {
            Some(item) => {
                item.signals.write().unwrap().llm_confidence = Some(score);
                true
            }
            None => {
                warn!(item_id = %id, "LLM confidence for unknown item ignored");
                false
            }
        }
    }

    /// Capacity invariant assertion: fatal under test, paged in production
    fn check_invariant(&self, item: &Item) {
        if self.max_per_item < 0 {
            return;
        }
        let (annotations, in_flight) = unpack(item.capacity.load(Ordering::Acquire));
        if (annotations as i64) + (in_flight as i64) > self.max_per_item {
            self.metrics
                .invariant_violations_total
                .fetch_add(1, Ordering::Relaxed);
            error!(
                item_id = %item.id,
                annotations,
                in_flight,
                max = self.max_per_item,
                "capacity invariant violated"
            );
            self.events.emit_lossy(EngineEvent::InvariantViolation {
                item_id: item.id,
                annotation_count: annotations,
                in_flight,
                max_annotations_per_item: self.max_per_item,
                timestamp: chrono::Utc::now(),
            });
            debug_assert!(
                false,
                "capacity invariant violated for item {}: {} + {} > {}",
                item.id, annotations, in_flight, self.max_per_item
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_store(n: usize, max_per_item: i64) -> ItemStore {
        let defs: Vec<ItemDef> = (0..n)
            .map(|i| ItemDef {
                id: Uuid::from_u128(i as u128 + 1),
                categories: vec![],
            })
            .collect();
        ItemStore::new(
            defs,
            max_per_item,
            EventBus::new(16),
            Arc::new(Metrics::default()),
        )
        .unwrap()
    }

    fn item_id(i: u128) -> ItemId {
        Uuid::from_u128(i + 1)
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        for (a, f) in [(0, 0), (1, 0), (0, 1), (7, 3), (u32::MAX, u32::MAX)] {
            assert_eq!(unpack(pack(a, f)), (a, f));
        }
    }

    #[test]
    fn test_reserve_respects_capacity() {
        let store = test_store(1, 2);
        let id = item_id(0);

        assert!(store.reserve(id));
        assert!(store.reserve(id));
        // Third reservation exceeds max_annotations_per_item = 2
        assert!(!store.reserve(id));
        assert_eq!(store.counts(id), Some((0, 2)));
    }

    #[test]
    fn test_unlimited_capacity() {
        let store = test_store(1, -1);
        let id = item_id(0);
        for _ in 0..100 {
            assert!(store.reserve(id));
        }
        assert_eq!(store.counts(id), Some((0, 100)));
    }

    #[test]
    fn test_commit_moves_in_flight_to_annotated() {
        let store = test_store(1, 2);
        let id = item_id(0);

        assert!(store.reserve(id));
        assert!(store.commit(id, true, &["cat".to_string()]));
        assert_eq!(store.counts(id), Some((1, 0)));

        // Abandonment releases the slot without counting an annotation
        assert!(store.reserve(id));
        assert!(store.commit(id, false, &[]));
        assert_eq!(store.counts(id), Some((1, 0)));
    }

    #[test]
    fn test_commit_without_reservation_rejected() {
        let store = test_store(1, 2);
        let id = item_id(0);
        assert!(!store.commit(id, true, &["x".to_string()]));
        assert_eq!(store.counts(id), Some((0, 0)));
    }

    #[test]
    #[should_panic]
    fn test_reserve_unknown_item_panics_in_tests() {
        let store = test_store(1, 2);
        store.reserve(Uuid::new_v4());
    }

    #[test]
    fn test_disagreement_recomputed_on_commit() {
        let store = test_store(1, -1);
        let id = item_id(0);

        store.reserve(id);
        store.commit(id, true, &["spam".to_string()]);
        // One annotation, one unique label: 1/1
        assert_eq!(store.view(id).unwrap().disagreement, 1.0);

        store.reserve(id);
        store.commit(id, true, &["spam".to_string()]);
        // Two agreeing annotations: 1/2
        assert_eq!(store.view(id).unwrap().disagreement, 0.5);

        store.reserve(id);
        store.commit(id, true, &["ham".to_string()]);
        // Two unique labels over three annotations: 2/3
        let d = store.view(id).unwrap().disagreement;
        assert!((d - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_excludes_items_at_capacity() {
        let store = test_store(3, 1);
        let full = item_id(1);
        assert!(store.reserve(full));

        let snapshot = store.snapshot(None);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|v| v.id != full));
    }

    #[test]
    fn test_snapshot_category_filter() {
        let defs = vec![
            ItemDef {
                id: Uuid::from_u128(1),
                categories: vec!["economics".to_string()],
            },
            ItemDef {
                id: Uuid::from_u128(2),
                categories: vec!["science".to_string()],
            },
            ItemDef {
                id: Uuid::from_u128(3),
                categories: vec![],
            },
        ];
        let store =
            ItemStore::new(defs, -1, EventBus::new(16), Arc::new(Metrics::default())).unwrap();

        let filter = CategoryFilter {
            categories: ["economics".to_string()].into_iter().collect(),
            include_uncategorized: false,
        };
        let snapshot = store.snapshot(Some(&filter));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, Uuid::from_u128(1));

        let uncategorized_only = CategoryFilter {
            categories: HashSet::new(),
            include_uncategorized: true,
        };
        let snapshot = store.snapshot(Some(&uncategorized_only));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, Uuid::from_u128(3));
    }

    #[test]
    fn test_known_categories_sorted_and_distinct() {
        let defs = vec![
            ItemDef {
                id: Uuid::from_u128(1),
                categories: vec!["science".to_string(), "economics".to_string()],
            },
            ItemDef {
                id: Uuid::from_u128(2),
                categories: vec!["economics".to_string()],
            },
        ];
        let store =
            ItemStore::new(defs, -1, EventBus::new(16), Arc::new(Metrics::default())).unwrap();
        assert_eq!(store.known_categories(), &["economics", "science"]);
    }

    #[test]
    fn test_duplicate_item_ids_rejected() {
        let id = Uuid::from_u128(9);
        let defs = vec![
            ItemDef { id, categories: vec![] },
            ItemDef { id, categories: vec![] },
        ];
        assert!(ItemStore::new(defs, -1, EventBus::new(16), Arc::new(Metrics::default())).is_err());
    }

    #[test]
    fn test_concurrent_reserve_never_overshoots() {
        use std::sync::atomic::AtomicUsize;

        let store = Arc::new(test_store(1, 4));
        let id = item_id(0);
        let granted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let granted = granted.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if store.reserve(id) {
                            granted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Exactly max_annotations_per_item reservations can be granted
        assert_eq!(granted.load(Ordering::Relaxed), 4);
        assert_eq!(store.counts(id), Some((0, 4)));
    }
}
