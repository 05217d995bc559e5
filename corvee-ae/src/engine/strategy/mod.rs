//! Strategy Registry
//!
//! Pluggable ranking/selection algorithms behind a uniform trait. Strategies
//! are stateless selectors over a snapshot: all stateful adaptation
//! (expertise updates, reclustering, retraining) lives in the signal
//! ingestion path, which is what keeps `select_next` side-effect-free and
//! safely callable from the coordinator.
//!
//! New strategies register here without touching the coordinator.

pub mod category;
pub mod clustering;
pub mod fixed_order;
pub mod least_annotated;
pub mod max_diversity;
pub mod random;
pub mod signal_driven;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use corvee_common::config::EngineConfig;
use corvee_common::{ItemId, UserId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::store::ItemView;
use crate::error::{Error, Result};

pub use category::CategoryBased;
pub use clustering::DiversityClustering;
pub use fixed_order::FixedOrder;
pub use least_annotated::LeastAnnotated;
pub use max_diversity::MaxDiversity;
pub use random::Random;
pub use signal_driven::{ActiveLearning, LlmConfidence};

/// Seedable RNG shared by the strategies and the coordinator's fallback path
pub type SharedRng = Arc<Mutex<StdRng>>;

/// Build the run-wide RNG; a seed makes the whole run reproducible
pub fn shared_rng(seed: Option<u64>) -> SharedRng {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Arc::new(Mutex::new(rng))
}

/// Lock the shared RNG, recovering from poisoning
///
/// A caught strategy panic may poison the RNG mutex; selection randomness
/// is not an invariant, so the poisoned state is usable as-is.
pub(crate) fn lock_rng(rng: &SharedRng) -> MutexGuard<'_, StdRng> {
    rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Uniform random pick shared by every fallback path
pub fn pick_random(rng: &SharedRng, eligible: &[ItemView]) -> Option<ItemId> {
    if eligible.is_empty() {
        return None;
    }
    let idx = lock_rng(rng).gen_range(0..eligible.len());
    Some(eligible[idx].id)
}

/// Least-annotated pick with load-order tiebreak, shared by strategies that
/// need even coverage within a bucket
pub(crate) fn pick_least_annotated<'a, I>(items: I) -> Option<ItemId>
where
    I: IntoIterator<Item = &'a ItemView>,
{
    items
        .into_iter()
        .min_by_key(|v| (v.annotation_count, v.seq))
        .map(|v| v.id)
}

/// Outcome of a strategy call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The strategy picked this item
    Picked(ItemId),
    /// The strategy degraded to a uniform random pick; the coordinator
    /// surfaces the reason via metrics and events
    FellBackToRandom {
        item_id: ItemId,
        reason: &'static str,
    },
    /// Nothing to serve
    NoEligibleItem,
}

/// Per-request view of the requesting user, assembled by the coordinator
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: UserId,
    /// Categories whose expertise score clears the qualification threshold
    pub qualified_categories: HashSet<String>,
    /// Full expertise profile (neutral-initialized)
    pub expertise: HashMap<String, f64>,
    /// Clusters this user has exhausted in the current pass
    pub clusters_drawn: HashSet<u32>,
}

/// Uniform strategy contract
///
/// `eligible` already excludes items at capacity, items previously assigned
/// to this user, and (for static category assignment) items outside the
/// user's permitted category set.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn select_next(&self, user: &UserContext, eligible: &[ItemView]) -> Selection;
}

/// Config-time map from strategy name to implementation
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn Strategy>>,
    active: Arc<dyn Strategy>,
}

impl StrategyRegistry {
    /// Build the registry with every built-in strategy and activate the
    /// configured one
    pub fn from_config(config: &EngineConfig, rng: SharedRng) -> Result<Self> {
        let all: Vec<Arc<dyn Strategy>> = vec![
            Arc::new(Random::new(rng.clone())),
            Arc::new(FixedOrder),
            Arc::new(LeastAnnotated),
            Arc::new(MaxDiversity),
            Arc::new(CategoryBased::new(&config.category_assignment, rng.clone())),
            Arc::new(DiversityClustering::new(rng.clone())),
            Arc::new(ActiveLearning::new(rng.clone())),
            Arc::new(LlmConfidence::new(rng)),
        ];
        let mut strategies = HashMap::new();
        for strategy in all {
            strategies.insert(strategy.name(), strategy);
        }
        let active = strategies
            .get(config.assignment_strategy.as_str())
            .cloned()
            .ok_or_else(|| Error::UnknownStrategy(config.assignment_strategy.clone()))?;
        Ok(Self { strategies, active })
    }

    /// The currently active strategy
    pub fn active(&self) -> &Arc<dyn Strategy> {
        &self.active
    }

    /// Look up a strategy by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    /// Register an additional strategy (it becomes selectable by name)
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.name(), strategy);
    }

    /// Switch the active strategy by name
    pub fn set_active(&mut self, name: &str) -> Result<()> {
        self.active = self
            .strategies
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownStrategy(name.to_string()))?;
        Ok(())
    }

    /// Registered strategy names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
