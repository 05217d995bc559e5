//! Category-based selection
//!
//! Static mode filters eligible items to the user's qualified categories.
//! Dynamic mode weights the category choice probabilistically by expertise,
//! with a `base_probability` floor so no category is ever fully excluded.
//! When no category qualifies, the configured fallback policy decides what
//! (if anything) to serve.
//!
//! Within the chosen category, items are picked least-annotated-first for
//! even coverage.

use std::collections::BTreeMap;

use corvee_common::config::{CategoryAssignmentConfig, CategoryFallback, CategoryMode};
use rand::Rng;

use crate::engine::expertise::NEUTRAL_SCORE;
use crate::engine::store::ItemView;
use crate::engine::strategy::{
    lock_rng, pick_least_annotated, pick_random, Selection, SharedRng, Strategy, UserContext,
};

pub struct CategoryBased {
    mode: CategoryMode,
    base_probability: f64,
    fallback: CategoryFallback,
    rng: SharedRng,
}

impl CategoryBased {
    pub fn new(config: &CategoryAssignmentConfig, rng: SharedRng) -> Self {
        Self {
            mode: config.mode,
            base_probability: config.dynamic.base_probability,
            fallback: config.fallback,
            rng,
        }
    }

    fn select_static(&self, user: &UserContext, eligible: &[ItemView]) -> Selection {
        let qualified = eligible
            .iter()
            .filter(|v| v.categories.iter().any(|c| user.qualified_categories.contains(c)));
        if let Some(id) = pick_least_annotated(qualified) {
            return Selection::Picked(id);
        }
        self.apply_fallback(eligible)
    }

    fn select_dynamic(&self, user: &UserContext, eligible: &[ItemView]) -> Selection {
        // Bucket by category; an item carrying several categories joins each
        let mut buckets: BTreeMap<&str, Vec<&ItemView>> = BTreeMap::new();
        for v in eligible {
            for c in &v.categories {
                buckets.entry(c.as_str()).or_default().push(v);
            }
        }
        if buckets.is_empty() {
            return self.apply_fallback(eligible);
        }

        let weights = self.category_weights(user, &buckets);
        let roll: f64 = lock_rng(&self.rng).gen();
        let mut acc = 0.0;
        let mut chosen = None;
        for (cat, weight) in &weights {
            acc += weight;
            if roll < acc {
                chosen = Some(*cat);
                break;
            }
        }
        // Floating-point tail: land on the last category
        let cat = chosen.or_else(|| weights.last().map(|(c, _)| *c));
        match cat.and_then(|c| pick_least_annotated(buckets[c].iter().copied())) {
            Some(id) => Selection::Picked(id),
            None => Selection::NoEligibleItem,
        }
    }

    /// Per-category selection probabilities
    ///
    /// Unqualified categories receive exactly `base_probability` each; the
    /// remaining mass is split softmax-style (e^score) across qualified
    /// categories. With no qualified category (or nothing but qualified
    /// ones) the softmax covers all categories.
    fn category_weights<'a>(
        &self,
        user: &UserContext,
        buckets: &BTreeMap<&'a str, Vec<&ItemView>>,
    ) -> Vec<(&'a str, f64)> {
        let cats: Vec<&str> = buckets.keys().copied().collect();
        let score =
            |c: &str| user.expertise.get(c).copied().unwrap_or(NEUTRAL_SCORE);
        let qualified_count = cats
            .iter()
            .filter(|c| user.qualified_categories.contains(**c))
            .count();

        if qualified_count == 0 || qualified_count == cats.len() {
            let total: f64 = cats.iter().map(|c| score(c).exp()).sum();
            return cats.iter().map(|c| (*c, score(c).exp() / total)).collect();
        }

        let unqualified_count = cats.len() - qualified_count;
        let floor_mass = (self.base_probability * unqualified_count as f64).min(1.0);
        let remaining = 1.0 - floor_mass;
        let qualified_total: f64 = cats
            .iter()
            .filter(|c| user.qualified_categories.contains(**c))
            .map(|c| score(c).exp())
            .sum();

        cats.iter()
            .map(|c| {
                let weight = if user.qualified_categories.contains(*c) {
                    remaining * score(c).exp() / qualified_total
                } else {
                    self.base_probability
                };
                (*c, weight)
            })
            .collect()
    }

    fn apply_fallback(&self, eligible: &[ItemView]) -> Selection {
        match self.fallback {
            CategoryFallback::Uncategorized => {
                let uncategorized = eligible.iter().filter(|v| v.categories.is_empty());
                match pick_least_annotated(uncategorized) {
                    Some(id) => Selection::Picked(id),
                    None => Selection::NoEligibleItem,
                }
            }
            CategoryFallback::Random => match pick_random(&self.rng, eligible) {
                Some(id) => Selection::FellBackToRandom {
                    item_id: id,
                    reason: "no qualified category",
                },
                None => Selection::NoEligibleItem,
            },
            CategoryFallback::None => Selection::NoEligibleItem,
        }
    }
}

impl Strategy for CategoryBased {
    fn name(&self) -> &'static str {
        "category"
    }

    fn select_next(&self, user: &UserContext, eligible: &[ItemView]) -> Selection {
        if eligible.is_empty() {
            return Selection::NoEligibleItem;
        }
        match self.mode {
            CategoryMode::Static => self.select_static(user, eligible),
            CategoryMode::Dynamic => self.select_dynamic(user, eligible),
        }
    }
}
