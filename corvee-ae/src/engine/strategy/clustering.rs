//! Diversity-clustering selection
//!
//! Round-robins across cluster buckets the user has not yet drawn from in
//! the current pass, so consecutive assignments sample distinct regions of
//! the embedding space. Pass bookkeeping and the recluster trigger live in
//! the coordinator; this selector only reads the drawn set from the user
//! context.

use std::collections::BTreeMap;

use crate::engine::store::ItemView;
use crate::engine::strategy::{
    pick_least_annotated, pick_random, Selection, SharedRng, Strategy, UserContext,
};

pub struct DiversityClustering {
    rng: SharedRng,
}

impl DiversityClustering {
    pub fn new(rng: SharedRng) -> Self {
        Self { rng }
    }
}

impl Strategy for DiversityClustering {
    fn name(&self) -> &'static str {
        "diversity_clustering"
    }

    fn select_next(&self, user: &UserContext, eligible: &[ItemView]) -> Selection {
        if eligible.is_empty() {
            return Selection::NoEligibleItem;
        }

        // Bucket by cluster id
        let mut buckets: BTreeMap<u32, Vec<&ItemView>> = BTreeMap::new();
        for v in eligible {
            if let Some(cluster) = v.cluster_id {
                buckets.entry(cluster).or_default().push(v);
            }
        }

        // No cluster assignments yet: explicit random fallback
        if buckets.is_empty() {
            return match pick_random(&self.rng, eligible) {
                Some(id) => Selection::FellBackToRandom {
                    item_id: id,
                    reason: "no cluster assignments",
                },
                None => Selection::NoEligibleItem,
            };
        }

        // Prefer clusters not yet drawn this pass; when the pass is complete
        // every bucket becomes a candidate again (the coordinator resets the
        // drawn set and requests a recluster)
        let bucket = buckets
            .iter()
            .find(|(cluster, _)| !user.clusters_drawn.contains(cluster))
            .or_else(|| buckets.iter().next());

        match bucket.and_then(|(_, items)| pick_least_annotated(items.iter().copied())) {
            Some(id) => Selection::Picked(id),
            None => Selection::NoEligibleItem,
        }
    }
}
