//! Least-annotated selection
//!
//! Picks the minimum annotation count, ties broken by fixed order. Produces
//! even coverage before any item accumulates redundant annotations.

use crate::engine::store::ItemView;
use crate::engine::strategy::{Selection, Strategy, UserContext};

pub struct LeastAnnotated;

impl Strategy for LeastAnnotated {
    fn name(&self) -> &'static str {
        "least_annotated"
    }

    fn select_next(&self, _user: &UserContext, eligible: &[ItemView]) -> Selection {
        match eligible.iter().min_by_key(|v| (v.annotation_count, v.seq)) {
            Some(v) => Selection::Picked(v.id),
            None => Selection::NoEligibleItem,
        }
    }
}
