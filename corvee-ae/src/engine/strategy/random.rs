//! Uniform random selection
//!
//! Seedable per-run for reproducibility.

use crate::engine::store::ItemView;
use crate::engine::strategy::{pick_random, Selection, SharedRng, Strategy, UserContext};

pub struct Random {
    rng: SharedRng,
}

impl Random {
    pub fn new(rng: SharedRng) -> Self {
        Self { rng }
    }
}

impl Strategy for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select_next(&self, _user: &UserContext, eligible: &[ItemView]) -> Selection {
        match pick_random(&self.rng, eligible) {
            Some(id) => Selection::Picked(id),
            None => Selection::NoEligibleItem,
        }
    }
}
