//! Fixed-order selection
//!
//! Picks the lowest-index eligible item by original dataset order. The
//! stable total order is the `seq` captured at load time.

use crate::engine::store::ItemView;
use crate::engine::strategy::{Selection, Strategy, UserContext};

pub struct FixedOrder;

impl Strategy for FixedOrder {
    fn name(&self) -> &'static str {
        "fixed_order"
    }

    fn select_next(&self, _user: &UserContext, eligible: &[ItemView]) -> Selection {
        match eligible.iter().min_by_key(|v| v.seq) {
            Some(v) => Selection::Picked(v.id),
            None => Selection::NoEligibleItem,
        }
    }
}
