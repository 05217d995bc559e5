//! Signal-driven selection: active learning and LLM confidence
//!
//! ActiveLearning picks the highest classifier uncertainty; LLMConfidence
//! picks the lowest LLM confidence. When the signal is absent for every
//! eligible item (the background job has not reported yet), both fall back
//! to Random — explicitly, so the coordinator can surface the fallback in
//! metrics rather than let it pass silently.

use crate::engine::store::ItemView;
use crate::engine::strategy::{pick_random, Selection, SharedRng, Strategy, UserContext};

pub struct ActiveLearning {
    rng: SharedRng,
}

impl ActiveLearning {
    pub fn new(rng: SharedRng) -> Self {
        Self { rng }
    }
}

impl Strategy for ActiveLearning {
    fn name(&self) -> &'static str {
        "active_learning"
    }

    fn select_next(&self, _user: &UserContext, eligible: &[ItemView]) -> Selection {
        let best = eligible
            .iter()
            .filter(|v| v.uncertainty.is_some())
            .max_by(|a, b| {
                a.uncertainty
                    .unwrap_or(f64::NEG_INFINITY)
                    .total_cmp(&b.uncertainty.unwrap_or(f64::NEG_INFINITY))
                    .then_with(|| b.seq.cmp(&a.seq))
            });
        match best {
            Some(v) => Selection::Picked(v.id),
            None => match pick_random(&self.rng, eligible) {
                Some(id) => Selection::FellBackToRandom {
                    item_id: id,
                    reason: "no uncertainty scores",
                },
                None => Selection::NoEligibleItem,
            },
        }
    }
}

pub struct LlmConfidence {
    rng: SharedRng,
}

impl LlmConfidence {
    pub fn new(rng: SharedRng) -> Self {
        Self { rng }
    }
}

impl Strategy for LlmConfidence {
    fn name(&self) -> &'static str {
        "llm_confidence"
    }

    fn select_next(&self, _user: &UserContext, eligible: &[ItemView]) -> Selection {
        let best = eligible
            .iter()
            .filter(|v| v.llm_confidence.is_some())
            .min_by(|a, b| {
                a.llm_confidence
                    .unwrap_or(f64::INFINITY)
                    .total_cmp(&b.llm_confidence.unwrap_or(f64::INFINITY))
                    .then_with(|| a.seq.cmp(&b.seq))
            });
        match best {
            Some(v) => Selection::Picked(v.id),
            None => match pick_random(&self.rng, eligible) {
                Some(id) => Selection::FellBackToRandom {
                    item_id: id,
                    reason: "no LLM confidence scores",
                },
                None => Selection::NoEligibleItem,
            },
        }
    }
}
