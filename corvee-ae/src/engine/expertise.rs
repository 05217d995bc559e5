//! Expertise profiles
//!
//! Per-user, per-category confidence scores in [0, 1], updated from
//! agreement with consensus by an external process. Profiles are created
//! lazily on a user's first assignment request, initialized to a neutral
//! 0.5 for every known category, and never deleted during a session.
//!
//! Read-frequently, write-rarely: the hot path clones a profile under a
//! read lock; only the signal writer takes the write lock.

use std::collections::HashMap;
use std::sync::RwLock;

use corvee_common::UserId;

/// Neutral score assigned to categories with no consensus history yet
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Store of per-user expertise profiles
pub struct ExpertiseStore {
    profiles: RwLock<HashMap<UserId, HashMap<String, f64>>>,
    learning_rate: f64,
}

impl ExpertiseStore {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            learning_rate,
        }
    }

    /// Seed the store with profiles loaded from persistence
    pub fn with_profiles(
        learning_rate: f64,
        profiles: HashMap<UserId, HashMap<String, f64>>,
    ) -> Self {
        Self {
            profiles: RwLock::new(profiles),
            learning_rate,
        }
    }

    /// This user's profile over the given known categories
    ///
    /// Creates the profile on first contact and backfills any category the
    /// profile has not seen with the neutral score.
    pub fn profile(&self, user: UserId, known_categories: &[String]) -> HashMap<String, f64> {
        {
            let profiles = self.profiles.read().unwrap();
            if let Some(profile) = profiles.get(&user) {
                if known_categories.iter().all(|c| profile.contains_key(c)) {
                    return profile.clone();
                }
            }
        }

        let mut profiles = self.profiles.write().unwrap();
        let profile = profiles.entry(user).or_default();
        for category in known_categories {
            profile.entry(category.clone()).or_insert(NEUTRAL_SCORE);
        }
        profile.clone()
    }

    /// Merge recomputed consensus scores into a user's profile
    ///
    /// Applies `new = old + learning_rate * (consensus - old)` per category,
    /// clamped to [0, 1]. Returns the merged profile so the caller can
    /// persist it.
    pub fn merge(
        &self,
        user: UserId,
        consensus: &HashMap<String, f64>,
    ) -> HashMap<String, f64> {
        let mut profiles = self.profiles.write().unwrap();
        let profile = profiles.entry(user).or_default();
        for (category, score) in consensus {
            let current = profile.entry(category.clone()).or_insert(NEUTRAL_SCORE);
            *current += self.learning_rate * (score - *current);
            *current = current.clamp(0.0, 1.0);
        }
        profile.clone()
    }

    /// Number of users with a profile
    pub fn user_count(&self) -> usize {
        self.profiles.read().unwrap().len()
    }
}
