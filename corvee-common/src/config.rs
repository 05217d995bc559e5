//! Engine configuration loading and validation
//!
//! Configuration is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Category-based assignment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryMode {
    /// Filter items to the user's qualified categories
    Static,
    /// Weight category choice probabilistically by expertise scores
    Dynamic,
}

/// What to serve when no category qualifies for a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryFallback {
    /// Serve items with an empty category set
    Uncategorized,
    /// Serve any eligible item, picked at random
    Random,
    /// Serve nothing (NoWork)
    None,
}

/// Static qualification gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualificationConfig {
    /// Minimum expertise score granting category access
    pub threshold: f64,
    /// Minimum training questions the consensus process must observe
    /// before reporting a score (enforced upstream; validated here)
    pub min_questions: u32,
}

impl Default for QualificationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            min_questions: 10,
        }
    }
}

/// Dynamic expertise weighting parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicExpertiseConfig {
    /// Merge rate for recomputed consensus scores: new = old + lr * (consensus - old)
    pub learning_rate: f64,
    /// Probability floor per category; no category is ever fully excluded
    pub base_probability: f64,
    /// Expected cadence of the external consensus recomputation
    pub update_interval_secs: u64,
}

impl Default for DynamicExpertiseConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.3,
            base_probability: 0.1,
            update_interval_secs: 300,
        }
    }
}

/// Category-based strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryAssignmentConfig {
    /// Static filtering or dynamic probabilistic weighting
    pub mode: CategoryMode,
    /// Static qualification gate
    pub qualification: QualificationConfig,
    /// Dynamic weighting parameters
    pub dynamic: DynamicExpertiseConfig,
    /// Behavior when no category qualifies
    pub fallback: CategoryFallback,
}

impl Default for CategoryAssignmentConfig {
    fn default() -> Self {
        Self {
            mode: CategoryMode::Static,
            qualification: QualificationConfig::default(),
            dynamic: DynamicExpertiseConfig::default(),
            fallback: CategoryFallback::Uncategorized,
        }
    }
}

/// Diversity clustering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityOrderingConfig {
    /// Number of clusters the external embedding job is asked to produce
    pub num_clusters: usize,
    /// Draws per cluster before a user's pass is considered complete
    /// and reclustering is requested
    pub recluster_threshold: u32,
}

impl Default for DiversityOrderingConfig {
    fn default() -> Self {
        Self {
            num_clusters: 8,
            recluster_threshold: 1,
        }
    }
}

/// Top-level engine configuration
///
/// All fields have compiled defaults so a missing config file yields a
/// working engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Active assignment strategy name
    pub assignment_strategy: String,
    /// Per-item annotation cap; -1 = unlimited
    pub max_annotations_per_item: i64,
    /// Per-user annotation cap; -1 = unlimited
    pub max_annotations_per_user: i64,
    /// Seed for reproducible random selection; None = entropy
    pub random_seed: Option<u64>,
    /// Reservation age after which the sweeper reclaims it; 0 disables the sweeper
    pub reservation_ttl_secs: u64,
    /// How often the sweeper scans for expired reservations
    pub sweep_interval_secs: u64,
    /// EventBus channel capacity
    pub event_capacity: usize,
    /// Category-based strategy settings
    pub category_assignment: CategoryAssignmentConfig,
    /// Diversity clustering settings
    pub diversity_ordering: DiversityOrderingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assignment_strategy: "random".to_string(),
            max_annotations_per_item: 3,
            max_annotations_per_user: -1,
            random_seed: None,
            reservation_ttl_secs: 600,
            sweep_interval_secs: 30,
            event_capacity: 1000,
            category_assignment: CategoryAssignmentConfig::default(),
            diversity_ordering: DiversityOrderingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load configuration from a TOML file if it exists, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Recognized variables: CORVEE_STRATEGY, CORVEE_MAX_ANNOTATIONS_PER_ITEM,
    /// CORVEE_MAX_ANNOTATIONS_PER_USER, CORVEE_RANDOM_SEED.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(strategy) = std::env::var("CORVEE_STRATEGY") {
            self.assignment_strategy = strategy;
        }
        if let Ok(max) = std::env::var("CORVEE_MAX_ANNOTATIONS_PER_ITEM") {
            self.max_annotations_per_item = max
                .parse()
                .map_err(|_| Error::Config(format!("invalid CORVEE_MAX_ANNOTATIONS_PER_ITEM: {max}")))?;
        }
        if let Ok(max) = std::env::var("CORVEE_MAX_ANNOTATIONS_PER_USER") {
            self.max_annotations_per_user = max
                .parse()
                .map_err(|_| Error::Config(format!("invalid CORVEE_MAX_ANNOTATIONS_PER_USER: {max}")))?;
        }
        if let Ok(seed) = std::env::var("CORVEE_RANDOM_SEED") {
            self.random_seed = Some(
                seed.parse()
                    .map_err(|_| Error::Config(format!("invalid CORVEE_RANDOM_SEED: {seed}")))?,
            );
        }
        self.validate()
    }

    /// Validate ranges; called on every load path
    pub fn validate(&self) -> Result<()> {
        if self.max_annotations_per_item < -1 || self.max_annotations_per_item == 0 {
            return Err(Error::Config(format!(
                "max_annotations_per_item must be -1 (unlimited) or positive, got {}",
                self.max_annotations_per_item
            )));
        }
        if self.max_annotations_per_user < -1 || self.max_annotations_per_user == 0 {
            return Err(Error::Config(format!(
                "max_annotations_per_user must be -1 (unlimited) or positive, got {}",
                self.max_annotations_per_user
            )));
        }
        let q = &self.category_assignment.qualification;
        if !(0.0..=1.0).contains(&q.threshold) {
            return Err(Error::Config(format!(
                "qualification.threshold must be in [0, 1], got {}",
                q.threshold
            )));
        }
        let d = &self.category_assignment.dynamic;
        if !(0.0..=1.0).contains(&d.learning_rate) {
            return Err(Error::Config(format!(
                "dynamic.learning_rate must be in [0, 1], got {}",
                d.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&d.base_probability) {
            return Err(Error::Config(format!(
                "dynamic.base_probability must be in [0, 1), got {}",
                d.base_probability
            )));
        }
        if self.diversity_ordering.num_clusters == 0 {
            return Err(Error::Config(
                "diversity_ordering.num_clusters must be at least 1".to_string(),
            ));
        }
        if self.diversity_ordering.recluster_threshold == 0 {
            return Err(Error::Config(
                "diversity_ordering.recluster_threshold must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Resolve the config file path following the standard priority order:
/// 1. Command-line argument (highest priority)
/// 2. CORVEE_CONFIG environment variable
/// 3. Platform config directory (`<config_dir>/corvee/config.toml`)
///
/// Returns None when nothing is found; callers fall back to defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("CORVEE_CONFIG") {
        return Some(PathBuf::from(path));
    }

    // Priority 3: Platform config directory
    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("corvee").join("config.toml");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}
