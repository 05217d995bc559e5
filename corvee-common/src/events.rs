//! Event types for the corvée engine
//!
//! Provides the shared event definitions and EventBus used by the
//! assignment engine and its HTTP surface.
//!
//! # Architecture
//!
//! Corvée uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many event broadcasting
//! - **Signal channel** (tokio::mpsc): priority-signal updates → single writer
//! - **Shared state** (Arc + fine-grained locks): read-heavy access
//!
//! Events are broadcast via EventBus and can be serialized for SSE
//! transmission. None of them carry safety-critical state; they exist for
//! observability and loose coupling between the engine and monitoring
//! surfaces.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Corvée engine event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// An item was assigned to a user
    ///
    /// Triggers:
    /// - SSE: progress dashboards
    /// - Monitoring: per-strategy assignment rates
    AssignmentMade {
        /// User the item was assigned to
        user_id: Uuid,
        /// Item that was assigned
        item_id: Uuid,
        /// Name of the strategy that made the pick
        strategy: String,
        /// When the assignment happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reservation was resolved (annotation submitted or abandoned)
    OutcomeRecorded {
        /// User who resolved the assignment
        user_id: Uuid,
        /// Item that was resolved
        item_id: Uuid,
        /// True for a submitted annotation, false for abandonment
        annotated: bool,
        /// When the outcome was recorded
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// No eligible item existed for a user (expected terminal state, not an error)
    NoWorkAvailable {
        /// User who requested work
        user_id: Uuid,
        /// When the request was refused
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A strategy degraded to Random for one call
    ///
    /// Emitted both for missing-signal fallbacks (ActiveLearning /
    /// LLMConfidence with no scores yet) and for caught strategy faults.
    StrategyFellBack {
        /// Strategy that fell back
        strategy: String,
        /// Why it fell back
        reason: String,
        /// When the fallback happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A user finished a full pass over all clusters; reclustering requested
    ///
    /// Triggers:
    /// - External clustering job: recompute cluster assignments
    ReclusterRequested {
        /// User whose pass completed
        user_id: Uuid,
        /// Cluster generation in effect when the pass completed
        generation: u64,
        /// Number of clusters the embedding job is asked to produce
        num_clusters: usize,
        /// When the pass completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The sweeper reclaimed a reservation that was never committed
    ReservationReclaimed {
        /// User who held the reservation
        user_id: Uuid,
        /// Item whose in-flight slot was released
        item_id: Uuid,
        /// Age of the reservation when reclaimed, in seconds
        age_secs: u64,
        /// When the reclaim happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A signal ingest lost a generation race and was discarded
    SignalStale {
        /// Signal kind ("clusters")
        kind: String,
        /// Generation currently applied
        current_generation: u64,
        /// Generation of the discarded update
        stale_generation: u64,
        /// When the stale write was discarded
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The capacity invariant was violated — indicates a concurrency bug
    ///
    /// Fatal under test; in production this event is the page/alert hook.
    InvariantViolation {
        /// Item whose counts broke the invariant
        item_id: Uuid,
        /// Observed committed annotation count
        annotation_count: u32,
        /// Observed in-flight count
        in_flight: u32,
        /// Configured per-item cap
        max_annotations_per_item: i64,
        /// When the violation was observed
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl EngineEvent {
    /// Get event type as string for filtering and SSE event names
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::AssignmentMade { .. } => "AssignmentMade",
            EngineEvent::OutcomeRecorded { .. } => "OutcomeRecorded",
            EngineEvent::NoWorkAvailable { .. } => "NoWorkAvailable",
            EngineEvent::StrategyFellBack { .. } => "StrategyFellBack",
            EngineEvent::ReclusterRequested { .. } => "ReclusterRequested",
            EngineEvent::ReservationReclaimed { .. } => "ReservationReclaimed",
            EngineEvent::SignalStale { .. } => "SignalStale",
            EngineEvent::InvariantViolation { .. } => "InvariantViolation",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for engine-wide events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    ///
    /// All engine events are advisory, so this is the variant the engine
    /// itself uses throughout.
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
