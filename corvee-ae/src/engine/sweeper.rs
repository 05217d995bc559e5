//! Reservation sweeper
//!
//! Periodic task reclaiming in-flight reservations whose session never
//! submitted or abandoned. Each reclaim releases the item's capacity slot
//! (`commit(item, false)`) and marks the entry abandoned in the user's
//! ledger. Without this, abandoned sessions would silently eat item
//! capacity forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use crate::engine::Engine;

/// Spawn the sweeper loop; runs until the engine is dropped
pub fn spawn_sweeper(engine: Arc<Engine>) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(engine.config().sweep_interval_secs.max(1));
    info!(
        period_secs = period.as_secs(),
        ttl_secs = engine.config().reservation_ttl_secs,
        "reservation sweeper started"
    );
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // The first tick fires immediately; skip it so a fresh engine
        // never sweeps reservations granted during startup
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reclaimed = engine.sweep_expired_reservations();
            if reclaimed > 0 {
                debug!(reclaimed, "sweeper reclaimed reservations");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::ItemDef;
    use crate::engine::Engine;
    use corvee_common::config::EngineConfig;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweeper_task_runs() {
        let mut config = EngineConfig::default();
        config.assignment_strategy = "fixed_order".to_string();
        config.reservation_ttl_secs = 1;
        config.sweep_interval_secs = 1;
        let engine = Arc::new(
            Engine::new(
                config,
                vec![ItemDef {
                    id: Uuid::from_u128(1),
                    categories: vec![],
                }],
            )
            .unwrap(),
        );

        let user = Uuid::new_v4();
        assert!(engine.next_instance(user).is_some());

        let handle = spawn_sweeper(engine.clone());
        // TTL is 1s and the sweep period 1s; within ~2.5s the reservation
        // must have been reclaimed
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.abort();

        assert_eq!(engine.metrics_snapshot().reservations_reclaimed_total, 1);
    }
}
