use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that rewrites the WAL once enough records piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// One compactor pass. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor skip: {appends} appends < {threshold}");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rust_decimal::Decimal;
    use ulid::Ulid;

    use super::*;
    use crate::clock::FixedClock;
    use crate::model::*;
    use crate::notify::NotifyHub;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fleetbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let clock = Arc::new(FixedClock::on("2024-05-01".parse().unwrap()));
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new()), clock).unwrap();

        let vid = Ulid::new();
        engine
            .register_vehicle(vid, "Transit".into(), Decimal::from(80), VehicleStatus::Available)
            .await
            .unwrap();
        for rate in 81..85 {
            engine
                .update_vehicle(vid, "Transit".into(), Decimal::from(rate), VehicleStatus::Available)
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(!compact_if_due(&engine, 10).await);
        assert!(compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let replayed = crate::wal::Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert!(matches!(
            &replayed[0],
            Event::VehicleRegistered { daily_rate, .. } if *daily_rate == Decimal::from(84)
        ));
    }
}
