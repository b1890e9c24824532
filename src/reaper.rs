use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// How often the expiry sweep runs. The sweep is idempotent, so the
/// interval only bounds staleness, not correctness.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const COMPACT_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that cancels expired appointments: pending ones whose
/// scheduled time passed and approved ones whose deposit window lapsed.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let now = chrono::Local::now().naive_local();
        match engine.sweep_expired(now).await {
            Ok(swept) if !swept.is_empty() => {
                info!("reaped {} expired appointments", swept.len());
                metrics::counter!(crate::observability::APPOINTMENTS_EXPIRED_TOTAL)
                    .increment(swept.len() as u64);
            }
            Ok(_) => {}
            Err(e) => {
                // Next tick retries; expired rows stay visible until then
                tracing::debug!("sweep skip: {e}");
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("WAL compacted after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::{NaiveDate, NaiveTime};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("agendo_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn date(d: &str) -> NaiveDate {
        NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()
    }

    fn time(t: &str) -> NaiveTime {
        NaiveTime::parse_from_str(t, "%H:%M").unwrap()
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let path = test_wal_path("sweep_idempotent.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let staff = Ulid::new();
        let service = Ulid::new();
        engine.add_staff(staff, "Yani".into()).await.unwrap();
        engine
            .add_service(service, "Cut".into(), ServiceKind::Complement, Some(60), 8_000)
            .await
            .unwrap();
        engine
            .add_rule(WeeklyRule {
                id: Ulid::new(),
                staff_id: Some(staff),
                weekday: 0,
                start: time("10:00"),
                end: time("14:00"),
                valid_from: None,
                valid_to: None,
                color_design: true,
                complement: true,
                active: true,
            })
            .await
            .unwrap();

        // Book Monday 10:00, then sweep from the following Wednesday.
        let booked_at = date("2026-03-01").and_time(time("09:00"));
        engine
            .request_appointment(
                Ulid::new(),
                Ulid::new(),
                Some(staff),
                &[service],
                date("2026-03-02"),
                time("10:00"),
                booked_at,
            )
            .await
            .unwrap();

        let later = date("2026-03-04").and_time(time("09:00"));
        let first = engine.sweep_expired(later).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = engine.sweep_expired(later).await.unwrap();
        assert!(second.is_empty());
    }
}
