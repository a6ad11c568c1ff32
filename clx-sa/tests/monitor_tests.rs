//! Integration tests for the anomaly monitor sweep
//!
//! Seeds pipeline_metrics rows with controlled timestamps and verifies the
//! sweep raises, deduplicates and auto-resolves alerts against a real
//! database.

use chrono::{Duration, Utc};
use std::collections::BTreeMap;

use clx_common::events::{AnomalySeverity, ClxEvent, EventBus};
use clx_sa::models::{AnomalyDetection, AnomalyType};
use clx_sa::monitor::{AnomalyMonitor, MonitorConfig};
use tempfile::TempDir;

async fn setup() -> (sqlx::SqlitePool, EventBus, AnomalyMonitor, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("cantolex.db");
    let pool = clx_sa::db::init_database_pool(&db_path)
        .await
        .expect("Failed to initialize database");
    let event_bus = EventBus::new(64);
    // Tight lookback: empty hours count as zero throughput, so a wide
    // window would drown the seeded history in zeros
    let config = MonitorConfig {
        throughput_lookback_hours: 9,
        ..MonitorConfig::default()
    };
    let monitor = AnomalyMonitor::new(pool.clone(), event_bus.clone(), config);
    (pool, event_bus, monitor, temp_dir)
}

/// Insert one raw metrics row at a controlled timestamp
async fn seed_metric(
    pool: &sqlx::SqlitePool,
    at: chrono::DateTime<chrono::Utc>,
    processed: i64,
    failed: i64,
    tokens: Option<i64>,
) {
    sqlx::query(
        r#"
        INSERT INTO pipeline_metrics (recorded_at, words_processed, words_failed, llm_latency_ms, llm_tokens)
        VALUES (?, ?, ?, NULL, ?)
        "#,
    )
    .bind(at.to_rfc3339())
    .bind(processed)
    .bind(failed)
    .bind(tokens)
    .execute(pool)
    .await
    .unwrap();
}

/// Given healthy steady throughput history and a collapsed current hour
/// When the sweep runs
/// Then a throughput_drop alert is raised and broadcast
#[tokio::test]
async fn test_sweep_raises_throughput_drop() {
    let (pool, event_bus, monitor, _guard) = setup().await;
    let now = Utc::now();
    let mut rx = event_bus.subscribe();

    // 8 healthy past hours with mild variance, then a near-dead current hour
    for h in 1..=8 {
        let v = if h % 2 == 0 { 95 } else { 105 };
        seed_metric(&pool, now - Duration::hours(h), v, 0, None).await;
    }
    seed_metric(&pool, now, 1, 0, None).await;

    let raised = monitor.sweep(now).await.unwrap();
    assert_eq!(raised, 1);

    let open = clx_sa::db::anomalies::list_unresolved(&pool).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].check_name, "throughput_drop");
    assert!(open[0].deviation_score < -2.0);

    match rx.recv().await.unwrap() {
        ClxEvent::AnomalyRaised { check_name, .. } => assert_eq!(check_name, "throughput_drop"),
        other => panic!("expected AnomalyRaised, got {:?}", other),
    }
}

/// A flat, healthy series raises nothing
#[tokio::test]
async fn test_sweep_quiet_on_steady_pipeline() {
    let (pool, _event_bus, monitor, _guard) = setup().await;
    let now = Utc::now();

    for h in 0..=8 {
        seed_metric(&pool, now - Duration::hours(h), 100, 1, None).await;
    }

    let raised = monitor.sweep(now).await.unwrap();
    assert_eq!(raised, 0);
    assert!(clx_sa::db::anomalies::list_unresolved(&pool)
        .await
        .unwrap()
        .is_empty());
}

/// A persisting condition raises one alert, not one per sweep
#[tokio::test]
async fn test_sweep_deduplicates_within_window() {
    let (pool, _event_bus, monitor, _guard) = setup().await;
    let now = Utc::now();

    for h in 1..=8 {
        let v = if h % 2 == 0 { 95 } else { 105 };
        seed_metric(&pool, now - Duration::hours(h), v, 0, None).await;
    }
    seed_metric(&pool, now, 1, 0, None).await;

    assert_eq!(monitor.sweep(now).await.unwrap(), 1);
    assert_eq!(monitor.sweep(now + Duration::minutes(5)).await.unwrap(), 0);
    assert_eq!(monitor.sweep(now + Duration::minutes(30)).await.unwrap(), 0);

    let open = clx_sa::db::anomalies::list_unresolved(&pool).await.unwrap();
    assert_eq!(open.len(), 1);
}

/// Unresolved alerts past max age are force-resolved with the audit flag,
/// and the resolution is broadcast
#[tokio::test]
async fn test_sweep_auto_resolves_stale_alerts() {
    let (pool, event_bus, monitor, _guard) = setup().await;
    let now = Utc::now();
    let mut rx = event_bus.subscribe();

    let mut stale = AnomalyDetection::new(
        "latency_degradation",
        AnomalyType::Latency,
        AnomalySeverity::Warning,
        100.0,
        400.0,
        3.0,
        BTreeMap::new(),
    );
    stale.detected_at = now - Duration::hours(3);
    clx_sa::db::anomalies::insert_anomaly(&pool, &stale).await.unwrap();

    monitor.sweep(now).await.unwrap();

    let resolved = clx_sa::db::anomalies::load_anomaly(&pool, stale.id)
        .await
        .unwrap()
        .unwrap();
    assert!(resolved.is_resolved());
    assert!(resolved.auto_resolved);

    match rx.recv().await.unwrap() {
        ClxEvent::AnomalyResolved {
            anomaly_id,
            auto_resolved,
            ..
        } => {
            assert_eq!(anomaly_id, stale.id);
            assert!(auto_resolved);
        }
        other => panic!("expected AnomalyResolved, got {:?}", other),
    }
}

/// Token usage over the trailing day trips the quota check at the
/// configured ratios
#[tokio::test]
async fn test_sweep_quota_warning() {
    let (pool, _event_bus, monitor, _guard) = setup().await;
    let now = Utc::now();

    clx_sa::db::settings::set(&pool, "sa_llm_daily_token_limit", "1000")
        .await
        .unwrap();
    seed_metric(&pool, now - Duration::hours(2), 10, 0, Some(960)).await;

    assert_eq!(monitor.sweep(now).await.unwrap(), 1);
    let open = clx_sa::db::anomalies::list_unresolved(&pool).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].check_name, "quota_warning");
    assert_eq!(open[0].severity, AnomalySeverity::Critical);
}

/// Given one check's data source is broken
/// When the sweep runs
/// Then the other checks still evaluate and the sweep itself succeeds
#[tokio::test]
async fn test_sweep_isolates_failing_check() {
    let (pool, _event_bus, monitor, _guard) = setup().await;
    let now = Utc::now();

    for h in 1..=8 {
        let v = if h % 2 == 0 { 95 } else { 105 };
        seed_metric(&pool, now - Duration::hours(h), v, 0, None).await;
    }
    seed_metric(&pool, now, 1, 0, None).await;

    // Kill the quota check's data source; the metrics-backed checks keep
    // their own
    sqlx::query("DROP TABLE settings").execute(&pool).await.unwrap();

    let raised = monitor.sweep(now).await.unwrap();
    assert_eq!(raised, 1);

    let open = clx_sa::db::anomalies::list_unresolved(&pool).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].check_name, "throughput_drop");
}

/// Human acknowledge then resolve; a resolved alert frees the dedup window
#[tokio::test]
async fn test_acknowledge_and_resolve_lifecycle() {
    let (pool, _event_bus, monitor, _guard) = setup().await;
    let now = Utc::now();

    for h in 1..=8 {
        let v = if h % 2 == 0 { 95 } else { 105 };
        seed_metric(&pool, now - Duration::hours(h), v, 0, None).await;
    }
    seed_metric(&pool, now, 1, 0, None).await;
    monitor.sweep(now).await.unwrap();

    let open = clx_sa::db::anomalies::list_unresolved(&pool).await.unwrap();
    let id = open[0].id;

    clx_sa::db::anomalies::acknowledge(&pool, id, "curator-ana").await.unwrap();
    let acked = clx_sa::db::anomalies::load_anomaly(&pool, id).await.unwrap().unwrap();
    assert_eq!(acked.acknowledged_by.as_deref(), Some("curator-ana"));
    assert!(!acked.is_resolved());

    clx_sa::db::anomalies::resolve(&pool, id, Some("restarted worker")).await.unwrap();
    let resolved = clx_sa::db::anomalies::load_anomaly(&pool, id).await.unwrap().unwrap();
    assert!(resolved.is_resolved());
    assert!(!resolved.auto_resolved);
    assert_eq!(resolved.resolution_notes.as_deref(), Some("restarted worker"));

    // Second acknowledge/resolve of the same alert is NotFound
    assert!(clx_sa::db::anomalies::resolve(&pool, id, None).await.is_err());

    // Condition persists: next sweep may raise a fresh alert now that the
    // old one is resolved
    assert_eq!(monitor.sweep(now + Duration::minutes(1)).await.unwrap(), 1);
}
