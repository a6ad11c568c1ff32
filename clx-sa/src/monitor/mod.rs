//! Anomaly Monitor
//!
//! A periodic sweep reads the pipeline_metrics series and raises alerts
//! when the current hour deviates statistically from recent history. Four
//! isolated checks (throughput drop, error-ratio spike, LLM latency spike,
//! token-quota pressure); each is a pure function over the already-fetched
//! series so thresholds can be unit tested without a database.

pub mod stats;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use clx_common::events::{AnomalySeverity, ClxEvent, EventBus};
use clx_common::Result;

use crate::db;
use crate::db::metrics::HourlySeries;
use crate::models::{AnomalyDetection, AnomalyType};

/// Sweep thresholds and windows
///
/// Defaults match operational experience with the corpus pipeline; every
/// field is overridable in tests.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// z below -warn raises warning, below -crit raises critical
    pub throughput_warn_z: f64,
    pub throughput_crit_z: f64,
    /// Tukey fence multiplier for the error-ratio spike check
    pub error_iqr_k: f64,
    /// z above warn raises warning, above crit raises critical
    pub latency_warn_z: f64,
    pub latency_crit_z: f64,
    /// Fractions of the daily token limit
    pub quota_warn_ratio: f64,
    pub quota_crit_ratio: f64,
    /// At most one unresolved alert per check inside this window
    pub dedup_window: Duration,
    /// Unresolved alerts older than this are force-resolved
    pub max_alert_age: Duration,
    pub throughput_lookback_hours: i64,
    pub error_lookback_hours: i64,
    pub latency_lookback_hours: i64,
    pub sweep_interval: std::time::Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            throughput_warn_z: 2.0,
            throughput_crit_z: 3.0,
            error_iqr_k: 1.5,
            latency_warn_z: 2.5,
            latency_crit_z: 4.0,
            quota_warn_ratio: 0.8,
            quota_crit_ratio: 0.95,
            dedup_window: Duration::hours(1),
            max_alert_age: Duration::hours(2),
            throughput_lookback_hours: 48,
            error_lookback_hours: 24,
            latency_lookback_hours: 24 * 7,
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}

/// Minimum history samples before a statistical check is meaningful
const MIN_HISTORY: usize = 4;

/// Throughput drop: current hour's words-processed z-scored against history
///
/// Fires only downward. A flat or short history never fires (zero stddev
/// reads as no signal).
pub fn check_throughput(config: &MonitorConfig, series: &HourlySeries) -> Option<AnomalyDetection> {
    if series.history.len() < MIN_HISTORY {
        return None;
    }
    let z = stats::zscore(series.current, &series.history);
    let severity = if z < -config.throughput_crit_z {
        AnomalySeverity::Critical
    } else if z < -config.throughput_warn_z {
        AnomalySeverity::Warning
    } else {
        return None;
    };

    let mut context = BTreeMap::new();
    context.insert("lookback_hours".to_string(), config.throughput_lookback_hours.to_string());
    context.insert("history_samples".to_string(), series.history.len().to_string());

    Some(AnomalyDetection::new(
        "throughput_drop",
        AnomalyType::Throughput,
        severity,
        stats::mean(&series.history),
        series.current,
        z,
        context,
    ))
}

/// Error-ratio spike: current hour's failed/processed ratio above the
/// Tukey upper fence of recent hourly ratios
pub fn check_error_ratio(config: &MonitorConfig, series: &HourlySeries) -> Option<AnomalyDetection> {
    let bound = stats::upper_outlier_bound(&series.history, config.error_iqr_k)?;
    if series.current <= bound || series.current == 0.0 {
        return None;
    }

    let mut context = BTreeMap::new();
    context.insert("upper_fence".to_string(), format!("{:.4}", bound));
    context.insert("lookback_hours".to_string(), config.error_lookback_hours.to_string());

    Some(AnomalyDetection::new(
        "error_spike",
        AnomalyType::ErrorRate,
        AnomalySeverity::Warning,
        bound,
        series.current,
        series.current - bound,
        context,
    ))
}

/// LLM latency spike: current hour's average latency z-scored against
/// history; fires only upward
pub fn check_latency(config: &MonitorConfig, series: &HourlySeries) -> Option<AnomalyDetection> {
    if series.history.len() < MIN_HISTORY || series.current == 0.0 {
        return None;
    }
    let z = stats::zscore(series.current, &series.history);
    let severity = if z > config.latency_crit_z {
        AnomalySeverity::Critical
    } else if z > config.latency_warn_z {
        AnomalySeverity::Warning
    } else {
        return None;
    };

    let mut context = BTreeMap::new();
    context.insert("lookback_hours".to_string(), config.latency_lookback_hours.to_string());

    Some(AnomalyDetection::new(
        "latency_degradation",
        AnomalyType::Latency,
        severity,
        stats::mean(&series.history),
        series.current,
        z,
        context,
    ))
}

/// Token-quota pressure: trailing-24h usage as a fraction of the daily limit
pub fn check_quota(
    config: &MonitorConfig,
    tokens_used: i64,
    daily_limit: i64,
) -> Option<AnomalyDetection> {
    if daily_limit <= 0 {
        return None;
    }
    let ratio = tokens_used as f64 / daily_limit as f64;
    let severity = if ratio >= config.quota_crit_ratio {
        AnomalySeverity::Critical
    } else if ratio >= config.quota_warn_ratio {
        AnomalySeverity::Warning
    } else {
        return None;
    };

    let mut context = BTreeMap::new();
    context.insert("tokens_used".to_string(), tokens_used.to_string());
    context.insert("daily_limit".to_string(), daily_limit.to_string());

    Some(AnomalyDetection::new(
        "quota_warning",
        AnomalyType::Quota,
        severity,
        daily_limit as f64,
        tokens_used as f64,
        ratio,
        context,
    ))
}

/// The sweeping monitor
pub struct AnomalyMonitor {
    pool: SqlitePool,
    event_bus: EventBus,
    config: MonitorConfig,
}

impl AnomalyMonitor {
    pub fn new(pool: SqlitePool, event_bus: EventBus, config: MonitorConfig) -> Self {
        Self {
            pool,
            event_bus,
            config,
        }
    }

    /// One full sweep: staleness resolution first, then the four checks
    ///
    /// Each raised alert is deduplicated per check name against the dedup
    /// window, so a persisting condition yields one unresolved alert, not a
    /// storm.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        for (id, check_name) in
            db::anomalies::auto_resolve_stale(&self.pool, self.config.max_alert_age, now).await?
        {
            tracing::info!(anomaly_id = %id, check = %check_name, "Auto-resolved stale alert");
            self.event_bus.emit_lossy(ClxEvent::AnomalyResolved {
                anomaly_id: id,
                check_name,
                auto_resolved: true,
                timestamp: now,
            });
        }

        // Checks are isolated: a failed series fetch skips that check only
        let mut findings = Vec::new();

        match db::metrics::hourly_throughput(&self.pool, self.config.throughput_lookback_hours, now)
            .await
        {
            Ok(series) => findings.extend(check_throughput(&self.config, &series)),
            Err(e) => tracing::error!(error = %e, "Throughput series fetch failed"),
        }

        match db::metrics::hourly_error_ratio(&self.pool, self.config.error_lookback_hours, now)
            .await
        {
            Ok(series) => findings.extend(check_error_ratio(&self.config, &series)),
            Err(e) => tracing::error!(error = %e, "Error-ratio series fetch failed"),
        }

        match db::metrics::hourly_avg_latency(&self.pool, self.config.latency_lookback_hours, now)
            .await
        {
            Ok(series) => findings.extend(check_latency(&self.config, &series)),
            Err(e) => tracing::error!(error = %e, "Latency series fetch failed"),
        }

        match self.quota_inputs(now).await {
            Ok((tokens, daily_limit)) => {
                findings.extend(check_quota(&self.config, tokens, daily_limit))
            }
            Err(e) => tracing::error!(error = %e, "Quota usage fetch failed"),
        }

        let mut raised = 0;
        for anomaly in findings {
            if db::anomalies::has_recent_unresolved(
                &self.pool,
                &anomaly.check_name,
                self.config.dedup_window,
                now,
            )
            .await?
            {
                tracing::debug!(check = %anomaly.check_name, "Suppressed duplicate alert");
                continue;
            }

            db::anomalies::insert_anomaly(&self.pool, &anomaly).await?;
            tracing::warn!(
                anomaly_id = %anomaly.id,
                check = %anomaly.check_name,
                severity = anomaly.severity.as_str(),
                expected = anomaly.expected_value,
                actual = anomaly.actual_value,
                deviation = anomaly.deviation_score,
                "Anomaly raised"
            );
            self.event_bus.emit_lossy(ClxEvent::AnomalyRaised {
                anomaly_id: anomaly.id,
                check_name: anomaly.check_name.clone(),
                severity: anomaly.severity,
                deviation_score: anomaly.deviation_score,
                timestamp: now,
            });
            raised += 1;
        }

        Ok(raised)
    }

    async fn quota_inputs(&self, now: DateTime<Utc>) -> Result<(i64, i64)> {
        let tokens = db::metrics::tokens_in_window(&self.pool, 24, now).await?;
        let daily_limit = db::settings::llm_daily_token_limit(&self.pool).await?;
        Ok((tokens, daily_limit))
    }

    /// Run sweeps until cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("Anomaly monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Anomaly monitor shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        tracing::error!(error = %e, "Anomaly sweep failed");
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
