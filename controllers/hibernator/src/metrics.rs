//! Prometheus metrics and probe endpoints
//!
//! Served by a small axum router: `/metrics` in the Prometheus text format,
//! `/healthz` (process alive) and `/readyz` (watch loop started).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use crds::ObjectStatus;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::info;

use crate::action::TransitionReport;
use crate::error::ControllerError;

/// Reconcile outcome label values
pub const OUTCOME_TRANSITIONED: &str = "transitioned";
pub const OUTCOME_IDLE: &str = "idle";
pub const OUTCOME_PAUSED: &str = "paused";
pub const OUTCOME_DEBOUNCED: &str = "debounced";
pub const OUTCOME_SCHEDULE_ERROR: &str = "schedule_error";
pub const OUTCOME_ERROR: &str = "error";

/// Controller metrics, registered in their own registry
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    impacted_objects: IntCounterVec,
    excluded_objects: IntCounterVec,
    hibernating: IntGaugeVec,
    ready: AtomicBool,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("ready", &self.ready).finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register the controller metrics
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("hibernator".to_string()), None)?;

        let reconciles = IntCounterVec::new(
            Opts::new("reconciles_total", "Reconciles by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;

        let impacted_objects = IntCounterVec::new(
            Opts::new("impacted_objects_total", "Objects acted upon by action and status"),
            &["action", "status"],
        )?;
        registry.register(Box::new(impacted_objects.clone()))?;

        let excluded_objects = IntCounterVec::new(
            Opts::new("excluded_objects_total", "Objects left untouched by action"),
            &["action"],
        )?;
        registry.register(Box::new(excluded_objects.clone()))?;

        let hibernating = IntGaugeVec::new(
            Opts::new("hibernating", "Whether a Hibernator currently keeps its objects asleep"),
            &["namespace", "name"],
        )?;
        registry.register(Box::new(hibernating.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            impacted_objects,
            excluded_objects,
            hibernating,
            ready: AtomicBool::new(false),
        })
    }

    pub fn record_reconcile(&self, outcome: &str) {
        self.reconciles.with_label_values(&[outcome]).inc();
    }

    pub fn record_report(&self, report: &TransitionReport) {
        let action = report.action.to_string();
        for object in &report.impacted_objects {
            let status = match object.status {
                ObjectStatus::Success => "success",
                ObjectStatus::Error => "error",
            };
            self.impacted_objects.with_label_values(&[action.as_str(), status]).inc();
        }
        let excluded = u64::try_from(report.excluded_objects.len()).unwrap_or(u64::MAX);
        self.excluded_objects.with_label_values(&[action.as_str()]).inc_by(excluded);
    }

    pub fn set_hibernating(&self, namespace: &str, name: &str, hibernating: bool) {
        self.hibernating
            .with_label_values(&[namespace, name])
            .set(i64::from(hibernating));
    }

    /// Drop the gauge of a Hibernator that no longer exists
    pub fn forget(&self, namespace: &str, name: &str) {
        // Label set may be absent
        let _ = self.hibernating.remove_label_values(&[namespace, name]);
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Metrics in the Prometheus text format
    pub fn export(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Metrics(e.to_string()))
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> Response {
    if metrics.is_ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting").into_response()
    }
}

/// Router serving the metrics and probe endpoints
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(metrics)
}

/// Serve [`router`] on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("cannot bind {addr}: {e}")))?;
    info!("Serving metrics and probes on {}", addr);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Metrics(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{Action, ExcludedObject, ImpactedObject};

    #[test]
    fn test_report_counters_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile(OUTCOME_TRANSITIONED);
        metrics.record_report(&TransitionReport {
            action: Action::Hibernate,
            impacted_objects: vec![
                ImpactedObject::default(),
                ImpactedObject {
                    status: ObjectStatus::Error,
                    ..ImpactedObject::default()
                },
            ],
            excluded_objects: vec![ExcludedObject::default()],
        });
        metrics.set_hibernating("prod", "nightly", true);

        let exported = metrics.export().unwrap();
        assert!(exported.contains(r#"hibernator_reconciles_total{outcome="transitioned"} 1"#));
        assert!(exported.contains(r#"hibernator_impacted_objects_total{action="hibernate",status="error"} 1"#));
        assert!(exported.contains(r#"hibernator_excluded_objects_total{action="hibernate"} 1"#));
        assert!(exported.contains(r#"hibernator_hibernating{name="nightly",namespace="prod"} 1"#));

        metrics.forget("prod", "nightly");
        assert!(!metrics.export().unwrap().contains("nightly"));
    }

    #[test]
    fn test_readiness_flag() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.is_ready());
        metrics.set_ready();
        assert!(metrics.is_ready());
    }
}
