use crate::output::model::StatusModel;
use anyhow::Context;
use log::{error, info};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
    thread,
};
use sweepcore::interface::DetectionRecord;
use sweepcore::telemetry::MetricsRecorder;
use tokio::runtime::Builder;
use warp::{http::StatusCode, Filter};

type SharedState = Arc<RwLock<StatusModel>>;

/// HTTP endpoint exposing the latest detection and running counters.
#[derive(Clone)]
pub struct StatusBridge {
    state: SharedState,
    metrics: Arc<MetricsRecorder>,
}

impl StatusBridge {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            state: Arc::new(RwLock::new(StatusModel::default())),
            metrics,
        }
    }

    /// Serves the routes on a background thread with its own runtime.
    pub fn serve(&self, address: SocketAddr) -> anyhow::Result<()> {
        let routes = routes(self.state.clone(), self.metrics.clone());
        thread::Builder::new()
            .name("status-bridge".into())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!("building status bridge runtime failed: {}", err);
                        return;
                    }
                };
                runtime.block_on(async move {
                    match warp::serve(routes).try_bind_ephemeral(address) {
                        Ok((bound, server)) => {
                            info!("status bridge listening on http://{}", bound);
                            server.await;
                        }
                        Err(err) => error!("status bridge cannot bind {}: {}", address, err),
                    }
                });
            })
            .context("spawning status bridge thread")?;
        Ok(())
    }

    pub fn publish(&self, record: &DetectionRecord) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        guard.record_detection(record);
    }

    pub fn publish_sweep(&self) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        guard.record_sweep();
    }

    pub fn snapshot(&self) -> StatusModel {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn routes(
    state: SharedState,
    metrics: Arc<MetricsRecorder>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let state_filter = warp::any().map(move || state.clone());
    let metrics_filter = warp::any().map(move || metrics.clone());

    let detection = warp::path("detection")
        .and(warp::get())
        .and(state_filter.clone())
        .map(|state: SharedState| {
            let guard = state.read().unwrap_or_else(PoisonError::into_inner);
            match guard.latest_detection.as_ref().map(DetectionRecord::to_json) {
                Some(Ok(json)) => warp::reply::with_status(
                    warp::reply::json(
                        &serde_json::from_str::<serde_json::Value>(&json).unwrap_or_default(),
                    ),
                    StatusCode::OK,
                ),
                Some(Err(err)) => warp::reply::with_status(
                    warp::reply::json(&json!({"status": "error", "message": err.to_string()})),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ),
                None => warp::reply::with_status(
                    warp::reply::json(&json!({"status": "no detection yet"})),
                    StatusCode::NOT_FOUND,
                ),
            }
        });

    let summary = warp::path("summary")
        .and(warp::get())
        .and(state_filter)
        .and(metrics_filter)
        .map(|state: SharedState, metrics: Arc<MetricsRecorder>| {
            let guard = state.read().unwrap_or_else(PoisonError::into_inner);
            warp::reply::json(&json!({
                "completedSweeps": guard.completed_sweeps,
                "detections": guard.detections,
                "lastUpdate": guard.last_update,
                "pipeline": metrics.snapshot(),
            }))
        });

    detection.or(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> DetectionRecord {
        DetectionRecord {
            report_time: Utc::now(),
            peak_frequency_mhz: 433.92,
            bandwidth_khz: 25.0,
            psd: vec![-110, -70, -110],
            span_mhz: (433.0, 435.0),
            duration_ms: 10.0,
            rssi_dbm: -70.0,
            bin_width_hz: 12_500.0,
            sample_count: 20_000,
            magnitude_trace: Vec::new(),
        }
    }

    #[test]
    fn publish_updates_state() {
        let bridge = StatusBridge::new(Arc::new(MetricsRecorder::new()));
        bridge.publish(&record());
        bridge.publish_sweep();
        let snapshot = bridge.snapshot();
        assert_eq!(snapshot.detections, 1);
        assert_eq!(snapshot.completed_sweeps, 1);
        assert_eq!(snapshot.latest_detection.unwrap().rssi_dbm, -70.0);
    }

    #[tokio::test]
    async fn routes_serve_detection_and_summary() {
        let bridge = StatusBridge::new(Arc::new(MetricsRecorder::new()));
        let filter = routes(bridge.state.clone(), bridge.metrics.clone());

        let empty = warp::test::request()
            .method("GET")
            .path("/detection")
            .reply(&filter)
            .await;
        assert_eq!(empty.status(), StatusCode::NOT_FOUND);

        bridge.publish(&record());
        let found = warp::test::request()
            .method("GET")
            .path("/detection")
            .reply(&filter)
            .await;
        assert_eq!(found.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(found.body()).unwrap();
        assert_eq!(body["frequencyMHz"].as_f64().unwrap(), 433.92);

        let summary = warp::test::request()
            .method("GET")
            .path("/summary")
            .reply(&filter)
            .await;
        let body: serde_json::Value = serde_json::from_slice(summary.body()).unwrap();
        assert_eq!(body["detections"], 1);
        assert_eq!(body["pipeline"]["sweeps"], 0);
    }
}
