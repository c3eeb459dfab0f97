//! HTTP handlers: the `/metrics` pull endpoint.

use std::sync::PoisonError;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::{debug, error, info, warn};

use corosync_exporter_core::registry::TEXT_CONTENT_TYPE;

use crate::state::{SCRAPES, SharedState};

pub(crate) fn router(state: SharedState) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

/// Refreshes the registry and returns it in the text exposition format.
///
/// A failed refresh is logged and the previous registry contents are served;
/// only a render failure turns into a 500.
pub(crate) async fn handle_metrics(State(state): State<SharedState>) -> Response {
    let t0 = Instant::now();
    let result = tokio::task::spawn_blocking(move || {
        let mut exporter = state.lock().unwrap_or_else(PoisonError::into_inner);
        match exporter.refresh() {
            Ok(summary) => debug!(
                lines = summary.lines,
                applied = summary.applied,
                skipped = summary.skipped,
                refresh_ms = summary.duration.as_millis() as u64,
                "refresh completed"
            ),
            Err(e) => warn!(error = %e, "refresh failed, serving previous metrics"),
        }
        exporter.render()
    })
    .await;

    let scrape = SCRAPES.fetch_add(1, Ordering::Relaxed) + 1;
    let elapsed_ms = t0.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(body)) => {
            if scrape == 1 {
                info!(duration_ms = elapsed_ms, bytes = body.len(), "first scrape served");
            } else {
                debug!(duration_ms = elapsed_ms, bytes = body.len(), scrape, "scrape served");
            }
            ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "scrape panicked in spawn_blocking");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use corosync_exporter_core::collector::{
        Collector, MemoryProbe, MockFs, MockSource, STATS_PREFIX, SourceError, StatsSource,
    };
    use corosync_exporter_core::nodemap::NODELIST_PREFIX;

    use crate::state::shared;

    fn source() -> MockSource {
        MockSource::new()
            .with_output(
                NODELIST_PREFIX,
                "nodelist.node.0.name (str) = a\nnodelist.node.0.nodeid (u32) = 1\n",
            )
            .with_output(STATS_PREFIX, "stats.srp.rx_data (u64) = 1\n")
    }

    fn app(source: &MockSource) -> Router {
        let probe = MemoryProbe::new(MockFs::new(), "/proc");
        let collector = Collector::new(source.clone(), probe, "a").unwrap();
        router(shared(collector))
    }

    async fn get_body(app: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_refreshes_per_request() {
        let source = source();
        let app = app(&source);

        let (status, content_type, body) = get_body(&app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(TEXT_CONTENT_TYPE));
        assert!(body.contains("srp_rx_data{hostname=\"a\"} 1"));

        source.set_output(STATS_PREFIX, "stats.srp.rx_data (u64) = 2\n");
        let (_, _, body) = get_body(&app, "/metrics").await;
        assert!(body.contains("srp_rx_data{hostname=\"a\"} 2"));
    }

    #[tokio::test]
    async fn test_metrics_serves_stale_data_on_source_failure() {
        let source = source();
        let app = app(&source);
        let (_, _, first) = get_body(&app, "/metrics").await;

        source.set_failure(STATS_PREFIX, "timeout");
        let (status, _, second) = get_body(&app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_first_scrape_failure_is_empty_not_error() {
        let source = source();
        source.set_failure(STATS_PREFIX, "down");
        let app = app(&source);

        let (status, _, body) = get_body(&app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_other_paths_are_not_found() {
        let app = app(&source());
        let (status, _, _) = get_body(&app, "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    /// Source that holds each statistics listing open for a while and records
    /// how many listings were in progress at once.
    #[derive(Clone, Default)]
    struct SlowSource {
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        listings: Arc<AtomicUsize>,
    }

    impl StatsSource for SlowSource {
        fn list(&self, prefix: &str) -> Result<String, SourceError> {
            if prefix != STATS_PREFIX {
                return Ok("nodelist.node.0.name (str) = a\nnodelist.node.0.nodeid (u32) = 1\n".into());
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let n = self.listings.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("stats.srp.rx_data (u64) = {n}\n"))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scrapes_never_overlap_refreshes() {
        let source = SlowSource::default();
        let probe = MemoryProbe::new(MockFs::new(), "/proc");
        let collector = Collector::new(source.clone(), probe, "a").unwrap();
        let app = router(shared(collector));

        let requests: Vec<_> = (0..8)
            .map(|_| {
                let app = app.clone();
                tokio::spawn(async move { get_body(&app, "/metrics").await })
            })
            .collect();
        for request in requests {
            let (status, _, body) = request.await.unwrap();
            assert_eq!(status, StatusCode::OK);
            assert!(body.contains("srp_rx_data{hostname=\"a\"}"));
        }

        assert_eq!(source.listings.load(Ordering::SeqCst), 8);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
