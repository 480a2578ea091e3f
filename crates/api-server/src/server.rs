//! API server: HTTP REST endpoints plus the Prometheus exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use optimizer_core::config::AppConfig;
use optimizer_engine::CreativeEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: AppConfig,
    engine: Arc<CreativeEngine>,
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: Arc<CreativeEngine>) -> Self {
        Self { config, engine }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };

        Router::new()
            // Serve path
            .route("/v1/campaigns/:campaign_id/select", post(rest::handle_select))
            .route("/v1/events", post(rest::handle_record_event))
            // Reporting
            .route(
                "/v1/campaigns/:campaign_id/performance",
                get(rest::handle_performance),
            )
            .route(
                "/v1/campaigns/:campaign_id/revenue",
                get(rest::handle_campaign_revenue),
            )
            .route("/v1/revenue", get(rest::handle_revenue_summary))
            .route("/v1/campaigns/:campaign_id/bayesian", get(rest::handle_bayesian))
            .route("/v1/campaigns/:campaign_id/alerts", get(rest::handle_alerts))
            // Control actions
            .route(
                "/v1/campaigns/:campaign_id/rebalance",
                post(rest::handle_rebalance),
            )
            .route("/v1/campaigns/:campaign_id/conclude", post(rest::handle_conclude))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve HTTP until Ctrl-C.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = self.router();
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Install the global recorder and serve scrapes on the metrics port. The
    /// listener is spawned onto the current runtime.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use optimizer_core::event_bus::noop_sink;
    use optimizer_core::store::{InMemoryCampaignStore, InMemoryEventStore};
    use optimizer_core::types::{Campaign, Creative, EventType};
    use optimizer_core::{Clock, ManualClock};
    use serde_json::Value;
    use tower::ServiceExt;

    fn server() -> (ApiServer, Arc<InMemoryEventStore>, Arc<InMemoryCampaignStore>) {
        let events = Arc::new(InMemoryEventStore::new());
        let campaigns = Arc::new(InMemoryCampaignStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        campaigns.upsert_campaign(Campaign {
            revenue_per_click: Some(2.0),
            revenue_per_impression: Some(0.1),
            ..Campaign::new("camp-1", "Spring")
        });
        campaigns.upsert_creative(Creative::new("cr-1", "camp-1"));
        campaigns.upsert_creative(Creative::new("cr-2", "camp-1"));
        let at = clock.now() - chrono::Duration::minutes(1);
        events.insert_many(EventType::Impression, "cr-1", "camp-1", at, 1000);
        events.insert_many(EventType::Click, "cr-1", "camp-1", at, 50);

        let config = AppConfig::default();
        let engine = Arc::new(CreativeEngine::new(
            config.clone(),
            events.clone(),
            campaigns.clone(),
            noop_sink(),
            clock,
        ));
        (ApiServer::new(config, engine), events, campaigns)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_select_endpoint() {
        let (server, _, _) = server();
        let (status, body) = send(
            server.router(),
            post_json(
                "/v1/campaigns/camp-1/select",
                r#"{"algorithm": "epsilon_greedy", "seed": 3}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["campaign_id"], "camp-1");
        assert_eq!(body["algorithm"], "epsilon_greedy");
        assert_eq!(body["degraded"], false);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let (server, events, campaigns) = server();

        let (status, body) = send(server.router(), get("/v1/campaigns/camp-404/alerts")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        campaigns.upsert_campaign(Campaign::new("camp-2", "Empty"));
        let (status, body) =
            send(server.router(), post_json("/v1/campaigns/camp-2/select", "{}")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "invalid_configuration");

        let (status, body) = send(
            server.router(),
            get("/v1/campaigns/camp-1/revenue?start=2024-01-02T00:00:00Z&end=2024-01-01T00:00:00Z"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        for window in ["0", "-30", "1000000000000"] {
            let uri = format!("/v1/campaigns/camp-1/performance?window_minutes={window}");
            let (status, body) = send(server.router(), get(&uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{window}");
            assert_eq!(body["error"], "invalid_input");
        }

        events.set_offline(true);
        let (status, body) = send(server.router(), get("/v1/campaigns/camp-1/revenue")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "data_unavailable");
    }

    #[tokio::test]
    async fn test_revenue_and_events() {
        let (server, events, _) = server();

        let (status, body) = send(server.router(), get("/v1/campaigns/camp-1/revenue")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["estimated_revenue"].as_f64().unwrap(), 200.0);

        let event = r#"{"creative_id":"cr-2","campaign_id":"camp-1","event_type":"impression","occurred_at":"2024-01-01T00:00:00Z"}"#;
        let before = events.len();
        let (status, _) = send(server.router(), post_json("/v1/events", event)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(events.len(), before + 1);

        let bad = format!(
            r#"{{"creative_id":"cr-2","campaign_id":"camp-1","event_type":"click","occurred_at":"{}","value":3.0}}"#,
            Utc::now().to_rfc3339()
        );
        let (status, body) = send(server.router(), post_json("/v1/events", &bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (status, body) = send(server.router(), get("/v1/revenue")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_impressions"], 1001);
    }

    #[tokio::test]
    async fn test_metrics_exporter_serves_scrapes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let (base, _, _) = server();
        let mut config = AppConfig::default();
        config.api.host = "127.0.0.1".to_string();
        config.metrics.port = port;
        ApiServer::new(config, base.engine.clone())
            .start_metrics()
            .await
            .unwrap();
        metrics::counter!("api.selections").increment(1);

        let response = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream
                .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        })
        .await
        .unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("api_selections"), "{response}");
    }

    #[tokio::test]
    async fn test_operational_endpoints() {
        let (server, _, campaigns) = server();
        let (status, body) = send(server.router(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, _) = send(server.router(), get("/ready")).await;
        assert_eq!(status, StatusCode::OK);

        campaigns.set_offline(true);
        let (status, _) = send(server.router(), get("/ready")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = send(server.router(), get("/live")).await;
        assert_eq!(status, StatusCode::OK);
    }
}
