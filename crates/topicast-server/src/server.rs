//! `TopicastServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, Extensions, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::identity::resolve_client_id;
use crate::websocket::manager::ConnectionManager;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry and fan-out.
    pub manager: Arc<ConnectionManager>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The topicast server.
pub struct TopicastServer {
    config: Arc<ServerConfig>,
    manager: Arc<ConnectionManager>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl TopicastServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let manager = Arc::new(ConnectionManager::new(
            config.manager.clone(),
            shutdown.token(),
        ));
        Self {
            config: Arc::new(config),
            manager,
            shutdown,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: self.manager.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/publish/{topic}", post(publish_handler))
            .route("/broadcast", post(broadcast_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Get the connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve on `listener` until the shutdown coordinator fires, then tear
    /// down every connection.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        self.manager.start();
        info!(addr = %listener.local_addr()?, "topicast server listening");

        let token = self.shutdown.token();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;

        self.manager.shutdown().await;
        result
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`) and the serving task.
    pub async fn listen(
        self: &Arc<Self>,
    ) -> std::io::Result<(SocketAddr, JoinHandle<std::io::Result<()>>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let server = Arc::clone(self);
        let handle = tokio::spawn(async move { server.serve(listener).await });
        Ok((addr, handle))
    }
}

#[derive(Debug, Deserialize)]
struct WsParams {
    client_id: Option<String>,
}

/// GET /ws: upgrade and hand the socket to a session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    jar: CookieJar,
    extensions: Extensions,
) -> impl IntoResponse {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let cookie = jar.get(&state.config.cookie_name).map(Cookie::value);
    let (client_id, generated) = resolve_client_id(params.client_id.as_deref(), cookie, peer);
    debug!(client_id = %client_id, generated, "websocket upgrade");

    let jar = jar.add(
        Cookie::build((state.config.cookie_name.clone(), client_id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .permanent(),
    );

    let manager = state.manager.clone();
    let options = state.config.connection.clone();
    let capacity = state.config.send_queue_capacity;
    let cancel = state.shutdown.token();
    let upgrade = ws
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, client_id, manager, options, capacity, cancel)
        });
    (jar, upgrade)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.manager.connection_count().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Outcome of a producer call.
#[derive(Debug, Serialize)]
struct DeliveryReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<String>,
    delivered: usize,
}

/// POST /publish/{topic}: body goes to every subscriber of `topic`.
async fn publish_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Json<DeliveryReport> {
    let delivered = state.manager.broadcast_to_topic(&topic, body).await;
    Json(DeliveryReport {
        topic: Some(topic),
        delivered,
    })
}

/// POST /broadcast: body goes to every connected client.
async fn broadcast_handler(State(state): State<AppState>, body: Bytes) -> Json<DeliveryReport> {
    let delivered = state.manager.broadcast(body).await;
    Json(DeliveryReport {
        topic: None,
        delivered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use crate::websocket::testing::subscribed;

    fn make_server() -> TopicastServer {
        TopicastServer::new(ServerConfig::default(), None)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_req(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let (conn, _probe) = subscribed("c1", &[]);
        server.manager().add_client("c1", conn).await;

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 1);
    }

    #[tokio::test]
    async fn publish_reaches_only_topic_subscribers() {
        let server = make_server();
        let (c1, p1) = subscribed("c1", &["event_updates"]);
        let (c2, p2) = subscribed("c2", &["central_ABC123"]);
        server.manager().add_client("c1", c1).await;
        server.manager().add_client("c2", c2).await;

        let resp = server
            .router()
            .oneshot(post_req("/publish/event_updates", r#"{"kind":"x"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["topic"], "event_updates");
        assert_eq!(parsed["delivered"], 1);
        assert_eq!(p1.messages(), vec![r#"{"kind":"x"}"#]);
        assert!(p2.messages().is_empty());
    }

    #[tokio::test]
    async fn publish_without_subscribers_delivers_nothing() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(post_req("/publish/nobody", "x"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["delivered"], 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone() {
        let server = make_server();
        let (c1, p1) = subscribed("c1", &["a"]);
        let (c2, p2) = subscribed("c2", &[]);
        server.manager().add_client("c1", c1).await;
        server.manager().add_client("c2", c2).await;

        let resp = server
            .router()
            .oneshot(post_req("/broadcast", "hello"))
            .await
            .unwrap();
        let parsed = body_json(resp).await;
        assert_eq!(parsed["delivered"], 2);
        assert!(parsed.get("topic").is_none());
        assert_eq!(p1.messages(), vec!["hello"]);
        assert_eq!(p2.messages(), vec!["hello"]);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let server = make_server();
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders_text() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = TopicastServer::new(ServerConfig::default(), Some(handle));
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn ws_requires_upgrade() {
        let server = make_server();
        let req = Request::builder()
            .uri("/ws")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn publish_requires_post() {
        let server = make_server();
        let req = Request::builder()
            .uri("/publish/a")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.config().port, 8080);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let server = Arc::new(make_server());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move { running.serve(listener).await });

        server.shutdown().shutdown();
        handle.await.unwrap().unwrap();
        assert!(server.manager().is_shut_down());
    }
}
