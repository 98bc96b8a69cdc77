//! HTTP API Server
//!
//! Read-only REST API exposing the membership table and recent state changes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::state::{Endpoint, Node, NodeInformation, NodeState, NodeStateChanged};

/// Number of state changes kept for `/events`
pub const EVENT_HISTORY: usize = 256;

/// A state change with the time it was observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub at: DateTime<Utc>,
    pub endpoint: Endpoint,
    pub previous: NodeState,
    pub current: NodeState,
}

/// Ring buffer of recent state changes
#[derive(Default)]
pub struct EventLog {
    events: RwLock<VecDeque<RecordedEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: NodeStateChanged) {
        let mut events = self.events.write().await;
        if events.len() == EVENT_HISTORY {
            events.pop_front();
        }
        events.push_back(RecordedEvent {
            at: Utc::now(),
            endpoint: event.endpoint,
            previous: event.previous,
            current: event.current,
        });
    }

    /// Oldest first
    pub async fn recent(&self) -> Vec<RecordedEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    /// Record every event from `node` until cancelled
    pub fn spawn_recorder(self: &Arc<Self>, node: &Node, cancel: CancellationToken) -> JoinHandle<()> {
        let log = Arc::clone(self);
        let mut events = node.subscribe();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => log.record(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Event log lagged, {} state changes dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Shared application state
pub struct AppState {
    pub node: Arc<Node>,
    pub events: Arc<EventLog>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, node: Arc<Node>, events: Arc<EventLog>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { node, events }),
        }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/members", get(handle_members))
            .route("/members/:endpoint", get(handle_member))
            .route("/events", get(handle_events))
            .with_state(state)
    }

    /// Serve until cancelled
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub endpoint: Endpoint,
    pub live: usize,
    pub non_live: usize,
}

/// One property as shown over HTTP
#[derive(Debug, Serialize, Deserialize)]
pub struct PropertyView {
    pub value: String,
    pub version: u64,
}

/// One member as shown over HTTP
#[derive(Debug, Serialize, Deserialize)]
pub struct MemberView {
    pub endpoint: Endpoint,
    pub epoch: u64,
    pub state: NodeState,
    pub last_known_property_version: u64,
    pub properties: BTreeMap<String, PropertyView>,
}

impl From<&NodeInformation> for MemberView {
    fn from(node: &NodeInformation) -> Self {
        Self {
            endpoint: node.endpoint.clone(),
            epoch: node.node_version,
            state: node.node_state(),
            last_known_property_version: node.last_known_property_version(),
            properties: node
                .properties
                .iter()
                .map(|(key, property)| {
                    (
                        key.clone(),
                        PropertyView {
                            value: property.value.to_string(),
                            version: property.version,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let self_state = state
        .node
        .self_info()
        .await
        .map(|n| n.node_state())
        .unwrap_or(NodeState::Unknown);

    Json(HealthResponse {
        healthy: self_state == NodeState::Live,
        endpoint: state.node.endpoint().clone(),
        live: state.node.live_endpoints().await.len(),
        non_live: state.node.non_live_endpoints().await.len(),
    })
}

async fn handle_members(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let members: Vec<MemberView> = state.node.known_nodes().await.iter().map(MemberView::from).collect();
    Json(members)
}

async fn handle_member(
    State(state): State<Arc<AppState>>,
    Path(endpoint): Path<String>,
) -> impl IntoResponse {
    match state.node.get(&Endpoint::new(&endpoint)).await {
        Some(node) => Json(MemberView::from(&node)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Node {} not found", endpoint),
                code: "NODE_NOT_FOUND".to_string(),
            }),
        )
            .into_response(),
    }
}

async fn handle_events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.events.recent().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_state() -> Arc<AppState> {
        let node = Arc::new(Node::with_seeds(
            NodeInformation::create_self_node_with_epoch("10.0.0.1:7946", 3),
            ["10.0.0.2:7946"],
        ));
        Arc::new(AppState {
            node,
            events: Arc::new(EventLog::new()),
        })
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = handle_health(State(app_state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let health: HealthResponse = body_json(response).await;
        assert!(health.healthy);
        assert_eq!(health.live, 0);
        assert_eq!(health.non_live, 1);
    }

    #[tokio::test]
    async fn test_member_lookup() {
        let state = app_state();

        let response = handle_member(State(state.clone()), Path("10.0.0.1:7946".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let member: MemberView = body_json(response).await;
        assert_eq!(member.epoch, 3);
        assert_eq!(member.state, NodeState::Live);
        assert_eq!(member.properties["node_state"].value, "LIVE");

        let response = handle_member(State(state), Path("10.0.0.9:7946".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error: ErrorResponse = body_json(response).await;
        assert_eq!(error.code, "NODE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let log = EventLog::new();
        for i in 0..(EVENT_HISTORY + 10) {
            log.record(NodeStateChanged {
                endpoint: Endpoint::new(format!("10.0.0.{}:1", i % 250)),
                previous: NodeState::Unknown,
                current: NodeState::Live,
            })
            .await;
        }
        let recent = log.recent().await;
        assert_eq!(recent.len(), EVENT_HISTORY);
        assert_eq!(recent[0].endpoint.as_str(), "10.0.0.10:1");
    }

    #[tokio::test]
    async fn test_recorder_follows_node() {
        let state = app_state();
        let cancel = CancellationToken::new();
        let recorder = state.events.spawn_recorder(&state.node, cancel.clone());

        state
            .node
            .assign_node_state(&Endpoint::new("10.0.0.2:7946"), NodeState::Dead)
            .await
            .unwrap();

        let mut recent = Vec::new();
        for _ in 0..100 {
            recent = state.events.recent().await;
            if !recent.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].current, NodeState::Dead);

        cancel.cancel();
        recorder.await.unwrap();
    }
}
