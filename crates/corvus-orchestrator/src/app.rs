use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use chrono::{DateTime, Utc};

use corvus_channels::ChannelManager;
use corvus_container::ContainerRegistry;
use corvus_core::config::CorvusConfig;
use corvus_knowledge::{KnowledgeStore, SearchEngine};
use corvus_queue::QueueHandle;
use corvus_scheduler::SchedulerHandle;

use crate::pipeline::PipelineRunner;
use crate::pubsub::EventBus;

/// Central shared state, passed as `Arc<AppState>` to every Axum handler.
pub struct AppState {
    pub config: CorvusConfig,
    pub queue: QueueHandle,
    pub scheduler: SchedulerHandle,
    pub registry: Arc<ContainerRegistry>,
    pub channels: Arc<ChannelManager>,
    pub knowledge: Arc<KnowledgeStore>,
    pub search: Arc<SearchEngine>,
    pub pipeline: Arc<PipelineRunner>,
    pub events: EventBus,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CorvusConfig,
        queue: QueueHandle,
        scheduler: SchedulerHandle,
        registry: Arc<ContainerRegistry>,
        channels: Arc<ChannelManager>,
        knowledge: Arc<KnowledgeStore>,
        search: Arc<SearchEngine>,
        pipeline: Arc<PipelineRunner>,
    ) -> Self {
        Self {
            config,
            queue,
            scheduler,
            registry,
            channels,
            knowledge,
            search,
            pipeline,
            events: EventBus::default(),
            started_at: Utc::now(),
        }
    }
}

/// Assemble the full Axum router: unauthenticated operational probes plus
/// the bearer-guarded knowledge-engine API.
pub fn build_router(state: Arc<AppState>) -> Router {
    let knowledge_api = crate::http::knowledge::router()
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_bearer));

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/status", get(crate::http::health::status_handler))
        .merge(knowledge_api)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
