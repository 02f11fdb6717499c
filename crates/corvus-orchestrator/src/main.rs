use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use corvus_channels::{ChannelEvent, ChannelManager};
use corvus_container::{ContainerRegistry, DockerEngine, HeartbeatTracker};
use corvus_core::types::{ChatId, GroupId, Priority};
use corvus_knowledge::{KnowledgePool, KnowledgeStore, SearchEngine};
use corvus_queue::QueueStore;
use corvus_scheduler::{JobSink, SchedulerEngine, SchedulerStore};
use corvus_telegram::TelegramAdapter;

mod app;
mod auth;
mod http;
mod pipeline;
mod prompt;
mod pubsub;
mod router;

use pipeline::{PipelineRunner, TaskAssignment};

/// Bridges fired scheduled tasks into the group queue as high-priority entries.
struct QueueJobSink {
    queue: corvus_queue::QueueHandle,
}

#[async_trait::async_trait]
impl JobSink for QueueJobSink {
    async fn submit(&self, group: &str, prompt: &str, _timeout: Duration) -> Result<(), String> {
        self.queue
            .enqueue(GroupId::new(group), ChatId::new("scheduler", group), Priority::High, prompt)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corvus_orchestrator=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("CONFIG").ok();
    let config = corvus_core::config::CorvusConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        corvus_core::config::CorvusConfig::default()
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let queue_store = QueueStore::open(format!("{}-queue.db", config.database.path)).await?;
    let (queue, queue_join) = corvus_queue::spawn(queue_store, config.queue.max_concurrent, |_id: &str| false).await?;
    corvus_queue::spawn_concurrency_sampler(queue.clone(), config.queue.max_concurrent);

    let sched_store = SchedulerStore::open(format!("{}-scheduler.db", config.database.path)).await?;
    let sink: Arc<dyn JobSink> = Arc::new(QueueJobSink { queue: queue.clone() });
    let sched_engine = SchedulerEngine::new(sched_store, sink);
    let scheduler = sched_engine.handle();
    tokio::spawn(sched_engine.run(shutdown_rx.clone()));

    let knowledge_pool = KnowledgePool::open(std::path::Path::new(&config.database.knowledge_root).join("knowledge.db").as_path()).await?;
    let knowledge = Arc::new(KnowledgeStore::new(knowledge_pool.clone()));
    let search = Arc::new(SearchEngine::new(knowledge_pool, None, None, None));

    let heartbeats = HeartbeatTracker::new();
    let engine = Arc::new(DockerEngine::new());
    let registry = Arc::new(ContainerRegistry::new(engine, heartbeats));
    if let Err(e) = registry.sweep_orphans().await {
        warn!("startup orphan sweep failed: {e}");
    }

    let ipc_secret = config
        .ipc
        .secret
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ipc_root = PathBuf::from(&config.database.workspace_root).join("ipc");
    let workspace_root = PathBuf::from(&config.database.workspace_root);
    let session_root = PathBuf::from(&config.database.workspace_root).join("sessions");
    let pipeline = Arc::new(PipelineRunner::new(
        registry.clone(),
        ipc_root,
        workspace_root,
        session_root,
        ipc_secret,
        "corvus-agent:latest".to_string(),
        config.container.memory_limit.clone().unwrap_or_else(|| "1g".to_string()),
        config.container.cpu_quota.clone().unwrap_or_else(|| "1.0".to_string()),
        Duration::from_millis(config.container.timeout_ms),
        shutdown_rx.clone(),
    ));

    let mut channels = ChannelManager::new();
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<ChannelEvent>(256);
    if config.enabled_channels.iter().any(|c| c == "telegram") {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            let adapter = Arc::new(TelegramAdapter::new(token, event_tx.clone()));
            channels.register(adapter);
        } else {
            warn!("telegram enabled but TELEGRAM_BOT_TOKEN is not set, skipping registration");
        }
    }
    let channels = Arc::new(channels);

    let state = Arc::new(app::AppState::new(
        config.clone(),
        queue.clone(),
        scheduler,
        registry.clone(),
        channels.clone(),
        knowledge,
        search.clone(),
        pipeline.clone(),
    ));

    drop(event_tx);
    tokio::spawn(ingress_loop(event_rx, queue.clone(), channels.clone(), search.clone()));
    tokio::spawn(worker_loop(queue.clone(), pipeline, channels.clone(), search, shutdown_rx.clone()));

    let router = app::build_router(state.clone());
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    info!("corvus orchestrator listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve = axum::serve(listener, router);

    tokio::select! {
        result = serve => { result?; }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining");
        }
    }

    let _ = shutdown_tx.send(true);
    channels.disconnect_all().await;
    if let Err(e) = registry.shutdown().await {
        warn!("container registry shutdown error: {e}");
    }
    queue_join.abort();

    Ok(())
}

/// Turn inbound channel events into replies or queue entries, depending on
/// tier. `Inline` and `KnowledgeOnly` never touch the container pipeline:
/// the former gets an instant canned reply, the latter a direct knowledge
/// search. Only `ContainerShort`/`ContainerFull` go through the queue.
async fn ingress_loop(
    mut events: tokio::sync::mpsc::Receiver<ChannelEvent>,
    queue: corvus_queue::QueueHandle,
    channels: Arc<ChannelManager>,
    search: Arc<SearchEngine>,
) {
    while let Some(event) = events.recv().await {
        let ChannelEvent::MessageReceived { chat_id, content, .. } = event else {
            continue;
        };
        let classification = router::classify(&content);
        let channel_name = chat_id.channel().to_string();

        match classification.tier {
            corvus_core::types::Tier::Inline => {
                let reply = inline_reply(&content);
                if let Err(e) = channels.send_text(&channel_name, &chat_id, reply).await {
                    warn!(%channel_name, error = %e, "failed to deliver inline reply");
                }
            }
            corvus_core::types::Tier::KnowledgeOnly => {
                let reply = knowledge_only_reply(&search, &content).await;
                if let Err(e) = channels.send_text(&channel_name, &chat_id, &reply).await {
                    warn!(%channel_name, error = %e, "failed to deliver knowledge-only reply");
                }
            }
            corvus_core::types::Tier::ContainerShort | corvus_core::types::Tier::ContainerFull => {
                if let Err(e) = queue.enqueue(GroupId::main(), chat_id, Priority::Normal, content).await {
                    warn!("failed to enqueue inbound message: {e}");
                }
            }
        }
    }
}

fn inline_reply(text: &str) -> &'static str {
    let lower = text.trim().to_lowercase();
    if lower.starts_with('/') {
        "Unrecognized command."
    } else if lower.len() <= 4 {
        "👍"
    } else {
        "Hi there."
    }
}

async fn knowledge_only_reply(search: &SearchEngine, query: &str) -> String {
    let result = search
        .search(corvus_knowledge::SearchQuery {
            text: query.to_string(),
            mode: corvus_knowledge::SearchMode::Hybrid,
            filter: corvus_knowledge::SearchFilter {
                type_filter: None,
                project_filter: None,
                layer_filter: Some(corvus_core::types::MemoryLayer::Semantic),
            },
            limit: 3,
            expected_lexical_dominant: false,
        })
        .await;

    match result {
        Ok(hits) if !hits.is_empty() => {
            let mut reply = String::from("Here's what I found:\n");
            for hit in hits {
                reply.push_str(&format!("- {}: {}\n", hit.title, hit.snippet));
            }
            reply
        }
        Ok(_) => "I don't have anything in the knowledge base for that.".to_string(),
        Err(e) => {
            warn!(error = %e, "knowledge-only search failed");
            "I couldn't search the knowledge base right now.".to_string()
        }
    }
}

/// Polls the main group's queue and runs each entry through the container
/// pipeline, reporting the outcome back to the originating chat.
async fn worker_loop(
    queue: corvus_queue::QueueHandle,
    pipeline: Arc<PipelineRunner>,
    channels: Arc<ChannelManager>,
    search: Arc<SearchEngine>,
    mut shutdown: watch::Receiver<bool>,
) {
    const SYSTEM_PROMPT: &str = "You are Corvus, an autonomous assistant running inside a sandboxed container.";

    let mut interval = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        let Some(entry) = queue.next_for_group(GroupId::main()).await else {
            continue;
        };

        let classification = router::classify(&entry.prompt);
        let assembled = prompt::assemble(&search, &entry.group, SYSTEM_PROMPT, None, &[], &entry.prompt).await;
        let assignment = TaskAssignment { entry_id: entry.id.clone(), group: entry.group.clone(), prompt: assembled };

        let outcome = pipeline.run(assignment, classification.tier).await;
        let success = outcome.is_ok();
        let channel_name = entry.chat.channel().to_string();
        match outcome {
            Ok(result) => {
                if let Err(e) = channels.send_text(&channel_name, &entry.chat, &result.text).await {
                    warn!(entry_id = %entry.id, error = %e, "failed to deliver reply");
                }
            }
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "task failed");
            }
        }

        if let Err(e) = queue.complete(entry.id, success).await {
            warn!("failed to mark queue entry complete: {e}");
        }
    }
}
