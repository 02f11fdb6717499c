//! `GET /health` and `GET /status` — local-only operational probes, no auth.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use corvus_container::ContainerStatus;

use crate::app::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": VERSION,
        "uptime_secs": uptime_secs(&state),
    }))
}

pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let containers = state.registry.list().await;
    let active_containers = containers.iter().filter(|c| c.status == ContainerStatus::InUse).count();

    let mut groups: Vec<String> = containers.iter().map(|c| c.group.as_str().to_string()).collect();
    for (name, _) in state.channels.states() {
        groups.push(name);
    }
    groups.sort();
    groups.dedup();

    let mut queue_depth = 0usize;
    for group in &groups {
        queue_depth += state.queue.depth(corvus_core::types::GroupId::new(group.clone())).await;
    }

    Json(json!({
        "active_containers": active_containers,
        "queue_depth": queue_depth,
        "registered_groups": groups,
        "resources": {
            "cpu_usage": read_load_average(),
            "memory_free": read_free_memory_ratio(),
            "current_max": state.config.queue.max_concurrent,
        },
        "recent_errors": Vec::<String>::new(),
        "uptime": uptime_secs(&state),
        "version": VERSION,
    }))
}

fn uptime_secs(state: &AppState) -> i64 {
    chrono::Utc::now().signed_duration_since(state.started_at).num_seconds()
}

fn read_load_average() -> Option<f64> {
    let raw = std::fs::read_to_string("/proc/loadavg").ok()?;
    let one_min: f64 = raw.split_whitespace().next()?.parse().ok()?;
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as f64;
    Some(one_min / cpus)
}

fn read_free_memory_ratio() -> Option<f64> {
    let raw = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut available = None;
    for line in raw.lines() {
        if let Some(v) = line.strip_prefix("MemTotal:") {
            total = parse_kb(v);
        } else if let Some(v) = line.strip_prefix("MemAvailable:") {
            available = parse_kb(v);
        }
    }
    match (total, available) {
        (Some(t), Some(a)) if t > 0.0 => Some(a / t),
        _ => None,
    }
}

fn parse_kb(s: &str) -> Option<f64> {
    s.trim().strip_suffix("kB").unwrap_or(s.trim()).trim().parse().ok()
}
